//! Typed signal subscriptions, in both the "fire for every occurrence" and
//! the "fire only when named arguments match" shapes.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dbus::{BusName, Error, Message, Path};
use dbus::arg::{AppendAll, ReadAll};
use dbus::channel::{MatchingReceiver, Sender, Token};
use dbus::message::SignalArgs;
use dbus::nonblock::{Proxy, SyncConnection};
use log::{error, warn};

use crate::cache::AboutToBeDestroyed;

/// Returned by [`SignalHandle::connect`] / [`SignalHandle::connect_with_match_args`];
/// pass back to [`SignalHandle::disconnect`] to remove that one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// A zero-indexed argument index paired with the exact string it must equal
/// for a filtered handler to fire.
pub type MatchArgs = Vec<(u32, String)>;

type Handler<S> = Box<dyn FnMut(S) + Send + 'static>;

struct Group<S> {
    match_args: MatchArgs,
    /// Whether a narrowing `Bus.add_match` was sent for this group (never
    /// true for the unfiltered, empty-`match_args` group).
    has_bus_match: bool,
    handlers: Vec<(SubscriptionToken, Handler<S>)>,
}

/// A live subscription to signal `S` emitted from one object path.
///
/// Holds a base match on `{signal, path}`, installed once at construction,
/// plus zero or more argument-filtered sub-groups each backed by their own
/// narrowing `Bus.add_match`. Dropping the handle tears down the dispatch
/// route, every narrowing match, and fires the "about-to-be-destroyed" hooks
/// registered by a [`crate::cache::LifetimeConstrainedCache`].
pub struct SignalHandle<S> {
    conn: Arc<SyncConnection>,
    path: Path<'static>,
    destination: Option<BusName<'static>>,
    timeout: Duration,
    dispatch_token: Mutex<Option<Token>>,
    groups: Mutex<Vec<Group<S>>>,
    next_token: AtomicU64,
    destroy_hooks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl<S> SignalHandle<S>
where
    S: SignalArgs + ReadAll + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(conn: Arc<SyncConnection>, path: Path<'static>, destination: Option<BusName<'static>>, timeout: Duration) -> Arc<Self> {
        let handle = Arc::new(SignalHandle {
            conn: conn.clone(),
            path: path.clone(),
            destination,
            timeout,
            dispatch_token: Mutex::new(None),
            groups: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(0),
            destroy_hooks: Mutex::new(Vec::new()),
        });

        let mr = S::match_rule(handle.destination.as_ref(), Some(&path)).static_clone();
        let weak = Arc::downgrade(&handle);
        let token = conn.start_receive(mr, Box::new(move |msg, _conn| {
            if let Some(handle) = weak.upgrade() {
                handle.dispatch(&msg);
            }
            true
        }));
        *handle.dispatch_token.lock().unwrap() = Some(token);
        handle
    }

    fn dispatch(&self, msg: &Message) {
        let decoded = match S::from_message(msg) {
            Some(s) => s,
            None => return,
        };
        let mut groups = self.groups.lock().unwrap();
        for group in groups.iter_mut() {
            if !group_matches(msg, &group.match_args) { continue; }
            for (_, handler) in group.handlers.iter_mut() {
                handler(decoded.clone());
            }
        }
    }

    fn next_token(&self) -> SubscriptionToken {
        SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Adds an unfiltered handler, fired for every occurrence of the signal.
    pub fn connect<F: FnMut(S) + Send + 'static>(&self, handler: F) -> SubscriptionToken {
        self.connect_with_match_args(handler, Vec::new())
    }

    /// Adds a handler that only fires when every `(index, value)` pair in
    /// `match_args` equals the corresponding message argument.
    ///
    /// The first handler added for a given `match_args` set additionally
    /// narrows the subscription at the bus daemon via `AddMatch`.
    pub fn connect_with_match_args<F: FnMut(S) + Send + 'static>(&self, handler: F, match_args: MatchArgs) -> SubscriptionToken {
        let token = self.next_token();
        let mut groups = self.groups.lock().unwrap();
        if let Some(group) = groups.iter_mut().find(|g| g.match_args == match_args) {
            group.handlers.push((token, Box::new(handler)));
            return token;
        }
        let has_bus_match = !match_args.is_empty();
        if has_bus_match {
            let _ = self.add_match(&match_args);
        }
        groups.push(Group { match_args, has_bus_match, handlers: vec![(token, Box::new(handler))] });
        token
    }

    /// Removes one handler. If it was the last handler in its `match_args`
    /// group, also removes that group's narrowing `AddMatch`, if any.
    pub fn disconnect(&self, token: SubscriptionToken) {
        let mut groups = self.groups.lock().unwrap();
        let mut empty_group = None;
        for (idx, group) in groups.iter_mut().enumerate() {
            let before = group.handlers.len();
            group.handlers.retain(|(t, _)| *t != token);
            if group.handlers.len() != before && group.handlers.is_empty() {
                empty_group = Some(idx);
                break;
            }
        }
        if let Some(idx) = empty_group {
            let group = groups.remove(idx);
            if group.has_bus_match {
                let _ = self.remove_match(&group.match_args);
            }
        }
    }

    /// Emits `args` as this signal from the owning object's path. Mirrors
    /// [`crate::Object::emit_signal`].
    pub fn emit(&self, args: &S) -> Result<(), Error> where S: AppendAll {
        self.conn.send(args.to_emit_message(&self.path)).map_err(|_| {
            warn!("failed to queue signal {}.{} for sending", S::INTERFACE, S::NAME);
            Error::new_failed("Failed to queue signal for sending")
        })
    }

    fn daemon(&self) -> Proxy<'static, Arc<SyncConnection>> {
        Proxy::new("org.freedesktop.DBus", "/org/freedesktop/DBus", self.timeout, self.conn.clone())
    }

    fn add_match(&self, match_args: &MatchArgs) -> Result<(), Error> {
        let rule = narrowed_match_str::<S>(&self.path, match_args);
        let daemon = self.daemon();
        let result = futures_executor::block_on(daemon.method_call::<(), _, _, _>("org.freedesktop.DBus", "AddMatch", (rule,)));
        if let Err(ref e) = result { error!("AddMatch for {}.{} rejected by daemon: {}", S::INTERFACE, S::NAME, e); }
        result
    }

    fn remove_match(&self, match_args: &MatchArgs) -> Result<(), Error> {
        let rule = narrowed_match_str::<S>(&self.path, match_args);
        let daemon = self.daemon();
        let result = futures_executor::block_on(daemon.method_call::<(), _, _, _>("org.freedesktop.DBus", "RemoveMatch", (rule,)));
        if let Err(ref e) = result { error!("RemoveMatch for {}.{} rejected by daemon: {}", S::INTERFACE, S::NAME, e); }
        result
    }
}

fn narrowed_match_str<S: SignalArgs>(path: &Path<'static>, match_args: &MatchArgs) -> String {
    let mut s = S::match_rule(None, Some(path)).match_str();
    let mut sorted = match_args.clone();
    sorted.sort_by_key(|(idx, _)| *idx);
    for (idx, value) in sorted {
        s.push_str(&format!(",arg{}='{}'", idx, value));
    }
    s
}

/// Walks the message's argument list to each filtered index and compares it
/// (as a string) against the expected value.
fn group_matches(msg: &Message, match_args: &MatchArgs) -> bool {
    if match_args.is_empty() { return true; }
    let mut sorted = match_args.clone();
    sorted.sort_by_key(|(idx, _)| *idx);
    let mut iter = msg.iter_init();
    let mut pos = 0u32;
    for (idx, expected) in sorted {
        while pos < idx { if !iter.next() { return false; } pos += 1; }
        let found: Option<String> = iter.get();
        if found.as_deref() != Some(expected.as_str()) { return false; }
    }
    true
}

impl<S> AboutToBeDestroyed for SignalHandle<S> {
    fn on_about_to_be_destroyed(&self, f: Box<dyn FnOnce() + Send + 'static>) {
        self.destroy_hooks.lock().unwrap().push(f);
    }
}

impl<S> Drop for SignalHandle<S> {
    fn drop(&mut self) {
        if let Some(token) = self.dispatch_token.lock().unwrap().take() {
            self.conn.stop_receive(token);
        }
        for group in self.groups.get_mut().unwrap().drain(..) {
            if group.has_bus_match {
                let _ = self.remove_match(&group.match_args);
            }
        }
        for hook in self.destroy_hooks.get_mut().unwrap().drain(..) { hook() }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Pinged { who: String }

    impl dbus::arg::AppendAll for Pinged {
        fn append(&self, i: &mut dbus::arg::IterAppend) { i.append(&self.who); }
    }
    impl dbus::arg::ReadAll for Pinged {
        fn read(i: &mut dbus::arg::Iter) -> Result<Self, dbus::arg::TypeMismatchError> {
            Ok(Pinged { who: i.read()? })
        }
    }
    impl SignalArgs for Pinged {
        const NAME: &'static str = "Pinged";
        const INTERFACE: &'static str = "com.example.dbusobject.signal";
    }

    #[test]
    fn narrowed_match_str_sorts_and_formats() {
        let path: Path<'static> = "/obj".into();
        let s = narrowed_match_str::<Pinged>(&path, &vec![(1, "b".into()), (0, "a".into())]);
        assert!(s.ends_with(",arg0='a',arg1='b'"));
    }

    #[test]
    fn group_matches_checks_indexed_args() {
        let msg = Message::call_with_args("a.b", "/", "a.b", "c", ("x", "y", "z"));
        assert!(group_matches(&msg, &vec![(1, "y".into())]));
        assert!(!group_matches(&msg, &vec![(1, "nope".into())]));
        assert!(group_matches(&msg, &Vec::new()));
    }
}
