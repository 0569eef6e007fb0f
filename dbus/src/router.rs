//! Generic message routing.
//!
//! A connection has two separate dispatch needs: handing a method reply back
//! to whoever is waiting for that exact serial, and finding which installed
//! signal/method handler, if any, wants to see an arbitrary incoming
//! message. `Replies` covers the first (a plain key→handler table). `MessageRouter`
//! covers the second: it pairs every installed handler with a `MatchRule` and
//! finds the first route whose rule matches a given message.

use std::collections::{BTreeMap, HashMap};
use crate::message::MatchRule;
use crate::Message;

/// Reply-by-serial table: maps the token a method call was sent under to the
/// one-shot callback waiting for its reply.
pub type Replies<F> = HashMap<crate::channel::Token, F>;

/// Generic key→handler table, parameterised by an ordered key type `K`.
///
/// Routes are stored alongside the `MatchRule` that was used to install
/// them. `dispatch`'s lookup removes the matched route from the table before
/// invoking its handler, so that a handler that uninstalls or reinstalls its
/// own route during dispatch can't deadlock against itself; callers that
/// want the route to persist past one dispatch re-insert it afterwards (see
/// `nonblock::Process::process_one`).
pub struct MessageRouter<K, V> {
    list: BTreeMap<K, (MatchRule<'static>, V)>,
    nextid: u64,
}

impl<K, V> Default for MessageRouter<K, V> {
    fn default() -> Self { MessageRouter { list: BTreeMap::new(), nextid: 1 } }
}

impl<K: From<u64> + Ord + Copy, V> MessageRouter<K, V> {
    /// Installs a route under a freshly generated key, returning that key.
    pub fn add(&mut self, m: MatchRule<'static>, v: V) -> K {
        let id = K::from(self.nextid);
        self.nextid += 1;
        self.list.insert(id, (m, v));
        id
    }
}

impl<K: Ord, V> MessageRouter<K, V> {
    /// Re-installs a route under a key that was previously removed from this
    /// same table (e.g. by `dispatch`, for a handler that wants to keep
    /// listening).
    pub fn insert(&mut self, (k, m, v): (K, MatchRule<'static>, V)) {
        self.list.insert(k, (m, v));
    }

    /// Removes the route installed under `id`, if any.
    pub fn uninstall_route(&mut self, id: K) -> Option<(MatchRule<'static>, V)> {
        self.list.remove(&id)
    }

    /// Alias for [`Self::uninstall_route`], kept for callers that think in
    /// terms of filters rather than routes.
    pub fn remove(&mut self, id: K) -> Option<(MatchRule<'static>, V)> { self.uninstall_route(id) }
}

impl<K: Ord + Copy, V> MessageRouter<K, V> {
    /// Finds the first route whose match rule matches `msg`, removes it from
    /// the table and returns it along with its key.
    ///
    /// The mutex (or `RefCell`, for thread-local connections) that guards
    /// the table is released by the caller before it invokes the returned
    /// handler: this method only ever takes the table lock for the duration
    /// of the lookup itself.
    pub fn dispatch(&mut self, msg: &Message) -> Option<(K, MatchRule<'static>, V)> {
        let found = self.list.iter_mut().find(|(_, v)| v.0.matches(msg)).map(|(k, _)| *k);
        found.map(|k| {
            let (m, v) = self.list.remove(&k).unwrap();
            (k, m, v)
        })
    }

    /// Older name for [`Self::dispatch`], kept where existing call sites
    /// already read naturally as "remove the matching filter".
    pub fn remove_matching(&mut self, msg: &Message) -> Option<(K, MatchRule<'static>, V)> {
        self.dispatch(msg)
    }
}
