//! A well-known (or unique) bus name this process owns or talks to, and the
//! root from which its `Object`s are created.

use std::sync::Arc;
use std::time::Duration;

use dbus::{BusName, Error, Path};
use dbus::channel::{MatchingReceiver, Token};
use dbus::message::SignalArgs;
use dbus::nonblock::{Proxy, SyncConnection};
use dbus::RequestNameReply;
use log::{debug, warn};

use crate::object::Object;

/// Default per-call timeout used by `Service`/`Object` methods that don't
/// take one explicitly, matching the 25s the teacher's own `request_name`
/// uses for its internal `org.freedesktop.DBus` proxy.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(25);

/// Events surfaced by [`Service::watch_name`], derived from
/// `org.freedesktop.DBus.NameOwnerChanged`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameOwnerEvent {
    /// The watched name went from unowned to owned by `new_owner`.
    ServiceRegistered { new_owner: String },
    /// The watched name went from owned to unowned.
    ServiceUnregistered { old_owner: String },
    /// The watched name's owner changed directly from one peer to another.
    OwnerChanged { old_owner: String, new_owner: String },
}

struct NameOwnerChanged { name: String, old_owner: String, new_owner: String }

impl dbus::arg::ReadAll for NameOwnerChanged {
    fn read(i: &mut dbus::arg::Iter) -> Result<Self, dbus::arg::TypeMismatchError> {
        Ok(NameOwnerChanged { name: i.read()?, old_owner: i.read()?, new_owner: i.read()? })
    }
}

impl SignalArgs for NameOwnerChanged {
    const NAME: &'static str = "NameOwnerChanged";
    const INTERFACE: &'static str = "org.freedesktop.DBus";
}

impl Clone for NameOwnerChanged {
    fn clone(&self) -> Self {
        NameOwnerChanged { name: self.name.clone(), old_owner: self.old_owner.clone(), new_owner: self.new_owner.clone() }
    }
}

/// A bus name owned (skeleton) or merely addressed (stub) by this process,
/// and the factory for the `Object`s registered or proxied under it.
pub struct Service {
    conn: Arc<SyncConnection>,
    name: BusName<'static>,
    stub: bool,
    timeout: Duration,
}

impl Service {
    /// Requests `name` from the bus daemon; fails `AlreadyOwned` /
    /// `AlreadyOwner` if the name is taken and `allow_replacement` /
    /// `replace_existing` wasn't requested.
    pub async fn add_service(conn: Arc<SyncConnection>, name: impl Into<BusName<'static>>) -> Result<Self, Error> {
        let name = name.into();
        let reply = conn.request_name(&name, false, false, true).await?;
        match reply {
            RequestNameReply::PrimaryOwner => {}
            RequestNameReply::AlreadyOwner => {}
            RequestNameReply::Exists => return Err(Error::already_owned(&name, false)),
            RequestNameReply::InQueue => return Err(Error::already_owned(&name, false)),
        }
        debug!("acquired service name {}", name);
        Ok(Service { conn, name, stub: false, timeout: DEFAULT_TIMEOUT })
    }

    /// Wraps `name` as a stub (client-side) service, without requesting ownership.
    pub fn use_service(conn: Arc<SyncConnection>, name: impl Into<BusName<'static>>) -> Self {
        Service { conn, name: name.into(), stub: true, timeout: DEFAULT_TIMEOUT }
    }

    /// Like [`Self::use_service`], but fails `ServiceNotAvailable` if nothing
    /// currently owns `name`.
    pub async fn use_service_or_throw(conn: Arc<SyncConnection>, name: impl Into<BusName<'static>>) -> Result<Self, Error> {
        let name = name.into();
        let svc = Service { conn, name: name.clone(), stub: true, timeout: DEFAULT_TIMEOUT };
        if !svc.has_owner_for_name(&name).await? {
            return Err(Error::service_not_available(&name));
        }
        Ok(svc)
    }

    /// Queries `org.freedesktop.DBus.NameHasOwner`.
    pub async fn has_owner_for_name(&self, name: &str) -> Result<bool, Error> {
        let (has,): (bool,) = self.daemon().method_call("org.freedesktop.DBus", "NameHasOwner", (name.to_string(),)).await?;
        Ok(has)
    }

    pub fn name(&self) -> &BusName<'static> { &self.name }
    pub fn is_stub(&self) -> bool { self.stub }
    pub fn connection(&self) -> &Arc<SyncConnection> { &self.conn }

    /// A proxy bound to `org.freedesktop.DBus` at `/org/freedesktop/DBus`.
    pub fn daemon(&self) -> Proxy<'static, Arc<SyncConnection>> {
        Proxy::new("org.freedesktop.DBus", "/org/freedesktop/DBus", self.timeout, self.conn.clone())
    }

    /// Builds (or re-wraps) the object at `path` under this service.
    pub fn object_for_path(&self, path: impl Into<Path<'static>>) -> Arc<Object> {
        let path = path.into();
        if self.stub {
            Object::new_stub(self.conn.clone(), self.name.clone(), path, self.timeout)
        } else {
            Object::new_skeleton(self.conn.clone(), path, self.timeout)
        }
    }

    /// The object at `/`.
    pub fn root_object(&self) -> Arc<Object> { self.object_for_path("/") }

    /// Convenience alias for [`Self::object_for_path`] on the skeleton side,
    /// matching spec's `Object::add_object_for_path` naming.
    pub fn add_object_for_path(&self, path: impl Into<Path<'static>>) -> Result<Arc<Object>, Error> {
        if self.stub { return Err(Error::new_failed("add_object_for_path is only valid on a service this process owns")); }
        Ok(self.object_for_path(path))
    }

    /// Subscribes to `NameOwnerChanged` for `name`, surfacing register /
    /// unregister / owner-change events to `handler`.
    pub fn watch_name<F>(&self, name: impl Into<String>, mut handler: F) -> Token
    where F: FnMut(NameOwnerEvent) + Send + 'static {
        let name = name.into();
        let mr = NameOwnerChanged::match_rule(None, None).static_clone();
        self.conn.start_receive(mr, Box::new(move |msg, _conn| {
            if let Some(n) = NameOwnerChanged::from_message(&msg) {
                if n.name != name { return true; }
                let event = match (n.old_owner.is_empty(), n.new_owner.is_empty()) {
                    (true, false) => NameOwnerEvent::ServiceRegistered { new_owner: n.new_owner },
                    (false, true) => NameOwnerEvent::ServiceUnregistered { old_owner: n.old_owner },
                    _ => NameOwnerEvent::OwnerChanged { old_owner: n.old_owner, new_owner: n.new_owner },
                };
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event))).is_err() {
                    warn!("watch_name handler for {} panicked", name);
                }
            }
            true
        }))
    }

    /// Releases a name watch previously returned by [`Self::watch_name`].
    pub fn unwatch_name(&self, token: Token) {
        self.conn.stop_receive(token);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn name_owner_event_classification() {
        let registered = NameOwnerEvent::ServiceRegistered { new_owner: ":1.1".into() };
        let unregistered = NameOwnerEvent::ServiceUnregistered { old_owner: ":1.1".into() };
        assert_ne!(registered, unregistered);
    }
}
