//! Typed property proxies: a locally cached value kept fresh by
//! `org.freedesktop.DBus.Properties.PropertiesChanged`, refreshed on demand
//! by `Properties.Get` when no update has arrived yet.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dbus::{BusName, Error, Interface, Path};
use dbus::arg::{self, Arg, PropMap, RefArg, Variant};
use dbus::nonblock::{Proxy, SyncConnection};

use crate::cache::AboutToBeDestroyed;

/// A cached, strongly typed view of one remote (or local) D-Bus property.
///
/// Created through [`crate::Object::get_property`], which caches the handle
/// for as long as any caller still holds the returned `Arc`.
pub struct PropertyHandle<P> {
    conn: Arc<SyncConnection>,
    path: Path<'static>,
    destination: Option<BusName<'static>>,
    interface: Interface<'static>,
    name: String,
    writable: bool,
    timeout: Duration,
    cached: Mutex<Option<P>>,
    destroy_hooks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl<P> PropertyHandle<P>
where
    P: Arg + RefArg + arg::Append + Clone + Send + Sync + 'static,
    for<'a> P: arg::Get<'a>,
{
    pub(crate) fn new(
        conn: Arc<SyncConnection>,
        path: Path<'static>,
        destination: Option<BusName<'static>>,
        interface: Interface<'static>,
        name: String,
        writable: bool,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(PropertyHandle {
            conn, path, destination, interface, name, writable, timeout,
            cached: Mutex::new(None),
            destroy_hooks: Mutex::new(Vec::new()),
        })
    }

    pub fn interface(&self) -> &Interface<'static> { &self.interface }
    pub fn name(&self) -> &str { &self.name }
    pub fn is_writable(&self) -> bool { self.writable }

    /// Returns the cached value, if any, without touching the wire.
    pub fn cached(&self) -> Option<P> { self.cached.lock().unwrap().clone() }

    fn proxy(&self) -> Proxy<'static, Arc<SyncConnection>> {
        let dest = self.destination.clone().unwrap_or_else(|| BusName::from(":0.0"));
        Proxy::new(dest, self.path.clone(), self.timeout, self.conn.clone())
    }

    /// Returns the cached value if a `PropertiesChanged` update already
    /// refreshed it; otherwise blocks (asynchronously) on `Properties.Get`.
    pub async fn get(&self) -> Result<P, Error> {
        if let Some(v) = self.cached() { return Ok(v); }
        let (v,): (Variant<P>,) = self.proxy()
            .method_call("org.freedesktop.DBus.Properties", "Get", (self.interface.to_string(), self.name.clone()))
            .await?;
        *self.cached.lock().unwrap() = Some(v.0.clone());
        Ok(v.0)
    }

    /// Fails locally with `NotWritable` for a read-only property; otherwise
    /// issues `Properties.Set` and updates the local cache on success.
    pub async fn set(&self, value: P) -> Result<(), Error> {
        if !self.writable {
            return Err(Error::not_writable(&self.interface, &self.name));
        }
        self.proxy()
            .method_call::<(), _, _, _>("org.freedesktop.DBus.Properties", "Set",
                (self.interface.to_string(), self.name.clone(), Variant(value.clone())))
            .await?;
        *self.cached.lock().unwrap() = Some(value);
        Ok(())
    }

    /// Applies an incoming `PropertiesChanged` update for this property, if
    /// `changed` carries an entry under this handle's name and it downcasts
    /// to `P`. Used by `Object`'s property-changed vtable.
    pub(crate) fn apply_changed(&self, changed: &PropMap) {
        if let Some(v) = changed.get(&self.name) {
            if let Some(p) = arg::cast::<P>(&*v.0) {
                *self.cached.lock().unwrap() = Some(p.clone());
            }
        }
    }

    /// Invalidates the cache for this property, per an `invalidated` entry
    /// in an incoming `PropertiesChanged` signal.
    pub(crate) fn apply_invalidated(&self, invalidated: &[String]) {
        if invalidated.iter().any(|n| n == &self.name) {
            *self.cached.lock().unwrap() = None;
        }
    }
}

impl<P> AboutToBeDestroyed for PropertyHandle<P> {
    fn on_about_to_be_destroyed(&self, f: Box<dyn FnOnce() + Send + 'static>) {
        self.destroy_hooks.lock().unwrap().push(f);
    }
}

impl<P> Drop for PropertyHandle<P> {
    fn drop(&mut self) {
        for hook in self.destroy_hooks.get_mut().unwrap().drain(..) { hook() }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn property_map_cast_roundtrips() {
        let mut map: PropMap = PropMap::new();
        map.insert("Volume".into(), Variant(Box::new(42i32) as Box<dyn RefArg>));
        let v = map.get("Volume").unwrap();
        assert_eq!(arg::cast::<i32>(&*v.0), Some(&42));
    }
}
