//! Per-path facade: method dispatch, signal subscriptions, property get/set
//! routing, and `PropertiesChanged` multiplexing.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dbus::{BusName, Error, Interface, Member, Message, MessageType, Path};
use dbus::arg::{self, Append, AppendAll, Arg, PropMap, ReadAll, RefArg, Variant};
use dbus::channel::{MatchingReceiver, Sender, Token};
use dbus::message::SignalArgs;
use dbus::nonblock::{MethodReply, Proxy, SyncConnection};
use log::{debug, trace, warn};

use crate::cache::LifetimeConstrainedCache;
use crate::context::Context;
use crate::property::PropertyHandle;
use crate::signal::SignalHandle;

/// Identifies one D-Bus method for [`Object::install_method_handler`],
/// [`Object::invoke_method_synchronously`] and friends, the way
/// [`dbus::message::SignalArgs`] identifies a signal.
pub trait MethodName {
    const INTERFACE: &'static str;
    const NAME: &'static str;
}

/// A skeleton-side method handler: decodes its own arguments from
/// `ctx.message()` and queues a reply via `ctx.reply`/`ctx.do_reply`.
pub type MethodHandler = Box<dyn Fn(&mut Context) + Send + Sync>;

type PropertyChangedAdapter = Box<dyn Fn(&PropMap, &[String]) + Send + Sync>;
type GetPropertyHandler = Box<dyn Fn() -> Result<Variant<Box<dyn RefArg>>, Error> + Send + Sync>;
type SetPropertyHandler = Box<dyn Fn(Variant<Box<dyn RefArg>>) -> Result<(), Error> + Send + Sync>;

type PropertyRouter<H> = Arc<Mutex<HashMap<(String, String), H>>>;

/// A `(Service, ObjectPath)` facade. Holds the method router plus, for a
/// skeleton object, the property get/set routers and the `PropertiesChanged`
/// adapter vtable described in spec §4.9.
pub struct Object {
    conn: Arc<SyncConnection>,
    destination: Option<BusName<'static>>,
    path: Path<'static>,
    skeleton: bool,
    timeout: Duration,
    method_router: Mutex<HashMap<(String, String), MethodHandler>>,
    get_property_router: PropertyRouter<GetPropertyHandler>,
    set_property_router: PropertyRouter<SetPropertyHandler>,
    property_changed_vtable: Arc<Mutex<HashMap<(String, String), PropertyChangedAdapter>>>,
    signal_caches: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    property_caches: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    dispatch_token: Mutex<Option<Token>>,
    properties_changed_token: Mutex<Option<Token>>,
}

impl Object {
    /// Builds a skeleton object: installs the method-call dispatch route and
    /// the default `Properties.Get`/`GetAll`/`Set` handlers.
    pub(crate) fn new_skeleton(conn: Arc<SyncConnection>, path: Path<'static>, timeout: Duration) -> Arc<Self> {
        let obj = Arc::new(Object {
            conn: conn.clone(), destination: None, path: path.clone(), skeleton: true, timeout,
            method_router: Mutex::new(HashMap::new()),
            get_property_router: Arc::new(Mutex::new(HashMap::new())),
            set_property_router: Arc::new(Mutex::new(HashMap::new())),
            property_changed_vtable: Arc::new(Mutex::new(HashMap::new())),
            signal_caches: Mutex::new(HashMap::new()),
            property_caches: Mutex::new(HashMap::new()),
            dispatch_token: Mutex::new(None),
            properties_changed_token: Mutex::new(None),
        });
        obj.install_properties_interface();
        let mr = dbus::message::MatchRule { msg_type: Some(MessageType::MethodCall), path: Some(path), .. Default::default() }.static_clone();
        let weak = Arc::downgrade(&obj);
        let token = conn.start_receive(mr, Box::new(move |msg, conn| {
            if let Some(obj) = weak.upgrade() { obj.dispatch_method_call(msg, conn); }
            true
        }));
        *obj.dispatch_token.lock().unwrap() = Some(token);
        debug!("object {} registered as skeleton", obj.path);
        obj
    }

    /// Builds a stub object: a client-side facade with no local dispatch route.
    pub(crate) fn new_stub(conn: Arc<SyncConnection>, destination: BusName<'static>, path: Path<'static>, timeout: Duration) -> Arc<Self> {
        Arc::new(Object {
            conn, destination: Some(destination), path, skeleton: false, timeout,
            method_router: Mutex::new(HashMap::new()),
            get_property_router: Arc::new(Mutex::new(HashMap::new())),
            set_property_router: Arc::new(Mutex::new(HashMap::new())),
            property_changed_vtable: Arc::new(Mutex::new(HashMap::new())),
            signal_caches: Mutex::new(HashMap::new()),
            property_caches: Mutex::new(HashMap::new()),
            dispatch_token: Mutex::new(None),
            properties_changed_token: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path<'static> { &self.path }
    pub fn is_skeleton(&self) -> bool { self.skeleton }

    fn proxy(&self) -> Proxy<'static, Arc<SyncConnection>> {
        let dest = self.destination.clone().unwrap_or_else(|| BusName::from(":0.0"));
        Proxy::new(dest, self.path.clone(), self.timeout, self.conn.clone())
    }

    // --- method dispatch (skeleton side) ------------------------------------

    fn dispatch_method_call(&self, msg: Message, conn: &SyncConnection) {
        let mut ctx = match Context::new(msg) { Some(c) => c, None => return };
        let key = (
            ctx.interface().map(|i| i.to_string()).unwrap_or_default(),
            ctx.method().to_string(),
        );
        trace!("dispatching method call {}.{} on {}", key.0, key.1, self.path);
        let handler_present = self.method_router.lock().unwrap().contains_key(&key);
        if handler_present {
            self.call_method_handler(&key, &mut ctx);
        } else {
            ctx.set_reply(Some(ctx.message().error(
                &"org.freedesktop.DBus.Error.UnknownMethod".into(),
                &std::ffi::CString::new(format!("Unknown method {}", key.1)).unwrap(),
            )), true, true);
        }
        if let Err(_) = ctx.flush_messages(conn) {
            warn!("failed to send reply for {}.{}", key.0, key.1);
        }
    }

    fn call_method_handler(&self, key: &(String, String), ctx: &mut Context) {
        let router = self.method_router.lock().unwrap();
        if let Some(handler) = router.get(key) {
            // SAFETY-free: handlers are `Fn`, not `FnMut`, precisely so this
            // call can happen while the router mutex is held without
            // re-entrancy into `install_method_handler` deadlocking -- a
            // handler that installs a different method is fine, only
            // re-installing its own entry under the same key would block.
            //
            // A panicking handler must not bring down the dispatch thread:
            // caught here, logged, and turned into a Failed error reply.
            let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(&mut *ctx)));
            if caught.is_err() {
                warn!("method handler for {}.{} panicked", key.0, key.1);
                ctx.set_reply(Some(Error::new_failed("Method handler panicked").to_message(ctx.message())), true, true);
            }
        }
    }

    /// Installs a handler for `M`. Skeleton side only.
    pub fn install_method_handler<M: MethodName>(&self, handler: MethodHandler) {
        self.method_router.lock().unwrap().insert((M::INTERFACE.to_string(), M::NAME.to_string()), handler);
    }

    /// Removes a previously installed handler for `M`.
    pub fn uninstall_method_handler<M: MethodName>(&self) {
        self.method_router.lock().unwrap().remove(&(M::INTERFACE.to_string(), M::NAME.to_string()));
    }

    // --- method invocation (stub side) --------------------------------------

    /// Blocks the current thread until the reply arrives (or the call times out).
    pub fn invoke_method_synchronously<M, A, R>(&self, args: A) -> Result<R, Error>
    where M: MethodName, A: AppendAll, R: ReadAll + 'static {
        futures_executor::block_on(self.invoke_method_asynchronously::<M, A, R>(args))
    }

    /// Returns a future resolved once the matching reply (or a *Timeout*/disconnect error) arrives.
    pub fn invoke_method_asynchronously<M, A, R>(&self, args: A) -> MethodReply<R>
    where M: MethodName, A: AppendAll, R: ReadAll + 'static {
        self.proxy().method_call(M::INTERFACE, M::NAME, args)
    }

    /// Same as [`Self::invoke_method_asynchronously`], but delivers the
    /// result to `cb` on a dedicated waiter thread instead of returning a
    /// future: this crate stays executor-agnostic (no `tokio` dependency),
    /// so it cannot hop back onto "the" reactor thread the way a
    /// `tokio`-specific adapter could.
    pub fn invoke_method_asynchronously_with_callback<M, A, R, F>(&self, args: A, cb: F)
    where M: MethodName, A: AppendAll, R: ReadAll + Send + 'static, F: FnOnce(Result<R, Error>) + Send + 'static {
        let reply = self.invoke_method_asynchronously::<M, A, R>(args);
        std::thread::spawn(move || cb(futures_executor::block_on(reply)));
    }

    // --- signals -------------------------------------------------------------

    /// Emits `args` as signal `S` from this object's path. Skeleton side.
    pub fn emit_signal<S: SignalArgs + AppendAll>(&self, args: &S) -> Result<(), Error> {
        self.conn.send(args.to_emit_message(&self.path)).map_err(|_| Error::new_failed("Failed to queue signal for sending"))
    }

    /// Returns the cached subscription handle for `S`, constructing and
    /// caching it on first call.
    pub fn get_signal<S>(&self) -> Arc<SignalHandle<S>>
    where S: SignalArgs + ReadAll + Clone + Send + Sync + 'static {
        let type_id = TypeId::of::<S>();
        let mut caches = self.signal_caches.lock().unwrap();
        let cache = caches.entry(type_id).or_insert_with(|| {
            Box::new(Arc::new(LifetimeConstrainedCache::<(String, String), SignalHandle<S>>::new()))
        });
        let cache: &Arc<LifetimeConstrainedCache<(String, String), SignalHandle<S>>> = cache.downcast_ref().unwrap();
        let key = (S::INTERFACE.to_string(), S::NAME.to_string());
        if let Some(existing) = cache.retrieve(&key) { return existing; }
        let handle = SignalHandle::new(self.conn.clone(), self.path.clone(), self.destination.clone(), self.timeout);
        cache.insert(key, handle.clone());
        handle
    }

    // --- properties (stub side: caches a remote value) ------------------------

    /// Returns the cached property handle for `(interface, name)`,
    /// subscribing to `Properties.PropertiesChanged` (once, lazily) and
    /// registering the handle's change-adapter in the property-changed
    /// vtable.
    pub fn get_property<P>(&self, interface: Interface<'static>, name: &str, writable: bool) -> Arc<PropertyHandle<P>>
    where P: Arg + RefArg + Append + Clone + Send + Sync + 'static, for<'a> P: arg::Get<'a> {
        self.ensure_properties_changed_subscription();
        let type_id = TypeId::of::<P>();
        let mut caches = self.property_caches.lock().unwrap();
        let cache = caches.entry(type_id).or_insert_with(|| {
            Box::new(Arc::new(LifetimeConstrainedCache::<(String, String), PropertyHandle<P>>::new()))
        });
        let cache: &Arc<LifetimeConstrainedCache<(String, String), PropertyHandle<P>>> = cache.downcast_ref().unwrap();
        let key = (interface.to_string(), name.to_string());
        if let Some(existing) = cache.retrieve(&key) { return existing; }
        let handle = PropertyHandle::new(self.conn.clone(), self.path.clone(), self.destination.clone(), interface, name.to_string(), writable, self.timeout);
        cache.insert(key.clone(), handle.clone());
        let adapter_handle = handle.clone();
        self.property_changed_vtable.lock().unwrap().insert(key, Box::new(move |changed, invalidated| {
            adapter_handle.apply_changed(changed);
            adapter_handle.apply_invalidated(invalidated);
        }));
        handle
    }

    /// Invokes `Properties.GetAll` for `interface`.
    pub async fn get_all_properties(&self, interface: &str) -> Result<PropMap, Error> {
        let (map,): (PropMap,) = self.proxy().method_call("org.freedesktop.DBus.Properties", "GetAll", (interface.to_string(),)).await?;
        Ok(map)
    }

    // --- properties (skeleton side: exposes a local value) --------------------

    /// Exposes a local property under `(interface, name)`: `get` answers
    /// `Properties.Get`/`GetAll`, `set` (if any) answers `Properties.Set`. A
    /// read-only property (`set: None`) fails incoming `Set` calls with
    /// `NotWritable`, matching the stub-side local short-circuit.
    pub fn install_property_handler(
        &self,
        interface: &str,
        name: &str,
        get: impl Fn() -> Result<Variant<Box<dyn RefArg>>, Error> + Send + Sync + 'static,
        set: Option<Box<dyn Fn(Variant<Box<dyn RefArg>>) -> Result<(), Error> + Send + Sync>>,
    ) {
        let key = (interface.to_string(), name.to_string());
        self.get_property_router.lock().unwrap().insert(key.clone(), Box::new(get));
        if let Some(set) = set {
            self.set_property_router.lock().unwrap().insert(key, set);
        }
    }

    fn install_properties_interface(&self) {
        let get_router = self.get_property_router.clone();
        self.method_router.lock().unwrap().insert(
            ("org.freedesktop.DBus.Properties".to_string(), "Get".to_string()),
            Box::new(move |ctx| {
                let result = (|| -> Result<(String, String), Error> {
                    Ok(ctx.message().read2::<String, String>()?)
                })().and_then(|(interface, name)| {
                    let router = get_router.lock().unwrap();
                    match router.get(&(interface.clone(), name.clone())) {
                        Some(getter) => getter(),
                        None => Err(Error::invalid_argument(&format!("No such property {}.{}", interface, name))),
                    }
                });
                match result {
                    Ok(v) => ctx.do_reply(|msg| v.append(&mut arg::IterAppend::new(msg))),
                    Err(e) => ctx.set_reply(Some(e.to_message(ctx.message())), true, true),
                }
            }),
        );

        let get_router = self.get_property_router.clone();
        self.method_router.lock().unwrap().insert(
            ("org.freedesktop.DBus.Properties".to_string(), "GetAll".to_string()),
            Box::new(move |ctx| {
                let result = (|| -> Result<PropMap, Error> {
                    let interface = ctx.message().read1::<String>()?;
                    let router = get_router.lock().unwrap();
                    let mut map = PropMap::new();
                    for ((iface, name), getter) in router.iter() {
                        if iface != &interface { continue; }
                        map.insert(name.clone(), getter()?);
                    }
                    Ok(map)
                })();
                match result {
                    Ok(map) => ctx.do_reply(|msg| map.append(&mut arg::IterAppend::new(msg))),
                    Err(e) => ctx.set_reply(Some(e.to_message(ctx.message())), true, true),
                }
            }),
        );

        let set_router = self.set_property_router.clone();
        self.method_router.lock().unwrap().insert(
            ("org.freedesktop.DBus.Properties".to_string(), "Set".to_string()),
            Box::new(move |ctx| {
                let result = (|| -> Result<(), Error> {
                    let (interface, name, value) = ctx.message().read3::<String, String, Variant<Box<dyn RefArg>>>()?;
                    let router = set_router.lock().unwrap();
                    match router.get(&(interface.clone(), name.clone())) {
                        Some(setter) => setter(value),
                        None => Err(Error::not_writable(&interface, &name)),
                    }
                })();
                match result {
                    Ok(()) => ctx.do_reply(|_| ()),
                    Err(e) => ctx.set_reply(Some(e.to_message(ctx.message())), true, true),
                }
            }),
        );
    }

    fn ensure_properties_changed_subscription(&self) {
        let mut token = self.properties_changed_token.lock().unwrap();
        if token.is_some() { return; }
        let mr = dbus::message::MatchRule {
            msg_type: Some(MessageType::Signal),
            path: Some(self.path.clone()),
            interface: Some(Interface::from("org.freedesktop.DBus.Properties")),
            member: Some(Member::from("PropertiesChanged")),
            ..Default::default()
        }.static_clone();
        let vtable = self.property_changed_vtable.clone();
        *token = Some(self.conn.start_receive(mr, Box::new(move |msg, _conn| {
            if let Ok((interface, changed, invalidated)) = msg.read3::<String, PropMap, Vec<String>>() {
                let vtable = vtable.lock().unwrap();
                for ((iface, _), adapter) in vtable.iter() {
                    if iface != &interface { continue; }
                    adapter(&changed, &invalidated);
                }
            }
            true
        })));
    }

    /// Adds a child object under this object's service, at `subpath`.
    pub fn add_object_for_path(self: &Arc<Self>, subpath: Path<'static>) -> Result<Arc<Object>, Error> {
        if !self.skeleton { return Err(Error::new_failed("add_object_for_path is only valid on a skeleton object")); }
        Ok(Object::new_skeleton(self.conn.clone(), subpath, self.timeout))
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        if let Some(token) = self.dispatch_token.get_mut().unwrap().take() {
            self.conn.stop_receive(token);
        }
        if let Some(token) = self.properties_changed_token.get_mut().unwrap().take() {
            self.conn.stop_receive(token);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc;

    struct ListNames;
    impl MethodName for ListNames {
        const INTERFACE: &'static str = "org.freedesktop.DBus";
        const NAME: &'static str = "ListNames";
    }

    /// Drives `conn` on a background thread until `done` fires, mirroring
    /// the thread-per-connection pattern `dbus/src/channel.rs`'s own tests use.
    fn spawn_pump(conn: Arc<SyncConnection>, done: mpsc::Receiver<()>) {
        std::thread::spawn(move || {
            while done.try_recv().is_err() {
                let _ = conn.as_ref().read_write(Some(Duration::from_millis(50)));
                conn.process_all();
            }
        });
    }

    #[test]
    fn invoke_method_synchronously_against_the_bus_daemon() {
        let conn = match dbus::channel::Channel::get_private(dbus::channel::BusType::Session) {
            Ok(ch) => Arc::new(SyncConnection::from(ch)),
            Err(_) => return, // no session bus available in this environment
        };
        let (tx, rx) = mpsc::channel();
        spawn_pump(conn.clone(), rx);

        let svc = crate::Service::use_service(conn.clone(), "org.freedesktop.DBus");
        let daemon = svc.object_for_path(Path::from("/org/freedesktop/DBus"));
        let result: Result<(Vec<String>,), Error> = daemon.invoke_method_synchronously::<ListNames, _, _>(());
        let _ = tx.send(());
        let names = result.expect("ListNames should succeed against a live session bus");
        assert!(names.0.iter().any(|n| n == "org.freedesktop.DBus"));
    }
}
