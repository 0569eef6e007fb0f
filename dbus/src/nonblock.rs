//! Async version of connection.
//!
//! You're probably going to need a companion crate - `dbus-reactor` - to drive
//! these connections from an event loop (although you can also just call
//! `read_write` and `process_all` at regular intervals yourself).

use crate::{Error, Message};
use crate::channel::{MatchingReceiver, Channel, Sender, Token};
use crate::strings::{BusName, Path, Interface, Member};
use crate::arg::{AppendAll, ReadAll, IterAppend};
use crate::message::MatchRule;

use std::sync::{Arc, Mutex};
use std::{future, task, pin, mem};
use std::cell::RefCell;
use std::time::{Duration, Instant};
use crate::router::{MessageRouter, Replies};

/// Constructs a future that resolves once the given deadline passes.
///
/// Set via [`NonblockReply::set_timeout_maker`] by whatever reactor drives the connection
/// (e.g. `dbus-reactor`'s `tokio::time::sleep_until`), so that `Proxy::method_call` can time
/// out a pending reply without the `dbus` crate depending on any particular executor.
pub type TimeoutMaker = fn(Instant) -> pin::Pin<Box<dyn future::Future<Output=()> + Send + Sync + 'static>>;

/// Callback invoked whenever a message is queued for sending, so a reactor waiting on the
/// connection's file descriptor can wake up and flush the outgoing queue.
pub type WakerCb = Box<dyn Fn() -> Result<(), ()> + Send + Sync + 'static>;

/// A connection to D-Bus, thread local + async version
pub struct LocalConnection {
    channel: Channel,
    filters: RefCell<MessageRouter<Token, LocalFilterCb>>,
    replies: RefCell<Replies<LocalRepliesCb>>,
    timeout_maker: RefCell<Option<TimeoutMaker>>,
    waker: RefCell<Option<WakerCb>>,
}

/// A connection to D-Bus, async version where callbacks are Send but not Sync.
pub struct Connection {
    channel: Channel,
    filters: RefCell<MessageRouter<Token, FilterCb>>,
    replies: RefCell<Replies<RepliesCb>>,
    timeout_maker: RefCell<Option<TimeoutMaker>>,
    waker: RefCell<Option<WakerCb>>,
}

/// A connection to D-Bus, Send + Sync + async version
pub struct SyncConnection {
    channel: Channel,
    filters: Mutex<MessageRouter<Token, SyncFilterCb>>,
    replies: Mutex<Replies<SyncRepliesCb>>,
    timeout_maker: Mutex<Option<TimeoutMaker>>,
    waker: Mutex<Option<WakerCb>>,
}



macro_rules! connimpl {
     ($c: ident, $cb: ident, $rcb: ident $(, $ss:tt)*) =>  {

type
    $cb = Box<dyn FnMut(Message, &$c) -> bool $(+ $ss)* + 'static>;
type
    $rcb = Box<dyn FnOnce(Message, &$c) $(+ $ss)* + 'static>;

impl From<Channel> for $c {
    fn from(x: Channel) -> Self {
        $c {
            channel: x,
            replies: Default::default(),
            filters: Default::default(),
            timeout_maker: Default::default(),
            waker: Default::default(),
        }
    }
}

impl AsRef<Channel> for $c {
    fn as_ref(&self) -> &Channel { &self.channel }
}

impl Sender for $c {
    fn send(&self, msg: Message) -> Result<u32, ()> {
        let r = self.channel.send(msg);
        if r.is_ok() { self.wake(); }
        r
    }
}

impl MatchingReceiver for $c {
    type F = $cb;
    fn start_receive(&self, m: MatchRule<'static>, f: Self::F) -> Token {
        self.filters_mut().add(m, f)
    }
    fn stop_receive(&self, id: Token) -> Option<(MatchRule<'static>, Self::F)> {
        self.filters_mut().remove(id)
    }
}

impl NonblockReply for $c {
    type F = $rcb;
    fn send_with_reply(&self, msg: Message, f: Self::F) -> Result<Token, ()> {
        self.channel.send(msg).map(|x| {
            let t = Token(x as usize);
            self.replies_mut().insert(t, f);
            self.wake();
            t
        })
    }
    fn cancel_reply(&self, id: Token) -> Option<Self::F> { self.replies_mut().remove(&id) }
    fn make_f<G: FnOnce(Message, &Self) + Send + 'static>(g: G) -> Self::F { Box::new(g) }
    fn timeout_maker(&self) -> Option<TimeoutMaker> { self.timeout_maker_get() }
    fn set_timeout_maker(&self, f: Option<TimeoutMaker>) { self.timeout_maker_set(f) }
    fn set_waker(&self, f: Option<WakerCb>) { self.waker_set(f) }
}


impl Process for $c {
    fn process_one(&self, msg: Message) {
        if let Some(serial) = msg.get_reply_serial() {
            if let Some(f) = self.replies_mut().remove(&Token(serial as usize)) {
                f(msg, self);
                return;
            }
        }
        let ff = self.filters_mut().remove_matching(&msg);
        if let Some(mut ff) = ff {
            if ff.2(msg, self) {
                self.filters_mut().insert(ff);
            }
        } else if let Some(reply) = crate::channel::default_reply(&msg) {
            let _ = self.send(reply);
        }
    }
}

impl $c {
    /// Asks the bus daemon to assign the given well-known name to this connection.
    pub fn request_name<'a>(&'a self, name: &'a str, allow_replacement: bool, replace_existing: bool, do_not_queue: bool)
    -> MethodReply<crate::RequestNameReply> {
        let mut flags: u32 = 0;
        if allow_replacement { flags |= crate::ffi::DBUS_NAME_FLAG_ALLOW_REPLACEMENT; }
        if replace_existing { flags |= crate::ffi::DBUS_NAME_FLAG_REPLACE_EXISTING; }
        if do_not_queue { flags |= crate::ffi::DBUS_NAME_FLAG_DO_NOT_QUEUE; }
        let proxy = Proxy::new("org.freedesktop.DBus", "/", Duration::from_secs(25), self);
        proxy.method_call::<(u32,), _, _, _>("org.freedesktop.DBus", "RequestName", (name, flags))
            .and_then(|(r,): (u32,)| match r {
                1 => Ok(crate::RequestNameReply::PrimaryOwner),
                2 => Ok(crate::RequestNameReply::InQueue),
                3 => Ok(crate::RequestNameReply::Exists),
                4 => Ok(crate::RequestNameReply::AlreadyOwner),
                _ => Err(Error::new_failed("Invalid reply from D-Bus server")),
            })
    }
}

    }
}

connimpl!(Connection, FilterCb, RepliesCb, Send);
connimpl!(LocalConnection, LocalFilterCb, LocalRepliesCb);
connimpl!(SyncConnection, SyncFilterCb, SyncRepliesCb, Send);

impl Connection {
    fn filters_mut(&self) -> std::cell::RefMut<MessageRouter<Token, FilterCb>> { self.filters.borrow_mut() }
    fn replies_mut(&self) -> std::cell::RefMut<Replies<RepliesCb>> { self.replies.borrow_mut() }
    fn timeout_maker_get(&self) -> Option<TimeoutMaker> { *self.timeout_maker.borrow() }
    fn timeout_maker_set(&self, f: Option<TimeoutMaker>) { *self.timeout_maker.borrow_mut() = f; }
    fn waker_set(&self, f: Option<WakerCb>) { *self.waker.borrow_mut() = f; }
    fn wake(&self) { if let Some(w) = &*self.waker.borrow() { let _ = w(); } }
}

impl LocalConnection {
    fn filters_mut(&self) -> std::cell::RefMut<MessageRouter<Token, LocalFilterCb>> { self.filters.borrow_mut() }
    fn replies_mut(&self) -> std::cell::RefMut<Replies<LocalRepliesCb>> { self.replies.borrow_mut() }
    fn timeout_maker_get(&self) -> Option<TimeoutMaker> { *self.timeout_maker.borrow() }
    fn timeout_maker_set(&self, f: Option<TimeoutMaker>) { *self.timeout_maker.borrow_mut() = f; }
    fn waker_set(&self, f: Option<WakerCb>) { *self.waker.borrow_mut() = f; }
    fn wake(&self) { if let Some(w) = &*self.waker.borrow() { let _ = w(); } }
}

impl SyncConnection {
    fn filters_mut(&self) -> std::sync::MutexGuard<MessageRouter<Token, SyncFilterCb>> { self.filters.lock().unwrap() }
    fn replies_mut(&self) -> std::sync::MutexGuard<Replies<SyncRepliesCb>> { self.replies.lock().unwrap() }
    fn timeout_maker_get(&self) -> Option<TimeoutMaker> { *self.timeout_maker.lock().unwrap() }
    fn timeout_maker_set(&self, f: Option<TimeoutMaker>) { *self.timeout_maker.lock().unwrap() = f; }
    fn waker_set(&self, f: Option<WakerCb>) { *self.waker.lock().unwrap() = f; }
    fn wake(&self) { if let Some(w) = &*self.waker.lock().unwrap() { let _ = w(); } }
}

/// Internal helper trait for async method replies.
pub trait NonblockReply {
    /// Callback type
    type F;
    /// Sends a message and calls the callback when a reply is received.
    fn send_with_reply(&self, msg: Message, f: Self::F) -> Result<Token, ()>;
    /// Cancels a pending reply.
    fn cancel_reply(&self, id: Token) -> Option<Self::F>;
    /// Internal helper function that creates a callback.
    fn make_f<G: FnOnce(Message, &Self) + Send + 'static>(g: G) -> Self::F where Self: Sized;
    /// Returns the timeout-future constructor registered via [`Self::set_timeout_maker`], if any.
    fn timeout_maker(&self) -> Option<TimeoutMaker>;
    /// Registers the function used to build a future that resolves after a given deadline,
    /// so that `Proxy::method_call` replies can time out. Set by the reactor driving this connection.
    fn set_timeout_maker(&self, f: Option<TimeoutMaker>);
    /// Registers a callback invoked whenever a message is queued for sending, so a reactor
    /// blocked on the connection's file descriptor can wake up and flush it.
    fn set_waker(&self, f: Option<WakerCb>);
}


/// Internal helper trait, implemented for connections that process incoming messages.
pub trait Process: Sender + AsRef<Channel> {
    /// Dispatches all pending messages, without blocking.
    ///
    /// This is usually called from the reactor only, after read_write.
    /// Despite this taking &self and not "&mut self", it is a logic error to call this
    /// recursively or from more than one thread at a time.
    fn process_all(&self) {
        let c: &Channel = self.as_ref();
        while let Some(msg) = c.pop_message() {
            self.process_one(msg);
        }
    }

    /// Dispatches a message.
    fn process_one(&self, msg: Message);
}

/// A struct that wraps a connection, destination and path.
///
/// A D-Bus "Proxy" is a client-side object that corresponds to a remote object on the server side.
/// Calling methods on the proxy object calls methods on the remote object.
/// Read more in the [D-Bus tutorial](https://dbus.freedesktop.org/doc/dbus-tutorial.html#proxies)
#[derive(Clone, Debug)]
pub struct Proxy<'a, C> {
    /// Destination, i e what D-Bus service you're communicating with
    pub destination: BusName<'a>,
    /// Object path on the destination
    pub path: Path<'a>,
    /// How long to wait for a reply before the returned future resolves to a timeout error.
    pub timeout: Duration,
    /// Some way to send and/or receive messages, non-blocking.
    pub connection: C,
}

impl<'a, C> Proxy<'a, C> {
    /// Creates a new proxy struct.
    pub fn new<D: Into<BusName<'a>>, P: Into<Path<'a>>>(dest: D, path: P, timeout: Duration, connection: C) -> Self {
        Proxy { destination: dest.into(), path: path.into(), timeout, connection }
    }
}

impl<'a, T, C> Proxy<'a, C>
where
    T: NonblockReply,
    C: std::ops::Deref<Target=T>
{

    /// Make a method call using typed input argument, returns a future that resolves to the typed output arguments.
    pub fn method_call<'i, 'm, R: ReadAll + 'static, A: AppendAll, I: Into<Interface<'i>>, M: Into<Member<'m>>>(&self, i: I, m: M, args: A)
    -> MethodReply<R> {
        let mut msg = Message::method_call(&self.destination, &self.path, &i.into(), &m.into());
        args.append(&mut IterAppend::new(&mut msg));

        let mr = Arc::new(Mutex::new(MRInner::Neither));
        let mr2 = mr.clone();
        let f = T::make_f(move |msg: Message, _: &T| {
            let mut inner = mr2.lock().unwrap();
            let old = mem::replace(&mut *inner, MRInner::Ready(Ok(msg)));
            if let MRInner::Pending(waker) = old { waker.wake() }
        });
        if let Err(_) = self.connection.send_with_reply(msg, f) {
            *mr.lock().unwrap() = MRInner::Ready(Err(Error::new_failed("Failed to send message")));
        }
        let timeout = self.connection.timeout_maker().map(|tm| tm(Instant::now() + self.timeout));
        MethodReply { inner: mr, read: Some(Box::new(|msg: Message| { msg.read_all() })), timeout }
    }
}

enum MRInner {
    Ready(Result<Message, Error>),
    Pending(task::Waker),
    Neither,
}

/// Future method reply, used while waiting for a method call reply from the server.
pub struct MethodReply<T> {
    inner: Arc<Mutex<MRInner>>,
    read: Option<Box<dyn FnOnce(Message) -> Result<T, Error> + Send + Sync + 'static>>,
    timeout: Option<pin::Pin<Box<dyn future::Future<Output=()> + Send + Sync + 'static>>>,
}

impl<T> future::Future for MethodReply<T> {
    type Output = Result<T, Error>;
    fn poll(mut self: pin::Pin<&mut Self>, ctx: &mut task::Context) -> task::Poll<Result<T, Error>> {
        let ready = {
            let mut inner = self.inner.lock().unwrap();
            let r = mem::replace(&mut *inner, MRInner::Neither);
            if let MRInner::Ready(r) = r { Some(r) }
            else {
                *inner = MRInner::Pending(ctx.waker().clone());
                None
            }
        };
        if let Some(r) = ready {
            let readfn = self.read.take().expect("Polled MethodReply after Ready");
            return task::Poll::Ready(r.and_then(readfn));
        }
        if let Some(t) = self.timeout.as_mut() {
            if t.as_mut().poll(ctx).is_ready() {
                return task::Poll::Ready(Err(Error::new_custom("org.freedesktop.DBus.Error.Timeout", "Message reply timed out")));
            }
        }
        task::Poll::Pending
    }
}

impl<T: 'static> MethodReply<T> {
    /// Convenience combinator in case you want to post-process the result after reading it
    pub fn and_then<T2>(self, f: impl FnOnce(T) -> Result<T2, Error> + Send + Sync + 'static) -> MethodReply<T2> {
        let MethodReply { inner, read, timeout } = self;
        MethodReply {
            inner,
            read: Some({
                let first = read.unwrap();
                Box::new(|r| first(r).and_then(f))
            }),
            timeout,
        }
    }
}


#[test]
fn test_conn_send_sync() {
    fn is_send<T: Send>(_: &T) {}
    fn is_sync<T: Sync>(_: &T) {}
    let c = SyncConnection::from(Channel::get_private(crate::channel::BusType::Session).unwrap());
    is_send(&c);
    is_sync(&c);

    let c = Connection::from(Channel::get_private(crate::channel::BusType::Session).unwrap());
    is_send(&c);
}
