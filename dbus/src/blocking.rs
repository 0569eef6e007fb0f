//! Connections and proxies that make blocking method calls.


use crate::strings::{BusName, Path, Interface, Member};
use crate::arg::{AppendAll, ReadAll, IterAppend};
use crate::{channel, Error, Message};
use crate::message::{MatchRule, SignalArgs};
use crate::channel::{Channel, BusType, Token, Sender};
use crate::router::MessageRouter;
use std::cell::RefCell;
use std::time::Duration;

pub mod stdintf;

type FilterCb = Box<dyn FnMut(Message) -> bool>;

/// A blocking, thread local connection.
pub struct Connection {
    channel: Channel,
    filters: RefCell<MessageRouter<Token, FilterCb>>,
}

impl Connection {
    /// Create a new connection to the session bus.
    pub fn new_session() -> Result<Self, Error> { Ok(Connection {
        channel: Channel::get_private(BusType::Session)?,
        filters: Default::default(),
    })}

    /// Create a new connection to the system-wide bus.
    pub fn new_system() -> Result<Self, Error> { Ok(Connection { 
        channel: Channel::get_private(BusType::System)?, 
        filters: Default::default(),
    })}

    fn dispatch(&self, msg: Message) {
        let found = self.filters.borrow_mut().dispatch(&msg);
        if let Some((id, rule, mut cb)) = found {
            if cb(msg) { self.filters.borrow_mut().insert((id, rule, cb)); }
        } else if let Some(reply) = channel::default_reply(&msg) {
            let _ = self.send(reply);
        }
    }

    /// Tries to handle an incoming message if there is one. If there isn't one,
    /// it will wait up to the given timeout.
    ///
    /// Note: Might panic if called recursively.
    pub fn process(&self, timeout: Duration) -> Result<bool, Error> {
        if let Some(msg) = self.channel.pop_message() {
            self.dispatch(msg);
            return Ok(true);
        }
        self.channel.read_write(Some(timeout)).map_err(|_|
            Error::new_custom("org.freedesktop.dbus.error.failed", "Failed to read/write data, disconnected from D-Bus?")
        )?;
        if let Some(msg) = self.channel.pop_message() {
            self.dispatch(msg);
            Ok(true)
        } else { Ok(false) }
    }

    /// Returns the unique connection name, e.g. ":1.42", assigned to this connection by the bus daemon.
    pub fn unique_name(&self) -> String {
        self.channel.unique_name().unwrap_or("").to_string()
    }

    /// Asks the bus daemon to assign the given well-known name to this connection.
    pub fn request_name(&self, name: &str, allow_replacement: bool, replace_existing: bool, do_not_queue: bool) -> Result<crate::RequestNameReply, Error> {
        self.channel.request_name(name, allow_replacement, replace_existing, do_not_queue)
    }

    /// Create a convenience struct for easier calling of many methods on the same destination and path.
    pub fn with_proxy<'a, D: Into<BusName<'a>>, P: Into<Path<'a>>>(&'a self, dest: D, path: P, timeout: Duration) ->
    Proxy<'a, &'a Connection> {
        Proxy { connection: self, destination: dest.into(), path: path.into(), timeout }
    }
}

/// Abstraction over different connections
pub trait BlockingSender {
    /// Sends a message over the D-Bus and blocks, waiting for a reply or a timeout. This is used for method calls.
    ///
    /// Note: In case of an error reply, this is returned as an Err(), not as a Ok(Message) with the error type.
    fn send_with_reply_and_block(&self, msg: Message, timeout: Duration) -> Result<Message, Error>;
}

impl BlockingSender for Channel {
    fn send_with_reply_and_block(&self, msg: Message, timeout: Duration) -> Result<Message, Error> {
        Channel::send_with_reply_and_block(self, msg, timeout)
    }
}

impl BlockingSender for Connection {
    fn send_with_reply_and_block(&self, msg: Message, timeout: Duration) -> Result<Message, Error> {
        self.channel.send_with_reply_and_block(msg, timeout)
    }
}

impl channel::Sender for Connection {
    fn send(&self, msg: Message) -> Result<u32, ()> { self.channel.send(msg) }
}

impl channel::MatchingReceiver for Connection {
    type F = FilterCb;
    fn start_receive(&self, m: MatchRule<'static>, f: Self::F) -> Token {
        self.filters.borrow_mut().add(m, f)
    }
    fn stop_receive(&self, id: Token) -> Option<(MatchRule<'static>, Self::F)> {
        self.filters.borrow_mut().uninstall_route(id)
    }
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
    /// Timeout for method calls
    pub timeout: Duration,
    /// Some way to send and/or receive messages, either blocking or non-blocking.
    pub connection: C,
}

impl<'a, C> Proxy<'a, C> {
    /// Creates a new proxy struct.
    pub fn new<D: Into<BusName<'a>>, P: Into<Path<'a>>>(dest: D, path: P, timeout: Duration, connection: C) -> Self {
        Proxy { destination: dest.into(), path: path.into(), timeout, connection }
    }
}

impl<'a, T: BlockingSender, C: std::ops::Deref<Target=T>> Proxy<'a, C> {
// impl<'a, S: std::convert::AsRef<channel::Sender>> Proxy<'a, S> {
    /// Make a method call using typed input and output arguments, then block waiting for a reply.
    ///
    /// # Example
    ///
    /// ```
    /// use dbus::blocking::{Connection, Proxy};
    /// use std::time::Duration;
    ///
    /// let conn = Connection::new_session()?;
    /// let proxy = Proxy::new("org.freedesktop.DBus", "/", Duration::from_millis(5000), &conn);
    /// let (has_owner,): (bool,) = proxy.method_call("org.freedesktop.DBus", "NameHasOwner", ("dummy.name.without.owner",))?;
    /// assert_eq!(has_owner, false);
    /// # Ok::<(), Box<std::error::Error>>(())
    /// ```
    pub fn method_call<'i, 'm, R: ReadAll, A: AppendAll, I: Into<Interface<'i>>, M: Into<Member<'m>>>(&self, i: I, m: M, args: A) -> Result<R, Error> {
        let mut msg = Message::method_call(&self.destination, &self.path, &i.into(), &m.into());
        args.append(&mut IterAppend::new(&mut msg));
        let r = self.connection.send_with_reply_and_block(msg, self.timeout)?;
        Ok(R::read(&mut r.iter_init())?)
    }
}

    /// Sets up a match, including calls to the D-Bus server to add and remove this match.
    fn add_match<C, T, F>(conn: &C, mr: MatchRule<'static>, timeout: Duration, mut f: F) -> Result<Token, Error>
    where
        T: BlockingSender + channel::MatchingReceiver<F=FilterCb>,
        C: 'static + std::ops::Deref<Target=T> + Clone,
        F: 'static + FnMut(Message) -> bool {

        let mstr = mr.match_str();
        let msg = Message::call_with_args("org.freedesktop.DBus", "/", "org.freedesktop.DBus", "AddMatch", (&mstr,));
        conn.send_with_reply_and_block(msg, timeout)?;
        let conn2 = conn.clone();
        let id = conn.start_receive(mr, Box::new(move |msg: Message| {
            if f(msg) { return true };
            let msg = Message::call_with_args("org.freedesktop.DBus", "/", "org.freedesktop.DBus", "RemoveMatch", (&mstr,));
            let _ = conn2.send_with_reply_and_block(msg, timeout);
            false
        }));
        Ok(id)
    }

impl<'a, T, C> Proxy<'a, C>
where
    T: BlockingSender + channel::MatchingReceiver<F=FilterCb>,
    C: 'static + std::ops::Deref<Target=T> + Clone
{

    /// Sets up an incoming signal match, that calls the supplied callback every time the signal is received.
    ///
    /// The returned value can be used to remove the match. The match is also removed if the callback
    /// returns "false".
    pub fn match_signal<S: SignalArgs + ReadAll, F: 'static + FnMut(S) -> bool>(&self, mut f: F) -> Result<Token, Error> {
        let mr = S::match_rule(Some(&self.destination), Some(&self.path)).static_clone();
        add_match(&self.connection, mr, self.timeout, move |msg| {
            // We silently drop type mismatch errors here. Hopefully that's the right thing to do.
            if let Ok(r) = S::read(&mut msg.iter_init()) { f(r) } else { true }
        })
    }

}

