use crate::arg;
use crate::{Message, MessageType};
use crate::message::MatchRule;
use crate::strings::{BusName, Path, Interface, Member};

/// Helper methods for structs representing a Signal
///
/// # Example
///
/// Listen to a `NameOwnerChanged` signal from the message bus daemon.
///
/// ```rust,no_run
/// use dbus::blocking::Connection;
/// use dbus::message::SignalArgs;
/// use std::time::Duration;
///
/// struct NameOwnerChanged { name: String, old_owner: String, new_owner: String }
///
/// impl dbus::arg::ReadAll for NameOwnerChanged {
///     fn read(i: &mut dbus::arg::Iter) -> Result<Self, dbus::arg::TypeMismatchError> {
///         Ok(NameOwnerChanged { name: i.read()?, old_owner: i.read()?, new_owner: i.read()? })
///     }
/// }
///
/// impl SignalArgs for NameOwnerChanged {
///     const NAME: &'static str = "NameOwnerChanged";
///     const INTERFACE: &'static str = "org.freedesktop.DBus";
/// }
///
/// let c = Connection::new_session().unwrap();
/// let proxy = c.with_proxy("org.freedesktop.DBus", "/org/freedesktop/DBus", Duration::from_millis(5000));
/// proxy.match_signal(|n: NameOwnerChanged| {
///     println!("{} changed owner from {} to {}.", n.name, n.old_owner, n.new_owner);
///     true
/// }).unwrap();
/// ```

pub trait SignalArgs {
    /// D-Bus name of signal
    const NAME: &'static str;

    /// D-Bus name of interface this signal belongs to
    const INTERFACE: &'static str;

    /// Returns a message that emits the signal.
    fn to_emit_message(&self, path: &Path) -> Message where Self: arg::AppendAll {
        let mut m = Message::signal(path, &Interface::from(Self::INTERFACE), &Member::from(Self::NAME));
        arg::AppendAll::append(self, &mut arg::IterAppend::new(&mut m));
        m
    } 

    /// If the message is a signal of the correct type, return its arguments, otherwise return None.
    ///
    /// This does not check sender and path of the message, which is likely relevant to you as well.
    fn from_message(m: &Message) -> Option<Self> where Self: Sized + arg::ReadAll {
        if m.msg_type() != MessageType::Signal { None }
        else if m.interface().as_ref().map(|x| &**x) != Some(Self::INTERFACE) { None }
        else if m.member().as_ref().map(|x| &**x) != Some(Self::NAME) { None }
        else {
            arg::ReadAll::read(&mut m.iter_init()).ok()
        }
    }

    /// Returns a match rule matching this signal.
    ///
    /// If sender and/or path is None, matches all senders and/or paths.
    fn match_rule<'a>(sender: Option<&'a BusName>, path: Option<&'a Path>) -> MatchRule<'a> {
        let mut m: MatchRule = Default::default();
        m.sender = sender.cloned();
        m.path = path.cloned();
        m.msg_type = Some(MessageType::Signal);
        m.interface = Some(Self::INTERFACE.into());
        m.member = Some(Self::NAME.into());
        m
    }


    /// Returns a string that can be sent to `Connection::add_match`.
    ///
    /// If sender and/or path is None, matches all senders and/or paths.
    fn match_str(sender: Option<&BusName>, path: Option<&Path>) -> String {
        Self::match_rule(sender, path).match_str()
    }
}

#[cfg(test)]
struct InterfacesRemoved {
    object: crate::Path<'static>,
    interfaces: Vec<String>,
}

#[cfg(test)]
impl crate::arg::AppendAll for InterfacesRemoved {
    fn append(&self, i: &mut crate::arg::IterAppend) {
        i.append(self.object.clone());
        i.append(self.interfaces.clone());
    }
}

#[cfg(test)]
impl crate::arg::ReadAll for InterfacesRemoved {
    fn read(i: &mut crate::arg::Iter) -> Result<Self, crate::arg::TypeMismatchError> {
        Ok(InterfacesRemoved { object: i.read()?, interfaces: i.read()? })
    }
}

#[cfg(test)]
impl SignalArgs for InterfacesRemoved {
    const NAME: &'static str = "InterfacesRemoved";
    const INTERFACE: &'static str = "org.freedesktop.DBus.ObjectManager";
}

#[test]
#[ignore] // Requires a running session bus.
fn intf_removed() {
    use crate::blocking::Connection;
    use std::time::Duration;

    let c = Connection::new_session().unwrap();
    let unique_name = c.unique_name().to_string();
    let proxy = c.with_proxy(unique_name, "/hello", Duration::from_millis(2000));

    let ir = InterfacesRemoved { object: "/hello".into(), interfaces: vec!("ABC.DEF".into(), "GHI.JKL".into()) };
    let emit_msg = ir.to_emit_message(&"/hello".into());

    let token = proxy.match_signal(move |ir2: InterfacesRemoved| {
        assert_eq!(ir2.object, ir.object);
        assert_eq!(ir2.interfaces, ir.interfaces);
        false
    }).unwrap();

    use crate::channel::Sender;
    c.send(emit_msg).unwrap();
    c.process(Duration::from_millis(1000)).unwrap();
    use crate::channel::MatchingReceiver;
    c.stop_receive(token);
}
