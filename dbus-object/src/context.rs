use dbus::Error;
use dbus::arg::AppendAll;

/// Carries one incoming method-call message through dispatch, accumulating
/// the reply (or error reply) that should eventually be sent back.
#[derive(Debug)]
pub struct Context {
    path: dbus::Path<'static>,
    interface: Option<dbus::strings::Interface<'static>>,
    method: dbus::strings::Member<'static>,
    message: dbus::Message,
    reply: Option<dbus::Message>,
}

impl Context {
    /// Builds a Context from an incoming message, or `None` if it isn't a method call.
    pub fn new(msg: dbus::Message) -> Option<Self> {
        if msg.msg_type() != dbus::MessageType::MethodCall { return None; }
        let path = msg.path()?.into_static();
        let interface = msg.interface().map(|i| i.into_static());
        let method = msg.member()?.into_static();
        Some(Context { path, interface, method, message: msg, reply: None })
    }

    /// Runs `f`; on `Err`, turns it into an error reply (unless the caller asked for no reply).
    pub fn check<R, F: FnOnce(&mut Context) -> Result<R, Error>>(&mut self, f: F) -> Result<R, ()> {
        f(self).map_err(|e| {
            if !self.message.get_no_reply() {
                self.reply = Some(e.to_message(&self.message));
            }
        })
    }

    /// Appends a successful reply built from `f`, unless a reply is already queued.
    pub fn do_reply<F: FnOnce(&mut dbus::Message)>(&mut self, f: F) {
        if self.message.get_no_reply() { return; }
        if self.reply.is_some() { return; }
        let mut msg = self.message.method_return();
        f(&mut msg);
        self.reply = Some(msg);
    }

    /// Convenience form of [`Self::do_reply`] for a typed result.
    pub fn reply<R: AppendAll>(&mut self, result: Result<R, Error>) {
        match result {
            Ok(r) => self.do_reply(|msg| r.append(&mut dbus::arg::IterAppend::new(msg))),
            Err(e) => self.set_reply(Some(e.to_message(&self.message)), true, true),
        }
    }

    pub fn set_reply(&mut self, msg: Option<dbus::Message>, check_no_reply: bool, check_set: bool) {
        if check_no_reply && self.message.get_no_reply() { return; }
        if check_set && self.reply.is_some() { return; }
        self.reply = msg;
    }

    /// Sends the accumulated reply, if any.
    pub fn flush_messages<S: dbus::channel::Sender>(&mut self, conn: &S) -> Result<(), ()> {
        if let Some(msg) = self.reply.take() {
            conn.send(msg)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &dbus::Path<'static> { &self.path }
    pub fn interface(&self) -> Option<&dbus::strings::Interface<'static>> { self.interface.as_ref() }
    pub fn method(&self) -> &dbus::strings::Member<'static> { &self.method }
    pub fn message(&self) -> &dbus::Message { &self.message }
    pub fn has_reply(&self) -> bool { self.reply.is_some() }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let ctx = Context::new(dbus::Message::new_method_call("a.b", "/", "a.b", "c").unwrap()).unwrap();
        assert_send(&ctx);
    }
}
