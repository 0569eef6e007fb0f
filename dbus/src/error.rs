use std::ptr;
use std::ffi::CString;
use crate::{arg, to_c_str, c_str_to_slice, init_dbus};
use crate::strings::ErrorName;

/// Closed taxonomy of error conditions this crate can raise, independent of
/// the underlying D-Bus error name string.
///
/// `DaemonError` is the catch-all for errors whose name/message came from a
/// reply the bus daemon (or a remote peer) actually sent; every other
/// variant is raised locally by this crate without any wire round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A malformed object path, interface, member or signature, or an
    /// empty mandatory field passed to a message constructor.
    InvalidArgument,
    /// The decoder found a value whose wire type differs from the one
    /// requested.
    TypeMismatch,
    /// A writer closed the wrong container, or left one unclosed.
    UnbalancedContainer,
    /// A variant's announced inner signature didn't match what the reader
    /// expected.
    VariantSignatureMismatch,
    /// The transport could not allocate a message or queue a send.
    OutOfMemory,
    /// The bus connection has terminated.
    Disconnected,
    /// A call did not receive a reply within its timeout.
    Timeout,
    /// A pending call was cancelled, or the bus was stopped.
    Cancelled,
    /// `Message::error()` was called on a non-error message.
    NotAnError,
    /// Requesting a name that is already owned and replacement wasn't
    /// requested.
    AlreadyOwned,
    /// The caller already owns the name it tried to request.
    AlreadyOwner,
    /// A stub-side pre-check (`use_service_or_throw`) found no owner.
    ServiceNotAvailable,
    /// A path was registered twice on the same service.
    PathAlreadyRegistered,
    /// A write was attempted against a read-only property.
    NotWritable,
    /// A blocking call was issued from the reactor thread.
    ReentrantBlockingCall,
    /// The daemon (or a remote peer) sent back an error reply; `name()`
    /// and `message()` carry its `{name, description}`.
    DaemonError,
}

/// D-Bus error wrapper: a `{name, message}` pair tagged with an [`ErrorKind`].
pub struct Error {
    e: ffi::DBusError,
    kind: ErrorKind,
}

unsafe impl Send for Error {}

// Note! For this Sync impl to be safe, it requires that no functions that take &self,
// actually calls into FFI. All functions that call into FFI with a ffi::DBusError
// must take &mut self.
unsafe impl Sync for Error {}

impl Error {
    /// Create a new custom D-Bus Error, classified as `DaemonError`.
    pub fn new_custom<'a, N: Into<ErrorName<'a>>>(name: N, message: &str) -> Error {
        Self::new_custom_kind(name, message, ErrorKind::DaemonError)
    }

    fn new_custom_kind<'a, N: Into<ErrorName<'a>>>(name: N, message: &str, kind: ErrorKind) -> Error {
        let n = to_c_str(&name.into());
        let m = to_c_str(&message.replace('%', "%%"));
        let mut e = Error::empty_with_kind(kind);
        unsafe { ffi::dbus_set_error(e.get_mut(), n.as_ptr(), m.as_ptr()) };
        e
    }

    /// Create a new generic D-Bus Error with "org.freedesktop.DBus.Error.Failed" as the Error name.
    pub fn new_failed(message: &str) -> Error {
        Error::new_custom("org.freedesktop.DBus.Error.Failed", message)
    }

    /// `InvalidArgument`: a malformed path/signature/name or an empty mandatory field.
    pub fn invalid_argument(message: &str) -> Error {
        Self::new_custom_kind("org.freedesktop.DBus.Error.InvalidArgs", message, ErrorKind::InvalidArgument)
    }

    /// `TypeMismatch`: decoder saw a different wire type than expected.
    pub fn type_mismatch(expected: &str, found: &str) -> Error {
        Self::new_custom_kind("org.freedesktop.DBus.Error.Failed",
            &format!("Type mismatch: expected {}, found {}", expected, found), ErrorKind::TypeMismatch)
    }

    /// `Timeout`: no reply arrived within the call's timeout.
    pub fn timeout() -> Error {
        Self::new_custom_kind("org.freedesktop.DBus.Error.Timeout", "Did not receive a reply", ErrorKind::Timeout)
    }

    /// `Cancelled`: the pending call was cancelled, or the bus was stopped.
    pub fn cancelled() -> Error {
        Self::new_custom_kind("org.freedesktop.DBus.Error.Failed", "Call was cancelled", ErrorKind::Cancelled)
    }

    /// `Disconnected`: the bus connection has terminated.
    pub fn disconnected() -> Error {
        Self::new_custom_kind("org.freedesktop.DBus.Error.NoReply", "Connection is disconnected", ErrorKind::Disconnected)
    }

    /// `ServiceNotAvailable`: `use_service_or_throw` found no owner for the name.
    pub fn service_not_available(name: &str) -> Error {
        Self::new_custom_kind("org.freedesktop.DBus.Error.ServiceUnknown",
            &format!("No owner for name {}", name), ErrorKind::ServiceNotAvailable)
    }

    /// `PathAlreadyRegistered`: a path was registered twice on the same service.
    pub fn path_already_registered(path: &str) -> Error {
        Self::new_custom_kind("org.freedesktop.DBus.Error.Failed",
            &format!("Path {} is already registered", path), ErrorKind::PathAlreadyRegistered)
    }

    /// `NotWritable`: a write was attempted against a read-only property.
    pub fn not_writable(interface: &str, property: &str) -> Error {
        Self::new_custom_kind("org.freedesktop.DBus.Properties.Error.NotWritable",
            &format!("Property {}.{} is not writable", interface, property), ErrorKind::NotWritable)
    }

    /// `ReentrantBlockingCall`: a blocking call was issued from the reactor thread.
    pub fn reentrant_blocking_call() -> Error {
        Self::new_custom_kind("org.freedesktop.DBus.Error.Failed",
            "Blocking call issued from the reactor thread", ErrorKind::ReentrantBlockingCall)
    }

    /// `AlreadyOwned` / `AlreadyOwner`: name-request collisions.
    pub fn already_owned(name: &str, we_are_owner: bool) -> Error {
        let kind = if we_are_owner { ErrorKind::AlreadyOwner } else { ErrorKind::AlreadyOwned };
        Self::new_custom_kind("org.freedesktop.DBus.Error.Failed",
            &format!("Name {} is already owned", name), kind)
    }

    /// Builds an error-reply `Message` to `in_reply_to`, carrying this error's
    /// name (defaulting to `org.freedesktop.DBus.Error.Failed`) and message.
    ///
    /// Used at the method-dispatch boundary to turn a handler's `Err` into a
    /// wire reply instead of propagating it out of the reactor.
    pub fn to_message(&self, in_reply_to: &crate::Message) -> crate::Message {
        let fallback = || ErrorName::new("org.freedesktop.DBus.Error.Failed".to_string()).unwrap();
        let name = self.name().map(|n| ErrorName::new(n.to_string()).unwrap_or_else(|_| fallback())).unwrap_or_else(fallback);
        let message = CString::new(self.message().unwrap_or("").replace('\0', "")).unwrap_or_else(|_| CString::new("").unwrap());
        in_reply_to.error(&name, &message)
    }

    pub(crate) fn empty() -> Error {
        Self::empty_with_kind(ErrorKind::DaemonError)
    }

    fn empty_with_kind(kind: ErrorKind) -> Error {
        init_dbus();
        let mut e = ffi::DBusError::default();
        unsafe { ffi::dbus_error_init(&mut e); }
        Error { e, kind }
    }

    /// Which taxonomy bucket (§7) this error belongs to.
    pub fn kind(&self) -> ErrorKind { self.kind }

    /// Error name/type, e g 'org.freedesktop.DBus.Error.Failed'
    pub fn name(&self) -> Option<&str> {
        c_str_to_slice(&self.e.name)
    }

    /// Custom message, e g 'Could not find a matching object path'
    pub fn message(&self) -> Option<&str> {
        c_str_to_slice(&self.e.message)
    }

    pub(crate) fn get_mut(&mut self) -> &mut ffi::DBusError { &mut self.e }

    /// True once a name/message has actually been set (mirrors
    /// `dbus_error_is_set`, without going back into FFI).
    pub fn is_set(&self) -> bool { !self.e.name.is_null() }
}

impl Drop for Error {
    fn drop(&mut self) {
        unsafe { ffi::dbus_error_free(&mut self.e); }
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(f, "D-Bus error: {} ({}, {:?})", self.message().unwrap_or(""),
            self.name().unwrap_or(""), self.kind)
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        if let Some(x) = self.message() {
            write!(f, "{}", x)
        } else {
            write!(f, "{:?}", self.kind)
        }
    }
}

impl From<arg::TypeMismatchError> for Error {
    fn from(t: arg::TypeMismatchError) -> Error {
        Error::type_mismatch(&format!("{:?}", t.expected_arg_type()), &format!("{:?}", t.found_arg_type()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kinds_roundtrip() {
        let e = Error::timeout();
        assert_eq!(e.kind(), ErrorKind::Timeout);
        assert_eq!(e.name(), Some("org.freedesktop.DBus.Error.Timeout"));

        let e = Error::not_writable("com.example.Iface", "Prop");
        assert_eq!(e.kind(), ErrorKind::NotWritable);
        assert!(e.message().unwrap().contains("Prop"));
    }
}
