//! Core client/server runtime for D-Bus.
//!
//! [D-Bus](http://dbus.freedesktop.org/) is a message bus, mainly used on
//! Linux for communication between processes. This crate owns the "hard"
//! engineering underneath a D-Bus binding: the typed wire codec, message
//! construction, match rules, a private bus connection driven through
//! libdbus, a generic message router, and the pending-call primitive that
//! asynchronous calls are built on.
//!
//! Two companion crates build on top of this one: `dbus-reactor` integrates
//! the connection with an async executor, and `dbus-object` provides the
//! service/object/signal/property layer.

#![warn(missing_docs)]

extern crate libc;

#[allow(missing_docs)]
extern crate libdbus_sys as ffi;

pub use crate::ffi::DBusMessageType as MessageType;
pub use crate::ffi::DBusRequestNameReply as RequestNameReply;
pub use crate::ffi::DBusReleaseNameReply as ReleaseNameReply;

pub mod arg;
pub mod error;
pub mod strings;
pub mod message;
pub mod channel;
pub mod router;
pub mod blocking;
pub mod nonblock;

pub use crate::error::{Error, ErrorKind};
pub use crate::message::Message;
pub use crate::message::MatchRule;
pub use crate::strings::{Signature, Path, Interface, Member, ErrorName, BusName};
pub use crate::channel::{Channel, BusType};

use std::ffi::{CString, CStr};
use std::os::raw::c_char;

static INITDBUS: std::sync::Once = std::sync::Once::new();

/// Runs libdbus's one-time thread-safety initialisation.
///
/// Safe to call repeatedly; only the first call does anything. Every entry
/// point that opens a connection calls this before touching libdbus.
pub(crate) fn init_dbus() {
    INITDBUS.call_once(|| {
        if unsafe { ffi::dbus_threads_init_default() } == 0 {
            panic!("Out of memory when trying to initialize D-Bus library!");
        }
    });
}

pub(crate) fn c_str_to_slice(c: &*const c_char) -> Option<&str> {
    if c.is_null() { None }
    else { std::str::from_utf8(unsafe { CStr::from_ptr(*c).to_bytes() }).ok() }
}

pub(crate) fn to_c_str(n: &str) -> CString {
    CString::new(n.as_bytes()).unwrap_or_else(|_| CString::new("").unwrap())
}
