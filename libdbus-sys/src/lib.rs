//! Raw FFI bindings to libdbus (`libdbus-1`).
//!
//! This crate declares the subset of the libdbus C API used by the `dbus`
//! crate: connections, messages, message iterators, watches, timeouts and
//! the basic validation helpers. It does not attempt to cover the whole of
//! `dbus/dbus.h` — only what a client/server runtime built on top of it
//! needs.

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::os::raw::{c_char, c_int, c_uint, c_void};

pub enum DBusConnection {}
pub enum DBusMessage {}
pub enum DBusWatch {}
pub enum DBusTimeout {}
pub enum DBusPendingCall {}
pub enum DBusServer {}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DBusBusType {
    Session = 0,
    System = 1,
    Starter = 2,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DBusMessageType {
    Invalid = 0,
    MethodCall = 1,
    MethodReturn = 2,
    Error = 3,
    Signal = 4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DBusRequestNameReply {
    PrimaryOwner = 1,
    InQueue = 2,
    Exists = 3,
    AlreadyOwner = 4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DBusReleaseNameReply {
    Released = 1,
    NonExistent = 2,
    NotOwner = 3,
}

pub const DBUS_NAME_FLAG_ALLOW_REPLACEMENT: u32 = 0x1;
pub const DBUS_NAME_FLAG_REPLACE_EXISTING: u32 = 0x2;
pub const DBUS_NAME_FLAG_DO_NOT_QUEUE: u32 = 0x4;

pub const DBUS_WATCH_READABLE: u32 = 1;
pub const DBUS_WATCH_WRITABLE: u32 = 2;
pub const DBUS_WATCH_ERROR: u32 = 4;
pub const DBUS_WATCH_HANGUP: u32 = 8;

pub const DBUS_TIMEOUT_INFINITE: c_int = 0x7fffffff;

// Wire type codes, matching dbus/dbus-protocol.h.
pub const DBUS_TYPE_INVALID: c_int = 0;
pub const DBUS_TYPE_BYTE: c_int = b'y' as c_int;
pub const DBUS_TYPE_BOOLEAN: c_int = b'b' as c_int;
pub const DBUS_TYPE_INT16: c_int = b'n' as c_int;
pub const DBUS_TYPE_UINT16: c_int = b'q' as c_int;
pub const DBUS_TYPE_INT32: c_int = b'i' as c_int;
pub const DBUS_TYPE_UINT32: c_int = b'u' as c_int;
pub const DBUS_TYPE_INT64: c_int = b'x' as c_int;
pub const DBUS_TYPE_UINT64: c_int = b't' as c_int;
pub const DBUS_TYPE_DOUBLE: c_int = b'd' as c_int;
pub const DBUS_TYPE_STRING: c_int = b's' as c_int;
pub const DBUS_TYPE_OBJECT_PATH: c_int = b'o' as c_int;
pub const DBUS_TYPE_SIGNATURE: c_int = b'g' as c_int;
pub const DBUS_TYPE_UNIX_FD: c_int = b'h' as c_int;
pub const DBUS_TYPE_ARRAY: c_int = b'a' as c_int;
pub const DBUS_TYPE_VARIANT: c_int = b'v' as c_int;
pub const DBUS_TYPE_STRUCT: c_int = b'r' as c_int;
pub const DBUS_TYPE_DICT_ENTRY: c_int = b'e' as c_int;

// Used only as the container-type argument to open/close_container; these
// are the actual characters libdbus expects for struct/dict_entry.
pub const DBUS_TYPE_STRUCT_OPEN: c_int = b'(' as c_int;
pub const DBUS_TYPE_DICT_ENTRY_OPEN: c_int = b'{' as c_int;

pub type DBusFreeFunction = Option<unsafe extern "C" fn(memory: *mut c_void)>;
pub type DBusAddWatchFunction = Option<unsafe extern "C" fn(watch: *mut DBusWatch, data: *mut c_void) -> u32>;
pub type DBusRemoveWatchFunction = Option<unsafe extern "C" fn(watch: *mut DBusWatch, data: *mut c_void)>;
pub type DBusWatchToggledFunction = Option<unsafe extern "C" fn(watch: *mut DBusWatch, data: *mut c_void)>;
pub type DBusAddTimeoutFunction = Option<unsafe extern "C" fn(timeout: *mut DBusTimeout, data: *mut c_void) -> u32>;
pub type DBusRemoveTimeoutFunction = Option<unsafe extern "C" fn(timeout: *mut DBusTimeout, data: *mut c_void)>;
pub type DBusTimeoutToggledFunction = Option<unsafe extern "C" fn(timeout: *mut DBusTimeout, data: *mut c_void)>;
pub type DBusWakeupMainFunction = Option<unsafe extern "C" fn(data: *mut c_void)>;
pub type DBusHandleMessageFunction = Option<unsafe extern "C" fn(connection: *mut DBusConnection, message: *mut DBusMessage, data: *mut c_void) -> c_uint>;
pub type DBusNewConnectionFunction = Option<unsafe extern "C" fn(server: *mut DBusServer, new_connection: *mut DBusConnection, data: *mut c_void)>;
pub type DBusPendingCallNotifyFunction = Option<unsafe extern "C" fn(pending: *mut DBusPendingCall, data: *mut c_void)>;

/// Mirrors `DBusError` from `dbus/dbus-shared.h`: two public fields
/// (`name`, `message`) followed by reserved padding. Only the first two
/// fields are ever read or written from Rust; the rest exists purely so
/// the struct's size matches libdbus's ABI.
#[repr(C)]
pub struct DBusError {
    pub name: *const c_char,
    pub message: *const c_char,
    dummy: c_uint,
    padding1: *mut c_void,
}

impl Default for DBusError {
    fn default() -> Self {
        DBusError { name: std::ptr::null(), message: std::ptr::null(), dummy: 0, padding1: std::ptr::null_mut() }
    }
}

/// Opaque on the Rust side; libdbus manages the iterator's internal layout.
/// Sized generously (matches the real struct's reserved padding) so it can
/// be stack-allocated by callers via `mem::zeroed`/`MaybeUninit`.
#[repr(C)]
pub struct DBusMessageIter {
    pub dummy1: *mut c_void,
    pub dummy2: *mut c_void,
    pub dummy3: u32,
    pub dummy4: c_int,
    pub dummy5: c_int,
    pub dummy6: c_int,
    pub dummy7: c_int,
    pub dummy8: c_int,
    pub dummy9: c_int,
    pub dummy10: c_int,
    pub dummy11: c_int,
    pub pad1: c_int,
    pub pad2: *mut c_void,
    pub pad3: *mut c_void,
}

impl Default for DBusMessageIter {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

extern "C" {
    // Threading / init
    pub fn dbus_threads_init_default() -> u32;

    // Error
    pub fn dbus_error_init(error: *mut DBusError);
    pub fn dbus_error_free(error: *mut DBusError);
    pub fn dbus_error_is_set(error: *const DBusError) -> u32;
    pub fn dbus_set_error(error: *mut DBusError, name: *const c_char, format: *const c_char, ...);
    pub fn dbus_set_error_from_message(error: *mut DBusError, message: *mut DBusMessage) -> u32;
    pub fn dbus_move_error(src: *mut DBusError, dest: *mut DBusError);

    // Memory
    pub fn dbus_free(memory: *mut c_void);
    pub fn dbus_free_string_array(str_array: *mut *mut c_char);

    // Connections
    pub fn dbus_bus_get_private(ty: DBusBusType, error: *mut DBusError) -> *mut DBusConnection;
    pub fn dbus_connection_open_private(address: *const c_char, error: *mut DBusError) -> *mut DBusConnection;
    pub fn dbus_connection_close(connection: *mut DBusConnection);
    pub fn dbus_connection_ref(connection: *mut DBusConnection) -> *mut DBusConnection;
    pub fn dbus_connection_unref(connection: *mut DBusConnection);
    pub fn dbus_connection_get_is_connected(connection: *mut DBusConnection) -> u32;
    pub fn dbus_connection_set_exit_on_disconnect(connection: *mut DBusConnection, exit_on_disconnect: u32);
    pub fn dbus_connection_flush(connection: *mut DBusConnection);
    pub fn dbus_connection_read_write(connection: *mut DBusConnection, timeout_milliseconds: c_int) -> u32;
    pub fn dbus_connection_read_write_dispatch(connection: *mut DBusConnection, timeout_milliseconds: c_int) -> u32;
    pub fn dbus_connection_pop_message(connection: *mut DBusConnection) -> *mut DBusMessage;
    pub fn dbus_connection_send(connection: *mut DBusConnection, message: *mut DBusMessage, serial: *mut u32) -> u32;
    pub fn dbus_connection_send_with_reply_and_block(connection: *mut DBusConnection, message: *mut DBusMessage, timeout_milliseconds: c_int, error: *mut DBusError) -> *mut DBusMessage;
    pub fn dbus_connection_send_with_reply(connection: *mut DBusConnection, message: *mut DBusMessage, pending_return: *mut *mut DBusPendingCall, timeout_milliseconds: c_int) -> u32;
    pub fn dbus_connection_set_watch_functions(connection: *mut DBusConnection, add_function: DBusAddWatchFunction, remove_function: DBusRemoveWatchFunction, toggled_function: DBusWatchToggledFunction, data: *mut c_void, free_data_function: DBusFreeFunction) -> u32;
    pub fn dbus_connection_set_timeout_functions(connection: *mut DBusConnection, add_function: DBusAddTimeoutFunction, remove_function: DBusRemoveTimeoutFunction, toggled_function: DBusTimeoutToggledFunction, data: *mut c_void, free_data_function: DBusFreeFunction) -> u32;
    pub fn dbus_connection_set_wakeup_main_function(connection: *mut DBusConnection, wakeup_main_function: DBusWakeupMainFunction, data: *mut c_void, free_data_function: DBusFreeFunction);
    pub fn dbus_connection_add_filter(connection: *mut DBusConnection, function: DBusHandleMessageFunction, data: *mut c_void, free_data_function: DBusFreeFunction) -> u32;
    pub fn dbus_connection_remove_filter(connection: *mut DBusConnection, function: DBusHandleMessageFunction, data: *mut c_void);
    pub fn dbus_connection_dispatch(connection: *mut DBusConnection) -> c_uint;
    pub fn dbus_connection_has_messages_to_send(connection: *mut DBusConnection) -> u32;

    // Bus
    pub fn dbus_bus_register(connection: *mut DBusConnection, error: *mut DBusError) -> u32;
    pub fn dbus_bus_get_unique_name(connection: *mut DBusConnection) -> *const c_char;
    pub fn dbus_bus_request_name(connection: *mut DBusConnection, name: *const c_char, flags: c_uint, error: *mut DBusError) -> c_int;
    pub fn dbus_bus_release_name(connection: *mut DBusConnection, name: *const c_char, error: *mut DBusError) -> c_int;
    pub fn dbus_bus_name_has_owner(connection: *mut DBusConnection, name: *const c_char, error: *mut DBusError) -> u32;
    pub fn dbus_bus_add_match(connection: *mut DBusConnection, rule: *const c_char, error: *mut DBusError);
    pub fn dbus_bus_remove_match(connection: *mut DBusConnection, rule: *const c_char, error: *mut DBusError);
    pub fn dbus_get_local_machine_id() -> *mut c_char;
    pub fn dbus_try_get_local_machine_id(error: *mut DBusError) -> *mut c_char;

    // Watches
    pub fn dbus_watch_get_unix_fd(watch: *mut DBusWatch) -> c_int;
    pub fn dbus_watch_get_socket(watch: *mut DBusWatch) -> c_int;
    pub fn dbus_watch_get_flags(watch: *mut DBusWatch) -> c_uint;
    pub fn dbus_watch_get_enabled(watch: *mut DBusWatch) -> u32;
    pub fn dbus_watch_handle(watch: *mut DBusWatch, flags: c_uint) -> u32;

    // Timeouts
    pub fn dbus_timeout_get_interval(timeout: *mut DBusTimeout) -> c_int;
    pub fn dbus_timeout_get_enabled(timeout: *mut DBusTimeout) -> u32;
    pub fn dbus_timeout_handle(timeout: *mut DBusTimeout) -> u32;

    // Messages
    pub fn dbus_message_new_method_call(destination: *const c_char, path: *const c_char, interface: *const c_char, method: *const c_char) -> *mut DBusMessage;
    pub fn dbus_message_new_method_return(method_call: *mut DBusMessage) -> *mut DBusMessage;
    pub fn dbus_message_new_signal(path: *const c_char, interface: *const c_char, name: *const c_char) -> *mut DBusMessage;
    pub fn dbus_message_new_error(reply_to: *mut DBusMessage, error_name: *const c_char, error_message: *const c_char) -> *mut DBusMessage;
    pub fn dbus_message_ref(message: *mut DBusMessage) -> *mut DBusMessage;
    pub fn dbus_message_unref(message: *mut DBusMessage);
    pub fn dbus_message_get_type(message: *mut DBusMessage) -> c_int;
    pub fn dbus_message_get_serial(message: *mut DBusMessage) -> u32;
    pub fn dbus_message_set_serial(message: *mut DBusMessage, serial: u32);
    pub fn dbus_message_get_reply_serial(message: *mut DBusMessage) -> u32;
    pub fn dbus_message_get_path(message: *mut DBusMessage) -> *const c_char;
    pub fn dbus_message_get_interface(message: *mut DBusMessage) -> *const c_char;
    pub fn dbus_message_get_member(message: *mut DBusMessage) -> *const c_char;
    pub fn dbus_message_get_destination(message: *mut DBusMessage) -> *const c_char;
    pub fn dbus_message_set_destination(message: *mut DBusMessage, destination: *const c_char) -> u32;
    pub fn dbus_message_get_sender(message: *mut DBusMessage) -> *const c_char;
    pub fn dbus_message_get_error_name(message: *mut DBusMessage) -> *const c_char;
    pub fn dbus_message_get_signature(message: *mut DBusMessage) -> *const c_char;
    pub fn dbus_message_get_no_reply(message: *mut DBusMessage) -> u32;
    pub fn dbus_message_set_no_reply(message: *mut DBusMessage, no_reply: u32);
    pub fn dbus_message_get_auto_start(message: *mut DBusMessage) -> u32;
    pub fn dbus_message_set_auto_start(message: *mut DBusMessage, auto_start: u32);

    // Message iteration (body codec)
    pub fn dbus_message_iter_init(message: *mut DBusMessage, iter: *mut DBusMessageIter) -> u32;
    pub fn dbus_message_iter_init_append(message: *mut DBusMessage, iter: *mut DBusMessageIter);
    pub fn dbus_message_iter_has_next(iter: *const DBusMessageIter) -> u32;
    pub fn dbus_message_iter_next(iter: *mut DBusMessageIter) -> u32;
    pub fn dbus_message_iter_get_arg_type(iter: *const DBusMessageIter) -> c_int;
    pub fn dbus_message_iter_get_element_type(iter: *const DBusMessageIter) -> c_int;
    pub fn dbus_message_iter_get_signature(iter: *const DBusMessageIter) -> *mut c_char;
    pub fn dbus_message_iter_recurse(iter: *mut DBusMessageIter, sub: *mut DBusMessageIter);
    pub fn dbus_message_iter_get_basic(iter: *mut DBusMessageIter, value: *mut c_void);
    pub fn dbus_message_iter_append_basic(iter: *mut DBusMessageIter, dbus_type: c_int, value: *const c_void) -> u32;
    pub fn dbus_message_iter_open_container(iter: *mut DBusMessageIter, dbus_type: c_int, contained_signature: *const c_char, sub: *mut DBusMessageIter) -> u32;
    pub fn dbus_message_iter_close_container(iter: *mut DBusMessageIter, sub: *mut DBusMessageIter) -> u32;
    pub fn dbus_message_iter_abandon_container(iter: *mut DBusMessageIter, sub: *mut DBusMessageIter);

    // Validation
    pub fn dbus_validate_path(path: *const c_char, error: *mut DBusError) -> u32;
    pub fn dbus_validate_interface(name: *const c_char, error: *mut DBusError) -> u32;
    pub fn dbus_validate_member(name: *const c_char, error: *mut DBusError) -> u32;
    pub fn dbus_validate_error_name(name: *const c_char, error: *mut DBusError) -> u32;
    pub fn dbus_validate_bus_name(name: *const c_char, error: *mut DBusError) -> u32;
    pub fn dbus_validate_utf8(alleged_utf8: *const c_char, error: *mut DBusError) -> u32;
    pub fn dbus_signature_validate(signature: *const c_char, error: *mut DBusError) -> u32;
    pub fn dbus_signature_validate_single(signature: *const c_char, error: *mut DBusError) -> u32;

    // Server (peer-to-peer listening, used only by the rarely-exercised Server type)
    pub fn dbus_server_listen(address: *const c_char, error: *mut DBusError) -> *mut DBusServer;
    pub fn dbus_server_ref(server: *mut DBusServer) -> *mut DBusServer;
    pub fn dbus_server_unref(server: *mut DBusServer);
    pub fn dbus_server_disconnect(server: *mut DBusServer);
    pub fn dbus_server_get_is_connected(server: *mut DBusServer) -> u32;
    pub fn dbus_server_get_address(server: *mut DBusServer) -> *mut c_char;
    pub fn dbus_server_get_id(server: *mut DBusServer) -> *mut c_char;
    pub fn dbus_server_set_auth_mechanisms(server: *mut DBusServer, mechanisms: *mut *const c_char) -> u32;
    pub fn dbus_server_set_new_connection_function(server: *mut DBusServer, function: DBusNewConnectionFunction, data: *mut c_void, free_data_function: DBusFreeFunction);
    pub fn dbus_server_set_watch_functions(server: *mut DBusServer, add_function: DBusAddWatchFunction, remove_function: DBusRemoveWatchFunction, toggled_function: DBusWatchToggledFunction, data: *mut c_void, free_data_function: DBusFreeFunction) -> u32;
}
