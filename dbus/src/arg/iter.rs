//! The wire codec: encodes and decodes typed values against a
//! `DBusMessageIter` cursor borrowed from libdbus.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::{fmt, mem};

use super::{Append, Arg, DictKey, FixedArray, Get, RefArg};
use crate::{Message, Path, Signature};

/// The D-Bus wire type code for a value, mirroring the single-letter
/// signature grammar (§3 of the wire protocol).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(i32)]
pub enum ArgType {
    /// Zero, never a valid type in a message body.
    Invalid = ffi::DBUS_TYPE_INVALID,
    /// A byte (u8).
    Byte = ffi::DBUS_TYPE_BYTE,
    /// A boolean.
    Boolean = ffi::DBUS_TYPE_BOOLEAN,
    /// A signed 16-bit integer.
    Int16 = ffi::DBUS_TYPE_INT16,
    /// An unsigned 16-bit integer.
    UInt16 = ffi::DBUS_TYPE_UINT16,
    /// A signed 32-bit integer.
    Int32 = ffi::DBUS_TYPE_INT32,
    /// An unsigned 32-bit integer.
    UInt32 = ffi::DBUS_TYPE_UINT32,
    /// A signed 64-bit integer.
    Int64 = ffi::DBUS_TYPE_INT64,
    /// An unsigned 64-bit integer.
    UInt64 = ffi::DBUS_TYPE_UINT64,
    /// An IEEE-754 double.
    Double = ffi::DBUS_TYPE_DOUBLE,
    /// A UTF-8 string.
    String = ffi::DBUS_TYPE_STRING,
    /// A validated object path string.
    ObjectPath = ffi::DBUS_TYPE_OBJECT_PATH,
    /// A validated type signature string.
    Signature = ffi::DBUS_TYPE_SIGNATURE,
    /// A Unix file descriptor, transferred as an integer handle.
    UnixFd = ffi::DBUS_TYPE_UNIX_FD,
    /// An ordered sequence of elements of one element type.
    Array = ffi::DBUS_TYPE_ARRAY,
    /// A heterogeneous fixed-arity tuple.
    Struct = ffi::DBUS_TYPE_STRUCT,
    /// One key/value pair of a dict-typed array.
    DictEntry = ffi::DBUS_TYPE_DICT_ENTRY,
    /// A value tagged with its own signature at runtime.
    Variant = ffi::DBUS_TYPE_VARIANT,
}

impl ArgType {
    fn from_int(i: c_int) -> ArgType {
        match i {
            x if x == ffi::DBUS_TYPE_BYTE => ArgType::Byte,
            x if x == ffi::DBUS_TYPE_BOOLEAN => ArgType::Boolean,
            x if x == ffi::DBUS_TYPE_INT16 => ArgType::Int16,
            x if x == ffi::DBUS_TYPE_UINT16 => ArgType::UInt16,
            x if x == ffi::DBUS_TYPE_INT32 => ArgType::Int32,
            x if x == ffi::DBUS_TYPE_UINT32 => ArgType::UInt32,
            x if x == ffi::DBUS_TYPE_INT64 => ArgType::Int64,
            x if x == ffi::DBUS_TYPE_UINT64 => ArgType::UInt64,
            x if x == ffi::DBUS_TYPE_DOUBLE => ArgType::Double,
            x if x == ffi::DBUS_TYPE_STRING => ArgType::String,
            x if x == ffi::DBUS_TYPE_OBJECT_PATH => ArgType::ObjectPath,
            x if x == ffi::DBUS_TYPE_SIGNATURE => ArgType::Signature,
            x if x == ffi::DBUS_TYPE_UNIX_FD => ArgType::UnixFd,
            x if x == ffi::DBUS_TYPE_ARRAY => ArgType::Array,
            x if x == ffi::DBUS_TYPE_STRUCT => ArgType::Struct,
            x if x == ffi::DBUS_TYPE_DICT_ENTRY => ArgType::DictEntry,
            x if x == ffi::DBUS_TYPE_VARIANT => ArgType::Variant,
            _ => ArgType::Invalid,
        }
    }
}

/// The decoder found a value of the wrong wire type at the given cursor
/// position.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub struct TypeMismatchError {
    expected: ArgType,
    found: ArgType,
    position: u32,
}

impl TypeMismatchError {
    /// The cursor position (argument index) at which the mismatch occurred.
    pub fn pos(&self) -> u32 { self.position }
    /// The type the caller asked for.
    pub fn expected_arg_type(&self) -> ArgType { self.expected }
    /// The type actually found on the wire.
    pub fn found_arg_type(&self) -> ArgType { self.found }
}

impl fmt::Display for TypeMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Found argument of type {:?}, expected {:?}, at position {}", self.found, self.expected, self.position)
    }
}

impl std::error::Error for TypeMismatchError {}

/// A read-only cursor into a message body, advancing as values are popped.
pub struct Iter<'a> {
    iter: ffi::DBusMessageIter,
    msg: &'a Message,
    started: bool,
}

impl<'a> Iter<'a> {
    /// Creates a new cursor positioned at the start of `msg`'s body.
    pub fn new(msg: &'a Message) -> Iter<'a> {
        let mut iter = ffi::DBusMessageIter::default();
        let started = unsafe { ffi::dbus_message_iter_init(msg.ptr(), &mut iter) != 0 };
        Iter { iter, msg, started }
    }

    fn from_subiter(iter: ffi::DBusMessageIter, msg: &'a Message) -> Iter<'a> {
        Iter { iter, msg, started: true }
    }

    /// The wire type of the value currently under the cursor.
    pub fn arg_type(&self) -> ArgType {
        if !self.started { return ArgType::Invalid; }
        ArgType::from_int(unsafe { ffi::dbus_message_iter_get_arg_type(&self.iter) })
    }

    /// For a cursor positioned on an array/variant, the element type.
    pub fn element_type(&self) -> ArgType {
        ArgType::from_int(unsafe { ffi::dbus_message_iter_get_element_type(&self.iter) })
    }

    /// Advances the cursor to the next value; false if there was none.
    pub fn next(&mut self) -> bool {
        if !self.started { return false; }
        unsafe { ffi::dbus_message_iter_next(&mut self.iter) != 0 }
    }

    /// Decodes the value currently under the cursor without advancing.
    pub fn get<T: Get<'a>>(&mut self) -> Option<T> { T::get(self) }

    /// Decodes the value currently under the cursor, returning a typed
    /// error on mismatch.
    pub fn read<T: Arg + Get<'a>>(&mut self) -> Result<T, TypeMismatchError> {
        let found = self.arg_type();
        self.get().ok_or(TypeMismatchError {
            expected: T::ARG_TYPE,
            found,
            position: 0,
        })
    }

    /// Decodes the value currently under the cursor into a boxed `RefArg`,
    /// regardless of its concrete type.
    pub fn get_refarg(&mut self) -> Option<Box<dyn RefArg + 'static>> { get_refarg(self) }

    pub(crate) unsafe fn get_basic<T: Copy>(&mut self) -> T {
        let mut t: T = mem::zeroed();
        ffi::dbus_message_iter_get_basic(&mut self.iter, &mut t as *mut T as *mut c_void);
        t
    }

    pub(crate) fn recurse(&self, arg_type: ArgType) -> Option<Iter<'a>> {
        if self.arg_type() != arg_type { return None; }
        let mut sub = ffi::DBusMessageIter::default();
        unsafe { ffi::dbus_message_iter_recurse(&self.iter as *const _ as *mut _, &mut sub); }
        Some(Iter::from_subiter(sub, self.msg))
    }
}

impl<'a> fmt::Debug for Iter<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut i = Iter::new(self.msg);
        let mut l = f.debug_list();
        loop {
            if i.arg_type() == ArgType::Invalid { break; }
            l.entry(&i.arg_type());
            if !i.next() { break; }
        }
        l.finish()
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = Box<dyn RefArg + 'static>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.arg_type() == ArgType::Invalid { return None; }
        let r = get_refarg(self);
        self.next();
        r
    }
}

/// An append-only cursor writing into a message body.
pub struct IterAppend<'a> {
    iter: ffi::DBusMessageIter,
    msg: &'a mut Message,
}

impl<'a> IterAppend<'a> {
    /// Creates a new append cursor at the end of `msg`'s current body.
    pub fn new(msg: &'a mut Message) -> IterAppend<'a> {
        let mut iter = ffi::DBusMessageIter::default();
        unsafe { ffi::dbus_message_iter_init_append(msg.ptr(), &mut iter); }
        IterAppend { iter, msg }
    }

    /// Appends a single value.
    pub fn append<T: Append>(&mut self, a: T) { a.append(self) }

    pub(crate) unsafe fn append_basic<T>(&mut self, arg_type: ArgType, t: T) {
        ffi::dbus_message_iter_append_basic(&mut self.iter, arg_type as c_int, &t as *const T as *const c_void);
    }

    pub(crate) fn append_container<F: FnOnce(&mut IterAppend)>(&mut self, arg_type: ArgType, sig: Option<&CStr>, f: F) {
        let mut sub = ffi::DBusMessageIter::default();
        let sig_ptr = sig.map(|s| s.as_ptr()).unwrap_or(std::ptr::null());
        let open_type = match arg_type {
            ArgType::Struct => ffi::DBUS_TYPE_STRUCT_OPEN,
            ArgType::DictEntry => ffi::DBUS_TYPE_DICT_ENTRY_OPEN,
            t => t as c_int,
        };
        if unsafe { ffi::dbus_message_iter_open_container(&mut self.iter, open_type, sig_ptr, &mut sub) } == 0 {
            panic!("Out of memory while opening a D-Bus container");
        }
        {
            let mut subapp = IterAppend { iter: sub, msg: self.msg };
            f(&mut subapp);
            sub = subapp.iter;
        }
        if unsafe { ffi::dbus_message_iter_close_container(&mut self.iter, &mut sub) } == 0 {
            panic!("Out of memory while closing a D-Bus container");
        }
    }
}

// A vector of boxed values stands in for both arrays and structs decoded
// dynamically through `RefArg`; the wire-level distinction is not
// recoverable once the elements are boxed, so this reports itself as an
// array of whatever its first element's signature is.
impl RefArg for Vec<Box<dyn RefArg>> {
    fn arg_type(&self) -> ArgType { ArgType::Array }
    fn signature(&self) -> Signature<'static> {
        let inner = self.first().map(|v| v.signature().to_string()).unwrap_or_else(|| "v".to_string());
        Signature::new(format!("a{}", inner)).unwrap()
    }
    fn append(&self, i: &mut IterAppend) {
        let sig_c = self.first().map(|v| CString::new(&*v.signature()).unwrap());
        i.append_container(ArgType::Array, sig_c.as_deref(), |sub| {
            for item in self { item.append(sub); }
        });
    }
    fn as_any(&self) -> &dyn std::any::Any where Self: 'static { self }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any where Self: 'static { self }
    fn as_iter<'b>(&'b self) -> Option<Box<dyn Iterator<Item = &'b dyn RefArg> + 'b>> {
        Some(Box::new(self.iter().map(|b| b.as_ref())))
    }
}

pub(crate) fn get_refarg<'a>(i: &mut Iter<'a>) -> Option<Box<dyn RefArg + 'static>> {
    macro_rules! try_get {
        ($t: ty) => {
            if let Some(v) = i.get::<$t>() { return Some(Box::new(v)); }
        };
    }
    match i.arg_type() {
        ArgType::Boolean => try_get!(bool),
        ArgType::Byte => try_get!(u8),
        ArgType::Int16 => try_get!(i16),
        ArgType::UInt16 => try_get!(u16),
        ArgType::Int32 => try_get!(i32),
        ArgType::UInt32 => try_get!(u32),
        ArgType::Int64 => try_get!(i64),
        ArgType::UInt64 => try_get!(u64),
        ArgType::Double => try_get!(f64),
        ArgType::String => try_get!(String),
        ArgType::ObjectPath => { if let Some(v) = i.get::<Path<'static>>() { return Some(Box::new(v)); } }
        ArgType::Signature => { if let Some(v) = i.get::<Signature<'static>>() { return Some(Box::new(v)); } }
        ArgType::Variant => { if let Some(v) = i.get::<super::Variant<Box<dyn RefArg>>>() { return Some(Box::new(v)); } }
        ArgType::Array => {
            if i.element_type() == ArgType::DictEntry {
                let mut sub = i.recurse(ArgType::Array)?;
                let mut entries: Vec<Box<dyn RefArg>> = Vec::new();
                while sub.arg_type() == ArgType::DictEntry {
                    let mut entry = sub.recurse(ArgType::DictEntry)?;
                    let k = get_refarg(&mut entry)?;
                    entry.next();
                    let v = get_refarg(&mut entry)?;
                    let pair: Vec<Box<dyn RefArg>> = vec![k, v];
                    entries.push(Box::new(pair));
                    if !sub.next() { break; }
                }
                return Some(Box::new(entries));
            }
            let mut sub = i.recurse(ArgType::Array)?;
            let mut v: Vec<Box<dyn RefArg>> = Vec::new();
            while sub.arg_type() != ArgType::Invalid {
                v.push(get_refarg(&mut sub)?);
                if !sub.next() { break; }
            }
            return Some(Box::new(v));
        }
        ArgType::Struct => {
            let mut sub = i.recurse(ArgType::Struct)?;
            let mut v: Vec<Box<dyn RefArg>> = Vec::new();
            while sub.arg_type() != ArgType::Invalid {
                v.push(get_refarg(&mut sub)?);
                if !sub.next() { break; }
            }
            return Some(Box::new(v));
        }
        ArgType::Invalid | ArgType::DictEntry | ArgType::UnixFd => {}
    }
    None
}

// Basic fixed-size integer/float/bool types.
macro_rules! basic_impl {
    ($t: ty, $at: expr, $sig: expr) => {
        impl Arg for $t {
            const ARG_TYPE: ArgType = $at;
            fn signature() -> Signature<'static> { unsafe { Signature::from_slice_unchecked(concat!($sig, "\0").as_bytes()) } }
        }
        impl Append for $t {
            fn append(self, i: &mut IterAppend) { unsafe { i.append_basic(Self::ARG_TYPE, self) } }
        }
        impl<'a> Get<'a> for $t {
            fn get(i: &mut Iter<'a>) -> Option<Self> {
                if i.arg_type() != Self::ARG_TYPE { return None; }
                Some(unsafe { i.get_basic() })
            }
        }
    };
}

basic_impl!(u8, ArgType::Byte, "y");
basic_impl!(i16, ArgType::Int16, "n");
basic_impl!(u16, ArgType::UInt16, "q");
basic_impl!(i32, ArgType::Int32, "i");
basic_impl!(u32, ArgType::UInt32, "u");
basic_impl!(i64, ArgType::Int64, "x");
basic_impl!(u64, ArgType::UInt64, "t");
basic_impl!(f64, ArgType::Double, "d");

unsafe impl FixedArray for u8 {}
unsafe impl FixedArray for i16 {}
unsafe impl FixedArray for u16 {}
unsafe impl FixedArray for i32 {}
unsafe impl FixedArray for u32 {}
unsafe impl FixedArray for i64 {}
unsafe impl FixedArray for u64 {}
unsafe impl FixedArray for f64 {}

impl DictKey for u8 {}
impl DictKey for i16 {}
impl DictKey for u16 {}
impl DictKey for i32 {}
impl DictKey for u32 {}
impl DictKey for i64 {}
impl DictKey for u64 {}
impl DictKey for bool {}
impl DictKey for String {}

impl Arg for bool {
    const ARG_TYPE: ArgType = ArgType::Boolean;
    fn signature() -> Signature<'static> { unsafe { Signature::from_slice_unchecked(b"b\0") } }
}
impl Append for bool {
    fn append(self, i: &mut IterAppend) { unsafe { i.append_basic(ArgType::Boolean, self as u32) } }
}
impl<'a> Get<'a> for bool {
    fn get(i: &mut Iter<'a>) -> Option<Self> {
        if i.arg_type() != ArgType::Boolean { return None; }
        Some(unsafe { i.get_basic::<u32>() } != 0)
    }
}

impl Arg for String {
    const ARG_TYPE: ArgType = ArgType::String;
    fn signature() -> Signature<'static> { unsafe { Signature::from_slice_unchecked(b"s\0") } }
}
impl Append for String {
    fn append(self, i: &mut IterAppend) { (&*self).append(i) }
}
impl<'a> Append for &'a str {
    fn append(self, i: &mut IterAppend) {
        let c = CString::new(self).expect("string argument contains an interior NUL");
        unsafe { i.append_basic(ArgType::String, c.as_ptr()) }
    }
}
impl Arg for &str {
    const ARG_TYPE: ArgType = ArgType::String;
    fn signature() -> Signature<'static> { String::signature() }
}
impl<'a> Get<'a> for String {
    fn get(i: &mut Iter<'a>) -> Option<Self> {
        if i.arg_type() != ArgType::String { return None; }
        let p: *const c_char = unsafe { i.get_basic() };
        Some(unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
    }
}
impl<'a> Get<'a> for &'a str {
    fn get(i: &mut Iter<'a>) -> Option<Self> {
        if i.arg_type() != ArgType::String { return None; }
        let p: *const c_char = unsafe { i.get_basic() };
        unsafe { CStr::from_ptr(p) }.to_str().ok()
    }
}

impl<'b> Arg for Path<'b> {
    const ARG_TYPE: ArgType = ArgType::ObjectPath;
    fn signature() -> Signature<'static> { unsafe { Signature::from_slice_unchecked(b"o\0") } }
}
impl<'b> Append for Path<'b> {
    fn append(self, i: &mut IterAppend) { unsafe { i.append_basic(ArgType::ObjectPath, self.as_cstr().as_ptr()) } }
}
impl<'a> Get<'a> for Path<'static> {
    fn get(i: &mut Iter<'a>) -> Option<Self> {
        if i.arg_type() != ArgType::ObjectPath { return None; }
        let p: *const c_char = unsafe { i.get_basic() };
        let s = unsafe { CStr::from_ptr(p) };
        Path::from_slice(s.to_bytes_with_nul()).ok()
    }
}
impl DictKey for Path<'static> {}

impl<'b> Arg for Signature<'b> {
    const ARG_TYPE: ArgType = ArgType::Signature;
    fn signature() -> Signature<'static> { unsafe { Signature::from_slice_unchecked(b"g\0") } }
}
impl<'b> Append for Signature<'b> {
    fn append(self, i: &mut IterAppend) { unsafe { i.append_basic(ArgType::Signature, self.as_cstr().as_ptr()) } }
}
impl<'a> Get<'a> for Signature<'static> {
    fn get(i: &mut Iter<'a>) -> Option<Self> {
        if i.arg_type() != ArgType::Signature { return None; }
        let p: *const c_char = unsafe { i.get_basic() };
        let s = unsafe { CStr::from_ptr(p) };
        Signature::from_slice(s.to_bytes_with_nul()).ok()
    }
}

impl<T: Arg> Arg for Vec<T> {
    const ARG_TYPE: ArgType = ArgType::Array;
    fn signature() -> Signature<'static> {
        Signature::new(format!("a{}", T::signature())).unwrap()
    }
}
impl<T: Append + Arg + Clone> Append for Vec<T> {
    fn append(self, i: &mut IterAppend) {
        let sig_c = CString::new(&*T::signature()).unwrap();
        i.append_container(ArgType::Array, Some(sig_c.as_c_str()), |sub| {
            for item in self { item.clone().append(sub); }
        });
    }
}

impl<'a, T: Get<'a> + 'a> Get<'a> for Vec<T> {
    fn get(i: &mut Iter<'a>) -> Option<Self> {
        let mut sub = i.recurse(ArgType::Array)?;
        let mut v = Vec::new();
        if sub.arg_type() == ArgType::Invalid { return Some(v); }
        loop {
            v.push(sub.get::<T>()?);
            if !sub.next() { break; }
        }
        Some(v)
    }
}

impl<K: Arg + Eq + std::hash::Hash, V: Arg> Arg for HashMap<K, V> {
    const ARG_TYPE: ArgType = ArgType::Array;
    fn signature() -> Signature<'static> {
        unsafe { Signature::from_slice_unchecked(format!("a{{{}{}}}\0", K::signature(), V::signature()).as_bytes()) }
    }
}
impl<K: Append + DictKey + Eq + std::hash::Hash, V: Append + Arg> Append for HashMap<K, V> {
    fn append(self, i: &mut IterAppend) {
        let ksig = CString::new(&*K::signature()).unwrap();
        let vsig = CString::new(&*V::signature()).unwrap();
        let entry_sig = CString::new(format!("{{{}{}}}", ksig.to_str().unwrap(), vsig.to_str().unwrap())).unwrap();
        i.append_container(ArgType::Array, Some(entry_sig.as_c_str()), |sub| {
            for (k, v) in self {
                sub.append_container(ArgType::DictEntry, None, |kv| {
                    k.append(kv);
                    v.append(kv);
                });
            }
        });
    }
}
impl<'a, K: Get<'a> + DictKey + Eq + std::hash::Hash, V: Get<'a>> Get<'a> for HashMap<K, V> {
    fn get(i: &mut Iter<'a>) -> Option<Self> {
        let mut sub = i.recurse(ArgType::Array)?;
        let mut m = HashMap::new();
        if sub.arg_type() == ArgType::Invalid { return Some(m); }
        loop {
            let mut entry = sub.recurse(ArgType::DictEntry)?;
            let k = entry.get::<K>()?;
            entry.next();
            let v = entry.get::<V>()?;
            m.insert(k, v);
            if !sub.next() { break; }
        }
        Some(m)
    }
}

impl Arg for () {
    const ARG_TYPE: ArgType = ArgType::Invalid;
    fn signature() -> Signature<'static> { unsafe { Signature::from_slice_unchecked(b"\0") } }
}
impl Append for () { fn append(self, _i: &mut IterAppend) {} }
impl<'a> Get<'a> for () { fn get(_i: &mut Iter<'a>) -> Option<Self> { Some(()) } }

/// Encodes/decodes a fixed-arity ordered sequence of arguments as a
/// message body (or as the contents of a struct).
pub trait ReadAll: Sized {
    /// Reads every field from `i` in order.
    fn read(i: &mut Iter) -> Result<Self, TypeMismatchError>;
}

/// Appends a fixed-arity ordered sequence of arguments.
pub trait AppendAll {
    /// Appends every field to `i` in order.
    fn append(&self, i: &mut IterAppend);
}

impl ReadAll for () {
    fn read(_i: &mut Iter) -> Result<Self, TypeMismatchError> { Ok(()) }
}
impl AppendAll for () {
    fn append(&self, _i: &mut IterAppend) {}
}

macro_rules! tuple_impl {
    ($($n: tt $t: ident),+) => {
        impl<$($t: Arg + for<'z> Get<'z>),+> ReadAll for ($($t,)+) {
            fn read(i: &mut Iter) -> Result<Self, TypeMismatchError> {
                $(
                    let $t: $t = i.read()?;
                    i.next();
                )+
                Ok(($($t,)+))
            }
        }
        impl<$($t: Append + Clone),+> AppendAll for ($($t,)+) {
            fn append(&self, i: &mut IterAppend) {
                $( self.$n.clone().append(i); )+
            }
        }
        impl<$($t: Arg),+> Arg for ($($t,)+) {
            const ARG_TYPE: ArgType = ArgType::Struct;
            fn signature() -> Signature<'static> {
                let inner: String = [$($t::signature().to_string()),+].concat();
                unsafe { Signature::from_slice_unchecked(format!("({})\0", inner).as_bytes()) }
            }
        }
        impl<$($t: Arg + Append + Clone),+> Append for ($($t,)+) {
            fn append(self, i: &mut IterAppend) {
                let sig = <($($t,)+) as Arg>::signature();
                let sig_str: &str = &sig;
                let inner = &sig_str[1..sig_str.len()-1];
                let inner_c = CString::new(inner).unwrap();
                i.append_container(ArgType::Struct, Some(inner_c.as_c_str()), |sub| {
                    $( self.$n.clone().append(sub); )+
                });
            }
        }
        impl<'a, $($t: Get<'a>),+> Get<'a> for ($($t,)+) {
            fn get(i: &mut Iter<'a>) -> Option<Self> {
                let mut sub = i.recurse(ArgType::Struct)?;
                $(
                    let $t: $t = sub.get()?;
                    sub.next();
                )+
                Some(($($t,)+))
            }
        }
    }
}

tuple_impl!(0 A);
tuple_impl!(0 A, 1 B);
tuple_impl!(0 A, 1 B, 2 C);
tuple_impl!(0 A, 1 B, 2 C, 3 D);
tuple_impl!(0 A, 1 B, 2 C, 3 D, 4 E);
