//! Typed D-Bus arguments: the `Arg`/`Append`/`Get`/`RefArg` trait family,
//! the message-iterator codec that implements them, and the `Variant`
//! wrapper for self-describing values.

mod msgarg;
mod iter;

pub use self::msgarg::{Arg, Append, Get, RefArg, DictKey, FixedArray, cast, cast_mut};
pub use self::iter::{ArgType, Iter, IterAppend, TypeMismatchError, ReadAll, AppendAll};

use std::any;
use std::collections::HashMap;

use crate::Signature;

/// A value tagged with its own signature on the wire, used whenever a
/// method or property accepts an argument of unknown or heterogeneous
/// type (e g properties, in `a{sv}` dictionaries).
#[derive(Debug, Clone, PartialEq)]
pub struct Variant<T>(pub T);

impl<T> Variant<T> {
    /// Unwraps the inner value.
    pub fn into_inner(self) -> T { self.0 }
}

impl<T: Arg> Arg for Variant<T> {
    const ARG_TYPE: ArgType = ArgType::Variant;
    fn signature() -> Signature<'static> { unsafe { Signature::from_slice_unchecked(b"v\0") } }
}

impl<T: Append + Arg> Append for Variant<T> {
    fn append(self, i: &mut IterAppend) {
        let sig = std::ffi::CString::new(&*T::signature()).unwrap();
        i.append_container(ArgType::Variant, Some(sig.as_c_str()), |sub| self.0.append(sub));
    }
}

impl<'a, T: Get<'a> + Arg> Get<'a> for Variant<T> {
    fn get(i: &mut Iter<'a>) -> Option<Self> {
        let mut sub = i.recurse(ArgType::Variant)?;
        sub.get::<T>().map(Variant)
    }
}

impl<T: RefArg> RefArg for Variant<T> {
    fn arg_type(&self) -> ArgType { ArgType::Variant }
    fn signature(&self) -> Signature<'static> { unsafe { Signature::from_slice_unchecked(b"v\0") } }
    fn append(&self, i: &mut IterAppend) {
        let sig = std::ffi::CString::new(&*self.0.signature()).unwrap();
        i.append_container(ArgType::Variant, Some(sig.as_c_str()), |sub| self.0.append(sub));
    }
    fn as_any(&self) -> &dyn any::Any where Self: 'static { self }
    fn as_any_mut(&mut self) -> &mut dyn any::Any where Self: 'static { self }
    fn as_i64(&self) -> Option<i64> { self.0.as_i64() }
    fn as_str(&self) -> Option<&str> { self.0.as_str() }
}

impl<'a> Get<'a> for Variant<Box<dyn RefArg>> {
    fn get(i: &mut Iter<'a>) -> Option<Self> {
        let mut sub = i.recurse(ArgType::Variant)?;
        let inner = self::iter::get_refarg(&mut sub)?;
        Some(Variant(inner))
    }
}

// A variant's signature is always "v" regardless of what it holds, so this
// doesn't need the inner type to be `Arg` the way the blanket impl above
// does. Needed so `PropMap` can be read back as a `GetAll` reply through the
// `ReadAll` tuple impls, which bound each field on `Arg + Get`.
impl Arg for Variant<Box<dyn RefArg>> {
    const ARG_TYPE: ArgType = ArgType::Variant;
    fn signature() -> Signature<'static> { unsafe { Signature::from_slice_unchecked(b"v\0") } }
}

/// A dictionary of string-keyed, self-describing property values, as
/// returned by `org.freedesktop.DBus.Properties.GetAll`.
pub type PropMap = HashMap<String, Variant<Box<dyn RefArg>>>;

