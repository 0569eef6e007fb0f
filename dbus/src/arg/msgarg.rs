#![allow(dead_code)]

use crate::Signature;
use std::{fmt, any};
use std::sync::Arc;
use std::rc::Rc;

use super::{Iter, IterAppend, ArgType};

/// Types that can represent a D-Bus message argument implement this trait.
///
/// Types should also implement either Append or Get to be useful.
pub trait Arg {
    /// The corresponding D-Bus argument type code.
    const ARG_TYPE: ArgType;
    /// The corresponding D-Bus type signature for this type.
    fn signature() -> Signature<'static>;
}

/// Types that can be appended to a message as arguments implement this trait.
pub trait Append: Sized {
    /// Performs the append operation.
    fn append(self, i: &mut IterAppend);
}

/// Types that can be retrieved from a message as arguments implement this trait.
pub trait Get<'a>: Sized {
    /// Performs the get operation.
    fn get(i: &mut Iter<'a>) -> Option<Self>;
}

/// Object safe version of Arg + Append + Get.
///
/// Only use in case `Arg` is not dynamic enough for your needs.
pub trait RefArg: fmt::Debug {
    /// The corresponding D-Bus argument type code.
    fn arg_type(&self) -> ArgType;
    /// The corresponding D-Bus type signature for this type.
    fn signature(&self) -> Signature<'static>;
    /// Performs the append operation.
    fn append(&self, i: &mut IterAppend);
    /// Transforms this argument to Any (which can be downcasted to read the current value).
    fn as_any(&self) -> &dyn any::Any where Self: 'static;
    /// Transforms this argument to Any (which can be downcasted to read the current value).
    ///
    /// # Panic
    /// Will panic if the interior cannot be made mutable, e g, if encapsulated
    /// inside an Rc with a reference count > 1.
    fn as_any_mut(&mut self) -> &mut dyn any::Any where Self: 'static;
    /// Try to read the argument as an i64.
    #[inline]
    fn as_i64(&self) -> Option<i64> { None }
    /// Try to read the argument as a str.
    #[inline]
    fn as_str(&self) -> Option<&str> { None }
    /// Try to read the argument as an iterator.
    #[inline]
    fn as_iter<'a>(&'a self) -> Option<Box<dyn Iterator<Item = &'a dyn RefArg> + 'a>> { None }
}

/// Cast a RefArg as a specific type (shortcut for any + downcast)
#[inline]
pub fn cast<'a, T: 'static>(a: &'a (dyn RefArg + 'static)) -> Option<&'a T> { a.as_any().downcast_ref() }

/// Cast a RefArg as a specific type (shortcut for any_mut + downcast_mut)
///
/// # Panic
/// Will panic if the interior cannot be made mutable, e g, if encapsulated
/// inside an Rc with a reference count > 1.
#[inline]
pub fn cast_mut<'a, T: 'static>(a: &'a mut (dyn RefArg + 'static)) -> Option<&'a mut T> { a.as_any_mut().downcast_mut() }

/// If a type implements this trait, it means the size and alignment is the same
/// as in D-Bus. This means that you can quickly append and get slices of this type.
///
/// Note: Booleans do not implement this trait because D-Bus booleans are 4 bytes and Rust booleans are 1 byte.
pub unsafe trait FixedArray: Arg + 'static + Clone + Copy {}

/// Types that can be used as keys in a dict type implement this trait.
pub trait DictKey: Arg {}

/// Simple lift over reference to value - this makes some iterators more ergonomic to use
impl<'a, T: Arg> Arg for &'a T {
    const ARG_TYPE: ArgType = T::ARG_TYPE;
    fn signature() -> Signature<'static> { T::signature() }
}
impl<'a, T: Append + Clone> Append for &'a T {
    fn append(self, i: &mut IterAppend) { self.clone().append(i) }
}
impl<'a, T: DictKey> DictKey for &'a T {}

impl<'a, T: RefArg + ?Sized> RefArg for &'a T {
    #[inline]
    fn arg_type(&self) -> ArgType { (**self).arg_type() }
    #[inline]
    fn signature(&self) -> Signature<'static> { (**self).signature() }
    #[inline]
    fn append(&self, i: &mut IterAppend) { (**self).append(i) }
    #[inline]
    fn as_any(&self) -> &dyn any::Any where T: 'static { (**self).as_any() }
    #[inline]
    fn as_any_mut(&mut self) -> &mut dyn any::Any where T: 'static { unreachable!("cannot get mutable access through a shared reference") }
    #[inline]
    fn as_i64(&self) -> Option<i64> { (**self).as_i64() }
    #[inline]
    fn as_str(&self) -> Option<&str> { (**self).as_str() }
    #[inline]
    fn as_iter<'b>(&'b self) -> Option<Box<dyn Iterator<Item = &'b dyn RefArg> + 'b>> { (**self).as_iter() }
}

macro_rules! deref_impl {
    ($t: ident, $make_mut: ident) => {

impl<T: RefArg + ?Sized> RefArg for $t<T> {
    #[inline]
    fn arg_type(&self) -> ArgType { (**self).arg_type() }
    #[inline]
    fn signature(&self) -> Signature<'static> { (**self).signature() }
    #[inline]
    fn append(&self, i: &mut IterAppend) { (**self).append(i) }
    #[inline]
    fn as_any(&self) -> &dyn any::Any where T: 'static { (**self).as_any() }
    #[inline]
    fn as_any_mut(&mut self) -> &mut dyn any::Any where T: 'static { $make_mut(self).as_any_mut() }
    #[inline]
    fn as_i64(&self) -> Option<i64> { (**self).as_i64() }
    #[inline]
    fn as_str(&self) -> Option<&str> { (**self).as_str() }
    #[inline]
    fn as_iter<'a>(&'a self) -> Option<Box<dyn Iterator<Item = &'a dyn RefArg> + 'a>> { (**self).as_iter() }
}
impl<T: DictKey> DictKey for $t<T> {}

impl<T: Arg> Arg for $t<T> {
    const ARG_TYPE: ArgType = T::ARG_TYPE;
    fn signature() -> Signature<'static> { T::signature() }
}
impl<'a, T: Get<'a>> Get<'a> for $t<T> {
    fn get(i: &mut Iter<'a>) -> Option<Self> { T::get(i).map($t::new) }
}

    }
}

impl<T: Append> Append for Box<T> {
    fn append(self, i: &mut IterAppend) { let q: T = *self; q.append(i) }
}

fn box_make_mut<T: ?Sized>(s: &mut Box<T>) -> &mut T { &mut **s }
fn rc_make_mut<T: ?Sized>(s: &mut Rc<T>) -> &mut T {
    Rc::get_mut(s).expect("Rc with refcount > 1 cannot be mutated through RefArg")
}
fn arc_make_mut<T: ?Sized>(s: &mut Arc<T>) -> &mut T {
    Arc::get_mut(s).expect("Arc with refcount > 1 cannot be mutated through RefArg")
}

deref_impl!(Box, box_make_mut);
deref_impl!(Rc, rc_make_mut);
deref_impl!(Arc, arc_make_mut);
