//! Service/Object routing tables for exposing Rust values as D-Bus objects,
//! with lifetime-cached signal and property proxies.

mod cache;
mod context;
mod object;
mod property;
mod service;
mod signal;

pub use cache::{AboutToBeDestroyed, LifetimeConstrainedCache};
pub use context::Context;
pub use object::{MethodHandler, MethodName, Object};
pub use property::PropertyHandle;
pub use service::{NameOwnerEvent, Service};
pub use signal::{MatchArgs, SignalHandle, SubscriptionToken};

pub use dbus::Error;
