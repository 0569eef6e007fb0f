//! Convenience traits for calling D-Bus standard interfaces through a
//! blocking [`Proxy`](super::Proxy).
//!
//! See the [D-Bus specification](https://dbus.freedesktop.org/doc/dbus-specification.html#standard-interfaces)
//! for the interfaces these methods call.

use std::ops::Deref;
use crate::{Error, Path};
use crate::arg::{Arg, Append, Get, PropMap};
use crate::blocking::{BlockingSender, Proxy};
use crate::message::SignalArgs;
use std::collections::HashMap;

/// Methods of `org.freedesktop.DBus.Peer`.
pub trait Peer {
    /// Pings the remote object. Returns once the reply arrives.
    fn ping(&self) -> Result<(), Error>;
    /// Returns the machine UUID the remote object is running on.
    fn get_machine_id(&self) -> Result<String, Error>;
}

impl<'a, T: BlockingSender, C: Deref<Target = T>> Peer for Proxy<'a, C> {
    fn ping(&self) -> Result<(), Error> {
        self.method_call("org.freedesktop.DBus.Peer", "Ping", ())
    }
    fn get_machine_id(&self) -> Result<String, Error> {
        let (id,): (String,) = self.method_call("org.freedesktop.DBus.Peer", "GetMachineId", ())?;
        Ok(id)
    }
}

/// Method of `org.freedesktop.DBus.Introspectable`.
pub trait Introspectable {
    /// Returns the introspection XML for the remote object.
    fn introspect(&self) -> Result<String, Error>;
}

impl<'a, T: BlockingSender, C: Deref<Target = T>> Introspectable for Proxy<'a, C> {
    fn introspect(&self) -> Result<String, Error> {
        let (xml,): (String,) = self.method_call("org.freedesktop.DBus.Introspectable", "Introspect", ())?;
        Ok(xml)
    }
}

/// Methods of `org.freedesktop.DBus.Properties`.
pub trait Properties {
    /// Gets a single property.
    fn get<R0: Arg + for<'b> Get<'b>>(&self, interface: &str, property: &str) -> Result<R0, Error>;
    /// Gets every property of an interface, keyed by name.
    fn get_all(&self, interface: &str) -> Result<PropMap, Error>;
    /// Sets a single property.
    fn set<I: Arg + Append + Clone>(&self, interface: &str, property: &str, value: I) -> Result<(), Error>;
}

impl<'a, T: BlockingSender, C: Deref<Target = T>> Properties for Proxy<'a, C> {
    fn get<R0: Arg + for<'b> Get<'b>>(&self, interface: &str, property: &str) -> Result<R0, Error> {
        use crate::arg::Variant;
        let (v,): (Variant<R0>,) =
            self.method_call("org.freedesktop.DBus.Properties", "Get", (interface, property))?;
        Ok(v.into_inner())
    }

    fn get_all(&self, interface: &str) -> Result<PropMap, Error> {
        let (props,): (PropMap,) =
            self.method_call("org.freedesktop.DBus.Properties", "GetAll", (interface,))?;
        Ok(props)
    }

    fn set<I: Arg + Append + Clone>(&self, interface: &str, property: &str, value: I) -> Result<(), Error> {
        use crate::arg::Variant;
        self.method_call("org.freedesktop.DBus.Properties", "Set", (interface, property, Variant(value)))
    }
}

/// The `PropertiesChanged` signal of `org.freedesktop.DBus.Properties`.
#[derive(Debug)]
pub struct PropertiesPropertiesChanged {
    /// Interface the changed properties belong to.
    pub interface_name: String,
    /// Properties that changed, with their new values.
    pub changed_properties: PropMap,
    /// Properties that changed but whose new value was not sent on the wire.
    pub invalidated_properties: Vec<String>,
}

impl crate::arg::AppendAll for PropertiesPropertiesChanged {
    fn append(&self, i: &mut crate::arg::IterAppend) {
        i.append(self.interface_name.clone());
        i.append(self.changed_properties.clone());
        i.append(self.invalidated_properties.clone());
    }
}

impl crate::arg::ReadAll for PropertiesPropertiesChanged {
    fn read(i: &mut crate::arg::Iter) -> Result<Self, crate::arg::TypeMismatchError> {
        Ok(PropertiesPropertiesChanged {
            interface_name: i.read()?,
            changed_properties: i.read()?,
            invalidated_properties: i.read()?,
        })
    }
}

impl SignalArgs for PropertiesPropertiesChanged {
    const NAME: &'static str = "PropertiesChanged";
    const INTERFACE: &'static str = "org.freedesktop.DBus.Properties";
}

/// Method of `org.freedesktop.DBus.ObjectManager`.
pub trait ObjectManager {
    /// Returns every object the remote service manages, each with its
    /// interfaces and their properties.
    #[allow(clippy::type_complexity)]
    fn get_managed_objects(&self) -> Result<HashMap<Path<'static>, HashMap<String, PropMap>>, Error>;
}

impl<'a, T: BlockingSender, C: Deref<Target = T>> ObjectManager for Proxy<'a, C> {
    fn get_managed_objects(&self) -> Result<HashMap<Path<'static>, HashMap<String, PropMap>>, Error> {
        let (objects,): (HashMap<Path<'static>, HashMap<String, PropMap>>,) =
            self.method_call("org.freedesktop.DBus.ObjectManager", "GetManagedObjects", ())?;
        Ok(objects)
    }
}

/// The `InterfacesAdded` signal of `org.freedesktop.DBus.ObjectManager`.
#[derive(Debug)]
pub struct ObjectManagerInterfacesAdded {
    /// Object path that gained interfaces.
    pub object: Path<'static>,
    /// The added interfaces and their properties.
    pub interfaces: HashMap<String, PropMap>,
}

impl crate::arg::AppendAll for ObjectManagerInterfacesAdded {
    fn append(&self, i: &mut crate::arg::IterAppend) {
        i.append(self.object.clone());
        i.append(self.interfaces.clone());
    }
}

impl crate::arg::ReadAll for ObjectManagerInterfacesAdded {
    fn read(i: &mut crate::arg::Iter) -> Result<Self, crate::arg::TypeMismatchError> {
        Ok(ObjectManagerInterfacesAdded { object: i.read()?, interfaces: i.read()? })
    }
}

impl SignalArgs for ObjectManagerInterfacesAdded {
    const NAME: &'static str = "InterfacesAdded";
    const INTERFACE: &'static str = "org.freedesktop.DBus.ObjectManager";
}

/// The `InterfacesRemoved` signal of `org.freedesktop.DBus.ObjectManager`.
#[derive(Debug)]
pub struct ObjectManagerInterfacesRemoved {
    /// Object path that lost interfaces.
    pub object: Path<'static>,
    /// Names of the removed interfaces.
    pub interfaces: Vec<String>,
}

impl crate::arg::AppendAll for ObjectManagerInterfacesRemoved {
    fn append(&self, i: &mut crate::arg::IterAppend) {
        i.append(self.object.clone());
        i.append(self.interfaces.clone());
    }
}

impl crate::arg::ReadAll for ObjectManagerInterfacesRemoved {
    fn read(i: &mut crate::arg::Iter) -> Result<Self, crate::arg::TypeMismatchError> {
        Ok(ObjectManagerInterfacesRemoved { object: i.read()?, interfaces: i.read()? })
    }
}

impl SignalArgs for ObjectManagerInterfacesRemoved {
    const NAME: &'static str = "InterfacesRemoved";
    const INTERFACE: &'static str = "org.freedesktop.DBus.ObjectManager";
}
