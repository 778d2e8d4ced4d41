//! Builders for assemblies and exported types.
//!
//! # Example
//!
//! ```
//! use hostbridge::catalog::{AssemblyBuilder, MethodInfo, TypeBuilder};
//! use hostbridge::types::TypeRef;
//! use hostbridge::value::{HostObject, HostValue};
//!
//! struct Greeter;
//! impl HostObject for Greeter {}
//!
//! let assembly = AssemblyBuilder::new("demo")
//!     .add_type(
//!         TypeBuilder::for_type::<Greeter>("Greeter")
//!             .expose_methods()
//!             .method(
//!                 MethodInfo::new("greet")
//!                     .param("name", TypeRef::String)
//!                     .returns(TypeRef::String)
//!                     .handler(|inv| Ok(format!("hi {}", inv.arg(0).as_str()?).into())),
//!             ),
//!     )
//!     .function(MethodInfo::new("version").returns(TypeRef::String).handler(|_| Ok("1".into())))
//!     .build();
//!
//! assert!(assembly.types.contains_key("Greeter"));
//! ```

use super::method::{MethodInfo, PropertyGetter, PropertyInfo, PropertySetter};
use super::{Assembly, TypeInfo, TypeKind};
use crate::types::TypeRef;
use crate::value::{downcast_ref, CastError, HostObject, HostValue, ObjectRef};
use std::any::TypeId;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Resolve the receiver of an instance accessor as `T`.
fn receiver<T: HostObject>(target: Option<&ObjectRef>) -> Result<&T, CastError> {
    let expected = std::any::type_name::<T>();
    let object = target.ok_or_else(|| CastError::new(expected, "no receiver"))?;
    downcast_ref::<T>(object.as_ref()).ok_or_else(|| CastError::new(expected, "object of another type"))
}

/// Builder for a [`TypeInfo`].
pub struct TypeBuilder {
    name: String,
    type_id: Option<TypeId>,
    kind: TypeKind,
    generic_params: Vec<String>,
    base: Option<TypeRef>,
    interfaces: Vec<TypeRef>,
    constructors: Vec<MethodInfo>,
    methods: Vec<MethodInfo>,
    properties: Vec<PropertyInfo>,
    static_properties: Vec<PropertyInfo>,
    static_methods: Vec<MethodInfo>,
    enum_members: Vec<String>,
    expose_properties: bool,
    expose_methods: bool,
}

impl TypeBuilder {
    fn with_kind(name: impl Into<String>, kind: TypeKind, type_id: Option<TypeId>) -> Self {
        Self {
            name: name.into(),
            type_id,
            kind,
            generic_params: Vec::new(),
            base: None,
            interfaces: Vec::new(),
            constructors: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            static_properties: Vec::new(),
            static_methods: Vec::new(),
            enum_members: Vec::new(),
            expose_properties: false,
            expose_methods: false,
        }
    }

    /// A class backed by the Rust type `T`.
    pub fn for_type<T: HostObject>(name: impl Into<String>) -> Self {
        Self::with_kind(name, TypeKind::Class, Some(TypeId::of::<T>()))
    }

    /// A class with no Rust type of its own (static members only).
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_kind(name, TypeKind::Class, None)
    }

    /// An interface. Interfaces are never instantiated directly.
    pub fn interface(name: impl Into<String>) -> Self {
        Self::with_kind(name, TypeKind::Interface, None)
    }

    /// An enum with the given members.
    pub fn enumeration(name: impl Into<String>, members: &[&str]) -> Self {
        let mut builder = Self::with_kind(name, TypeKind::Enum, None);
        builder.enum_members = members.iter().map(|m| m.to_string()).collect();
        builder
    }

    pub fn generic(mut self, param: impl Into<String>) -> Self {
        self.generic_params.push(param.into());
        self
    }

    pub fn extends(mut self, base: TypeRef) -> Self {
        self.base = Some(base);
        self
    }

    pub fn implements(mut self, interface: TypeRef) -> Self {
        self.interfaces.push(interface);
        self
    }

    pub fn constructor(mut self, ctor: MethodInfo) -> Self {
        self.constructors.push(ctor);
        self
    }

    pub fn method(mut self, method: MethodInfo) -> Self {
        self.methods.push(method);
        self
    }

    pub fn static_method(mut self, method: MethodInfo) -> Self {
        self.static_methods.push(method);
        self
    }

    pub fn property(mut self, property: PropertyInfo) -> Self {
        self.properties.push(property);
        self
    }

    /// Read-only instance property of `T`.
    pub fn getter<T, G>(self, name: impl Into<String>, ty: TypeRef, get: G) -> Self
    where
        T: HostObject,
        G: Fn(&T) -> anyhow::Result<HostValue> + Send + Sync + 'static,
    {
        let getter: PropertyGetter =
            Arc::new(move |target: Option<&ObjectRef>| get(receiver::<T>(target)?));
        self.property(PropertyInfo {
            name: name.into(),
            ty,
            getter,
            setter: None,
        })
    }

    /// Read-write instance property of `T`.
    pub fn accessor<T, G, S>(self, name: impl Into<String>, ty: TypeRef, get: G, set: S) -> Self
    where
        T: HostObject,
        G: Fn(&T) -> anyhow::Result<HostValue> + Send + Sync + 'static,
        S: Fn(&T, HostValue) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let getter: PropertyGetter =
            Arc::new(move |target: Option<&ObjectRef>| get(receiver::<T>(target)?));
        let setter: PropertySetter =
            Arc::new(move |target: Option<&ObjectRef>, value: HostValue| {
                set(receiver::<T>(target)?, value)
            });
        self.property(PropertyInfo {
            name: name.into(),
            ty,
            getter,
            setter: Some(setter),
        })
    }

    /// Static property. `set` is `None` for read-only properties.
    pub fn static_property<G>(
        mut self,
        name: impl Into<String>,
        ty: TypeRef,
        get: G,
        set: Option<PropertySetter>,
    ) -> Self
    where
        G: Fn() -> anyhow::Result<HostValue> + Send + Sync + 'static,
    {
        let getter: PropertyGetter = Arc::new(move |_: Option<&ObjectRef>| get());
        self.static_properties.push(PropertyInfo {
            name: name.into(),
            ty,
            getter,
            setter: set,
        });
        self
    }

    pub fn expose_properties(mut self) -> Self {
        self.expose_properties = true;
        self
    }

    pub fn expose_methods(mut self) -> Self {
        self.expose_methods = true;
        self
    }

    pub(crate) fn build(self, assembly: &str) -> TypeInfo {
        let wrap = |methods: Vec<MethodInfo>| methods.into_iter().map(Arc::new).collect();
        TypeInfo {
            tag: format!("{}/{}", assembly, self.name),
            name: self.name,
            assembly: assembly.to_string(),
            type_id: self.type_id,
            kind: self.kind,
            generic_params: self.generic_params,
            base: self.base,
            interfaces: self.interfaces,
            constructors: wrap(self.constructors),
            methods: wrap(self.methods),
            properties: self.properties,
            static_properties: self.static_properties,
            static_methods: wrap(self.static_methods),
            enum_members: self.enum_members,
            expose_properties: self.expose_properties,
            expose_methods: self.expose_methods,
        }
    }
}

/// Builder for an [`Assembly`].
pub struct AssemblyBuilder {
    name: String,
    types: BTreeMap<String, Arc<TypeInfo>>,
    functions: Vec<Arc<MethodInfo>>,
}

impl AssemblyBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: BTreeMap::new(),
            functions: Vec::new(),
        }
    }

    pub fn add_type(mut self, builder: TypeBuilder) -> Self {
        let info = builder.build(&self.name);
        self.types.insert(info.name.clone(), Arc::new(info));
        self
    }

    /// Export a free function as capability `"{assembly}/{name}"`.
    pub fn function(mut self, function: MethodInfo) -> Self {
        self.functions.push(Arc::new(function));
        self
    }

    pub fn build(self) -> Assembly {
        Assembly {
            name: self.name,
            types: self.types,
            functions: self.functions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Cell {
        value: Mutex<i64>,
    }
    impl HostObject for Cell {}

    #[test]
    fn test_typed_accessor() {
        let info = TypeBuilder::for_type::<Cell>("Cell")
            .accessor::<Cell, _, _>(
                "value",
                TypeRef::Int,
                |cell| Ok(HostValue::Int(*cell.value.lock().unwrap())),
                |cell, value| {
                    *cell.value.lock().unwrap() = value.as_i64()?;
                    Ok(())
                },
            )
            .build("demo");
        assert_eq!(info.tag, "demo/Cell");

        let property = &info.properties[0];
        assert!(!property.is_read_only());
        let obj: ObjectRef = Arc::new(Cell {
            value: Mutex::new(1),
        });
        (property.setter.as_ref().unwrap())(Some(&obj), HostValue::Int(9)).unwrap();
        assert_eq!((property.getter)(Some(&obj)).unwrap(), HostValue::Int(9));
    }

    #[test]
    fn test_accessor_rejects_wrong_receiver() {
        struct Other;
        impl HostObject for Other {}

        let info = TypeBuilder::for_type::<Cell>("Cell")
            .getter::<Cell, _>("value", TypeRef::Int, |_| Ok(HostValue::Int(0)))
            .build("demo");
        let other: ObjectRef = Arc::new(Other);
        let err = (info.properties[0].getter)(Some(&other)).unwrap_err();
        assert!(err.downcast_ref::<CastError>().is_some());
    }

    #[test]
    fn test_enumeration() {
        let info = TypeBuilder::enumeration("Color", &["Red", "Green"]).build("demo");
        assert_eq!(info.kind, TypeKind::Enum);
        assert_eq!(info.enum_member("green"), Some("Green"));
        assert_eq!(info.enum_member("blue"), None);
    }
}
