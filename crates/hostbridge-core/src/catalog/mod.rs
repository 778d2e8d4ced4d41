//! Explicit registration table of exported host types and functions.
//!
//! The catalog is built once at process start (see [`AssemblyBuilder`] and
//! [`TypeBuilder`]) and is read-only afterwards. It answers the questions the
//! dispatcher would otherwise ask of runtime reflection: which types exist,
//! what members they declare, and which catalog type a live object belongs to.

mod builder;
mod method;

pub use builder::{AssemblyBuilder, TypeBuilder};
pub use method::{
    AsyncBody, Invocation, MethodBody, MethodInfo, ParamInfo, PropertyGetter, PropertyInfo,
    PropertySetter, SyncBody,
};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::expr::ReferenceExpression;
use crate::types::TypeRef;
use crate::value::{AsAny, HostDict, HostList, HostObject, HostValue, ObjectRef};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Kind of an exported type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
}

/// An exported host type and its members.
#[derive(Debug)]
pub struct TypeInfo {
    pub name: String,
    pub assembly: String,
    /// `"{assembly}/{name}"`.
    pub tag: String,
    pub type_id: Option<TypeId>,
    pub kind: TypeKind,
    pub generic_params: Vec<String>,
    pub base: Option<TypeRef>,
    pub interfaces: Vec<TypeRef>,
    pub constructors: Vec<Arc<MethodInfo>>,
    pub methods: Vec<Arc<MethodInfo>>,
    pub properties: Vec<PropertyInfo>,
    pub static_properties: Vec<PropertyInfo>,
    pub static_methods: Vec<Arc<MethodInfo>>,
    pub enum_members: Vec<String>,
    /// Export each eligible property as getter/setter capabilities.
    pub expose_properties: bool,
    /// Export each public method as a context-bound capability.
    pub expose_methods: bool,
}

impl TypeInfo {
    pub fn is_generic_definition(&self) -> bool {
        !self.generic_params.is_empty()
    }

    /// Direct supertypes: base type first, then interfaces.
    pub fn supertypes(&self) -> impl Iterator<Item = &TypeRef> {
        self.base.iter().chain(self.interfaces.iter())
    }

    /// Canonical spelling of an enum member, matched case-insensitively.
    pub fn enum_member(&self, name: &str) -> Option<&str> {
        self.enum_members
            .iter()
            .find(|member| member.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }
}

/// A named group of exported types and free functions.
#[derive(Debug)]
pub struct Assembly {
    pub name: String,
    pub types: BTreeMap<String, Arc<TypeInfo>>,
    pub functions: Vec<Arc<MethodInfo>>,
}

/// The complete set of exported assemblies.
#[derive(Debug, Default)]
pub struct TypeCatalog {
    assemblies: BTreeMap<String, Assembly>,
    by_tag: HashMap<String, Arc<TypeInfo>>,
    by_type_id: HashMap<TypeId, Arc<TypeInfo>>,
}

impl TypeCatalog {
    /// Index the given assemblies.
    ///
    /// Fails on duplicate assembly names and on a Rust type exported twice.
    pub fn new(assemblies: Vec<Assembly>) -> Result<Self> {
        let mut catalog = Self::default();
        for assembly in assemblies {
            if catalog.assemblies.contains_key(&assembly.name) {
                return Err(BridgeError::Config {
                    message: format!("Duplicate assembly: {}", assembly.name),
                });
            }
            for info in assembly.types.values() {
                if let Some(type_id) = info.type_id {
                    if let Some(existing) = catalog.by_type_id.insert(type_id, Arc::clone(info)) {
                        return Err(BridgeError::Config {
                            message: format!(
                                "Host type exported twice: {} and {}",
                                existing.tag, info.tag
                            ),
                        });
                    }
                }
                catalog.by_tag.insert(info.tag.clone(), Arc::clone(info));
            }
            catalog.assemblies.insert(assembly.name.clone(), assembly);
        }
        Ok(catalog)
    }

    pub fn assembly(&self, name: &str) -> Option<&Assembly> {
        self.assemblies.get(name)
    }

    pub fn assemblies(&self) -> impl Iterator<Item = &Assembly> {
        self.assemblies.values()
    }

    /// Every exported type, in assembly then name order.
    pub fn types(&self) -> impl Iterator<Item = &Arc<TypeInfo>> {
        self.assemblies.values().flat_map(|asm| asm.types.values())
    }

    /// Resolve a type by assembly and type name.
    pub fn find_type(&self, assembly: &str, type_name: &str) -> Result<Arc<TypeInfo>> {
        let asm = self
            .assemblies
            .get(assembly)
            .ok_or_else(|| BridgeError::not_found("Assembly", assembly))?;
        asm.types
            .get(type_name)
            .cloned()
            .ok_or_else(|| BridgeError::not_found("Type", format!("{}/{}", assembly, type_name)))
    }

    pub fn type_by_tag(&self, tag: &str) -> Option<Arc<TypeInfo>> {
        self.by_tag.get(tag).cloned()
    }

    /// Catalog entry for the concrete type of a live object.
    pub fn type_for_object(&self, object: &ObjectRef) -> Option<Arc<TypeInfo>> {
        let any: &dyn Any = <dyn HostObject as AsAny>::as_any(object.as_ref());
        self.by_type_id.get(&any.type_id()).cloned()
    }

    /// Type tag recorded when a live object is registered.
    pub fn tag_for_object(&self, object: &ObjectRef) -> String {
        let any: &dyn Any = <dyn HostObject as AsAny>::as_any(object.as_ref());
        if any.is::<HostList>() {
            return Self::builtin_tag("List");
        }
        if any.is::<HostDict>() {
            return Self::builtin_tag("Dict");
        }
        if any.is::<ReferenceExpression>() {
            return Self::builtin_tag("ReferenceExpression");
        }
        match self.by_type_id.get(&any.type_id()) {
            Some(info) => info.tag.clone(),
            None => Self::builtin_tag("Object"),
        }
    }

    /// Tag of a built-in type owned by the bridge package.
    pub fn builtin_tag(name: &str) -> String {
        format!("{}/{}", BridgeConfig::CORE_PACKAGE, name)
    }

    /// Runtime type of a value, as precise as the catalog allows.
    pub fn type_of(&self, value: &HostValue) -> TypeRef {
        match value {
            HostValue::Null => TypeRef::Any,
            HostValue::Bool(_) => TypeRef::Bool,
            HostValue::Int(_) => TypeRef::Int,
            HostValue::Float(_) => TypeRef::Float,
            HostValue::String(_) => TypeRef::String,
            HostValue::DateTime(_) => TypeRef::DateTime,
            HostValue::Duration(_) => TypeRef::Duration,
            HostValue::Uuid(_) => TypeRef::Uuid,
            HostValue::Enum(e) => TypeRef::Enum(e.type_tag.clone()),
            HostValue::Array(items) => {
                let element = items
                    .iter()
                    .find(|item| !item.is_null())
                    .map(|item| self.type_of(item))
                    .unwrap_or(TypeRef::Any);
                TypeRef::array(element)
            }
            HostValue::Object(obj) => self.type_of_object(obj),
            HostValue::Callback(cb) => TypeRef::Callback(Box::new(cb.shape().clone())),
            HostValue::Token(_) => TypeRef::CancellationToken,
            HostValue::Json(_) => TypeRef::Json,
        }
    }

    fn type_of_object(&self, object: &ObjectRef) -> TypeRef {
        if let Some(list) = crate::value::downcast_ref::<HostList>(object.as_ref()) {
            return TypeRef::list(list.element_type().clone());
        }
        if let Some(dict) = crate::value::downcast_ref::<HostDict>(object.as_ref()) {
            return TypeRef::dict(dict.value_type().clone());
        }
        let tag = self.tag_for_object(object);
        let args = object.generic_arguments();
        if args.is_empty() {
            TypeRef::Named(tag)
        } else {
            TypeRef::constructed(tag, args)
        }
    }

    /// The type and its base chain, most derived first.
    pub fn lineage(&self, info: &Arc<TypeInfo>) -> Vec<Arc<TypeInfo>> {
        let mut chain = vec![Arc::clone(info)];
        let mut current = Arc::clone(info);
        while let Some(base) = current.base.as_ref().and_then(TypeRef::tag) {
            match self.by_tag.get(base) {
                // Guard against a malformed cycle in the base chain
                Some(next) if !chain.iter().any(|seen| seen.tag == next.tag) => {
                    chain.push(Arc::clone(next));
                    current = Arc::clone(next);
                }
                _ => break,
            }
        }
        chain
    }

    /// Instance methods named `name` (case-insensitive), most derived first.
    pub fn find_methods(&self, info: &Arc<TypeInfo>, name: &str) -> Vec<Arc<MethodInfo>> {
        self.lineage(info)
            .iter()
            .flat_map(|ty| ty.methods.iter())
            .filter(|m| m.name.eq_ignore_ascii_case(name))
            .cloned()
            .collect()
    }

    /// Instance property named `name` (case-insensitive), most derived first.
    pub fn find_property(&self, info: &Arc<TypeInfo>, name: &str) -> Option<PropertyInfo> {
        self.lineage(info).iter().find_map(|ty| {
            ty.properties
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(name))
                .cloned()
        })
    }
}
