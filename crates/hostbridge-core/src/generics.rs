//! Binding open generic methods from runtime arguments.

use crate::catalog::{Invocation, MethodInfo, TypeCatalog};
use crate::hierarchy::TypeHierarchy;
use crate::types::TypeRef;
use crate::value::{HostValue, ObjectRef};
use std::collections::HashMap;
use std::sync::Arc;

/// A method with every type parameter bound.
#[derive(Debug, Clone)]
pub struct BoundMethod {
    pub method: Arc<MethodInfo>,
    /// Bindings in declaration order of the method's type parameters.
    pub type_args: Vec<TypeRef>,
    bindings: HashMap<String, TypeRef>,
}

impl BoundMethod {
    /// A non-generic method, bound trivially.
    pub fn closed(method: Arc<MethodInfo>) -> Self {
        Self {
            method,
            type_args: Vec::new(),
            bindings: HashMap::new(),
        }
    }

    pub fn parameter_types(&self) -> Vec<TypeRef> {
        self.method
            .params
            .iter()
            .map(|p| p.ty.substitute(&self.bindings))
            .collect()
    }

    pub fn return_type(&self) -> TypeRef {
        self.method.returns.substitute(&self.bindings)
    }

    /// Invoke with the original runtime arguments.
    pub async fn invoke(
        &self,
        target: Option<ObjectRef>,
        args: Vec<HostValue>,
    ) -> anyhow::Result<HostValue> {
        let invocation = Invocation {
            target,
            args,
            type_args: self.type_args.clone(),
        };
        self.method.call(invocation).await
    }
}

/// Infers type parameters of generic methods.
pub struct GenericResolver<'a> {
    catalog: &'a TypeCatalog,
    hierarchy: &'a TypeHierarchy,
}

impl<'a> GenericResolver<'a> {
    pub fn new(catalog: &'a TypeCatalog, hierarchy: &'a TypeHierarchy) -> Self {
        Self { catalog, hierarchy }
    }

    /// Bind `method` against `args` (positional, aligned with its parameters).
    ///
    /// Each type parameter is taken, in order of preference, from an argument
    /// declared directly as that parameter, from the matching slot of an
    /// argument declared as a generic construction, or else bound to `Any`.
    pub fn bind(&self, method: &Arc<MethodInfo>, args: &[HostValue]) -> BoundMethod {
        if !method.is_generic() {
            return BoundMethod::closed(Arc::clone(method));
        }

        let actual: Vec<TypeRef> = args.iter().map(|arg| self.catalog.type_of(arg)).collect();
        let mut bindings = HashMap::new();
        for param in &method.generic_params {
            let bound = self
                .infer_direct(method, &actual, param)
                .or_else(|| self.infer_structural(method, &actual, param))
                .unwrap_or(TypeRef::Any);
            bindings.insert(param.clone(), bound);
        }

        let type_args = method
            .generic_params
            .iter()
            .map(|p| bindings.get(p).cloned().unwrap_or(TypeRef::Any))
            .collect();
        BoundMethod {
            method: Arc::clone(method),
            type_args,
            bindings,
        }
    }

    fn infer_direct(&self, method: &MethodInfo, actual: &[TypeRef], param: &str) -> Option<TypeRef> {
        method
            .params
            .iter()
            .zip(actual)
            .find_map(|(declared, actual)| match &declared.ty {
                TypeRef::Generic(name) if name == param && *actual != TypeRef::Any => {
                    Some(actual.clone())
                }
                _ => None,
            })
    }

    fn infer_structural(
        &self,
        method: &MethodInfo,
        actual: &[TypeRef],
        param: &str,
    ) -> Option<TypeRef> {
        method
            .params
            .iter()
            .zip(actual)
            .find_map(|(declared, actual)| self.infer_from(&declared.ty, actual, param))
    }

    fn infer_from(&self, declared: &TypeRef, actual: &TypeRef, param: &str) -> Option<TypeRef> {
        match (declared, actual) {
            (_, TypeRef::Any) => None,
            (TypeRef::Generic(name), _) if name == param => Some(actual.clone()),
            (TypeRef::Array(d), TypeRef::Array(a))
            | (TypeRef::List(d), TypeRef::List(a))
            | (TypeRef::Dict(d), TypeRef::Dict(a)) => self.infer_from(d, a, param),
            (TypeRef::Array(d), TypeRef::List(a)) => self.infer_from(d, a, param),
            (TypeRef::Constructed { definition, args }, _) => {
                let slots = self.hierarchy.find_construction(actual, definition)?;
                args.iter()
                    .zip(slots.iter())
                    .find_map(|(d, a)| self.infer_from(d, a, param))
            }
            _ => None,
        }
    }
}
