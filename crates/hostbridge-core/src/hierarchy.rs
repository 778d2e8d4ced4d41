//! Assignability between exported types.
//!
//! Built once from the catalog: for every type, the transitive set of base
//! types and interfaces it can be used as, with generic arguments substituted
//! through the chain (`IntBox : Box<int>`, `Box<T> : IBox<T>` gives
//! `IntBox : IBox<int>`).

use crate::catalog::{TypeCatalog, TypeInfo};
use crate::types::TypeRef;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Default)]
pub struct TypeHierarchy {
    ancestors: HashMap<String, Vec<TypeRef>>,
    generic_params: HashMap<String, Vec<String>>,
}

impl TypeHierarchy {
    pub fn build(catalog: &TypeCatalog) -> Self {
        let mut hierarchy = Self::default();
        for info in catalog.types() {
            let mut found = Vec::new();
            let mut visiting = HashSet::new();
            visiting.insert(info.tag.clone());
            Self::collect(catalog, info, &HashMap::new(), &mut found, &mut visiting);
            hierarchy
                .generic_params
                .insert(info.tag.clone(), info.generic_params.clone());
            hierarchy.ancestors.insert(info.tag.clone(), found);
        }
        debug!("Type hierarchy built for {} types", hierarchy.ancestors.len());
        hierarchy
    }

    fn collect(
        catalog: &TypeCatalog,
        info: &TypeInfo,
        bindings: &HashMap<String, TypeRef>,
        found: &mut Vec<TypeRef>,
        visiting: &mut HashSet<String>,
    ) {
        for supertype in info.supertypes() {
            let resolved = supertype.substitute(bindings);
            let Some(tag) = resolved.tag().map(str::to_string) else {
                continue;
            };
            if !found.contains(&resolved) {
                found.push(resolved.clone());
            }
            if !visiting.insert(tag.clone()) {
                continue;
            }
            if let Some(parent) = catalog.type_by_tag(&tag) {
                let parent_bindings = match &resolved {
                    TypeRef::Constructed { args, .. } => parent
                        .generic_params
                        .iter()
                        .cloned()
                        .zip(args.iter().cloned())
                        .collect(),
                    _ => HashMap::new(),
                };
                Self::collect(catalog, &parent, &parent_bindings, found, visiting);
            }
            visiting.remove(&tag);
        }
    }

    /// Every supertype of `tag`, transitively.
    pub fn ancestors(&self, tag: &str) -> &[TypeRef] {
        self.ancestors.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether a value tagged `from` may be used where `to` is declared.
    pub fn is_assignable(&self, from: &str, to: &str) -> bool {
        if from == to || to == TypeCatalog::builtin_tag("Object") {
            return true;
        }
        self.ancestors(from)
            .iter()
            .any(|ancestor| ancestor.tag() == Some(to))
    }

    /// Structural form of [`is_assignable`](Self::is_assignable) for declared types.
    pub fn is_assignable_type(&self, from: &TypeRef, to: &TypeRef) -> bool {
        match to {
            TypeRef::Any | TypeRef::Json => true,
            TypeRef::List(_) => {
                matches!(from, TypeRef::List(_))
                    || from.tag() == Some(TypeCatalog::builtin_tag("List").as_str())
            }
            TypeRef::Dict(_) => {
                matches!(from, TypeRef::Dict(_))
                    || from.tag() == Some(TypeCatalog::builtin_tag("Dict").as_str())
            }
            TypeRef::Named(target) | TypeRef::Constructed { definition: target, .. } => {
                match from {
                    TypeRef::List(_) => self.is_assignable(&TypeCatalog::builtin_tag("List"), target),
                    TypeRef::Dict(_) => self.is_assignable(&TypeCatalog::builtin_tag("Dict"), target),
                    other => other.tag().is_some_and(|tag| self.is_assignable(tag, target)),
                }
            }
            TypeRef::Union(options) => options.iter().any(|opt| self.is_assignable_type(from, opt)),
            other => from == other,
        }
    }

    /// Type arguments of `definition` as implemented by `actual`.
    ///
    /// `actual` may be a direct construction of `definition` or any type
    /// that derives from or implements one.
    pub fn find_construction(&self, actual: &TypeRef, definition: &str) -> Option<Vec<TypeRef>> {
        match actual {
            TypeRef::Constructed { definition: d, args } if d == definition => {
                return Some(args.clone())
            }
            TypeRef::List(element) if definition == TypeCatalog::builtin_tag("List") => {
                return Some(vec![element.as_ref().clone()])
            }
            TypeRef::Dict(value) if definition == TypeCatalog::builtin_tag("Dict") => {
                return Some(vec![value.as_ref().clone()])
            }
            _ => {}
        }

        let tag = actual.tag()?;
        let bindings: HashMap<String, TypeRef> = match actual {
            TypeRef::Constructed { args, .. } => self
                .generic_params
                .get(tag)
                .map(|params| params.iter().cloned().zip(args.iter().cloned()).collect())
                .unwrap_or_default(),
            _ => HashMap::new(),
        };
        self.ancestors(tag).iter().find_map(|ancestor| match ancestor {
            TypeRef::Constructed { definition: d, args } if d == definition => {
                Some(args.iter().map(|arg| arg.substitute(&bindings)).collect())
            }
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_direct_and_transitive_assignability() {
        let catalog = testing::catalog();
        let hierarchy = TypeHierarchy::build(&catalog);

        assert!(hierarchy.is_assignable("demo/Counter", "demo/Counter"));
        assert!(hierarchy.is_assignable("demo/LabeledCounter", "demo/Counter"));
        assert!(hierarchy.is_assignable("demo/LabeledCounter", "demo/ICounter"));
        assert!(!hierarchy.is_assignable("demo/Counter", "demo/LabeledCounter"));
        assert!(hierarchy.is_assignable("demo/Counter", "hostbridge/Object"));
    }

    #[test]
    fn test_find_construction_through_base_chain() {
        let catalog = testing::catalog();
        let hierarchy = TypeHierarchy::build(&catalog);

        let direct = TypeRef::constructed("demo/Wrapper", vec![TypeRef::Int]);
        assert_eq!(
            hierarchy.find_construction(&direct, "demo/Wrapper"),
            Some(vec![TypeRef::Int])
        );

        // Wrapper<T> implements IWrapper<T>
        assert_eq!(
            hierarchy.find_construction(&direct, "demo/IWrapper"),
            Some(vec![TypeRef::Int])
        );

        // IntWrapper : Wrapper<int>
        let derived = TypeRef::named("demo/IntWrapper");
        assert_eq!(
            hierarchy.find_construction(&derived, "demo/IWrapper"),
            Some(vec![TypeRef::Int])
        );

        assert_eq!(hierarchy.find_construction(&TypeRef::String, "demo/Wrapper"), None);
    }

    #[test]
    fn test_assignable_type_for_containers() {
        let catalog = testing::catalog();
        let hierarchy = TypeHierarchy::build(&catalog);

        let list = TypeRef::list(TypeRef::Int);
        assert!(hierarchy.is_assignable_type(&list, &TypeRef::list(TypeRef::Any)));
        assert!(!hierarchy.is_assignable_type(&list, &TypeRef::dict(TypeRef::Any)));
        assert!(hierarchy.is_assignable_type(&TypeRef::named("demo/Counter"), &TypeRef::Any));
    }
}
