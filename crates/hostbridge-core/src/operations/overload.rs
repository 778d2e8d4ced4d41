//! Overload selection by argument names.
//!
//! A candidate is feasible when every required parameter is supplied and
//! every supplied parameter is structurally compatible with its declared
//! type. Among feasible candidates the one binding the most supplied
//! arguments wins; ties prefer fewer unbound optional parameters, then
//! declaration order.

use crate::binding::lookup;
use crate::catalog::MethodInfo;
use crate::error::{BridgeError, Result};
use crate::handles::HandleRef;
use crate::marshal::ValueConverter;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Score {
    matched: usize,
    /// Negated count of optional parameters left at their default.
    defaulted: isize,
}

enum Fit {
    Feasible(Score),
    /// `supplied` counts the parameters named in the arguments.
    Infeasible { supplied: usize, error: BridgeError },
}

/// Fails outright when an argument names a handle that no longer resolves.
fn fit(converter: &ValueConverter, method: &MethodInfo, args: &Map<String, Value>) -> Result<Fit> {
    let mut matched = 0;
    let mut defaulted = 0;
    let mut error = None;
    for param in &method.params {
        let value = lookup(args, &param.name);
        if let Some(handle) = value.and_then(HandleRef::from_value) {
            if !converter.handles().contains(&handle.handle_id) {
                return Err(BridgeError::HandleNotFound {
                    handle_id: handle.handle_id,
                });
            }
        }
        match value {
            Some(value) if converter.quick_compatible(value, &param.ty) => matched += 1,
            Some(_) => {
                error.get_or_insert_with(|| {
                    BridgeError::invalid_param(
                        &param.name,
                        format!("Argument '{}' is not compatible with {}", param.name, param.ty),
                    )
                });
            }
            None if param.is_optional() => defaulted += 1,
            None => {
                error.get_or_insert_with(|| BridgeError::missing_argument(&param.name));
            }
        }
    }
    let supplied = method
        .params
        .iter()
        .filter(|param| lookup(args, &param.name).is_some())
        .count();
    Ok(match error {
        Some(error) => Fit::Infeasible { supplied, error },
        None => Fit::Feasible(Score {
            matched,
            defaulted: -defaulted,
        }),
    })
}

/// Pick the best overload of `name` among `candidates` for `args`.
///
/// With no feasible candidate, reports why the closest one failed.
pub(crate) fn select<'a>(
    converter: &ValueConverter,
    name: &str,
    candidates: &'a [Arc<MethodInfo>],
    args: &Map<String, Value>,
) -> Result<&'a Arc<MethodInfo>> {
    let mut best: Option<(Score, &'a Arc<MethodInfo>)> = None;
    let mut closest: Option<(usize, BridgeError)> = None;

    for candidate in candidates {
        match fit(converter, candidate, args)? {
            Fit::Feasible(score) => {
                if best.as_ref().map_or(true, |(top, _)| score > *top) {
                    best = Some((score, candidate));
                }
            }
            Fit::Infeasible { supplied, error } => {
                if closest.as_ref().map_or(true, |(top, _)| supplied > *top) {
                    closest = Some((supplied, error));
                }
            }
        }
    }

    match (best, closest) {
        (Some((_, method)), _) => Ok(method),
        (None, Some((_, error))) => Err(error),
        (None, None) => Err(BridgeError::not_found("Method", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use crate::types::TypeRef;
    use serde_json::json;

    fn overloads() -> Vec<Arc<MethodInfo>> {
        vec![
            Arc::new(MethodInfo::new("f").param("name", TypeRef::String)),
            Arc::new(MethodInfo::new("f").param("value", TypeRef::Int)),
            Arc::new(
                MethodInfo::new("f")
                    .param("name", TypeRef::String)
                    .param("value", TypeRef::Int),
            ),
        ]
    }

    fn chosen(args: Value) -> usize {
        let converter = testing::converter();
        let candidates = overloads();
        let map = args.as_object().cloned().unwrap_or_default();
        let method = select(&converter, "f", &candidates, &map).unwrap();
        candidates
            .iter()
            .position(|c| Arc::ptr_eq(c, method))
            .unwrap()
    }

    #[test]
    fn test_selects_by_supplied_names() {
        assert_eq!(chosen(json!({"name": "a"})), 0);
        assert_eq!(chosen(json!({"value": 1})), 1);
        assert_eq!(chosen(json!({"name": "a", "value": 1})), 2);
    }

    #[test]
    fn test_name_matching_is_case_insensitive() {
        assert_eq!(chosen(json!({"Name": "a"})), 0);
    }

    #[test]
    fn test_ties_prefer_fewer_defaulted_optionals() {
        let converter = testing::converter();
        let candidates = vec![
            Arc::new(
                MethodInfo::new("g")
                    .param("name", TypeRef::String)
                    .optional("suffix", TypeRef::String, "!"),
            ),
            Arc::new(MethodInfo::new("g").param("name", TypeRef::String)),
        ];
        let map = json!({"name": "a"}).as_object().cloned().unwrap();
        let method = select(&converter, "g", &candidates, &map).unwrap();
        assert!(Arc::ptr_eq(method, &candidates[1]));
    }

    #[test]
    fn test_incompatible_type_rejects_candidate() {
        let converter = testing::converter();
        let candidates = overloads();
        let map = json!({"value": "text"}).as_object().cloned().unwrap();
        let err = select(&converter, "f", &candidates, &map).unwrap_err();
        match err {
            BridgeError::InvalidArgument { param_name, .. } => {
                assert_eq!(param_name.as_deref(), Some("value"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_argument_is_named() {
        let converter = testing::converter();
        let candidates = vec![Arc::new(
            MethodInfo::new("h")
                .param("first", TypeRef::String)
                .param("second", TypeRef::String),
        )];
        let map = json!({"first": "a"}).as_object().cloned().unwrap();
        let err = select(&converter, "h", &candidates, &map).unwrap_err();
        assert_eq!(err.to_string(), "Missing required argument 'second'");
    }

    #[test]
    fn test_stale_handle_argument_is_not_found() {
        let converter = testing::converter();
        let candidates = overloads();
        let map = json!({"name": {"$handle": "404"}}).as_object().cloned().unwrap();
        let err = select(&converter, "f", &candidates, &map).unwrap_err();
        assert!(matches!(err, BridgeError::HandleNotFound { ref handle_id } if handle_id == "404"));
    }

    #[test]
    fn test_no_candidates_is_not_found() {
        let converter = testing::converter();
        let err = select(&converter, "zip", &[], &Map::new()).unwrap_err();
        assert!(matches!(err, BridgeError::NotFound { .. }));
    }
}
