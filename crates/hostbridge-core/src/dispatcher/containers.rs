//! Auxiliary capabilities over mutable containers returned by handle.

use super::{member_id, Capability};
use crate::binding::{argument_map, lookup};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::handles::HandleRef;
use crate::session::Session;
use crate::value::{HostDict, HostList, HostObject, HostValue};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

/// Validate a wire index against `list`.
pub(crate) fn list_index(list: &HostList, index: &Value) -> Result<usize> {
    let raw = index
        .as_i64()
        .or_else(|| {
            index
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        })
        .ok_or_else(|| {
            BridgeError::type_mismatch(format!("List index must be an integer, got {}", index))
        })?;
    let length = list.len();
    if raw < 0 || raw as u64 >= length as u64 {
        return Err(BridgeError::OutOfRange { index: raw, length });
    }
    Ok(raw as usize)
}

/// Canonical string form of a wire dictionary key.
pub(crate) fn dict_key(key: &Value) -> Result<String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(BridgeError::type_mismatch(format!(
            "Dictionary key must be a string or scalar, got {}",
            other
        ))),
    }
}

fn container_id(container: &str, member: &str) -> String {
    member_id(BridgeConfig::CORE_PACKAGE, container, member)
}

fn required<'a>(args: &'a Map<String, Value>, name: &str) -> Result<&'a Value> {
    lookup(args, name)
        .filter(|value| !value.is_null())
        .ok_or_else(|| BridgeError::missing_argument(name))
}

fn receiver<T: HostObject>(session: &Session, args: &Map<String, Value>) -> Result<Arc<T>> {
    let param = BridgeConfig::CONTEXT_PARAM;
    let value = required(args, param)?;
    let handle = HandleRef::from_value(value).ok_or_else(|| {
        BridgeError::invalid_param(param, format!("Argument '{}' must be a handle", param))
    })?;
    session.handles().get_typed::<T>(&handle.handle_id)
}

/// Capability operating on a `T` receiver, synchronous in body.
fn container<T, F>(id: String, body: F) -> Capability
where
    T: HostObject,
    F: Fn(&T, &Map<String, Value>) -> Result<HostValue> + Send + Sync + 'static,
{
    let body = Arc::new(body);
    Capability::new(id, move |args: Value, session: Session| {
        let body = Arc::clone(&body);
        ready(move || {
            let map = argument_map(&args)?;
            let target = receiver::<T>(&session, map)?;
            body(&target, map)
        })
    })
}

fn ready<F>(body: F) -> impl Future<Output = anyhow::Result<HostValue>>
where
    F: FnOnce() -> Result<HostValue>,
{
    std::future::ready(body().map_err(anyhow::Error::new))
}

/// `hostbridge/List.*` and `hostbridge/Dict.*`.
pub(super) fn builtin_capabilities() -> Vec<Capability> {
    let list_id = |member: &str| container_id("List", member);
    let dict_id = |member: &str| container_id("Dict", member);

    vec![
        container::<HostList, _>(list_id("get"), |list, args| {
            let index = list_index(list, required(args, "index")?)?;
            Ok(list.get(index).unwrap_or(HostValue::Null))
        }),
        container::<HostList, _>(list_id("length"), |list, _| Ok(HostValue::Int(list.len() as i64))),
        container::<HostList, _>(list_id("removeAt"), |list, args| {
            let index = list_index(list, required(args, "index")?)?;
            list.remove_at(index);
            Ok(HostValue::Null)
        }),
        container::<HostList, _>(list_id("clear"), |list, _| {
            list.clear();
            Ok(HostValue::Null)
        }),
        container::<HostDict, _>(dict_id("get"), |dict, args| {
            let key = dict_key(required(args, "key")?)?;
            Ok(dict.get(&key).unwrap_or(HostValue::Null))
        }),
        container::<HostDict, _>(dict_id("remove"), |dict, args| {
            let key = dict_key(required(args, "key")?)?;
            Ok(HostValue::Bool(dict.remove(&key).is_some()))
        }),
        container::<HostDict, _>(dict_id("has"), |dict, args| {
            let key = dict_key(required(args, "key")?)?;
            Ok(HostValue::Bool(dict.contains_key(&key)))
        }),
        container::<HostDict, _>(dict_id("keys"), |dict, _| {
            Ok(HostValue::Array(dict.keys().into_iter().map(HostValue::from).collect()))
        }),
        container::<HostDict, _>(dict_id("count"), |dict, _| Ok(HostValue::Int(dict.len() as i64))),
    ]
}
