//! Binding named wire arguments to declared parameters, and running the
//! bound method.

use crate::catalog::MethodInfo;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::generics::GenericResolver;
use crate::handles::HandleRef;
use crate::session::Session;
use crate::value::{HostValue, ObjectRef};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

static EMPTY: std::sync::OnceLock<Map<String, Value>> = std::sync::OnceLock::new();

/// View the argument bag as a map. `null` means "no arguments".
pub(crate) fn argument_map(args: &Value) -> Result<&Map<String, Value>> {
    match args {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(EMPTY.get_or_init(Map::new)),
        other => Err(BridgeError::invalid_argument(format!(
            "Arguments must be an object, got {}",
            other
        ))),
    }
}

/// Argument named `name`: exact key first, then case-insensitive.
pub(crate) fn lookup<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    args.get(name).or_else(|| {
        args.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

/// Resolve the mandatory `context` argument to the receiver.
pub(crate) fn bind_receiver(session: &Session, args: &Map<String, Value>) -> Result<ObjectRef> {
    let param = BridgeConfig::CONTEXT_PARAM;
    let value = args
        .get(param)
        .filter(|value| !value.is_null())
        .ok_or_else(|| BridgeError::missing_argument(param))?;
    let handle = HandleRef::from_value(value).ok_or_else(|| {
        BridgeError::invalid_param(param, format!("Argument '{}' must be a handle", param))
    })?;
    session.handles().get(&handle.handle_id)
}

/// Positional arguments for `method`, defaults applied.
///
/// A key that is present binds even when its value is `null`. Missing
/// required parameters fail naming the parameter.
pub(crate) fn bind_arguments(
    session: &Session,
    method: &MethodInfo,
    args: &Map<String, Value>,
) -> Result<Vec<HostValue>> {
    method
        .params
        .iter()
        .map(|param| match lookup(args, &param.name) {
            Some(value) => session.unmarshal(value, &param.ty, &param.name),
            None => param
                .default
                .clone()
                .ok_or_else(|| BridgeError::missing_argument(&param.name)),
        })
        .collect()
}

/// Bind and run `method`, classifying host failures and panics.
pub(crate) async fn call(
    session: &Session,
    method: &Arc<MethodInfo>,
    target: Option<ObjectRef>,
    args: &Map<String, Value>,
) -> Result<HostValue> {
    let positional = bind_arguments(session, method, args)?;
    let bound = GenericResolver::new(session.catalog(), session.hierarchy()).bind(method, &positional);
    run_guarded(bound.invoke(target, positional)).await
}

/// Await a host body, mapping its error and any panic onto `BridgeError`.
pub(crate) async fn run_guarded<F>(body: F) -> Result<HostValue>
where
    F: std::future::Future<Output = anyhow::Result<HostValue>>,
{
    match AssertUnwindSafe(body).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(BridgeError::from_host(e)),
        Err(panic) => Err(BridgeError::internal(format!(
            "host code panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use serde_json::json;

    fn greet(catalog: &crate::catalog::TypeCatalog) -> Arc<MethodInfo> {
        catalog
            .assembly("demo")
            .unwrap()
            .functions
            .iter()
            .find(|f| f.name == "greet")
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_missing_required_argument_names_parameter() {
        let session = testing::session();
        let method = greet(session.catalog());
        let err = bind_arguments(&session, &method, &Map::new()).unwrap_err();
        match err {
            BridgeError::InvalidArgument { param_name, .. } => {
                assert_eq!(param_name.as_deref(), Some("name"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_optional_defaults_and_overrides() {
        let session = testing::session();
        let method = greet(session.catalog());

        let raw = json!({"name": "Ada"});
        let args = argument_map(&raw).unwrap();
        let bound = bind_arguments(&session, &method, args).unwrap();
        assert_eq!(bound[1], HostValue::from("Hello"));

        let raw = json!({"name": "Ada", "greeting": "Hi"});
        let args = argument_map(&raw).unwrap();
        let bound = bind_arguments(&session, &method, args).unwrap();
        assert_eq!(bound[1], HostValue::from("Hi"));
    }

    #[test]
    fn test_receiver_binding_errors() {
        let session = testing::session();
        let Err(err) = bind_receiver(&session, &Map::new()) else {
            panic!("missing context should fail");
        };
        assert!(matches!(err, BridgeError::InvalidArgument { .. }));

        let raw = json!({"context": 5});
        let args = argument_map(&raw).unwrap();
        let Err(err) = bind_receiver(&session, args) else {
            panic!("non-handle context should fail");
        };
        assert!(matches!(err, BridgeError::InvalidArgument { .. }));

        let raw = json!({"context": {"$handle": "77"}});
        let args = argument_map(&raw).unwrap();
        let Err(err) = bind_receiver(&session, args) else {
            panic!("unknown handle should fail");
        };
        assert!(matches!(err, BridgeError::HandleNotFound { .. }));
    }

    #[test]
    fn test_non_object_arguments_rejected() {
        assert!(argument_map(&json!([1])).is_err());
        assert!(argument_map(&Value::Null).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_panics_become_internal_errors() {
        async fn explode() -> anyhow::Result<HostValue> {
            panic!("kaboom")
        }

        let result = run_guarded(explode()).await;
        match result {
            Err(BridgeError::Internal { message, .. }) => assert!(message.contains("kaboom")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
