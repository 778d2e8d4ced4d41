//! Capability registry and invocation engine.
//!
//! Capabilities are named, invocable units: free functions
//! (`{package}/{verb}`), property accessors (`{package}/{Type}.{property}`,
//! `{package}/{Type}.set{Property}`) and context-bound instance methods
//! (`{package}/{Type}.{method}`). The dispatcher is populated by scanning
//! the catalog at construction and by explicit registration.

mod containers;
mod scan;

pub(crate) use containers::{dict_key, list_index};

use crate::binding;
use crate::catalog::{MethodInfo, PropertyInfo, TypeCatalog};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::session::Session;
use crate::value::HostValue;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Handler of a capability: the raw argument bag and the calling session.
pub type CapabilityHandler =
    Arc<dyn Fn(Value, Session) -> BoxFuture<'static, anyhow::Result<HostValue>> + Send + Sync>;

/// A named, invocable unit exposed to the driver.
#[derive(Clone)]
pub struct Capability {
    pub id: String,
    handler: CapabilityHandler,
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability").field("id", &self.id).finish()
    }
}

impl Capability {
    /// A capability with a hand-written handler.
    pub fn new<F, Fut>(id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HostValue>> + Send + 'static,
    {
        Self {
            id: id.into(),
            handler: Arc::new(move |args, session| handler(args, session).boxed()),
        }
    }

    /// A capability that binds named arguments to `method`.
    ///
    /// With `bind_context`, the receiver comes from the `context` handle.
    pub fn from_method(id: impl Into<String>, method: Arc<MethodInfo>, bind_context: bool) -> Self {
        Self::new(id, move |args: Value, session: Session| {
            let method = Arc::clone(&method);
            async move {
                let map = binding::argument_map(&args)?;
                let target = if bind_context {
                    Some(binding::bind_receiver(&session, map)?)
                } else {
                    None
                };
                Ok(binding::call(&session, &method, target, map).await?)
            }
        })
    }

    /// Getter capability for an instance property.
    pub fn property_getter(id: impl Into<String>, property: PropertyInfo) -> Self {
        let property = Arc::new(property);
        Self::new(id, move |args: Value, session: Session| {
            let property = Arc::clone(&property);
            async move {
                let map = binding::argument_map(&args)?;
                let target = binding::bind_receiver(&session, map)?;
                (property.getter)(Some(&target))
            }
        })
    }

    /// Setter capability for an instance property, taking `value`.
    pub fn property_setter(id: impl Into<String>, property: PropertyInfo) -> Self {
        let property = Arc::new(property);
        Self::new(id, move |args: Value, session: Session| {
            let property = Arc::clone(&property);
            async move {
                let map = binding::argument_map(&args)?;
                let target = binding::bind_receiver(&session, map)?;
                let setter = property.setter.as_ref().ok_or_else(|| BridgeError::ReadOnlyProperty {
                    type_name: session.catalog().tag_for_object(&target),
                    property: property.name.clone(),
                })?;
                let raw = binding::lookup(map, "value")
                    .ok_or_else(|| BridgeError::missing_argument("value"))?;
                let value = session.unmarshal(raw, &property.ty, "value")?;
                setter(Some(&target), value)?;
                Ok(HostValue::Null)
            }
        })
    }

    /// Run the handler. Failures are not yet classified.
    pub fn call(&self, args: Value, session: Session) -> BoxFuture<'static, anyhow::Result<HostValue>> {
        (self.handler)(args, session)
    }
}

/// Lower-case the first character (`Name` -> `name`).
pub(crate) fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Upper-case the first character (`name` -> `Name`).
pub(crate) fn upper_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Registry of capabilities keyed by id.
pub struct CapabilityDispatcher {
    capabilities: RwLock<HashMap<String, Capability>>,
}

impl std::fmt::Debug for CapabilityDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityDispatcher")
            .field("capabilities", &self.len())
            .finish()
    }
}

impl CapabilityDispatcher {
    /// A dispatcher holding the built-in container capabilities and every
    /// capability exported by `catalog`.
    pub fn new(catalog: &TypeCatalog) -> Self {
        let dispatcher = Self::empty();
        for capability in containers::builtin_capabilities() {
            dispatcher.register(capability);
        }
        for capability in scan::scan_catalog(catalog) {
            dispatcher.register(capability);
        }
        debug!("Capability dispatcher ready with {} capabilities", dispatcher.len());
        dispatcher
    }

    pub fn empty() -> Self {
        Self {
            capabilities: RwLock::new(HashMap::new()),
        }
    }

    /// Register a capability. A later registration under the same id
    /// replaces the earlier one.
    pub fn register(&self, capability: Capability) {
        let mut capabilities = self
            .capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = capabilities.insert(capability.id.clone(), capability) {
            warn!("Capability {} registered twice; the later registration wins", previous.id);
        }
    }

    pub fn get(&self, id: &str) -> Option<Capability> {
        self.capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Every registered id, sorted.
    pub fn capability_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke a capability and return its marshalled result.
    ///
    /// Returns only once the handler, synchronous or asynchronous, has
    /// completed or failed.
    pub async fn invoke(&self, id: &str, args: Value, session: &Session) -> Result<Value> {
        let capability = self.get(id).ok_or_else(|| BridgeError::CapabilityNotFound {
            capability_id: id.to_string(),
        })?;
        debug!("Invoking capability {}", id);

        let value = binding::run_guarded(capability.call(args, session.clone()))
            .await
            .map_err(|e| e.with_capability(id))?;
        session.marshal(&value).map_err(|e| e.with_capability(id))
    }
}

/// Capability id of a free function.
pub(crate) fn function_id(assembly: &str, name: &str) -> String {
    format!("{}/{}", assembly, name)
}

/// Capability id of a member of `type_name`.
pub(crate) fn member_id(assembly: &str, type_name: &str, member: &str) -> String {
    format!("{}/{}.{}", assembly, type_name, member)
}

/// Whether `name` is one of the object-level methods never exported.
pub(crate) fn is_excluded_method(name: &str) -> bool {
    BridgeConfig::EXCLUDED_METHODS
        .iter()
        .any(|excluded| excluded.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::testing;
    use serde_json::json;

    fn dispatcher() -> CapabilityDispatcher {
        CapabilityDispatcher::new(&testing::catalog())
    }

    #[tokio::test]
    async fn test_unknown_capability() {
        let session = testing::session();
        for _ in 0..2 {
            let err = dispatcher()
                .invoke("demo/nothing", json!({}), &session)
                .await
                .unwrap_err();
            assert_eq!(err.error_code(), ErrorCode::CapabilityNotFound);
        }
    }

    #[tokio::test]
    async fn test_invoke_free_function() {
        let session = testing::session();
        let out = dispatcher()
            .invoke("demo/greet", json!({"name": "Ada"}), &session)
            .await
            .unwrap();
        assert_eq!(out, json!("Hello, Ada"));
    }

    #[tokio::test]
    async fn test_async_function_is_awaited() {
        let session = testing::session();
        let out = dispatcher()
            .invoke("demo/delayedSum", json!({"a": 2, "b": 3}), &session)
            .await
            .unwrap();
        assert_eq!(out, json!(5));
    }

    #[tokio::test]
    async fn test_missing_argument_carries_capability_and_param() {
        let session = testing::session();
        let err = dispatcher()
            .invoke("demo/greet", json!({}), &session)
            .await
            .unwrap_err();
        let envelope = err.to_envelope();
        assert_eq!(envelope.code, ErrorCode::InvalidArgument);
        assert_eq!(envelope.capability_id.as_deref(), Some("demo/greet"));
        assert_eq!(envelope.param_name.as_deref(), Some("name"));
    }

    #[tokio::test]
    async fn test_error_classification() {
        let session = testing::session();
        let dispatcher = dispatcher();

        let err = dispatcher
            .invoke("demo/badCast", json!({}), &session)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::TypeMismatch);

        let err = dispatcher
            .invoke("demo/fail", json!({}), &session)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::InternalError);
        assert!(err.to_string().contains("deliberate failure"));

        let err = dispatcher
            .invoke("demo/outOfRange", json!({}), &session)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::OutOfRange);
    }

    #[tokio::test]
    async fn test_context_bound_method_and_properties() {
        let session = testing::session();
        let dispatcher = dispatcher();
        let counter = session
            .marshal(&HostValue::object(testing::Counter::new(1)))
            .unwrap();

        dispatcher
            .invoke("demo/Counter.increment", json!({"context": counter, "by": 4}), &session)
            .await
            .unwrap();
        let value = dispatcher
            .invoke("demo/Counter.value", json!({"context": counter}), &session)
            .await
            .unwrap();
        assert_eq!(value, json!(5));

        dispatcher
            .invoke("demo/Counter.setValue", json!({"context": counter, "value": 42}), &session)
            .await
            .unwrap();
        let value = dispatcher
            .invoke("demo/Counter.value", json!({"context": counter}), &session)
            .await
            .unwrap();
        assert_eq!(value, json!(42));
    }

    #[tokio::test]
    async fn test_context_errors() {
        let session = testing::session();
        let dispatcher = dispatcher();

        let err = dispatcher
            .invoke("demo/Counter.increment", json!({"by": 1}), &session)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::InvalidArgument);

        let err = dispatcher
            .invoke(
                "demo/Counter.increment",
                json!({"context": {"$handle": "404"}, "by": 1}),
                &session,
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::HandleNotFound);
    }

    #[tokio::test]
    async fn test_mutable_list_returns_handle() {
        let session = testing::session();
        let dispatcher = dispatcher();
        let list = dispatcher
            .invoke("demo/makeList", json!({"count": 3}), &session)
            .await
            .unwrap();
        assert_eq!(list["$type"], "hostbridge/List");

        let length = dispatcher
            .invoke("hostbridge/List.length", json!({"context": list}), &session)
            .await
            .unwrap();
        assert_eq!(length, json!(3));
    }

    #[tokio::test]
    async fn test_callback_parameter_requires_factory() {
        let session = testing::session();
        let err = dispatcher()
            .invoke("demo/withCallback", json!({"onValue": "cb1"}), &session)
            .await
            .unwrap_err();
        let envelope = err.to_envelope();
        assert_eq!(envelope.code, ErrorCode::InvalidArgument);
        assert_eq!(envelope.param_name.as_deref(), Some("onValue"));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_internal() {
        let session = testing::session();
        let dispatcher = CapabilityDispatcher::empty();
        dispatcher.register(Capability::new("x/panic", |_, _| async {
            if true {
                panic!("handler blew up");
            }
            Ok(HostValue::Null)
        }));
        let err = dispatcher.invoke("x/panic", json!({}), &session).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::InternalError);
    }

    #[test]
    fn test_last_registration_wins() {
        let dispatcher = CapabilityDispatcher::empty();
        dispatcher.register(Capability::new("x/a", |_, _| async { Ok(HostValue::Int(1)) }));
        dispatcher.register(Capability::new("x/a", |_, _| async { Ok(HostValue::Int(2)) }));
        assert_eq!(dispatcher.len(), 1);

        let session = testing::session();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let out = rt.block_on(dispatcher.invoke("x/a", json!({}), &session)).unwrap();
        assert_eq!(out, json!(2));
    }

    #[test]
    fn test_case_helpers() {
        assert_eq!(lower_first("Name"), "name");
        assert_eq!(upper_first("name"), "Name");
        assert_eq!(lower_first(""), "");
        assert!(is_excluded_method("ToString"));
        assert!(!is_excluded_method("increment"));
    }
}
