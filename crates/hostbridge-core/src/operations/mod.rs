//! Outward-facing façade over live objects and exported types.
//!
//! [`RpcOperations`] resolves objects by handle and members by name
//! (case-insensitive), chooses among overloads by argument names, and hands
//! back marshalled results. Each operation is independently callable and
//! leaves no externally visible partial state when it fails.

mod indexer;
mod instruction;
mod overload;

pub use instruction::{CreateObject, Instruction};

use crate::binding::{self, argument_map};
use crate::catalog::{PropertyInfo, TypeInfo};
use crate::error::{BridgeError, Result};
use crate::session::Session;
use crate::value::{HostValue, ObjectRef};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Operations bound to one session.
#[derive(Debug, Clone)]
pub struct RpcOperations {
    session: Session,
}

fn host<T>(result: anyhow::Result<T>) -> Result<T> {
    result.map_err(BridgeError::from_host)
}

impl RpcOperations {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn object(&self, object_id: &str) -> Result<ObjectRef> {
        self.session.handles().get(object_id)
    }

    /// Catalog entry describing a live object.
    fn describe(&self, object: &ObjectRef) -> Result<Arc<TypeInfo>> {
        let catalog = self.session.catalog();
        catalog
            .type_for_object(object)
            .ok_or_else(|| BridgeError::not_found("Type", catalog.tag_for_object(object)))
    }

    fn instance_property(&self, object: &ObjectRef, name: &str) -> Result<PropertyInfo> {
        let info = self.describe(object)?;
        self.session
            .catalog()
            .find_property(&info, name)
            .ok_or_else(|| BridgeError::not_found("Property", format!("{}.{}", info.tag, name)))
    }

    fn static_property(&self, assembly: &str, type_name: &str, name: &str) -> Result<(Arc<TypeInfo>, PropertyInfo)> {
        let info = self.session.catalog().find_type(assembly, type_name)?;
        let property = info
            .static_properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| BridgeError::not_found("Property", format!("{}.{}", info.tag, name)))?;
        Ok((info, property))
    }

    fn write_property(
        &self,
        type_tag: &str,
        property: &PropertyInfo,
        target: Option<&ObjectRef>,
        value: &Value,
    ) -> Result<()> {
        let setter = property
            .setter
            .as_ref()
            .ok_or_else(|| BridgeError::ReadOnlyProperty {
                type_name: type_tag.to_string(),
                property: property.name.clone(),
            })?;
        let value = self.session.unmarshal(value, &property.ty, &property.name)?;
        host(setter(target, value))
    }

    /// Invoke the best-matching overload of an instance method.
    pub async fn invoke_method(&self, object_id: &str, name: &str, args: &Value) -> Result<Value> {
        let object = self.object(object_id)?;
        let info = self.describe(&object)?;
        let candidates = self.session.catalog().find_methods(&info, name);
        if candidates.is_empty() {
            return Err(BridgeError::not_found("Method", format!("{}.{}", info.tag, name)));
        }
        let map = argument_map(args)?;
        let method = overload::select(self.session.converter(), name, &candidates, map)?;
        debug!("Invoking {}.{} on handle {}", info.tag, method.name, object_id);

        let result = binding::call(&self.session, method, Some(object), map).await?;
        self.session.marshal(&result)
    }

    pub fn get_property(&self, object_id: &str, name: &str) -> Result<Value> {
        let object = self.object(object_id)?;
        let property = self.instance_property(&object, name)?;
        let value = host((property.getter)(Some(&object)))?;
        self.session.marshal(&value)
    }

    /// Assign a property. Read-only properties fail before any conversion.
    pub fn set_property(&self, object_id: &str, name: &str, value: &Value) -> Result<()> {
        let object = self.object(object_id)?;
        let property = self.instance_property(&object, name)?;
        let tag = self.session.catalog().tag_for_object(&object);
        self.write_property(&tag, &property, Some(&object), value)
    }

    pub fn get_indexer(&self, object_id: &str, index: &Value) -> Result<Value> {
        let object = self.object(object_id)?;
        let value = indexer::get(&self.session, &object, index)?;
        self.session.marshal(&value)
    }

    pub fn set_indexer(&self, object_id: &str, index: &Value, value: &Value) -> Result<()> {
        let object = self.object(object_id)?;
        indexer::set(&self.session, &object, index, value)
    }

    pub fn get_static_property(&self, assembly: &str, type_name: &str, name: &str) -> Result<Value> {
        let (_, property) = self.static_property(assembly, type_name, name)?;
        let value = host((property.getter)(None))?;
        self.session.marshal(&value)
    }

    pub fn set_static_property(
        &self,
        assembly: &str,
        type_name: &str,
        name: &str,
        value: &Value,
    ) -> Result<()> {
        let (info, property) = self.static_property(assembly, type_name, name)?;
        self.write_property(&info.tag, &property, None, value)
    }

    pub async fn invoke_static_method(
        &self,
        assembly: &str,
        type_name: &str,
        name: &str,
        args: &Value,
    ) -> Result<Value> {
        let info = self.session.catalog().find_type(assembly, type_name)?;
        let candidates: Vec<_> = info
            .static_methods
            .iter()
            .filter(|m| m.name.eq_ignore_ascii_case(name))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(BridgeError::not_found("Method", format!("{}.{}", info.tag, name)));
        }
        let map = argument_map(args)?;
        let method = overload::select(self.session.converter(), name, &candidates, map)?;
        debug!("Invoking static {}.{}", info.tag, method.name);

        let result = binding::call(&self.session, method, None, map).await?;
        self.session.marshal(&result)
    }

    /// Construct an instance and return its handle wrapper.
    pub async fn create_object(&self, assembly: &str, type_name: &str, args: &Value) -> Result<Value> {
        let info = self.session.catalog().find_type(assembly, type_name)?;
        if info.constructors.is_empty() {
            return Err(BridgeError::not_found("Constructor", info.tag.clone()));
        }
        let map = argument_map(args)?;
        let constructor = overload::select(self.session.converter(), &info.tag, &info.constructors, map)?;

        let created = binding::call(&self.session, constructor, None, map).await?;
        match created {
            HostValue::Object(object) => {
                let handle = self.session.handles().marshal(&object, &info.tag);
                debug!("Created {} as {}", info.tag, handle);
                Ok(handle)
            }
            other => Err(BridgeError::internal(format!(
                "Constructor of {} returned {} instead of an object",
                info.tag,
                other.kind_name()
            ))),
        }
    }

    /// Execute a self-describing instruction.
    pub async fn execute_instruction(&self, payload: &Value) -> Result<Value> {
        match Instruction::parse(payload)? {
            Instruction::CreateObject(create) => {
                self.create_object(&create.assembly, &create.type_name, &create.args)
                    .await
            }
        }
    }

    /// Call a driver callback outside of any proxy.
    pub async fn invoke_callback_async(&self, callback_id: &str, args: Value) -> Result<Value> {
        self.session.invoke_callback(callback_id, args).await
    }

    pub fn unregister_object(&self, object_id: &str) -> bool {
        self.session.handles().unregister(object_id)
    }

    /// Cancel a token by id. `false` when unknown or already cancelled.
    pub fn cancel_token(&self, token_id: &str) -> bool {
        self.session.tokens().cancel(token_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::testing::{self, RecordingInvoker};
    use serde_json::json;

    fn operations() -> RpcOperations {
        RpcOperations::new(testing::session())
    }

    fn handle_id(wire: &Value) -> String {
        wire["$handle"].as_str().unwrap().to_string()
    }

    fn counter(ops: &RpcOperations, start: i64) -> String {
        let wire = ops
            .session()
            .marshal(&HostValue::object(testing::Counter::new(start)))
            .unwrap();
        handle_id(&wire)
    }

    #[tokio::test]
    async fn test_invoke_method_case_insensitive() {
        let ops = operations();
        let id = counter(&ops, 1);
        let out = ops.invoke_method(&id, "INCREMENT", &json!({"by": 2})).await.unwrap();
        assert_eq!(out, json!(3));
    }

    #[tokio::test]
    async fn test_overloads_selected_by_names() {
        let ops = operations();
        let id = counter(&ops, 0);
        let by_name = ops.invoke_method(&id, "describe", &json!({"name": "x"})).await.unwrap();
        let by_value = ops.invoke_method(&id, "describe", &json!({"value": 7})).await.unwrap();
        let by_both = ops
            .invoke_method(&id, "describe", &json!({"name": "x", "value": 7}))
            .await
            .unwrap();
        assert_eq!(by_name, json!("name:x"));
        assert_eq!(by_value, json!("value:7"));
        assert_eq!(by_both, json!("name:x,value:7"));
    }

    #[tokio::test]
    async fn test_inherited_members_resolve_on_derived_type() {
        let ops = operations();
        let wire = ops
            .session()
            .marshal(&HostValue::object(testing::LabeledCounter::new("a", 10)))
            .unwrap();
        let id = handle_id(&wire);
        assert_eq!(ops.get_property(&id, "value").unwrap(), json!(10));
        assert_eq!(ops.get_property(&id, "label").unwrap(), json!("a"));
        let out = ops.invoke_method(&id, "increment", &json!({"by": 1})).await.unwrap();
        assert_eq!(out, json!(11));
    }

    #[tokio::test]
    async fn test_unknown_object_and_member() {
        let ops = operations();
        let err = ops.invoke_method("999", "increment", &json!({})).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::HandleNotFound);
        assert!(ops.get_property("999", "value").is_err());

        let id = counter(&ops, 0);
        let err = ops.invoke_method(&id, "fly", &json!({})).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::NotFound);
        let err = ops.get_property(&id, "wings").unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_unknown_handle_argument_reports_handle_not_found() {
        let ops = operations();
        let id = counter(&ops, 0);
        let stale = json!({"$handle": "999"});

        let err = ops
            .invoke_method(&id, "describe", &json!({"name": stale}))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::HandleNotFound);

        let err = ops
            .invoke_static_method("demo", "Counter", "max", &json!({"a": stale, "b": 1}))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::HandleNotFound);

        let before = ops.session().handles().count();
        let err = ops
            .create_object("demo", "Counter", &json!({"start": stale}))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::HandleNotFound);
        assert_eq!(ops.session().handles().count(), before);
    }

    #[tokio::test]
    async fn test_unregistered_handle_never_resolves() {
        let ops = operations();
        let id = counter(&ops, 4);
        assert!(ops.unregister_object(&id));
        assert!(!ops.unregister_object(&id));
        let err = ops.get_property(&id, "value").unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::HandleNotFound);
    }

    #[test]
    fn test_properties_and_read_only() {
        let ops = operations();
        let id = counter(&ops, 5);
        ops.set_property(&id, "Value", &json!(8)).unwrap();
        assert_eq!(ops.get_property(&id, "value").unwrap(), json!(8));
        assert_eq!(ops.get_property(&id, "doubled").unwrap(), json!(16));

        let err = ops.set_property(&id, "doubled", &json!(1)).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ReadOnlyProperty);
        assert_eq!(ops.get_property(&id, "value").unwrap(), json!(8));
    }

    #[test]
    fn test_set_property_type_mismatch_leaves_value() {
        let ops = operations();
        let id = counter(&ops, 5);
        let err = ops.set_property(&id, "value", &json!("five")).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::InvalidArgument);
        assert_eq!(ops.get_property(&id, "value").unwrap(), json!(5));
    }

    #[test]
    fn test_static_members() {
        let ops = operations();
        ops.set_static_property("demo", "Counter", "defaultStep", &json!(3))
            .unwrap();
        assert_eq!(
            ops.get_static_property("demo", "Counter", "defaultStep").unwrap(),
            json!(3)
        );
        let err = ops
            .set_static_property("demo", "Counter", "instances", &json!(0))
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ReadOnlyProperty);

        let err = ops.get_static_property("nope", "Counter", "x").unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::NotFound);
        let err = ops.get_static_property("demo", "Nope", "x").unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_invoke_static_method() {
        let ops = operations();
        let out = ops
            .invoke_static_method("demo", "Counter", "max", &json!({"a": 3, "b": 9}))
            .await
            .unwrap();
        assert_eq!(out, json!(9));
    }

    #[tokio::test]
    async fn test_create_object_applies_defaults() {
        let ops = operations();
        let wire = ops.create_object("demo", "Counter", &json!({})).await.unwrap();
        assert_eq!(wire["$type"], "demo/Counter");
        let id = handle_id(&wire);
        assert_eq!(ops.get_property(&id, "value").unwrap(), json!(0));

        let wire = ops
            .create_object("demo", "Counter", &json!({"start": 12}))
            .await
            .unwrap();
        assert_eq!(ops.get_property(&handle_id(&wire), "value").unwrap(), json!(12));
    }

    #[tokio::test]
    async fn test_create_object_missing_type() {
        let ops = operations();
        let err = ops.create_object("demo", "Ghost", &json!({})).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::NotFound);
        assert_eq!(ops.session().handles().count(), 0);
    }

    #[tokio::test]
    async fn test_execute_instruction() {
        let ops = operations();
        let wire = ops
            .execute_instruction(&json!({
                "name": "CREATE_OBJECT",
                "assembly": "demo",
                "type": "Counter",
                "args": {"start": 2}
            }))
            .await
            .unwrap();
        assert_eq!(ops.get_property(&handle_id(&wire), "value").unwrap(), json!(2));

        let err = ops
            .execute_instruction(&json!({"name": "DROP_TABLES"}))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::NotSupported);
    }

    #[test]
    fn test_indexers() {
        let ops = operations();
        let list = ops
            .session()
            .marshal(&HostValue::object(crate::value::HostList::from_values(
                crate::types::TypeRef::Int,
                vec![HostValue::Int(1), HostValue::Int(2)],
            )))
            .unwrap();
        let id = handle_id(&list);
        assert_eq!(ops.get_indexer(&id, &json!(1)).unwrap(), json!(2));
        ops.set_indexer(&id, &json!(1), &json!(5)).unwrap();
        assert_eq!(ops.get_indexer(&id, &json!(1)).unwrap(), json!(5));
        let err = ops.get_indexer(&id, &json!(2)).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::OutOfRange);
    }

    #[test]
    fn test_cancel_token_is_idempotent() {
        let ops = operations();
        let token = crate::cancel::CancellationToken::new();
        let id = ops.session().tokens().register(token.clone());
        assert!(ops.cancel_token(&id));
        assert!(token.is_cancelled());
        assert!(!ops.cancel_token(&id));
        assert!(!ops.cancel_token("ct-missing"));
    }

    #[tokio::test]
    async fn test_invoke_callback_async() {
        let invoker = Arc::new(RecordingInvoker::returning(json!("ack")));
        let ops = RpcOperations::new(testing::session_with(invoker.clone()));
        let out = ops
            .invoke_callback_async("notify", json!({"p0": "hello"}))
            .await
            .unwrap();
        assert_eq!(out, json!("ack"));
        assert_eq!(invoker.calls(), vec![("notify".to_string(), json!({"p0": "hello"}))]);
    }
}
