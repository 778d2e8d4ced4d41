//! Routing of inbound JSON-RPC methods to capabilities and RPC operations.

use crate::dispatcher::CapabilityDispatcher;
use crate::error::{BridgeError, Result};
use crate::operations::RpcOperations;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Dispatch a JSON-RPC method call and return its result.
#[async_trait::async_trait]
pub trait IpcDispatch: Send + Sync + 'static {
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value>;
}

/// Wire method names served by the host.
pub mod methods {
    pub const PING: &str = "ping";
    pub const LIST_CAPABILITIES: &str = "listCapabilities";
    pub const INVOKE_CAPABILITY: &str = "invokeCapability";
    pub const INVOKE_METHOD: &str = "invokeMethod";
    pub const GET_PROPERTY: &str = "getProperty";
    pub const SET_PROPERTY: &str = "setProperty";
    pub const GET_INDEXER: &str = "getIndexer";
    pub const SET_INDEXER: &str = "setIndexer";
    pub const GET_STATIC_PROPERTY: &str = "getStaticProperty";
    pub const SET_STATIC_PROPERTY: &str = "setStaticProperty";
    pub const INVOKE_STATIC_METHOD: &str = "invokeStaticMethod";
    pub const CREATE_OBJECT: &str = "createObject";
    pub const EXECUTE_INSTRUCTION: &str = "executeInstruction";
    pub const UNREGISTER_OBJECT: &str = "unregisterObject";
    pub const CANCEL_TOKEN: &str = "cancelToken";
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvokeCapabilityParams {
    capability_id: String,
    #[serde(default = "empty_args")]
    args: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvokeMethodParams {
    object_id: String,
    method_name: String,
    #[serde(default = "empty_args")]
    args: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertyParams {
    object_id: String,
    property_name: String,
    #[serde(default)]
    value: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexerParams {
    object_id: String,
    index: Value,
    #[serde(default)]
    value: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StaticPropertyParams {
    assembly: String,
    type_name: String,
    property_name: String,
    #[serde(default)]
    value: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StaticMethodParams {
    assembly: String,
    type_name: String,
    method_name: String,
    #[serde(default = "empty_args")]
    args: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateObjectParams {
    assembly: String,
    type_name: String,
    #[serde(default = "empty_args")]
    args: Value,
}

#[derive(Deserialize)]
struct InstructionParams {
    instruction: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectParams {
    object_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenParams {
    token_id: String,
}

fn empty_args() -> Value {
    Value::Object(Map::new())
}

fn params<T: DeserializeOwned>(method: &str, params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| BridgeError::invalid_argument(format!("Invalid params for '{}': {}", method, e)))
}

/// Host-side dispatch for one driver session.
pub struct BridgeDispatch {
    dispatcher: Arc<CapabilityDispatcher>,
    operations: RpcOperations,
}

impl BridgeDispatch {
    pub fn new(dispatcher: Arc<CapabilityDispatcher>, operations: RpcOperations) -> Self {
        Self {
            dispatcher,
            operations,
        }
    }

    pub fn operations(&self) -> &RpcOperations {
        &self.operations
    }
}

#[async_trait::async_trait]
impl IpcDispatch for BridgeDispatch {
    async fn dispatch(&self, method: &str, raw: Value) -> Result<Value> {
        let ops = &self.operations;
        match method {
            methods::PING => Ok(json!("pong")),
            methods::LIST_CAPABILITIES => Ok(json!(self.dispatcher.capability_ids())),
            methods::INVOKE_CAPABILITY => {
                let p: InvokeCapabilityParams = params(method, raw)?;
                self.dispatcher
                    .invoke(&p.capability_id, p.args, ops.session())
                    .await
            }
            methods::INVOKE_METHOD => {
                let p: InvokeMethodParams = params(method, raw)?;
                ops.invoke_method(&p.object_id, &p.method_name, &p.args).await
            }
            methods::GET_PROPERTY => {
                let p: PropertyParams = params(method, raw)?;
                ops.get_property(&p.object_id, &p.property_name)
            }
            methods::SET_PROPERTY => {
                let p: PropertyParams = params(method, raw)?;
                ops.set_property(&p.object_id, &p.property_name, &p.value)?;
                Ok(Value::Null)
            }
            methods::GET_INDEXER => {
                let p: IndexerParams = params(method, raw)?;
                ops.get_indexer(&p.object_id, &p.index)
            }
            methods::SET_INDEXER => {
                let p: IndexerParams = params(method, raw)?;
                ops.set_indexer(&p.object_id, &p.index, &p.value)?;
                Ok(Value::Null)
            }
            methods::GET_STATIC_PROPERTY => {
                let p: StaticPropertyParams = params(method, raw)?;
                ops.get_static_property(&p.assembly, &p.type_name, &p.property_name)
            }
            methods::SET_STATIC_PROPERTY => {
                let p: StaticPropertyParams = params(method, raw)?;
                ops.set_static_property(&p.assembly, &p.type_name, &p.property_name, &p.value)?;
                Ok(Value::Null)
            }
            methods::INVOKE_STATIC_METHOD => {
                let p: StaticMethodParams = params(method, raw)?;
                ops.invoke_static_method(&p.assembly, &p.type_name, &p.method_name, &p.args)
                    .await
            }
            methods::CREATE_OBJECT => {
                let p: CreateObjectParams = params(method, raw)?;
                ops.create_object(&p.assembly, &p.type_name, &p.args).await
            }
            methods::EXECUTE_INSTRUCTION => {
                let p: InstructionParams = params(method, raw)?;
                ops.execute_instruction(&p.instruction).await
            }
            methods::UNREGISTER_OBJECT => {
                let p: ObjectParams = params(method, raw)?;
                Ok(json!(ops.unregister_object(&p.object_id)))
            }
            methods::CANCEL_TOKEN => {
                let p: TokenParams = params(method, raw)?;
                Ok(json!(ops.cancel_token(&p.token_id)))
            }
            _ => Err(BridgeError::MethodNotFound {
                method: method.to_string(),
            }),
        }
    }
}
