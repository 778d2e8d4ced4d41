//! Driver-side client.
//!
//! Connects to a [`BridgeServer`](super::BridgeServer), issues bridge
//! requests and answers the host's `invokeCallback` requests from a table
//! of registered callbacks.
//!
//! # Thread Safety
//!
//! Requests from many tasks share one connection. Callbacks run on their
//! own tasks, so a callback may itself call back into the host while the
//! request that triggered it is still pending.

use super::connection::Connection;
use super::dispatch::{methods, IpcDispatch};
use crate::config::TransportConfig;
use crate::error::{BridgeError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;

type DriverCallback = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

#[derive(Default)]
struct CallbackTable {
    callbacks: RwLock<HashMap<String, DriverCallback>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvokeCallbackParams {
    callback_id: String,
    #[serde(default)]
    args: Value,
}

#[async_trait::async_trait]
impl IpcDispatch for CallbackTable {
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value> {
        if method != TransportConfig::INVOKE_CALLBACK_METHOD {
            return Err(BridgeError::MethodNotFound {
                method: method.to_string(),
            });
        }
        let params: InvokeCallbackParams = serde_json::from_value(params)
            .map_err(|e| BridgeError::invalid_argument(format!("Invalid callback request: {}", e)))?;
        let callback = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&params.callback_id)
            .cloned()
            .ok_or_else(|| BridgeError::not_found("Callback", &params.callback_id))?;
        debug!("Running driver callback {}", params.callback_id);
        callback(params.args).await
    }
}

/// Client connection from a driver to a bridge host.
pub struct DriverClient {
    connection: Arc<Connection>,
    callbacks: Arc<CallbackTable>,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for DriverClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverClient")
            .field("connection", &self.connection)
            .finish()
    }
}

impl DriverClient {
    /// Connect to a host, failing after the configured connect timeout.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = tokio::time::timeout(TransportConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| BridgeError::transport(format!("Timed out connecting to {}", addr)))??;

        let (connection, incoming) = Connection::open(stream)?;
        let callbacks = Arc::new(CallbackTable::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let serving = Arc::clone(&connection);
        let dispatch = Arc::clone(&callbacks);
        tokio::spawn(async move {
            if let Err(e) = serving.serve(incoming, dispatch, shutdown_rx).await {
                debug!("Driver connection ended: {}", e);
            }
        });

        debug!("Driver connected to {}", addr);
        Ok(Self {
            connection,
            callbacks,
            shutdown_tx,
        })
    }

    /// Register a callback the host can invoke by id. Arguments arrive as
    /// `{"p0": .., "p1": ..}`.
    pub fn register_callback<F, Fut>(&self, callback_id: impl Into<String>, callback: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let callback: DriverCallback = Arc::new(move |args| callback(args).boxed());
        self.callbacks
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(callback_id.into(), callback);
    }

    pub fn unregister_callback(&self, callback_id: &str) -> bool {
        self.callbacks
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(callback_id)
            .is_some()
    }

    /// Raw JSON-RPC call.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.connection.call(method, params).await
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub async fn ping(&self) -> Result<Value> {
        self.call(methods::PING, json!({})).await
    }

    pub async fn list_capabilities(&self) -> Result<Vec<String>> {
        let ids = self.call(methods::LIST_CAPABILITIES, json!({})).await?;
        Ok(serde_json::from_value(ids)?)
    }

    pub async fn invoke_capability(&self, capability_id: &str, args: Value) -> Result<Value> {
        self.call(
            methods::INVOKE_CAPABILITY,
            json!({ "capabilityId": capability_id, "args": args }),
        )
        .await
    }

    pub async fn invoke_method(&self, object_id: &str, method_name: &str, args: Value) -> Result<Value> {
        self.call(
            methods::INVOKE_METHOD,
            json!({ "objectId": object_id, "methodName": method_name, "args": args }),
        )
        .await
    }

    pub async fn get_property(&self, object_id: &str, property_name: &str) -> Result<Value> {
        self.call(
            methods::GET_PROPERTY,
            json!({ "objectId": object_id, "propertyName": property_name }),
        )
        .await
    }

    pub async fn set_property(&self, object_id: &str, property_name: &str, value: Value) -> Result<()> {
        self.call(
            methods::SET_PROPERTY,
            json!({ "objectId": object_id, "propertyName": property_name, "value": value }),
        )
        .await
        .map(|_| ())
    }

    pub async fn get_indexer(&self, object_id: &str, index: Value) -> Result<Value> {
        self.call(
            methods::GET_INDEXER,
            json!({ "objectId": object_id, "index": index }),
        )
        .await
    }

    pub async fn set_indexer(&self, object_id: &str, index: Value, value: Value) -> Result<()> {
        self.call(
            methods::SET_INDEXER,
            json!({ "objectId": object_id, "index": index, "value": value }),
        )
        .await
        .map(|_| ())
    }

    pub async fn get_static_property(&self, assembly: &str, type_name: &str, property_name: &str) -> Result<Value> {
        self.call(
            methods::GET_STATIC_PROPERTY,
            json!({ "assembly": assembly, "typeName": type_name, "propertyName": property_name }),
        )
        .await
    }

    pub async fn set_static_property(
        &self,
        assembly: &str,
        type_name: &str,
        property_name: &str,
        value: Value,
    ) -> Result<()> {
        self.call(
            methods::SET_STATIC_PROPERTY,
            json!({
                "assembly": assembly,
                "typeName": type_name,
                "propertyName": property_name,
                "value": value,
            }),
        )
        .await
        .map(|_| ())
    }

    pub async fn invoke_static_method(
        &self,
        assembly: &str,
        type_name: &str,
        method_name: &str,
        args: Value,
    ) -> Result<Value> {
        self.call(
            methods::INVOKE_STATIC_METHOD,
            json!({
                "assembly": assembly,
                "typeName": type_name,
                "methodName": method_name,
                "args": args,
            }),
        )
        .await
    }

    /// Construct a host object. Returns the handle wrapper.
    pub async fn create_object(&self, assembly: &str, type_name: &str, args: Value) -> Result<Value> {
        self.call(
            methods::CREATE_OBJECT,
            json!({ "assembly": assembly, "typeName": type_name, "args": args }),
        )
        .await
    }

    pub async fn execute_instruction(&self, instruction: Value) -> Result<Value> {
        self.call(methods::EXECUTE_INSTRUCTION, json!({ "instruction": instruction }))
            .await
    }

    pub async fn unregister_object(&self, object_id: &str) -> Result<bool> {
        let removed = self
            .call(methods::UNREGISTER_OBJECT, json!({ "objectId": object_id }))
            .await?;
        Ok(removed.as_bool().unwrap_or(false))
    }

    pub async fn cancel_token(&self, token_id: &str) -> Result<bool> {
        let cancelled = self
            .call(methods::CANCEL_TOKEN, json!({ "tokenId": token_id }))
            .await?;
        Ok(cancelled.as_bool().unwrap_or(false))
    }

    /// Close the connection. The host disposes the session's handles.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        self.connection.close();
    }
}

impl Drop for DriverClient {
    fn drop(&mut self) {
        self.close();
    }
}
