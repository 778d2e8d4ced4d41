//! Function values implemented by the driver.
//!
//! A [`Callback`] is what host code receives for a callback-shaped parameter.
//! The [`CallbackProxyFactory`] builds callbacks that forward each call to the
//! driver through a [`CallbackInvoker`], the one transport-facing seam the
//! bridge depends on.
//!
//! Synchronous host code calls [`Callback::invoke_blocking`]. The wait for the
//! driver's answer runs as a separate task while the calling worker is handed
//! back to the runtime with `block_in_place`, so the transport keeps routing
//! inbound requests, including reentrant calls made by the driver while it
//! handles the callback.

use crate::cancel::CancellationToken;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::marshal::{BindContext, ValueConverter};
use crate::types::{CallbackShape, TypeRef};
use crate::value::HostValue;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::debug;

/// Transport-facing contract for calling into the driver.
#[async_trait]
pub trait CallbackInvoker: Send + Sync {
    /// Invoke a driver callback and await its result.
    async fn invoke(&self, callback_id: &str, args: Value) -> Result<Value>;

    /// Invoke a driver callback and await completion only.
    async fn invoke_void(&self, callback_id: &str, args: Value) -> Result<()> {
        self.invoke(callback_id, args).await.map(|_| ())
    }

    fn is_connected(&self) -> bool;
}

type CallbackTarget =
    Arc<dyn Fn(Vec<HostValue>) -> BoxFuture<'static, Result<HostValue>> + Send + Sync>;

struct CallbackInner {
    callback_id: String,
    shape: CallbackShape,
    target: CallbackTarget,
}

/// A callable value handed to host code.
#[derive(Clone)]
pub struct Callback {
    inner: Arc<CallbackInner>,
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callback")
            .field("callback_id", &self.inner.callback_id)
            .field("shape", &self.inner.shape)
            .finish()
    }
}

impl Callback {
    pub fn new<F, Fut>(callback_id: impl Into<String>, shape: CallbackShape, target: F) -> Self
    where
        F: Fn(Vec<HostValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HostValue>> + Send + 'static,
    {
        Self {
            inner: Arc::new(CallbackInner {
                callback_id: callback_id.into(),
                shape,
                target: Arc::new(move |args| target(args).boxed()),
            }),
        }
    }

    pub fn callback_id(&self) -> &str {
        &self.inner.callback_id
    }

    pub fn shape(&self) -> &CallbackShape {
        &self.inner.shape
    }

    /// True when both values are the same callable.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Call and await the result.
    pub async fn invoke(&self, args: Vec<HostValue>) -> Result<HostValue> {
        (self.inner.target)(args).await
    }

    /// Call from synchronous host code and block until the result arrives.
    ///
    /// Inside a multi-thread runtime the wait is moved off the runtime's
    /// scheduling path. Current-thread runtimes cannot do that and are
    /// rejected. Outside any runtime the call is driven on this thread.
    pub fn invoke_blocking(&self, args: Vec<HostValue>) -> Result<HostValue> {
        let future = (self.inner.target)(args);
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => return futures::executor::block_on(future),
        };
        if handle.runtime_flavor() != RuntimeFlavor::MultiThread {
            return Err(BridgeError::NotSupported(
                "synchronous callbacks require a multi-thread runtime".to_string(),
            ));
        }

        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        handle.spawn(async move {
            // The receiver only goes away if the blocked caller panicked
            let _ = tx.send(future.await);
        });
        tokio::task::block_in_place(|| rx.recv()).unwrap_or_else(|_| {
            Err(BridgeError::internal(format!(
                "callback {} ended without a result",
                self.inner.callback_id
            )))
        })
    }
}

/// Builds and caches proxies that forward calls to the driver.
pub struct CallbackProxyFactory {
    invoker: Arc<dyn CallbackInvoker>,
    converter: Arc<ValueConverter>,
    cache: Mutex<HashMap<(String, CallbackShape), Callback>>,
}

impl CallbackProxyFactory {
    pub fn new(invoker: Arc<dyn CallbackInvoker>, converter: Arc<ValueConverter>) -> Self {
        Self {
            invoker,
            converter,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn invoker(&self) -> &Arc<dyn CallbackInvoker> {
        &self.invoker
    }

    /// Proxy for `callback_id` with the shape declared by `ty`.
    ///
    /// Returns `None` when `ty` is not a callback shape. Repeated requests
    /// for the same id and shape return the same callable.
    pub fn create_proxy(&self, callback_id: &str, ty: &TypeRef) -> Option<Callback> {
        let TypeRef::Callback(shape) = ty else {
            return None;
        };
        let key = (callback_id.to_string(), shape.as_ref().clone());
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = cache.get(&key) {
            return Some(existing.clone());
        }

        let invoker = Arc::clone(&self.invoker);
        let converter = Arc::clone(&self.converter);
        let id = callback_id.to_string();
        let forward_shape = shape.as_ref().clone();
        let proxy = Callback::new(callback_id, shape.as_ref().clone(), move |args| {
            forward(
                Arc::clone(&invoker),
                Arc::clone(&converter),
                id.clone(),
                forward_shape.clone(),
                args,
            )
        });
        cache.insert(key, proxy.clone());
        debug!("Created callback proxy {}", callback_id);
        Some(proxy)
    }
}

async fn forward(
    invoker: Arc<dyn CallbackInvoker>,
    converter: Arc<ValueConverter>,
    callback_id: String,
    shape: CallbackShape,
    mut args: Vec<HostValue>,
) -> Result<HostValue> {
    let token = if shape.has_trailing_token() && args.len() == shape.params.len() {
        match args.pop() {
            Some(HostValue::Token(token)) => Some(token),
            _ => None,
        }
    } else {
        None
    };
    if token.as_ref().is_some_and(CancellationToken::is_cancelled) {
        return Err(BridgeError::Cancelled);
    }

    let mut payload = Map::new();
    for (index, arg) in args.iter().enumerate() {
        payload.insert(
            format!("{}{}", BridgeConfig::CALLBACK_ARG_PREFIX, index),
            converter.marshal(arg)?,
        );
    }
    let token_id = token.as_ref().map(|token| {
        let id = converter.tokens().register(token.clone());
        payload.insert(
            BridgeConfig::CANCELLATION_TOKEN_KEY.to_string(),
            Value::String(id.clone()),
        );
        id
    });
    let payload = Value::Object(payload);

    debug!("Forwarding callback {}", callback_id);
    let call = async {
        if shape.returns == TypeRef::Unit {
            invoker
                .invoke_void(&callback_id, payload)
                .await
                .map(|()| Value::Null)
        } else {
            invoker.invoke(&callback_id, payload).await
        }
    };
    let outcome = match &token {
        Some(token) => tokio::select! {
            result = call => result,
            _ = token.cancelled() => Err(BridgeError::Cancelled),
        },
        None => call.await,
    };
    if let Some(id) = token_id {
        converter.tokens().unregister(&id);
    }

    let value = outcome?;
    if shape.returns == TypeRef::Unit {
        return Ok(HostValue::Null);
    }
    converter.unmarshal(&value, &shape.returns, &BindContext::new("return"))
}
