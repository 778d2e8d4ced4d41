//! Per-driver session state.
//!
//! A session owns the handle registry and token registry of one driver
//! connection, plus the callback proxy factory bound to that connection's
//! invoker. The catalog and type hierarchy are shared by all sessions.

use crate::callback::{CallbackInvoker, CallbackProxyFactory};
use crate::cancel::CancellationRegistry;
use crate::catalog::TypeCatalog;
use crate::error::{BridgeError, Result};
use crate::handles::HandleRegistry;
use crate::hierarchy::TypeHierarchy;
use crate::marshal::{BindContext, ValueConverter};
use crate::types::TypeRef;
use crate::value::HostValue;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
pub struct Session {
    id: u64,
    converter: Arc<ValueConverter>,
    proxies: Option<Arc<CallbackProxyFactory>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("handles", &self.handles().count())
            .field("callbacks", &self.proxies.is_some())
            .finish()
    }
}

impl Session {
    /// Open a session. Without an invoker, callback-shaped parameters are
    /// rejected.
    pub fn new(
        catalog: Arc<TypeCatalog>,
        hierarchy: Arc<TypeHierarchy>,
        invoker: Option<Arc<dyn CallbackInvoker>>,
    ) -> Self {
        let converter = Arc::new(ValueConverter::new(
            catalog,
            hierarchy,
            Arc::new(HandleRegistry::new()),
            Arc::new(CancellationRegistry::new()),
        ));
        let proxies = invoker
            .map(|invoker| Arc::new(CallbackProxyFactory::new(invoker, Arc::clone(&converter))));
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        info!("Session {} opened", id);
        Self {
            id,
            converter,
            proxies,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn converter(&self) -> &Arc<ValueConverter> {
        &self.converter
    }

    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        self.converter.catalog()
    }

    pub fn hierarchy(&self) -> &Arc<TypeHierarchy> {
        self.converter.hierarchy()
    }

    pub fn handles(&self) -> &Arc<HandleRegistry> {
        self.converter.handles()
    }

    pub fn tokens(&self) -> &Arc<CancellationRegistry> {
        self.converter.tokens()
    }

    pub fn proxies(&self) -> Option<&CallbackProxyFactory> {
        self.proxies.as_deref()
    }

    /// Binding context for a named parameter, with callback support when
    /// the session has an invoker.
    pub fn bind_context<'a>(&'a self, param_name: &'a str) -> BindContext<'a> {
        BindContext::new(param_name).with_proxies(self.proxies())
    }

    pub fn marshal(&self, value: &HostValue) -> Result<Value> {
        self.converter.marshal(value)
    }

    pub fn unmarshal(&self, value: &Value, ty: &TypeRef, param_name: &str) -> Result<HostValue> {
        self.converter
            .unmarshal(value, ty, &self.bind_context(param_name))
    }

    /// Call a driver callback directly, outside of any proxy.
    pub async fn invoke_callback(&self, callback_id: &str, args: Value) -> Result<Value> {
        let proxies = self.proxies.as_ref().ok_or_else(|| {
            BridgeError::NotSupported("session has no callback invoker".to_string())
        })?;
        proxies.invoker().invoke(callback_id, args).await
    }

    pub fn is_connected(&self) -> bool {
        self.proxies
            .as_ref()
            .is_some_and(|proxies| proxies.invoker().is_connected())
    }

    /// Cancel outstanding operations and release every handle.
    pub async fn close(&self) {
        self.tokens().cancel_all();
        self.handles().dispose_all().await;
        info!("Session {} closed", self.id);
    }
}
