//! The host: catalog, type hierarchy and capability dispatcher shared by
//! every driver session.

use crate::callback::CallbackInvoker;
use crate::catalog::{Assembly, TypeCatalog};
use crate::dispatcher::{Capability, CapabilityDispatcher};
use crate::error::Result;
use crate::hierarchy::TypeHierarchy;
use crate::operations::RpcOperations;
use crate::session::Session;
use std::sync::Arc;
use tracing::info;

/// A configured bridge host.
///
/// # Example
///
/// ```
/// use hostbridge::catalog::{AssemblyBuilder, MethodInfo};
/// use hostbridge::types::TypeRef;
/// use hostbridge::BridgeHost;
///
/// let host = BridgeHost::builder()
///     .assembly(
///         AssemblyBuilder::new("demo")
///             .function(MethodInfo::new("ping").returns(TypeRef::String).handler(|_| Ok("pong".into())))
///             .build(),
///     )
///     .build()
///     .unwrap();
///
/// assert!(host.dispatcher().contains("demo/ping"));
/// ```
pub struct BridgeHost {
    catalog: Arc<TypeCatalog>,
    hierarchy: Arc<TypeHierarchy>,
    dispatcher: Arc<CapabilityDispatcher>,
}

impl std::fmt::Debug for BridgeHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHost")
            .field("assemblies", &self.catalog.assemblies().count())
            .field("capabilities", &self.dispatcher.len())
            .finish()
    }
}

impl BridgeHost {
    pub fn builder() -> BridgeHostBuilder {
        BridgeHostBuilder::default()
    }

    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        &self.catalog
    }

    pub fn hierarchy(&self) -> &Arc<TypeHierarchy> {
        &self.hierarchy
    }

    pub fn dispatcher(&self) -> &Arc<CapabilityDispatcher> {
        &self.dispatcher
    }

    /// Open a driver session. Pass the connection's invoker to enable
    /// callback-shaped parameters.
    pub fn open_session(&self, invoker: Option<Arc<dyn CallbackInvoker>>) -> Session {
        Session::new(Arc::clone(&self.catalog), Arc::clone(&self.hierarchy), invoker)
    }

    pub fn operations(&self, session: Session) -> RpcOperations {
        RpcOperations::new(session)
    }
}

/// Builder for [`BridgeHost`].
#[derive(Default)]
pub struct BridgeHostBuilder {
    assemblies: Vec<Assembly>,
    capabilities: Vec<Capability>,
}

impl BridgeHostBuilder {
    /// Export an assembly.
    pub fn assembly(mut self, assembly: Assembly) -> Self {
        self.assemblies.push(assembly);
        self
    }

    /// Register a capability after scanning. It replaces any scanned
    /// capability with the same id.
    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn build(self) -> Result<BridgeHost> {
        let catalog = TypeCatalog::new(self.assemblies)?;
        let hierarchy = TypeHierarchy::build(&catalog);
        let dispatcher = CapabilityDispatcher::new(&catalog);
        for capability in self.capabilities {
            dispatcher.register(capability);
        }
        info!(
            "Bridge host ready: {} assemblies, {} capabilities",
            catalog.assemblies().count(),
            dispatcher.len()
        );
        Ok(BridgeHost {
            catalog: Arc::new(catalog),
            hierarchy: Arc::new(hierarchy),
            dispatcher: Arc::new(dispatcher),
        })
    }
}
