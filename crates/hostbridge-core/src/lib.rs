//! Hostbridge - drive live host objects from another runtime.
//!
//! A host exports assemblies of typed functions, classes and properties
//! through an explicit [`TypeCatalog`]. A driver connected over JSON-RPC
//! invokes them as capabilities, holds host objects by opaque handle, passes
//! callbacks the host can call back into, and cancels long-running work by
//! token.
//!
//! # Example
//!
//! ```rust,no_run
//! use hostbridge::catalog::{AssemblyBuilder, MethodInfo};
//! use hostbridge::ipc::BridgeServer;
//! use hostbridge::types::TypeRef;
//! use hostbridge::BridgeHost;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> hostbridge::Result<()> {
//!     let host = BridgeHost::builder()
//!         .assembly(
//!             AssemblyBuilder::new("demo")
//!                 .function(
//!                     MethodInfo::new("greet")
//!                         .param("name", TypeRef::String)
//!                         .returns(TypeRef::String)
//!                         .handler(|inv| Ok(format!("Hello, {}", inv.arg(0).as_str()?).into())),
//!                 )
//!                 .build(),
//!         )
//!         .build()?;
//!
//!     let server = BridgeServer::start(Arc::new(host), "127.0.0.1:0".parse().unwrap()).await?;
//!     println!("listening on {}", server.addr());
//!     Ok(())
//! }
//! ```

pub mod callback;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod expr;
pub mod generics;
pub mod handles;
pub mod hierarchy;
pub mod host;
pub mod ipc;
pub mod marshal;
pub mod operations;
pub mod session;
pub mod types;
pub mod value;

mod binding;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use callback::{Callback, CallbackInvoker, CallbackProxyFactory};
pub use cancel::{CancellationRegistry, CancellationToken, CancelledError};
pub use catalog::{
    Assembly, AssemblyBuilder, Invocation, MethodInfo, PropertyInfo, TypeBuilder, TypeCatalog,
    TypeInfo, TypeKind,
};
pub use config::{BridgeConfig, TransportConfig};
pub use dispatcher::{Capability, CapabilityDispatcher};
pub use error::{BridgeError, ErrorCode, ErrorEnvelope, Result};
pub use expr::ReferenceExpression;
pub use generics::GenericResolver;
pub use handles::{HandleRef, HandleRegistry};
pub use hierarchy::TypeHierarchy;
pub use host::{BridgeHost, BridgeHostBuilder};
pub use ipc::{BridgeServer, BridgeServerHandle, DriverClient};
pub use marshal::ValueConverter;
pub use operations::{Instruction, RpcOperations};
pub use session::Session;
pub use types::{CallbackShape, TypeRef};
pub use value::{AsyncDisposable, Disposable, HostDict, HostList, HostObject, HostValue, ObjectRef};
