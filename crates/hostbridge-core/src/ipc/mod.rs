//! Driver transport.
//!
//! Length-prefixed JSON-RPC 2.0 over TCP. Unlike a plain request/response
//! channel the link is duplex: the driver calls host operations and the host
//! calls driver callbacks (`invokeCallback`) over the same stream.
//!
//! # Architecture
//!
//! - **Server**: Runs in the host, opens one session per connection
//! - **Client**: Driver side, issues requests and serves callbacks
//! - **Connection**: Duplex peer shared by both
//! - **Protocol**: Framing and JSON-RPC types

pub mod client;
pub mod connection;
pub mod dispatch;
pub mod protocol;
pub mod server;

pub use client::DriverClient;
pub use connection::{Connection, ConnectionInvoker};
pub use dispatch::{methods, BridgeDispatch, IpcDispatch};
pub use protocol::{IpcError, IpcMessage, IpcRequest, IpcResponse};
pub use server::{BridgeServer, BridgeServerHandle};
