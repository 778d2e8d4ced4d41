//! Duplex JSON-RPC peer over one TCP stream.
//!
//! Either side may send requests at any time. A writer task owns the write
//! half and drains an outbound queue. The read loop routes responses to the
//! pending call that awaits them and spawns one task per inbound request, so
//! a handler that waits on the peer never stalls the routing of new frames.

use super::protocol::{read_frame, write_frame, IpcMessage, IpcRequest, IpcResponse};
use super::IpcDispatch;
use crate::callback::CallbackInvoker;
use crate::config::TransportConfig;
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, warn};

/// Read half of a connection, consumed by [`Connection::serve`].
pub struct Incoming {
    reader: OwnedReadHalf,
}

/// One peer-to-peer link.
pub struct Connection {
    peer: SocketAddr,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<IpcResponse>>>,
    next_id: AtomicU64,
    connected: AtomicBool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Connection {
    /// Split `stream` and start the writer task.
    pub fn open(stream: TcpStream) -> Result<(Arc<Self>, Incoming)> {
        let peer = stream.peer_addr()?;
        let (reader, mut writer) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let connection = Arc::new(Self {
            peer,
            outbound: Mutex::new(Some(tx)),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(true),
        });

        let weak = Arc::downgrade(&connection);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    error!("Write to {} failed: {}", peer, e);
                    if let Some(connection) = weak.upgrade() {
                        connection.mark_disconnected();
                    }
                    break;
                }
            }
        });

        Ok((connection, Incoming { reader }))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, frame: Vec<u8>) -> Result<()> {
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            Some(tx) if self.is_connected() => tx
                .send(frame)
                .map_err(|_| BridgeError::transport("connection closed")),
            _ => Err(BridgeError::transport("connection closed")),
        }
    }

    fn respond(&self, response: &IpcResponse) {
        match serde_json::to_vec(response) {
            Ok(bytes) => {
                if let Err(e) = self.send(bytes) {
                    debug!("Dropping response to {}: {}", self.peer, e);
                }
            }
            Err(e) => error!("Failed to encode response: {}", e),
        }
    }

    /// Send a request and await the peer's response.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);

        let request = IpcRequest::new(method, params, id);
        let sent = serde_json::to_vec(&request)
            .map_err(BridgeError::from)
            .and_then(|bytes| self.send(bytes));
        if let Err(e) = sent {
            self.forget(id);
            return Err(e);
        }

        match tokio::time::timeout(TransportConfig::REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) => Err(BridgeError::transport(format!(
                "connection to {} closed while awaiting '{}'",
                self.peer, method
            ))),
            Err(_) => {
                self.forget(id);
                Err(BridgeError::transport(format!(
                    "request '{}' to {} timed out",
                    method, self.peer
                )))
            }
        }
    }

    fn forget(&self, id: u64) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        // Dropping the senders fails every pending call
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Stop sending and fail pending calls. The writer task exits once the
    /// queue drains.
    pub fn close(&self) {
        self.mark_disconnected();
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Run the read loop until the peer disconnects or `shutdown` fires.
    pub async fn serve<D>(
        self: &Arc<Self>,
        incoming: Incoming,
        dispatch: Arc<D>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()>
    where
        D: IpcDispatch + ?Sized,
    {
        let Incoming { mut reader } = incoming;
        let result = loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader) => match result {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                },
                _ = shutdown.changed() => break Ok(()),
            };

            match IpcMessage::parse(&frame) {
                Ok(IpcMessage::Request(request)) => self.spawn_request(request, Arc::clone(&dispatch)),
                Ok(IpcMessage::Response(response)) => self.complete(response),
                Err(e) => {
                    warn!("Unparseable frame from {}: {}", self.peer, e);
                    self.respond(&IpcResponse::error(None, -32700, format!("Parse error: {}", e)));
                }
            }
        };
        self.close();
        result
    }

    fn spawn_request<D>(self: &Arc<Self>, request: IpcRequest, dispatch: Arc<D>)
    where
        D: IpcDispatch + ?Sized,
    {
        let connection = Arc::clone(self);
        tokio::spawn(async move {
            if request.jsonrpc != TransportConfig::JSONRPC_VERSION {
                connection.respond(&IpcResponse::error(
                    request.id,
                    -32600,
                    "Invalid Request: expected jsonrpc 2.0".to_string(),
                ));
                return;
            }
            let params = request.params.unwrap_or_else(|| json!({}));
            let outcome = dispatch.dispatch(&request.method, params).await;
            // Notifications get no response
            let Some(id) = request.id else { return };
            let response = match outcome {
                Ok(result) => IpcResponse::success(Some(id), result),
                Err(e) => {
                    debug!("Request '{}' failed: {}", request.method, e);
                    IpcResponse::failure(Some(id), &e)
                }
            };
            connection.respond(&response);
        });
    }

    fn complete(&self, response: IpcResponse) {
        let id = response.id.as_ref().and_then(Value::as_u64);
        let waiter = id.and_then(|id| {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id)
        });
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => warn!("Response from {} matches no pending request", self.peer),
        }
    }
}

/// [`CallbackInvoker`] that forwards callbacks over a connection as
/// `invokeCallback` requests.
pub struct ConnectionInvoker {
    connection: Weak<Connection>,
}

impl ConnectionInvoker {
    pub fn new(connection: &Arc<Connection>) -> Self {
        Self {
            connection: Arc::downgrade(connection),
        }
    }
}

#[async_trait]
impl CallbackInvoker for ConnectionInvoker {
    async fn invoke(&self, callback_id: &str, args: Value) -> Result<Value> {
        let connection = self
            .connection
            .upgrade()
            .ok_or_else(|| BridgeError::transport("connection closed"))?;
        connection
            .call(
                TransportConfig::INVOKE_CALLBACK_METHOD,
                json!({ "callbackId": callback_id, "args": args }),
            )
            .await
    }

    fn is_connected(&self) -> bool {
        self.connection
            .upgrade()
            .is_some_and(|connection| connection.is_connected())
    }
}
