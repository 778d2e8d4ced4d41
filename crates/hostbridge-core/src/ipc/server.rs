//! TCP server exposing a [`BridgeHost`] to drivers.
//!
//! Each accepted connection gets its own [`Session`](crate::session::Session):
//! handles, cancellation tokens and callback proxies never leak between
//! drivers. When the connection ends the session is closed and every handle
//! it owns is disposed.

use super::connection::{Connection, ConnectionInvoker};
use super::dispatch::BridgeDispatch;
use crate::callback::CallbackInvoker;
use crate::config::TransportConfig;
use crate::error::Result;
use crate::host::BridgeHost;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// Handle to a running bridge server. Dropping shuts down the server.
pub struct BridgeServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    active_connections: Arc<AtomicUsize>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl BridgeServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of drivers currently connected.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Stop accepting connections and close every active one.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for BridgeServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Bridge server that listens for driver connections.
pub struct BridgeServer;

impl BridgeServer {
    /// Bind `addr` and start serving. Use port 0 for an OS-assigned port.
    pub async fn start(host: Arc<BridgeHost>, addr: SocketAddr) -> Result<BridgeServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        info!("Bridge server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            host,
            shutdown_rx,
            conn_shutdown_rx,
            Arc::clone(&active_connections),
        ));

        Ok(BridgeServerHandle {
            addr,
            port: addr.port(),
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            active_connections,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        host: Arc<BridgeHost>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Bridge server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= TransportConfig::MAX_CONNECTIONS {
                                warn!(
                                    "Rejecting driver connection from {}: at max capacity ({})",
                                    peer_addr,
                                    TransportConfig::MAX_CONNECTIONS
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let host = Arc::clone(&host);
                            let conns = Arc::clone(&active_connections);
                            let conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("Driver connected from {}", peer_addr);
                                if let Err(e) = Self::handle_connection(stream, &host, conn_shutdown).await {
                                    debug!("Driver connection {} ended: {}", peer_addr, e);
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Bridge accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        host: &BridgeHost,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        let (connection, incoming) = Connection::open(stream)?;
        let invoker: Arc<dyn CallbackInvoker> = Arc::new(ConnectionInvoker::new(&connection));
        let session = host.open_session(Some(invoker));
        let dispatch = Arc::new(BridgeDispatch::new(
            Arc::clone(host.dispatcher()),
            host.operations(session.clone()),
        ));

        let result = connection.serve(incoming, dispatch, shutdown_rx).await;
        session.close().await;
        result
    }
}
