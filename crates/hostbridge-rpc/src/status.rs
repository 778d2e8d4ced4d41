//! HTTP status surface using Axum.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use hostbridge::BridgeHost;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

const MAX_CONCURRENT_REQUESTS: usize = 32;

/// State shared across status handlers.
pub struct AppState {
    pub host: Arc<BridgeHost>,
    pub bridge_addr: SocketAddr,
}

pub async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "bridgePort": state.bridge_addr.port(),
    }))
}

pub async fn handle_capabilities(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let capabilities = state.host.dispatcher().capability_ids();
    Json(json!({
        "count": capabilities.len(),
        "capabilities": capabilities,
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/capabilities", get(handle_capabilities))
        .layer(cors)
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .with_state(state)
}

/// Start the status server in the background.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_status_server(
    host: Arc<BridgeHost>,
    bridge_addr: SocketAddr,
    bind_host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    let app = router(Arc::new(AppState { host, bridge_addr }));

    let addr: SocketAddr = format!("{}:{}", bind_host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Status server listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Status server error: {}", e);
        }
    });

    Ok(actual_addr)
}
