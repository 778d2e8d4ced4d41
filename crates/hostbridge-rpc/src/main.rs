//! Hostbridge RPC host - exposes the sample assembly to drivers.
//!
//! Drivers connect over the bridge's TCP transport. An optional HTTP status
//! surface reports health and the registered capabilities.

mod sample;
mod status;

use anyhow::Result;
use clap::Parser;
use hostbridge::ipc::BridgeServer;
use hostbridge::BridgeHost;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "hostbridge-rpc")]
#[command(about = "Bridge host serving the sample assembly")]
struct Args {
    /// Bridge port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Serve the HTTP status surface on this port (0 = auto-assign)
    #[arg(long)]
    http_port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --debug
    let default_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting hostbridge RPC host");

    let host = Arc::new(BridgeHost::builder().assembly(sample::assembly()).build()?);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let server = BridgeServer::start(Arc::clone(&host), addr).await?;

    // Parent processes read the ports from stdout
    println!("BRIDGE_PORT={}", server.port);

    if let Some(http_port) = args.http_port {
        let http_addr = status::start_status_server(Arc::clone(&host), server.addr(), &args.host, http_port).await?;
        println!("HTTP_PORT={}", http_addr.port());
    }

    info!("Bridge host running on {}", server.addr());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}
