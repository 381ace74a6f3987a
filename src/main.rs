//! Global preview proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌───────────────────────────────────────────────────────┐
//!                    │                     GLOBAL PROXY                      │
//!   Client Request   │  ┌─────────┐    ┌──────────┐    ┌──────────────────┐  │
//!   ─────────────────┼─▶│  http   │───▶│ routing  │───▶│ http::transport  │──┼──▶ Sandbox
//!                    │  │ server  │    │ resolver │    │ http::websocket  │  │    origin
//!                    │  └─────────┘    └────┬─────┘    └────────┬─────────┘  │
//!                    │                      │ Direct            │            │
//!   Client Response  │                      ▼                   ▼            │
//!   ◀────────────────┼──────────── apex / 400 / 404 /    rewrite + security   │
//!                    │             508 / service worker   ::headers          │
//!                    │                                                       │
//!                    │  config · observability · lifecycle · error           │
//!                    └───────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use global_proxy::config::{load_config, ProxyConfig};
use global_proxy::lifecycle::{wait_for_signal, Shutdown};
use global_proxy::observability::{logging, metrics};
use global_proxy::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "global-proxy", version, about = "Edge proxy for sandbox previews")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "GLOBAL_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding `listener.bind_address`.
    #[arg(short, long, env = "GLOBAL_PROXY_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "global-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        public_domains = ?config.routing.public_domains,
        request_timeout_secs = config.timeouts.request_secs,
        upstream_override = ?config.upstream.host_override,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config)?;
    let server_shutdown = shutdown.subscribe();
    let server_task = tokio::spawn(server.run(listener, server_shutdown));

    wait_for_signal().await;
    shutdown.trigger();
    server_task.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}
