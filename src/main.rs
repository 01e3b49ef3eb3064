//! WebSocket Mock Server
//!
//! Development-time stand-in for a real backend. Relays API requests from
//! clients to dashboard operators and routes their answers back, fans out
//! plain messages, and runs a controllable UDP broadcaster.

mod actions;
mod broadcast;
mod config;
mod net;
mod server;
mod session;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{CliOverrides, MockConfig};
use server::WebSocketServer;

/// WebSocket Mock Server
///
/// Relays WebSocket request/response and broadcast flows without a backend
#[derive(Parser, Debug)]
#[command(name = "ws-mock-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Periodically broadcast the server address over UDP
    #[arg(long)]
    announce: bool,

    /// Answer API requests locally when no other client is connected
    #[arg(long)]
    auto_reply: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();

    info!("WebSocket Mock Server v{}", env!("CARGO_PKG_VERSION"));

    let config = MockConfig::load(args.config.as_deref())?.apply_overrides(CliOverrides {
        bind: args.bind,
        port: args.port,
        announce: args.announce,
        auto_reply: args.auto_reply,
    });

    if config.mock.auto_reply {
        info!("Auto-reply enabled for unanswered API requests");
    }

    let server = Arc::new(WebSocketServer::new(config));
    let server_handle = Arc::clone(&server);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown...");
        server_handle.shutdown();
    });

    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
