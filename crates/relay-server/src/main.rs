//! relay-server: pairs two WebSocket callers per session and relays frames
//! between them.

use clap::Parser;
use relay_core::CreatePolicy;
use relay_server::{Overrides, RelayServer, ServerConfig};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// relay-server: session relay
#[derive(Parser, Debug)]
#[command(name = "relay-server", version, about = "WebSocket session relay")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Config file path
    #[arg(long, default_value = "~/.relay/config.toml")]
    config: String,

    /// Maximum concurrent sessions (0 = unlimited)
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Default seconds to wait for a partner
    #[arg(long)]
    handshake_timeout: Option<u64>,

    /// Only initiators may create sessions
    #[arg(long)]
    initiator_only: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting relay-server");

    let overrides = Overrides {
        port: cli.port,
        bind: cli.bind,
        max_sessions: cli.max_sessions,
        handshake_timeout: cli.handshake_timeout,
        create_policy: cli.initiator_only.then_some(CreatePolicy::InitiatorOnly),
    };
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %format!("{e:#}"), "failed to load config");
            std::process::exit(1);
        }
    };

    let server = Arc::new(RelayServer::new(server_config));
    let listener = match server.bind().await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    };

    tokio::select! {
        _ = server.clone().serve(listener) => {}
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    server.shutdown().await;
    info!("relay-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler, waiting for Ctrl+C only");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
