//! relay-tunnel: bridges a local TCP port to a relay session.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;

/// relay-tunnel: TCP over a session relay
#[derive(Parser)]
#[command(name = "relay-tunnel", version, about = "Carry a TCP connection through a session relay")]
struct Cli {
    /// Config file path
    #[arg(long, global = true, default_value = "~/.relay/tunnel.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Device side: connect to 127.0.0.1:<port> and join as responder
    Forward {
        #[command(flatten)]
        session: commands::SessionArgs,

        /// Local service port
        #[arg(long)]
        port: u16,
    },

    /// Viewer side: accept one client on 127.0.0.1:<port> and join as requester
    Listen {
        #[command(flatten)]
        session: commands::SessionArgs,

        /// Local listen port
        #[arg(long)]
        port: u16,
    },

    /// Print a fresh session id and access token
    Token,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match relay_tunnel::Config::load(&PathBuf::from(&cli.config)) {
        Ok(cfg) => match cli.command {
            Command::Forward { session, port } => commands::forward::run(session, port, &cfg).await,
            Command::Listen { session, port } => commands::listen::run(session, port, &cfg).await,
            Command::Token => commands::token::run().await,
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("relay-tunnel: {e:#}");
        std::process::exit(1);
    }
}
