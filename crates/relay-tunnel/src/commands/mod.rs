//! CLI subcommand implementations.

pub mod forward;
pub mod listen;
pub mod token;

use anyhow::{Context, Result};
use relay_tunnel::{Config, TunnelOptions};
use relay_core::SessionId;
use url::Url;

/// Session arguments shared by `forward` and `listen`.
#[derive(clap::Args, Debug)]
pub struct SessionArgs {
    /// Relay base URL (falls back to `relay_url` in the config file)
    #[arg(long)]
    pub relay: Option<String>,

    /// Session id agreed with the other side
    #[arg(long)]
    pub session: SessionId,

    /// Access token agreed with the other side
    #[arg(long)]
    pub token: String,

    /// Seconds the relay waits for the other side
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl SessionArgs {
    pub fn into_options(self, cfg: &Config) -> Result<TunnelOptions> {
        let raw = self
            .relay
            .or_else(|| cfg.tunnel.relay_url.clone())
            .context("no relay URL: pass --relay or set tunnel.relay_url in the config file")?;
        let relay_url: Url = raw
            .parse()
            .with_context(|| format!("invalid relay URL '{raw}'"))?;
        Ok(TunnelOptions {
            relay_url,
            session_id: self.session,
            access_token: self.token,
            handshake_timeout: self.timeout,
            retry: cfg.retry_policy(),
        })
    }
}

/// Resolves on Ctrl+C.
pub async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
