//! Server configuration: TOML file + CLI overrides.

use anyhow::{bail, Context, Result};
use relay_core::{CoordinatorConfig, CreatePolicy};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::request::TimeoutLimits;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub relay: RelaySection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// `[relay]` section of the config TOML. Durations are in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,
    #[serde(default = "default_max_handshake_timeout")]
    pub max_handshake_timeout: u64,
    #[serde(default = "default_close_timeout")]
    pub close_timeout: u64,
    #[serde(default)]
    pub create_policy: CreatePolicy,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            handshake_timeout: default_handshake_timeout(),
            max_handshake_timeout: default_max_handshake_timeout(),
            close_timeout: default_close_timeout(),
            create_policy: CreatePolicy::default(),
        }
    }
}

fn default_port() -> u16 {
    8080
}
fn default_bind() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_max_sessions() -> usize {
    1000
}
fn default_handshake_timeout() -> u64 {
    20
}
fn default_max_handshake_timeout() -> u64 {
    300
}
fn default_close_timeout() -> u64 {
    10
}

/// Values given on the command line; each one wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub bind: Option<IpAddr>,
    pub max_sessions: Option<usize>,
    pub handshake_timeout: Option<u64>,
    pub create_policy: Option<CreatePolicy>,
}

/// Resolved server configuration (file loaded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// 0 = unlimited.
    pub max_sessions: usize,
    pub handshake_timeout: Duration,
    pub max_handshake_timeout: Duration,
    pub close_timeout: Duration,
    pub create_policy: CreatePolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_file(ConfigFile::default(), Overrides::default())
    }
}

impl ServerConfig {
    /// Load config from a TOML file, then apply CLI overrides.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)
                        .with_context(|| format!("cannot read {}", expanded.display()))?;
                    toml::from_str::<ConfigFile>(&content)
                        .with_context(|| format!("config parse error in {}", expanded.display()))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let config = Self::from_file(file_config, overrides);
        config.validate()?;
        Ok(config)
    }

    fn from_file(file: ConfigFile, overrides: Overrides) -> Self {
        let port = overrides.port.unwrap_or(file.server.port);
        let bind = overrides.bind.unwrap_or(file.server.bind);
        Self {
            bind_addr: SocketAddr::new(bind, port),
            max_sessions: overrides.max_sessions.unwrap_or(file.server.max_sessions),
            handshake_timeout: Duration::from_secs(
                overrides
                    .handshake_timeout
                    .unwrap_or(file.relay.handshake_timeout),
            ),
            max_handshake_timeout: Duration::from_secs(file.relay.max_handshake_timeout),
            close_timeout: Duration::from_secs(file.relay.close_timeout),
            create_policy: overrides.create_policy.unwrap_or(file.relay.create_policy),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.handshake_timeout.is_zero() {
            bail!("handshake_timeout must be at least 1 second");
        }
        if self.close_timeout.is_zero() {
            bail!("close_timeout must be at least 1 second");
        }
        if self.handshake_timeout > self.max_handshake_timeout {
            bail!(
                "handshake_timeout ({}s) exceeds max_handshake_timeout ({}s)",
                self.handshake_timeout.as_secs(),
                self.max_handshake_timeout.as_secs()
            );
        }
        Ok(())
    }

    pub fn timeout_limits(&self) -> TimeoutLimits {
        TimeoutLimits {
            default: self.handshake_timeout,
            max: self.max_handshake_timeout,
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            close_timeout: self.close_timeout,
            create_policy: self.create_policy,
            max_sessions: self.max_sessions,
            ..CoordinatorConfig::default()
        }
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
