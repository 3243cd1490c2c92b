//! Tunnel configuration at `~/.relay/tunnel.toml`.
//!
//! CLI flags always override config file values.

use crate::tunnel::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tunnel: TunnelSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelSection {
    /// Relay base URL, e.g. `ws://relay.example:8080`.
    #[serde(default)]
    pub relay_url: Option<String>,

    /// Attempts for the local connect or bind.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for TunnelSection {
    fn default() -> Self {
        Self {
            relay_url: None,
            connect_retries: default_connect_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_connect_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let path = expand_tilde(path);
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.tunnel.connect_retries.max(1),
            delay: Duration::from_millis(self.tunnel.retry_delay_ms),
        }
    }
}

/// Expand a leading `~` to the home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert!(cfg.tunnel.relay_url.is_none());
        assert_eq!(cfg.tunnel.connect_retries, 3);
        assert_eq!(cfg.retry_policy().delay, Duration::from_secs(1));
    }

    #[test]
    fn partial_file_keeps_field_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[tunnel]\nrelay_url = \"ws://relay.example:8080\"").unwrap();

        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.tunnel.relay_url.as_deref(), Some("ws://relay.example:8080"));
        assert_eq!(cfg.tunnel.retry_delay_ms, 1000);
    }

    #[test]
    fn zero_retries_still_tries_once() {
        let cfg: Config = toml::from_str("[tunnel]\nconnect_retries = 0").unwrap();
        assert_eq!(cfg.retry_policy().attempts, 1);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[tunnel]\nconnect_retries = \"many\"").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config"));
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/.relay/tunnel.toml")), home.join(".relay/tunnel.toml"));
        }
        assert_eq!(expand_tilde(Path::new("/etc/x.toml")), PathBuf::from("/etc/x.toml"));
    }
}
