//! Load config from file and environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// One STUN/TURN server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// Node configuration. File: ~/.config/bitroute/config.toml or /etc/bitroute/config.toml.
/// Env overrides: BITROUTE_SIGNALING_URLS (comma-separated), BITROUTE_SHARE_URL,
/// BITROUTE_DOWNLOAD_DIR.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Relay endpoints, tried in rotation.
    pub signaling_endpoints: Vec<String>,
    /// STUN first; TURN with embedded credentials as last resort.
    pub ice_servers: Vec<IceServer>,
    /// Prefix of shareable room links.
    pub share_base_url: String,
    pub download_dir: PathBuf,
    /// Per-endpoint connect timeout (default 5000).
    pub connect_timeout_ms: u64,
    /// Full passes over the endpoint list before giving up (default 3).
    pub connect_rounds: u32,
    /// Pause between passes (default 2000).
    pub retry_delay_ms: u64,
    /// Bound on create/join from start to room ready (default 30000).
    pub room_timeout_ms: u64,
    /// Pause sending while the channel buffers more than this (default 4 MiB).
    pub high_water_mark: usize,
    pub drain_poll_ms: u64,
    /// Pause after a failed file before the next one (default 1000).
    pub error_backoff_ms: u64,
    /// Minimum time between speed samples in progress events (default 500).
    pub sample_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling_endpoints: vec![
                "ws://127.0.0.1:8787".to_string(),
                "ws://127.0.0.1:8788".to_string(),
            ],
            ice_servers: vec![
                IceServer {
                    urls: vec!["stun:stun.l.google.com:19302".to_string()],
                    username: None,
                    credential: None,
                },
                IceServer {
                    urls: vec!["turn:openrelay.metered.ca:80".to_string()],
                    username: Some("openrelayproject".to_string()),
                    credential: Some("openrelayproject".to_string()),
                },
            ],
            share_base_url: "http://localhost:8080/transfer".to_string(),
            download_dir: PathBuf::from("."),
            connect_timeout_ms: 5_000,
            connect_rounds: 3,
            retry_delay_ms: 2_000,
            room_timeout_ms: 30_000,
            high_water_mark: 4 * 1024 * 1024,
            drain_poll_ms: 10,
            error_backoff_ms: 1_000,
            sample_interval_ms: 500,
        }
    }
}

impl Config {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn room_timeout(&self) -> Duration {
        Duration::from_millis(self.room_timeout_ms)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// Load config: default, then config file (explicit path, or the first default path that
/// exists), then env vars. An explicit path that cannot be read or parsed is an error.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match explicit {
        Some(p) => read_file(p)?,
        None => load_default_file().unwrap_or_default(),
    };
    apply_env(&mut c, |k| std::env::var(k).ok());
    Ok(c)
}

/// Apply environment overrides through `get` (a lookup such as `std::env::var`).
pub fn apply_env(c: &mut Config, get: impl Fn(&str) -> Option<String>) {
    if let Some(s) = get("BITROUTE_SIGNALING_URLS") {
        let urls: Vec<String> = s
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect();
        if !urls.is_empty() {
            c.signaling_endpoints = urls;
        }
    }
    if let Some(s) = get("BITROUTE_SHARE_URL") {
        if !s.is_empty() {
            c.share_base_url = s;
        }
    }
    if let Some(s) = get("BITROUTE_DOWNLOAD_DIR") {
        if !s.is_empty() {
            c.download_dir = PathBuf::from(s);
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/bitroute/config.toml"));
    }
    out.push(PathBuf::from("/etc/bitroute/config.toml"));
    out
}

fn load_default_file() -> Option<Config> {
    let p = config_paths().into_iter().find(|p| p.exists())?;
    match read_file(&p) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!(event = "config_ignored", path = %p.display(), %e);
            None
        }
    }
}

fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
