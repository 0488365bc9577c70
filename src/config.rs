//! Client configuration loading.
//!
//! Settings come from (lowest to highest precedence) built-in defaults, an
//! optional JSON file, and `CISIP2_*` environment variables. The CLI applies
//! its own flags on top.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_IN_FLIGHT, DEFAULT_PORT, DEFAULT_READ_BUFFER_SIZE,
};

/// Connection settings for a receiver.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Receiver hostname or IP address.
    pub host: String,
    /// Receiver control port.
    pub port: u16,
    /// Maximum requests awaiting a reply at once.
    pub max_in_flight: usize,
    /// Seconds to wait for the TCP handshake.
    pub connect_timeout_secs: u64,
    /// Seconds to wait for each reply. `None` waits until the connection drops.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    /// Bytes per transport read.
    pub read_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            request_timeout_secs: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl ClientConfig {
    /// Defaults pointed at `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Load configuration from `path` (if given) and apply environment overrides.
    ///
    /// A missing file is not an error; an unreadable or invalid one is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::load_from_file(path)?,
            Some(path) => {
                log::debug!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parse config file {}", path.display()))
    }

    /// Apply `CISIP2_*` overrides using `lookup` to read variables.
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("CISIP2_HOST") {
            self.host = host;
        }

        if let Some(port) = lookup("CISIP2_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.port = port;
            }
        }

        if let Some(max) = lookup("CISIP2_MAX_IN_FLIGHT") {
            if let Ok(max) = max.parse::<usize>() {
                self.max_in_flight = max;
            }
        }

        if let Some(timeout) = lookup("CISIP2_CONNECT_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.connect_timeout_secs = secs;
            }
        }

        if let Some(timeout) = lookup("CISIP2_REQUEST_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                // 0 disables the timeout
                self.request_timeout_secs = (secs > 0).then_some(secs);
            }
        }
    }

    /// Persist this configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("write config file {}", path.display()))
    }

    /// Handshake timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Per-request reply timeout, if configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}
