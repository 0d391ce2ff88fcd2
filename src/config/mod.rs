//! Configuration management.
//!
//! Negotiation policy comes from a TOML file. The file is optional: every
//! field has a working default, and mechanism lists can additionally be
//! overridden per-process through the environment (see the catalog module).
//!
//! Default file location is `secneg/config.toml` under the platform config
//! directory, overridable with `SECNEG_CONFIG`.
//!
//! ```toml
//! [negotiation]
//! mechanisms = "GSI KRB5 PLAIN"
//! accepted_mechanisms = "GSI KRB5"
//! timeout_secs = 20
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SecError};

/// Environment variable naming an explicit config file path.
pub const ENV_CONFIG_PATH: &str = "SECNEG_CONFIG";

/// Default per-call socket timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Negotiation policy
    #[serde(default)]
    pub negotiation: NegotiationConfig,
}

/// Mechanism lists and timing for the negotiation exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationConfig {
    /// Mechanisms this side offers as a client, whitespace-separated in
    /// preference order. Unset falls back to the built-in default.
    #[serde(default)]
    pub mechanisms: Option<String>,

    /// Mechanisms this side accepts as a server. Same format as
    /// `mechanisms`; unset falls back to the built-in default.
    #[serde(default)]
    pub accepted_mechanisms: Option<String>,

    /// Per-call socket timeout in seconds. Bounds each individual read or
    /// write, not the exchange as a whole.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            mechanisms: None,
            accepted_mechanisms: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SecError::Config(format!("failed to read {}: {e}", path.display())))?;
        Ok(toml::from_str(&content)?)
    }

    /// Resolve and load the active configuration: the `SECNEG_CONFIG` path
    /// if set, else the platform default location if the file exists, else
    /// built-in defaults.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            return Self::from_file(path);
        }
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::from_file(path);
            }
        }
        Ok(Self::default())
    }

    /// `secneg/config.toml` under the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("secneg").join("config.toml"))
    }

    /// Per-call socket timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation.timeout_secs)
    }
}
