//! Storage authority configuration loaded from TOML, then overridden by
//! `OCS_*` environment variables.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Height cap used by the reference authority.
pub const DEFAULT_MAX_HEIGHT: u8 = 8;

/// Seconds between GC sweeps.
pub const DEFAULT_GC_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AuthorityConfig {
    /// HTTP bind address (e.g. "127.0.0.1:3001").
    pub bind_addr: String,

    /// JSON state document (signing key + snapshots).
    pub state_path: PathBuf,

    /// Largest tree height `store` accepts.
    pub max_height: u8,

    pub gc_interval_secs: u64,

    /// Ledger RPC base URL. GC is disabled when absent.
    pub ledger_url: Option<String>,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        AuthorityConfig {
            bind_addr: "127.0.0.1:3001".to_string(),
            state_path: PathBuf::from("./data/authority_state.json"),
            max_height: DEFAULT_MAX_HEIGHT,
            gc_interval_secs: DEFAULT_GC_INTERVAL_SECS,
            ledger_url: None,
        }
    }
}

impl AuthorityConfig {
    /// Applies `OCS_BIND_ADDR`, `OCS_STATE_PATH`, `OCS_MAX_HEIGHT`,
    /// `OCS_GC_INTERVAL_SECS` and `OCS_LEDGER_URL` when set.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// [`apply_env_overrides`](Self::apply_env_overrides) with the
    /// environment replaced by `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("OCS_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("OCS_STATE_PATH") {
            self.state_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("OCS_MAX_HEIGHT") {
            self.max_height = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "OCS_MAX_HEIGHT".to_string(),
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("OCS_GC_INTERVAL_SECS") {
            self.gc_interval_secs = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "OCS_GC_INTERVAL_SECS".to_string(),
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("OCS_LEDGER_URL") {
            self.ledger_url = Some(v).filter(|s| !s.trim().is_empty());
        }
        Ok(())
    }
}

/// Load config from a TOML file path. Missing keys take their defaults.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<AuthorityConfig, ConfigError> {
    let s = fs::read_to_string(path.as_ref())?;
    let cfg: AuthorityConfig = toml::from_str(&s)?;
    Ok(cfg)
}
