//! Configuration schema and load/validate entry point.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::env::apply_env_overrides;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {field}: {reason}")]
    Validation { field: String, reason: String },
}

/// Every recognized option from spec §6.3, grouped by the subsystem that
/// reads it. All fields have defaults, so a config file may set only the
/// ones it wants to override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reservation expiry before auto-unreserve (spec §4.8, default 120 s).
    pub reserved_timeout_ms: u64,
    /// Deadline for a pong; conventionally 2x the ping interval (spec §4.2).
    pub heartbeat_timeout_ms: u64,
    /// Registration retry backoff bounds and attempt cap (spec §4.2).
    pub register_retry_min_ms: u64,
    pub register_retry_max_ms: u64,
    pub register_max_attempts: u32,
    /// Async backup bounds for the metadata store (spec §4.1, §6.3).
    pub meta_store_max_flush_concurrency: usize,
    pub meta_store_max_flush_batch_size: usize,
    /// Whether the `/metastore-system-func/...` key tag forces a synchronous
    /// backup regardless of the request's own sync/async flag (spec §6.1).
    pub enable_sync_sys_func: bool,
    /// Lease expiry sweep interval (spec §4.1, default 500 ms).
    pub lease_sweep_interval_ms: u64,
    /// Idle time before a function agent evicts a cached code package
    /// (spec §4.5).
    pub code_package_aging_sec: u64,
    /// Attempts when tearing down an agent during eviction (spec §4.4).
    pub max_retry_send_clean_status: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            reserved_timeout_ms: 120_000,
            heartbeat_timeout_ms: 0, // derived from ping interval if left at 0
            register_retry_min_ms: 200,
            register_retry_max_ms: 30_000,
            register_max_attempts: 0, // 0 = unbounded
            meta_store_max_flush_concurrency: 4,
            meta_store_max_flush_batch_size: 128,
            enable_sync_sys_func: true,
            lease_sweep_interval_ms: 500,
            code_package_aging_sec: 600,
            max_retry_send_clean_status: 3,
        }
    }
}

/// Load order: defaults, then `path` (if given and present), then `YR_*`
/// environment variables, then validation ("env > file > defaults"
/// precedence).
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) if path.exists() => load_from_file(path)?,
        _ => Config::default(),
    };

    apply_env_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

fn load_from_file(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.reserved_timeout_ms == 0 {
        return Err(ConfigError::Validation {
            field: "reserved_timeout_ms".into(),
            reason: "must be greater than zero".into(),
        });
    }
    if config.lease_sweep_interval_ms == 0 {
        return Err(ConfigError::Validation {
            field: "lease_sweep_interval_ms".into(),
            reason: "must be greater than zero".into(),
        });
    }
    if config.register_retry_min_ms > config.register_retry_max_ms {
        return Err(ConfigError::Validation {
            field: "register_retry_min_ms".into(),
            reason: "must not exceed register_retry_max_ms".into(),
        });
    }
    if config.meta_store_max_flush_concurrency == 0 {
        return Err(ConfigError::Validation {
            field: "meta_store_max_flush_concurrency".into(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(())
}
