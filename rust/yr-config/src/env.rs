//! `YR_*` environment variable overrides, applied after the file layer and
//! before validation.

use crate::config::{Config, ConfigError};

macro_rules! override_u64 {
    ($config:expr, $field:ident, $env_key:literal) => {
        if let Ok(raw) = std::env::var($env_key) {
            $config.$field = raw.parse().map_err(|_| ConfigError::Validation {
                field: stringify!($field).into(),
                reason: format!("{} is not a valid integer: {raw}", $env_key),
            })?;
        }
    };
}

pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    override_u64!(config, reserved_timeout_ms, "YR_RESERVED_TIMEOUT_MS");
    override_u64!(config, heartbeat_timeout_ms, "YR_HEARTBEAT_TIMEOUT_MS");
    override_u64!(config, register_retry_min_ms, "YR_REGISTER_RETRY_MIN_MS");
    override_u64!(config, register_retry_max_ms, "YR_REGISTER_RETRY_MAX_MS");

    if let Ok(raw) = std::env::var("YR_REGISTER_MAX_ATTEMPTS") {
        config.register_max_attempts = raw.parse().map_err(|_| ConfigError::Validation {
            field: "register_max_attempts".into(),
            reason: format!("YR_REGISTER_MAX_ATTEMPTS is not a valid integer: {raw}"),
        })?;
    }
    if let Ok(raw) = std::env::var("YR_META_STORE_MAX_FLUSH_CONCURRENCY") {
        config.meta_store_max_flush_concurrency =
            raw.parse().map_err(|_| ConfigError::Validation {
                field: "meta_store_max_flush_concurrency".into(),
                reason: format!("not a valid integer: {raw}"),
            })?;
    }
    if let Ok(raw) = std::env::var("YR_META_STORE_MAX_FLUSH_BATCH_SIZE") {
        config.meta_store_max_flush_batch_size =
            raw.parse().map_err(|_| ConfigError::Validation {
                field: "meta_store_max_flush_batch_size".into(),
                reason: format!("not a valid integer: {raw}"),
            })?;
    }
    if let Ok(raw) = std::env::var("YR_ENABLE_SYNC_SYS_FUNC") {
        config.enable_sync_sys_func = matches!(raw.as_str(), "1" | "true" | "TRUE" | "yes");
    }

    override_u64!(config, lease_sweep_interval_ms, "YR_LEASE_SWEEP_INTERVAL_MS");
    override_u64!(config, code_package_aging_sec, "YR_CODE_PACKAGE_AGING_SEC");

    if let Ok(raw) = std::env::var("YR_MAX_RETRY_SEND_CLEAN_STATUS") {
        config.max_retry_send_clean_status =
            raw.parse().map_err(|_| ConfigError::Validation {
                field: "max_retry_send_clean_status".into(),
                reason: format!("not a valid integer: {raw}"),
            })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // std::env::set_var mutates process-global state; serialize the tests
    // that touch it so they don't race each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn env_overrides_take_precedence() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("YR_RESERVED_TIMEOUT_MS", "9000");
        let mut config = Config::default();
        apply_env_overrides(&mut config).unwrap();
        assert_eq!(config.reserved_timeout_ms, 9000);
        std::env::remove_var("YR_RESERVED_TIMEOUT_MS");
    }

    #[test]
    fn invalid_env_value_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("YR_RESERVED_TIMEOUT_MS", "not-a-number");
        let mut config = Config::default();
        assert!(apply_env_overrides(&mut config).is_err());
        std::env::remove_var("YR_RESERVED_TIMEOUT_MS");
    }
}
