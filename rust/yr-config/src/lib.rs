//! Layered configuration for the control-plane daemons: defaults, overridden
//! by a TOML file, overridden by `YR_*` environment variables (spec §6.3).

mod config;
mod env;

pub use config::{load_config, ConfigError, Config};
pub use env::apply_env_overrides;
