use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Load configuration from file with environment variable overrides
///
/// Environment variables use the `NUTSANDBOLTS_` prefix with `__` between
/// sections, e.g. `NUTSANDBOLTS_PROCESS__WORKERS=8`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Missing(path.to_path_buf()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("NUTSANDBOLTS_").split("__"))
        .extract()
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

    Ok(config)
}

/// Load configuration from defaults and environment variables only
///
/// Used when no configuration file is present.
pub fn load_config_from_env() -> Result<Config, ConfigError> {
    Figment::from(Serialized::defaults(Config::default()))
        .merge(Env::prefixed("NUTSANDBOLTS_").split("__"))
        .extract()
        .map_err(|e| ConfigError::Invalid(e.to_string()))
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Invalid(e.to_string()))
}
