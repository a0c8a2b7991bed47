//! Pipeline configuration: a TOML file with `NUTSANDBOLTS_*` environment
//! overrides.

mod loader;
mod types;
mod validate;

use std::path::PathBuf;

pub use loader::{load_config, load_config_from_env, load_config_from_str};
pub use types::*;
pub use validate::validate_config;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No config file at {}", .0.display())]
    Missing(PathBuf),

    #[error("Malformed config: {0}")]
    Invalid(String),

    #[error("Config value {field} {reason}")]
    Rejected { field: &'static str, reason: String },
}
