//! Errors raised while loading [`crate::RegisConfig`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A TOML file or `REGIS_*` variable could not be parsed or merged.
    #[error("Failed to load regis config: {0}")]
    Figment(#[from] figment::Error),

    /// A value parsed but would leave the store unusable.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
