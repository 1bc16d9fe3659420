//! # regis-config
//!
//! Layered configuration loading for Regis using figment.
//!
//! Configuration sources (in priority order, highest wins):
//! 1. Environment variables (`REGIS_*` prefix, `__` as separator)
//! 2. Project-level `.regis/config.toml`
//! 3. User-level `~/.config/regis/config.toml`
//! 4. Built-in defaults
//!
//! # Environment Variable Mapping
//!
//! Figment maps `REGIS_DATABASE__PATH` -> `database.path`,
//! `REGIS_CACHE__GENERATOR_TIMEOUT_SECS` -> `cache.generator_timeout_secs`, etc.
//! The `__` (double underscore) separates nested config sections.
//!
//! # Usage
//!
//! ```no_run
//! use regis_config::RegisConfig;
//!
//! let config = RegisConfig::load_with_dotenv().expect("config");
//! println!("database: {}", config.database.path.display());
//! ```

mod cache;
mod database;
mod error;
mod ingest;
mod ledger;
mod retry;
mod storage;

pub use cache::CacheConfig;
pub use database::DatabaseConfig;
pub use error::ConfigError;
pub use ingest::IngestConfig;
pub use ledger::LedgerConfig;
pub use retry::RetrySettings;
pub use storage::{StorageConfig, StorageMode};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RegisConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

impl RegisConfig {
    /// Load configuration from all sources (TOML files + environment variables).
    ///
    /// Does NOT call `dotenvy`; use [`Self::load_with_dotenv`] for `.env` support.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Figment` on malformed sources and
    /// `ConfigError::InvalidValue` when a value fails [`Self::validate`].
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration after reading `.env` from the current directory.
    ///
    /// # Errors
    ///
    /// Same as [`Self::load`].
    pub fn load_with_dotenv() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::load()
    }

    /// Build the figment provider chain.
    ///
    /// Public so tests can inspect the figment or layer more providers on top.
    #[must_use]
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Layer 1: User-global config
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                figment = figment.merge(Toml::file(global_path));
            }
        }

        // Layer 2: Project-local config
        let local_path = PathBuf::from(".regis/config.toml");
        if local_path.exists() {
            figment = figment.merge(Toml::file(local_path));
        }

        // Layer 3: Environment variables (highest priority)
        figment.merge(Env::prefixed("REGIS_").split("__"))
    }

    /// Reject values that would make the store unusable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest.max_upload_mb == 0 {
            return Err(invalid("ingest.max_upload_mb", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(invalid(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        if self.cache.generator_timeout_secs == 0 {
            return Err(invalid("cache.generator_timeout_secs", "must be at least 1"));
        }
        Ok(())
    }

    /// Path to the user-global config file.
    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("regis").join("config.toml"))
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RegisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.mode, StorageMode::Local);
        assert!(config.ledger.verify_on_open);
    }

    #[test]
    fn figment_builds_without_files() {
        figment::Jail::expect_with(|_jail| {
            let config: RegisConfig = RegisConfig::figment().extract()?;
            assert_eq!(config.ingest.max_upload_mb, 50);
            assert_eq!(config.retry.max_attempts, 4);
            Ok(())
        });
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut config = RegisConfig::default();
        config.retry.max_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retry.max_attempts"));
    }

    #[test]
    fn inverted_delays_rejected() {
        let mut config = RegisConfig::default();
        config.retry.base_delay_ms = 5000;
        assert!(config.validate().is_err());
    }
}
