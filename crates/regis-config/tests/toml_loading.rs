//! Integration tests for TOML configuration loading.
//!
//! Uses figment::Jail for safe, sandboxed env var manipulation.

use std::path::PathBuf;

use figment::{
    Figment, Jail,
    providers::{Env, Format, Serialized, Toml},
};
use pretty_assertions::assert_eq;
use regis_config::{RegisConfig, StorageMode};

#[test]
fn loads_sections_from_toml() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
[database]
path = "/var/lib/regis/regis.db"

[storage]
mode = "memory"
root = "/var/lib/regis/blobs"

[ingest]
max_upload_mb = 10
required_fields = ["title"]

[cache]
generator_timeout_secs = 30
wait_grace_ms = 250

[retry]
max_attempts = 2
base_delay_ms = 10
max_delay_ms = 40

[ledger]
verify_on_open = false
"#,
        )?;

        let config: RegisConfig = Figment::from(Serialized::defaults(RegisConfig::default()))
            .merge(Toml::file("config.toml"))
            .extract()?;

        assert_eq!(config.database.path, PathBuf::from("/var/lib/regis/regis.db"));
        assert_eq!(config.storage.mode, StorageMode::Memory);
        assert_eq!(config.storage.root, PathBuf::from("/var/lib/regis/blobs"));
        assert_eq!(config.ingest.max_upload_mb, 10);
        assert_eq!(config.ingest.required_fields, vec!["title".to_string()]);
        assert_eq!(config.cache.generator_timeout_secs, 30);
        assert_eq!(config.cache.wait_grace_ms, 250);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.max_delay_ms, 40);
        assert!(!config.ledger.verify_on_open);
        Ok(())
    });
}

#[test]
fn partial_toml_keeps_defaults() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
[cache]
generator_timeout_secs = 5
"#,
        )?;

        let config: RegisConfig = Figment::from(Serialized::defaults(RegisConfig::default()))
            .merge(Toml::file("config.toml"))
            .extract()?;

        assert_eq!(config.cache.generator_timeout_secs, 5);
        assert_eq!(config.cache.wait_grace_ms, 500);
        assert_eq!(config.ingest.max_upload_mb, 50);
        assert_eq!(config.storage.mode, StorageMode::Local);
        Ok(())
    });
}

#[test]
fn env_beats_toml() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
[ingest]
max_upload_mb = 10
"#,
        )?;
        jail.set_env("REGIS_INGEST__MAX_UPLOAD_MB", "75");

        let config: RegisConfig = Figment::from(Serialized::defaults(RegisConfig::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("REGIS_").split("__"))
            .extract()?;

        assert_eq!(config.ingest.max_upload_mb, 75);
        Ok(())
    });
}

#[test]
fn project_config_file_is_picked_up() {
    Jail::expect_with(|jail| {
        jail.create_dir(".regis")?;
        jail.create_file(
            ".regis/config.toml",
            r#"
[storage]
mode = "memory"
"#,
        )?;

        let config = RegisConfig::load().expect("config loads");
        assert_eq!(config.storage.mode, StorageMode::Memory);
        Ok(())
    });
}
