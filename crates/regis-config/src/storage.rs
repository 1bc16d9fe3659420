//! Blob storage configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which `object_store` backend holds evidence and artifact blobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Files under `storage.root`.
    #[default]
    Local,
    /// Process-local, lost on exit. Tests and dry runs.
    Memory,
}

fn default_root() -> PathBuf {
    PathBuf::from(".regis/blobs")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub mode: StorageMode,

    /// Root directory for `local` mode.
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::default(),
            root: default_root(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_correct() {
        let config = StorageConfig::default();
        assert_eq!(config.mode, StorageMode::Local);
        assert_eq!(config.root, PathBuf::from(".regis/blobs"));
    }
}
