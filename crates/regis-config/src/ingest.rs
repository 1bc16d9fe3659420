//! Upload rules.

use serde::{Deserialize, Serialize};

const fn default_max_upload_mb() -> u64 {
    50
}

fn default_required_fields() -> Vec<String> {
    ["title", "jurisdiction", "regulation_family", "instrument_type"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Largest accepted upload, in MiB.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,

    /// Document metadata fields that must be present and non-blank.
    #[serde(default = "default_required_fields")]
    pub required_fields: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_upload_mb: default_max_upload_mb(),
            required_fields: default_required_fields(),
        }
    }
}

impl IngestConfig {
    pub const fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}
