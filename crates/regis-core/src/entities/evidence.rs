use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::hashing::ContentHash;

/// A content-addressed blob. Exactly one record exists per distinct hash.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct EvidenceFile {
    pub id: String,
    pub sha256: ContentHash,
    pub mime_type: String,
    pub size_bytes: u64,
    pub storage_uri: String,
    pub created_at: DateTime<Utc>,
}
