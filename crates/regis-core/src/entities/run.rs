use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::entities::GeneratorIdentity;
use crate::enums::RunStatus;
use crate::hashing::InputFingerprint;

/// One execution of an external generator. The unit of memoization.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct GenerativeRun {
    pub id: String,
    pub version_id: String,
    pub purpose: String,
    pub generator: GeneratorIdentity,
    pub prompt_hash: Option<String>,
    pub input_fingerprint: InputFingerprint,
    /// Set once the run succeeds.
    pub artifact_id: Option<String>,
    pub status: RunStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
