use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A registered prompt template, identified by the hash of its text.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Prompt {
    pub prompt_hash: String,
    pub name: String,
    pub version: String,
    pub template: String,
    pub created_at: DateTime<Utc>,
}
