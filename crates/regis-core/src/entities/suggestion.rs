use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Model-produced primary-axis proposal. At most one per version. Never applied
/// to the document without an explicit promotion.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AxisSuggestion {
    pub id: String,
    pub version_id: String,
    pub document_id: String,
    pub axis: String,
    pub model: String,
    pub confidence: f64,
    pub details: serde_json::Value,
    pub promoted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
