use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::PrimaryAxisSource;

/// A regulatory instrument tracked across versions.
///
/// `primary_axis` is only ever written by an authoritative source: the upload
/// itself, the deterministic rule, or an explicit suggestion promotion.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub jurisdiction: String,
    pub regulation_family: String,
    pub instrument_type: String,
    pub primary_axis: String,
    pub primary_axis_source: PrimaryAxisSource,
    /// Currently published version, if any.
    pub latest_version_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for registering a document. When `primary_axis` is `None` the
/// deterministic rule decides.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct NewDocument {
    pub title: String,
    pub jurisdiction: String,
    pub regulation_family: String,
    pub instrument_type: String,
    pub primary_axis: Option<String>,
}
