use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::entities::ArtifactRef;
use crate::enums::VersionStatus;
use crate::hashing::ContentHash;

/// One revision of a document, backed by a stored evidence blob.
///
/// Versions are never deleted. `parent_version_id` always names a version of
/// the same document that existed before this one, so lineage is acyclic.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct DocumentVersion {
    pub id: String,
    pub document_id: String,
    pub parent_version_id: Option<String>,
    pub status: VersionStatus,
    pub raw_content_hash: ContentHash,
    pub evidence_id: String,
    pub metadata: VersionMetadata,
    /// Attached derived artifacts keyed by [`ArtifactRef::key`].
    pub artifacts: BTreeMap<String, ArtifactRef>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Descriptive, caller-supplied version metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct VersionMetadata {
    pub version_label: Option<String>,
    pub effective_date: Option<NaiveDate>,
    pub original_filename: Option<String>,
}
