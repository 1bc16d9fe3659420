//! Typed audit detail payloads.
//!
//! Each ledger event carries a structured `details` JSON blob. These types fix
//! the shape of the payloads the store writes, so that the read-model
//! projection can replay them without guessing.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::entities::{ArtifactRef, Document};
use crate::enums::{PrimaryAxisSource, VersionStatus};

/// Detail for `AuditAction::Created` on a document. Carries the full document
/// so the initial authoritative axis is always recoverable from the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct DocumentCreatedDetail {
    pub document: Document,
}

/// Detail for `AuditAction::Created` on a version.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct VersionCreatedDetail {
    pub document_id: String,
    pub parent_version_id: Option<String>,
    pub raw_content_hash: String,
    pub evidence_id: String,
    pub status: VersionStatus,
}

/// Detail for `AuditAction::StatusChanged`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct StatusChangedDetail {
    pub document_id: String,
    pub from: VersionStatus,
    pub to: VersionStatus,
}

/// Detail for `AuditAction::Superseded`, emitted in the same transaction as
/// the publish that caused it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct SupersededDetail {
    pub document_id: String,
    pub superseded_by: String,
}

/// Detail for `AuditAction::ArtifactAttached`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ArtifactAttachedDetail {
    pub artifact: ArtifactRef,
}

/// Detail for `AuditAction::EvidenceStored`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct EvidenceStoredDetail {
    pub sha256: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub storage_uri: String,
}

/// Detail for `AuditAction::ArtifactRecorded`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ArtifactRecordedDetail {
    pub version_id: String,
    pub generator_name: String,
    pub generator_version: String,
    pub input_fingerprint: String,
    pub content_hash: String,
}

/// Detail for `AuditAction::RunStarted`, `RunSucceeded` and `RunFailed`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct RunDetail {
    pub purpose: String,
    pub model: String,
    pub input_fingerprint: String,
    pub artifact_id: Option<String>,
    pub error: Option<String>,
}

/// Detail for `AuditAction::AxisSuggested`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AxisSuggestedDetail {
    pub version_id: String,
    pub axis: String,
    pub model: String,
    pub confidence: f64,
}

/// Detail for `AuditAction::AxisPromoted`. Records the axis being replaced so
/// the prior authoritative value stays retrievable.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AxisPromotedDetail {
    pub suggestion_id: String,
    pub from_axis: String,
    pub from_source: PrimaryAxisSource,
    pub to_axis: String,
    pub confidence: f64,
}

/// Detail for `AuditAction::PromptRegistered`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct PromptRegisteredDetail {
    pub name: String,
    pub version: String,
}
