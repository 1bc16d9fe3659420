//! Status enums, entity types, and actions for Regis.
//!
//! Lifecycle vocabularies shared with the regulatory registry (`VersionStatus`,
//! `PrimaryAxisSource`) serialize as `SCREAMING_SNAKE_CASE`; everything else uses
//! `snake_case`. Status enums with state machines provide `allowed_next_states()`
//! to enforce valid transitions at the application layer.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// VersionStatus
// ---------------------------------------------------------------------------

/// Status of a document version through its publication lifecycle.
///
/// ```text
/// draft → under_review → published ⇢ superseded   (⇢ automatic only)
///   │          │             │
///   └──────────┴─────────────┴──→ withdrawn
/// draft → published
/// ```
///
/// `Superseded` is never a caller transition: a published version moves there
/// only when a sibling version of the same document is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionStatus {
    Draft,
    UnderReview,
    Published,
    Superseded,
    Withdrawn,
}

impl VersionStatus {
    /// States a caller may request from the current state.
    #[must_use]
    pub const fn allowed_next_states(self) -> &'static [Self] {
        match self {
            Self::Draft => &[Self::UnderReview, Self::Published, Self::Withdrawn],
            Self::UnderReview => &[Self::Published, Self::Withdrawn],
            Self::Published => &[Self::Withdrawn],
            Self::Superseded | Self::Withdrawn => &[],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.allowed_next_states().contains(&next)
    }

    /// Terminal states accept no further transitions, automatic or otherwise.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Superseded | Self::Withdrawn)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::UnderReview => "UNDER_REVIEW",
            Self::Published => "PUBLISHED",
            Self::Superseded => "SUPERSEDED",
            Self::Withdrawn => "WITHDRAWN",
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PrimaryAxisSource
// ---------------------------------------------------------------------------

/// Provenance of a document's authoritative primary axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrimaryAxisSource {
    /// Provided by the operator at upload time.
    Upload,
    /// Derived by the deterministic keyword rule when no axis was provided.
    DeterministicRule,
    /// Promoted from a model suggestion by an explicit operator action.
    Suggested,
}

impl PrimaryAxisSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "UPLOAD",
            Self::DeterministicRule => "DETERMINISTIC_RULE",
            Self::Suggested => "SUGGESTED",
        }
    }
}

impl fmt::Display for PrimaryAxisSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Status of a generative run.
///
/// ```text
/// pending → succeeded
///         → failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Succeeded,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub const fn allowed_next_states(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Succeeded, Self::Failed],
            Self::Succeeded | Self::Failed => &[],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.allowed_next_states().contains(&next)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// IngestStatus
// ---------------------------------------------------------------------------

/// Outcome classification of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    CreatedNewDocumentAndVersion,
    CreatedNewVersion,
    CreatedNewVersionReusedEvidence,
    DedupReturnedExisting,
}

impl IngestStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreatedNewDocumentAndVersion => "created_new_document_and_version",
            Self::CreatedNewVersion => "created_new_version",
            Self::CreatedNewVersionReusedEvidence => "created_new_version_reused_evidence",
            Self::DedupReturnedExisting => "dedup_returned_existing",
        }
    }
}

impl fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AuditAction
// ---------------------------------------------------------------------------

/// Action recorded in the audit ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    StatusChanged,
    Superseded,
    ArtifactAttached,
    EvidenceStored,
    ArtifactRecorded,
    PromptRegistered,
    RunStarted,
    RunSucceeded,
    RunFailed,
    AxisSuggested,
    AxisPromoted,
}

impl AuditAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::StatusChanged => "status_changed",
            Self::Superseded => "superseded",
            Self::ArtifactAttached => "artifact_attached",
            Self::EvidenceStored => "evidence_stored",
            Self::ArtifactRecorded => "artifact_recorded",
            Self::PromptRegistered => "prompt_registered",
            Self::RunStarted => "run_started",
            Self::RunSucceeded => "run_succeeded",
            Self::RunFailed => "run_failed",
            Self::AxisSuggested => "axis_suggested",
            Self::AxisPromoted => "axis_promoted",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EntityType
// ---------------------------------------------------------------------------

/// Type of entity referenced by a ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Document,
    Version,
    Evidence,
    Artifact,
    Prompt,
    Run,
    Suggestion,
}

impl EntityType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Version => "version",
            Self::Evidence => "evidence",
            Self::Artifact => "artifact",
            Self::Prompt => "prompt",
            Self::Run => "run",
            Self::Suggestion => "suggestion",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
