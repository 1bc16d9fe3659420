//! Error types for regis-store.
//!
//! The first block of variants is the domain taxonomy callers are expected to
//! match on. The rest wrap infrastructure failures.

use regis_core::enums::VersionStatus;
use thiserror::Error;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced entity does not exist.
    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: &'static str, id: String },

    /// Stored bytes no longer hash to their recorded content address.
    #[error("Integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    /// The requested version status change is not an edge of the state machine.
    #[error("Illegal transition for {version_id}: {from} -> {to}")]
    IllegalTransition {
        version_id: String,
        from: String,
        to: String,
    },

    /// A parent version is missing or belongs to another document.
    #[error("Invalid parent {parent_id}: {reason}")]
    InvalidParent { parent_id: String, reason: String },

    /// Lost a race for a write. Safe to retry.
    #[error("Conflicting write: {0}")]
    ConflictingWrite(String),

    /// An external generator failed or timed out.
    #[error("Generator failure: {0}")]
    GeneratorFailure(String),

    /// The audit ledger failed verification. Writes are halted.
    #[error("Audit chain broken at seq {seq}: {reason}")]
    ChainBroken { seq: i64, reason: String },

    /// Input failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A row could not be decoded.
    #[error("Query failed: {0}")]
    Query(String),

    /// Schema migration failed.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Underlying libSQL error.
    #[error("libSQL error: {0}")]
    LibSql(#[source] libsql::Error),

    /// Underlying blob store error.
    #[error("Object store error: {0}")]
    ObjectStore(#[source] object_store::Error),

    /// Catch-all for unexpected errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub(crate) fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    pub(crate) fn illegal_transition(
        version_id: impl Into<String>,
        from: VersionStatus,
        to: VersionStatus,
    ) -> Self {
        Self::IllegalTransition {
            version_id: version_id.into(),
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        }
    }

    /// Whether local recovery by retrying is permitted.
    ///
    /// Only lost write races and transient storage failures qualify; every
    /// other kind must reach the caller.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConflictingWrite(_) => true,
            Self::LibSql(e) => crate::retry::is_transient_libsql_error(e),
            Self::ObjectStore(e) => crate::retry::is_transient_object_store_error(e),
            _ => false,
        }
    }
}

impl From<libsql::Error> for StoreError {
    fn from(e: libsql::Error) -> Self {
        if crate::retry::is_write_conflict(&e) {
            Self::ConflictingWrite(e.to_string())
        } else {
            Self::LibSql(e)
        }
    }
}

impl From<object_store::Error> for StoreError {
    fn from(e: object_store::Error) -> Self {
        match e {
            object_store::Error::NotFound { path, .. } => Self::not_found("blob", path),
            other => Self::ObjectStore(other),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Other(e.into())
    }
}
