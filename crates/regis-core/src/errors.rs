//! Cross-cutting error types for Regis.
//!
//! Storage-level failures (`StoreError`) live in `regis-store`; this module
//! only covers errors raised while constructing or validating core values.

use thiserror::Error;

/// Errors that can be raised by any Regis crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A content hash string is not 64 lowercase hex characters.
    #[error("Invalid content hash: {0}")]
    InvalidHash(String),

    /// Data failed validation (format, constraints).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Catch-all for unexpected errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
