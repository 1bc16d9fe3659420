//! Operation context carried by every mutation.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Who performs a mutation and which logical operation it belongs to.
///
/// All ledger events appended while serving one request share the same
/// `correlation_id`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct OpContext {
    pub actor: String,
    pub correlation_id: String,
}

impl OpContext {
    #[must_use]
    pub fn new(actor: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            correlation_id: correlation_id.into(),
        }
    }
}
