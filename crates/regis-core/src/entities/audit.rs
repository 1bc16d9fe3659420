use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::{AuditAction, EntityType};
use crate::hashing::{EventHashInput, compute_event_hash};

/// One immutable entry in the hash-chained ledger.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct AuditEvent {
    /// Position in the global total order, starting at 1.
    pub seq: i64,
    pub id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action: AuditAction,
    pub actor: String,
    pub correlation_id: String,
    pub details: serde_json::Value,
    pub at: DateTime<Utc>,
    pub prev_event_hash: String,
    pub event_hash: String,
}

impl AuditEvent {
    /// Hash this event should carry given its recorded predecessor.
    #[must_use]
    pub fn recompute_hash(&self) -> String {
        compute_event_hash(&EventHashInput {
            prev_event_hash: &self.prev_event_hash,
            entity_type: self.entity_type.as_str(),
            entity_id: &self.entity_id,
            action: self.action.as_str(),
            actor: &self.actor,
            at: &self.at,
            details: &self.details,
        })
    }
}
