//! Content addressing, input fingerprints, and the ledger hash function.
//!
//! All hashes are SHA-256, rendered as 64 lowercase hex characters. Structured
//! inputs are hashed over their canonical JSON form (object keys sorted, no
//! insignificant whitespace) so the same logical input always yields the same
//! digest regardless of map ordering.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::CoreError;

/// `prev_event_hash` of the first event in the ledger.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

const EVENT_HASH_DOMAIN: &[u8] = b"regis-ledger-event-v1";
const FINGERPRINT_DOMAIN: &[u8] = b"regis-input-fingerprint-v1";

/// SHA-256 of `bytes` as lowercase hex.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// ---------------------------------------------------------------------------
// ContentHash
// ---------------------------------------------------------------------------

/// Content address of a blob: SHA-256 of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash `bytes`.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(sha256_hex(bytes))
    }

    /// Accept an externally supplied hash string.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidHash` unless `s` is 64 lowercase hex chars.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let valid = s.len() == 64
            && s
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(CoreError::InvalidHash(s.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character fan-out directory used for blob keys.
    #[must_use]
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// InputFingerprint
// ---------------------------------------------------------------------------

/// Memoization key component covering every input of a generative operation.
///
/// Usually produced by [`InputFingerprint::compute`]; callers that already hold
/// a fingerprint from elsewhere may wrap it with [`InputFingerprint::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct InputFingerprint(String);

impl InputFingerprint {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fingerprint over the source content hash, the generator configuration,
    /// and the prompt identity.
    #[must_use]
    pub fn compute(
        source: &ContentHash,
        generator_config: &serde_json::Value,
        prompt_hash: Option<&str>,
    ) -> Self {
        let inputs = serde_json::json!({
            "source": source.as_str(),
            "config": generator_config,
            "prompt": prompt_hash,
        });
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_DOMAIN);
        hasher.update(canonical_json(&inputs).as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InputFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InputFingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Canonical JSON
// ---------------------------------------------------------------------------

/// Rebuild `value` with every object's keys in sorted order.
///
/// Insertion order is sorted order, so the result is canonical whether or not
/// `serde_json` was built with `preserve_order`.
#[must_use]
pub fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::with_capacity(entries.len());
            for (key, inner) in entries {
                out.insert(key.clone(), canonicalize(inner));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// Compact canonical JSON text of `value`.
#[must_use]
pub fn canonical_json(value: &serde_json::Value) -> String {
    canonicalize(value).to_string()
}

// ---------------------------------------------------------------------------
// Ledger hashing
// ---------------------------------------------------------------------------

/// Render a ledger timestamp exactly as it is stored and hashed.
#[must_use]
pub fn ledger_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Fields committed to by an event hash.
#[derive(Debug, Clone, Copy)]
pub struct EventHashInput<'a> {
    pub prev_event_hash: &'a str,
    pub entity_type: &'a str,
    pub entity_id: &'a str,
    pub action: &'a str,
    pub actor: &'a str,
    pub at: &'a DateTime<Utc>,
    pub details: &'a serde_json::Value,
}

/// `H(prev ‖ entity_type ‖ entity_id ‖ action ‖ actor ‖ at ‖ details)`.
///
/// Each field is length-prefixed so that field boundaries cannot be shifted
/// between neighbours without changing the digest.
#[must_use]
pub fn compute_event_hash(input: &EventHashInput<'_>) -> String {
    let at = ledger_timestamp(input.at);
    let details = canonical_json(input.details);

    let mut hasher = Sha256::new();
    hasher.update(EVENT_HASH_DOMAIN);
    for field in [
        input.prev_event_hash,
        input.entity_type,
        input.entity_id,
        input.action,
        input.actor,
        at.as_str(),
        details.as_str(),
    ] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn sample_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn content_hash_is_sha256() {
        // sha256("abc")
        assert_eq!(
            ContentHash::of(b"abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn content_hash_parse_rejects_bad_input() {
        assert!(ContentHash::parse("abc").is_err());
        assert!(ContentHash::parse(&"A".repeat(64)).is_err());
        assert!(ContentHash::parse(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn shard_is_first_two_chars() {
        let hash = ContentHash::of(b"abc");
        assert_eq!(hash.shard(), "ba");
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = serde_json::json!({"b": 1, "a": {"z": true, "c": [ {"y": 1, "x": 2} ]}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"c":[{"x":2,"y":1}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn fingerprint_changes_with_every_input() {
        let source = ContentHash::of(b"text");
        let config = serde_json::json!({"max_tokens": 512});
        let base = InputFingerprint::compute(&source, &config, Some("p1"));

        assert_eq!(
            base,
            InputFingerprint::compute(&source, &serde_json::json!({"max_tokens": 512}), Some("p1"))
        );
        assert_ne!(
            base,
            InputFingerprint::compute(&ContentHash::of(b"other"), &config, Some("p1"))
        );
        assert_ne!(
            base,
            InputFingerprint::compute(&source, &serde_json::json!({"max_tokens": 256}), Some("p1"))
        );
        assert_ne!(base, InputFingerprint::compute(&source, &config, Some("p2")));
        assert_ne!(base, InputFingerprint::compute(&source, &config, None));
    }

    #[test]
    fn event_hash_commits_to_predecessor_and_details() {
        let at = sample_at();
        let details = serde_json::json!({"from": "DRAFT", "to": "PUBLISHED"});
        let input = EventHashInput {
            prev_event_hash: GENESIS_HASH,
            entity_type: "version",
            entity_id: "ver-1",
            action: "status_changed",
            actor: "alice",
            at: &at,
            details: &details,
        };
        let hash = compute_event_hash(&input);
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, compute_event_hash(&input));

        let other_prev = "f".repeat(64);
        assert_ne!(
            hash,
            compute_event_hash(&EventHashInput {
                prev_event_hash: &other_prev,
                ..input
            })
        );

        let tampered = serde_json::json!({"from": "DRAFT", "to": "WITHDRAWN"});
        assert_ne!(
            hash,
            compute_event_hash(&EventHashInput {
                details: &tampered,
                ..input
            })
        );
    }

    #[test]
    fn event_hash_field_boundaries_matter() {
        let at = sample_at();
        let details = serde_json::Value::Null;
        let a = compute_event_hash(&EventHashInput {
            prev_event_hash: GENESIS_HASH,
            entity_type: "version",
            entity_id: "ab",
            action: "c",
            actor: "x",
            at: &at,
            details: &details,
        });
        let b = compute_event_hash(&EventHashInput {
            prev_event_hash: GENESIS_HASH,
            entity_type: "version",
            entity_id: "a",
            action: "bc",
            actor: "x",
            at: &at,
            details: &details,
        });
        assert_ne!(a, b);
    }

    #[test]
    fn ledger_timestamp_roundtrips() {
        let at = Utc.timestamp_micros(1_772_366_400_123_456).unwrap();
        let rendered = ledger_timestamp(&at);
        let parsed = DateTime::parse_from_rfc3339(&rendered)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parsed, at);
        assert_eq!(ledger_timestamp(&parsed), rendered);
    }
}
