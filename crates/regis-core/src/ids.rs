//! ID prefix constants.
//!
//! Every generated identifier is `{prefix}-{16 hex chars}`. Content-derived
//! identifiers (evidence and artifact hashes) are plain SHA-256 hex.

pub const PREFIX_DOCUMENT: &str = "doc";
pub const PREFIX_VERSION: &str = "ver";
pub const PREFIX_EVIDENCE: &str = "evd";
pub const PREFIX_ARTIFACT: &str = "art";
pub const PREFIX_RUN: &str = "run";
pub const PREFIX_SUGGESTION: &str = "sug";
pub const PREFIX_EVENT: &str = "evt";
pub const PREFIX_CORRELATION: &str = "cor";

/// All prefixes, for exhaustive ID generation tests.
pub const ALL_PREFIXES: &[&str] = &[
    PREFIX_DOCUMENT,
    PREFIX_VERSION,
    PREFIX_EVIDENCE,
    PREFIX_ARTIFACT,
    PREFIX_RUN,
    PREFIX_SUGGESTION,
    PREFIX_EVENT,
    PREFIX_CORRELATION,
];
