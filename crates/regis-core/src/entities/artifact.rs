use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::hashing::{ContentHash, InputFingerprint};

/// Name and version of an external generator (chunker, model runner).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct GeneratorIdentity {
    pub name: String,
    pub version: String,
}

impl GeneratorIdentity {
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for GeneratorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Output of a generator applied to a version.
///
/// `(version_id, generator, input_fingerprint)` is unique: re-running an
/// unchanged generator against unchanged input yields this same record.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct DerivedArtifact {
    pub id: String,
    pub version_id: String,
    pub generator: GeneratorIdentity,
    pub input_fingerprint: InputFingerprint,
    pub content_hash: ContentHash,
    pub size_bytes: u64,
    pub storage_uri: String,
    pub created_at: DateTime<Utc>,
}

impl DerivedArtifact {
    #[must_use]
    pub fn to_ref(&self) -> ArtifactRef {
        ArtifactRef {
            artifact_id: self.id.clone(),
            generator: self.generator.clone(),
            input_fingerprint: self.input_fingerprint.clone(),
            content_hash: self.content_hash.clone(),
        }
    }
}

/// Compact artifact reference kept on a version for fast lookup.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ArtifactRef {
    pub artifact_id: String,
    pub generator: GeneratorIdentity,
    pub input_fingerprint: InputFingerprint,
    pub content_hash: ContentHash,
}

impl ArtifactRef {
    /// Identity of the attachment: `name@version#fingerprint`. Two refs with
    /// the same key are the same attachment.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}#{}", self.generator, self.input_fingerprint)
    }
}
