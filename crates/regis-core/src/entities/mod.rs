//! Entity structs for all Regis domain objects.
//!
//! Each entity maps to a table in the libSQL database (see
//! `regis-store/migrations`). All structs derive `Serialize`, `Deserialize`, and
//! `JsonSchema` for JSON roundtrip and schema validation.

mod artifact;
mod audit;
mod document;
mod evidence;
mod prompt;
mod run;
mod suggestion;
mod version;

pub use artifact::{ArtifactRef, DerivedArtifact, GeneratorIdentity};
pub use audit::AuditEvent;
pub use document::{Document, NewDocument};
pub use evidence::EvidenceFile;
pub use prompt::Prompt;
pub use run::GenerativeRun;
pub use suggestion::AxisSuggestion;
pub use version::{DocumentVersion, VersionMetadata};
