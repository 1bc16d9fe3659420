//! Repository modules implementing the Regis components.
//!
//! Each module adds methods to `RegisService` via `impl RegisService` blocks.

pub mod artifact;
pub mod audit;
pub mod document;
pub mod evidence;
pub mod ingest;
pub mod run;
pub mod suggestion;
pub mod version;
