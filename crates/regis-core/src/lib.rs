//! # regis-core
//!
//! Core types, state machines, hashing, and error types for Regis.
//!
//! This crate provides the foundational types shared across all Regis crates:
//! - Entity structs for documents, versions, evidence, artifacts, runs,
//!   suggestions, and ledger events
//! - Status enums with state machine transitions
//! - ID prefix constants
//! - Content addressing, input fingerprints, and the ledger hash function
//! - Typed audit detail payloads
//! - The deterministic primary-axis rule
//! - Cross-cutting error types

pub mod audit_detail;
pub mod classification;
pub mod context;
pub mod entities;
pub mod enums;
pub mod errors;
pub mod hashing;
pub mod ids;
