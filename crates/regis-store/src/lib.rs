//! # regis-store
//!
//! Durable state for Regis: documents and their version lineage,
//! content-addressed evidence and derived artifacts, generative run
//! bookkeeping, the primary-axis suggestion overlay, and the hash-chained
//! audit ledger that records every mutation.
//!
//! Relational state lives in libSQL; blobs live behind `object_store`.
//! `RegisService` is the entry point; each repo module adds methods to it.

pub mod blob;
pub mod cache;
pub mod error;
pub mod helpers;
mod migrations;
pub mod projection;
pub mod repos;
pub mod retry;
pub mod service;

#[cfg(test)]
mod test_support;

use error::StoreError;
use libsql::Builder;

/// Central database handle.
///
/// Wraps a libSQL database and a single shared connection. Writers serialize
/// through `RegisService`, so one connection is enough.
pub struct RegisDb {
    #[allow(dead_code)]
    db: libsql::Database,
    conn: libsql::Connection,
}

impl RegisDb {
    /// Open a local database at the given path, or `":memory:"`.
    ///
    /// Runs migrations automatically on open.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the database cannot be opened or
    /// migrations fail.
    pub async fn open_local(path: &str) -> Result<Self, StoreError> {
        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;

        // Enable foreign keys (must be per-connection in SQLite)
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| StoreError::Migration(format!("PRAGMA foreign_keys: {e}")))?;
        // PRAGMA busy_timeout echoes the new value as a row.
        conn.query("PRAGMA busy_timeout = 5000", ())
            .await
            .map_err(|e| StoreError::Migration(format!("PRAGMA busy_timeout: {e}")))?;

        let regis_db = Self { db, conn };
        regis_db.run_migrations().await?;
        Ok(regis_db)
    }

    /// Access the underlying libSQL connection for direct queries.
    #[must_use]
    pub const fn conn(&self) -> &libsql::Connection {
        &self.conn
    }

    /// Generate a prefixed ID via libSQL. Returns e.g. `"ver-a3f8b2c1d4e5f607"`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails or returns no rows.
    pub async fn generate_id(&self, prefix: &str) -> Result<String, StoreError> {
        generate_id(&self.conn, prefix).await
    }
}

/// Generate a prefixed ID on `conn`, which may be an open transaction.
///
/// Uses `randomblob(8)` in SQL to produce 16 hex chars, then prepends the prefix.
pub(crate) async fn generate_id(
    conn: &libsql::Connection,
    prefix: &str,
) -> Result<String, StoreError> {
    let mut rows = conn
        .query(
            &format!("SELECT '{prefix}-' || lower(hex(randomblob(8)))"),
            (),
        )
        .await?;
    let row = rows
        .next()
        .await?
        .ok_or_else(|| StoreError::Query("id generation returned no row".into()))?;
    Ok(row.get::<String>(0)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use regis_core::ids::ALL_PREFIXES;
    use std::collections::HashSet;

    async fn test_db() -> RegisDb {
        RegisDb::open_local(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn open_local_creates_schema() {
        let db = test_db().await;
        let tables = [
            "documents",
            "evidence_files",
            "document_versions",
            "derived_artifacts",
            "prompts",
            "generative_runs",
            "axis_suggestions",
            "audit_log",
        ];
        for table in &tables {
            let mut rows = db
                .conn()
                .query(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                    [*table],
                )
                .await
                .unwrap();
            assert!(rows.next().await.unwrap().is_some(), "table '{table}' should exist");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db = test_db().await;
        db.run_migrations().await.unwrap();
    }

    #[tokio::test]
    async fn generate_id_uses_prefix() {
        let db = test_db().await;
        for prefix in ALL_PREFIXES {
            let id = db.generate_id(prefix).await.unwrap();
            assert!(id.starts_with(&format!("{prefix}-")), "{id}");
            assert_eq!(id.len(), prefix.len() + 1 + 16, "{id}");
        }
    }

    #[tokio::test]
    async fn generate_id_is_unique() {
        let db = test_db().await;
        let mut seen = HashSet::new();
        for _ in 0..200 {
            assert!(seen.insert(db.generate_id("ver").await.unwrap()));
        }
    }

    #[tokio::test]
    async fn audit_log_rejects_update_and_delete() {
        let db = test_db().await;
        db.conn()
            .execute(
                "INSERT INTO audit_log (seq, id, entity_type, entity_id, action, actor,
                    correlation_id, details, at, prev_event_hash, event_hash)
                 VALUES (1, 'evt-1', 'document', 'doc-1', 'created', 'a', 'cor-1', '{}',
                    '2026-01-01T00:00:00.000000Z', 'x', 'y')",
                (),
            )
            .await
            .unwrap();

        let update = db
            .conn()
            .execute("UPDATE audit_log SET actor = 'mallory' WHERE seq = 1", ())
            .await;
        assert!(update.is_err());
        let delete = db.conn().execute("DELETE FROM audit_log WHERE seq = 1", ()).await;
        assert!(delete.is_err());
    }
}
