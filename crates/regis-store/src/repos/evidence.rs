//! Content store index: content-addressed evidence files.
//!
//! Identical bytes are stored once. The blob is written before its index row;
//! the row is the commit point and carries the `evidence_stored` event.

use chrono::Utc;

use regis_core::audit_detail::EvidenceStoredDetail;
use regis_core::context::OpContext;
use regis_core::entities::EvidenceFile;
use regis_core::enums::{AuditAction, EntityType};
use regis_core::hashing::ContentHash;
use regis_core::ids::PREFIX_EVIDENCE;

use crate::blob::BlobKind;
use crate::error::StoreError;
use crate::generate_id;
use crate::helpers::{get_u64, parse_datetime, size_to_i64};
use crate::service::{RegisService, WriteTxn};

const SELECT_COLS: &str = "id, sha256, mime_type, size_bytes, storage_uri, created_at";

fn row_to_evidence(row: &libsql::Row) -> Result<EvidenceFile, StoreError> {
    Ok(EvidenceFile {
        id: row.get(0)?,
        sha256: ContentHash::parse(&row.get::<String>(1)?)
            .map_err(|e| StoreError::Query(e.to_string()))?,
        mime_type: row.get(2)?,
        size_bytes: get_u64(row, 3)?,
        storage_uri: row.get(4)?,
        created_at: parse_datetime(&row.get::<String>(5)?)?,
    })
}

pub(crate) async fn fetch_evidence(
    conn: &libsql::Connection,
    hash: &ContentHash,
) -> Result<Option<EvidenceFile>, StoreError> {
    let mut rows = conn
        .query(
            &format!("SELECT {SELECT_COLS} FROM evidence_files WHERE sha256 = ?1"),
            [hash.as_str()],
        )
        .await?;
    rows.next().await?.map(|row| row_to_evidence(&row)).transpose()
}

/// Handle returned by [`RegisService::put_evidence`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvidence {
    pub file: EvidenceFile,
    /// `true` when these bytes were already stored and nothing was written.
    pub reused: bool,
}

impl RegisService {
    /// Store `bytes` under their content hash, or return the existing handle.
    ///
    /// Safe to call concurrently: distinct hashes proceed independently and
    /// writers of the same hash converge on one record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the blob or index write fails.
    pub async fn put_evidence(
        &self,
        bytes: &[u8],
        mime_type: &str,
        ctx: &OpContext,
    ) -> Result<StoredEvidence, StoreError> {
        let hash = ContentHash::of(bytes);

        {
            let _read = self.read_gate().await;
            if let Some(file) = fetch_evidence(self.db().conn(), &hash).await? {
                tracing::debug!(%hash, "evidence already indexed");
                return Ok(StoredEvidence { file, reused: true });
            }
        }

        let blob = self.blobs().put_if_absent(BlobKind::Evidence, &hash, bytes).await?;
        let size = u64::try_from(bytes.len()).map_err(|e| StoreError::Other(e.into()))?;

        self.retrying("put_evidence", || async {
            let mut txn = self.begin_write().await?;
            let result = index_evidence(&mut txn, &hash, mime_type, size, &blob.uri, ctx).await;
            txn.finish(result).await
        })
        .await
    }

    /// Index row for a content hash.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the hash was never stored.
    pub async fn get_evidence_file(&self, hash: &ContentHash) -> Result<EvidenceFile, StoreError> {
        let _read = self.read_gate().await;
        fetch_evidence(self.db().conn(), hash)
            .await?
            .ok_or_else(|| StoreError::not_found("evidence", hash.as_str()))
    }

    /// Bytes stored under `hash`, verified against the hash before returning.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` for unknown hashes and
    /// `StoreError::IntegrityMismatch` if the stored bytes were altered.
    pub async fn get_evidence(&self, hash: &ContentHash) -> Result<Vec<u8>, StoreError> {
        self.get_evidence_file(hash).await?;
        self.blobs().fetch_verified(BlobKind::Evidence, hash).await
    }
}

async fn index_evidence(
    txn: &mut WriteTxn<'_>,
    hash: &ContentHash,
    mime_type: &str,
    size: u64,
    storage_uri: &str,
    ctx: &OpContext,
) -> Result<StoredEvidence, StoreError> {
    let now = Utc::now();
    let id = generate_id(txn.conn(), PREFIX_EVIDENCE).await?;
    let inserted = txn
        .conn()
        .execute(
            &format!(
                "INSERT OR IGNORE INTO evidence_files ({SELECT_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            ),
            libsql::params![
                id.as_str(),
                hash.as_str(),
                mime_type,
                size_to_i64(size)?,
                storage_uri,
                now.to_rfc3339()
            ],
        )
        .await?;

    let file = fetch_evidence(txn.conn(), hash)
        .await?
        .ok_or_else(|| StoreError::not_found("evidence", hash.as_str()))?;
    if inserted == 0 {
        tracing::debug!(%hash, "evidence indexed concurrently, reusing");
        return Ok(StoredEvidence { file, reused: true });
    }

    txn.append(
        ctx,
        EntityType::Evidence,
        &file.id,
        AuditAction::EvidenceStored,
        &EvidenceStoredDetail {
            sha256: hash.to_string(),
            mime_type: file.mime_type.clone(),
            size_bytes: file.size_bytes,
            storage_uri: file.storage_uri.clone(),
        },
    )
    .await?;
    Ok(StoredEvidence {
        file,
        reused: false,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::repos::audit::AuditFilter;
    use crate::test_support::helpers::{ctx, test_service};

    #[tokio::test]
    async fn storing_twice_yields_one_record() {
        let svc = test_service().await;
        let first = svc.put_evidence(b"%PDF-1.7 one", "application/pdf", &ctx()).await.unwrap();
        let second = svc.put_evidence(b"%PDF-1.7 one", "application/pdf", &ctx()).await.unwrap();

        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(first.file, second.file);

        let events = svc
            .query_audit(&AuditFilter {
                action: Some(AuditAction::EvidenceStored),
                ..AuditFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn get_returns_original_bytes() {
        let svc = test_service().await;
        let stored = svc.put_evidence(b"hello", "text/plain", &ctx()).await.unwrap();
        assert_eq!(stored.file.size_bytes, 5);
        assert_eq!(svc.get_evidence(&stored.file.sha256).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn unknown_handle_is_not_found() {
        let svc = test_service().await;
        let err = svc.get_evidence(&ContentHash::of(b"never stored")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity_type: "evidence", .. }));
    }

    #[tokio::test]
    async fn corrupted_blob_is_never_served() {
        let svc = test_service().await;
        let stored = svc.put_evidence(b"genuine", "text/plain", &ctx()).await.unwrap();
        svc.blobs()
            .overwrite(BlobKind::Evidence, &stored.file.sha256, b"forged")
            .await;

        let err = svc.get_evidence(&stored.file.sha256).await.unwrap_err();
        assert!(matches!(err, StoreError::IntegrityMismatch { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_puts_of_same_bytes_converge() {
        let svc = Arc::new(test_service().await);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let svc = Arc::clone(&svc);
            handles.push(tokio::spawn(async move {
                svc.put_evidence(b"same bytes", "text/plain", &ctx()).await.unwrap()
            }));
        }
        let mut ids = std::collections::HashSet::new();
        let mut fresh = 0;
        for handle in handles {
            let stored = handle.await.unwrap();
            ids.insert(stored.file.id);
            if !stored.reused {
                fresh += 1;
            }
        }
        assert_eq!(ids.len(), 1);
        assert_eq!(fresh, 1);

        let mut rows = svc
            .db()
            .conn()
            .query("SELECT COUNT(*) FROM evidence_files", ())
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 1);
    }
}
