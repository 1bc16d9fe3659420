//! Derived artifacts and cache resolution.

use chrono::Utc;

use regis_core::audit_detail::ArtifactRecordedDetail;
use regis_core::context::OpContext;
use regis_core::entities::{DerivedArtifact, GeneratorIdentity};
use regis_core::enums::{AuditAction, EntityType};
use regis_core::hashing::{ContentHash, InputFingerprint};
use regis_core::ids::PREFIX_ARTIFACT;

use crate::blob::BlobKind;
use crate::error::StoreError;
use crate::generate_id;
use crate::helpers::{get_u64, parse_datetime, size_to_i64};
use crate::repos::version::{attach, require_version};
use crate::service::{RegisService, WriteTxn};

const SELECT_COLS: &str = "id, version_id, generator_name, generator_version, input_fingerprint, \
                           content_hash, size_bytes, storage_uri, created_at";

fn row_to_artifact(row: &libsql::Row) -> Result<DerivedArtifact, StoreError> {
    Ok(DerivedArtifact {
        id: row.get(0)?,
        version_id: row.get(1)?,
        generator: GeneratorIdentity::new(row.get::<String>(2)?, row.get::<String>(3)?),
        input_fingerprint: InputFingerprint::new(row.get::<String>(4)?),
        content_hash: ContentHash::parse(&row.get::<String>(5)?)
            .map_err(|e| StoreError::Query(e.to_string()))?,
        size_bytes: get_u64(row, 6)?,
        storage_uri: row.get(7)?,
        created_at: parse_datetime(&row.get::<String>(8)?)?,
    })
}

pub(crate) async fn fetch_artifact(
    conn: &libsql::Connection,
    id: &str,
) -> Result<Option<DerivedArtifact>, StoreError> {
    let mut rows = conn
        .query(
            &format!("SELECT {SELECT_COLS} FROM derived_artifacts WHERE id = ?1"),
            [id],
        )
        .await?;
    rows.next().await?.map(|row| row_to_artifact(&row)).transpose()
}

async fn fetch_by_key(
    conn: &libsql::Connection,
    version_id: &str,
    generator: &GeneratorIdentity,
    fingerprint: &InputFingerprint,
) -> Result<Option<DerivedArtifact>, StoreError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {SELECT_COLS} FROM derived_artifacts
                 WHERE version_id = ?1 AND generator_name = ?2
                   AND generator_version = ?3 AND input_fingerprint = ?4"
            ),
            [
                version_id,
                generator.name.as_str(),
                generator.version.as_str(),
                fingerprint.as_str(),
            ],
        )
        .await?;
    rows.next().await?.map(|row| row_to_artifact(&row)).transpose()
}

/// Earliest artifact produced under `(generator, fingerprint)`, on any version.
pub(crate) async fn resolve_key(
    conn: &libsql::Connection,
    generator: &GeneratorIdentity,
    fingerprint: &InputFingerprint,
) -> Result<Option<DerivedArtifact>, StoreError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {SELECT_COLS} FROM derived_artifacts
                 WHERE generator_name = ?1 AND generator_version = ?2 AND input_fingerprint = ?3
                 ORDER BY created_at, id LIMIT 1"
            ),
            [
                generator.name.as_str(),
                generator.version.as_str(),
                fingerprint.as_str(),
            ],
        )
        .await?;
    rows.next().await?.map(|row| row_to_artifact(&row)).transpose()
}

impl RegisService {
    /// Store generator output and record it as an artifact of `version_id`.
    ///
    /// Recording the same `(version, generator, fingerprint)` again returns
    /// the existing record and appends nothing.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the version is unknown.
    pub async fn record_artifact(
        &self,
        version_id: &str,
        generator: &GeneratorIdentity,
        fingerprint: &InputFingerprint,
        bytes: &[u8],
        ctx: &OpContext,
    ) -> Result<DerivedArtifact, StoreError> {
        let hash = ContentHash::of(bytes);
        let blob = self.blobs().put_if_absent(BlobKind::Artifact, &hash, bytes).await?;
        let size = u64::try_from(bytes.len()).map_err(|e| StoreError::Other(e.into()))?;
        let output = ArtifactOutput {
            hash: &hash,
            size,
            storage_uri: &blob.uri,
        };

        self.retrying("record_artifact", || async {
            let mut txn = self.begin_write().await?;
            let result = insert_artifact(&mut txn, version_id, generator, fingerprint, &output, ctx)
                .await
                .map(|(artifact, _)| artifact);
            txn.finish(result).await
        })
        .await
    }

    /// Look up a previously produced artifact by generator and input
    /// fingerprint. `None` is a cache miss.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    pub async fn resolve(
        &self,
        generator: &GeneratorIdentity,
        fingerprint: &InputFingerprint,
    ) -> Result<Option<DerivedArtifact>, StoreError> {
        let _read = self.read_gate().await;
        resolve_key(self.db().conn(), generator, fingerprint).await
    }

    /// The artifact recorded for this exact version and key, if any.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    pub async fn find_artifact(
        &self,
        version_id: &str,
        generator: &GeneratorIdentity,
        fingerprint: &InputFingerprint,
    ) -> Result<Option<DerivedArtifact>, StoreError> {
        let _read = self.read_gate().await;
        fetch_by_key(self.db().conn(), version_id, generator, fingerprint).await
    }

    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no such artifact exists.
    pub async fn get_artifact(&self, id: &str) -> Result<DerivedArtifact, StoreError> {
        let _read = self.read_gate().await;
        fetch_artifact(self.db().conn(), id)
            .await?
            .ok_or_else(|| StoreError::not_found("artifact", id))
    }

    /// Record `source`'s output as an artifact of `version_id` and attach it,
    /// sharing the stored blob. Used when another version with identical
    /// content already produced it; nothing is regenerated.
    ///
    /// Adopting into a version that already has the key returns the existing
    /// record, attaching it if needed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the version is unknown.
    pub async fn adopt_artifact(
        &self,
        version_id: &str,
        source: &DerivedArtifact,
        ctx: &OpContext,
    ) -> Result<DerivedArtifact, StoreError> {
        let output = ArtifactOutput {
            hash: &source.content_hash,
            size: source.size_bytes,
            storage_uri: &source.storage_uri,
        };
        self.retrying("adopt_artifact", || async {
            let mut txn = self.begin_write().await?;
            let result: Result<DerivedArtifact, StoreError> = async {
                let (artifact, _) = insert_artifact(
                    &mut txn,
                    version_id,
                    &source.generator,
                    &source.input_fingerprint,
                    &output,
                    ctx,
                )
                .await?;
                attach(&mut txn, version_id, &artifact, ctx).await?;
                Ok(artifact)
            }
            .await;
            txn.finish(result).await
        })
        .await
    }

    /// Artifact bytes, verified against the recorded content hash.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::IntegrityMismatch` if the stored bytes were altered.
    pub async fn get_artifact_bytes(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        let artifact = self.get_artifact(id).await?;
        self.blobs()
            .fetch_verified(BlobKind::Artifact, &artifact.content_hash)
            .await
    }
}

/// Stored blob backing an artifact row.
pub(crate) struct ArtifactOutput<'a> {
    pub hash: &'a ContentHash,
    pub size: u64,
    pub storage_uri: &'a str,
}

/// Insert the artifact row unless the key already has one. The flag is
/// `true` when a new row was written.
pub(crate) async fn insert_artifact(
    txn: &mut WriteTxn<'_>,
    version_id: &str,
    generator: &GeneratorIdentity,
    fingerprint: &InputFingerprint,
    output: &ArtifactOutput<'_>,
    ctx: &OpContext,
) -> Result<(DerivedArtifact, bool), StoreError> {
    require_version(txn.conn(), version_id).await?;
    if let Some(existing) = fetch_by_key(txn.conn(), version_id, generator, fingerprint).await? {
        tracing::debug!(artifact_id = %existing.id, "artifact already recorded");
        return Ok((existing, false));
    }

    let now = Utc::now();
    let id = generate_id(txn.conn(), PREFIX_ARTIFACT).await?;
    txn.conn()
        .execute(
            &format!(
                "INSERT INTO derived_artifacts ({SELECT_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            libsql::params![
                id.as_str(),
                version_id,
                generator.name.as_str(),
                generator.version.as_str(),
                fingerprint.as_str(),
                output.hash.as_str(),
                size_to_i64(output.size)?,
                output.storage_uri,
                now.to_rfc3339()
            ],
        )
        .await?;

    let artifact = DerivedArtifact {
        id: id.clone(),
        version_id: version_id.to_string(),
        generator: generator.clone(),
        input_fingerprint: fingerprint.clone(),
        content_hash: output.hash.clone(),
        size_bytes: output.size,
        storage_uri: output.storage_uri.to_string(),
        created_at: now,
    };

    txn.append(
        ctx,
        EntityType::Artifact,
        &id,
        AuditAction::ArtifactRecorded,
        &ArtifactRecordedDetail {
            version_id: version_id.to_string(),
            generator_name: generator.name.clone(),
            generator_version: generator.version.clone(),
            input_fingerprint: fingerprint.to_string(),
            content_hash: output.hash.to_string(),
        },
    )
    .await?;

    tracing::info!(artifact_id = %id, version_id, generator = %generator, "artifact recorded");
    Ok((artifact, true))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::repos::audit::AuditFilter;
    use crate::test_support::helpers::{ctx, seed_document, seed_version, test_service};

    fn chunker() -> GeneratorIdentity {
        GeneratorIdentity::new("chunker", "1.0")
    }

    #[tokio::test]
    async fn recording_twice_returns_same_record() {
        let svc = test_service().await;
        let doc = seed_document(&svc, "DOC1").await;
        let v = seed_version(&svc, &doc.id, None, b"v1").await;
        let fp = InputFingerprint::from("abc");

        let first = svc.record_artifact(&v.id, &chunker(), &fp, b"chunks", &ctx()).await.unwrap();
        let second = svc.record_artifact(&v.id, &chunker(), &fp, b"chunks", &ctx()).await.unwrap();
        assert_eq!(first, second);

        let recorded = svc
            .query_audit(&AuditFilter {
                action: Some(AuditAction::ArtifactRecorded),
                ..AuditFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(recorded.len(), 1);
    }

    #[tokio::test]
    async fn resolve_hits_only_on_matching_key() {
        let svc = test_service().await;
        let doc = seed_document(&svc, "DOC1").await;
        let v = seed_version(&svc, &doc.id, None, b"v1").await;
        let fp = InputFingerprint::from("abc");
        let artifact = svc.record_artifact(&v.id, &chunker(), &fp, b"chunks", &ctx()).await.unwrap();

        assert_eq!(svc.resolve(&chunker(), &fp).await.unwrap(), Some(artifact));
        assert!(
            svc.resolve(&GeneratorIdentity::new("chunker", "2.0"), &fp)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            svc.resolve(&chunker(), &InputFingerprint::from("abd"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn adopting_shares_blob_and_attaches_once() {
        let svc = test_service().await;
        let doc = seed_document(&svc, "DOC1").await;
        let v1 = seed_version(&svc, &doc.id, None, b"same").await;
        let v2 = seed_version(&svc, &doc.id, Some(&v1.id), b"same").await;
        let fp = InputFingerprint::from("abc");
        let source = svc.record_artifact(&v1.id, &chunker(), &fp, b"chunks", &ctx()).await.unwrap();

        let adopted = svc.adopt_artifact(&v2.id, &source, &ctx()).await.unwrap();
        assert_ne!(adopted.id, source.id);
        assert_eq!(adopted.version_id, v2.id);
        assert_eq!(adopted.storage_uri, source.storage_uri);
        assert_eq!(svc.get_artifact_bytes(&adopted.id).await.unwrap(), b"chunks");

        let again = svc.adopt_artifact(&v2.id, &source, &ctx()).await.unwrap();
        assert_eq!(again, adopted);
        let attached = svc
            .query_audit(&AuditFilter {
                action: Some(AuditAction::ArtifactAttached),
                ..AuditFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(attached.len(), 1);
        assert_eq!(svc.get_version(&v2.id).await.unwrap().artifacts.len(), 1);
    }

    #[tokio::test]
    async fn artifact_bytes_are_verified() {
        let svc = test_service().await;
        let doc = seed_document(&svc, "DOC1").await;
        let v = seed_version(&svc, &doc.id, None, b"v1").await;
        let artifact = svc
            .record_artifact(&v.id, &chunker(), &InputFingerprint::from("abc"), b"chunks", &ctx())
            .await
            .unwrap();
        assert_eq!(svc.get_artifact_bytes(&artifact.id).await.unwrap(), b"chunks");

        svc.blobs()
            .overwrite(BlobKind::Artifact, &artifact.content_hash, b"tampered")
            .await;
        let err = svc.get_artifact_bytes(&artifact.id).await.unwrap_err();
        assert!(matches!(err, StoreError::IntegrityMismatch { .. }));
    }

    #[tokio::test]
    async fn unknown_version_rejected() {
        let svc = test_service().await;
        let err = svc
            .record_artifact("ver-missing", &chunker(), &InputFingerprint::from("abc"), b"x", &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity_type: "version", .. }));
    }
}
