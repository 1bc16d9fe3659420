//! Version lineage manager: versions, the status state machine, the
//! publish-swap, artifact attachment and lineage queries.

use std::collections::{BTreeMap, HashSet};

use chrono::{NaiveDate, Utc};

use regis_core::audit_detail::{
    ArtifactAttachedDetail, StatusChangedDetail, SupersededDetail, VersionCreatedDetail,
};
use regis_core::context::OpContext;
use regis_core::entities::{ArtifactRef, DerivedArtifact, DocumentVersion, VersionMetadata};
use regis_core::enums::{AuditAction, EntityType, VersionStatus};
use regis_core::hashing::ContentHash;
use regis_core::ids::PREFIX_VERSION;

use crate::error::StoreError;
use crate::generate_id;
use crate::helpers::{get_opt_string, parse_datetime, parse_enum, parse_json};
use crate::repos::artifact::fetch_artifact;
use crate::repos::document::require_document;
use crate::repos::evidence::fetch_evidence;
use crate::service::{RegisService, WriteTxn};

const SELECT_COLS: &str = "id, document_id, parent_version_id, status, raw_content_hash, \
                           evidence_id, version_label, effective_date, original_filename, \
                           artifacts_json, created_by, created_at, updated_at";

fn row_to_version(row: &libsql::Row) -> Result<DocumentVersion, StoreError> {
    let effective_date = get_opt_string(row, 7)?
        .map(|s| {
            s.parse::<NaiveDate>()
                .map_err(|e| StoreError::Query(format!("Failed to parse date '{s}': {e}")))
        })
        .transpose()?;
    Ok(DocumentVersion {
        id: row.get(0)?,
        document_id: row.get(1)?,
        parent_version_id: get_opt_string(row, 2)?,
        status: parse_enum(&row.get::<String>(3)?)?,
        raw_content_hash: ContentHash::parse(&row.get::<String>(4)?)
            .map_err(|e| StoreError::Query(e.to_string()))?,
        evidence_id: row.get(5)?,
        metadata: VersionMetadata {
            version_label: get_opt_string(row, 6)?,
            effective_date,
            original_filename: get_opt_string(row, 8)?,
        },
        artifacts: parse_json(&row.get::<String>(9)?)?,
        created_by: row.get(10)?,
        created_at: parse_datetime(&row.get::<String>(11)?)?,
        updated_at: parse_datetime(&row.get::<String>(12)?)?,
    })
}

async fn collect_versions(mut rows: libsql::Rows) -> Result<Vec<DocumentVersion>, StoreError> {
    let mut versions = Vec::new();
    while let Some(row) = rows.next().await? {
        versions.push(row_to_version(&row)?);
    }
    Ok(versions)
}

pub(crate) async fn fetch_version(
    conn: &libsql::Connection,
    id: &str,
) -> Result<Option<DocumentVersion>, StoreError> {
    let mut rows = conn
        .query(
            &format!("SELECT {SELECT_COLS} FROM document_versions WHERE id = ?1"),
            [id],
        )
        .await?;
    rows.next().await?.map(|row| row_to_version(&row)).transpose()
}

pub(crate) async fn require_version(
    conn: &libsql::Connection,
    id: &str,
) -> Result<DocumentVersion, StoreError> {
    fetch_version(conn, id)
        .await?
        .ok_or_else(|| StoreError::not_found("version", id))
}

/// Oldest version of `document_id` carrying exactly this content.
pub(crate) async fn find_version_by_content(
    conn: &libsql::Connection,
    document_id: &str,
    hash: &ContentHash,
) -> Result<Option<DocumentVersion>, StoreError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {SELECT_COLS} FROM document_versions
                 WHERE document_id = ?1 AND raw_content_hash = ?2
                 ORDER BY created_at, id LIMIT 1"
            ),
            [document_id, hash.as_str()],
        )
        .await?;
    rows.next().await?.map(|row| row_to_version(&row)).transpose()
}

async fn fetch_published(
    conn: &libsql::Connection,
    document_id: &str,
) -> Result<Option<DocumentVersion>, StoreError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {SELECT_COLS} FROM document_versions
                 WHERE document_id = ?1 AND status = 'PUBLISHED'"
            ),
            [document_id],
        )
        .await?;
    rows.next().await?.map(|row| row_to_version(&row)).transpose()
}

impl RegisService {
    /// Create a `DRAFT` version of `document_id` backed by stored evidence.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the document or the evidence is unknown.
    /// - `StoreError::InvalidParent` if `parent_version_id` does not exist or
    ///   belongs to another document.
    pub async fn create_version(
        &self,
        document_id: &str,
        parent_version_id: Option<&str>,
        raw_content_hash: &ContentHash,
        metadata: VersionMetadata,
        ctx: &OpContext,
    ) -> Result<DocumentVersion, StoreError> {
        let mut txn = self.begin_write().await?;
        let result = insert_version(
            &mut txn,
            document_id,
            parent_version_id,
            raw_content_hash,
            &metadata,
            ctx,
        )
        .await;
        txn.finish(result).await
    }

    /// Move a version along the status state machine.
    ///
    /// Publishing supersedes the document's previously published version and
    /// repoints the document's latest pointer in the same transaction. The
    /// ledger records the status change first, then the supersession.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the version is unknown.
    /// - `StoreError::IllegalTransition` if `target` is not an edge from the
    ///   current status. `SUPERSEDED` is never a valid target.
    pub async fn transition(
        &self,
        version_id: &str,
        target: VersionStatus,
        ctx: &OpContext,
    ) -> Result<DocumentVersion, StoreError> {
        self.retrying("transition", || async {
            let mut txn = self.begin_write().await?;
            let result = apply_transition(&mut txn, version_id, target, ctx).await;
            txn.finish(result).await
        })
        .await
    }

    /// Attach a recorded artifact to a version.
    ///
    /// Returns `false` when an artifact with the same generator identity and
    /// input fingerprint is already attached; nothing is written in that case.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the version or artifact is unknown.
    /// - `StoreError::Validation` if the artifact belongs to another version
    ///   or does not match the stored record.
    pub async fn attach_artifact(
        &self,
        version_id: &str,
        artifact: &ArtifactRef,
        ctx: &OpContext,
    ) -> Result<bool, StoreError> {
        let mut txn = self.begin_write().await?;
        let result: Result<bool, StoreError> = async {
            let stored = fetch_artifact(txn.conn(), &artifact.artifact_id)
                .await?
                .ok_or_else(|| StoreError::not_found("artifact", &artifact.artifact_id))?;
            if stored.to_ref() != *artifact {
                return Err(StoreError::Validation(format!(
                    "artifact reference {} does not match the stored record",
                    artifact.artifact_id
                )));
            }
            attach(&mut txn, version_id, &stored, ctx).await
        }
        .await;
        txn.finish(result).await
    }

    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no such version exists.
    pub async fn get_version(&self, id: &str) -> Result<DocumentVersion, StoreError> {
        let _read = self.read_gate().await;
        require_version(self.db().conn(), id).await
    }

    /// All versions of a document, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the document is unknown.
    pub async fn list_versions(&self, document_id: &str) -> Result<Vec<DocumentVersion>, StoreError> {
        let _read = self.read_gate().await;
        let conn = self.db().conn();
        require_document(conn, document_id).await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {SELECT_COLS} FROM document_versions
                     WHERE document_id = ?1 ORDER BY created_at, id"
                ),
                [document_id],
            )
            .await?;
        collect_versions(rows).await
    }

    /// Direct children of a version. More than one means the lineage branches.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the version is unknown.
    pub async fn children(&self, version_id: &str) -> Result<Vec<DocumentVersion>, StoreError> {
        let _read = self.read_gate().await;
        let conn = self.db().conn();
        require_version(conn, version_id).await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {SELECT_COLS} FROM document_versions
                     WHERE parent_version_id = ?1 ORDER BY created_at, id"
                ),
                [version_id],
            )
            .await?;
        collect_versions(rows).await
    }

    /// Ancestor chain of a version, root first, ending with the version itself.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the version or any recorded ancestor
    /// is missing.
    pub async fn lineage(&self, version_id: &str) -> Result<Vec<DocumentVersion>, StoreError> {
        let _read = self.read_gate().await;
        let conn = self.db().conn();
        let mut chain = vec![require_version(conn, version_id).await?];
        let mut seen = HashSet::from([version_id.to_string()]);

        while let Some(parent_id) = chain.last().and_then(|v| v.parent_version_id.clone()) {
            if !seen.insert(parent_id.clone()) {
                return Err(StoreError::Query(format!("lineage cycle at {parent_id}")));
            }
            chain.push(require_version(conn, &parent_id).await?);
        }
        chain.reverse();
        Ok(chain)
    }

    /// The document's currently published version, if any.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the document is unknown.
    pub async fn published_version(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentVersion>, StoreError> {
        let _read = self.read_gate().await;
        let conn = self.db().conn();
        require_document(conn, document_id).await?;
        fetch_published(conn, document_id).await
    }
}

pub(crate) async fn insert_version(
    txn: &mut WriteTxn<'_>,
    document_id: &str,
    parent_version_id: Option<&str>,
    raw_content_hash: &ContentHash,
    metadata: &VersionMetadata,
    ctx: &OpContext,
) -> Result<DocumentVersion, StoreError> {
    require_document(txn.conn(), document_id).await?;
    let evidence = fetch_evidence(txn.conn(), raw_content_hash)
        .await?
        .ok_or_else(|| StoreError::not_found("evidence", raw_content_hash.as_str()))?;

    if let Some(parent_id) = parent_version_id {
        match fetch_version(txn.conn(), parent_id).await? {
            None => {
                return Err(StoreError::InvalidParent {
                    parent_id: parent_id.to_string(),
                    reason: "parent version does not exist".into(),
                });
            }
            Some(parent) if parent.document_id != document_id => {
                return Err(StoreError::InvalidParent {
                    parent_id: parent_id.to_string(),
                    reason: format!("parent belongs to document {}", parent.document_id),
                });
            }
            Some(_) => {}
        }
    }

    let now = Utc::now();
    let id = generate_id(txn.conn(), PREFIX_VERSION).await?;
    let version = DocumentVersion {
        id: id.clone(),
        document_id: document_id.to_string(),
        parent_version_id: parent_version_id.map(str::to_string),
        status: VersionStatus::Draft,
        raw_content_hash: raw_content_hash.clone(),
        evidence_id: evidence.id,
        metadata: metadata.clone(),
        artifacts: BTreeMap::new(),
        created_by: ctx.actor.clone(),
        created_at: now,
        updated_at: now,
    };

    txn.conn()
        .execute(
            &format!(
                "INSERT INTO document_versions ({SELECT_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, '{{}}', ?10, ?11, ?12)"
            ),
            libsql::params![
                version.id.as_str(),
                version.document_id.as_str(),
                version.parent_version_id.clone(),
                version.status.as_str(),
                version.raw_content_hash.as_str(),
                version.evidence_id.as_str(),
                metadata.version_label.clone(),
                metadata.effective_date.map(|d| d.to_string()),
                metadata.original_filename.clone(),
                version.created_by.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339()
            ],
        )
        .await?;

    txn.append(
        ctx,
        EntityType::Version,
        &id,
        AuditAction::Created,
        &VersionCreatedDetail {
            document_id: version.document_id.clone(),
            parent_version_id: version.parent_version_id.clone(),
            raw_content_hash: version.raw_content_hash.to_string(),
            evidence_id: version.evidence_id.clone(),
            status: version.status,
        },
    )
    .await?;

    tracing::info!(version_id = %id, document_id, parent = ?parent_version_id, "version created");
    Ok(version)
}

async fn set_status(
    conn: &libsql::Connection,
    version_id: &str,
    status: VersionStatus,
    now: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE document_versions SET status = ?1, updated_at = ?2 WHERE id = ?3",
        [status.as_str(), now, version_id],
    )
    .await?;
    Ok(())
}

async fn apply_transition(
    txn: &mut WriteTxn<'_>,
    version_id: &str,
    target: VersionStatus,
    ctx: &OpContext,
) -> Result<DocumentVersion, StoreError> {
    let current = require_version(txn.conn(), version_id).await?;
    let from = current.status;
    if !from.can_transition_to(target) {
        return Err(StoreError::illegal_transition(version_id, from, target));
    }

    let now = Utc::now().to_rfc3339();
    let document_id = current.document_id.as_str();

    let superseded = if target == VersionStatus::Published {
        // Demote first so the one-published index never sees two rows.
        let previous = fetch_published(txn.conn(), document_id).await?;
        if let Some(prev) = &previous {
            set_status(txn.conn(), &prev.id, VersionStatus::Superseded, &now).await?;
        }
        set_status(txn.conn(), version_id, target, &now).await?;
        txn.conn()
            .execute(
                "UPDATE documents SET latest_version_id = ?1, updated_at = ?2 WHERE id = ?3",
                [version_id, now.as_str(), document_id],
            )
            .await?;
        previous
    } else {
        set_status(txn.conn(), version_id, target, &now).await?;
        if from == VersionStatus::Published {
            txn.conn()
                .execute(
                    "UPDATE documents SET latest_version_id = NULL, updated_at = ?1
                     WHERE id = ?2 AND latest_version_id = ?3",
                    [now.as_str(), document_id, version_id],
                )
                .await?;
        }
        None
    };

    txn.append(
        ctx,
        EntityType::Version,
        version_id,
        AuditAction::StatusChanged,
        &StatusChangedDetail {
            document_id: document_id.to_string(),
            from,
            to: target,
        },
    )
    .await?;

    if let Some(prev) = &superseded {
        txn.append(
            ctx,
            EntityType::Version,
            &prev.id,
            AuditAction::Superseded,
            &SupersededDetail {
                document_id: document_id.to_string(),
                superseded_by: version_id.to_string(),
            },
        )
        .await?;
    }

    tracing::info!(
        version_id,
        from = %from,
        to = %target,
        superseded = ?superseded.as_ref().map(|v| v.id.as_str()),
        "version transitioned"
    );
    require_version(txn.conn(), version_id).await
}

/// Record `artifact` in the version's artifact map unless its key is present.
pub(crate) async fn attach(
    txn: &mut WriteTxn<'_>,
    version_id: &str,
    artifact: &DerivedArtifact,
    ctx: &OpContext,
) -> Result<bool, StoreError> {
    let mut version = require_version(txn.conn(), version_id).await?;
    if artifact.version_id != version_id {
        return Err(StoreError::Validation(format!(
            "artifact {} belongs to version {}, not {version_id}",
            artifact.id, artifact.version_id
        )));
    }

    let reference = artifact.to_ref();
    let key = reference.key();
    if version.artifacts.contains_key(&key) {
        tracing::debug!(version_id, %key, "artifact already attached");
        return Ok(false);
    }
    version.artifacts.insert(key.clone(), reference.clone());

    txn.conn()
        .execute(
            "UPDATE document_versions SET artifacts_json = ?1, updated_at = ?2 WHERE id = ?3",
            [
                serde_json::to_string(&version.artifacts)?.as_str(),
                Utc::now().to_rfc3339().as_str(),
                version_id,
            ],
        )
        .await?;

    txn.append(
        ctx,
        EntityType::Version,
        version_id,
        AuditAction::ArtifactAttached,
        &ArtifactAttachedDetail {
            artifact: reference,
        },
    )
    .await?;

    tracing::info!(version_id, %key, "artifact attached");
    Ok(true)
}
