//! Document registry.

use chrono::Utc;

use regis_core::audit_detail::DocumentCreatedDetail;
use regis_core::classification::{AxisSignals, derive_primary_axis};
use regis_core::context::OpContext;
use regis_core::entities::{Document, NewDocument};
use regis_core::enums::{AuditAction, EntityType, PrimaryAxisSource};
use regis_core::ids::PREFIX_DOCUMENT;

use crate::error::StoreError;
use crate::generate_id;
use crate::helpers::{get_opt_string, parse_datetime, parse_enum};
use crate::service::{RegisService, WriteTxn};

const SELECT_COLS: &str = "id, title, jurisdiction, regulation_family, instrument_type, \
                           primary_axis, primary_axis_source, latest_version_id, created_at, updated_at";

fn row_to_document(row: &libsql::Row) -> Result<Document, StoreError> {
    Ok(Document {
        id: row.get(0)?,
        title: row.get(1)?,
        jurisdiction: row.get(2)?,
        regulation_family: row.get(3)?,
        instrument_type: row.get(4)?,
        primary_axis: row.get(5)?,
        primary_axis_source: parse_enum(&row.get::<String>(6)?)?,
        latest_version_id: get_opt_string(row, 7)?,
        created_at: parse_datetime(&row.get::<String>(8)?)?,
        updated_at: parse_datetime(&row.get::<String>(9)?)?,
    })
}

pub(crate) async fn fetch_document(
    conn: &libsql::Connection,
    id: &str,
) -> Result<Option<Document>, StoreError> {
    let mut rows = conn
        .query(&format!("SELECT {SELECT_COLS} FROM documents WHERE id = ?1"), [id])
        .await?;
    rows.next().await?.map(|row| row_to_document(&row)).transpose()
}

pub(crate) async fn require_document(
    conn: &libsql::Connection,
    id: &str,
) -> Result<Document, StoreError> {
    fetch_document(conn, id)
        .await?
        .ok_or_else(|| StoreError::not_found("document", id))
}

pub(crate) async fn find_by_metadata(
    conn: &libsql::Connection,
    title: &str,
    jurisdiction: &str,
    regulation_family: &str,
    instrument_type: &str,
) -> Result<Option<Document>, StoreError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {SELECT_COLS} FROM documents
                 WHERE title = ?1 AND jurisdiction = ?2 AND regulation_family = ?3
                   AND instrument_type = ?4
                 ORDER BY created_at LIMIT 1"
            ),
            [title, jurisdiction, regulation_family, instrument_type],
        )
        .await?;
    rows.next().await?.map(|row| row_to_document(&row)).transpose()
}

/// The axis a new document gets: the operator's, or the deterministic rule's.
pub(crate) fn resolve_axis(new: &NewDocument) -> (String, PrimaryAxisSource) {
    match new.primary_axis.as_deref().map(str::trim) {
        Some(axis) if !axis.is_empty() => (axis.to_string(), PrimaryAxisSource::Upload),
        _ => {
            let (axis, source) = derive_primary_axis(&AxisSignals {
                jurisdiction: Some(&new.jurisdiction),
                title: Some(&new.title),
                regulation_family: Some(&new.regulation_family),
                instrument_type: Some(&new.instrument_type),
            });
            (axis.to_string(), source)
        }
    }
}

impl RegisService {
    /// Register a document. The full document is recorded in the ledger so
    /// its initial authoritative axis stays retrievable.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Validation` for a blank title.
    pub async fn create_document(
        &self,
        new: NewDocument,
        ctx: &OpContext,
    ) -> Result<Document, StoreError> {
        if new.title.trim().is_empty() {
            return Err(StoreError::Validation("document title must not be blank".into()));
        }
        let mut txn = self.begin_write().await?;
        let result = insert_document(&mut txn, &new, ctx).await;
        txn.finish(result).await
    }

    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no such document exists.
    pub async fn get_document(&self, id: &str) -> Result<Document, StoreError> {
        let _read = self.read_gate().await;
        require_document(self.db().conn(), id).await
    }

    /// Find the document registered under exactly this metadata.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    pub async fn find_document_by_metadata(
        &self,
        title: &str,
        jurisdiction: &str,
        regulation_family: &str,
        instrument_type: &str,
    ) -> Result<Option<Document>, StoreError> {
        let _read = self.read_gate().await;
        find_by_metadata(
            self.db().conn(),
            title,
            jurisdiction,
            regulation_family,
            instrument_type,
        )
        .await
    }

    /// All documents, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    pub async fn list_documents(&self, limit: u32) -> Result<Vec<Document>, StoreError> {
        let _read = self.read_gate().await;
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!("SELECT {SELECT_COLS} FROM documents ORDER BY created_at, id LIMIT ?1"),
                [i64::from(limit)],
            )
            .await?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next().await? {
            documents.push(row_to_document(&row)?);
        }
        Ok(documents)
    }
}

pub(crate) async fn insert_document(
    txn: &mut WriteTxn<'_>,
    new: &NewDocument,
    ctx: &OpContext,
) -> Result<Document, StoreError> {
    let now = Utc::now();
    let id = generate_id(txn.conn(), PREFIX_DOCUMENT).await?;
    let (primary_axis, primary_axis_source) = resolve_axis(new);

    txn.conn()
        .execute(
            &format!(
                "INSERT INTO documents ({SELECT_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?9)"
            ),
            libsql::params![
                id.as_str(),
                new.title.as_str(),
                new.jurisdiction.as_str(),
                new.regulation_family.as_str(),
                new.instrument_type.as_str(),
                primary_axis.as_str(),
                primary_axis_source.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339()
            ],
        )
        .await?;

    let document = Document {
        id: id.clone(),
        title: new.title.clone(),
        jurisdiction: new.jurisdiction.clone(),
        regulation_family: new.regulation_family.clone(),
        instrument_type: new.instrument_type.clone(),
        primary_axis,
        primary_axis_source,
        latest_version_id: None,
        created_at: now,
        updated_at: now,
    };

    txn.append(
        ctx,
        EntityType::Document,
        &id,
        AuditAction::Created,
        &DocumentCreatedDetail {
            document: document.clone(),
        },
    )
    .await?;

    tracing::info!(document_id = %id, axis = %document.primary_axis, source = %document.primary_axis_source, "document created");
    Ok(document)
}
