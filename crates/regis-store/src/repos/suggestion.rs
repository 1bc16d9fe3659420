//! Classification overlay: model-produced axis suggestions and their explicit
//! promotion to a document's authoritative primary axis.

use chrono::Utc;

use regis_core::audit_detail::{AxisPromotedDetail, AxisSuggestedDetail};
use regis_core::context::OpContext;
use regis_core::entities::{AxisSuggestion, Document};
use regis_core::enums::{AuditAction, EntityType, PrimaryAxisSource};
use regis_core::ids::PREFIX_SUGGESTION;

use crate::error::StoreError;
use crate::generate_id;
use crate::helpers::{get_opt_string, parse_datetime, parse_json, parse_optional_datetime};
use crate::repos::document::require_document;
use crate::repos::version::require_version;
use crate::service::{RegisService, WriteTxn};

const SELECT_COLS: &str = "id, version_id, document_id, axis, model, confidence, details, \
                           promoted_at, created_at, updated_at";

fn row_to_suggestion(row: &libsql::Row) -> Result<AxisSuggestion, StoreError> {
    Ok(AxisSuggestion {
        id: row.get(0)?,
        version_id: row.get(1)?,
        document_id: row.get(2)?,
        axis: row.get(3)?,
        model: row.get(4)?,
        confidence: row.get(5)?,
        details: parse_json(&row.get::<String>(6)?)?,
        promoted_at: parse_optional_datetime(get_opt_string(row, 7)?.as_deref())?,
        created_at: parse_datetime(&row.get::<String>(8)?)?,
        updated_at: parse_datetime(&row.get::<String>(9)?)?,
    })
}

async fn fetch_where(
    conn: &libsql::Connection,
    column: &str,
    value: &str,
) -> Result<Option<AxisSuggestion>, StoreError> {
    let mut rows = conn
        .query(
            &format!("SELECT {SELECT_COLS} FROM axis_suggestions WHERE {column} = ?1"),
            [value],
        )
        .await?;
    rows.next().await?.map(|row| row_to_suggestion(&row)).transpose()
}

impl RegisService {
    /// Record a model's axis proposal for a version, replacing any earlier
    /// proposal for the same version. The document is not touched.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the version is unknown.
    /// - `StoreError::Validation` if `confidence` is outside `0.0..=1.0` or
    ///   `axis` is blank.
    pub async fn suggest(
        &self,
        version_id: &str,
        axis: &str,
        model: &str,
        confidence: f64,
        details: serde_json::Value,
        ctx: &OpContext,
    ) -> Result<AxisSuggestion, StoreError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(StoreError::Validation(format!(
                "confidence must be within 0..=1, got {confidence}"
            )));
        }
        if axis.trim().is_empty() {
            return Err(StoreError::Validation("suggested axis must not be blank".into()));
        }
        let mut txn = self.begin_write().await?;
        let result = upsert_suggestion(&mut txn, version_id, axis, model, confidence, &details, ctx).await;
        txn.finish(result).await
    }

    /// Make a suggestion the document's authoritative primary axis.
    ///
    /// The ledger event records the axis and source being replaced. Promoting
    /// a suggestion whose axis is already the document's suggested axis is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the suggestion is unknown.
    pub async fn promote(&self, suggestion_id: &str, ctx: &OpContext) -> Result<Document, StoreError> {
        let mut txn = self.begin_write().await?;
        let result = promote_suggestion(&mut txn, suggestion_id, ctx).await;
        txn.finish(result).await
    }

    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no such suggestion exists.
    pub async fn get_suggestion(&self, id: &str) -> Result<AxisSuggestion, StoreError> {
        let _read = self.read_gate().await;
        fetch_where(self.db().conn(), "id", id)
            .await?
            .ok_or_else(|| StoreError::not_found("suggestion", id))
    }

    /// The current suggestion for a version, if any.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    pub async fn suggestion_for_version(
        &self,
        version_id: &str,
    ) -> Result<Option<AxisSuggestion>, StoreError> {
        let _read = self.read_gate().await;
        fetch_where(self.db().conn(), "version_id", version_id).await
    }
}

async fn upsert_suggestion(
    txn: &mut WriteTxn<'_>,
    version_id: &str,
    axis: &str,
    model: &str,
    confidence: f64,
    details: &serde_json::Value,
    ctx: &OpContext,
) -> Result<AxisSuggestion, StoreError> {
    let version = require_version(txn.conn(), version_id).await?;
    let now = Utc::now().to_rfc3339();
    let id = generate_id(txn.conn(), PREFIX_SUGGESTION).await?;

    // A replaced suggestion keeps its id and creation time, and is no longer
    // promoted.
    txn.conn()
        .execute(
            &format!(
                "INSERT INTO axis_suggestions ({SELECT_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?8)
                 ON CONFLICT (version_id) DO UPDATE SET
                     axis = excluded.axis,
                     model = excluded.model,
                     confidence = excluded.confidence,
                     details = excluded.details,
                     promoted_at = NULL,
                     updated_at = excluded.updated_at"
            ),
            libsql::params![
                id.as_str(),
                version_id,
                version.document_id.as_str(),
                axis,
                model,
                confidence,
                serde_json::to_string(details)?,
                now.as_str()
            ],
        )
        .await?;

    let suggestion = fetch_where(txn.conn(), "version_id", version_id)
        .await?
        .ok_or_else(|| StoreError::not_found("suggestion", version_id))?;

    txn.append(
        ctx,
        EntityType::Suggestion,
        &suggestion.id,
        AuditAction::AxisSuggested,
        &AxisSuggestedDetail {
            version_id: version_id.to_string(),
            axis: axis.to_string(),
            model: model.to_string(),
            confidence,
        },
    )
    .await?;

    tracing::info!(suggestion_id = %suggestion.id, version_id, axis, model, "axis suggested");
    Ok(suggestion)
}

async fn promote_suggestion(
    txn: &mut WriteTxn<'_>,
    suggestion_id: &str,
    ctx: &OpContext,
) -> Result<Document, StoreError> {
    let suggestion = fetch_where(txn.conn(), "id", suggestion_id)
        .await?
        .ok_or_else(|| StoreError::not_found("suggestion", suggestion_id))?;
    let document = require_document(txn.conn(), &suggestion.document_id).await?;

    if document.primary_axis_source == PrimaryAxisSource::Suggested
        && document.primary_axis == suggestion.axis
    {
        tracing::debug!(suggestion_id, document_id = %document.id, "axis already promoted");
        return Ok(document);
    }

    let now = Utc::now().to_rfc3339();
    txn.conn()
        .execute(
            "UPDATE documents SET primary_axis = ?1, primary_axis_source = ?2, updated_at = ?3
             WHERE id = ?4",
            [
                suggestion.axis.as_str(),
                PrimaryAxisSource::Suggested.as_str(),
                now.as_str(),
                document.id.as_str(),
            ],
        )
        .await?;
    txn.conn()
        .execute(
            "UPDATE axis_suggestions SET promoted_at = ?1 WHERE id = ?2",
            [now.as_str(), suggestion_id],
        )
        .await?;

    txn.append(
        ctx,
        EntityType::Document,
        &document.id,
        AuditAction::AxisPromoted,
        &AxisPromotedDetail {
            suggestion_id: suggestion_id.to_string(),
            from_axis: document.primary_axis.clone(),
            from_source: document.primary_axis_source,
            to_axis: suggestion.axis.clone(),
            confidence: suggestion.confidence,
        },
    )
    .await?;

    tracing::info!(
        document_id = %document.id,
        from = %document.primary_axis,
        to = %suggestion.axis,
        "suggested axis promoted"
    );
    require_document(txn.conn(), &document.id).await
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::test_support::helpers::{ctx, seed_document, seed_version, test_service};

    #[tokio::test]
    async fn suggestion_never_touches_document() {
        let svc = test_service().await;
        let doc = seed_document(&svc, "DOC1").await;
        let v = seed_version(&svc, &doc.id, None, b"v1").await;

        let suggestion = svc
            .suggest(&v.id, "product_scope", "classifier-1", 0.75, json!({"why": "batteries"}), &ctx())
            .await
            .unwrap();
        assert!(suggestion.promoted_at.is_none());

        let after = svc.get_document(&doc.id).await.unwrap();
        assert_eq!(after.primary_axis, doc.primary_axis);
        assert_eq!(after.primary_axis_source, doc.primary_axis_source);
    }

    #[tokio::test]
    async fn one_suggestion_per_version() {
        let svc = test_service().await;
        let doc = seed_document(&svc, "DOC1").await;
        let v = seed_version(&svc, &doc.id, None, b"v1").await;

        let first = svc.suggest(&v.id, "theme", "m1", 0.5, json!({}), &ctx()).await.unwrap();
        let second = svc
            .suggest(&v.id, "product_scope", "m2", 0.75, json!({}), &ctx())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.axis, "product_scope");
        assert_eq!(second.model, "m2");
        assert_eq!(
            svc.suggestion_for_version(&v.id).await.unwrap().map(|s| s.axis),
            Some("product_scope".to_string())
        );
    }

    #[tokio::test]
    async fn confidence_out_of_range_rejected() {
        let svc = test_service().await;
        let doc = seed_document(&svc, "DOC1").await;
        let v = seed_version(&svc, &doc.id, None, b"v1").await;
        for bad in [-0.5, 1.5, f64::NAN] {
            let err = svc.suggest(&v.id, "theme", "m", bad, json!({}), &ctx()).await.unwrap_err();
            assert!(matches!(err, StoreError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn promotion_sets_suggested_source_and_keeps_prior_axis_in_ledger() {
        let svc = test_service().await;
        let doc = seed_document(&svc, "DOC1").await;
        let v = seed_version(&svc, &doc.id, None, b"v1").await;
        let suggestion = svc
            .suggest(&v.id, "product_scope", "m1", 0.75, json!({}), &ctx())
            .await
            .unwrap();

        let promoted = svc.promote(&suggestion.id, &ctx()).await.unwrap();
        assert_eq!(promoted.primary_axis, "product_scope");
        assert_eq!(promoted.primary_axis_source, PrimaryAxisSource::Suggested);
        assert!(svc.get_suggestion(&suggestion.id).await.unwrap().promoted_at.is_some());

        let events = svc.events_for_entity(EntityType::Document, &doc.id).await.unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.action, AuditAction::AxisPromoted);
        let detail: AxisPromotedDetail = serde_json::from_value(last.details.clone()).unwrap();
        assert_eq!(detail.from_axis, doc.primary_axis);
        assert_eq!(detail.from_source, PrimaryAxisSource::DeterministicRule);
        assert_eq!(detail.to_axis, "product_scope");
    }

    #[tokio::test]
    async fn promoting_twice_is_a_noop() {
        let svc = test_service().await;
        let doc = seed_document(&svc, "DOC1").await;
        let v = seed_version(&svc, &doc.id, None, b"v1").await;
        let suggestion = svc.suggest(&v.id, "theme", "m1", 0.5, json!({}), &ctx()).await.unwrap();

        svc.promote(&suggestion.id, &ctx()).await.unwrap();
        let seq = svc.tail().await.unwrap().map(|e| e.seq);
        svc.promote(&suggestion.id, &ctx()).await.unwrap();
        assert_eq!(svc.tail().await.unwrap().map(|e| e.seq), seq);
    }
}
