//! Disposable read model rebuilt purely from the ledger.
//!
//! Nothing here reads entity tables: every field is derived by replaying
//! event detail payloads in ledger order, so the model can be dropped and
//! rebuilt at any time. Live consumers feed [`ReadModel::apply`] from
//! [`RegisService::subscribe`].

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use regis_core::audit_detail::{
    ArtifactAttachedDetail, AxisPromotedDetail, AxisSuggestedDetail, DocumentCreatedDetail,
    StatusChangedDetail, VersionCreatedDetail,
};
use regis_core::entities::AuditEvent;
use regis_core::enums::{AuditAction, EntityType, PrimaryAxisSource, VersionStatus};

use crate::error::StoreError;
use crate::service::RegisService;

/// Events replayed per page during a rebuild.
const REPLAY_PAGE: i64 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
    pub primary_axis: String,
    pub primary_axis_source: PrimaryAxisSource,
    pub latest_version_id: Option<String>,
    pub version_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionSummary {
    pub id: String,
    pub document_id: String,
    pub parent_version_id: Option<String>,
    pub status: VersionStatus,
    pub artifact_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingSuggestion {
    pub version_id: String,
    pub axis: String,
    pub confidence: f64,
}

/// Denormalized summaries keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReadModel {
    pub documents: BTreeMap<String, DocumentSummary>,
    pub versions: BTreeMap<String, VersionSummary>,
    /// Suggestions not yet promoted, keyed by suggestion id.
    pub pending_suggestions: BTreeMap<String, PendingSuggestion>,
    /// Sequence number of the last event applied.
    pub last_seq: i64,
}

fn detail<T: DeserializeOwned>(event: &AuditEvent) -> Result<T, StoreError> {
    serde_json::from_value(event.details.clone()).map_err(|e| {
        StoreError::Query(format!(
            "event seq {} ({}) has malformed details: {e}",
            event.seq, event.action
        ))
    })
}

impl ReadModel {
    /// Apply one event. Events at or below `last_seq` are ignored, so a
    /// subscriber may safely overlap a rebuild.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Query` if a detail payload does not match its
    /// action.
    pub fn apply(&mut self, event: &AuditEvent) -> Result<(), StoreError> {
        if event.seq <= self.last_seq {
            return Ok(());
        }
        match (event.entity_type, event.action) {
            (EntityType::Document, AuditAction::Created) => {
                let d: DocumentCreatedDetail = detail(event)?;
                self.documents.insert(
                    d.document.id.clone(),
                    DocumentSummary {
                        id: d.document.id,
                        title: d.document.title,
                        primary_axis: d.document.primary_axis,
                        primary_axis_source: d.document.primary_axis_source,
                        latest_version_id: d.document.latest_version_id,
                        version_count: 0,
                    },
                );
            }
            (EntityType::Document, AuditAction::AxisPromoted) => {
                let d: AxisPromotedDetail = detail(event)?;
                if let Some(doc) = self.documents.get_mut(&event.entity_id) {
                    doc.primary_axis = d.to_axis;
                    doc.primary_axis_source = PrimaryAxisSource::Suggested;
                }
                self.pending_suggestions.remove(&d.suggestion_id);
            }
            (EntityType::Version, AuditAction::Created) => {
                let d: VersionCreatedDetail = detail(event)?;
                if let Some(doc) = self.documents.get_mut(&d.document_id) {
                    doc.version_count += 1;
                }
                self.versions.insert(
                    event.entity_id.clone(),
                    VersionSummary {
                        id: event.entity_id.clone(),
                        document_id: d.document_id,
                        parent_version_id: d.parent_version_id,
                        status: d.status,
                        artifact_count: 0,
                    },
                );
            }
            (EntityType::Version, AuditAction::StatusChanged) => {
                let d: StatusChangedDetail = detail(event)?;
                if let Some(version) = self.versions.get_mut(&event.entity_id) {
                    version.status = d.to;
                }
                if let Some(doc) = self.documents.get_mut(&d.document_id) {
                    if d.to == VersionStatus::Published {
                        doc.latest_version_id = Some(event.entity_id.clone());
                    } else if d.from == VersionStatus::Published
                        && doc.latest_version_id.as_deref() == Some(event.entity_id.as_str())
                    {
                        doc.latest_version_id = None;
                    }
                }
            }
            (EntityType::Version, AuditAction::Superseded) => {
                if let Some(version) = self.versions.get_mut(&event.entity_id) {
                    version.status = VersionStatus::Superseded;
                }
            }
            (EntityType::Version, AuditAction::ArtifactAttached) => {
                let _: ArtifactAttachedDetail = detail(event)?;
                if let Some(version) = self.versions.get_mut(&event.entity_id) {
                    version.artifact_count += 1;
                }
            }
            (EntityType::Suggestion, AuditAction::AxisSuggested) => {
                let d: AxisSuggestedDetail = detail(event)?;
                self.pending_suggestions.insert(
                    event.entity_id.clone(),
                    PendingSuggestion {
                        version_id: d.version_id,
                        axis: d.axis,
                        confidence: d.confidence,
                    },
                );
            }
            _ => {}
        }
        self.last_seq = event.seq;
        Ok(())
    }

    /// Versions per status.
    #[must_use]
    pub fn status_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for version in self.versions.values() {
            *counts.entry(version.status.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

impl RegisService {
    /// Replay the whole ledger into a fresh [`ReadModel`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the ledger cannot be read or holds a
    /// malformed payload.
    pub async fn rebuild_read_model(&self) -> Result<ReadModel, StoreError> {
        let mut model = ReadModel::default();
        loop {
            let page = self.events_after(model.last_seq, REPLAY_PAGE).await?;
            let len = page.len();
            for event in &page {
                model.apply(event)?;
            }
            if i64::try_from(len).unwrap_or(i64::MAX) < REPLAY_PAGE {
                break;
            }
        }
        tracing::debug!(
            last_seq = model.last_seq,
            documents = model.documents.len(),
            versions = model.versions.len(),
            "read model rebuilt"
        );
        Ok(model)
    }
}
