//! Upload ingestion: upload rules, content storage, document resolution,
//! dedup and version creation as one logical operation.

use serde::{Deserialize, Serialize};

use regis_core::context::OpContext;
use regis_core::entities::{Document, DocumentVersion, EvidenceFile, NewDocument, VersionMetadata};
use regis_core::enums::IngestStatus;

use crate::error::StoreError;
use crate::repos::document::{find_by_metadata, insert_document, resolve_axis};
use crate::repos::version::{find_version_by_content, insert_version};
use crate::service::{RegisService, WriteTxn};

/// An uploaded file with its document metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadRequest {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub title: String,
    pub jurisdiction: String,
    pub regulation_family: String,
    pub instrument_type: String,
    /// Operator-provided axis. Authoritative when present.
    pub primary_axis: Option<String>,
    pub parent_version_id: Option<String>,
    #[serde(default)]
    pub metadata: VersionMetadata,
    /// Create a version even when this document already has one with the
    /// same content.
    #[serde(default)]
    pub force_new_version: bool,
}

impl UploadRequest {
    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "title" => Some(&self.title),
            "jurisdiction" => Some(&self.jurisdiction),
            "regulation_family" => Some(&self.regulation_family),
            "instrument_type" => Some(&self.instrument_type),
            "mime_type" => Some(&self.mime_type),
            "primary_axis" => self.primary_axis.as_deref(),
            _ => None,
        }
    }

    fn new_document(&self) -> NewDocument {
        NewDocument {
            title: self.title.trim().to_string(),
            jurisdiction: self.jurisdiction.trim().to_string(),
            regulation_family: self.regulation_family.trim().to_string(),
            instrument_type: self.instrument_type.trim().to_string(),
            primary_axis: self.primary_axis.clone(),
        }
    }
}

/// Result of [`RegisService::ingest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub status: IngestStatus,
    pub document: Document,
    pub version: DocumentVersion,
    pub evidence: EvidenceFile,
}

impl RegisService {
    /// Ingest an upload.
    ///
    /// The bytes are stored content-addressed first. The document is found by
    /// its metadata or created, then a `DRAFT` version is created unless the
    /// document already has a version with identical content. Every event
    /// appended carries `ctx.correlation_id`.
    ///
    /// # Errors
    ///
    /// - `StoreError::Validation` if a required field is blank, the payload
    ///   exceeds the size limit, or the operator-provided axis contradicts
    ///   the existing document's axis.
    /// - `StoreError::InvalidParent` if the parent is missing or belongs to
    ///   another document.
    pub async fn ingest(
        &self,
        request: &UploadRequest,
        ctx: &OpContext,
    ) -> Result<IngestOutcome, StoreError> {
        self.enforce_upload_rules(request)?;

        let stored = self.put_evidence(&request.bytes, &request.mime_type, ctx).await?;
        let new = request.new_document();

        self.retrying("ingest", || async {
            let mut txn = self.begin_write().await?;
            let result = ingest_in_txn(&mut txn, request, &new, &stored.file, stored.reused, ctx).await;
            txn.finish(result).await
        })
        .await
    }

    fn enforce_upload_rules(&self, request: &UploadRequest) -> Result<(), StoreError> {
        let rules = &self.config().ingest;
        let missing: Vec<&str> = rules
            .required_fields
            .iter()
            .map(String::as_str)
            .filter(|name| request.field(name).is_none_or(|v| v.trim().is_empty()))
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }
        if request.mime_type.trim().is_empty() {
            return Err(StoreError::Validation("mime_type must not be blank".into()));
        }
        let size = u64::try_from(request.bytes.len()).unwrap_or(u64::MAX);
        if size > rules.max_upload_bytes() {
            return Err(StoreError::Validation(format!(
                "upload of {size} bytes exceeds the {} MiB limit",
                rules.max_upload_mb
            )));
        }
        Ok(())
    }
}

async fn ingest_in_txn(
    txn: &mut WriteTxn<'_>,
    request: &UploadRequest,
    new: &NewDocument,
    evidence: &EvidenceFile,
    evidence_reused: bool,
    ctx: &OpContext,
) -> Result<IngestOutcome, StoreError> {
    let existing = find_by_metadata(
        txn.conn(),
        &new.title,
        &new.jurisdiction,
        &new.regulation_family,
        &new.instrument_type,
    )
    .await?;

    let (document, created_document) = match existing {
        Some(document) => {
            if new.primary_axis.as_deref().is_some_and(|a| !a.trim().is_empty()) {
                let (requested, _) = resolve_axis(new);
                if requested != document.primary_axis {
                    return Err(StoreError::Validation(format!(
                        "primary_axis mismatch for document {}: stored {}, provided {requested}",
                        document.id, document.primary_axis
                    )));
                }
            }
            (document, false)
        }
        None => (insert_document(txn, new, ctx).await?, true),
    };

    if !created_document && !request.force_new_version {
        if let Some(version) =
            find_version_by_content(txn.conn(), &document.id, &evidence.sha256).await?
        {
            tracing::debug!(
                document_id = %document.id,
                version_id = %version.id,
                "identical upload, returning existing version"
            );
            return Ok(IngestOutcome {
                status: IngestStatus::DedupReturnedExisting,
                document,
                version,
                evidence: evidence.clone(),
            });
        }
    }

    let version = insert_version(
        txn,
        &document.id,
        request.parent_version_id.as_deref(),
        &evidence.sha256,
        &request.metadata,
        ctx,
    )
    .await?;

    let status = if created_document {
        IngestStatus::CreatedNewDocumentAndVersion
    } else if evidence_reused {
        IngestStatus::CreatedNewVersionReusedEvidence
    } else {
        IngestStatus::CreatedNewVersion
    };
    tracing::info!(
        document_id = %document.id,
        version_id = %version.id,
        status = %status,
        "upload ingested"
    );
    Ok(IngestOutcome {
        status,
        document,
        version,
        evidence: evidence.clone(),
    })
}
