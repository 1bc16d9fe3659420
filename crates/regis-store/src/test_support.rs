//! Shared test utilities for regis-store unit tests.

#[cfg(test)]
pub(crate) mod helpers {
    use regis_config::{RegisConfig, StorageMode};
    use regis_core::context::OpContext;
    use regis_core::entities::{Document, DocumentVersion, NewDocument, VersionMetadata};
    use regis_core::hashing::ContentHash;

    use crate::RegisDb;
    use crate::blob::BlobStore;
    use crate::service::RegisService;

    /// Config for an in-memory database and blob store.
    pub fn memory_config() -> RegisConfig {
        let mut config = RegisConfig::default();
        config.database.path = ":memory:".into();
        config.storage.mode = StorageMode::Memory;
        config
    }

    /// Create an in-memory `RegisService`.
    pub async fn test_service() -> RegisService {
        let db = RegisDb::open_local(":memory:").await.unwrap();
        RegisService::from_parts(db, BlobStore::in_memory(), memory_config())
    }

    /// A fixed operation context.
    pub fn ctx() -> OpContext {
        OpContext::new("alice", "cor-test000000000001")
    }

    pub fn new_document(title: &str) -> NewDocument {
        NewDocument {
            title: title.to_string(),
            jurisdiction: "EU".into(),
            regulation_family: "Batteries".into(),
            instrument_type: "Regulation".into(),
            primary_axis: None,
        }
    }

    pub async fn seed_document(svc: &RegisService, title: &str) -> Document {
        svc.create_document(new_document(title), &ctx()).await.unwrap()
    }

    /// Store `bytes` as evidence and return its content hash.
    pub async fn seed_evidence(svc: &RegisService, bytes: &[u8]) -> ContentHash {
        svc.put_evidence(bytes, "application/pdf", &ctx())
            .await
            .unwrap()
            .file
            .sha256
    }

    /// A draft version of `document_id` backed by `bytes`.
    pub async fn seed_version(
        svc: &RegisService,
        document_id: &str,
        parent: Option<&str>,
        bytes: &[u8],
    ) -> DocumentVersion {
        let hash = seed_evidence(svc, bytes).await;
        svc.create_version(document_id, parent, &hash, VersionMetadata::default(), &ctx())
            .await
            .unwrap()
    }
}
