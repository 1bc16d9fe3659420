//! Concurrent writers against one service on a multi-threaded runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use pretty_assertions::assert_eq;

use regis_config::{RegisConfig, StorageMode};
use regis_core::context::OpContext;
use regis_core::entities::{GeneratorIdentity, NewDocument, VersionMetadata};
use regis_core::enums::VersionStatus;
use regis_store::RegisDb;
use regis_store::blob::BlobStore;
use regis_store::cache::{GenerationRequest, Generator, GeneratorInput, GeneratorOutput, ResolveOrigin};
use regis_store::error::StoreError;
use regis_store::service::RegisService;

async fn test_service() -> Arc<RegisService> {
    let mut config = RegisConfig::default();
    config.database.path = ":memory:".into();
    config.storage.mode = StorageMode::Memory;
    let db = RegisDb::open_local(":memory:").await.unwrap();
    Arc::new(RegisService::from_parts(db, BlobStore::in_memory(), config))
}

fn op(actor: &str) -> OpContext {
    OpContext::new(actor, format!("cor-{actor}"))
}

async fn document_with_drafts(svc: &RegisService, drafts: usize) -> (String, Vec<String>) {
    let doc = svc
        .create_document(
            NewDocument {
                title: "Concurrent".into(),
                jurisdiction: "EU".into(),
                regulation_family: "Batteries".into(),
                instrument_type: "Regulation".into(),
                primary_axis: None,
            },
            &op("setup"),
        )
        .await
        .unwrap();
    let mut versions = Vec::with_capacity(drafts);
    for i in 0..drafts {
        let stored = svc
            .put_evidence(format!("text {i}").as_bytes(), "text/plain", &op("setup"))
            .await
            .unwrap();
        let version = svc
            .create_version(&doc.id, None, &stored.file.sha256, VersionMetadata::default(), &op("setup"))
            .await
            .unwrap();
        versions.push(version.id);
    }
    (doc.id, versions)
}

async fn published_count(svc: &RegisService, document_id: &str) -> usize {
    svc.list_versions(document_id)
        .await
        .unwrap()
        .iter()
        .filter(|v| v.status == VersionStatus::Published)
        .count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publishes_leave_one_published() {
    let svc = test_service().await;
    let (doc_id, versions) = document_with_drafts(&svc, 8).await;

    let watcher = {
        let svc = Arc::clone(&svc);
        let doc_id = doc_id.clone();
        tokio::spawn(async move {
            let mut max_seen = 0;
            for _ in 0..50 {
                max_seen = max_seen.max(published_count(&svc, &doc_id).await);
                tokio::task::yield_now().await;
            }
            max_seen
        })
    };

    let publishes = versions.iter().map(|id| {
        let svc = Arc::clone(&svc);
        let id = id.clone();
        tokio::spawn(async move { svc.transition(&id, VersionStatus::Published, &op("publisher")).await })
    });
    for joined in join_all(publishes).await {
        joined.unwrap().unwrap();
    }

    assert!(watcher.await.unwrap() <= 1);
    assert_eq!(published_count(&svc, &doc_id).await, 1);

    let statuses: Vec<VersionStatus> = svc
        .list_versions(&doc_id)
        .await
        .unwrap()
        .iter()
        .map(|v| v.status)
        .collect();
    assert_eq!(
        statuses.iter().filter(|s| **s == VersionStatus::Superseded).count(),
        versions.len() - 1
    );

    let latest = svc.get_document(&doc_id).await.unwrap().latest_version_id;
    let published = svc.published_version(&doc_id).await.unwrap().map(|v| v.id);
    assert_eq!(latest, published);
    assert!(svc.verify_chain(None, None).await.unwrap().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_keep_the_chain_linear() {
    let svc = test_service().await;
    let writes = (0..32).map(|i| {
        let svc = Arc::clone(&svc);
        tokio::spawn(async move {
            svc.put_evidence(format!("blob {i}").as_bytes(), "text/plain", &op("writer"))
                .await
        })
    });
    for joined in join_all(writes).await {
        joined.unwrap().unwrap();
    }

    let events = svc.events_range(1, i64::MAX).await.unwrap();
    assert_eq!(events.len(), 32);
    for pair in events.windows(2) {
        assert_eq!(pair[1].seq, pair[0].seq + 1);
        assert_eq!(pair[1].prev_event_hash, pair[0].event_hash);
    }
    assert!(svc.verify_chain(None, None).await.unwrap().is_ok());
}

struct SlowChunker {
    calls: AtomicUsize,
}

impl Generator for SlowChunker {
    async fn generate(&self, input: GeneratorInput) -> anyhow::Result<GeneratorOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(GeneratorOutput {
            bytes: input.content.to_ascii_uppercase(),
            generator: GeneratorIdentity::new("chunker", "1.0"),
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cold_cache_generates_once_for_many_callers() {
    let svc = test_service().await;
    let (_, versions) = document_with_drafts(&svc, 1).await;
    let generator = Arc::new(SlowChunker {
        calls: AtomicUsize::new(0),
    });
    let request = GenerationRequest {
        version_id: versions[0].clone(),
        generator: GeneratorIdentity::new("chunker", "1.0"),
        purpose: "chunking".into(),
        prompt_hash: None,
        config: serde_json::json!({"overlap": 32}),
    };

    let callers = (0..16).map(|_| {
        let svc = Arc::clone(&svc);
        let generator = Arc::clone(&generator);
        let request = request.clone();
        tokio::spawn(async move {
            svc.resolve_or_generate(&request, generator, &op("caller")).await
        })
    });
    let resolved: Vec<_> = join_all(callers)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect::<Result<Vec<_>, StoreError>>()
        .unwrap();

    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    let first = &resolved[0].artifact;
    assert!(resolved.iter().all(|r| r.artifact == *first));
    assert_eq!(
        resolved.iter().filter(|r| r.origin == ResolveOrigin::Generated).count(),
        1
    );
    assert_eq!(svc.get_artifact_bytes(&first.id).await.unwrap(), b"TEXT 0".to_vec());
    assert_eq!(svc.generations_in_flight(), 0);

    let again = svc
        .resolve_or_generate(&request, Arc::clone(&generator), &op("caller"))
        .await
        .unwrap();
    assert_eq!(again.origin, ResolveOrigin::Hit);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
}
