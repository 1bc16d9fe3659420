//! Singleflight artifact cache.
//!
//! [`RegisService::resolve_or_generate`] returns a previously produced
//! artifact when one exists for `(generator, input fingerprint)`. On a miss,
//! exactly one generation runs per key: the first caller spawns it and every
//! concurrent caller for the same key attaches to the same `watch` channel.
//!
//! The generation runs in its own task, so a caller that stops waiting (on
//! timeout or cancellation) does not abort it for the others. The registry
//! entry is removed once the result has been published, on every exit path.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

use regis_core::context::OpContext;
use regis_core::entities::{DerivedArtifact, DocumentVersion, GeneratorIdentity};
use regis_core::hashing::InputFingerprint;

use crate::blob::BlobKind;
use crate::error::StoreError;
use crate::repos::run::RunSpec;
use crate::service::RegisService;

/// What a generator is given.
#[derive(Debug, Clone)]
pub struct GeneratorInput {
    /// Verified source evidence bytes.
    pub content: Vec<u8>,
    pub config: serde_json::Value,
    pub prompt_hash: Option<String>,
}

/// What a generator returns: its output and the identity that produced it.
#[derive(Debug, Clone)]
pub struct GeneratorOutput {
    pub bytes: Vec<u8>,
    pub generator: GeneratorIdentity,
}

/// An external generator such as a chunker or a model runner. Opaque to the
/// store apart from the identity it reports.
pub trait Generator: Send + Sync + 'static {
    fn generate(
        &self,
        input: GeneratorInput,
    ) -> impl Future<Output = anyhow::Result<GeneratorOutput>> + Send;
}

/// A request to produce (or reuse) an artifact for a version.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub version_id: String,
    pub generator: GeneratorIdentity,
    pub purpose: String,
    pub prompt_hash: Option<String>,
    pub config: serde_json::Value,
}

/// Memoization key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub generator: GeneratorIdentity,
    pub fingerprint: InputFingerprint,
}

/// How a resolved artifact was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOrigin {
    /// Already recorded.
    Hit,
    /// Generated by a flight this caller started.
    Generated,
    /// Produced by a flight another caller started.
    Joined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub artifact: DerivedArtifact,
    pub origin: ResolveOrigin,
}

#[derive(Debug, Clone)]
struct Landed {
    artifact: DerivedArtifact,
    generated: bool,
}

/// Shareable failure of a flight.
#[derive(Debug, Clone)]
enum FlightFailure {
    Generator(String),
    Store(String),
}

impl From<FlightFailure> for StoreError {
    fn from(failure: FlightFailure) -> Self {
        match failure {
            FlightFailure::Generator(reason) => Self::GeneratorFailure(reason),
            FlightFailure::Store(reason) => Self::Other(anyhow::anyhow!(reason)),
        }
    }
}

type FlightResult = Result<Landed, FlightFailure>;
type FlightRx = watch::Receiver<Option<FlightResult>>;

enum Seat {
    Leader(watch::Sender<Option<FlightResult>>, FlightRx),
    Follower(FlightRx),
}

/// In-flight generations, one per key.
#[derive(Default)]
pub(crate) struct InflightRegistry {
    flights: Mutex<HashMap<CacheKey, FlightRx>>,
}

impl InflightRegistry {
    fn join(&self, key: &CacheKey) -> Seat {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(rx) = flights.get(key) {
            return Seat::Follower(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        flights.insert(key.clone(), rx.clone());
        Seat::Leader(tx, rx)
    }

    fn land(&self, key: &CacheKey) {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Number of generations currently in flight.
    pub(crate) fn len(&self) -> usize {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Removes the registry entry when the flight task ends, however it ends.
struct LandingGuard {
    service: Arc<RegisService>,
    key: CacheKey,
}

impl Drop for LandingGuard {
    fn drop(&mut self) {
        self.service.inflight.land(&self.key);
    }
}

impl RegisService {
    /// Return the artifact for `request`, generating it at most once per key.
    ///
    /// The returned artifact always belongs to `request.version_id` and is
    /// attached to it. Output produced for another version with identical
    /// content is recorded for this version too, sharing the stored blob.
    ///
    /// The input fingerprint covers the version's content hash, the generator
    /// configuration and the prompt hash. Waiting is bounded by the
    /// configured generator timeout plus a grace period; a caller that times
    /// out gets `GeneratorFailure` while the generation carries on.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the version is unknown.
    /// - `StoreError::GeneratorFailure` if the generator failed, timed out,
    ///   or reported a different identity. The run is recorded as failed and
    ///   nothing is cached.
    pub async fn resolve_or_generate<G: Generator>(
        self: &Arc<Self>,
        request: &GenerationRequest,
        generator: Arc<G>,
        ctx: &OpContext,
    ) -> Result<Resolved, StoreError> {
        let version = self.get_version(&request.version_id).await?;
        let fingerprint = InputFingerprint::compute(
            &version.raw_content_hash,
            &request.config,
            request.prompt_hash.as_deref(),
        );
        if let Some(artifact) = self
            .find_artifact(&version.id, &request.generator, &fingerprint)
            .await?
        {
            let artifact = if version.artifacts.contains_key(&artifact.to_ref().key()) {
                artifact
            } else {
                self.adopt_artifact(&version.id, &artifact, ctx).await?
            };
            return Ok(Resolved {
                artifact,
                origin: ResolveOrigin::Hit,
            });
        }
        // Another version with identical content already has this output.
        if let Some(artifact) = self.resolve(&request.generator, &fingerprint).await? {
            return Ok(Resolved {
                artifact: self.adopt_artifact(&version.id, &artifact, ctx).await?,
                origin: ResolveOrigin::Hit,
            });
        }

        let version_id = version.id.clone();

        let key = CacheKey {
            generator: request.generator.clone(),
            fingerprint,
        };
        let (rx, leader) = match self.inflight.join(&key) {
            Seat::Leader(tx, rx) => {
                let flight = Flight {
                    service: Arc::clone(self),
                    request: request.clone(),
                    version,
                    key: key.clone(),
                    ctx: ctx.clone(),
                };
                tokio::spawn(flight.run(generator, tx));
                (rx, true)
            }
            Seat::Follower(rx) => {
                tracing::debug!(generator = %key.generator, fingerprint = %key.fingerprint, "joining in-flight generation");
                (rx, false)
            }
        };

        let landed = await_flight(rx, self.config().cache.wait_timeout()).await?;
        let origin = match (leader, landed.generated) {
            (_, false) => ResolveOrigin::Hit,
            (true, true) => ResolveOrigin::Generated,
            (false, true) => ResolveOrigin::Joined,
        };
        // The flight may have been started for another version of the same
        // content.
        let artifact = if landed.artifact.version_id == version_id {
            landed.artifact
        } else {
            self.adopt_artifact(&version_id, &landed.artifact, ctx).await?
        };
        Ok(Resolved { artifact, origin })
    }

    /// Number of generations currently in flight.
    #[must_use]
    pub fn generations_in_flight(&self) -> usize {
        self.inflight.len()
    }
}

async fn await_flight(mut rx: FlightRx, wait: std::time::Duration) -> Result<Landed, StoreError> {
    let outcome = match tokio::time::timeout(wait, rx.wait_for(Option::is_some)).await {
        Err(_) => {
            return Err(StoreError::GeneratorFailure(format!(
                "timed out after {wait:?} waiting for generation"
            )));
        }
        Ok(Err(_)) => {
            return Err(StoreError::GeneratorFailure("generation task aborted".into()));
        }
        Ok(Ok(value)) => value.clone(),
    };
    match outcome {
        Some(result) => result.map_err(StoreError::from),
        None => Err(StoreError::GeneratorFailure("generation task aborted".into())),
    }
}

/// One generation, owned by its task.
struct Flight {
    service: Arc<RegisService>,
    request: GenerationRequest,
    version: DocumentVersion,
    key: CacheKey,
    ctx: OpContext,
}

impl Flight {
    async fn run<G: Generator>(self, generator: Arc<G>, tx: watch::Sender<Option<FlightResult>>) {
        let guard = LandingGuard {
            service: Arc::clone(&self.service),
            key: self.key.clone(),
        };
        let result = self.execute(generator.as_ref()).await;
        // Land before waking waiters so none of them sees the flight as live.
        drop(guard);
        // Receivers may all have gone; the result is recorded regardless.
        let _ = tx.send(Some(result));
    }

    async fn execute<G: Generator>(&self, generator: &G) -> FlightResult {
        let service = &self.service;
        let store_failure = |e: StoreError| FlightFailure::Store(e.to_string());

        // Another flight for this key may have landed since the caller's check.
        if let Some(artifact) = service
            .resolve(&self.key.generator, &self.key.fingerprint)
            .await
            .map_err(store_failure)?
        {
            return Ok(Landed {
                artifact,
                generated: false,
            });
        }

        let run = service
            .start_run(
                &RunSpec {
                    version_id: &self.version.id,
                    purpose: &self.request.purpose,
                    generator: &self.key.generator,
                    prompt_hash: self.request.prompt_hash.as_deref(),
                    input_fingerprint: &self.key.fingerprint,
                },
                &self.ctx,
            )
            .await
            .map_err(store_failure)?;

        match self.generate(generator).await {
            Ok(bytes) => {
                let (_, artifact) = service
                    .record_run_success(&run.id, &bytes, &self.ctx)
                    .await
                    .map_err(store_failure)?;
                Ok(Landed {
                    artifact,
                    generated: true,
                })
            }
            Err(reason) => {
                if let Err(e) = service.record_run_failure(&run.id, &reason, &self.ctx).await {
                    tracing::error!(run_id = %run.id, error = %e, "could not record failed run");
                }
                Err(FlightFailure::Generator(reason))
            }
        }
    }

    /// Fetch verified source bytes and call the generator under its timeout.
    async fn generate<G: Generator>(&self, generator: &G) -> Result<Vec<u8>, String> {
        let content = self
            .service
            .blobs()
            .fetch_verified(BlobKind::Evidence, &self.version.raw_content_hash)
            .await
            .map_err(|e| format!("source evidence unavailable: {e}"))?;
        let input = GeneratorInput {
            content,
            config: self.request.config.clone(),
            prompt_hash: self.request.prompt_hash.clone(),
        };

        let timeout = self.service.config().cache.generator_timeout();
        let output = match tokio::time::timeout(timeout, generator.generate(input)).await {
            Err(_) => return Err(format!("generator timed out after {timeout:?}")),
            Ok(Err(e)) => return Err(format!("{e:#}")),
            Ok(Ok(output)) => output,
        };
        if output.generator != self.key.generator {
            return Err(format!(
                "generator reported identity {}, expected {}",
                output.generator, self.key.generator
            ));
        }
        Ok(output.bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use regis_core::enums::RunStatus;

    use super::*;
    use crate::RegisDb;
    use crate::blob::BlobStore;
    use crate::test_support::helpers::{ctx, memory_config, seed_document, seed_version, test_service};

    struct Chunker {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl Chunker {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                fail: false,
            }
        }
    }

    impl Generator for Chunker {
        async fn generate(&self, input: GeneratorInput) -> anyhow::Result<GeneratorOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                anyhow::bail!("chunker crashed");
            }
            let mut bytes = b"chunks:".to_vec();
            bytes.extend_from_slice(&input.content);
            Ok(GeneratorOutput {
                bytes,
                generator: GeneratorIdentity::new("chunker", "1.0"),
            })
        }
    }

    fn request(version_id: &str) -> GenerationRequest {
        GenerationRequest {
            version_id: version_id.to_string(),
            generator: GeneratorIdentity::new("chunker", "1.0"),
            purpose: "chunking".into(),
            prompt_hash: None,
            config: serde_json::json!({"max_tokens": 512}),
        }
    }

    async fn service_with_version() -> (Arc<RegisService>, String) {
        let svc = test_service().await;
        let doc = seed_document(&svc, "DOC1").await;
        let v = seed_version(&svc, &doc.id, None, b"source text").await;
        (Arc::new(svc), v.id)
    }

    #[tokio::test]
    async fn miss_generates_then_hits() {
        let (svc, version_id) = service_with_version().await;
        let chunker = Arc::new(Chunker::new(Duration::ZERO));

        let first = svc
            .resolve_or_generate(&request(&version_id), Arc::clone(&chunker), &ctx())
            .await
            .unwrap();
        assert_eq!(first.origin, ResolveOrigin::Generated);
        assert_eq!(
            svc.get_artifact_bytes(&first.artifact.id).await.unwrap(),
            b"chunks:source text"
        );

        let second = svc
            .resolve_or_generate(&request(&version_id), Arc::clone(&chunker), &ctx())
            .await
            .unwrap();
        assert_eq!(second.origin, ResolveOrigin::Hit);
        assert_eq!(second.artifact, first.artifact);
        assert_eq!(chunker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(svc.generations_in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_share_one_generation() {
        let (svc, version_id) = service_with_version().await;
        let chunker = Arc::new(Chunker::new(Duration::from_millis(200)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let svc = Arc::clone(&svc);
            let chunker = Arc::clone(&chunker);
            let req = request(&version_id);
            handles.push(tokio::spawn(async move {
                svc.resolve_or_generate(&req, chunker, &ctx()).await.unwrap()
            }));
        }
        let mut artifacts = Vec::new();
        for handle in handles {
            artifacts.push(handle.await.unwrap().artifact);
        }

        assert_eq!(chunker.calls.load(Ordering::SeqCst), 1);
        assert!(artifacts.iter().all(|a| *a == artifacts[0]));
        assert_eq!(svc.list_runs(&version_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn identical_content_in_another_version_is_adopted() {
        let (svc, v1) = service_with_version().await;
        let doc_id = svc.get_version(&v1).await.unwrap().document_id;
        let v2 = seed_version(&svc, &doc_id, Some(&v1), b"source text").await.id;
        let chunker = Arc::new(Chunker::new(Duration::ZERO));

        let first = svc
            .resolve_or_generate(&request(&v1), Arc::clone(&chunker), &ctx())
            .await
            .unwrap();
        let second = svc
            .resolve_or_generate(&request(&v2), Arc::clone(&chunker), &ctx())
            .await
            .unwrap();

        assert_eq!(second.origin, ResolveOrigin::Hit);
        assert_eq!(second.artifact.version_id, v2);
        assert_eq!(second.artifact.content_hash, first.artifact.content_hash);
        assert_eq!(second.artifact.storage_uri, first.artifact.storage_uri);
        assert_eq!(chunker.calls.load(Ordering::SeqCst), 1);
        assert!(svc.list_runs(&v2).await.unwrap().is_empty());

        let adopted = svc.get_version(&v2).await.unwrap();
        assert_eq!(adopted.artifacts.len(), 1);
        assert_eq!(
            svc.get_artifact_bytes(&second.artifact.id).await.unwrap(),
            b"chunks:source text"
        );
        // Already attached, so attaching again is a no-op.
        assert!(
            !svc.attach_artifact(&v2, &second.artifact.to_ref(), &ctx())
                .await
                .unwrap()
        );

        // The adopted record is now a plain hit for its own version.
        let third = svc
            .resolve_or_generate(&request(&v2), Arc::clone(&chunker), &ctx())
            .await
            .unwrap();
        assert_eq!(third.artifact, second.artifact);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn abandoned_leader_does_not_cancel_generation() {
        let (svc, version_id) = service_with_version().await;
        let chunker = Arc::new(Chunker::new(Duration::from_millis(300)));

        let leader = {
            let svc = Arc::clone(&svc);
            let chunker = Arc::clone(&chunker);
            let req = request(&version_id);
            tokio::spawn(async move { svc.resolve_or_generate(&req, chunker, &ctx()).await })
        };
        while svc.generations_in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let follower = {
            let svc = Arc::clone(&svc);
            let chunker = Arc::clone(&chunker);
            let req = request(&version_id);
            tokio::spawn(async move { svc.resolve_or_generate(&req, chunker, &ctx()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());

        let joined = follower.await.unwrap().unwrap();
        assert_eq!(joined.origin, ResolveOrigin::Joined);
        assert_eq!(joined.artifact.version_id, version_id);
        assert_eq!(chunker.calls.load(Ordering::SeqCst), 1);

        let runs = svc.list_runs(&version_id).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Succeeded);
        assert_eq!(runs[0].artifact_id.as_deref(), Some(joined.artifact.id.as_str()));
        assert_eq!(svc.generations_in_flight(), 0);
    }

    #[tokio::test]
    async fn changed_config_misses() {
        let (svc, version_id) = service_with_version().await;
        let chunker = Arc::new(Chunker::new(Duration::ZERO));
        let a = svc
            .resolve_or_generate(&request(&version_id), Arc::clone(&chunker), &ctx())
            .await
            .unwrap();
        let mut other = request(&version_id);
        other.config = serde_json::json!({"max_tokens": 256});
        let b = svc
            .resolve_or_generate(&other, Arc::clone(&chunker), &ctx())
            .await
            .unwrap();

        assert_ne!(a.artifact.input_fingerprint, b.artifact.input_fingerprint);
        assert_eq!(chunker.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_is_recorded_and_not_cached() {
        let (svc, version_id) = service_with_version().await;
        let failing = Arc::new(Chunker {
            fail: true,
            ..Chunker::new(Duration::ZERO)
        });

        let err = svc
            .resolve_or_generate(&request(&version_id), Arc::clone(&failing), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::GeneratorFailure(ref m) if m.contains("chunker crashed")));

        let runs = svc.list_runs(&version_id).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(svc.generations_in_flight(), 0);

        // A later attempt runs again with a fresh run.
        let healthy = Arc::new(Chunker::new(Duration::ZERO));
        let ok = svc
            .resolve_or_generate(&request(&version_id), healthy, &ctx())
            .await
            .unwrap();
        assert_eq!(ok.origin, ResolveOrigin::Generated);
        assert_eq!(svc.list_runs(&version_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn wrong_identity_is_a_failure() {
        struct Liar;
        impl Generator for Liar {
            async fn generate(&self, _input: GeneratorInput) -> anyhow::Result<GeneratorOutput> {
                Ok(GeneratorOutput {
                    bytes: b"x".to_vec(),
                    generator: GeneratorIdentity::new("chunker", "9.9"),
                })
            }
        }
        let (svc, version_id) = service_with_version().await;
        let err = svc
            .resolve_or_generate(&request(&version_id), Arc::new(Liar), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::GeneratorFailure(_)));
    }

    #[tokio::test]
    async fn slow_generator_times_out_waiters() {
        let mut config = memory_config();
        config.cache.generator_timeout_secs = 1;
        config.cache.wait_grace_ms = 0;
        let db = RegisDb::open_local(":memory:").await.unwrap();
        let svc = RegisService::from_parts(db, BlobStore::in_memory(), config);
        let doc = seed_document(&svc, "DOC1").await;
        let v = seed_version(&svc, &doc.id, None, b"source").await;
        let svc = Arc::new(svc);

        let slow = Arc::new(Chunker::new(Duration::from_secs(30)));
        let err = svc
            .resolve_or_generate(&request(&v.id), slow, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::GeneratorFailure(_)));
    }
}
