//! Content-addressed blob storage over `object_store`.
//!
//! Blobs are written once under `{kind}/{hash[..2]}/{hash}` and never
//! overwritten. Concurrent writers of the same hash race on a create-only put;
//! the loser observes `AlreadyExists` and treats the blob as stored.

use std::path::Path;
use std::sync::Arc;

use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutMode, PutPayload};
use regis_config::{StorageConfig, StorageMode};
use regis_core::hashing::ContentHash;

use crate::error::StoreError;

/// Namespace a blob lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Evidence,
    Artifact,
}

impl BlobKind {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Evidence => "evidence",
            Self::Artifact => "artifacts",
        }
    }
}

/// Result of a write-once put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub uri: String,
    /// `true` when the blob was already present and nothing was written.
    pub existed: bool,
}

/// Durable, strongly consistent per-key blob storage.
pub struct BlobStore {
    inner: Arc<dyn ObjectStore>,
    uri_base: String,
}

impl BlobStore {
    /// Blobs under a local directory, created if missing.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the directory cannot be created or opened.
    pub fn local(root: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root).map_err(|e| StoreError::Other(e.into()))?;
        let root = root.canonicalize().map_err(|e| StoreError::Other(e.into()))?;
        let fs = LocalFileSystem::new_with_prefix(&root)?;
        Ok(Self {
            inner: Arc::new(fs),
            uri_base: format!("file://{}", root.display()),
        })
    }

    /// Process-local blobs, lost on drop.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
            uri_base: "memory://".to_string(),
        }
    }

    /// Build the backend selected by `storage.mode`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if a local root cannot be prepared.
    pub fn from_config(config: &StorageConfig) -> Result<Self, StoreError> {
        match config.mode {
            StorageMode::Local => Self::local(&config.root),
            StorageMode::Memory => Ok(Self::in_memory()),
        }
    }

    fn location(kind: BlobKind, hash: &ContentHash) -> ObjectPath {
        ObjectPath::from(format!("{}/{}/{}", kind.prefix(), hash.shard(), hash))
    }

    fn uri(&self, location: &ObjectPath) -> String {
        if self.uri_base.ends_with('/') {
            format!("{}{location}", self.uri_base)
        } else {
            format!("{}/{location}", self.uri_base)
        }
    }

    /// Whether a blob with this hash is stored.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ObjectStore` on backend failure.
    pub async fn exists(&self, kind: BlobKind, hash: &ContentHash) -> Result<bool, StoreError> {
        match self.inner.head(&Self::location(kind, hash)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Store `bytes` under `hash` unless already present.
    ///
    /// The caller is responsible for `hash` being the hash of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ObjectStore` on backend failure.
    pub async fn put_if_absent(
        &self,
        kind: BlobKind,
        hash: &ContentHash,
        bytes: &[u8],
    ) -> Result<StoredBlob, StoreError> {
        let location = Self::location(kind, hash);
        let uri = self.uri(&location);
        if self.exists(kind, hash).await? {
            tracing::debug!(%hash, "blob already stored");
            return Ok(StoredBlob { uri, existed: true });
        }
        let payload = PutPayload::from(bytes.to_vec());
        match self.inner.put_opts(&location, payload, PutMode::Create.into()).await {
            Ok(_) => Ok(StoredBlob {
                uri,
                existed: false,
            }),
            Err(object_store::Error::AlreadyExists { .. }) => {
                tracing::debug!(%hash, "lost blob create race, reusing existing");
                Ok(StoredBlob { uri, existed: true })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch the blob stored under `hash` and check it still hashes to `hash`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if absent and
    /// `StoreError::IntegrityMismatch` if the bytes were altered.
    pub async fn fetch_verified(
        &self,
        kind: BlobKind,
        hash: &ContentHash,
    ) -> Result<Vec<u8>, StoreError> {
        let bytes = self
            .inner
            .get(&Self::location(kind, hash))
            .await?
            .bytes()
            .await?
            .to_vec();
        let actual = ContentHash::of(&bytes);
        if &actual != hash {
            tracing::error!(expected = %hash, %actual, "blob failed integrity check");
            return Err(StoreError::IntegrityMismatch {
                expected: hash.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(bytes)
    }

    /// Overwrite a stored blob, bypassing the write-once rule. Corruption
    /// simulation for tests only.
    #[cfg(test)]
    pub(crate) async fn overwrite(&self, kind: BlobKind, hash: &ContentHash, bytes: &[u8]) {
        self.inner
            .put(&Self::location(kind, hash), PutPayload::from(bytes.to_vec()))
            .await
            .unwrap();
    }
}
