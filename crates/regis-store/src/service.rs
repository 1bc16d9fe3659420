//! Service layer orchestrating mutations with the audit ledger.
//!
//! `RegisService` wraps `RegisDb` (relational state), `BlobStore` (content
//! store) and the ledger write gate. All repo methods are implemented as
//! `impl RegisService` in `crate::repos`.

use std::sync::{Mutex, PoisonError};

use regis_config::RegisConfig;
use regis_core::context::OpContext;
use regis_core::entities::AuditEvent;
use regis_core::enums::{AuditAction, EntityType};
use regis_core::ids::PREFIX_CORRELATION;
use serde::Serialize;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, broadcast};

use crate::RegisDb;
use crate::blob::BlobStore;
use crate::cache::InflightRegistry;
use crate::error::StoreError;
use crate::repos::audit::LedgerCursor;
use crate::retry::{RetryConfig, with_retry};

/// Capacity of the committed-event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Where the ledger was found broken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerHalt {
    pub seq: i64,
    pub reason: String,
}

/// Orchestrates mutations with the hash-chained audit ledger.
///
/// Every mutation method follows this protocol:
/// 1. Take the write gate (one writer at a time, readers excluded)
/// 2. Begin an immediate transaction and load the ledger tail
/// 3. Execute SQL
/// 4. Append ledger events (inside the transaction)
/// 5. Commit and broadcast the committed events, then release the gate
///
/// Readers take the gate shared, so they never observe a half-applied
/// mutation.
pub struct RegisService {
    db: RegisDb,
    blobs: BlobStore,
    config: RegisConfig,
    retry: RetryConfig,
    gate: RwLock<()>,
    halt: Mutex<Option<LedgerHalt>>,
    events: broadcast::Sender<AuditEvent>,
    pub(crate) inflight: InflightRegistry,
}

impl RegisService {
    /// Open the database and blob store named by `config`.
    ///
    /// With `ledger.verify_on_open` the whole chain is verified first; a broken
    /// chain leaves the service open for inspection but halts writes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the database or blob store cannot be opened.
    pub async fn open(config: RegisConfig) -> Result<Self, StoreError> {
        let path = config.database.path.to_str().ok_or_else(|| {
            StoreError::Validation(format!(
                "database path is not valid UTF-8: {}",
                config.database.path.display()
            ))
        })?;
        if !config.database.is_in_memory() {
            if let Some(parent) = config.database.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| StoreError::Other(e.into()))?;
                }
            }
        }
        let db = RegisDb::open_local(path).await?;
        let blobs = BlobStore::from_config(&config.storage)?;
        let verify = config.ledger.verify_on_open;
        let service = Self::from_parts(db, blobs, config);

        if verify {
            let outcome = service.verify_chain(None, None).await?;
            tracing::info!(?outcome, "ledger verified on open");
        }
        Ok(service)
    }

    /// Assemble a service from already-open parts.
    #[must_use]
    pub fn from_parts(db: RegisDb, blobs: BlobStore, config: RegisConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let retry = RetryConfig::from(&config.retry);
        Self {
            db,
            blobs,
            config,
            retry,
            gate: RwLock::new(()),
            halt: Mutex::new(None),
            events,
            inflight: InflightRegistry::default(),
        }
    }

    /// Access the underlying database handle.
    #[must_use]
    pub const fn db(&self) -> &RegisDb {
        &self.db
    }

    #[must_use]
    pub const fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    #[must_use]
    pub const fn config(&self) -> &RegisConfig {
        &self.config
    }

    /// Start a logical operation for `actor` with a fresh correlation id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if id generation fails.
    pub async fn new_context(&self, actor: &str) -> Result<OpContext, StoreError> {
        let correlation_id = self.db.generate_id(PREFIX_CORRELATION).await?;
        Ok(OpContext::new(actor, correlation_id))
    }

    /// Receive every committed ledger event, in ledger order.
    ///
    /// Events are sent after their transaction commits. A receiver that falls
    /// more than the channel capacity behind gets `RecvError::Lagged` and
    /// should rebuild from the ledger.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Ledger halt
    // -----------------------------------------------------------------------

    /// The recorded chain break, if writes are halted.
    #[must_use]
    pub fn halted(&self) -> Option<LedgerHalt> {
        self.halt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn halt_writes(&self, seq: i64, reason: &str) {
        tracing::error!(seq, reason, "audit chain broken, halting writes");
        let mut halt = self.halt.lock().unwrap_or_else(PoisonError::into_inner);
        if halt.is_none() {
            *halt = Some(LedgerHalt {
                seq,
                reason: reason.to_string(),
            });
        }
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        match self.halted() {
            Some(LedgerHalt { seq, reason }) => Err(StoreError::ChainBroken { seq, reason }),
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Gate and transactions
    // -----------------------------------------------------------------------

    /// Shared access for reads.
    pub(crate) async fn read_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().await
    }

    /// Exclusive access plus an open transaction positioned at the ledger tail.
    pub(crate) async fn begin_write(&self) -> Result<WriteTxn<'_>, StoreError> {
        let gate = self.gate.write().await;
        self.ensure_writable()?;
        let tx = self
            .db
            .conn()
            .transaction_with_behavior(libsql::TransactionBehavior::Immediate)
            .await?;
        let ledger = match LedgerCursor::load(&tx).await {
            Ok(cursor) => cursor,
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!(error = %rb, "rollback failed");
                }
                return Err(e);
            }
        };
        Ok(WriteTxn {
            _gate: gate,
            tx,
            ledger,
            events: &self.events,
        })
    }

    /// Run `op` under the configured retry policy.
    pub(crate) async fn retrying<T, F, Fut>(&self, name: &str, op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        with_retry(&self.retry, name, op).await
    }

    /// Append a single event recording an external mutation.
    ///
    /// This is the ledger's only public mutation primitive; there is no
    /// update or delete.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ChainBroken` while writes are halted.
    pub async fn append_event(
        &self,
        ctx: &OpContext,
        entity_type: EntityType,
        entity_id: &str,
        action: AuditAction,
        details: serde_json::Value,
    ) -> Result<AuditEvent, StoreError> {
        self.retrying("append_event", || async {
            let mut txn = self.begin_write().await?;
            let result = txn
                .append(ctx, entity_type, entity_id, action, &details)
                .await;
            txn.finish(result).await
        })
        .await
    }
}

/// An open write: the gate, a transaction, and the ledger cursor.
pub(crate) struct WriteTxn<'a> {
    _gate: RwLockWriteGuard<'a, ()>,
    tx: libsql::Transaction,
    ledger: LedgerCursor,
    events: &'a broadcast::Sender<AuditEvent>,
}

impl WriteTxn<'_> {
    pub(crate) fn conn(&self) -> &libsql::Connection {
        &self.tx
    }

    /// Append a ledger event inside this transaction.
    pub(crate) async fn append<D: Serialize + Sync>(
        &mut self,
        ctx: &OpContext,
        entity_type: EntityType,
        entity_id: &str,
        action: AuditAction,
        details: &D,
    ) -> Result<AuditEvent, StoreError> {
        let details = serde_json::to_value(details)?;
        self.ledger
            .append(&self.tx, ctx, entity_type, entity_id, action, details)
            .await
    }

    /// Commit on `Ok`, roll back on `Err`. Committed events are broadcast.
    pub(crate) async fn finish<T>(self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        match result {
            Ok(value) => {
                self.tx.commit().await?;
                for event in self.ledger.into_appended() {
                    // No subscribers is fine.
                    let _ = self.events.send(event);
                }
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = self.tx.rollback().await {
                    tracing::warn!(error = %rb, "rollback failed");
                }
                Err(e)
            }
        }
    }
}
