//! Audit ledger: append-only, hash-chained event log.
//!
//! Events form a single global chain ordered by `seq`. Each event commits to
//! its predecessor's hash, so altering or removing any historical event breaks
//! verification at that event or its successor.

use std::path::Path;

use chrono::{SubsecRound, Utc};
use serde::Serialize;

use regis_core::context::OpContext;
use regis_core::entities::AuditEvent;
use regis_core::enums::{AuditAction, EntityType};
use regis_core::hashing::{
    EventHashInput, GENESIS_HASH, canonical_json, canonicalize, compute_event_hash,
    ledger_timestamp,
};
use regis_core::ids::PREFIX_EVENT;

use crate::error::StoreError;
use crate::generate_id;
use crate::helpers::{parse_datetime, parse_enum, parse_json};
use crate::service::RegisService;

const SELECT_COLS: &str = "seq, id, entity_type, entity_id, action, actor, correlation_id, \
                           details, at, prev_event_hash, event_hash";

/// Rows fetched per page while verifying.
const VERIFY_PAGE: i64 = 500;

fn row_to_event(row: &libsql::Row) -> Result<AuditEvent, StoreError> {
    Ok(AuditEvent {
        seq: row.get(0)?,
        id: row.get(1)?,
        entity_type: parse_enum(&row.get::<String>(2)?)?,
        entity_id: row.get(3)?,
        action: parse_enum(&row.get::<String>(4)?)?,
        actor: row.get(5)?,
        correlation_id: row.get(6)?,
        details: parse_json(&row.get::<String>(7)?)?,
        at: parse_datetime(&row.get::<String>(8)?)?,
        prev_event_hash: row.get(9)?,
        event_hash: row.get(10)?,
    })
}

// ---------------------------------------------------------------------------
// Appending
// ---------------------------------------------------------------------------

/// Tail position of the ledger within one write transaction.
pub(crate) struct LedgerCursor {
    next_seq: i64,
    prev_hash: String,
    appended: Vec<AuditEvent>,
}

impl LedgerCursor {
    /// Read the current tail. Must run under the write gate.
    pub(crate) async fn load(conn: &libsql::Connection) -> Result<Self, StoreError> {
        let mut rows = conn
            .query(
                "SELECT seq, event_hash FROM audit_log ORDER BY seq DESC LIMIT 1",
                (),
            )
            .await?;
        let (next_seq, prev_hash) = match rows.next().await? {
            Some(row) => (row.get::<i64>(0)? + 1, row.get::<String>(1)?),
            None => (1, GENESIS_HASH.to_string()),
        };
        Ok(Self {
            next_seq,
            prev_hash,
            appended: Vec::new(),
        })
    }

    pub(crate) async fn append(
        &mut self,
        conn: &libsql::Connection,
        ctx: &OpContext,
        entity_type: EntityType,
        entity_id: &str,
        action: AuditAction,
        details: serde_json::Value,
    ) -> Result<AuditEvent, StoreError> {
        let id = generate_id(conn, PREFIX_EVENT).await?;
        // Stored text is micro-precision; hash what will be read back.
        let at = Utc::now().trunc_subsecs(6);
        let details = canonicalize(&details);
        let event_hash = compute_event_hash(&EventHashInput {
            prev_event_hash: &self.prev_hash,
            entity_type: entity_type.as_str(),
            entity_id,
            action: action.as_str(),
            actor: &ctx.actor,
            at: &at,
            details: &details,
        });

        conn.execute(
            &format!(
                "INSERT INTO audit_log ({SELECT_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            libsql::params![
                self.next_seq,
                id.as_str(),
                entity_type.as_str(),
                entity_id,
                action.as_str(),
                ctx.actor.as_str(),
                ctx.correlation_id.as_str(),
                canonical_json(&details),
                ledger_timestamp(&at),
                self.prev_hash.as_str(),
                event_hash.as_str()
            ],
        )
        .await?;

        let event = AuditEvent {
            seq: self.next_seq,
            id,
            entity_type,
            entity_id: entity_id.to_string(),
            action,
            actor: ctx.actor.clone(),
            correlation_id: ctx.correlation_id.clone(),
            details,
            at,
            prev_event_hash: std::mem::replace(&mut self.prev_hash, event_hash.clone()),
            event_hash,
        };
        tracing::debug!(
            seq = event.seq,
            entity_type = %entity_type,
            entity_id,
            action = %action,
            "ledger append"
        );
        self.next_seq += 1;
        self.appended.push(event.clone());
        Ok(event)
    }

    pub(crate) fn into_appended(self) -> Vec<AuditEvent> {
        self.appended
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Outcome of [`RegisService::verify_chain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ChainVerification {
    /// Every event in range links to its predecessor and hashes correctly.
    Ok { events_checked: u64 },
    /// First event that fails verification.
    BrokenAt {
        seq: i64,
        event_id: String,
        reason: String,
    },
}

impl ChainVerification {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// Columns as stored, so that tampered enum or JSON text is reported as a
/// break rather than a decode error.
struct RawEvent {
    seq: i64,
    id: String,
    entity_type: String,
    entity_id: String,
    action: String,
    actor: String,
    details: String,
    at: String,
    prev_event_hash: String,
    event_hash: String,
}

impl RawEvent {
    fn from_row(row: &libsql::Row) -> Result<Self, StoreError> {
        Ok(Self {
            seq: row.get(0)?,
            id: row.get(1)?,
            entity_type: row.get(2)?,
            entity_id: row.get(3)?,
            action: row.get(4)?,
            actor: row.get(5)?,
            details: row.get(7)?,
            at: row.get(8)?,
            prev_event_hash: row.get(9)?,
            event_hash: row.get(10)?,
        })
    }

    /// Why this event's stored hash cannot be trusted, if it cannot.
    fn hash_problem(&self) -> Option<String> {
        let Ok(details) = serde_json::from_str::<serde_json::Value>(&self.details) else {
            return Some("details are not valid JSON".into());
        };
        let Ok(at) = parse_datetime(&self.at) else {
            return Some(format!("unparseable timestamp '{}'", self.at));
        };
        let recomputed = compute_event_hash(&EventHashInput {
            prev_event_hash: &self.prev_event_hash,
            entity_type: &self.entity_type,
            entity_id: &self.entity_id,
            action: &self.action,
            actor: &self.actor,
            at: &at,
            details: &details,
        });
        (recomputed != self.event_hash)
            .then(|| String::from("event_hash does not match recomputed hash"))
    }
}

/// Filter criteria for audit queries.
#[derive(Debug, Default, Clone)]
pub struct AuditFilter {
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<String>,
    pub action: Option<AuditAction>,
    pub correlation_id: Option<String>,
    pub limit: Option<u32>,
}

impl RegisService {
    /// Recompute every event hash in `[from, to]` (inclusive, default whole
    /// ledger) and check each event links to its recorded predecessor.
    ///
    /// A break halts all further writes and is logged at `error`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` only if the ledger cannot be read.
    pub async fn verify_chain(
        &self,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<ChainVerification, StoreError> {
        let outcome = {
            let _read = self.read_gate().await;
            self.scan_chain(from.unwrap_or(1).max(1), to.unwrap_or(i64::MAX))
                .await?
        };
        if let ChainVerification::BrokenAt { seq, reason, .. } = &outcome {
            self.halt_writes(*seq, reason);
        }
        Ok(outcome)
    }

    async fn scan_chain(&self, from: i64, to: i64) -> Result<ChainVerification, StoreError> {
        let conn = self.db().conn();

        let mut expected_prev = if from == 1 {
            GENESIS_HASH.to_string()
        } else {
            let mut rows = conn
                .query("SELECT event_hash FROM audit_log WHERE seq = ?1", [from - 1])
                .await?;
            match rows.next().await? {
                Some(row) => row.get::<String>(0)?,
                None => {
                    let mut first = conn
                        .query(
                            "SELECT seq, id FROM audit_log WHERE seq >= ?1 AND seq <= ?2
                             ORDER BY seq LIMIT 1",
                            [from, to],
                        )
                        .await?;
                    return Ok(match first.next().await? {
                        Some(row) => ChainVerification::BrokenAt {
                            seq: row.get(0)?,
                            event_id: row.get(1)?,
                            reason: format!("predecessor seq {} is missing", from - 1),
                        },
                        None => ChainVerification::Ok { events_checked: 0 },
                    });
                }
            }
        };

        let mut expected_seq = from;
        let mut checked = 0u64;
        loop {
            let mut rows = conn
                .query(
                    &format!(
                        "SELECT {SELECT_COLS} FROM audit_log
                         WHERE seq >= ?1 AND seq <= ?2 ORDER BY seq LIMIT {VERIFY_PAGE}"
                    ),
                    [expected_seq, to],
                )
                .await?;

            let mut page = 0;
            while let Some(row) = rows.next().await? {
                page += 1;
                let event = RawEvent::from_row(&row)?;
                let reason = if event.seq != expected_seq {
                    Some(format!("sequence gap: expected seq {expected_seq}"))
                } else if event.prev_event_hash != expected_prev {
                    Some("prev_event_hash does not match predecessor".into())
                } else {
                    event.hash_problem()
                };
                if let Some(reason) = reason {
                    return Ok(ChainVerification::BrokenAt {
                        seq: event.seq,
                        event_id: event.id,
                        reason,
                    });
                }
                checked += 1;
                expected_seq = event.seq + 1;
                expected_prev = event.event_hash;
            }
            if page < VERIFY_PAGE || expected_seq > to {
                break;
            }
        }

        Ok(ChainVerification::Ok {
            events_checked: checked,
        })
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Query ledger events with optional filters, in ledger order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    pub async fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>, StoreError> {
        let mut conditions = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();

        if let Some(et) = filter.entity_type {
            params.push(libsql::Value::Text(et.as_str().to_string()));
            conditions.push(format!("entity_type = ?{}", params.len()));
        }
        if let Some(ref eid) = filter.entity_id {
            params.push(libsql::Value::Text(eid.clone()));
            conditions.push(format!("entity_id = ?{}", params.len()));
        }
        if let Some(action) = filter.action {
            params.push(libsql::Value::Text(action.as_str().to_string()));
            conditions.push(format!("action = ?{}", params.len()));
        }
        if let Some(ref cid) = filter.correlation_id {
            params.push(libsql::Value::Text(cid.clone()));
            conditions.push(format!("correlation_id = ?{}", params.len()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let limit = filter.limit.unwrap_or(1000);
        let sql = format!(
            "SELECT {SELECT_COLS} FROM audit_log {where_clause} ORDER BY seq LIMIT {limit}"
        );

        let _read = self.read_gate().await;
        let mut rows = self
            .db()
            .conn()
            .query(&sql, libsql::params_from_iter(params))
            .await?;
        let mut events = Vec::new();
        while let Some(row) = rows.next().await? {
            events.push(row_to_event(&row)?);
        }
        Ok(events)
    }

    /// Every event about one entity, in ledger order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    pub async fn events_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        self.query_audit(&AuditFilter {
            entity_type: Some(entity_type),
            entity_id: Some(entity_id.to_string()),
            limit: Some(u32::MAX),
            ..AuditFilter::default()
        })
        .await
    }

    /// The most recent event, if any.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    pub async fn tail(&self) -> Result<Option<AuditEvent>, StoreError> {
        let _read = self.read_gate().await;
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!("SELECT {SELECT_COLS} FROM audit_log ORDER BY seq DESC LIMIT 1"),
                (),
            )
            .await?;
        rows.next().await?.map(|row| row_to_event(&row)).transpose()
    }

    /// Events with `from_seq <= seq <= to_seq`, in ledger order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    pub async fn events_range(
        &self,
        from_seq: i64,
        to_seq: i64,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let _read = self.read_gate().await;
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!(
                    "SELECT {SELECT_COLS} FROM audit_log WHERE seq >= ?1 AND seq <= ?2 ORDER BY seq"
                ),
                [from_seq, to_seq],
            )
            .await?;
        let mut events = Vec::new();
        while let Some(row) = rows.next().await? {
            events.push(row_to_event(&row)?);
        }
        Ok(events)
    }

    /// Up to `limit` events with `seq > after_seq`, in ledger order. Pages
    /// by key, so gaps in the sequence do not end a scan early.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    pub async fn events_after(
        &self,
        after_seq: i64,
        limit: i64,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let _read = self.read_gate().await;
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!("SELECT {SELECT_COLS} FROM audit_log WHERE seq > ?1 ORDER BY seq LIMIT ?2"),
                [after_seq, limit],
            )
            .await?;
        let mut events = Vec::new();
        while let Some(row) = rows.next().await? {
            events.push(row_to_event(&row)?);
        }
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

impl RegisService {
    /// Write the whole ledger to `path` as JSON Lines, one event per line in
    /// ledger order. Returns the number of events written.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the ledger cannot be read or the file written.
    pub async fn export_ledger(&self, path: &Path) -> Result<u64, StoreError> {
        let mut written = 0u64;
        let mut after = 0;
        loop {
            let page = self.events_after(after, VERIFY_PAGE).await?;
            let io = if written == 0 {
                serde_jsonlines::write_json_lines(path, &page)
            } else {
                serde_jsonlines::append_json_lines(path, &page)
            };
            io.map_err(|e| StoreError::Other(e.into()))?;

            written += page.len() as u64;
            match page.last() {
                Some(last) if page.len() as i64 == VERIFY_PAGE => after = last.seq,
                _ => break,
            }
        }
        tracing::info!(path = %path.display(), events = written, "ledger exported");
        Ok(written)
    }
}
