//! Prompt registry and generative run bookkeeping.
//!
//! A run is created `pending` and completed exactly once, as `succeeded`
//! (with its artifact stored, recorded and attached in the same transaction)
//! or as `failed`.

use chrono::Utc;

use regis_core::audit_detail::{PromptRegisteredDetail, RunDetail};
use regis_core::context::OpContext;
use regis_core::entities::{DerivedArtifact, GenerativeRun, GeneratorIdentity, Prompt};
use regis_core::enums::{AuditAction, EntityType, RunStatus};
use regis_core::hashing::{ContentHash, InputFingerprint};
use regis_core::ids::PREFIX_RUN;

use crate::blob::BlobKind;
use crate::error::StoreError;
use crate::generate_id;
use crate::helpers::{get_opt_string, parse_datetime, parse_enum, parse_optional_datetime};
use crate::repos::artifact::{ArtifactOutput, insert_artifact};
use crate::repos::version::{attach, require_version};
use crate::service::{RegisService, WriteTxn};

const RUN_COLS: &str = "id, version_id, purpose, generator_name, generator_version, prompt_hash, \
                        input_fingerprint, artifact_id, status, error, started_at, finished_at";

const PROMPT_COLS: &str = "prompt_hash, name, version, template, created_at";

fn row_to_run(row: &libsql::Row) -> Result<GenerativeRun, StoreError> {
    Ok(GenerativeRun {
        id: row.get(0)?,
        version_id: row.get(1)?,
        purpose: row.get(2)?,
        generator: GeneratorIdentity::new(row.get::<String>(3)?, row.get::<String>(4)?),
        prompt_hash: get_opt_string(row, 5)?,
        input_fingerprint: InputFingerprint::new(row.get::<String>(6)?),
        artifact_id: get_opt_string(row, 7)?,
        status: parse_enum(&row.get::<String>(8)?)?,
        error: get_opt_string(row, 9)?,
        started_at: parse_datetime(&row.get::<String>(10)?)?,
        finished_at: parse_optional_datetime(get_opt_string(row, 11)?.as_deref())?,
    })
}

fn row_to_prompt(row: &libsql::Row) -> Result<Prompt, StoreError> {
    Ok(Prompt {
        prompt_hash: row.get(0)?,
        name: row.get(1)?,
        version: row.get(2)?,
        template: row.get(3)?,
        created_at: parse_datetime(&row.get::<String>(4)?)?,
    })
}

async fn fetch_run(conn: &libsql::Connection, id: &str) -> Result<Option<GenerativeRun>, StoreError> {
    let mut rows = conn
        .query(&format!("SELECT {RUN_COLS} FROM generative_runs WHERE id = ?1"), [id])
        .await?;
    rows.next().await?.map(|row| row_to_run(&row)).transpose()
}

async fn require_run(conn: &libsql::Connection, id: &str) -> Result<GenerativeRun, StoreError> {
    fetch_run(conn, id)
        .await?
        .ok_or_else(|| StoreError::not_found("run", id))
}

async fn fetch_prompt(conn: &libsql::Connection, hash: &str) -> Result<Option<Prompt>, StoreError> {
    let mut rows = conn
        .query(
            &format!("SELECT {PROMPT_COLS} FROM prompts WHERE prompt_hash = ?1"),
            [hash],
        )
        .await?;
    rows.next().await?.map(|row| row_to_prompt(&row)).transpose()
}

/// What the run is about to do.
#[derive(Debug, Clone)]
pub struct RunSpec<'a> {
    pub version_id: &'a str,
    pub purpose: &'a str,
    pub generator: &'a GeneratorIdentity,
    pub prompt_hash: Option<&'a str>,
    pub input_fingerprint: &'a InputFingerprint,
}

fn run_detail(run: &GenerativeRun) -> RunDetail {
    RunDetail {
        purpose: run.purpose.clone(),
        model: run.generator.to_string(),
        input_fingerprint: run.input_fingerprint.to_string(),
        artifact_id: run.artifact_id.clone(),
        error: run.error.clone(),
    }
}

fn require_pending(run: &GenerativeRun, target: RunStatus) -> Result<(), StoreError> {
    if run.status.can_transition_to(target) {
        Ok(())
    } else {
        Err(StoreError::IllegalTransition {
            version_id: run.id.clone(),
            from: run.status.as_str().to_string(),
            to: target.as_str().to_string(),
        })
    }
}

impl RegisService {
    /// Register a prompt template. Its identity is the hash of the template
    /// text, so registering the same text again returns the existing prompt.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Validation` for an empty template.
    pub async fn register_prompt(
        &self,
        name: &str,
        version: &str,
        template: &str,
        ctx: &OpContext,
    ) -> Result<Prompt, StoreError> {
        if template.is_empty() {
            return Err(StoreError::Validation("prompt template must not be empty".into()));
        }
        let hash = ContentHash::of(template.as_bytes()).to_string();

        let mut txn = self.begin_write().await?;
        let result: Result<Prompt, StoreError> = async {
            if let Some(existing) = fetch_prompt(txn.conn(), &hash).await? {
                return Ok(existing);
            }
            let now = Utc::now();
            txn.conn()
                .execute(
                    &format!("INSERT INTO prompts ({PROMPT_COLS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                    [hash.as_str(), name, version, template, now.to_rfc3339().as_str()],
                )
                .await?;
            txn.append(
                ctx,
                EntityType::Prompt,
                &hash,
                AuditAction::PromptRegistered,
                &PromptRegisteredDetail {
                    name: name.to_string(),
                    version: version.to_string(),
                },
            )
            .await?;
            Ok(Prompt {
                prompt_hash: hash.clone(),
                name: name.to_string(),
                version: version.to_string(),
                template: template.to_string(),
                created_at: now,
            })
        }
        .await;
        txn.finish(result).await
    }

    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no prompt has this hash.
    pub async fn get_prompt(&self, prompt_hash: &str) -> Result<Prompt, StoreError> {
        let _read = self.read_gate().await;
        fetch_prompt(self.db().conn(), prompt_hash)
            .await?
            .ok_or_else(|| StoreError::not_found("prompt", prompt_hash))
    }

    /// Open a `pending` run.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the version or prompt is unknown.
    pub async fn start_run(
        &self,
        spec: &RunSpec<'_>,
        ctx: &OpContext,
    ) -> Result<GenerativeRun, StoreError> {
        let mut txn = self.begin_write().await?;
        let result = insert_run(&mut txn, spec, ctx).await;
        txn.finish(result).await
    }

    /// Complete a pending run with generator output.
    ///
    /// The output is stored content-addressed, recorded as an artifact of
    /// the run's version and attached to it, all in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::IllegalTransition` if the run is not pending.
    pub async fn record_run_success(
        &self,
        run_id: &str,
        bytes: &[u8],
        ctx: &OpContext,
    ) -> Result<(GenerativeRun, DerivedArtifact), StoreError> {
        let hash = ContentHash::of(bytes);
        let blob = self.blobs().put_if_absent(BlobKind::Artifact, &hash, bytes).await?;
        let output = ArtifactOutput {
            hash: &hash,
            size: u64::try_from(bytes.len()).map_err(|e| StoreError::Other(e.into()))?,
            storage_uri: &blob.uri,
        };

        self.retrying("record_run_success", || async {
            let mut txn = self.begin_write().await?;
            let result = complete_success(&mut txn, run_id, &output, ctx).await;
            txn.finish(result).await
        })
        .await
    }

    /// Complete a pending run as failed. No artifact is recorded.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::IllegalTransition` if the run is not pending.
    pub async fn record_run_failure(
        &self,
        run_id: &str,
        reason: &str,
        ctx: &OpContext,
    ) -> Result<GenerativeRun, StoreError> {
        self.retrying("record_run_failure", || async {
            let mut txn = self.begin_write().await?;
            let result = complete_failure(&mut txn, run_id, reason, ctx).await;
            txn.finish(result).await
        })
        .await
    }

    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no such run exists.
    pub async fn get_run(&self, id: &str) -> Result<GenerativeRun, StoreError> {
        let _read = self.read_gate().await;
        require_run(self.db().conn(), id).await
    }

    /// Runs against a version, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    pub async fn list_runs(&self, version_id: &str) -> Result<Vec<GenerativeRun>, StoreError> {
        let _read = self.read_gate().await;
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!(
                    "SELECT {RUN_COLS} FROM generative_runs WHERE version_id = ?1
                     ORDER BY started_at, id"
                ),
                [version_id],
            )
            .await?;
        let mut runs = Vec::new();
        while let Some(row) = rows.next().await? {
            runs.push(row_to_run(&row)?);
        }
        Ok(runs)
    }
}

async fn insert_run(
    txn: &mut WriteTxn<'_>,
    spec: &RunSpec<'_>,
    ctx: &OpContext,
) -> Result<GenerativeRun, StoreError> {
    require_version(txn.conn(), spec.version_id).await?;
    if let Some(prompt_hash) = spec.prompt_hash {
        if fetch_prompt(txn.conn(), prompt_hash).await?.is_none() {
            return Err(StoreError::not_found("prompt", prompt_hash));
        }
    }

    let now = Utc::now();
    let run = GenerativeRun {
        id: generate_id(txn.conn(), PREFIX_RUN).await?,
        version_id: spec.version_id.to_string(),
        purpose: spec.purpose.to_string(),
        generator: spec.generator.clone(),
        prompt_hash: spec.prompt_hash.map(str::to_string),
        input_fingerprint: spec.input_fingerprint.clone(),
        artifact_id: None,
        status: RunStatus::Pending,
        error: None,
        started_at: now,
        finished_at: None,
    };

    txn.conn()
        .execute(
            &format!(
                "INSERT INTO generative_runs ({RUN_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, NULL, ?9, NULL)"
            ),
            libsql::params![
                run.id.as_str(),
                run.version_id.as_str(),
                run.purpose.as_str(),
                run.generator.name.as_str(),
                run.generator.version.as_str(),
                run.prompt_hash.clone(),
                run.input_fingerprint.as_str(),
                run.status.as_str(),
                now.to_rfc3339()
            ],
        )
        .await?;

    txn.append(ctx, EntityType::Run, &run.id, AuditAction::RunStarted, &run_detail(&run))
        .await?;
    tracing::debug!(run_id = %run.id, generator = %run.generator, "run started");
    Ok(run)
}

async fn complete_success(
    txn: &mut WriteTxn<'_>,
    run_id: &str,
    output: &ArtifactOutput<'_>,
    ctx: &OpContext,
) -> Result<(GenerativeRun, DerivedArtifact), StoreError> {
    let mut run = require_run(txn.conn(), run_id).await?;
    require_pending(&run, RunStatus::Succeeded)?;

    let (artifact, _) = insert_artifact(
        txn,
        &run.version_id,
        &run.generator,
        &run.input_fingerprint,
        output,
        ctx,
    )
    .await?;
    attach(txn, &run.version_id, &artifact, ctx).await?;

    let now = Utc::now();
    txn.conn()
        .execute(
            "UPDATE generative_runs SET status = ?1, artifact_id = ?2, finished_at = ?3
             WHERE id = ?4",
            [
                RunStatus::Succeeded.as_str(),
                artifact.id.as_str(),
                now.to_rfc3339().as_str(),
                run_id,
            ],
        )
        .await?;
    run.status = RunStatus::Succeeded;
    run.artifact_id = Some(artifact.id.clone());
    run.finished_at = Some(now);

    txn.append(ctx, EntityType::Run, run_id, AuditAction::RunSucceeded, &run_detail(&run))
        .await?;
    tracing::info!(run_id, artifact_id = %artifact.id, "run succeeded");
    Ok((run, artifact))
}

async fn complete_failure(
    txn: &mut WriteTxn<'_>,
    run_id: &str,
    reason: &str,
    ctx: &OpContext,
) -> Result<GenerativeRun, StoreError> {
    let mut run = require_run(txn.conn(), run_id).await?;
    require_pending(&run, RunStatus::Failed)?;

    let now = Utc::now();
    txn.conn()
        .execute(
            "UPDATE generative_runs SET status = ?1, error = ?2, finished_at = ?3 WHERE id = ?4",
            [RunStatus::Failed.as_str(), reason, now.to_rfc3339().as_str(), run_id],
        )
        .await?;
    run.status = RunStatus::Failed;
    run.error = Some(reason.to_string());
    run.finished_at = Some(now);

    txn.append(ctx, EntityType::Run, run_id, AuditAction::RunFailed, &run_detail(&run))
        .await?;
    tracing::warn!(run_id, reason, "run failed");
    Ok(run)
}
