//! Job queue contract and its PostgreSQL implementation.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use super::job::{ErrorKind, FailureDisposition, Job};

/// Result type for enqueue operations that handles idempotency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Command was enqueued, returns new job ID
    Created(Uuid),
    /// Command already exists (idempotency hit), returns existing job ID
    Duplicate(Uuid),
}

impl EnqueueResult {
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// A claimed job ready for execution.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub job: Job,
}

impl ClaimedJob {
    /// Deserialize the command payload.
    pub fn deserialize<C: DeserializeOwned>(&self) -> Result<C> {
        serde_json::from_value(self.job.args.clone())
            .map_err(|e| anyhow!("failed to deserialize {} payload: {}", self.job.job_type, e))
    }

    pub fn job_type(&self) -> &str {
        &self.job.job_type
    }
}

/// Metadata for command serialization.
pub trait CommandMeta {
    /// The command type name (used as job_type / queue name).
    fn command_type(&self) -> &'static str;

    /// If provided, ensures only one pending/running job exists with this key.
    fn idempotency_key(&self) -> Option<String> {
        None
    }

    fn max_retries(&self) -> i32 {
        3
    }
}

/// Failed job parked for operator attention. Never replayed automatically.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub job_id: Uuid,
    pub queue: String,
    pub payload: serde_json::Value,
    pub error: Option<String>,
    pub dead_lettered_at: Option<DateTime<Utc>>,
    pub attempts: i32,
}

impl From<Job> for DeadLetter {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            queue: job.job_type,
            payload: job.args,
            error: job.error_message,
            dead_lettered_at: job.dead_lettered_at,
            attempts: job.attempt,
        }
    }
}

/// Serialized command ready to be stored.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: String,
    pub args: serde_json::Value,
    pub run_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
    pub max_retries: i32,
}

impl NewJob {
    pub fn from_command<C>(command: &C, run_at: Option<DateTime<Utc>>) -> Result<Self>
    where
        C: Serialize + CommandMeta,
    {
        Ok(Self {
            job_type: command.command_type().to_string(),
            args: serde_json::to_value(command).context("failed to serialize command")?,
            run_at,
            idempotency_key: command.idempotency_key(),
            max_retries: command.max_retries(),
        })
    }

    pub fn into_job(self) -> Job {
        let mut job = Job::builder()
            .job_type(self.job_type)
            .args(self.args)
            .max_retries(self.max_retries)
            .build();
        job.next_run_at = self.run_at;
        job.idempotency_key = self.idempotency_key;
        job
    }
}

/// Storage and retrieval of serialized commands for background execution.
///
/// Object safe so workers and activities can share one `Arc<dyn JobQueue>`;
/// typed enqueueing lives on [`JobQueueExt`].
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn push(&self, job: NewJob) -> Result<EnqueueResult>;

    /// Claim up to `limit` due jobs of one type.
    async fn claim(&self, job_type: &str, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>>;

    async fn mark_succeeded(&self, job_id: Uuid) -> Result<()>;

    /// Retryable with budget left: new attempt after 2^retry_count seconds.
    /// Retryable without budget: dead letter. Non-retryable: failed.
    async fn mark_failed(&self, job_id: Uuid, error: &str, kind: ErrorKind)
        -> Result<FailureDisposition>;

    async fn report_progress(&self, job_id: Uuid, percent: i16) -> Result<()>;

    /// Extend the lease for a running job.
    async fn heartbeat(&self, job_id: Uuid) -> Result<()>;

    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>>;
}

#[async_trait]
pub trait JobQueueExt {
    async fn enqueue<C>(&self, command: C) -> Result<EnqueueResult>
    where
        C: Serialize + CommandMeta + Send + Sync;

    async fn schedule<C>(&self, command: C, run_at: DateTime<Utc>) -> Result<EnqueueResult>
    where
        C: Serialize + CommandMeta + Send + Sync;
}

#[async_trait]
impl<Q: JobQueue + ?Sized> JobQueueExt for Q {
    async fn enqueue<C>(&self, command: C) -> Result<EnqueueResult>
    where
        C: Serialize + CommandMeta + Send + Sync,
    {
        self.push(NewJob::from_command(&command, None)?).await
    }

    async fn schedule<C>(&self, command: C, run_at: DateTime<Utc>) -> Result<EnqueueResult>
    where
        C: Serialize + CommandMeta + Send + Sync,
    {
        self.push(NewJob::from_command(&command, Some(run_at))?).await
    }
}

/// PostgreSQL-backed job queue implementation.
pub struct PostgresJobQueue {
    pool: PgPool,
    lease_ms: i64,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease_ms: 60_000,
        }
    }

    pub fn with_lease_duration(pool: PgPool, lease_ms: i64) -> Self {
        Self { pool, lease_ms }
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn push(&self, new_job: NewJob) -> Result<EnqueueResult> {
        if let Some(key) = &new_job.idempotency_key {
            if let Some(existing) = Job::find_active_by_idempotency_key(key, &self.pool).await? {
                return Ok(EnqueueResult::Duplicate(existing.id));
            }
        }

        let job = new_job.into_job();
        match job.insert(&self.pool).await? {
            Some(inserted) => Ok(EnqueueResult::Created(inserted.id)),
            // Lost a race with a concurrent enqueue of the same key.
            None => {
                let key = job.idempotency_key.as_deref().unwrap_or_default();
                let existing = Job::find_active_by_idempotency_key(key, &self.pool)
                    .await?
                    .ok_or_else(|| anyhow!("idempotency conflict on {key} but no active job"))?;
                Ok(EnqueueResult::Duplicate(existing.id))
            }
        }
    }

    async fn claim(&self, job_type: &str, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>> {
        let jobs = Job::claim(job_type, worker_id, limit, self.lease_ms, &self.pool).await?;
        Ok(jobs
            .into_iter()
            .map(|job| ClaimedJob { id: job.id, job })
            .collect())
    }

    async fn mark_succeeded(&self, job_id: Uuid) -> Result<()> {
        Job::mark_succeeded(job_id, &self.pool).await
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        kind: ErrorKind,
    ) -> Result<FailureDisposition> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await?;

        let disposition = job.failure_disposition(kind, Utc::now());
        match disposition {
            FailureDisposition::RetryScheduled { run_at } => {
                // Release the idempotency key before the retry row claims it.
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'failed', error_message = $1, error_kind = $2,
                        lease_expires_at = NULL, updated_at = NOW()
                    WHERE id = $3
                    "#,
                )
                .bind(error)
                .bind(kind)
                .bind(job_id)
                .execute(&mut *tx)
                .await?;

                job.create_retry(run_at).insert(&mut *tx).await?;
                info!(job_id = %job_id, job_type = %job.job_type, retry_at = %run_at, "Scheduled job retry");
            }
            FailureDisposition::Failed => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'failed', error_message = $1, error_kind = $2,
                        lease_expires_at = NULL, updated_at = NOW()
                    WHERE id = $3
                    "#,
                )
                .bind(error)
                .bind(kind)
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            }
            FailureDisposition::DeadLettered => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'dead_letter', error_message = $1, error_kind = $2,
                        dead_lettered_at = NOW(), dead_letter_reason = 'max retries exceeded',
                        lease_expires_at = NULL, updated_at = NOW()
                    WHERE id = $3
                    "#,
                )
                .bind(error)
                .bind(kind)
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
                warn!(job_id = %job_id, job_type = %job.job_type, attempts = job.attempt, "Job dead-lettered");
            }
        }

        tx.commit().await?;
        Ok(disposition)
    }

    async fn report_progress(&self, job_id: Uuid, percent: i16) -> Result<()> {
        Job::set_progress(job_id, percent, &self.pool).await
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        Job::extend_lease(job_id, self.lease_ms, &self.pool).await
    }

    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>> {
        let jobs = Job::find_dead_letters(limit, &self.pool).await?;
        Ok(jobs.into_iter().map(DeadLetter::from).collect())
    }
}
