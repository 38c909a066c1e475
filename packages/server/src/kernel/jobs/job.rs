//! Job model for background command execution.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Upper bound on the delay between retries.
const MAX_RETRY_DELAY_SECS: i64 = 3600;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    DeadLetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "error_kind", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient error - will retry if attempts remain
    #[default]
    Retryable,
    /// Permanent error - will not retry
    NonRetryable,
    /// Job was interrupted by graceful shutdown - will retry
    Shutdown,
}

impl ErrorKind {
    /// Whether this error kind should trigger a retry
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorKind::Retryable | ErrorKind::Shutdown)
    }
}

/// What the queue did with a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// A new attempt was scheduled
    RetryScheduled { run_at: DateTime<Utc> },
    /// Non-retryable failure; kept as `failed`
    Failed,
    /// Retry budget exhausted; moved to the dead-letter sink
    DeadLettered,
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,

    /// Queue name
    pub job_type: String,
    pub args: serde_json::Value,

    #[builder(default)]
    pub status: JobStatus,
    #[builder(default, setter(strip_option))]
    pub next_run_at: Option<DateTime<Utc>>,

    // Retry chain
    #[builder(default = 1)]
    pub attempt: i32,
    #[builder(default = 0)]
    pub retry_count: i32,
    #[builder(default = 3)]
    pub max_retries: i32,
    #[builder(default, setter(strip_option))]
    pub root_job_id: Option<Uuid>,
    #[builder(default, setter(strip_option))]
    pub idempotency_key: Option<String>,

    // Lease management
    #[builder(default, setter(strip_option))]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub worker_id: Option<String>,

    /// Observability only (10 / 30 / 60 / 100)
    #[builder(default = 0)]
    pub progress: i16,

    // Error tracking
    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,
    #[builder(default, setter(strip_option))]
    pub error_kind: Option<ErrorKind>,
    #[builder(default, setter(strip_option))]
    pub dead_lettered_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub dead_letter_reason: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

/// Exponential backoff between attempts: 2^retry_count seconds, max 1 hour.
pub fn retry_delay(retry_count: i32) -> Duration {
    let exponent = retry_count.clamp(0, 30) as u32;
    Duration::seconds(2i64.pow(exponent).min(MAX_RETRY_DELAY_SECS))
}

impl Job {
    /// Retries left after this attempt fails?
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// A retryable failure of this attempt would dead-letter the job.
    pub fn is_final_attempt(&self) -> bool {
        !self.has_retry_budget()
    }

    pub fn failure_disposition(&self, kind: ErrorKind, now: DateTime<Utc>) -> FailureDisposition {
        if !kind.should_retry() {
            FailureDisposition::Failed
        } else if self.has_retry_budget() {
            FailureDisposition::RetryScheduled {
                run_at: now + retry_delay(self.retry_count),
            }
        } else {
            FailureDisposition::DeadLettered
        }
    }

    /// Next attempt in the retry chain, scheduled for `run_at`.
    pub fn create_retry(&self, run_at: DateTime<Utc>) -> Self {
        let mut retry = Self::builder()
            .job_type(self.job_type.clone())
            .args(self.args.clone())
            .next_run_at(run_at)
            .attempt(self.attempt + 1)
            .retry_count(self.retry_count + 1)
            .max_retries(self.max_retries)
            .root_job_id(self.root_job_id.unwrap_or(self.id))
            .build();
        retry.idempotency_key = self.idempotency_key.clone();
        retry
    }

    // ------------------------------------------------------------------------
    // SQL
    // ------------------------------------------------------------------------

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_active_by_idempotency_key(key: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM jobs
            WHERE idempotency_key = $1
              AND status IN ('pending', 'running')
            LIMIT 1
            "#,
        )
        .bind(key)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    /// Insert, unless an active job already holds the idempotency key.
    pub async fn insert<'e, E>(&self, executor: E) -> Result<Option<Self>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO jobs (
                id, job_type, args, status, next_run_at, attempt, retry_count, max_retries,
                root_job_id, idempotency_key, progress, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (idempotency_key) WHERE status IN ('pending', 'running') DO NOTHING
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(&self.job_type)
        .bind(&self.args)
        .bind(self.status)
        .bind(self.next_run_at)
        .bind(self.attempt)
        .bind(self.retry_count)
        .bind(self.max_retries)
        .bind(self.root_job_id)
        .bind(&self.idempotency_key)
        .bind(self.progress)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_optional(executor)
        .await
        .map_err(Into::into)
    }

    /// Claim jobs of one type atomically using FOR UPDATE SKIP LOCKED.
    /// Also recovers running jobs whose lease expired.
    pub async fn claim(
        job_type: &str,
        worker_id: &str,
        limit: i64,
        lease_ms: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            WITH next_jobs AS (
                SELECT id
                FROM jobs
                WHERE job_type = $1
                  AND (
                    (status = 'pending' AND (next_run_at IS NULL OR next_run_at <= NOW()))
                    OR (status = 'running' AND lease_expires_at < NOW())
                  )
                ORDER BY COALESCE(next_run_at, created_at)
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'running',
                lease_expires_at = NOW() + ($3 || ' milliseconds')::INTERVAL,
                worker_id = $4,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_jobs)
            RETURNING *
            "#,
        )
        .bind(job_type)
        .bind(limit)
        .bind(lease_ms.to_string())
        .bind(worker_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn extend_lease(id: Uuid, lease_ms: i64, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = NOW() + ($1 || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            WHERE id = $2 AND status = 'running'
            "#,
        )
        .bind(lease_ms.to_string())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_progress(id: Uuid, percent: i16, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE jobs SET progress = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(percent)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn mark_succeeded(id: Uuid, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded', progress = 100, lease_expires_at = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find_dead_letters(limit: i64, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM jobs
            WHERE status = 'dead_letter'
            ORDER BY dead_lettered_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::builder()
            .job_type("publish_post")
            .args(serde_json::json!({ "post_id": Uuid::nil() }))
            .build()
    }

    #[test]
    fn new_job_is_pending_first_attempt() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 3);
        assert!(job.has_retry_budget());
    }

    #[test]
    fn retry_delay_doubles_up_to_an_hour() {
        let secs: Vec<i64> = [0, 1, 2, 3, 11, 12, 40]
            .iter()
            .map(|n| retry_delay(*n).num_seconds())
            .collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 2048, 3600, 3600]);
    }

    #[test]
    fn retry_inherits_chain_and_payload() {
        let job = sample_job();
        let run_at = Utc::now() + Duration::seconds(4);
        let retry = job.create_retry(run_at);

        assert_ne!(retry.id, job.id);
        assert_eq!(retry.root_job_id, Some(job.id));
        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.retry_count, 1);
        assert_eq!(retry.args, job.args);
        assert_eq!(retry.next_run_at, Some(run_at));

        let again = retry.create_retry(run_at);
        assert_eq!(again.root_job_id, Some(job.id));
    }

    #[test]
    fn disposition_follows_kind_and_budget() {
        let now = Utc::now();
        let mut job = sample_job();

        assert_eq!(
            job.failure_disposition(ErrorKind::Retryable, now),
            FailureDisposition::RetryScheduled { run_at: now + Duration::seconds(1) }
        );
        assert_eq!(
            job.failure_disposition(ErrorKind::NonRetryable, now),
            FailureDisposition::Failed
        );

        job.retry_count = 3;
        assert!(job.is_final_attempt());
        assert_eq!(
            job.failure_disposition(ErrorKind::Retryable, now),
            FailureDisposition::DeadLettered
        );
    }

    #[test]
    fn shutdown_is_retryable() {
        assert!(ErrorKind::Shutdown.should_retry());
        assert!(!ErrorKind::NonRetryable.should_retry());
    }
}
