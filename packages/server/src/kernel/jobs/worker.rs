//! Worker pool for background jobs.
//!
//! One `JobWorker` per queue. Each worker:
//! - caps in-flight jobs with a semaphore (`concurrency`)
//! - caps job starts per minute with a `governor` limiter
//! - claims one job at a time via the `JobQueue`
//! - runs the handler with a lease heartbeat
//! - marks the job succeeded or failed with the handler's `ErrorKind`
//!
//! ```text
//! WorkerPool
//!     ├─► JobWorker("generate_post", 2 slots, 10/min) ─► GenerateHandler
//!     ├─► JobWorker("publish_post",  1 slot,   5/min) ─► PublishHandler
//!     └─► JobWorker("refresh_token", 1 slot,  10/min) ─► TokenRefreshHandler
//! ```

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::{ErrorKind, FailureDisposition};
use super::queue::{ClaimedJob, JobQueue};

type StartLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-queue limits.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub job_type: &'static str,
    /// Jobs of this type in flight at once
    pub concurrency: usize,
    /// Job starts allowed per minute
    pub jobs_per_minute: u32,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl QueueConfig {
    pub fn new(job_type: &'static str, concurrency: usize, jobs_per_minute: u32) -> Self {
        Self {
            job_type,
            concurrency,
            jobs_per_minute,
            poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(20),
        }
    }
}

/// How a handler failed, and whether the queue may retry it.
#[derive(Debug, thiserror::Error)]
#[error("{error:#}")]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub error: anyhow::Error,
}

impl JobFailure {
    pub fn retryable(error: impl Into<anyhow::Error>) -> Self {
        Self {
            kind: ErrorKind::Retryable,
            error: error.into(),
        }
    }

    pub fn non_retryable(error: impl Into<anyhow::Error>) -> Self {
        Self {
            kind: ErrorKind::NonRetryable,
            error: error.into(),
        }
    }
}

/// Infrastructure errors (database, serialization) are assumed transient.
impl From<anyhow::Error> for JobFailure {
    fn from(error: anyhow::Error) -> Self {
        Self::retryable(error)
    }
}

/// Per-execution context handed to handlers.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub attempt: i32,
    /// A retryable failure now would dead-letter the job
    pub final_attempt: bool,
    queue: Arc<dyn JobQueue>,
}

impl JobContext {
    pub fn new(job: &ClaimedJob, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            job_id: job.id,
            attempt: job.job.attempt,
            final_attempt: job.job.is_final_attempt(),
            queue,
        }
    }

    /// Record progress. Observability only; failures are logged and ignored.
    pub async fn progress(&self, percent: i16) {
        if let Err(e) = self.queue.report_progress(self.job_id, percent).await {
            debug!(job_id = %self.job_id, percent, error = %e, "Failed to report progress");
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &ClaimedJob, ctx: &JobContext) -> Result<(), JobFailure>;
}

/// Result of processing one claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRun {
    Succeeded,
    Failed(FailureDisposition),
}

pub struct JobWorker {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    config: QueueConfig,
    worker_id: String,
    slots: Arc<Semaphore>,
    starts: Arc<StartLimiter>,
}

impl JobWorker {
    pub fn new(queue: Arc<dyn JobQueue>, handler: Arc<dyn JobHandler>, config: QueueConfig) -> Self {
        let per_minute = NonZeroU32::new(config.jobs_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            worker_id: format!("{}-{}", config.job_type, Uuid::new_v4()),
            slots: Arc::new(Semaphore::new(config.concurrency.max(1))),
            starts: Arc::new(GovernorRateLimiter::direct(Quota::per_minute(per_minute))),
            queue,
            handler,
            config,
        }
    }

    pub fn job_type(&self) -> &'static str {
        self.config.job_type
    }

    /// Claim and process a single job inline. Returns None when nothing is due.
    pub async fn run_once(&self) -> Result<Option<JobRun>> {
        let _slot = self.slots.clone().acquire_owned().await?;
        self.starts.until_ready().await;

        let Some(job) = self.claim_one().await? else {
            return Ok(None);
        };
        Ok(Some(
            process_job(self.queue.clone(), self.handler.clone(), job, &self.config).await,
        ))
    }

    /// Drain every due job. Test and CLI helper.
    pub async fn run_until_idle(&self) -> Result<Vec<JobRun>> {
        let mut runs = Vec::new();
        while let Some(run) = self.run_once().await? {
            runs.push(run);
        }
        Ok(runs)
    }

    async fn claim_one(&self) -> Result<Option<ClaimedJob>> {
        let mut jobs = self
            .queue
            .claim(self.config.job_type, &self.worker_id, 1)
            .await?;
        Ok(jobs.pop())
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.worker_id,
            job_type = self.config.job_type,
            concurrency = self.config.concurrency,
            jobs_per_minute = self.config.jobs_per_minute,
            "Job worker starting"
        );

        let mut in_flight = JoinSet::new();

        loop {
            let slot = tokio::select! {
                _ = shutdown.cancelled() => break,
                slot = self.slots.clone().acquire_owned() => slot?,
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.starts.until_ready() => {}
            }

            let job = match self.claim_one().await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    drop(slot);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                    continue;
                }
                Err(e) => {
                    drop(slot);
                    error!(job_type = self.config.job_type, error = %e, "Failed to claim jobs");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let queue = self.queue.clone();
            let handler = self.handler.clone();
            let config = self.config.clone();
            in_flight.spawn(async move {
                let _slot = slot;
                process_job(queue, handler, job, &config).await
            });

            // Reap finished tasks so the set does not grow unbounded.
            while let Some(done) = in_flight.try_join_next() {
                if let Err(e) = done {
                    error!(job_type = self.config.job_type, error = %e, "Job task panicked");
                }
            }
        }

        if !in_flight.is_empty() {
            info!(
                job_type = self.config.job_type,
                count = in_flight.len(),
                "Waiting for running jobs to complete"
            );
        }
        while let Some(done) = in_flight.join_next().await {
            if let Err(e) = done {
                error!(job_type = self.config.job_type, error = %e, "Job task panicked");
            }
        }

        info!(worker_id = %self.worker_id, "Job worker stopped");
        Ok(())
    }
}

async fn process_job(
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    job: ClaimedJob,
    config: &QueueConfig,
) -> JobRun {
    let job_id = job.id;
    let ctx = JobContext::new(&job, queue.clone());

    let heartbeat_stop = CancellationToken::new();
    let heartbeat = {
        let queue = queue.clone();
        let stop = heartbeat_stop.clone();
        let interval = config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // Skip first immediate tick
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = queue.heartbeat(job_id).await {
                            warn!(job_id = %job_id, error = %e, "Heartbeat failed");
                        }
                    }
                }
            }
        })
    };

    let result = handler.handle(&job, &ctx).await;

    heartbeat_stop.cancel();
    let _ = heartbeat.await;

    match result {
        Ok(()) => {
            debug!(job_id = %job_id, job_type = %job.job.job_type, "Job succeeded");
            if let Err(e) = queue.mark_succeeded(job_id).await {
                error!(job_id = %job_id, error = %e, "Failed to mark job as succeeded");
            }
            JobRun::Succeeded
        }
        Err(failure) => {
            let message = failure.to_string();
            warn!(
                job_id = %job_id,
                job_type = %job.job.job_type,
                attempt = job.job.attempt,
                kind = ?failure.kind,
                error = %message,
                "Job failed"
            );
            match queue.mark_failed(job_id, &message, failure.kind).await {
                Ok(disposition) => JobRun::Failed(disposition),
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Failed to mark job as failed");
                    // Lease expiry will hand the job to another worker.
                    JobRun::Failed(FailureDisposition::Failed)
                }
            }
        }
    }
}

/// All queue workers of one process.
pub struct WorkerPool {
    workers: Vec<JobWorker>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
        }
    }

    pub fn with_worker(mut self, worker: JobWorker) -> Self {
        self.workers.push(worker);
        self
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let handles: Vec<_> = self
            .workers
            .into_iter()
            .map(|worker| {
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let job_type = worker.job_type();
                    if let Err(e) = worker.run(shutdown).await {
                        error!(job_type, error = %e, "Job worker exited with error");
                    }
                })
            })
            .collect();
        futures::future::join_all(handles).await;
        Ok(())
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}
