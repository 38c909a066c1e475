//! In-memory `JobQueue` for tests.
//!
//! Same retry/dead-letter semantics as the Postgres queue (both go through
//! `Job::failure_disposition`). Scheduled jobs are only claimable once due;
//! `make_all_due` skips the wait.

use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use super::job::{ErrorKind, FailureDisposition, Job, JobStatus};
use super::queue::{ClaimedJob, DeadLetter, EnqueueResult, JobQueue, NewJob};

#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<Vec<Job>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.lock().clone()
    }

    pub fn job(&self, id: Uuid) -> Option<Job> {
        self.lock().iter().find(|j| j.id == id).cloned()
    }

    /// Jobs of one type still waiting to run.
    pub fn pending(&self, job_type: &str) -> Vec<Job> {
        self.lock()
            .iter()
            .filter(|j| j.job_type == job_type && j.status == JobStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn make_all_due(&self) {
        for job in self.lock().iter_mut() {
            if job.status == JobStatus::Pending {
                job.next_run_at = None;
            }
        }
    }

    fn with_job<T>(&self, id: Uuid, f: impl FnOnce(&mut Job) -> T) -> Result<T> {
        let mut jobs = self.lock();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| anyhow!("job {id} not found"))?;
        Ok(f(job))
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn push(&self, new_job: NewJob) -> Result<EnqueueResult> {
        let mut jobs = self.lock();
        if let Some(key) = &new_job.idempotency_key {
            if let Some(existing) = jobs.iter().find(|j| {
                j.idempotency_key.as_ref() == Some(key)
                    && matches!(j.status, JobStatus::Pending | JobStatus::Running)
            }) {
                return Ok(EnqueueResult::Duplicate(existing.id));
            }
        }
        let job = new_job.into_job();
        let id = job.id;
        jobs.push(job);
        Ok(EnqueueResult::Created(id))
    }

    async fn claim(&self, job_type: &str, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>> {
        let now = Utc::now();
        let mut jobs = self.lock();
        let mut claimed = Vec::new();
        for job in jobs.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            let due = job.status == JobStatus::Pending
                && job.next_run_at.map_or(true, |at| at <= now);
            let lease_expired = job.status == JobStatus::Running
                && job.lease_expires_at.is_some_and(|at| at < now);
            if job.job_type == job_type && (due || lease_expired) {
                job.status = JobStatus::Running;
                job.worker_id = Some(worker_id.to_string());
                job.lease_expires_at = Some(now + Duration::minutes(1));
                claimed.push(ClaimedJob {
                    id: job.id,
                    job: job.clone(),
                });
            }
        }
        Ok(claimed)
    }

    async fn mark_succeeded(&self, job_id: Uuid) -> Result<()> {
        self.with_job(job_id, |job| {
            job.status = JobStatus::Succeeded;
            job.progress = 100;
            job.lease_expires_at = None;
        })
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        kind: ErrorKind,
    ) -> Result<FailureDisposition> {
        let now = Utc::now();
        let (disposition, retry) = self.with_job(job_id, |job| {
            let disposition = job.failure_disposition(kind, now);
            job.error_message = Some(error.to_string());
            job.error_kind = Some(kind);
            job.lease_expires_at = None;
            let retry = match disposition {
                FailureDisposition::RetryScheduled { run_at } => {
                    job.status = JobStatus::Failed;
                    Some(job.create_retry(run_at))
                }
                FailureDisposition::Failed => {
                    job.status = JobStatus::Failed;
                    None
                }
                FailureDisposition::DeadLettered => {
                    job.status = JobStatus::DeadLetter;
                    job.dead_lettered_at = Some(now);
                    job.dead_letter_reason = Some("max retries exceeded".to_string());
                    None
                }
            };
            (disposition, retry)
        })?;

        if let Some(retry) = retry {
            self.lock().push(retry);
        }
        Ok(disposition)
    }

    async fn report_progress(&self, job_id: Uuid, percent: i16) -> Result<()> {
        self.with_job(job_id, |job| job.progress = percent)
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        self.with_job(job_id, |job| {
            if job.status == JobStatus::Running {
                job.lease_expires_at = Some(Utc::now() + Duration::minutes(1));
            }
        })
    }

    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>> {
        let jobs = self.lock();
        Ok(jobs
            .iter()
            .filter(|j| j.status == JobStatus::DeadLetter)
            .take(limit.max(0) as usize)
            .cloned()
            .map(DeadLetter::from)
            .collect())
    }
}
