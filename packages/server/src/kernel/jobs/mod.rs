//! Job infrastructure for background command execution.
//!
//! This module provides the kernel-level infrastructure only:
//! - [`Job`] - job model with its SQL
//! - [`PostgresJobQueue`] - database-backed queue (`FOR UPDATE SKIP LOCKED` claims)
//! - [`JobWorker`] / [`WorkerPool`] - per-queue workers with concurrency and start-rate caps
//! - [`testing::MemoryJobQueue`] - in-memory queue for tests
//!
//! Commands (payloads) and their handlers live in their domains.

mod job;
mod queue;
pub mod testing;
mod worker;

pub use job::{retry_delay, ErrorKind, FailureDisposition, Job, JobStatus};
pub use queue::{
    ClaimedJob, CommandMeta, DeadLetter, EnqueueResult, JobQueue, JobQueueExt, NewJob,
    PostgresJobQueue,
};
pub use worker::{JobContext, JobFailure, JobHandler, JobRun, JobWorker, QueueConfig, WorkerPool};
