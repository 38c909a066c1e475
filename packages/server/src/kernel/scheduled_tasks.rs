//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! - Review expiry sweep (hourly)
//! - Stalled generation sweep (every 15 minutes)
//! - Token expiry scan (every 6 hours)
//! - Engagement sync (every 4 hours)
//! - Next-day planning (daily, 23:00 UTC)
//!
//! # Architecture
//!
//! Scheduled tasks run independently of the job queue workers.
//! They enqueue jobs or do small bookkeeping rather than long work directly.
//!
//! ```text
//! Scheduler (23:00 UTC)
//!     │
//!     └─► plan_day(tomorrow)
//!             └─► For each slot → entry + DRAFT post + generate_post job
//!                     └─► GenerateHandler → review → PublishHandler
//! ```

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::domains::accounts::scan_expiring_tokens;
use crate::domains::generation::recover_stalled_generations;
use crate::domains::reviews::expire_stale_reviews;
use crate::domains::schedules::{plan_day, sync_engagement};
use crate::kernel::ServerDeps;

const REVIEW_SWEEP: &str = "0 0 * * * *";
const GENERATION_SWEEP: &str = "0 */15 * * * *";
const TOKEN_SCAN: &str = "0 15 */6 * * *";
const ENGAGEMENT_SYNC: &str = "0 30 */4 * * *";
const DAILY_PLAN: &str = "0 0 23 * * *";

/// Start all scheduled tasks
pub async fn start_scheduler(deps: Arc<ServerDeps>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let review_deps = deps.clone();
    scheduler
        .add(Job::new_async(REVIEW_SWEEP, move |_uuid, _lock| {
            let deps = review_deps.clone();
            Box::pin(async move {
                match expire_stale_reviews(&deps).await {
                    Ok(expired) => tracing::debug!(expired, "Review sweep complete"),
                    Err(e) => tracing::error!("Review expiry task failed: {}", e),
                }
            })
        })?)
        .await?;

    let generation_deps = deps.clone();
    scheduler
        .add(Job::new_async(GENERATION_SWEEP, move |_uuid, _lock| {
            let deps = generation_deps.clone();
            Box::pin(async move {
                match recover_stalled_generations(&deps).await {
                    Ok(recovered) => tracing::debug!(recovered, "Generation sweep complete"),
                    Err(e) => tracing::error!("Generation sweep task failed: {}", e),
                }
            })
        })?)
        .await?;

    let token_deps = deps.clone();
    scheduler
        .add(Job::new_async(TOKEN_SCAN, move |_uuid, _lock| {
            let deps = token_deps.clone();
            Box::pin(async move {
                if let Err(e) = scan_expiring_tokens(&deps).await {
                    tracing::error!("Token scan task failed: {}", e);
                }
            })
        })?)
        .await?;

    let engagement_deps = deps.clone();
    scheduler
        .add(Job::new_async(ENGAGEMENT_SYNC, move |_uuid, _lock| {
            let deps = engagement_deps.clone();
            Box::pin(async move {
                if let Err(e) = sync_engagement(&deps).await {
                    tracing::error!("Engagement sync task failed: {}", e);
                }
            })
        })?)
        .await?;

    let plan_deps = deps.clone();
    scheduler
        .add(Job::new_async(DAILY_PLAN, move |_uuid, _lock| {
            let deps = plan_deps.clone();
            Box::pin(async move {
                if let Err(e) = run_daily_plan(&deps).await {
                    tracing::error!("Daily planning task failed: {}", e);
                }
            })
        })?)
        .await?;

    scheduler.start().await?;

    tracing::info!(
        "Scheduled tasks started (review sweep hourly, generation sweep every 15m, token scan every 6h, engagement sync every 4h, planning daily)"
    );
    Ok(scheduler)
}

/// Plan tomorrow (UTC).
async fn run_daily_plan(deps: &ServerDeps) -> Result<()> {
    let date = (Utc::now() + Duration::days(1)).date_naive();
    let mut rng = StdRng::from_entropy();
    let plan = plan_day(date, &mut rng, deps).await?;

    tracing::info!(
        %date,
        planned = plan.planned.len(),
        duplicates = plan.duplicates,
        failed = plan.failed,
        "Daily planning complete"
    );
    Ok(())
}
