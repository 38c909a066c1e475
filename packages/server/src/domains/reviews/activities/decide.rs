use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::common::{MemberId, PostId};
use crate::domains::audit::{actions, audit, targets, NewAuditEntry};
use crate::domains::generation::GenerateJob;
use crate::domains::posts::{LifecycleError, PostStatus, StatusChange};
use crate::domains::publishing::PublishJob;
use crate::domains::reviews::models::{ReviewDecision, ReviewError};
use crate::domains::schedules::EntryStatus;
use crate::kernel::jobs::JobQueueExt;
use crate::kernel::ServerDeps;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub post_id: PostId,
    pub decision: ReviewDecision,
    /// Publish or generate job enqueued as a consequence
    pub job_id: Option<Uuid>,
}

/// Consume a review token and apply the reviewer's decision.
///
/// - APPROVE: post APPROVED, publish job at max(now, entry scheduled time)
/// - REGENERATE: post DRAFT, generate job now
/// - SKIP: post SKIPPED, schedule entry CANCELLED
pub async fn apply_review_decision(
    token: &str,
    decision: ReviewDecision,
    reviewer: MemberId,
    deps: &ServerDeps,
) -> Result<ReviewOutcome, ReviewError> {
    let now = Utc::now();
    let request = deps.store.consume_review_token(token, decision, now).await?;
    let post_id = request.post_id;

    let post = deps
        .store
        .find_post(post_id)
        .await?
        .ok_or(LifecycleError::NotFound(post_id))?;

    let job_id = match decision {
        ReviewDecision::Approve => {
            deps.store
                .approve_post(post_id, reviewer, now)
                .await
                .map_err(ReviewError::from_store)?;

            let scheduled_at = match post.schedule_entry_id {
                Some(entry_id) => deps
                    .store
                    .find_entry(entry_id)
                    .await?
                    .map(|entry| entry.scheduled_at),
                None => None,
            };
            let run_at = scheduled_at.map_or(now, |at| at.max(now));
            let job = PublishJob {
                post_id,
                revision_id: request.revision_id,
                account_id: None,
            };
            let result = deps.jobs.schedule(job, run_at).await?;
            info!(post_id = %post_id, run_at = %run_at, "Post approved, publish scheduled");
            audit_decision(actions::REVIEW_APPROVED, reviewer, post_id, json!({ "publish_at": run_at }), deps).await;
            Some(result.job_id())
        }
        ReviewDecision::Regenerate => {
            let job_id = request_regeneration(post_id, reviewer, deps).await?;
            Some(job_id)
        }
        ReviewDecision::Skip => {
            deps.store
                .transition_post(post_id, StatusChange::new(PostStatus::PendingReview, PostStatus::Skipped))
                .await
                .map_err(ReviewError::from_store)?;
            if let Some(entry_id) = post.schedule_entry_id {
                deps.store.set_entry_status(entry_id, EntryStatus::Cancelled).await?;
            }
            info!(post_id = %post_id, "Post skipped by reviewer");
            audit_decision(actions::REVIEW_SKIPPED, reviewer, post_id, json!({}), deps).await;
            None
        }
    };

    Ok(ReviewOutcome {
        post_id,
        decision,
        job_id,
    })
}

/// Send a post in review (or approved but unpublished) back to DRAFT and
/// queue a fresh generation.
pub async fn request_regeneration(
    post_id: PostId,
    actor: MemberId,
    deps: &ServerDeps,
) -> Result<Uuid, ReviewError> {
    let post = deps
        .store
        .find_post(post_id)
        .await?
        .ok_or(LifecycleError::NotFound(post_id))?;

    deps.store
        .transition_post(post_id, StatusChange::new(post.status, PostStatus::Draft))
        .await
        .map_err(ReviewError::from_store)?;

    let scheduled_time = match post.schedule_entry_id {
        Some(entry_id) => deps.store.find_entry(entry_id).await?.map(|e| e.scheduled_at),
        None => None,
    };
    let job = GenerateJob::builder()
        .post_id(post_id)
        .created_by(post.created_by)
        .scheduled_time(scheduled_time)
        .schedule_entry_id(post.schedule_entry_id)
        .build();
    let result = deps.jobs.enqueue(job).await?;

    info!(post_id = %post_id, from = %post.status, "Regeneration requested");
    audit_decision(actions::REVIEW_REGENERATE, actor, post_id, json!({ "from": post.status }), deps).await;
    Ok(result.job_id())
}

async fn audit_decision(
    action: &'static str,
    actor: MemberId,
    post_id: PostId,
    metadata: serde_json::Value,
    deps: &ServerDeps,
) {
    audit(
        NewAuditEntry::new(actor, action, targets::POST, post_id).with_metadata(metadata),
        deps,
    )
    .await;
}
