//! Publish an APPROVED post exactly once.
//!
//! ```text
//! job revision != latest revision -> Superseded (nothing claimed)
//! tx1: lock row; APPROVED -> PUBLISHING (PUBLISHING/POSTED -> AlreadyHandled)
//!   └─► revision + account + credential
//!         └─► platform create_post via RateLimiter
//!               ├─► ok:  tx2 POSTED + entry COMPLETED (failure => PublishedUnrecorded)
//!               └─► err: transient -> APPROVED (retry) | terminal -> FAILED
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};

use crate::common::{NonCritical, PostId, RevisionId};
use crate::domains::accounts::Account;
use crate::domains::audit::{actions, audit, targets, NewAuditEntry};
use crate::domains::posts::{
    ClaimAction, ClaimOutcome, Post, PostErrorCode, PostRevision, PostStatus, PublishRecord,
    StatusChange,
};
use crate::domains::publishing::classify::{classify, FailureAction};
use crate::domains::publishing::jobs::PublishJob;
use crate::kernel::jobs::JobContext;
use crate::kernel::{PlatformError, PublishedPost, ServerDeps};

#[derive(Debug, Clone)]
pub enum PublishOutcome {
    Published {
        external_id: String,
        permalink: Option<String>,
    },
    /// Another worker published or is publishing this post
    AlreadyHandled(PostStatus),
    /// Post is not APPROVED; nothing was done
    Rejected(PostStatus),
    /// The job carries an older revision than the one last reviewed
    Superseded { latest: Option<RevisionId> },
    /// Transient failure; post back to APPROVED for the queue to retry
    Reverted { error: PlatformError },
    Failed {
        code: PostErrorCode,
        message: String,
    },
    /// No usable account credential; post needs a human
    ActionRequired { reason: String },
    /// Published externally, bookkeeping failed. Never retried.
    PublishedUnrecorded { external_id: String, error: String },
}

/// Everything the platform call needs, loaded after the claim.
struct PublishInputs {
    post: Post,
    revision: PostRevision,
    account: Account,
    access_token: String,
}

enum Prepared {
    Ready(PublishInputs),
    ActionRequired(String),
}

pub async fn publish_post(
    job: &PublishJob,
    final_attempt: bool,
    ctx: Option<&JobContext>,
    deps: &ServerDeps,
) -> Result<PublishOutcome> {
    let post_id = job.post_id;

    // A regenerated post is approved again under a new revision; the old
    // revision's job must never publish.
    let latest = latest_revision_id(post_id, deps).await?;
    if latest != Some(job.revision_id) {
        info!(
            post_id = %post_id,
            revision_id = %job.revision_id,
            latest = ?latest,
            "Publish job superseded by a newer revision"
        );
        return Ok(PublishOutcome::Superseded { latest });
    }

    match deps.store.claim_post(post_id, ClaimAction::Publish).await? {
        ClaimOutcome::Claimed => {}
        ClaimOutcome::AlreadyHandled(status) => {
            info!(post_id = %post_id, status = %status, "Post already published or publishing");
            return Ok(PublishOutcome::AlreadyHandled(status));
        }
        ClaimOutcome::Rejected(status) => {
            warn!(post_id = %post_id, status = %status, "Post not approved, aborting publish");
            return Ok(PublishOutcome::Rejected(status));
        }
    }
    report(ctx, 10).await;

    let inputs = match prepare(job, deps).await {
        Ok(Prepared::Ready(inputs)) => inputs,
        Ok(Prepared::ActionRequired(reason)) => {
            return require_action(post_id, reason, deps).await;
        }
        Err(e) => {
            // Nothing external happened yet; hand the post back.
            release(post_id, deps).await;
            return Err(e);
        }
    };
    report(ctx, 30).await;

    let published = deps
        .rate_limiter
        .execute(|| {
            deps.platform
                .create_post(&inputs.account, &inputs.access_token, &inputs.revision.content)
        })
        .await;
    report(ctx, 60).await;

    match published {
        Ok(published) => finalize(job, inputs, published, deps, ctx).await,
        Err(e) => handle_platform_error(post_id, e, final_attempt, deps).await,
    }
}

async fn prepare(job: &PublishJob, deps: &ServerDeps) -> Result<Prepared> {
    let post = deps
        .store
        .find_post(job.post_id)
        .await?
        .with_context(|| format!("post {} not found", job.post_id))?;

    let revision = deps
        .store
        .find_revision(job.revision_id)
        .await?
        .filter(|r| r.post_id == job.post_id)
        .with_context(|| format!("revision {} not found for post {}", job.revision_id, job.post_id))?;

    let account = match job.account_id {
        Some(id) => deps.store.find_account(id).await?,
        None => deps.store.default_account().await?,
    };
    let Some(account) = account else {
        return Ok(Prepared::ActionRequired("no publishing account configured".to_string()));
    };
    if !account.is_publishable() {
        return Ok(Prepared::ActionRequired(format!(
            "account {} is {:?}",
            account.handle, account.status
        )));
    }

    let access_token = match deps.cipher.decrypt(&account.encrypted_access_token) {
        Ok(token) => token,
        Err(e) => {
            return Ok(Prepared::ActionRequired(format!(
                "credential for {} unreadable: {e}",
                account.handle
            )))
        }
    };

    Ok(Prepared::Ready(PublishInputs {
        post,
        revision,
        account,
        access_token,
    }))
}

async fn finalize(
    job: &PublishJob,
    inputs: PublishInputs,
    published: PublishedPost,
    deps: &ServerDeps,
    ctx: Option<&JobContext>,
) -> Result<PublishOutcome> {
    let post_id = job.post_id;
    let record = PublishRecord {
        post_id,
        revision_id: inputs.revision.id,
        external_id: published.external_id.clone(),
        permalink: published.permalink.clone(),
        posted_at: Utc::now(),
        schedule_entry_id: inputs.post.schedule_entry_id,
    };

    if let Err(e) = deps.store.record_published(record).await {
        error!(
            critical = true,
            post_id = %post_id,
            external_id = %published.external_id,
            error = %e,
            "Post published but bookkeeping failed"
        );
        audit(
            NewAuditEntry::new(
                deps.system_member_id,
                actions::POST_PUBLISH_UNRECORDED,
                targets::POST,
                post_id,
            )
            .with_metadata(json!({
                "code": PostErrorCode::Critical,
                "external_id": published.external_id,
                "error": format!("{e:#}"),
            })),
            deps,
        )
        .await;
        return Ok(PublishOutcome::PublishedUnrecorded {
            external_id: published.external_id,
            error: format!("{e:#}"),
        });
    }

    if let Some(arm_id) = inputs.post.arm_id {
        NonCritical::new("arm_usage_rollup")
            .run(deps.store.increment_arm_uses(arm_id))
            .await;
    }
    audit(
        NewAuditEntry::new(deps.system_member_id, actions::POST_PUBLISHED, targets::POST, post_id)
            .with_metadata(json!({
                "external_id": published.external_id,
                "permalink": published.permalink,
                "revision_id": inputs.revision.id,
                "account": inputs.account.handle,
            })),
        deps,
    )
    .await;
    report(ctx, 100).await;

    info!(post_id = %post_id, external_id = %published.external_id, "Post published");
    Ok(PublishOutcome::Published {
        external_id: published.external_id,
        permalink: published.permalink,
    })
}

async fn handle_platform_error(
    post_id: PostId,
    error: PlatformError,
    final_attempt: bool,
    deps: &ServerDeps,
) -> Result<PublishOutcome> {
    match classify(&error, final_attempt) {
        FailureAction::Revert(code) => {
            warn!(post_id = %post_id, kind = %error.kind, error = %error.message, "Transient publish failure, reverting to APPROVED");
            deps.store
                .transition_post(
                    post_id,
                    StatusChange::new(PostStatus::Publishing, PostStatus::Approved)
                        .with_error(code, error.message.clone()),
                )
                .await?;
            Ok(PublishOutcome::Reverted { error })
        }
        FailureAction::Fail(code) => {
            error!(post_id = %post_id, kind = %error.kind, code = ?code, error = %error.message, "Publish failed");
            deps.store
                .transition_post(
                    post_id,
                    StatusChange::new(PostStatus::Publishing, PostStatus::Failed)
                        .with_error(code, error.message.clone()),
                )
                .await?;
            audit(
                NewAuditEntry::new(
                    deps.system_member_id,
                    actions::POST_PUBLISH_FAILED,
                    targets::POST,
                    post_id,
                )
                .with_metadata(json!({
                    "code": code,
                    "kind": error.kind.as_str(),
                    "error": error.message,
                    "final_attempt": final_attempt,
                })),
                deps,
            )
            .await;
            Ok(PublishOutcome::Failed {
                code,
                message: error.message,
            })
        }
    }
}

async fn require_action(post_id: PostId, reason: String, deps: &ServerDeps) -> Result<PublishOutcome> {
    warn!(post_id = %post_id, reason = %reason, "Publishing needs re-authorization");
    deps.store
        .transition_post(
            post_id,
            StatusChange::new(PostStatus::Publishing, PostStatus::ActionRequired)
                .with_error(PostErrorCode::TokenExpired, reason.clone()),
        )
        .await?;
    audit(
        NewAuditEntry::new(
            deps.system_member_id,
            actions::POST_ACTION_REQUIRED,
            targets::POST,
            post_id,
        )
        .with_metadata(json!({ "reason": reason })),
        deps,
    )
    .await;
    Ok(PublishOutcome::ActionRequired { reason })
}

async fn release(post_id: PostId, deps: &ServerDeps) {
    let change = StatusChange::new(PostStatus::Publishing, PostStatus::Approved);
    if let Err(e) = deps.store.transition_post(post_id, change).await {
        error!(post_id = %post_id, error = %e, "Could not release PUBLISHING claim");
    }
}

async fn latest_revision_id(post_id: PostId, deps: &ServerDeps) -> Result<Option<RevisionId>> {
    let revisions = deps.store.list_revisions(post_id).await?;
    Ok(revisions.last().map(|r| r.id))
}

async fn report(ctx: Option<&JobContext>, percent: i16) {
    if let Some(ctx) = ctx {
        ctx.progress(percent).await;
    }
}
