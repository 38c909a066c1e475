//! Audit trail. Write-only from the pipeline; writes never block it.

pub mod models;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::common::NonCritical;
use crate::kernel::ServerDeps;

pub use models::{AuditLog, NewAuditEntry};

pub mod actions {
    pub const POST_GENERATED: &str = "post.generated";
    pub const POST_GENERATION_FAILED: &str = "post.generation_failed";
    pub const POST_PUBLISHED: &str = "post.published";
    pub const POST_PUBLISH_FAILED: &str = "post.publish_failed";
    pub const POST_PUBLISH_UNRECORDED: &str = "post.publish_unrecorded";
    pub const POST_ACTION_REQUIRED: &str = "post.action_required";
    pub const REVIEW_APPROVED: &str = "review.approved";
    pub const REVIEW_REGENERATE: &str = "review.regenerate";
    pub const REVIEW_SKIPPED: &str = "review.skipped";
    pub const REVIEW_EXPIRED: &str = "review.expired";
    pub const SCHEDULE_PLANNED: &str = "schedule.planned";
    pub const ACCOUNT_TOKEN_REFRESHED: &str = "account.token_refreshed";
    pub const ACCOUNT_ACTION_REQUIRED: &str = "account.action_required";
    pub const ARM_REWARDED: &str = "arm.rewarded";
}

pub mod targets {
    pub const POST: &str = "post";
    pub const REVIEW_REQUEST: &str = "review_request";
    pub const SCHEDULE_ENTRY: &str = "schedule_entry";
    pub const ACCOUNT: &str = "account";
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn record_audit(&self, entry: NewAuditEntry) -> Result<()>;

    async fn audit_trail(&self, target_type: &str, target_id: Uuid) -> Result<Vec<AuditLog>>;
}

/// Best-effort audit write.
pub async fn audit(entry: NewAuditEntry, deps: &ServerDeps) {
    let action = entry.action;
    NonCritical::new(action)
        .run(deps.store.record_audit(entry))
        .await;
}
