use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{
    ClaimAction, ClaimOutcome, NewPost, NewRevision, Post, PostRevision, PostedEmbedding,
    PublishRecord, StatusChange,
};
use crate::common::{MemberId, PostId, RevisionId};

/// Persistence contract for posts and revisions.
///
/// Every status write is conditional on the expected current status; a
/// mismatch surfaces as `LifecycleError::StaleStatus` inside the `anyhow::Error`.
#[async_trait]
pub trait PostStore: Send + Sync {
    async fn create_post(&self, new: NewPost) -> Result<Post>;

    async fn find_post(&self, id: PostId) -> Result<Option<Post>>;

    /// Transactional read-and-advance under the post row lock.
    async fn claim_post(&self, id: PostId, action: ClaimAction) -> Result<ClaimOutcome>;

    async fn transition_post(&self, id: PostId, change: StatusChange) -> Result<Post>;

    /// PENDING_REVIEW -> APPROVED with approver and time.
    async fn approve_post(&self, id: PostId, approver: MemberId, at: DateTime<Utc>)
        -> Result<Post>;

    /// PUBLISHING -> POSTED plus schedule entry COMPLETED in one transaction.
    async fn record_published(&self, record: PublishRecord) -> Result<Post>;

    /// Next gapless revision number, assigned under the post row lock.
    async fn create_revision(&self, new: NewRevision) -> Result<PostRevision>;

    async fn find_revision(&self, id: RevisionId) -> Result<Option<PostRevision>>;

    async fn list_revisions(&self, post_id: PostId) -> Result<Vec<PostRevision>>;

    async fn recent_posted_contents(&self, limit: i64) -> Result<Vec<String>>;

    async fn recent_posted_embeddings(&self, limit: i64) -> Result<Vec<PostedEmbedding>>;

    async fn top_exemplars(&self, limit: i64) -> Result<Vec<String>>;

    async fn posts_awaiting_reward(
        &self,
        posted_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Post>>;

    /// GENERATING posts untouched since `updated_before`, oldest first.
    async fn stalled_generating(&self, updated_before: DateTime<Utc>, limit: i64)
        -> Result<Vec<Post>>;
}
