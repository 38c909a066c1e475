use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{ReviewDecision, ReviewError, ReviewRequest};
use crate::common::PostId;

#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Persist a new PENDING request; older PENDING requests for the post
    /// become CANCELLED in the same transaction.
    async fn create_review_request(&self, request: ReviewRequest) -> Result<ReviewRequest>;

    /// Atomically mark the token USED with the decision taken.
    async fn consume_review_token(
        &self,
        token: &str,
        decision: ReviewDecision,
        now: DateTime<Utc>,
    ) -> Result<ReviewRequest, ReviewError>;

    /// Mark every PENDING request past its expiry EXPIRED and return them.
    async fn expire_reviews(&self, now: DateTime<Utc>) -> Result<Vec<ReviewRequest>>;

    async fn find_pending_review(&self, post_id: PostId) -> Result<Option<ReviewRequest>>;
}
