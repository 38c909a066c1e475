//! Persistence seam for the pipeline.
//!
//! Each domain declares its own store trait next to its models; `PipelineStore`
//! is the union that `ServerDeps` carries. `PostgresStore` delegates to the
//! SQL on the domain models, `test_dependencies::MemoryStore` keeps rows in
//! memory for tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::{AccountId, ArmId, EntryId, MemberId, PostId, RevisionId};
use crate::domains::accounts::{Account, AccountStatus, AccountStore, NewAccount};
use crate::domains::audit::{AuditLog, AuditStore, NewAuditEntry};
use crate::domains::posts::{
    ClaimAction, ClaimOutcome, NewPost, NewRevision, Post, PostRevision, PostStore,
    PostedEmbedding, PublishRecord, StatusChange,
};
use crate::domains::reviews::{ReviewDecision, ReviewError, ReviewRequest, ReviewStore};
use crate::domains::schedules::{
    DailyScheduleEntry, EntryStatus, NewArm, NewEntry, NewReward, NewTimeSlot, PostReward,
    ScheduleArm, ScheduleStore, TimeSlot,
};

pub trait PipelineStore: PostStore + ScheduleStore + ReviewStore + AccountStore + AuditStore {}

impl<T> PipelineStore for T where T: PostStore + ScheduleStore + ReviewStore + AccountStore + AuditStore {}

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// Posts
// =============================================================================

#[async_trait]
impl PostStore for PostgresStore {
    async fn create_post(&self, new: NewPost) -> Result<Post> {
        Post::create(new, &self.pool).await
    }

    async fn find_post(&self, id: PostId) -> Result<Option<Post>> {
        Post::find_by_id(id, &self.pool).await
    }

    async fn claim_post(&self, id: PostId, action: ClaimAction) -> Result<ClaimOutcome> {
        Post::claim(id, action, &self.pool).await
    }

    async fn transition_post(&self, id: PostId, change: StatusChange) -> Result<Post> {
        Post::transition(id, &change, &self.pool).await
    }

    async fn approve_post(
        &self,
        id: PostId,
        approver: MemberId,
        at: DateTime<Utc>,
    ) -> Result<Post> {
        Post::approve(id, approver, at, &self.pool).await
    }

    async fn record_published(&self, record: PublishRecord) -> Result<Post> {
        Post::record_published(&record, &self.pool).await
    }

    async fn create_revision(&self, new: NewRevision) -> Result<PostRevision> {
        PostRevision::create_next(new, &self.pool).await
    }

    async fn find_revision(&self, id: RevisionId) -> Result<Option<PostRevision>> {
        PostRevision::find_by_id(id, &self.pool).await
    }

    async fn list_revisions(&self, post_id: PostId) -> Result<Vec<PostRevision>> {
        PostRevision::find_for_post(post_id, &self.pool).await
    }

    async fn recent_posted_contents(&self, limit: i64) -> Result<Vec<String>> {
        Post::find_recent_posted_contents(limit, &self.pool).await
    }

    async fn recent_posted_embeddings(&self, limit: i64) -> Result<Vec<PostedEmbedding>> {
        Post::find_recent_posted_embeddings(limit, &self.pool).await
    }

    async fn top_exemplars(&self, limit: i64) -> Result<Vec<String>> {
        Post::find_top_exemplars(limit, &self.pool).await
    }

    async fn posts_awaiting_reward(
        &self,
        posted_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Post>> {
        Post::find_awaiting_reward(posted_before, limit, &self.pool).await
    }

    async fn stalled_generating(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Post>> {
        Post::find_stalled_generating(updated_before, limit, &self.pool).await
    }
}

// =============================================================================
// Schedules
// =============================================================================

#[async_trait]
impl ScheduleStore for PostgresStore {
    async fn create_arm(&self, new: NewArm) -> Result<ScheduleArm> {
        ScheduleArm::create(new, &self.pool).await
    }

    async fn find_arm(&self, id: ArmId) -> Result<Option<ScheduleArm>> {
        ScheduleArm::find_by_id(id, &self.pool).await
    }

    async fn list_arms(&self) -> Result<Vec<ScheduleArm>> {
        ScheduleArm::find_all(&self.pool).await
    }

    async fn increment_arm_uses(&self, id: ArmId) -> Result<()> {
        ScheduleArm::increment_uses(id, &self.pool).await
    }

    async fn create_slot(&self, new: NewTimeSlot) -> Result<TimeSlot> {
        TimeSlot::create(new, &self.pool).await
    }

    async fn list_slots(&self) -> Result<Vec<TimeSlot>> {
        TimeSlot::find_all(&self.pool).await
    }

    async fn insert_entry(&self, new: NewEntry) -> Result<Option<DailyScheduleEntry>> {
        DailyScheduleEntry::insert(new, &self.pool).await
    }

    async fn find_entry(&self, id: EntryId) -> Result<Option<DailyScheduleEntry>> {
        DailyScheduleEntry::find_by_id(id, &self.pool).await
    }

    async fn entries_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DailyScheduleEntry>> {
        DailyScheduleEntry::find_between(start, end, &self.pool).await
    }

    async fn attach_entry_post(&self, id: EntryId, post_id: PostId) -> Result<()> {
        DailyScheduleEntry::attach_post(id, post_id, &self.pool).await
    }

    async fn set_entry_status(&self, id: EntryId, status: EntryStatus) -> Result<()> {
        DailyScheduleEntry::set_status(id, status, &self.pool).await
    }

    async fn record_reward(&self, reward: NewReward) -> Result<bool> {
        PostReward::record(&reward, &self.pool).await
    }
}

// =============================================================================
// Reviews
// =============================================================================

#[async_trait]
impl ReviewStore for PostgresStore {
    async fn create_review_request(&self, request: ReviewRequest) -> Result<ReviewRequest> {
        ReviewRequest::insert(&request, &self.pool).await
    }

    async fn consume_review_token(
        &self,
        token: &str,
        decision: ReviewDecision,
        now: DateTime<Utc>,
    ) -> Result<ReviewRequest, ReviewError> {
        ReviewRequest::consume(token, decision, now, &self.pool).await
    }

    async fn expire_reviews(&self, now: DateTime<Utc>) -> Result<Vec<ReviewRequest>> {
        ReviewRequest::expire_due(now, &self.pool).await
    }

    async fn find_pending_review(&self, post_id: PostId) -> Result<Option<ReviewRequest>> {
        ReviewRequest::find_pending_for_post(post_id, &self.pool).await
    }
}

// =============================================================================
// Accounts
// =============================================================================

#[async_trait]
impl AccountStore for PostgresStore {
    async fn create_account(&self, new: NewAccount) -> Result<Account> {
        Account::create(new, &self.pool).await
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>> {
        Account::find_by_id(id, &self.pool).await
    }

    async fn default_account(&self) -> Result<Option<Account>> {
        Account::find_default(&self.pool).await
    }

    async fn accounts_due_for_refresh(
        &self,
        expiring_before: DateTime<Utc>,
        refreshed_before: DateTime<Utc>,
    ) -> Result<Vec<Account>> {
        Account::find_due_for_refresh(expiring_before, refreshed_before, &self.pool).await
    }

    async fn update_account_token(
        &self,
        id: AccountId,
        encrypted_access_token: String,
        expires_at: DateTime<Utc>,
        refreshed_at: DateTime<Utc>,
    ) -> Result<()> {
        Account::update_token(id, &encrypted_access_token, expires_at, refreshed_at, &self.pool)
            .await
    }

    async fn set_account_status(&self, id: AccountId, status: AccountStatus) -> Result<()> {
        Account::set_status(id, status, &self.pool).await
    }
}

// =============================================================================
// Audit
// =============================================================================

#[async_trait]
impl AuditStore for PostgresStore {
    async fn record_audit(&self, entry: NewAuditEntry) -> Result<()> {
        AuditLog::insert(&entry, &self.pool).await
    }

    async fn audit_trail(&self, target_type: &str, target_id: Uuid) -> Result<Vec<AuditLog>> {
        AuditLog::find_for_target(target_type, target_id, &self.pool).await
    }
}
