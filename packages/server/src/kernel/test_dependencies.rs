// TestDependencies - in-memory store and mock services for testing
//
// Everything here implements the same traits as the production wiring, so
// activities and job handlers run unchanged against it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::approval::generate_review_token;
use super::jobs::testing::MemoryJobQueue;
use super::platform::{PlatformError, PlatformErrorKind};
use super::traits::{
    BaseApprovalChannel, BaseEmbeddingService, BaseEngagementSource, BasePlatformClient,
    BaseTextGenerator, EngagementMetrics, Generated, PublishedPost, RefreshedToken,
};
use super::ServerDeps;
use crate::common::utils::CredentialCipher;
use crate::common::{AccountId, ArmId, EntryId, MemberId, PostId, RevisionId};
use crate::config::PipelineConfig;
use crate::domains::accounts::{Account, AccountStatus, AccountStore, NewAccount};
use crate::domains::audit::{AuditLog, AuditStore, NewAuditEntry};
use crate::domains::posts::{
    ClaimAction, ClaimOutcome, LifecycleError, NewPost, NewRevision, Post, PostRevision,
    PostStatus, PostStore, PostedEmbedding, PublishRecord, StatusChange,
};
use crate::domains::reviews::{
    ReviewDecision, ReviewError, ReviewRequest, ReviewStatus, ReviewStore,
};
use crate::domains::schedules::{
    DailyScheduleEntry, EntryStatus, NewArm, NewEntry, NewReward, NewTimeSlot, PostReward,
    ScheduleArm, ScheduleStore, TimeSlot,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Memory Store
// =============================================================================

#[derive(Default)]
struct MemoryState {
    posts: Vec<Post>,
    revisions: Vec<PostRevision>,
    arms: Vec<ScheduleArm>,
    slots: Vec<TimeSlot>,
    entries: Vec<DailyScheduleEntry>,
    rewards: Vec<PostReward>,
    reviews: Vec<ReviewRequest>,
    accounts: Vec<Account>,
    audit: Vec<AuditLog>,
}

impl MemoryState {
    fn post_mut(&mut self, id: PostId) -> Result<&mut Post> {
        self.posts
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| LifecycleError::NotFound(id).into())
    }

    fn published_content(&self, post: &Post) -> Option<&PostRevision> {
        let revision_id = post.published_revision_id?;
        self.revisions.iter().find(|r| r.id == revision_id)
    }

    /// POSTED posts with their published revision, newest first.
    fn posted_newest_first(&self) -> Vec<(&Post, &PostRevision)> {
        let mut posted: Vec<(&Post, &PostRevision)> = self
            .posts
            .iter()
            .filter(|p| p.status == PostStatus::Posted)
            .filter_map(|p| self.published_content(p).map(|r| (p, r)))
            .collect();
        posted.sort_by(|a, b| b.0.posted_at.cmp(&a.0.posted_at));
        posted
    }
}

/// Single-lock store: every method is atomic with respect to the others,
/// which gives the same claim guarantees as the row locks in Postgres.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_post_create: AtomicBool,
    fail_publish_record: AtomicBool,
    fail_reward_record: AtomicBool,
    fail_audit: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `record_published` fail after the platform call.
    pub fn fail_next_publish_record(&self) {
        self.fail_publish_record.store(true, Ordering::SeqCst);
    }

    /// Make the next `create_post` fail.
    pub fn fail_next_post_create(&self) {
        self.fail_post_create.store(true, Ordering::SeqCst);
    }

    /// Make the next `record_reward` fail.
    pub fn fail_next_reward_record(&self) {
        self.fail_reward_record.store(true, Ordering::SeqCst);
    }

    pub fn set_audit_failing(&self, failing: bool) {
        self.fail_audit.store(failing, Ordering::SeqCst);
    }

    pub fn post(&self, id: PostId) -> Option<Post> {
        lock(&self.state).posts.iter().find(|p| p.id == id).cloned()
    }

    pub fn posts(&self) -> Vec<Post> {
        lock(&self.state).posts.clone()
    }

    pub fn entries(&self) -> Vec<DailyScheduleEntry> {
        lock(&self.state).entries.clone()
    }

    pub fn reviews(&self) -> Vec<ReviewRequest> {
        lock(&self.state).reviews.clone()
    }

    pub fn reward(&self, post_id: PostId) -> Option<PostReward> {
        lock(&self.state)
            .rewards
            .iter()
            .find(|r| r.post_id == post_id)
            .cloned()
    }

    pub fn audit_actions(&self) -> Vec<String> {
        lock(&self.state)
            .audit
            .iter()
            .map(|a| a.action.clone())
            .collect()
    }

    /// Overwrite a post's status directly, bypassing the lifecycle checks.
    pub fn force_status(&self, id: PostId, status: PostStatus) {
        if let Some(post) = lock(&self.state).posts.iter_mut().find(|p| p.id == id) {
            post.status = status;
        }
    }

    /// Pretend the post row was last written at `at`.
    pub fn backdate(&self, id: PostId, at: DateTime<Utc>) {
        if let Some(post) = lock(&self.state).posts.iter_mut().find(|p| p.id == id) {
            post.updated_at = at;
        }
    }

    /// Mark a post as published at `posted_at` with `revision_id` as its content.
    pub fn force_posted(
        &self,
        id: PostId,
        revision_id: RevisionId,
        external_id: &str,
        posted_at: DateTime<Utc>,
    ) {
        if let Some(post) = lock(&self.state).posts.iter_mut().find(|p| p.id == id) {
            post.status = PostStatus::Posted;
            post.published_revision_id = Some(revision_id);
            post.external_media_id = Some(external_id.to_string());
            post.posted_at = Some(posted_at);
        }
    }

    /// Seed an arm with existing observations.
    pub fn set_arm_stats(&self, id: ArmId, trials: i64, mean: f64) {
        if let Some(arm) = lock(&self.state).arms.iter_mut().find(|a| a.id == id) {
            arm.trials = trials;
            arm.avg_engagement_rate = mean;
        }
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn create_post(&self, new: NewPost) -> Result<Post> {
        if self.fail_post_create.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("database unavailable"));
        }
        let post = Post::draft(new, Utc::now());
        lock(&self.state).posts.push(post.clone());
        Ok(post)
    }

    async fn find_post(&self, id: PostId) -> Result<Option<Post>> {
        Ok(self.post(id))
    }

    async fn claim_post(&self, id: PostId, action: ClaimAction) -> Result<ClaimOutcome> {
        let mut state = lock(&self.state);
        let post = state.post_mut(id)?;
        let outcome = action.decide(post.status);
        if outcome == ClaimOutcome::Claimed {
            post.status = action.target();
            post.updated_at = Utc::now();
        }
        Ok(outcome)
    }

    async fn transition_post(&self, id: PostId, change: StatusChange) -> Result<Post> {
        change.validate()?;
        let mut state = lock(&self.state);
        let post = state.post_mut(id)?;
        if post.status != change.from {
            return Err(LifecycleError::StaleStatus {
                post_id: id,
                expected: change.from,
            }
            .into());
        }
        post.status = change.to;
        if let Some(error) = change.error {
            post.error_code = Some(error.code);
            post.error_message = Some(error.message);
        }
        post.updated_at = Utc::now();
        Ok(post.clone())
    }

    async fn approve_post(
        &self,
        id: PostId,
        approver: MemberId,
        at: DateTime<Utc>,
    ) -> Result<Post> {
        let mut state = lock(&self.state);
        let post = state.post_mut(id)?;
        if post.status != PostStatus::PendingReview {
            return Err(LifecycleError::StaleStatus {
                post_id: id,
                expected: PostStatus::PendingReview,
            }
            .into());
        }
        post.status = PostStatus::Approved;
        post.approved_by = Some(approver);
        post.approved_at = Some(at);
        post.updated_at = Utc::now();
        Ok(post.clone())
    }

    async fn record_published(&self, record: PublishRecord) -> Result<Post> {
        if self.fail_publish_record.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("database unavailable"));
        }

        let mut state = lock(&self.state);
        let post = state.post_mut(record.post_id)?;
        if post.status != PostStatus::Publishing {
            return Err(LifecycleError::StaleStatus {
                post_id: record.post_id,
                expected: PostStatus::Publishing,
            }
            .into());
        }
        post.status = PostStatus::Posted;
        post.posted_at = Some(record.posted_at);
        post.external_url = record.permalink;
        post.external_media_id = Some(record.external_id);
        post.published_revision_id = Some(record.revision_id);
        post.error_code = None;
        post.error_message = None;
        post.updated_at = Utc::now();
        let post = post.clone();

        if let Some(entry_id) = record.schedule_entry_id {
            if let Some(entry) = state.entries.iter_mut().find(|e| e.id == entry_id) {
                entry.status = EntryStatus::Completed;
                entry.updated_at = Utc::now();
            }
        }
        Ok(post)
    }

    async fn create_revision(&self, new: NewRevision) -> Result<PostRevision> {
        let mut state = lock(&self.state);
        state.post_mut(new.post_id)?;
        let current = state
            .revisions
            .iter()
            .filter(|r| r.post_id == new.post_id)
            .map(|r| r.revision_number)
            .max()
            .unwrap_or(0);
        let revision = PostRevision::from_new(new, current + 1, Utc::now());
        state.revisions.push(revision.clone());
        Ok(revision)
    }

    async fn find_revision(&self, id: RevisionId) -> Result<Option<PostRevision>> {
        Ok(lock(&self.state)
            .revisions
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list_revisions(&self, post_id: PostId) -> Result<Vec<PostRevision>> {
        let mut revisions: Vec<PostRevision> = lock(&self.state)
            .revisions
            .iter()
            .filter(|r| r.post_id == post_id)
            .cloned()
            .collect();
        revisions.sort_by_key(|r| r.revision_number);
        Ok(revisions)
    }

    async fn recent_posted_contents(&self, limit: i64) -> Result<Vec<String>> {
        let state = lock(&self.state);
        Ok(state
            .posted_newest_first()
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, r)| r.content.clone())
            .collect())
    }

    async fn recent_posted_embeddings(&self, limit: i64) -> Result<Vec<PostedEmbedding>> {
        let state = lock(&self.state);
        Ok(state
            .posted_newest_first()
            .into_iter()
            .filter_map(|(p, r)| {
                r.embedding.clone().map(|embedding| PostedEmbedding {
                    post_id: p.id,
                    embedding,
                })
            })
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn top_exemplars(&self, limit: i64) -> Result<Vec<String>> {
        let state = lock(&self.state);
        let mut scored: Vec<(f64, Option<DateTime<Utc>>, String)> = state
            .rewards
            .iter()
            .filter_map(|reward| {
                let post = state.posts.iter().find(|p| p.id == reward.post_id)?;
                let revision = state.published_content(post)?;
                Some((reward.reward, post.posted_at, revision.content.clone()))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(scored
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, _, content)| content)
            .collect())
    }

    async fn posts_awaiting_reward(
        &self,
        posted_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Post>> {
        let state = lock(&self.state);
        let mut posts: Vec<Post> = state
            .posts
            .iter()
            .filter(|p| {
                p.status == PostStatus::Posted
                    && p.arm_id.is_some()
                    && p.external_media_id.is_some()
                    && p.posted_at.is_some_and(|at| at <= posted_before)
                    && !state.rewards.iter().any(|r| r.post_id == p.id)
            })
            .cloned()
            .collect();
        posts.sort_by_key(|p| p.posted_at);
        posts.truncate(limit.max(0) as usize);
        Ok(posts)
    }

    async fn stalled_generating(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Post>> {
        let mut posts: Vec<Post> = lock(&self.state)
            .posts
            .iter()
            .filter(|p| p.status == PostStatus::Generating && p.updated_at < updated_before)
            .cloned()
            .collect();
        posts.sort_by_key(|p| p.updated_at);
        posts.truncate(limit.max(0) as usize);
        Ok(posts)
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn create_arm(&self, new: NewArm) -> Result<ScheduleArm> {
        let arm = ScheduleArm::from_new(new, Utc::now());
        lock(&self.state).arms.push(arm.clone());
        Ok(arm)
    }

    async fn find_arm(&self, id: ArmId) -> Result<Option<ScheduleArm>> {
        Ok(lock(&self.state).arms.iter().find(|a| a.id == id).cloned())
    }

    async fn list_arms(&self) -> Result<Vec<ScheduleArm>> {
        Ok(lock(&self.state).arms.clone())
    }

    async fn increment_arm_uses(&self, id: ArmId) -> Result<()> {
        if let Some(arm) = lock(&self.state).arms.iter_mut().find(|a| a.id == id) {
            arm.total_uses += 1;
        }
        Ok(())
    }

    async fn create_slot(&self, new: NewTimeSlot) -> Result<TimeSlot> {
        let slot = TimeSlot::from_new(new, Utc::now());
        lock(&self.state).slots.push(slot.clone());
        Ok(slot)
    }

    async fn list_slots(&self) -> Result<Vec<TimeSlot>> {
        Ok(lock(&self.state).slots.clone())
    }

    async fn insert_entry(&self, new: NewEntry) -> Result<Option<DailyScheduleEntry>> {
        let mut state = lock(&self.state);
        if state
            .entries
            .iter()
            .any(|e| e.scheduled_at == new.scheduled_at)
        {
            return Ok(None);
        }
        let entry = DailyScheduleEntry::from_new(new, Utc::now());
        state.entries.push(entry.clone());
        Ok(Some(entry))
    }

    async fn find_entry(&self, id: EntryId) -> Result<Option<DailyScheduleEntry>> {
        Ok(lock(&self.state)
            .entries
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn entries_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DailyScheduleEntry>> {
        let mut entries: Vec<DailyScheduleEntry> = lock(&self.state)
            .entries
            .iter()
            .filter(|e| e.scheduled_at >= start && e.scheduled_at < end)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.scheduled_at);
        Ok(entries)
    }

    async fn attach_entry_post(&self, id: EntryId, post_id: PostId) -> Result<()> {
        let mut state = lock(&self.state);
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| anyhow!("schedule entry {id} not found"))?;
        entry.post_id = Some(post_id);
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn set_entry_status(&self, id: EntryId, status: EntryStatus) -> Result<()> {
        if let Some(entry) = lock(&self.state).entries.iter_mut().find(|e| e.id == id) {
            entry.status = status;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_reward(&self, reward: NewReward) -> Result<bool> {
        if self.fail_reward_record.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("database unavailable"));
        }
        let mut state = lock(&self.state);
        if state.rewards.iter().any(|r| r.post_id == reward.post_id) {
            return Ok(false);
        }
        if let Some(arm) = state.arms.iter_mut().find(|a| a.id == reward.arm_id) {
            arm.trials += 1;
            arm.avg_engagement_rate += (reward.reward - arm.avg_engagement_rate) / arm.trials as f64;
        }
        state.rewards.push(PostReward {
            post_id: reward.post_id,
            arm_id: reward.arm_id,
            reward: reward.reward,
            metrics: sqlx::types::Json(reward.metrics),
            created_at: Utc::now(),
        });
        Ok(true)
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn create_review_request(&self, request: ReviewRequest) -> Result<ReviewRequest> {
        let mut state = lock(&self.state);
        for older in state
            .reviews
            .iter_mut()
            .filter(|r| r.post_id == request.post_id && r.status == ReviewStatus::Pending)
        {
            older.status = ReviewStatus::Cancelled;
        }
        state.reviews.push(request.clone());
        Ok(request)
    }

    async fn consume_review_token(
        &self,
        token: &str,
        decision: ReviewDecision,
        now: DateTime<Utc>,
    ) -> Result<ReviewRequest, ReviewError> {
        let mut state = lock(&self.state);
        let request = state
            .reviews
            .iter_mut()
            .find(|r| r.token == token)
            .ok_or(ReviewError::NotFound)?;
        request.check_consumable(now)?;
        request.status = ReviewStatus::Used;
        request.decision = Some(decision);
        request.used_at = Some(now);
        Ok(request.clone())
    }

    async fn expire_reviews(&self, now: DateTime<Utc>) -> Result<Vec<ReviewRequest>> {
        let mut state = lock(&self.state);
        let mut expired = Vec::new();
        for request in state
            .reviews
            .iter_mut()
            .filter(|r| r.status == ReviewStatus::Pending && r.expires_at <= now)
        {
            request.status = ReviewStatus::Expired;
            expired.push(request.clone());
        }
        Ok(expired)
    }

    async fn find_pending_review(&self, post_id: PostId) -> Result<Option<ReviewRequest>> {
        Ok(lock(&self.state)
            .reviews
            .iter()
            .find(|r| r.post_id == post_id && r.status == ReviewStatus::Pending)
            .cloned())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_account(&self, new: NewAccount) -> Result<Account> {
        let account = Account::from_new(new, Utc::now());
        lock(&self.state).accounts.push(account.clone());
        Ok(account)
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(lock(&self.state)
            .accounts
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn default_account(&self) -> Result<Option<Account>> {
        Ok(lock(&self.state)
            .accounts
            .iter()
            .find(|a| a.is_default)
            .cloned())
    }

    async fn accounts_due_for_refresh(
        &self,
        expiring_before: DateTime<Utc>,
        refreshed_before: DateTime<Utc>,
    ) -> Result<Vec<Account>> {
        let mut due: Vec<Account> = lock(&self.state)
            .accounts
            .iter()
            .filter(|a| a.needs_refresh(expiring_before, refreshed_before))
            .cloned()
            .collect();
        due.sort_by_key(|a| a.token_expires_at);
        Ok(due)
    }

    async fn update_account_token(
        &self,
        id: AccountId,
        encrypted_access_token: String,
        expires_at: DateTime<Utc>,
        refreshed_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = lock(&self.state);
        let account = state
            .accounts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| anyhow!("account {id} not found"))?;
        account.encrypted_access_token = encrypted_access_token;
        account.token_expires_at = Some(expires_at);
        account.last_refreshed_at = Some(refreshed_at);
        account.updated_at = Utc::now();
        Ok(())
    }

    async fn set_account_status(&self, id: AccountId, status: AccountStatus) -> Result<()> {
        if let Some(account) = lock(&self.state).accounts.iter_mut().find(|a| a.id == id) {
            account.status = status;
            account.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn record_audit(&self, entry: NewAuditEntry) -> Result<()> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(anyhow!("audit sink unavailable"));
        }
        lock(&self.state)
            .audit
            .push(AuditLog::from_new(entry, Utc::now()));
        Ok(())
    }

    async fn audit_trail(&self, target_type: &str, target_id: Uuid) -> Result<Vec<AuditLog>> {
        Ok(lock(&self.state)
            .audit
            .iter()
            .filter(|a| a.target_type == target_type && a.target_id == target_id)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Mock Text Generator
// =============================================================================

pub struct MockTextGenerator {
    responses: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl MockTextGenerator {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response. Unqueued calls get a distinct default post.
    pub fn with_response(self, text: &str) -> Self {
        self.push_response(text);
        self
    }

    pub fn push_response(&self, text: &str) {
        lock(&self.responses).push_back(Ok(text.to_string()));
    }

    pub fn push_failure(&self, message: &str) {
        lock(&self.responses).push_back(Err(message.to_string()));
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.prompts).len()
    }
}

impl Default for MockTextGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseTextGenerator for MockTextGenerator {
    async fn generate(&self, prompt: &str, engine: Option<&str>) -> Result<Generated> {
        let call = {
            let mut prompts = lock(&self.prompts);
            prompts.push(prompt.to_string());
            prompts.len()
        };
        let text = match lock(&self.responses).pop_front() {
            Some(Ok(text)) => text,
            Some(Err(message)) => return Err(anyhow!(message)),
            None => format!("Mock post number {call} about shipping small changes often."),
        };
        Ok(Generated {
            text,
            engine: engine.unwrap_or("mock-engine").to_string(),
        })
    }
}

// =============================================================================
// Mock Embedding Service
// =============================================================================

/// Dimensions of the default one-hot embeddings.
pub const MOCK_EMBEDDING_DIMS: usize = 64;

pub struct MockEmbeddings {
    queued: Mutex<VecDeque<Vec<f32>>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl MockEmbeddings {
    pub fn new() -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Queue an embedding. Unqueued calls return a one-hot vector per call,
    /// so default drafts never resemble each other.
    pub fn push_embedding(&self, embedding: Vec<f32>) {
        lock(&self.queued).push_back(embedding);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockEmbeddings {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseEmbeddingService for MockEmbeddings {
    async fn generate(&self, _text: &str) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("embedding service unavailable"));
        }
        if let Some(embedding) = lock(&self.queued).pop_front() {
            return Ok(embedding);
        }
        let mut one_hot = vec![0.0; MOCK_EMBEDDING_DIMS];
        one_hot[call % MOCK_EMBEDDING_DIMS] = 1.0;
        Ok(one_hot)
    }
}

// =============================================================================
// Mock Approval Channel
// =============================================================================

#[derive(Debug, Clone)]
pub struct ReviewCall {
    pub reviewer: MemberId,
    pub post_id: PostId,
    pub revision_id: RevisionId,
    pub content: String,
    pub token: String,
}

pub struct MockApprovalChannel {
    ttl: Duration,
    calls: Mutex<Vec<ReviewCall>>,
    failing: AtomicBool,
}

impl MockApprovalChannel {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            calls: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ReviewCall> {
        lock(&self.calls).clone()
    }

    /// Token of the most recent review request for `post_id`.
    pub fn token_for(&self, post_id: PostId) -> Option<String> {
        lock(&self.calls)
            .iter()
            .rev()
            .find(|c| c.post_id == post_id)
            .map(|c| c.token.clone())
    }
}

#[async_trait]
impl BaseApprovalChannel for MockApprovalChannel {
    async fn request_review(
        &self,
        reviewer: MemberId,
        post_id: PostId,
        revision_id: RevisionId,
        content: &str,
    ) -> Result<ReviewRequest> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("review webhook unreachable"));
        }
        let token = generate_review_token();
        lock(&self.calls).push(ReviewCall {
            reviewer,
            post_id,
            revision_id,
            content: content.to_string(),
            token: token.clone(),
        });
        Ok(ReviewRequest::new(
            post_id,
            revision_id,
            reviewer,
            token,
            Utc::now() + self.ttl,
        ))
    }
}

// =============================================================================
// Mock Platform Client
// =============================================================================

pub struct MockPlatformClient {
    publish_results: Mutex<VecDeque<Result<PublishedPost, PlatformError>>>,
    refresh_results: Mutex<VecDeque<Result<RefreshedToken, PlatformError>>>,
    published: Mutex<Vec<String>>,
    publish_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    latency: Mutex<Option<StdDuration>>,
}

impl MockPlatformClient {
    pub fn new() -> Self {
        Self {
            publish_results: Mutex::new(VecDeque::new()),
            refresh_results: Mutex::new(VecDeque::new()),
            published: Mutex::new(Vec::new()),
            publish_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            latency: Mutex::new(None),
        }
    }

    /// Queue a publish failure. Unqueued calls succeed.
    pub fn push_publish_error(&self, kind: PlatformErrorKind, message: &str) {
        lock(&self.publish_results).push_back(Err(PlatformError::new(kind, message)));
    }

    pub fn push_refresh_result(&self, result: Result<RefreshedToken, PlatformError>) {
        lock(&self.refresh_results).push_back(result);
    }

    /// Delay every create_post call.
    pub fn set_latency(&self, latency: StdDuration) {
        *lock(&self.latency) = Some(latency);
    }

    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Content of every successful publish, in order.
    pub fn published_contents(&self) -> Vec<String> {
        lock(&self.published).clone()
    }
}

impl Default for MockPlatformClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BasePlatformClient for MockPlatformClient {
    async fn create_post(
        &self,
        _account: &Account,
        _access_token: &str,
        content: &str,
    ) -> Result<PublishedPost, PlatformError> {
        let call = self.publish_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let queued = lock(&self.publish_results).pop_front();
        let published = match queued {
            Some(result) => result?,
            None => PublishedPost {
                external_id: format!("ext-{call}"),
                permalink: Some(format!("https://threads.example/post/ext-{call}")),
            },
        };
        lock(&self.published).push(content.to_string());
        Ok(published)
    }

    async fn refresh_token(&self, access_token: &str) -> Result<RefreshedToken, PlatformError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let queued = lock(&self.refresh_results).pop_front();
        match queued {
            Some(result) => result,
            None => Ok(RefreshedToken {
                access_token: format!("{access_token}-refreshed"),
                expires_at: Utc::now() + Duration::days(60),
            }),
        }
    }
}

// =============================================================================
// Mock Engagement Source
// =============================================================================

#[derive(Default)]
pub struct MockEngagementSource {
    metrics: Mutex<HashMap<String, EngagementMetrics>>,
}

impl MockEngagementSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_metrics(&self, external_id: &str, metrics: EngagementMetrics) {
        lock(&self.metrics).insert(external_id.to_string(), metrics);
    }
}

#[async_trait]
impl BaseEngagementSource for MockEngagementSource {
    async fn fetch_metrics(&self, external_id: &str) -> Result<EngagementMetrics> {
        lock(&self.metrics)
            .get(external_id)
            .copied()
            .ok_or_else(|| anyhow!("no insights for {external_id}"))
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

pub const TEST_ACCESS_TOKEN: &str = "test-access-token";

/// All mocks plus the config used to build `ServerDeps`. Adjust `config`
/// before calling `deps()`.
pub struct TestDependencies {
    pub store: Arc<MemoryStore>,
    pub jobs: Arc<MemoryJobQueue>,
    pub generator: Arc<MockTextGenerator>,
    pub embeddings: Arc<MockEmbeddings>,
    pub approval: Arc<MockApprovalChannel>,
    pub platform: Arc<MockPlatformClient>,
    pub engagement: Arc<MockEngagementSource>,
    pub cipher: Arc<CredentialCipher>,
    pub config: PipelineConfig,
    pub reviewer_id: MemberId,
    pub system_member_id: MemberId,
}

impl TestDependencies {
    pub fn new() -> Self {
        let mut config = PipelineConfig::default();
        // Throttle retries should not slow tests down.
        config.rate_limit.initial_backoff = StdDuration::from_millis(1);
        config.rate_limit.max_backoff = StdDuration::from_millis(4);
        config.rate_limit.cooldown = StdDuration::ZERO;

        Self {
            store: Arc::new(MemoryStore::new()),
            jobs: Arc::new(MemoryJobQueue::new()),
            generator: Arc::new(MockTextGenerator::new()),
            embeddings: Arc::new(MockEmbeddings::new()),
            approval: Arc::new(MockApprovalChannel::new(config.review_ttl)),
            platform: Arc::new(MockPlatformClient::new()),
            engagement: Arc::new(MockEngagementSource::new()),
            cipher: Arc::new(CredentialCipher::new(&[7u8; 32])),
            config,
            reviewer_id: MemberId::new(),
            system_member_id: MemberId::nil(),
        }
    }

    pub fn deps(&self) -> Arc<ServerDeps> {
        Arc::new(ServerDeps::new(
            self.store.clone(),
            self.jobs.clone(),
            self.generator.clone(),
            self.embeddings.clone(),
            self.approval.clone(),
            self.platform.clone(),
            self.engagement.clone(),
            self.cipher.clone(),
            self.config.clone(),
            self.reviewer_id,
            self.system_member_id,
        ))
    }

    /// Active default account holding `TEST_ACCESS_TOKEN`.
    pub async fn seed_account(&self, token_expires_at: DateTime<Utc>) -> Result<Account> {
        self.store
            .create_account(NewAccount {
                handle: "@autopost".to_string(),
                external_user_id: "1789".to_string(),
                encrypted_access_token: self.cipher.encrypt(TEST_ACCESS_TOKEN)?,
                token_expires_at: Some(token_expires_at),
                is_default: true,
            })
            .await
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_claims_once() {
        let store = MemoryStore::new();
        let post = store
            .create_post(NewPost {
                created_by: MemberId::new(),
                arm_id: None,
                schedule_entry_id: None,
            })
            .await
            .unwrap();

        assert_eq!(
            store.claim_post(post.id, ClaimAction::Generate).await.unwrap(),
            ClaimOutcome::Claimed
        );
        assert_eq!(
            store.claim_post(post.id, ClaimAction::Generate).await.unwrap(),
            ClaimOutcome::AlreadyHandled(PostStatus::Generating)
        );
    }

    #[tokio::test]
    async fn stale_transition_is_rejected() {
        let store = MemoryStore::new();
        let post = store
            .create_post(NewPost {
                created_by: MemberId::new(),
                arm_id: None,
                schedule_entry_id: None,
            })
            .await
            .unwrap();

        let err = store
            .transition_post(
                post.id,
                StatusChange::new(PostStatus::Generating, PostStatus::PendingReview),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LifecycleError>(),
            Some(LifecycleError::StaleStatus { .. })
        ));
    }

    #[tokio::test]
    async fn revision_numbers_are_gapless() {
        let store = MemoryStore::new();
        let post = store
            .create_post(NewPost {
                created_by: MemberId::new(),
                arm_id: None,
                schedule_entry_id: None,
            })
            .await
            .unwrap();

        let mut numbers = Vec::new();
        for content in ["a", "b", "c"] {
            let revision = store
                .create_revision(NewRevision {
                    post_id: post.id,
                    content: content.to_string(),
                    engine: "mock".to_string(),
                    similarity_score: 0.0,
                    similarity_hits: None,
                    embedding: None,
                    generation_attempts: 1,
                    soft_failure: false,
                })
                .await
                .unwrap();
            numbers.push(revision.revision_number);
        }
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn default_embeddings_are_orthogonal() {
        let embeddings = MockEmbeddings::new();
        let a = embeddings.generate("one").await.unwrap();
        let b = embeddings.generate("two").await.unwrap();
        let dot: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert_eq!(dot, 0.0);
    }
}
