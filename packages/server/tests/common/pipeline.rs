//! In-memory pipeline: `TestDependencies` plus workers that drain the queue.

use std::sync::Arc;

use autopost_core::common::{MemberId, PostId, RevisionId};
use autopost_core::domains::accounts::{TokenRefreshHandler, TOKEN_REFRESH_JOB};
use autopost_core::domains::generation::{GenerateHandler, GenerateJob, GENERATE_JOB};
use autopost_core::domains::posts::{NewPost, Post, PostStatus, PostStore};
use autopost_core::domains::publishing::{PublishHandler, PUBLISH_JOB};
use autopost_core::domains::reviews::{apply_review_decision, ReviewDecision, ReviewOutcome};
use autopost_core::kernel::jobs::{JobHandler, JobQueueExt, JobRun, JobWorker, QueueConfig};
use autopost_core::kernel::{ServerDeps, TestDependencies};
use chrono::{Duration, Utc};

pub struct Pipeline {
    pub test: TestDependencies,
    pub deps: Arc<ServerDeps>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with(|_| {})
    }

    /// Adjust mocks or config before `ServerDeps` is built.
    pub fn with(configure: impl FnOnce(&mut TestDependencies)) -> Self {
        let mut test = TestDependencies::new();
        configure(&mut test);
        let deps = test.deps();
        Self { test, deps }
    }

    /// Pipeline with an active default account whose token is good for 30 days.
    pub async fn with_account() -> Self {
        let pipeline = Self::new();
        pipeline
            .test
            .seed_account(Utc::now() + Duration::days(30))
            .await
            .expect("seed account");
        pipeline
    }

    fn worker(&self, handler: Arc<dyn JobHandler>, job_type: &'static str) -> JobWorker {
        JobWorker::new(
            self.deps.jobs.clone(),
            handler,
            QueueConfig::new(job_type, 4, 6_000),
        )
    }

    pub async fn run_generate(&self) -> Vec<JobRun> {
        self.worker(Arc::new(GenerateHandler::new(self.deps.clone())), GENERATE_JOB)
            .run_until_idle()
            .await
            .expect("generate worker")
    }

    pub async fn run_publish(&self) -> Vec<JobRun> {
        self.worker(Arc::new(PublishHandler::new(self.deps.clone())), PUBLISH_JOB)
            .run_until_idle()
            .await
            .expect("publish worker")
    }

    pub async fn run_token_refresh(&self) -> Vec<JobRun> {
        self.worker(
            Arc::new(TokenRefreshHandler::new(self.deps.clone())),
            TOKEN_REFRESH_JOB,
        )
        .run_until_idle()
        .await
        .expect("token refresh worker")
    }

    pub fn post(&self, id: PostId) -> Post {
        self.test.store.post(id).expect("post exists")
    }

    /// DRAFT post with a queued generate job.
    pub async fn draft_post(&self) -> Post {
        let created_by = MemberId::new();
        let post = self
            .test
            .store
            .create_post(NewPost {
                created_by,
                arm_id: None,
                schedule_entry_id: None,
            })
            .await
            .expect("create post");
        self.deps
            .jobs
            .enqueue(
                GenerateJob::builder()
                    .post_id(post.id)
                    .created_by(created_by)
                    .build(),
            )
            .await
            .expect("enqueue generate");
        post
    }

    /// Post in PENDING_REVIEW and the token its reviewer received.
    pub async fn post_in_review(&self) -> (PostId, String) {
        let post = self.draft_post().await;
        self.run_generate().await;
        assert_eq!(self.post(post.id).status, PostStatus::PendingReview);
        let token = self
            .test
            .approval
            .token_for(post.id)
            .expect("review requested");
        (post.id, token)
    }

    pub async fn review(&self, token: &str, decision: ReviewDecision) -> ReviewOutcome {
        apply_review_decision(token, decision, self.test.reviewer_id, &self.deps)
            .await
            .expect("review decision applied")
    }

    /// APPROVED post with a queued publish job.
    pub async fn approved_post(&self) -> (PostId, RevisionId) {
        let (post_id, token) = self.post_in_review().await;
        self.review(&token, ReviewDecision::Approve).await;
        let revision = self
            .test
            .store
            .list_revisions(post_id)
            .await
            .expect("revisions")
            .pop()
            .expect("one revision");
        (post_id, revision.id)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
