//! Generate a revision for a DRAFT post and hand it to review.
//!
//! ```text
//! claim DRAFT -> GENERATING
//!   └─► resolve prompt (override -> arm -> default) + exemplars + recent posts
//!         └─► up to 1 + MAX_RETRIES drafts: similarity guard + content policy
//!               └─► revision (max + 1) -> review request -> PENDING_REVIEW -> entry GENERATED
//! ```
//!
//! Any error after the claim marks the post FAILED with GENERATION_ERROR.

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::common::{NonCritical, PostId, RevisionId};
use crate::domains::audit::{actions, audit, targets, NewAuditEntry};
use crate::domains::generation::jobs::GenerateJob;
use crate::domains::generation::policy::PolicyViolation;
use crate::domains::generation::prompt::{build_prompt, with_corrections, PromptContext};
use crate::domains::generation::similarity_guard::{SimilarityGuard, SimilarityReport};
use crate::domains::posts::{
    ClaimAction, ClaimOutcome, NewRevision, Post, PostErrorCode, PostStatus, StatusChange,
};
use crate::domains::schedules::EntryStatus;
use crate::kernel::jobs::JobContext;
use crate::kernel::ServerDeps;

/// Corrective retries after the first draft.
pub const MAX_RETRIES: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum GenerateOutcome {
    PendingReview {
        revision_id: RevisionId,
        revision_number: i32,
        attempts: usize,
        /// Every draft failed a check; the last one was kept
        soft_failure: bool,
    },
    /// Post was not in DRAFT; nothing was done
    NoOp(PostStatus),
}

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// The post has been marked FAILED with this message
    #[error("generation failed: {0}")]
    Generation(String),
    /// Failed before the post was claimed; safe to retry
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

struct Draft {
    text: String,
    engine: String,
    embedding: Option<Vec<f32>>,
    similarity: SimilarityReport,
    violations: Vec<PolicyViolation>,
}

impl Draft {
    fn passed(&self) -> bool {
        !self.similarity.too_similar() && self.violations.is_empty()
    }

    fn corrections(&self) -> Vec<String> {
        let mut corrections: Vec<String> =
            self.violations.iter().map(PolicyViolation::correction).collect();
        if self.similarity.too_similar() {
            corrections.push(format!(
                "The previous draft was too close to an already published post (similarity {:.2}). \
                 Choose a different angle and opening.",
                self.similarity.max_score
            ));
        }
        corrections
    }
}

pub async fn generate_post(
    job: &GenerateJob,
    ctx: Option<&JobContext>,
    deps: &ServerDeps,
) -> Result<GenerateOutcome, GenerateError> {
    let post_id = job.post_id;

    match deps.store.claim_post(post_id, ClaimAction::Generate).await? {
        ClaimOutcome::Claimed => {}
        ClaimOutcome::AlreadyHandled(status) | ClaimOutcome::Rejected(status) => {
            info!(post_id = %post_id, status = %status, "Post not in DRAFT, skipping generation");
            return Ok(GenerateOutcome::NoOp(status));
        }
    }
    report(ctx, 10).await;

    match produce_revision(job, ctx, deps).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            let message = format!("{e:#}");
            mark_generation_failed(job, &message, deps).await;
            Err(GenerateError::Generation(message))
        }
    }
}

async fn produce_revision(
    job: &GenerateJob,
    ctx: Option<&JobContext>,
    deps: &ServerDeps,
) -> Result<GenerateOutcome> {
    let config = &deps.config;
    let post_id = job.post_id;
    let post = deps
        .store
        .find_post(post_id)
        .await?
        .with_context(|| format!("post {post_id} disappeared after claim"))?;

    let base = resolve_prompt(job, &post, deps).await?;
    let exemplars = deps.store.top_exemplars(config.exemplar_limit).await?;
    let recent = deps
        .store
        .recent_posted_contents(config.recent_content_limit)
        .await?;
    let corpus = deps
        .store
        .recent_posted_embeddings(config.similarity.corpus_size)
        .await?;
    let base_prompt = build_prompt(&PromptContext {
        base: &base,
        topic: job.topic.as_deref(),
        keywords: &job.keywords,
        exemplars: &exemplars,
        recent: &recent,
    });
    report(ctx, 30).await;

    let engine = job.engine.as_deref().unwrap_or(&config.default_engine);
    let guard = SimilarityGuard::new(&config.similarity);
    let mut corrections: Vec<String> = Vec::new();
    let mut attempts = 0;
    let mut last: Option<Draft> = None;

    while attempts <= MAX_RETRIES {
        attempts += 1;
        let prompt = with_corrections(&base_prompt, &corrections);
        let generated = deps
            .generator
            .generate(&prompt, Some(engine))
            .await
            .context("text generation failed")?;
        let text = generated.text.trim().to_string();

        // Similarity is advisory; an embedding outage must not block the post.
        let embedding = NonCritical::new("embed_draft")
            .run(deps.embeddings.generate(&text))
            .await
            .into_option();
        let similarity = embedding
            .as_deref()
            .map(|candidate| guard.check(candidate, &corpus))
            .unwrap_or_default();
        let violations = config.policy.check(&text);

        let draft = Draft {
            text,
            engine: generated.engine,
            embedding,
            similarity,
            violations,
        };

        if draft.passed() {
            debug!(post_id = %post_id, attempt = attempts, "Draft passed checks");
            last = Some(draft);
            break;
        }

        warn!(
            post_id = %post_id,
            attempt = attempts,
            max_similarity = draft.similarity.max_score,
            violations = draft.violations.len(),
            "Draft rejected, retrying with corrections"
        );
        corrections = draft.corrections();
        last = Some(draft);
    }

    let draft = last.context("no draft produced")?;
    let soft_failure = !draft.passed();
    if soft_failure {
        warn!(post_id = %post_id, attempts, "All drafts failed checks, keeping the last one");
    }
    report(ctx, 60).await;

    let hits = if draft.similarity.hits.is_empty() {
        None
    } else {
        Some(serde_json::to_value(&draft.similarity.hits)?)
    };
    let revision = deps
        .store
        .create_revision(NewRevision {
            post_id,
            content: draft.text.clone(),
            engine: draft.engine.clone(),
            similarity_score: draft.similarity.max_score,
            similarity_hits: hits,
            embedding: draft.embedding.clone(),
            generation_attempts: attempts as i32,
            soft_failure,
        })
        .await?;

    audit(
        NewAuditEntry::new(job.created_by, actions::POST_GENERATED, targets::POST, post_id)
            .with_metadata(json!({
                "revision_id": revision.id,
                "revision_number": revision.revision_number,
                "attempts": attempts,
                "max_similarity": draft.similarity.max_score,
                "similarity_hits": draft.similarity.hits,
                "violations": draft.violations,
                "soft_failure": soft_failure,
            })),
        deps,
    )
    .await;

    // Requested while still GENERATING so a channel outage can still mark the post FAILED.
    let request = deps
        .approval
        .request_review(deps.reviewer_id, post_id, revision.id, &revision.content)
        .await
        .context("review request failed")?;
    deps.store.create_review_request(request).await?;

    deps.store
        .transition_post(
            post_id,
            StatusChange::new(PostStatus::Generating, PostStatus::PendingReview),
        )
        .await?;
    if let Some(entry_id) = entry_of(job, &post) {
        deps.store
            .set_entry_status(entry_id, EntryStatus::Generated)
            .await?;
    }
    report(ctx, 100).await;

    info!(
        post_id = %post_id,
        revision = revision.revision_number,
        attempts,
        soft_failure,
        "Revision generated, awaiting review"
    );

    Ok(GenerateOutcome::PendingReview {
        revision_id: revision.id,
        revision_number: revision.revision_number,
        attempts,
        soft_failure,
    })
}

/// Explicit override, then the post's arm, then the entry's arm, then the default.
async fn resolve_prompt(job: &GenerateJob, post: &Post, deps: &ServerDeps) -> Result<String> {
    if let Some(prompt) = job.style_prompt.as_ref().filter(|p| !p.trim().is_empty()) {
        return Ok(prompt.clone());
    }

    let mut arm_id = post.arm_id;
    if arm_id.is_none() {
        if let Some(entry_id) = entry_of(job, post) {
            arm_id = deps.store.find_entry(entry_id).await?.map(|e| e.arm_id);
        }
    }
    if let Some(arm_id) = arm_id {
        if let Some(arm) = deps.store.find_arm(arm_id).await? {
            return Ok(arm.prompt);
        }
    }

    Ok(deps.config.default_prompt.clone())
}

fn entry_of(job: &GenerateJob, post: &Post) -> Option<crate::common::EntryId> {
    job.schedule_entry_id.or(post.schedule_entry_id)
}

async fn mark_generation_failed(job: &GenerateJob, message: &str, deps: &ServerDeps) {
    let post_id: PostId = job.post_id;
    error!(post_id = %post_id, error = %message, "Generation failed");

    let change = StatusChange::new(PostStatus::Generating, PostStatus::Failed)
        .with_error(PostErrorCode::GenerationError, message);
    if let Err(e) = deps.store.transition_post(post_id, change).await {
        warn!(post_id = %post_id, error = %e, "Could not mark post FAILED");
    }

    let entry_id = match job.schedule_entry_id {
        Some(id) => Some(id),
        None => deps
            .store
            .find_post(post_id)
            .await
            .ok()
            .flatten()
            .and_then(|p| p.schedule_entry_id),
    };
    if let Some(entry_id) = entry_id {
        NonCritical::new("entry_failed")
            .run(deps.store.set_entry_status(entry_id, EntryStatus::Failed))
            .await;
    }

    audit(
        NewAuditEntry::new(job.created_by, actions::POST_GENERATION_FAILED, targets::POST, post_id)
            .with_metadata(json!({ "error": message })),
        deps,
    )
    .await;
}

async fn report(ctx: Option<&JobContext>, percent: i16) {
    if let Some(ctx) = ctx {
        ctx.progress(percent).await;
    }
}
