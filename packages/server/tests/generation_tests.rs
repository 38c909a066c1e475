//! Generation worker: prompt resolution, similarity guard, content policy and
//! failure handling.

mod common;

use autopost_core::domains::audit::actions;
use autopost_core::domains::generation::{
    generate_post, recover_stalled_generations, GenerateJob, GenerateOutcome, MAX_RETRIES,
};
use autopost_core::domains::posts::{PostErrorCode, PostStatus, PostStore};
use autopost_core::domains::reviews::{ReviewStatus, ReviewStore};
use autopost_core::kernel::jobs::{FailureDisposition, JobRun};
use chrono::{Duration, Utc};

use crate::common::{create_arm, create_post_with_revision, one_hot, Pipeline};

/// Publish a post whose revision carries `embedding`, so it lands in the
/// similarity corpus.
async fn seed_posted(p: &Pipeline, content: &str, embedding: Vec<f32>) {
    let (post_id, revision_id) =
        create_post_with_revision(p.test.store.as_ref(), None, content, Some(embedding))
            .await
            .unwrap();
    p.test
        .store
        .force_posted(post_id, revision_id, "ext-seed", Utc::now());
}

#[tokio::test]
async fn draft_moves_to_review_with_first_revision() {
    let p = Pipeline::new();
    let post = p.draft_post().await;

    assert_eq!(p.run_generate().await, vec![JobRun::Succeeded]);

    assert_eq!(p.post(post.id).status, PostStatus::PendingReview);
    let revisions = p.test.store.list_revisions(post.id).await.unwrap();
    assert_eq!(revisions.len(), 1);
    assert_eq!(revisions[0].revision_number, 1);
    assert_eq!(revisions[0].generation_attempts, 1);
    assert!(!revisions[0].soft_failure);
    assert!(revisions[0].embedding.is_some());

    let review = p.test.store.find_pending_review(post.id).await.unwrap().unwrap();
    assert_eq!(review.revision_id, revisions[0].id);
    assert_eq!(review.reviewer_id, p.test.reviewer_id);
    assert_eq!(review.status, ReviewStatus::Pending);
    assert_eq!(p.test.approval.calls()[0].content, revisions[0].content);
}

#[tokio::test]
async fn moderately_similar_draft_passes_with_its_score_recorded() {
    let p = Pipeline::new();
    // Cosine 0.40 against the draft's one-hot embedding.
    let mut posted = vec![0.0; one_hot(0).len()];
    posted[0] = 0.4;
    posted[1] = 0.84_f32.sqrt();
    seed_posted(&p, "Ship on Fridays, but only tiny things.", posted).await;
    p.test.embeddings.push_embedding(one_hot(0));

    let post = p.draft_post().await;
    assert_eq!(p.run_generate().await, vec![JobRun::Succeeded]);

    assert_eq!(p.post(post.id).status, PostStatus::PendingReview);
    let revision = p.test.store.list_revisions(post.id).await.unwrap().remove(0);
    assert_eq!(revision.generation_attempts, 1);
    assert!(!revision.soft_failure);
    assert!((revision.similarity_score - 0.40).abs() < 1e-3);
    assert!(revision.similarity_hits.is_none());
    assert_eq!(p.test.generator.call_count(), 1);
}

#[tokio::test]
async fn arm_prompt_is_used_when_no_override() {
    let p = Pipeline::new();
    let arm = create_arm(p.test.store.as_ref(), "contrarian").await.unwrap();
    let post = p
        .test
        .store
        .create_post(autopost_core::domains::posts::NewPost {
            created_by: p.test.system_member_id,
            arm_id: Some(arm.id),
            schedule_entry_id: None,
        })
        .await
        .unwrap();

    let job = GenerateJob::builder()
        .post_id(post.id)
        .created_by(p.test.system_member_id)
        .build();
    generate_post(&job, None, &p.deps).await.unwrap();

    let prompts = p.test.generator.prompts();
    assert!(prompts[0].contains("contrarian style"));
}

#[tokio::test]
async fn style_override_beats_arm_prompt() {
    let p = Pipeline::new();
    let post = p.draft_post().await;
    let job = GenerateJob::builder()
        .post_id(post.id)
        .created_by(post.created_by)
        .style_prompt(Some("Answer like a lighthouse keeper.".to_string()))
        .build();

    generate_post(&job, None, &p.deps).await.unwrap();

    assert!(p.test.generator.prompts()[0].contains("lighthouse keeper"));
}

#[tokio::test]
async fn near_duplicate_draft_is_regenerated_with_correction() {
    let p = Pipeline::new();
    seed_posted(&p, "Small batches beat big launches.", one_hot(63)).await;
    p.test.embeddings.push_embedding(one_hot(63));

    let post = p.draft_post().await;
    p.run_generate().await;

    let revision = p.test.store.list_revisions(post.id).await.unwrap().remove(0);
    assert_eq!(revision.generation_attempts, 2);
    assert!(!revision.soft_failure);
    assert!(revision.similarity_score < 0.86);

    let prompts = p.test.generator.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("too close to an already published post"));
}

#[tokio::test]
async fn policy_violations_exhaust_retries_into_soft_failure() {
    let p = Pipeline::new();
    for _ in 0..=MAX_RETRIES {
        p.test
            .generator
            .push_response("Let's delve into it #one #two #three");
    }

    let post = p.draft_post().await;
    p.run_generate().await;

    // The last draft is kept so a human can still decide.
    assert_eq!(p.post(post.id).status, PostStatus::PendingReview);
    let revision = p.test.store.list_revisions(post.id).await.unwrap().remove(0);
    assert!(revision.soft_failure);
    assert_eq!(revision.generation_attempts as usize, MAX_RETRIES + 1);
    assert_eq!(p.test.generator.call_count(), MAX_RETRIES + 1);
}

#[tokio::test]
async fn embedding_outage_skips_similarity_check() {
    let p = Pipeline::new();
    p.test.embeddings.set_failing(true);

    let post = p.draft_post().await;
    assert_eq!(p.run_generate().await, vec![JobRun::Succeeded]);

    let revision = p.test.store.list_revisions(post.id).await.unwrap().remove(0);
    assert_eq!(p.post(post.id).status, PostStatus::PendingReview);
    assert!(revision.embedding.is_none());
    assert_eq!(revision.similarity_score, 0.0);
}

#[tokio::test]
async fn generator_failure_marks_post_failed_without_retry() {
    let p = Pipeline::new();
    p.test.generator.push_failure("model overloaded");

    let post = p.draft_post().await;
    let runs = p.run_generate().await;
    assert_eq!(runs, vec![JobRun::Failed(FailureDisposition::Failed)]);

    let post = p.post(post.id);
    assert_eq!(post.status, PostStatus::Failed);
    assert_eq!(post.error_code, Some(PostErrorCode::GenerationError));
    assert!(post
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("model overloaded")));
    assert!(p
        .test
        .store
        .audit_actions()
        .iter()
        .any(|a| a == actions::POST_GENERATION_FAILED));
}

#[tokio::test]
async fn approval_outage_fails_generation() {
    let p = Pipeline::new();
    p.test.approval.set_failing(true);

    let post = p.draft_post().await;
    p.run_generate().await;

    assert_eq!(p.post(post.id).status, PostStatus::Failed);
}

#[tokio::test]
async fn generating_twice_is_a_no_op() {
    let p = Pipeline::new();
    let post = p.draft_post().await;
    p.run_generate().await;

    let job = GenerateJob::builder()
        .post_id(post.id)
        .created_by(post.created_by)
        .build();
    let outcome = generate_post(&job, None, &p.deps).await.unwrap();

    assert_eq!(outcome, GenerateOutcome::NoOp(PostStatus::PendingReview));
    assert_eq!(p.test.generator.call_count(), 1);
    assert_eq!(p.test.store.list_revisions(post.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn abandoned_generation_is_failed_by_the_sweep() {
    let p = Pipeline::new();
    let post = p.draft_post().await;
    // Claimed by a worker that never came back.
    p.test.store.force_status(post.id, PostStatus::Generating);

    assert_eq!(p.run_generate().await, vec![JobRun::Succeeded]);
    assert_eq!(p.post(post.id).status, PostStatus::Generating);

    // Not stalled yet.
    assert_eq!(recover_stalled_generations(&p.deps).await.unwrap(), 0);

    p.test.store.backdate(post.id, Utc::now() - Duration::hours(2));
    assert_eq!(recover_stalled_generations(&p.deps).await.unwrap(), 1);
    assert_eq!(recover_stalled_generations(&p.deps).await.unwrap(), 0);

    let post = p.post(post.id);
    assert_eq!(post.status, PostStatus::Failed);
    assert_eq!(post.error_code, Some(PostErrorCode::GenerationError));
    assert!(p
        .test
        .store
        .audit_actions()
        .iter()
        .any(|a| a == actions::POST_GENERATION_FAILED));
}

#[tokio::test]
async fn audit_outage_does_not_block_generation() {
    let p = Pipeline::new();
    p.test.store.set_audit_failing(true);

    let post = p.draft_post().await;
    assert_eq!(p.run_generate().await, vec![JobRun::Succeeded]);
    assert_eq!(p.post(post.id).status, PostStatus::PendingReview);
}
