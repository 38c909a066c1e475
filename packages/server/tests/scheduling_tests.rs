//! Daily planning and the engagement feedback loop.

mod common;

use autopost_core::domains::generation::{GenerateJob, GENERATE_JOB};
use autopost_core::domains::posts::PostStatus;
use autopost_core::domains::schedules::{
    ingest_reward, plan_day, sync_engagement, EntryStatus, ScheduleStore, SelectionReason,
    SyncSummary,
};
use autopost_core::kernel::EngagementMetrics;
use chrono::{Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::common::{create_arm, create_post_with_revision, create_slot, Pipeline};

fn tomorrow() -> NaiveDate {
    (Utc::now() + Duration::days(1)).date_naive()
}

fn metrics(views: i64, likes: i64, replies: i64, reposts: i64) -> EngagementMetrics {
    EngagementMetrics {
        views,
        likes,
        replies,
        reposts,
    }
}

async fn three_slots(p: &Pipeline) {
    for (start, end) in [("09:00", "10:00"), ("12:00", "13:00"), ("18:00", "19:00")] {
        create_slot(p.test.store.as_ref(), start, end, vec![])
            .await
            .unwrap();
    }
}

// =============================================================================
// Planning
// =============================================================================

#[tokio::test]
async fn plan_day_creates_entries_posts_and_generate_jobs() {
    let p = Pipeline::new();
    let arm = create_arm(p.test.store.as_ref(), "plain").await.unwrap();
    three_slots(&p).await;

    let plan = plan_day(tomorrow(), &mut StdRng::seed_from_u64(1), &p.deps)
        .await
        .unwrap();

    assert_eq!(plan.planned.len(), 3);
    assert_eq!(plan.duplicates, 0);
    for planned in &plan.planned {
        assert_eq!(planned.scheduled_at.date_naive(), tomorrow());

        let post = p.post(planned.post_id);
        assert_eq!(post.status, PostStatus::Draft);
        assert_eq!(post.arm_id, Some(arm.id));
        assert_eq!(post.schedule_entry_id, Some(planned.entry_id));
    }

    let entries = p.test.store.entries();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.status == EntryStatus::Pending));
    assert!(entries.iter().all(|e| e.post_id.is_some()));

    let jobs = p.test.jobs.pending(GENERATE_JOB);
    assert_eq!(jobs.len(), 3);
    for job in jobs {
        let command: GenerateJob = serde_json::from_value(job.args.clone()).unwrap();
        let planned = plan
            .planned
            .iter()
            .find(|planned| planned.post_id == command.post_id)
            .unwrap();
        assert_eq!(command.schedule_entry_id, Some(planned.entry_id));
        assert_eq!(
            job.next_run_at,
            Some(planned.scheduled_at - p.test.config.generation_lead)
        );
    }

    let arm = p.test.store.find_arm(arm.id).await.unwrap().unwrap();
    assert_eq!(arm.trials, 0, "planning does not count as an observation");
}

#[tokio::test]
async fn replanning_the_same_day_adds_nothing() {
    let p = Pipeline::new();
    create_arm(p.test.store.as_ref(), "plain").await.unwrap();
    three_slots(&p).await;

    plan_day(tomorrow(), &mut StdRng::seed_from_u64(1), &p.deps)
        .await
        .unwrap();
    let again = plan_day(tomorrow(), &mut StdRng::seed_from_u64(2), &p.deps)
        .await
        .unwrap();

    assert!(again.planned.is_empty());
    assert_eq!(p.test.store.entries().len(), 3);
    assert_eq!(p.test.store.posts().len(), 3);
    assert_eq!(p.test.jobs.pending(GENERATE_JOB).len(), 3);
}

#[tokio::test]
async fn entry_without_a_post_is_marked_failed() {
    let p = Pipeline::new();
    create_arm(p.test.store.as_ref(), "plain").await.unwrap();
    three_slots(&p).await;
    p.test.store.fail_next_post_create();

    let plan = plan_day(tomorrow(), &mut StdRng::seed_from_u64(3), &p.deps)
        .await
        .unwrap();

    assert_eq!(plan.planned.len(), 2);
    assert_eq!(plan.failed, 1);
    let failed: Vec<_> = p
        .test
        .store
        .entries()
        .into_iter()
        .filter(|e| e.status == EntryStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].post_id, None);
    assert_eq!(p.test.store.posts().len(), 2);
    assert_eq!(p.test.jobs.pending(GENERATE_JOB).len(), 2);
}

#[tokio::test]
async fn untried_arms_are_explored_first() {
    let p = Pipeline::new();
    let a = create_arm(p.test.store.as_ref(), "a").await.unwrap();
    let b = create_arm(p.test.store.as_ref(), "b").await.unwrap();
    three_slots(&p).await;

    let plan = plan_day(tomorrow(), &mut StdRng::seed_from_u64(4), &p.deps)
        .await
        .unwrap();

    assert!(plan
        .planned
        .iter()
        .all(|planned| planned.reason == SelectionReason::Exploration));
    let arms: Vec<_> = plan
        .planned
        .iter()
        .map(|planned| p.post(planned.post_id).arm_id.unwrap())
        .collect();
    assert!(arms.contains(&a.id));
    assert!(arms.contains(&b.id));
}

#[tokio::test]
async fn seasoned_arms_are_exploited() {
    let p = Pipeline::new();
    let strong = create_arm(p.test.store.as_ref(), "strong").await.unwrap();
    let weak = create_arm(p.test.store.as_ref(), "weak").await.unwrap();
    p.test.store.set_arm_stats(strong.id, 50, 0.40);
    p.test.store.set_arm_stats(weak.id, 50, 0.02);
    create_slot(p.test.store.as_ref(), "09:00", "10:00", vec![])
        .await
        .unwrap();

    let plan = plan_day(tomorrow(), &mut StdRng::seed_from_u64(5), &p.deps)
        .await
        .unwrap();

    assert_eq!(plan.planned.len(), 1);
    assert_eq!(plan.planned[0].reason, SelectionReason::Exploitation);
    assert_eq!(p.post(plan.planned[0].post_id).arm_id, Some(strong.id));
}

#[tokio::test]
async fn planned_post_generates_with_its_arm_prompt() {
    let p = Pipeline::new();
    create_arm(p.test.store.as_ref(), "storyteller").await.unwrap();
    create_slot(p.test.store.as_ref(), "09:00", "10:00", vec![])
        .await
        .unwrap();
    let plan = plan_day(tomorrow(), &mut StdRng::seed_from_u64(6), &p.deps)
        .await
        .unwrap();

    p.test.jobs.make_all_due();
    p.run_generate().await;

    assert!(p.test.generator.prompts()[0].contains("storyteller style"));
    assert_eq!(p.post(plan.planned[0].post_id).status, PostStatus::PendingReview);
    assert_eq!(p.test.store.entries()[0].status, EntryStatus::Generated);
}

// =============================================================================
// Engagement
// =============================================================================

#[tokio::test]
async fn engagement_sync_rewards_each_post_once() {
    let p = Pipeline::new();
    let arm = create_arm(p.test.store.as_ref(), "plain").await.unwrap();
    let (post_id, revision_id) =
        create_post_with_revision(p.test.store.as_ref(), Some(arm.id), "Old news.", None)
            .await
            .unwrap();
    p.test
        .store
        .force_posted(post_id, revision_id, "ext-old", Utc::now() - Duration::days(2));
    p.test.engagement.set_metrics("ext-old", metrics(200, 12, 5, 3));

    let first = sync_engagement(&p.deps).await.unwrap();
    assert_eq!(
        first,
        SyncSummary {
            rewarded: 1,
            already_rewarded: 0,
            failed: 0
        }
    );

    let reward = p.test.store.reward(post_id).unwrap();
    assert!((reward.reward - 0.1).abs() < 1e-9);
    let arm = p.test.store.find_arm(arm.id).await.unwrap().unwrap();
    assert_eq!(arm.trials, 1);
    assert!((arm.avg_engagement_rate - 0.1).abs() < 1e-9);

    assert_eq!(sync_engagement(&p.deps).await.unwrap(), SyncSummary::default());
}

#[tokio::test]
async fn engagement_sync_waits_for_the_reward_delay() {
    let p = Pipeline::new();
    let arm = create_arm(p.test.store.as_ref(), "plain").await.unwrap();
    let (post_id, revision_id) =
        create_post_with_revision(p.test.store.as_ref(), Some(arm.id), "Fresh.", None)
            .await
            .unwrap();
    p.test
        .store
        .force_posted(post_id, revision_id, "ext-fresh", Utc::now() - Duration::hours(1));
    p.test.engagement.set_metrics("ext-fresh", metrics(10, 1, 0, 0));

    assert_eq!(sync_engagement(&p.deps).await.unwrap(), SyncSummary::default());
    assert!(p.test.store.reward(post_id).is_none());
}

#[tokio::test]
async fn failed_metric_fetch_is_counted_and_retried_later() {
    let p = Pipeline::new();
    let arm = create_arm(p.test.store.as_ref(), "plain").await.unwrap();
    let (post_id, revision_id) =
        create_post_with_revision(p.test.store.as_ref(), Some(arm.id), "Gone.", None)
            .await
            .unwrap();
    p.test
        .store
        .force_posted(post_id, revision_id, "ext-gone", Utc::now() - Duration::days(3));

    let summary = sync_engagement(&p.deps).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert!(p.test.store.reward(post_id).is_none());

    p.test.engagement.set_metrics("ext-gone", metrics(0, 0, 0, 0));
    let summary = sync_engagement(&p.deps).await.unwrap();
    assert_eq!(summary.rewarded, 1);
    assert_eq!(p.test.store.reward(post_id).unwrap().reward, 0.0);
}

#[tokio::test]
async fn store_error_on_one_reward_does_not_stop_the_batch() {
    let p = Pipeline::new();
    let arm = create_arm(p.test.store.as_ref(), "plain").await.unwrap();
    let mut posts = Vec::new();
    for (external_id, age) in [("ext-older", 3), ("ext-newer", 2)] {
        let (post_id, revision_id) =
            create_post_with_revision(p.test.store.as_ref(), Some(arm.id), external_id, None)
                .await
                .unwrap();
        p.test
            .store
            .force_posted(post_id, revision_id, external_id, Utc::now() - Duration::days(age));
        p.test.engagement.set_metrics(external_id, metrics(100, 5, 0, 0));
        posts.push(post_id);
    }
    p.test.store.fail_next_reward_record();

    let summary = sync_engagement(&p.deps).await.unwrap();

    assert_eq!(
        summary,
        SyncSummary {
            rewarded: 1,
            already_rewarded: 0,
            failed: 1
        }
    );
    assert!(p.test.store.reward(posts[0]).is_none());
    assert!(p.test.store.reward(posts[1]).is_some());

    // The failed post is picked up by the next run.
    assert_eq!(sync_engagement(&p.deps).await.unwrap().rewarded, 1);
    assert!(p.test.store.reward(posts[0]).is_some());
}

#[tokio::test]
async fn ingest_reward_ignores_repeats() {
    let p = Pipeline::new();
    let arm = create_arm(p.test.store.as_ref(), "plain").await.unwrap();
    let (post_id, revision_id) =
        create_post_with_revision(p.test.store.as_ref(), Some(arm.id), "Once.", None)
            .await
            .unwrap();
    p.test
        .store
        .force_posted(post_id, revision_id, "ext-once", Utc::now());
    let post = p.post(post_id);

    let first = ingest_reward(&post, metrics(10, 5, 0, 0), &p.deps).await.unwrap();
    let second = ingest_reward(&post, metrics(10, 10, 0, 0), &p.deps).await.unwrap();

    assert_eq!(first, Some(0.5));
    assert_eq!(second, None);
    let arm = p.test.store.find_arm(arm.id).await.unwrap().unwrap();
    assert_eq!(arm.trials, 1);
}
