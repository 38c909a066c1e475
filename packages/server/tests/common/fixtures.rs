//! Test fixtures for creating arms, slots and published posts.
//!
//! Generic over the store so the same fixtures serve memory and Postgres tests.

use anyhow::Result;
use autopost_core::common::{ArmId, MemberId, PostId, RevisionId};
use autopost_core::domains::posts::{NewPost, NewRevision, PostStore};
use autopost_core::domains::schedules::{NewArm, NewTimeSlot, ScheduleArm, ScheduleStore, TimeSlot};
use chrono::NaiveTime;

pub async fn create_arm<S: ScheduleStore + ?Sized>(store: &S, name: &str) -> Result<ScheduleArm> {
    store
        .create_arm(NewArm {
            name: name.to_string(),
            prompt: format!("Write a post in the {name} style."),
        })
        .await
}

/// Slot open every day between `start` and `end` (HH:MM, UTC).
pub async fn create_slot<S: ScheduleStore + ?Sized>(
    store: &S,
    start: &str,
    end: &str,
    allowed_arm_ids: Vec<ArmId>,
) -> Result<TimeSlot> {
    store
        .create_slot(NewTimeSlot {
            start_time: NaiveTime::parse_from_str(start, "%H:%M")?,
            end_time: NaiveTime::parse_from_str(end, "%H:%M")?,
            allowed_arm_ids,
            active_days: Vec::new(),
            priority: 0,
        })
        .await
}

/// Post with one revision, not yet published.
pub async fn create_post_with_revision<S: PostStore + ?Sized>(
    store: &S,
    arm_id: Option<ArmId>,
    content: &str,
    embedding: Option<Vec<f32>>,
) -> Result<(PostId, RevisionId)> {
    let post = store
        .create_post(NewPost {
            created_by: MemberId::new(),
            arm_id,
            schedule_entry_id: None,
        })
        .await?;
    let revision = store
        .create_revision(NewRevision {
            post_id: post.id,
            content: content.to_string(),
            engine: "mock-engine".to_string(),
            similarity_score: 0.0,
            similarity_hits: None,
            embedding,
            generation_attempts: 1,
            soft_failure: false,
        })
        .await?;
    Ok((post.id, revision.id))
}

/// One-hot vector of the mock embedding width.
pub fn one_hot(index: usize) -> Vec<f32> {
    let mut v = vec![0.0; autopost_core::kernel::test_dependencies::MOCK_EMBEDDING_DIMS];
    v[index] = 1.0;
    v
}
