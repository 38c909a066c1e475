//! Daily schedule construction.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use rand::Rng;
use serde_json::json;
use tracing::{error, info, warn};

use crate::common::{ArmId, EntryId, NonCritical, PostId, SlotId};
use crate::domains::audit::{actions, audit, targets, NewAuditEntry};
use crate::domains::generation::GenerateJob;
use crate::domains::posts::NewPost;
use crate::domains::schedules::bandit::{select_arm, ArmStats, BanditConfig};
use crate::domains::schedules::models::{
    DailyScheduleEntry, EntryStatus, NewEntry, ScheduleArm, SelectionReason, TimeSlot,
};
use crate::kernel::jobs::JobQueueExt;
use crate::kernel::ServerDeps;

/// One slot assignment before it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSlot {
    pub arm_id: ArmId,
    pub slot_id: SlotId,
    pub scheduled_at: DateTime<Utc>,
    pub reason: SelectionReason,
}

#[derive(Debug, Clone)]
pub struct PlannedPost {
    pub entry_id: EntryId,
    pub post_id: PostId,
    pub scheduled_at: DateTime<Utc>,
    pub reason: SelectionReason,
}

#[derive(Debug, Clone, Default)]
pub struct DayPlan {
    pub planned: Vec<PlannedPost>,
    /// Plans dropped because their timestamp was already taken
    pub duplicates: usize,
    /// Entries marked FAILED because their post or job could not be created
    pub failed: usize,
}

/// Assign arms to the day's eligible slots.
///
/// Slots already holding an entry are skipped but their arm counts as a
/// same-day pick. FAILED entries free their slot. Slots are taken by
/// priority (desc) then start time.
pub fn build_day_plan<R: Rng>(
    date: NaiveDate,
    slots: &[TimeSlot],
    arms: &[ScheduleArm],
    existing: &[DailyScheduleEntry],
    posts_per_day: usize,
    config: &BanditConfig,
    rng: &mut R,
) -> Vec<PlannedSlot> {
    let mut eligible: Vec<&TimeSlot> = slots
        .iter()
        .filter(|slot| slot.enabled && slot.is_active_on(date.weekday()))
        .collect();
    eligible.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.start_time.cmp(&b.start_time))
    });

    let existing: Vec<&DailyScheduleEntry> = existing
        .iter()
        .filter(|entry| entry.status != EntryStatus::Failed)
        .collect();

    let mut planned_counts: HashMap<ArmId, i64> = HashMap::new();
    for entry in &existing {
        *planned_counts.entry(entry.arm_id).or_insert(0) += 1;
    }
    let remaining = posts_per_day.saturating_sub(existing.len());

    let mut plan = Vec::new();
    for slot in eligible {
        if plan.len() >= remaining {
            break;
        }
        if existing.iter().any(|e| e.slot_id == Some(slot.id)) {
            continue;
        }

        let candidates: Vec<ArmStats> = arms
            .iter()
            .filter(|arm| arm.enabled && slot.allows(arm.id))
            .map(ArmStats::from)
            .collect();
        let Some(selection) = select_arm(&candidates, &planned_counts, config) else {
            warn!(slot_id = %slot.id, "No eligible arm for slot");
            continue;
        };

        let offset = rng.gen_range(0..slot.window_minutes());
        *planned_counts.entry(selection.arm_id).or_insert(0) += 1;
        plan.push(PlannedSlot {
            arm_id: selection.arm_id,
            slot_id: slot.id,
            scheduled_at: slot.at_minute(date, offset),
            reason: selection.reason,
        });
    }

    plan
}

/// Plan `date`: schedule entries, DRAFT posts and their generate jobs.
pub async fn plan_day<R: Rng + Send>(
    date: NaiveDate,
    rng: &mut R,
    deps: &ServerDeps,
) -> Result<DayPlan> {
    let config = &deps.config;
    let midnight = date.and_hms_opt(0, 0, 0).context("invalid plan date")?;
    let day_start = Utc.from_utc_datetime(&midnight);
    let day_end = day_start + Duration::days(1);

    let slots = deps.store.list_slots().await?;
    let arms = deps.store.list_arms().await?;
    let existing = deps.store.entries_between(day_start, day_end).await?;

    let plan = build_day_plan(
        date,
        &slots,
        &arms,
        &existing,
        config.posts_per_day,
        &config.bandit,
        rng,
    );

    let mut result = DayPlan::default();
    let now = Utc::now();
    for slot in plan {
        let Some(entry) = deps
            .store
            .insert_entry(NewEntry {
                arm_id: slot.arm_id,
                slot_id: Some(slot.slot_id),
                scheduled_at: slot.scheduled_at,
                reason: slot.reason,
            })
            .await?
        else {
            result.duplicates += 1;
            continue;
        };

        let post_id = match attach_post(&entry, now, deps).await {
            Ok(post_id) => post_id,
            Err(e) => {
                error!(entry_id = %entry.id, error = %e, "Could not plan entry, marking it FAILED");
                NonCritical::new("entry_failed")
                    .run(deps.store.set_entry_status(entry.id, EntryStatus::Failed))
                    .await;
                result.failed += 1;
                continue;
            }
        };

        info!(
            entry_id = %entry.id,
            post_id = %post_id,
            arm_id = %entry.arm_id,
            scheduled_at = %entry.scheduled_at,
            reason = ?entry.reason,
            "Planned post"
        );
        audit(
            NewAuditEntry::new(
                deps.system_member_id,
                actions::SCHEDULE_PLANNED,
                targets::SCHEDULE_ENTRY,
                entry.id,
            )
            .with_metadata(json!({
                "post_id": post_id,
                "arm_id": entry.arm_id,
                "scheduled_at": entry.scheduled_at,
                "reason": entry.reason,
            })),
            deps,
        )
        .await;

        result.planned.push(PlannedPost {
            entry_id: entry.id,
            post_id,
            scheduled_at: entry.scheduled_at,
            reason: entry.reason,
        });
    }

    info!(
        date = %date,
        planned = result.planned.len(),
        duplicates = result.duplicates,
        failed = result.failed,
        "Daily schedule built"
    );
    Ok(result)
}

/// DRAFT post for the entry plus its generate job, due `generation_lead`
/// before the slot.
async fn attach_post(
    entry: &DailyScheduleEntry,
    now: DateTime<Utc>,
    deps: &ServerDeps,
) -> Result<PostId> {
    let post = deps
        .store
        .create_post(NewPost {
            created_by: deps.system_member_id,
            arm_id: Some(entry.arm_id),
            schedule_entry_id: Some(entry.id),
        })
        .await?;
    deps.store.attach_entry_post(entry.id, post.id).await?;

    let job = GenerateJob::builder()
        .post_id(post.id)
        .created_by(deps.system_member_id)
        .scheduled_time(Some(entry.scheduled_at))
        .schedule_entry_id(Some(entry.id))
        .build();
    let run_at = (entry.scheduled_at - deps.config.generation_lead).max(now);
    deps.jobs.schedule(job, run_at).await?;
    Ok(post.id)
}
