use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{
    DailyScheduleEntry, EntryStatus, NewArm, NewEntry, NewReward, NewTimeSlot, ScheduleArm,
    TimeSlot,
};
use crate::common::{ArmId, EntryId, PostId};

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn create_arm(&self, new: NewArm) -> Result<ScheduleArm>;

    async fn find_arm(&self, id: ArmId) -> Result<Option<ScheduleArm>>;

    /// Insertion order.
    async fn list_arms(&self) -> Result<Vec<ScheduleArm>>;

    async fn increment_arm_uses(&self, id: ArmId) -> Result<()>;

    async fn create_slot(&self, new: NewTimeSlot) -> Result<TimeSlot>;

    async fn list_slots(&self) -> Result<Vec<TimeSlot>>;

    /// None when the scheduled timestamp is already taken.
    async fn insert_entry(&self, new: NewEntry) -> Result<Option<DailyScheduleEntry>>;

    async fn find_entry(&self, id: EntryId) -> Result<Option<DailyScheduleEntry>>;

    async fn entries_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DailyScheduleEntry>>;

    async fn attach_entry_post(&self, id: EntryId, post_id: PostId) -> Result<()>;

    async fn set_entry_status(&self, id: EntryId, status: EntryStatus) -> Result<()>;

    /// Store a reward and update the arm's trials and running mean together.
    /// False when the post already has a reward.
    async fn record_reward(&self, reward: NewReward) -> Result<bool>;
}
