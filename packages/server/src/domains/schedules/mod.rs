pub mod activities;
pub mod bandit;
pub mod models;
pub mod store;

pub use activities::{
    build_day_plan, ingest_reward, plan_day, sync_engagement, DayPlan, PlannedPost, PlannedSlot,
    SyncSummary,
};
pub use bandit::{reward_from_metrics, select_arm, ucb1_score, ArmStats, BanditConfig, Selection};
pub use models::{
    DailyScheduleEntry, EntryStatus, NewArm, NewEntry, NewReward, NewTimeSlot, PostReward,
    ScheduleArm, SelectionReason, TimeSlot,
};
pub use store::ScheduleStore;
