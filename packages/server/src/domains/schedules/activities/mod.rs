mod plan_day;
mod rewards;

pub use plan_day::{build_day_plan, plan_day, DayPlan, PlannedPost, PlannedSlot};
pub use rewards::{ingest_reward, sync_engagement, SyncSummary};
