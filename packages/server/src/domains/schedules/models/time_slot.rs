use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::common::{ArmId, SlotId};

/// A posting window (UTC time of day).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: SlotId,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// Empty means every arm may use the slot
    pub allowed_arm_ids: Vec<ArmId>,
    /// ISO weekdays, 1 = Monday. Empty means every day
    pub active_days: Vec<i16>,
    pub priority: i32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTimeSlot {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub allowed_arm_ids: Vec<ArmId>,
    pub active_days: Vec<i16>,
    pub priority: i32,
}

impl TimeSlot {
    pub fn from_new(new: NewTimeSlot, now: DateTime<Utc>) -> Self {
        Self {
            id: SlotId::new(),
            start_time: new.start_time,
            end_time: new.end_time,
            allowed_arm_ids: new.allowed_arm_ids,
            active_days: new.active_days,
            priority: new.priority,
            enabled: true,
            created_at: now,
        }
    }

    pub fn is_active_on(&self, weekday: Weekday) -> bool {
        let day = weekday.number_from_monday() as i16;
        self.active_days.is_empty() || self.active_days.contains(&day)
    }

    pub fn allows(&self, arm_id: ArmId) -> bool {
        self.allowed_arm_ids.is_empty() || self.allowed_arm_ids.contains(&arm_id)
    }

    /// Whole minutes inside the window, at least one.
    pub fn window_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes().max(1)
    }

    /// Timestamp `offset_minutes` after the slot start on `date`.
    pub fn at_minute(&self, date: NaiveDate, offset_minutes: i64) -> DateTime<Utc> {
        let start = Utc.from_utc_datetime(&date.and_time(self.start_time));
        start + chrono::Duration::minutes(offset_minutes.clamp(0, self.window_minutes() - 1))
    }

    pub async fn create(new: NewTimeSlot, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO time_slots (id, start_time, end_time, allowed_arm_ids, active_days, priority)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(SlotId::new())
        .bind(new.start_time)
        .bind(new.end_time)
        .bind(&new.allowed_arm_ids)
        .bind(&new.active_days)
        .bind(new.priority)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_all(pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM time_slots ORDER BY created_at ASC")
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }
}
