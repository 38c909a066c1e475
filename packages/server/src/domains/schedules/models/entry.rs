use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::common::{ArmId, EntryId, PostId, SlotId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "schedule_entry_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Pending,
    Generated,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "selection_reason", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionReason {
    Manual,
    Exploration,
    Exploitation,
}

/// One planned post: which arm, which slot, when.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DailyScheduleEntry {
    pub id: EntryId,
    pub arm_id: ArmId,
    pub slot_id: Option<SlotId>,
    pub scheduled_at: DateTime<Utc>,
    pub post_id: Option<PostId>,
    pub status: EntryStatus,
    pub reason: SelectionReason,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEntry {
    pub arm_id: ArmId,
    pub slot_id: Option<SlotId>,
    pub scheduled_at: DateTime<Utc>,
    pub reason: SelectionReason,
}

impl DailyScheduleEntry {
    pub fn from_new(new: NewEntry, now: DateTime<Utc>) -> Self {
        Self {
            id: EntryId::new(),
            arm_id: new.arm_id,
            slot_id: new.slot_id,
            scheduled_at: new.scheduled_at,
            post_id: None,
            status: EntryStatus::Pending,
            reason: new.reason,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns None when an entry already exists at that timestamp.
    pub async fn insert(new: NewEntry, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO daily_schedule_entries (id, arm_id, slot_id, scheduled_at, reason)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (scheduled_at) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(EntryId::new())
        .bind(new.arm_id)
        .bind(new.slot_id)
        .bind(new.scheduled_at)
        .bind(new.reason)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_by_id(id: EntryId, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM daily_schedule_entries WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Entries with `start <= scheduled_at < end`.
    pub async fn find_between(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM daily_schedule_entries
            WHERE scheduled_at >= $1 AND scheduled_at < $2
            ORDER BY scheduled_at ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn attach_post(id: EntryId, post_id: PostId, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE daily_schedule_entries SET post_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(post_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_status(id: EntryId, status: EntryStatus, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE daily_schedule_entries SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(pool)
            .await?;
        Ok(())
    }
}
