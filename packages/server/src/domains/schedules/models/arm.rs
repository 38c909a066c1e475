use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::common::ArmId;

/// A prompt template competing for schedule slots.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ScheduleArm {
    pub id: ArmId,
    pub name: String,
    pub prompt: String,
    pub enabled: bool,
    /// Successful publishes attributed to the arm
    pub total_uses: i64,
    /// Rewards ingested (the bandit's n)
    pub trials: i64,
    pub avg_engagement_rate: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewArm {
    pub name: String,
    pub prompt: String,
}

impl ScheduleArm {
    pub fn from_new(new: NewArm, now: DateTime<Utc>) -> Self {
        Self {
            id: ArmId::new(),
            name: new.name,
            prompt: new.prompt,
            enabled: true,
            total_uses: 0,
            trials: 0,
            avg_engagement_rate: 0.0,
            created_at: now,
        }
    }

    pub async fn create(new: NewArm, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO schedule_arms (id, name, prompt) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(ArmId::new())
        .bind(&new.name)
        .bind(&new.prompt)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_by_id(id: ArmId, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM schedule_arms WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// All arms in insertion order.
    pub async fn find_all(pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM schedule_arms ORDER BY created_at ASC, id ASC")
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn increment_uses(id: ArmId, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE schedule_arms SET total_uses = total_uses + 1 WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
