use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::common::{ArmId, PostId};
use crate::kernel::EngagementMetrics;

/// Engagement reward for one published post. One row per post.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PostReward {
    pub post_id: PostId,
    pub arm_id: ArmId,
    pub reward: f64,
    pub metrics: sqlx::types::Json<EngagementMetrics>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReward {
    pub post_id: PostId,
    pub arm_id: ArmId,
    pub reward: f64,
    pub metrics: EngagementMetrics,
}

impl PostReward {
    /// Store the reward and fold it into the arm's running mean in one
    /// transaction. Returns false when the post was already rewarded.
    pub async fn record(new: &NewReward, pool: &PgPool) -> Result<bool> {
        let mut tx = pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO post_rewards (post_id, arm_id, reward, metrics)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (post_id) DO NOTHING
            "#,
        )
        .bind(new.post_id)
        .bind(new.arm_id)
        .bind(new.reward)
        .bind(sqlx::types::Json(new.metrics))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        // SET expressions read the pre-update row.
        sqlx::query(
            r#"
            UPDATE schedule_arms
            SET avg_engagement_rate = avg_engagement_rate + ($2 - avg_engagement_rate) / (trials + 1),
                trials = trials + 1
            WHERE id = $1
            "#,
        )
        .bind(new.arm_id)
        .bind(new.reward)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn find_by_post(post_id: PostId, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM post_rewards WHERE post_id = $1")
            .bind(post_id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }
}
