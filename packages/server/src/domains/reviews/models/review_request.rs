use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::common::{MemberId, PostId, ReviewRequestId, RevisionId};
use crate::domains::posts::LifecycleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "review_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Used,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "review_decision", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    Approve,
    Regenerate,
    Skip,
}

impl FromStr for ReviewDecision {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "approve" => Ok(ReviewDecision::Approve),
            "regenerate" => Ok(ReviewDecision::Regenerate),
            "skip" => Ok(ReviewDecision::Skip),
            _ => Err(anyhow::anyhow!("unknown review decision: {}", s)),
        }
    }
}

/// Single-use review token sent to a reviewer.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub id: ReviewRequestId,
    pub post_id: PostId,
    pub revision_id: RevisionId,
    pub token: String,
    pub reviewer_id: MemberId,
    pub status: ReviewStatus,
    pub decision: Option<ReviewDecision>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("review token not found")]
    NotFound,
    #[error("review token already used")]
    AlreadyUsed,
    #[error("review token expired")]
    Expired,
    #[error("review request was superseded")]
    Cancelled,
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReviewError {
    /// Lift typed lifecycle errors out of a store error.
    pub fn from_store(error: anyhow::Error) -> Self {
        match error.downcast::<LifecycleError>() {
            Ok(lifecycle) => ReviewError::Lifecycle(lifecycle),
            Err(other) => ReviewError::Other(other),
        }
    }
}

impl ReviewRequest {
    pub fn new(
        post_id: PostId,
        revision_id: RevisionId,
        reviewer_id: MemberId,
        token: String,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReviewRequestId::new(),
            post_id,
            revision_id,
            token,
            reviewer_id,
            status: ReviewStatus::Pending,
            decision: None,
            expires_at,
            used_at: None,
            created_at: Utc::now(),
        }
    }

    /// Validate that a stored request may be consumed at `now`.
    pub fn check_consumable(&self, now: DateTime<Utc>) -> Result<(), ReviewError> {
        match self.status {
            ReviewStatus::Used => Err(ReviewError::AlreadyUsed),
            ReviewStatus::Expired => Err(ReviewError::Expired),
            ReviewStatus::Cancelled => Err(ReviewError::Cancelled),
            ReviewStatus::Pending if self.expires_at <= now => Err(ReviewError::Expired),
            ReviewStatus::Pending => Ok(()),
        }
    }

    /// Insert, cancelling any older PENDING request for the same post.
    pub async fn insert(request: &ReviewRequest, pool: &PgPool) -> Result<Self> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            "UPDATE review_requests SET status = 'cancelled' WHERE post_id = $1 AND status = 'pending'",
        )
        .bind(request.post_id)
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO review_requests (id, post_id, revision_id, token, reviewer_id, status, expires_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6)
            RETURNING *
            "#,
        )
        .bind(request.id)
        .bind(request.post_id)
        .bind(request.revision_id)
        .bind(&request.token)
        .bind(request.reviewer_id)
        .bind(request.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    /// Atomically mark a PENDING, unexpired token USED.
    pub async fn consume(
        token: &str,
        decision: ReviewDecision,
        now: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<Self, ReviewError> {
        let mut tx = pool.begin().await.map_err(anyhow::Error::from)?;

        let request = sqlx::query_as::<_, Self>(
            "SELECT * FROM review_requests WHERE token = $1 FOR UPDATE",
        )
        .bind(token)
        .fetch_optional(&mut *tx)
        .await
        .map_err(anyhow::Error::from)?
        .ok_or(ReviewError::NotFound)?;

        request.check_consumable(now)?;

        let used = sqlx::query_as::<_, Self>(
            r#"
            UPDATE review_requests
            SET status = 'used', decision = $2, used_at = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(request.id)
        .bind(decision)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(anyhow::Error::from)?;

        tx.commit().await.map_err(anyhow::Error::from)?;
        Ok(used)
    }

    pub async fn expire_due(now: DateTime<Utc>, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE review_requests
            SET status = 'expired'
            WHERE status = 'pending' AND expires_at <= $1
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_pending_for_post(post_id: PostId, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM review_requests WHERE post_id = $1 AND status = 'pending'",
        )
        .bind(post_id)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }
}
