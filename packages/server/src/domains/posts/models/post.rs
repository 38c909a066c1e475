use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use super::status::{ClaimAction, ClaimOutcome, LifecycleError, PostErrorCode, PostStatus, StatusChange};
use crate::common::{ArmId, EntryId, MemberId, PostId, RevisionId};

/// One automated post moving through the publish lifecycle.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub status: PostStatus,
    pub created_by: MemberId,
    pub approved_by: Option<MemberId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub posted_at: Option<DateTime<Utc>>,
    pub external_url: Option<String>,
    pub external_media_id: Option<String>,
    pub error_code: Option<PostErrorCode>,
    pub error_message: Option<String>,
    pub arm_id: Option<ArmId>,
    pub schedule_entry_id: Option<EntryId>,
    pub published_revision_id: Option<RevisionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub created_by: MemberId,
    pub arm_id: Option<ArmId>,
    pub schedule_entry_id: Option<EntryId>,
}

impl Post {
    /// In-memory DRAFT row; the Postgres path lets the database fill timestamps.
    pub fn draft(new: NewPost, now: DateTime<Utc>) -> Self {
        Self {
            id: PostId::new(),
            status: PostStatus::Draft,
            created_by: new.created_by,
            approved_by: None,
            approved_at: None,
            posted_at: None,
            external_url: None,
            external_media_id: None,
            error_code: None,
            error_message: None,
            arm_id: new.arm_id,
            schedule_entry_id: new.schedule_entry_id,
            published_revision_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Everything recorded on the POSTED transition.
#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub post_id: PostId,
    pub revision_id: RevisionId,
    pub external_id: String,
    pub permalink: Option<String>,
    pub posted_at: DateTime<Utc>,
    pub schedule_entry_id: Option<EntryId>,
}

/// Posted content and its stored embedding.
#[derive(Debug, Clone, FromRow)]
pub struct PostedEmbedding {
    pub post_id: PostId,
    pub embedding: pgvector::Vector,
}

// =============================================================================
// SQL Queries
// =============================================================================

impl Post {
    pub async fn create(new: NewPost, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO posts (id, status, created_by, arm_id, schedule_entry_id)
            VALUES ($1, 'draft', $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(PostId::new())
        .bind(new.created_by)
        .bind(new.arm_id)
        .bind(new.schedule_entry_id)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_by_id(id: PostId, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM posts WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Row-locked read-and-advance. Only `Claimed` changes the row.
    pub async fn claim(id: PostId, action: ClaimAction, pool: &PgPool) -> Result<ClaimOutcome> {
        let mut tx = pool.begin().await?;

        let status: Option<PostStatus> =
            sqlx::query_scalar("SELECT status FROM posts WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(status) = status else {
            return Err(LifecycleError::NotFound(id).into());
        };

        let outcome = action.decide(status);
        if outcome == ClaimOutcome::Claimed {
            sqlx::query("UPDATE posts SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(action.target())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// Compare-and-set status change. Fails with `StaleStatus` when the row
    /// is no longer in `change.from`.
    pub async fn transition(id: PostId, change: &StatusChange, pool: &PgPool) -> Result<Self> {
        change.validate()?;
        let (code, message) = match &change.error {
            Some(error) => (Some(error.code), Some(error.message.as_str())),
            None => (None, None),
        };

        let post = sqlx::query_as::<_, Self>(
            r#"
            UPDATE posts
            SET status = $3,
                error_code = COALESCE($4, error_code),
                error_message = COALESCE($5, error_message),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(change.from)
        .bind(change.to)
        .bind(code)
        .bind(message)
        .fetch_optional(pool)
        .await?;

        post.ok_or_else(|| {
            LifecycleError::StaleStatus {
                post_id: id,
                expected: change.from,
            }
            .into()
        })
    }

    pub async fn approve(
        id: PostId,
        approver: MemberId,
        at: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<Self> {
        let post = sqlx::query_as::<_, Self>(
            r#"
            UPDATE posts
            SET status = 'approved', approved_by = $2, approved_at = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'pending_review'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(approver)
        .bind(at)
        .fetch_optional(pool)
        .await?;

        post.ok_or_else(|| {
            LifecycleError::StaleStatus {
                post_id: id,
                expected: PostStatus::PendingReview,
            }
            .into()
        })
    }

    /// PUBLISHING -> POSTED and the schedule entry -> COMPLETED, atomically.
    pub async fn record_published(record: &PublishRecord, pool: &PgPool) -> Result<Self> {
        let mut tx = pool.begin().await?;

        let post = sqlx::query_as::<_, Self>(
            r#"
            UPDATE posts
            SET status = 'posted',
                posted_at = $2,
                external_url = $3,
                external_media_id = $4,
                published_revision_id = $5,
                error_code = NULL,
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'publishing'
            RETURNING *
            "#,
        )
        .bind(record.post_id)
        .bind(record.posted_at)
        .bind(&record.permalink)
        .bind(&record.external_id)
        .bind(record.revision_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LifecycleError::StaleStatus {
            post_id: record.post_id,
            expected: PostStatus::Publishing,
        })?;

        if let Some(entry_id) = record.schedule_entry_id {
            sqlx::query(
                "UPDATE daily_schedule_entries SET status = 'completed', updated_at = NOW() WHERE id = $1",
            )
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(post)
    }

    /// Content of the most recently posted revisions, newest first.
    pub async fn find_recent_posted_contents(limit: i64, pool: &PgPool) -> Result<Vec<String>> {
        sqlx::query_scalar(
            r#"
            SELECT r.content
            FROM posts p
            JOIN post_revisions r ON r.id = p.published_revision_id
            WHERE p.status = 'posted'
            ORDER BY p.posted_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_recent_posted_embeddings(
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<PostedEmbedding>> {
        sqlx::query_as::<_, PostedEmbedding>(
            r#"
            SELECT p.id AS post_id, r.embedding
            FROM posts p
            JOIN post_revisions r ON r.id = p.published_revision_id
            WHERE p.status = 'posted' AND r.embedding IS NOT NULL
            ORDER BY p.posted_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Highest-reward posted contents, used as style exemplars.
    pub async fn find_top_exemplars(limit: i64, pool: &PgPool) -> Result<Vec<String>> {
        sqlx::query_scalar(
            r#"
            SELECT r.content
            FROM post_rewards pr
            JOIN posts p ON p.id = pr.post_id
            JOIN post_revisions r ON r.id = p.published_revision_id
            ORDER BY pr.reward DESC, p.posted_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Posted arm-attributed posts old enough to score and not yet rewarded.
    pub async fn find_awaiting_reward(
        posted_before: DateTime<Utc>,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT p.*
            FROM posts p
            LEFT JOIN post_rewards pr ON pr.post_id = p.id
            WHERE p.status = 'posted'
              AND p.arm_id IS NOT NULL
              AND p.external_media_id IS NOT NULL
              AND p.posted_at <= $1
              AND pr.post_id IS NULL
            ORDER BY p.posted_at ASC
            LIMIT $2
            "#,
        )
        .bind(posted_before)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_stalled_generating(
        updated_before: DateTime<Utc>,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM posts
            WHERE status = 'generating' AND updated_at < $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        )
        .bind(updated_before)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}
