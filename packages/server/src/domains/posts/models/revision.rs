use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use super::status::LifecycleError;
use crate::common::{PostId, RevisionId};

/// Immutable generated draft. Revision numbers are gapless per post.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PostRevision {
    pub id: RevisionId,
    pub post_id: PostId,
    pub revision_number: i32,
    pub content: String,
    pub engine: String,
    pub similarity_score: f64,
    /// `[{ "post_id": ..., "score": ... }]`, highest score first
    pub similarity_hits: Option<serde_json::Value>,
    #[serde(skip)]
    pub embedding: Option<pgvector::Vector>,
    pub generation_attempts: i32,
    /// Every draft failed the checks; this is the last one
    pub soft_failure: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRevision {
    pub post_id: PostId,
    pub content: String,
    pub engine: String,
    pub similarity_score: f64,
    pub similarity_hits: Option<serde_json::Value>,
    pub embedding: Option<Vec<f32>>,
    pub generation_attempts: i32,
    pub soft_failure: bool,
}

impl PostRevision {
    pub fn from_new(new: NewRevision, revision_number: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: RevisionId::new(),
            post_id: new.post_id,
            revision_number,
            content: new.content,
            engine: new.engine,
            similarity_score: new.similarity_score,
            similarity_hits: new.similarity_hits,
            embedding: new.embedding.map(pgvector::Vector::from),
            generation_attempts: new.generation_attempts,
            soft_failure: new.soft_failure,
            created_at: now,
        }
    }

    pub fn embedding_vec(&self) -> Option<Vec<f32>> {
        self.embedding.as_ref().map(|v| v.to_vec())
    }

    /// Insert as `max(revision_number) + 1` while holding the post row lock.
    pub async fn create_next(new: NewRevision, pool: &PgPool) -> Result<Self> {
        let mut tx = pool.begin().await?;

        let locked: Option<PostId> =
            sqlx::query_scalar("SELECT id FROM posts WHERE id = $1 FOR UPDATE")
                .bind(new.post_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(LifecycleError::NotFound(new.post_id).into());
        }

        let current: Option<i32> =
            sqlx::query_scalar("SELECT MAX(revision_number) FROM post_revisions WHERE post_id = $1")
                .bind(new.post_id)
                .fetch_one(&mut *tx)
                .await?;
        let revision = Self::from_new(new, current.unwrap_or(0) + 1, Utc::now());

        let revision = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO post_revisions (
                id, post_id, revision_number, content, engine, similarity_score,
                similarity_hits, embedding, generation_attempts, soft_failure
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(revision.id)
        .bind(revision.post_id)
        .bind(revision.revision_number)
        .bind(&revision.content)
        .bind(&revision.engine)
        .bind(revision.similarity_score)
        .bind(&revision.similarity_hits)
        .bind(&revision.embedding)
        .bind(revision.generation_attempts)
        .bind(revision.soft_failure)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(revision)
    }

    pub async fn find_by_id(id: RevisionId, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM post_revisions WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_for_post(post_id: PostId, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM post_revisions WHERE post_id = $1 ORDER BY revision_number ASC",
        )
        .bind(post_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}
