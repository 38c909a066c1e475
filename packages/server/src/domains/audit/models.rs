use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::common::{AuditLogId, MemberId};

/// Append-only record of a pipeline action.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: AuditLogId,
    pub actor_id: MemberId,
    pub action: String,
    pub target_type: String,
    pub target_id: Uuid,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub actor_id: MemberId,
    pub action: &'static str,
    pub target_type: &'static str,
    pub target_id: Uuid,
    pub metadata: Value,
}

impl NewAuditEntry {
    pub fn new(
        actor_id: MemberId,
        action: &'static str,
        target_type: &'static str,
        target_id: impl Into<Uuid>,
    ) -> Self {
        Self {
            actor_id,
            action,
            target_type,
            target_id: target_id.into(),
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

impl AuditLog {
    pub fn from_new(new: NewAuditEntry, now: DateTime<Utc>) -> Self {
        Self {
            id: AuditLogId::new(),
            actor_id: new.actor_id,
            action: new.action.to_string(),
            target_type: new.target_type.to_string(),
            target_id: new.target_id,
            metadata: new.metadata,
            created_at: now,
        }
    }

    pub async fn insert(new: &NewAuditEntry, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, actor_id, action, target_type, target_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(AuditLogId::new())
        .bind(new.actor_id)
        .bind(new.action)
        .bind(new.target_type)
        .bind(new.target_id)
        .bind(&new.metadata)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find_for_target(
        target_type: &str,
        target_id: Uuid,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM audit_logs
            WHERE target_type = $1 AND target_id = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(target_type)
        .bind(target_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}
