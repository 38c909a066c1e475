use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::common::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    /// Credentials rejected; a human must re-authorize
    ActionRequired,
    Disabled,
}

/// Publishing account on the external platform.
#[derive(Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub handle: String,
    pub external_user_id: String,
    /// ChaCha20-Poly1305 sealed, base64
    #[serde(skip_serializing)]
    pub encrypted_access_token: String,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub status: AccountStatus,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("status", &self.status)
            .field("token_expires_at", &self.token_expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub handle: String,
    pub external_user_id: String,
    pub encrypted_access_token: String,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub is_default: bool,
}

impl Account {
    pub fn from_new(new: NewAccount, now: DateTime<Utc>) -> Self {
        Self {
            id: AccountId::new(),
            handle: new.handle,
            external_user_id: new.external_user_id,
            encrypted_access_token: new.encrypted_access_token,
            token_expires_at: new.token_expires_at,
            last_refreshed_at: None,
            status: AccountStatus::Active,
            is_default: new.is_default,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_publishable(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// ACTIVE, expiring before `expiring_before`, and not refreshed since
    /// `refreshed_before`.
    pub fn needs_refresh(
        &self,
        expiring_before: DateTime<Utc>,
        refreshed_before: DateTime<Utc>,
    ) -> bool {
        self.status == AccountStatus::Active
            && self.token_expires_at.is_some_and(|at| at <= expiring_before)
            && self.last_refreshed_at.map_or(true, |at| at < refreshed_before)
    }

    pub async fn create(new: NewAccount, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO accounts (id, handle, external_user_id, encrypted_access_token, token_expires_at, is_default)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(AccountId::new())
        .bind(&new.handle)
        .bind(&new.external_user_id)
        .bind(&new.encrypted_access_token)
        .bind(new.token_expires_at)
        .bind(new.is_default)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_by_id(id: AccountId, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_default(pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM accounts WHERE is_default ORDER BY created_at ASC LIMIT 1",
        )
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_due_for_refresh(
        expiring_before: DateTime<Utc>,
        refreshed_before: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM accounts
            WHERE status = 'active'
              AND token_expires_at IS NOT NULL
              AND token_expires_at <= $1
              AND (last_refreshed_at IS NULL OR last_refreshed_at < $2)
            ORDER BY token_expires_at ASC
            "#,
        )
        .bind(expiring_before)
        .bind(refreshed_before)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn update_token(
        id: AccountId,
        encrypted_access_token: &str,
        expires_at: DateTime<Utc>,
        refreshed_at: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET encrypted_access_token = $2, token_expires_at = $3, last_refreshed_at = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(encrypted_access_token)
        .bind(expires_at)
        .bind(refreshed_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_status(id: AccountId, status: AccountStatus, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE accounts SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn account(expires_in_days: i64, refreshed_hours_ago: Option<i64>) -> Account {
        let now = Utc::now();
        let mut account = Account::from_new(
            NewAccount {
                handle: "studio".into(),
                external_user_id: "1789".into(),
                encrypted_access_token: "sealed".into(),
                token_expires_at: Some(now + Duration::days(expires_in_days)),
                is_default: true,
            },
            now,
        );
        account.last_refreshed_at = refreshed_hours_ago.map(|h| now - Duration::hours(h));
        account
    }

    #[test]
    fn refresh_window() {
        let now = Utc::now();
        let expiring_before = now + Duration::days(7);
        let refreshed_before = now - Duration::hours(24);

        assert!(account(3, None).needs_refresh(expiring_before, refreshed_before));
        assert!(account(3, Some(30)).needs_refresh(expiring_before, refreshed_before));
        assert!(!account(3, Some(2)).needs_refresh(expiring_before, refreshed_before));
        assert!(!account(30, None).needs_refresh(expiring_before, refreshed_before));

        let mut flagged = account(3, None);
        flagged.status = AccountStatus::ActionRequired;
        assert!(!flagged.needs_refresh(expiring_before, refreshed_before));
    }

    #[test]
    fn debug_hides_token() {
        let rendered = format!("{:?}", account(3, None));
        assert!(!rendered.contains("sealed"));
    }
}
