use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{Account, AccountStatus, NewAccount};
use crate::common::AccountId;

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn create_account(&self, new: NewAccount) -> Result<Account>;

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>>;

    async fn default_account(&self) -> Result<Option<Account>>;

    async fn accounts_due_for_refresh(
        &self,
        expiring_before: DateTime<Utc>,
        refreshed_before: DateTime<Utc>,
    ) -> Result<Vec<Account>>;

    async fn update_account_token(
        &self,
        id: AccountId,
        encrypted_access_token: String,
        expires_at: DateTime<Utc>,
        refreshed_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn set_account_status(&self, id: AccountId, status: AccountStatus) -> Result<()>;
}
