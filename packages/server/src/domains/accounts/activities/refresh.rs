use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::common::AccountId;
use crate::domains::accounts::models::AccountStatus;
use crate::domains::audit::{actions, audit, targets, NewAuditEntry};
use crate::kernel::ServerDeps;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { expires_at: DateTime<Utc> },
    /// Account is no longer active or was refreshed in the meantime
    NotNeeded,
    /// Credential rejected; account flagged for re-authorization
    ActionRequired { reason: String },
}

/// Exchange the stored credential for a fresh one.
///
/// Transient platform failures are returned as errors so the queue retries.
/// Any other rejection flags the account ACTION_REQUIRED.
pub async fn refresh_account_token(account_id: AccountId, deps: &ServerDeps) -> Result<RefreshOutcome> {
    let account = deps
        .store
        .find_account(account_id)
        .await?
        .with_context(|| format!("account {account_id} not found"))?;

    if account.status != AccountStatus::Active {
        info!(account_id = %account_id, status = ?account.status, "Skipping refresh for inactive account");
        return Ok(RefreshOutcome::NotNeeded);
    }

    let token = match deps.cipher.decrypt(&account.encrypted_access_token) {
        Ok(token) => token,
        Err(e) => {
            return flag_action_required(account_id, format!("stored credential unreadable: {e}"), deps)
                .await;
        }
    };

    let refreshed = match deps
        .rate_limiter
        .execute(|| deps.platform.refresh_token(&token))
        .await
    {
        Ok(refreshed) => refreshed,
        Err(e) if e.is_transient() => {
            warn!(account_id = %account_id, error = %e, "Transient token refresh failure");
            return Err(e.into());
        }
        Err(e) => return flag_action_required(account_id, e.to_string(), deps).await,
    };

    let sealed = deps.cipher.encrypt(&refreshed.access_token)?;
    let now = Utc::now();
    deps.store
        .update_account_token(account_id, sealed, refreshed.expires_at, now)
        .await?;

    info!(account_id = %account_id, expires_at = %refreshed.expires_at, "Access token refreshed");
    audit(
        NewAuditEntry::new(
            deps.system_member_id,
            actions::ACCOUNT_TOKEN_REFRESHED,
            targets::ACCOUNT,
            account_id,
        )
        .with_metadata(json!({ "expires_at": refreshed.expires_at })),
        deps,
    )
    .await;

    Ok(RefreshOutcome::Refreshed {
        expires_at: refreshed.expires_at,
    })
}

async fn flag_action_required(
    account_id: AccountId,
    reason: String,
    deps: &ServerDeps,
) -> Result<RefreshOutcome> {
    warn!(account_id = %account_id, reason = %reason, "Account requires re-authorization");
    deps.store
        .set_account_status(account_id, AccountStatus::ActionRequired)
        .await?;
    audit(
        NewAuditEntry::new(
            deps.system_member_id,
            actions::ACCOUNT_ACTION_REQUIRED,
            targets::ACCOUNT,
            account_id,
        )
        .with_metadata(json!({ "reason": reason })),
        deps,
    )
    .await;
    Ok(RefreshOutcome::ActionRequired { reason })
}
