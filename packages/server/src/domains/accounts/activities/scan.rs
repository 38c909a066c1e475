use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info};

use crate::domains::accounts::jobs::TokenRefreshJob;
use crate::kernel::jobs::JobQueueExt;
use crate::kernel::ServerDeps;

/// Enqueue one refresh job per account whose token is close to expiry.
/// Returns the number of jobs created (duplicates of active jobs are not counted).
pub async fn scan_expiring_tokens(deps: &ServerDeps) -> Result<usize> {
    let config = &deps.config.token_refresh;
    let now = Utc::now();
    let accounts = deps
        .store
        .accounts_due_for_refresh(now + config.expiry_window, now - config.refresh_threshold)
        .await?;

    let mut created = 0;
    for account in &accounts {
        let result = deps
            .jobs
            .enqueue(TokenRefreshJob {
                account_id: account.id,
            })
            .await?;
        if result.is_created() {
            created += 1;
        } else {
            debug!(account_id = %account.id, "Refresh already queued");
        }
    }

    info!(due = accounts.len(), enqueued = created, "Token refresh scan complete");
    Ok(created)
}
