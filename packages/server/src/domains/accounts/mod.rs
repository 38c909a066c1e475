pub mod activities;
pub mod jobs;
pub mod models;
pub mod store;

use chrono::Duration;

pub use activities::{refresh_account_token, scan_expiring_tokens, RefreshOutcome};
pub use jobs::{TokenRefreshHandler, TokenRefreshJob, TOKEN_REFRESH_JOB};
pub use models::{Account, AccountStatus, NewAccount};
pub use store::AccountStore;

#[derive(Debug, Clone)]
pub struct TokenRefreshConfig {
    /// Refresh tokens expiring within this window
    pub expiry_window: Duration,
    /// Skip accounts refreshed more recently than this
    pub refresh_threshold: Duration,
}

impl Default for TokenRefreshConfig {
    fn default() -> Self {
        Self {
            expiry_window: Duration::days(7),
            refresh_threshold: Duration::hours(24),
        }
    }
}
