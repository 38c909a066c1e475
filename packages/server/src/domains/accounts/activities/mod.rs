mod refresh;
mod scan;

pub use refresh::{refresh_account_token, RefreshOutcome};
pub use scan::scan_expiring_tokens;
