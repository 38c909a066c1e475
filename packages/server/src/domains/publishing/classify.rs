//! Platform failure -> post outcome.

use crate::domains::posts::PostErrorCode;
use crate::kernel::{PlatformError, PlatformErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// PUBLISHING -> APPROVED; the queue retries the job
    Revert(PostErrorCode),
    /// PUBLISHING -> FAILED, no retry
    Fail(PostErrorCode),
}

pub fn error_code_for(kind: PlatformErrorKind) -> PostErrorCode {
    match kind {
        PlatformErrorKind::TokenExpired => PostErrorCode::TokenExpired,
        PlatformErrorKind::Permission => PostErrorCode::PermissionError,
        PlatformErrorKind::RateLimited | PlatformErrorKind::QuotaExceeded => PostErrorCode::RateLimit,
        PlatformErrorKind::Network
        | PlatformErrorKind::Timeout
        | PlatformErrorKind::ServerUnavailable => PostErrorCode::NetworkError,
        PlatformErrorKind::Unknown => PostErrorCode::UnknownError,
    }
}

/// Transient errors revert unless this was the job's last attempt.
pub fn classify(error: &PlatformError, final_attempt: bool) -> FailureAction {
    let code = error_code_for(error.kind);
    if error.is_transient() && !final_attempt {
        FailureAction::Revert(code)
    } else {
        FailureAction::Fail(code)
    }
}
