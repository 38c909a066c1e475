//! Post lifecycle.
//!
//! ```text
//! DRAFT ─► GENERATING ─► PENDING_REVIEW ─► APPROVED ─► PUBLISHING ─► POSTED
//!   ▲          │              │   │           │  │          │
//!   │          ▼              │   ▼           │  ▼          ├─► FAILED
//!   │        FAILED           │ SKIPPED ◄─────┘  DRAFT      ├─► ACTION_REQUIRED
//!   └─────────────────────────┘ (regenerate)                └─► APPROVED (transient)
//! ```
//!
//! PUBLISHING and POSTED are guard states: a worker that finds a post in
//! either one for the action it is about to take must do nothing.

use serde::{Deserialize, Serialize};

use crate::common::PostId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "post_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostStatus {
    Draft,
    Generating,
    PendingReview,
    Approved,
    Publishing,
    Posted,
    Failed,
    ActionRequired,
    Skipped,
}

impl PostStatus {
    /// Every legal next state.
    pub fn allowed_next(self) -> &'static [PostStatus] {
        use PostStatus::*;
        match self {
            Draft => &[Generating],
            Generating => &[PendingReview, Failed],
            PendingReview => &[Approved, Skipped, Draft],
            Approved => &[Publishing, Skipped, Draft],
            Publishing => &[Posted, Failed, ActionRequired, Approved],
            Posted | Failed | ActionRequired | Skipped => &[],
        }
    }

    pub fn can_transition_to(self, next: PostStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn transition_to(self, next: PostStatus) -> Result<PostStatus, LifecycleError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(LifecycleError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn is_guard(self) -> bool {
        matches!(self, PostStatus::Publishing | PostStatus::Posted)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PostStatus::Draft => "DRAFT",
            PostStatus::Generating => "GENERATING",
            PostStatus::PendingReview => "PENDING_REVIEW",
            PostStatus::Approved => "APPROVED",
            PostStatus::Publishing => "PUBLISHING",
            PostStatus::Posted => "POSTED",
            PostStatus::Failed => "FAILED",
            PostStatus::ActionRequired => "ACTION_REQUIRED",
            PostStatus::Skipped => "SKIPPED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("illegal post transition {from} -> {to}")]
    IllegalTransition { from: PostStatus, to: PostStatus },
    #[error("post {post_id} is no longer {expected}")]
    StaleStatus {
        post_id: PostId,
        expected: PostStatus,
    },
    #[error("post {0} not found")]
    NotFound(PostId),
}

/// Error codes stored on failed posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "post_error_code", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostErrorCode {
    GenerationError,
    TokenExpired,
    PermissionError,
    RateLimit,
    NetworkError,
    UnknownError,
    /// Published externally but bookkeeping failed
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostError {
    pub code: PostErrorCode,
    pub message: String,
}

impl PostError {
    pub fn new(code: PostErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A status change guarded by the expected current status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub from: PostStatus,
    pub to: PostStatus,
    /// Recorded as the post's last error when present
    pub error: Option<PostError>,
}

impl StatusChange {
    pub fn new(from: PostStatus, to: PostStatus) -> Self {
        Self {
            from,
            to,
            error: None,
        }
    }

    pub fn with_error(mut self, code: PostErrorCode, message: impl Into<String>) -> Self {
        self.error = Some(PostError::new(code, message));
        self
    }

    pub fn validate(&self) -> Result<(), LifecycleError> {
        self.from.transition_to(self.to).map(|_| ())
    }
}

/// Critical-section entry points. Each one is a single transactional
/// read-and-advance on the post row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimAction {
    /// DRAFT -> GENERATING
    Generate,
    /// APPROVED -> PUBLISHING
    Publish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Status advanced; the caller owns the action.
    Claimed,
    /// Another worker already performed or is performing the action.
    AlreadyHandled(PostStatus),
    /// The post is in a state this action cannot start from.
    Rejected(PostStatus),
}

impl ClaimAction {
    pub fn target(self) -> PostStatus {
        match self {
            ClaimAction::Generate => PostStatus::Generating,
            ClaimAction::Publish => PostStatus::Publishing,
        }
    }

    pub fn decide(self, current: PostStatus) -> ClaimOutcome {
        match (self, current) {
            (ClaimAction::Generate, PostStatus::Draft) => ClaimOutcome::Claimed,
            (ClaimAction::Publish, PostStatus::Approved) => ClaimOutcome::Claimed,
            (ClaimAction::Publish, status) if status.is_guard() => {
                ClaimOutcome::AlreadyHandled(status)
            }
            (ClaimAction::Generate, status)
                if matches!(status, PostStatus::Generating | PostStatus::PendingReview)
                    || status.is_guard() =>
            {
                ClaimOutcome::AlreadyHandled(status)
            }
            (_, status) => ClaimOutcome::Rejected(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PostStatus::*;

    const ALL: [PostStatus; 9] = [
        Draft,
        Generating,
        PendingReview,
        Approved,
        Publishing,
        Posted,
        Failed,
        ActionRequired,
        Skipped,
    ];

    #[test]
    fn forward_path_is_legal() {
        let path = [Draft, Generating, PendingReview, Approved, Publishing, Posted];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn only_listed_backward_edges_exist() {
        assert!(Approved.can_transition_to(Draft));
        assert!(PendingReview.can_transition_to(Draft));
        assert!(Publishing.can_transition_to(Approved));

        assert!(!Posted.can_transition_to(Publishing));
        assert!(!Publishing.can_transition_to(Draft));
        assert!(!Generating.can_transition_to(Draft));
        assert!(!Failed.can_transition_to(Draft));
    }

    #[test]
    fn skipped_only_from_review_or_approved() {
        for status in ALL {
            let expected = matches!(status, PendingReview | Approved);
            assert_eq!(status.can_transition_to(Skipped), expected, "{status}");
        }
    }

    #[test]
    fn illegal_transition_is_typed_error() {
        assert_eq!(
            Posted.transition_to(Draft),
            Err(LifecycleError::IllegalTransition { from: Posted, to: Draft })
        );
        assert_eq!(Approved.transition_to(Publishing), Ok(Publishing));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for status in [Posted, Failed, ActionRequired, Skipped] {
            assert!(status.is_terminal());
        }
        assert!(!Publishing.is_terminal());
    }

    #[test]
    fn publish_claim_decisions() {
        assert_eq!(ClaimAction::Publish.decide(Approved), ClaimOutcome::Claimed);
        assert_eq!(
            ClaimAction::Publish.decide(Publishing),
            ClaimOutcome::AlreadyHandled(Publishing)
        );
        assert_eq!(
            ClaimAction::Publish.decide(Posted),
            ClaimOutcome::AlreadyHandled(Posted)
        );
        for status in [Draft, Generating, PendingReview, Failed, ActionRequired, Skipped] {
            assert_eq!(ClaimAction::Publish.decide(status), ClaimOutcome::Rejected(status));
        }
    }

    #[test]
    fn generate_claim_decisions() {
        assert_eq!(ClaimAction::Generate.decide(Draft), ClaimOutcome::Claimed);
        assert_eq!(
            ClaimAction::Generate.decide(Generating),
            ClaimOutcome::AlreadyHandled(Generating)
        );
        assert_eq!(
            ClaimAction::Generate.decide(Skipped),
            ClaimOutcome::Rejected(Skipped)
        );
    }

    #[test]
    fn claim_targets_are_legal_edges() {
        assert!(Draft.can_transition_to(ClaimAction::Generate.target()));
        assert!(Approved.can_transition_to(ClaimAction::Publish.target()));
    }
}
