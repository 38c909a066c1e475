//! Typed ids for every persisted entity.

pub use super::id::{Id, V4, V7};

// ============================================================================
// Entity markers
// ============================================================================

/// Human or system principal (creators, reviewers, approvers).
pub struct Member;

pub struct Post;

pub struct PostRevision;

/// Prompt template competing in the bandit.
pub struct ScheduleArm;

pub struct TimeSlot;

pub struct ScheduleEntry;

pub struct ReviewRequest;

/// Publishing account on the external platform.
pub struct Account;

pub struct AuditLog;

// ============================================================================
// Aliases
// ============================================================================

pub type MemberId = Id<Member>;
pub type PostId = Id<Post>;
pub type RevisionId = Id<PostRevision>;
pub type ArmId = Id<ScheduleArm>;
pub type SlotId = Id<TimeSlot>;
pub type EntryId = Id<ScheduleEntry>;
pub type ReviewRequestId = Id<ReviewRequest>;
pub type AccountId = Id<Account>;
pub type AuditLogId = Id<AuditLog>;
