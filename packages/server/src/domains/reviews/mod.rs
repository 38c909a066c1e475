pub mod activities;
pub mod models;
pub mod store;

pub use activities::{apply_review_decision, expire_stale_reviews, request_regeneration, ReviewOutcome};
pub use models::{ReviewDecision, ReviewError, ReviewRequest, ReviewStatus};
pub use store::ReviewStore;
