mod decide;
mod expire;

pub use decide::{apply_review_decision, request_regeneration, ReviewOutcome};
pub use expire::expire_stale_reviews;
