pub mod activities;
pub mod jobs;
pub mod policy;
pub mod prompt;
pub mod similarity_guard;

pub use activities::{
    generate_post, recover_stalled_generations, GenerateError, GenerateOutcome, MAX_RETRIES,
};
pub use jobs::{GenerateHandler, GenerateJob, GENERATE_JOB};
pub use policy::{ContentPolicy, PolicyViolation};
pub use similarity_guard::{SimilarityConfig, SimilarityGuard, SimilarityHit, SimilarityReport};
