mod generate_post;
mod recover;

pub use generate_post::{generate_post, GenerateError, GenerateOutcome, MAX_RETRIES};
pub use recover::recover_stalled_generations;
