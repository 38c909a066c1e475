pub mod activities;
pub mod classify;
pub mod jobs;

pub use activities::{publish_post, PublishOutcome};
pub use classify::{classify, error_code_for, FailureAction};
pub use jobs::{PublishHandler, PublishJob, PUBLISH_JOB};
