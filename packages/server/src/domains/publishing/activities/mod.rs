mod publish_post;

pub use publish_post::{publish_post, PublishOutcome};
