//! Kernel module - server infrastructure and dependencies.

pub mod ai;
pub mod approval;
pub mod deps;
pub mod jobs;
pub mod platform;
pub mod rate_limiter;
pub mod scheduled_tasks;
pub mod store;
pub mod test_dependencies;
pub mod traits;

/// Default model for post generation.
pub const GPT_4O: &str = "gpt-4o";

// Production adapters
pub use ai::RigTextGenerator;
pub use approval::{generate_review_token, WebhookApprovalChannel};
pub use platform::{HttpPlatformClient, PlatformError, PlatformErrorKind};

// Other exports
pub use deps::ServerDeps;
pub use rate_limiter::{RateLimitConfig, RateLimiter, Throttled};
pub use scheduled_tasks::start_scheduler;
pub use store::{PipelineStore, PostgresStore};
pub use test_dependencies::{MemoryStore, TestDependencies};
pub use traits::*;
