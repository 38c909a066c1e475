// Common types and utilities shared across the pipeline

pub mod entity_ids;
pub mod id;
pub mod non_critical;
pub mod utils;

pub use entity_ids::*;
pub use id::{Id, V4, V7};
pub use non_critical::{NonCritical, NonCriticalOutcome};
