// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Deciding what to prompt for, when to publish, and how to react to failures
// lives in the domain activities that call through these traits.
//
// Naming convention: Base* for trait names (e.g., BaseTextGenerator, BasePlatformClient)

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{MemberId, PostId, RevisionId};
use crate::domains::accounts::models::Account;
use crate::domains::reviews::models::ReviewRequest;
use crate::kernel::platform::PlatformError;

// =============================================================================
// Text Generation Trait
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub text: String,
    /// Engine that actually served the request (recorded on the revision)
    pub engine: String,
}

#[async_trait]
pub trait BaseTextGenerator: Send + Sync {
    /// Generate post text. `engine` of None uses the generator's default.
    async fn generate(&self, prompt: &str, engine: Option<&str>) -> Result<Generated>;
}

// =============================================================================
// Embedding Service Trait
// =============================================================================

#[async_trait]
pub trait BaseEmbeddingService: Send + Sync {
    async fn generate(&self, text: &str) -> Result<Vec<f32>>;
}

// =============================================================================
// Approval Channel Trait (human review hand-off)
// =============================================================================

#[async_trait]
pub trait BaseApprovalChannel: Send + Sync {
    /// Notify a reviewer and return the single-use request they will answer.
    /// The caller persists the returned request.
    async fn request_review(
        &self,
        reviewer: MemberId,
        post_id: PostId,
        revision_id: RevisionId,
        content: &str,
    ) -> Result<ReviewRequest>;
}

// =============================================================================
// Platform Client Trait (rate-limited external API)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPost {
    pub external_id: String,
    pub permalink: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Calls return the typed `PlatformError` so callers can classify failures
/// without parsing messages.
#[async_trait]
pub trait BasePlatformClient: Send + Sync {
    async fn create_post(
        &self,
        account: &Account,
        access_token: &str,
        content: &str,
    ) -> Result<PublishedPost, PlatformError>;

    async fn refresh_token(&self, access_token: &str) -> Result<RefreshedToken, PlatformError>;
}

// =============================================================================
// Engagement Source Trait
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub views: i64,
    pub likes: i64,
    pub replies: i64,
    pub reposts: i64,
}

#[async_trait]
pub trait BaseEngagementSource: Send + Sync {
    async fn fetch_metrics(&self, external_id: &str) -> Result<EngagementMetrics>;
}
