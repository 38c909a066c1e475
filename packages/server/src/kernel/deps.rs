//! Server dependencies for activities (using traits for testability)
//!
//! This module provides the central dependency container used by all domain activities.
//! All external services use trait abstractions to enable testing.

use std::sync::Arc;

use crate::common::utils::CredentialCipher;
use crate::common::MemberId;
use crate::config::PipelineConfig;
use crate::kernel::jobs::JobQueue;
use crate::kernel::rate_limiter::RateLimiter;
use crate::kernel::store::PipelineStore;
use crate::kernel::{
    BaseApprovalChannel, BaseEmbeddingService, BaseEngagementSource, BasePlatformClient,
    BaseTextGenerator,
};

// =============================================================================
// ServerDeps
// =============================================================================

/// Server dependencies accessible to activities and job handlers
#[derive(Clone)]
pub struct ServerDeps {
    /// Persistence for every domain (Postgres in production, memory in tests)
    pub store: Arc<dyn PipelineStore>,
    pub jobs: Arc<dyn JobQueue>,
    pub generator: Arc<dyn BaseTextGenerator>,
    pub embeddings: Arc<dyn BaseEmbeddingService>,
    pub approval: Arc<dyn BaseApprovalChannel>,
    pub platform: Arc<dyn BasePlatformClient>,
    pub engagement: Arc<dyn BaseEngagementSource>,
    pub cipher: Arc<CredentialCipher>,
    /// Shared by every platform call in this process
    pub rate_limiter: Arc<RateLimiter>,
    pub config: PipelineConfig,
    pub reviewer_id: MemberId,
    pub system_member_id: MemberId,
}

impl ServerDeps {
    /// Create new ServerDeps with the given dependencies
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn PipelineStore>,
        jobs: Arc<dyn JobQueue>,
        generator: Arc<dyn BaseTextGenerator>,
        embeddings: Arc<dyn BaseEmbeddingService>,
        approval: Arc<dyn BaseApprovalChannel>,
        platform: Arc<dyn BasePlatformClient>,
        engagement: Arc<dyn BaseEngagementSource>,
        cipher: Arc<CredentialCipher>,
        config: PipelineConfig,
        reviewer_id: MemberId,
        system_member_id: MemberId,
    ) -> Self {
        Self {
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            store,
            jobs,
            generator,
            embeddings,
            approval,
            platform,
            engagement,
            cipher,
            config,
            reviewer_id,
            system_member_id,
        }
    }
}
