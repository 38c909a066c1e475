use anyhow::{Context, Result};
use chrono::Duration;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;

use crate::common::MemberId;
use crate::domains::accounts::TokenRefreshConfig;
use crate::domains::generation::{ContentPolicy, SimilarityConfig};
use crate::domains::schedules::BanditConfig;
use crate::kernel::jobs::QueueConfig;
use crate::kernel::{RateLimitConfig, GPT_4O};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub openai_api_key: String,
    pub platform_api_base: String,
    pub platform_app_secret: String,
    /// Base64-encoded 32-byte key for credentials at rest
    pub credential_key: String,
    pub approval_webhook_url: String,
    /// Member that receives review requests
    pub reviewer_id: MemberId,
    /// Actor recorded on scheduler-created posts and audit entries
    pub system_member_id: MemberId,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let mut pipeline = PipelineConfig::default();
        if let Some(limit) = optional_env::<usize>("RATE_LIMIT_PER_HOUR")? {
            pipeline.rate_limit.max_calls = limit;
        }
        if let Some(threshold) = optional_env::<f64>("SIMILARITY_THRESHOLD")? {
            pipeline.similarity.threshold = threshold;
        }
        if let Some(posts) = optional_env::<usize>("POSTS_PER_DAY")? {
            pipeline.posts_per_day = posts;
        }
        if let Some(prompt) = env::var("DEFAULT_PROMPT").ok().filter(|p| !p.trim().is_empty()) {
            pipeline.default_prompt = prompt;
        }
        if let Some(engine) = env::var("GENERATION_ENGINE").ok().filter(|e| !e.trim().is_empty()) {
            pipeline.default_engine = engine;
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: optional_env("DATABASE_MAX_CONNECTIONS")?.unwrap_or(5),
            openai_api_key: env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?,
            platform_api_base: env::var("PLATFORM_API_BASE")
                .unwrap_or_else(|_| "https://graph.threads.net/v1.0".to_string()),
            platform_app_secret: env::var("PLATFORM_APP_SECRET")
                .context("PLATFORM_APP_SECRET must be set")?,
            credential_key: env::var("CREDENTIAL_KEY").context("CREDENTIAL_KEY must be set")?,
            approval_webhook_url: env::var("APPROVAL_WEBHOOK_URL")
                .context("APPROVAL_WEBHOOK_URL must be set")?,
            reviewer_id: MemberId::parse(
                &env::var("REVIEWER_ID").context("REVIEWER_ID must be set")?,
            )
            .context("REVIEWER_ID must be a UUID")?,
            system_member_id: match env::var("SYSTEM_MEMBER_ID") {
                Ok(raw) => MemberId::parse(&raw).context("SYSTEM_MEMBER_ID must be a UUID")?,
                Err(_) => MemberId::nil(),
            },
            pipeline,
        })
    }
}

fn optional_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{} has an invalid value: {:?}", name, raw)),
        Err(_) => Ok(None),
    }
}

/// Pipeline tunables. Defaults are the production values.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub rate_limit: RateLimitConfig,
    pub similarity: SimilarityConfig,
    pub policy: ContentPolicy,
    pub bandit: BanditConfig,
    pub token_refresh: TokenRefreshConfig,
    pub generate_queue: QueueConfig,
    pub publish_queue: QueueConfig,
    pub token_refresh_queue: QueueConfig,
    pub default_prompt: String,
    pub default_engine: String,
    pub posts_per_day: usize,
    /// How long before the slot the generate job runs
    pub generation_lead: Duration,
    /// A post left in GENERATING this long is presumed abandoned by its worker
    pub generation_stall_timeout: Duration,
    pub review_ttl: Duration,
    /// Minimum post age before engagement is turned into a reward
    pub reward_delay: Duration,
    pub exemplar_limit: i64,
    pub recent_content_limit: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            similarity: SimilarityConfig::default(),
            policy: ContentPolicy::default(),
            bandit: BanditConfig::default(),
            token_refresh: TokenRefreshConfig::default(),
            generate_queue: QueueConfig::new(crate::domains::generation::GENERATE_JOB, 2, 10),
            publish_queue: QueueConfig::new(crate::domains::publishing::PUBLISH_JOB, 1, 5),
            token_refresh_queue: QueueConfig::new(
                crate::domains::accounts::TOKEN_REFRESH_JOB,
                1,
                10,
            ),
            default_prompt: "Write a short, conversational post sharing one practical insight \
                             from building software products. No more than one hashtag."
                .to_string(),
            default_engine: GPT_4O.to_string(),
            posts_per_day: 3,
            generation_lead: Duration::hours(2),
            generation_stall_timeout: Duration::minutes(30),
            review_ttl: Duration::hours(48),
            reward_delay: Duration::hours(24),
            exemplar_limit: 3,
            recent_content_limit: 15,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_defaults_match_worker_caps() {
        let config = PipelineConfig::default();
        assert_eq!(config.generate_queue.concurrency, 2);
        assert_eq!(config.generate_queue.jobs_per_minute, 10);
        assert_eq!(config.publish_queue.concurrency, 1);
        assert_eq!(config.publish_queue.jobs_per_minute, 5);
        assert_eq!(config.token_refresh_queue.concurrency, 1);
        assert_eq!(config.token_refresh_queue.jobs_per_minute, 10);
    }

    #[test]
    fn rate_limit_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.rate_limit.max_calls, 200);
        assert_eq!(config.rate_limit.max_retries, 3);
    }
}
