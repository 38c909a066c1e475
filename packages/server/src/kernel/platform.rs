//! Social platform API client and its typed error.
//!
//! `PlatformError::kind` is set where the failure is observed (HTTP status,
//! reqwest error class). `PlatformError::from_message` infers a kind from free
//! text and exists only for upstream errors that arrive untyped.

use std::fmt;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::rate_limiter::Throttled;
use super::traits::{
    BaseEngagementSource, BasePlatformClient, EngagementMetrics, PublishedPost, RefreshedToken,
};
use crate::domains::accounts::models::Account;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformErrorKind {
    Network,
    Timeout,
    /// HTTP 429 or an explicit rate-limit response
    RateLimited,
    /// 502 / 503 / 504
    ServerUnavailable,
    TokenExpired,
    Permission,
    /// Account-level posting quota exhausted; waiting minutes will not help
    QuotaExceeded,
    Unknown,
}

impl PlatformErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformErrorKind::Network => "network",
            PlatformErrorKind::Timeout => "timeout",
            PlatformErrorKind::RateLimited => "rate_limited",
            PlatformErrorKind::ServerUnavailable => "server_unavailable",
            PlatformErrorKind::TokenExpired => "token_expired",
            PlatformErrorKind::Permission => "permission",
            PlatformErrorKind::QuotaExceeded => "quota_exceeded",
            PlatformErrorKind::Unknown => "unknown",
        }
    }

    /// Worth retrying the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformErrorKind::Network
                | PlatformErrorKind::Timeout
                | PlatformErrorKind::RateLimited
                | PlatformErrorKind::ServerUnavailable
        )
    }
}

impl fmt::Display for PlatformErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("platform error ({kind}): {message}")]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

impl PlatformError {
    pub fn new(kind: PlatformErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn from_status(status: StatusCode, body: impl Into<String>) -> Self {
        let body = body.into();
        let kind = match status.as_u16() {
            429 => PlatformErrorKind::RateLimited,
            502..=504 => PlatformErrorKind::ServerUnavailable,
            401 => PlatformErrorKind::TokenExpired,
            403 => PlatformErrorKind::Permission,
            // Some error payloads only say what happened in the body.
            _ => Self::infer_kind(&body),
        };
        Self {
            kind,
            message: body,
            status: Some(status.as_u16()),
        }
    }

    /// Fallback classification for untyped upstream errors.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(Self::infer_kind(&message), message)
    }

    fn infer_kind(message: &str) -> PlatformErrorKind {
        let lower = message.to_ascii_lowercase();
        let has = |needle: &str| lower.contains(needle);

        if has("quota") {
            PlatformErrorKind::QuotaExceeded
        } else if has("rate limit") || has("429") {
            PlatformErrorKind::RateLimited
        } else if has("etimedout") || has("timeout") || has("timed out") {
            PlatformErrorKind::Timeout
        } else if has("econnreset") || has("connection reset") || has("network") {
            PlatformErrorKind::Network
        } else if has("502") || has("503") || has("504") {
            PlatformErrorKind::ServerUnavailable
        } else if has("token expired") || has("invalid token") || has("401") {
            PlatformErrorKind::TokenExpired
        } else if has("permission") || has("403") {
            PlatformErrorKind::Permission
        } else {
            PlatformErrorKind::Unknown
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl Throttled for PlatformError {
    fn is_throttled(&self) -> bool {
        self.kind == PlatformErrorKind::RateLimited
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            PlatformErrorKind::Timeout
        } else if e.is_connect() || e.is_request() {
            PlatformErrorKind::Network
        } else if let Some(status) = e.status() {
            return Self::from_status(status, e.to_string());
        } else {
            PlatformErrorKind::Unknown
        };
        Self::new(kind, e.to_string())
    }
}

// =============================================================================
// HTTP client
// =============================================================================

/// Threads-style Graph API client.
pub struct HttpPlatformClient {
    client: Client,
    base_url: String,
    app_secret: String,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PermalinkResponse {
    permalink: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct InsightsResponse {
    data: Vec<InsightValue>,
}

#[derive(Debug, Deserialize)]
struct InsightValue {
    name: String,
    #[serde(default)]
    values: Vec<InsightPoint>,
}

#[derive(Debug, Deserialize)]
struct InsightPoint {
    value: i64,
}

impl HttpPlatformClient {
    pub fn new(base_url: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            app_secret: app_secret.into(),
        }
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PlatformError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::from_status(status, body));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| PlatformError::new(PlatformErrorKind::Unknown, e.to_string()))
    }
}

#[async_trait]
impl BasePlatformClient for HttpPlatformClient {
    async fn create_post(
        &self,
        account: &Account,
        access_token: &str,
        content: &str,
    ) -> Result<PublishedPost, PlatformError> {
        // Two-step publish: create a media container, then publish it.
        let container: IdResponse = self
            .send_json(
                self.client
                    .post(format!("{}/{}/threads", self.base_url, account.external_user_id))
                    .bearer_auth(access_token)
                    .form(&[("media_type", "TEXT"), ("text", content)]),
            )
            .await?;

        let published: IdResponse = self
            .send_json(
                self.client
                    .post(format!(
                        "{}/{}/threads_publish",
                        self.base_url, account.external_user_id
                    ))
                    .bearer_auth(access_token)
                    .form(&[("creation_id", container.id.as_str())]),
            )
            .await?;

        // The permalink lookup is cosmetic; a failure here must not turn a
        // published post into an error.
        let permalink = match self
            .send_json::<PermalinkResponse>(
                self.client
                    .get(format!("{}/{}", self.base_url, published.id))
                    .bearer_auth(access_token)
                    .query(&[("fields", "permalink")]),
            )
            .await
        {
            Ok(body) => body.permalink,
            Err(e) => {
                debug!(external_id = %published.id, error = %e, "Permalink lookup failed");
                None
            }
        };

        Ok(PublishedPost {
            external_id: published.id,
            permalink,
        })
    }

    async fn refresh_token(&self, access_token: &str) -> Result<RefreshedToken, PlatformError> {
        let body: TokenResponse = self
            .send_json(
                self.client
                    .get(format!("{}/refresh_access_token", self.base_url))
                    .query(&[
                        ("grant_type", "th_refresh_token"),
                        ("access_token", access_token),
                    ]),
            )
            .await?;

        Ok(RefreshedToken {
            access_token: body.access_token,
            expires_at: Utc::now() + Duration::seconds(body.expires_in),
        })
    }
}

#[async_trait]
impl BaseEngagementSource for HttpPlatformClient {
    async fn fetch_metrics(&self, external_id: &str) -> anyhow::Result<EngagementMetrics> {
        let body: InsightsResponse = self
            .send_json(
                self.client
                    .get(format!("{}/{}/insights", self.base_url, external_id))
                    .bearer_auth(&self.app_secret)
                    .query(&[("metric", "views,likes,replies,reposts")]),
            )
            .await?;

        let mut metrics = EngagementMetrics::default();
        for insight in body.data {
            let value = insight.values.first().map(|p| p.value).unwrap_or(0);
            match insight.name.as_str() {
                "views" => metrics.views = value,
                "likes" => metrics.likes = value,
                "replies" => metrics.replies = value,
                "reposts" => metrics.reposts = value,
                _ => {}
            }
        }
        Ok(metrics)
    }
}
