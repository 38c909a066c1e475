//! Review hand-off over an outgoing webhook.
//!
//! The webhook receives the draft plus a single-use token; the reviewer answers
//! through `autopost review <token> <decision>` or whatever front end relays it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use super::traits::BaseApprovalChannel;
use crate::common::{MemberId, PostId, RevisionId};
use crate::domains::reviews::ReviewRequest;

const TOKEN_BYTES: usize = 24;

/// URL-safe random review token.
pub fn generate_review_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub struct WebhookApprovalChannel {
    client: Client,
    webhook_url: String,
    ttl: Duration,
}

#[derive(Debug, Serialize)]
struct ReviewPayload<'a> {
    reviewer_id: MemberId,
    post_id: PostId,
    revision_id: RevisionId,
    token: &'a str,
    content: &'a str,
    expires_at: chrono::DateTime<Utc>,
    decisions: [&'static str; 3],
}

impl WebhookApprovalChannel {
    pub fn new(webhook_url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            client: Client::new(),
            webhook_url: webhook_url.into(),
            ttl,
        }
    }
}

#[async_trait]
impl BaseApprovalChannel for WebhookApprovalChannel {
    async fn request_review(
        &self,
        reviewer: MemberId,
        post_id: PostId,
        revision_id: RevisionId,
        content: &str,
    ) -> Result<ReviewRequest> {
        let token = generate_review_token();
        let expires_at = Utc::now() + self.ttl;

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&ReviewPayload {
                reviewer_id: reviewer,
                post_id,
                revision_id,
                token: &token,
                content,
                expires_at,
                decisions: ["APPROVE", "REGENERATE", "SKIP"],
            })
            .send()
            .await
            .context("Failed to send review webhook")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Review webhook error {}: {}", status, body);
        }

        info!(post_id = %post_id, reviewer = %reviewer, "Review requested");
        Ok(ReviewRequest::new(post_id, revision_id, reviewer, token, expires_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_url_safe_and_unique() {
        let a = generate_review_token();
        let b = generate_review_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
