use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::domains::audit::{actions, audit, targets, NewAuditEntry};
use crate::domains::posts::Post;
use crate::domains::schedules::bandit::reward_from_metrics;
use crate::domains::schedules::models::NewReward;
use crate::kernel::{EngagementMetrics, ServerDeps};

/// Posts scored per sync run.
const SYNC_BATCH: i64 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub rewarded: usize,
    pub already_rewarded: usize,
    pub failed: usize,
}

/// Turn a post's engagement into a reward for its arm.
/// Returns None when the post has no arm or was already rewarded.
pub async fn ingest_reward(
    post: &Post,
    metrics: EngagementMetrics,
    deps: &ServerDeps,
) -> Result<Option<f64>> {
    let Some(arm_id) = post.arm_id else {
        debug!(post_id = %post.id, "Post has no arm, no reward");
        return Ok(None);
    };

    let reward = reward_from_metrics(&metrics);
    let recorded = deps
        .store
        .record_reward(NewReward {
            post_id: post.id,
            arm_id,
            reward,
            metrics,
        })
        .await?;
    if !recorded {
        return Ok(None);
    }

    info!(post_id = %post.id, arm_id = %arm_id, reward, views = metrics.views, "Reward ingested");
    audit(
        NewAuditEntry::new(deps.system_member_id, actions::ARM_REWARDED, targets::POST, post.id)
            .with_metadata(json!({ "arm_id": arm_id, "reward": reward, "metrics": metrics })),
        deps,
    )
    .await;
    Ok(Some(reward))
}

/// Pull metrics for posts old enough to score and feed them to the bandit.
pub async fn sync_engagement(deps: &ServerDeps) -> Result<SyncSummary> {
    let posted_before = Utc::now() - deps.config.reward_delay;
    let posts = deps
        .store
        .posts_awaiting_reward(posted_before, SYNC_BATCH)
        .await?;

    let mut summary = SyncSummary::default();
    for post in &posts {
        let metrics = async {
            let external_id = post
                .external_media_id
                .as_deref()
                .context("posted without external id")?;
            deps.engagement.fetch_metrics(external_id).await
        }
        .await;

        let metrics = match metrics {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(post_id = %post.id, error = %e, "Engagement fetch failed");
                summary.failed += 1;
                continue;
            }
        };

        match ingest_reward(post, metrics, deps).await {
            Ok(Some(_)) => summary.rewarded += 1,
            Ok(None) => summary.already_rewarded += 1,
            Err(e) => {
                error!(post_id = %post.id, error = %e, "Reward ingestion failed");
                summary.failed += 1;
            }
        }
    }

    info!(
        candidates = posts.len(),
        rewarded = summary.rewarded,
        failed = summary.failed,
        "Engagement sync complete"
    );
    Ok(summary)
}
