use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::activities::{publish_post, PublishOutcome};
use crate::common::{AccountId, PostId, RevisionId};
use crate::kernel::jobs::{ClaimedJob, CommandMeta, JobContext, JobFailure, JobHandler};
use crate::kernel::ServerDeps;

pub const PUBLISH_JOB: &str = "publish_post";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishJob {
    pub post_id: PostId,
    pub revision_id: RevisionId,
    /// Default account when absent
    #[serde(default)]
    pub account_id: Option<AccountId>,
}

impl CommandMeta for PublishJob {
    fn command_type(&self) -> &'static str {
        PUBLISH_JOB
    }

    fn idempotency_key(&self) -> Option<String> {
        Some(format!("{}:{}:{}", PUBLISH_JOB, self.post_id, self.revision_id))
    }
}

pub struct PublishHandler {
    deps: Arc<ServerDeps>,
}

impl PublishHandler {
    pub fn new(deps: Arc<ServerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for PublishHandler {
    async fn handle(&self, job: &ClaimedJob, ctx: &JobContext) -> Result<(), JobFailure> {
        let command: PublishJob = job.deserialize().map_err(JobFailure::non_retryable)?;

        match publish_post(&command, ctx.final_attempt, Some(ctx), &self.deps).await? {
            PublishOutcome::Published { .. }
            | PublishOutcome::AlreadyHandled(_)
            | PublishOutcome::Superseded { .. } => Ok(()),
            PublishOutcome::Reverted { error } => Err(JobFailure::retryable(error)),
            PublishOutcome::Rejected(status) => Err(JobFailure::non_retryable(anyhow::anyhow!(
                "post {} is {}, not APPROVED",
                command.post_id,
                status
            ))),
            PublishOutcome::Failed { code, message } => Err(JobFailure::non_retryable(
                anyhow::anyhow!("publish failed ({:?}): {}", code, message),
            )),
            PublishOutcome::ActionRequired { reason } => {
                Err(JobFailure::non_retryable(anyhow::anyhow!(reason)))
            }
            PublishOutcome::PublishedUnrecorded { external_id, error } => {
                Err(JobFailure::non_retryable(anyhow::anyhow!(
                    "published as {} but not recorded: {}",
                    external_id,
                    error
                )))
            }
        }
    }
}
