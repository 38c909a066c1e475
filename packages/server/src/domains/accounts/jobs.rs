use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::activities::{refresh_account_token, RefreshOutcome};
use crate::common::AccountId;
use crate::kernel::jobs::{ClaimedJob, CommandMeta, JobContext, JobFailure, JobHandler};
use crate::kernel::ServerDeps;

pub const TOKEN_REFRESH_JOB: &str = "refresh_token";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRefreshJob {
    pub account_id: AccountId,
}

impl CommandMeta for TokenRefreshJob {
    fn command_type(&self) -> &'static str {
        TOKEN_REFRESH_JOB
    }

    fn idempotency_key(&self) -> Option<String> {
        Some(format!("{}:{}", TOKEN_REFRESH_JOB, self.account_id))
    }
}

pub struct TokenRefreshHandler {
    deps: Arc<ServerDeps>,
}

impl TokenRefreshHandler {
    pub fn new(deps: Arc<ServerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for TokenRefreshHandler {
    async fn handle(&self, job: &ClaimedJob, ctx: &JobContext) -> Result<(), JobFailure> {
        let command: TokenRefreshJob = job.deserialize().map_err(JobFailure::non_retryable)?;
        ctx.progress(10).await;

        match refresh_account_token(command.account_id, &self.deps).await? {
            RefreshOutcome::Refreshed { .. } | RefreshOutcome::NotNeeded => {
                ctx.progress(100).await;
                Ok(())
            }
            RefreshOutcome::ActionRequired { reason } => {
                Err(JobFailure::non_retryable(anyhow::anyhow!(reason)))
            }
        }
    }
}
