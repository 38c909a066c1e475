use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::activities::{generate_post, GenerateError};
use crate::common::{EntryId, MemberId, PostId};
use crate::kernel::jobs::{ClaimedJob, CommandMeta, JobContext, JobFailure, JobHandler};
use crate::kernel::ServerDeps;

pub const GENERATE_JOB: &str = "generate_post";

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct GenerateJob {
    pub post_id: PostId,
    pub created_by: MemberId,
    /// Overrides the arm / default prompt
    #[builder(default, setter(into))]
    #[serde(default)]
    pub style_prompt: Option<String>,
    #[builder(default, setter(into))]
    #[serde(default)]
    pub topic: Option<String>,
    #[builder(default)]
    #[serde(default)]
    pub keywords: Vec<String>,
    #[builder(default, setter(into))]
    #[serde(default)]
    pub engine: Option<String>,
    #[builder(default)]
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[builder(default)]
    #[serde(default)]
    pub schedule_entry_id: Option<EntryId>,
}

impl CommandMeta for GenerateJob {
    fn command_type(&self) -> &'static str {
        GENERATE_JOB
    }

    fn idempotency_key(&self) -> Option<String> {
        Some(format!("{}:{}", GENERATE_JOB, self.post_id))
    }
}

pub struct GenerateHandler {
    deps: Arc<ServerDeps>,
}

impl GenerateHandler {
    pub fn new(deps: Arc<ServerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for GenerateHandler {
    async fn handle(&self, job: &ClaimedJob, ctx: &JobContext) -> Result<(), JobFailure> {
        let command: GenerateJob = job.deserialize().map_err(JobFailure::non_retryable)?;

        match generate_post(&command, Some(ctx), &self.deps).await {
            Ok(_) => Ok(()),
            // Post already marked FAILED; a retry would start from the wrong state.
            Err(GenerateError::Generation(message)) => {
                Err(JobFailure::non_retryable(anyhow::anyhow!(message)))
            }
            Err(GenerateError::Infrastructure(e)) => Err(JobFailure::retryable(e)),
        }
    }
}
