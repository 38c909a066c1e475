// Text generation using OpenAI through rig
//
// This is the infrastructure implementation of BaseTextGenerator.
// What to prompt for lives in the generation domain.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::providers::openai;

use super::traits::{BaseTextGenerator, Generated};

const PREAMBLE: &str = "You write short social media posts for a single author. \
                        Reply with the post text only, without quotes or commentary.";

/// OpenAI implementation of post generation
#[derive(Clone)]
pub struct RigTextGenerator {
    client: openai::Client,
    default_model: String,
    max_tokens: u64,
}

impl RigTextGenerator {
    pub fn new(api_key: &str, default_model: impl Into<String>) -> Self {
        Self {
            client: openai::Client::new(api_key),
            default_model: default_model.into(),
            max_tokens: 400,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl BaseTextGenerator for RigTextGenerator {
    async fn generate(&self, prompt: &str, engine: Option<&str>) -> Result<Generated> {
        let model = engine
            .filter(|e| !e.trim().is_empty())
            .unwrap_or(&self.default_model);

        tracing::debug!(prompt_length = prompt.len(), model, "Building generation agent");

        let agent = self
            .client
            .agent(model)
            .preamble(PREAMBLE)
            .max_tokens(self.max_tokens)
            .build();

        let text = agent
            .prompt(prompt)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, model, "Generation call failed");
                e
            })
            .context("Failed to call OpenAI API")?;

        tracing::info!(response_length = text.len(), model, "Generation response received");

        Ok(Generated {
            text,
            engine: model.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires API key
    async fn generates_a_post() {
        let api_key = std::env::var("OPENAI_API_KEY")
            .expect("OPENAI_API_KEY must be set for integration tests");

        let generator = RigTextGenerator::new(&api_key, "gpt-4o");
        let generated = generator
            .generate("Write one sentence about code review.", None)
            .await
            .expect("generation should succeed");

        assert!(!generated.text.is_empty());
        assert_eq!(generated.engine, "gpt-4o");
    }
}
