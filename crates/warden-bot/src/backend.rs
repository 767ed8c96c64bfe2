//! Generative-language backend: one completion per support-session turn.
//!
//! The handler depends on the [`SupportBackend`] trait; production wires in
//! [`TherapistBackend`], a rig agent against an OpenAI-compatible endpoint.
//! The full transcript window is re-sent on every turn; there is no
//! backend-side session state and no streaming.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;

use crate::config::LlmEndpoint;
use crate::prompts;

/// The completion backend a support turn runs against.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SupportBackend: Send + Sync {
    /// Submit one composed transcript prompt and return the reply text.
    async fn reply(&self, prompt: &str) -> Result<String>;
}

/// Rig-backed support agent.
pub struct TherapistBackend {
    client: openai::CompletionsClient,
    model: String,
}

impl TherapistBackend {
    pub fn new(endpoint: &LlmEndpoint) -> Result<Self> {
        let client = openai::CompletionsClient::builder()
            .api_key(&endpoint.api_key)
            .base_url(&endpoint.url)
            .build()
            .context("Failed to build completions client")?;

        Ok(Self {
            model: endpoint.model.clone(),
            client,
        })
    }
}

#[async_trait]
impl SupportBackend for TherapistBackend {
    async fn reply(&self, prompt: &str) -> Result<String> {
        let agent = self
            .client
            .agent(&self.model)
            .name("therapist")
            .preamble(prompts::THERAPIST_PREAMBLE)
            .temperature(0.7)
            .build();

        let response: String = agent.prompt(prompt).await?;
        Ok(response)
    }
}
