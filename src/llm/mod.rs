//! LLM client abstraction
//!
//! The pipeline treats every model as unreliable: calls may fail, time out,
//! or return text that is not what was asked for. Callers bound each call
//! with [`invoke_with_timeout`] and parse the text defensively.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

pub mod anthropic;
pub mod backend;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use backend::AgentBackend;
pub use openai::OpenAiClient;

/// System prompt shared by every provider
pub(crate) const SYSTEM_PROMPT: &str = "You translate analytics questions into semantic-layer \
queries. Answer with a single JSON object and nothing else.";

/// Unified LLM interface
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a prompt, return the raw text response
    async fn invoke(&self, prompt: &str) -> Result<String>;

    /// Model name for logging
    fn model_name(&self) -> &str;

    /// Provider name for logging
    fn provider_name(&self) -> &str;
}

/// Invoke with a deadline; an elapsed deadline is an ordinary error
pub async fn invoke_with_timeout(
    client: &dyn LlmClient,
    prompt: &str,
    limit: Duration,
) -> Result<String> {
    match tokio::time::timeout(limit, client.invoke(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!(
            "{} call timed out after {}s",
            client.provider_name(),
            limit.as_secs()
        )),
    }
}

/// Create a client for the backend selected by `AGENT_BACKEND`
pub fn create_llm_client() -> Result<Arc<dyn LlmClient>> {
    let client: Arc<dyn LlmClient> = match AgentBackend::from_env()? {
        AgentBackend::Anthropic => Arc::new(AnthropicClient::from_env()?),
        AgentBackend::OpenAi => Arc::new(OpenAiClient::from_env()?),
    };
    tracing::info!(
        provider = client.provider_name(),
        model = client.model_name(),
        "Created LLM client"
    );
    Ok(client)
}
