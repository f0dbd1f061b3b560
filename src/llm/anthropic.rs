//! Anthropic Messages API client

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::{LlmClient, SYSTEM_PROMPT};

/// Model used when no override is set
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic client for generation and repair prompts.
///
/// Every prompt is sent with the shared system prompt asking for a single
/// JSON object. The reply text is returned as-is; parsing it is the caller's
/// job.
#[derive(Clone)]
pub struct AnthropicClient {
    api_key: String,
    client: reqwest::Client,
    /// Model identifier sent with every request
    model: String,
}

impl AnthropicClient {
    /// Client for `api_key`; the model comes from `ANTHROPIC_MODEL` when set,
    /// otherwise `DEFAULT_MODEL`
    pub fn new(api_key: String) -> Self {
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::with_model(api_key, &model)
    }

    /// Client pinned to a specific model
    pub fn with_model(api_key: String, model: &str) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            model: model.to_string(),
        }
    }

    /// Client from `ANTHROPIC_API_KEY`
    ///
    /// # Errors
    /// When the key is not set.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key))
    }
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&serde_json::json!({
                "model": &self.model,
                "max_tokens": 2048,
                "system": SYSTEM_PROMPT,
                "messages": [{"role": "user", "content": prompt}]
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Anthropic API error {}: {}", status, body));
        }

        let parsed: MessagesResponse = response.json().await?;
        parsed
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| anyhow!("Empty response from Anthropic"))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "Anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_model() {
        let client = AnthropicClient::with_model("key".to_string(), "claude-3-haiku");
        assert_eq!(client.model_name(), "claude-3-haiku");
        assert_eq!(client.provider_name(), "Anthropic");
    }
}
