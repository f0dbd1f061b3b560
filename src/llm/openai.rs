//! OpenAI chat completions client

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::{LlmClient, SYSTEM_PROMPT};

/// Model used when no override is set
const DEFAULT_MODEL: &str = "gpt-4o";
const API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI client for generation and repair prompts.
///
/// Every prompt is sent with the shared system prompt asking for a single
/// JSON object. The reply text is returned as-is; parsing it is the caller's
/// job.
#[derive(Clone)]
pub struct OpenAiClient {
    api_key: String,
    client: reqwest::Client,
    /// Model identifier sent with every request
    model: String,
}

impl OpenAiClient {
    /// Client for `api_key`; the model comes from `OPENAI_MODEL` when set,
    /// otherwise `DEFAULT_MODEL`
    pub fn new(api_key: String) -> Self {
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
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

    /// Client from `OPENAI_API_KEY`
    ///
    /// # Errors
    /// When the key is not set.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key))
    }
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": &self.model,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": prompt}
                ],
                "temperature": 0.1,
                "response_format": {"type": "json_object"}
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("OpenAI API error {}: {}", status, body));
        }

        let parsed: CompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or_else(|| anyhow!("OpenAI returned no choices"))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "OpenAI"
    }
}
