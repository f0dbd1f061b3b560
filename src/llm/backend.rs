//! Backend selection
//!
//! Which provider answers generation and repair prompts, chosen once at
//! startup from `AGENT_BACKEND`.

use anyhow::{anyhow, Result};
use std::str::FromStr;

/// LLM provider behind the pipeline's optional model calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentBackend {
    /// Anthropic Messages API (default)
    #[default]
    Anthropic,
    /// OpenAI chat completions in JSON mode
    OpenAi,
}

impl AgentBackend {
    /// Read `AGENT_BACKEND`
    ///
    /// Accepts `anthropic`, `claude`, `openai` or `gpt` in any case.
    /// Unset means Anthropic; anything else is an error.
    pub fn from_env() -> Result<Self> {
        let value = std::env::var("AGENT_BACKEND").unwrap_or_else(|_| "anthropic".to_string());
        value.parse().map_err(|e: ParseBackendError| anyhow!("{}", e))
    }

    /// Display name, also used as the provider name in logs
    pub fn name(&self) -> &'static str {
        match self {
            AgentBackend::Anthropic => "Anthropic",
            AgentBackend::OpenAi => "OpenAI",
        }
    }
}

/// Unrecognized `AGENT_BACKEND` value
#[derive(Debug, thiserror::Error)]
#[error("Unknown AGENT_BACKEND '{0}'. Valid values: anthropic, claude, openai, gpt")]
pub struct ParseBackendError(String);

impl FromStr for AgentBackend {
    type Err = ParseBackendError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(AgentBackend::Anthropic),
            "openai" | "gpt" => Ok(AgentBackend::OpenAi),
            other => Err(ParseBackendError(other.to_string())),
        }
    }
}

impl std::fmt::Display for AgentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
