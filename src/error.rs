//! Typed agent error model.
//!
//! Expected conditions (ambiguous questions, invalid candidates, execution
//! errors that repair can handle) never surface here. An `AgentError` means a
//! run was terminated early, and its message is safe to show to callers:
//! collaborator detail is logged through `tracing`, not carried in the text.

use serde::{Deserialize, Serialize};

/// Errors that terminate a run or prevent the agent from being built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "error_kind", rename_all = "snake_case")]
pub enum AgentError {
    /// The overall per-run deadline elapsed.
    #[error("Run exceeded the {seconds}s execution timeout")]
    Timeout { seconds: u64 },

    /// The schema for the tenant could not be loaded.
    #[error("Schema unavailable for tenant '{tenant_id}'")]
    Schema { tenant_id: String },

    /// A collaborator responded outside its contract.
    #[error("Unrecoverable error: {reason}")]
    Unrecoverable { reason: String },

    /// Configuration data could not be loaded or compiled.
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl AgentError {
    pub fn unrecoverable(reason: impl Into<String>) -> Self {
        Self::Unrecoverable {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;
