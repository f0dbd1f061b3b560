//! Self-correcting agent pipeline for analytics questions
//!
//! Compiles a natural-language question into a validated semantic-layer
//! query, executes it, and repairs it when execution fails.
//!
//! ## Architecture
//!
//! ```text
//! Question → RouteClassifier ─┬→ Disambiguator (clarification questions)
//!                             └→ QueryPlanner → DslGenerator → Critic → Executor
//!                                                    ↑            ↑        │
//!                                                    └─ rejected  └─ RepairAgent (≤ 3)
//! ```
//!
//! ## Backend Selection
//!
//! Set `AGENT_BACKEND` environment variable:
//! - `anthropic` (default): Anthropic Claude API
//! - `openai`: OpenAI API
//!
//! The LLM is optional. Without one the pipeline is fully deterministic.

// Collaborators
pub mod executor;
pub mod llm;
pub mod retriever;
pub mod schema;

// Pipeline stages
pub mod critic;
pub mod disambiguator;
pub mod generator;
pub mod planner;
pub mod repair;
pub mod route;

// Run state and control
pub mod context;
pub mod orchestrator;

pub mod config;
pub mod dsl;
pub mod error;
pub mod text;

// Re-exports for convenience
pub use config::{AgentConfig, ConfigLoader, KeywordConfig};
pub use dsl::{DslCandidate, DslQuery};
pub use error::{AgentError, AgentResult};
pub use executor::{DryRunExecutor, ExecutionOutput, HttpQueryExecutor, QueryExecutor};
pub use llm::{create_llm_client, AgentBackend, LlmClient};
pub use orchestrator::{AgentOrchestrator, OrchestratorBuilder, RunOutcome, RunReport, Stage};
pub use retriever::{FewShotExample, FewShotRetriever, InMemoryRetriever, NoopRetriever};
pub use schema::{EntitySchema, Schema, SchemaProvider, StaticSchemaProvider};
