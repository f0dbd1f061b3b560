//! Agent Orchestrator
//!
//! Main entry point. Runs one question through the stage machine:
//!
//! ```text
//! Routing ─┬─> Disambiguating (terminal)
//!          └─> Planning -> Generating -> Critiquing ─┬─> Generating    (rejected)
//!                                                    └─> Executing ─┬─> Succeeded
//!                                                                   ├─> Repairing -> Critiquing
//!                                                                   └─> Unrecoverable
//! ```
//!
//! Stage actions live on [`AgentOrchestrator`]; the choice of the next stage
//! is the pure function [`next_stage`]. Repairs are capped by
//! `max_repair_attempts` and regenerations by `max_regenerations`, so every
//! run halts.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{AgentConfig, BusinessRulesFile, ConfigLoader, ErrorPatternsFile, KeywordConfig};
use crate::context::RunContext;
use crate::critic::{BusinessRule, Critic, CriticReport};
use crate::disambiguator::{ClarificationQuestion, Disambiguator};
use crate::dsl::DslCandidate;
use crate::error::{AgentError, AgentResult};
use crate::executor::{ExecutionOutput, QueryExecutor};
use crate::generator::DslGenerator;
use crate::llm::LlmClient;
use crate::planner::QueryPlanner;
use crate::repair::{ErrorPattern, RepairAgent};
use crate::retriever::{FewShotRetriever, NoopRetriever};
use crate::route::{RouteClassifier, RouteDecision};
use crate::schema::{Schema, SchemaProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Routing,
    Disambiguating,
    Planning,
    Generating,
    Critiquing,
    Executing,
    Repairing,
    Succeeded,
    Unrecoverable,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Stage::Disambiguating | Stage::Succeeded | Stage::Unrecoverable
        )
    }
}

/// The stage that follows `stage`, given the context it produced
pub fn next_stage(stage: Stage, ctx: &RunContext, config: &AgentConfig) -> Stage {
    match stage {
        Stage::Routing => match &ctx.route_decision {
            Some(decision) if decision.needs_disambiguation() => Stage::Disambiguating,
            _ => Stage::Planning,
        },
        Stage::Planning => Stage::Generating,
        Stage::Generating => Stage::Critiquing,
        Stage::Critiquing if ctx.candidate_accepted() => Stage::Executing,
        Stage::Critiquing if ctx.regeneration_count < config.max_regenerations => Stage::Generating,
        Stage::Critiquing => Stage::Unrecoverable,
        Stage::Executing => match ctx.error_message {
            None => Stage::Succeeded,
            Some(_) if ctx.error_count < config.max_repair_attempts => Stage::Repairing,
            Some(_) => Stage::Unrecoverable,
        },
        Stage::Repairing => Stage::Critiquing,
        terminal => terminal,
    }
}

/// Terminal response for an ambiguous question
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClarificationRequest {
    pub run_id: Uuid,
    pub needs_clarification: bool,
    pub questions: Vec<ClarificationQuestion>,
}

/// Terminal response once execution was attempted or generation gave up
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub dsl: DslCandidate,
    /// `None` when the run was unrecoverable
    pub final_result: Option<ExecutionOutput>,
    pub critic_report: Option<CriticReport>,
    pub error_count: u32,
    /// `None` on success
    pub error_message: Option<String>,
    pub regeneration_count: u32,
    pub stages: Vec<Stage>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.final_result.is_some() && self.error_message.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RunOutcome {
    NeedsClarification(ClarificationRequest),
    Completed(RunReport),
}

impl RunOutcome {
    fn from_context(ctx: RunContext, terminal: Stage) -> Self {
        if terminal == Stage::Disambiguating {
            return RunOutcome::NeedsClarification(ClarificationRequest {
                run_id: ctx.run_id,
                needs_clarification: true,
                questions: ctx.questions,
            });
        }
        RunOutcome::Completed(RunReport {
            run_id: ctx.run_id,
            dsl: ctx
                .dsl_candidate
                .unwrap_or_else(|| DslCandidate::invalid("no query generated")),
            final_result: ctx.final_result,
            critic_report: ctx.critic_report,
            error_count: ctx.error_count,
            error_message: ctx.error_message,
            regeneration_count: ctx.regeneration_count,
            stages: ctx.stages,
        })
    }

    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunOutcome::Completed(report) => Some(report),
            RunOutcome::NeedsClarification(_) => None,
        }
    }

    pub fn questions(&self) -> Option<&[ClarificationQuestion]> {
        match self {
            RunOutcome::NeedsClarification(request) => Some(&request.questions),
            RunOutcome::Completed(_) => None,
        }
    }
}

/// Agent orchestrator for semantic query generation
pub struct AgentOrchestrator {
    config: AgentConfig,
    schema_provider: Arc<dyn SchemaProvider>,
    retriever: Arc<dyn FewShotRetriever>,
    executor: Arc<dyn QueryExecutor>,
    classifier: RouteClassifier,
    planner: QueryPlanner,
    generator: DslGenerator,
    critic: Critic,
    repair: RepairAgent,
}

impl AgentOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Answer `query` for `tenant_id` within the configured run timeout
    pub async fn run(&self, query: &str, tenant_id: &str) -> AgentResult<RunOutcome> {
        let run_id = Uuid::new_v4();
        let span = info_span!("agent_run", %run_id, tenant_id);
        let limit = self.config.run_timeout();

        match tokio::time::timeout(limit, self.drive(run_id, query, tenant_id))
            .instrument(span)
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(%run_id, seconds = limit.as_secs(), "Run timed out");
                Err(AgentError::Timeout {
                    seconds: limit.as_secs(),
                })
            }
        }
    }

    async fn drive(&self, run_id: Uuid, query: &str, tenant_id: &str) -> AgentResult<RunOutcome> {
        info!(query, "Starting run");
        let schema = self.load_schema(tenant_id).await?;

        let mut ctx = RunContext::new(run_id, query, tenant_id);
        let mut stage = Stage::Routing;
        loop {
            debug!(?stage, "Entering stage");
            ctx = self.step(stage, ctx.with_stage(stage), &schema).await?;
            if stage.is_terminal() {
                break;
            }
            stage = next_stage(stage, &ctx, &self.config);
        }

        info!(
            ?stage,
            error_count = ctx.error_count,
            regenerations = ctx.regeneration_count,
            "Run finished"
        );
        Ok(RunOutcome::from_context(ctx, stage))
    }

    async fn load_schema(&self, tenant_id: &str) -> AgentResult<Schema> {
        let limit = self.config.schema_timeout();
        match tokio::time::timeout(limit, self.schema_provider.get_schema(tenant_id)).await {
            Ok(Ok(schema)) => Ok(schema),
            Ok(Err(e)) => {
                warn!(error = %e, "Schema lookup failed");
                Err(AgentError::Schema {
                    tenant_id: tenant_id.to_string(),
                })
            }
            Err(_) => {
                warn!(seconds = limit.as_secs(), "Schema lookup timed out");
                Err(AgentError::Schema {
                    tenant_id: tenant_id.to_string(),
                })
            }
        }
    }

    async fn step(&self, stage: Stage, ctx: RunContext, schema: &Schema) -> AgentResult<RunContext> {
        let ctx = match stage {
            Stage::Routing => {
                let decision = self.classifier.classify(&ctx.query, schema);
                debug!(?decision, "Routed");
                ctx.with_route_decision(decision)
            }
            Stage::Disambiguating => {
                let ambiguity_types = match &ctx.route_decision {
                    Some(RouteDecision::Disambiguate {
                        ambiguity_types, ..
                    }) => ambiguity_types.clone(),
                    _ => BTreeSet::new(),
                };
                let questions = Disambiguator::questions(&ambiguity_types, schema);
                info!(questions = questions.len(), "Question is ambiguous, asking for clarification");
                ctx.with_questions(questions)
            }
            Stage::Planning => {
                let decision = ctx
                    .route_decision
                    .as_ref()
                    .ok_or_else(|| AgentError::unrecoverable("planning reached without a route"))?;
                let plan = self.planner.plan(&ctx.query, decision, schema);
                debug!(?plan, "Planned");
                ctx.with_query_plan(plan)
            }
            Stage::Generating => self.generate(ctx, schema).await?,
            Stage::Critiquing => {
                let candidate = ctx
                    .dsl_candidate
                    .as_ref()
                    .ok_or_else(|| AgentError::unrecoverable("critique reached without a query"))?;
                let report = self.critic.validate(candidate, schema, &ctx.query);
                if report.valid {
                    debug!(score = report.score, warnings = report.warnings.len(), "Critic accepted query");
                } else {
                    info!(errors = ?report.errors, "Critic rejected query");
                }
                ctx.with_critic_report(report)
            }
            Stage::Executing => self.execute(ctx).await?,
            Stage::Repairing => {
                let candidate = ctx
                    .dsl_candidate
                    .as_ref()
                    .ok_or_else(|| AgentError::unrecoverable("repair reached without a query"))?;
                let message = ctx.error_message.as_deref().unwrap_or_default();
                let outcome = self.repair.repair(candidate, message, schema).await;
                info!(
                    attempt = ctx.error_count + 1,
                    pattern = ?outcome.pattern,
                    strategy = ?outcome.strategy,
                    changed = outcome.changed,
                    "Repaired query"
                );
                ctx.with_dsl_candidate(outcome.candidate).with_repair_attempt()
            }
            Stage::Succeeded => ctx,
            Stage::Unrecoverable => {
                let reason = Self::failure_reason(&ctx);
                warn!(%reason, "Run is unrecoverable");
                ctx.with_failure(reason)
            }
        };
        Ok(ctx)
    }

    async fn generate(&self, ctx: RunContext, schema: &Schema) -> AgentResult<RunContext> {
        let plan = ctx
            .query_plan
            .as_ref()
            .ok_or_else(|| AgentError::unrecoverable("generation reached without a plan"))?;

        let regenerating = ctx.dsl_candidate.is_some() && ctx.critic_report.is_some();
        let candidate = if let (Some(previous), Some(report)) = (&ctx.dsl_candidate, &ctx.critic_report) {
            info!(regeneration = ctx.regeneration_count + 1, "Regenerating rejected query");
            self.generator
                .regenerate(&ctx.query, plan, schema, previous, &report.errors)
                .await
        } else if self.config.use_llm_generation && self.generator.has_llm() {
            let examples = self
                .retriever
                .retrieve(&ctx.query, self.config.few_shot_top_k)
                .await;
            debug!(examples = examples.len(), "Retrieved few-shot examples");
            self.generator
                .generate_with_llm(&ctx.query, schema, &examples)
                .await
        } else {
            self.generator.compile(&ctx.query, plan, schema)
        };

        let ctx = ctx.with_dsl_candidate(candidate);
        Ok(if regenerating {
            ctx.with_regeneration()
        } else {
            ctx
        })
    }

    async fn execute(&self, ctx: RunContext) -> AgentResult<RunContext> {
        let Some(DslCandidate::Valid(query)) = &ctx.dsl_candidate else {
            return Err(AgentError::unrecoverable("execution reached without a valid query"));
        };

        let limit = self.config.executor_timeout();
        let result = tokio::time::timeout(limit, self.executor.execute(query, &ctx.tenant_id)).await;

        Ok(match result {
            Ok(Ok(output)) => {
                info!(rows = output.data.len(), "Query executed");
                ctx.with_final_result(output)
            }
            Ok(Err(e)) => {
                warn!(error = %e, repairs = ctx.error_count, "Query execution failed");
                ctx.with_execution_error(e.to_string())
            }
            Err(_) => {
                let message = format!("query execution timed out after {}s", limit.as_secs());
                warn!(repairs = ctx.error_count, "{}", message);
                ctx.with_execution_error(message)
            }
        })
    }

    fn failure_reason(ctx: &RunContext) -> String {
        match &ctx.critic_report {
            Some(report) if !report.valid => report.errors.join("; "),
            _ => ctx
                .error_message
                .clone()
                .unwrap_or_else(|| "run ended without a result".to_string()),
        }
    }
}

/// Builder for AgentOrchestrator
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: AgentConfig,
    keywords: Option<KeywordConfig>,
    business_rules: Option<Vec<BusinessRule>>,
    error_patterns: Option<Vec<ErrorPattern>>,
    schema_provider: Option<Arc<dyn SchemaProvider>>,
    llm: Option<Arc<dyn LlmClient>>,
    retriever: Option<Arc<dyn FewShotRetriever>>,
    executor: Option<Arc<dyn QueryExecutor>>,
}

impl OrchestratorBuilder {
    /// Start from every configuration file the loader resolves
    pub fn from_config(loader: &ConfigLoader) -> AgentResult<Self> {
        info!(config_dir = %loader.config_dir().display(), "Loading agent configuration");
        Ok(Self {
            config: loader.load_agent_config()?,
            keywords: Some(loader.load_keywords()?),
            business_rules: Some(loader.load_business_rules()?),
            error_patterns: Some(loader.load_error_patterns()?),
            ..Self::default()
        })
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn keywords(mut self, keywords: KeywordConfig) -> Self {
        self.keywords = Some(keywords);
        self
    }

    pub fn business_rules(mut self, rules: Vec<BusinessRule>) -> Self {
        self.business_rules = Some(rules);
        self
    }

    pub fn error_patterns(mut self, patterns: Vec<ErrorPattern>) -> Self {
        self.error_patterns = Some(patterns);
        self
    }

    pub fn schema_provider(mut self, provider: Arc<dyn SchemaProvider>) -> Self {
        self.schema_provider = Some(provider);
        self
    }

    /// Enables LLM-assisted generation, regeneration and repair
    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn retriever(mut self, retriever: Arc<dyn FewShotRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn QueryExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Build the orchestrator; configuration not supplied falls back to the
    /// embedded defaults
    pub fn build(self) -> AgentResult<AgentOrchestrator> {
        let schema_provider = self
            .schema_provider
            .ok_or_else(|| AgentError::config("a schema provider is required"))?;
        let executor = self
            .executor
            .ok_or_else(|| AgentError::config("a query executor is required"))?;

        let keywords = Arc::new(match self.keywords {
            Some(keywords) => keywords,
            None => KeywordConfig::embedded()?,
        });
        let business_rules = match self.business_rules {
            Some(rules) => rules,
            None => BusinessRulesFile::embedded()?.rules,
        };
        let error_patterns = match self.error_patterns {
            Some(patterns) => patterns,
            None => ErrorPatternsFile::embedded()?.patterns,
        };

        let mut generator = DslGenerator::new(keywords.clone(), self.config.clone());
        let mut repair = RepairAgent::new(error_patterns)?;
        if let Some(llm) = self.llm {
            info!(provider = llm.provider_name(), model = llm.model_name(), "LLM assistance enabled");
            generator = generator.with_llm(llm.clone());
            repair = repair.with_llm(llm, self.config.llm_timeout());
        }

        let retriever = self
            .retriever
            .unwrap_or_else(|| Arc::new(NoopRetriever) as Arc<dyn FewShotRetriever>);

        Ok(AgentOrchestrator {
            classifier: RouteClassifier::new(keywords.clone()),
            planner: QueryPlanner::new(keywords.clone()),
            critic: Critic::new(business_rules, keywords),
            generator,
            repair,
            config: self.config,
            schema_provider,
            retriever,
            executor,
        })
    }
}
