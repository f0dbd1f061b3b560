//! Per-run state
//!
//! A [`RunContext`] is owned by exactly one run. Stages never mutate it in
//! place: each returns an updated copy through the `with_*` methods, so every
//! transition can be tested from a hand-built context.

use serde::Serialize;
use uuid::Uuid;

use crate::critic::CriticReport;
use crate::disambiguator::ClarificationQuestion;
use crate::dsl::DslCandidate;
use crate::executor::ExecutionOutput;
use crate::orchestrator::Stage;
use crate::planner::QueryPlan;
use crate::route::RouteDecision;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunContext {
    pub run_id: Uuid,
    pub query: String,
    pub tenant_id: String,
    pub route_decision: Option<RouteDecision>,
    pub query_plan: Option<QueryPlan>,
    pub dsl_candidate: Option<DslCandidate>,
    pub critic_report: Option<CriticReport>,
    /// Repair invocations so far
    pub error_count: u32,
    /// Critic-driven regenerations so far
    pub regeneration_count: u32,
    /// Last execution error, cleared by a successful execution
    pub error_message: Option<String>,
    pub final_result: Option<ExecutionOutput>,
    pub questions: Vec<ClarificationQuestion>,
    /// Stages visited, in order
    pub stages: Vec<Stage>,
}

impl RunContext {
    pub fn new(run_id: Uuid, query: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            run_id,
            query: query.into(),
            tenant_id: tenant_id.into(),
            route_decision: None,
            query_plan: None,
            dsl_candidate: None,
            critic_report: None,
            error_count: 0,
            regeneration_count: 0,
            error_message: None,
            final_result: None,
            questions: Vec::new(),
            stages: Vec::new(),
        }
    }

    pub fn with_route_decision(self, route_decision: RouteDecision) -> Self {
        Self {
            route_decision: Some(route_decision),
            ..self
        }
    }

    pub fn with_query_plan(self, query_plan: QueryPlan) -> Self {
        Self {
            query_plan: Some(query_plan),
            ..self
        }
    }

    pub fn with_dsl_candidate(self, dsl_candidate: DslCandidate) -> Self {
        Self {
            dsl_candidate: Some(dsl_candidate),
            ..self
        }
    }

    pub fn with_critic_report(self, critic_report: CriticReport) -> Self {
        Self {
            critic_report: Some(critic_report),
            ..self
        }
    }

    /// Record one repair invocation
    pub fn with_repair_attempt(self) -> Self {
        Self {
            error_count: self.error_count + 1,
            ..self
        }
    }

    pub fn with_regeneration(self) -> Self {
        Self {
            regeneration_count: self.regeneration_count + 1,
            ..self
        }
    }

    pub fn with_execution_error(self, message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            final_result: None,
            ..self
        }
    }

    pub fn with_final_result(self, output: ExecutionOutput) -> Self {
        Self {
            error_message: None,
            final_result: Some(output),
            ..self
        }
    }

    /// Give up: no result, and an error message explaining why
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            final_result: None,
            ..self
        }
    }

    pub fn with_questions(self, questions: Vec<ClarificationQuestion>) -> Self {
        Self { questions, ..self }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Whether the critic accepted the current candidate
    pub fn candidate_accepted(&self) -> bool {
        self.critic_report.as_ref().is_some_and(|r| r.valid)
    }
}
