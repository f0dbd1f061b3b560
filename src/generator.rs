//! DSL Generator
//!
//! Turns a query plan into a [`DslCandidate`], either with the deterministic
//! rule compiler or with LLM assistance. Every path returns a candidate;
//! failures of any kind come back as `DslCandidate::Invalid`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{AgentConfig, KeywordConfig};
use crate::dsl::{DslCandidate, DslFilter, DslQuery, OrderBy, OrderDirection};
use crate::llm::{invoke_with_timeout, LlmClient};
use crate::planner::QueryPlan;
use crate::retriever::FewShotExample;
use crate::schema::{EntitySchema, Schema};
use crate::text::{contains_keyword, normalize};

/// Most examples included in a prompt
pub const MAX_FEW_SHOT: usize = 3;

const OUTPUT_FORMAT: &str = r#"## Output format

Return ONE JSON object:
{"cube": "<Entity>", "measures": ["..."], "dimensions": ["Entity.field"],
 "filters": [{"member": "Entity.field", "operator": "equals", "values": ["..."]}],
 "time_dimension": "Entity.field", "granularity": "day|week|month",
 "date_range": "last 7 days", "order": {"member": "Entity.field", "direction": "desc"},
 "limit": 10}

Omit keys that do not apply. Use only members listed in the schema.
If the question cannot be answered from the schema return {"error": "<reason>"}."#;

pub struct DslGenerator {
    keywords: Arc<KeywordConfig>,
    config: AgentConfig,
    llm: Option<Arc<dyn LlmClient>>,
}

impl DslGenerator {
    pub fn new(keywords: Arc<KeywordConfig>, config: AgentConfig) -> Self {
        Self {
            keywords,
            config,
            llm: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    /// Rule-based compilation of a plan
    pub fn compile(&self, query: &str, plan: &QueryPlan, schema: &Schema) -> DslCandidate {
        let Some(cube) = plan.target_entities.first() else {
            return DslCandidate::invalid("no target entity");
        };

        let mut dsl = DslQuery::new(cube.clone());
        dsl.measures = plan.required_measures.clone();
        dsl.dimensions = plan.required_dimensions.clone();

        let entity = schema.entity(cube);
        let temporal = entity.and_then(|e| self.temporal_dimension(e));

        let time = &plan.time_requirements;
        if time.has_time_filter {
            if let Some(field) = temporal {
                dsl.time_dimension = Some(dsl.qualify(field));
                dsl.granularity = Some(
                    time.granularity
                        .clone()
                        .unwrap_or_else(|| self.config.default_granularity.clone()),
                );
                dsl.date_range = time.time_range.clone();
            } else {
                debug!(cube = %cube, "Time filter requested but entity has no temporal dimension");
            }
        }

        dsl.filters = plan
            .filters
            .iter()
            .map(|f| DslFilter {
                member: dsl.qualify(&f.member),
                operator: f.operator.clone(),
                values: f.values.clone(),
            })
            .collect();

        let text = normalize(query);
        if self.keywords.ranking_words.iter().any(|w| contains_keyword(&text, w)) {
            let recency = temporal.unwrap_or(&self.config.default_order_field);
            dsl.order = Some(OrderBy {
                member: dsl.qualify(recency),
                direction: OrderDirection::Desc,
            });
            dsl.limit = Some(self.config.default_limit);
        }

        DslCandidate::Valid(dsl)
    }

    /// LLM generation with retrieved examples
    pub async fn generate_with_llm(
        &self,
        query: &str,
        schema: &Schema,
        examples: &[FewShotExample],
    ) -> DslCandidate {
        let prompt = Self::build_prompt(query, schema, examples);
        self.ask(&prompt).await
    }

    /// Regenerate after the critic rejected `previous`. Uses the LLM with the
    /// critic's findings when one is configured, otherwise recompiles.
    pub async fn regenerate(
        &self,
        query: &str,
        plan: &QueryPlan,
        schema: &Schema,
        previous: &DslCandidate,
        errors: &[String],
    ) -> DslCandidate {
        if self.llm.is_none() {
            return self.compile(query, plan, schema);
        }
        let prompt = Self::build_fix_prompt(query, schema, previous, errors);
        self.ask(&prompt).await
    }

    async fn ask(&self, prompt: &str) -> DslCandidate {
        let Some(llm) = &self.llm else {
            return DslCandidate::invalid("no language model configured");
        };
        let limit = Duration::from_secs(self.config.llm_timeout_secs);
        match invoke_with_timeout(llm.as_ref(), prompt, limit).await {
            Ok(text) => DslCandidate::parse_llm_output(&text),
            Err(e) => {
                warn!(provider = llm.provider_name(), error = %e, "LLM generation failed");
                DslCandidate::invalid("language model unavailable")
            }
        }
    }

    /// First dimension whose name carries a temporal marker
    fn temporal_dimension<'a>(&self, entity: &'a EntitySchema) -> Option<&'a String> {
        entity.dimensions.iter().find(|d| {
            let lower = d.to_lowercase();
            self.keywords
                .temporal_markers
                .iter()
                .any(|m| lower.contains(&m.to_lowercase()))
        })
    }

    pub fn build_prompt(query: &str, schema: &Schema, examples: &[FewShotExample]) -> String {
        let mut prompt = String::from("# Semantic query generation\n\n");

        prompt.push_str("## Schema\n\n");
        prompt.push_str(&schema.describe());
        prompt.push('\n');

        if !examples.is_empty() {
            prompt.push_str("## Similar questions\n\n");
            for example in examples.iter().take(MAX_FEW_SHOT) {
                let dsl = serde_json::to_string(&example.dsl).unwrap_or_default();
                prompt.push_str(&format!("Q: {}\nA: {}\n\n", example.question, dsl));
            }
        }

        prompt.push_str(OUTPUT_FORMAT);
        prompt.push_str(&format!("\n\n## Question\n\n{}\n", query));
        prompt
    }

    pub fn build_fix_prompt(
        query: &str,
        schema: &Schema,
        previous: &DslCandidate,
        errors: &[String],
    ) -> String {
        let previous = serde_json::to_string_pretty(previous).unwrap_or_default();
        format!(
            r#"# Semantic query correction

The query below was rejected. Fix it and return ONLY the corrected query.

## Errors
{errors}

## Rejected query
{previous}

## Schema
{schema}
{format}

## Question
{query}
"#,
            errors = errors.join("\n"),
            previous = previous,
            schema = schema.describe(),
            format = OUTPUT_FORMAT,
            query = query,
        )
    }
}
