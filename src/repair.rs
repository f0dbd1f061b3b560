//! Repair of queries that failed at execution time
//!
//! The executor's error text is matched against the configured
//! [`ErrorPattern`]s in order. A matched auto-fixable pattern dispatches to a
//! pure fix function; anything else goes to the LLM. Repair never fails: the
//! worst outcome is an unchanged candidate. Counting attempts is the
//! orchestrator's job.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dsl::{entity_prefix, strip_entity_prefix, DslCandidate, DslQuery};
use crate::error::{AgentError, AgentResult};
use crate::llm::{invoke_with_timeout, LlmClient};
use crate::schema::Schema;
use crate::text::tokens;

/// Lowest similarity accepted by the fuzzy member fix
pub const SIMILARITY_CUTOFF: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStrategy {
    FuzzyReplaceMeasure,
    FuzzyReplaceDimension,
    /// Measure first, then dimension
    FuzzyReplaceMember,
    DropCustomJoins,
    PruneEmptyFilters,
    DropTimeDimension,
    FallbackFirstMeasure,
    LlmRepair,
}

/// Configured execution error pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub name: String,
    /// Regex over the error text; capture group 1, when present, names the
    /// offending member
    pub matcher: String,
    pub fix_strategy: FixStrategy,
    pub auto_fixable: bool,
}

struct CompiledPattern {
    pattern: ErrorPattern,
    regex: Regex,
}

/// A pattern that matched, with the member it captured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch<'a> {
    pub pattern: &'a ErrorPattern,
    pub captured: Option<String>,
}

/// What a repair attempt did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub candidate: DslCandidate,
    pub pattern: Option<String>,
    pub strategy: FixStrategy,
    pub changed: bool,
}

pub struct RepairAgent {
    patterns: Vec<CompiledPattern>,
    llm: Option<Arc<dyn LlmClient>>,
    llm_timeout: Duration,
}

impl RepairAgent {
    /// Compile the patterns; a bad regex is a configuration error
    pub fn new(patterns: Vec<ErrorPattern>) -> AgentResult<Self> {
        let patterns = patterns
            .into_iter()
            .map(|pattern| {
                Regex::new(&pattern.matcher)
                    .map(|regex| CompiledPattern { pattern, regex })
                    .map_err(|e| AgentError::config(format!("error pattern: {}", e)))
            })
            .collect::<AgentResult<Vec<_>>>()?;

        Ok(Self {
            patterns,
            llm: None,
            llm_timeout: Duration::from_secs(30),
        })
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        self.llm = Some(llm);
        self.llm_timeout = timeout;
        self
    }

    /// First pattern, in configured order, whose matcher matches
    pub fn match_error_pattern(&self, error_message: &str) -> Option<PatternMatch<'_>> {
        self.patterns.iter().find_map(|c| {
            c.regex.captures(error_message).map(|caps| PatternMatch {
                pattern: &c.pattern,
                captured: caps.get(1).map(|m| m.as_str().to_string()),
            })
        })
    }

    pub async fn repair(
        &self,
        candidate: &DslCandidate,
        error_message: &str,
        schema: &Schema,
    ) -> RepairOutcome {
        let matched = self.match_error_pattern(error_message);
        let pattern = matched.as_ref().map(|m| m.pattern.name.clone());

        let auto_fix = matched
            .as_ref()
            .filter(|m| m.pattern.auto_fixable && m.pattern.fix_strategy != FixStrategy::LlmRepair);

        let (repaired, strategy) = match (auto_fix, candidate) {
            (Some(m), DslCandidate::Valid(dsl)) => {
                let strategy = m.pattern.fix_strategy;
                info!(pattern = %m.pattern.name, ?strategy, "Applying automatic fix");
                let fixed = apply_fix(strategy, dsl, schema, m.captured.as_deref());
                (DslCandidate::Valid(fixed), strategy)
            }
            _ => {
                debug!(pattern = ?pattern, "No automatic fix, delegating to LLM");
                (
                    self.llm_repair(candidate, error_message, schema).await,
                    FixStrategy::LlmRepair,
                )
            }
        };

        RepairOutcome {
            changed: &repaired != candidate,
            candidate: repaired,
            pattern,
            strategy,
        }
    }

    /// Ask the model for a corrected query; anything unusable keeps the
    /// original
    async fn llm_repair(
        &self,
        candidate: &DslCandidate,
        error_message: &str,
        schema: &Schema,
    ) -> DslCandidate {
        let Some(llm) = &self.llm else {
            return candidate.clone();
        };

        let prompt = Self::build_prompt(candidate, error_message, schema);
        match invoke_with_timeout(llm.as_ref(), &prompt, self.llm_timeout).await {
            Ok(text) => match DslCandidate::parse_llm_output(&text) {
                fixed @ DslCandidate::Valid(_) => fixed,
                DslCandidate::Invalid { reason } => {
                    warn!(%reason, "LLM repair output unusable, keeping query");
                    candidate.clone()
                }
            },
            Err(e) => {
                warn!(error = %e, "LLM repair failed, keeping query");
                candidate.clone()
            }
        }
    }

    pub fn build_prompt(candidate: &DslCandidate, error_message: &str, schema: &Schema) -> String {
        let broken = serde_json::to_string_pretty(candidate).unwrap_or_default();
        format!(
            r#"# Semantic query repair

The query below failed when executed. Return ONLY the corrected query as one
JSON object with keys cube, measures, dimensions, filters, time_dimension,
granularity, date_range, order, limit.

## Execution error
{error_message}

## Failed query
{broken}

## Schema
{schema}"#,
            error_message = error_message,
            broken = broken,
            schema = schema.describe(),
        )
    }
}

pub fn apply_fix(
    strategy: FixStrategy,
    dsl: &DslQuery,
    schema: &Schema,
    captured: Option<&str>,
) -> DslQuery {
    match strategy {
        FixStrategy::FuzzyReplaceMeasure => fuzzy_replace_measure(dsl, schema, captured),
        FixStrategy::FuzzyReplaceDimension => fuzzy_replace_dimension(dsl, schema, captured),
        FixStrategy::FuzzyReplaceMember => {
            let fixed = fuzzy_replace_measure(dsl, schema, captured);
            fuzzy_replace_dimension(&fixed, schema, captured)
        }
        FixStrategy::DropCustomJoins => drop_custom_joins(dsl),
        FixStrategy::PruneEmptyFilters => prune_empty_filters(dsl),
        FixStrategy::DropTimeDimension => drop_time_dimension(dsl),
        FixStrategy::FallbackFirstMeasure => fallback_first_measure(dsl, schema),
        FixStrategy::LlmRepair => dsl.clone(),
    }
}

/// Similarity in `[0, 1]` between a member name and a schema candidate.
///
/// The best `strsim::normalized_levenshtein` score between the lowercase
/// name and either the whole candidate or any of its `_`-separated tokens,
/// so that `rev` is close to `total_revenue` through its `revenue` token.
pub fn similarity(name: &str, candidate: &str) -> f64 {
    let name = name.to_lowercase();
    let whole = strsim::normalized_levenshtein(&name, &candidate.to_lowercase());
    tokens(candidate)
        .iter()
        .map(|t| strsim::normalized_levenshtein(&name, t))
        .fold(whole, f64::max)
}

/// Closest candidate scoring at least [`SIMILARITY_CUTOFF`]; ties go to the
/// earliest candidate
pub fn closest_match<'a>(name: &str, candidates: &[&'a str]) -> Option<&'a str> {
    let mut best: Option<(&'a str, f64)> = None;
    for &candidate in candidates {
        let score = similarity(name, candidate);
        if score >= SIMILARITY_CUTOFF && best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }
    best.map(|(c, _)| c)
}

pub fn fuzzy_replace_measure(dsl: &DslQuery, schema: &Schema, target: Option<&str>) -> DslQuery {
    let vocabulary = match schema.entity(&dsl.cube) {
        Some(e) => e.measures.iter().map(String::as_str).collect(),
        None => schema.all_measures(),
    };
    let mut fixed = dsl.clone();
    fixed.measures = replace_members(&dsl.measures, &vocabulary, target);
    fixed
}

pub fn fuzzy_replace_dimension(dsl: &DslQuery, schema: &Schema, target: Option<&str>) -> DslQuery {
    let vocabulary = match schema.entity(&dsl.cube) {
        Some(e) => e.dimensions.iter().map(String::as_str).collect(),
        None => schema.all_dimensions(),
    };
    let mut fixed = dsl.clone();
    fixed.dimensions = replace_members(&dsl.dimensions, &vocabulary, target);
    fixed
}

/// Replace the targeted member (or, without a target, every member missing
/// from the vocabulary) with its closest vocabulary entry, keeping any
/// entity prefix. A target none of `members` carries leaves them all alone.
/// A member the executor rejected is never its own replacement, even when a
/// stale schema still lists it.
fn replace_members(members: &[String], vocabulary: &[&str], target: Option<&str>) -> Vec<String> {
    let target = target.map(strip_entity_prefix);
    if let Some(t) = target {
        if !members.iter().any(|m| strip_entity_prefix(m) == t) {
            return members.to_vec();
        }
    }

    members
        .iter()
        .map(|member| {
            let name = strip_entity_prefix(member);
            let broken = match target {
                Some(t) => name == t,
                None => !vocabulary.contains(&name),
            };
            if !broken {
                return member.clone();
            }
            let pool: Vec<&str> = vocabulary.iter().copied().filter(|v| *v != name).collect();
            match closest_match(name, &pool) {
                Some(replacement) => match entity_prefix(member) {
                    Some(prefix) => format!("{}.{}", prefix, replacement),
                    None => replacement.to_string(),
                },
                None => member.clone(),
            }
        })
        .collect()
}

/// Drop members qualified with an entity other than the primary cube
pub fn drop_custom_joins(dsl: &DslQuery) -> DslQuery {
    let local = |member: &String| entity_prefix(member).map_or(true, |e| e == dsl.cube);

    let mut fixed = dsl.clone();
    fixed.measures.retain(local);
    fixed.dimensions.retain(local);
    fixed.filters.retain(|f| local(&f.member));
    if fixed.time_dimension.as_ref().is_some_and(|td| !local(td)) {
        fixed.time_dimension = None;
        fixed.granularity = None;
        fixed.date_range = None;
    }
    if fixed.order.as_ref().is_some_and(|o| !local(&o.member)) {
        fixed.order = None;
    }
    fixed
}

pub fn prune_empty_filters(dsl: &DslQuery) -> DslQuery {
    let mut fixed = dsl.clone();
    fixed.filters.retain(|f| !f.values.is_empty());
    fixed
}

pub fn drop_time_dimension(dsl: &DslQuery) -> DslQuery {
    let mut fixed = dsl.clone();
    fixed.time_dimension = None;
    fixed.granularity = None;
    fixed.date_range = None;
    fixed
}

/// Replace all measures with the first measure the cube exposes
pub fn fallback_first_measure(dsl: &DslQuery, schema: &Schema) -> DslQuery {
    let first = match schema.entity(&dsl.cube) {
        Some(e) => e.measures.first().map(String::as_str),
        None => schema.all_measures().first().copied(),
    };
    let mut fixed = dsl.clone();
    if let Some(first) = first {
        fixed.measures = vec![first.to_string()];
    }
    fixed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ErrorPatternsFile;
    use crate::dsl::DslFilter;
    use crate::schema::EntitySchema;
    use anyhow::Result;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    fn agent() -> RepairAgent {
        RepairAgent::new(ErrorPatternsFile::embedded().unwrap().patterns).unwrap()
    }

    fn schema() -> Schema {
        Schema::new(vec![
            EntitySchema::new("Orders", &["revenue", "order_count"], &["status", "created_at"]),
            EntitySchema::new("Users", &["user_count"], &["city"]),
        ])
    }

    fn dsl(measures: &[&str]) -> DslQuery {
        let mut q = DslQuery::new("Orders");
        q.measures = measures.iter().map(|s| s.to_string()).collect();
        q
    }

    struct Reply(&'static str);

    #[async_trait]
    impl LlmClient for Reply {
        async fn invoke(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
        fn model_name(&self) -> &str {
            "reply"
        }
        fn provider_name(&self) -> &str {
            "Test"
        }
    }

    #[test]
    fn test_pattern_order_and_capture() {
        let agent = agent();
        let m = agent.match_error_pattern("Measure 'rev' not found").unwrap();
        assert_eq!(m.pattern.name, "measure_not_found");
        assert_eq!(m.captured.as_deref(), Some("rev"));

        let m = agent.match_error_pattern("Dimension 'Orders.cty' not found").unwrap();
        assert_eq!(m.pattern.name, "dimension_not_found");

        let m = agent.match_error_pattern("'Orders.foo' not found for path").unwrap();
        assert_eq!(m.pattern.fix_strategy, FixStrategy::FuzzyReplaceMember);

        let m = agent.match_error_pattern("query execution timed out after 30s").unwrap();
        assert!(!m.pattern.auto_fixable);

        assert!(agent.match_error_pattern("disk on fire").is_none());
    }

    #[test]
    fn test_bad_regex_is_config_error() {
        let result = RepairAgent::new(vec![ErrorPattern {
            name: "broken".to_string(),
            matcher: "(unclosed".to_string(),
            fix_strategy: FixStrategy::LlmRepair,
            auto_fixable: false,
        }]);
        assert!(matches!(result, Err(AgentError::Config { .. })));
    }

    #[test]
    fn test_fuzzy_replace_typo() {
        let fixed = fuzzy_replace_measure(&dsl(&["reveneu"]), &schema(), None);
        assert_eq!(fixed.measures, vec!["revenue"]);
    }

    #[test]
    fn test_fuzzy_replace_below_cutoff_is_unchanged() {
        let original = dsl(&["xyz"]);
        assert_eq!(fuzzy_replace_measure(&original, &schema(), None), original);
    }

    #[test]
    fn test_fuzzy_replace_targets_captured_member_and_keeps_prefix() {
        let fixed = fuzzy_replace_measure(&dsl(&["order_count", "Orders.rev"]), &schema(), Some("rev"));
        assert_eq!(fixed.measures, vec!["order_count", "Orders.revenue"]);
    }

    #[test]
    fn test_fuzzy_replace_dimension_keeps_prefix() {
        let schema = Schema::new(vec![EntitySchema::new(
            "Orders",
            &["order_count"],
            &["city", "status"],
        )]);
        let mut q = dsl(&["order_count"]);
        q.dimensions = vec!["Orders.cty".to_string()];

        let agent = agent();
        let m = agent.match_error_pattern("Dimension 'Orders.cty' not found").unwrap();
        let fixed = apply_fix(m.pattern.fix_strategy, &q, &schema, m.captured.as_deref());
        assert_eq!(fixed.dimensions, vec!["Orders.city"]);
        assert_eq!(fixed.measures, vec!["order_count"]);
    }

    #[test]
    fn test_member_fix_on_dimension_leaves_measures_alone() {
        let schema = Schema::new(vec![EntitySchema::new(
            "Orders",
            &["order_count", "revenue"],
            &["city", "status"],
        )]);
        let mut q = dsl(&["order_count", "legacy_revenue"]);
        q.dimensions = vec!["Orders.stauts".to_string()];

        let agent = agent();
        let m = agent.match_error_pattern("'Orders.stauts' was not found").unwrap();
        assert_eq!(m.pattern.fix_strategy, FixStrategy::FuzzyReplaceMember);
        let fixed = apply_fix(m.pattern.fix_strategy, &q, &schema, m.captured.as_deref());
        assert_eq!(fixed.measures, vec!["order_count", "legacy_revenue"]);
        assert_eq!(fixed.dimensions, vec!["Orders.status"]);
    }

    #[test]
    fn test_similarity_tie_break_is_schema_order() {
        assert_eq!(closest_match("ab", &["ac", "cb"]), Some("ac"));
        assert_eq!(closest_match("ab", &["cb", "ac"]), Some("cb"));
        assert!(similarity("rev", "total_revenue") >= SIMILARITY_CUTOFF);
    }

    #[test]
    fn test_structural_fixes() {
        let mut q = dsl(&["order_count", "Users.user_count"]);
        q.dimensions = vec!["Users.city".to_string(), "Orders.status".to_string()];
        q.filters = vec![
            DslFilter {
                member: "Orders.status".to_string(),
                operator: "equals".to_string(),
                values: vec![],
            },
            DslFilter {
                member: "Users.city".to_string(),
                operator: "equals".to_string(),
                values: vec!["Paris".to_string()],
            },
        ];
        q.time_dimension = Some("Orders.created_at".to_string());
        q.granularity = Some("day".to_string());

        let joined = drop_custom_joins(&q);
        assert_eq!(joined.measures, vec!["order_count"]);
        assert_eq!(joined.dimensions, vec!["Orders.status"]);
        assert_eq!(joined.filters.len(), 1);
        assert!(joined.time_dimension.is_some());

        let pruned = prune_empty_filters(&q);
        assert_eq!(pruned.filters.len(), 1);
        assert_eq!(pruned.filters[0].member, "Users.city");

        let untimed = drop_time_dimension(&q);
        assert_eq!(untimed.time_dimension, None);
        assert_eq!(untimed.granularity, None);

        let fallback = fallback_first_measure(&q, &schema());
        assert_eq!(fallback.measures, vec!["revenue"]);
    }

    #[tokio::test]
    async fn test_repair_auto_fix() {
        let outcome = agent()
            .repair(&DslCandidate::Valid(dsl(&["rev"])), "Measure 'rev' not found", &schema())
            .await;
        assert_eq!(outcome.pattern.as_deref(), Some("measure_not_found"));
        assert_eq!(outcome.strategy, FixStrategy::FuzzyReplaceMeasure);
        assert!(outcome.changed);
        assert_eq!(outcome.candidate.as_query().unwrap().measures, vec!["revenue"]);
    }

    #[tokio::test]
    async fn test_repair_without_llm_is_unchanged() {
        let candidate = DslCandidate::Valid(dsl(&["order_count"]));
        let outcome = agent().repair(&candidate, "syntax error near FROM", &schema()).await;
        assert_eq!(outcome.strategy, FixStrategy::LlmRepair);
        assert!(!outcome.changed);
        assert_eq!(outcome.candidate, candidate);
    }

    #[tokio::test]
    async fn test_llm_repair_used_and_parse_failure_keeps_query() {
        let candidate = DslCandidate::Valid(dsl(&["order_count"]));

        let fixing = agent().with_llm(
            Arc::new(Reply(r#"{"cube": "Orders", "measures": ["revenue"]}"#)),
            Duration::from_secs(1),
        );
        let outcome = fixing.repair(&candidate, "connection timed out", &schema()).await;
        assert!(outcome.changed);
        assert_eq!(outcome.candidate.as_query().unwrap().measures, vec!["revenue"]);

        let garbled = agent().with_llm(Arc::new(Reply("no idea")), Duration::from_secs(1));
        let outcome = garbled.repair(&candidate, "unknown failure", &schema()).await;
        assert!(outcome.pattern.is_none());
        assert_eq!(outcome.candidate, candidate);
    }
}
