//! Critic
//!
//! Validates a candidate against the schema and business rules. Validation is
//! a pure function of `(candidate, schema, question)`: the same inputs always
//! produce the same report. Only `valid` drives control flow; `score` is
//! informational.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::KeywordConfig;
use crate::dsl::{strip_entity_prefix, DslCandidate, DslQuery};
use crate::schema::Schema;
use crate::text::{contains_keyword, normalize};

const MAX_MEASURES: usize = 5;
const MAX_LIMIT: u64 = 1000;

/// Configured business rule; only ever produces warnings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessRule {
    pub name: String,
    /// Fires when this text appears anywhere in the serialized query
    #[serde(default)]
    pub pattern: Option<String>,
    /// Fires when this member is referenced (entity prefix ignored)
    #[serde(default)]
    pub field: Option<String>,
    pub issue: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticWarning {
    pub rule: String,
    pub issue: String,
    pub suggestion: String,
}

impl CriticWarning {
    fn new(rule: &str, issue: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            issue: issue.into(),
            suggestion: suggestion.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<CriticWarning>,
    pub score: f64,
}

impl CriticReport {
    fn from_findings(errors: Vec<String>, warnings: Vec<CriticWarning>) -> Self {
        let score =
            (1.0 - 0.5 * errors.len() as f64 - 0.1 * warnings.len() as f64).clamp(0.0, 1.0);
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
            score,
        }
    }
}

pub struct Critic {
    rules: Vec<BusinessRule>,
    keywords: Arc<KeywordConfig>,
}

impl Critic {
    pub fn new(rules: Vec<BusinessRule>, keywords: Arc<KeywordConfig>) -> Self {
        Self { rules, keywords }
    }

    pub fn validate(&self, candidate: &DslCandidate, schema: &Schema, query: &str) -> CriticReport {
        let dsl = match candidate {
            DslCandidate::Invalid { reason } => {
                return CriticReport {
                    valid: false,
                    errors: vec![reason.clone()],
                    warnings: vec![],
                    score: 0.0,
                }
            }
            DslCandidate::Valid(dsl) => dsl,
        };

        let mut errors = Vec::new();
        Self::check_members(dsl, schema, &mut errors);

        let mut warnings = self.check_business_rules(dsl);
        warnings.extend(self.check_best_practices(dsl, query));

        CriticReport::from_findings(errors, warnings)
    }

    fn check_members(dsl: &DslQuery, schema: &Schema, errors: &mut Vec<String>) {
        if dsl.cube.trim().is_empty() {
            errors.push("Query has no primary entity".to_string());
            return;
        }
        let Some(entity) = schema.entity(&dsl.cube) else {
            errors.push(format!("Unknown entity '{}'", dsl.cube));
            return;
        };

        for measure in &dsl.measures {
            if !entity.has_measure(strip_entity_prefix(measure)) {
                errors.push(format!(
                    "Measure '{}' does not exist on entity '{}'",
                    measure, entity.name
                ));
            }
        }
        for dimension in &dsl.dimensions {
            if !entity.has_dimension(strip_entity_prefix(dimension)) {
                errors.push(format!(
                    "Dimension '{}' does not exist on entity '{}'",
                    dimension, entity.name
                ));
            }
        }
    }

    fn check_business_rules(&self, dsl: &DslQuery) -> Vec<CriticWarning> {
        let serialized = serde_json::to_string(dsl).unwrap_or_default().to_lowercase();
        let members: Vec<&str> = dsl
            .referenced_members()
            .into_iter()
            .map(strip_entity_prefix)
            .collect();

        self.rules
            .iter()
            .filter(|rule| {
                let pattern_hit = rule
                    .pattern
                    .as_ref()
                    .is_some_and(|p| !p.is_empty() && serialized.contains(&p.to_lowercase()));
                let field_hit = rule
                    .field
                    .as_ref()
                    .is_some_and(|f| members.contains(&strip_entity_prefix(f)));
                pattern_hit || field_hit
            })
            .map(|rule| CriticWarning::new(&rule.name, &rule.issue, &rule.suggestion))
            .collect()
    }

    fn check_best_practices(&self, dsl: &DslQuery, query: &str) -> Vec<CriticWarning> {
        let mut warnings = Vec::new();

        if dsl.time_dimension.is_none() && dsl.dimensions.is_empty() && self.asks_for_breakdown(query)
        {
            warnings.push(CriticWarning::new(
                "missing_breakdown",
                "The question asks for a breakdown but the query has no time dimension or dimensions",
                "Add a time dimension or group by a dimension",
            ));
        }
        if dsl.measures.len() > MAX_MEASURES {
            warnings.push(CriticWarning::new(
                "too_many_measures",
                format!("Query requests {} measures", dsl.measures.len()),
                format!("Keep to at most {} measures per query", MAX_MEASURES),
            ));
        }
        if dsl.limit.is_some_and(|l| l > MAX_LIMIT) {
            warnings.push(CriticWarning::new(
                "large_limit",
                format!("Limit exceeds {} rows", MAX_LIMIT),
                "Lower the limit or aggregate further",
            ));
        }
        warnings
    }

    /// Time-range, granularity or grouping language in the question
    fn asks_for_breakdown(&self, query: &str) -> bool {
        let text = normalize(query);
        let k = &self.keywords;
        k.time_ranges.iter().any(|t| contains_keyword(&text, &t.phrase))
            || k
                .granularities
                .iter()
                .flat_map(|g| g.keywords.iter())
                .any(|w| contains_keyword(&text, w))
            || k
                .complexity
                .join_indicators
                .iter()
                .any(|w| contains_keyword(&text, w))
    }
}
