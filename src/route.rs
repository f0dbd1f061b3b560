//! Route classification
//!
//! Decides whether a question is too underspecified to answer (and which
//! kinds of ambiguity it carries) or how much reasoning it needs. The
//! classifier is a pure function of the question, the schema and the keyword
//! tables it was built with.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::KeywordConfig;
use crate::schema::Schema;
use crate::text::{contains_keyword, humanize, normalize};

/// Category of underspecified user intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityType {
    MultipleMetrics,
    TimeRange,
    ComparisonBase,
    Aggregation,
    ContextMissing,
}

impl AmbiguityType {
    pub const ALL: [AmbiguityType; 5] = [
        AmbiguityType::MultipleMetrics,
        AmbiguityType::TimeRange,
        AmbiguityType::ComparisonBase,
        AmbiguityType::Aggregation,
        AmbiguityType::ContextMissing,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::MultipleMetrics => "multiple_metrics",
            Self::TimeRange => "time_range",
            Self::ComparisonBase => "comparison_base",
            Self::Aggregation => "aggregation",
            Self::ContextMissing => "context_missing",
        }
    }

    fn keywords<'a>(&self, config: &'a KeywordConfig) -> &'a [String] {
        let table = &config.ambiguity;
        match self {
            Self::MultipleMetrics => &table.multiple_metrics,
            Self::TimeRange => &table.time_range,
            Self::ComparisonBase => &table.comparison_base,
            Self::Aggregation => &table.aggregation,
            Self::ContextMissing => &table.context_missing,
        }
    }
}

impl std::fmt::Display for AmbiguityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutePath {
    FastPath,
    DeepPath,
}

/// Outcome of routing: exactly one of the two variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RouteDecision {
    Disambiguate {
        ambiguity_types: BTreeSet<AmbiguityType>,
        detected_keywords: Vec<String>,
    },
    Proceed {
        route: RoutePath,
        complexity: Complexity,
    },
}

impl RouteDecision {
    pub fn needs_disambiguation(&self) -> bool {
        matches!(self, RouteDecision::Disambiguate { .. })
    }

    /// Complexity for planning; ambiguous questions never reach the planner,
    /// so they report `Simple`.
    pub fn complexity(&self) -> Complexity {
        match self {
            RouteDecision::Proceed { complexity, .. } => *complexity,
            RouteDecision::Disambiguate { .. } => Complexity::Simple,
        }
    }
}

/// Keyword-driven router
#[derive(Debug, Clone)]
pub struct RouteClassifier {
    keywords: Arc<KeywordConfig>,
}

impl RouteClassifier {
    pub fn new(keywords: Arc<KeywordConfig>) -> Self {
        Self { keywords }
    }

    /// True iff the question contains a keyword from any ambiguity category
    pub fn detect_ambiguity(&self, query: &str) -> bool {
        !self.classify_ambiguity_types(query).is_empty()
    }

    pub fn classify_ambiguity_types(&self, query: &str) -> BTreeSet<AmbiguityType> {
        let text = normalize(query);
        AmbiguityType::ALL
            .into_iter()
            .filter(|t| t.keywords(&self.keywords).iter().any(|k| contains_keyword(&text, k)))
            .collect()
    }

    /// Every ambiguity keyword found, in category then table order
    pub fn detected_keywords(&self, query: &str) -> Vec<String> {
        let text = normalize(query);
        let mut found = Vec::new();
        for t in AmbiguityType::ALL {
            for keyword in t.keywords(&self.keywords) {
                if contains_keyword(&text, keyword) && !found.contains(keyword) {
                    found.push(keyword.clone());
                }
            }
        }
        found
    }

    pub fn assess_complexity(&self, query: &str, schema: &Schema) -> Complexity {
        let text = normalize(query);
        let table = &self.keywords.complexity;

        let metric_count = self.business_metric_count(&text, schema);
        if table.complex_indicators.iter().any(|k| contains_keyword(&text, k)) || metric_count > 2 {
            return Complexity::Complex;
        }
        if table.join_indicators.iter().any(|k| contains_keyword(&text, k)) || metric_count == 2 {
            return Complexity::Medium;
        }
        Complexity::Simple
    }

    pub fn route(complexity: Complexity) -> RoutePath {
        match complexity {
            Complexity::Simple => RoutePath::FastPath,
            Complexity::Medium | Complexity::Complex => RoutePath::DeepPath,
        }
    }

    pub fn classify(&self, query: &str, schema: &Schema) -> RouteDecision {
        let ambiguity_types = self.classify_ambiguity_types(query);
        if !ambiguity_types.is_empty() {
            return RouteDecision::Disambiguate {
                ambiguity_types,
                detected_keywords: self.detected_keywords(query),
            };
        }

        let complexity = self.assess_complexity(query, schema);
        RouteDecision::Proceed {
            route: Self::route(complexity),
            complexity,
        }
    }

    /// Distinct business metrics the question names. A configured metric
    /// word that is part of a schema measure already mentioned by name
    /// (`revenue` inside `total revenue`) counts once, as the measure.
    fn business_metric_count(&self, text: &str, schema: &Schema) -> usize {
        let mut metrics: BTreeSet<String> = schema
            .all_measures()
            .into_iter()
            .map(humanize)
            .filter(|spoken| contains_keyword(text, spoken))
            .collect();

        let words: Vec<String> = self
            .keywords
            .complexity
            .business_metrics
            .iter()
            .filter(|k| contains_keyword(text, k))
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !metrics.iter().any(|spoken| contains_keyword(spoken, k)))
            .collect();
        metrics.extend(words);
        metrics.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntitySchema;
    use proptest::prelude::*;

    fn classifier() -> RouteClassifier {
        RouteClassifier::new(Arc::new(KeywordConfig::embedded().unwrap()))
    }

    fn orders() -> Schema {
        Schema::new(vec![EntitySchema::new(
            "Orders",
            &["order_count", "total_revenue"],
            &["status", "created_at"],
        )])
    }

    #[test]
    fn test_time_range_ambiguity() {
        let c = classifier();
        let types = c.classify_ambiguity_types("last 7 days revenue");
        assert_eq!(types.into_iter().collect::<Vec<_>>(), vec![AmbiguityType::TimeRange]);
        assert!(c.detect_ambiguity("最近的销售额"));
    }

    #[test]
    fn test_unambiguous_question() {
        let c = classifier();
        assert!(!c.detect_ambiguity("order count"));
        assert!(!c.detect_ambiguity("total profit this month"));
    }

    #[test]
    fn test_detected_keywords_across_categories() {
        let c = classifier();
        let decision = c.classify("compare average revenue growth vs last year", &orders());
        match decision {
            RouteDecision::Disambiguate {
                ambiguity_types,
                detected_keywords,
            } => {
                assert!(ambiguity_types.contains(&AmbiguityType::ComparisonBase));
                assert!(ambiguity_types.contains(&AmbiguityType::Aggregation));
                assert!(ambiguity_types.contains(&AmbiguityType::TimeRange));
                assert!(detected_keywords.contains(&"growth".to_string()));
                assert!(detected_keywords.contains(&"average".to_string()));
            }
            other => panic!("expected disambiguation, got {other:?}"),
        }
    }

    #[test]
    fn test_complexity_levels() {
        let c = classifier();
        let schema = orders();
        assert_eq!(c.assess_complexity("order count", &schema), Complexity::Simple);
        assert_eq!(c.assess_complexity("order count by status", &schema), Complexity::Medium);
        assert_eq!(c.assess_complexity("revenue and profit", &schema), Complexity::Medium);
        assert_eq!(c.assess_complexity("revenue, profit and margin", &schema), Complexity::Complex);
        assert_eq!(c.assess_complexity("order count trend", &schema), Complexity::Complex);
    }

    #[test]
    fn test_measure_name_and_metric_word_count_once() {
        let c = classifier();
        let schema = Schema::new(vec![EntitySchema::new("Orders", &["total_revenue"], &[])]);
        assert_eq!(c.assess_complexity("total revenue", &schema), Complexity::Simple);
        assert_eq!(
            c.classify("total revenue", &schema),
            RouteDecision::Proceed {
                route: RoutePath::FastPath,
                complexity: Complexity::Simple
            }
        );
        assert_eq!(c.assess_complexity("total revenue and profit", &schema), Complexity::Medium);
        assert_eq!(
            c.assess_complexity("total revenue, profit and margin", &schema),
            Complexity::Complex
        );
    }

    #[test]
    fn test_route_mapping() {
        assert_eq!(RouteClassifier::route(Complexity::Simple), RoutePath::FastPath);
        assert_eq!(RouteClassifier::route(Complexity::Medium), RoutePath::DeepPath);
        assert_eq!(RouteClassifier::route(Complexity::Complex), RoutePath::DeepPath);
    }

    #[test]
    fn test_fast_path_decision() {
        let decision = classifier().classify("order count", &orders());
        assert_eq!(
            decision,
            RouteDecision::Proceed {
                route: RoutePath::FastPath,
                complexity: Complexity::Simple
            }
        );
        assert!(!decision.needs_disambiguation());
    }

    proptest! {
        #[test]
        fn prop_any_ambiguity_keyword_is_detected(
            category in 0usize..5,
            index in 0usize..64,
            prefix in "[a-z ]{0,12}",
            suffix in "[a-z ]{0,12}",
        ) {
            let c = classifier();
            let kind = AmbiguityType::ALL[category];
            let keywords = kind.keywords(&c.keywords);
            let keyword = &keywords[index % keywords.len()];
            let query = format!("{prefix} {keyword} {suffix}");
            prop_assert!(c.detect_ambiguity(&query));
            prop_assert!(c.classify_ambiguity_types(&query).contains(&kind));
        }
    }
}
