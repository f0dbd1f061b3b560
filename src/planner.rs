//! Query Planner
//!
//! Deterministic decomposition of a question into a structured plan against
//! the schema. No AI involved: every decision comes from the keyword tables
//! and the schema's declared vocabulary.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::KeywordConfig;
use crate::route::{Complexity, RouteDecision};
use crate::schema::{EntitySchema, Schema};
use crate::text::{contains_keyword, humanize, normalize, tokens};

/// Member-name tokens too generic to identify a member on their own
const GENERIC_TOKENS: &[&str] = &[
    "total", "count", "sum", "avg", "average", "num", "number", "amount", "value", "id", "at",
    "of", "per", "is",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRequirements {
    pub has_time_filter: bool,
    pub time_range: Option<String>,
    pub granularity: Option<String>,
}

/// Filter on an unqualified member; the generator qualifies it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFilter {
    pub member: String,
    pub operator: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub target_entities: Vec<String>,
    pub required_measures: Vec<String>,
    pub required_dimensions: Vec<String>,
    pub time_requirements: TimeRequirements,
    pub filters: Vec<PlanFilter>,
    pub needs_calculation: bool,
    pub estimated_complexity: Complexity,
}

/// Keyword-driven planner
#[derive(Debug, Clone)]
pub struct QueryPlanner {
    keywords: Arc<KeywordConfig>,
}

impl QueryPlanner {
    pub fn new(keywords: Arc<KeywordConfig>) -> Self {
        Self { keywords }
    }

    pub fn plan(&self, query: &str, route: &RouteDecision, schema: &Schema) -> QueryPlan {
        let text = normalize(query);

        let target_entities = self.identify_target_entities(&text, schema);
        let entities: Vec<&EntitySchema> = target_entities
            .iter()
            .filter_map(|name| schema.entity(name))
            .collect();

        QueryPlan {
            required_measures: self.identify_measures(&text, &entities),
            required_dimensions: self.identify_dimensions(&text, &entities),
            time_requirements: self.identify_time_requirements(&text),
            filters: self.identify_filters(&text),
            needs_calculation: self.needs_calculation(&text),
            estimated_complexity: route.complexity(),
            target_entities,
        }
    }

    /// Entities named directly or through an alias, in schema order. Falls
    /// back to the first declared entity.
    pub fn identify_target_entities(&self, text: &str, schema: &Schema) -> Vec<String> {
        let aliased: Vec<&str> = self
            .keywords
            .entity_aliases
            .iter()
            .filter(|(keyword, _)| contains_keyword(text, keyword))
            .map(|(_, entity)| entity.as_str())
            .collect();

        let mut targets: Vec<String> = schema
            .entities
            .iter()
            .filter(|e| mentions_entity(text, &e.name) || aliased.contains(&e.name.as_str()))
            .map(|e| e.name.clone())
            .collect();

        if targets.is_empty() {
            if let Some(first) = schema.first_entity() {
                targets.push(first.name.clone());
            }
        }
        targets
    }

    /// Measures of the target entities the question asks for. Falls back to
    /// the first available measure.
    pub fn identify_measures(&self, text: &str, entities: &[&EntitySchema]) -> Vec<String> {
        let candidates = union(entities.iter().flat_map(|e| e.measures.iter()));

        let mut measures: Vec<String> = candidates
            .iter()
            .filter(|m| {
                mentions_member(text, m)
                    || self
                        .keywords
                        .measure_synonyms
                        .iter()
                        .any(|(keyword, target)| {
                            contains_keyword(text, keyword) && m.contains(target.as_str())
                        })
            })
            .map(|m| m.to_string())
            .collect();

        if measures.is_empty() {
            if let Some(first) = candidates.first() {
                measures.push(first.to_string());
            }
        }
        measures
    }

    /// Dimensions the question groups by. No fallback.
    pub fn identify_dimensions(&self, text: &str, entities: &[&EntitySchema]) -> Vec<String> {
        let joins = &self.keywords.complexity.join_indicators;

        union(entities.iter().flat_map(|e| e.dimensions.iter()))
            .into_iter()
            .filter(|d| {
                contains_keyword(text, &humanize(d))
                    || significant_tokens(d).iter().any(|token| {
                        joins
                            .iter()
                            .filter(|j| j.is_ascii())
                            .any(|j| contains_keyword(text, &format!("{} {}", j, token)))
                    })
                    || self
                        .keywords
                        .dimension_synonyms
                        .iter()
                        .any(|(keyword, target)| {
                            contains_keyword(text, keyword) && d.contains(target.as_str())
                        })
            })
            .map(String::from)
            .collect()
    }

    /// Range and granularity are matched independently
    pub fn identify_time_requirements(&self, text: &str) -> TimeRequirements {
        let time_range = self
            .keywords
            .time_ranges
            .iter()
            .find(|entry| contains_keyword(text, &entry.phrase))
            .map(|entry| entry.range.clone());

        let granularity = self
            .keywords
            .granularities
            .iter()
            .find(|entry| entry.keywords.iter().any(|k| contains_keyword(text, k)))
            .map(|entry| entry.granularity.clone());

        TimeRequirements {
            has_time_filter: time_range.is_some() || granularity.is_some(),
            time_range,
            granularity,
        }
    }

    pub fn identify_filters(&self, text: &str) -> Vec<PlanFilter> {
        self.keywords
            .status_filters
            .iter()
            .filter(|entry| entry.phrases.iter().any(|p| contains_keyword(text, p)))
            .map(|entry| PlanFilter {
                member: "status".to_string(),
                operator: "equals".to_string(),
                values: entry.values.clone(),
            })
            .collect()
    }

    pub fn needs_calculation(&self, text: &str) -> bool {
        self.keywords
            .calculation_words
            .iter()
            .any(|w| contains_keyword(text, w))
    }
}

fn mentions_entity(text: &str, entity: &str) -> bool {
    let name = humanize(entity);
    let singular = name.strip_suffix('s').unwrap_or(&name);
    contains_keyword(text, &name) || (!singular.is_empty() && contains_keyword(text, singular))
}

fn mentions_member(text: &str, member: &str) -> bool {
    contains_keyword(text, &humanize(member))
        || significant_tokens(member)
            .iter()
            .any(|token| contains_keyword(text, token))
}

fn significant_tokens(member: &str) -> Vec<String> {
    tokens(member)
        .into_iter()
        .filter(|t| t.len() > 2 && !GENERIC_TOKENS.contains(&t.as_str()))
        .collect()
}

fn union<'a>(items: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::new();
    for item in items {
        if !out.contains(&item.as_str()) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RoutePath;
    use pretty_assertions::assert_eq;

    fn planner() -> QueryPlanner {
        QueryPlanner::new(Arc::new(KeywordConfig::embedded().unwrap()))
    }

    fn simple() -> RouteDecision {
        RouteDecision::Proceed {
            route: RoutePath::FastPath,
            complexity: Complexity::Simple,
        }
    }

    fn shop() -> Schema {
        Schema::new(vec![
            EntitySchema::new(
                "Orders",
                &["order_count", "total_revenue"],
                &["status", "city", "created_at"],
            ),
            EntitySchema::new("Users", &["user_count"], &["signup_date", "region"]),
        ])
    }

    #[test]
    fn test_simple_plan() {
        let schema = Schema::new(vec![EntitySchema::new("Orders", &["order_count"], &["status"])]);
        let plan = planner().plan("order count", &simple(), &schema);
        assert_eq!(
            plan,
            QueryPlan {
                target_entities: vec!["Orders".to_string()],
                required_measures: vec!["order_count".to_string()],
                required_dimensions: vec![],
                time_requirements: TimeRequirements::default(),
                filters: vec![],
                needs_calculation: false,
                estimated_complexity: Complexity::Simple,
            }
        );
    }

    #[test]
    fn test_entity_alias_and_default() {
        let p = planner();
        let schema = shop();
        assert_eq!(p.identify_target_entities("how many customers", &schema), vec!["Users"]);
        assert_eq!(p.identify_target_entities("用户数量", &schema), vec!["Users"]);
        assert_eq!(p.identify_target_entities("what happened", &schema), vec!["Orders"]);
        assert!(p.identify_target_entities("anything", &Schema::default()).is_empty());
    }

    #[test]
    fn test_measure_matching_and_fallback() {
        let p = planner();
        let schema = shop();
        let orders = vec![schema.entity("Orders").unwrap()];

        assert_eq!(p.identify_measures("revenue this month", &orders), vec!["total_revenue"]);
        assert_eq!(p.identify_measures("total sales", &orders), vec!["total_revenue"]);
        assert_eq!(p.identify_measures("销售额", &orders), vec!["total_revenue"]);
        assert_eq!(p.identify_measures("something else", &orders), vec!["order_count"]);
        assert!(p.identify_measures("revenue", &[]).is_empty());
    }

    #[test]
    fn test_dimension_matching() {
        let p = planner();
        let schema = shop();
        let orders = vec![schema.entity("Orders").unwrap()];

        assert_eq!(p.identify_dimensions("order count by status", &orders), vec!["status"]);
        assert_eq!(p.identify_dimensions("revenue per city", &orders), vec!["city"]);
        assert_eq!(p.identify_dimensions("各城市的收入", &orders), vec!["city"]);
        assert!(p.identify_dimensions("order count", &orders).is_empty());
    }

    #[test]
    fn test_time_requirements() {
        let p = planner();
        let t = p.identify_time_requirements("revenue this month");
        assert!(t.has_time_filter);
        assert_eq!(t.time_range.as_deref(), Some("this month"));
        assert_eq!(t.granularity, None);

        let t = p.identify_time_requirements("weekly orders");
        assert_eq!(t.time_range, None);
        assert_eq!(t.granularity.as_deref(), Some("week"));

        let t = p.identify_time_requirements("本月每天的订单数");
        assert_eq!(t.time_range.as_deref(), Some("this month"));
        assert_eq!(t.granularity.as_deref(), Some("day"));

        assert!(!p.identify_time_requirements("order count").has_time_filter);
    }

    #[test]
    fn test_status_filters() {
        let filters = planner().identify_filters("completed or cancelled orders");
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].member, "status");
        assert_eq!(filters[0].operator, "equals");
        assert_eq!(filters[0].values, vec!["completed"]);
        assert_eq!(filters[1].values, vec!["cancelled"]);
    }

    #[test]
    fn test_needs_calculation() {
        let p = planner();
        assert!(p.needs_calculation("conversion rate"));
        assert!(p.needs_calculation("退款占比"));
        assert!(!p.needs_calculation("order count"));
    }
}
