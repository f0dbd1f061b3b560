//! Semantic-layer query candidates
//!
//! A [`DslCandidate`] is either a structurally complete query or an explicit
//! failure with a reason. Generation never panics and never returns a
//! half-built query: anything that cannot be turned into a [`DslQuery`]
//! becomes `Invalid`, which the critic rejects uniformly.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Sort direction for the order clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub member: String,
    pub direction: OrderDirection,
}

/// A filter over a fully-qualified member (`Entity.field`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DslFilter {
    pub member: String,
    pub operator: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// A structurally complete semantic-layer query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DslQuery {
    pub cube: String,
    #[serde(default)]
    pub measures: Vec<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub filters: Vec<DslFilter>,
    #[serde(default, alias = "timeDimension", skip_serializing_if = "Option::is_none")]
    pub time_dimension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<String>,
    #[serde(default, alias = "dateRange", skip_serializing_if = "Option::is_none")]
    pub date_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl DslQuery {
    pub fn new(cube: impl Into<String>) -> Self {
        Self {
            cube: cube.into(),
            ..Default::default()
        }
    }

    /// Qualify a bare member with this query's cube
    pub fn qualify(&self, member: &str) -> String {
        if member.contains('.') {
            member.to_string()
        } else {
            format!("{}.{}", self.cube, member)
        }
    }

    /// Every member the query references, in a stable order
    pub fn referenced_members(&self) -> Vec<&str> {
        let mut members: Vec<&str> = Vec::new();
        members.extend(self.measures.iter().map(String::as_str));
        members.extend(self.dimensions.iter().map(String::as_str));
        members.extend(self.filters.iter().map(|f| f.member.as_str()));
        if let Some(td) = &self.time_dimension {
            members.push(td);
        }
        if let Some(order) = &self.order {
            members.push(&order.member);
        }
        members
    }

    /// Render the query in the semantic layer's JSON load format
    pub fn to_semantic_query(&self) -> Value {
        let mut query = json!({
            "measures": self.measures.iter().map(|m| self.qualify(m)).collect::<Vec<_>>(),
            "dimensions": self.dimensions.iter().map(|d| self.qualify(d)).collect::<Vec<_>>(),
            "filters": self.filters.iter().map(|f| json!({
                "member": self.qualify(&f.member),
                "operator": f.operator,
                "values": f.values,
            })).collect::<Vec<_>>(),
        });

        if let Some(td) = &self.time_dimension {
            let mut entry = json!({ "dimension": self.qualify(td) });
            if let Some(granularity) = &self.granularity {
                entry["granularity"] = json!(granularity);
            }
            if let Some(range) = &self.date_range {
                entry["dateRange"] = json!(range);
            }
            query["timeDimensions"] = json!([entry]);
        }
        if let Some(order) = &self.order {
            let mut clause = serde_json::Map::new();
            clause.insert(self.qualify(&order.member), json!(order.direction));
            query["order"] = Value::Object(clause);
        }
        if let Some(limit) = self.limit {
            query["limit"] = json!(limit);
        }
        query
    }
}

/// Output of generation: always exactly one of the two variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DslCandidate {
    Valid(DslQuery),
    Invalid { reason: String },
}

impl DslCandidate {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, DslCandidate::Valid(_))
    }

    pub fn as_query(&self) -> Option<&DslQuery> {
        match self {
            DslCandidate::Valid(q) => Some(q),
            DslCandidate::Invalid { .. } => None,
        }
    }

    /// Parse model output into a candidate. Never fails: anything that is not
    /// a usable query object becomes `Invalid`.
    pub fn parse_llm_output(text: &str) -> Self {
        let Some(json) = extract_json_object(text) else {
            return Self::invalid("model output contained no JSON object");
        };

        let value: Value = match serde_json::from_str(json) {
            Ok(v) => v,
            Err(e) => return Self::invalid(format!("model output is not valid JSON: {}", e)),
        };
        if let Some(error) = value.get("error").and_then(Value::as_str) {
            return Self::invalid(error.to_string());
        }

        match serde_json::from_value::<DslQuery>(value) {
            Ok(query) if query.cube.trim().is_empty() => Self::invalid("no target entity"),
            Ok(query) => Self::Valid(query),
            Err(e) => Self::invalid(format!("model output is not a query object: {}", e)),
        }
    }
}

/// `Orders.total_revenue` → `total_revenue`
pub fn strip_entity_prefix(member: &str) -> &str {
    member.rsplit_once('.').map_or(member, |(_, field)| field)
}

/// `Orders.total_revenue` → `Some("Orders")`
pub fn entity_prefix(member: &str) -> Option<&str> {
    member.rsplit_once('.').map(|(entity, _)| entity)
}

/// Locate the JSON object in model output, tolerating code fences and prose
fn extract_json_object(text: &str) -> Option<&str> {
    let text = text.trim();
    let text = if let Some(rest) = text.split("```json").nth(1) {
        rest.split("```").next().unwrap_or(rest)
    } else if text.starts_with("```") {
        text.split("```").nth(1).unwrap_or(text)
    } else {
        text
    };

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
