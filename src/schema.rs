//! Semantic-layer schema
//!
//! A schema is an ordered list of entities (cubes). Declaration order is
//! meaningful: it decides default entities, default measures and fuzzy-match
//! tie-breaks.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One cube with the members it exposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: String,
    #[serde(default)]
    pub measures: Vec<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
}

impl EntitySchema {
    pub fn new(name: impl Into<String>, measures: &[&str], dimensions: &[&str]) -> Self {
        Self {
            name: name.into(),
            measures: measures.iter().map(|m| m.to_string()).collect(),
            dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
        }
    }

    pub fn has_measure(&self, name: &str) -> bool {
        self.measures.iter().any(|m| m == name)
    }

    pub fn has_dimension(&self, name: &str) -> bool {
        self.dimensions.iter().any(|d| d == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub entities: Vec<EntitySchema>,
}

impl Schema {
    pub fn new(entities: Vec<EntitySchema>) -> Self {
        Self { entities }
    }

    pub fn entity(&self, name: &str) -> Option<&EntitySchema> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn first_entity(&self) -> Option<&EntitySchema> {
        self.entities.first()
    }

    /// Every measure across all entities, in declaration order, deduplicated
    pub fn all_measures(&self) -> Vec<&str> {
        dedup(self.entities.iter().flat_map(|e| e.measures.iter()))
    }

    pub fn all_dimensions(&self) -> Vec<&str> {
        dedup(self.entities.iter().flat_map(|e| e.dimensions.iter()))
    }

    /// Plain-text rendering used inside LLM prompts
    pub fn describe(&self) -> String {
        let mut text = String::new();
        for entity in &self.entities {
            text.push_str(&format!("## {}\n", entity.name));
            text.push_str(&format!("- measures: {}\n", entity.measures.join(", ")));
            text.push_str(&format!("- dimensions: {}\n", entity.dimensions.join(", ")));
        }
        text
    }

    /// Load a schema from a YAML or JSON file (JSON is valid YAML)
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading schema {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing schema {}", path.display()))
    }
}

fn dedup<'a>(items: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
    let mut seen = Vec::new();
    for item in items {
        if !seen.contains(&item.as_str()) {
            seen.push(item.as_str());
        }
    }
    seen
}

/// Read-only schema lookup per tenant
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn get_schema(&self, tenant_id: &str) -> Result<Schema>;
}

/// Serves schemas held in memory, optionally per tenant
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaProvider {
    default: Option<Schema>,
    tenants: HashMap<String, Schema>,
}

impl StaticSchemaProvider {
    /// Same schema for every tenant
    pub fn new(schema: Schema) -> Self {
        Self {
            default: Some(schema),
            tenants: HashMap::new(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>, schema: Schema) -> Self {
        self.tenants.insert(tenant_id.into(), schema);
        self
    }
}

#[async_trait]
impl SchemaProvider for StaticSchemaProvider {
    async fn get_schema(&self, tenant_id: &str) -> Result<Schema> {
        self.tenants
            .get(tenant_id)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| anyhow!("no schema registered for tenant {}", tenant_id))
    }
}
