//! Agent configuration
//!
//! Runtime limits live in [`AgentConfig`]. The keyword tables, business rules
//! and error patterns are versioned YAML files: the copies under `config/`
//! are compiled in as defaults and a directory on disk can override any of
//! them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::critic::BusinessRule;
use crate::error::{AgentError, AgentResult};
use crate::repair::ErrorPattern;

const DEFAULT_KEYWORDS: &str = include_str!("../config/keywords.yaml");
const DEFAULT_BUSINESS_RULES: &str = include_str!("../config/business_rules.yaml");
const DEFAULT_ERROR_PATTERNS: &str = include_str!("../config/error_patterns.yaml");

/// Limits and defaults for a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Hard cap on repair attempts per run
    pub max_repair_attempts: u32,
    /// Cap on critic-driven regenerations per run
    pub max_regenerations: u32,
    /// Number of similar historical examples to put in generation prompts
    pub few_shot_top_k: usize,
    /// Generate the first candidate with the LLM instead of the rule compiler
    pub use_llm_generation: bool,
    pub run_timeout_secs: u64,
    pub llm_timeout_secs: u64,
    pub executor_timeout_secs: u64,
    pub schema_timeout_secs: u64,
    pub default_granularity: String,
    pub default_limit: u64,
    pub default_order_field: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_repair_attempts: 3,
            max_regenerations: 3,
            few_shot_top_k: 3,
            use_llm_generation: false,
            run_timeout_secs: 60,
            llm_timeout_secs: 30,
            executor_timeout_secs: 30,
            schema_timeout_secs: 10,
            default_granularity: "day".to_string(),
            default_limit: 10,
            default_order_field: "created_at".to_string(),
        }
    }
}

impl AgentConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn executor_timeout(&self) -> Duration {
        Duration::from_secs(self.executor_timeout_secs)
    }

    pub fn schema_timeout(&self) -> Duration {
        Duration::from_secs(self.schema_timeout_secs)
    }
}

/// The five ambiguity categories, each with its trigger keywords
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AmbiguityKeywords {
    #[serde(default)]
    pub multiple_metrics: Vec<String>,
    #[serde(default)]
    pub time_range: Vec<String>,
    #[serde(default)]
    pub comparison_base: Vec<String>,
    #[serde(default)]
    pub aggregation: Vec<String>,
    #[serde(default)]
    pub context_missing: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplexityKeywords {
    #[serde(default)]
    pub complex_indicators: Vec<String>,
    #[serde(default)]
    pub join_indicators: Vec<String>,
    #[serde(default)]
    pub business_metrics: Vec<String>,
}

/// Relative-time phrase and the canonical range token it maps to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRangeEntry {
    pub phrase: String,
    pub range: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GranularityEntry {
    pub granularity: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusFilterEntry {
    pub values: Vec<String>,
    pub phrases: Vec<String>,
}

/// Keyword tables used by routing, planning and generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordConfig {
    pub version: String,
    #[serde(default)]
    pub ambiguity: AmbiguityKeywords,
    #[serde(default)]
    pub complexity: ComplexityKeywords,
    /// Query keyword → entity name
    #[serde(default)]
    pub entity_aliases: BTreeMap<String, String>,
    /// Query keyword → substring of a measure name
    #[serde(default)]
    pub measure_synonyms: BTreeMap<String, String>,
    /// Query keyword → substring of a dimension name
    #[serde(default)]
    pub dimension_synonyms: BTreeMap<String, String>,
    #[serde(default)]
    pub time_ranges: Vec<TimeRangeEntry>,
    #[serde(default)]
    pub granularities: Vec<GranularityEntry>,
    #[serde(default)]
    pub status_filters: Vec<StatusFilterEntry>,
    #[serde(default)]
    pub calculation_words: Vec<String>,
    #[serde(default)]
    pub ranking_words: Vec<String>,
    /// Substrings that mark a dimension as temporal
    #[serde(default)]
    pub temporal_markers: Vec<String>,
}

impl KeywordConfig {
    /// The tables shipped with the crate
    pub fn embedded() -> AgentResult<Self> {
        parse_yaml(DEFAULT_KEYWORDS, "keywords.yaml")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusinessRulesFile {
    pub version: String,
    #[serde(default)]
    pub rules: Vec<BusinessRule>,
}

impl BusinessRulesFile {
    pub fn embedded() -> AgentResult<Self> {
        parse_yaml(DEFAULT_BUSINESS_RULES, "business_rules.yaml")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorPatternsFile {
    pub version: String,
    #[serde(default)]
    pub patterns: Vec<ErrorPattern>,
}

impl ErrorPatternsFile {
    pub fn embedded() -> AgentResult<Self> {
        parse_yaml(DEFAULT_ERROR_PATTERNS, "error_patterns.yaml")
    }
}

/// Loads configuration files, falling back to the embedded defaults
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Resolve the config directory
    ///
    /// Order:
    /// 1. `AGENT_CONFIG_DIR` environment variable
    /// 2. Relative `config` directory
    pub fn from_env() -> Self {
        if let Ok(dir) = std::env::var("AGENT_CONFIG_DIR") {
            return Self::new(dir);
        }
        Self::new("config")
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load `agent.yaml`, or the defaults when the file is absent
    pub fn load_agent_config(&self) -> AgentResult<AgentConfig> {
        match self.read_override("agent.yaml")? {
            Some(text) => parse_yaml(&text, "agent.yaml"),
            None => Ok(AgentConfig::default()),
        }
    }

    pub fn load_keywords(&self) -> AgentResult<KeywordConfig> {
        let config: KeywordConfig = match self.read_override("keywords.yaml")? {
            Some(text) => parse_yaml(&text, "keywords.yaml")?,
            None => KeywordConfig::embedded()?,
        };
        info!(version = %config.version, "Loaded keyword tables");
        Ok(config)
    }

    pub fn load_business_rules(&self) -> AgentResult<Vec<BusinessRule>> {
        let file: BusinessRulesFile = match self.read_override("business_rules.yaml")? {
            Some(text) => parse_yaml(&text, "business_rules.yaml")?,
            None => BusinessRulesFile::embedded()?,
        };
        info!(version = %file.version, rules = file.rules.len(), "Loaded business rules");
        Ok(file.rules)
    }

    pub fn load_error_patterns(&self) -> AgentResult<Vec<ErrorPattern>> {
        let file: ErrorPatternsFile = match self.read_override("error_patterns.yaml")? {
            Some(text) => parse_yaml(&text, "error_patterns.yaml")?,
            None => ErrorPatternsFile::embedded()?,
        };
        info!(version = %file.version, patterns = file.patterns.len(), "Loaded error patterns");
        Ok(file.patterns)
    }

    fn read_override(&self, file_name: &str) -> AgentResult<Option<String>> {
        let path = self.config_dir.join(file_name);
        if !path.exists() {
            debug!(path = %path.display(), "No override, using embedded default");
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| AgentError::config(format!("failed to read {}: {}", path.display(), e)))
    }
}

fn parse_yaml<T: serde::de::DeserializeOwned>(text: &str, name: &str) -> AgentResult<T> {
    serde_yaml::from_str(text).map_err(|e| AgentError::config(format!("{}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_keywords_parse() {
        let config = KeywordConfig::embedded().unwrap();
        assert!(!config.version.is_empty());
        assert!(config.ambiguity.time_range.contains(&"last".to_string()));
        assert!(!config.time_ranges.is_empty());
        assert_eq!(config.granularities.len(), 3);
        assert_eq!(
            config.entity_aliases.get("订单").map(String::as_str),
            Some("Orders")
        );
    }

    #[test]
    fn test_embedded_rules_and_patterns_parse() {
        let rules = BusinessRulesFile::embedded().unwrap();
        assert!(!rules.rules.is_empty());

        let patterns = ErrorPatternsFile::embedded().unwrap();
        assert_eq!(patterns.patterns[0].name, "measure_not_found");
    }

    #[test]
    fn test_default_limits() {
        let config = AgentConfig::default();
        assert_eq!(config.max_repair_attempts, 3);
        assert_eq!(config.run_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_missing_dir_falls_back_to_embedded() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path().join("absent"));
        assert_eq!(loader.load_agent_config().unwrap(), AgentConfig::default());
        assert_eq!(loader.load_keywords().unwrap(), KeywordConfig::embedded().unwrap());
    }

    #[test]
    fn test_override_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("agent.yaml"),
            "max_repair_attempts: 2\nrun_timeout_secs: 5\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("keywords.yaml"),
            "version: \"test\"\nranking_words: [top]\n",
        )
        .unwrap();

        let loader = ConfigLoader::new(dir.path());
        let agent = loader.load_agent_config().unwrap();
        assert_eq!(agent.max_repair_attempts, 2);
        assert_eq!(agent.run_timeout_secs, 5);
        assert_eq!(agent.max_regenerations, 3);

        let keywords = loader.load_keywords().unwrap();
        assert_eq!(keywords.version, "test");
        assert!(keywords.ambiguity.time_range.is_empty());
    }

    #[test]
    fn test_malformed_override_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("error_patterns.yaml"), "patterns: {oops").unwrap();
        let err = ConfigLoader::new(dir.path()).load_error_patterns().unwrap_err();
        assert!(matches!(err, AgentError::Config { .. }));
    }
}
