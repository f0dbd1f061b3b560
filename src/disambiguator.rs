//! Clarification questions for ambiguous requests
//!
//! Reaching the disambiguator ends a run: the caller shows the questions to
//! the user and submits a clarified question as a new run.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::route::AmbiguityType;
use crate::schema::Schema;

/// Most questions asked at once
pub const MAX_QUESTIONS: usize = 3;

/// Most schema-derived options offered per question
pub const MAX_OPTIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Single,
    Multiple,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationQuestion {
    pub question: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub options: Vec<String>,
    pub required: bool,
    /// Which ambiguity this resolves
    pub ambiguity: AmbiguityType,
}

/// Where a template's options come from
enum OptionSource {
    Fixed(&'static [&'static str]),
    SchemaMeasures,
    SchemaDimensions,
}

struct Template {
    ambiguity: AmbiguityType,
    question: &'static str,
    question_type: QuestionType,
    options: OptionSource,
    required: bool,
}

// Highest priority first.
const TEMPLATES: &[Template] = &[
    Template {
        ambiguity: AmbiguityType::TimeRange,
        question: "Which time range should the result cover?",
        question_type: QuestionType::Single,
        options: OptionSource::Fixed(&[
            "last 7 days",
            "last 30 days",
            "this month",
            "last month",
            "this year",
            "custom range",
        ]),
        required: true,
    },
    Template {
        ambiguity: AmbiguityType::MultipleMetrics,
        question: "Which metrics do you want to see?",
        question_type: QuestionType::Multiple,
        options: OptionSource::SchemaMeasures,
        required: true,
    },
    Template {
        ambiguity: AmbiguityType::ComparisonBase,
        question: "What should the change be compared against?",
        question_type: QuestionType::Single,
        options: OptionSource::Fixed(&[
            "previous period",
            "same period last year",
            "target",
        ]),
        required: true,
    },
    Template {
        ambiguity: AmbiguityType::ContextMissing,
        question: "Which dimension or segment are you referring to?",
        question_type: QuestionType::Single,
        options: OptionSource::SchemaDimensions,
        required: true,
    },
    Template {
        ambiguity: AmbiguityType::Aggregation,
        question: "How should the values be aggregated?",
        question_type: QuestionType::Single,
        options: OptionSource::Fixed(&["sum", "average", "count", "maximum", "minimum"]),
        required: false,
    },
];

pub struct Disambiguator;

impl Disambiguator {
    /// Questions for the detected ambiguities, highest priority first
    pub fn questions(
        ambiguity_types: &BTreeSet<AmbiguityType>,
        schema: &Schema,
    ) -> Vec<ClarificationQuestion> {
        TEMPLATES
            .iter()
            .filter(|t| ambiguity_types.contains(&t.ambiguity))
            .take(MAX_QUESTIONS)
            .map(|t| Self::render(t, schema))
            .collect()
    }

    fn render(template: &Template, schema: &Schema) -> ClarificationQuestion {
        let options: Vec<String> = match &template.options {
            OptionSource::Fixed(options) => options.iter().map(|o| o.to_string()).collect(),
            OptionSource::SchemaMeasures => schema
                .all_measures()
                .into_iter()
                .take(MAX_OPTIONS)
                .map(String::from)
                .collect(),
            OptionSource::SchemaDimensions => schema
                .all_dimensions()
                .into_iter()
                .take(MAX_OPTIONS)
                .map(String::from)
                .collect(),
        };

        // nothing to choose from: ask for free text instead
        let question_type = if options.is_empty() {
            QuestionType::Text
        } else {
            template.question_type
        };

        ClarificationQuestion {
            question: template.question.to_string(),
            question_type,
            options,
            required: template.required,
            ambiguity: template.ambiguity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntitySchema;

    fn set(types: &[AmbiguityType]) -> BTreeSet<AmbiguityType> {
        types.iter().copied().collect()
    }

    #[test]
    fn test_time_range_question() {
        let schema = Schema::new(vec![EntitySchema::new("Orders", &["total_revenue"], &["created_at"])]);
        let questions = Disambiguator::questions(&set(&[AmbiguityType::TimeRange]), &schema);
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].ambiguity, AmbiguityType::TimeRange);
        assert_eq!(questions[0].question_type, QuestionType::Single);
        assert!(questions[0].options.contains(&"last 7 days".to_string()));
        assert!(questions[0].required);
    }

    #[test]
    fn test_priority_order_and_cap() {
        let questions = Disambiguator::questions(
            &set(&AmbiguityType::ALL),
            &Schema::new(vec![EntitySchema::new("Orders", &["order_count"], &["status"])]),
        );
        let order: Vec<_> = questions.iter().map(|q| q.ambiguity).collect();
        assert_eq!(
            order,
            vec![
                AmbiguityType::TimeRange,
                AmbiguityType::MultipleMetrics,
                AmbiguityType::ComparisonBase
            ]
        );
    }

    #[test]
    fn test_schema_options_capped() {
        let measures: Vec<String> = (0..15).map(|i| format!("m{i}")).collect();
        let refs: Vec<&str> = measures.iter().map(String::as_str).collect();
        let schema = Schema::new(vec![EntitySchema::new("Wide", &refs, &[])]);

        let questions = Disambiguator::questions(&set(&[AmbiguityType::MultipleMetrics]), &schema);
        assert_eq!(questions[0].options.len(), MAX_OPTIONS);
        assert_eq!(questions[0].options[0], "m0");
        assert_eq!(questions[0].question_type, QuestionType::Multiple);
    }

    #[test]
    fn test_empty_schema_falls_back_to_text() {
        let questions =
            Disambiguator::questions(&set(&[AmbiguityType::ContextMissing]), &Schema::default());
        assert_eq!(questions[0].question_type, QuestionType::Text);
        assert!(questions[0].options.is_empty());
    }
}
