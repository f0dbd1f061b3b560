//! Few-shot example retrieval
//!
//! Retrieval is best-effort: implementations return an empty list rather
//! than an error, and generation works without examples.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dsl::DslQuery;
use crate::text::normalize;

/// A historical question with the query that answered it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub question: String,
    pub dsl: DslQuery,
    pub success: bool,
}

#[async_trait]
pub trait FewShotRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> Vec<FewShotExample>;
}

/// Retriever for deployments without an example index
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRetriever;

#[async_trait]
impl FewShotRetriever for NoopRetriever {
    async fn retrieve(&self, _query: &str, _top_k: usize) -> Vec<FewShotExample> {
        Vec::new()
    }
}

/// Ranks stored successful examples by word overlap with the question
#[derive(Debug, Clone, Default)]
pub struct InMemoryRetriever {
    examples: Vec<FewShotExample>,
}

impl InMemoryRetriever {
    pub fn new(examples: Vec<FewShotExample>) -> Self {
        Self { examples }
    }

    /// Jaccard overlap of the two questions' word sets
    fn overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
        let union = a.union(b).count();
        if union == 0 {
            return 0.0;
        }
        a.intersection(b).count() as f64 / union as f64
    }
}

fn words(text: &str) -> BTreeSet<String> {
    normalize(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}

#[async_trait]
impl FewShotRetriever for InMemoryRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Vec<FewShotExample> {
        let query_words = words(query);
        let mut scored: Vec<(f64, usize)> = self
            .examples
            .iter()
            .enumerate()
            .filter(|(_, e)| e.success)
            .map(|(i, e)| (Self::overlap(&query_words, &words(&e.question)), i))
            .filter(|(score, _)| *score > 0.0)
            .collect();

        // stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .take(top_k)
            .map(|(_, i)| self.examples[i].clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(question: &str, measure: &str, success: bool) -> FewShotExample {
        let mut dsl = DslQuery::new("Orders");
        dsl.measures.push(measure.to_string());
        FewShotExample {
            question: question.to_string(),
            dsl,
            success,
        }
    }

    #[tokio::test]
    async fn test_ranks_by_overlap_and_skips_failures() {
        let retriever = InMemoryRetriever::new(vec![
            example("total revenue by city", "total_revenue", true),
            example("order count", "order_count", true),
            example("order count by status", "order_count", false),
            example("order count per day", "order_count", true),
        ]);

        let hits = retriever.retrieve("order count", 3).await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].question, "order count");
        assert_eq!(hits[1].question, "order count per day");
    }

    #[tokio::test]
    async fn test_top_k_and_empty() {
        let retriever = InMemoryRetriever::new(vec![
            example("revenue a", "r", true),
            example("revenue b", "r", true),
        ]);
        assert_eq!(retriever.retrieve("revenue", 1).await.len(), 1);
        assert!(retriever.retrieve("unrelated", 3).await.is_empty());
        assert!(NoopRetriever.retrieve("revenue", 3).await.is_empty());
    }
}
