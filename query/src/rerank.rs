//! Re-ranking hook (§4.9, optional): an external callback — typically an
//! LLM judge — that reorders the top-K fused results. Never invoked on an
//! empty result set.

use async_trait::async_trait;
use docgraph_core::error::{CoreError, ErrorCategory};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankVerdict {
    pub index: usize,
    pub relevance_score: f32,
    pub reasoning: String,
}

#[derive(Debug, Error)]
pub enum RerankError {
    #[error("reranker returned an index out of bounds: {0}")]
    IndexOutOfBounds(usize),
    #[error("reranker backend error: {0}")]
    Backend(String),
}

impl CoreError for RerankError {
    fn category(&self) -> ErrorCategory {
        match self {
            RerankError::IndexOutOfBounds(_) => ErrorCategory::Internal,
            RerankError::Backend(_) => ErrorCategory::External,
        }
    }
}

#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, candidate_texts: &[String]) -> Result<Vec<RerankVerdict>, RerankError>;
}

/// Applies a reranker's verdicts to `items`, reordering by descending
/// relevance score. Short-circuits on an empty input without calling the
/// reranker at all.
pub async fn apply_reranker<T: Clone>(
    reranker: &dyn Reranker,
    query: &str,
    items: &[T],
    text_of: impl Fn(&T) -> String,
) -> Result<Vec<T>, RerankError> {
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let texts: Vec<String> = items.iter().map(&text_of).collect();
    let mut verdicts = reranker.rerank(query, &texts).await?;
    for verdict in &verdicts {
        if verdict.index >= items.len() {
            return Err(RerankError::IndexOutOfBounds(verdict.index));
        }
    }

    verdicts.sort_by(|a, b| b.relevance_score.partial_cmp(&a.relevance_score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(verdicts.into_iter().map(|v| items[v.index].clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ReverseReranker;

    #[async_trait]
    impl Reranker for ReverseReranker {
        async fn rerank(&self, _query: &str, candidate_texts: &[String]) -> Result<Vec<RerankVerdict>, RerankError> {
            Ok(candidate_texts
                .iter()
                .enumerate()
                .map(|(i, _)| RerankVerdict {
                    index: i,
                    relevance_score: i as f32,
                    reasoning: "reverse order for testing".into(),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn empty_input_short_circuits_without_invoking_reranker() {
        let items: Vec<String> = Vec::new();
        let out = apply_reranker(&ReverseReranker, "q", &items, |s: &String| s.clone()).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn reorders_by_descending_relevance() {
        let items = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let out = apply_reranker(&ReverseReranker, "q", &items, |s: &String| s.clone()).await.unwrap();
        assert_eq!(out, vec!["c".to_string(), "b".to_string(), "a".to_string()]);
    }
}
