//! Query request shape (§4.9) and its validation.

use docgraph_core::error::{CoreError, ErrorCategory};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_TOP_K: usize = 10;
const MAX_TOP_K: usize = 500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DslError {
    #[error("query must not be empty")]
    EmptyQuery,
    #[error("top_k must be between 1 and {MAX_TOP_K}")]
    TopKOutOfRange,
}

impl CoreError for DslError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}

/// Which retrieval arm(s) to run. `Hybrid` fuses both with RRF; the other
/// two skip the arm they don't need so `search_type` in the response
/// reflects what actually ran rather than always claiming hybrid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Bm25,
    Semantic,
    #[default]
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub document_filter: Vec<Uuid>,
    #[serde(default)]
    pub expand_synonyms: bool,
    #[serde(default)]
    pub highlight: bool,
    #[serde(default)]
    pub mode: SearchMode,
    #[serde(default)]
    pub include_provenance_chain: bool,
}

const fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: DEFAULT_TOP_K,
            document_filter: Vec::new(),
            expand_synonyms: false,
            highlight: false,
            mode: SearchMode::Hybrid,
            include_provenance_chain: false,
        }
    }

    pub fn parse_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), DslError> {
        if self.query.trim().is_empty() {
            return Err(DslError::EmptyQuery);
        }
        if self.top_k == 0 || self.top_k > MAX_TOP_K {
            return Err(DslError::TopKOutOfRange);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_is_rejected() {
        let req = QueryRequest::new("   ");
        assert_eq!(req.validate(), Err(DslError::EmptyQuery));
    }

    #[test]
    fn top_k_above_max_is_rejected() {
        let mut req = QueryRequest::new("breach of contract");
        req.top_k = 10_000;
        assert_eq!(req.validate(), Err(DslError::TopKOutOfRange));
    }

    #[test]
    fn defaults_parse_from_minimal_json() {
        let req = QueryRequest::parse_json(r#"{"query":"diagnosis"}"#).unwrap();
        assert_eq!(req.top_k, DEFAULT_TOP_K);
        assert!(!req.expand_synonyms);
    }
}
