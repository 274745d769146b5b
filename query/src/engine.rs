//! Hybrid retrieval engine (C9, §4.9): fuses BM25 and cosine vector search
//! over document chunks with Reciprocal Rank Fusion, with optional synonym
//! expansion on the BM25 arm and an optional reranking pass over the fused
//! top-K.

use std::sync::Arc;
use std::time::Instant;

use docgraph_core::audit::{AuditEvent, AuditOperation, AuditOutcome, AuditSink};
use docgraph_core::embedding::deterministic_embedding;
use docgraph_core::error::{CoreError, ErrorCategory};
use docgraph_core::metrics::{MetricsCollector, MetricsSnapshot};
use docgraph_core::model::ProvenanceRecord;
use serde::{Deserialize, Serialize};
use storage::Repo;
use thiserror::Error;
use uuid::Uuid;

use crate::dsl::{DslError, QueryRequest, SearchMode};
use crate::rerank::{apply_reranker, RerankError, Reranker};
use crate::rrf::{fuse, RrfParams};
use crate::synonyms::expand_query;

const DEFAULT_EMBEDDING_MODEL_ID: &str = "embedding-default-v1";
const HIGHLIGHT_CONTEXT_CHARS: usize = 60;
const METRICS_HISTORY: usize = 1000;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid query: {0}")]
    Invalid(#[from] DslError),
    #[error("rerank error: {0}")]
    Rerank(#[from] RerankError),
}

impl CoreError for QueryError {
    fn category(&self) -> ErrorCategory {
        match self {
            QueryError::Invalid(e) => e.category(),
            QueryError::Rerank(e) => e.category(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub original_text: String,
    pub source_file_name: String,
    pub source_file_path: String,
    pub source_file_hash: String,
    pub page_number: Option<u32>,
    pub character_start: usize,
    pub character_end: usize,
    pub chunk_index: u32,
    pub provenance_id: Uuid,
    pub content_hash: String,
    pub score: f64,
    pub rank: usize,
    pub snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance_chain: Option<Vec<ProvenanceRecord>>,
    pub bm25_rank: Option<usize>,
    pub vector_rank: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SearchSources {
    pub bm25_count: usize,
    pub semantic_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    pub top_k: usize,
    pub rrf_k: f64,
    pub embedding_model_id: String,
    pub expand_synonyms: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Bm25,
    Semantic,
    RrfHybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query: String,
    pub search_type: SearchType,
    pub results: Vec<SearchResult>,
    pub total: usize,
    pub sources: Option<SearchSources>,
    pub config: Option<ResponseConfig>,
    pub expanded_query: Option<String>,
    pub latency_ms: u64,
}

pub struct QueryEngine {
    repo: Arc<Repo>,
    embedding_model_id: String,
    rrf: RrfParams,
    audit_sink: Option<Arc<dyn AuditSink>>,
    reranker: Option<Arc<dyn Reranker>>,
    metrics: MetricsCollector,
}

impl QueryEngine {
    pub fn new(repo: Arc<Repo>) -> Self {
        Self {
            repo,
            embedding_model_id: DEFAULT_EMBEDDING_MODEL_ID.to_string(),
            rrf: RrfParams::default(),
            audit_sink: None,
            reranker: None,
            metrics: MetricsCollector::new(METRICS_HISTORY),
        }
    }

    /// Snapshot of retrieval latency percentiles and RRF usage recorded
    /// across every call to [`QueryEngine::search`] so far.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn with_embedding_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.embedding_model_id = model_id.into();
        self
    }

    pub fn with_rrf_params(mut self, rrf: RrfParams) -> Self {
        self.rrf = rrf;
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub async fn search(&self, request: QueryRequest) -> Result<QueryResponse, QueryError> {
        let start = Instant::now();
        let outcome = self.search_internal(&request).await;
        self.emit_audit_event(match &outcome {
            Ok(_) => AuditOutcome::Succeeded,
            Err(_) => AuditOutcome::Failed,
        });
        let mut response = outcome?;
        let elapsed = start.elapsed();
        response.latency_ms = elapsed.as_millis() as u64;
        self.metrics.record_query(elapsed.as_micros() as u64, matches!(request.mode, SearchMode::Hybrid));
        Ok(response)
    }

    async fn search_internal(&self, request: &QueryRequest) -> Result<QueryResponse, QueryError> {
        request.validate()?;

        let allowed: Option<Vec<Uuid>> = if request.document_filter.is_empty() {
            None
        } else {
            Some(self.chunk_ids_for_documents(&request.document_filter))
        };

        let fetch_n = request.top_k.saturating_mul(2).max(request.top_k);

        let bm25_query = if request.expand_synonyms {
            expand_query(&request.query)
        } else {
            request.query.clone()
        };

        let bm25_hits = if matches!(request.mode, SearchMode::Bm25 | SearchMode::Hybrid) {
            self.repo.bm25_search(&bm25_query, fetch_n, allowed.as_deref())
        } else {
            Vec::new()
        };

        let vector_hits = if matches!(request.mode, SearchMode::Semantic | SearchMode::Hybrid) {
            let query_vector = deterministic_embedding(&request.query, &self.embedding_model_id, docgraph_core::embedding::EMBEDDING_DIMS);
            let vector_hits_by_embedding = self.repo.vector_search(&query_vector, fetch_n, None, None);
            vector_hits_by_embedding
                .into_iter()
                .filter_map(|(embedding_id, score)| {
                    let chunk_id = self.repo.get_embedding(embedding_id)?.chunk_id?;
                    if let Some(filter) = &allowed {
                        if !filter.contains(&chunk_id) {
                            return None;
                        }
                    }
                    Some((chunk_id, score))
                })
                .collect()
        } else {
            Vec::new()
        };

        let sources = SearchSources {
            bm25_count: bm25_hits.len(),
            semantic_count: vector_hits.len(),
        };

        let fused = fuse(&bm25_hits, &vector_hits, self.rrf);

        let mut results: Vec<SearchResult> = fused
            .into_iter()
            .take(request.top_k)
            .enumerate()
            .filter_map(|(position, hit)| {
                let chunk = self.repo.get_chunk(hit.id)?;
                let document = self.repo.get_document(chunk.document_id)?;
                let provenance = self.repo.get_provenance(chunk.provenance_id);
                let snippet = if request.highlight {
                    self.highlight(chunk.id, &request.query)
                } else {
                    None
                };
                let provenance_chain = request
                    .include_provenance_chain
                    .then(|| self.repo.chain(chunk.provenance_id));

                Some(SearchResult {
                    chunk_id: chunk.id,
                    document_id: chunk.document_id,
                    original_text: chunk.text,
                    source_file_name: document.file_name,
                    source_file_path: document.file_path,
                    source_file_hash: document.file_hash,
                    page_number: chunk.page_number,
                    character_start: chunk.character_start,
                    character_end: chunk.character_end,
                    chunk_index: chunk.chunk_index,
                    provenance_id: chunk.provenance_id,
                    content_hash: provenance.map(|p| p.content_hash).unwrap_or_default(),
                    score: hit.combined_score,
                    rank: position + 1,
                    snippet,
                    provenance_chain,
                    bm25_rank: hit.bm25_rank,
                    vector_rank: hit.vector_rank,
                })
            })
            .collect();

        if let Some(reranker) = &self.reranker {
            results = apply_reranker(reranker.as_ref(), &request.query, &results, |r| r.original_text.clone()).await?;
            for (position, result) in results.iter_mut().enumerate() {
                result.rank = position + 1;
            }
        }

        let search_type = match request.mode {
            SearchMode::Bm25 => SearchType::Bm25,
            SearchMode::Semantic => SearchType::Semantic,
            SearchMode::Hybrid => SearchType::RrfHybrid,
        };

        Ok(QueryResponse {
            query: request.query.clone(),
            search_type,
            total: results.len(),
            sources: Some(sources),
            config: Some(ResponseConfig {
                top_k: request.top_k,
                rrf_k: self.rrf.k,
                embedding_model_id: self.embedding_model_id.clone(),
                expand_synonyms: request.expand_synonyms,
            }),
            results,
            expanded_query: request.expand_synonyms.then(|| bm25_query.clone()),
            latency_ms: 0,
        })
    }

    fn chunk_ids_for_documents(&self, document_ids: &[Uuid]) -> Vec<Uuid> {
        document_ids
            .iter()
            .flat_map(|document_id| self.repo.chunks_for_document(*document_id))
            .map(|c| c.id)
            .collect()
    }

    fn highlight(&self, chunk_id: Uuid, query: &str) -> Option<String> {
        self.repo.chunk_highlight(chunk_id, query, HIGHLIGHT_CONTEXT_CHARS)
    }

    fn emit_audit_event(&self, outcome: AuditOutcome) {
        if let Some(sink) = &self.audit_sink {
            let _ = sink.record(AuditEvent::new(AuditOperation::Retrieve, outcome));
        }
    }
}
