//! Request-handler boundary (§6): the one place in the workspace that
//! turns an internal `Result<T, E: CoreError>` into the wire envelope
//! `{ok: true, data}` / `{ok: false, error: {category, message}}`. Every
//! handler on [`Sdk`] takes an already-validated request object and
//! returns an [`Envelope`]; nothing upstream of this module should ever
//! need to match on a concrete error type.

use std::path::Path;
use std::sync::Arc;

use docgraph_core::audit::AuditSink;
use docgraph_core::error::{CoreError, ErrorEnvelope};
use ingestion::{IngestionPipeline, IngestionRequest};
use query::{QueryEngine, QueryRequest, QueryResponse};
use resolver::{full_build, incremental_build, GraphBuildStats, ResolutionMode};
use serde::{Deserialize, Serialize};
use storage::snapshot::{export_provenance, export_w3c_prov, ExportScope};
use storage::Repo;
use uuid::Uuid;

/// The `{ok, data}` / `{ok, error}` shape every handler returns. `data`
/// and `error` are mutually exclusive and each skipped when absent, so
/// the JSON on the wire never carries a dangling `null` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self { ok: true, data: Some(data), error: None }
    }

    pub fn failure(error: ErrorEnvelope) -> Self {
        Self { ok: false, data: None, error: Some(error) }
    }
}

fn envelope<T, E: CoreError>(result: Result<T, E>) -> Envelope<T> {
    match result {
        Ok(data) => Envelope::success(data),
        Err(err) => Envelope::failure(ErrorEnvelope::from_error(&err)),
    }
}

/// Ties the store, ingestion pipeline, resolver and retrieval engine
/// together behind the request-handler surface. One `Sdk` per open
/// store; the engine is single-writer, so this is meant to be held
/// behind a single `Arc` for the life of the process.
pub struct Sdk {
    repo: Arc<Repo>,
    ingestion: IngestionPipeline,
    query: QueryEngine,
}

impl Sdk {
    pub async fn open(wal_path: impl AsRef<Path>) -> Result<Self, docgraph_core::error::ErrorEnvelope> {
        let repo = Arc::new(Repo::open(wal_path).await.map_err(|e| ErrorEnvelope::from_error(&e))?);
        let ingestion = IngestionPipeline::new(repo.clone());
        let query = QueryEngine::new(repo.clone());
        Ok(Self { repo, ingestion, query })
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.ingestion = self.ingestion.with_audit_sink(sink.clone());
        self.query = self.query.with_audit_sink(sink);
        self
    }

    pub fn repo(&self) -> &Arc<Repo> {
        &self.repo
    }

    /// Handler for document ingestion (§4.4). Returns the new chunk ids,
    /// or the existing ones if the content hash was already ingested.
    pub async fn ingest(&self, request: IngestionRequest) -> Envelope<Vec<Uuid>> {
        envelope(self.ingestion.ingest(request).await)
    }

    /// Handler for graph resolution (§4.7). Chooses a full or incremental
    /// build depending on whether any knowledge nodes exist yet.
    pub async fn resolve(&self, document_ids: &[Uuid], mode: ResolutionMode) -> Envelope<GraphBuildStats> {
        let result = if self.repo.all_nodes().is_empty() {
            full_build(&self.repo, document_ids, mode, None, None).await
        } else {
            incremental_build(&self.repo, document_ids, mode, None, None).await
        };
        envelope(result)
    }

    /// Handler for hybrid retrieval (§4.9, §6 retrieval result envelope).
    pub async fn search(&self, request: QueryRequest) -> Envelope<QueryResponse> {
        envelope(self.query.search(request).await)
    }

    /// Handler for provenance export (§6). `as_prov` additionally maps the
    /// export onto the W3C-PROV vocabulary.
    pub fn export_provenance(&self, scope: ExportScope, as_prov: bool) -> Envelope<serde_json::Value> {
        match export_provenance(&self.repo, scope) {
            Ok(export) => {
                let value = if as_prov {
                    export_w3c_prov(&export)
                } else {
                    serde_json::to_value(&export).expect("ProvenanceExport always serializes")
                };
                Envelope::success(value)
            }
            Err(err) => Envelope::failure(ErrorEnvelope::from_error(&err)),
        }
    }

    /// Handler for FTS status/rebuild (§4.9 FTS management).
    pub fn fts_status(&self) -> docgraph_core::model::FtsMetadata {
        self.repo.fts_status().unwrap_or_else(|| self.repo.rebuild_fts())
    }

    pub fn rebuild_fts(&self) -> docgraph_core::model::FtsMetadata {
        self.repo.rebuild_fts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docgraph_core::error::ErrorCategory;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[tokio::test]
    async fn ingest_then_search_round_trips_through_the_envelope() {
        let dir = tempdir().unwrap();
        let sdk = Sdk::open(dir.path().join("sdk.wal")).await.unwrap();

        let request = IngestionRequest::Text {
            content: "the plaintiff filed a motion to dismiss".to_string(),
            metadata: HashMap::new(),
            idempotency_key: None,
            model_id: None,
        };
        let ingested = sdk.ingest(request).await;
        assert!(ingested.ok);
        assert!(!ingested.data.unwrap().is_empty());

        let response = sdk.search(QueryRequest::new("motion to dismiss")).await;
        assert!(response.ok);
        assert!(!response.data.unwrap().results.is_empty());
    }

    #[tokio::test]
    async fn search_over_an_empty_store_succeeds_with_no_results() {
        let dir = tempdir().unwrap();
        let sdk = Sdk::open(dir.path().join("sdk.wal")).await.unwrap();

        let response = sdk.search(QueryRequest::new("anything")).await;
        assert!(response.ok);
        assert_eq!(response.data.unwrap().total, 0);
    }

    #[tokio::test]
    async fn export_of_unknown_document_reports_not_found_category() {
        let dir = tempdir().unwrap();
        let sdk = Sdk::open(dir.path().join("sdk.wal")).await.unwrap();

        let response = sdk.export_provenance(ExportScope::Document(Uuid::new_v4()), false);
        assert!(!response.ok);
        assert_eq!(response.error.unwrap().category, ErrorCategory::NotFound);
    }

    #[tokio::test]
    async fn fts_status_reflects_ingested_chunk_count() {
        let dir = tempdir().unwrap();
        let sdk = Sdk::open(dir.path().join("sdk.wal")).await.unwrap();

        let request = IngestionRequest::Text {
            content: "breach of contract filed in district court".to_string(),
            metadata: HashMap::new(),
            idempotency_key: None,
            model_id: None,
        };
        sdk.ingest(request).await;

        let status = sdk.rebuild_fts();
        assert_eq!(status.chunks_indexed, 1);
    }
}
