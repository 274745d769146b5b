use std::sync::Arc;

use dashmap::DashMap;
use docgraph_core::audit::{AuditEvent, AuditOperation, AuditOutcome, AuditSink};
use docgraph_core::error::{CoreError, ErrorCategory};
use docgraph_core::hash::hash;
use docgraph_core::model::{
    Chunk, Document, DocumentStatus, Embedding, EmbeddingStatus, OcrMode, OcrResult, Processor,
    ProvenanceKind, ProvenanceRecord,
};
use storage::{Repo, RepoError};
use thiserror::Error;
use uuid::Uuid;

use crate::chunker::{ChunkingConfig, Chunker, SemanticChunker};
use crate::embedding::{DeterministicEmbedder, Embedder};
use crate::extract::{detect_content_kind, extract_pdf_text, extract_utf8, ContentKind};
use crate::policy::{ContentPolicy, NoOpPolicy, PolicyError};
use crate::request::IngestionRequest;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("storage error: {0}")]
    Storage(#[from] RepoError),
    #[error("unsupported content type: {0}")]
    UnsupportedType(String),
    #[error("invalid UTF-8 content")]
    InvalidUtf8,
    #[error("content extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),
}

impl CoreError for IngestionError {
    fn category(&self) -> ErrorCategory {
        match self {
            IngestionError::Storage(e) => e.category(),
            IngestionError::UnsupportedType(_) | IngestionError::InvalidUtf8 => ErrorCategory::Validation,
            IngestionError::ExtractionFailed(_) => ErrorCategory::External,
            IngestionError::Policy(e) => e.category(),
        }
    }
}

fn processor_identity() -> Processor {
    Processor::new("ingestion-pipeline", "1.0.0")
}

/// Ingests one document end to end: a DOCUMENT provenance root, an
/// OCR_RESULT child, one CHUNK child per chunk, and one EMBEDDING
/// grandchild per chunk — exactly the chain `storage::Repo`'s insert
/// contracts require (§4.4).
pub struct IngestionPipeline {
    repo: Arc<Repo>,
    chunker: Box<dyn Chunker>,
    embedder: Box<dyn Embedder>,
    policy: Box<dyn ContentPolicy>,
    default_model_id: String,
    audit_sink: Option<Arc<dyn AuditSink>>,
    /// Tracks idempotency keys currently in flight so a concurrent duplicate
    /// request doesn't race the persistent check below.
    in_flight: Arc<DashMap<String, ()>>,
}

impl IngestionPipeline {
    pub fn new(repo: Arc<Repo>) -> Self {
        Self {
            repo,
            chunker: Box::new(SemanticChunker::default()),
            embedder: Box::new(DeterministicEmbedder::default()),
            policy: Box::new(NoOpPolicy),
            default_model_id: "embedding-default-v1".to_string(),
            audit_sink: None,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn with_components(
        repo: Arc<Repo>,
        chunker: Box<dyn Chunker>,
        embedder: Box<dyn Embedder>,
        policy: Box<dyn ContentPolicy>,
        default_model_id: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            chunker,
            embedder,
            policy,
            default_model_id: default_model_id.into(),
            audit_sink: None,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Ingests a request, returning the ids of the chunks it produced. If
    /// a document with the same content hash was already ingested, its
    /// existing chunk ids are returned without reprocessing.
    pub async fn ingest(&self, request: IngestionRequest) -> Result<Vec<Uuid>, IngestionError> {
        let content_hash = request.content_hash();
        let lock_key = request.idempotency_key().map(str::to_string).unwrap_or_else(|| content_hash.clone());

        if self.in_flight.contains_key(&lock_key) {
            if let Some(existing) = self.existing_chunk_ids(&content_hash) {
                return Ok(existing);
            }
        }
        self.in_flight.insert(lock_key.clone(), ());
        let result = self.ingest_locked(request, content_hash).await;
        self.in_flight.remove(&lock_key);

        self.emit_audit(match &result {
            Ok(_) => AuditOutcome::Succeeded,
            Err(_) => AuditOutcome::Failed,
        });
        result
    }

    fn existing_chunk_ids(&self, content_hash: &str) -> Option<Vec<Uuid>> {
        let document = self.repo.list_documents().into_iter().find(|d| d.file_hash == content_hash)?;
        let chunks = self.repo.chunks_for_document(document.id);
        (!chunks.is_empty()).then(|| chunks.into_iter().map(|c| c.id).collect())
    }

    async fn ingest_locked(&self, request: IngestionRequest, content_hash: String) -> Result<Vec<Uuid>, IngestionError> {
        if let Some(existing) = self.existing_chunk_ids(&content_hash) {
            return Ok(existing);
        }

        let model_id = request.model_id().unwrap_or(&self.default_model_id).to_string();
        let file_name = request.file_name().to_string();
        let mime_type = request.mime_type().to_string();
        let byte_len = request.byte_len();
        let text = extract_request_text(request)?;
        let text = self.policy.apply(&text)?;

        let processor = processor_identity();
        let doc_prov = ProvenanceRecord::root(ProvenanceKind::Document, content_hash.clone(), content_hash.clone(), processor.clone());
        let doc_prov_id = self.repo.insert_provenance(doc_prov.clone()).await?;

        let document = Document {
            id: Uuid::new_v4(),
            file_path: file_name.clone(),
            file_name,
            file_hash: content_hash.clone(),
            file_size: byte_len as u64,
            file_type: mime_type,
            status: DocumentStatus::Processing,
            provenance_id: doc_prov_id,
            title: None,
            author: None,
            subject: None,
            page_count: None,
            error_message: None,
            ocr_completed_at: None,
        };
        let document_id = self.repo.insert_document(document).await?;

        let ocr_prov = ProvenanceRecord::child(
            ProvenanceKind::OcrResult,
            ProvenanceKind::Document,
            &doc_prov,
            hash(text.as_bytes()),
            None,
            processor.clone(),
        );
        let ocr_prov_id = self.repo.insert_provenance(ocr_prov.clone()).await?;
        let ocr_result_id = Uuid::new_v4();
        let ocr = OcrResult {
            id: ocr_result_id,
            provenance_id: ocr_prov_id,
            document_id,
            extracted_text: text.clone(),
            text_length: text.len(),
            mode: OcrMode::Fast,
            page_count: 1,
            processing_duration_ms: 0,
            block_layout: None,
            extras: None,
        };
        self.repo.insert_ocr_result(ocr).await?;

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("content_hash".to_string(), content_hash.clone());
        metadata.insert("model_id".to_string(), model_id.clone());

        let ingested_chunks = self.chunker.chunk(&text, metadata).await;
        let mut chunk_ids = Vec::with_capacity(ingested_chunks.len());

        for (i, mut ingested) in ingested_chunks.into_iter().enumerate() {
            let text_hash = hash(ingested.content.as_bytes());
            let chunk_prov = ProvenanceRecord::child(
                ProvenanceKind::Chunk,
                ProvenanceKind::OcrResult,
                &ocr_prov,
                text_hash.clone(),
                None,
                processor.clone(),
            );
            let chunk_prov_id = self.repo.insert_provenance(chunk_prov.clone()).await?;
            let chunk_id = Uuid::new_v4();

            let embedding_vector = self.embedder.embed(&ingested.content, &model_id).await;
            ingested.embedding = Some(embedding_vector.clone());

            let chunk = Chunk {
                id: chunk_id,
                document_id,
                ocr_result_id,
                text: ingested.content.clone(),
                text_hash,
                chunk_index: i as u32,
                character_start: ingested.character_start,
                character_end: ingested.character_end,
                page_number: Some(1),
                overlap_previous: 0,
                overlap_next: 0,
                provenance_id: chunk_prov_id,
                embedding_status: EmbeddingStatus::Complete,
            };
            self.repo.insert_chunk(chunk).await?;
            chunk_ids.push(chunk_id);

            let embed_prov = ProvenanceRecord::child(
                ProvenanceKind::Embedding,
                ProvenanceKind::Chunk,
                &chunk_prov,
                hash(format!("{model_id}:{}", ingested.content).as_bytes()),
                None,
                processor.clone(),
            );
            let embed_prov_id = self.repo.insert_provenance(embed_prov).await?;
            let embedding = Embedding {
                id: Uuid::new_v4(),
                provenance_id: embed_prov_id,
                chunk_id: Some(chunk_id),
                image_id: None,
                extraction_id: None,
                model_id: model_id.clone(),
                vector: embedding_vector,
            };
            self.repo.insert_embedding(embedding).await?;
        }

        self.repo.update_document_status(document_id, DocumentStatus::Complete, None).await?;
        Ok(chunk_ids)
    }

    fn emit_audit(&self, outcome: AuditOutcome) {
        if let Some(sink) = &self.audit_sink {
            let _ = sink.record(AuditEvent::new(AuditOperation::Ingest, outcome));
        }
    }
}

fn extract_request_text(request: IngestionRequest) -> Result<String, IngestionError> {
    match request {
        IngestionRequest::Text { content, .. } => Ok(content),
        IngestionRequest::File { filename, content, mime_type, .. } => {
            let kind = detect_content_kind(&mime_type, Some(&filename));
            match kind {
                ContentKind::Text | ContentKind::Markdown | ContentKind::Json => {
                    extract_utf8(&content).map_err(|_| IngestionError::InvalidUtf8)
                }
                ContentKind::Pdf => {
                    extract_pdf_text(&content).ok_or_else(|| IngestionError::ExtractionFailed("pdf".to_string()))
                }
                ContentKind::Unsupported => Err(IngestionError::UnsupportedType(mime_type)),
            }
        }
    }
}

#[allow(dead_code)]
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(SemanticChunker::new(ChunkingConfig::default()))
}
