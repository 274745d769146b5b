//! The normalized ingestion request: either raw text or an uploaded file,
//! before content-kind detection and extraction (`extract.rs`).

use std::collections::HashMap;

use docgraph_core::hash::hash;

#[derive(Debug, Clone)]
pub enum IngestionRequest {
    Text {
        content: String,
        metadata: HashMap<String, String>,
        idempotency_key: Option<String>,
        model_id: Option<String>,
    },
    File {
        filename: String,
        content: Vec<u8>,
        mime_type: String,
        metadata: HashMap<String, String>,
        idempotency_key: Option<String>,
        model_id: Option<String>,
    },
}

impl IngestionRequest {
    /// Content hash over the raw bytes, used both as the document's
    /// provenance file_hash and as a fallback idempotency key.
    pub fn content_hash(&self) -> String {
        match self {
            IngestionRequest::Text { content, .. } => hash(content.as_bytes()),
            IngestionRequest::File { content, .. } => hash(content),
        }
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        match self {
            IngestionRequest::Text { idempotency_key, .. } => idempotency_key.as_deref(),
            IngestionRequest::File { idempotency_key, .. } => idempotency_key.as_deref(),
        }
    }

    pub fn model_id(&self) -> Option<&str> {
        match self {
            IngestionRequest::Text { model_id, .. } => model_id.as_deref(),
            IngestionRequest::File { model_id, .. } => model_id.as_deref(),
        }
    }

    pub fn file_name(&self) -> &str {
        match self {
            IngestionRequest::Text { .. } => "inline-text.txt",
            IngestionRequest::File { filename, .. } => filename,
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            IngestionRequest::Text { .. } => "text/plain",
            IngestionRequest::File { mime_type, .. } => mime_type,
        }
    }

    pub fn byte_len(&self) -> usize {
        match self {
            IngestionRequest::Text { content, .. } => content.len(),
            IngestionRequest::File { content, .. } => content.len(),
        }
    }
}
