use std::sync::Arc;

use docgraph_core::embedding::{deterministic_embedding, EMBEDDING_DIMS};
use docgraph_core::hash::hash;
use docgraph_core::model::{
    Chunk, Document, DocumentStatus, Embedding, EmbeddingStatus, OcrMode, OcrResult, Processor, ProvenanceKind,
    ProvenanceRecord,
};
use query::{QueryEngine, QueryRequest, SearchMode, SearchType};
use storage::Repo;
use tempfile::tempdir;
use uuid::Uuid;

async fn seeded_repo() -> (Repo, Uuid, Uuid) {
    let dir = tempdir().unwrap();
    let repo = Repo::open(dir.path().join("t.wal")).await.unwrap();
    let processor = Processor::new("test", "1.0");

    let doc_prov = ProvenanceRecord::root(ProvenanceKind::Document, hash(b"doc"), hash(b"doc"), processor.clone());
    let doc_prov_id = repo.insert_provenance(doc_prov.clone()).await.unwrap();
    let document = Document {
        id: Uuid::new_v4(),
        file_path: "/tmp/complaint.pdf".into(),
        file_name: "complaint.pdf".into(),
        file_hash: hash(b"doc"),
        file_size: 10,
        file_type: "application/pdf".into(),
        status: DocumentStatus::Complete,
        provenance_id: doc_prov_id,
        title: None,
        author: None,
        subject: None,
        page_count: Some(1),
        error_message: None,
        ocr_completed_at: None,
    };
    let document_id = repo.insert_document(document).await.unwrap();

    let ocr_prov = ProvenanceRecord::child(
        ProvenanceKind::OcrResult,
        ProvenanceKind::Document,
        &doc_prov,
        hash(b"ocr"),
        None,
        processor.clone(),
    );
    let ocr_prov_id = repo.insert_provenance(ocr_prov.clone()).await.unwrap();
    let ocr_text = "the plaintiff filed a petition to dismiss the breach of contract claim";
    let ocr = OcrResult {
        id: Uuid::new_v4(),
        provenance_id: ocr_prov_id,
        document_id,
        extracted_text: ocr_text.into(),
        text_length: ocr_text.len(),
        mode: OcrMode::Accurate,
        page_count: 1,
        processing_duration_ms: 10,
        block_layout: None,
        extras: None,
    };
    repo.insert_ocr_result(ocr).await.unwrap();

    let chunk_prov = ProvenanceRecord::child(
        ProvenanceKind::Chunk,
        ProvenanceKind::OcrResult,
        &ocr_prov,
        hash(b"chunk1"),
        None,
        processor.clone(),
    );
    let chunk_prov_id = repo.insert_provenance(chunk_prov.clone()).await.unwrap();
    let chunk = Chunk {
        id: Uuid::new_v4(),
        document_id,
        ocr_result_id: Uuid::new_v4(),
        text: "the plaintiff filed a petition to dismiss the breach of contract claim".into(),
        text_hash: hash(b"chunk1"),
        chunk_index: 0,
        character_start: 0,
        character_end: 69,
        page_number: Some(1),
        overlap_previous: 0,
        overlap_next: 0,
        provenance_id: chunk_prov_id,
        embedding_status: EmbeddingStatus::Complete,
    };
    let chunk_id = repo.insert_chunk(chunk).await.unwrap();

    let embed_prov = ProvenanceRecord::child(
        ProvenanceKind::Embedding,
        ProvenanceKind::Chunk,
        &chunk_prov,
        hash(b"embed1"),
        None,
        processor,
    );
    let embed_prov_id = repo.insert_provenance(embed_prov).await.unwrap();
    let vector = deterministic_embedding(
        "the plaintiff filed a petition to dismiss the breach of contract claim",
        "embedding-default-v1",
        EMBEDDING_DIMS,
    );
    let embedding = Embedding {
        id: Uuid::new_v4(),
        provenance_id: embed_prov_id,
        chunk_id: Some(chunk_id),
        image_id: None,
        extraction_id: None,
        model_id: "embedding-default-v1".into(),
        vector,
    };
    repo.insert_embedding(embedding).await.unwrap();

    (repo, document_id, chunk_id)
}

#[tokio::test]
async fn search_finds_the_matching_chunk() {
    let (repo, document_id, chunk_id) = seeded_repo().await;
    let engine = QueryEngine::new(Arc::new(repo));

    let response = engine.search(QueryRequest::new("petition to dismiss")).await.unwrap();
    assert!(!response.results.is_empty());
    assert_eq!(response.results[0].chunk_id, chunk_id);
    assert_eq!(response.search_type, SearchType::RrfHybrid);
    assert_eq!(response.total, response.results.len());
    assert_eq!(response.results[0].rank, 1);
    assert_eq!(response.results[0].document_id, document_id);
    assert_eq!(response.results[0].source_file_name, "complaint.pdf");
    assert!(response.results[0].provenance_chain.is_none());
    let sources = response.sources.unwrap();
    assert!(sources.bm25_count > 0 && sources.semantic_count > 0);
}

#[tokio::test]
async fn bm25_only_mode_skips_the_vector_arm() {
    let (repo, _document_id, chunk_id) = seeded_repo().await;
    let engine = QueryEngine::new(Arc::new(repo));

    let mut request = QueryRequest::new("petition to dismiss");
    request.mode = SearchMode::Bm25;
    let response = engine.search(request).await.unwrap();
    assert_eq!(response.search_type, SearchType::Bm25);
    assert_eq!(response.sources.unwrap().semantic_count, 0);
    assert_eq!(response.results[0].chunk_id, chunk_id);
}

#[tokio::test]
async fn provenance_chain_is_populated_on_request() {
    let (repo, _document_id, _chunk_id) = seeded_repo().await;
    let engine = QueryEngine::new(Arc::new(repo));

    let mut request = QueryRequest::new("petition to dismiss");
    request.include_provenance_chain = true;
    let response = engine.search(request).await.unwrap();
    let chain = response.results[0].provenance_chain.as_ref().unwrap();
    assert!(chain.len() >= 3);
}

#[tokio::test]
async fn document_filter_excludes_other_documents() {
    let (repo, _document_id, _chunk_id) = seeded_repo().await;
    let engine = QueryEngine::new(Arc::new(repo));

    let mut request = QueryRequest::new("petition to dismiss");
    request.document_filter = vec![Uuid::new_v4()];
    let response = engine.search(request).await.unwrap();
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn synonym_expansion_finds_a_chunk_via_its_synonym_term() {
    let (repo, _document_id, chunk_id) = seeded_repo().await;
    let engine = QueryEngine::new(Arc::new(repo));

    let mut request = QueryRequest::new("motion to dismiss");
    request.expand_synonyms = true;
    let response = engine.search(request).await.unwrap();
    assert!(response.results.iter().any(|r| r.chunk_id == chunk_id));
}
