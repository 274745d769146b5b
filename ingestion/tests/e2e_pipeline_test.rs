use std::collections::HashMap;
use std::sync::Arc;

use ingestion::processor::IngestionPipeline;
use ingestion::request::IngestionRequest;
use jobs::queue::{ChannelJobQueue, Job, JobQueue};
use jobs::worker::Worker;
use query::{QueryEngine, QueryRequest, SearchMode};
use resolver::ResolutionMode;
use slm::lightweight::register_default_lightweight_models;
use slm::registry::ModelRegistry;
use storage::Repo;
use tempfile::tempdir;
use tokio::sync::mpsc;

#[tokio::test]
async fn test_e2e_ingest_extract_resolve_and_search() {
    let dir = tempdir().unwrap();
    let wal_path = dir.path().join("e2e.wal");
    let repo = Arc::new(Repo::open(&wal_path).await.unwrap());

    let (tx, rx) = mpsc::channel(100);
    let job_queue = Arc::new(ChannelJobQueue::new(tx));
    let mut registry = ModelRegistry::new();
    register_default_lightweight_models(&mut registry).unwrap();
    let worker = Worker::new(rx, repo.clone(), Arc::new(registry), "rule-based-legal");
    tokio::spawn(async move {
        worker.run().await;
    });

    let pipeline = IngestionPipeline::new(repo.clone());

    let mut metadata = HashMap::new();
    metadata.insert("source".to_string(), "report/toyota-2024.md".to_string());

    let chunk_ids = pipeline
        .ingest(IngestionRequest::Text {
            content: "Case No. 24-CV-00123 was filed against Acme Corporation on January 5, 2024.".to_string(),
            metadata,
            idempotency_key: Some("e2e-doc".to_string()),
            model_id: Some("embedding-default-v1".to_string()),
        })
        .await
        .unwrap();

    let document_id = repo.get_chunk(chunk_ids[0]).unwrap().document_id;
    job_queue.enqueue(Job::ExtractEntities { document_id, model_ref: None }).await.unwrap();

    let start = std::time::Instant::now();
    while start.elapsed() < std::time::Duration::from_secs(5) {
        if !repo.entities_for_document(document_id).is_empty() {
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    }
    let entities = repo.entities_for_document(document_id);
    assert!(!entities.is_empty(), "rule-based extractor should have found at least one entity");

    let stats = resolver::full_build(&repo, &[document_id], ResolutionMode::Exact, None, None)
        .await
        .unwrap();
    assert!(stats.nodes_created > 0);

    let engine = QueryEngine::new(repo);
    let response = engine.search(QueryRequest::new("Acme Corporation")).await.unwrap();
    assert!(!response.results.is_empty());
    assert!(response.results.iter().any(|r| r.original_text.contains("Acme")));
}

#[tokio::test]
async fn test_e2e_bm25_only_mode_returns_no_semantic_hits() {
    let dir = tempdir().unwrap();
    let wal_path = dir.path().join("e2e_bm25.wal");
    let repo = Arc::new(Repo::open(&wal_path).await.unwrap());
    let pipeline = IngestionPipeline::new(repo.clone());

    pipeline
        .ingest(IngestionRequest::Text {
            content: "BYD expands EV production with new battery facilities.".to_string(),
            metadata: HashMap::new(),
            idempotency_key: Some("e2e-bm25-doc".to_string()),
            model_id: Some("embedding-default-v1".to_string()),
        })
        .await
        .unwrap();

    let engine = QueryEngine::new(repo);
    let mut request = QueryRequest::new("BYD battery facilities");
    request.mode = SearchMode::Bm25;
    let response = engine.search(request).await.unwrap();

    assert!(!response.results.is_empty());
    let sources = response.sources.unwrap();
    assert_eq!(sources.semantic_count, 0);
}
