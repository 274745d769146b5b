use std::sync::Arc;

use docgraph_core::audit::{AuditEvent, AuditOperation, AuditOutcome, AuditSink};
use docgraph_core::model::{Entity, EntityMention, Processor, ProvenanceKind, ProvenanceRecord};
use resolver::{full_build, incremental_build, GuardedBackend, ResolutionMode};
use slm::registry::ModelRegistry;
use slm::EntityExtractor;
use storage::Repo;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::queue::Job;

fn processor() -> Processor {
    Processor::new("entity-extraction", "1.0.0")
}

fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Drains the job channel and carries each document through the pipeline:
/// extraction fills the `entities`/`entity_mentions` tables, resolution
/// folds those entities into the knowledge graph, and synthesis layers AI
/// narrative/relationship inference on top (§4.6-§4.8). Synthesis is a
/// no-op until a [`GuardedBackend`] is configured, since it needs a real
/// AI collaborator behind it.
pub struct Worker {
    receiver: mpsc::Receiver<Job>,
    repo: Arc<Repo>,
    registry: Arc<ModelRegistry>,
    default_model_ref: String,
    synthesis_backend: Option<Arc<GuardedBackend>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
}

impl Worker {
    pub fn new(receiver: mpsc::Receiver<Job>, repo: Arc<Repo>, registry: Arc<ModelRegistry>, default_model_ref: impl Into<String>) -> Self {
        Self {
            receiver,
            repo,
            registry,
            default_model_ref: default_model_ref.into(),
            synthesis_backend: None,
            audit_sink: None,
        }
    }

    pub fn with_synthesis_backend(mut self, backend: Arc<GuardedBackend>) -> Self {
        self.synthesis_backend = Some(backend);
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    fn emit_audit(&self, operation: AuditOperation, outcome: AuditOutcome) {
        if let Some(sink) = &self.audit_sink {
            let _ = sink.record(AuditEvent::new(operation, outcome));
        }
    }

    pub async fn run(mut self) {
        info!("worker started");
        while let Some(job) = self.receiver.recv().await {
            match job {
                Job::ExtractEntities { document_id, model_ref } => {
                    let model_ref = model_ref.unwrap_or_else(|| self.default_model_ref.clone());
                    if let Err(e) = self.process_extraction(document_id, &model_ref).await {
                        error!("entity extraction failed for document {}: {}", document_id, e);
                    }
                }
                Job::ResolveDocument { document_id, mode } => {
                    if let Err(e) = self.process_resolution(document_id, mode).await {
                        error!("graph resolution failed for document {}: {}", document_id, e);
                    }
                }
                Job::SynthesizeDocument { document_id } => {
                    if let Err(e) = self.process_synthesis(document_id).await {
                        error!("synthesis failed for document {}: {}", document_id, e);
                    }
                }
                Job::RebuildFts => {
                    let status = self.repo.rebuild_fts();
                    info!("rebuilt fts index: {} chunks indexed", status.chunks_indexed);
                }
            }
        }
        info!("worker stopped");
    }

    async fn process_extraction(&self, document_id: Uuid, model_ref: &str) -> anyhow::Result<()> {
        let resolved = self
            .registry
            .resolve(model_ref)
            .or_else(|_| self.registry.resolve(&self.default_model_ref))?;

        let chunks = self.repo.chunks_for_document(document_id);
        if chunks.is_empty() {
            warn!("document {} has no chunks to extract from", document_id);
            return Ok(());
        }

        for chunk in chunks {
            let Some(chunk_prov) = self.repo.get_provenance(chunk.provenance_id) else {
                warn!("chunk {} is missing its provenance record, skipping", chunk.id);
                continue;
            };
            let extracted = resolved.extractor.extract(&chunk.text).await?;
            for found in extracted {
                let entity_prov = ProvenanceRecord::child(
                    ProvenanceKind::EntityExtraction,
                    ProvenanceKind::Chunk,
                    &chunk_prov,
                    docgraph_core::hash::hash(found.text.as_bytes()),
                    None,
                    processor(),
                );
                let entity_prov_id = self.repo.insert_provenance(entity_prov).await?;

                let entity = Entity {
                    id: Uuid::new_v4(),
                    document_id,
                    entity_type: found.entity_type,
                    raw_text: found.text.clone(),
                    normalized_text: normalize_text(&found.text),
                    confidence: found.confidence,
                    metadata: None,
                    provenance_id: entity_prov_id,
                };
                let entity_id = self.repo.insert_entity(entity).await?;

                let mention = EntityMention {
                    id: Uuid::new_v4(),
                    entity_id,
                    document_id,
                    chunk_id: Some(chunk.id),
                    page_number: chunk.page_number,
                    character_start: found.character_start,
                    character_end: found.character_end,
                    context_text: chunk.text.clone(),
                    provenance_id: entity_prov_id,
                };
                self.repo.insert_mention(mention).await?;
            }
        }

        info!("extracted entities for document {}", document_id);
        Ok(())
    }

    async fn process_resolution(&self, document_id: Uuid, mode: ResolutionMode) -> anyhow::Result<()> {
        let document_ids = [document_id];
        let result = if self.repo.all_nodes().is_empty() {
            full_build(&self.repo, &document_ids, mode, None, None).await
        } else {
            incremental_build(&self.repo, &document_ids, mode, None, None).await
        };
        self.emit_audit(
            AuditOperation::GraphBuild,
            if result.is_ok() { AuditOutcome::Succeeded } else { AuditOutcome::Failed },
        );
        let stats = result?;
        info!(
            "resolved document {}: {} nodes created, {} nodes updated, {} edges created",
            document_id, stats.nodes_created, stats.nodes_updated, stats.edges_created
        );
        Ok(())
    }

    async fn process_synthesis(&self, document_id: Uuid) -> anyhow::Result<()> {
        let Some(backend) = &self.synthesis_backend else {
            warn!("no synthesis backend configured, skipping document {}", document_id);
            return Ok(());
        };

        let result = async {
            resolver::synthesize_document_narrative(&self.repo, backend, document_id).await?;
            resolver::infer_document_relationships(&self.repo, backend, document_id).await
        }
        .await;
        self.emit_audit(
            AuditOperation::Synthesize,
            if result.is_ok() { AuditOutcome::Succeeded } else { AuditOutcome::Failed },
        );
        result?;
        Ok(())
    }
}
