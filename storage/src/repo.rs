//! The provenance ledger (§4.3) and content store (§4.4) combined: every
//! row type in [`docgraph_core::model`] lives in a `DashMap` keyed by id,
//! mutated only through `Repo`'s methods so every write can be journaled
//! to the WAL first and referential integrity checked before it lands.
//!
//! Durability follows the teacher's `repo.rs` shape: a mutation is
//! serialized to a [`WalOp`], appended to the log, flushed, and only then
//! applied to the in-memory tables. `Repo::open` replays the log to
//! rebuild state after a restart.

use dashmap::DashMap;
use docgraph_core::error::{CoreError, ErrorCategory};
use docgraph_core::hash;
use docgraph_core::model::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::bm25::Bm25Index;
use crate::index::{AdjacencyGraph, VectorIndex};
use crate::migrations::{self, MigrationError, SchemaState};
use crate::wal::{Wal, WalError};

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },
    #[error("{child_kind} {child_id} references missing {parent_kind} {parent_id}")]
    ForeignKey {
        child_kind: &'static str,
        child_id: Uuid,
        parent_kind: &'static str,
        parent_id: Uuid,
    },
    #[error("{field} check failed on {kind} {id}: {reason}")]
    Check {
        kind: &'static str,
        id: Uuid,
        field: &'static str,
        reason: String,
    },
    #[error("unique constraint {constraint} violated by {kind} {id}")]
    Unique {
        kind: &'static str,
        id: Uuid,
        constraint: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("wal error: {0}")]
    Wal(#[from] WalError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),
    #[error("migration error: {0}")]
    Migration(#[from] MigrationError),
}

impl CoreError for IntegrityError {
    fn category(&self) -> ErrorCategory {
        match self {
            IntegrityError::NotFound { .. } => ErrorCategory::NotFound,
            IntegrityError::ForeignKey { .. }
            | IntegrityError::Check { .. }
            | IntegrityError::Unique { .. } => ErrorCategory::Integrity,
        }
    }
}

impl CoreError for RepoError {
    fn category(&self) -> ErrorCategory {
        match self {
            RepoError::Wal(_) | RepoError::Serialization(_) => ErrorCategory::Internal,
            RepoError::Integrity(e) => e.category(),
            RepoError::Migration(e) => e.category(),
        }
    }
}

/// Every durable mutation the repo can apply, journaled before it takes
/// effect so a crash mid-write can be replayed deterministically.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum WalOp {
    PutProvenance(Box<ProvenanceRecord>),
    PutDocument(Box<Document>),
    PutOcrResult(Box<OcrResult>),
    PutChunk(Box<Chunk>),
    PutImage(Box<Image>),
    PutVlmDescription(Box<VlmDescription>),
    PutEntity(Box<Entity>),
    PutEntityMention(Box<EntityMention>),
    PutEmbedding(Box<Embedding>),
    PutExtraction(Box<Extraction>),
    PutKnowledgeNode(Box<KnowledgeNode>),
    PutKnowledgeEdge(Box<KnowledgeEdge>),
    PutNodeEntityLink(Box<NodeEntityLink>),
    PutClusterRow(Box<ClusterRow>),
    PutDocumentClusterRow(Box<DocumentClusterRow>),
    PutEntityRole(Box<EntityRole>),
    PutCorpusIntelligence(Box<CorpusIntelligence>),
    PutDocumentNarrative(Box<DocumentNarrative>),
    DeleteDocument(Uuid),
    DeleteKnowledgeNode(Uuid),
    DeleteKnowledgeEdge(Uuid),
}

/// The content store: every table the system persists, addressed by id.
/// `DashMap` gives interior mutability across the single-writer lock the
/// caller is expected to hold for the duration of a logical transaction.
#[derive(Default)]
struct Tables {
    provenance: DashMap<Uuid, ProvenanceRecord>,
    documents: DashMap<Uuid, Document>,
    ocr_results: DashMap<Uuid, OcrResult>,
    chunks: DashMap<Uuid, Chunk>,
    images: DashMap<Uuid, Image>,
    vlm_descriptions: DashMap<Uuid, VlmDescription>,
    entities: DashMap<Uuid, Entity>,
    mentions: DashMap<Uuid, EntityMention>,
    embeddings: DashMap<Uuid, Embedding>,
    extractions: DashMap<Uuid, Extraction>,
    nodes: DashMap<Uuid, KnowledgeNode>,
    edges: DashMap<Uuid, KnowledgeEdge>,
    node_entity_links: DashMap<Uuid, NodeEntityLink>,
    clusters: DashMap<Uuid, ClusterRow>,
    document_clusters: DashMap<Uuid, DocumentClusterRow>,
    entity_roles: DashMap<Uuid, EntityRole>,
    corpus_intelligence: DashMap<Uuid, CorpusIntelligence>,
    document_narratives: DashMap<Uuid, DocumentNarrative>,
}

pub struct Repo {
    wal: Mutex<Wal>,
    tables: Tables,
    chunk_index: Mutex<Bm25Index>,
    node_graph: Mutex<AdjacencyGraph>,
    vector_index: Mutex<VectorIndex>,
    schema_state: Mutex<SchemaState>,
    fts_metadata: Mutex<Option<FtsMetadata>>,
}

impl Repo {
    /// Opens (creating if absent) the WAL at `wal_path`, replays it to
    /// rebuild in-memory state, brings the schema forward to the latest
    /// migration (§4.2), and runs a referential-integrity check over the
    /// replayed data before handing the store back to the caller.
    pub async fn open(wal_path: impl AsRef<Path>) -> Result<Self, RepoError> {
        let mut wal = Wal::open(wal_path).await?;
        let tables = Tables::default();
        let chunk_index = Mutex::new(Bm25Index::new());
        let node_graph = Mutex::new(AdjacencyGraph::new());
        let vector_index = Mutex::new(VectorIndex::new());

        let mut ops = Vec::new();
        wal.replay(|_lsn, payload| {
            let op: WalOp = serde_json::from_slice(&payload)
                .map_err(|e| WalError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
            ops.push(op);
            Ok(())
        })
        .await?;

        let mut schema_state = SchemaState::default();
        migrations::apply_all(&mut schema_state)?;
        tracing::info!(version = schema_state.version, "schema migrated to latest version");

        let repo = Self {
            wal: Mutex::new(wal),
            tables,
            chunk_index,
            node_graph,
            vector_index,
            schema_state: Mutex::new(schema_state),
            fts_metadata: Mutex::new(None),
        };
        for op in ops {
            repo.apply(op);
        }

        let violations = repo.check_referential_integrity();
        if !violations.is_empty() {
            let version = repo.schema_state.lock().expect("schema state poisoned").version;
            tracing::error!(?violations, "referential integrity check failed after migration");
            return Err(MigrationError::IntegrityViolation { version, violations }.into());
        }

        repo.rebuild_fts_metadata();

        Ok(repo)
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_state.lock().expect("schema state poisoned").version
    }

    /// Composite hash over the sorted set of currently-indexed chunk ids,
    /// used to detect whether the FTS index has drifted from the chunk
    /// table since the last rebuild.
    fn fts_content_hash(&self) -> String {
        let mut ids: Vec<Uuid> = self.tables.chunks.iter().map(|c| c.id).collect();
        ids.sort();
        hash::composite_hash(ids.iter().map(|id| id.as_bytes().to_vec()))
    }

    fn rebuild_fts_metadata(&self) {
        let content_hash = self.fts_content_hash();
        let chunks_indexed = self.tables.chunks.len();
        let schema_version = self.schema_state.lock().expect("schema state poisoned").version;
        let mut fts_metadata = self.fts_metadata.lock().expect("fts metadata poisoned");
        *fts_metadata = Some(FtsMetadata::new(chunks_indexed, schema_version, content_hash));
    }

    /// Re-tokenizes every chunk into a fresh [`crate::bm25::Bm25Index`] and
    /// refreshes the staleness metadata (§4.9). Cheap enough to call after
    /// bulk loads; `fts_status` tells a caller whether this is even needed.
    pub fn rebuild_fts(&self) -> FtsMetadata {
        {
            let mut index = self.chunk_index.lock().expect("chunk index poisoned");
            *index = Bm25Index::new();
            for chunk in self.tables.chunks.iter() {
                index.index(chunk.id, &chunk.text);
            }
        }
        self.rebuild_fts_metadata();
        self.fts_status().expect("fts metadata was just rebuilt")
    }

    /// Current FTS metadata plus whether the index has drifted from the
    /// chunk table (i.e. a rebuild would change `content_hash`).
    pub fn fts_status(&self) -> Option<FtsMetadata> {
        self.fts_metadata.lock().expect("fts metadata poisoned").clone()
    }

    pub fn fts_is_stale(&self) -> bool {
        match self.fts_status() {
            Some(meta) => meta.content_hash != self.fts_content_hash(),
            None => !self.tables.chunks.is_empty(),
        }
    }

    /// Scans every in-memory table for dangling foreign keys. This runs
    /// once at open, after migration, as a belt-and-braces check on top of
    /// the per-write FK checks every insert path already performs.
    fn check_referential_integrity(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for chunk in self.tables.chunks.iter() {
            if !self.tables.documents.contains_key(&chunk.document_id) {
                violations.push(format!("chunk {} references missing document {}", chunk.id, chunk.document_id));
            }
            if !self.tables.ocr_results.contains_key(&chunk.ocr_result_id) {
                violations.push(format!("chunk {} references missing ocr_result {}", chunk.id, chunk.ocr_result_id));
            }
        }
        for entity in self.tables.entities.iter() {
            if !self.tables.documents.contains_key(&entity.document_id) {
                violations.push(format!("entity {} references missing document {}", entity.id, entity.document_id));
            }
        }
        for mention in self.tables.mentions.iter() {
            if !self.tables.entities.contains_key(&mention.entity_id) {
                violations.push(format!("mention {} references missing entity {}", mention.id, mention.entity_id));
            }
        }
        for link in self.tables.node_entity_links.iter() {
            if !self.tables.nodes.contains_key(&link.node_id) {
                violations.push(format!("link {} references missing node {}", link.id, link.node_id));
            }
            if !self.tables.entities.contains_key(&link.entity_id) {
                violations.push(format!("link {} references missing entity {}", link.id, link.entity_id));
            }
        }
        for edge in self.tables.edges.iter() {
            if !self.tables.nodes.contains_key(&edge.source_node_id) {
                violations.push(format!("edge {} references missing source node {}", edge.id, edge.source_node_id));
            }
            if !self.tables.nodes.contains_key(&edge.target_node_id) {
                violations.push(format!("edge {} references missing target node {}", edge.id, edge.target_node_id));
            }
        }
        for embedding in self.tables.embeddings.iter() {
            if !embedding.has_exactly_one_owner() {
                violations.push(format!("embedding {} must reference exactly one of chunk/image/extraction", embedding.id));
            }
        }

        violations
    }

    async fn journal(&self, op: WalOp) -> Result<(), RepoError> {
        let payload = serde_json::to_vec(&op)?;
        let mut wal = self.wal.lock().expect("wal mutex poisoned");
        wal.append(&payload).await?;
        wal.flush().await?;
        drop(wal);
        self.apply(op);
        Ok(())
    }

    fn apply(&self, op: WalOp) {
        match op {
            WalOp::PutProvenance(r) => {
                self.tables.provenance.insert(r.id, *r);
            }
            WalOp::PutDocument(d) => {
                self.tables.documents.insert(d.id, *d);
            }
            WalOp::PutOcrResult(r) => {
                self.tables.ocr_results.insert(r.id, *r);
            }
            WalOp::PutChunk(c) => {
                self.chunk_index.lock().expect("chunk index poisoned").index(c.id, &c.text);
                self.tables.chunks.insert(c.id, *c);
            }
            WalOp::PutImage(i) => {
                self.tables.images.insert(i.id, *i);
            }
            WalOp::PutVlmDescription(v) => {
                self.tables.vlm_descriptions.insert(v.id, *v);
            }
            WalOp::PutEntity(e) => {
                self.tables.entities.insert(e.id, *e);
            }
            WalOp::PutEntityMention(m) => {
                self.tables.mentions.insert(m.id, *m);
            }
            WalOp::PutEmbedding(e) => {
                self.vector_index
                    .lock()
                    .expect("vector index poisoned")
                    .insert(e.id, e.vector.clone());
                self.tables.embeddings.insert(e.id, *e);
            }
            WalOp::PutExtraction(e) => {
                self.tables.extractions.insert(e.id, *e);
            }
            WalOp::PutKnowledgeNode(n) => {
                self.tables.nodes.insert(n.id, *n);
            }
            WalOp::PutKnowledgeEdge(e) => {
                self.node_graph
                    .lock()
                    .expect("node graph poisoned")
                    .add_edge(e.source_node_id, e.target_node_id);
                self.tables.edges.insert(e.id, *e);
            }
            WalOp::PutNodeEntityLink(l) => {
                self.tables.node_entity_links.insert(l.id, *l);
            }
            WalOp::PutClusterRow(c) => {
                self.tables.clusters.insert(c.id, *c);
            }
            WalOp::PutDocumentClusterRow(c) => {
                self.tables.document_clusters.insert(c.id, *c);
            }
            WalOp::PutEntityRole(r) => {
                self.tables.entity_roles.insert(r.id, *r);
            }
            WalOp::PutCorpusIntelligence(c) => {
                self.tables.corpus_intelligence.insert(c.id, *c);
            }
            WalOp::PutDocumentNarrative(n) => {
                self.tables.document_narratives.insert(n.id, *n);
            }
            WalOp::DeleteDocument(id) => self.cascade_delete_document(id),
            WalOp::DeleteKnowledgeNode(id) => self.cascade_delete_node(id),
            WalOp::DeleteKnowledgeEdge(id) => {
                if let Some((_, edge)) = self.tables.edges.remove(&id) {
                    self.node_graph
                        .lock()
                        .expect("node graph poisoned")
                        .remove_edge(edge.source_node_id, edge.target_node_id);
                }
            }
        }
    }

    // ---- provenance ----------------------------------------------------

    /// FK-checked per §4.3: `source_id` and every id in `parent_ids` (which
    /// includes `parent_id` when non-empty) must already exist, except for
    /// roots whose `source_id`/`parent_id` are absent by construction.
    pub async fn insert_provenance(&self, record: ProvenanceRecord) -> Result<Uuid, RepoError> {
        if let Some(source_id) = record.source_id {
            if !self.tables.provenance.contains_key(&source_id) {
                return Err(IntegrityError::ForeignKey {
                    child_kind: "provenance",
                    child_id: record.id,
                    parent_kind: "provenance",
                    parent_id: source_id,
                }
                .into());
            }
        }
        for parent_id in &record.parent_ids {
            if !self.tables.provenance.contains_key(parent_id) {
                return Err(IntegrityError::ForeignKey {
                    child_kind: "provenance",
                    child_id: record.id,
                    parent_kind: "provenance",
                    parent_id: *parent_id,
                }
                .into());
            }
        }
        let id = record.id;
        self.journal(WalOp::PutProvenance(Box::new(record))).await?;
        Ok(id)
    }

    pub fn get_provenance(&self, id: Uuid) -> Option<ProvenanceRecord> {
        self.tables.provenance.get(&id).map(|r| r.clone())
    }

    /// Walks `parent_id` back to the root, root first.
    pub fn chain(&self, id: Uuid) -> Vec<ProvenanceRecord> {
        let mut out = Vec::new();
        let mut current = self.tables.provenance.get(&id).map(|r| r.clone());
        while let Some(record) = current {
            let parent = record.parent_id;
            out.push(record);
            current = parent.and_then(|p| self.tables.provenance.get(&p).map(|r| r.clone()));
        }
        out.reverse();
        out
    }

    pub fn by_root(&self, root_document_id: Uuid) -> Vec<ProvenanceRecord> {
        self.tables
            .provenance
            .iter()
            .filter(|r| r.root_document_id == root_document_id)
            .map(|r| r.clone())
            .collect()
    }

    pub fn children(&self, id: Uuid) -> Vec<ProvenanceRecord> {
        self.tables
            .provenance
            .iter()
            .filter(|r| r.parent_id == Some(id) || r.parent_ids.contains(&id))
            .map(|r| r.clone())
            .collect()
    }

    // ---- documents -------------------------------------------------------

    pub async fn insert_document(&self, doc: Document) -> Result<Uuid, RepoError> {
        if !self.tables.provenance.contains_key(&doc.provenance_id) {
            return Err(IntegrityError::ForeignKey {
                child_kind: "document",
                child_id: doc.id,
                parent_kind: "provenance",
                parent_id: doc.provenance_id,
            }
            .into());
        }
        self.require_provenance_kind("document", doc.id, doc.provenance_id, ProvenanceKind::Document)?;
        let id = doc.id;
        self.journal(WalOp::PutDocument(Box::new(doc))).await?;
        Ok(id)
    }

    /// §4.4: a row's `provenance_id` must name a provenance record of the
    /// expected kind — e.g. a chunk's provenance must be kind CHUNK, not
    /// some other record the caller mistakenly wired in.
    fn require_provenance_kind(
        &self,
        child_kind: &'static str,
        child_id: Uuid,
        provenance_id: Uuid,
        expected: ProvenanceKind,
    ) -> Result<(), IntegrityError> {
        let record = self
            .tables
            .provenance
            .get(&provenance_id)
            .ok_or(IntegrityError::ForeignKey {
                child_kind,
                child_id,
                parent_kind: "provenance",
                parent_id: provenance_id,
            })?;
        if record.kind != expected {
            return Err(IntegrityError::Check {
                kind: child_kind,
                id: child_id,
                field: "provenance_id",
                reason: format!("expected provenance kind {:?}, found {:?}", expected, record.kind),
            });
        }
        Ok(())
    }

    pub fn get_document(&self, id: Uuid) -> Option<Document> {
        self.tables.documents.get(&id).map(|d| d.clone())
    }

    pub async fn update_document_status(
        &self,
        id: Uuid,
        status: DocumentStatus,
        error_message: Option<String>,
    ) -> Result<(), RepoError> {
        let mut doc = self
            .tables
            .documents
            .get(&id)
            .map(|d| d.clone())
            .ok_or(IntegrityError::NotFound { kind: "document", id })?;
        doc.status = status;
        doc.error_message = error_message;
        self.journal(WalOp::PutDocument(Box::new(doc))).await
    }

    pub fn list_documents(&self) -> Vec<Document> {
        self.tables.documents.iter().map(|d| d.clone()).collect()
    }

    /// Cascades: mentions, entities, chunks, ocr results, embeddings (and
    /// their vectors), images, vlm descriptions, extractions. Knowledge
    /// nodes whose last supporting document disappears are dropped too.
    pub async fn delete_document(&self, id: Uuid) -> Result<(), RepoError> {
        if !self.tables.documents.contains_key(&id) {
            return Err(IntegrityError::NotFound { kind: "document", id }.into());
        }
        self.journal(WalOp::DeleteDocument(id)).await
    }

    fn cascade_delete_document(&self, id: Uuid) {
        self.tables.documents.remove(&id);

        let chunk_ids: Vec<Uuid> = self
            .tables
            .chunks
            .iter()
            .filter(|c| c.document_id == id)
            .map(|c| c.id)
            .collect();
        for chunk_id in &chunk_ids {
            self.tables.chunks.remove(chunk_id);
            self.chunk_index.lock().expect("chunk index poisoned").remove(*chunk_id);
        }

        self.tables.ocr_results.retain(|_, r| r.document_id != id);

        let image_ids: Vec<Uuid> = self
            .tables
            .images
            .iter()
            .filter(|img| img.document_id == id)
            .map(|img| img.id)
            .collect();
        self.tables.images.retain(|_, img| img.document_id != id);
        self.tables.vlm_descriptions.retain(|_, v| v.document_id != id);

        self.tables.extractions.retain(|_, e| e.document_id != id);

        let entity_ids: Vec<Uuid> = self
            .tables
            .entities
            .iter()
            .filter(|e| e.document_id == id)
            .map(|e| e.id)
            .collect();
        self.tables.entities.retain(|_, e| e.document_id != id);
        self.tables.mentions.retain(|_, m| m.document_id != id);

        let dropped_embeddings: Vec<Uuid> = self
            .tables
            .embeddings
            .iter()
            .filter(|e| {
                e.chunk_id.map(|c| chunk_ids.contains(&c)).unwrap_or(false)
                    || e.image_id.map(|i| image_ids.contains(&i)).unwrap_or(false)
            })
            .map(|e| e.id)
            .collect();
        for embedding_id in dropped_embeddings {
            self.tables.embeddings.remove(&embedding_id);
            self.vector_index.lock().expect("vector index poisoned").remove(embedding_id);
        }

        let affected_links: Vec<NodeEntityLink> = self
            .tables
            .node_entity_links
            .iter()
            .filter(|l| entity_ids.contains(&l.entity_id))
            .map(|l| l.clone())
            .collect();
        for link in &affected_links {
            self.tables.node_entity_links.remove(&link.id);
        }

        let mut touched_nodes: HashSet<Uuid> = HashSet::new();
        for link in &affected_links {
            touched_nodes.insert(link.node_id);
        }
        for node_id in touched_nodes {
            self.recount_node(node_id);
        }

        for mut edge in self.tables.edges.iter_mut() {
            edge.document_ids.retain(|d| *d != id);
        }
        let emptied: Vec<Uuid> = self
            .tables
            .edges
            .iter()
            .filter(|e| e.document_ids.is_empty())
            .map(|e| e.id)
            .collect();
        for edge_id in emptied {
            if let Some((_, edge)) = self.tables.edges.remove(&edge_id) {
                self.node_graph
                    .lock()
                    .expect("node graph poisoned")
                    .remove_edge(edge.source_node_id, edge.target_node_id);
            }
        }
    }

    /// Recomputes a node's `document_count`/`mention_count`/`edge_count`
    /// from its remaining links, dropping the node entirely once it has
    /// no supporting links left.
    fn recount_node(&self, node_id: Uuid) {
        let remaining: Vec<NodeEntityLink> = self
            .tables
            .node_entity_links
            .iter()
            .filter(|l| l.node_id == node_id)
            .map(|l| l.clone())
            .collect();

        if remaining.is_empty() {
            self.tables.nodes.remove(&node_id);
            self.tables.edges.retain(|_, e| {
                e.source_node_id != node_id && e.target_node_id != node_id
            });
            self.node_graph.lock().expect("node graph poisoned").remove_node(node_id);
            return;
        }

        if let Some(mut node) = self.tables.nodes.get_mut(&node_id) {
            let docs: HashSet<Uuid> = remaining.iter().map(|l| l.document_id).collect();
            node.document_count = docs.len();
            node.mention_count = remaining.len();
            node.touch();
        }
    }

    // ---- ocr / chunks / images / vlm -------------------------------------

    pub async fn insert_ocr_result(&self, result: OcrResult) -> Result<Uuid, RepoError> {
        if !self.tables.documents.contains_key(&result.document_id) {
            return Err(IntegrityError::ForeignKey {
                child_kind: "ocr_result",
                child_id: result.id,
                parent_kind: "document",
                parent_id: result.document_id,
            }
            .into());
        }
        self.require_provenance_kind("ocr_result", result.id, result.provenance_id, ProvenanceKind::OcrResult)?;
        let id = result.id;
        self.journal(WalOp::PutOcrResult(Box::new(result))).await?;
        Ok(id)
    }

    pub fn ocr_result_for_document(&self, document_id: Uuid) -> Option<OcrResult> {
        self.tables
            .ocr_results
            .iter()
            .find(|r| r.document_id == document_id)
            .map(|r| r.clone())
    }

    pub async fn insert_chunk(&self, chunk: Chunk) -> Result<Uuid, RepoError> {
        if !self.tables.documents.contains_key(&chunk.document_id) {
            return Err(IntegrityError::ForeignKey {
                child_kind: "chunk",
                child_id: chunk.id,
                parent_kind: "document",
                parent_id: chunk.document_id,
            }
            .into());
        }
        if chunk.character_start > chunk.character_end {
            return Err(IntegrityError::Check {
                kind: "chunk",
                id: chunk.id,
                field: "character_start",
                reason: "must not exceed character_end".into(),
            }
            .into());
        }
        self.require_provenance_kind("chunk", chunk.id, chunk.provenance_id, ProvenanceKind::Chunk)?;
        let chunk_prov = self
            .tables
            .provenance
            .get(&chunk.provenance_id)
            .expect("checked above")
            .clone();
        let parent_id = chunk_prov.parent_id.ok_or(IntegrityError::Check {
            kind: "chunk",
            id: chunk.id,
            field: "provenance_id",
            reason: "chunk provenance has no parent, expected parent of kind OCR_RESULT".into(),
        })?;
        let parent_record = self.tables.provenance.get(&parent_id).ok_or(IntegrityError::ForeignKey {
            child_kind: "chunk",
            child_id: chunk.id,
            parent_kind: "provenance",
            parent_id,
        })?;
        if parent_record.kind != ProvenanceKind::OcrResult {
            return Err(IntegrityError::Check {
                kind: "chunk",
                id: chunk.id,
                field: "provenance_id",
                reason: format!(
                    "chunk provenance's parent must be kind OCR_RESULT, found {:?}",
                    parent_record.kind
                ),
            }
            .into());
        }
        let id = chunk.id;
        self.journal(WalOp::PutChunk(Box::new(chunk))).await?;
        Ok(id)
    }

    pub fn chunks_for_document(&self, document_id: Uuid) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = self
            .tables
            .chunks
            .iter()
            .filter(|c| c.document_id == document_id)
            .map(|c| c.clone())
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        chunks
    }

    pub fn get_chunk(&self, id: Uuid) -> Option<Chunk> {
        self.tables.chunks.get(&id).map(|c| c.clone())
    }

    pub async fn insert_image(&self, image: Image) -> Result<Uuid, RepoError> {
        if !self.tables.documents.contains_key(&image.document_id) {
            return Err(IntegrityError::ForeignKey {
                child_kind: "image",
                child_id: image.id,
                parent_kind: "document",
                parent_id: image.document_id,
            }
            .into());
        }
        let id = image.id;
        self.journal(WalOp::PutImage(Box::new(image))).await?;
        Ok(id)
    }

    pub async fn insert_vlm_description(&self, v: VlmDescription) -> Result<Uuid, RepoError> {
        if !self.tables.images.contains_key(&v.image_id) {
            return Err(IntegrityError::ForeignKey {
                child_kind: "vlm_description",
                child_id: v.id,
                parent_kind: "image",
                parent_id: v.image_id,
            }
            .into());
        }
        let id = v.id;
        self.journal(WalOp::PutVlmDescription(Box::new(v))).await?;
        Ok(id)
    }

    // ---- entities ---------------------------------------------------------

    pub async fn insert_entity(&self, entity: Entity) -> Result<Uuid, RepoError> {
        if !self.tables.documents.contains_key(&entity.document_id) {
            return Err(IntegrityError::ForeignKey {
                child_kind: "entity",
                child_id: entity.id,
                parent_kind: "document",
                parent_id: entity.document_id,
            }
            .into());
        }
        let id = entity.id;
        self.journal(WalOp::PutEntity(Box::new(entity))).await?;
        Ok(id)
    }

    pub fn entities_for_document(&self, document_id: Uuid) -> Vec<Entity> {
        self.tables
            .entities
            .iter()
            .filter(|e| e.document_id == document_id)
            .map(|e| e.clone())
            .collect()
    }

    pub fn get_entity(&self, id: Uuid) -> Option<Entity> {
        self.tables.entities.get(&id).map(|e| e.clone())
    }

    pub async fn insert_mention(&self, mention: EntityMention) -> Result<Uuid, RepoError> {
        if !self.tables.entities.contains_key(&mention.entity_id) {
            return Err(IntegrityError::ForeignKey {
                child_kind: "entity_mention",
                child_id: mention.id,
                parent_kind: "entity",
                parent_id: mention.entity_id,
            }
            .into());
        }
        let id = mention.id;
        self.journal(WalOp::PutEntityMention(Box::new(mention))).await?;
        Ok(id)
    }

    pub fn mentions_for_entity(&self, entity_id: Uuid) -> Vec<EntityMention> {
        self.tables
            .mentions
            .iter()
            .filter(|m| m.entity_id == entity_id)
            .map(|m| m.clone())
            .collect()
    }

    // ---- embeddings ---------------------------------------------------------

    pub async fn insert_embedding(&self, embedding: Embedding) -> Result<Uuid, RepoError> {
        if !embedding.has_exactly_one_owner() {
            return Err(IntegrityError::Check {
                kind: "embedding",
                id: embedding.id,
                field: "owner",
                reason: "exactly one of chunk_id/image_id/extraction_id must be set".into(),
            }
            .into());
        }
        let id = embedding.id;
        self.journal(WalOp::PutEmbedding(Box::new(embedding))).await?;
        Ok(id)
    }

    pub fn get_embedding(&self, id: Uuid) -> Option<Embedding> {
        self.tables.embeddings.get(&id).map(|e| e.clone())
    }

    // ---- extractions --------------------------------------------------------

    pub async fn insert_extraction(&self, extraction: Extraction) -> Result<Uuid, RepoError> {
        if !self.tables.documents.contains_key(&extraction.document_id) {
            return Err(IntegrityError::ForeignKey {
                child_kind: "extraction",
                child_id: extraction.id,
                parent_kind: "document",
                parent_id: extraction.document_id,
            }
            .into());
        }
        let id = extraction.id;
        self.journal(WalOp::PutExtraction(Box::new(extraction))).await?;
        Ok(id)
    }

    pub fn extractions_for_document(&self, document_id: Uuid) -> Vec<Extraction> {
        self.tables
            .extractions
            .iter()
            .filter(|e| e.document_id == document_id)
            .map(|e| e.clone())
            .collect()
    }

    // ---- knowledge graph ------------------------------------------------------

    pub async fn upsert_node(&self, node: KnowledgeNode) -> Result<Uuid, RepoError> {
        let id = node.id;
        self.journal(WalOp::PutKnowledgeNode(Box::new(node))).await?;
        Ok(id)
    }

    pub fn get_node(&self, id: Uuid) -> Option<KnowledgeNode> {
        self.tables.nodes.get(&id).map(|n| n.clone())
    }

    pub fn find_node_by_normalized_name(
        &self,
        entity_type: EntityType,
        normalized_name: &str,
    ) -> Option<KnowledgeNode> {
        self.tables
            .nodes
            .iter()
            .find(|n| n.entity_type == entity_type && n.normalized_name == normalized_name)
            .map(|n| n.clone())
    }

    pub fn all_nodes(&self) -> Vec<KnowledgeNode> {
        self.tables.nodes.iter().map(|n| n.clone()).collect()
    }

    pub async fn delete_node(&self, id: Uuid) -> Result<(), RepoError> {
        if !self.tables.nodes.contains_key(&id) {
            return Err(IntegrityError::NotFound { kind: "knowledge_node", id }.into());
        }
        self.journal(WalOp::DeleteKnowledgeNode(id)).await
    }

    fn cascade_delete_node(&self, id: Uuid) {
        self.tables.nodes.remove(&id);
        self.tables
            .edges
            .retain(|_, e| e.source_node_id != id && e.target_node_id != id);
        self.tables.node_entity_links.retain(|_, l| l.node_id != id);
        self.node_graph.lock().expect("node graph poisoned").remove_node(id);
    }

    pub async fn upsert_edge(&self, edge: KnowledgeEdge) -> Result<Uuid, RepoError> {
        if !self.tables.nodes.contains_key(&edge.source_node_id) {
            return Err(IntegrityError::ForeignKey {
                child_kind: "knowledge_edge",
                child_id: edge.id,
                parent_kind: "knowledge_node",
                parent_id: edge.source_node_id,
            }
            .into());
        }
        if !self.tables.nodes.contains_key(&edge.target_node_id) {
            return Err(IntegrityError::ForeignKey {
                child_kind: "knowledge_edge",
                child_id: edge.id,
                parent_kind: "knowledge_node",
                parent_id: edge.target_node_id,
            }
            .into());
        }
        let id = edge.id;
        self.journal(WalOp::PutKnowledgeEdge(Box::new(edge))).await?;
        Ok(id)
    }

    /// Finds an existing edge between the canonical (source<target)
    /// ordering of `a`/`b` with the given relationship type, if present.
    pub fn find_edge(&self, a: Uuid, b: Uuid, relationship: &RelationshipType) -> Option<KnowledgeEdge> {
        let (lo, hi) = KnowledgeEdge::canonical_pair(a, b);
        self.tables.edges.iter().find_map(|e| {
            let (elo, ehi) = KnowledgeEdge::canonical_pair(e.source_node_id, e.target_node_id);
            if elo == lo && ehi == hi && e.relationship_type.as_str() == relationship.as_str() {
                Some(e.clone())
            } else {
                None
            }
        })
    }

    pub fn edges_for_node(&self, node_id: Uuid) -> Vec<KnowledgeEdge> {
        self.tables
            .edges
            .iter()
            .filter(|e| e.source_node_id == node_id || e.target_node_id == node_id)
            .map(|e| e.clone())
            .collect()
    }

    /// Drops a single edge, e.g. when contradiction resolution (§4.10)
    /// decides a relationship no longer holds.
    pub async fn delete_edge(&self, id: Uuid) -> Result<(), RepoError> {
        if !self.tables.edges.contains_key(&id) {
            return Err(IntegrityError::NotFound { kind: "knowledge_edge", id }.into());
        }
        self.journal(WalOp::DeleteKnowledgeEdge(id)).await
    }

    pub async fn insert_node_entity_link(&self, link: NodeEntityLink) -> Result<Uuid, RepoError> {
        if !self.tables.nodes.contains_key(&link.node_id) {
            return Err(IntegrityError::ForeignKey {
                child_kind: "node_entity_link",
                child_id: link.id,
                parent_kind: "knowledge_node",
                parent_id: link.node_id,
            }
            .into());
        }
        if !self.tables.entities.contains_key(&link.entity_id) {
            return Err(IntegrityError::ForeignKey {
                child_kind: "node_entity_link",
                child_id: link.id,
                parent_kind: "entity",
                parent_id: link.entity_id,
            }
            .into());
        }
        if self.tables.node_entity_links.iter().any(|l| l.entity_id == link.entity_id) {
            return Err(IntegrityError::Unique {
                kind: "node_entity_link",
                id: link.id,
                constraint: "node_entity_links_entity_id_unique",
            }
            .into());
        }
        let id = link.id;
        self.journal(WalOp::PutNodeEntityLink(Box::new(link))).await?;
        Ok(id)
    }

    pub fn links_for_node(&self, node_id: Uuid) -> Vec<NodeEntityLink> {
        self.tables
            .node_entity_links
            .iter()
            .filter(|l| l.node_id == node_id)
            .map(|l| l.clone())
            .collect()
    }

    pub fn entity_is_linked(&self, entity_id: Uuid) -> bool {
        self.tables.node_entity_links.iter().any(|l| l.entity_id == entity_id)
    }

    pub fn document_has_linked_entities(&self, document_id: Uuid) -> bool {
        self.tables
            .entities
            .iter()
            .filter(|e| e.document_id == document_id)
            .any(|e| self.entity_is_linked(e.id))
    }

    // ---- clustering ------------------------------------------------------------

    pub async fn insert_cluster(&self, cluster: ClusterRow) -> Result<Uuid, RepoError> {
        let id = cluster.id;
        self.journal(WalOp::PutClusterRow(Box::new(cluster))).await?;
        Ok(id)
    }

    pub async fn insert_document_cluster(&self, row: DocumentClusterRow) -> Result<Uuid, RepoError> {
        if !self.tables.clusters.contains_key(&row.cluster_id) {
            return Err(IntegrityError::ForeignKey {
                child_kind: "document_cluster",
                child_id: row.id,
                parent_kind: "cluster",
                parent_id: row.cluster_id,
            }
            .into());
        }
        let id = row.id;
        self.journal(WalOp::PutDocumentClusterRow(Box::new(row))).await?;
        Ok(id)
    }

    pub fn clusters_for_run(&self, run_id: Uuid) -> Vec<ClusterRow> {
        self.tables
            .clusters
            .iter()
            .filter(|c| c.run_id == run_id)
            .map(|c| c.clone())
            .collect()
    }

    pub fn document_clusters_for_run(&self, run_id: Uuid) -> Vec<DocumentClusterRow> {
        self.tables
            .document_clusters
            .iter()
            .filter(|c| c.run_id == run_id)
            .map(|c| c.clone())
            .collect()
    }

    // ---- AI synthesis outputs ---------------------------------------------------

    pub async fn insert_entity_role(&self, role: EntityRole) -> Result<Uuid, RepoError> {
        let id = role.id;
        self.journal(WalOp::PutEntityRole(Box::new(role))).await?;
        Ok(id)
    }

    pub fn entity_roles_for_node(&self, node_id: Uuid) -> Vec<EntityRole> {
        self.tables
            .entity_roles
            .iter()
            .filter(|r| r.node_id == node_id)
            .map(|r| r.clone())
            .collect()
    }

    pub async fn insert_corpus_intelligence(&self, ci: CorpusIntelligence) -> Result<Uuid, RepoError> {
        let id = ci.id;
        self.journal(WalOp::PutCorpusIntelligence(Box::new(ci))).await?;
        Ok(id)
    }

    pub fn latest_corpus_intelligence(&self) -> Option<CorpusIntelligence> {
        self.tables.corpus_intelligence.iter().map(|c| c.clone()).last()
    }

    pub async fn insert_document_narrative(&self, n: DocumentNarrative) -> Result<Uuid, RepoError> {
        if !self.tables.documents.contains_key(&n.document_id) {
            return Err(IntegrityError::ForeignKey {
                child_kind: "document_narrative",
                child_id: n.id,
                parent_kind: "document",
                parent_id: n.document_id,
            }
            .into());
        }
        let id = n.id;
        self.journal(WalOp::PutDocumentNarrative(Box::new(n))).await?;
        Ok(id)
    }

    pub fn narrative_for_document(&self, document_id: Uuid) -> Option<DocumentNarrative> {
        self.tables
            .document_narratives
            .iter()
            .find(|n| n.document_id == document_id)
            .map(|n| n.clone())
    }

    // ---- retrieval surfaces used by `query` -------------------------------------

    pub fn bm25_search(&self, query: &str, limit: usize, allowed: Option<&[Uuid]>) -> Vec<(Uuid, f32)> {
        self.chunk_index
            .lock()
            .expect("chunk index poisoned")
            .search(query, limit, allowed)
            .into_iter()
            .map(|h| (h.doc_id, h.score))
            .collect()
    }

    pub fn vector_search(
        &self,
        query: &[f32],
        k: usize,
        allowed: Option<&[Uuid]>,
        threshold: Option<f32>,
    ) -> Vec<(Uuid, f32)> {
        self.vector_index
            .lock()
            .expect("vector index poisoned")
            .search(query, k, allowed, threshold)
    }

    pub fn chunk_highlight(&self, chunk_id: Uuid, query: &str, context_chars: usize) -> Option<String> {
        self.chunk_index.lock().expect("chunk index poisoned").highlight(chunk_id, query, context_chars)
    }

    pub fn expand_node(&self, node_id: Uuid, max_hops: u8) -> Vec<(Uuid, u8)> {
        self.node_graph.lock().expect("node graph poisoned").expand(node_id, max_hops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docgraph_core::hash::hash;
    use tempfile::tempdir;

    fn processor() -> Processor {
        Processor::new("test-processor", "0.1.0")
    }

    async fn repo() -> Repo {
        let dir = tempdir().unwrap();
        Repo::open(dir.path().join("test.wal")).await.unwrap()
    }

    fn sample_document(provenance_id: Uuid) -> Document {
        Document {
            id: Uuid::new_v4(),
            file_path: "/tmp/doc.pdf".into(),
            file_name: "doc.pdf".into(),
            file_hash: hash(b"doc"),
            file_size: 3,
            file_type: "application/pdf".into(),
            status: DocumentStatus::Pending,
            provenance_id,
            title: None,
            author: None,
            subject: None,
            page_count: Some(1),
            error_message: None,
            ocr_completed_at: None,
        }
    }

    #[tokio::test]
    async fn insert_document_without_provenance_is_rejected() {
        let repo = repo().await;
        let doc = sample_document(Uuid::new_v4());
        let result = repo.insert_document(doc).await;
        assert!(matches!(result, Err(RepoError::Integrity(IntegrityError::ForeignKey { .. }))));
    }

    #[tokio::test]
    async fn insert_and_fetch_document_round_trips() {
        let repo = repo().await;
        let prov = ProvenanceRecord::root(
            ProvenanceKind::Document,
            hash(b"doc"),
            hash(b"doc"),
            processor(),
        );
        let prov_id = repo.insert_provenance(prov).await.unwrap();
        let doc = sample_document(prov_id);
        let doc_id = repo.insert_document(doc).await.unwrap();

        let fetched = repo.get_document(doc_id).unwrap();
        assert_eq!(fetched.file_name, "doc.pdf");
    }

    #[tokio::test]
    async fn deleting_document_cascades_to_chunks_and_embeddings() {
        let repo = repo().await;
        let prov = ProvenanceRecord::root(ProvenanceKind::Document, hash(b"d"), hash(b"d"), processor());
        let prov_id = repo.insert_provenance(prov.clone()).await.unwrap();
        let doc_id = repo.insert_document(sample_document(prov_id)).await.unwrap();

        let ocr_prov = ProvenanceRecord::child(
            ProvenanceKind::OcrResult,
            ProvenanceKind::Document,
            &prov,
            hash(b"ocr"),
            None,
            processor(),
        );
        let ocr_prov_id = repo.insert_provenance(ocr_prov).await.unwrap();

        let chunk = Chunk {
            id: Uuid::new_v4(),
            document_id: doc_id,
            ocr_result_id: Uuid::new_v4(),
            text: "hello world".into(),
            text_hash: hash(b"hello world"),
            chunk_index: 0,
            character_start: 0,
            character_end: 11,
            page_number: Some(1),
            overlap_previous: 0,
            overlap_next: 0,
            provenance_id: ocr_prov_id,
            embedding_status: EmbeddingStatus::Pending,
        };
        let chunk_id = repo.insert_chunk(chunk).await.unwrap();

        let embedding = Embedding {
            id: Uuid::new_v4(),
            provenance_id: ocr_prov_id,
            chunk_id: Some(chunk_id),
            image_id: None,
            extraction_id: None,
            model_id: "deterministic-v1".into(),
            vector: vec![0.1, 0.2, 0.3],
        };
        repo.insert_embedding(embedding).await.unwrap();

        assert_eq!(repo.chunks_for_document(doc_id).len(), 1);
        repo.delete_document(doc_id).await.unwrap();

        assert!(repo.get_document(doc_id).is_none());
        assert!(repo.chunks_for_document(doc_id).is_empty());
        assert!(repo.bm25_search("hello", 10, None).is_empty());
    }

    #[tokio::test]
    async fn embedding_requires_exactly_one_owner() {
        let repo = repo().await;
        let embedding = Embedding {
            id: Uuid::new_v4(),
            provenance_id: Uuid::new_v4(),
            chunk_id: None,
            image_id: None,
            extraction_id: None,
            model_id: "m".into(),
            vector: vec![1.0],
        };
        let result = repo.insert_embedding(embedding).await;
        assert!(matches!(result, Err(RepoError::Integrity(IntegrityError::Check { .. }))));
    }

    #[tokio::test]
    async fn node_entity_link_enforces_one_node_per_entity() {
        let repo = repo().await;
        let prov = ProvenanceRecord::root(ProvenanceKind::Document, hash(b"d"), hash(b"d"), processor());
        let prov_id = repo.insert_provenance(prov).await.unwrap();
        let doc_id = repo.insert_document(sample_document(prov_id)).await.unwrap();

        let entity = Entity {
            id: Uuid::new_v4(),
            document_id: doc_id,
            entity_type: EntityType::Person,
            raw_text: "J. Smith".into(),
            normalized_text: "j smith".into(),
            confidence: 0.9,
            metadata: None,
            provenance_id: prov_id,
        };
        let entity_id = repo.insert_entity(entity).await.unwrap();

        let node = KnowledgeNode {
            id: Uuid::new_v4(),
            entity_type: EntityType::Person,
            canonical_name: "J. Smith".into(),
            normalized_name: "j smith".into(),
            aliases: vec![],
            document_count: 1,
            mention_count: 1,
            edge_count: 0,
            avg_confidence: 0.9,
            importance_score: None,
            resolution_type: Some("exact".into()),
            provenance_id: prov_id,
            created_at: "now".into(),
            updated_at: "now".into(),
        };
        let node_id = repo.upsert_node(node).await.unwrap();

        let link = NodeEntityLink {
            id: Uuid::new_v4(),
            node_id,
            entity_id,
            document_id: doc_id,
            similarity_score: 1.0,
            resolution_method: "exact".into(),
            created_at: "now".into(),
        };
        repo.insert_node_entity_link(link.clone()).await.unwrap();

        let mut duplicate = link;
        duplicate.id = Uuid::new_v4();
        let result = repo.insert_node_entity_link(duplicate).await;
        assert!(matches!(result, Err(RepoError::Integrity(IntegrityError::Unique { .. }))));
    }

    #[tokio::test]
    async fn replay_restores_documents_after_reopen() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("restore.wal");

        let prov_id;
        let doc_id;
        {
            let repo = Repo::open(&wal_path).await.unwrap();
            let prov = ProvenanceRecord::root(ProvenanceKind::Document, hash(b"d"), hash(b"d"), processor());
            prov_id = repo.insert_provenance(prov).await.unwrap();
            doc_id = repo.insert_document(sample_document(prov_id)).await.unwrap();
        }

        let repo = Repo::open(&wal_path).await.unwrap();
        assert!(repo.get_document(doc_id).is_some());
        assert!(repo.get_provenance(prov_id).is_some());
    }
}
