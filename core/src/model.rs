//! The shared data model (§3). Every row the store persists is defined
//! here so `storage`, `resolver`, `ingestion` and `query` agree on shape.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// The closed set of provenance kinds (§3, Provenance record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvenanceKind {
    Document,
    OcrResult,
    Chunk,
    Image,
    VlmDescription,
    Embedding,
    Extraction,
    FormFill,
    EntityExtraction,
    Comparison,
    Clustering,
    KnowledgeGraph,
    CorpusIntelligence,
}

/// Which processor produced a provenance record, with its version pinned so
/// re-runs under a different processor version are distinguishable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Processor {
    pub name: String,
    pub version: String,
}

impl Processor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// A node in the provenance DAG (§3, §4.3). `chain_depth == 0` iff
/// `parent_id` is absent; `root_document_id` is set on every record,
/// self-referential for roots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub id: Uuid,
    pub kind: ProvenanceKind,
    pub source_kind: ProvenanceKind,
    pub source_path: Option<String>,
    pub source_id: Option<Uuid>,
    pub root_document_id: Uuid,
    pub content_hash: String,
    pub input_hash: Option<String>,
    pub file_hash: Option<String>,
    pub processor: Processor,
    pub processing_params: serde_json::Value,
    pub parent_id: Option<Uuid>,
    pub parent_ids: Vec<Uuid>,
    pub chain_depth: u32,
    pub created_at: String,
}

impl ProvenanceRecord {
    /// Builds a root record: `chain_depth = 0`, self-referential
    /// `root_document_id`, no parent.
    pub fn root(
        kind: ProvenanceKind,
        file_hash: String,
        content_hash: String,
        processor: Processor,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            kind,
            source_kind: kind,
            source_path: None,
            source_id: None,
            root_document_id: id,
            content_hash,
            input_hash: None,
            file_hash: Some(file_hash),
            processor,
            processing_params: serde_json::Value::Null,
            parent_id: None,
            parent_ids: Vec::new(),
            chain_depth: 0,
            created_at: now_iso8601(),
        }
    }

    /// Builds a child record derived from a single primary parent.
    pub fn child(
        kind: ProvenanceKind,
        source_kind: ProvenanceKind,
        parent: &ProvenanceRecord,
        content_hash: String,
        input_hash: Option<String>,
        processor: Processor,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            source_kind,
            source_path: None,
            source_id: Some(parent.id),
            root_document_id: parent.root_document_id,
            content_hash,
            input_hash,
            file_hash: None,
            processor,
            processing_params: serde_json::Value::Null,
            parent_id: Some(parent.id),
            parent_ids: vec![parent.id],
            chain_depth: parent.chain_depth + 1,
            created_at: now_iso8601(),
        }
    }

    /// Builds a graph-level record with no single parent (e.g. a
    /// corpus-wide knowledge-graph build spanning many documents).
    pub fn graph_level(
        kind: ProvenanceKind,
        parent_ids: Vec<Uuid>,
        chain_depth: u32,
        root_document_id: Uuid,
        content_hash: String,
        processor: Processor,
    ) -> Self {
        let parent_id = parent_ids.first().copied();
        Self {
            id: Uuid::new_v4(),
            kind,
            source_kind: kind,
            source_path: None,
            source_id: parent_id,
            root_document_id,
            content_hash,
            input_hash: None,
            file_hash: None,
            processor,
            processing_params: serde_json::Value::Null,
            parent_id,
            parent_ids,
            chain_depth,
            created_at: now_iso8601(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub file_path: String,
    pub file_name: String,
    pub file_hash: String,
    pub file_size: u64,
    pub file_type: String,
    pub status: DocumentStatus,
    pub provenance_id: Uuid,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub page_count: Option<u32>,
    pub error_message: Option<String>,
    pub ocr_completed_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrMode {
    Fast,
    Balanced,
    Accurate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    pub id: Uuid,
    pub provenance_id: Uuid,
    pub document_id: Uuid,
    pub extracted_text: String,
    pub text_length: usize,
    pub mode: OcrMode,
    pub page_count: u32,
    pub processing_duration_ms: u64,
    pub block_layout: Option<serde_json::Value>,
    pub extras: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    Pending,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub ocr_result_id: Uuid,
    pub text: String,
    pub text_hash: String,
    pub chunk_index: u32,
    pub character_start: usize,
    pub character_end: usize,
    pub page_number: Option<u32>,
    pub overlap_previous: usize,
    pub overlap_next: usize,
    pub provenance_id: Uuid,
    pub embedding_status: EmbeddingStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: Uuid,
    pub document_id: Uuid,
    pub page_number: u32,
    pub bounding_box: (f32, f32, f32, f32),
    pub file_path: String,
    pub provenance_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlmDescription {
    pub id: Uuid,
    pub image_id: Uuid,
    pub document_id: Uuid,
    pub description: String,
    pub provenance_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Date,
    Amount,
    CaseNumber,
    Location,
    Statute,
    Exhibit,
    Medication,
    Diagnosis,
    MedicalDevice,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub document_id: Uuid,
    pub entity_type: EntityType,
    pub raw_text: String,
    pub normalized_text: String,
    pub confidence: f32,
    pub metadata: Option<serde_json::Value>,
    pub provenance_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMention {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub document_id: Uuid,
    pub chunk_id: Option<Uuid>,
    pub page_number: Option<u32>,
    pub character_start: Option<usize>,
    pub character_end: Option<usize>,
    pub context_text: String,
    pub provenance_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeNode {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub canonical_name: String,
    pub normalized_name: String,
    pub aliases: Vec<String>,
    pub document_count: usize,
    pub mention_count: usize,
    pub edge_count: usize,
    pub avg_confidence: f32,
    pub importance_score: Option<f32>,
    pub resolution_type: Option<String>,
    pub provenance_id: Uuid,
    pub created_at: String,
    pub updated_at: String,
}

impl KnowledgeNode {
    pub fn touch(&mut self) {
        self.updated_at = now_iso8601();
    }
}

/// The closed relationship-type set (§3, Knowledge Edge) plus an escape
/// hatch for AI-synthesized relations the source text names that aren't
/// in the core vocabulary (stored verbatim in `RelationshipType::Other`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RelationshipType {
    CoMentioned,
    CoLocated,
    WorksAt,
    Represents,
    LocatedIn,
    FiledIn,
    Cites,
    References,
    PartyTo,
    RelatedTo,
    Precedes,
    OccurredAt,
    DiagnosedWith,
    TreatedWith,
    SupervisedBy,
    /// Any relation name the AI synthesis layer infers that isn't in the
    /// fixed vocabulary above; stored verbatim (snake_case by convention).
    Other(String),
}

impl RelationshipType {
    pub fn is_structural(&self) -> bool {
        matches!(self, RelationshipType::CoMentioned | RelationshipType::CoLocated)
    }

    pub fn as_str(&self) -> &str {
        match self {
            RelationshipType::CoMentioned => "co_mentioned",
            RelationshipType::CoLocated => "co_located",
            RelationshipType::WorksAt => "works_at",
            RelationshipType::Represents => "represents",
            RelationshipType::LocatedIn => "located_in",
            RelationshipType::FiledIn => "filed_in",
            RelationshipType::Cites => "cites",
            RelationshipType::References => "references",
            RelationshipType::PartyTo => "party_to",
            RelationshipType::RelatedTo => "related_to",
            RelationshipType::Precedes => "precedes",
            RelationshipType::OccurredAt => "occurred_at",
            RelationshipType::DiagnosedWith => "diagnosed_with",
            RelationshipType::TreatedWith => "treated_with",
            RelationshipType::SupervisedBy => "supervised_by",
            RelationshipType::Other(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for RelationshipType {
    fn from(value: &str) -> Self {
        match value {
            "co_mentioned" => RelationshipType::CoMentioned,
            "co_located" => RelationshipType::CoLocated,
            "works_at" => RelationshipType::WorksAt,
            "represents" => RelationshipType::Represents,
            "located_in" => RelationshipType::LocatedIn,
            "filed_in" => RelationshipType::FiledIn,
            "cites" => RelationshipType::Cites,
            "references" => RelationshipType::References,
            "party_to" => RelationshipType::PartyTo,
            "related_to" => RelationshipType::RelatedTo,
            "precedes" => RelationshipType::Precedes,
            "occurred_at" => RelationshipType::OccurredAt,
            "diagnosed_with" => RelationshipType::DiagnosedWith,
            "treated_with" => RelationshipType::TreatedWith,
            "supervised_by" => RelationshipType::SupervisedBy,
            other => RelationshipType::Other(other.to_string()),
        }
    }
}

impl Serialize for RelationshipType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RelationshipType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(RelationshipType::from(raw.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEdge {
    pub id: Uuid,
    pub source_node_id: Uuid,
    pub target_node_id: Uuid,
    pub relationship_type: RelationshipType,
    pub weight: f32,
    pub evidence_count: usize,
    pub document_ids: Vec<Uuid>,
    pub metadata: serde_json::Value,
    pub valid_from: Option<String>,
    pub valid_until: Option<String>,
    pub normalized_weight: Option<f32>,
    pub contradiction_count: Option<u32>,
    pub provenance_id: Uuid,
    pub created_at: String,
}

impl KnowledgeEdge {
    /// Canonical (source < target) ordering so co-mention/co-location
    /// edges, which are undirected, are stored exactly once per pair.
    pub fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntityLink {
    pub id: Uuid,
    pub node_id: Uuid,
    pub entity_id: Uuid,
    pub document_id: Uuid,
    pub similarity_score: f32,
    pub resolution_method: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRow {
    pub embedding_id: Uuid,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRow {
    pub id: Uuid,
    pub run_id: Uuid,
    pub cluster_index: u32,
    pub label: Option<String>,
    pub centroid: Vec<f32>,
    pub coherence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentClusterRow {
    pub id: Uuid,
    pub run_id: Uuid,
    pub document_id: Uuid,
    pub cluster_id: Uuid,
    pub overlap: f32,
}

/// Required for `insert_embedding`: exactly one owner must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub id: Uuid,
    pub provenance_id: Uuid,
    pub chunk_id: Option<Uuid>,
    pub image_id: Option<Uuid>,
    pub extraction_id: Option<Uuid>,
    pub model_id: String,
    pub vector: Vec<f32>,
}

impl Embedding {
    pub fn has_exactly_one_owner(&self) -> bool {
        [self.chunk_id, self.image_id, self.extraction_id]
            .iter()
            .filter(|o| o.is_some())
            .count()
            == 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    pub id: Uuid,
    pub document_id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
    pub provenance_id: Uuid,
}

/// Per-entity or per-document role assigned by the AI synthesis layer
/// (§4.8, entity role classification).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleScope {
    Database,
    Document,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRole {
    pub id: Uuid,
    pub node_id: Uuid,
    pub role: String,
    pub theme: String,
    pub importance_rank: u32,
    pub context_summary: String,
    pub scope: RoleScope,
    pub document_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusIntelligence {
    pub id: Uuid,
    pub provenance_id: Uuid,
    pub summary: String,
    pub key_actors: Vec<KeyActor>,
    pub themes: Vec<String>,
    pub narrative_arcs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyActor {
    pub canonical_name: String,
    pub importance: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentNarrative {
    pub id: Uuid,
    pub document_id: Uuid,
    pub provenance_id: Uuid,
    pub narrative: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionSeverity {
    High,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub node_id: Uuid,
    pub relationship_type: RelationshipType,
    pub objects: Vec<Uuid>,
    pub severity: ContradictionSeverity,
}

/// Tracks the staleness of the full-text index relative to the chunk table
/// it was built from (§4.9). `content_hash` is a composite hash over the
/// sorted set of indexed chunk ids, so a rebuild can tell "nothing changed"
/// from "some chunks were added or removed" without re-tokenizing anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtsMetadata {
    pub last_rebuild_at: String,
    pub chunks_indexed: usize,
    pub tokenizer: String,
    pub schema_version: u32,
    pub content_hash: String,
}

impl FtsMetadata {
    pub fn new(chunks_indexed: usize, schema_version: u32, content_hash: String) -> Self {
        Self {
            last_rebuild_at: now_iso8601(),
            chunks_indexed,
            tokenizer: "alphanumeric-lowercase".to_string(),
            schema_version,
            content_hash,
        }
    }
}

/// Free-form bag carried on a row's JSON-valued columns; kept distinct from
/// `serde_json::Value` at call sites for readability.
pub type Metadata = HashMap<String, serde_json::Value>;
