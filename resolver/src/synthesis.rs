//! AI synthesis layer (§4.8): corpus intelligence, document narratives,
//! AI-inferred relationships, evidence grounding, cross-document synthesis,
//! and entity role classification. Every external call goes through a
//! single-method [`SynthesisBackend`] collaborator, gated by a rate limiter
//! and circuit breaker, and returns raw text the layer itself parses as
//! (possibly code-fenced) JSON.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use docgraph_core::error::{CoreError, ErrorCategory};
use docgraph_core::model::{
    CorpusIntelligence, DocumentNarrative, EntityRole, EntityType, KeyActor, KnowledgeEdge,
    KnowledgeNode, Processor, ProvenanceKind, ProvenanceRecord, RelationshipType, RoleScope,
};
use serde::Deserialize;
use storage::{Repo, RepoError};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::resilience::{CircuitBreaker, RateLimiter};

pub const MAX_CENSUS_PER_TYPE: usize = 20;
pub const MAX_DOCUMENT_ROSTER: usize = 100;
pub const OCR_TEXT_TRUNCATE_CHARS: usize = 4000;
pub const NARRATIVE_MAX_CHARS: usize = 2000;
pub const EVIDENCE_CHUNK_LIMIT: usize = 5;
const EVIDENCE_WEIGHT_BOOST: f32 = 0.1;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("storage error: {0}")]
    Repo(#[from] RepoError),
    #[error("AI backend rejected the call: {0}")]
    Backend(#[source] anyhow::Error),
    #[error("AI backend response was not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("AI call rate limit exceeded")]
    RateLimited,
    #[error("AI backend circuit breaker is open, retry in {time_to_recovery:?}")]
    CircuitOpen { time_to_recovery: Option<Duration> },
}

impl CoreError for SynthesisError {
    fn category(&self) -> ErrorCategory {
        match self {
            SynthesisError::Repo(e) => e.category(),
            SynthesisError::Backend(_) | SynthesisError::RateLimited | SynthesisError::CircuitOpen { .. } => {
                ErrorCategory::External
            }
            SynthesisError::Json(_) => ErrorCategory::External,
        }
    }
}

/// The AI collaborator (§9: "AI calls as an interface, not a type"). A
/// single free-form completion method; the synthesis layer owns prompt
/// construction and response parsing so swapping providers never touches
/// call sites.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Wraps a [`SynthesisBackend`] with the rate-limiter + circuit-breaker
/// pair every AI call must pass through.
pub struct GuardedBackend {
    inner: Box<dyn SynthesisBackend>,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
}

impl GuardedBackend {
    pub fn new(inner: Box<dyn SynthesisBackend>, rate_limiter: RateLimiter, circuit_breaker: CircuitBreaker) -> Self {
        Self { inner, rate_limiter, circuit_breaker }
    }

    async fn call(&self, prompt: &str) -> Result<String, SynthesisError> {
        if !self.circuit_breaker.allow_request() {
            return Err(SynthesisError::CircuitOpen { time_to_recovery: self.circuit_breaker.time_to_recovery() });
        }
        if !self.rate_limiter.try_acquire() {
            return Err(SynthesisError::RateLimited);
        }
        match self.inner.complete(prompt).await {
            Ok(text) => {
                self.circuit_breaker.record_success();
                Ok(text)
            }
            Err(err) => {
                self.circuit_breaker.record_failure();
                Err(SynthesisError::Backend(err))
            }
        }
    }
}

fn processor() -> Processor {
    Processor::new("ai-synthesis", "1.0.0")
}

/// Strips a single leading/trailing fenced-code block (``` ```lang\n `` ...
/// `` ``` ``) if present, then parses; on failure, retries against the raw
/// string before giving up. Matches providers that wrap JSON answers in
/// markdown even when asked not to.
fn parse_ai_json<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T, SynthesisError> {
    let trimmed = raw.trim();
    let unfenced = if let Some(rest) = trimmed.strip_prefix("```") {
        let without_lang = match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => rest,
        };
        without_lang.strip_suffix("```").unwrap_or(without_lang).trim()
    } else {
        trimmed
    };

    match serde_json::from_str(unfenced) {
        Ok(value) => Ok(value),
        Err(_) => Ok(serde_json::from_str(trimmed)?),
    }
}

/// NFC-normalizes and lowercases a name for entity lookup (§10.6: NFC
/// rather than NFKC, so visually distinct names never silently merge).
fn normalize_for_lookup(name: &str) -> String {
    name.nfc().collect::<String>().to_lowercase()
}

fn find_node_by_name<'a>(nodes: &'a [KnowledgeNode], name: &str) -> Option<&'a KnowledgeNode> {
    let target = normalize_for_lookup(name);
    nodes
        .iter()
        .find(|n| normalize_for_lookup(&n.canonical_name) == target)
        .or_else(|| nodes.iter().find(|n| n.aliases.iter().any(|a| normalize_for_lookup(a) == target)))
}

#[derive(Debug, Clone)]
pub struct CensusEntry {
    pub canonical_name: String,
    pub aliases: Vec<String>,
    pub entity_type: EntityType,
    pub importance_score: f32,
    pub mention_count: usize,
}

impl From<&KnowledgeNode> for CensusEntry {
    fn from(node: &KnowledgeNode) -> Self {
        Self {
            canonical_name: node.canonical_name.clone(),
            aliases: node.aliases.clone(),
            entity_type: node.entity_type,
            importance_score: node.importance_score.unwrap_or(0.0),
            mention_count: node.mention_count,
        }
    }
}

/// Builds the corpus "census" (§4.8 Tier 1 input): the top N nodes per
/// entity type by importance, then mention count, flattened with aliases.
pub fn build_census(repo: &Repo, top_n_per_type: usize) -> Vec<CensusEntry> {
    let mut by_type: std::collections::HashMap<EntityType, Vec<KnowledgeNode>> = std::collections::HashMap::new();
    for node in repo.all_nodes() {
        by_type.entry(node.entity_type).or_default().push(node);
    }

    let mut census = Vec::new();
    for (_, mut nodes) in by_type {
        nodes.sort_by(|a, b| {
            b.importance_score
                .unwrap_or(0.0)
                .partial_cmp(&a.importance_score.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.mention_count.cmp(&a.mention_count))
        });
        nodes.truncate(top_n_per_type);
        census.extend(nodes.iter().map(CensusEntry::from));
    }
    census
}

#[derive(Debug, Deserialize)]
struct CorpusIntelligenceResponse {
    summary: String,
    key_actors: Vec<KeyActorResponse>,
    themes: Vec<String>,
    narrative_arcs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct KeyActorResponse {
    canonical_name: String,
    importance: u32,
}

fn corpus_intelligence_prompt(census: &[CensusEntry]) -> String {
    let roster: Vec<String> = census
        .iter()
        .map(|e| format!("- {} ({:?}, {} mentions)", e.canonical_name, e.entity_type, e.mention_count))
        .collect();
    format!(
        "Given this corpus entity census:\n{}\n\nRespond with JSON: {{\"summary\": string (2-3 sentences), \
         \"key_actors\": [{{\"canonical_name\": string, \"importance\": 1-20}}] (top 20), \
         \"themes\": [string] (3-8), \"narrative_arcs\": [string] (1-5)}}. \
         Reference entities by their exact canonical_name.",
        roster.join("\n")
    )
}

/// Tier 1: one corpus intelligence record per database.
pub async fn build_corpus_intelligence(repo: &Repo, backend: &GuardedBackend) -> Result<Uuid, SynthesisError> {
    let census = build_census(repo, MAX_CENSUS_PER_TYPE);
    let raw = backend.call(&corpus_intelligence_prompt(&census)).await?;
    let parsed: CorpusIntelligenceResponse = parse_ai_json(&raw)?;

    let mut key_actors: Vec<KeyActor> = parsed
        .key_actors
        .into_iter()
        .map(|a| KeyActor { canonical_name: a.canonical_name, importance: a.importance.clamp(1, 20) })
        .collect();
    key_actors.truncate(20);

    let node_provenance_ids: Vec<Uuid> = repo.all_nodes().iter().map(|n| n.provenance_id).collect();
    let content_hash = docgraph_core::hash::hash(parsed.summary.as_bytes());
    let record = ProvenanceRecord::graph_level(
        ProvenanceKind::CorpusIntelligence,
        node_provenance_ids.clone(),
        1,
        node_provenance_ids.first().copied().unwrap_or_else(Uuid::new_v4),
        content_hash,
        processor(),
    );
    let provenance_id = repo.insert_provenance(record).await?;

    let ci = CorpusIntelligence {
        id: Uuid::new_v4(),
        provenance_id,
        summary: parsed.summary,
        key_actors,
        themes: parsed.themes,
        narrative_arcs: parsed.narrative_arcs,
    };
    repo.insert_corpus_intelligence(ci).await
}

/// Entities mentioned in `document_id`, with per-document mention counts,
/// ranked highest-first and capped (§4.8 Tier 2 input).
pub fn document_roster(repo: &Repo, document_id: Uuid) -> Vec<(KnowledgeNode, usize)> {
    let mut roster: Vec<(KnowledgeNode, usize)> = repo
        .all_nodes()
        .into_iter()
        .filter_map(|node| {
            let count = repo.links_for_node(node.id).iter().filter(|l| l.document_id == document_id).count();
            (count > 0).then_some((node, count))
        })
        .collect();
    roster.sort_by(|a, b| b.1.cmp(&a.1));
    roster.truncate(MAX_DOCUMENT_ROSTER);
    roster
}

#[derive(Debug, Deserialize)]
struct DocumentNarrativeResponse {
    narrative: String,
}

fn document_narrative_prompt(ocr_text: &str, roster: &[(KnowledgeNode, usize)], corpus_summary: Option<&str>) -> String {
    let truncated: String = ocr_text.chars().take(OCR_TEXT_TRUNCATE_CHARS).collect();
    let roster_lines: Vec<String> =
        roster.iter().map(|(n, count)| format!("- {} ({} mentions)", n.canonical_name, count)).collect();
    let context = corpus_summary.map(|s| format!("\n\nCorpus context: {s}")).unwrap_or_default();
    format!(
        "Document text (truncated):\n{truncated}\n\nEntities mentioned:\n{}{}\n\n\
         Respond with JSON: {{\"narrative\": string}}, a 2-4 paragraph narrative no longer than {} characters.",
        roster_lines.join("\n"),
        context,
        NARRATIVE_MAX_CHARS
    )
}

/// Tier 2: one document narrative per document.
pub async fn synthesize_document_narrative(
    repo: &Repo,
    backend: &GuardedBackend,
    document_id: Uuid,
) -> Result<Uuid, SynthesisError> {
    let ocr = repo.ocr_result_for_document(document_id);
    let ocr_text = ocr.as_ref().map(|o| o.extracted_text.as_str()).unwrap_or("");
    let roster = document_roster(repo, document_id);
    let corpus_intel = repo.latest_corpus_intelligence();

    let prompt = document_narrative_prompt(ocr_text, &roster, corpus_intel.as_ref().map(|c| c.summary.as_str()));
    let raw = backend.call(&prompt).await?;
    let parsed: DocumentNarrativeResponse = parse_ai_json(&raw)?;
    let narrative: String = parsed.narrative.chars().take(NARRATIVE_MAX_CHARS).collect();

    let source_id = ocr.as_ref().map(|o| o.provenance_id);
    let content_hash = docgraph_core::hash::hash(narrative.as_bytes());
    let record = match source_id {
        Some(parent) => ProvenanceRecord::graph_level(
            ProvenanceKind::KnowledgeGraph,
            vec![parent],
            1,
            document_id,
            content_hash,
            processor(),
        ),
        None => ProvenanceRecord::graph_level(ProvenanceKind::KnowledgeGraph, vec![], 1, document_id, content_hash, processor()),
    };
    let provenance_id = repo.insert_provenance(record).await?;

    let narrative_record =
        DocumentNarrative { id: Uuid::new_v4(), document_id, provenance_id, narrative };
    repo.insert_document_narrative(narrative_record).await
}

#[derive(Debug, Deserialize)]
struct RelationshipDraft {
    source: String,
    target: String,
    relationship_type: String,
    confidence: f32,
    evidence: String,
}

fn relationship_prompt(narrative: &str, roster_names: &[String]) -> String {
    format!(
        "Narrative:\n{narrative}\n\nKnown entities: {}\n\nInfer typed relationships between these entities \
         (excluding simple co-mention or co-location). Respond with a JSON array: \
         [{{\"source\": string, \"target\": string, \"relationship_type\": string (snake_case), \
         \"confidence\": 0.0-1.0, \"evidence\": string (1-2 sentence justification)}}].",
        roster_names.join(", ")
    )
}

/// Stores one AI-inferred edge, deduplicating against `(src, tgt, type)`
/// and its reverse. Returns `true` if a new edge was created.
async fn store_relationship(
    repo: &Repo,
    nodes: &[KnowledgeNode],
    draft: &RelationshipDraft,
    document_ids: Vec<Uuid>,
    synthesis_level: &str,
) -> Result<bool, SynthesisError> {
    let relationship_type = RelationshipType::from(draft.relationship_type.as_str());
    if relationship_type.is_structural() {
        return Ok(false);
    }

    let (Some(source), Some(target)) = (find_node_by_name(nodes, &draft.source), find_node_by_name(nodes, &draft.target))
    else {
        return Ok(false);
    };
    if source.id == target.id {
        return Ok(false);
    }

    if repo.find_edge(source.id, target.id, &relationship_type).is_some()
        || repo.find_edge(target.id, source.id, &relationship_type).is_some()
    {
        return Ok(false);
    }

    let parent_provenance_ids = crate::graph::document_provenance_ids(repo, &document_ids);
    let content_hash = docgraph_core::hash::hash(format!("{}-{}-{}", source.id, target.id, relationship_type).as_bytes());
    let record = ProvenanceRecord::graph_level(
        ProvenanceKind::KnowledgeGraph,
        parent_provenance_ids.clone(),
        1,
        parent_provenance_ids.first().copied().unwrap_or_else(Uuid::new_v4),
        content_hash,
        processor(),
    );
    let provenance_id = repo.insert_provenance(record).await?;

    let metadata = serde_json::json!({
        "source": "ai_synthesis",
        "synthesis_level": synthesis_level,
        "evidence": draft.evidence,
    });
    let edge = KnowledgeEdge {
        id: Uuid::new_v4(),
        source_node_id: source.id,
        target_node_id: target.id,
        relationship_type,
        weight: draft.confidence.clamp(0.0, 1.0),
        evidence_count: 1,
        document_ids,
        metadata,
        valid_from: None,
        valid_until: None,
        normalized_weight: None,
        contradiction_count: None,
        provenance_id,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    repo.upsert_edge(edge).await?;
    Ok(true)
}

/// Tier 2 relationship inference: reads a document's narrative and roster,
/// infers typed relationships, and stores new ones.
pub async fn infer_document_relationships(
    repo: &Repo,
    backend: &GuardedBackend,
    document_id: Uuid,
) -> Result<usize, SynthesisError> {
    let narrative = repo.narrative_for_document(document_id);
    let Some(narrative) = narrative else { return Ok(0) };
    let roster = document_roster(repo, document_id);
    let roster_nodes: Vec<KnowledgeNode> = roster.into_iter().map(|(n, _)| n).collect();
    let roster_names: Vec<String> = roster_nodes.iter().map(|n| n.canonical_name.clone()).collect();

    let raw = backend.call(&relationship_prompt(&narrative.narrative, &roster_names)).await?;
    let drafts: Vec<RelationshipDraft> = parse_ai_json(&raw)?;

    let all_nodes = repo.all_nodes();
    let mut created = 0usize;
    for draft in &drafts {
        if store_relationship(repo, &all_nodes, draft, vec![document_id], "document").await? {
            created += 1;
        }
    }
    Ok(created)
}

/// Tier 3: for each of `edge_id`'s documents, finds up to
/// [`EVIDENCE_CHUNK_LIMIT`] chunks where both endpoints co-occur, annotates
/// the edge metadata with the chunk ids, and raises its weight.
pub async fn ground_evidence(repo: &Repo, edge_id: Uuid) -> Result<(), SynthesisError> {
    let Some(mut edge) = find_edge_by_id(repo, edge_id) else {
        return Ok(());
    };

    let source_chunks = node_chunk_ids(repo, edge.source_node_id);
    let target_chunks = node_chunk_ids(repo, edge.target_node_id);
    let shared: Vec<Uuid> = source_chunks.intersection(&target_chunks).take(EVIDENCE_CHUNK_LIMIT).copied().collect();
    if shared.is_empty() {
        return Ok(());
    }

    let mut metadata = edge.metadata.clone();
    if let Some(obj) = metadata.as_object_mut() {
        obj.insert("evidence_chunk_ids".to_string(), serde_json::json!(shared));
    }
    edge.metadata = metadata;
    edge.weight = (edge.weight + EVIDENCE_WEIGHT_BOOST).min(1.0);
    repo.upsert_edge(edge).await?;
    Ok(())
}

fn find_edge_by_id(repo: &Repo, edge_id: Uuid) -> Option<KnowledgeEdge> {
    repo.all_nodes().iter().find_map(|n| repo.edges_for_node(n.id).into_iter().find(|e| e.id == edge_id))
}

fn node_chunk_ids(repo: &Repo, node_id: Uuid) -> HashSet<Uuid> {
    repo.links_for_node(node_id)
        .into_iter()
        .flat_map(|l| repo.mentions_for_entity(l.entity_id))
        .filter_map(|m| m.chunk_id)
        .collect()
}

/// Cross-document synthesis: relationship inference over every node with
/// `document_count > 1`, against the concatenation of their documents'
/// narratives.
pub async fn synthesize_cross_document(repo: &Repo, backend: &GuardedBackend) -> Result<usize, SynthesisError> {
    let multi_doc_nodes: Vec<KnowledgeNode> = repo.all_nodes().into_iter().filter(|n| n.document_count > 1).collect();
    if multi_doc_nodes.is_empty() {
        return Ok(0);
    }

    let mut document_ids: HashSet<Uuid> = HashSet::new();
    for node in &multi_doc_nodes {
        for link in repo.links_for_node(node.id) {
            document_ids.insert(link.document_id);
        }
    }
    let mut document_ids: Vec<Uuid> = document_ids.into_iter().collect();
    document_ids.sort();

    let narrative: String = document_ids
        .iter()
        .filter_map(|id| repo.narrative_for_document(*id))
        .map(|n| n.narrative)
        .collect::<Vec<_>>()
        .join("\n\n");
    if narrative.is_empty() {
        return Ok(0);
    }

    let roster_names: Vec<String> = multi_doc_nodes.iter().map(|n| n.canonical_name.clone()).collect();
    let raw = backend.call(&relationship_prompt(&narrative, &roster_names)).await?;
    let drafts: Vec<RelationshipDraft> = parse_ai_json(&raw)?;

    let all_nodes = repo.all_nodes();
    let mut created = 0usize;
    for draft in &drafts {
        if store_relationship(repo, &all_nodes, draft, document_ids.clone(), "corpus").await? {
            created += 1;
        }
    }
    Ok(created)
}

#[derive(Debug, Deserialize)]
struct EntityRoleDraft {
    canonical_name: String,
    role: String,
    theme: String,
    importance_rank: u32,
    context_summary: String,
}

fn entity_role_prompt(context: &str, roster_names: &[String]) -> String {
    format!(
        "Context:\n{context}\n\nEntities: {}\n\nClassify each entity's role. Respond with a JSON array: \
         [{{\"canonical_name\": string, \"role\": string, \"theme\": string, \"importance_rank\": integer, \
         \"context_summary\": string}}].",
        roster_names.join(", ")
    )
}

/// Entity role classification, at either database or document scope.
pub async fn classify_entity_roles(
    repo: &Repo,
    backend: &GuardedBackend,
    scope: RoleScope,
    document_id: Option<Uuid>,
) -> Result<usize, SynthesisError> {
    let (context, nodes): (String, Vec<KnowledgeNode>) = match scope {
        RoleScope::Database => {
            let summary = repo.latest_corpus_intelligence().map(|c| c.summary).unwrap_or_default();
            (summary, repo.all_nodes())
        }
        RoleScope::Document => {
            let document_id = document_id.expect("document scope requires a document_id");
            let narrative = repo.narrative_for_document(document_id).map(|n| n.narrative).unwrap_or_default();
            (narrative, document_roster(repo, document_id).into_iter().map(|(n, _)| n).collect())
        }
    };
    if nodes.is_empty() {
        return Ok(0);
    }

    let roster_names: Vec<String> = nodes.iter().map(|n| n.canonical_name.clone()).collect();
    let raw = backend.call(&entity_role_prompt(&context, &roster_names)).await?;
    let drafts: Vec<EntityRoleDraft> = parse_ai_json(&raw)?;

    let mut created = 0usize;
    for draft in drafts {
        let Some(node) = find_node_by_name(&nodes, &draft.canonical_name) else { continue };
        let role = EntityRole {
            id: Uuid::new_v4(),
            node_id: node.id,
            role: draft.role,
            theme: draft.theme,
            importance_rank: draft.importance_rank,
            context_summary: draft.context_summary,
            scope,
            document_id,
        };
        repo.insert_entity_role(role).await?;
        created += 1;
    }
    Ok(created)
}
