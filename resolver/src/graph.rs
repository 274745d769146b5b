//! Graph constructor (§4.7): full and incremental knowledge-graph builds
//! on top of the entity resolver, plus shared co-mention/co-location edge
//! synthesis.

use docgraph_core::error::{CoreError, ErrorCategory};
use docgraph_core::model::{
    EntityType, KnowledgeEdge, KnowledgeNode, NodeEntityLink, Processor, ProvenanceKind,
    ProvenanceRecord, RelationshipType,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use storage::{IntegrityError, Repo, RepoError};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::resolver::{resolve, PairClassifier, ResolutionMode, ResolverError};

pub const MAX_EXISTING_NODES: usize = 10_000;
pub const MAX_COOCCURRENCE_ENTITIES: usize = 200;
const MATCH_THRESHOLD: f32 = 0.85;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("storage error: {0}")]
    Repo(#[from] RepoError),
    #[error("resolver error: {0}")]
    Resolver(#[from] ResolverError),
    #[error("document {0} is already linked into the graph")]
    DocumentAlreadyLinked(Uuid),
    #[error("existing node count {count} exceeds the incremental-build cap ({max})")]
    TooManyExistingNodes { count: usize, max: usize },
}

impl CoreError for GraphError {
    fn category(&self) -> ErrorCategory {
        match self {
            GraphError::Repo(e) => e.category(),
            GraphError::Resolver(e) => e.category(),
            GraphError::DocumentAlreadyLinked(_) => ErrorCategory::Validation,
            GraphError::TooManyExistingNodes { .. } => ErrorCategory::Internal,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct GraphBuildStats {
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub links_created: usize,
    pub edges_created: usize,
    pub edges_updated: usize,
    pub cooccurrence_nodes_dropped: usize,
}

fn processor() -> Processor {
    Processor::new("graph-constructor", "1.0.0")
}

/// Maps document ids to their DOCUMENT-kind provenance ids so graph-level
/// provenance records can cite real parents (missing documents are
/// dropped; the id set is deduplicated to keep `parent_ids` clean).
pub(crate) fn document_provenance_ids(repo: &Repo, document_ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    document_ids
        .iter()
        .filter_map(|&doc_id| repo.get_document(doc_id).map(|d| d.provenance_id))
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Collects all entities for the given document set and runs the
/// resolver fresh, persisting new nodes, links, and synthesized edges.
pub async fn full_build(
    repo: &Repo,
    document_ids: &[Uuid],
    mode: ResolutionMode,
    classifier: Option<&dyn PairClassifier>,
    cluster_context: Option<&HashMap<Uuid, Uuid>>,
) -> Result<GraphBuildStats, GraphError> {
    let entities: Vec<_> = document_ids
        .iter()
        .flat_map(|&doc_id| repo.entities_for_document(doc_id))
        .collect();
    info!("full graph build over {} documents, {} entities", document_ids.len(), entities.len());

    let parent_provenance_ids = document_provenance_ids(repo, document_ids);
    let run_record = ProvenanceRecord::graph_level(
        ProvenanceKind::KnowledgeGraph,
        parent_provenance_ids.clone(),
        1,
        parent_provenance_ids.first().copied().unwrap_or_else(Uuid::new_v4),
        docgraph_core::hash::composite_hash(
            &entities.iter().map(|e| e.id.to_string()).collect::<Vec<_>>(),
        ),
        processor(),
    );
    let run_provenance_id = repo.insert_provenance(run_record).await?;

    let outcome = resolve(&entities, mode, run_provenance_id, classifier, cluster_context).await?;

    let mut stats = GraphBuildStats::default();
    let mut touched: HashSet<Uuid> = HashSet::new();

    for node in outcome.nodes {
        let node_prov = ProvenanceRecord::graph_level(
            ProvenanceKind::KnowledgeGraph,
            vec![run_provenance_id],
            1,
            run_provenance_id,
            docgraph_core::hash::hash(node.normalized_name.as_bytes()),
            processor(),
        );
        let node_prov_id = repo.insert_provenance(node_prov).await?;
        let mut node = node;
        node.provenance_id = node_prov_id;
        let node_id = node.id;
        repo.upsert_node(node).await?;
        touched.insert(node_id);
        stats.nodes_created += 1;
    }

    for link in outcome.links {
        repo.insert_node_entity_link(link).await?;
        stats.links_created += 1;
    }

    let edge_stats = synthesize_edges(repo, &touched, run_provenance_id).await?;
    stats.edges_created = edge_stats.0;
    stats.edges_updated = edge_stats.1;
    stats.cooccurrence_nodes_dropped = edge_stats.2;

    info!(
        "full graph build complete: {} nodes created, {} edges created, {} edges updated",
        stats.nodes_created, stats.edges_created, stats.edges_updated
    );
    Ok(stats)
}

/// Incrementally links new documents' entities into the existing graph,
/// falling back to the resolver only for entities that match nothing.
pub async fn incremental_build(
    repo: &Repo,
    document_ids: &[Uuid],
    mode: ResolutionMode,
    classifier: Option<&dyn PairClassifier>,
    cluster_context: Option<&HashMap<Uuid, Uuid>>,
) -> Result<GraphBuildStats, GraphError> {
    for &doc_id in document_ids {
        if repo.document_has_linked_entities(doc_id) {
            warn!("document {} is already linked into the graph, rejecting incremental build", doc_id);
            return Err(GraphError::DocumentAlreadyLinked(doc_id));
        }
    }

    let existing_nodes = repo.all_nodes();
    if existing_nodes.len() > MAX_EXISTING_NODES {
        warn!(
            "existing node count {} exceeds incremental-build cap {}",
            existing_nodes.len(),
            MAX_EXISTING_NODES
        );
        return Err(GraphError::TooManyExistingNodes {
            count: existing_nodes.len(),
            max: MAX_EXISTING_NODES,
        });
    }

    let new_entities: Vec<_> = document_ids
        .iter()
        .flat_map(|&doc_id| repo.entities_for_document(doc_id))
        .collect();
    info!("incremental graph build over {} documents, {} new entities", document_ids.len(), new_entities.len());

    let existing_by_type: HashMap<EntityType, Vec<&KnowledgeNode>> = {
        let mut map: HashMap<EntityType, Vec<&KnowledgeNode>> = HashMap::new();
        for node in &existing_nodes {
            map.entry(node.entity_type).or_default().push(node);
        }
        map
    };

    let mut stats = GraphBuildStats::default();
    let mut touched: HashSet<Uuid> = HashSet::new();
    let mut unmatched = Vec::new();

    let parent_provenance_ids = document_provenance_ids(repo, document_ids);
    let edge_run_provenance_id = repo
        .insert_provenance(ProvenanceRecord::graph_level(
            ProvenanceKind::KnowledgeGraph,
            parent_provenance_ids.clone(),
            1,
            parent_provenance_ids.first().copied().unwrap_or_else(Uuid::new_v4),
            docgraph_core::hash::composite_hash(
                &new_entities.iter().map(|e| e.id.to_string()).collect::<Vec<_>>(),
            ),
            processor(),
        ))
        .await?;

    for entity in new_entities {
        let candidates = existing_by_type.get(&entity.entity_type);

        let exact_match = candidates
            .and_then(|nodes| nodes.iter().find(|n| n.normalized_name == entity.normalized_text));

        let matched_node = if let Some(node) = exact_match {
            Some((*node, 1.0f32))
        } else if !matches!(mode, ResolutionMode::Exact) {
            candidates.and_then(|nodes| {
                nodes
                    .iter()
                    .map(|n| {
                        (
                            *n,
                            crate::resolver::type_aware_similarity(
                                entity.entity_type,
                                &entity.raw_text,
                                &n.canonical_name,
                            ),
                        )
                    })
                    .filter(|(_, score)| *score >= MATCH_THRESHOLD)
                    .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            })
        } else {
            None
        };

        if let Some((node, similarity)) = matched_node {
            let link = NodeEntityLink {
                id: Uuid::new_v4(),
                node_id: node.id,
                entity_id: entity.id,
                document_id: entity.document_id,
                similarity_score: similarity,
                resolution_method: "incremental".to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
            };
            repo.insert_node_entity_link(link).await?;
            stats.links_created += 1;

            let links = repo.links_for_node(node.id);
            let doc_count = links.iter().map(|l| l.document_id).collect::<HashSet<_>>().len();
            let mention_count = links.len();
            let avg_confidence = {
                let sum: f32 = links
                    .iter()
                    .filter_map(|l| repo.get_entity(l.entity_id).map(|e| e.confidence))
                    .sum();
                sum / mention_count.max(1) as f32
            };

            let mut updated = node.clone();
            updated.document_count = doc_count;
            updated.mention_count = mention_count;
            updated.avg_confidence = (avg_confidence * 10000.0).round() / 10000.0;
            if entity.raw_text != updated.canonical_name && !updated.aliases.contains(&entity.raw_text) {
                updated.aliases.push(entity.raw_text.clone());
            }
            updated.touch();
            repo.upsert_node(updated).await?;
            touched.insert(node.id);
            stats.nodes_updated += 1;
        } else {
            unmatched.push(entity);
        }
    }

    if !unmatched.is_empty() {
        let run_record = ProvenanceRecord::graph_level(
            ProvenanceKind::KnowledgeGraph,
            parent_provenance_ids.clone(),
            1,
            parent_provenance_ids.first().copied().unwrap_or_else(Uuid::new_v4),
            docgraph_core::hash::composite_hash(
                &unmatched.iter().map(|e| e.id.to_string()).collect::<Vec<_>>(),
            ),
            processor(),
        );
        let run_provenance_id = repo.insert_provenance(run_record).await?;
        let outcome = resolve(&unmatched, mode, run_provenance_id, classifier, cluster_context).await?;

        for node in outcome.nodes {
            let node_id = node.id;
            repo.upsert_node(node).await?;
            touched.insert(node_id);
            stats.nodes_created += 1;
        }
        for link in outcome.links {
            repo.insert_node_entity_link(link).await?;
            stats.links_created += 1;
        }
    }

    let edge_stats = synthesize_edges(repo, &touched, edge_run_provenance_id).await?;
    stats.edges_created = edge_stats.0;
    stats.edges_updated = edge_stats.1;
    stats.cooccurrence_nodes_dropped = edge_stats.2;

    info!(
        "incremental graph build complete: {} nodes updated, {} nodes created, {} edges created",
        stats.nodes_updated, stats.nodes_created, stats.edges_created
    );
    Ok(stats)
}

fn node_doc_set(repo: &Repo, node_id: Uuid) -> HashSet<Uuid> {
    repo.links_for_node(node_id).into_iter().map(|l| l.document_id).collect()
}

fn node_chunk_set(repo: &Repo, node_id: Uuid) -> HashSet<Uuid> {
    repo.links_for_node(node_id)
        .into_iter()
        .flat_map(|l| repo.mentions_for_entity(l.entity_id))
        .filter_map(|m| m.chunk_id)
        .collect()
}

/// Builds/updates co_mentioned and co_located edges for the touched-node
/// universe, including the immediate neighbors reachable via existing
/// edges. Returns (edges_created, edges_updated, cooccurrence_nodes_dropped).
async fn synthesize_edges(
    repo: &Repo,
    touched: &HashSet<Uuid>,
    run_provenance_id: Uuid,
) -> Result<(usize, usize, usize), GraphError> {
    let mut universe: Vec<Uuid> = touched.iter().copied().collect();
    for &node_id in touched {
        for edge in repo.edges_for_node(node_id) {
            let other = if edge.source_node_id == node_id { edge.target_node_id } else { edge.source_node_id };
            if !universe.contains(&other) {
                universe.push(other);
            }
        }
    }

    let dropped = universe.len().saturating_sub(MAX_COOCCURRENCE_ENTITIES);
    if dropped > 0 {
        warn!(
            "cooccurrence universe of {} nodes exceeds MAX_COOCCURRENCE_ENTITIES ({}); dropping {} nodes",
            universe.len(),
            MAX_COOCCURRENCE_ENTITIES,
            dropped
        );
    }
    universe.truncate(MAX_COOCCURRENCE_ENTITIES);

    let doc_sets: HashMap<Uuid, HashSet<Uuid>> =
        universe.iter().map(|&n| (n, node_doc_set(repo, n))).collect();
    let chunk_sets: HashMap<Uuid, HashSet<Uuid>> =
        universe.iter().map(|&n| (n, node_chunk_set(repo, n))).collect();

    let all_docs: HashSet<Uuid> = doc_sets.values().flatten().copied().collect();
    let single_document_universe = all_docs.len() <= 1;
    if single_document_universe {
        info!(
            "touched-node universe spans a single document; suppressing co_mentioned edges ({} nodes)",
            universe.len()
        );
    }

    let mut created = 0usize;
    let mut updated = 0usize;

    for i in 0..universe.len() {
        for j in (i + 1)..universe.len() {
            let a = universe[i];
            let b = universe[j];
            let docs_a = &doc_sets[&a];
            let docs_b = &doc_sets[&b];
            let chunks_a = &chunk_sets[&a];
            let chunks_b = &chunk_sets[&b];

            let shared_docs: HashSet<Uuid> = docs_a.intersection(docs_b).copied().collect();
            let co_mentioned_weight = if shared_docs.is_empty() {
                0.0
            } else {
                round4(shared_docs.len() as f32 / docs_a.len().max(docs_b.len()) as f32)
            };

            if !single_document_universe && !shared_docs.is_empty() {
                let created_now = upsert_cooccurrence_edge(
                    repo,
                    a,
                    b,
                    RelationshipType::CoMentioned,
                    co_mentioned_weight,
                    shared_docs.len(),
                    shared_docs.iter().copied().collect(),
                    serde_json::Value::Null,
                    run_provenance_id,
                )
                .await?;
                if created_now {
                    created += 1;
                } else {
                    updated += 1;
                }
            }

            let shared_chunks: HashSet<Uuid> = chunks_a.intersection(chunks_b).copied().collect();
            if !shared_chunks.is_empty() {
                let weight = round4((co_mentioned_weight * 1.5).min(1.0));
                let metadata = serde_json::json!({ "shared_chunk_ids": shared_chunks.iter().collect::<Vec<_>>() });
                let created_now = upsert_cooccurrence_edge(
                    repo,
                    a,
                    b,
                    RelationshipType::CoLocated,
                    weight,
                    shared_chunks.len(),
                    docs_a.union(docs_b).copied().collect(),
                    metadata,
                    run_provenance_id,
                )
                .await?;
                if created_now {
                    created += 1;
                } else {
                    updated += 1;
                }
            }
        }
    }

    for &node_id in &universe {
        if let Some(mut node) = repo.get_node(node_id) {
            node.edge_count = repo.edges_for_node(node_id).len();
            node.touch();
            repo.upsert_node(node).await?;
        }
    }

    Ok((created, updated, dropped))
}

#[allow(clippy::too_many_arguments)]
async fn upsert_cooccurrence_edge(
    repo: &Repo,
    a: Uuid,
    b: Uuid,
    relationship: RelationshipType,
    weight: f32,
    evidence_count: usize,
    document_ids: Vec<Uuid>,
    metadata: serde_json::Value,
    run_provenance_id: Uuid,
) -> Result<bool, GraphError> {
    let (source, target) = KnowledgeEdge::canonical_pair(a, b);

    if let Some(mut existing) = repo.find_edge(source, target, &relationship) {
        let mut merged_docs: HashSet<Uuid> = existing.document_ids.iter().copied().collect();
        merged_docs.extend(document_ids);
        existing.document_ids = merged_docs.into_iter().collect();
        existing.weight = weight;
        existing.evidence_count = evidence_count;
        if !metadata.is_null() {
            existing.metadata = metadata;
        }
        match repo.upsert_edge(existing).await {
            Ok(_) => Ok(false),
            Err(RepoError::Integrity(IntegrityError::ForeignKey { .. })) => Ok(false),
            Err(e) => Err(e.into()),
        }
    } else {
        let now = chrono::Utc::now().to_rfc3339();
        let edge = KnowledgeEdge {
            id: Uuid::new_v4(),
            source_node_id: source,
            target_node_id: target,
            relationship_type: relationship,
            weight,
            evidence_count,
            document_ids,
            metadata,
            valid_from: None,
            valid_until: None,
            normalized_weight: None,
            contradiction_count: None,
            provenance_id: run_provenance_id,
            created_at: now,
        };
        repo.upsert_edge(edge).await?;
        Ok(true)
    }
}

fn round4(x: f32) -> f32 {
    (x * 10000.0).round() / 10000.0
}
