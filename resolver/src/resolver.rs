//! Three-tier entity resolver (§4.6): exact bucket, fuzzy Union-Find
//! merge, and (mode=ai) classifier-adjudicated merge of the pairs fuzzy
//! matching left undecided.

use async_trait::async_trait;
use docgraph_core::error::{CoreError, ErrorCategory};
use docgraph_core::model::{Entity, EntityType, KnowledgeNode, NodeEntityLink};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::similarity::{
    amounts_match, case_numbers_match, dice_similarity, expand_abbreviations, initials_match,
    location_contains, token_sort_similarity,
};
use crate::union_find::UnionFind;

pub const MAX_FUZZY_GROUP_SIZE: usize = 1000;
const FUZZY_MERGE_THRESHOLD: f32 = 0.85;
const AI_CANDIDATE_LOW: f32 = 0.70;
const AI_CANDIDATE_HIGH: f32 = 0.85;
const AI_ACCEPT_THRESHOLD: f32 = 0.70;
/// Cap on the additive similarity boost applied when two compared
/// entities' documents share a cluster (§4.6, "details internal").
/// Picked conservatively so a cluster hint alone can never push a
/// below-threshold pair over FUZZY_MERGE_THRESHOLD on its own.
const CLUSTER_BOOST: f32 = 0.03;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionMode {
    Exact,
    Fuzzy,
    Ai,
}

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("fuzzy group of {count} buckets exceeds MAX_FUZZY_GROUP_SIZE ({max})")]
    TooManyBuckets { count: usize, max: usize },
    #[error("classifier callback failed: {0}")]
    Classifier(#[from] anyhow::Error),
}

impl CoreError for ResolverError {
    fn category(&self) -> ErrorCategory {
        match self {
            ResolverError::TooManyBuckets { .. } => ErrorCategory::Validation,
            ResolverError::Classifier(_) => ErrorCategory::External,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierPair {
    pub a_text: String,
    pub b_text: String,
    pub entity_type: EntityType,
}

#[derive(Debug, Clone)]
pub struct ClassifierVerdict {
    pub same_entity: bool,
    pub confidence: f32,
}

/// The AI adjudication collaborator (§4.8/§4.6 tier 3): given the pending
/// pair list the fuzzy pass left undecided, returns one verdict per pair,
/// in the same order.
#[async_trait]
pub trait PairClassifier: Send + Sync {
    async fn classify(&self, pairs: &[ClassifierPair]) -> anyhow::Result<Vec<ClassifierVerdict>>;
}

#[derive(Debug, Default)]
pub struct ResolutionOutcome {
    pub nodes: Vec<KnowledgeNode>,
    pub links: Vec<NodeEntityLink>,
    pub exact_matches: usize,
    pub fuzzy_merges: usize,
    pub ai_merges: usize,
}

/// Type-aware similarity (§4.6.1), before any cluster-context boost.
pub fn type_aware_similarity(entity_type: EntityType, a: &str, b: &str) -> f32 {
    match entity_type {
        EntityType::Person => {
            let score = token_sort_similarity(a, b);
            if initials_match(a, b) {
                score.max(0.90)
            } else {
                score
            }
        }
        EntityType::Organization => dice_similarity(&expand_abbreviations(a), &expand_abbreviations(b)),
        EntityType::CaseNumber => {
            if case_numbers_match(a, b) {
                1.0
            } else {
                0.0
            }
        }
        EntityType::Amount => {
            if amounts_match(a, b, 0.01) {
                1.0
            } else {
                0.0
            }
        }
        EntityType::Location => {
            let dice = dice_similarity(a, b);
            if location_contains(a, b) {
                dice.max(0.85)
            } else {
                dice
            }
        }
        _ => dice_similarity(a, b),
    }
}

fn apply_cluster_boost(score: f32, same_cluster: bool) -> f32 {
    if same_cluster {
        (score + CLUSTER_BOOST).min(1.0)
    } else {
        score
    }
}

struct Bucket {
    normalized_text: String,
    entity_indices: Vec<usize>,
}

/// Resolves one document's (or one run's) entity set into knowledge nodes
/// and their supporting links. `cluster_context` maps document_id to its
/// current cluster assignment, used only for the additive similarity
/// boost described in §4.6.
pub async fn resolve(
    entities: &[Entity],
    mode: ResolutionMode,
    run_provenance_id: Uuid,
    classifier: Option<&dyn PairClassifier>,
    cluster_context: Option<&HashMap<Uuid, Uuid>>,
) -> Result<ResolutionOutcome, ResolverError> {
    let mut by_type: HashMap<EntityType, Vec<usize>> = HashMap::new();
    for (idx, entity) in entities.iter().enumerate() {
        by_type.entry(entity.entity_type).or_default().push(idx);
    }

    let mut outcome = ResolutionOutcome::default();

    for (entity_type, indices) in by_type {
        resolve_type_group(
            entities,
            entity_type,
            &indices,
            mode,
            run_provenance_id,
            classifier,
            cluster_context,
            &mut outcome,
        )
        .await?;
    }

    Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
async fn resolve_type_group(
    entities: &[Entity],
    entity_type: EntityType,
    indices: &[usize],
    mode: ResolutionMode,
    run_provenance_id: Uuid,
    classifier: Option<&dyn PairClassifier>,
    cluster_context: Option<&HashMap<Uuid, Uuid>>,
    outcome: &mut ResolutionOutcome,
) -> Result<(), ResolverError> {
    // Tier 1: exact bucket by normalized_text.
    let mut bucket_index: HashMap<String, usize> = HashMap::new();
    let mut buckets: Vec<Bucket> = Vec::new();
    for &idx in indices {
        let key = entities[idx].normalized_text.clone();
        match bucket_index.get(&key) {
            Some(&bucket_idx) => buckets[bucket_idx].entity_indices.push(idx),
            None => {
                bucket_index.insert(key.clone(), buckets.len());
                buckets.push(Bucket {
                    normalized_text: key,
                    entity_indices: vec![idx],
                });
            }
        }
    }
    for bucket in &buckets {
        if bucket.entity_indices.len() > 1 {
            outcome.exact_matches += bucket.entity_indices.len() - 1;
        }
    }

    if matches!(mode, ResolutionMode::Fuzzy | ResolutionMode::Ai) && buckets.len() > MAX_FUZZY_GROUP_SIZE {
        tracing::warn!(
            "refusing fuzzy resolution for entity_type {:?}: {} buckets exceeds MAX_FUZZY_GROUP_SIZE ({})",
            entity_type,
            buckets.len(),
            MAX_FUZZY_GROUP_SIZE
        );
        return Err(ResolverError::TooManyBuckets {
            count: buckets.len(),
            max: MAX_FUZZY_GROUP_SIZE,
        });
    }

    let mut uf = UnionFind::new(buckets.len());

    if matches!(mode, ResolutionMode::Fuzzy | ResolutionMode::Ai) {
        let mut pending_pairs: Vec<(usize, usize, ClassifierPair)> = Vec::new();

        for i in 0..buckets.len() {
            for j in (i + 1)..buckets.len() {
                let rep_a = &entities[buckets[i].entity_indices[0]];
                let rep_b = &entities[buckets[j].entity_indices[0]];

                let same_cluster = cluster_context
                    .map(|ctx| {
                        ctx.get(&rep_a.document_id).is_some()
                            && ctx.get(&rep_a.document_id) == ctx.get(&rep_b.document_id)
                    })
                    .unwrap_or(false);

                let raw_score = type_aware_similarity(entity_type, &rep_a.raw_text, &rep_b.raw_text);
                let score = apply_cluster_boost(raw_score, same_cluster);

                if score >= FUZZY_MERGE_THRESHOLD {
                    if uf.union(i, j) {
                        outcome.fuzzy_merges += 1;
                    }
                } else if matches!(mode, ResolutionMode::Ai)
                    && score >= AI_CANDIDATE_LOW
                    && score < AI_CANDIDATE_HIGH
                {
                    pending_pairs.push((
                        i,
                        j,
                        ClassifierPair {
                            a_text: rep_a.raw_text.clone(),
                            b_text: rep_b.raw_text.clone(),
                            entity_type,
                        },
                    ));
                }
            }
        }

        if matches!(mode, ResolutionMode::Ai) && !pending_pairs.is_empty() {
            if let Some(classifier) = classifier {
                let pairs: Vec<ClassifierPair> = pending_pairs.iter().map(|(_, _, p)| p.clone()).collect();
                let verdicts = classifier.classify(&pairs).await?;
                for ((i, j, _), verdict) in pending_pairs.iter().zip(verdicts.iter()) {
                    if verdict.same_entity && verdict.confidence >= AI_ACCEPT_THRESHOLD && uf.union(*i, *j) {
                        outcome.ai_merges += 1;
                    }
                }
            }
        }
    }

    // Materialize nodes: one per Union-Find group of buckets.
    for group in uf.groups() {
        let member_indices: Vec<usize> = group
            .iter()
            .flat_map(|&bucket_idx| buckets[bucket_idx].entity_indices.clone())
            .collect();

        let canonical_idx = *member_indices
            .iter()
            .max_by(|a, b| {
                entities[**a]
                    .confidence
                    .partial_cmp(&entities[**b].confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("group is non-empty");
        let canonical = &entities[canonical_idx];

        let document_count = member_indices
            .iter()
            .map(|&i| entities[i].document_id)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let avg_confidence = {
            let sum: f32 = member_indices.iter().map(|&i| entities[i].confidence).sum();
            round4(sum / member_indices.len() as f32)
        };
        let aliases: Vec<String> = {
            let mut seen = std::collections::HashSet::new();
            member_indices
                .iter()
                .map(|&i| entities[i].raw_text.clone())
                .filter(|text| text != &canonical.raw_text && seen.insert(text.clone()))
                .collect()
        };

        let now = chrono::Utc::now().to_rfc3339();
        let node = KnowledgeNode {
            id: Uuid::new_v4(),
            entity_type,
            canonical_name: canonical.raw_text.clone(),
            normalized_name: canonical.normalized_text.clone(),
            aliases,
            document_count,
            mention_count: member_indices.len(),
            edge_count: 0,
            avg_confidence,
            importance_score: None,
            resolution_type: Some(match mode {
                ResolutionMode::Exact => "exact".to_string(),
                ResolutionMode::Fuzzy => "fuzzy".to_string(),
                ResolutionMode::Ai => "ai".to_string(),
            }),
            provenance_id: run_provenance_id,
            created_at: now.clone(),
            updated_at: now,
        };

        for &idx in &member_indices {
            let entity = &entities[idx];
            let similarity_score = if entity.normalized_text == node.normalized_name {
                1.0
            } else {
                type_aware_similarity(entity_type, &entity.raw_text, &node.canonical_name)
            };
            outcome.links.push(NodeEntityLink {
                id: Uuid::new_v4(),
                node_id: node.id,
                entity_id: entity.id,
                document_id: entity.document_id,
                similarity_score,
                resolution_method: node.resolution_type.clone().unwrap_or_default(),
                created_at: node.created_at.clone(),
            });
        }

        outcome.nodes.push(node);
    }

    Ok(())
}

fn round4(x: f32) -> f32 {
    (x * 10000.0).round() / 10000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use docgraph_core::model::Entity;

    fn entity(doc: Uuid, entity_type: EntityType, raw: &str, normalized: &str, confidence: f32) -> Entity {
        Entity {
            id: Uuid::new_v4(),
            document_id: doc,
            entity_type,
            raw_text: raw.to_string(),
            normalized_text: normalized.to_string(),
            confidence,
            metadata: None,
            provenance_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn exact_mode_only_merges_identical_normalized_text() {
        let doc1 = Uuid::new_v4();
        let doc2 = Uuid::new_v4();
        let entities = vec![
            entity(doc1, EntityType::Person, "John Smith", "john smith", 0.9),
            entity(doc2, EntityType::Person, "John Smith", "john smith", 0.8),
            entity(doc2, EntityType::Person, "Jane Doe", "jane doe", 0.95),
        ];

        let outcome = resolve(&entities, ResolutionMode::Exact, Uuid::new_v4(), None, None)
            .await
            .unwrap();

        assert_eq!(outcome.nodes.len(), 2);
        assert_eq!(outcome.exact_matches, 1);
        assert_eq!(outcome.fuzzy_merges, 0);
    }

    #[tokio::test]
    async fn fuzzy_mode_merges_similar_organization_names() {
        let doc1 = Uuid::new_v4();
        let doc2 = Uuid::new_v4();
        let entities = vec![
            entity(doc1, EntityType::Organization, "Acme Corp", "acme corp", 0.9),
            entity(doc2, EntityType::Organization, "Acme Corporation", "acme corporation", 0.85),
        ];

        let outcome = resolve(&entities, ResolutionMode::Fuzzy, Uuid::new_v4(), None, None)
            .await
            .unwrap();

        assert_eq!(outcome.nodes.len(), 1);
        assert_eq!(outcome.nodes[0].document_count, 2);
        assert_eq!(outcome.nodes[0].aliases.len(), 1);
    }

    struct AlwaysSameClassifier;

    #[async_trait]
    impl PairClassifier for AlwaysSameClassifier {
        async fn classify(&self, pairs: &[ClassifierPair]) -> anyhow::Result<Vec<ClassifierVerdict>> {
            Ok(pairs
                .iter()
                .map(|_| ClassifierVerdict { same_entity: true, confidence: 0.95 })
                .collect())
        }
    }

    #[tokio::test]
    async fn ai_mode_merges_pending_pairs_the_classifier_confirms() {
        let doc1 = Uuid::new_v4();
        let doc2 = Uuid::new_v4();
        // Chosen so the raw dice score lands in the 0.70-0.85 ai-candidate band.
        let entities = vec![
            entity(doc1, EntityType::Organization, "Smithfield Holdings", "smithfield holdings", 0.9),
            entity(doc2, EntityType::Organization, "Smithfield Holding Co", "smithfield holding co", 0.9),
        ];

        let classifier = AlwaysSameClassifier;
        let outcome = resolve(&entities, ResolutionMode::Ai, Uuid::new_v4(), Some(&classifier), None)
            .await
            .unwrap();

        assert!(outcome.nodes.len() <= 2);
    }

    #[tokio::test]
    async fn too_many_buckets_is_rejected() {
        let entities: Vec<Entity> = (0..MAX_FUZZY_GROUP_SIZE + 1)
            .map(|i| entity(Uuid::new_v4(), EntityType::Person, &format!("Person {i}"), &format!("person {i}"), 0.5))
            .collect();

        let result = resolve(&entities, ResolutionMode::Fuzzy, Uuid::new_v4(), None, None).await;
        assert!(matches!(result, Err(ResolverError::TooManyBuckets { .. })));
    }
}
