//! Contradiction detector (§4.10): a read-only scan of the graph for
//! same-relation-different-object conflicts (HIGH) and one-sided
//! relationship attestation (LOW) between two documents' entity sets.

use docgraph_core::model::{ContradictionSeverity, Contradiction, Entity, RelationshipType};
use std::collections::{HashMap, HashSet};
use storage::Repo;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct ContradictionReport {
    pub contradictions: Vec<Contradiction>,
    pub entities_checked: usize,
    pub kg_edges_analyzed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Triple {
    node_id: Uuid,
    relation: String,
    other_node: Uuid,
}

/// Scans the graph connecting two entity sets (typically from two
/// documents) for contradictions. Never mutates the graph.
pub fn detect_contradictions(repo: &Repo, e1: &[Entity], e2: &[Entity], doc1: Uuid, doc2: Uuid) -> ContradictionReport {
    let mut report = ContradictionReport::default();

    let node_ids: HashSet<Uuid> = entity_node_ids(repo, e1).into_iter().chain(entity_node_ids(repo, e2)).collect();
    report.entities_checked = e1.len() + e2.len();

    let mut triples_doc1: HashSet<Triple> = HashSet::new();
    let mut triples_doc2: HashSet<Triple> = HashSet::new();
    let mut edges_analyzed = 0usize;

    for &node_id in &node_ids {
        for edge in repo.edges_for_node(node_id) {
            if edge.source_node_id != node_id {
                continue;
            }
            if edge.relationship_type.is_structural() {
                continue;
            }
            let overlaps_doc1 = edge.document_ids.contains(&doc1);
            let overlaps_doc2 = edge.document_ids.contains(&doc2);
            if !overlaps_doc1 && !overlaps_doc2 {
                continue;
            }
            edges_analyzed += 1;

            let triple = Triple {
                node_id,
                relation: edge.relationship_type.as_str().to_string(),
                other_node: edge.target_node_id,
            };
            if overlaps_doc1 {
                triples_doc1.insert(triple.clone());
            }
            if overlaps_doc2 {
                triples_doc2.insert(triple);
            }
        }
    }
    report.kg_edges_analyzed = edges_analyzed;

    let mut high: Vec<Contradiction> = Vec::new();
    let mut low: Vec<Contradiction> = Vec::new();
    let mut seen: HashSet<(Uuid, String)> = HashSet::new();

    let relations_doc1: HashMap<(Uuid, String), HashSet<Uuid>> = group_by_relation(&triples_doc1);
    let relations_doc2: HashMap<(Uuid, String), HashSet<Uuid>> = group_by_relation(&triples_doc2);

    for (key, objects1) in &relations_doc1 {
        if let Some(objects2) = relations_doc2.get(key) {
            if objects1 != objects2 && seen.insert(key.clone()) {
                let mut objects: Vec<Uuid> = objects1.union(objects2).copied().collect();
                objects.sort();
                high.push(Contradiction {
                    node_id: key.0,
                    relationship_type: RelationshipType::from(key.1.as_str()),
                    objects,
                    severity: ContradictionSeverity::High,
                });
            }
        }
    }

    for (key, objects1) in &relations_doc1 {
        if !relations_doc2.contains_key(key) && seen.insert(key.clone()) {
            let mut objects: Vec<Uuid> = objects1.iter().copied().collect();
            objects.sort();
            low.push(Contradiction {
                node_id: key.0,
                relationship_type: RelationshipType::from(key.1.as_str()),
                objects,
                severity: ContradictionSeverity::Low,
            });
        }
    }
    for (key, objects2) in &relations_doc2 {
        if !relations_doc1.contains_key(key) && seen.insert(key.clone()) {
            let mut objects: Vec<Uuid> = objects2.iter().copied().collect();
            objects.sort();
            low.push(Contradiction {
                node_id: key.0,
                relationship_type: RelationshipType::from(key.1.as_str()),
                objects,
                severity: ContradictionSeverity::Low,
            });
        }
    }

    high.sort_by_key(|c| c.node_id);
    low.sort_by_key(|c| c.node_id);
    report.contradictions = high.into_iter().chain(low).collect();

    report
}

fn group_by_relation(triples: &HashSet<Triple>) -> HashMap<(Uuid, String), HashSet<Uuid>> {
    let mut map: HashMap<(Uuid, String), HashSet<Uuid>> = HashMap::new();
    for triple in triples {
        map.entry((triple.node_id, triple.relation.clone()))
            .or_default()
            .insert(triple.other_node);
    }
    map
}

fn entity_node_ids(repo: &Repo, entities: &[Entity]) -> HashSet<Uuid> {
    entities
        .iter()
        .filter_map(|entity| {
            repo.all_nodes()
                .into_iter()
                .find(|node| repo.links_for_node(node.id).iter().any(|l| l.entity_id == entity.id))
                .map(|node| node.id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use docgraph_core::hash::hash;
    use docgraph_core::model::{
        Document, DocumentStatus, EntityType, KnowledgeEdge, KnowledgeNode, NodeEntityLink,
        Processor, ProvenanceKind, ProvenanceRecord,
    };
    use tempfile::tempdir;

    async fn repo() -> Repo {
        let dir = tempdir().unwrap();
        Repo::open(dir.path().join("t.wal")).await.unwrap()
    }

    async fn seed_document(repo: &Repo) -> Uuid {
        let prov = ProvenanceRecord::root(ProvenanceKind::Document, hash(b"d"), hash(b"d"), Processor::new("p", "1"));
        let prov_id = repo.insert_provenance(prov).await.unwrap();
        let doc = Document {
            id: Uuid::new_v4(),
            file_path: "/tmp/d.pdf".into(),
            file_name: "d.pdf".into(),
            file_hash: hash(b"d"),
            file_size: 1,
            file_type: "application/pdf".into(),
            status: DocumentStatus::Pending,
            provenance_id: prov_id,
            title: None,
            author: None,
            subject: None,
            page_count: None,
            error_message: None,
            ocr_completed_at: None,
        };
        repo.insert_document(doc).await.unwrap()
    }

    async fn seed_entity_and_node(repo: &Repo, document_id: Uuid, name: &str) -> (Entity, Uuid) {
        let entity = Entity {
            id: Uuid::new_v4(),
            document_id,
            entity_type: EntityType::Person,
            raw_text: name.to_string(),
            normalized_text: name.to_lowercase(),
            confidence: 0.9,
            metadata: None,
            provenance_id: Uuid::new_v4(),
        };
        let entity_id = repo.insert_entity(entity.clone()).await.unwrap();
        let node = KnowledgeNode {
            id: Uuid::new_v4(),
            entity_type: EntityType::Person,
            canonical_name: name.to_string(),
            normalized_name: name.to_lowercase(),
            aliases: vec![],
            document_count: 1,
            mention_count: 1,
            edge_count: 0,
            avg_confidence: 0.9,
            importance_score: None,
            resolution_type: Some("exact".into()),
            provenance_id: Uuid::new_v4(),
            created_at: "now".into(),
            updated_at: "now".into(),
        };
        let node_id = repo.upsert_node(node).await.unwrap();
        repo.insert_node_entity_link(NodeEntityLink {
            id: Uuid::new_v4(),
            node_id,
            entity_id,
            document_id,
            similarity_score: 1.0,
            resolution_method: "exact".into(),
            created_at: "now".into(),
        })
        .await
        .unwrap();
        (entity, node_id)
    }

    #[tokio::test]
    async fn detects_high_severity_when_same_relation_has_different_objects() {
        let repo = repo().await;
        let doc1 = seed_document(&repo).await;
        let doc2 = seed_document(&repo).await;

        let (entity_a, node_a) = seed_entity_and_node(&repo, doc1, "Alice").await;
        let (_, node_b1) = seed_entity_and_node(&repo, doc1, "Acme Inc").await;
        let (_, node_b2) = seed_entity_and_node(&repo, doc2, "Globex Inc").await;

        repo.upsert_edge(KnowledgeEdge {
            id: Uuid::new_v4(),
            source_node_id: node_a,
            target_node_id: node_b1,
            relationship_type: RelationshipType::WorksAt,
            weight: 0.9,
            evidence_count: 1,
            document_ids: vec![doc1],
            metadata: serde_json::Value::Null,
            valid_from: None,
            valid_until: None,
            normalized_weight: None,
            contradiction_count: None,
            provenance_id: node_a,
            created_at: "now".into(),
        })
        .await
        .unwrap();

        repo.upsert_edge(KnowledgeEdge {
            id: Uuid::new_v4(),
            source_node_id: node_a,
            target_node_id: node_b2,
            relationship_type: RelationshipType::WorksAt,
            weight: 0.9,
            evidence_count: 1,
            document_ids: vec![doc2],
            metadata: serde_json::Value::Null,
            valid_from: None,
            valid_until: None,
            normalized_weight: None,
            contradiction_count: None,
            provenance_id: node_a,
            created_at: "now".into(),
        })
        .await
        .unwrap();

        let report = detect_contradictions(&repo, &[entity_a.clone()], &[entity_a], doc1, doc2);
        assert_eq!(report.contradictions.len(), 1);
        assert_eq!(report.contradictions[0].severity, ContradictionSeverity::High);
    }
}
