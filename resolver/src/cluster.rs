//! Cluster & reassignment (§4.11): Jaccard overlap of a document's linked
//! knowledge-node set against other clusters' node sets within the most
//! recent clustering run, reassigning when a better home is found.

use docgraph_core::error::{CoreError, ErrorCategory};
use docgraph_core::model::DocumentClusterRow;
use std::collections::HashSet;
use storage::{Repo, RepoError};
use thiserror::Error;
use uuid::Uuid;

const REASSIGNMENT_THRESHOLD: f32 = 0.05;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("storage error: {0}")]
    Repo(#[from] RepoError),
    #[error("document {0} has no cluster assignment in run {1}")]
    NotAssigned(Uuid, Uuid),
}

impl CoreError for ClusterError {
    fn category(&self) -> ErrorCategory {
        match self {
            ClusterError::Repo(e) => e.category(),
            ClusterError::NotAssigned(..) => ErrorCategory::NotFound,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReassignmentResult {
    pub document_id: Uuid,
    pub previous_cluster_id: Uuid,
    pub best_cluster_id: Uuid,
    pub best_overlap: f32,
    pub reassigned: bool,
}

fn document_node_set(repo: &Repo, document_id: Uuid) -> HashSet<Uuid> {
    repo.all_nodes()
        .into_iter()
        .filter(|node| repo.links_for_node(node.id).iter().any(|l| l.document_id == document_id))
        .map(|node| node.id)
        .collect()
}

fn cluster_node_set(repo: &Repo, rows: &[DocumentClusterRow], cluster_id: Uuid) -> HashSet<Uuid> {
    rows.iter()
        .filter(|r| r.cluster_id == cluster_id)
        .flat_map(|r| document_node_set(repo, r.document_id))
        .collect()
}

fn jaccard(a: &HashSet<Uuid>, b: &HashSet<Uuid>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Recomputes the best cluster for `document_id` within `run_id` and
/// reassigns it if the best overlap exceeds the reassignment threshold.
pub async fn reassign_document(
    repo: &Repo,
    document_id: Uuid,
    run_id: Uuid,
) -> Result<ReassignmentResult, ClusterError> {
    let rows = repo.document_clusters_for_run(run_id);
    let current_row = rows
        .iter()
        .find(|r| r.document_id == document_id)
        .cloned()
        .ok_or(ClusterError::NotAssigned(document_id, run_id))?;

    let mut clusters = repo.clusters_for_run(run_id);
    clusters.sort_by_key(|c| c.cluster_index);

    let doc_nodes = document_node_set(repo, document_id);

    let mut best_cluster_id = current_row.cluster_id;
    let mut best_overlap = 0.0f32;

    for cluster in &clusters {
        if cluster.id == current_row.cluster_id {
            continue;
        }
        let other_nodes = cluster_node_set(repo, &rows, cluster.id);
        let overlap = jaccard(&doc_nodes, &other_nodes);
        if overlap > best_overlap {
            best_overlap = overlap;
            best_cluster_id = cluster.id;
        }
    }

    let reassigned = best_overlap > REASSIGNMENT_THRESHOLD && best_cluster_id != current_row.cluster_id;

    if reassigned {
        let mut updated = current_row.clone();
        updated.cluster_id = best_cluster_id;
        updated.overlap = best_overlap;
        repo.insert_document_cluster(updated).await?;
    }

    Ok(ReassignmentResult {
        document_id,
        previous_cluster_id: current_row.cluster_id,
        best_cluster_id: if reassigned { best_cluster_id } else { current_row.cluster_id },
        best_overlap,
        reassigned,
    })
}
