//! Provenance export (§4.3): a JSON dump of the provenance DAG scoped to
//! one document, the whole database, or everything, plus a W3C-PROV
//! variant for interop with external lineage tooling. Writes land
//! atomically via a temp-file-then-rename, the same durability shape the
//! WAL snapshot path uses.

use docgraph_core::error::{CoreError, ErrorCategory};
use docgraph_core::model::{Processor, ProvenanceRecord};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

use crate::repo::Repo;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("document {0} not found")]
    DocumentNotFound(Uuid),
}

impl CoreError for SnapshotError {
    fn category(&self) -> ErrorCategory {
        match self {
            SnapshotError::Io(_) | SnapshotError::Serialization(_) => ErrorCategory::Internal,
            SnapshotError::DocumentNotFound(_) => ErrorCategory::NotFound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportScope {
    Document(Uuid),
    Database,
    All,
}

#[derive(Debug, Serialize)]
pub struct ProvenanceExport {
    pub scope: String,
    pub records: Vec<ProvenanceRecord>,
}

/// Builds the export payload; does not write to disk (callers choose
/// whether to stream it, return it over the SDK boundary, or persist it).
pub fn export_provenance(repo: &Repo, scope: ExportScope) -> Result<ProvenanceExport, SnapshotError> {
    let (label, records) = match scope {
        ExportScope::Document(document_id) => {
            let doc = repo
                .get_document(document_id)
                .ok_or(SnapshotError::DocumentNotFound(document_id))?;
            ("document".to_string(), repo.by_root(doc.provenance_id))
        }
        ExportScope::Database => ("database".to_string(), all_records(repo)),
        ExportScope::All => ("all".to_string(), all_records(repo)),
    };
    Ok(ProvenanceExport { scope: label, records })
}

fn all_records(repo: &Repo) -> Vec<ProvenanceRecord> {
    repo.list_documents()
        .into_iter()
        .flat_map(|doc| repo.by_root(doc.provenance_id))
        .collect()
}

/// Maps provenance kinds/processors/parent links onto the W3C-PROV
/// vocabulary: each record becomes a `prov:Entity`, each distinct
/// processor a `prov:Activity`, and each parent edge a
/// `prov:wasDerivedFrom` assertion.
pub fn export_w3c_prov(export: &ProvenanceExport) -> serde_json::Value {
    let entities: Vec<serde_json::Value> = export
        .records
        .iter()
        .map(|r| {
            json!({
                "id": format!("urn:docgraph:entity:{}", r.id),
                "type": "prov:Entity",
                "prov:type": r.kind,
                "contentHash": r.content_hash,
                "wasGeneratedBy": format!("urn:docgraph:activity:{}:{}", r.processor.name, r.processor.version),
            })
        })
        .collect();

    let activities: Vec<serde_json::Value> = distinct_processors(export)
        .into_iter()
        .map(|p: Processor| {
            json!({
                "id": format!("urn:docgraph:activity:{}:{}", p.name, p.version),
                "type": "prov:Activity",
                "prov:label": format!("{} v{}", p.name, p.version),
            })
        })
        .collect();

    let derivations: Vec<serde_json::Value> = export
        .records
        .iter()
        .flat_map(|r| {
            r.parent_ids.iter().map(move |parent| {
                json!({
                    "type": "prov:wasDerivedFrom",
                    "generatedEntity": format!("urn:docgraph:entity:{}", r.id),
                    "usedEntity": format!("urn:docgraph:entity:{}", parent),
                })
            })
        })
        .collect();

    json!({
        "@context": "https://www.w3.org/ns/prov",
        "entities": entities,
        "activities": activities,
        "derivations": derivations,
    })
}

fn distinct_processors(export: &ProvenanceExport) -> Vec<Processor> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for record in &export.records {
        let key = (record.processor.name.clone(), record.processor.version.clone());
        if seen.insert(key) {
            out.push(record.processor.clone());
        }
    }
    out
}

/// Writes an export to disk atomically (temp file + rename), mirroring
/// the snapshot durability pattern used for the WAL's own checkpoints.
pub async fn write_export(dir: impl AsRef<Path>, name: &str, payload: &serde_json::Value) -> Result<PathBuf, SnapshotError> {
    let dir = dir.as_ref();
    if !dir.exists() {
        fs::create_dir_all(dir).await?;
    }
    let path = dir.join(format!("{name}.json"));
    let tmp_path = path.with_extension("json.tmp");

    let bytes = serde_json::to_vec_pretty(payload)?;
    fs::write(&tmp_path, &bytes).await?;
    fs::rename(&tmp_path, &path).await?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docgraph_core::hash::hash;
    use docgraph_core::model::{Document, DocumentStatus, ProvenanceKind};
    use tempfile::tempdir;

    fn processor() -> Processor {
        Processor::new("test-processor", "0.1.0")
    }

    async fn repo_with_document() -> (Repo, Uuid) {
        let dir = tempdir().unwrap();
        let repo = Repo::open(dir.path().join("t.wal")).await.unwrap();
        let prov = ProvenanceRecord::root(ProvenanceKind::Document, hash(b"d"), hash(b"d"), processor());
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
        let doc_id = repo.insert_document(doc).await.unwrap();
        (repo, doc_id)
    }

    #[tokio::test]
    async fn document_scope_includes_the_full_chain() {
        let (repo, doc_id) = repo_with_document().await;
        let export = export_provenance(&repo, ExportScope::Document(doc_id)).unwrap();
        assert_eq!(export.scope, "document");
        assert_eq!(export.records.len(), 1);
    }

    #[tokio::test]
    async fn w3c_prov_maps_records_to_entities_and_activities() {
        let (repo, doc_id) = repo_with_document().await;
        let export = export_provenance(&repo, ExportScope::Document(doc_id)).unwrap();
        let prov = export_w3c_prov(&export);
        assert_eq!(prov["entities"].as_array().unwrap().len(), 1);
        assert_eq!(prov["activities"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_document_is_rejected() {
        let dir = tempdir().unwrap();
        let repo = Repo::open(dir.path().join("empty.wal")).await.unwrap();
        let result = export_provenance(&repo, ExportScope::Document(Uuid::new_v4()));
        assert!(matches!(result, Err(SnapshotError::DocumentNotFound(_))));
    }
}
