//! Forward-only schema migration engine (§4.2).
//!
//! A migration is a pure function over [`SchemaState`]: it may widen a
//! CHECK-like constraint (add an allowed enum variant), register a new
//! index, or bump metadata. Migrations never delete state. `apply_all`
//! is idempotent: running it twice leaves the version unchanged and
//! applies nothing the second time.

use docgraph_core::error::{CoreError, ErrorCategory};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration {number} ({name}) failed: {reason}")]
    Failed {
        number: u32,
        name: &'static str,
        reason: String,
    },
    #[error("referential integrity check failed after migrating to version {version}: {violations:?}")]
    IntegrityViolation { version: u32, violations: Vec<String> },
}

impl CoreError for MigrationError {
    fn category(&self) -> ErrorCategory {
        match self {
            MigrationError::Failed { .. } => ErrorCategory::Internal,
            MigrationError::IntegrityViolation { .. } => ErrorCategory::Integrity,
        }
    }
}

/// The subset of schema state migrations can evolve: which enum variants
/// are currently allowed for CHECK-constrained columns, and which indexes
/// exist. A real SQL engine would express this as DDL; here it is the
/// in-memory equivalent the rest of `storage` consults.
#[derive(Debug, Clone, Default)]
pub struct SchemaState {
    pub version: u32,
    pub allowed_entity_types: BTreeSet<String>,
    pub allowed_relationship_types: BTreeSet<String>,
    pub allowed_document_statuses: BTreeSet<String>,
    pub indexes: BTreeSet<String>,
    pub fts_enabled: bool,
    pub vector_index_enabled: bool,
}

type MigrationFn = fn(&mut SchemaState) -> Result<(), String>;

struct Migration {
    number: u32,
    name: &'static str,
    apply: MigrationFn,
}

fn migration_table() -> Vec<Migration> {
    vec![
        Migration {
            number: 1,
            name: "create_core_tables",
            apply: |s| {
                for t in ["documents", "provenance", "ocr_results", "chunks"] {
                    s.indexes.insert(format!("{t}_pkey"));
                }
                for status in ["pending", "processing", "complete", "failed"] {
                    s.allowed_document_statuses.insert(status.to_string());
                }
                Ok(())
            },
        },
        Migration {
            number: 2,
            name: "create_entity_tables",
            apply: |s| {
                for ty in [
                    "person",
                    "organization",
                    "date",
                    "amount",
                    "case_number",
                    "location",
                    "statute",
                    "exhibit",
                    "other",
                ] {
                    s.allowed_entity_types.insert(ty.to_string());
                }
                s.indexes.insert("entities_document_id_idx".to_string());
                Ok(())
            },
        },
        Migration {
            number: 3,
            name: "create_knowledge_graph_tables",
            apply: |s| {
                for rel in ["co_mentioned", "co_located", "related_to"] {
                    s.allowed_relationship_types.insert(rel.to_string());
                }
                s.indexes
                    .insert("node_entity_links_entity_id_unique".to_string());
                Ok(())
            },
        },
        Migration {
            number: 4,
            name: "widen_relationship_types_for_ai_synthesis",
            apply: |s| {
                for rel in [
                    "works_at",
                    "represents",
                    "located_in",
                    "filed_in",
                    "cites",
                    "references",
                    "party_to",
                    "precedes",
                    "occurred_at",
                ] {
                    s.allowed_relationship_types.insert(rel.to_string());
                }
                Ok(())
            },
        },
        Migration {
            number: 5,
            name: "widen_entity_types_for_medical_domain",
            apply: |s| {
                for ty in ["medication", "diagnosis", "medical_device"] {
                    s.allowed_entity_types.insert(ty.to_string());
                }
                for rel in ["diagnosed_with", "treated_with", "supervised_by"] {
                    s.allowed_relationship_types.insert(rel.to_string());
                }
                Ok(())
            },
        },
        Migration {
            number: 6,
            name: "create_clustering_tables",
            apply: |s| {
                s.indexes.insert("clusters_run_id_idx".to_string());
                s.indexes
                    .insert("document_clusters_document_id_idx".to_string());
                Ok(())
            },
        },
        Migration {
            number: 7,
            name: "enable_vector_index",
            apply: |s| {
                s.vector_index_enabled = true;
                Ok(())
            },
        },
        Migration {
            number: 8,
            name: "enable_fts5_index",
            apply: |s| {
                s.fts_enabled = true;
                s.indexes.insert("chunks_fts_idx".to_string());
                Ok(())
            },
        },
        Migration {
            number: 9,
            name: "add_extraction_and_form_fill_tables",
            apply: |s| {
                s.indexes.insert("extractions_document_id_idx".to_string());
                Ok(())
            },
        },
        Migration {
            number: 10,
            name: "add_corpus_intelligence_and_entity_roles",
            apply: |s| {
                s.indexes.insert("entity_roles_node_id_idx".to_string());
                Ok(())
            },
        },
    ]
}

/// Applies every migration with `number > current_version`, each treated
/// as a single atomic step, updating `state.version` after each one.
/// Re-running on an already-current state is a no-op (§4.2 contract 3).
pub fn apply_all(state: &mut SchemaState) -> Result<(), MigrationError> {
    let table = migration_table();
    for migration in table.iter().filter(|m| m.number > state.version) {
        (migration.apply)(state).map_err(|reason| MigrationError::Failed {
            number: migration.number,
            name: migration.name,
            reason,
        })?;
        state.version = migration.number;
    }
    Ok(())
}

pub fn latest_version() -> u32 {
    migration_table().into_iter().map(|m| m.number).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrating_from_zero_reaches_latest_version() {
        let mut state = SchemaState::default();
        apply_all(&mut state).unwrap();
        assert_eq!(state.version, latest_version());
        assert!(state.allowed_entity_types.contains("person"));
        assert!(state.allowed_relationship_types.contains("diagnosed_with"));
        assert!(state.fts_enabled);
        assert!(state.vector_index_enabled);
    }

    #[test]
    fn migrating_twice_is_a_no_op() {
        let mut state = SchemaState::default();
        apply_all(&mut state).unwrap();
        let after_first = state.clone();
        apply_all(&mut state).unwrap();
        assert_eq!(state.version, after_first.version);
        assert_eq!(state.indexes, after_first.indexes);
    }

    #[test]
    fn migrations_never_remove_previously_allowed_variants() {
        let mut state = SchemaState::default();
        state.version = 2;
        state.allowed_entity_types.insert("person".to_string());
        apply_all(&mut state).unwrap();
        assert!(state.allowed_entity_types.contains("person"));
        assert!(state.allowed_entity_types.contains("medication"));
    }
}
