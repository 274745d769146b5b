pub mod bm25;
pub mod index;
pub mod migrations;
pub mod repo;
pub mod snapshot;
pub mod wal;

pub use bm25::{Bm25Hit, Bm25Index};
pub use index::{cosine_similarity, AdjacencyGraph, VectorIndex};
pub use migrations::{apply_all, latest_version, MigrationError, SchemaState};
pub use repo::{IntegrityError, Repo, RepoError};
pub use snapshot::{export_provenance, export_w3c_prov, ExportScope, ProvenanceExport, SnapshotError};
pub use wal::{Wal, WalError};
