pub mod dsl;
pub mod engine;
pub mod rerank;
pub mod rrf;
pub mod synonyms;

pub use dsl::{DslError, QueryRequest, SearchMode};
pub use engine::{QueryEngine, QueryError, QueryResponse, SearchResult, SearchType};
pub use rerank::{apply_reranker, RerankError, RerankVerdict, Reranker};
pub use rrf::{fuse, FusedHit, RrfParams};
pub use synonyms::expand_query;
