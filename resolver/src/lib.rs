pub mod cluster;
pub mod contradiction;
pub mod graph;
pub mod resilience;
pub mod resolver;
pub mod similarity;
pub mod synthesis;
pub mod union_find;

pub use cluster::{reassign_document, ClusterError, ReassignmentResult};
pub use contradiction::{detect_contradictions, ContradictionReport};
pub use graph::{full_build, incremental_build, GraphBuildStats, GraphError};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimiter, RateLimiterConfig};
pub use resolver::{resolve, PairClassifier, ResolutionMode, ResolverError};
pub use synthesis::{
    build_census, build_corpus_intelligence, classify_entity_roles, document_roster, ground_evidence,
    infer_document_relationships, synthesize_cross_document, synthesize_document_narrative, CensusEntry,
    GuardedBackend, SynthesisBackend, SynthesisError,
};
