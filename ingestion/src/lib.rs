pub mod api;
pub mod chunker;
pub mod embedding;
pub mod extract;
pub mod policy;
pub mod processor;
pub mod request;

pub use api::{JsonIngestionPayload, MultipartIngestionPayload};
pub use chunker::{ChunkingConfig, Chunker, IngestedChunk, SemanticChunker};
pub use embedding::{DeterministicEmbedder, Embedder};
pub use extract::{detect_content_kind, extract_pdf_text, extract_utf8, ContentKind};
pub use policy::{BasicPolicy, ContentPolicy, NoOpPolicy, PolicyError};
pub use processor::{default_chunker, IngestionError, IngestionPipeline};
pub use request::IngestionRequest;
