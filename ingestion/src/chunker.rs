use async_trait::async_trait;
use std::collections::HashMap;
use text_splitter::TextSplitter;

/// A chunk before it's assigned a character range within the OCR text and
/// persisted as a `storage`-level `Chunk` row.
#[derive(Debug, Clone)]
pub struct IngestedChunk {
    pub content: String,
    pub metadata: HashMap<String, String>,
    pub character_start: usize,
    pub character_end: usize,
    pub embedding: Option<Vec<f32>>,
}

#[async_trait]
pub trait Chunker: Send + Sync {
    async fn chunk(&self, content: &str, base_metadata: HashMap<String, String>) -> Vec<IngestedChunk>;
}

pub struct ChunkingConfig {
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_chars: 1000 }
    }
}

pub struct SemanticChunker {
    splitter: TextSplitter<text_splitter::Characters>,
    max_chars: usize,
}

impl SemanticChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { splitter: TextSplitter::default().with_trim_chunks(true), max_chars: config.max_chars }
    }
}

impl Default for SemanticChunker {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

#[async_trait]
impl Chunker for SemanticChunker {
    async fn chunk(&self, content: &str, base_metadata: HashMap<String, String>) -> Vec<IngestedChunk> {
        let mut cursor = 0usize;
        self.splitter
            .chunks(content, self.max_chars)
            .enumerate()
            .map(|(i, text)| {
                let start = content[cursor..].find(text).map(|off| cursor + off).unwrap_or(cursor);
                let end = start + text.len();
                cursor = end;

                let mut metadata = base_metadata.clone();
                metadata.insert("chunk_index".to_string(), i.to_string());
                metadata.insert("chunk_chars".to_string(), text.len().to_string());

                IngestedChunk {
                    content: text.to_string(),
                    metadata,
                    character_start: start,
                    character_end: end,
                    embedding: None,
                }
            })
            .collect()
    }
}
