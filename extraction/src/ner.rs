use async_trait::async_trait;
use docgraph_core::model::EntityType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedEntity {
    pub text: String,
    pub entity_type: EntityType,
    pub confidence: f32,
    pub character_start: Option<usize>,
    pub character_end: Option<usize>,
}

#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> anyhow::Result<Vec<ExtractedEntity>>;
}

/// A keyword-list extractor kept around mainly for tests and as a cheap
/// fallback model in the registry; real extraction runs through
/// [`crate::lightweight::RuleBasedExtractor`].
pub struct MockEntityExtractor {
    keywords: Vec<(String, EntityType)>,
}

impl MockEntityExtractor {
    pub fn new() -> Self {
        Self {
            keywords: vec![
                ("Jane Doe".to_string(), EntityType::Person),
                ("Acme Corporation".to_string(), EntityType::Organization),
                ("Exhibit A".to_string(), EntityType::Exhibit),
            ],
        }
    }
}

impl Default for MockEntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityExtractor for MockEntityExtractor {
    async fn extract(&self, text: &str) -> anyhow::Result<Vec<ExtractedEntity>> {
        let lower_text = text.to_lowercase();
        let mut entities = Vec::new();

        for (keyword, entity_type) in &self.keywords {
            if lower_text.contains(&keyword.to_lowercase()) {
                entities.push(ExtractedEntity {
                    text: keyword.clone(),
                    entity_type: *entity_type,
                    confidence: 0.9,
                    character_start: None,
                    character_end: None,
                });
            }
        }

        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_extraction() {
        let extractor = MockEntityExtractor::new();
        let text = "Jane Doe filed a motion alongside Acme Corporation.";
        let entities = extractor.extract(text).await.unwrap();

        assert!(entities.iter().any(|e| e.text == "Jane Doe" && e.entity_type == EntityType::Person));
        assert!(entities.iter().any(|e| e.text == "Acme Corporation" && e.entity_type == EntityType::Organization));
    }
}
