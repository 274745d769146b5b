use docgraph_core::model::EntityType;
use slm::ner::{EntityExtractor, ExtractedEntity};
use slm::registry::{ModelRegistry, RegistryError};
use std::sync::Arc;

struct StaticExtractor {
    entities: Vec<ExtractedEntity>,
}

#[async_trait::async_trait]
impl EntityExtractor for StaticExtractor {
    async fn extract(&self, _text: &str) -> anyhow::Result<Vec<ExtractedEntity>> {
        Ok(self.entities.clone())
    }
}

#[test]
fn test_registry_register_activate_and_resolve() {
    let mut registry = ModelRegistry::new();
    registry
        .register(
            "rule-based-legal",
            "1.0.0",
            Arc::new(StaticExtractor {
                entities: vec![ExtractedEntity {
                    text: "Acme Corporation".to_string(),
                    entity_type: EntityType::Organization,
                    confidence: 0.9,
                    character_start: None,
                    character_end: None,
                }],
            }),
        )
        .unwrap();

    registry.activate("rule-based-legal", "1.0.0").unwrap();

    let resolved = registry.resolve("rule-based-legal").unwrap();
    assert_eq!(resolved.model_id, "rule-based-legal");
    assert_eq!(resolved.version, "1.0.0");
}

#[test]
fn test_registry_resolve_pinned_version_ignores_active() {
    let mut registry = ModelRegistry::new();
    registry
        .register("rule-based-medical", "1.0.0", Arc::new(StaticExtractor { entities: vec![] }))
        .unwrap();
    registry
        .register("rule-based-medical", "1.1.0", Arc::new(StaticExtractor { entities: vec![] }))
        .unwrap();
    registry.activate("rule-based-medical", "1.1.0").unwrap();

    let resolved = registry.resolve("rule-based-medical@1.0.0").unwrap();
    assert_eq!(resolved.version, "1.0.0");
}

#[test]
fn test_registry_rollback_restores_previous_active_version() {
    let mut registry = ModelRegistry::new();
    registry
        .register("rule-based-legal", "1.0.0", Arc::new(StaticExtractor { entities: vec![] }))
        .unwrap();
    registry
        .register("rule-based-legal", "1.1.0", Arc::new(StaticExtractor { entities: vec![] }))
        .unwrap();

    registry.activate("rule-based-legal", "1.0.0").unwrap();
    registry.activate("rule-based-legal", "1.1.0").unwrap();
    let rolled_back = registry.rollback("rule-based-legal").unwrap();

    assert_eq!(rolled_back.version, "1.0.0");
}

#[test]
fn test_registry_resolve_missing_model_returns_error() {
    let registry = ModelRegistry::new();
    let result = registry.resolve("missing-model");
    assert!(matches!(result, Err(RegistryError::ModelNotFound(_))));
}
