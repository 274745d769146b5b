pub mod lightweight;
pub mod ner;
pub mod registry;

pub use lightweight::{
    register_default_lightweight_models, RuleBasedLegalExtractor, RuleBasedMedicalExtractor,
    RULE_BASED_LEGAL_MODEL, RULE_BASED_MEDICAL_MODEL,
};
pub use ner::{EntityExtractor, ExtractedEntity, MockEntityExtractor};
pub use registry::{ModelRegistry, RegistryError, ResolvedModel};
