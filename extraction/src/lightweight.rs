//! Regex-based named entity recognition for the legal/medical document
//! domain. Stands in for a trained NER model behind the same
//! [`EntityExtractor`] interface — swapping in a real model later never
//! touches call sites in `jobs::worker`.

use crate::ner::{EntityExtractor, ExtractedEntity};
use crate::registry::{ModelRegistry, RegistryError};
use docgraph_core::model::EntityType;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

pub const RULE_BASED_LEGAL_MODEL: &str = "rule-based-legal";
pub const RULE_BASED_MEDICAL_MODEL: &str = "rule-based-medical";

static CASE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:Case No\.?|Docket No\.?)\s*[:#]?\s*([0-9]{1,4}[-:][A-Z]{0,4}[-:]?[0-9]{2,8})").unwrap());
static STATUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d+\s+U\.S\.C\.?\s*§*\s*\d+[a-zA-Z]*\b").unwrap());
static AMOUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\s?[0-9][0-9,]*(?:\.[0-9]{2})?").unwrap());
static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},\s+\d{4}\b|\b\d{1,2}/\d{1,2}/\d{2,4}\b").unwrap()
});
static EXHIBIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bExhibit\s+[A-Z0-9]+\b").unwrap());
static ORGANIZATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Z][\w&.']*(?:\s+[A-Z][\w&.']*)*\s+(?:Inc\.?|LLC|L\.L\.C\.|Corp\.?|Corporation|Ltd\.?|Co\.|Company|Hospital|Clinic))\b").unwrap()
});
static PERSON: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:Mr|Mrs|Ms|Dr|Judge)\.?\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+)?\b|\b[A-Z][a-z]+\s+[A-Z][a-z]+\b").unwrap());
static LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][a-z]+(?:\s[A-Z][a-z]+)*,\s(?:[A-Z]{2}|[A-Z][a-z]+)\b").unwrap());

const MEDICATIONS: &[&str] = &["ibuprofen", "metformin", "lisinopril", "amoxicillin", "warfarin", "insulin", "prednisone"];
const DIAGNOSES: &[&str] = &["hypertension", "diabetes", "fracture", "concussion", "pneumonia", "myocardial infarction"];
const MEDICAL_DEVICES: &[&str] = &["pacemaker", "stent", "catheter", "ventilator", "defibrillator"];

fn matches(re: &Regex, text: &str, entity_type: EntityType, confidence: f32) -> Vec<ExtractedEntity> {
    re.find_iter(text)
        .map(|m| ExtractedEntity {
            text: m.as_str().trim().to_string(),
            entity_type,
            confidence,
            character_start: Some(m.start()),
            character_end: Some(m.end()),
        })
        .collect()
}

fn keyword_matches(words: &[&str], text: &str, entity_type: EntityType, confidence: f32) -> Vec<ExtractedEntity> {
    let lower = text.to_lowercase();
    words
        .iter()
        .filter(|w| lower.contains(*w))
        .filter_map(|w| {
            let start = lower.find(w)?;
            Some(ExtractedEntity {
                text: text[start..start + w.len()].to_string(),
                entity_type,
                confidence,
                character_start: Some(start),
                character_end: Some(start + w.len()),
            })
        })
        .collect()
}

/// Legal-domain entities: case numbers, statutes, exhibits, amounts,
/// organizations, persons, dates, locations.
pub struct RuleBasedLegalExtractor;

#[async_trait::async_trait]
impl EntityExtractor for RuleBasedLegalExtractor {
    async fn extract(&self, text: &str) -> anyhow::Result<Vec<ExtractedEntity>> {
        let mut out = Vec::new();
        out.extend(matches(&CASE_NUMBER, text, EntityType::CaseNumber, 0.9));
        out.extend(matches(&STATUTE, text, EntityType::Statute, 0.9));
        out.extend(matches(&EXHIBIT, text, EntityType::Exhibit, 0.9));
        out.extend(matches(&AMOUNT, text, EntityType::Amount, 0.85));
        out.extend(matches(&DATE, text, EntityType::Date, 0.8));
        out.extend(matches(&ORGANIZATION, text, EntityType::Organization, 0.75));
        out.extend(matches(&LOCATION, text, EntityType::Location, 0.6));
        out.extend(matches(&PERSON, text, EntityType::Person, 0.6));
        Ok(out)
    }
}

/// Medical-domain entities: medications, diagnoses, devices, plus the
/// shared person/date/amount patterns.
pub struct RuleBasedMedicalExtractor;

#[async_trait::async_trait]
impl EntityExtractor for RuleBasedMedicalExtractor {
    async fn extract(&self, text: &str) -> anyhow::Result<Vec<ExtractedEntity>> {
        let mut out = Vec::new();
        out.extend(keyword_matches(MEDICATIONS, text, EntityType::Medication, 0.85));
        out.extend(keyword_matches(DIAGNOSES, text, EntityType::Diagnosis, 0.85));
        out.extend(keyword_matches(MEDICAL_DEVICES, text, EntityType::MedicalDevice, 0.85));
        out.extend(matches(&DATE, text, EntityType::Date, 0.8));
        out.extend(matches(&PERSON, text, EntityType::Person, 0.6));
        Ok(out)
    }
}

pub fn register_default_lightweight_models(registry: &mut ModelRegistry) -> Result<(), RegistryError> {
    registry.register(RULE_BASED_LEGAL_MODEL, "1.0.0", Arc::new(RuleBasedLegalExtractor))?;
    registry.register(RULE_BASED_MEDICAL_MODEL, "1.0.0", Arc::new(RuleBasedMedicalExtractor))?;
    registry.activate(RULE_BASED_LEGAL_MODEL, "1.0.0")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn legal_extractor_finds_case_numbers_and_organizations() {
        let extractor = RuleBasedLegalExtractor;
        let out = extractor
            .extract("Case No. 24-CV-00123 was filed against Acme Corporation on January 5, 2024.")
            .await
            .unwrap();

        assert!(out.iter().any(|e| e.entity_type == EntityType::CaseNumber));
        assert!(out.iter().any(|e| e.entity_type == EntityType::Organization && e.text.contains("Acme")));
        assert!(out.iter().any(|e| e.entity_type == EntityType::Date));
    }

    #[tokio::test]
    async fn medical_extractor_finds_medications_and_diagnoses() {
        let extractor = RuleBasedMedicalExtractor;
        let out = extractor.extract("Patient was prescribed metformin for diabetes.").await.unwrap();

        assert!(out.iter().any(|e| e.entity_type == EntityType::Medication));
        assert!(out.iter().any(|e| e.entity_type == EntityType::Diagnosis));
    }
}
