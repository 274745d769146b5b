//! Domain synonym expansion (§4.9, optional): a static legal + medical
//! synonym map used to widen the BM25 arm of a query before it reaches the
//! index. Vector search sees the original query unchanged.

use once_cell::sync::Lazy;
use std::collections::HashMap;

static SYNONYMS: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    HashMap::from([
        ("plaintiff", &["claimant", "complainant"][..]),
        ("defendant", &["respondent", "accused"][..]),
        ("contract", &["agreement", "covenant"][..]),
        ("lawsuit", &["suit", "litigation", "action"][..]),
        ("attorney", &["counsel", "lawyer"][..]),
        ("testimony", &["deposition", "statement"][..]),
        ("exhibit", &["evidence", "attachment"][..]),
        ("motion", &["petition", "filing"][..]),
        ("statute", &["law", "code", "act"][..]),
        ("verdict", &["ruling", "judgment"][..]),
        ("diagnosis", &["assessment", "finding"][..]),
        ("medication", &["drug", "prescription"][..]),
        ("physician", &["doctor", "provider"][..]),
        ("patient", &["individual", "subject"][..]),
        ("treatment", &["therapy", "care"][..]),
        ("symptom", &["complaint", "manifestation"][..]),
        ("prognosis", &["outlook", "projection"][..]),
        ("surgery", &["operation", "procedure"][..]),
    ])
});

fn tokenize(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Expands every word that hits the synonym map to `word OR syn1 OR syn2 …`,
/// deduplicating across the whole query, case-insensitively. Words with no
/// match pass through unchanged.
pub fn expand_query(query: &str) -> String {
    let tokens = tokenize(query);
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut clauses: Vec<String> = Vec::new();

    for token in tokens {
        if !seen.insert(token.clone()) {
            continue;
        }
        match SYNONYMS.get(token.as_str()) {
            Some(synonyms) => {
                let mut alts = vec![token.clone()];
                for syn in *synonyms {
                    if seen.insert(syn.to_string()) {
                        alts.push(syn.to_string());
                    }
                }
                if alts.len() == 1 {
                    clauses.push(token);
                } else {
                    clauses.push(format!("({})", alts.join(" OR ")));
                }
            }
            None => clauses.push(token),
        }
    }

    clauses.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_a_known_term_with_its_synonyms() {
        let expanded = expand_query("motion to dismiss");
        assert!(expanded.contains("motion OR petition OR filing"));
        assert!(expanded.contains("dismiss"));
    }

    #[test]
    fn is_case_insensitive() {
        let expanded = expand_query("PLAINTIFF filed suit");
        assert!(expanded.to_lowercase().contains("plaintiff or claimant or complainant"));
    }

    #[test]
    fn deduplicates_repeated_words_and_cross_term_overlap() {
        let expanded = expand_query("attorney attorney counsel");
        let occurrences = expanded.matches("counsel").count();
        assert_eq!(occurrences, 1);
    }

    #[test]
    fn unmatched_words_pass_through_unchanged() {
        let expanded = expand_query("xyzzy");
        assert_eq!(expanded, "xyzzy");
    }
}
