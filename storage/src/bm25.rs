//! BM25 full-text index over chunks (§4.9). A second instance of the same
//! index type serves VLM descriptions and extractions — the index itself
//! is content-agnostic, keyed by whatever row id the caller hands it.

use std::collections::HashMap;
use uuid::Uuid;

const K1: f32 = 1.2;
const B: f32 = 0.75;

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[derive(Debug, Clone)]
struct Posting {
    doc_id: Uuid,
    term_freq: u32,
}

#[derive(Default)]
pub struct Bm25Index {
    postings: HashMap<String, Vec<Posting>>,
    doc_lengths: HashMap<Uuid, u32>,
    doc_text: HashMap<Uuid, String>,
    total_length: u64,
}

#[derive(Debug, Clone)]
pub struct Bm25Hit {
    pub doc_id: Uuid,
    pub score: f32,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes (or re-indexes) one row's text content.
    pub fn index(&mut self, doc_id: Uuid, text: &str) {
        self.remove(doc_id);

        let tokens = tokenize(text);
        let len = tokens.len() as u32;
        self.doc_lengths.insert(doc_id, len);
        self.doc_text.insert(doc_id, text.to_string());
        self.total_length += len as u64;

        let mut freqs: HashMap<String, u32> = HashMap::new();
        for token in tokens {
            *freqs.entry(token).or_insert(0) += 1;
        }
        for (term, term_freq) in freqs {
            self.postings
                .entry(term)
                .or_default()
                .push(Posting { doc_id, term_freq });
        }
    }

    pub fn remove(&mut self, doc_id: Uuid) {
        if let Some(len) = self.doc_lengths.remove(&doc_id) {
            self.total_length -= len as u64;
        }
        self.doc_text.remove(&doc_id);
        for postings in self.postings.values_mut() {
            postings.retain(|p| p.doc_id != doc_id);
        }
    }

    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    fn avg_doc_length(&self) -> f32 {
        if self.doc_lengths.is_empty() {
            0.0
        } else {
            self.total_length as f32 / self.doc_lengths.len() as f32
        }
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.doc_lengths.len() as f32;
        let df = self.postings.get(term).map(|p| p.len()).unwrap_or(0) as f32;
        if df == 0.0 {
            return 0.0;
        }
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Bag-of-words BM25 search, optionally restricted to a document filter.
    pub fn search(&self, query: &str, limit: usize, allowed: Option<&[Uuid]>) -> Vec<Bm25Hit> {
        let allowed_set: Option<std::collections::HashSet<Uuid>> =
            allowed.map(|ids| ids.iter().copied().collect());
        let terms = tokenize(query);
        let avg_len = self.avg_doc_length();

        let mut scores: HashMap<Uuid, f32> = HashMap::new();
        for term in &terms {
            let idf = self.idf(term);
            if idf == 0.0 {
                continue;
            }
            if let Some(postings) = self.postings.get(term) {
                for posting in postings {
                    if let Some(set) = &allowed_set {
                        if !set.contains(&posting.doc_id) {
                            continue;
                        }
                    }
                    let doc_len = *self.doc_lengths.get(&posting.doc_id).unwrap_or(&0) as f32;
                    let tf = posting.term_freq as f32;
                    let denom = tf + K1 * (1.0 - B + B * doc_len / avg_len.max(1.0));
                    let score = idf * (tf * (K1 + 1.0)) / denom;
                    *scores.entry(posting.doc_id).or_insert(0.0) += score;
                }
            }
        }

        let mut ranked: Vec<Bm25Hit> = scores
            .into_iter()
            .map(|(doc_id, score)| Bm25Hit { doc_id, score })
            .collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(limit);
        ranked
    }

    /// Exact multi-word phrase search: every term must be present, then
    /// we check the literal substring occurs in the stored text.
    pub fn phrase_search(&self, phrase: &str, limit: usize, allowed: Option<&[Uuid]>) -> Vec<Bm25Hit> {
        let normalized_phrase = phrase.to_lowercase();
        let bow = self.search(phrase, self.doc_lengths.len().max(1), allowed);
        let mut hits: Vec<Bm25Hit> = bow
            .into_iter()
            .filter(|hit| {
                self.doc_text
                    .get(&hit.doc_id)
                    .map(|text| text.to_lowercase().contains(&normalized_phrase))
                    .unwrap_or(false)
            })
            .collect();
        hits.truncate(limit);
        hits
    }

    /// Produces a short snippet around the first match, surrounding tokens
    /// with `**`.
    pub fn highlight(&self, doc_id: Uuid, query: &str, context_chars: usize) -> Option<String> {
        let text = self.doc_text.get(&doc_id)?;
        let lower = text.to_lowercase();
        let first_term = tokenize(query).into_iter().next()?;
        let pos = lower.find(&first_term)?;

        let start = pos.saturating_sub(context_chars);
        let end = (pos + first_term.len() + context_chars).min(text.len());
        let start = floor_char_boundary(text, start);
        let end = ceil_char_boundary(text, end);

        let prefix = if start > 0 { "..." } else { "" };
        let suffix = if end < text.len() { "..." } else { "" };
        Some(format!("{prefix}{}{suffix}", &text[start..end]))
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[test]
    fn search_ranks_more_relevant_document_higher() {
        let mut index = Bm25Index::new();
        index.index(id(1), "the quick brown fox jumps over the lazy dog");
        index.index(id(2), "lazy dog sleeps all day, dog dog dog");

        let hits = index.search("dog", 10, None);
        assert_eq!(hits[0].doc_id, id(2));
    }

    #[test]
    fn phrase_search_requires_exact_substring() {
        let mut index = Bm25Index::new();
        index.index(id(1), "breach of contract filed in district court");
        index.index(id(2), "contract breach disputed in appellate filings");

        let hits = index.phrase_search("breach of contract", 10, None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, id(1));
    }

    #[test]
    fn document_filter_restricts_results() {
        let mut index = Bm25Index::new();
        index.index(id(1), "motion to dismiss");
        index.index(id(2), "motion to dismiss");

        let hits = index.search("motion", 10, Some(&[id(1)]));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, id(1));
    }

    #[test]
    fn remove_drops_a_document_from_future_searches() {
        let mut index = Bm25Index::new();
        index.index(id(1), "alpha beta");
        index.remove(id(1));
        assert!(index.search("alpha", 10, None).is_empty());
    }

    #[test]
    fn highlight_surrounds_query_term_with_context() {
        let mut index = Bm25Index::new();
        index.index(id(1), "the contract was breached on march third");
        let snippet = index.highlight(id(1), "breached", 5).unwrap();
        assert!(snippet.contains("breached"));
    }
}
