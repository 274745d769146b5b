//! The vector arm of retrieval (§4.9): cosine similarity over 768-dim
//! embeddings. A linear scan stands in for the extension-loaded ANN index
//! the spec names; swapping in a real index only changes `search`'s
//! internals, not its contract.

use std::collections::HashMap;
use uuid::Uuid;

pub struct VectorIndex {
    vectors: HashMap<Uuid, Vec<f32>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self {
            vectors: HashMap::new(),
        }
    }

    pub fn insert(&mut self, embedding_id: Uuid, vector: Vec<f32>) {
        self.vectors.insert(embedding_id, vector);
    }

    pub fn remove(&mut self, embedding_id: Uuid) -> bool {
        self.vectors.remove(&embedding_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Top-k nearest by cosine similarity, optionally restricted to a
    /// document filter (caller supplies the allowed embedding ids) and an
    /// optional similarity threshold.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        allowed: Option<&[Uuid]>,
        threshold: Option<f32>,
    ) -> Vec<(Uuid, f32)> {
        let allowed_set: Option<std::collections::HashSet<Uuid>> =
            allowed.map(|ids| ids.iter().copied().collect());

        let mut scores: Vec<(Uuid, f32)> = self
            .vectors
            .iter()
            .filter(|(id, _)| allowed_set.as_ref().map_or(true, |set| set.contains(id)))
            .filter_map(|(id, vec)| cosine_similarity(query, vec).map(|score| (*id, score)))
            .filter(|(_, score)| threshold.map_or(true, |t| *score >= t))
            .collect();

        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scores.truncate(k);
        scores
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }

    Some(dot / (norm_a * norm_b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[test]
    fn search_ranks_by_cosine_similarity() {
        let mut index = VectorIndex::new();
        index.insert(id(1), vec![1.0, 0.0, 0.0]);
        index.insert(id(2), vec![0.0, 1.0, 0.0]);
        index.insert(id(3), vec![0.9, 0.1, 0.0]);

        let results = index.search(&[1.0, 0.0, 0.0], 2, None, None);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, id(1));
        assert_eq!(results[1].0, id(3));
    }

    #[test]
    fn search_respects_document_filter_and_threshold() {
        let mut index = VectorIndex::new();
        index.insert(id(1), vec![1.0, 0.0]);
        index.insert(id(2), vec![-1.0, 0.0]);

        let filtered = index.search(&[1.0, 0.0], 5, Some(&[id(1)]), None);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].0, id(1));

        let thresholded = index.search(&[1.0, 0.0], 5, None, Some(0.5));
        assert_eq!(thresholded.len(), 1);
        assert_eq!(thresholded[0].0, id(1));
    }

    #[test]
    fn remove_drops_a_vector() {
        let mut index = VectorIndex::new();
        index.insert(id(1), vec![1.0]);
        assert!(index.remove(id(1)));
        assert!(!index.remove(id(1)));
        assert!(index.is_empty());
    }
}
