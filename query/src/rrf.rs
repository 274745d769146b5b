//! Reciprocal Rank Fusion (§4.9): combines a BM25-ranked list and a
//! vector-ranked list into one ranking without needing the two scores to
//! live on a common scale.

use std::collections::HashMap;
use uuid::Uuid;

pub const DEFAULT_K: f64 = 60.0;
pub const DEFAULT_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Copy)]
pub struct RrfParams {
    pub k: f64,
    pub weight_bm25: f64,
    pub weight_vector: f64,
}

impl Default for RrfParams {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            weight_bm25: DEFAULT_WEIGHT,
            weight_vector: DEFAULT_WEIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub id: Uuid,
    pub combined_score: f64,
    pub bm25_rank: Option<usize>,
    pub vector_rank: Option<usize>,
}

/// Fuses two independently-ranked lists. Each input is assumed already
/// sorted best-first; rank is assigned 1-based by position. An id absent
/// from a list contributes 0 to that list's term (as if its rank were
/// infinite). Ties in combined score break by first-appearance order
/// across `bm25` then `vector`, which keeps fusion deterministic.
pub fn fuse(bm25: &[(Uuid, f32)], vector: &[(Uuid, f32)], params: RrfParams) -> Vec<FusedHit> {
    let mut bm25_rank: HashMap<Uuid, usize> = HashMap::new();
    let mut order: Vec<Uuid> = Vec::new();
    for (rank, (id, _)) in bm25.iter().enumerate() {
        bm25_rank.entry(*id).or_insert_with(|| {
            order.push(*id);
            rank + 1
        });
    }

    let mut vector_rank: HashMap<Uuid, usize> = HashMap::new();
    for (rank, (id, _)) in vector.iter().enumerate() {
        vector_rank.entry(*id).or_insert_with(|| {
            if !bm25_rank.contains_key(id) {
                order.push(*id);
            }
            rank + 1
        });
    }

    let mut hits: Vec<FusedHit> = order
        .into_iter()
        .map(|id| {
            let br = bm25_rank.get(&id).copied();
            let vr = vector_rank.get(&id).copied();
            let bm25_term = br.map(|r| params.weight_bm25 / (params.k + r as f64)).unwrap_or(0.0);
            let vector_term = vr.map(|r| params.weight_vector / (params.k + r as f64)).unwrap_or(0.0);
            FusedHit {
                id,
                combined_score: bm25_term + vector_term,
                bm25_rank: br,
                vector_rank: vr,
            }
        })
        .collect();

    hits.sort_by(|a, b| b.combined_score.partial_cmp(&a.combined_score).unwrap_or(std::cmp::Ordering::Equal));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[test]
    fn spec_worked_example_ties_break_by_first_appearance() {
        let bm25 = vec![(id(1), 3.0), (id(2), 2.0), (id(3), 1.0)];
        let vector = vec![(id(2), 0.9), (id(1), 0.8), (id(4), 0.7)];

        let hits = fuse(&bm25, &vector, RrfParams::default());
        let top2: Vec<Uuid> = hits.iter().take(2).map(|h| h.id).collect();
        assert_eq!(top2, vec![id(1), id(2)]);

        let c = hits.iter().find(|h| h.id == id(3)).unwrap().combined_score;
        let d = hits.iter().find(|h| h.id == id(4)).unwrap().combined_score;
        assert!((c - d).abs() < 1e-12);
    }

    #[test]
    fn dominated_result_never_outranks_dominating_one() {
        let bm25 = vec![(id(1), 5.0), (id(2), 4.0), (id(3), 3.0)];
        let vector = vec![(id(1), 0.9), (id(2), 0.5), (id(3), 0.1)];

        let hits = fuse(&bm25, &vector, RrfParams::default());
        let score = |target: Uuid| hits.iter().find(|h| h.id == target).unwrap().combined_score;
        assert!(score(id(1)) >= score(id(2)));
        assert!(score(id(2)) >= score(id(3)));
    }

    #[test]
    fn id_missing_from_one_side_still_ranks() {
        let bm25 = vec![(id(1), 1.0)];
        let vector: Vec<(Uuid, f32)> = Vec::new();
        let hits = fuse(&bm25, &vector, RrfParams::default());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].vector_rank, None);
    }
}
