use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct RetrievalMetrics {
    pub total_queries: u64,
    pub rrf_fusions: u64,
    pub latencies: VecDeque<u64>, // microseconds
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionMetrics {
    pub total_extractions: u64,
    pub total_confidence: f32,
}

#[derive(Debug, Clone, Default)]
pub struct ResolutionMetrics {
    pub total_resolutions: u64,
    pub exact_matches: u64,
    pub fuzzy_merges: u64,
    pub ai_merges: u64,
}

pub struct MetricsCollector {
    state: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    retrieval: RetrievalMetrics,
    extraction: ExtractionMetrics,
    resolution: ResolutionMetrics,
    max_history: usize,
}

impl MetricsCollector {
    pub fn new(max_history: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MetricsState {
                retrieval: RetrievalMetrics::default(),
                extraction: ExtractionMetrics::default(),
                resolution: ResolutionMetrics::default(),
                max_history,
            })),
        }
    }

    pub fn record_query(&self, latency_us: u64, used_rrf: bool) {
        let mut state = self.state.lock().unwrap();
        state.retrieval.total_queries += 1;
        if used_rrf {
            state.retrieval.rrf_fusions += 1;
        }
        state.retrieval.latencies.push_back(latency_us);
        if state.retrieval.latencies.len() > state.max_history {
            state.retrieval.latencies.pop_front();
        }
    }

    pub fn record_extraction(&self, avg_confidence: f32) {
        let mut state = self.state.lock().unwrap();
        state.extraction.total_extractions += 1;
        state.extraction.total_confidence += avg_confidence;
    }

    pub fn record_resolution(&self, exact: u64, fuzzy: u64, ai: u64) {
        let mut state = self.state.lock().unwrap();
        state.resolution.total_resolutions += 1;
        state.resolution.exact_matches += exact;
        state.resolution.fuzzy_merges += fuzzy;
        state.resolution.ai_merges += ai;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock().unwrap();
        let r = &state.retrieval;
        let e = &state.extraction;
        let s = &state.resolution;

        let mut sorted_latencies: Vec<u64> = r.latencies.iter().copied().collect();
        sorted_latencies.sort_unstable();

        let p50 = percentile(&sorted_latencies, 50.0);
        let p95 = percentile(&sorted_latencies, 95.0);
        let p99 = percentile(&sorted_latencies, 99.0);

        let avg_extraction_confidence = if e.total_extractions > 0 {
            e.total_confidence / e.total_extractions as f32
        } else {
            0.0
        };

        MetricsSnapshot {
            total_queries: r.total_queries,
            rrf_fusions: r.rrf_fusions,
            p50,
            p95,
            p99,
            history_count: r.latencies.len(),
            avg_extraction_confidence,
            total_resolutions: s.total_resolutions,
            exact_matches: s.exact_matches,
            fuzzy_merges: s.fuzzy_merges,
            ai_merges: s.ai_merges,
        }
    }
}

fn percentile(sorted: &[u64], p: f32) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((p / 100.0) * (sorted.len() as f32)).ceil() as usize;
    sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub total_queries: u64,
    pub rrf_fusions: u64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub history_count: usize,
    pub avg_extraction_confidence: f32,
    pub total_resolutions: u64,
    pub exact_matches: u64,
    pub fuzzy_merges: u64,
    pub ai_merges: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_track_recorded_latencies() {
        let collector = MetricsCollector::new(100);
        for latency in [10, 20, 30, 40, 50] {
            collector.record_query(latency, false);
        }
        let snap = collector.snapshot();
        assert_eq!(snap.total_queries, 5);
        assert_eq!(snap.p50, 30);
    }

    #[test]
    fn history_window_caps_latency_buffer() {
        let collector = MetricsCollector::new(2);
        collector.record_query(1, false);
        collector.record_query(2, false);
        collector.record_query(3, false);
        let snap = collector.snapshot();
        assert_eq!(snap.history_count, 2);
    }
}
