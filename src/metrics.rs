//! Timing histograms and event counters for the translation path.
//! Histograms track p50/p95/p99 for fetch, provider accept, first chunk,
//! stream completion, and cache waits.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// A span measuring elapsed time from creation to explicit end.
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    pub fn new(name: &'static str, registry: Arc<MetricsRegistry>) -> Self {
        Self {
            name,
            start: Instant::now(),
            registry,
        }
    }

    /// End the span, recording elapsed duration in microseconds.
    pub fn finish(self) -> f64 {
        let elapsed_us = self.start.elapsed().as_micros() as f64;
        self.registry.record(self.name, elapsed_us);
        elapsed_us
    }

    /// Elapsed so far without finishing.
    pub fn elapsed_us(&self) -> f64 {
        self.start.elapsed().as_micros() as f64
    }
}

/// Fixed-capacity ring buffer for histogram samples.
struct SampleRing {
    samples: Vec<f64>,
    pos: usize,
    count: usize,
    capacity: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
            pos: 0,
            count: 0,
            capacity,
        }
    }

    fn push(&mut self, value: f64) {
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples[..self.count].to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((p / 100.0) * (self.count as f64 - 1.0)).round() as usize;
        let idx = idx.min(self.count - 1);
        sorted[idx]
    }
}

/// Stores histograms for all named metrics.
pub struct MetricsRegistry {
    histograms: Mutex<HashMap<&'static str, SampleRing>>,
    counters: Mutex<HashMap<&'static str, u64>>,
    ring_capacity: usize,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            histograms: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            ring_capacity: 1024,
        }
    }

    /// Bump an event counter.
    pub fn incr(&self, name: &'static str) {
        *self.counters.lock().entry(name).or_insert(0) += 1;
    }

    pub fn count(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    /// Snapshot of all counters.
    pub fn counters(&self) -> HashMap<String, u64> {
        self.counters
            .lock()
            .iter()
            .map(|(&name, &value)| (name.to_string(), value))
            .collect()
    }

    /// Record a sample (in microseconds) for the named metric.
    pub fn record(&self, name: &'static str, value_us: f64) {
        let mut hists = self.histograms.lock();
        hists
            .entry(name)
            .or_insert_with(|| SampleRing::new(self.ring_capacity))
            .push(value_us);
        tracing::debug!(metric = name, value_us = value_us, "metric_recorded");
    }

    /// Start a timing span that records on finish.
    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan::new(name, Arc::clone(self))
    }

    /// Get percentile for a metric (p value 0-100). Returns microseconds.
    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        let hists = self.histograms.lock();
        hists
            .get(name)
            .map(|ring| ring.percentile(p))
            .unwrap_or(0.0)
    }

    /// Generate a summary of all metrics at p50/p95/p99.
    pub fn summary(&self) -> HashMap<String, MetricSummary> {
        let hists = self.histograms.lock();
        let mut out = HashMap::new();
        for (&name, ring) in hists.iter() {
            out.insert(
                name.to_string(),
                MetricSummary {
                    p50_us: ring.percentile(50.0),
                    p95_us: ring.percentile(95.0),
                    p99_us: ring.percentile(99.0),
                    count: ring.count,
                },
            );
        }
        out
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricSummary {
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub count: usize,
}

/// Well-known metric names (constants to avoid typos).
pub mod metric_names {
    pub const FETCH_DONE: &str = "t_fetch_done";
    pub const PROVIDER_ACCEPTED: &str = "t_provider_accepted";
    pub const STREAM_FIRST_CHUNK: &str = "t_stream_first_chunk";
    pub const STREAM_DONE: &str = "t_stream_done";
    pub const CACHE_WAIT: &str = "t_cache_wait";

    pub const CACHE_HIT: &str = "cache_hit";
    pub const CACHE_ADMITTED: &str = "cache_admitted";
    pub const CACHE_WAIT_REQUIRED: &str = "cache_wait_required";
    pub const CACHE_BYPASS: &str = "cache_bypass";
    pub const PIPELINE_FAILED: &str = "pipeline_failed";
    pub const STREAM_FAILED: &str = "stream_failed";
    pub const PREFETCH_STARTED: &str = "prefetch_started";
    pub const PREFETCH_FAILED: &str = "prefetch_failed";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_recorded_samples() {
        let registry = MetricsRegistry::new();
        for v in 1..=100 {
            registry.record(metric_names::FETCH_DONE, v as f64);
        }
        assert_eq!(registry.percentile(metric_names::FETCH_DONE, 50.0), 51.0);
        assert_eq!(registry.percentile(metric_names::FETCH_DONE, 99.0), 99.0);
        assert_eq!(registry.percentile("unknown", 50.0), 0.0);

        let summary = registry.summary();
        assert_eq!(summary[metric_names::FETCH_DONE].count, 100);
    }

    #[test]
    fn ring_keeps_only_latest_samples() {
        let mut ring = SampleRing::new(4);
        for v in [100.0, 1.0, 2.0, 3.0, 4.0] {
            ring.push(v);
        }
        assert_eq!(ring.count, 4);
        assert_eq!(ring.percentile(100.0), 4.0);
    }

    #[test]
    fn counters_accumulate() {
        let registry = MetricsRegistry::new();
        registry.incr(metric_names::CACHE_HIT);
        registry.incr(metric_names::CACHE_HIT);
        assert_eq!(registry.count(metric_names::CACHE_HIT), 2);
        assert_eq!(registry.count(metric_names::CACHE_ADMITTED), 0);
        assert_eq!(registry.counters()["cache_hit"], 2);
    }

    #[test]
    fn span_records_on_finish() {
        let registry = Arc::new(MetricsRegistry::new());
        let span = registry.span(metric_names::CACHE_WAIT);
        span.finish();
        assert_eq!(registry.summary()[metric_names::CACHE_WAIT].count, 1);
    }
}
