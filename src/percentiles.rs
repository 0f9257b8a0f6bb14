//! Percentile latency tracking (component G support).
//!
//! `PercentileTracker` wraps `hdrhistogram` exactly as the teacher's
//! version did, and is still useful standalone (e.g. for ad-hoc timing in
//! tests). The collector's merge path (`stats_from_buckets`) feeds a
//! scratch `hdrhistogram::Histogram` from summed per-worker bucket counts
//! instead of individual samples, which is how a wait-free hot path can
//! still produce hdrhistogram-quality percentiles off of it.
//!
//! The teacher's `MultiLabelPercentileTracker` (per-scenario/per-step LRU
//! cache of trackers) has no counterpart here — scenarios are out of
//! scope — and isn't carried forward.

use hdrhistogram::Histogram;
use std::sync::Mutex;
use tracing::warn;

/// Percentile statistics for a set of latency measurements, all in
/// microseconds unless stated otherwise.
#[derive(Debug, Clone)]
pub struct PercentileStats {
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
    pub p99_9: u64,
}

impl Default for PercentileStats {
    fn default() -> Self {
        Self {
            count: 0,
            min: 0,
            max: 0,
            mean: 0.0,
            p50: 0,
            p90: 0,
            p95: 0,
            p99: 0,
            p99_9: 0,
        }
    }
}

impl PercentileStats {
    pub fn format(&self) -> String {
        format!(
            "count={}, min={:.2}ms, max={:.2}ms, mean={:.2}ms, p50={:.2}ms, p90={:.2}ms, p95={:.2}ms, p99={:.2}ms, p99.9={:.2}ms",
            self.count,
            self.min as f64 / 1000.0,
            self.max as f64 / 1000.0,
            self.mean / 1000.0,
            self.p50 as f64 / 1000.0,
            self.p90 as f64 / 1000.0,
            self.p95 as f64 / 1000.0,
            self.p99 as f64 / 1000.0,
            self.p99_9 as f64 / 1000.0,
        )
    }

    pub fn format_table_row(&self, label: &str) -> String {
        format!(
            "{:<30} {:>8} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2}",
            label,
            self.count,
            self.p50 as f64 / 1000.0,
            self.p90 as f64 / 1000.0,
            self.p95 as f64 / 1000.0,
            self.p99 as f64 / 1000.0,
            self.p99_9 as f64 / 1000.0,
            self.mean / 1000.0,
            self.max as f64 / 1000.0,
        )
    }
}

/// Thread-safe percentile tracker backed by `hdrhistogram`, tracking
/// latencies from 1us to 60s with 3 significant digits.
pub struct PercentileTracker {
    histogram: Mutex<Histogram<u64>>,
}

impl PercentileTracker {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, 60_000_000, 3).expect("failed to create histogram");
        Self {
            histogram: Mutex::new(histogram),
        }
    }

    pub fn record_ms(&self, latency_ms: u64) {
        self.record_us(latency_ms * 1000);
    }

    pub fn record_us(&self, latency_us: u64) {
        let mut hist = self.histogram.lock().expect("histogram lock poisoned");
        let clamped = latency_us.clamp(1, 60_000_000);
        if let Err(e) = hist.record(clamped) {
            warn!(latency_us, error = %e, "failed to record latency in histogram");
        }
    }

    pub fn stats(&self) -> Option<PercentileStats> {
        let hist = self.histogram.lock().expect("histogram lock poisoned");
        if hist.is_empty() {
            return None;
        }
        Some(PercentileStats {
            count: hist.len(),
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            p50: hist.value_at_quantile(0.50),
            p90: hist.value_at_quantile(0.90),
            p95: hist.value_at_quantile(0.95),
            p99: hist.value_at_quantile(0.99),
            p99_9: hist.value_at_quantile(0.999),
        })
    }

    pub fn reset(&self) {
        self.histogram.lock().expect("histogram lock poisoned").clear();
    }
}

impl Default for PercentileTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Merges summed per-bucket counts (from `MetricsCollector`'s per-worker
/// exponential histograms) into a scratch `hdrhistogram` and returns its
/// percentiles. Precision is bounded by bucket width — documented
/// tolerance is plus-or-minus one bucket step, since every sample in a
/// bucket is recorded at its bucket's center value.
pub fn stats_from_buckets(bucket_counts: &[u64], bucket_center_micros: impl Fn(usize) -> u64) -> PercentileStats {
    let mut histogram = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3).expect("failed to create histogram");

    for (bucket, &count) in bucket_counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let center = bucket_center_micros(bucket).clamp(1, 60_000_000);
        if let Err(e) = histogram.record_n(center, count) {
            warn!(bucket, count, error = %e, "failed to merge histogram bucket");
        }
    }

    if histogram.is_empty() {
        return PercentileStats::default();
    }

    PercentileStats {
        count: histogram.len(),
        min: histogram.min(),
        max: histogram.max(),
        mean: histogram.mean(),
        p50: histogram.value_at_quantile(0.50),
        p90: histogram.value_at_quantile(0.90),
        p95: histogram.value_at_quantile(0.95),
        p99: histogram.value_at_quantile(0.99),
        p99_9: histogram.value_at_quantile(0.999),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tracker_has_no_stats() {
        let tracker = PercentileTracker::new();
        assert!(tracker.stats().is_none());
    }

    #[test]
    fn recorded_latencies_produce_percentiles() {
        let tracker = PercentileTracker::new();
        for ms in 1..=100 {
            tracker.record_ms(ms);
        }
        let stats = tracker.stats().unwrap();
        assert_eq!(stats.count, 100);
        assert!(stats.p50 > 0);
        assert!(stats.p99 >= stats.p50);
    }

    #[test]
    fn reset_clears_recorded_samples() {
        let tracker = PercentileTracker::new();
        tracker.record_ms(50);
        tracker.reset();
        assert!(tracker.stats().is_none());
    }

    #[test]
    fn stats_from_buckets_handles_empty_input() {
        let buckets = vec![0u64; 64];
        let stats = stats_from_buckets(&buckets, |b| 1u64 << b);
        assert_eq!(stats.count, 0);
    }

    #[test]
    fn stats_from_buckets_merges_counts_into_percentiles() {
        let mut buckets = vec![0u64; 64];
        buckets[10] = 1000;
        let stats = stats_from_buckets(&buckets, |b| 1u64 << b);
        assert_eq!(stats.count, 1000);
        assert!(stats.p50 > 0);
    }
}
