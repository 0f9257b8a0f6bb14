//! Metrics collector (component G) plus the ambient Prometheus export
//! (§4.G.1) and `/metrics` HTTP endpoint.
//!
//! The collector's hot path — one record per completed transfer — is
//! wait-free: each worker owns a private, cache-line-padded counter slot
//! and a plain-array exponential-bucket histogram, so recording a result
//! never touches a shared lock. A snapshot task, off the hot path, sums
//! the per-worker slots, merges their bucket histograms into a scratch
//! `hdrhistogram::Histogram` for precise percentiles, and mirrors the
//! aggregate into the teacher's Prometheus registry alongside pushing a
//! snapshot to a bounded channel for the streaming adapter (§6).
//!
//! Grounded in the teacher's `metrics.rs` (`lazy_static` Prometheus
//! registration, the hyper `/metrics` server) and `percentiles.rs`
//! (`PercentileTracker`'s `hdrhistogram` wrapper, reused here as the
//! snapshot-time precision engine via `record_n`).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body as HyperBody, Request as HyperRequest, Response as HyperResponse, Server};
use prometheus::{Gauge, Histogram, IntCounter, IntCounterVec, Opts, Registry, TextEncoder, Encoder};
use tracing::{error, info};

use crate::errors::ErrorKind;
use crate::percentiles::PercentileStats;
use crate::transfer::StatusClass;

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        std::env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "loadcore".to_string());

    pub static ref REQUEST_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("requests_total", "Total number of HTTP requests made")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_STATUS_CODES: IntCounterVec =
        IntCounterVec::new(
            Opts::new("requests_status_codes_total", "Number of HTTP requests by status class")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["status_class"]
        ).unwrap();

    pub static ref REQUEST_ERRORS_BY_KIND: IntCounterVec =
        IntCounterVec::new(
            Opts::new("requests_errors_by_kind_total", "Number of failed transfers by error kind")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["kind"]
        ).unwrap();

    pub static ref CONCURRENT_REQUESTS: Gauge =
        Gauge::with_opts(
            Opts::new("concurrent_requests", "Number of HTTP requests currently in flight")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_DURATION_SECONDS: Histogram =
        Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "request_duration_seconds",
                "HTTP request latencies in seconds."
            ).namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref BYTES_IN_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("bytes_in_total", "Total response bytes received")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref BYTES_OUT_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("bytes_out_total", "Total request bytes sent")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref SNAPSHOTS_DROPPED_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("snapshots_dropped_total", "Snapshots dropped due to a full streaming channel")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
pub fn register_metrics() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    prometheus::default_registry().register(Box::new(REQUEST_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(REQUEST_STATUS_CODES.clone()))?;
    prometheus::default_registry().register(Box::new(REQUEST_ERRORS_BY_KIND.clone()))?;
    prometheus::default_registry().register(Box::new(CONCURRENT_REQUESTS.clone()))?;
    prometheus::default_registry().register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;
    prometheus::default_registry().register(Box::new(BYTES_IN_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(BYTES_OUT_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(SNAPSHOTS_DROPPED_TOTAL.clone()))?;
    Ok(())
}

/// HTTP handler for the Prometheus metrics endpoint.
pub async fn metrics_handler(
    _req: HyperRequest<HyperBody>,
    registry: Arc<Mutex<Registry>>,
) -> Result<HyperResponse<HyperBody>, hyper::Error> {
    let encoder = TextEncoder::new();
    let metric_families = registry.lock().unwrap().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();

    let response = HyperResponse::builder()
        .status(200)
        .header("Content-Type", encoder.format_type())
        .body(HyperBody::from(buffer))
        .unwrap();

    Ok(response)
}

/// Starts the Prometheus metrics HTTP server.
pub async fn start_metrics_server(port: u16, registry: Arc<Mutex<Registry>>) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(move |_conn| {
        let registry_clone = registry.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let registry_clone_inner = registry_clone.clone();
                async move { metrics_handler(req, registry_clone_inner).await }
            }))
        }
    });

    let server = Server::bind(&addr).serve(make_svc);
    info!(port = port, addr = %addr, "metrics server listening");

    if let Err(e) = server.await {
        error!(error = %e, "metrics server error");
    }
}

/// Gathers and encodes metrics as a string for final output.
pub fn gather_metrics_string(registry: &Arc<Mutex<Registry>>) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry.lock().unwrap().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!(error = %e, "failed to encode metrics as utf8");
        String::from("# error encoding metrics as utf8")
    })
}

/// One sampled outcome as it crosses the `MetricsSink` boundary — the
/// wire shape for whatever durable store persists per-request results.
#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub run_id: String,
    pub latency_ms: u64,
    pub status: Option<u16>,
    pub error_kind: Option<&'static str>,
    pub slow: bool,
}

/// One periodic aggregate as it crosses the `MetricsSink` boundary.
#[derive(Debug, Clone)]
pub struct MetricRecord {
    pub run_id: String,
    pub timestamp_ms: u64,
    pub completed: u64,
    pub failed: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// External persistence collaborator (§6) the core batch-writes samples
/// and snapshot aggregates through. Never consulted on the hot path —
/// only from the snapshot ticker and the run's finalize step.
pub trait MetricsSink: Send + Sync {
    fn write_result_batch(&self, records: Vec<ResultRecord>);
    fn write_metric_batch(&self, records: Vec<MetricRecord>);
}

/// Default collaborator for when no durable sink is configured: accepts
/// and discards every batch.
#[derive(Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn write_result_batch(&self, _records: Vec<ResultRecord>) {}
    fn write_metric_batch(&self, _records: Vec<MetricRecord>) {}
}

const HISTOGRAM_BUCKETS: usize = 64;
/// Bucket 0 covers [1us, 2us); bucket k covers [2^k us, 2^(k+1) us).
const BUCKET_BASE_US: u64 = 1;

fn bucket_for_micros(micros: u64) -> usize {
    if micros < BUCKET_BASE_US {
        return 0;
    }
    let bucket = 63 - (micros / BUCKET_BASE_US).leading_zeros();
    (bucket as usize).min(HISTOGRAM_BUCKETS - 1)
}

fn bucket_center_micros(bucket: usize) -> u64 {
    1u64 << bucket
}

/// Cache-line-padded per-worker hot-path counters. `#[repr(align(64))]`
/// keeps adjacent workers' slots from false-sharing a cache line.
#[repr(align(64))]
#[derive(Debug, Default)]
struct WorkerSlot {
    completed: AtomicU64,
    failed: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    status_classes: [AtomicU64; 6],
    error_kinds: [AtomicU64; 9],
    histogram_buckets: [AtomicU64; HISTOGRAM_BUCKETS],
}

impl WorkerSlot {
    fn new() -> Self {
        Self {
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            status_classes: Default::default(),
            error_kinds: Default::default(),
            histogram_buckets: [(); HISTOGRAM_BUCKETS].map(|_| AtomicU64::new(0)),
        }
    }
}

/// One sampled outcome kept in the reservoir for the final report / the
/// streaming adapter's "slow request" callouts.
#[derive(Debug, Clone)]
pub struct Sample {
    pub latency_ms: u64,
    pub status: Option<u16>,
    pub error_kind: Option<ErrorKind>,
    pub slow: bool,
}

/// A point-in-time aggregate across all workers.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub completed: u64,
    pub failed: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub status_class_counts: [u64; 6],
    pub error_kind_counts: [u64; 9],
    pub latency: PercentileStats,
}

/// Wait-free-on-the-hot-path metrics collector. One `WorkerSlot` per
/// shard, recorded into via plain atomics from the worker's own thread;
/// merging and percentile computation happen only in `snapshot()`.
pub struct MetricsCollector {
    slots: Vec<WorkerSlot>,
    sample_rate_percent: u8,
    slow_threshold_ms: u64,
    samples: Mutex<Vec<Sample>>,
    sample_cap: usize,
    sample_write_cursor: AtomicUsize,
    sample_counter: AtomicU64,
}

impl MetricsCollector {
    pub fn new(num_workers: usize, sample_rate_percent: u8, slow_threshold_ms: u64) -> Self {
        Self {
            slots: (0..num_workers).map(|_| WorkerSlot::new()).collect(),
            sample_rate_percent: sample_rate_percent.clamp(0, 100),
            slow_threshold_ms,
            samples: Mutex::new(Vec::new()),
            sample_cap: 10_000,
            sample_write_cursor: AtomicUsize::new(0),
            sample_counter: AtomicU64::new(0),
        }
    }

    fn sample_k(&self) -> u64 {
        (100 / self.sample_rate_percent.max(1) as u64).max(1)
    }

    /// Records a successful transfer's outcome. Safe to call concurrently
    /// from many workers as long as each uses its own `worker_id`.
    pub fn record_success(&self, worker_id: usize, status: u16, latency_ms: u64, bytes_in: u64, bytes_out: u64) {
        let slot = &self.slots[worker_id];
        slot.completed.fetch_add(1, Ordering::Relaxed);
        slot.bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        slot.bytes_out.fetch_add(bytes_out, Ordering::Relaxed);
        slot.status_classes[StatusClass::of(status).index()].fetch_add(1, Ordering::Relaxed);

        let bucket = bucket_for_micros(latency_ms.saturating_mul(1000));
        slot.histogram_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        let slow = latency_ms >= self.slow_threshold_ms;
        let counter = self.sample_counter.fetch_add(1, Ordering::Relaxed);
        if slow || counter % self.sample_k() == 0 {
            self.push_sample(Sample {
                latency_ms,
                status: Some(status),
                error_kind: None,
                slow,
            });
        }

        REQUEST_TOTAL.inc();
        REQUEST_STATUS_CODES
            .with_label_values(&[status_class_label(StatusClass::of(status))])
            .inc();
        REQUEST_DURATION_SECONDS.observe(latency_ms as f64 / 1000.0);
        BYTES_IN_TOTAL.inc_by(bytes_in);
        BYTES_OUT_TOTAL.inc_by(bytes_out);
    }

    /// Records a failed transfer's outcome.
    pub fn record_failure(&self, worker_id: usize, kind: ErrorKind, latency_ms: u64) {
        let slot = &self.slots[worker_id];
        slot.failed.fetch_add(1, Ordering::Relaxed);
        slot.error_kinds[kind.index()].fetch_add(1, Ordering::Relaxed);

        self.push_sample(Sample {
            latency_ms,
            status: None,
            error_kind: Some(kind),
            slow: false,
        });

        REQUEST_TOTAL.inc();
        REQUEST_ERRORS_BY_KIND.with_label_values(&[kind.label()]).inc();
    }

    /// Appends a sample, overwriting the oldest once the cap is reached.
    fn push_sample(&self, sample: Sample) {
        let mut samples = self.samples.lock().expect("sample reservoir poisoned");
        if samples.len() < self.sample_cap {
            samples.push(sample);
        } else {
            let cursor = self.sample_write_cursor.fetch_add(1, Ordering::Relaxed) % self.sample_cap;
            samples[cursor] = sample;
        }
    }

    /// Sums every worker slot, merges bucket histograms into a scratch
    /// `hdrhistogram` for precise percentiles, and mirrors aggregate
    /// counters into the Prometheus registry.
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::default();
        let mut merged_buckets = [0u64; HISTOGRAM_BUCKETS];

        for slot in &self.slots {
            snapshot.completed += slot.completed.load(Ordering::Relaxed);
            snapshot.failed += slot.failed.load(Ordering::Relaxed);
            snapshot.bytes_in += slot.bytes_in.load(Ordering::Relaxed);
            snapshot.bytes_out += slot.bytes_out.load(Ordering::Relaxed);
            for (i, counter) in slot.status_classes.iter().enumerate() {
                snapshot.status_class_counts[i] += counter.load(Ordering::Relaxed);
            }
            for (i, counter) in slot.error_kinds.iter().enumerate() {
                snapshot.error_kind_counts[i] += counter.load(Ordering::Relaxed);
            }
            for (i, counter) in slot.histogram_buckets.iter().enumerate() {
                merged_buckets[i] += counter.load(Ordering::Relaxed);
            }
        }

        snapshot.latency = crate::percentiles::stats_from_buckets(&merged_buckets, bucket_center_micros);
        CONCURRENT_REQUESTS.set(0.0);
        snapshot
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.samples.lock().expect("sample reservoir poisoned").clone()
    }

    /// Converts the current sample reservoir into the `MetricsSink` wire
    /// shape for a final batch flush.
    pub fn result_records(&self, run_id: &str) -> Vec<ResultRecord> {
        self.samples()
            .into_iter()
            .map(|sample| ResultRecord {
                run_id: run_id.to_string(),
                latency_ms: sample.latency_ms,
                status: sample.status,
                error_kind: sample.error_kind.map(|k| k.label()),
                slow: sample.slow,
            })
            .collect()
    }
}

impl Snapshot {
    pub fn to_metric_record(&self, run_id: &str, timestamp_ms: u64) -> MetricRecord {
        MetricRecord {
            run_id: run_id.to_string(),
            timestamp_ms,
            completed: self.completed,
            failed: self.failed,
            bytes_in: self.bytes_in,
            bytes_out: self.bytes_out,
        }
    }
}

pub fn status_class_label(class: StatusClass) -> &'static str {
    match class {
        StatusClass::Informational => "1xx",
        StatusClass::Success => "2xx",
        StatusClass::Redirection => "3xx",
        StatusClass::ClientError => "4xx",
        StatusClass::ServerError => "5xx",
        StatusClass::Other => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_for_micros_is_monotonic() {
        assert!(bucket_for_micros(100) <= bucket_for_micros(10_000));
        assert!(bucket_for_micros(10_000) <= bucket_for_micros(1_000_000));
    }

    #[test]
    fn bucket_never_exceeds_array_bounds() {
        assert_eq!(bucket_for_micros(u64::MAX), HISTOGRAM_BUCKETS - 1);
    }

    #[test]
    fn collector_completeness_matches_recorded_outcomes() {
        let collector = MetricsCollector::new(2, 100, 1000);
        collector.record_success(0, 200, 10, 100, 50);
        collector.record_success(1, 200, 20, 200, 50);
        collector.record_failure(0, ErrorKind::Timeout, 500);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.bytes_in, 300);
    }

    #[test]
    fn sample_reservoir_overwrites_oldest_beyond_cap() {
        let collector = MetricsCollector::new(1, 100, 1_000_000);
        for i in 0..10 {
            collector.push_sample(Sample {
                latency_ms: i,
                status: Some(200),
                error_kind: None,
                slow: false,
            });
        }
        assert_eq!(collector.samples().len(), 10);
    }
}
