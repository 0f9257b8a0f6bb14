//! Run manager (component I): owns a run's lifecycle from submission to
//! final report, wiring the event loop, metrics collector and optional
//! script runner together behind the `EventLoop`/`LoadDispatcher` seam.
//!
//! A run moves through `Pending -> Running -> (Completed | Stopped |
//! Failed)`. The driver task spawned by `start` owns that transition
//! exclusively — `stop` only raises a cooperative flag and returns
//! immediately, the same "ask, don't force" shutdown the teacher's
//! workers already use for their own stop path (`worker.rs::stop`).
//!
//! Grounded in the teacher's `main.rs` run loop (the thing that actually
//! drove requests, recorded metrics and tore down the client) reshaped
//! into a long-lived, multi-run-capable manager instead of a single
//! process-lifetime loop — this is the "clone-of-handle pattern" the
//! design notes call for: `RunDispatcher` wraps `EventLoop` and forwards
//! every completion to the run's own `MetricsCollector` and, if present,
//! `ScriptRunner`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::client::{build_client, dns_overrides_from_cache, ClientConfig};
use crate::config::ConfigManager;
use crate::config_validation::{HttpMethodValidator, RangeValidator, UrlValidator, ValidationError};
use crate::dns_cache::DnsCache;
use crate::errors::ErrorKind;
use crate::event_loop::{EventLoop, EventLoopConfig};
use crate::load_strategy::{drive, DriveStats, LoadDispatcher, LoadStrategy};
use crate::metrics::{status_class_label, MetricsCollector, MetricsSink, NoopMetricsSink, Snapshot};
use crate::percentiles::PercentileStats;
use crate::script::{ScriptContext, ScriptRunner};
use crate::transfer::{extract_host_port, parse_method, Body, Request, StatusClass, TransferOutcome};

fn default_method() -> String {
    "GET".to_string()
}

fn default_concurrency() -> u32 {
    10
}

fn default_max_concurrent_total() -> usize {
    1000
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// Decoded `POST /runs` body: everything needed to build a request
/// template and pick a `LoadStrategy` (§4.H) for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub target_url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<String>,
    /// One of "constant_concurrency", "constant_rps", "iterations",
    /// "ramp_up"; unrecognized or absent falls back to
    /// `ConstantConcurrency` per `LoadStrategy::from_mode`.
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
    #[serde(default)]
    pub duration_secs: u64,
    #[serde(default)]
    pub target_rps: f64,
    #[serde(default)]
    pub iterations: u64,
    #[serde(default)]
    pub start_concurrency: u32,
    #[serde(default)]
    pub ramp_duration_secs: u64,
    /// 0 = auto (`EventLoopConfig::resolved_num_workers`).
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_max_concurrent_total")]
    pub max_concurrent_total: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub skip_tls_verify: bool,
}

impl RunConfig {
    /// Validates the request, returning the first failure encountered.
    /// Mirrors the teacher's "reject bad config before touching the
    /// network" posture from `config_validation.rs`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        UrlValidator::validate(&self.target_url)?;
        HttpMethodValidator::validate(&self.method)?;
        RangeValidator::validate_positive_u64(self.concurrency as u64, "concurrency")?;

        match self.mode.as_deref() {
            Some("iterations") => {
                RangeValidator::validate_positive_u64(self.iterations, "iterations")?;
            }
            _ => {
                if self.duration_secs == 0 {
                    return Err(ValidationError::FieldError {
                        field: "duration_secs".to_string(),
                        message: "duration_secs must be greater than 0 for this load strategy".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn to_strategy(&self) -> LoadStrategy {
        LoadStrategy::from_mode(
            self.mode.as_deref(),
            if self.iterations > 0 { Some(self.iterations) } else { None },
            self.concurrency,
            Duration::from_secs(self.duration_secs),
            self.target_rps,
            self.iterations,
            self.start_concurrency,
            Duration::from_secs(self.ramp_duration_secs),
        )
    }

    fn to_request_template(&self) -> Result<Request, ValidationError> {
        let method = parse_method(&self.method).ok_or_else(|| ValidationError::InvalidEnum {
            field: "method".to_string(),
            value: self.method.clone(),
            expected: "GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS".to_string(),
        })?;

        let mut request = Request::get(self.target_url.clone());
        request.method = method;
        for (name, value) in &self.headers {
            request.headers.insert(name.clone(), value.clone());
        }
        if let Some(body) = &self.body {
            request.body = Body::Raw(body.clone().into_bytes());
        }
        request.timeout = Duration::from_millis(self.timeout_ms);
        request.verify_tls = !self.skip_tls_verify;
        Ok(request)
    }
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("run configuration invalid: {0}")]
    InvalidConfig(#[from] ValidationError),
    #[error("failed to build HTTP client: {0}")]
    ClientBuildFailed(String),
    #[error("run not found: {0}")]
    NotFound(String),
}

/// A run's closed set of lifecycle states (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Stopped,
    Failed,
}

/// Final (or in-progress, if polled before completion) accounting for a
/// run, computed from a `MetricsCollector` snapshot. Latency fields are
/// in microseconds, matching `PercentileStats`'s native unit.
#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    pub run_id: String,
    pub status: RunStatus,
    pub elapsed_ms: u64,
    pub requests_sent: u64,
    pub completed: u64,
    pub failed: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub throughput_rps: f64,
    pub status_code_histogram: HashMap<String, u64>,
    pub error_histogram: HashMap<String, u64>,
    pub latency_count: u64,
    pub latency_min_us: u64,
    pub latency_max_us: u64,
    pub latency_mean_us: f64,
    pub latency_p50_us: u64,
    pub latency_p90_us: u64,
    pub latency_p95_us: u64,
    pub latency_p99_us: u64,
    pub latency_p99_9_us: u64,
}

fn build_report(
    run_id: &str,
    status: RunStatus,
    elapsed: Duration,
    expected_total: Option<u64>,
    sent: u64,
    snapshot: &Snapshot,
) -> FinalReport {
    let mut status_code_histogram = HashMap::new();
    for class in [
        StatusClass::Informational,
        StatusClass::Success,
        StatusClass::Redirection,
        StatusClass::ClientError,
        StatusClass::ServerError,
        StatusClass::Other,
    ] {
        let count = snapshot.status_class_counts[class.index()];
        if count > 0 {
            status_code_histogram.insert(status_class_label(class).to_string(), count);
        }
    }

    let mut error_histogram = HashMap::new();
    for kind in ErrorKind::all() {
        let count = snapshot.error_kind_counts[kind.index()];
        if count > 0 {
            error_histogram.insert(kind.label().to_string(), count);
        }
    }

    let elapsed_secs = elapsed.as_secs_f64().max(f64::EPSILON);
    let latency = &snapshot.latency;

    FinalReport {
        run_id: run_id.to_string(),
        status,
        elapsed_ms: elapsed.as_millis() as u64,
        requests_sent: expected_total.unwrap_or(sent).max(sent),
        completed: snapshot.completed,
        failed: snapshot.failed,
        bytes_in: snapshot.bytes_in,
        bytes_out: snapshot.bytes_out,
        throughput_rps: (snapshot.completed + snapshot.failed) as f64 / elapsed_secs,
        status_code_histogram,
        error_histogram,
        latency_count: latency.count,
        latency_min_us: latency.min,
        latency_max_us: latency.max,
        latency_mean_us: latency.mean,
        latency_p50_us: latency.p50,
        latency_p90_us: latency.p90,
        latency_p95_us: latency.p95,
        latency_p99_us: latency.p99,
        latency_p99_9_us: latency.p99_9,
    }
}

/// Event pushed to `GET /runs/{id}/stream` subscribers (§6.1): either a
/// periodic progress tick or the terminal report.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Progress {
        status: RunStatus,
        elapsed_ms: u64,
        completed: u64,
        failed: u64,
        active: usize,
        pending: usize,
    },
    Finished {
        report: FinalReport,
    },
}

/// Live state for one run. Holds everything that must outlive the
/// driver task: the dispatcher's dependencies, the stop flag, the
/// broadcast channel for streaming, and (once finished) the frozen
/// report.
struct RunContext {
    run_id: String,
    status: Mutex<RunStatus>,
    started_at: Instant,
    event_loop: Arc<EventLoop>,
    metrics: Arc<MetricsCollector>,
    should_stop: Arc<AtomicBool>,
    events: broadcast::Sender<StreamEvent>,
    final_report: Mutex<Option<FinalReport>>,
    expected_total: Option<u64>,
}

/// `LoadDispatcher` implementation the strategy drive loop submits
/// through for a given run: wraps the sharded `EventLoop`, forwards
/// every completion into the run's `MetricsCollector`, and — if a
/// script runner is configured — calls its `prepare`/`post` hooks
/// around the transfer.
struct RunDispatcher {
    event_loop: Arc<EventLoop>,
    metrics: Arc<MetricsCollector>,
    metrics_worker_rr: AtomicUsize,
    metrics_slot_count: usize,
    script_runner: Option<Arc<dyn ScriptRunner>>,
    run_id: String,
    submission_counter: AtomicU64,
}

impl RunDispatcher {
    fn next_metrics_slot(&self) -> usize {
        self.metrics_worker_rr.fetch_add(1, Ordering::Relaxed) % self.metrics_slot_count
    }
}

fn request_body_len(request: &Request) -> u64 {
    match &request.body {
        Body::None => 0,
        Body::Raw(bytes) => bytes.len() as u64,
        Body::Form(pairs) => pairs.iter().map(|(k, v)| (k.len() + v.len() + 2) as u64).sum(),
    }
}

impl LoadDispatcher for RunDispatcher {
    fn pending_count(&self) -> usize {
        self.event_loop.pending_count()
    }

    fn submit(&self, request: Request) {
        let submission_id = self.submission_counter.fetch_add(1, Ordering::Relaxed);

        let request = match &self.script_runner {
            Some(runner) => {
                let context = ScriptContext {
                    run_id: self.run_id.clone(),
                    submission_id,
                };
                match runner.prepare(request, &context) {
                    Ok(prepared) => prepared,
                    Err(err) => {
                        let slot = self.next_metrics_slot();
                        self.metrics.record_failure(slot, err.kind, 0);
                        return;
                    }
                }
            }
            None => request,
        };

        let bytes_out = request_body_len(&request);
        let slot = self.next_metrics_slot();
        let metrics = self.metrics.clone();
        let script_runner = self.script_runner.clone();
        let run_id = self.run_id.clone();

        self.event_loop.submit(request, move |outcome: TransferOutcome| match outcome {
            Ok(response) => {
                let latency_ms = response.timing.total_ms;
                let bytes_in = response.body_len as u64;
                metrics.record_success(slot, response.status, latency_ms, bytes_in, bytes_out);

                if let Some(runner) = &script_runner {
                    let context = ScriptContext { run_id, submission_id };
                    if let Err(err) = runner.post(&response, &context) {
                        warn!(run_id = %context.run_id, error = %err, "post-response script failed");
                    }
                }
            }
            Err(err) => {
                metrics.record_failure(slot, err.kind, 0);
            }
        });
    }
}

/// Owns every active and recently-completed run. One instance lives for
/// the process lifetime, shared behind an `Arc` with the control-plane
/// router (§6.1).
pub struct RunManager {
    runs: Mutex<HashMap<String, Arc<RunContext>>>,
    config: Arc<ConfigManager>,
    metrics_sink: Arc<dyn MetricsSink>,
    script_runner: Option<Arc<dyn ScriptRunner>>,
    next_run_id: AtomicU64,
}

impl RunManager {
    pub fn new(config: Arc<ConfigManager>) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            config,
            metrics_sink: Arc::new(NoopMetricsSink),
            script_runner: None,
            next_run_id: AtomicU64::new(1),
        }
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = sink;
        self
    }

    pub fn with_script_runner(mut self, runner: Arc<dyn ScriptRunner>) -> Self {
        self.script_runner = Some(runner);
        self
    }

    fn generate_run_id(&self) -> String {
        let n = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        format!("run-{n}")
    }

    fn get_context(&self, run_id: &str) -> Result<Arc<RunContext>, RunError> {
        self.runs
            .lock()
            .expect("run table lock poisoned")
            .get(run_id)
            .cloned()
            .ok_or_else(|| RunError::NotFound(run_id.to_string()))
    }

    /// Validates `config`, provisions a client/event-loop/metrics
    /// collector for the run, and hands off to a background task that
    /// drives the chosen `LoadStrategy` to completion. Returns
    /// immediately with the assigned run id.
    pub fn start(&self, config: RunConfig) -> Result<String, RunError> {
        config.validate()?;

        let run_id = self.generate_run_id();
        let request_template = config.to_request_template()?;
        let strategy = config.to_strategy();
        let expected_total = strategy.expected_requests();

        let event_loop_config = EventLoopConfig {
            num_workers: config.workers,
            max_concurrent_total: config.max_concurrent_total,
            target_rps: config.target_rps,
            burst: None,
            poll_timeout_ms: 1,
        };
        let num_workers = event_loop_config.resolved_num_workers();

        // Resolve the run's target host once, up front, and bake it into
        // the client as a DNS override (§4.B's "resolve once" rationale) —
        // reqwest's resolver override is a builder-time setting, so this
        // has to happen before `build_client`, not per transfer.
        let dns_cache = Arc::new(DnsCache::new());
        let target_hosts: Vec<(String, u16)> = extract_host_port(&request_template.url).into_iter().collect();
        let dns_overrides = dns_overrides_from_cache(&dns_cache, &target_hosts);

        let client_config = ClientConfig {
            skip_tls_verify: config.skip_tls_verify || !request_template.verify_tls,
            connect_timeout: Some(Duration::from_millis(config.timeout_ms)),
            dns_overrides,
            follow_redirects: request_template.follow_redirects,
            max_redirects: request_template.max_redirects,
            ..ClientConfig::default()
        };
        let build_result =
            build_client(&client_config).map_err(|e| RunError::ClientBuildFailed(e.to_string()))?;

        let event_loop = Arc::new(EventLoop::new(event_loop_config, build_result.client, dns_cache));

        let sample_rate = self.config.get_int("successSampleRate", 100).clamp(0, 100) as u8;
        let slow_threshold_ms = self.config.get_int("slowThresholdMs", 1000).max(0) as u64;
        let metrics = Arc::new(MetricsCollector::new(num_workers, sample_rate, slow_threshold_ms));

        let should_stop = Arc::new(AtomicBool::new(false));
        let (events_tx, _events_rx) = broadcast::channel(256);

        let context = Arc::new(RunContext {
            run_id: run_id.clone(),
            status: Mutex::new(RunStatus::Pending),
            started_at: Instant::now(),
            event_loop: event_loop.clone(),
            metrics: metrics.clone(),
            should_stop: should_stop.clone(),
            events: events_tx,
            final_report: Mutex::new(None),
            expected_total,
        });

        self.runs.lock().expect("run table lock poisoned").insert(run_id.clone(), context.clone());

        let dispatcher = Arc::new(RunDispatcher {
            event_loop: event_loop.clone(),
            metrics: metrics.clone(),
            metrics_worker_rr: AtomicUsize::new(0),
            metrics_slot_count: num_workers,
            script_runner: self.script_runner.clone(),
            run_id: run_id.clone(),
            submission_counter: AtomicU64::new(0),
        });

        let stats_interval = Duration::from_millis(self.config.get_int("statsInterval", 250).max(10) as u64);
        let sink = self.metrics_sink.clone();

        info!(run_id = %run_id, num_workers, "run starting");

        tokio::spawn(run_driver(
            context.clone(),
            dispatcher,
            strategy,
            request_template,
            should_stop,
            stats_interval,
            sink,
        ));

        Ok(run_id)
    }

    /// Requests a run stop. Cooperative: the driver task notices the
    /// flag, drains/cancels in-flight work the way `worker.rs` already
    /// does, and finalizes the report itself. Returns before that
    /// finishes — poll `report` or subscribe to `stream` for the
    /// terminal state.
    pub fn stop(&self, run_id: &str) -> Result<(), RunError> {
        let context = self.get_context(run_id)?;
        context.should_stop.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Returns the frozen final report if the run has finished, or a
    /// live snapshot-derived report otherwise.
    pub fn report(&self, run_id: &str) -> Result<FinalReport, RunError> {
        let context = self.get_context(run_id)?;
        if let Some(report) = context.final_report.lock().expect("final report lock poisoned").clone() {
            return Ok(report);
        }
        let status = *context.status.lock().expect("status lock poisoned");
        let snapshot = context.metrics.snapshot();
        let sent = context.event_loop.total_processed() + context.event_loop.pending_count() as u64;
        Ok(build_report(
            run_id,
            status,
            context.started_at.elapsed(),
            context.expected_total,
            sent,
            &snapshot,
        ))
    }

    pub fn status(&self, run_id: &str) -> Result<RunStatus, RunError> {
        let context = self.get_context(run_id)?;
        Ok(*context.status.lock().expect("status lock poisoned"))
    }

    /// Subscribes to this run's progress/finished events (§6.1 SSE
    /// endpoint). Each call gets its own receiver; slow subscribers
    /// drop the oldest buffered events rather than stall the run.
    pub fn subscribe(&self, run_id: &str) -> Result<broadcast::Receiver<StreamEvent>, RunError> {
        let context = self.get_context(run_id)?;
        Ok(context.events.subscribe())
    }
}

/// Drives the run to completion on a dedicated task (§9: "a dedicated
/// driver thread/task per run"): flips status to `Running`, runs the
/// strategy's drive loop alongside a snapshot ticker, then tears down
/// the event loop and finalizes the report exactly once.
async fn run_driver(
    context: Arc<RunContext>,
    dispatcher: Arc<RunDispatcher>,
    strategy: LoadStrategy,
    request_template: Request,
    should_stop: Arc<AtomicBool>,
    stats_interval: Duration,
    sink: Arc<dyn MetricsSink>,
) {
    *context.status.lock().expect("status lock poisoned") = RunStatus::Running;

    let ticker_context = context.clone();
    let ticker_sink = sink.clone();
    let ticker = tokio::spawn(async move {
        run_snapshot_ticker(ticker_context, ticker_sink, stats_interval).await;
    });

    let stats: DriveStats = drive(&strategy, &*dispatcher, &should_stop, move || request_template.clone()).await;

    context.event_loop.stop(true);
    ticker.abort();

    finalize(&context, &sink, stats).await;
}

/// Periodically snapshots the collector and broadcasts a `Progress`
/// event plus a `MetricRecord` batch to the metrics sink, bounded-retry
/// per §7's "log and continue" policy for a sink that's down.
async fn run_snapshot_ticker(context: Arc<RunContext>, sink: Arc<dyn MetricsSink>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;

        let snapshot = context.metrics.snapshot();
        let status = *context.status.lock().expect("status lock poisoned");
        let elapsed_ms = context.started_at.elapsed().as_millis() as u64;

        let _ = context.events.send(StreamEvent::Progress {
            status,
            elapsed_ms,
            completed: snapshot.completed,
            failed: snapshot.failed,
            active: context.event_loop.active_count(),
            pending: context.event_loop.pending_count(),
        });

        sink.write_metric_batch(vec![snapshot.to_metric_record(&context.run_id, elapsed_ms)]);
    }
}

/// Runs exactly once per run, after the driver and event loop have both
/// stopped: freezes the final report, flushes the sample reservoir
/// through the metrics sink, and broadcasts the terminal event.
async fn finalize(context: &Arc<RunContext>, sink: &Arc<dyn MetricsSink>, stats: DriveStats) {
    let was_stopped = context.should_stop.load(Ordering::SeqCst);
    let status = if was_stopped { RunStatus::Stopped } else { RunStatus::Completed };
    *context.status.lock().expect("status lock poisoned") = status;

    let snapshot = context.metrics.snapshot();
    let report = build_report(
        &context.run_id,
        status,
        context.started_at.elapsed(),
        context.expected_total,
        stats.sent,
        &snapshot,
    );

    sink.write_result_batch(context.metrics.result_records(&context.run_id));

    info!(
        run_id = %context.run_id,
        status = ?status,
        completed = report.completed,
        failed = report.failed,
        "run finished"
    );

    *context.final_report.lock().expect("final report lock poisoned") = Some(report.clone());
    let _ = context.events.send(StreamEvent::Finished { report });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(url: &str) -> RunConfig {
        RunConfig {
            target_url: url.to_string(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
            mode: Some("iterations".to_string()),
            concurrency: 2,
            duration_secs: 0,
            target_rps: 0.0,
            iterations: 5,
            start_concurrency: 1,
            ramp_duration_secs: 0,
            workers: 1,
            max_concurrent_total: 10,
            timeout_ms: 2000,
            skip_tls_verify: false,
        }
    }

    #[test]
    fn validate_rejects_non_http_url() {
        let config = base_config("not-a-url");
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_duration_for_non_iteration_modes() {
        let mut config = base_config("http://example.test");
        config.mode = Some("constant_concurrency".to_string());
        config.duration_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_iterations_without_duration() {
        let config = base_config("http://example.test");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn to_request_template_carries_headers_and_body() {
        let mut config = base_config("http://example.test/path");
        config.method = "POST".to_string();
        config.headers.push(("X-Test".to_string(), "1".to_string()));
        config.body = Some("payload".to_string());

        let request = config.to_request_template().unwrap();
        assert_eq!(request.url, "http://example.test/path");
        assert_eq!(request.headers.get("x-test"), Some("1"));
        assert!(matches!(request.body, Body::Raw(ref b) if b == b"payload"));
    }

    #[tokio::test]
    async fn start_then_stop_unknown_run_returns_not_found() {
        let config_manager = Arc::new(ConfigManager::bootstrap_from_env().unwrap());
        let manager = RunManager::new(config_manager);
        let result = manager.stop("run-does-not-exist");
        assert!(matches!(result, Err(RunError::NotFound(_))));
    }

    #[tokio::test]
    async fn report_is_not_found_before_start() {
        let config_manager = Arc::new(ConfigManager::bootstrap_from_env().unwrap());
        let manager = RunManager::new(config_manager);
        assert!(manager.report("run-1").is_err());
    }

    #[tokio::test]
    async fn start_runs_an_iterations_strategy_to_completion() {
        let config_manager = Arc::new(ConfigManager::bootstrap_from_env().unwrap());
        let manager = RunManager::new(config_manager);

        let mut config = base_config("http://127.0.0.1:1/unreachable");
        config.iterations = 3;
        config.mode = Some("iterations".to_string());

        let run_id = manager.start(config).unwrap();

        for _ in 0..200 {
            if manager.status(&run_id).unwrap() == RunStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        let status = manager.status(&run_id).unwrap();
        assert_eq!(status, RunStatus::Completed);

        let report = manager.report(&run_id).unwrap();
        assert_eq!(report.completed + report.failed, 3);
    }
}
