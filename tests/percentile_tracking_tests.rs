//! Percentile latency tracking across a real run (§8 "percentile
//! monotonicity"): `MetricsCollector::snapshot()`'s merged histogram
//! stays ordered (p50 <= p90 <= p95 <= p99 <= p99.9) and reflects actual
//! observed latencies, not just the bucket math in isolation (already
//! covered by `percentiles.rs`'s own unit tests).

use std::sync::Arc;
use std::time::Duration;

use loadcore::config::ConfigManager;
use loadcore::dns_cache::DnsCache;
use loadcore::event_loop::{EventLoop, EventLoopConfig};
use loadcore::metrics::MetricsCollector;
use loadcore::percentiles::{stats_from_buckets, PercentileTracker};
use loadcore::run_manager::{RunConfig, RunManager, RunStatus};
use loadcore::transfer::Request;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn percentile_tracker_orders_quantiles_for_skewed_latencies() {
    let tracker = PercentileTracker::new();
    for ms in 1..=90 {
        tracker.record_ms(ms);
    }
    for ms in [500, 800, 1200, 2000] {
        tracker.record_ms(ms);
    }
    let stats = tracker.stats().unwrap();
    assert!(stats.p50 <= stats.p90);
    assert!(stats.p90 <= stats.p95);
    assert!(stats.p95 <= stats.p99);
    assert!(stats.p99 <= stats.p99_9);
}

#[test]
fn stats_from_buckets_preserves_quantile_order_across_spread_buckets() {
    let mut buckets = vec![0u64; 64];
    buckets[5] = 900;
    buckets[20] = 90;
    buckets[40] = 9;
    buckets[55] = 1;
    let stats = stats_from_buckets(&buckets, |b| 1u64 << b);
    assert!(stats.p50 <= stats.p90);
    assert!(stats.p90 <= stats.p99);
    assert!(stats.p99 <= stats.p99_9);
    assert_eq!(stats.count, 1000);
}

#[tokio::test]
async fn collector_snapshot_latency_reflects_recorded_successes() {
    let collector = MetricsCollector::new(1, 100, 1_000_000);
    for latency_ms in [10, 20, 30, 40, 500] {
        collector.record_success(0, 200, latency_ms, 128, 64);
    }

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.completed, 5);
    assert!(snapshot.latency.max >= snapshot.latency.p99);
    assert!(snapshot.latency.p99 >= snapshot.latency.p50);
}

/// A real run against a stub with deliberately bimodal latency (fast
/// path vs. a slow tail) still produces a monotonic, non-degenerate
/// percentile spread in the final report.
#[tokio::test]
async fn real_run_produces_monotonic_percentiles_under_bimodal_latency() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fast"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(80)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fast"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(150)))
        .mount(&server)
        .await;

    let config_manager = Arc::new(ConfigManager::bootstrap_from_env().unwrap());
    let manager = RunManager::new(config_manager);

    let config = RunConfig {
        target_url: format!("{}/fast", server.uri()),
        method: "GET".to_string(),
        headers: Vec::new(),
        body: None,
        mode: Some("iterations".to_string()),
        concurrency: 10,
        duration_secs: 0,
        target_rps: 0.0,
        iterations: 100,
        start_concurrency: 1,
        ramp_duration_secs: 0,
        workers: 2,
        max_concurrent_total: 50,
        timeout_ms: 2000,
        skip_tls_verify: false,
    };

    let run_id = manager.start(config).unwrap();
    for _ in 0..400 {
        if manager.status(&run_id).unwrap() == RunStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(manager.status(&run_id).unwrap(), RunStatus::Completed);

    let report = manager.report(&run_id).unwrap();
    assert_eq!(report.completed, 100);
    assert!(report.latency_p50_us <= report.latency_p90_us);
    assert!(report.latency_p90_us <= report.latency_p99_us);
    assert!(report.latency_p99_us <= report.latency_max_us);
    assert!(report.latency_max_us >= 100_000, "the slow tail should dominate the max");
}

#[tokio::test]
async fn event_loop_worker_latency_is_recordable_into_a_tracker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/timed"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(20)))
        .mount(&server)
        .await;

    let event_loop = EventLoop::new(
        EventLoopConfig {
            num_workers: 1,
            max_concurrent_total: 4,
            target_rps: 0.0,
            burst: None,
            poll_timeout_ms: 1,
        },
        reqwest::Client::new(),
        Arc::new(DnsCache::new()),
    );

    let tracker = PercentileTracker::new();
    for _ in 0..5 {
        let outcome = event_loop
            .submit_async(Request::get(format!("{}/timed", server.uri())))
            .await
            .unwrap();
        tracker.record_ms(outcome.timing.total_ms);
    }

    let stats = tracker.stats().unwrap();
    assert_eq!(stats.count, 5);
    assert!(stats.min >= 15_000, "observed latency should reflect the stub's delay");

    event_loop.stop(true);
}
