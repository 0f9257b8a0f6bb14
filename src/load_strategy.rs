//! Load strategies (component H): the four closed load-generation shapes
//! a run can drive, each submitting work through an `EventLoop` shard
//! dispatcher until its own explicit termination condition fires.
//!
//! Grounded in the teacher's `load_models.rs::LoadModel`, whose
//! `calculate_current_rps`/`linear_interpolate`/ramp-thirds math is reused
//! here for `ConstantRps` and `RampUp`; `DailyTraffic` has no counterpart
//! in the spec's four strategies and isn't carried forward. `ramp_up`
//! differs from the teacher's `RampRps` in what it interpolates —
//! concurrency rather than requests-per-second — so its drive loop is new
//! rather than reused outright. The burst-submit/sleep cadence for
//! `ConstantConcurrency`/`Iterations` is original to this expansion (the
//! teacher's `worker.rs::run_worker` drove one task per virtual user
//! rather than batching submissions through a shared dispatcher), built
//! from the `sleep_until`-based pacing idiom that file establishes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::time::sleep;

use crate::transfer::Request;

/// What a strategy submits work through. `EventLoop` implements this;
/// tests use a lightweight stub so the strategy loops can be exercised
/// without a real transport.
pub trait LoadDispatcher {
    fn pending_count(&self) -> usize;
    fn submit(&self, request: Request);
}

/// Linear interpolation shared by `ConstantRps` batch sizing and `RampUp`
/// concurrency sizing.
pub fn linear_interpolate(from: f64, to: f64, elapsed: f64, duration: f64) -> f64 {
    if duration <= 0.0 {
        return to;
    }
    from + (to - from) * (elapsed / duration)
}

/// The four load-generation shapes. Each variant carries exactly the
/// parameters its drive loop needs.
#[derive(Debug, Clone)]
pub enum LoadStrategy {
    ConstantConcurrency {
        concurrency: u32,
        duration: Duration,
    },
    ConstantRps {
        target_rps: f64,
        duration: Duration,
    },
    Iterations {
        count: u64,
        concurrency: u32,
    },
    RampUp {
        start_concurrency: u32,
        concurrency: u32,
        ramp_duration: Duration,
        duration: Duration,
    },
}

impl LoadStrategy {
    /// Parses a `mode` string (case-insensitive) into the strategy shape,
    /// falling back to `ConstantConcurrency` for unknown modes, and to
    /// `Iterations` when a legacy config sets `iterations` without a mode.
    pub fn from_mode(
        mode: Option<&str>,
        legacy_iterations: Option<u64>,
        concurrency: u32,
        duration: Duration,
        target_rps: f64,
        count: u64,
        start_concurrency: u32,
        ramp_duration: Duration,
    ) -> Self {
        match mode.map(|m| m.to_ascii_lowercase()) {
            Some(ref m) if m == "constant_rps" => LoadStrategy::ConstantRps {
                target_rps,
                duration,
            },
            Some(ref m) if m == "iterations" => LoadStrategy::Iterations { count, concurrency },
            Some(ref m) if m == "ramp_up" => LoadStrategy::RampUp {
                start_concurrency,
                concurrency,
                ramp_duration,
                duration,
            },
            Some(ref m) if m == "constant_concurrency" => LoadStrategy::ConstantConcurrency {
                concurrency,
                duration,
            },
            Some(_) | None => {
                if mode.is_none() && legacy_iterations.is_some() {
                    LoadStrategy::Iterations {
                        count: legacy_iterations.unwrap(),
                        concurrency,
                    }
                } else {
                    LoadStrategy::ConstantConcurrency {
                        concurrency,
                        duration,
                    }
                }
            }
        }
    }

    /// Expected submission count, when computable up front (`None` for
    /// strategies whose total depends on observed latency).
    pub fn expected_requests(&self) -> Option<u64> {
        match self {
            LoadStrategy::ConstantConcurrency { .. } => None,
            LoadStrategy::ConstantRps {
                target_rps,
                duration,
            } => Some((target_rps * duration.as_secs_f64()).round() as u64),
            LoadStrategy::Iterations { count, .. } => Some(*count),
            LoadStrategy::RampUp { .. } => None,
        }
    }
}

/// Outcome of a drive loop: how many requests were actually submitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveStats {
    pub sent: u64,
}

/// Runs a strategy's drive loop to completion (or until `should_stop` is
/// set), submitting requests built by `make_request` through `dispatcher`.
/// Lives in its own task per run, per the spec's "dedicated driver thread
/// per run" requirement, realized here as an async task the run manager
/// spawns.
pub async fn drive<D: LoadDispatcher>(
    strategy: &LoadStrategy,
    dispatcher: &D,
    should_stop: &AtomicBool,
    mut make_request: impl FnMut() -> Request,
) -> DriveStats {
    match strategy {
        LoadStrategy::ConstantConcurrency {
            concurrency,
            duration,
        } => drive_constant_concurrency(*concurrency, *duration, dispatcher, should_stop, &mut make_request).await,
        LoadStrategy::ConstantRps {
            target_rps,
            duration,
        } => drive_constant_rps(*target_rps, *duration, dispatcher, should_stop, &mut make_request).await,
        LoadStrategy::Iterations { count, concurrency } => {
            drive_iterations(*count, *concurrency, dispatcher, should_stop, &mut make_request).await
        }
        LoadStrategy::RampUp {
            start_concurrency,
            concurrency,
            ramp_duration,
            duration,
        } => {
            drive_ramp_up(
                *start_concurrency,
                *concurrency,
                *ramp_duration,
                *duration,
                dispatcher,
                should_stop,
                &mut make_request,
            )
            .await
        }
    }
}

async fn drive_constant_concurrency<D: LoadDispatcher>(
    concurrency: u32,
    duration: Duration,
    dispatcher: &D,
    should_stop: &AtomicBool,
    make_request: &mut impl FnMut() -> Request,
) -> DriveStats {
    let start = Instant::now();
    let mut sent = 0u64;

    while start.elapsed() < duration && !should_stop.load(Ordering::Relaxed) {
        if dispatcher.pending_count() > 5 * concurrency as usize {
            sleep(Duration::from_millis(50)).await;
            continue;
        }
        for _ in 0..concurrency {
            dispatcher.submit(make_request());
            sent += 1;
        }
        sleep(Duration::from_millis(10)).await;
    }

    DriveStats { sent }
}

async fn drive_constant_rps<D: LoadDispatcher>(
    target_rps: f64,
    duration: Duration,
    dispatcher: &D,
    should_stop: &AtomicBool,
    make_request: &mut impl FnMut() -> Request,
) -> DriveStats {
    let start = Instant::now();
    let mut sent = 0u64;
    let batch_size = (target_rps / 1000.0).round().max(1.0) as u64;
    let pending_cap = (10.0 * target_rps).max(1000.0) as usize;

    let mut next_batch_time = start;

    while start.elapsed() < duration && !should_stop.load(Ordering::Relaxed) {
        let now = Instant::now();

        if dispatcher.pending_count() < pending_cap {
            for _ in 0..batch_size {
                dispatcher.submit(make_request());
                sent += 1;
            }
            next_batch_time += Duration::from_millis(1);
        } else {
            next_batch_time = now + Duration::from_millis(1);
        }

        let remaining = next_batch_time.saturating_duration_since(Instant::now());
        sleep(remaining / 2).await;
    }

    DriveStats { sent }
}

async fn drive_iterations<D: LoadDispatcher>(
    count: u64,
    concurrency: u32,
    dispatcher: &D,
    should_stop: &AtomicBool,
    make_request: &mut impl FnMut() -> Request,
) -> DriveStats {
    let mut sent = 0u64;

    while sent < count && !should_stop.load(Ordering::Relaxed) {
        if dispatcher.pending_count() > 5 * concurrency as usize {
            sleep(Duration::from_millis(10)).await;
            continue;
        }
        let batch = (concurrency as u64).min(count - sent);
        for _ in 0..batch {
            dispatcher.submit(make_request());
            sent += 1;
        }
        sleep(Duration::from_millis(10)).await;
    }

    DriveStats { sent }
}

async fn drive_ramp_up<D: LoadDispatcher>(
    start_concurrency: u32,
    concurrency: u32,
    ramp_duration: Duration,
    duration: Duration,
    dispatcher: &D,
    should_stop: &AtomicBool,
    make_request: &mut impl FnMut() -> Request,
) -> DriveStats {
    let start = Instant::now();
    let mut sent = 0u64;

    while start.elapsed() < duration && !should_stop.load(Ordering::Relaxed) {
        let elapsed = start.elapsed();
        let current_concurrency = if elapsed < ramp_duration {
            let progress = elapsed.as_secs_f64() / ramp_duration.as_secs_f64().max(f64::EPSILON);
            linear_interpolate(
                start_concurrency as f64,
                concurrency as f64,
                progress,
                1.0,
            )
            .round() as u32
        } else {
            concurrency
        };

        if dispatcher.pending_count() > 5 * current_concurrency.max(1) as usize {
            sleep(Duration::from_millis(50)).await;
            continue;
        }
        for _ in 0..current_concurrency.max(1) {
            dispatcher.submit(make_request());
            sent += 1;
        }
        sleep(Duration::from_millis(10)).await;
    }

    DriveStats { sent }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StubDispatcher {
        submitted: Mutex<Vec<Request>>,
    }

    impl StubDispatcher {
        fn new() -> Self {
            Self {
                submitted: Mutex::new(Vec::new()),
            }
        }

        fn count(&self) -> usize {
            self.submitted.lock().unwrap().len()
        }
    }

    impl LoadDispatcher for StubDispatcher {
        fn pending_count(&self) -> usize {
            0
        }

        fn submit(&self, request: Request) {
            self.submitted.lock().unwrap().push(request);
        }
    }

    #[test]
    fn from_mode_falls_back_to_constant_concurrency() {
        let strategy = LoadStrategy::from_mode(
            Some("unknown"),
            None,
            10,
            Duration::from_secs(5),
            100.0,
            0,
            1,
            Duration::from_secs(1),
        );
        assert!(matches!(
            strategy,
            LoadStrategy::ConstantConcurrency { concurrency: 10, .. }
        ));
    }

    #[test]
    fn legacy_iterations_without_mode_selects_iterations() {
        let strategy = LoadStrategy::from_mode(
            None,
            Some(500),
            10,
            Duration::from_secs(5),
            100.0,
            0,
            1,
            Duration::from_secs(1),
        );
        assert!(matches!(
            strategy,
            LoadStrategy::Iterations { count: 500, .. }
        ));
    }

    #[test]
    fn expected_requests_known_for_iterations_and_rps() {
        let iterations = LoadStrategy::Iterations {
            count: 1000,
            concurrency: 20,
        };
        assert_eq!(iterations.expected_requests(), Some(1000));

        let rps = LoadStrategy::ConstantRps {
            target_rps: 10.0,
            duration: Duration::from_secs(10),
        };
        assert_eq!(rps.expected_requests(), Some(100));
    }

    #[test]
    fn expected_requests_unknown_for_concurrency_based_strategies() {
        let constant = LoadStrategy::ConstantConcurrency {
            concurrency: 50,
            duration: Duration::from_secs(5),
        };
        assert_eq!(constant.expected_requests(), None);
    }

    #[tokio::test]
    async fn iterations_strategy_submits_exactly_n() {
        let dispatcher = StubDispatcher::new();
        let should_stop = AtomicBool::new(false);
        let stats = drive_iterations(37, 10, &dispatcher, &should_stop, &mut || {
            Request::get("http://example.test")
        })
        .await;
        assert_eq!(stats.sent, 37);
        assert_eq!(dispatcher.count(), 37);
    }

    #[tokio::test]
    async fn zero_duration_constant_concurrency_sends_nothing() {
        let dispatcher = StubDispatcher::new();
        let should_stop = AtomicBool::new(false);
        let stats = drive_constant_concurrency(
            10,
            Duration::from_millis(0),
            &dispatcher,
            &should_stop,
            &mut || Request::get("http://example.test"),
        )
        .await;
        assert_eq!(stats.sent, 0);
    }

    #[tokio::test]
    async fn should_stop_halts_iterations_early() {
        let dispatcher = StubDispatcher::new();
        let should_stop = AtomicBool::new(true);
        let stats = drive_iterations(1000, 10, &dispatcher, &should_stop, &mut || {
            Request::get("http://example.test")
        })
        .await;
        assert_eq!(stats.sent, 0);
    }
}
