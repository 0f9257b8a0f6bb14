//! Event-loop worker (component E): drives up to `max_concurrent` HTTP
//! transfers cooperatively from one OS thread, at a configured rate,
//! feeding completions back through per-submission callbacks.
//!
//! Realized per §4.E.1 of the expanded spec: each worker owns a
//! single-threaded tokio runtime and `LocalSet`, spawning one
//! `spawn_local` future per in-flight transfer rather than a hand-rolled
//! poll loop. Admission, draining, and reaping all run on that one
//! thread, so `active_count`, the rate limiter, the handle pool, and DNS
//! lookups never need locking from the worker's own perspective.
//!
//! Grounded in the teacher's `worker.rs::run_worker`: the `should_sample`
//! deterministic-counter idiom and the static `status_code_label` lookup
//! (renamed `status_code_label` → reused via `transfer::status_text`) are
//! carried forward; the per-virtual-user task-per-worker model is
//! replaced by one shard driving many concurrent transfers, since the
//! spec's worker owns admission/rate-limiting/pooling directly instead of
//! relying on N independently-scheduled tokio tasks.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::LocalSet;
use tracing::{debug, warn};

use crate::dns_cache::DnsCache;
use crate::errors::{ErrorKind, TransferError};
use crate::handle_pool::HandlePool;
use crate::rate_limiter::RateLimiter;
use crate::transfer::{Body, Request, Response, Timing, TransferOutcome};

/// Atomic counter for deterministic percentile/error sampling.
static SAMPLE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Returns true if this occurrence should be recorded, using a
/// deterministic counter so every Nth item is sampled rather than a
/// randomized draw, giving even distribution across workers without
/// coordination. `rate` is 1-100.
pub fn should_sample(rate: u8) -> bool {
    if rate >= 100 {
        return true;
    }
    let counter = SAMPLE_COUNTER.fetch_add(1, Ordering::Relaxed);
    counter % 100 < rate as u64
}

/// A unit of work queued for a worker: the request plus the callback to
/// invoke exactly once with its outcome.
pub struct Submission {
    pub request: Request,
    pub callback: Box<dyn FnOnce(TransferOutcome) + Send + 'static>,
}

/// Fixed configuration for one worker shard.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: usize,
    pub max_concurrent: usize,
    pub target_rps: f64,
    pub burst: Option<f64>,
    pub handle_pool_initial: usize,
    pub poll_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: 0,
            max_concurrent: 100,
            target_rps: 0.0,
            burst: None,
            handle_pool_initial: 16,
            poll_timeout: Duration::from_millis(1),
        }
    }
}

/// Live counters a worker exposes without locking — each is a plain
/// atomic, cheap to read from any thread for stats aggregation.
#[derive(Debug)]
struct WorkerCounters {
    active: AtomicUsize,
    pending: AtomicUsize,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Handle to a running worker: the producer side of its submission
/// queue plus read access to its counters. Dropping the handle does not
/// stop the worker — call `stop` explicitly.
pub struct WorkerHandle {
    submission_tx: mpsc::Sender<Submission>,
    should_stop: Arc<AtomicBool>,
    counters: Arc<WorkerCounters>,
    /// `Mutex` rather than a plain `Option` so `stop` can be called
    /// through a shared `Arc<EventLoop>` — it only ever locks once, at
    /// run teardown, never on the submission hot path.
    join_handle: std::sync::Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl WorkerHandle {
    pub fn active_count(&self) -> usize {
        self.counters.active.load(Ordering::Relaxed)
    }

    pub fn pending_count(&self) -> usize {
        self.counters.pending.load(Ordering::Relaxed)
    }

    pub fn processed_count(&self) -> u64 {
        self.counters.processed.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    /// Enqueues a submission onto the bounded queue (~64k). A full or
    /// closed queue is still required to produce exactly one outcome
    /// (spec invariant 1): rather than dropping the submission, its
    /// callback fires immediately with an `InternalError` outcome so the
    /// completeness invariant (`Σ(completed+failed) = Σ submissions`)
    /// never breaks under backpressure.
    pub fn submit(&self, request: Request, callback: impl FnOnce(TransferOutcome) + Send + 'static) {
        self.counters.pending.fetch_add(1, Ordering::Relaxed);
        let submission = Submission {
            request,
            callback: Box::new(callback),
        };
        if let Err(err) = self.submission_tx.try_send(submission) {
            self.counters.pending.fetch_sub(1, Ordering::Relaxed);
            let (reason, rejected) = match err {
                TrySendError::Full(s) => ("submission queue full", s),
                TrySendError::Closed(s) => ("worker shut down", s),
            };
            warn!(worker = "event_loop", reason, "submission not accepted, failing it");
            (rejected.callback)(Err(TransferError::new(
                ErrorKind::InternalError,
                format!("submission rejected: {reason}"),
            )));
        }
    }

    /// Requests the worker stop. If `wait` is true, blocks until the
    /// worker thread has drained in-flight transfers and exited. Safe to
    /// call through a shared reference and more than once; only the
    /// first caller that observes a live handle actually joins it.
    pub fn stop(&self, wait: bool) {
        self.should_stop.store(true, Ordering::SeqCst);
        if wait {
            let mut guard = self.join_handle.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

const SUBMISSION_QUEUE_CAPACITY: usize = 65_536;

/// Spawns a worker shard on its own OS thread, running a single-threaded
/// tokio runtime and `LocalSet` for its cooperative transfer driver.
pub fn spawn_worker(config: WorkerConfig, client: reqwest::Client, dns_cache: Arc<DnsCache>) -> WorkerHandle {
    let (submission_tx, submission_rx) = mpsc::channel(SUBMISSION_QUEUE_CAPACITY);
    let should_stop = Arc::new(AtomicBool::new(false));
    let counters = Arc::new(WorkerCounters {
        active: AtomicUsize::new(0),
        pending: AtomicUsize::new(0),
        processed: AtomicU64::new(0),
        failed: AtomicU64::new(0),
    });

    let thread_stop = should_stop.clone();
    let thread_counters = counters.clone();

    let join_handle = std::thread::Builder::new()
        .name(format!("event-loop-worker-{}", config.worker_id))
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build worker runtime");
            let local = LocalSet::new();
            local.block_on(
                &runtime,
                run_worker_loop(config, client, dns_cache, submission_rx, thread_stop, thread_counters),
            );
        })
        .expect("failed to spawn worker thread");

    WorkerHandle {
        submission_tx,
        should_stop,
        counters,
        join_handle: std::sync::Mutex::new(Some(join_handle)),
    }
}

/// Internal signal sent from a completed transfer future back to the
/// worker's main loop so it can update `active`/`processed`/`failed`.
struct Completion {
    failed: bool,
}

async fn run_worker_loop(
    config: WorkerConfig,
    client: reqwest::Client,
    dns_cache: Arc<DnsCache>,
    mut submission_rx: mpsc::Receiver<Submission>,
    should_stop: Arc<AtomicBool>,
    counters: Arc<WorkerCounters>,
) {
    let rate_limiter = Rc::new(RefCell::new(RateLimiter::new(config.target_rps, config.burst)));
    let handle_pool = Rc::new(RefCell::new(HandlePool::new(config.handle_pool_initial)));
    let pending: Rc<RefCell<VecDeque<Submission>>> = Rc::new(RefCell::new(VecDeque::new()));
    let active = Rc::new(RefCell::new(0usize));

    let (completion_tx, mut completion_rx) = mpsc::unbounded_channel::<Completion>();

    loop {
        // Drain any newly arrived submissions into the local pending queue.
        while let Ok(submission) = submission_rx.try_recv() {
            pending.borrow_mut().push_back(submission);
        }

        // Admission: spend tokens while there is spare concurrency.
        loop {
            if *active.borrow() >= config.max_concurrent {
                break;
            }
            let acquired = rate_limiter.borrow_mut().try_acquire();
            if !acquired {
                break;
            }
            let next = pending.borrow_mut().pop_front();
            match next {
                Some(submission) => {
                    counters.pending.fetch_sub(1, Ordering::Relaxed);
                    *active.borrow_mut() += 1;
                    counters.active.store(*active.borrow(), Ordering::Relaxed);

                    let client = client.clone();
                    let dns_cache = dns_cache.clone();
                    let handle_pool = handle_pool.clone();
                    let completion_tx = completion_tx.clone();
                    let active = active.clone();
                    let counters = counters.clone();

                    tokio::task::spawn_local(async move {
                        let mut handle = handle_pool.borrow_mut().checkout();
                        let outcome = execute_transfer(&client, &dns_cache, &submission.request, &mut handle).await;
                        handle_pool.borrow_mut().checkin(handle);

                        let failed = outcome.is_err();
                        (submission.callback)(outcome);

                        *active.borrow_mut() -= 1;
                        counters.active.store(*active.borrow(), Ordering::Relaxed);
                        counters.processed.fetch_add(1, Ordering::Relaxed);
                        if failed {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                        }

                        let _ = completion_tx.send(Completion { failed });
                    });
                }
                None => {
                    // Token acquired but nothing queued — accepted inefficiency
                    // at high rate ceilings, per spec.
                    break;
                }
            }
        }

        let active_now = *active.borrow();
        let pending_now = pending.borrow().len();

        if should_stop.load(Ordering::SeqCst) && pending_now == 0 && active_now == 0 {
            break;
        }

        if should_stop.load(Ordering::SeqCst) {
            // Drain pending items immediately with a cancelled outcome;
            // in-flight transfers are left to finish naturally.
            while let Some(submission) = pending.borrow_mut().pop_front() {
                counters.pending.fetch_sub(1, Ordering::Relaxed);
                (submission.callback)(Err(TransferError::cancelled()));
            }
            if active_now == 0 {
                break;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(config.poll_timeout) => {}
            maybe_completion = completion_rx.recv() => {
                if maybe_completion.is_none() {
                    debug!("completion channel closed unexpectedly");
                }
            }
            maybe_submission = submission_rx.recv(), if !should_stop.load(Ordering::SeqCst) => {
                if let Some(submission) = maybe_submission {
                    pending.borrow_mut().push_back(submission);
                }
            }
        }
    }
}

/// Executes one transfer against `reqwest`, translating the outcome into
/// the spec's `Response`/`TransferError` model. The run's primary target
/// host is already baked into the client's DNS override at construction
/// time (`client::build_client`); this per-transfer `resolve` call just
/// warms the shared cache for any other host a script-modified request
/// might point at, so a later override-eligible run can reuse it.
async fn execute_transfer(
    client: &reqwest::Client,
    dns_cache: &DnsCache,
    request: &Request,
    handle: &mut crate::handle_pool::TransferHandle,
) -> TransferOutcome {
    let started = std::time::Instant::now();

    if let Some((host, port)) = crate::transfer::extract_host_port(&request.url) {
        let _ = dns_cache.resolve(&host, port);
    }

    let mut builder = client.request(request.method.to_reqwest(), &request.url);
    for (name, value) in request.headers.iter() {
        builder = builder.header(name, value);
    }
    builder = builder.timeout(request.timeout);
    match &request.body {
        Body::None => {}
        Body::Raw(bytes) => {
            builder = builder.body(bytes.clone());
        }
        Body::Form(pairs) => {
            builder = builder.form(pairs);
        }
    }

    let response = match builder.send().await {
        Ok(resp) => resp,
        Err(err) => return Err(TransferError::from_reqwest(err)),
    };

    let status = response.status().as_u16();
    let first_byte_ms = started.elapsed().as_millis() as u64;

    let mut headers = std::collections::HashMap::new();
    for (name, value) in response.headers().iter() {
        if let Ok(value_str) = value.to_str() {
            headers.insert(name.as_str().to_string(), value_str.to_string());
        }
    }

    let body = match response.bytes().await {
        Ok(bytes) => bytes.to_vec(),
        Err(err) => return Err(TransferError::from_reqwest(err)),
    };
    handle.body_buffer.clear();
    handle.body_buffer.extend_from_slice(&body);

    let total_ms = started.elapsed().as_millis() as u64;

    Ok(Response {
        status,
        status_text: crate::transfer::status_text(status),
        headers,
        body_len: body.len(),
        body,
        timing: Timing {
            total_ms,
            dns_ms: 0,
            connect_ms: 0,
            tls_ms: 0,
            first_byte_ms,
            download_ms: total_ms.saturating_sub(first_byte_ms),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_sample_always_true_at_rate_100() {
        for _ in 0..50 {
            assert!(should_sample(100));
        }
    }

    #[tokio::test]
    async fn worker_processes_a_submission_and_invokes_callback() {
        let dns_cache = Arc::new(DnsCache::new());
        let client = reqwest::Client::new();
        let worker = spawn_worker(
            WorkerConfig {
                worker_id: 0,
                max_concurrent: 4,
                target_rps: 0.0,
                burst: None,
                handle_pool_initial: 2,
                poll_timeout: Duration::from_millis(1),
            },
            client,
            dns_cache,
        );

        let (tx, rx) = std::sync::mpsc::channel();
        worker.submit(Request::get("http://127.0.0.1:1/unreachable"), move |outcome| {
            let _ = tx.send(outcome);
        });

        let outcome = rx.recv_timeout(Duration::from_secs(5));
        assert!(outcome.is_ok(), "callback should fire within timeout");

        worker.stop(true);
    }

    #[tokio::test]
    async fn submit_after_shutdown_still_invokes_callback_exactly_once() {
        let dns_cache = Arc::new(DnsCache::new());
        let client = reqwest::Client::new();
        let worker = spawn_worker(WorkerConfig::default(), client, dns_cache);
        worker.stop(true);

        let (tx, rx) = std::sync::mpsc::channel();
        worker.submit(Request::get("http://127.0.0.1:1/unreachable"), move |outcome| {
            let _ = tx.send(outcome);
        });

        let outcome = rx
            .recv_timeout(Duration::from_secs(1))
            .expect("a submission to a shut-down worker must still produce exactly one outcome");
        assert!(matches!(outcome, Err(e) if e.kind == ErrorKind::InternalError));
    }
}
