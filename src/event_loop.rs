//! Event loop (component F): shards submissions across N worker threads
//! via round-robin dispatch, deriving each worker's per-shard limits from
//! the global configuration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::dns_cache::DnsCache;
use crate::transfer::{Request, TransferOutcome};
use crate::worker::{spawn_worker, WorkerConfig, WorkerHandle};

#[derive(Debug, Clone)]
pub struct EventLoopConfig {
    pub num_workers: usize,
    pub max_concurrent_total: usize,
    pub target_rps: f64,
    pub burst: Option<f64>,
    pub poll_timeout_ms: u64,
}

impl EventLoopConfig {
    /// `num_workers == 0` means "auto": `min(hw-concurrency, 16)`.
    pub fn resolved_num_workers(&self) -> usize {
        if self.num_workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
                .min(16)
        } else {
            self.num_workers
        }
    }
}

/// Aggregate stats across all shards.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventLoopStats {
    pub active: usize,
    pub pending: usize,
    pub processed: u64,
    pub failed: u64,
}

/// Sharded pool of `EventLoopWorker`s, dispatched to by round robin.
pub struct EventLoop {
    workers: Vec<WorkerHandle>,
    dispatch_counter: AtomicU64,
    next_submission_id: AtomicU64,
}

impl EventLoop {
    pub fn new(config: EventLoopConfig, client: reqwest::Client, dns_cache: Arc<DnsCache>) -> Self {
        let num_workers = config.resolved_num_workers().max(1);
        let per_worker_limit = (config.max_concurrent_total as f64 / num_workers as f64).ceil() as usize;
        let per_worker_rps = if config.target_rps > 0.0 {
            config.target_rps / num_workers as f64
        } else {
            0.0
        };

        let workers = (0..num_workers)
            .map(|worker_id| {
                spawn_worker(
                    WorkerConfig {
                        worker_id,
                        max_concurrent: per_worker_limit.max(1),
                        target_rps: per_worker_rps,
                        burst: config.burst.map(|b| b / num_workers as f64),
                        handle_pool_initial: 16,
                        poll_timeout: std::time::Duration::from_millis(config.poll_timeout_ms.max(1)),
                    },
                    client.clone(),
                    dns_cache.clone(),
                )
            })
            .collect();

        Self {
            workers,
            dispatch_counter: AtomicU64::new(0),
            next_submission_id: AtomicU64::new(1),
        }
    }

    fn pick_worker(&self) -> &WorkerHandle {
        let index = self.dispatch_counter.fetch_add(1, Ordering::Relaxed) as usize % self.workers.len();
        &self.workers[index]
    }

    /// Dispatches `request` to the next worker in round-robin order,
    /// invoking `callback` exactly once with its outcome. Returns the
    /// submission id assigned for correlation/logging.
    pub fn submit(&self, request: Request, callback: impl FnOnce(TransferOutcome) + Send + 'static) -> u64 {
        let id = self.next_submission_id.fetch_add(1, Ordering::Relaxed);
        self.pick_worker().submit(request, callback);
        id
    }

    /// Convenience wrapper over `submit` returning a future that resolves
    /// with the transfer's outcome.
    pub async fn submit_async(&self, request: Request) -> TransferOutcome {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.submit(request, move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.await.unwrap_or_else(|_| Err(crate::errors::TransferError::new(
            crate::errors::ErrorKind::InternalError,
            "worker dropped submission without responding",
        )))
    }

    /// Submits every request concurrently and waits for all outcomes.
    /// Submission itself is non-blocking (each `submit` only enqueues onto
    /// a worker's queue), so every request is handed off before this
    /// function waits on the first completion.
    pub async fn execute_batch(&self, requests: Vec<Request>) -> Vec<TransferOutcome> {
        let receivers: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let (tx, rx) = tokio::sync::oneshot::channel();
                self.submit(request, move |outcome| {
                    let _ = tx.send(outcome);
                });
                rx
            })
            .collect();

        let mut results = Vec::with_capacity(receivers.len());
        for rx in receivers {
            results.push(rx.await.unwrap_or_else(|_| {
                Err(crate::errors::TransferError::new(
                    crate::errors::ErrorKind::InternalError,
                    "worker dropped submission without responding",
                ))
            }));
        }
        results
    }

    pub fn active_count(&self) -> usize {
        self.workers.iter().map(|w| w.active_count()).sum()
    }

    pub fn pending_count(&self) -> usize {
        self.workers.iter().map(|w| w.pending_count()).sum()
    }

    pub fn total_processed(&self) -> u64 {
        self.workers.iter().map(|w| w.processed_count()).sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.workers.iter().map(|w| w.failed_count()).sum()
    }

    pub fn stats(&self) -> EventLoopStats {
        EventLoopStats {
            active: self.active_count(),
            pending: self.pending_count(),
            processed: self.total_processed(),
            failed: self.total_failed(),
        }
    }

    /// Stops every shard, optionally waiting for in-flight transfers to
    /// drain before returning. Takes `&self` so a shared `Arc<EventLoop>`
    /// can be torn down from a run manager without a wrapping mutex on
    /// the submission hot path.
    pub fn stop(&self, wait: bool) {
        for worker in &self.workers {
            worker.stop(wait);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_num_workers_respects_explicit_count() {
        let config = EventLoopConfig {
            num_workers: 3,
            max_concurrent_total: 30,
            target_rps: 0.0,
            burst: None,
            poll_timeout_ms: 1,
        };
        assert_eq!(config.resolved_num_workers(), 3);
    }

    #[test]
    fn resolved_num_workers_auto_caps_at_sixteen() {
        let config = EventLoopConfig {
            num_workers: 0,
            max_concurrent_total: 30,
            target_rps: 0.0,
            burst: None,
            poll_timeout_ms: 1,
        };
        assert!(config.resolved_num_workers() <= 16);
        assert!(config.resolved_num_workers() >= 1);
    }

    #[tokio::test]
    async fn submit_async_returns_outcome_for_unreachable_host() {
        let dns_cache = Arc::new(DnsCache::new());
        let client = reqwest::Client::new();
        let event_loop = EventLoop::new(
            EventLoopConfig {
                num_workers: 1,
                max_concurrent_total: 4,
                target_rps: 0.0,
                burst: None,
                poll_timeout_ms: 1,
            },
            client,
            dns_cache,
        );

        let outcome = event_loop
            .submit_async(Request::get("http://127.0.0.1:1/unreachable"))
            .await;
        assert!(outcome.is_err());

        event_loop.stop(true);
    }
}
