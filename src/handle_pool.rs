//! Handle pool (component C).
//!
//! `reqwest::Client` already pools the underlying TCP/TLS connections via
//! hyper's connection pool, so there is no socket-level handle to manage
//! here the way a libcurl-multi-style engine would. What this module
//! instead recycles is the per-transfer scratch state that would
//! otherwise be allocated fresh for every request: the response body
//! buffer and the header map capacity. A worker checks out a handle
//! before starting a transfer, uses its buffers, and checks it back in
//! once the transfer completes, so steady-state load doesn't pay an
//! allocation per request.
//!
//! Grounded in the teacher's `connection_pool.rs::PoolConfig`, which
//! configured `max_idle_per_host`/`idle_timeout`/`tcp_keepalive` on a
//! `reqwest::ClientBuilder`. That concept now lives on
//! `ClientConfig`/`build_client` in `client.rs`, since it governs the
//! `reqwest::Client` itself; this module is the generalization of the
//! *handle* idea the spec actually asks for — reusable per-transfer
//! scratch objects, single-threaded per worker, with no atomics needed.

use std::collections::VecDeque;

/// Reusable scratch state for one in-flight transfer.
#[derive(Debug, Default)]
pub struct TransferHandle {
    pub body_buffer: Vec<u8>,
    pub header_capacity_hint: usize,
}

impl TransferHandle {
    fn reset(&mut self) {
        self.body_buffer.clear();
    }
}

/// A single worker's private pool of handles. Not `Sync` — owned
/// exclusively by the worker thread/task that created it, same as the
/// rate limiter and DNS cache references it holds alongside.
pub struct HandlePool {
    idle: VecDeque<TransferHandle>,
    max_idle: usize,
    checked_out: usize,
}

impl HandlePool {
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: VecDeque::with_capacity(max_idle),
            max_idle,
            checked_out: 0,
        }
    }

    /// Hands out an idle handle if one exists, otherwise allocates fresh.
    pub fn checkout(&mut self) -> TransferHandle {
        self.checked_out += 1;
        self.idle.pop_front().unwrap_or_default()
    }

    /// Returns a handle to the pool for reuse, resetting its buffers.
    /// Drops the handle instead of enqueuing it once the pool is at
    /// capacity, so a pool can't grow unbounded under bursty load.
    pub fn checkin(&mut self, mut handle: TransferHandle) {
        self.checked_out = self.checked_out.saturating_sub(1);
        handle.reset();
        if self.idle.len() < self.max_idle {
            self.idle.push_back(handle);
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn checked_out_count(&self) -> usize {
        self.checked_out
    }
}
