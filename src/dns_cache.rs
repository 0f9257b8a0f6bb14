//! DNS cache (component B).
//!
//! Resolution results are cached for the lifetime of a run — the spec
//! requires entries to never expire mid-run, so there is no TTL or
//! invalidation path here, only insertion and lookup. Guarded by an
//! `RwLock` rather than sharded per-worker because resolution is rare
//! relative to transfers and multiple workers may resolve the same host
//! independently before the first result lands.
//!
//! Grounded in the teacher's `client.rs::configure_dns_override`, which
//! hands a single `hostname -> SocketAddr` override to
//! `reqwest::ClientBuilder::resolve`. This cache generalizes that to an
//! arbitrary number of hosts, resolved lazily via `ToSocketAddrs` instead
//! of a single operator-supplied override string, with a policy that
//! prefers an IPv6 loopback address over IPv4 when both are present
//! (matching how `localhost` resolves on dual-stack hosts where the
//! teacher's original single-override format could only express one).

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::RwLock;

use crate::errors::TransferError;

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Thread-safe cache of resolved `host:port -> SocketAddr`.
pub struct DnsCache {
    entries: RwLock<HashMap<String, SocketAddr>>,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
}

impl DnsCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: std::sync::atomic::AtomicU64::new(0),
            misses: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Installs a fixed override, the generalization of the teacher's
    /// `RESOLVE_TARGET_ADDR=hostname:ip:port` format.
    pub fn insert_override(&self, host: &str, port: u16, addr: IpAddr) {
        let key = format!("{host}:{port}");
        let mut entries = self.entries.write().expect("dns cache lock poisoned");
        entries.insert(key, SocketAddr::new(addr, port));
    }

    /// Looks up a cached resolution, or resolves and caches it on miss.
    /// Among multiple addresses for a host, prefers an IPv6 loopback
    /// address over any IPv4 candidate.
    pub fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr, TransferError> {
        let key = format!("{host}:{port}");

        {
            let entries = self.entries.read().expect("dns cache lock poisoned");
            if let Some(addr) = entries.get(&key) {
                self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return Ok(*addr);
            }
        }

        self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let candidates: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| TransferError::new(crate::errors::ErrorKind::DnsError, e.to_string()))?
            .collect();

        if candidates.is_empty() {
            return Err(TransferError::new(
                crate::errors::ErrorKind::DnsError,
                format!("no addresses found for {host}:{port}"),
            ));
        }

        let chosen = pick_preferred(&candidates);

        let mut entries = self.entries.write().expect("dns cache lock poisoned");
        entries.entry(key).or_insert(chosen);

        Ok(chosen)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(std::sync::atomic::Ordering::Relaxed),
            misses: self.misses.load(std::sync::atomic::Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("dns cache lock poisoned").len()
    }

    /// Drops every cached resolution. Entries never expire on their own
    /// within a run; a run manager calls this between runs rather than
    /// reusing a `DnsCache` whose overrides or resolver-derived addresses
    /// might have gone stale for the next run's target.
    pub fn clear(&self) {
        self.entries.write().expect("dns cache lock poisoned").clear();
    }
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Loopback addresses resolve fastest over IPv6 on dual-stack hosts;
/// everything else falls back to the first candidate in resolver order.
fn pick_preferred(candidates: &[SocketAddr]) -> SocketAddr {
    candidates
        .iter()
        .find(|addr| addr.ip().is_loopback() && addr.is_ipv6())
        .copied()
        .unwrap_or(candidates[0])
}
