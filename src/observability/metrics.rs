//! Federation counters
//!
//! - Counters only, monotonic
//! - Thread-safe, relaxed ordering (exactness across threads is not required)

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters for one federated repository
#[derive(Debug, Default)]
pub struct FederationMetrics {
    requests_executed: AtomicU64,
    requests_failed: AtomicU64,
    source_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
}

impl FederationMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_requests_executed(&self) {
        self.requests_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_requests_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// One translated sub-request sent to a backing source
    pub fn increment_source_requests(&self) {
        self.source_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_connections_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_connections_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_executed: self.requests_executed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            source_requests: self.source_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
        }
    }
}

/// Serializable counter values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub requests_executed: u64,
    pub requests_failed: u64,
    pub source_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub connections_opened: u64,
    pub connections_closed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = FederationMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_counters_increment_independently() {
        let metrics = FederationMetrics::new();
        metrics.increment_requests_executed();
        metrics.increment_requests_executed();
        metrics.increment_cache_hits();

        let snap = metrics.snapshot();
        assert_eq!(snap.requests_executed, 2);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 0);
    }
}
