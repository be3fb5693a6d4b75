//! Global atomic counters for engine observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. on shutdown).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters. No allocations, no locking.
pub struct Metrics {
    nodes_stored: AtomicU64,
    nodes_evicted: AtomicU64,
    gc_runs: AtomicU64,
    sigil_cache_hits: AtomicU64,
    sigil_cache_misses: AtomicU64,
    deferred_links: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub nodes_stored: u64,
    pub nodes_evicted: u64,
    pub gc_runs: u64,
    pub sigil_cache_hits: u64,
    pub sigil_cache_misses: u64,
    pub deferred_links: u64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            nodes_stored: AtomicU64::new(0),
            nodes_evicted: AtomicU64::new(0),
            gc_runs: AtomicU64::new(0),
            sigil_cache_hits: AtomicU64::new(0),
            sigil_cache_misses: AtomicU64::new(0),
            deferred_links: AtomicU64::new(0),
        }
    }

    pub fn inc_nodes_stored(&self) {
        self.nodes_stored.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "nodes_stored", "counter incremented");
    }

    /// Add `n` evictions.
    pub fn add_nodes_evicted(&self, n: u64) {
        self.nodes_evicted.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "nodes_evicted", n, "counter incremented");
    }

    pub fn inc_gc_runs(&self) {
        self.gc_runs.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "gc_runs", "counter incremented");
    }

    pub fn inc_sigil_cache_hits(&self) {
        self.sigil_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sigil_cache_misses(&self) {
        self.sigil_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one association batch handed to a background task.
    pub fn inc_deferred_links(&self) {
        self.deferred_links.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "deferred_links", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (shutdown, end of a CLI command)
    /// rather than on every increment.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            nodes_stored = s.nodes_stored,
            nodes_evicted = s.nodes_evicted,
            gc_runs = s.gc_runs,
            sigil_cache_hits = s.sigil_cache_hits,
            sigil_cache_misses = s.sigil_cache_misses,
            deferred_links = s.deferred_links,
        );
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            nodes_stored: self.nodes_stored.load(Ordering::Relaxed),
            nodes_evicted: self.nodes_evicted.load(Ordering::Relaxed),
            gc_runs: self.gc_runs.load(Ordering::Relaxed),
            sigil_cache_hits: self.sigil_cache_hits.load(Ordering::Relaxed),
            sigil_cache_misses: self.sigil_cache_misses.load(Ordering::Relaxed),
            deferred_links: self.deferred_links.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.nodes_stored.store(0, Ordering::Relaxed);
        self.nodes_evicted.store(0, Ordering::Relaxed);
        self.gc_runs.store(0, Ordering::Relaxed);
        self.sigil_cache_hits.store(0, Ordering::Relaxed);
        self.sigil_cache_misses.store(0, Ordering::Relaxed);
        self.deferred_links.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        assert_eq!(m.snapshot().nodes_stored, 0);
        m.inc_nodes_stored();
        m.inc_nodes_stored();
        m.add_nodes_evicted(5);
        m.inc_gc_runs();
        m.inc_sigil_cache_hits();
        m.inc_sigil_cache_misses();
        m.inc_sigil_cache_misses();

        let s = m.snapshot();
        assert_eq!(s.nodes_stored, 2);
        assert_eq!(s.nodes_evicted, 5);
        assert_eq!(s.gc_runs, 1);
        assert_eq!(s.sigil_cache_hits, 1);
        assert_eq!(s.sigil_cache_misses, 2);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_nodes_stored();
        m.inc_gc_runs();
        m.inc_deferred_links();
        m.reset();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }
}
