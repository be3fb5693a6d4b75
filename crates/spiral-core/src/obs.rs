//! Structured observability hooks for engine lifecycle events.
//!
//! This module provides:
//! - GC-run tracing spans via [`gc_span`]
//! - Emission functions for node storage, eviction batches, leadership
//!   changes and initialization
//!
//! Events are emitted at `info!` level (configurable via `SPIRAL_LOG`).

use tracing::info;

use crate::gc::GcSummary;
use crate::memory::ReconcileReport;

/// Span covering one collector run. Attach it with
/// [`tracing::Instrument::instrument`] so it stays valid across awaits.
///
/// ```ignore
/// engine.collect(budget).instrument(gc_span(1, 25)).await
/// // tracing calls inside carry shard_id = 1, budget_ms = 25
/// ```
pub fn gc_span(shard_id: u32, budget_ms: u64) -> tracing::Span {
    tracing::info_span!("spiral.gc", shard_id = shard_id, budget_ms = budget_ms)
}

/// Emit event: a node was stored and mirrored.
pub fn emit_node_stored(id: &str, signature: &str, partition_id: &str) {
    info!(
        event = "node.stored",
        node_id = %id,
        signature = %signature,
        partition_id = %partition_id,
    );
}

/// Emit event: one collector run finished.
pub fn emit_eviction_batch(shard_id: u32, summary: &GcSummary) {
    info!(
        event = "gc.eviction_batch",
        shard_id = shard_id,
        evicted = summary.evicted_count,
        examined = summary.examined,
        deferred = summary.deferred,
        remaining = summary.remaining_queue_size,
        elapsed_ms = summary.elapsed_ms,
        leadership_lost = summary.leadership_lost,
    );
}

/// Emit event: this process gained or lost GC leadership for a shard.
pub fn emit_leadership_changed(shard_id: u32, holder_id: &str, is_leader: bool) {
    info!(
        event = "gc.leadership_changed",
        shard_id = shard_id,
        holder_id = %holder_id,
        is_leader = is_leader,
    );
}

/// Emit event: cold-start reload finished and traffic may be accepted.
pub fn emit_initialization_complete(
    nodes: usize,
    partitions: usize,
    sigils: usize,
    report: &ReconcileReport,
) {
    info!(
        event = "engine.initialized",
        nodes = nodes,
        partitions = partitions,
        sigils = sigils,
        repairs = report.total_repairs(),
        bound_violations = report.bound_violations(),
    );
}

/// Emit event: a best-effort step failed and was skipped (warning level).
pub fn emit_best_effort_failure(step: &str, key: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "engine.best_effort_failure", step = %step, key = %key, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_gc_span_create() {
        let _entered = gc_span(0, 25).entered();
    }

    #[traced_test]
    #[test]
    fn test_node_stored_event_carries_signature() {
        emit_node_stored("n-1", "GL-00ff00ff00ff00ff", "p-1");
        assert!(logs_contain("node.stored"));
        assert!(logs_contain("GL-00ff00ff00ff00ff"));
    }

    #[traced_test]
    #[test]
    fn test_leadership_event_carries_holder() {
        emit_leadership_changed(4, "replica-z", false);
        assert!(logs_contain("gc.leadership_changed"));
        assert!(logs_contain("replica-z"));
    }
}
