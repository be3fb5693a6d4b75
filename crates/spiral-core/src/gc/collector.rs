//! Time-boxed incremental collector and its periodic tick.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use spiral_state::{node_key, partition_key, sigil_key};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::error::{EngineError, EngineResult};
use crate::events::EngineEvent;
use crate::memory::{MemoryEngine, MemoryNode, Partition};
use crate::metrics::METRICS;
use crate::obs;

/// Outcome of one collector run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcSummary {
    pub evicted_count: usize,
    /// Live queue entries (ready and deferred) after the run.
    pub remaining_queue_size: usize,
    pub elapsed_ms: u64,
    /// Entries popped and evaluated.
    pub examined: usize,
    /// Popped entries parked for a later re-check.
    pub deferred: usize,
    /// Deferred entries that became due and were re-queued.
    pub promoted: usize,
    /// The run stopped because this process lost leadership.
    pub leadership_lost: bool,
    pub evicted_ids: Vec<String>,
}

/// Periodic collector task. Stop it through [`MemoryEngine::shutdown`].
pub struct GcLoopHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MemoryEngine {
    /// Run the collector with the configured budget.
    pub async fn run_gc(&self) -> EngineResult<GcSummary> {
        self.trigger_gc(self.inner.config.gc.budget()).await
    }

    /// Run the collector for at most `budget`.
    ///
    /// Pops least-recently-accessed entries and evicts the eligible ones in
    /// batches of `gc.batch_size`, re-checking leadership before every batch.
    /// Ineligible entries are deferred with a doubling re-check delay.
    ///
    /// Returns `LeadershipLost` when this process is not the leader at the
    /// start; losing leadership mid-run ends the run with
    /// `leadership_lost = true` instead.
    pub async fn trigger_gc(&self, budget: Duration) -> EngineResult<GcSummary> {
        let span = obs::gc_span(
            self.inner.config.coordination.shard_id,
            budget.as_millis() as u64,
        );
        self.collect(budget).instrument(span).await
    }

    async fn collect(&self, budget: Duration) -> EngineResult<GcSummary> {
        let started = Instant::now();
        let config = &self.inner.config;
        let shard_id = config.coordination.shard_id;

        if !self.inner.state.lock().await.initialized {
            return Err(EngineError::NotInitialized);
        }

        let base = Duration::from_millis(config.gc.recheck_base_ms);
        let max = Duration::from_millis(config.gc.recheck_max_ms);
        let mut summary = GcSummary::default();
        let mut first_batch = true;
        let mut failure: Option<EngineError> = None;

        loop {
            if !self.inner.leadership.is_leader(shard_id).await {
                if first_batch {
                    debug!(shard_id, "Not the GC leader; skipping run");
                    return Err(EngineError::LeadershipLost { shard_id });
                }
                warn!(shard_id, "GC leadership lost mid-run; stopping");
                summary.leadership_lost = true;
                break;
            }

            let mut state = self.inner.state.lock().await;
            let now = self.now();
            if first_batch {
                summary.promoted = state.queue.promote_due(now);
                first_batch = false;
            }

            let mut batch = Vec::new();
            let mut exhausted = false;
            while batch.len() < config.gc.batch_size && started.elapsed() < budget {
                let Some(entry) = state.queue.pop_ready() else {
                    exhausted = true;
                    break;
                };
                summary.examined += 1;
                let verdict = match state.nodes.get(&entry.id) {
                    Some(node) => self.inner.policy.check(node, now),
                    None => {
                        state.queue.remove(&entry.id);
                        continue;
                    }
                };
                match verdict {
                    Ok(()) => batch.push(entry.id),
                    Err(reason) => {
                        state.queue.defer(&entry.id, now, base, max);
                        summary.deferred += 1;
                        debug!(node_id = %entry.id, reason = reason.as_str(), "Deferred");
                    }
                }
            }

            let mut pending = batch.into_iter();
            while let Some(id) = pending.next() {
                if failure.is_some() || started.elapsed() >= budget {
                    state.queue.requeue(&id);
                    for rest in pending.by_ref() {
                        state.queue.requeue(&rest);
                    }
                    break;
                }
                let Some(evicted) = state.evict(&id, now) else {
                    continue;
                };
                summary.evicted_count += 1;
                summary.evicted_ids.push(id);

                let node = &evicted.node;
                let partition = state.partitions.get(&node.partition_id);
                if let Err(e) = self.mirror_eviction(node, partition).await {
                    warn!(node_id = %node.id, error = %e, "Eviction not mirrored; stopping run");
                    failure = Some(e);
                    continue;
                }
                for peer in &evicted.peers {
                    let Some(other) = state.nodes.get(peer) else {
                        continue;
                    };
                    if let Err(e) = self.persist(&node_key(peer), other).await {
                        obs::emit_best_effort_failure("unlink", peer, &e);
                    }
                }
            }
            drop(state);

            if failure.is_some() || exhausted || started.elapsed() >= budget {
                break;
            }
        }

        summary.remaining_queue_size = self.inner.state.lock().await.queue.len();
        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        METRICS.inc_gc_runs();
        METRICS.add_nodes_evicted(summary.evicted_count as u64);
        self.inner.events.publish(EngineEvent::EvictionBatch {
            shard_id,
            summary: summary.clone(),
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Delete the node and sigil rows and rewrite the shrunken partition.
    async fn mirror_eviction(
        &self,
        node: &MemoryNode,
        partition: Option<&Partition>,
    ) -> EngineResult<()> {
        self.unpersist(&node_key(&node.id)).await?;
        if let Some(partition) = partition {
            self.persist(&partition_key(&partition.id), partition)
                .await?;
        }
        self.unpersist(&sigil_key(&node.sigil.signature)).await
    }

    /// Start the periodic collector, plus lease renewal when clustered.
    ///
    /// Does nothing if the loop is already running.
    pub fn start_gc_loop(&self) {
        let mut background = self
            .inner
            .background
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if background.gc.is_some() {
            return;
        }

        let config = &self.inner.config;
        if let Some(coordinator) = &self.inner.coordinator {
            background.renewal = Some(coordinator.clone().spawn_renewal(
                config.coordination.shard_id,
                config.coordination.renew_interval(),
            ));
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let engine = self.clone();
        let interval = config.gc.interval();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => match engine.run_gc().await {
                        Ok(_) => {}
                        Err(EngineError::LeadershipLost { shard_id }) => {
                            debug!(shard_id, "GC tick skipped: not leader");
                        }
                        Err(e) => warn!(error = %e, "GC tick failed"),
                    },
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        background.gc = Some(GcLoopHandle {
            stop: stop_tx,
            task,
        });
        info!(interval_ms = interval.as_millis() as u64, "GC loop started");
    }

    pub fn gc_loop_running(&self) -> bool {
        self.inner
            .background
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .gc
            .is_some()
    }

    /// Stop the periodic collector and lease renewal, if running.
    pub(crate) async fn stop_gc_loop(&self) {
        let (gc, renewal) = {
            let mut background = self
                .inner
                .background
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            (background.gc.take(), background.renewal.take())
        };
        if let Some(handle) = gc {
            let _ = handle.stop.send(true);
            if let Err(e) = handle.task.await {
                warn!(error = %e, "GC loop ended abnormally");
            }
            info!("GC loop stopped");
        }
        if let Some(renewal) = renewal {
            renewal.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration as ChronoDuration;
    use spiral_state::MemoryKvStore;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::memory::Tier;

    async fn engine_with_clock() -> (MemoryEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let engine = MemoryEngine::builder(EngineConfig::in_memory())
            .kv(Arc::new(MemoryKvStore::new()))
            .clock(clock.clone())
            .build()
            .unwrap();
        engine.initialize().await.unwrap();
        (engine, clock)
    }

    #[tokio::test]
    async fn test_evicts_stale_weak_nodes() {
        let (engine, clock) = engine_with_clock().await;
        let weak = engine
            .store("scratch", "general", Tier::Surface, &[])
            .await
            .unwrap();
        clock.advance(ChronoDuration::days(2));

        let summary = engine.trigger_gc(Duration::from_secs(1)).await.unwrap();
        assert_eq!(summary.evicted_ids, vec![weak.id.clone()]);
        assert_eq!(summary.remaining_queue_size, 0);
        assert!(engine.retrieve(&weak.id).await.unwrap().is_none());
        assert!(engine
            .retrieve_by_signature(&weak.sigil.signature)
            .await
            .unwrap()
            .is_none());
        let partition = engine.partition(&weak.partition_id).await.unwrap();
        assert_eq!(partition.node_count, 0);
    }

    #[tokio::test]
    async fn test_ineligible_nodes_are_deferred_not_dropped() {
        let (engine, clock) = engine_with_clock().await;
        let young = engine
            .store("fresh", "general", Tier::Surface, &[])
            .await
            .unwrap();

        let summary = engine.trigger_gc(Duration::from_secs(1)).await.unwrap();
        assert_eq!(summary.evicted_count, 0);
        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.remaining_queue_size, 1);

        clock.advance(ChronoDuration::days(2));
        let summary = engine.trigger_gc(Duration::from_secs(1)).await.unwrap();
        assert_eq!(summary.promoted, 1);
        assert_eq!(summary.evicted_ids, vec![young.id]);
    }

    #[tokio::test]
    async fn test_gc_loop_starts_once_and_stops_on_shutdown() {
        let (engine, _) = engine_with_clock().await;
        engine.start_gc_loop();
        engine.start_gc_loop();
        assert!(engine.gc_loop_running());
        engine.shutdown().await.unwrap();
        assert!(!engine.gc_loop_running());
    }
}
