//! Engine notifications.
//!
//! Every event is logged through [`crate::obs`] and fanned out on a
//! `tokio::sync::broadcast` channel for external observability consumers.
//! Publishing never blocks and never fails; slow subscribers lag.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::gc::GcSummary;
use crate::memory::{ReconcileReport, Tier};
use crate::obs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    NodeStored {
        id: String,
        signature: String,
        partition_id: String,
        category: String,
        tier: Tier,
    },
    EvictionBatch {
        shard_id: u32,
        summary: GcSummary,
    },
    LeadershipChanged {
        shard_id: u32,
        holder_id: String,
        is_leader: bool,
    },
    InitializationComplete {
        nodes: usize,
        partitions: usize,
        sigils: usize,
        report: ReconcileReport,
    },
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::NodeStored { .. } => "node_stored",
            EngineEvent::EvictionBatch { .. } => "eviction_batch",
            EngineEvent::LeadershipChanged { .. } => "leadership_changed",
            EngineEvent::InitializationComplete { .. } => "initialization_complete",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Log `event` and hand it to current subscribers.
    pub fn publish(&self, event: EngineEvent) {
        match &event {
            EngineEvent::NodeStored {
                id,
                signature,
                partition_id,
                ..
            } => obs::emit_node_stored(id, signature, partition_id),
            EngineEvent::EvictionBatch { shard_id, summary } => {
                obs::emit_eviction_batch(*shard_id, summary)
            }
            EngineEvent::LeadershipChanged {
                shard_id,
                holder_id,
                is_leader,
            } => obs::emit_leadership_changed(*shard_id, holder_id, *is_leader),
            EngineEvent::InitializationComplete {
                nodes,
                partitions,
                sigils,
                report,
            } => obs::emit_initialization_complete(*nodes, *partitions, *sigils, report),
        }
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
