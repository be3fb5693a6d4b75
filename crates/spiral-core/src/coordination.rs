//! GC leadership.
//!
//! Only the leader of a shard may evict from it. Clustered deployments elect
//! the leader with an expiring lease in the shared backend; standalone
//! processes are always the leader.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use spiral_state::{lease_key, with_deadline, LeaseStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::config::CoordinationConfig;
use crate::error::EngineResult;
use crate::events::{EngineEvent, EventBus};

/// Decides whether this process may evict for a shard.
#[async_trait]
pub trait GcLeadership: Send + Sync {
    /// Acquire or renew leadership. Backend errors count as "not leader".
    async fn is_leader(&self, shard_id: u32) -> bool;

    /// Give leadership up voluntarily.
    async fn relinquish(&self, shard_id: u32);
}

/// Single-process deployments: always the leader.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandaloneLeadership;

#[async_trait]
impl GcLeadership for StandaloneLeadership {
    async fn is_leader(&self, _shard_id: u32) -> bool {
        true
    }

    async fn relinquish(&self, _shard_id: u32) {}
}

/// Lease-backed leadership over a shared [`LeaseStore`].
pub struct LeaseCoordinator {
    leases: Arc<dyn LeaseStore>,
    holder_id: String,
    ttl: Duration,
    op_timeout: Duration,
    leading: Mutex<HashSet<u32>>,
    events: Option<EventBus>,
}

impl LeaseCoordinator {
    pub fn new(leases: Arc<dyn LeaseStore>, holder_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            leases,
            holder_id: holder_id.into(),
            ttl,
            op_timeout: Duration::from_secs(2),
            leading: Mutex::new(HashSet::new()),
            events: None,
        }
    }

    pub fn from_config(leases: Arc<dyn LeaseStore>, config: &CoordinationConfig) -> Self {
        Self::new(leases, config.resolve_holder_id(), config.lease_ttl())
    }

    /// Publish `LeadershipChanged` on `bus`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Deadline for each lease call.
    pub fn with_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Whether the last attempt for `shard_id` succeeded.
    pub fn believes_leader(&self, shard_id: u32) -> bool {
        self.leading
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&shard_id)
    }

    /// One acquire-or-renew attempt, surfacing backend errors.
    #[instrument(skip(self), fields(holder_id = %self.holder_id))]
    pub async fn try_lead(&self, shard_id: u32) -> EngineResult<bool> {
        let key = lease_key(shard_id);
        let acquired = with_deadline(
            "lease.try_acquire",
            self.op_timeout,
            self.leases.try_acquire(&key, &self.holder_id, self.ttl),
        )
        .await?;
        self.record(shard_id, acquired);
        Ok(acquired)
    }

    fn record(&self, shard_id: u32, is_leader: bool) {
        let changed = {
            let mut leading = self.leading.lock().unwrap_or_else(|e| e.into_inner());
            if is_leader {
                leading.insert(shard_id)
            } else {
                leading.remove(&shard_id)
            }
        };
        if !changed {
            return;
        }
        match &self.events {
            Some(bus) => bus.publish(EngineEvent::LeadershipChanged {
                shard_id,
                holder_id: self.holder_id.clone(),
                is_leader,
            }),
            None => crate::obs::emit_leadership_changed(shard_id, &self.holder_id, is_leader),
        }
    }

    /// Renew every `interval` until the returned handle is stopped.
    ///
    /// A failed renewal demotes this process; the next successful one
    /// promotes it again.
    pub fn spawn_renewal(self: Arc<Self>, shard_id: u32, interval: Duration) -> RenewalHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let coordinator = self;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let leader = coordinator.is_leader(shard_id).await;
                        debug!(shard_id, leader, "Lease renewal tick");
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            coordinator.relinquish(shard_id).await;
        });
        RenewalHandle { stop: stop_tx, task }
    }
}

#[async_trait]
impl GcLeadership for LeaseCoordinator {
    async fn is_leader(&self, shard_id: u32) -> bool {
        match self.try_lead(shard_id).await {
            Ok(leader) => leader,
            Err(e) => {
                warn!(shard_id, error = %e, "Lease attempt failed; treating as not leader");
                self.record(shard_id, false);
                false
            }
        }
    }

    async fn relinquish(&self, shard_id: u32) {
        let key = lease_key(shard_id);
        let released = with_deadline(
            "lease.release",
            self.op_timeout,
            self.leases.release(&key, &self.holder_id),
        )
        .await;
        if let Err(e) = released {
            warn!(shard_id, error = %e, "Failed to release GC lease");
        }
        self.record(shard_id, false);
    }
}

/// Background lease renewal. Stop it to release the lease.
pub struct RenewalHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RenewalHandle {
    /// Stop renewing, release the lease and wait for the task.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Lease renewal task ended abnormally");
        }
    }
}
