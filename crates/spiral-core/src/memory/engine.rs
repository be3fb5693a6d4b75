//! The memory engine: node CRUD over the sigil index, partition manager and
//! GC queue, mirrored write-through to a [`KvStore`].
//!
//! All in-memory structures live in one [`EngineState`] behind a single
//! async mutex so that placement, sigil registration and queue updates for a
//! write are applied as a unit. Persistence is the only suspension point.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use spiral_state::{
    node_key, partition_key, sigil_key, with_deadline, KvStore, NODE_PREFIX, PARTITION_PREFIX,
    SIGIL_PREFIX,
};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::node::{initial_evolution_potential, initial_strength, MemoryNode, Tier};
use super::partition::{Partition, PartitionManager, PlacementRequest};
use super::reconcile::{reconcile, ReconcileReport};
use super::search::{rank, SearchQuery};
use super::sigil::{generate_signature, Sigil, SigilEntry, SigilIndex};
use super::sigil_cache::CacheStats;
use crate::clock::{Clock, SystemClock};
use crate::config::{connect_backend, EngineConfig};
use crate::coordination::{GcLeadership, LeaseCoordinator, RenewalHandle, StandaloneLeadership};
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::gc::{EligibilityPolicy, GcLoopHandle, GcQueue};
use crate::metrics::METRICS;
use crate::obs;

/// Everything guarded by the engine lock.
pub(crate) struct EngineState {
    pub(crate) initialized: bool,
    pub(crate) nodes: HashMap<String, MemoryNode>,
    pub(crate) partitions: PartitionManager,
    pub(crate) sigils: SigilIndex,
    pub(crate) queue: GcQueue,
}

/// A node removed from memory, with the peers whose association sets changed.
pub(crate) struct Evicted {
    pub(crate) node: MemoryNode,
    pub(crate) peers: Vec<String>,
}

impl EngineState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            initialized: false,
            nodes: HashMap::new(),
            partitions: PartitionManager::from_config(config),
            sigils: SigilIndex::new(config.sigil_cache_size),
            queue: GcQueue::new(),
        }
    }

    /// Record a read of `id` and re-key its queue slot.
    fn touch(&mut self, id: &str, now: chrono::DateTime<chrono::Utc>) -> Option<MemoryNode> {
        let node = self.nodes.get_mut(id)?;
        node.touch(now);
        self.queue.upsert(id, node.last_accessed);
        Some(node.clone())
    }

    /// Link two live nodes. Returns false if either is missing or they are
    /// already linked.
    fn link(&mut self, a: &str, b: &str) -> bool {
        if a == b || !self.nodes.contains_key(a) || !self.nodes.contains_key(b) {
            return false;
        }
        let mut added = false;
        if let Some(node) = self.nodes.get_mut(a) {
            added |= node.associations.insert(b.to_string());
        }
        if let Some(node) = self.nodes.get_mut(b) {
            added |= node.associations.insert(a.to_string());
        }
        added
    }

    /// Remove `id` from every in-memory structure.
    pub(crate) fn evict(&mut self, id: &str, now: chrono::DateTime<chrono::Utc>) -> Option<Evicted> {
        let node = self.nodes.remove(id)?;
        self.queue.remove(id);
        self.sigils.unregister(&node.sigil.signature);
        self.partitions.release(&node.partition_id, now);
        let mut peers = Vec::new();
        for peer in &node.associations {
            if let Some(other) = self.nodes.get_mut(peer) {
                if other.associations.remove(id) {
                    peers.push(peer.clone());
                }
            }
        }
        Some(Evicted { node, peers })
    }
}

/// Counts reported by [`MemoryEngine::get_statistics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatistics {
    pub total_nodes: usize,
    pub total_partitions: usize,
    pub total_sigils: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_tier: BTreeMap<String, usize>,
    pub avg_strength: f64,
    pub gc_queue_size: usize,
    pub gc_deferred: usize,
    pub sigil_cache: SigilCacheStatistics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigilCacheStatistics {
    pub len: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

impl From<CacheStats> for SigilCacheStatistics {
    fn from(s: CacheStats) -> Self {
        Self {
            len: s.len,
            capacity: s.capacity,
            hits: s.hits,
            misses: s.misses,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HealthReport {
    fn new(status: HealthStatus, reason: Option<String>) -> Self {
        Self { status, reason }
    }
}

/// Fill ratio across all partitions above which a capped engine is degraded.
const DEGRADED_FILL_RATIO: f64 = 0.9;

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) kv: Arc<dyn KvStore>,
    pub(crate) leadership: Arc<dyn GcLeadership>,
    pub(crate) coordinator: Option<Arc<LeaseCoordinator>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) events: EventBus,
    pub(crate) policy: EligibilityPolicy,
    pub(crate) state: Mutex<EngineState>,
    link_tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    pub(crate) background: std::sync::Mutex<Background>,
}

#[derive(Default)]
pub(crate) struct Background {
    pub(crate) gc: Option<GcLoopHandle>,
    pub(crate) renewal: Option<RenewalHandle>,
}

/// Handle to a memory engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryEngine {
    pub(crate) inner: Arc<EngineInner>,
}

/// Assembles a [`MemoryEngine`] from injected collaborators.
pub struct MemoryEngineBuilder {
    config: EngineConfig,
    kv: Option<Arc<dyn KvStore>>,
    leadership: Option<Arc<dyn GcLeadership>>,
    coordinator: Option<Arc<LeaseCoordinator>>,
    clock: Option<Arc<dyn Clock>>,
    events: Option<EventBus>,
}

impl MemoryEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            kv: None,
            leadership: None,
            coordinator: None,
            clock: None,
            events: None,
        }
    }

    pub fn kv(mut self, kv: Arc<dyn KvStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    pub fn leadership(mut self, leadership: Arc<dyn GcLeadership>) -> Self {
        self.leadership = Some(leadership);
        self
    }

    /// Use a lease coordinator for leadership; its lease is renewed by
    /// [`MemoryEngine::start_gc_loop`].
    pub fn coordinator(mut self, coordinator: Arc<LeaseCoordinator>) -> Self {
        self.leadership = Some(coordinator.clone());
        self.coordinator = Some(coordinator);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> EngineResult<MemoryEngine> {
        self.config.validate()?;
        let kv = self
            .kv
            .ok_or_else(|| EngineError::Config("a persistence backend is required".into()))?;
        let events = self
            .events
            .unwrap_or_else(|| EventBus::new(self.config.event_buffer));
        let policy = EligibilityPolicy::new(self.config.gc.thresholds.clone());
        let state = EngineState::new(&self.config);
        Ok(MemoryEngine {
            inner: Arc::new(EngineInner {
                kv,
                leadership: self
                    .leadership
                    .unwrap_or_else(|| Arc::new(StandaloneLeadership)),
                coordinator: self.coordinator,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                events,
                policy,
                state: Mutex::new(state),
                link_tasks: std::sync::Mutex::new(Vec::new()),
                background: std::sync::Mutex::new(Background::default()),
                config: self.config,
            }),
        })
    }
}

impl MemoryEngine {
    pub fn builder(config: EngineConfig) -> MemoryEngineBuilder {
        MemoryEngineBuilder::new(config)
    }

    /// Connect the configured backend and wire leadership.
    ///
    /// Clustered configurations get a [`LeaseCoordinator`] over the same
    /// backend; otherwise the engine is always the GC leader.
    pub async fn connect(config: EngineConfig) -> EngineResult<Self> {
        let handles = connect_backend(&config.backend).await?;
        let events = EventBus::new(config.event_buffer);
        let mut builder = Self::builder(config.clone())
            .kv(handles.kv)
            .events(events.clone());
        if config.coordination.clustered {
            let coordinator = LeaseCoordinator::from_config(handles.leases, &config.coordination)
                .with_timeout(config.persistence_timeout())
                .with_events(events);
            builder = builder.coordinator(Arc::new(coordinator));
        }
        builder.build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.inner.clock.now()
    }

    pub(crate) async fn persist<T: Serialize>(&self, key: &str, value: &T) -> EngineResult<()> {
        let value = serde_json::to_value(value)?;
        with_deadline(
            "kv.set",
            self.inner.config.persistence_timeout(),
            self.inner.kv.set(key, value),
        )
        .await?;
        Ok(())
    }

    pub(crate) async fn unpersist(&self, key: &str) -> EngineResult<()> {
        with_deadline(
            "kv.delete",
            self.inner.config.persistence_timeout(),
            self.inner.kv.delete(key),
        )
        .await?;
        Ok(())
    }

    async fn load_prefix<T: serde::de::DeserializeOwned>(
        &self,
        prefix: &str,
        report: &mut ReconcileReport,
    ) -> EngineResult<Vec<T>> {
        let timeout = self.inner.config.persistence_timeout();
        let keys = with_deadline("kv.keys", timeout, self.inner.kv.keys(prefix)).await?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(raw) = with_deadline("kv.get", timeout, self.inner.kv.get(&key)).await? else {
                continue;
            };
            match serde_json::from_value::<T>(raw) {
                Ok(value) => out.push(value),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable snapshot");
                    report.snapshots_skipped += 1;
                }
            }
        }
        Ok(out)
    }

    /// Reload every snapshot, repair drift and open for traffic.
    ///
    /// Creates a first partition when none was persisted. Calling it again
    /// on an initialized engine is a no-op.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> EngineResult<ReconcileReport> {
        let mut state = self.inner.state.lock().await;
        if state.initialized {
            return Ok(ReconcileReport::default());
        }
        let timeout = self.inner.config.persistence_timeout();
        with_deadline("kv.init", timeout, self.inner.kv.init()).await?;

        let now = self.now();
        let mut report = ReconcileReport::default();
        let loaded_nodes: Vec<MemoryNode> = self.load_prefix(NODE_PREFIX, &mut report).await?;
        let loaded_partitions: Vec<Partition> =
            self.load_prefix(PARTITION_PREFIX, &mut report).await?;
        let loaded_sigils: Vec<SigilEntry> = self.load_prefix(SIGIL_PREFIX, &mut report).await?;

        let mut fresh = EngineState::new(&self.inner.config);
        for partition in loaded_partitions {
            fresh.partitions.insert(partition);
        }
        fresh.nodes = loaded_nodes
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();

        let (repairs, plan) = reconcile(
            &mut fresh.nodes,
            &mut fresh.partitions,
            &mut fresh.sigils,
            loaded_sigils,
            now,
        );
        let report = ReconcileReport {
            snapshots_skipped: report.snapshots_skipped,
            ..repairs
        };

        for signature in &plan.sigils_to_delete {
            self.unpersist(&sigil_key(signature)).await?;
        }
        for entry in &plan.sigils_to_write {
            self.persist(&sigil_key(&entry.signature), entry).await?;
        }
        for id in &plan.nodes {
            if let Some(node) = fresh.nodes.get(id) {
                self.persist(&node_key(id), node).await?;
            }
        }
        for pid in &plan.partitions {
            if let Some(partition) = fresh.partitions.get(pid) {
                self.persist(&partition_key(pid), partition).await?;
            }
        }

        if fresh.partitions.is_empty() {
            let pid = fresh.partitions.create("general", Tier::Shallow, now)?;
            if let Some(partition) = fresh.partitions.get(&pid) {
                self.persist(&partition_key(&pid), partition).await?;
            }
        }

        for node in fresh.nodes.values() {
            fresh.queue.upsert(&node.id, node.last_accessed);
        }
        fresh.initialized = true;

        let (nodes, partitions, sigils) =
            (fresh.nodes.len(), fresh.partitions.len(), fresh.sigils.len());
        *state = fresh;
        drop(state);

        if !report.is_clean() {
            info!(?report, "Reconciled persisted state");
        }
        self.inner.events.publish(EngineEvent::InitializationComplete {
            nodes,
            partitions,
            sigils,
            report: report.clone(),
        });
        Ok(report)
    }

    pub async fn is_initialized(&self) -> bool {
        self.inner.state.lock().await.initialized
    }

    /// Store a new node.
    ///
    /// Up to `deferred_association_threshold` peers are linked before this
    /// returns; the rest are linked by a background task. Unknown peer ids
    /// are ignored.
    #[instrument(skip(self, content, associations), fields(content_len = content.len()))]
    pub async fn store(
        &self,
        content: &str,
        category: &str,
        tier: Tier,
        associations: &[String],
    ) -> EngineResult<MemoryNode> {
        let mut state = self.inner.state.lock().await;
        if !state.initialized {
            return Err(EngineError::NotInitialized);
        }
        let now = self.now();
        let id = uuid::Uuid::new_v4().to_string();

        let base = generate_signature(content, category, tier);
        let signature = state.sigils.claim(&base.signature, &id);
        if signature != base.signature {
            warn!(base = %base.signature, signature = %signature, "Signature collision; suffixed");
        }
        let sigil = Sigil {
            signature,
            descriptor: base.descriptor,
        };

        let request = PlacementRequest {
            category,
            tier,
            size: content.len(),
            frequency: sigil.descriptor.frequency,
        };
        let partition_id = state.partitions.select(&request, now)?;
        let position = state.partitions.place(&partition_id, now)?;

        let peers: Vec<String> = associations
            .iter()
            .filter(|p| state.nodes.contains_key(p.as_str()))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if peers.len() < associations.len() {
            debug!(
                requested = associations.len(),
                live = peers.len(),
                "Ignoring unknown or duplicate peers"
            );
        }
        let split = peers.len().min(self.inner.config.deferred_association_threshold);
        let (immediate, deferred) = peers.split_at(split);

        let complexity = sigil.descriptor.complexity;
        let node = MemoryNode {
            id: id.clone(),
            content: content.to_string(),
            category: category.to_string(),
            tier,
            sigil,
            partition_id: partition_id.clone(),
            position,
            associations: immediate.iter().cloned().collect(),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            strength: initial_strength(tier, complexity),
            evolution_potential: initial_evolution_potential(tier, complexity, peers.len()),
        };

        state.sigils.register(&node.sigil.signature, &id);
        state.queue.upsert(&id, now);
        state.nodes.insert(id.clone(), node.clone());
        for peer in immediate {
            if let Some(other) = state.nodes.get_mut(peer) {
                other.associations.insert(id.clone());
            }
        }
        METRICS.inc_nodes_stored();

        self.persist(&node_key(&id), &node).await?;
        if let Some(partition) = state.partitions.get(&partition_id) {
            self.persist(&partition_key(&partition_id), partition).await?;
        }
        let entry = SigilEntry {
            signature: node.sigil.signature.clone(),
            memory_id: id.clone(),
        };
        self.persist(&sigil_key(&entry.signature), &entry).await?;
        for peer in immediate {
            if let Some(other) = state.nodes.get(peer) {
                self.persist(&node_key(peer), other).await?;
            }
        }
        drop(state);

        if !deferred.is_empty() {
            self.spawn_links(id.clone(), deferred.to_vec());
        }

        self.inner.events.publish(EngineEvent::NodeStored {
            id: node.id.clone(),
            signature: node.sigil.signature.clone(),
            partition_id: node.partition_id.clone(),
            category: node.category.clone(),
            tier: node.tier,
        });
        Ok(node)
    }

    fn spawn_links(&self, id: String, peers: Vec<String>) {
        METRICS.inc_deferred_links();
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            for peer in peers {
                if let Err(e) = engine.associate(&id, &peer).await {
                    obs::emit_best_effort_failure("associate", &peer, &e);
                }
            }
        });
        let mut tasks = self
            .inner
            .link_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Wait for background association tasks spawned by `store`.
    pub async fn flush_pending_links(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = self
                .inner
                .link_tasks
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            tasks.drain(..).collect()
        };
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Association task failed");
            }
        }
    }

    /// Symmetrically link two live nodes. Returns false if either is missing
    /// or they were already linked.
    #[instrument(skip(self))]
    pub async fn associate(&self, a: &str, b: &str) -> EngineResult<bool> {
        let mut state = self.inner.state.lock().await;
        if !state.initialized {
            return Err(EngineError::NotInitialized);
        }
        if !state.link(a, b) {
            return Ok(false);
        }
        for id in [a, b] {
            if let Some(node) = state.nodes.get(id) {
                self.persist(&node_key(id), node).await?;
            }
        }
        Ok(true)
    }

    /// Fetch a node by id, recording the access.
    #[instrument(skip(self))]
    pub async fn retrieve(&self, id: &str) -> EngineResult<Option<MemoryNode>> {
        let mut state = self.inner.state.lock().await;
        if !state.initialized {
            return Err(EngineError::NotInitialized);
        }
        let Some(node) = state.touch(id, self.now()) else {
            return Ok(None);
        };
        self.persist(&node_key(id), &node).await?;
        Ok(Some(node))
    }

    /// Fetch a node by sigil signature, recording the access.
    #[instrument(skip(self))]
    pub async fn retrieve_by_signature(&self, signature: &str) -> EngineResult<Option<MemoryNode>> {
        let mut state = self.inner.state.lock().await;
        if !state.initialized {
            return Err(EngineError::NotInitialized);
        }
        let Some(id) = state.sigils.lookup(signature) else {
            return Ok(None);
        };
        let Some(node) = state.touch(&id, self.now()) else {
            return Ok(None);
        };
        self.persist(&node_key(&id), &node).await?;
        Ok(Some(node))
    }

    /// Substring search. Does not count as an access.
    pub async fn search(&self, query: &SearchQuery) -> EngineResult<Vec<MemoryNode>> {
        let state = self.inner.state.lock().await;
        if !state.initialized {
            return Err(EngineError::NotInitialized);
        }
        Ok(rank(state.nodes.values(), query))
    }

    pub async fn get_statistics(&self) -> EngineResult<EngineStatistics> {
        let state = self.inner.state.lock().await;
        if !state.initialized {
            return Err(EngineError::NotInitialized);
        }
        let mut by_category = BTreeMap::new();
        let mut by_tier = BTreeMap::new();
        let mut strength = 0.0;
        for node in state.nodes.values() {
            *by_category.entry(node.category.clone()).or_insert(0) += 1;
            *by_tier.entry(node.tier.as_str().to_string()).or_insert(0) += 1;
            strength += node.strength;
        }
        let total_nodes = state.nodes.len();
        Ok(EngineStatistics {
            total_nodes,
            total_partitions: state.partitions.len(),
            total_sigils: state.sigils.len(),
            by_category,
            by_tier,
            avg_strength: if total_nodes == 0 {
                0.0
            } else {
                strength / total_nodes as f64
            },
            gc_queue_size: state.queue.len(),
            gc_deferred: state.queue.deferred_len(),
            sigil_cache: state.sigils.cache_stats().into(),
        })
    }

    /// Probe the backend and check partition headroom.
    pub async fn health_check(&self) -> HealthReport {
        let (initialized, at_cap, fill) = {
            let state = self.inner.state.lock().await;
            let capacity: usize = state.partitions.iter().map(|p| p.capacity).sum();
            let used: usize = state.partitions.iter().map(|p| p.node_count).sum();
            let fill = if capacity == 0 {
                0.0
            } else {
                used as f64 / capacity as f64
            };
            (state.initialized, state.partitions.is_at_cap(), fill)
        };
        if !initialized {
            return HealthReport::new(HealthStatus::Unhealthy, Some("not initialized".into()));
        }
        let probe = with_deadline(
            "kv.get",
            self.inner.config.persistence_timeout(),
            self.inner.kv.get("health:probe"),
        )
        .await;
        if let Err(e) = probe {
            return HealthReport::new(
                HealthStatus::Unhealthy,
                Some(format!("persistence unreachable: {e}")),
            );
        }
        if at_cap && fill >= 1.0 {
            return HealthReport::new(
                HealthStatus::Degraded,
                Some("partition capacity exhausted".into()),
            );
        }
        if at_cap && fill >= DEGRADED_FILL_RATIO {
            return HealthReport::new(
                HealthStatus::Degraded,
                Some(format!("partition capacity {:.0}% used", fill * 100.0)),
            );
        }
        HealthReport::new(HealthStatus::Healthy, None)
    }

    /// Stop background work, flush pending links and close for traffic.
    ///
    /// Nothing is deleted; a later `initialize` reloads the same state.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.stop_gc_loop().await;
        self.flush_pending_links().await;
        let stats = self.get_statistics().await.ok();
        {
            let mut state = self.inner.state.lock().await;
            state.initialized = false;
        }
        METRICS.flush();
        match stats {
            Some(s) => info!(
                nodes = s.total_nodes,
                partitions = s.total_partitions,
                sigils = s.total_sigils,
                "Memory engine shut down"
            ),
            None => info!("Memory engine shut down before initialization"),
        }
        Ok(())
    }

    /// Raw snapshot of `key`, for operator tooling.
    pub async fn snapshot(&self, key: &str) -> EngineResult<Option<Value>> {
        Ok(with_deadline(
            "kv.get",
            self.inner.config.persistence_timeout(),
            self.inner.kv.get(key),
        )
        .await?)
    }

    /// Current `last_accessed` key of `id` in the GC queue.
    pub async fn gc_queue_key(&self, id: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        self.inner.state.lock().await.queue.key_of(id)
    }

    /// Partition snapshot by id.
    pub async fn partition(&self, id: &str) -> Option<Partition> {
        self.inner.state.lock().await.partitions.get(id).cloned()
    }

    pub async fn partitions(&self) -> Vec<Partition> {
        let state = self.inner.state.lock().await;
        let mut all: Vec<Partition> = state.partitions.iter().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spiral_state::MemoryKvStore;

    async fn engine() -> (MemoryEngine, Arc<MemoryKvStore>) {
        let kv = Arc::new(MemoryKvStore::new());
        let engine = MemoryEngine::builder(EngineConfig::in_memory())
            .kv(kv.clone())
            .build()
            .unwrap();
        engine.initialize().await.unwrap();
        (engine, kv)
    }

    #[tokio::test]
    async fn test_operations_require_initialize() {
        let engine = MemoryEngine::builder(EngineConfig::in_memory())
            .kv(Arc::new(MemoryKvStore::new()))
            .build()
            .unwrap();
        let err = engine
            .store("x", "general", Tier::Shallow, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotInitialized));
        assert!(matches!(
            engine.retrieve("x").await,
            Err(EngineError::NotInitialized)
        ));
        assert_eq!(engine.health_check().await.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_builder_requires_backend() {
        let err = MemoryEngine::builder(EngineConfig::in_memory())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn test_initialize_creates_first_partition() {
        let (engine, kv) = engine().await;
        assert_eq!(engine.partitions().await.len(), 1);
        assert_eq!(kv.keys(PARTITION_PREFIX).await.unwrap().len(), 1);
        assert_eq!(engine.health_check().await.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_store_writes_three_keys() {
        let (engine, kv) = engine().await;
        let node = engine
            .store("hello", "general", Tier::Shallow, &[])
            .await
            .unwrap();
        assert!(kv.get(&node_key(&node.id)).await.unwrap().is_some());
        assert!(kv
            .get(&partition_key(&node.partition_id))
            .await
            .unwrap()
            .is_some());
        let entry = kv.get(&sigil_key(&node.sigil.signature)).await.unwrap().unwrap();
        assert_eq!(entry["memoryId"], node.id);
    }

    #[tokio::test]
    async fn test_associations_are_symmetric() {
        let (engine, _) = engine().await;
        let a = engine.store("a", "general", Tier::Shallow, &[]).await.unwrap();
        let b = engine
            .store("b", "general", Tier::Shallow, &[a.id.clone(), "ghost".into()])
            .await
            .unwrap();
        assert_eq!(b.associations.len(), 1);
        let a = engine.retrieve(&a.id).await.unwrap().unwrap();
        assert!(a.associations.contains(&b.id));
    }

    #[tokio::test]
    async fn test_search_does_not_touch() {
        let (engine, _) = engine().await;
        let node = engine
            .store("needle in a haystack", "general", Tier::Shallow, &[])
            .await
            .unwrap();
        let hits = engine.search(&SearchQuery::new("needle")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].access_count, 0);
        assert_eq!(engine.gc_queue_key(&node.id).await, Some(node.last_accessed));
    }

    #[tokio::test]
    async fn test_statistics_group_by_category_and_tier() {
        let (engine, _) = engine().await;
        engine.store("a", "general", Tier::Shallow, &[]).await.unwrap();
        engine.store("b", "technical", Tier::Deep, &[]).await.unwrap();
        engine.store("c", "technical", Tier::Deep, &[]).await.unwrap();

        let stats = engine.get_statistics().await.unwrap();
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.total_sigils, 3);
        assert_eq!(stats.by_category["technical"], 2);
        assert_eq!(stats.by_tier["deep"], 2);
        assert_eq!(stats.gc_queue_size, 3);
        assert!(stats.avg_strength > 0.0);
    }

    #[tokio::test]
    async fn test_health_degrades_when_capacity_exhausted() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut config = EngineConfig::in_memory();
        config.max_partitions = 1;
        config.max_nodes_per_partition = 2;
        let engine = MemoryEngine::builder(config).kv(kv).build().unwrap();
        engine.initialize().await.unwrap();
        engine.store("a", "general", Tier::Shallow, &[]).await.unwrap();
        engine.store("b", "general", Tier::Shallow, &[]).await.unwrap();

        let err = engine
            .store("c", "general", Tier::Shallow, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CapacityExceeded { .. }));
        let health = engine.health_check().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(health.reason.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_closes_engine_without_deleting() {
        let (engine, kv) = engine().await;
        engine.store("keep me", "general", Tier::Shallow, &[]).await.unwrap();
        let before = kv.len();
        engine.shutdown().await.unwrap();
        assert!(!engine.is_initialized().await);
        assert_eq!(kv.len(), before);
    }
}
