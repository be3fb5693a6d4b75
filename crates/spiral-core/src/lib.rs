//! Spiral Core Library
//!
//! Tiered, content-addressable memory engine. Nodes are placed on
//! golden-angle spirals inside bounded partitions, indexed by a
//! content-derived sigil, mirrored write-through to a pluggable backend and
//! evicted by a time-boxed, lease-coordinated garbage collector.
//!
//! ## Key Components
//!
//! - [`MemoryEngine`]: store / retrieve / search / statistics / health
//! - [`PartitionManager`]: partition scoring, creation and placement
//! - [`SigilIndex`]: signature registry behind an LFU cache
//! - [`GcQueue`] and [`EligibilityPolicy`]: what the collector evicts and when
//! - [`LeaseCoordinator`]: one GC leader per shard over a shared backend

pub mod clock;
pub mod config;
pub mod coordination;
pub mod error;
pub mod events;
pub mod gc;
pub mod memory;
pub mod metrics;
pub mod obs;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    connect_backend, BackendConfig, BackendHandles, CoordinationConfig, EligibilityThresholds,
    EngineConfig, GcConfig,
};
pub use coordination::{GcLeadership, LeaseCoordinator, RenewalHandle, StandaloneLeadership};
pub use error::{EngineError, EngineResult};
pub use events::{EngineEvent, EventBus};
pub use gc::{EligibilityPolicy, GcQueue, GcSummary, Ineligibility};
pub use memory::{
    compute_placement, generate_signature, EngineStatistics, GrowthCurve, HealthReport,
    HealthStatus, MemoryEngine, MemoryEngineBuilder, MemoryNode, Partition, PartitionManager,
    Position, ReconcileReport, SearchQuery, Sigil, SigilDescriptor, SigilEntry, SigilIndex, Tier,
};
pub use metrics::{Metrics, MetricsSnapshot, METRICS};

pub use spiral_state::{KvStore, LeaseStore, MemoryKvStore, RemoteConfig, StorageError};
