//! Memory subsystem: node model, sigil index, partitions and the engine
//! that composes them.

pub mod category;
mod engine;
pub mod node;
pub mod partition;
pub mod reconcile;
pub mod search;
pub mod sigil;
pub mod sigil_cache;

pub use category::{preferred_curve, profile, CategoryProfile};
pub use engine::{
    EngineStatistics, HealthReport, HealthStatus, MemoryEngine, MemoryEngineBuilder,
    SigilCacheStatistics,
};
pub use node::{initial_evolution_potential, initial_strength, MemoryNode, Position, Tier};
pub use partition::{
    compute_placement, harmonic_compatibility, score_partition, GrowthCurve, Partition,
    PartitionManager, PlacementRequest, ScoreBreakdown, GOLDEN_ANGLE_DEGREES,
};
pub use reconcile::{reconcile, ReconcileReport, RepairPlan};
pub use search::{SearchQuery, DEFAULT_SEARCH_LIMIT};
pub use sigil::{generate_signature, Sigil, SigilDescriptor, SigilEntry, SigilIndex};
pub use sigil_cache::{CacheStats, SigilCache};
