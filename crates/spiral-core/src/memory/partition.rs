//! Partitions and deterministic spiral placement.
//!
//! A partition is a bounded container that lays its nodes out along one
//! growth curve. The manager scores existing partitions for every incoming
//! node, creates new ones up to a hard cap, and assigns each node a
//! golden-angle position on its partition's spiral.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::category::{preferred_curve, profile};
use super::node::{Position, Tier};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// Golden angle in degrees.
pub const GOLDEN_ANGLE_DEGREES: f64 = 137.507_764_050_037_85;

/// Fill ratio the scorer steers partitions towards.
pub const TARGET_FILL_RATIO: f64 = 0.7;

/// Radii are clamped here so snapshots stay finite.
const MAX_RADIUS: f64 = 1.0e6;

/// Content length at which an item counts as "large" for size scoring.
const LARGE_ITEM_BYTES: f64 = 4096.0;

const WEIGHT_CATEGORY: f64 = 0.30;
const WEIGHT_FILL: f64 = 0.25;
const WEIGHT_DEPTH: f64 = 0.20;
const WEIGHT_SIZE: f64 = 0.10;
const WEIGHT_HARMONIC: f64 = 0.15;

/// Small-integer frequency ratios treated as consonant.
const HARMONIC_RATIOS: [f64; 8] = [1.0, 2.0, 1.5, 4.0 / 3.0, 1.25, 5.0 / 3.0, 3.0, 4.0];

/// Family of curve a partition grows along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthCurve {
    SquareRoot,
    Exponential,
    Logarithmic,
    Linear,
    PowerLaw,
}

impl GrowthCurve {
    pub const ALL: [GrowthCurve; 5] = [
        GrowthCurve::SquareRoot,
        GrowthCurve::Exponential,
        GrowthCurve::Logarithmic,
        GrowthCurve::Linear,
        GrowthCurve::PowerLaw,
    ];

    /// Radius of the `index`-th placement.
    pub fn radius(self, index: u64) -> f64 {
        let n = index as f64;
        let r = match self {
            GrowthCurve::SquareRoot => 4.0 * n.sqrt(),
            GrowthCurve::Exponential => (0.01 * n).exp(),
            GrowthCurve::Logarithmic => 12.0 * n.ln_1p(),
            GrowthCurve::Linear => 1.0 + 0.75 * n,
            GrowthCurve::PowerLaw => 2.0 * n.powf(0.75),
        };
        r.min(MAX_RADIUS)
    }

    /// Characteristic frequency of the curve family.
    pub fn base_frequency(self) -> f64 {
        match self {
            GrowthCurve::SquareRoot => 1.618,
            GrowthCurve::Exponential => 2.0,
            GrowthCurve::Logarithmic => 1.414,
            GrowthCurve::Linear => 1.0,
            GrowthCurve::PowerLaw => 1.25,
        }
    }
}

impl std::fmt::Display for GrowthCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GrowthCurve::SquareRoot => "square_root",
            GrowthCurve::Exponential => "exponential",
            GrowthCurve::Logarithmic => "logarithmic",
            GrowthCurve::Linear => "linear",
            GrowthCurve::PowerLaw => "power_law",
        };
        f.write_str(name)
    }
}

/// A bounded-capacity container of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub id: String,
    pub growth_curve: GrowthCurve,
    pub capacity: usize,
    pub node_count: usize,
    /// Next placement ordinal. Monotonic, so positions never repeat after evictions.
    pub next_index: u64,
    /// Depth (0..=4) of the tier the partition was created for.
    pub depth: u8,
    pub frequency: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Partition {
    pub fn has_room(&self) -> bool {
        self.node_count < self.capacity
    }

    pub fn fill_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        self.node_count as f64 / self.capacity as f64
    }
}

/// What the scorer knows about an incoming node.
#[derive(Debug, Clone, Copy)]
pub struct PlacementRequest<'a> {
    pub category: &'a str,
    pub tier: Tier,
    /// Content length in bytes.
    pub size: usize,
    /// Characteristic frequency from the node's sigil descriptor.
    pub frequency: f64,
}

/// Per-criterion scores, each in `[0, 1]`, and their weighted total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub category: f64,
    pub fill: f64,
    pub depth: f64,
    pub size: f64,
    pub harmonic: f64,
    pub total: f64,
}

/// Score `partition` as a home for `req`.
pub fn score_partition(partition: &Partition, req: &PlacementRequest<'_>) -> ScoreBreakdown {
    let category = profile(req.category).affinity(partition.growth_curve);

    let fill_after = (partition.node_count + 1) as f64 / partition.capacity.max(1) as f64;
    let fill = (1.0 - (fill_after - TARGET_FILL_RATIO).abs() / TARGET_FILL_RATIO).max(0.0);

    let depth_gap = (f64::from(req.tier.depth()) - f64::from(partition.depth)).abs();
    let depth = 1.0 - depth_gap / 4.0;

    let size_ratio = (req.size as f64 / LARGE_ITEM_BYTES).min(1.0);
    let remaining = partition.capacity.saturating_sub(partition.node_count + 1) as f64
        / partition.capacity.max(1) as f64;
    let size = if size_ratio <= remaining {
        1.0
    } else {
        remaining / size_ratio
    };

    let harmonic = harmonic_compatibility(req.frequency, partition.frequency);

    let total = WEIGHT_CATEGORY * category
        + WEIGHT_FILL * fill
        + WEIGHT_DEPTH * depth
        + WEIGHT_SIZE * size
        + WEIGHT_HARMONIC * harmonic;

    ScoreBreakdown {
        category,
        fill,
        depth,
        size,
        harmonic,
        total,
    }
}

/// Closeness of two frequencies to a small-integer ratio, in `[0, 1]`.
pub fn harmonic_compatibility(a: f64, b: f64) -> f64 {
    if a <= 0.0 || b <= 0.0 || !a.is_finite() || !b.is_finite() {
        return 0.0;
    }
    let ratio = a.max(b) / a.min(b);
    let deviation = HARMONIC_RATIOS
        .iter()
        .map(|r| (ratio / r - 1.0).abs())
        .fold(f64::INFINITY, f64::min);
    (1.0 - deviation * 10.0).max(0.0)
}

/// Golden-angle placement of the `index`-th node on a `curve` spiral.
pub fn compute_placement(curve: GrowthCurve, index: u64, turns_per_partition: u64) -> Position {
    let angle = (index as f64 * GOLDEN_ANGLE_DEGREES) % 360.0;
    let radius = curve.radius(index);
    let radians = angle.to_radians();
    Position {
        index,
        angle,
        radius,
        x: radius * radians.cos(),
        y: radius * radians.sin(),
        turn: index / turns_per_partition.max(1),
    }
}

/// Owns every partition and decides where new nodes go.
#[derive(Debug, Clone)]
pub struct PartitionManager {
    partitions: HashMap<String, Partition>,
    max_partitions: usize,
    capacity: usize,
    min_placement_score: f64,
    turns_per_partition: u64,
}

impl PartitionManager {
    pub fn new(
        max_partitions: usize,
        capacity: usize,
        min_placement_score: f64,
        turns_per_partition: u64,
    ) -> Self {
        Self {
            partitions: HashMap::new(),
            max_partitions,
            capacity,
            min_placement_score,
            turns_per_partition,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.max_partitions,
            config.max_nodes_per_partition,
            config.min_placement_score,
            config.turns_per_partition,
        )
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn max_partitions(&self) -> usize {
        self.max_partitions
    }

    pub fn is_at_cap(&self) -> bool {
        self.partitions.len() >= self.max_partitions
    }

    pub fn get(&self, id: &str) -> Option<&Partition> {
        self.partitions.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Partition> {
        self.partitions.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }

    /// Insert a reloaded partition as-is.
    pub(crate) fn insert(&mut self, partition: Partition) {
        self.partitions.insert(partition.id.clone(), partition);
    }

    /// Create an empty partition for `(category, tier)`.
    pub fn create(&mut self, category: &str, tier: Tier, now: DateTime<Utc>) -> EngineResult<String> {
        if self.is_at_cap() {
            return Err(EngineError::CapacityExceeded {
                max_partitions: self.max_partitions,
            });
        }
        let curve = preferred_curve(category, tier);
        let ordinal = self.partitions.len();
        let partition = Partition {
            id: uuid::Uuid::new_v4().to_string(),
            growth_curve: curve,
            capacity: self.capacity,
            node_count: 0,
            next_index: 0,
            depth: tier.depth(),
            frequency: curve.base_frequency() * (1.0 + (ordinal % 4) as f64 * 0.25),
            created_at: now,
            updated_at: now,
        };
        info!(
            partition_id = %partition.id,
            curve = %curve,
            depth = partition.depth,
            total = ordinal + 1,
            "Created partition"
        );
        let id = partition.id.clone();
        self.partitions.insert(id.clone(), partition);
        Ok(id)
    }

    /// Recreate a partition under a known id (cold-start repair).
    pub(crate) fn restore(
        &mut self,
        id: &str,
        category: &str,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> &mut Partition {
        let curve = preferred_curve(category, tier);
        let ordinal = self.partitions.len();
        let capacity = self.capacity;
        self.partitions
            .entry(id.to_string())
            .or_insert_with(|| Partition {
                id: id.to_string(),
                growth_curve: curve,
                capacity,
                node_count: 0,
                next_index: 0,
                depth: tier.depth(),
                frequency: curve.base_frequency() * (1.0 + (ordinal % 4) as f64 * 0.25),
                created_at: now,
                updated_at: now,
            })
    }

    /// Best partition with spare capacity for `req`, creating one if needed.
    ///
    /// A new partition is created when nothing has room, or when the best
    /// candidate scores below `min_placement_score` and the cap allows it.
    /// Fails with `CapacityExceeded` only when the cap is reached and every
    /// partition is full.
    pub fn select(&mut self, req: &PlacementRequest<'_>, now: DateTime<Utc>) -> EngineResult<String> {
        let best = self
            .partitions
            .values()
            .filter(|p| p.has_room())
            .map(|p| (score_partition(p, req).total, p))
            .max_by(|(sa, pa), (sb, pb)| {
                sa.total_cmp(sb)
                    .then_with(|| pb.created_at.cmp(&pa.created_at))
                    .then_with(|| pb.id.cmp(&pa.id))
            })
            .map(|(score, p)| (score, p.id.clone()));

        match best {
            Some((score, id)) if score >= self.min_placement_score || self.is_at_cap() => {
                debug!(partition_id = %id, score, "Selected partition");
                Ok(id)
            }
            _ => self.create(req.category, req.tier, now),
        }
    }

    /// Reserve the next slot in `partition_id` and return its position.
    pub fn place(&mut self, partition_id: &str, now: DateTime<Utc>) -> EngineResult<Position> {
        let turns = self.turns_per_partition;
        let max_partitions = self.max_partitions;
        let partition = self
            .partitions
            .get_mut(partition_id)
            .ok_or(EngineError::CapacityExceeded { max_partitions })?;
        if !partition.has_room() {
            return Err(EngineError::CapacityExceeded { max_partitions });
        }
        let position = compute_placement(partition.growth_curve, partition.next_index, turns);
        partition.next_index += 1;
        partition.node_count += 1;
        partition.updated_at = now;
        Ok(position)
    }

    /// Give back one slot. Returns false if the partition is unknown.
    pub fn release(&mut self, partition_id: &str, now: DateTime<Utc>) -> bool {
        match self.partitions.get_mut(partition_id) {
            Some(partition) => {
                partition.node_count = partition.node_count.saturating_sub(1);
                partition.updated_at = now;
                true
            }
            None => false,
        }
    }
}
