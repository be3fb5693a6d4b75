//! Memory node model.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sigil::Sigil;
use crate::error::EngineError;

/// Importance/permanence classification. Governs GC eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Surface,
    Shallow,
    Deep,
    Core,
    Permanent,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Surface,
        Tier::Shallow,
        Tier::Deep,
        Tier::Core,
        Tier::Permanent,
    ];

    /// Depth on the 0 (surface) ..= 4 (permanent) scale.
    pub fn depth(self) -> u8 {
        match self {
            Tier::Surface => 0,
            Tier::Shallow => 1,
            Tier::Deep => 2,
            Tier::Core => 3,
            Tier::Permanent => 4,
        }
    }

    /// Protected tiers are never evicted.
    pub fn is_protected(self) -> bool {
        matches!(self, Tier::Core | Tier::Permanent)
    }

    /// Strength a node of this tier starts from.
    pub fn base_strength(self) -> f64 {
        match self {
            Tier::Surface => 0.2,
            Tier::Shallow => 0.35,
            Tier::Deep => 0.55,
            Tier::Core => 0.8,
            Tier::Permanent => 1.0,
        }
    }

    /// Single-character code used in sigil signatures.
    pub fn glyph(self) -> char {
        match self {
            Tier::Surface => 'S',
            Tier::Shallow => 'L',
            Tier::Deep => 'D',
            Tier::Core => 'C',
            Tier::Permanent => 'P',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Surface => "surface",
            Tier::Shallow => "shallow",
            Tier::Deep => "deep",
            Tier::Core => "core",
            Tier::Permanent => "permanent",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "surface" => Ok(Tier::Surface),
            "shallow" => Ok(Tier::Shallow),
            "deep" => Ok(Tier::Deep),
            "core" => Ok(Tier::Core),
            "permanent" => Ok(Tier::Permanent),
            other => Err(EngineError::InvalidTier(other.to_string())),
        }
    }
}

/// Deterministic placement of a node on its partition's spiral.
///
/// Descriptive only; never used for lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Placement ordinal within the partition.
    pub index: u64,
    /// Degrees in `[0, 360)`.
    pub angle: f64,
    pub radius: f64,
    pub x: f64,
    pub y: f64,
    pub turn: u64,
}

/// A stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryNode {
    pub id: String,
    pub content: String,
    pub category: String,
    pub tier: Tier,
    pub sigil: Sigil,
    pub partition_id: String,
    pub position: Position,
    /// Peer ids. Always mirrored on the peer.
    pub associations: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    /// In `[0, 1]`; fixed at creation.
    pub strength: f64,
    /// In `[0, 1]`; fixed at creation.
    pub evolution_potential: f64,
}

impl MemoryNode {
    /// Record one read at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
        self.access_count += 1;
    }
}

/// Strength at creation: the tier's base, nudged by content complexity.
pub fn initial_strength(tier: Tier, complexity: f64) -> f64 {
    (tier.base_strength() * (0.8 + 0.2 * complexity.clamp(0.0, 1.0))).clamp(0.0, 1.0)
}

/// How much room the node has to grow: shallow, complex, well-connected
/// nodes score highest.
pub fn initial_evolution_potential(tier: Tier, complexity: f64, associations: usize) -> f64 {
    let shallowness = 1.0 - f64::from(tier.depth()) / 4.0;
    let connectivity = associations.min(10) as f64 / 10.0;
    (0.5 * shallowness + 0.3 * complexity.clamp(0.0, 1.0) + 0.2 * connectivity).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_round_trips_through_str() {
        for tier in Tier::ALL {
            assert_eq!(tier.as_str().parse::<Tier>().unwrap(), tier);
        }
        assert!(matches!(
            "abyssal".parse::<Tier>(),
            Err(EngineError::InvalidTier(_))
        ));
    }

    #[test]
    fn test_protected_tiers() {
        assert!(Tier::Core.is_protected());
        assert!(Tier::Permanent.is_protected());
        assert!(!Tier::Deep.is_protected());
    }

    #[test]
    fn test_strength_orders_by_tier() {
        let surface = initial_strength(Tier::Surface, 1.0);
        let permanent = initial_strength(Tier::Permanent, 0.0);
        assert!(surface < 0.3);
        assert!(permanent >= 0.8);
        assert!(initial_strength(Tier::Permanent, 1.0) <= 1.0);
    }

    #[test]
    fn test_evolution_potential_is_bounded() {
        let p = initial_evolution_potential(Tier::Surface, 1.0, 50);
        assert!((0.0..=1.0).contains(&p));
        assert!(
            initial_evolution_potential(Tier::Surface, 0.5, 0)
                > initial_evolution_potential(Tier::Permanent, 0.5, 0)
        );
    }
}
