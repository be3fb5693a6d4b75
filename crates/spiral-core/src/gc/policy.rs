//! Eviction eligibility.
//!
//! A node may only be evicted when it fails none of the guards below.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EligibilityThresholds;
use crate::memory::MemoryNode;

/// The first guard a node failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ineligibility {
    ProtectedTier,
    TooYoung,
    FrequentlyAccessed,
    TooStrong,
    WellConnected,
    RecentlyAccessed,
}

impl Ineligibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Ineligibility::ProtectedTier => "protected_tier",
            Ineligibility::TooYoung => "too_young",
            Ineligibility::FrequentlyAccessed => "frequently_accessed",
            Ineligibility::TooStrong => "too_strong",
            Ineligibility::WellConnected => "well_connected",
            Ineligibility::RecentlyAccessed => "recently_accessed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EligibilityPolicy {
    thresholds: EligibilityThresholds,
}

impl EligibilityPolicy {
    pub fn new(thresholds: EligibilityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &EligibilityThresholds {
        &self.thresholds
    }

    /// `Ok(())` when every guard passes.
    pub fn check(&self, node: &MemoryNode, now: DateTime<Utc>) -> Result<(), Ineligibility> {
        let t = &self.thresholds;
        if node.tier.is_protected() {
            return Err(Ineligibility::ProtectedTier);
        }
        if seconds_between(node.created_at, now) <= t.min_age_secs as i64 {
            return Err(Ineligibility::TooYoung);
        }
        if node.access_count >= t.min_access_count {
            return Err(Ineligibility::FrequentlyAccessed);
        }
        if node.strength >= t.min_strength {
            return Err(Ineligibility::TooStrong);
        }
        if node.associations.len() > t.max_associations {
            return Err(Ineligibility::WellConnected);
        }
        if seconds_between(node.last_accessed, now) <= t.min_idle_secs as i64 {
            return Err(Ineligibility::RecentlyAccessed);
        }
        Ok(())
    }

    pub fn is_eligible(&self, node: &MemoryNode, now: DateTime<Utc>) -> bool {
        self.check(node, now).is_ok()
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_seconds()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Duration;

    use super::*;
    use crate::memory::{generate_signature, Position, Tier};

    fn node(tier: Tier, age: Duration) -> (MemoryNode, DateTime<Utc>) {
        let now = Utc::now();
        let created = now - age;
        let node = MemoryNode {
            id: "n".into(),
            content: "x".into(),
            category: "general".into(),
            tier,
            sigil: generate_signature("x", "general", tier),
            partition_id: "p".into(),
            position: Position {
                index: 0,
                angle: 0.0,
                radius: 0.0,
                x: 0.0,
                y: 0.0,
                turn: 0,
            },
            associations: BTreeSet::new(),
            created_at: created,
            last_accessed: created,
            access_count: 0,
            strength: 0.1,
            evolution_potential: 0.5,
        };
        (node, now)
    }

    fn policy() -> EligibilityPolicy {
        EligibilityPolicy::new(EligibilityThresholds::default())
    }

    #[test]
    fn test_old_weak_idle_node_is_eligible() {
        let (n, now) = node(Tier::Surface, Duration::days(3));
        assert_eq!(policy().check(&n, now), Ok(()));
    }

    #[test]
    fn test_protected_tiers_never_eligible() {
        for tier in [Tier::Core, Tier::Permanent] {
            let (n, now) = node(tier, Duration::days(3650));
            assert_eq!(policy().check(&n, now), Err(Ineligibility::ProtectedTier));
        }
    }

    #[test]
    fn test_each_guard_blocks() {
        let (young, now) = node(Tier::Surface, Duration::hours(1));
        assert_eq!(policy().check(&young, now), Err(Ineligibility::TooYoung));

        let (mut n, now) = node(Tier::Surface, Duration::days(3));
        n.access_count = 3;
        assert_eq!(policy().check(&n, now), Err(Ineligibility::FrequentlyAccessed));

        let (mut n, now) = node(Tier::Surface, Duration::days(3));
        n.strength = 0.3;
        assert_eq!(policy().check(&n, now), Err(Ineligibility::TooStrong));

        let (mut n, now) = node(Tier::Surface, Duration::days(3));
        n.associations = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(policy().check(&n, now), Err(Ineligibility::WellConnected));

        let (mut n, now) = node(Tier::Surface, Duration::days(3));
        n.last_accessed = now - Duration::hours(1);
        assert_eq!(policy().check(&n, now), Err(Ineligibility::RecentlyAccessed));
    }

    #[test]
    fn test_two_associations_still_eligible() {
        let (mut n, now) = node(Tier::Shallow, Duration::days(3));
        n.associations = ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert!(policy().is_eligible(&n, now));
    }
}
