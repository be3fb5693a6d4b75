//! Cold-start consistency repair.
//!
//! Snapshots are mirrored one key at a time, so a crash can leave the three
//! prefixes out of step. [`reconcile`] restores the cross-structure
//! invariants on the reloaded state and lists the keys that must be
//! rewritten or deleted to make the backend agree.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::node::MemoryNode;
use super::partition::PartitionManager;
use super::sigil::{SigilEntry, SigilIndex};

/// What was repaired during reload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Snapshots that failed to deserialize and were ignored.
    pub snapshots_skipped: usize,
    pub orphan_sigils_removed: usize,
    pub sigils_restored: usize,
    pub partitions_recreated: usize,
    pub partition_counts_fixed: usize,
    pub associations_pruned: usize,
    pub associations_mirrored: usize,
    /// Partitions beyond `max_partitions`. Kept so no node is orphaned;
    /// no new partition is created until the count drops below the cap.
    #[serde(default)]
    pub partitions_over_cap: usize,
    /// Partitions holding more nodes than their capacity. They take no
    /// further placements.
    #[serde(default)]
    pub partitions_over_capacity: usize,
}

impl ReconcileReport {
    /// Number of repairs, not counting skipped snapshots.
    pub fn total_repairs(&self) -> usize {
        self.orphan_sigils_removed
            + self.sigils_restored
            + self.partitions_recreated
            + self.partition_counts_fixed
            + self.associations_pruned
            + self.associations_mirrored
    }

    /// Bound violations found on reload. These are reported, not repaired.
    pub fn bound_violations(&self) -> usize {
        self.partitions_over_cap + self.partitions_over_capacity
    }

    pub fn is_clean(&self) -> bool {
        self.total_repairs() == 0 && self.snapshots_skipped == 0 && self.bound_violations() == 0
    }
}

/// Keys to rewrite or delete after reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairPlan {
    pub nodes: BTreeSet<String>,
    pub partitions: BTreeSet<String>,
    pub sigils_to_write: Vec<SigilEntry>,
    pub sigils_to_delete: Vec<String>,
}

impl RepairPlan {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.partitions.is_empty()
            && self.sigils_to_write.is_empty()
            && self.sigils_to_delete.is_empty()
    }
}

/// Repair reloaded state in place.
///
/// `entries` are the persisted sigil rows; the valid ones end up registered
/// in `sigils`.
pub fn reconcile(
    nodes: &mut HashMap<String, MemoryNode>,
    partitions: &mut PartitionManager,
    sigils: &mut SigilIndex,
    entries: Vec<SigilEntry>,
    now: DateTime<Utc>,
) -> (ReconcileReport, RepairPlan) {
    let mut report = ReconcileReport::default();
    let mut plan = RepairPlan::default();

    // Sigil rows must point at a live node carrying that signature.
    for entry in entries {
        let valid = nodes
            .get(&entry.memory_id)
            .is_some_and(|n| n.sigil.signature == entry.signature)
            && !sigils.contains(&entry.signature);
        if valid {
            sigils.register(&entry.signature, &entry.memory_id);
        } else {
            report.orphan_sigils_removed += 1;
            plan.sigils_to_delete.push(entry.signature);
        }
    }

    // Every node needs its registry row.
    let mut ids: Vec<String> = nodes.keys().cloned().collect();
    ids.sort();
    for id in &ids {
        let Some(node) = nodes.get_mut(id) else {
            continue;
        };
        if sigils.owner(&node.sigil.signature) == Some(id.as_str()) {
            continue;
        }
        let signature = sigils.claim(&node.sigil.signature, id);
        if signature != node.sigil.signature {
            warn!(node_id = %id, old = %node.sigil.signature, new = %signature, "Signature re-suffixed during reload");
            node.sigil.signature = signature.clone();
            plan.nodes.insert(id.clone());
        }
        sigils.register(&signature, id);
        plan.sigils_to_write.push(SigilEntry {
            signature,
            memory_id: id.clone(),
        });
        report.sigils_restored += 1;
    }

    // Partition membership is derived from the nodes.
    let mut counts: HashMap<String, (usize, u64)> = HashMap::new();
    for id in &ids {
        let Some(node) = nodes.get(id) else {
            continue;
        };
        if partitions.get(&node.partition_id).is_none() {
            partitions.restore(&node.partition_id, &node.category, node.tier, now);
            report.partitions_recreated += 1;
            plan.partitions.insert(node.partition_id.clone());
        }
        let slot = counts.entry(node.partition_id.clone()).or_insert((0, 0));
        slot.0 += 1;
        slot.1 = slot.1.max(node.position.index + 1);
    }
    let partition_ids: Vec<String> = partitions.iter().map(|p| p.id.clone()).collect();
    for pid in partition_ids {
        let (count, next_index) = counts.get(&pid).copied().unwrap_or((0, 0));
        if let Some(partition) = partitions.get_mut(&pid) {
            if partition.node_count != count || partition.next_index < next_index {
                partition.node_count = count;
                partition.next_index = partition.next_index.max(next_index);
                partition.updated_at = now;
                if !plan.partitions.contains(&pid) {
                    report.partition_counts_fixed += 1;
                }
                plan.partitions.insert(pid);
            }
        }
    }

    for partition in partitions.iter() {
        if partition.node_count > partition.capacity {
            warn!(
                partition_id = %partition.id,
                node_count = partition.node_count,
                capacity = partition.capacity,
                "Reloaded partition exceeds its capacity"
            );
            report.partitions_over_capacity += 1;
        }
    }
    if partitions.len() > partitions.max_partitions() {
        warn!(
            partitions = partitions.len(),
            max_partitions = partitions.max_partitions(),
            "Reloaded partition count exceeds the configured maximum"
        );
        report.partitions_over_cap = partitions.len() - partitions.max_partitions();
    }

    // Associations: drop dangling peers, then mirror one-sided links.
    for id in &ids {
        let dangling: Vec<String> = match nodes.get(id) {
            Some(node) => node
                .associations
                .iter()
                .filter(|peer| *peer == id || !nodes.contains_key(*peer))
                .cloned()
                .collect(),
            None => continue,
        };
        if dangling.is_empty() {
            continue;
        }
        if let Some(node) = nodes.get_mut(id) {
            for peer in &dangling {
                node.associations.remove(peer);
            }
        }
        report.associations_pruned += dangling.len();
        plan.nodes.insert(id.clone());
    }
    for id in &ids {
        let peers: Vec<String> = match nodes.get(id) {
            Some(node) => node.associations.iter().cloned().collect(),
            None => continue,
        };
        for peer in peers {
            if let Some(other) = nodes.get_mut(&peer) {
                if other.associations.insert(id.clone()) {
                    report.associations_mirrored += 1;
                    plan.nodes.insert(peer);
                }
            }
        }
    }

    (report, plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{compute_placement, generate_signature, GrowthCurve, Tier};
    use tracing_test::traced_test;

    fn node(id: &str, partition_id: &str, index: u64) -> MemoryNode {
        let now = Utc::now();
        MemoryNode {
            id: id.into(),
            content: format!("content {id}"),
            category: "general".into(),
            tier: Tier::Shallow,
            sigil: generate_signature(&format!("content {id}"), "general", Tier::Shallow),
            partition_id: partition_id.into(),
            position: compute_placement(GrowthCurve::SquareRoot, index, 21),
            associations: BTreeSet::new(),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            strength: 0.3,
            evolution_potential: 0.5,
        }
    }

    fn entry(n: &MemoryNode) -> SigilEntry {
        SigilEntry {
            signature: n.sigil.signature.clone(),
            memory_id: n.id.clone(),
        }
    }

    #[test]
    fn test_consistent_state_needs_no_repair() {
        let now = Utc::now();
        let mut partitions = PartitionManager::new(8, 10, 0.5, 21);
        let pid = partitions.create("general", Tier::Shallow, now).unwrap();
        partitions.place(&pid, now).unwrap();
        let a = node("a", &pid, 0);
        let entries = vec![entry(&a)];
        let mut nodes = HashMap::from([(a.id.clone(), a)]);
        let mut sigils = SigilIndex::new(4);

        let (report, plan) = reconcile(&mut nodes, &mut partitions, &mut sigils, entries, now);
        assert!(report.is_clean(), "{report:?}");
        assert!(plan.is_empty());
        assert_eq!(sigils.len(), 1);
    }

    #[test]
    fn test_repairs_every_kind_of_drift() {
        let now = Utc::now();
        let mut partitions = PartitionManager::new(8, 10, 0.5, 21);
        let known = partitions.create("general", Tier::Shallow, now).unwrap();

        let mut a = node("a", &known, 0);
        let b = node("b", "lost-partition", 4);
        a.associations.insert("b".into());
        a.associations.insert("ghost".into());

        let orphan = SigilEntry {
            signature: "GL-deadbeefdeadbeef".into(),
            memory_id: "ghost".into(),
        };
        let entries = vec![entry(&a), orphan];
        let mut nodes = HashMap::from([(a.id.clone(), a), (b.id.clone(), b)]);
        let mut sigils = SigilIndex::new(4);

        let (report, plan) = reconcile(&mut nodes, &mut partitions, &mut sigils, entries, now);

        assert_eq!(report.orphan_sigils_removed, 1);
        assert_eq!(report.sigils_restored, 1);
        assert_eq!(report.partitions_recreated, 1);
        assert_eq!(report.partition_counts_fixed, 1);
        assert_eq!(report.associations_pruned, 1);
        assert_eq!(report.associations_mirrored, 1);

        assert_eq!(plan.sigils_to_delete, vec!["GL-deadbeefdeadbeef".to_string()]);
        assert!(nodes["b"].associations.contains("a"));
        assert!(!nodes["a"].associations.contains("ghost"));

        let lost = partitions.get("lost-partition").unwrap();
        assert_eq!(lost.node_count, 1);
        assert_eq!(lost.next_index, 5);
        assert_eq!(partitions.get(&known).unwrap().node_count, 1);
        assert!(sigils.owner(&nodes["b"].sigil.signature) == Some("b"));
    }

    #[traced_test]
    #[test]
    fn test_reports_bounds_exceeded_after_config_shrinks() {
        let now = Utc::now();
        let mut partitions = PartitionManager::new(1, 2, 0.5, 21);
        let known = partitions.create("general", Tier::Shallow, now).unwrap();
        let crowded: Vec<MemoryNode> = (0..3).map(|i| node(&format!("n{i}"), &known, i)).collect();
        let stray = node("stray", "lost-partition", 0);
        let entries: Vec<SigilEntry> = crowded.iter().chain([&stray]).map(entry).collect();
        let mut nodes: HashMap<String, MemoryNode> = crowded
            .into_iter()
            .chain([stray])
            .map(|n| (n.id.clone(), n))
            .collect();
        let mut sigils = SigilIndex::new(8);

        let (report, _) = reconcile(&mut nodes, &mut partitions, &mut sigils, entries, now);

        assert_eq!(report.partitions_over_cap, 1);
        assert_eq!(report.partitions_over_capacity, 1);
        assert!(!report.is_clean());
        assert_eq!(nodes.len(), 4, "no node is dropped");
        assert_eq!(partitions.get(&known).unwrap().node_count, 3);
        assert!(logs_contain("exceeds its capacity"));
        assert!(logs_contain("exceeds the configured maximum"));
    }
}
