//! Bounded least-frequently-used cache in front of the sigil registry.
//!
//! Entries are indexed twice: by signature for lookups, and in an ordered set
//! keyed by `(hits, tick, signature)` so the victim on overflow is always the
//! first element. Ties on hit count go to the entry touched longest ago.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
struct CacheEntry {
    memory_id: String,
    hits: u64,
    tick: u64,
}

/// Hit/miss counters and occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub len: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone)]
pub struct SigilCache {
    capacity: usize,
    entries: HashMap<String, CacheEntry>,
    order: BTreeSet<(u64, u64, String)>,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl SigilCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: BTreeSet::new(),
            tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.entries.contains_key(signature)
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Look up `signature`, counting a hit or a miss.
    pub fn get(&mut self, signature: &str) -> Option<String> {
        let tick = self.next_tick();
        let Some(entry) = self.entries.get_mut(signature) else {
            self.misses += 1;
            return None;
        };
        self.order
            .remove(&(entry.hits, entry.tick, signature.to_string()));
        entry.hits += 1;
        entry.tick = tick;
        self.order
            .insert((entry.hits, entry.tick, signature.to_string()));
        self.hits += 1;
        Some(entry.memory_id.clone())
    }

    /// Insert or replace. Evicts the least-frequently-used entry when full.
    pub fn insert(&mut self, signature: &str, memory_id: &str) {
        if self.capacity == 0 {
            return;
        }
        if let Some(entry) = self.entries.get_mut(signature) {
            entry.memory_id = memory_id.to_string();
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some((_, _, victim)) = self.order.pop_first() {
                self.entries.remove(&victim);
            }
        }
        let tick = self.next_tick();
        self.entries.insert(
            signature.to_string(),
            CacheEntry {
                memory_id: memory_id.to_string(),
                hits: 0,
                tick,
            },
        );
        self.order.insert((0, tick, signature.to_string()));
    }

    pub fn remove(&mut self, signature: &str) -> Option<String> {
        let entry = self.entries.remove(signature)?;
        self.order
            .remove(&(entry.hits, entry.tick, signature.to_string()));
        Some(entry.memory_id)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            len: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_frequently_used() {
        let mut cache = SigilCache::new(2);
        cache.insert("a", "1");
        cache.insert("b", "2");
        assert_eq!(cache.get("a").as_deref(), Some("1"));
        assert_eq!(cache.get("a").as_deref(), Some("1"));
        assert_eq!(cache.get("b").as_deref(), Some("2"));

        cache.insert("c", "3");
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_ties_evict_oldest_touch() {
        let mut cache = SigilCache::new(2);
        cache.insert("a", "1");
        cache.insert("b", "2");
        cache.insert("c", "3");
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
    }

    #[test]
    fn test_counts_hits_and_misses() {
        let mut cache = SigilCache::new(4);
        cache.insert("a", "1");
        cache.get("a");
        cache.get("zzz");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.len, 1);
    }

    #[test]
    fn test_remove_keeps_index_consistent() {
        let mut cache = SigilCache::new(2);
        cache.insert("a", "1");
        cache.get("a");
        assert_eq!(cache.remove("a").as_deref(), Some("1"));
        assert!(cache.is_empty());
        cache.insert("b", "2");
        cache.insert("c", "3");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_capacity_never_stores() {
        let mut cache = SigilCache::new(0);
        cache.insert("a", "1");
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }
}
