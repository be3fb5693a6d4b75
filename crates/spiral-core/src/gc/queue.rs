//! Indexed GC priority queue.
//!
//! Every live node owns exactly one slot. A slot sits either in the ready
//! set, ordered by `(last_accessed, id)` so the least recently used node pops
//! first, or in the deferred set, ordered by the time it should be looked at
//! again. Touching a node always returns its slot to the ready set.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
struct Slot {
    last_accessed: DateTime<Utc>,
    /// Consecutive ineligible evaluations since the last touch.
    strikes: u32,
    recheck_at: Option<DateTime<Utc>>,
}

/// A popped entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: String,
    pub last_accessed: DateTime<Utc>,
    pub strikes: u32,
}

#[derive(Debug, Clone, Default)]
pub struct GcQueue {
    slots: HashMap<String, Slot>,
    ready: BTreeSet<(DateTime<Utc>, String)>,
    deferred: BTreeSet<(DateTime<Utc>, String)>,
}

impl GcQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries, ready or deferred.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    /// The `last_accessed` key currently held for `id`.
    pub fn key_of(&self, id: &str) -> Option<DateTime<Utc>> {
        self.slots.get(id).map(|s| s.last_accessed)
    }

    pub fn is_deferred(&self, id: &str) -> bool {
        self.slots
            .get(id)
            .is_some_and(|s| s.recheck_at.is_some())
    }

    fn unlink(&mut self, id: &str, slot: &Slot) {
        match slot.recheck_at {
            Some(at) => self.deferred.remove(&(at, id.to_string())),
            None => self.ready.remove(&(slot.last_accessed, id.to_string())),
        };
    }

    /// Insert or re-key `id` after a read or write. Clears any deferral.
    pub fn upsert(&mut self, id: &str, last_accessed: DateTime<Utc>) {
        if let Some(old) = self.slots.remove(id) {
            self.unlink(id, &old);
        }
        self.ready.insert((last_accessed, id.to_string()));
        self.slots.insert(
            id.to_string(),
            Slot {
                last_accessed,
                strikes: 0,
                recheck_at: None,
            },
        );
    }

    /// Drop `id` entirely. Returns false if it was not queued.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.slots.remove(id) {
            Some(slot) => {
                self.unlink(id, &slot);
                true
            }
            None => false,
        }
    }

    /// Take the least recently accessed ready entry.
    ///
    /// The slot stays owned by the node; the caller must follow up with
    /// [`GcQueue::defer`], [`GcQueue::requeue`] or [`GcQueue::remove`].
    pub fn pop_ready(&mut self) -> Option<QueueEntry> {
        loop {
            let (last_accessed, id) = self.ready.pop_first()?;
            if let Some(slot) = self.slots.get(&id) {
                return Some(QueueEntry {
                    id,
                    last_accessed,
                    strikes: slot.strikes,
                });
            }
        }
    }

    /// Put a popped entry back in the ready set unchanged.
    pub fn requeue(&mut self, id: &str) {
        if let Some(slot) = self.slots.get(id) {
            if slot.recheck_at.is_none() {
                self.ready.insert((slot.last_accessed, id.to_string()));
            }
        }
    }

    /// Park a popped entry until `now + base * 2^strikes`, capped at `max`.
    ///
    /// Returns the re-check time, or `None` if `id` is not queued.
    pub fn defer(
        &mut self,
        id: &str,
        now: DateTime<Utc>,
        base: Duration,
        max: Duration,
    ) -> Option<DateTime<Utc>> {
        let slot = self.slots.get_mut(id)?;
        self.ready.remove(&(slot.last_accessed, id.to_string()));
        if let Some(at) = slot.recheck_at.take() {
            self.deferred.remove(&(at, id.to_string()));
        }

        let delay = damped_delay(base, max, slot.strikes);
        slot.strikes = slot.strikes.saturating_add(1);
        let at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        slot.recheck_at = Some(at);
        self.deferred.insert((at, id.to_string()));
        Some(at)
    }

    /// Move every deferred entry due at `now` back to the ready set.
    pub fn promote_due(&mut self, now: DateTime<Utc>) -> usize {
        let mut promoted = 0;
        while let Some((at, _)) = self.deferred.first() {
            if *at > now {
                break;
            }
            let Some((_, id)) = self.deferred.pop_first() else {
                break;
            };
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.recheck_at = None;
                self.ready.insert((slot.last_accessed, id));
                promoted += 1;
            }
        }
        promoted
    }
}

/// `base * 2^strikes`, saturating at `max`.
pub fn damped_delay(base: Duration, max: Duration, strikes: u32) -> Duration {
    let factor = 1u32.checked_shl(strikes.min(31)).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}
