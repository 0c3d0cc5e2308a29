//! Per-tick change tracking for keyed collections.
//!
//! A delta belongs to exactly one tick: it is tagged with the evaluation time
//! it was built at, and every storage wrapper "rolls" before mutating — if
//! the tag is older than the current tick, the previous delta is swept
//! (pending slots released, events cleared) and the tag advances. The engine
//! additionally sweeps eagerly in its after-evaluation pass so that idle
//! collections do not sit on parked slots.

use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashSet, FxHasher};
use tickflow_common::{EngineTime, MIN_DT, ScalarValue};

use super::key_set::SlotObserver;

pub fn key_hash(key: &ScalarValue) -> u64 {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Changes of one tick on a keyed set.
#[derive(Debug, Default, Clone)]
pub struct SetDelta {
    /// The tick this delta belongs to; `MIN_DT` when untouched.
    pub time: EngineTime,
    /// Slots inserted this tick, in insertion order.
    pub added: Vec<usize>,
    /// Slots erased this tick (parked, still readable), in erase order.
    pub removed: Vec<usize>,
    /// Hashes of the removed keys, for membership probes after release.
    pub removed_key_hashes: FxHashSet<u64>,
    /// The collection was cleared this tick.
    pub cleared: bool,
}

impl SetDelta {
    pub fn new() -> Self {
        SetDelta {
            time: MIN_DT,
            added: Vec::new(),
            removed: Vec::new(),
            removed_key_hashes: FxHashSet::default(),
            cleared: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && !self.cleared
    }

    pub fn was_added(&self, slot: usize) -> bool {
        self.added.contains(&slot)
    }

    pub fn was_removed(&self, slot: usize) -> bool {
        self.removed.contains(&slot)
    }

    pub fn clear(&mut self) {
        self.added.clear();
        self.removed.clear();
        self.removed_key_hashes.clear();
        self.cleared = false;
    }
}

/// Changes of one tick on a keyed dict: the key-set delta plus the slots
/// whose values were written in place. Child-level deltas live on the child
/// values themselves.
#[derive(Debug, Default, Clone)]
pub struct MapDelta {
    pub keys: SetDelta,
    /// Slots whose value was updated this tick (excluding fresh inserts).
    pub updated: Vec<usize>,
}

impl MapDelta {
    pub fn new() -> Self {
        MapDelta {
            keys: SetDelta::new(),
            updated: Vec::new(),
        }
    }

    pub fn was_updated(&self, slot: usize) -> bool {
        self.updated.contains(&slot)
    }

    pub fn mark_updated(&mut self, slot: usize) {
        if !self.keys.was_added(slot) && !self.updated.contains(&slot) {
            self.updated.push(slot);
        }
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.updated.clear();
    }
}

/// KeySet observer that records slot events into a [`SetDelta`].
#[derive(Debug, Default)]
pub struct SetDeltaTracker {
    pub delta: SetDelta,
}

impl SlotObserver for SetDeltaTracker {
    fn on_insert(&mut self, slot: usize) {
        self.delta.added.push(slot);
    }

    fn on_erase(&mut self, slot: usize) {
        self.delta.removed.push(slot);
    }

    fn on_clear(&mut self) {
        self.delta.cleared = true;
    }
}

/// KeySet observer that records slot events into a [`MapDelta`].
#[derive(Debug, Default)]
pub struct MapDeltaTracker {
    pub delta: MapDelta,
}

impl SlotObserver for MapDeltaTracker {
    fn on_insert(&mut self, slot: usize) {
        self.delta.keys.added.push(slot);
    }

    fn on_erase(&mut self, slot: usize) {
        self.delta.keys.removed.push(slot);
        self.delta.updated.retain(|s| *s != slot);
    }

    fn on_update(&mut self, slot: usize) {
        self.delta.mark_updated(slot);
    }

    fn on_clear(&mut self) {
        self.delta.keys.cleared = true;
        self.delta.updated.clear();
    }
}
