//! TSD storage: a KeySet, a parallel column of child time-series values, and
//! a tick-scoped map delta.
//!
//! The delta tracker observes the key set; the value column is owned by the
//! storage itself and maintained in lockstep in the mutation methods (the
//! child-owns-data rendition of the parallel-array observer). Erased slots
//! are parked for the rest of the cycle so the pre-erase value stays
//! readable, both by slot handle and through the removed-channel lookup.

use std::cell::RefCell;
use std::rc::Rc;

use tickflow_common::{EngineTime, ScalarValue};

use crate::meta::TsMeta;
use crate::storage::{KeySet, MapDelta, MapDeltaTracker, ObserverRef, key_hash};

use super::value::TsValue;

pub struct DictStorage {
    keys: KeySet,
    cells: Vec<Option<TsValue>>,
    tracker: Rc<RefCell<MapDeltaTracker>>,
    value_meta: &'static TsMeta,
}

impl std::fmt::Debug for DictStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DictStorage")
            .field("len", &self.keys.len())
            .field("value_meta", &self.value_meta.name)
            .finish()
    }
}

impl DictStorage {
    pub fn new(key: tickflow_common::ScalarKind, value_meta: &'static TsMeta) -> Self {
        let tracker = Rc::new(RefCell::new(MapDeltaTracker::default()));
        let mut keys = KeySet::new(key);
        keys.add_observer(tracker.clone() as ObserverRef);
        DictStorage {
            keys,
            cells: Vec::new(),
            tracker,
            value_meta,
        }
    }

    pub fn keys(&self) -> &KeySet {
        &self.keys
    }

    pub fn value_meta(&self) -> &'static TsMeta {
        self.value_meta
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &ScalarValue) -> bool {
        self.keys.contains(key)
    }

    pub fn key_values(&self) -> Vec<ScalarValue> {
        self.keys.live_keys().cloned().collect()
    }

    /// Create the entry for `key` if missing; idempotent. Returns the slot.
    pub fn create(&mut self, key: &ScalarValue, now: EngineTime) -> usize {
        self.roll(now);
        let (slot, inserted) = self.keys.insert(key);
        if inserted {
            if self.cells.len() < self.keys.capacity() {
                self.cells.resize_with(self.keys.capacity(), || None);
            }
            self.cells[slot] = Some(TsValue::new(self.value_meta));
        }
        slot
    }

    /// Remove `key` at tick `now`. The pre-erase child stays readable for the
    /// rest of the cycle through [`Self::removed_value`].
    pub fn remove(&mut self, key: &ScalarValue, now: EngineTime) -> bool {
        self.roll(now);
        let Some(slot) = self.keys.find(key) else {
            return false;
        };
        self.keys.erase_slot_deferred(slot);
        self.tracker
            .borrow_mut()
            .delta
            .keys
            .removed_key_hashes
            .insert(key_hash(key));
        true
    }

    pub fn clear(&mut self, now: EngineTime) {
        self.roll(now);
        let slots: Vec<usize> = self.keys.live_slots().collect();
        for slot in slots {
            let hash = self.keys.key_at(slot).map(key_hash);
            self.keys.erase_slot_deferred(slot);
            if let Some(hash) = hash {
                self.tracker.borrow_mut().delta.keys.removed_key_hashes.insert(hash);
            }
        }
        self.tracker.borrow_mut().delta.keys.cleared = true;
    }

    pub fn slot_of(&self, key: &ScalarValue) -> Option<usize> {
        self.keys.find(key)
    }

    /// Live child value for `key`.
    pub fn get(&self, key: &ScalarValue) -> Option<&TsValue> {
        let slot = self.keys.find(key)?;
        self.cells.get(slot).and_then(|c| c.as_ref())
    }

    pub fn get_mut(&mut self, key: &ScalarValue) -> Option<&mut TsValue> {
        let slot = self.keys.find(key)?;
        self.cells.get_mut(slot).and_then(|c| c.as_mut())
    }

    pub fn get_slot(&self, slot: usize) -> Option<&TsValue> {
        if !self.keys.is_alive(slot) {
            return None;
        }
        self.cells.get(slot).and_then(|c| c.as_ref())
    }

    pub fn get_slot_mut(&mut self, slot: usize) -> Option<&mut TsValue> {
        if !self.keys.is_alive(slot) {
            return None;
        }
        self.cells.get_mut(slot).and_then(|c| c.as_mut())
    }

    /// Pre-erase child for a key removed this tick; absent from the next
    /// cycle onward.
    pub fn removed_value(&self, key: &ScalarValue, now: EngineTime) -> Option<&TsValue> {
        let tracker = self.tracker.borrow();
        if tracker.delta.keys.time != now {
            return None;
        }
        tracker
            .delta
            .keys
            .removed
            .iter()
            .find(|slot| self.keys.key_at_raw(**slot) == Some(key))
            .and_then(|slot| self.cells.get(*slot).and_then(|c| c.as_ref()))
    }

    /// Record an in-place write to the child at `slot`.
    pub fn mark_updated(&mut self, slot: usize, now: EngineTime) {
        self.roll(now);
        self.keys.notify_update(slot);
    }

    pub fn added_keys(&self, now: EngineTime) -> Vec<ScalarValue> {
        self.with_delta(now, |d, keys| {
            d.keys
                .added
                .iter()
                .filter_map(|slot| keys.key_at(*slot).cloned())
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn removed_keys(&self, now: EngineTime) -> Vec<ScalarValue> {
        self.with_delta(now, |d, keys| {
            d.keys
                .removed
                .iter()
                .filter_map(|slot| keys.key_at_raw(*slot).cloned())
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn updated_keys(&self, now: EngineTime) -> Vec<ScalarValue> {
        self.with_delta(now, |d, keys| {
            d.updated
                .iter()
                .filter_map(|slot| keys.key_at(*slot).cloned())
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn was_key_removed(&self, key: &ScalarValue, now: EngineTime) -> bool {
        self.with_delta(now, |d, _| d.keys.removed_key_hashes.contains(&key_hash(key)))
            .unwrap_or(false)
    }

    pub fn roll(&mut self, now: EngineTime) {
        let stale = self.tracker.borrow().delta.keys.time != now;
        if stale {
            let released = self.keys.release_pending();
            for slot in released {
                self.cells[slot] = None;
            }
            let mut tracker = self.tracker.borrow_mut();
            tracker.delta.clear();
            tracker.delta.keys.time = now;
        }
    }

    /// End-of-cycle sweep driven by the engine.
    pub fn sweep(&mut self) {
        let released = self.keys.release_pending();
        for slot in released {
            self.cells[slot] = None;
        }
        self.tracker.borrow_mut().delta.clear();
    }

    pub fn live_entries(&self) -> impl Iterator<Item = (&ScalarValue, &TsValue)> + '_ {
        self.keys.live_slots().filter_map(move |slot| {
            let key = self.keys.key_at(slot)?;
            let value = self.cells.get(slot).and_then(|c| c.as_ref())?;
            Some((key, value))
        })
    }

    fn with_delta<R>(&self, now: EngineTime, f: impl FnOnce(&MapDelta, &KeySet) -> R) -> Option<R> {
        let tracker = self.tracker.borrow();
        if tracker.delta.keys.time == now {
            Some(f(&tracker.delta, &self.keys))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta;
    use tickflow_common::{EngineTime, ScalarKind};

    fn t(s: i64) -> EngineTime {
        EngineTime::from_secs(s)
    }

    fn int_dict() -> DictStorage {
        DictStorage::new(ScalarKind::Str, meta::ts(ScalarKind::Int))
    }

    #[test]
    fn create_is_idempotent() {
        let mut d = int_dict();
        let s1 = d.create(&"x".into(), t(1));
        let s2 = d.create(&"x".into(), t(1));
        assert_eq!(s1, s2);
        assert_eq!(d.len(), 1);
        assert_eq!(d.added_keys(t(1)), vec!["x".into()]);
    }

    #[test]
    fn removed_entry_readable_within_cycle() {
        let mut d = int_dict();
        let slot = d.create(&"x".into(), t(1));
        d.get_slot_mut(slot).unwrap().set_scalar(7i64.into(), t(1));

        d.remove(&"x".into(), t(2));
        assert!(d.get(&"x".into()).is_none());
        let removed = d.removed_value(&"x".into(), t(2)).unwrap();
        assert_eq!(removed.scalar(), Some(7i64.into()));

        d.roll(t(3));
        assert!(d.removed_value(&"x".into(), t(3)).is_none());
        assert!(d.get(&"x".into()).is_none());
    }

    #[test]
    fn updated_excludes_added() {
        let mut d = int_dict();
        let s_x = d.create(&"x".into(), t(1));
        d.mark_updated(s_x, t(1));
        assert!(d.updated_keys(t(1)).is_empty());

        let s_x2 = d.slot_of(&"x".into()).unwrap();
        d.mark_updated(s_x2, t(2));
        assert_eq!(d.updated_keys(t(2)), vec!["x".into()]);
    }

    #[test]
    fn slot_reuse_after_sweep() {
        let mut d = int_dict();
        let slot = d.create(&"x".into(), t(1));
        d.remove(&"x".into(), t(2));
        d.sweep();
        let slot2 = d.create(&"y".into(), t(3));
        assert_eq!(slot, slot2);
        assert!(d.get(&"x".into()).is_none());
    }
}
