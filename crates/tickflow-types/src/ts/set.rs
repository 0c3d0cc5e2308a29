//! TSS storage: a KeySet plus a tick-scoped delta.

use std::cell::RefCell;
use std::rc::Rc;

use tickflow_common::{EngineTime, ScalarValue};

use crate::storage::{KeySet, ObserverRef, SetDelta, SetDeltaTracker, key_hash};

/// Membership storage behind a TSS value. The delta tracker is registered as
/// a slot observer on the key set, so every mutation path feeds the delta
/// without the storage having to mirror events by hand.
pub struct SetStorage {
    keys: KeySet,
    tracker: Rc<RefCell<SetDeltaTracker>>,
}

impl std::fmt::Debug for SetStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetStorage").field("len", &self.keys.len()).finish()
    }
}

impl SetStorage {
    pub fn new(element: tickflow_common::ScalarKind) -> Self {
        let tracker = Rc::new(RefCell::new(SetDeltaTracker::default()));
        let mut keys = KeySet::new(element);
        keys.add_observer(tracker.clone() as ObserverRef);
        SetStorage { keys, tracker }
    }

    pub fn keys(&self) -> &KeySet {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, value: &ScalarValue) -> bool {
        self.keys.contains(value)
    }

    /// Live values in slot order.
    pub fn values(&self) -> Vec<ScalarValue> {
        self.keys.live_keys().cloned().collect()
    }

    /// Add `value` at tick `now`. Returns false when already present.
    pub fn add(&mut self, value: &ScalarValue, now: EngineTime) -> bool {
        self.roll(now);
        let (_, inserted) = self.keys.insert(value);
        inserted
    }

    /// Remove `value` at tick `now`. The slot is parked: the removed value
    /// stays readable through the delta until the sweep.
    pub fn remove(&mut self, value: &ScalarValue, now: EngineTime) -> bool {
        self.roll(now);
        let Some(slot) = self.keys.find(value) else {
            return false;
        };
        self.keys.erase_slot_deferred(slot);
        self.tracker.borrow_mut().delta.removed_key_hashes.insert(key_hash(value));
        true
    }

    pub fn clear(&mut self, now: EngineTime) {
        self.roll(now);
        for value in self.keys.live_keys() {
            let hash = key_hash(value);
            self.tracker.borrow_mut().delta.removed_key_hashes.insert(hash);
        }
        let slots: Vec<usize> = self.keys.live_slots().collect();
        for slot in slots {
            self.keys.erase_slot_deferred(slot);
        }
        self.tracker.borrow_mut().delta.cleared = true;
    }

    /// Values added this tick.
    pub fn added(&self, now: EngineTime) -> Vec<ScalarValue> {
        self.with_delta(now, |d, keys| {
            d.added
                .iter()
                .filter_map(|slot| keys.key_at(*slot).cloned())
                .collect()
        })
        .unwrap_or_default()
    }

    /// Values removed this tick; the parked slots still carry the old keys.
    pub fn removed(&self, now: EngineTime) -> Vec<ScalarValue> {
        self.with_delta(now, |d, keys| {
            d.removed
                .iter()
                .filter_map(|slot| keys.key_at_raw(*slot).cloned())
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn was_added(&self, value: &ScalarValue, now: EngineTime) -> bool {
        self.with_delta(now, |d, keys| {
            keys.find(value).is_some_and(|slot| d.was_added(slot))
        })
        .unwrap_or(false)
    }

    pub fn was_removed(&self, value: &ScalarValue, now: EngineTime) -> bool {
        self.with_delta(now, |d, _| d.removed_key_hashes.contains(&key_hash(value)))
            .unwrap_or(false)
    }

    pub fn was_cleared(&self, now: EngineTime) -> bool {
        self.with_delta(now, |d, _| d.cleared).unwrap_or(false)
    }

    /// Sweep the previous tick's delta if this tick is newer.
    pub fn roll(&mut self, now: EngineTime) {
        let stale = {
            let tracker = self.tracker.borrow();
            tracker.delta.time != now
        };
        if stale {
            self.keys.release_pending();
            let mut tracker = self.tracker.borrow_mut();
            tracker.delta.clear();
            tracker.delta.time = now;
        }
    }

    /// End-of-cycle sweep driven by the engine.
    pub fn sweep(&mut self) {
        self.keys.release_pending();
        self.tracker.borrow_mut().delta.clear();
    }

    fn with_delta<R>(&self, now: EngineTime, f: impl FnOnce(&SetDelta, &KeySet) -> R) -> Option<R> {
        let tracker = self.tracker.borrow();
        if tracker.delta.time == now {
            Some(f(&tracker.delta, &self.keys))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickflow_common::{EngineTime, ScalarKind};

    fn t(s: i64) -> EngineTime {
        EngineTime::from_secs(s)
    }

    #[test]
    fn delta_is_scoped_to_one_tick() {
        let mut s = SetStorage::new(ScalarKind::Str);
        assert!(s.add(&"a".into(), t(1)));
        assert!(s.add(&"b".into(), t(1)));
        assert_eq!(s.added(t(1)), vec!["a".into(), "b".into()]);
        assert!(s.removed(t(1)).is_empty());

        s.add(&"c".into(), t(2));
        s.remove(&"a".into(), t(2));
        assert_eq!(s.added(t(2)), vec!["c".into()]);
        assert_eq!(s.removed(t(2)), vec!["a".into()]);
        // The t=1 view is gone.
        assert!(s.added(t(1)).is_empty());
    }

    #[test]
    fn removed_value_readable_within_cycle_absent_after() {
        let mut s = SetStorage::new(ScalarKind::Str);
        s.add(&"a".into(), t(1));
        s.remove(&"a".into(), t(2));
        assert!(!s.contains(&"a".into()));
        assert!(s.was_removed(&"a".into(), t(2)));
        assert_eq!(s.removed(t(2)), vec!["a".into()]);
        // Next tick: nothing left.
        s.roll(t(3));
        assert!(s.removed(t(3)).is_empty());
        assert!(!s.was_removed(&"a".into(), t(3)));
    }

    #[test]
    fn remove_then_add_same_value_same_tick_shows_both_events() {
        let mut s = SetStorage::new(ScalarKind::Int);
        s.add(&1i64.into(), t(1));
        s.roll(t(2));
        s.remove(&1i64.into(), t(2));
        s.add(&1i64.into(), t(2));
        assert!(s.contains(&1i64.into()));
        assert_eq!(s.added(t(2)), vec![1i64.into()]);
        assert_eq!(s.removed(t(2)), vec![1i64.into()]);
    }

    #[test]
    fn clear_marks_cleared_and_removes_all() {
        let mut s = SetStorage::new(ScalarKind::Int);
        s.add(&1i64.into(), t(1));
        s.add(&2i64.into(), t(1));
        s.clear(t(2));
        assert!(s.is_empty());
        assert!(s.was_cleared(t(2)));
        assert_eq!(s.removed(t(2)).len(), 2);
    }
}
