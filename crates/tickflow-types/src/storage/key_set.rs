//! Slot-stable key storage with generation tracking.
//!
//! Keys never move after insertion: a key lives at its slot until erased, and
//! the slot is only handed back out through the free list. Each slot carries
//! a generation counter — 0 while dead, bumped past its previous value on
//! reuse — so a `SlotHandle` captured earlier can detect that its slot was
//! recycled.
//!
//! Two erase flavours exist:
//!
//! - [`KeySet::erase_slot`] frees the slot immediately (plain container use).
//! - [`KeySet::erase_slot_deferred`] removes the key from the index and kills
//!   the generation, but parks the slot on a pending list until
//!   [`KeySet::release_pending`]. TSS/TSD sit on this flavour so that the
//!   erased key and its value stay readable for the rest of the cycle.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tickflow_common::{ScalarKind, ScalarValue};

/// Observer of slot-level mutations, used to keep parallel arrays (values,
/// deltas) in lockstep with the key storage.
pub trait SlotObserver {
    /// Capacity is about to grow from `old` to `new` slots. Fired before any
    /// relocation of backing storage.
    fn on_capacity(&mut self, old: usize, new: usize) {
        let _ = (old, new);
    }

    /// A key was inserted at `slot`.
    fn on_insert(&mut self, slot: usize) {
        let _ = slot;
    }

    /// The key at `slot` is being erased. Fired before the slot dies.
    fn on_erase(&mut self, slot: usize) {
        let _ = slot;
    }

    /// The value associated with `slot` was overwritten in place.
    fn on_update(&mut self, slot: usize) {
        let _ = slot;
    }

    /// The whole container is being cleared.
    fn on_clear(&mut self) {}
}

pub type ObserverRef = Rc<RefCell<dyn SlotObserver>>;

/// Handle to a slot plus the generation observed at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHandle {
    pub slot: usize,
    pub generation: u32,
}

impl SlotHandle {
    pub fn new(slot: usize, generation: u32) -> Self {
        SlotHandle { slot, generation }
    }

    /// Still refers to the same live key: alive and generation unchanged.
    pub fn is_valid(&self, ks: &KeySet) -> bool {
        ks.is_alive(self.slot) && ks.generation_at(self.slot) == self.generation
    }
}

#[derive(Debug, Clone, Copy)]
struct FreeSlot {
    slot: usize,
    last_generation: u32,
}

/// Slot-stable key storage. See the module docs for the contract.
pub struct KeySet {
    key_kind: ScalarKind,
    keys: Vec<ScalarValue>,
    generations: Vec<u32>,
    free_list: Vec<FreeSlot>,
    pending_free: Vec<FreeSlot>,
    index: FxHashMap<ScalarValue, usize>,
    size: usize,
    observers: Vec<ObserverRef>,
}

impl KeySet {
    pub fn new(key_kind: ScalarKind) -> Self {
        KeySet {
            key_kind,
            keys: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            pending_free: Vec::new(),
            index: FxHashMap::default(),
            size: 0,
            observers: Vec::new(),
        }
    }

    pub fn key_kind(&self) -> ScalarKind {
        self.key_kind
    }

    pub fn add_observer(&mut self, observer: ObserverRef) {
        self.observers.push(observer);
    }

    pub fn remove_observer(&mut self, observer: &ObserverRef) {
        self.observers.retain(|o| !Rc::ptr_eq(o, observer));
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.generations.len()
    }

    pub fn is_alive(&self, slot: usize) -> bool {
        self.generations.get(slot).is_some_and(|g| *g > 0)
    }

    pub fn generation_at(&self, slot: usize) -> u32 {
        self.generations.get(slot).copied().unwrap_or(0)
    }

    /// The key stored at `slot`, live slots only.
    pub fn key_at(&self, slot: usize) -> Option<&ScalarValue> {
        if self.is_alive(slot) { Some(&self.keys[slot]) } else { None }
    }

    /// The raw key content at `slot`, including slots erased this cycle but
    /// not yet released. This is what lets delta readers render removed keys.
    pub fn key_at_raw(&self, slot: usize) -> Option<&ScalarValue> {
        self.keys.get(slot)
    }

    pub fn handle_for(&self, slot: usize) -> Option<SlotHandle> {
        if self.is_alive(slot) {
            Some(SlotHandle::new(slot, self.generations[slot]))
        } else {
            None
        }
    }

    pub fn find(&self, key: &ScalarValue) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn contains(&self, key: &ScalarValue) -> bool {
        self.index.contains_key(key)
    }

    /// Insert a key. Returns `(slot, true)` on insert, `(existing, false)`
    /// when the key is already present.
    pub fn insert(&mut self, key: &ScalarValue) -> (usize, bool) {
        debug_assert_eq!(key.kind(), self.key_kind, "key kind mismatch");
        if let Some(slot) = self.find(key) {
            return (slot, false);
        }
        if self.free_list.is_empty() {
            self.grow(self.capacity() + 1);
        }
        let free = self.free_list.pop().expect("free list populated by grow");
        let slot = free.slot;
        self.keys[slot] = key.clone();
        self.generations[slot] = free.last_generation.saturating_add(1).max(1);
        self.index.insert(key.clone(), slot);
        self.size += 1;
        self.fire(|o| o.on_insert(slot));
        (slot, true)
    }

    /// Erase a key by value, releasing its slot immediately.
    pub fn erase(&mut self, key: &ScalarValue) -> bool {
        match self.find(key) {
            Some(slot) => self.erase_slot(slot),
            None => false,
        }
    }

    /// Erase by slot, releasing the slot to the free list immediately.
    pub fn erase_slot(&mut self, slot: usize) -> bool {
        if !self.kill_slot(slot) {
            return false;
        }
        let free = self.pending_free.pop().expect("kill_slot parks the slot");
        self.free_list.push(free);
        true
    }

    /// Erase by slot, parking the slot until [`Self::release_pending`]. The
    /// key content stays readable through [`Self::key_at_raw`].
    pub fn erase_slot_deferred(&mut self, slot: usize) -> bool {
        self.kill_slot(slot)
    }

    /// Move every parked slot onto the free list; returns the released slots.
    pub fn release_pending(&mut self) -> Vec<usize> {
        let released: Vec<usize> = self.pending_free.iter().map(|f| f.slot).collect();
        self.free_list.append(&mut self.pending_free);
        released
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_free.is_empty()
    }

    /// Signal an in-place value overwrite for `slot` to observers.
    pub fn notify_update(&mut self, slot: usize) {
        debug_assert!(self.is_alive(slot));
        self.fire(|o| o.on_update(slot));
    }

    pub fn clear(&mut self) {
        self.fire(|o| o.on_clear());
        self.index.clear();
        let cap = self.capacity();
        self.free_list.clear();
        self.pending_free.clear();
        // Refill in reverse so the next insert takes the leftmost slot.
        for slot in (0..cap).rev() {
            self.free_list.push(FreeSlot {
                slot,
                last_generation: self.generations[slot],
            });
            self.generations[slot] = 0;
        }
        self.size = 0;
    }

    /// Iterate live slots in slot order.
    pub fn live_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.generations
            .iter()
            .enumerate()
            .filter(|(_, g)| **g > 0)
            .map(|(slot, _)| slot)
    }

    /// Iterate live keys in slot order.
    pub fn live_keys(&self) -> impl Iterator<Item = &ScalarValue> + '_ {
        self.live_slots().map(|slot| &self.keys[slot])
    }

    fn kill_slot(&mut self, slot: usize) -> bool {
        if !self.is_alive(slot) {
            return false;
        }
        self.fire(|o| o.on_erase(slot));
        let key = self.keys[slot].clone();
        self.index.remove(&key);
        self.pending_free.push(FreeSlot {
            slot,
            last_generation: self.generations[slot],
        });
        self.generations[slot] = 0;
        self.size -= 1;
        true
    }

    fn grow(&mut self, min_slots: usize) {
        let old = self.capacity();
        if min_slots <= old {
            return;
        }
        let new = min_slots.max(if old == 0 { 8 } else { old * 2 });
        self.fire(|o| o.on_capacity(old, new));
        self.keys.resize(new, ScalarValue::default_for(self.key_kind));
        self.generations.resize(new, 0);
        // New slots land in reverse so the lowest slot is reused first.
        for slot in (old..new).rev() {
            self.free_list.push(FreeSlot {
                slot,
                last_generation: 0,
            });
        }
    }

    fn fire(&mut self, mut f: impl FnMut(&mut dyn SlotObserver)) {
        for obs in &self.observers {
            f(&mut *obs.borrow_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingObserver {
        events: Vec<String>,
    }

    impl SlotObserver for RecordingObserver {
        fn on_capacity(&mut self, old: usize, new: usize) {
            self.events.push(format!("capacity {old}->{new}"));
        }
        fn on_insert(&mut self, slot: usize) {
            self.events.push(format!("insert {slot}"));
        }
        fn on_erase(&mut self, slot: usize) {
            self.events.push(format!("erase {slot}"));
        }
        fn on_clear(&mut self) {
            self.events.push("clear".to_string());
        }
    }

    #[test]
    fn insert_find_erase() {
        let mut ks = KeySet::new(ScalarKind::Str);
        let (s0, ins0) = ks.insert(&"a".into());
        let (s1, ins1) = ks.insert(&"b".into());
        assert!(ins0 && ins1);
        assert_ne!(s0, s1);
        assert_eq!(ks.insert(&"a".into()), (s0, false));
        assert_eq!(ks.find(&"b".into()), Some(s1));
        assert_eq!(ks.len(), 2);

        assert!(ks.erase(&"a".into()));
        assert!(!ks.erase(&"a".into()));
        assert_eq!(ks.find(&"a".into()), None);
        assert_eq!(ks.len(), 1);
    }

    #[test]
    fn leftmost_free_slot_is_reused_first() {
        let mut ks = KeySet::new(ScalarKind::Int);
        let slots: Vec<usize> = (0..3).map(|i| ks.insert(&ScalarValue::Int(i)).0).collect();
        assert_eq!(slots, vec![0, 1, 2]);
    }

    #[test]
    fn generation_increments_on_reuse() {
        let mut ks = KeySet::new(ScalarKind::Int);
        let (slot, _) = ks.insert(&1i64.into());
        let g1 = ks.generation_at(slot);
        assert!(g1 > 0);
        let h = ks.handle_for(slot).unwrap();
        assert!(h.is_valid(&ks));

        ks.erase_slot(slot);
        assert_eq!(ks.generation_at(slot), 0);
        assert!(!h.is_valid(&ks));

        let (slot2, _) = ks.insert(&2i64.into());
        assert_eq!(slot2, slot);
        assert!(ks.generation_at(slot) > g1);
        assert!(!h.is_valid(&ks));
    }

    #[test]
    fn deferred_erase_keeps_raw_key_until_release() {
        let mut ks = KeySet::new(ScalarKind::Str);
        let (slot, _) = ks.insert(&"x".into());
        assert!(ks.erase_slot_deferred(slot));
        assert!(!ks.is_alive(slot));
        assert_eq!(ks.key_at(slot), None);
        assert_eq!(ks.key_at_raw(slot), Some(&"x".into()));
        // The slot is not reusable until released.
        let (slot2, _) = ks.insert(&"y".into());
        assert_ne!(slot2, slot);
        assert_eq!(ks.release_pending(), vec![slot]);
        let (slot3, _) = ks.insert(&"z".into());
        assert_eq!(slot3, slot);
    }

    #[test]
    fn observer_sees_capacity_before_insert() {
        let obs = Rc::new(RefCell::new(RecordingObserver::default()));
        let mut ks = KeySet::new(ScalarKind::Int);
        ks.add_observer(obs.clone());
        ks.insert(&1i64.into());
        ks.insert(&2i64.into());
        ks.erase(&1i64.into());
        let events = obs.borrow().events.clone();
        assert_eq!(events[0], "capacity 0->8");
        assert_eq!(events[1], "insert 0");
        assert_eq!(events[2], "insert 1");
        assert_eq!(events[3], "erase 0");
    }

    #[test]
    fn clear_refills_free_list_leftmost_first() {
        let mut ks = KeySet::new(ScalarKind::Int);
        for i in 0..4 {
            ks.insert(&ScalarValue::Int(i));
        }
        ks.clear();
        assert_eq!(ks.len(), 0);
        assert_eq!(ks.insert(&10i64.into()).0, 0);
    }
}
