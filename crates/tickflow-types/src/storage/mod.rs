//! Slot-stable storage: the KeySet, its observers, and per-tick deltas.

pub mod delta;
pub mod key_set;

pub use delta::{MapDelta, MapDeltaTracker, SetDelta, SetDeltaTracker, key_hash};
pub use key_set::{KeySet, ObserverRef, SlotHandle, SlotObserver};
