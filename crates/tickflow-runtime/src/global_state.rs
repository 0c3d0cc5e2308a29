//! Process-wide keyed state.
//!
//! Components register their resolved recordable ids here so duplicate
//! instantiation is caught across the whole process. Inserts take the lock;
//! the table lives for the life of the process and entries are removed on
//! component disposal.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use std::sync::Mutex;

use tickflow_common::ScalarValue;

static GLOBAL_STATE: Lazy<Mutex<FxHashMap<String, ScalarValue>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

pub fn contains(key: &str) -> bool {
    GLOBAL_STATE.lock().expect("global state poisoned").contains_key(key)
}

pub fn set(key: impl Into<String>, value: ScalarValue) {
    GLOBAL_STATE
        .lock()
        .expect("global state poisoned")
        .insert(key.into(), value);
}

pub fn get(key: &str) -> Option<ScalarValue> {
    GLOBAL_STATE.lock().expect("global state poisoned").get(key).cloned()
}

pub fn remove(key: &str) -> bool {
    GLOBAL_STATE
        .lock()
        .expect("global state poisoned")
        .remove(key)
        .is_some()
}

/// Key under which a component instance registers its recordable id.
pub fn component_key(recordable_id: &str) -> String {
    format!("component::{recordable_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_contains_remove_round_trip() {
        let key = component_key("gs-test-unique");
        assert!(!contains(&key));
        set(key.clone(), ScalarValue::Bool(true));
        assert!(contains(&key));
        assert!(remove(&key));
        assert!(!contains(&key));
        assert!(!remove(&key));
    }
}
