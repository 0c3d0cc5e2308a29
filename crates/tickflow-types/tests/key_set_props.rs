//! Property coverage for the slot-stable KeySet: handles stay valid exactly
//! until their slot is erased, erase/insert round-trips bump generations,
//! and the index never disagrees with the slot table.

use proptest::prelude::*;

use tickflow_common::{ScalarKind, ScalarValue};
use tickflow_types::storage::key_set::{KeySet, SlotHandle};

#[derive(Debug, Clone)]
enum Op {
    Insert(i64),
    Erase(i64),
    Clear,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        8 => (0i64..32).prop_map(Op::Insert),
        4 => (0i64..32).prop_map(Op::Erase),
        1 => Just(Op::Clear),
    ]
}

proptest! {
    #[test]
    fn index_and_slots_stay_consistent(ops in proptest::collection::vec(op_strategy(), 1..200)) {
        let mut ks = KeySet::new(ScalarKind::Int);
        let mut model: std::collections::BTreeMap<i64, usize> = std::collections::BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(k) => {
                    let key = ScalarValue::Int(k);
                    let (slot, inserted) = ks.insert(&key);
                    if let Some(&expected) = model.get(&k) {
                        prop_assert!(!inserted);
                        prop_assert_eq!(slot, expected);
                    } else {
                        prop_assert!(inserted);
                        model.insert(k, slot);
                    }
                }
                Op::Erase(k) => {
                    let key = ScalarValue::Int(k);
                    let erased = ks.erase(&key);
                    prop_assert_eq!(erased, model.remove(&k).is_some());
                }
                Op::Clear => {
                    ks.clear();
                    model.clear();
                }
            }

            prop_assert_eq!(ks.len(), model.len());
            for (k, &slot) in &model {
                prop_assert_eq!(ks.find(&ScalarValue::Int(*k)), Some(slot));
                prop_assert!(ks.is_alive(slot));
                prop_assert_eq!(ks.key_at(slot), Some(&ScalarValue::Int(*k)));
            }
        }
    }

    #[test]
    fn handles_invalidate_exactly_on_erase(keys in proptest::collection::btree_set(0i64..16, 1..8)) {
        let mut ks = KeySet::new(ScalarKind::Int);
        let mut handles: Vec<(i64, SlotHandle)> = Vec::new();
        for k in &keys {
            let (slot, _) = ks.insert(&ScalarValue::Int(*k));
            handles.push((*k, ks.handle_for(slot).unwrap()));
        }
        // All handles valid while nothing was erased.
        for (_, h) in &handles {
            prop_assert!(h.is_valid(&ks));
        }
        // Erase half; only those handles die.
        let erased: Vec<i64> = keys.iter().copied().step_by(2).collect();
        for k in &erased {
            ks.erase(&ScalarValue::Int(*k));
        }
        for (k, h) in &handles {
            prop_assert_eq!(h.is_valid(&ks), !erased.contains(k));
        }
        // Refill the freed slots: stale handles stay dead.
        for (i, k) in erased.iter().enumerate() {
            let _ = k;
            ks.insert(&ScalarValue::Int(100 + i as i64));
        }
        for (k, h) in &handles {
            prop_assert_eq!(h.is_valid(&ks), !erased.contains(k));
        }
    }

    #[test]
    fn erase_insert_round_trip_bumps_generation(k in 0i64..64) {
        let mut ks = KeySet::new(ScalarKind::Int);
        let key = ScalarValue::Int(k);
        let (slot, _) = ks.insert(&key);
        let g1 = ks.generation_at(slot);
        let len_before = ks.len();

        ks.erase(&key);
        prop_assert_eq!(ks.len(), len_before - 1);

        let (slot2, inserted) = ks.insert(&key);
        prop_assert!(inserted);
        prop_assert_eq!(slot2, slot);
        prop_assert_eq!(ks.len(), len_before);
        prop_assert!(ks.generation_at(slot) > g1);
    }
}
