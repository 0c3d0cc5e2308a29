//! Time-series references: the value carried by a REF time series.

use std::fmt;

use tickflow_common::{EngineTime, ScalarValue};

use super::output::OutputHandle;
use super::value::TsValue;

/// A handle to another time-series endpoint: an output plus a navigation
/// path below it. Two references are equal when they denote the same
/// endpoint (same output cell, same path).
#[derive(Clone)]
pub struct TsReference {
    pub target: OutputHandle,
}

impl TsReference {
    pub fn new(target: OutputHandle) -> Self {
        TsReference { target }
    }
}

impl PartialEq for TsReference {
    fn eq(&self, other: &Self) -> bool {
        self.target.endpoint_eq(&other.target)
    }
}

impl Eq for TsReference {}

impl fmt::Debug for TsReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TsReference({self})")
    }
}

impl fmt::Display for TsReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target.describe())
    }
}

/// The precomputed delta produced by re-binding a reference from target `A`
/// to target `B`: a downstream reader sees the transition as one combined
/// delta at the rebind tick.
#[derive(Debug, Clone, Default)]
pub struct RebindDelta {
    pub time: EngineTime,
    pub added: Vec<ScalarValue>,
    pub removed: Vec<ScalarValue>,
    pub changed_indices: Vec<usize>,
}

impl RebindDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed_indices.is_empty()
    }
}

/// Diff two collection values at a rebind: `added = new \ old`,
/// `removed = old \ new`, plus the positional children whose snapshots
/// differ (bundles and lists).
pub fn compute_rebind_delta(
    old: Option<&TsValue>,
    new: Option<&TsValue>,
    now: EngineTime,
    start_time: EngineTime,
    time: EngineTime,
) -> RebindDelta {
    let mut delta = RebindDelta {
        time,
        ..RebindDelta::default()
    };

    let old_keys = old.map(collection_keys).unwrap_or_default();
    let new_keys = new.map(collection_keys).unwrap_or_default();
    for k in &new_keys {
        if !old_keys.contains(k) {
            delta.added.push(k.clone());
        }
    }
    for k in &old_keys {
        if !new_keys.contains(k) {
            delta.removed.push(k.clone());
        }
    }

    let old_n = old.map(|v| v.child_count()).unwrap_or(0);
    let new_n = new.map(|v| v.child_count()).unwrap_or(0);
    for i in 0..old_n.max(new_n) {
        let a = old.and_then(|v| v.child_at(i));
        let b = new.and_then(|v| v.child_at(i));
        let differs = match (a, b) {
            (None, None) => false,
            (Some(a), Some(b)) => a.snapshot(now, start_time) != b.snapshot(now, start_time),
            _ => true,
        };
        if differs {
            delta.changed_indices.push(i);
        }
    }

    delta
}

fn collection_keys(value: &TsValue) -> Vec<ScalarValue> {
    use super::value::TsData;
    match &value.data {
        TsData::Set(s) => s.values(),
        TsData::Dict(d) => d.key_values(),
        _ => Vec::new(),
    }
}
