//! Owned time-series values.
//!
//! `TsValue` owns the storage of one time-series instance: its interned
//! meta, the last-modified stamp, a validity bit, and the kind-tagged data
//! union. All kind dispatch happens here, by matching on the tag — adding a
//! new kind means adding a variant and the matching arms, the engine above
//! never changes.

use tickflow_common::{EngineTime, MIN_DT, ScalarValue};

use crate::meta::{TsKind, TsMeta};

use super::dict::DictStorage;
use super::path::PathSeg;
use super::reference::TsReference;
use super::set::SetStorage;
use super::window::WindowData;

/// Kind-tagged storage union.
#[derive(Debug)]
pub enum TsData {
    Scalar(Option<ScalarValue>),
    Signal,
    Bundle(Vec<TsValue>),
    List(Vec<TsValue>),
    Set(SetStorage),
    Dict(DictStorage),
    Window(WindowData),
    Ref(Option<TsReference>),
}

/// A point-in-time snapshot of a time-series value, used for reads across
/// the node boundary and for push payloads. Collections are sorted by key so
/// snapshots compare deterministically.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Empty,
    Scalar(ScalarValue),
    Signal,
    Composite(Vec<Value>),
    Set(Vec<ScalarValue>),
    Map(Vec<(ScalarValue, Value)>),
    Window(Vec<ScalarValue>),
    Ref(TsReference),
}

impl Value {
    pub fn scalar(&self) -> Option<&ScalarValue> {
        match self {
            Value::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        self.scalar().and_then(|v| v.as_int())
    }
}

impl From<ScalarValue> for Value {
    fn from(v: ScalarValue) -> Self {
        Value::Scalar(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Scalar(v.into())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Scalar(v.into())
    }
}

/// TSS delta as seen by a reader at one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetDeltaValue {
    pub added: Vec<ScalarValue>,
    pub removed: Vec<ScalarValue>,
    pub cleared: bool,
}

/// TSD delta as seen by a reader at one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapDeltaValue {
    pub added: Vec<ScalarValue>,
    pub updated: Vec<ScalarValue>,
    pub removed: Vec<ScalarValue>,
    pub cleared: bool,
}

#[derive(Debug)]
pub struct TsValue {
    pub meta: &'static TsMeta,
    last_modified: EngineTime,
    valid: bool,
    pub data: TsData,
}

impl TsValue {
    pub fn new(meta: &'static TsMeta) -> Self {
        let data = match meta.kind {
            TsKind::Ts => TsData::Scalar(None),
            TsKind::Signal => TsData::Signal,
            TsKind::Tsb => TsData::Bundle(meta.children.iter().map(|f| TsValue::new(f.meta)).collect()),
            TsKind::Tsl => {
                let elem = meta.children[0].meta;
                let n = meta.fixed_size.unwrap_or(0);
                TsData::List((0..n).map(|_| TsValue::new(elem)).collect())
            }
            TsKind::Tsd => TsData::Dict(DictStorage::new(meta.key_kind(), meta.children[0].meta)),
            TsKind::Tss => TsData::Set(SetStorage::new(
                meta.scalar_kind().expect("TSS carries a scalar element type"),
            )),
            TsKind::Tsw => TsData::Window(WindowData::new(meta.window.expect("TSW carries a window spec"))),
            TsKind::Ref => TsData::Ref(None),
        };
        debug_assert!(crate::meta::schema(meta).time_slots >= 1);
        TsValue {
            meta,
            last_modified: MIN_DT,
            valid: false,
            data,
        }
    }

    pub fn last_modified(&self) -> EngineTime {
        self.last_modified
    }

    pub fn modified(&self, now: EngineTime) -> bool {
        self.last_modified == now
    }

    pub fn valid(&self) -> bool {
        match &self.data {
            TsData::Bundle(children) | TsData::List(children) => {
                self.valid || children.iter().any(|c| c.valid())
            }
            _ => self.valid,
        }
    }

    /// Recursively valid: the value itself plus every child; windows also
    /// require their minimum fill.
    pub fn all_valid(&self, now: EngineTime, start_time: EngineTime) -> bool {
        match &self.data {
            TsData::Scalar(_) | TsData::Signal | TsData::Ref(_) => self.valid,
            TsData::Bundle(children) | TsData::List(children) => {
                self.valid() && children.iter().all(|c| c.all_valid(now, start_time))
            }
            TsData::Set(_) => self.valid,
            TsData::Dict(d) => {
                self.valid && d.live_entries().all(|(_, child)| child.all_valid(now, start_time))
            }
            TsData::Window(w) => self.valid && w.all_valid(now, start_time),
        }
    }

    pub fn mark_modified(&mut self, now: EngineTime) {
        self.last_modified = now;
        self.valid = true;
    }

    pub fn mark_invalid(&mut self, now: EngineTime) {
        self.valid = false;
        self.last_modified = now;
        match &mut self.data {
            TsData::Scalar(v) => *v = None,
            TsData::Window(w) => w.invalidate(),
            TsData::Ref(r) => *r = None,
            _ => {}
        }
    }

    // ---- navigation -----------------------------------------------------

    pub fn child_count(&self) -> usize {
        match &self.data {
            TsData::Bundle(c) | TsData::List(c) => c.len(),
            TsData::Dict(d) => d.len(),
            TsData::Set(s) => s.len(),
            _ => 0,
        }
    }

    pub fn child_at(&self, index: usize) -> Option<&TsValue> {
        match &self.data {
            TsData::Bundle(c) | TsData::List(c) => c.get(index),
            _ => None,
        }
    }

    pub fn child_at_mut(&mut self, index: usize) -> Option<&mut TsValue> {
        match &mut self.data {
            TsData::Bundle(c) | TsData::List(c) => c.get_mut(index),
            _ => None,
        }
    }

    pub fn child_by_name(&self, name: &str) -> Option<&TsValue> {
        let (index, _) = self.meta.child_by_name(name)?;
        self.child_at(index)
    }

    pub fn child_by_key(&self, key: &ScalarValue) -> Option<&TsValue> {
        match &self.data {
            TsData::Dict(d) => d.get(key),
            _ => None,
        }
    }

    pub fn navigate(&self, path: &[PathSeg]) -> Option<&TsValue> {
        match path.split_first() {
            None => Some(self),
            Some((seg, rest)) => {
                let child = match seg {
                    PathSeg::Child(i) => self.child_at(*i)?,
                    PathSeg::Key(k) => self.child_by_key(k)?,
                };
                child.navigate(rest)
            }
        }
    }

    pub fn navigate_mut(&mut self, path: &[PathSeg]) -> Option<&mut TsValue> {
        match path.split_first() {
            None => Some(self),
            Some((seg, rest)) => {
                let child = match seg {
                    PathSeg::Child(i) => self.child_at_mut(*i)?,
                    PathSeg::Key(k) => match &mut self.data {
                        TsData::Dict(d) => d.get_mut(k)?,
                        _ => return None,
                    },
                };
                child.navigate_mut(rest)
            }
        }
    }

    /// Like [`Self::navigate`], but a dict key removed this tick resolves to
    /// the parked pre-erase child.
    pub fn navigate_with_removed(&self, path: &[PathSeg], now: EngineTime) -> Option<&TsValue> {
        match path.split_first() {
            None => Some(self),
            Some((seg, rest)) => {
                let child = match seg {
                    PathSeg::Child(i) => self.child_at(*i)?,
                    PathSeg::Key(k) => match &self.data {
                        TsData::Dict(d) => d.get(k).or_else(|| d.removed_value(k, now))?,
                        _ => return None,
                    },
                };
                child.navigate_with_removed(rest, now)
            }
        }
    }

    // ---- reads ----------------------------------------------------------

    pub fn scalar(&self) -> Option<ScalarValue> {
        match &self.data {
            TsData::Scalar(v) => v.clone(),
            _ => None,
        }
    }

    pub fn reference(&self) -> Option<TsReference> {
        match &self.data {
            TsData::Ref(r) => r.clone(),
            _ => None,
        }
    }

    pub fn snapshot(&self, now: EngineTime, start_time: EngineTime) -> Option<Value> {
        if !self.valid() {
            return None;
        }
        Some(match &self.data {
            TsData::Scalar(v) => Value::Scalar(v.clone()?),
            TsData::Signal => Value::Signal,
            TsData::Bundle(children) | TsData::List(children) => Value::Composite(
                children
                    .iter()
                    .map(|c| c.snapshot(now, start_time).unwrap_or(Value::Empty))
                    .collect(),
            ),
            TsData::Set(s) => {
                let mut values = s.values();
                values.sort();
                Value::Set(values)
            }
            TsData::Dict(d) => {
                let mut entries: Vec<(ScalarValue, Value)> = d
                    .live_entries()
                    .map(|(k, v)| (k.clone(), v.snapshot(now, start_time).unwrap_or(Value::Empty)))
                    .collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                Value::Map(entries)
            }
            TsData::Window(WindowData::Fixed(w)) => Value::Window(w.value()?),
            TsData::Window(WindowData::Duration(w)) => Value::Window(w.value(now, start_time)?),
            TsData::Ref(r) => Value::Ref(r.clone()?),
        })
    }

    /// The change this tick produced, if any.
    pub fn delta_snapshot(&self, now: EngineTime, start_time: EngineTime) -> Option<Value> {
        match &self.data {
            TsData::Scalar(v) => {
                if self.modified(now) { v.clone().map(Value::Scalar) } else { None }
            }
            TsData::Signal => self.modified(now).then_some(Value::Signal),
            TsData::Bundle(children) | TsData::List(children) => {
                if !self.modified(now) {
                    return None;
                }
                Some(Value::Composite(
                    children
                        .iter()
                        .map(|c| c.delta_snapshot(now, start_time).unwrap_or(Value::Empty))
                        .collect(),
                ))
            }
            TsData::Set(s) => {
                let added = s.added(now);
                (!added.is_empty()).then_some(Value::Set(added))
            }
            TsData::Dict(d) => {
                if !self.modified(now) {
                    return None;
                }
                let mut entries: Vec<(ScalarValue, Value)> = d
                    .live_entries()
                    .filter(|(_, v)| v.modified(now))
                    .map(|(k, v)| (k.clone(), v.delta_snapshot(now, start_time).unwrap_or(Value::Empty)))
                    .collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                Some(Value::Map(entries))
            }
            TsData::Window(WindowData::Fixed(w)) => w.delta_value(now).map(Value::Scalar),
            TsData::Window(WindowData::Duration(w)) => {
                w.delta_value(now, start_time).map(Value::Scalar)
            }
            TsData::Ref(r) => {
                if self.modified(now) { r.clone().map(Value::Ref) } else { None }
            }
        }
    }

    pub fn set_delta(&self, now: EngineTime) -> SetDeltaValue {
        match &self.data {
            TsData::Set(s) => SetDeltaValue {
                added: s.added(now),
                removed: s.removed(now),
                cleared: s.was_cleared(now),
            },
            _ => SetDeltaValue::default(),
        }
    }

    pub fn map_delta(&self, now: EngineTime) -> MapDeltaValue {
        match &self.data {
            TsData::Dict(d) => MapDeltaValue {
                added: d.added_keys(now),
                updated: d.updated_keys(now),
                removed: d.removed_keys(now),
                cleared: false,
            },
            _ => MapDeltaValue::default(),
        }
    }

    // ---- writes ---------------------------------------------------------

    pub fn set_scalar(&mut self, value: ScalarValue, now: EngineTime) {
        if let Some(expected) = self.meta.scalar_kind() {
            assert_eq!(value.kind(), expected, "scalar kind mismatch on {}", self.meta.name);
        }
        match &mut self.data {
            TsData::Scalar(v) => *v = Some(value),
            TsData::Window(w) => w.push(value, now),
            other => panic!("set_scalar on non-scalar time series {other:?}"),
        }
        self.mark_modified(now);
    }

    pub fn emit_signal(&mut self, now: EngineTime) {
        self.mark_modified(now);
    }

    pub fn set_add(&mut self, value: &ScalarValue, now: EngineTime) -> bool {
        let inserted = match &mut self.data {
            TsData::Set(s) => s.add(value, now),
            other => panic!("set_add on non-set time series {other:?}"),
        };
        if inserted {
            self.mark_modified(now);
        }
        inserted
    }

    pub fn set_remove(&mut self, value: &ScalarValue, now: EngineTime) -> bool {
        let removed = match &mut self.data {
            TsData::Set(s) => s.remove(value, now),
            other => panic!("set_remove on non-set time series {other:?}"),
        };
        if removed {
            self.mark_modified(now);
        }
        removed
    }

    pub fn set_clear(&mut self, now: EngineTime) {
        match &mut self.data {
            TsData::Set(s) => s.clear(now),
            other => panic!("set_clear on non-set time series {other:?}"),
        }
        self.mark_modified(now);
    }

    pub fn dict_create(&mut self, key: &ScalarValue, now: EngineTime) -> usize {
        let (slot, inserted) = match &mut self.data {
            TsData::Dict(d) => {
                let existed = d.contains(key);
                (d.create(key, now), !existed)
            }
            other => panic!("dict_create on non-dict time series {other:?}"),
        };
        if inserted {
            self.mark_modified(now);
        }
        slot
    }

    pub fn dict_remove(&mut self, key: &ScalarValue, now: EngineTime) -> bool {
        let removed = match &mut self.data {
            TsData::Dict(d) => d.remove(key, now),
            other => panic!("dict_remove on non-dict time series {other:?}"),
        };
        if removed {
            self.mark_modified(now);
        }
        removed
    }

    pub fn set_ref(&mut self, reference: Option<TsReference>, now: EngineTime) {
        let bound = reference.is_some();
        match &mut self.data {
            TsData::Ref(r) => *r = reference,
            other => panic!("set_ref on non-ref time series {other:?}"),
        }
        self.last_modified = now;
        self.valid = bound;
    }

    /// Generic apply used by push sources and sinks: routes a snapshot into
    /// the kind-specific write.
    pub fn apply(&mut self, value: &Value, now: EngineTime) {
        match (self.meta.kind, value) {
            (TsKind::Ts | TsKind::Tsw, Value::Scalar(v)) => self.set_scalar(v.clone(), now),
            (TsKind::Signal, _) => self.emit_signal(now),
            (TsKind::Tsb | TsKind::Tsl, Value::Composite(values)) => {
                let mut any = false;
                let elem = self.meta.element();
                let dynamic = self.meta.kind == TsKind::Tsl && self.meta.fixed_size.is_none();
                let children = match &mut self.data {
                    TsData::Bundle(c) | TsData::List(c) => c,
                    _ => unreachable!("kind/data agree by construction"),
                };
                if dynamic {
                    let elem = elem.expect("dynamic list carries an element meta");
                    while children.len() < values.len() {
                        children.push(TsValue::new(elem));
                    }
                }
                for (child, v) in children.iter_mut().zip(values.iter()) {
                    if !matches!(v, Value::Empty) {
                        child.apply(v, now);
                        any = true;
                    }
                }
                if any {
                    self.mark_modified(now);
                }
            }
            (TsKind::Tss, Value::Set(target)) => {
                let current = match &self.data {
                    TsData::Set(s) => s.values(),
                    _ => unreachable!("kind/data agree by construction"),
                };
                for v in current {
                    if !target.contains(&v) {
                        self.set_remove(&v, now);
                    }
                }
                for v in target {
                    self.set_add(v, now);
                }
                self.mark_modified(now);
            }
            (TsKind::Tsd, Value::Map(entries)) => {
                for (key, v) in entries {
                    self.dict_create(key, now);
                    let slot = match &mut self.data {
                        TsData::Dict(d) => {
                            let slot = d.slot_of(key).expect("created above");
                            d.get_slot_mut(slot).expect("created above").apply(v, now);
                            slot
                        }
                        _ => unreachable!("kind/data agree by construction"),
                    };
                    if let TsData::Dict(d) = &mut self.data {
                        d.mark_updated(slot, now);
                    }
                }
                self.mark_modified(now);
            }
            (TsKind::Ref, Value::Ref(r)) => self.set_ref(Some(r.clone()), now),
            (kind, value) => panic!("cannot apply {value:?} to {kind:?} time series {}", self.meta.name),
        }
    }

    /// End-of-cycle transient cleanup: window displacement slots and keyed
    /// delta sweeps, recursively.
    pub fn clear_transients(&mut self) {
        match &mut self.data {
            TsData::Window(w) => w.clear_transients(),
            TsData::Set(s) => s.sweep(),
            TsData::Dict(d) => {
                d.sweep();
                let slots: Vec<usize> = d.keys().live_slots().collect();
                for slot in slots {
                    if let Some(child) = d.get_slot_mut(slot) {
                        child.clear_transients();
                    }
                }
            }
            TsData::Bundle(children) | TsData::List(children) => {
                for child in children {
                    child.clear_transients();
                }
            }
            _ => {}
        }
    }

    /// Rendering for back-traces: short, never panics.
    pub fn display_short(&self, now: EngineTime, start_time: EngineTime) -> String {
        match self.snapshot(now, start_time) {
            Some(Value::Scalar(v)) => v.truncated(32),
            Some(Value::Signal) => "signal".to_string(),
            Some(Value::Set(vs)) => format!("{{{} items}}", vs.len()),
            Some(Value::Map(es)) => format!("{{{} keys}}", es.len()),
            Some(Value::Composite(cs)) => format!("({} fields)", cs.len()),
            Some(Value::Window(vs)) => format!("[{} samples]", vs.len()),
            Some(Value::Ref(r)) => format!("ref:{r}"),
            Some(Value::Empty) | None => "<invalid>".to_string(),
        }
    }
}
