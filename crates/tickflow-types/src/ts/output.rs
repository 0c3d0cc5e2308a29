//! Time-series outputs.
//!
//! A `TsOutput` owns one time-series value tree plus the subscriber list of
//! every input linked into it. Handles address an endpoint inside the tree —
//! the root or any child — and every mutation goes through a handle so the
//! write can stamp the evaluation time up the path, wake overlapping
//! subscribers, and register the end-of-cycle transient reset with the
//! engine.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tickflow_common::{EngineTime, MIN_DT, ScalarValue};

use crate::ctx::{EngineContext, TickSink};
use crate::meta::{TsKind, TsMeta};

use super::path::{PathSeg, TsPath, format_path, overlaps};
use super::reference::TsReference;
use super::value::{MapDeltaValue, SetDeltaValue, TsData, TsValue, Value};

struct Subscriber {
    sink: Weak<dyn TickSink>,
    path: TsPath,
}

pub struct TsOutput {
    value: TsValue,
    subscribers: Vec<Subscriber>,
    /// Diagnostic owner path ("graph/node"), used by back-traces.
    owner: String,
    /// Tick for which a transient reset is already queued with the engine.
    reset_registered_at: Cell<EngineTime>,
}

impl TsOutput {
    fn new(meta: &'static TsMeta, owner: String) -> Self {
        TsOutput {
            value: TsValue::new(meta),
            subscribers: Vec::new(),
            owner,
            reset_registered_at: Cell::new(MIN_DT),
        }
    }
}

/// Shared handle to an endpoint of an output tree. Cloning is cheap; child
/// handles share the root cell and extend the path.
#[derive(Clone)]
pub struct OutputHandle {
    cell: Rc<RefCell<TsOutput>>,
    path: TsPath,
}

impl fmt::Debug for OutputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputHandle({})", self.describe())
    }
}

impl OutputHandle {
    pub fn new(meta: &'static TsMeta, owner: impl Into<String>) -> Self {
        OutputHandle {
            cell: Rc::new(RefCell::new(TsOutput::new(meta, owner.into()))),
            path: TsPath::new(),
        }
    }

    /// Handle for a child endpoint.
    pub fn child(&self, seg: PathSeg) -> OutputHandle {
        let mut path = self.path.clone();
        path.push(seg);
        OutputHandle {
            cell: self.cell.clone(),
            path,
        }
    }

    /// Handle for the root of the owning tree.
    pub fn root(&self) -> OutputHandle {
        OutputHandle {
            cell: self.cell.clone(),
            path: TsPath::new(),
        }
    }

    pub fn path(&self) -> &[PathSeg] {
        &self.path
    }

    /// Same output cell, regardless of path.
    pub fn same_tree(&self, other: &OutputHandle) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    /// Same endpoint: same cell and same path.
    pub fn endpoint_eq(&self, other: &OutputHandle) -> bool {
        self.same_tree(other) && self.path == other.path
    }

    pub fn describe(&self) -> String {
        format!("{}{}", self.cell.borrow().owner, format_path(&self.path))
    }

    pub fn owner(&self) -> String {
        self.cell.borrow().owner.clone()
    }

    /// The interned meta of this endpoint, walked from the root meta.
    pub fn meta(&self) -> &'static TsMeta {
        let root = self.cell.borrow().value.meta;
        let mut meta = root;
        for seg in &self.path {
            meta = match seg {
                PathSeg::Child(i) => match meta.kind {
                    TsKind::Tsl => meta.children[0].meta,
                    _ => meta.children[*i].meta,
                },
                PathSeg::Key(_) => meta.children[0].meta,
            };
        }
        meta
    }

    // ---- subscriptions --------------------------------------------------

    pub fn subscribe(&self, sink: &Rc<dyn TickSink>) {
        let mut out = self.cell.borrow_mut();
        let target = Rc::downgrade(sink);
        let already = out
            .subscribers
            .iter()
            .any(|s| s.path == self.path && std::ptr::addr_eq(s.sink.as_ptr(), target.as_ptr()));
        if !already {
            out.subscribers.push(Subscriber {
                sink: Rc::downgrade(sink),
                path: self.path.clone(),
            });
        }
    }

    /// Idempotent: removing an absent subscription is a no-op.
    pub fn unsubscribe(&self, sink: &Rc<dyn TickSink>) {
        let mut out = self.cell.borrow_mut();
        let target = Rc::downgrade(sink);
        out.subscribers
            .retain(|s| !(s.path == self.path && std::ptr::addr_eq(s.sink.as_ptr(), target.as_ptr())));
    }

    pub fn subscriber_count(&self) -> usize {
        self.cell.borrow().subscribers.len()
    }

    // ---- reads ----------------------------------------------------------

    /// Read the endpoint. Dict keys removed this tick still resolve, so
    /// readers holding a handle see the pre-erase value for the rest of the
    /// cycle.
    pub fn read<R>(&self, now: EngineTime, f: impl FnOnce(&TsValue) -> R) -> Option<R> {
        let out = self.cell.borrow();
        out.value.navigate_with_removed(&self.path, now).map(f)
    }

    /// Read without the removed-key channel (live entries only).
    pub fn read_live<R>(&self, f: impl FnOnce(&TsValue) -> R) -> Option<R> {
        let out = self.cell.borrow();
        out.value.navigate(&self.path).map(f)
    }

    pub fn exists(&self) -> bool {
        self.read_live(|_| ()).is_some()
    }

    pub fn valid(&self) -> bool {
        self.read_live(|v| v.valid()).unwrap_or(false)
    }

    pub fn all_valid(&self, now: EngineTime, start_time: EngineTime) -> bool {
        self.read_live(|v| v.all_valid(now, start_time)).unwrap_or(false)
    }

    pub fn modified(&self, now: EngineTime) -> bool {
        self.read(now, |v| v.modified(now)).unwrap_or(false)
    }

    pub fn last_modified(&self) -> EngineTime {
        self.read_live(|v| v.last_modified()).unwrap_or(MIN_DT)
    }

    pub fn scalar(&self) -> Option<ScalarValue> {
        self.read_live(|v| v.scalar()).flatten()
    }

    pub fn reference_value(&self) -> Option<TsReference> {
        self.read_live(|v| v.reference()).flatten()
    }

    pub fn snapshot(&self, now: EngineTime, start_time: EngineTime) -> Option<Value> {
        self.read(now, |v| v.snapshot(now, start_time)).flatten()
    }

    pub fn delta_snapshot(&self, now: EngineTime, start_time: EngineTime) -> Option<Value> {
        self.read(now, |v| v.delta_snapshot(now, start_time)).flatten()
    }

    pub fn set_delta(&self, now: EngineTime) -> SetDeltaValue {
        self.read(now, |v| v.set_delta(now)).unwrap_or_default()
    }

    pub fn map_delta(&self, now: EngineTime) -> MapDeltaValue {
        self.read(now, |v| v.map_delta(now)).unwrap_or_default()
    }

    pub fn set_contains(&self, value: &ScalarValue) -> bool {
        self.read_live(|v| match &v.data {
            TsData::Set(s) => s.contains(value),
            _ => false,
        })
        .unwrap_or(false)
    }

    pub fn set_values(&self) -> Vec<ScalarValue> {
        self.read_live(|v| match &v.data {
            TsData::Set(s) => s.values(),
            _ => Vec::new(),
        })
        .unwrap_or_default()
    }

    pub fn dict_keys(&self) -> Vec<ScalarValue> {
        self.read_live(|v| match &v.data {
            TsData::Dict(d) => d.key_values(),
            _ => Vec::new(),
        })
        .unwrap_or_default()
    }

    pub fn dict_contains(&self, key: &ScalarValue) -> bool {
        self.read_live(|v| match &v.data {
            TsData::Dict(d) => d.contains(key),
            _ => false,
        })
        .unwrap_or(false)
    }

    // ---- writes ---------------------------------------------------------

    pub fn set_scalar(&self, value: ScalarValue, ec: &dyn EngineContext) {
        self.write(ec, |v, now| v.set_scalar(value, now));
    }

    pub fn emit_signal(&self, ec: &dyn EngineContext) {
        self.write(ec, |v, now| v.emit_signal(now));
    }

    pub fn set_add(&self, value: ScalarValue, ec: &dyn EngineContext) {
        self.write(ec, |v, now| {
            v.set_add(&value, now);
        });
    }

    pub fn set_remove(&self, value: ScalarValue, ec: &dyn EngineContext) {
        self.write(ec, |v, now| {
            v.set_remove(&value, now);
        });
    }

    pub fn set_clear(&self, ec: &dyn EngineContext) {
        self.write(ec, |v, now| v.set_clear(now));
    }

    /// Idempotent: ensures the entry exists, returns its child handle.
    pub fn dict_create(&self, key: &ScalarValue, ec: &dyn EngineContext) -> OutputHandle {
        self.write(ec, |v, now| {
            v.dict_create(key, now);
        });
        self.child(PathSeg::Key(key.clone()))
    }

    /// Upsert: create the entry and apply `value` to it.
    pub fn dict_set(&self, key: &ScalarValue, value: &Value, ec: &dyn EngineContext) {
        self.write(ec, |v, now| {
            v.dict_create(key, now);
            let slot = match &v.data {
                TsData::Dict(d) => d.slot_of(key).expect("created above"),
                _ => panic!("dict_set on non-dict time series"),
            };
            if let TsData::Dict(d) = &mut v.data {
                d.get_slot_mut(slot).expect("created above").apply(value, now);
                d.mark_updated(slot, now);
            }
        });
    }

    pub fn dict_remove(&self, key: &ScalarValue, ec: &dyn EngineContext) -> bool {
        let mut removed = false;
        self.write(ec, |v, now| removed = v.dict_remove(key, now));
        removed
    }

    pub fn set_ref(&self, reference: Option<TsReference>, ec: &dyn EngineContext) {
        self.write(ec, |v, now| v.set_ref(reference, now));
    }

    pub fn apply(&self, value: &Value, ec: &dyn EngineContext) {
        self.write(ec, |v, now| v.apply(value, now));
    }

    pub fn invalidate(&self, ec: &dyn EngineContext) {
        self.write(ec, |v, now| v.mark_invalid(now));
    }

    /// Core write path: mutate the endpoint, stamp ancestors, wake
    /// subscribers, queue the transient reset.
    fn write(&self, ec: &dyn EngineContext, f: impl FnOnce(&mut TsValue, EngineTime)) {
        let now = ec.evaluation_time();
        let sinks: Vec<Rc<dyn TickSink>> = {
            let mut out = self.cell.borrow_mut();
            write_at(&mut out.value, &self.path, now, f)
                .unwrap_or_else(|| panic!("write to missing endpoint {}", self.describe()));

            if out.reset_registered_at.get() != now {
                out.reset_registered_at.set(now);
                let root = self.root();
                ec.add_after_evaluation(Box::new(move || root.clear_transients()));
            }

            out.subscribers.retain(|s| s.sink.strong_count() > 0);
            out.subscribers
                .iter()
                .filter(|s| overlaps(&s.path, &self.path))
                .filter_map(|s| s.sink.upgrade())
                .collect()
        };
        for sink in sinks {
            sink.notify(now);
        }
    }

    /// End-of-cycle sweep of window transients and keyed deltas.
    pub fn clear_transients(&self) {
        let mut out = self.cell.borrow_mut();
        out.value.clear_transients();
    }
}

/// Walk to the endpoint, run the mutation, and stamp every ancestor as
/// modified on the way back out (dict ancestors also record the child slot
/// as updated). Returns `None` when the path does not resolve.
fn write_at(
    value: &mut TsValue,
    path: &[PathSeg],
    now: EngineTime,
    f: impl FnOnce(&mut TsValue, EngineTime),
) -> Option<()> {
    match path.split_first() {
        None => {
            f(value, now);
            Some(())
        }
        Some((PathSeg::Child(i), rest)) => {
            let child = value.child_at_mut(*i)?;
            write_at(child, rest, now, f)?;
            value.mark_modified(now);
            Some(())
        }
        Some((PathSeg::Key(k), rest)) => {
            match &mut value.data {
                TsData::Dict(d) => {
                    let slot = d.slot_of(k)?;
                    write_at(d.get_slot_mut(slot)?, rest, now, f)?;
                    d.mark_updated(slot, now);
                }
                _ => return None,
            }
            value.mark_modified(now);
            Some(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::EngineContext;
    use crate::meta;
    use tickflow_common::ScalarKind;

    struct TestCtx {
        now: Cell<EngineTime>,
        after: RefCell<Vec<Box<dyn FnOnce()>>>,
    }

    impl TestCtx {
        fn new(now: EngineTime) -> Self {
            TestCtx {
                now: Cell::new(now),
                after: RefCell::new(Vec::new()),
            }
        }

        fn run_after(&self) {
            for f in self.after.borrow_mut().drain(..).collect::<Vec<_>>() {
                f();
            }
        }
    }

    impl EngineContext for TestCtx {
        fn evaluation_time(&self) -> EngineTime {
            self.now.get()
        }
        fn engine_start_time(&self) -> EngineTime {
            EngineTime::from_secs(0)
        }
        fn add_after_evaluation(&self, f: Box<dyn FnOnce()>) {
            self.after.borrow_mut().push(f);
        }
    }

    struct CountingSink {
        hits: Cell<usize>,
    }

    impl TickSink for CountingSink {
        fn notify(&self, _when: EngineTime) {
            self.hits.set(self.hits.get() + 1);
        }
    }

    fn t(s: i64) -> EngineTime {
        EngineTime::from_secs(s)
    }

    #[test]
    fn child_write_stamps_ancestors_and_wakes_container_subscriber() {
        let m = meta::tsb(
            &[("a", meta::ts(ScalarKind::Int)), ("b", meta::ts(ScalarKind::Int))],
            "Pair",
        );
        let out = OutputHandle::new(m, "g/node");
        let ctx = TestCtx::new(t(1));

        let sink: Rc<dyn TickSink> = Rc::new(CountingSink { hits: Cell::new(0) });
        out.subscribe(&sink);

        out.child(PathSeg::Child(0)).set_scalar(7i64.into(), &ctx);
        assert!(out.modified(t(1)));
        assert!(out.child(PathSeg::Child(0)).modified(t(1)));
        assert!(!out.child(PathSeg::Child(1)).modified(t(1)));

        let counting = Rc::new(CountingSink { hits: Cell::new(0) });
        let as_sink: Rc<dyn TickSink> = counting.clone();
        out.child(PathSeg::Child(1)).subscribe(&as_sink);
        out.child(PathSeg::Child(0)).set_scalar(8i64.into(), &ctx);
        // Sibling subscriber is not woken by a write to child 0.
        assert_eq!(counting.hits.get(), 0);
        out.set_scalar_at_root_signal(&ctx);
        assert!(counting.hits.get() > 0);
    }

    impl OutputHandle {
        /// Test helper: container-level write that touches every child.
        fn set_scalar_at_root_signal(&self, ec: &dyn EngineContext) {
            self.write(ec, |v, now| v.mark_modified(now));
        }
    }

    #[test]
    fn unsubscribe_is_idempotent_and_restores_list() {
        let out = OutputHandle::new(meta::ts(ScalarKind::Int), "g/n");
        let sink: Rc<dyn TickSink> = Rc::new(CountingSink { hits: Cell::new(0) });
        let before = out.subscriber_count();
        out.subscribe(&sink);
        out.subscribe(&sink);
        assert_eq!(out.subscriber_count(), before + 1);
        out.unsubscribe(&sink);
        assert_eq!(out.subscriber_count(), before);
        out.unsubscribe(&sink);
        assert_eq!(out.subscriber_count(), before);
    }

    #[test]
    fn dict_child_handles_survive_removal_for_one_tick() {
        let m = meta::tsd(ScalarKind::Str, meta::ts(ScalarKind::Int));
        let out = OutputHandle::new(m, "g/n");
        let ctx = TestCtx::new(t(1));
        out.dict_set(&"x".into(), &7i64.into(), &ctx);
        let x = out.child(PathSeg::Key("x".into()));
        assert_eq!(x.scalar(), Some(7i64.into()));

        ctx.now.set(t(2));
        out.dict_remove(&"x".into(), &ctx);
        // Within the cycle the pre-erase value is still readable.
        assert_eq!(x.read(t(2), |v| v.scalar()).flatten(), Some(7i64.into()));
        ctx.run_after();
        // After the sweep the endpoint no longer resolves.
        assert_eq!(x.read(t(3), |v| v.scalar()), None);
    }

    #[test]
    fn transient_reset_clears_set_delta() {
        let out = OutputHandle::new(meta::tss(ScalarKind::Str), "g/n");
        let ctx = TestCtx::new(t(1));
        out.set_add("a".into(), &ctx);
        assert_eq!(out.set_delta(t(1)).added, vec!["a".into()]);
        ctx.run_after();
        assert!(out.set_delta(t(1)).added.is_empty());
    }
}
