//! Time-series inputs and the link machinery.
//!
//! An input mirrors the shape of its meta and holds the subscription edges
//! into bound outputs:
//!
//! - a plain **link** for scalar, signal, set, dict, window and ref inputs
//!   (and for containers bound to REF outputs — the non-peered case);
//! - a **peered** fan-out for bundles and fixed lists bound to matching
//!   non-REF outputs: every child binds recursively and subscribes on its
//!   own;
//! - a **ref-resolving** two-channel link when a non-REF input is bound to a
//!   REF output: the control channel stays subscribed to the REF output
//!   itself, and the data channel re-binds to whatever the reference
//!   resolves to. Re-binding produces an eagerly computed [`RebindDelta`]
//!   so downstream delta readers see the transition exactly once.

use std::rc::Rc;

use tickflow_common::{EngineTime, MIN_DT, ScalarValue};

use crate::ctx::TickSink;
use crate::meta::{TsKind, TsMeta};

use super::output::OutputHandle;
use super::path::PathSeg;
use super::reference::{RebindDelta, TsReference, compute_rebind_delta};
use super::value::{MapDeltaValue, SetDeltaValue, Value};

#[derive(Debug)]
pub struct TsLink {
    target: OutputHandle,
    subscribed: bool,
}

impl TsLink {
    fn new(target: OutputHandle) -> Self {
        TsLink {
            target,
            subscribed: false,
        }
    }

    fn subscribe(&mut self, sink: &Rc<dyn TickSink>) {
        if !self.subscribed {
            self.target.subscribe(sink);
            self.subscribed = true;
        }
    }

    fn unsubscribe(&mut self, sink: &Rc<dyn TickSink>) {
        if self.subscribed {
            self.target.unsubscribe(sink);
            self.subscribed = false;
        }
    }
}

#[derive(Debug)]
pub struct RefTargetLink {
    /// Control channel: permanently subscribed to the REF output.
    control: TsLink,
    /// The reference value the data channel currently reflects.
    current: Option<TsReference>,
    /// Data channel: bound to the resolved target.
    data: Option<TsLink>,
    /// Delta computed at the last rebind, consumed at that tick only.
    rebind: Option<RebindDelta>,
}

#[derive(Debug)]
enum InputKind {
    Unbound,
    Link(TsLink),
    Peered(Vec<TsInput>),
    RefResolve(Box<RefTargetLink>),
}

pub struct TsInput {
    pub meta: &'static TsMeta,
    pub name: String,
    kind: InputKind,
    active: bool,
    sink: Option<Rc<dyn TickSink>>,
    bound_at: EngineTime,
    /// Same-graph producer node index, recorded at wiring time for
    /// activation back-traces.
    pub producer: Option<usize>,
}

impl std::fmt::Debug for TsInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsInput")
            .field("name", &self.name)
            .field("meta", &self.meta.name)
            .field("active", &self.active)
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl TsInput {
    pub fn new(meta: &'static TsMeta, name: impl Into<String>) -> Self {
        TsInput {
            meta,
            name: name.into(),
            kind: InputKind::Unbound,
            active: false,
            sink: None,
            bound_at: MIN_DT,
            producer: None,
        }
    }

    pub fn is_bound(&self) -> bool {
        !matches!(self.kind, InputKind::Unbound)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Peered inputs recurse into container children; everything else holds
    /// a single container-level link.
    pub fn is_peered(&self) -> bool {
        matches!(self.kind, InputKind::Peered(_))
    }

    pub fn bound_at(&self) -> EngineTime {
        self.bound_at
    }

    /// Install the sink that subscriptions wake. Any live subscriptions are
    /// migrated; callers re-parenting an input across nodes make it passive
    /// first, as the runtime protocols require.
    pub fn attach_sink(&mut self, sink: Rc<dyn TickSink>) {
        let old = self.sink.take();
        match &mut self.kind {
            InputKind::Unbound => {}
            InputKind::Link(link) => migrate(link, old.as_ref(), &sink),
            InputKind::Peered(children) => {
                for child in children {
                    child.attach_sink(sink.clone());
                }
            }
            InputKind::RefResolve(rl) => {
                migrate(&mut rl.control, old.as_ref(), &sink);
                if let Some(data) = &mut rl.data {
                    migrate(data, old.as_ref(), &sink);
                }
            }
        }
        self.sink = Some(sink);
    }

    /// Bind this input to an output endpoint. Structurally invalid binds are
    /// wiring bugs and panic.
    pub fn bind_output(&mut self, target: OutputHandle, now: EngineTime) {
        self.unbind();
        let target_meta = target.meta();
        self.kind = match (self.meta.kind, target_meta.kind) {
            // A non-REF input bound to a REF output: two-channel resolution,
            // container-level (non-peered) by design.
            (k, TsKind::Ref) if k != TsKind::Ref => {
                let mut rl = Box::new(RefTargetLink {
                    control: TsLink::new(target),
                    current: None,
                    data: None,
                    rebind: None,
                });
                if let Some(sink) = &self.sink {
                    rl.control.subscribe(sink);
                }
                InputKind::RefResolve(rl)
            }
            // Static containers bound to matching outputs fan out per child.
            (TsKind::Tsb, TsKind::Tsb) => {
                assert!(
                    std::ptr::eq(self.meta, target_meta),
                    "bundle bind requires identical metas: {} vs {}",
                    self.meta.name,
                    target_meta.name
                );
                InputKind::Peered(
                    self.meta
                        .children
                        .iter()
                        .enumerate()
                        .map(|(i, field)| {
                            let mut child = TsInput::new(
                                field.meta,
                                field.name.clone().unwrap_or_else(|| i.to_string()),
                            );
                            if let Some(sink) = &self.sink {
                                child.sink = Some(sink.clone());
                            }
                            child.bind_output(target.child(PathSeg::Child(i)), now);
                            child
                        })
                        .collect(),
                )
            }
            (TsKind::Tsl, TsKind::Tsl) if self.meta.fixed_size.is_some() => {
                assert_eq!(
                    self.meta.fixed_size, target_meta.fixed_size,
                    "fixed list bind requires matching sizes"
                );
                let elem = self.meta.children[0].meta;
                let n = self.meta.fixed_size.unwrap_or(0);
                InputKind::Peered(
                    (0..n)
                        .map(|i| {
                            let mut child = TsInput::new(elem, i.to_string());
                            if let Some(sink) = &self.sink {
                                child.sink = Some(sink.clone());
                            }
                            child.bind_output(target.child(PathSeg::Child(i)), now);
                            child
                        })
                        .collect(),
                )
            }
            // Signal inputs observe timestamps of any output.
            (TsKind::Signal, _) => InputKind::Link(TsLink::new(target)),
            // REF inputs reference any output; a plain target is wrapped at
            // read time, a REF target is read through.
            (TsKind::Ref, _) => InputKind::Link(TsLink::new(target)),
            (k, tk) if k == tk => {
                assert!(
                    std::ptr::eq(self.meta, target_meta),
                    "bind requires identical metas: {} vs {}",
                    self.meta.name,
                    target_meta.name
                );
                InputKind::Link(TsLink::new(target))
            }
            (k, tk) => panic!(
                "structurally invalid bind: input {}[{k:?}] to output {}[{tk:?}]",
                self.meta.name, target_meta.name
            ),
        };
        self.bound_at = now;
        if self.active {
            self.subscribe_links();
        }
        // A freshly bound ref-resolver resolves immediately.
        self.refresh(now, MIN_DT);
    }

    /// Copy another input's binding (broadcast args, reduce zero leaves).
    pub fn clone_binding_from(&mut self, other: &TsInput, now: EngineTime) {
        match &other.kind {
            InputKind::Unbound => self.unbind(),
            InputKind::Link(link) => self.bind_output(link.target.clone(), now),
            InputKind::Peered(_) => {
                panic!("clone_binding_from on peered input {}", other.name)
            }
            InputKind::RefResolve(rl) => self.bind_output(rl.control.target.clone(), now),
        }
    }

    pub fn unbind(&mut self) {
        if let Some(sink) = self.sink.clone() {
            self.for_each_link(|link| link.unsubscribe(&sink));
        }
        self.kind = InputKind::Unbound;
        self.bound_at = MIN_DT;
    }

    /// Subscribe to the bound outputs without changing the binding.
    pub fn make_active(&mut self) {
        self.active = true;
        self.subscribe_links();
        if let InputKind::Peered(children) = &mut self.kind {
            for child in children {
                child.make_active();
            }
        }
    }

    /// Drop subscriptions without changing the binding. The control channel
    /// of a ref-resolver stays subscribed; only the data channel goes quiet.
    pub fn make_passive(&mut self) {
        self.active = false;
        let Some(sink) = self.sink.clone() else {
            if let InputKind::Peered(children) = &mut self.kind {
                for child in children {
                    child.make_passive();
                }
            }
            return;
        };
        match &mut self.kind {
            InputKind::Unbound => {}
            InputKind::Link(link) => link.unsubscribe(&sink),
            InputKind::Peered(children) => {
                for child in children {
                    child.make_passive();
                }
            }
            InputKind::RefResolve(rl) => {
                if let Some(data) = &mut rl.data {
                    data.unsubscribe(&sink);
                }
            }
        }
    }

    /// Re-resolve ref-resolving links against the current reference value.
    /// The runtime calls this before a node evaluates; a change re-binds the
    /// data channel and records the rebind delta for this tick.
    pub fn refresh(&mut self, now: EngineTime, start_time: EngineTime) {
        match &mut self.kind {
            InputKind::Peered(children) => {
                for child in children {
                    child.refresh(now, start_time);
                }
            }
            InputKind::RefResolve(rl) => {
                let reference = rl.control.target.reference_value();
                let changed = reference != rl.current;
                if !changed {
                    return;
                }
                let old_target = rl.data.as_ref().map(|d| d.target.clone());
                let new_target = reference.as_ref().map(|r| r.target.clone());

                rl.rebind = Some(compute_delta_between(
                    old_target.as_ref(),
                    new_target.as_ref(),
                    now,
                    start_time,
                ));

                if let (Some(sink), Some(data)) = (&self.sink, &mut rl.data) {
                    data.unsubscribe(sink);
                }
                rl.data = new_target.map(TsLink::new);
                rl.current = reference;
                if self.active {
                    if let (Some(sink), Some(data)) = (&self.sink, &mut rl.data) {
                        data.subscribe(sink);
                    }
                }
            }
            _ => {}
        }
    }

    // ---- reads ----------------------------------------------------------

    /// The output endpoint reads flow through, when a single one exists.
    pub fn bound_target(&self) -> Option<OutputHandle> {
        match &self.kind {
            InputKind::Link(link) => Some(link.target.clone()),
            InputKind::RefResolve(rl) => rl.data.as_ref().map(|d| d.target.clone()),
            _ => None,
        }
    }

    /// The REF output a ref-resolving input is controlled by.
    pub fn control_target(&self) -> Option<OutputHandle> {
        match &self.kind {
            InputKind::RefResolve(rl) => Some(rl.control.target.clone()),
            _ => None,
        }
    }

    pub fn valid(&self) -> bool {
        match &self.kind {
            InputKind::Unbound => false,
            InputKind::Link(link) => link.target.valid(),
            InputKind::Peered(children) => children.iter().any(|c| c.valid()),
            InputKind::RefResolve(rl) => rl.data.as_ref().is_some_and(|d| d.target.valid()),
        }
    }

    pub fn all_valid(&self, now: EngineTime, start_time: EngineTime) -> bool {
        match &self.kind {
            InputKind::Unbound => false,
            InputKind::Link(link) => link.target.all_valid(now, start_time),
            InputKind::Peered(children) => children.iter().all(|c| c.all_valid(now, start_time)),
            InputKind::RefResolve(rl) => rl
                .data
                .as_ref()
                .is_some_and(|d| d.target.all_valid(now, start_time)),
        }
    }

    pub fn modified(&self, now: EngineTime) -> bool {
        match &self.kind {
            InputKind::Unbound => false,
            InputKind::Link(link) => link.target.modified(now),
            InputKind::Peered(children) => children.iter().any(|c| c.modified(now)),
            InputKind::RefResolve(rl) => {
                rl.rebind.as_ref().is_some_and(|d| d.time == now)
                    || rl.data.as_ref().is_some_and(|d| d.target.modified(now))
            }
        }
    }

    pub fn last_modified(&self) -> EngineTime {
        match &self.kind {
            InputKind::Unbound => MIN_DT,
            InputKind::Link(link) => link.target.last_modified(),
            InputKind::Peered(children) => children
                .iter()
                .map(|c| c.last_modified())
                .max()
                .unwrap_or(MIN_DT),
            InputKind::RefResolve(rl) => rl
                .data
                .as_ref()
                .map(|d| d.target.last_modified())
                .unwrap_or(MIN_DT),
        }
    }

    pub fn scalar(&self) -> Option<ScalarValue> {
        self.bound_target().and_then(|t| t.scalar())
    }

    pub fn snapshot(&self, now: EngineTime, start_time: EngineTime) -> Option<Value> {
        match &self.kind {
            InputKind::Unbound => None,
            InputKind::Link(link) => {
                if self.meta.kind == TsKind::Ref {
                    return self.ref_value().map(Value::Ref);
                }
                link.target.snapshot(now, start_time)
            }
            InputKind::Peered(children) => Some(Value::Composite(
                children
                    .iter()
                    .map(|c| c.snapshot(now, start_time).unwrap_or(Value::Empty))
                    .collect(),
            )),
            InputKind::RefResolve(rl) => rl
                .data
                .as_ref()
                .and_then(|d| d.target.snapshot(now, start_time)),
        }
    }

    pub fn delta_snapshot(&self, now: EngineTime, start_time: EngineTime) -> Option<Value> {
        match &self.kind {
            InputKind::Unbound => None,
            InputKind::Link(link) => link.target.delta_snapshot(now, start_time),
            InputKind::Peered(children) => Some(Value::Composite(
                children
                    .iter()
                    .map(|c| c.delta_snapshot(now, start_time).unwrap_or(Value::Empty))
                    .collect(),
            )),
            InputKind::RefResolve(rl) => rl
                .data
                .as_ref()
                .and_then(|d| d.target.delta_snapshot(now, start_time)),
        }
    }

    /// The reference this input denotes. REF inputs bound to plain outputs
    /// reference the output itself; bound to REF outputs they read through.
    pub fn ref_value(&self) -> Option<TsReference> {
        match &self.kind {
            InputKind::Link(link) => {
                if link.target.meta().kind == TsKind::Ref {
                    link.target.reference_value()
                } else {
                    Some(TsReference::new(link.target.clone()))
                }
            }
            _ => None,
        }
    }

    /// TSS delta, with the sampling and rebind rules folded in: a freshly
    /// bound input reports the full contents as added, and a ref rebind at
    /// this tick reports the precomputed transition delta.
    pub fn set_delta(&self, now: EngineTime) -> SetDeltaValue {
        let Some(target) = self.bound_target() else {
            return match &self.kind {
                InputKind::RefResolve(rl) => rebind_only_delta(rl, now),
                _ => SetDeltaValue::default(),
            };
        };
        if self.bound_at == now && !matches!(self.kind, InputKind::RefResolve(_)) {
            return SetDeltaValue {
                added: target.set_values(),
                removed: Vec::new(),
                cleared: false,
            };
        }
        let mut delta = target.set_delta(now);
        if let InputKind::RefResolve(rl) = &self.kind {
            if let Some(rebind) = rl.rebind.as_ref().filter(|d| d.time == now) {
                for v in &rebind.added {
                    if !delta.added.contains(v) {
                        delta.added.push(v.clone());
                    }
                }
                for v in &rebind.removed {
                    if !delta.removed.contains(v) {
                        delta.removed.push(v.clone());
                    }
                }
                delta.added.retain(|v| !rebind.removed.contains(v));
            }
        }
        delta
    }

    /// TSD delta with the same sampling rule.
    pub fn map_delta(&self, now: EngineTime) -> MapDeltaValue {
        let Some(target) = self.bound_target() else {
            return MapDeltaValue::default();
        };
        if self.bound_at == now && !matches!(self.kind, InputKind::RefResolve(_)) {
            return MapDeltaValue {
                added: target.dict_keys(),
                updated: Vec::new(),
                removed: Vec::new(),
                cleared: false,
            };
        }
        let mut delta = target.map_delta(now);
        if let InputKind::RefResolve(rl) = &self.kind {
            if let Some(rebind) = rl.rebind.as_ref().filter(|d| d.time == now) {
                for v in &rebind.added {
                    if !delta.added.contains(v) {
                        delta.added.push(v.clone());
                    }
                }
                for v in &rebind.removed {
                    if !delta.removed.contains(v) {
                        delta.removed.push(v.clone());
                    }
                }
            }
        }
        delta
    }

    pub fn set_contains(&self, value: &ScalarValue) -> bool {
        self.bound_target().is_some_and(|t| t.set_contains(value))
    }

    pub fn set_values(&self) -> Vec<ScalarValue> {
        self.bound_target().map(|t| t.set_values()).unwrap_or_default()
    }

    pub fn dict_keys(&self) -> Vec<ScalarValue> {
        self.bound_target().map(|t| t.dict_keys()).unwrap_or_default()
    }

    /// Window contents (oldest first), absent while below the minimum fill.
    pub fn window_value(&self, now: EngineTime, start_time: EngineTime) -> Option<Vec<ScalarValue>> {
        match self.snapshot(now, start_time) {
            Some(Value::Window(vs)) => Some(vs),
            _ => None,
        }
    }

    /// The value displaced from a fixed window this cycle, if any.
    pub fn window_removed_value(&self) -> Option<ScalarValue> {
        use super::value::TsData;
        use super::window::WindowData;
        let target = self.bound_target()?;
        target
            .read_live(|v| match &v.data {
                TsData::Window(WindowData::Fixed(w)) => w.removed_value().cloned(),
                _ => None,
            })
            .flatten()
    }

    /// Values evicted from a duration window this cycle.
    pub fn window_removed_values(&self, now: EngineTime) -> Vec<ScalarValue> {
        use super::value::TsData;
        use super::window::WindowData;
        let Some(target) = self.bound_target() else {
            return Vec::new();
        };
        target
            .read_live(|v| match &v.data {
                TsData::Window(WindowData::Duration(w)) => w.removed_values(now),
                _ => Vec::new(),
            })
            .unwrap_or_default()
    }

    pub fn peered_children(&self) -> Option<&[TsInput]> {
        match &self.kind {
            InputKind::Peered(children) => Some(children),
            _ => None,
        }
    }

    pub fn describe_binding(&self) -> String {
        match &self.kind {
            InputKind::Unbound => "<unbound>".to_string(),
            InputKind::Link(link) => link.target.describe(),
            InputKind::Peered(children) => format!("<peered:{}>", children.len()),
            InputKind::RefResolve(rl) => match &rl.data {
                Some(d) => format!("{} (via {})", d.target.describe(), rl.control.target.describe()),
                None => format!("<unresolved> (via {})", rl.control.target.describe()),
            },
        }
    }

    // ---- internals ------------------------------------------------------

    fn subscribe_links(&mut self) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        match &mut self.kind {
            InputKind::Unbound => {}
            InputKind::Link(link) => link.subscribe(&sink),
            InputKind::Peered(_) => {}
            InputKind::RefResolve(rl) => {
                rl.control.subscribe(&sink);
                if let Some(data) = &mut rl.data {
                    data.subscribe(&sink);
                }
            }
        }
    }

    fn for_each_link(&mut self, mut f: impl FnMut(&mut TsLink)) {
        fn walk(input: &mut TsInput, f: &mut impl FnMut(&mut TsLink)) {
            match &mut input.kind {
                InputKind::Unbound => {}
                InputKind::Link(link) => f(link),
                InputKind::Peered(children) => {
                    for child in children {
                        walk(child, f);
                    }
                }
                InputKind::RefResolve(rl) => {
                    f(&mut rl.control);
                    if let Some(data) = &mut rl.data {
                        f(data);
                    }
                }
            }
        }
        walk(self, &mut f);
    }
}

fn migrate(link: &mut TsLink, old: Option<&Rc<dyn TickSink>>, new: &Rc<dyn TickSink>) {
    if link.subscribed {
        if let Some(old) = old {
            link.target.unsubscribe(old);
        }
        link.subscribed = false;
        link.subscribe(new);
    }
}

fn rebind_only_delta(rl: &RefTargetLink, now: EngineTime) -> SetDeltaValue {
    match rl.rebind.as_ref().filter(|d| d.time == now) {
        Some(d) => SetDeltaValue {
            added: d.added.clone(),
            removed: d.removed.clone(),
            cleared: false,
        },
        None => SetDeltaValue::default(),
    }
}

fn compute_delta_between(
    old: Option<&OutputHandle>,
    new: Option<&OutputHandle>,
    now: EngineTime,
    start_time: EngineTime,
) -> RebindDelta {
    let empty = || RebindDelta {
        time: now,
        ..RebindDelta::default()
    };
    match (old, new) {
        (None, None) => empty(),
        (Some(old), Some(new)) => old
            .read(now, |old_v| {
                new.read(now, |new_v| {
                    compute_rebind_delta(Some(old_v), Some(new_v), now, start_time, now)
                })
                .unwrap_or_else(|| compute_rebind_delta(Some(old_v), None, now, start_time, now))
            })
            .unwrap_or_else(|| {
                new.read(now, |new_v| compute_rebind_delta(None, Some(new_v), now, start_time, now))
                    .unwrap_or_else(empty)
            }),
        (Some(old), None) => old
            .read(now, |old_v| compute_rebind_delta(Some(old_v), None, now, start_time, now))
            .unwrap_or_else(empty),
        (None, Some(new)) => new
            .read(now, |new_v| compute_rebind_delta(None, Some(new_v), now, start_time, now))
            .unwrap_or_else(empty),
    }
}
