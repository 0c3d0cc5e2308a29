//! The graph: node list, schedule vector, push receiver, and the per-cycle
//! evaluation loop.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tickflow_common::{EngineTime, MIN_DT, NodeError, ScalarValue};
use tickflow_types::{OutputHandle, TsInput};

use crate::builder::GraphBuilder;
use crate::clock::{ClockRef, SMALLEST_TICK};
use crate::engine::{EngineHandle, GraphInfo, NodeInfo};
use crate::lifecycle::LifecycleState;
use crate::node::{Node, NodeBody, NodeCtx, NodeSignature};
use crate::push::{PushMessage, PushSender, SenderReceiverState};
use crate::trace;

/// Trait key carrying the fully-qualified recordable id down the graph
/// chain.
pub const RECORDABLE_ID_TRAIT: &str = "recordable_id";

/// String-keyed scalar bag attached to a graph, chained to the parent
/// graph's bag.
#[derive(Clone, Default)]
pub struct Traits {
    values: FxHashMap<String, ScalarValue>,
    parent: Option<Rc<Traits>>,
}

impl Traits {
    pub fn child_of(parent: &Traits) -> Traits {
        Traits {
            values: FxHashMap::default(),
            parent: Some(Rc::new(parent.clone())),
        }
    }

    pub fn set_trait(&mut self, name: impl Into<String>, value: ScalarValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get_trait(&self, name: &str) -> Option<ScalarValue> {
        match self.values.get(name) {
            Some(v) => Some(v.clone()),
            None => self.parent.as_ref().and_then(|p| p.get_trait(name)),
        }
    }

    pub fn get_trait_or(&self, name: &str, default: ScalarValue) -> ScalarValue {
        self.get_trait(name).unwrap_or(default)
    }
}

/// Compose a fully-qualified recordable id under the graph's chain.
pub fn fq_recordable_id(traits: &Traits, id: &str) -> String {
    match traits.get_trait(RECORDABLE_ID_TRAIT) {
        Some(outer) => format!("{outer}.{id}"),
        None => id.to_string(),
    }
}

/// The shared scheduling state of a graph: the schedule vector plus the
/// clock hook. Shared behind `Rc<RefCell<…>>` so node sinks and nested
/// clocks can schedule without borrowing the graph itself.
pub struct GraphState {
    pub graph_id: Vec<i64>,
    pub label: String,
    schedule: Vec<EngineTime>,
    clock: Option<ClockRef>,
    /// Index currently being evaluated; same-time wakes for nodes at or
    /// before it escalate to the next engine instant.
    eval_cursor: Option<usize>,
}

impl GraphState {
    pub fn clock(&self) -> Option<ClockRef> {
        self.clock.clone()
    }

    pub fn evaluation_time(&self) -> Option<EngineTime> {
        self.clock.as_ref().map(|c| c.borrow().evaluation_time())
    }

    pub fn schedule_at(&self, ndx: usize) -> EngineTime {
        self.schedule[ndx]
    }

    /// Install a wake-up for `ndx`. Scheduling in the past is fatal; a
    /// same-time wake for a node index already passed this cycle escalates
    /// to the next engine instant.
    pub fn schedule_node(&mut self, ndx: usize, when: EngineTime, force_set: bool) {
        let Some(clock) = self.clock.clone() else {
            // Not yet attached to an engine: record the wake directly.
            let st = &mut self.schedule[ndx];
            if *st == MIN_DT || *st > when {
                *st = when;
            }
            return;
        };
        let et = clock.borrow().evaluation_time();
        if when < et {
            panic!(
                "Graph[{}] trying to schedule node {} for {} but current time is {}",
                self.label, ndx, when, et
            );
        }
        let mut when = when;
        if when == et && self.eval_cursor.is_some_and(|cursor| ndx <= cursor) {
            when = et + SMALLEST_TICK;
        }
        let st = self.schedule[ndx];
        if force_set || st <= et || st > when {
            self.schedule[ndx] = when;
        }
        if when > et {
            clock.borrow_mut().update_next_scheduled_evaluation_time(when);
        }
    }
}

/// Context handed to nested node bodies: everything a nested node needs
/// from its owning node and graph, with the borrows already split.
pub struct NestedEvalCtx<'a> {
    pub engine: &'a EngineHandle,
    pub outer_state: &'a Rc<RefCell<GraphState>>,
    pub traits: &'a Traits,
    pub node_ndx: usize,
    pub now: EngineTime,
    pub start_time: EngineTime,
    pub signature: &'a NodeSignature,
    pub scalars: &'a FxHashMap<String, ScalarValue>,
    pub inputs: &'a mut [TsInput],
    pub output: Option<&'a OutputHandle>,
    pub error_output: Option<&'a OutputHandle>,
    pub last_evaluation_time: EngineTime,
}

impl<'a> NestedEvalCtx<'a> {
    pub fn input_by_name(&self, name: &str) -> Option<&TsInput> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn input_by_name_mut(&mut self, name: &str) -> Option<&mut TsInput> {
        self.inputs.iter_mut().find(|i| i.name == name)
    }

    /// Re-schedule the owning nested node.
    pub fn schedule_self(&self, at: EngineTime) {
        self.outer_state.borrow_mut().schedule_node(self.node_ndx, at, false);
    }
}

pub struct Graph {
    graph_id: Vec<i64>,
    label: String,
    nodes: Vec<Node>,
    pub state: Rc<RefCell<GraphState>>,
    push_source_nodes_end: usize,
    receiver: Arc<SenderReceiverState>,
    pub traits: Traits,
    engine: Option<EngineHandle>,
    last_evaluation_time: EngineTime,
    lifecycle: LifecycleState,
}

impl Graph {
    pub fn new(
        graph_id: Vec<i64>,
        mut nodes: Vec<Node>,
        label: impl Into<String>,
        parent_traits: Option<&Traits>,
    ) -> Self {
        let label = label.into();
        let push_source_nodes_end = nodes
            .iter()
            .position(|n| !n.is_push_source())
            .unwrap_or(nodes.len());
        assert!(
            nodes[push_source_nodes_end..].iter().all(|n| !n.is_push_source()),
            "push-source nodes must form a prefix of the node list"
        );
        let state = Rc::new(RefCell::new(GraphState {
            graph_id: graph_id.clone(),
            label: label.clone(),
            schedule: vec![MIN_DT; nodes.len()],
            clock: None,
            eval_cursor: None,
        }));
        for (i, node) in nodes.iter_mut().enumerate() {
            node.set_graph(&state, i, graph_id.clone());
        }
        let traits = parent_traits.map(Traits::child_of).unwrap_or_default();
        Graph {
            graph_id,
            label,
            nodes,
            state,
            push_source_nodes_end,
            receiver: SenderReceiverState::new(),
            traits,
            engine: None,
            last_evaluation_time: MIN_DT,
            lifecycle: LifecycleState::Created,
        }
    }

    pub fn graph_id(&self) -> &[i64] {
        &self.graph_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, ndx: usize) -> &Node {
        &self.nodes[ndx]
    }

    pub fn node_mut(&mut self, ndx: usize) -> &mut Node {
        &mut self.nodes[ndx]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn push_source_nodes_end(&self) -> usize {
        self.push_source_nodes_end
    }

    pub fn last_evaluation_time(&self) -> EngineTime {
        self.last_evaluation_time
    }

    pub fn is_started(&self) -> bool {
        self.lifecycle.is_started()
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn receiver(&self) -> Arc<SenderReceiverState> {
        self.receiver.clone()
    }

    pub fn sender(&self) -> PushSender {
        PushSender::new(self.receiver.clone())
    }

    pub fn engine(&self) -> Option<EngineHandle> {
        self.engine.clone()
    }

    /// Attach the engine and this graph's clock. Setting twice is fatal.
    pub fn set_evaluation_engine(&mut self, engine: EngineHandle, clock: ClockRef) {
        assert!(
            self.engine.is_none(),
            "duplicate attempt to set evaluation engine on graph [{}]",
            self.label
        );
        if self.push_source_nodes_end > 0 {
            if let Some(rt) = engine.rt_shared() {
                self.receiver.connect_clock(rt);
            }
        }
        self.state.borrow_mut().clock = Some(clock);
        self.engine = Some(engine);
    }

    pub fn clear_evaluation_engine(&mut self) {
        self.engine = None;
        self.state.borrow_mut().clock = None;
    }

    pub fn schedule_node(&self, ndx: usize, when: EngineTime) {
        self.state.borrow_mut().schedule_node(ndx, when, false);
    }

    pub fn schedule_node_force(&self, ndx: usize, when: EngineTime) {
        self.state.borrow_mut().schedule_node(ndx, when, true);
    }

    /// Bind a node input to an output endpoint at runtime.
    pub fn bind_input(&mut self, node: usize, input: usize, target: OutputHandle, now: EngineTime) {
        self.nodes[node].inputs[input].bind_output(target, now);
    }

    // ---- life-cycle ------------------------------------------------------

    pub fn initialise(&mut self) {
        self.lifecycle = self.lifecycle.transition(LifecycleState::Initialised, "graph");
        for i in 0..self.nodes.len() {
            // Nodes appended by a pre-run extend_graph are already
            // initialised.
            if self.nodes[i].lifecycle() == LifecycleState::Created {
                self.initialise_node(i);
            }
        }
    }

    pub fn start(&mut self) -> Result<(), NodeError> {
        self.lifecycle = self.lifecycle.transition(LifecycleState::Started, "graph");
        let engine = self.engine.clone().expect("engine set before start");
        let graph_id = self.graph_id.clone();
        let label = self.label.clone();
        engine.notify_before_start_graph(&GraphInfo {
            graph_id: &graph_id,
            label: &label,
        });
        for i in 0..self.nodes.len() {
            self.start_node(i)?;
        }
        engine.notify_after_start_graph(&GraphInfo {
            graph_id: &graph_id,
            label: &label,
        });
        Ok(())
    }

    /// Stop every node, continuing past failures; the first failure is
    /// re-raised once all stop calls have completed.
    pub fn stop(&mut self) -> Result<(), NodeError> {
        self.lifecycle = self.lifecycle.transition(LifecycleState::Stopped, "graph");
        let engine = self.engine.clone().expect("engine set before stop");
        let graph_id = self.graph_id.clone();
        let label = self.label.clone();
        engine.notify_before_stop_graph(&GraphInfo {
            graph_id: &graph_id,
            label: &label,
        });
        let mut first_err: Option<NodeError> = None;
        for i in 0..self.nodes.len() {
            if let Err(e) = self.stop_node(i) {
                tracing::warn!(node = i, error = %e, "node failed to stop; continuing");
                first_err.get_or_insert(e);
            }
        }
        engine.notify_after_stop_graph(&GraphInfo {
            graph_id: &graph_id,
            label: &label,
        });
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Dispose never fails; internal failures are logged.
    pub fn dispose(&mut self) {
        self.lifecycle = self.lifecycle.transition(LifecycleState::Disposed, "graph");
        for i in 0..self.nodes.len() {
            self.dispose_node(i);
        }
    }

    fn initialise_node(&mut self, i: usize) {
        let support = self.support();
        {
            let node = &mut self.nodes[i];
            node.lifecycle =
                node.lifecycle.transition(LifecycleState::Initialised, &node.signature.name);
        }
        if let Err(e) = self.dispatch_nested(i, &support, NestedPhase::Initialise) {
            panic!("node {i} failed to initialise: {e}");
        }
    }

    fn start_node(&mut self, i: usize) -> Result<(), NodeError> {
        let engine = self.engine.clone().expect("engine set before start");
        let sig = self.nodes[i].signature.clone();
        let graph_id = self.graph_id.clone();
        let info = NodeInfo {
            signature: &sig,
            node_ndx: i,
            graph_id: &graph_id,
        };
        engine.notify_before_start_node(&info);
        let res = self.start_node_inner(i);
        engine.notify_after_start_node(&info);
        res.map_err(|e| {
            let now = self.current_time();
            trace::capture_error(e, &self.nodes, i, "During node start", now, engine.start_time())
        })
    }

    fn start_node_inner(&mut self, i: usize) -> Result<(), NodeError> {
        let now = self.current_time();
        let support = self.support();
        {
            let node = &mut self.nodes[i];
            node.lifecycle = node.lifecycle.transition(LifecycleState::Started, &node.signature.name);
            for input in &mut node.inputs {
                input.make_active();
            }
        }
        self.dispatch_nested(i, &support, NestedPhase::Start)?;
        let node = &self.nodes[i];
        if node.schedule_on_start {
            self.state.borrow_mut().schedule_node(i, now, false);
        }
        Ok(())
    }

    fn stop_node(&mut self, i: usize) -> Result<(), NodeError> {
        let engine = self.engine.clone().expect("engine set before stop");
        let sig = self.nodes[i].signature.clone();
        let graph_id = self.graph_id.clone();
        let info = NodeInfo {
            signature: &sig,
            node_ndx: i,
            graph_id: &graph_id,
        };
        engine.notify_before_stop_node(&info);
        let support = self.support();
        {
            let node = &mut self.nodes[i];
            node.lifecycle = node.lifecycle.transition(LifecycleState::Stopped, &node.signature.name);
        }
        let res = self.dispatch_nested(i, &support, NestedPhase::Stop);
        {
            let node = &mut self.nodes[i];
            for input in &mut node.inputs {
                input.make_passive();
            }
        }
        engine.notify_after_stop_node(&info);
        res
    }

    fn dispose_node(&mut self, i: usize) {
        let support = self.support();
        {
            let node = &mut self.nodes[i];
            if node.lifecycle == LifecycleState::Disposed {
                return;
            }
            node.lifecycle = node.lifecycle.transition(LifecycleState::Disposed, &node.signature.name);
        }
        if let Err(e) = self.dispatch_nested(i, &support, NestedPhase::Dispose) {
            tracing::warn!(node = i, error = %e, "dispose failure ignored");
        }
    }

    fn support(&self) -> NestedSupport {
        NestedSupport {
            engine: self.engine.clone(),
            state: self.state.clone(),
            traits: self.traits.clone(),
        }
    }

    fn current_time(&self) -> EngineTime {
        self.state.borrow().evaluation_time().unwrap_or(MIN_DT)
    }

    fn dispatch_nested(
        &mut self,
        i: usize,
        support: &NestedSupport,
        phase: NestedPhase,
    ) -> Result<(), NodeError> {
        if !self.nodes[i].body.is_nested() {
            return Ok(());
        }
        let engine = support.engine.clone().expect("engine set for nested dispatch");
        let now = self.current_time();
        let start_time = engine.start_time();
        let node = &mut self.nodes[i];
        let signature = node.signature.clone();
        let last_evaluation_time = node.last_evaluation_time;
        let mut ctx = NestedEvalCtx {
            engine: &engine,
            outer_state: &support.state,
            traits: &support.traits,
            node_ndx: i,
            now,
            start_time,
            signature: &signature,
            scalars: &node.scalars,
            inputs: &mut node.inputs,
            output: node.output.as_ref(),
            error_output: node.error_output.as_ref(),
            last_evaluation_time,
        };
        match &mut node.body {
            NodeBody::Map(m) => m.dispatch(&mut ctx, phase),
            NodeBody::Reduce(r) => r.dispatch(&mut ctx, phase),
            NodeBody::Switch(s) => s.dispatch(&mut ctx, phase),
            NodeBody::Component(c) => c.dispatch(&mut ctx, phase),
            NodeBody::TryExcept(t) => t.dispatch(&mut ctx, phase),
            NodeBody::Mesh(m) => m.dispatch(&mut ctx, phase),
            NodeBody::Eval(_) | NodeBody::PushSource => Ok(()),
        }
    }

    // ---- evaluation ------------------------------------------------------

    pub fn evaluate_graph(&mut self) -> Result<(), NodeError> {
        let engine = self.engine.clone().expect("engine set before evaluation");
        let clock = self
            .state
            .borrow()
            .clock()
            .expect("clock set before evaluation");
        let now = clock.borrow().evaluation_time();
        let start_time = engine.start_time();
        self.last_evaluation_time = now;

        let graph_id = self.graph_id.clone();
        let label = self.label.clone();
        engine.notify_before_graph_evaluation(&GraphInfo {
            graph_id: &graph_id,
            label: &label,
        });

        if self.push_source_nodes_end > 0
            && (clock.borrow().push_node_requires_scheduling() || self.receiver.has_pending())
        {
            clock.borrow_mut().reset_push_node_requires_scheduling();
            self.receiver.take_dirty();
            let receiver = self.receiver.clone();
            while let Some(msg) = receiver.dequeue() {
                let ndx = msg.node_ndx;
                assert!(
                    ndx < self.push_source_nodes_end,
                    "push message addressed to non-push node {ndx}"
                );
                let sig = self.nodes[ndx].signature.clone();
                let info = NodeInfo {
                    signature: &sig,
                    node_ndx: ndx,
                    graph_id: &graph_id,
                };
                engine.notify_before_node_evaluation(&info);
                let applied = self.apply_push_message(ndx, &msg, now, &engine);
                engine.notify_after_node_evaluation(&info);
                if !applied {
                    receiver.enqueue_front(msg);
                    clock.borrow_mut().mark_push_node_requires_scheduling();
                    break;
                }
            }
            engine.notify_after_graph_push_nodes_evaluation(&GraphInfo {
                graph_id: &graph_id,
                label: &label,
            });
        }

        for i in self.push_source_nodes_end..self.nodes.len() {
            let st = self.state.borrow().schedule_at(i);
            if st == now {
                self.state.borrow_mut().eval_cursor = Some(i);
                let sig = self.nodes[i].signature.clone();
                let info = NodeInfo {
                    signature: &sig,
                    node_ndx: i,
                    graph_id: &graph_id,
                };
                engine.notify_before_node_evaluation(&info);
                let res = self.eval_node(i, now);
                engine.notify_after_node_evaluation(&info);
                if let Err(e) = res {
                    // Keyed error outputs (map, mesh) are written per key by
                    // the nested node itself; only scalar error outputs are
                    // materialised here.
                    let scalar_error_out = self.nodes[i]
                        .error_output
                        .clone()
                        .filter(|out| out.meta().kind == tickflow_types::TsKind::Ts);
                    if sig.capture_exception && scalar_error_out.is_some() {
                        let enriched =
                            trace::capture_error(e, &self.nodes, i, "During evaluation", now, start_time);
                        let out = scalar_error_out.expect("checked above");
                        out.set_scalar(ScalarValue::from(enriched), &engine);
                    } else {
                        self.state.borrow_mut().eval_cursor = None;
                        return Err(trace::capture_error(
                            e,
                            &self.nodes,
                            i,
                            "During evaluation",
                            now,
                            start_time,
                        ));
                    }
                }
            } else if st > now && st != tickflow_common::MAX_DT {
                clock.borrow_mut().update_next_scheduled_evaluation_time(st);
            }
        }
        self.state.borrow_mut().eval_cursor = None;

        engine.notify_after_graph_evaluation(&GraphInfo {
            graph_id: &graph_id,
            label: &label,
        });
        Ok(())
    }

    /// Apply one push message. Returns false for backpressure: a push node
    /// absorbs at most one message per cycle.
    fn apply_push_message(
        &mut self,
        ndx: usize,
        msg: &PushMessage,
        now: EngineTime,
        engine: &EngineHandle,
    ) -> bool {
        let node = &mut self.nodes[ndx];
        let output = node
            .output
            .clone()
            .unwrap_or_else(|| panic!("push node {} has no output", node.signature.name));
        if output.modified(now) {
            return false;
        }
        node.mark_evaluated(now);
        output.apply(&msg.payload.to_value(), engine);
        true
    }

    fn eval_node(&mut self, i: usize, now: EngineTime) -> Result<(), NodeError> {
        let engine = self.engine.clone().expect("engine set before evaluation");
        let state = self.state.clone();
        let traits = self.traits.clone();
        let start_time = engine.start_time();
        let node = &mut self.nodes[i];
        let last_evaluation_time = node.last_evaluation_time;
        node.mark_evaluated(now);
        for input in &mut node.inputs {
            input.refresh(now, start_time);
        }
        let signature = node.signature.clone();
        match &mut node.body {
            NodeBody::Eval(f) => {
                let mut ctx = NodeCtx {
                    evaluation_time: now,
                    start_time,
                    node_ndx: i,
                    inputs: &node.inputs,
                    output: node.output.as_ref(),
                    error_output: node.error_output.as_ref(),
                    scalars: &node.scalars,
                    engine: &engine,
                    state: &state,
                };
                f(&mut ctx)
            }
            NodeBody::PushSource => Ok(()),
            body => {
                let mut ctx = NestedEvalCtx {
                    engine: &engine,
                    outer_state: &state,
                    traits: &traits,
                    node_ndx: i,
                    now,
                    start_time,
                    signature: &signature,
                    scalars: &node.scalars,
                    inputs: &mut node.inputs,
                    output: node.output.as_ref(),
                    error_output: node.error_output.as_ref(),
                    last_evaluation_time,
                };
                match body {
                    NodeBody::Map(m) => m.eval(&mut ctx),
                    NodeBody::Reduce(r) => r.eval(&mut ctx),
                    NodeBody::Switch(s) => s.eval(&mut ctx),
                    NodeBody::Component(c) => c.eval(&mut ctx),
                    NodeBody::TryExcept(t) => t.eval(&mut ctx),
                    NodeBody::Mesh(m) => m.eval(&mut ctx),
                    NodeBody::Eval(_) | NodeBody::PushSource => unreachable!(),
                }
            }
        }
    }

    // ---- dynamic extension ----------------------------------------------

    /// Append the builder's nodes to this graph, connect their edges, and
    /// initialise them; start them when the graph is running and
    /// `delay_start` is false.
    pub fn extend_graph(&mut self, builder: &GraphBuilder, delay_start: bool) -> Result<(), NodeError> {
        let first = self.nodes.len();
        let mut new_nodes = builder.build_nodes(&self.graph_id, &self.label, first);
        assert!(
            new_nodes.iter().all(|n| !n.is_push_source()),
            "cannot extend a graph with push-source nodes"
        );
        {
            let mut state = self.state.borrow_mut();
            for _ in 0..new_nodes.len() {
                state.schedule.push(MIN_DT);
            }
        }
        for (offset, node) in new_nodes.iter_mut().enumerate() {
            node.set_graph(&self.state, first + offset, self.graph_id.clone());
        }
        self.nodes.append(&mut new_nodes);
        builder.connect_edges(self, first, self.current_time());
        let end = self.nodes.len();
        for i in first..end {
            self.initialise_node(i);
        }
        if !delay_start && self.is_started() {
            self.start_subgraph(first, end)?;
        }
        Ok(())
    }

    /// Stop and dispose nodes `[start_node, end)` and shrink the graph.
    pub fn reduce_graph(&mut self, start_node: usize) -> Result<(), NodeError> {
        let end = self.nodes.len();
        let res = if self.is_started() {
            self.stop_subgraph(start_node, end)
        } else {
            Ok(())
        };
        self.dispose_subgraph(start_node, end);
        self.nodes.truncate(start_node);
        self.state.borrow_mut().schedule.truncate(start_node);
        res
    }

    pub fn start_subgraph(&mut self, start: usize, end: usize) -> Result<(), NodeError> {
        for i in start..end {
            if self.nodes[i].lifecycle != LifecycleState::Started {
                self.start_node(i)?;
            }
        }
        Ok(())
    }

    pub fn stop_subgraph(&mut self, start: usize, end: usize) -> Result<(), NodeError> {
        let mut first_err = None;
        for i in start..end {
            if self.nodes[i].lifecycle == LifecycleState::Started {
                if let Err(e) = self.stop_node(i) {
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn dispose_subgraph(&mut self, start: usize, end: usize) {
        for i in start..end {
            self.dispose_node(i);
        }
    }
}

/// Bundled clones a node dispatch needs from the graph.
pub struct NestedSupport {
    pub engine: Option<EngineHandle>,
    pub state: Rc<RefCell<GraphState>>,
    pub traits: Traits,
}

/// Life-cycle phases dispatched into nested node bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestedPhase {
    Initialise,
    Start,
    Stop,
    Dispose,
}
