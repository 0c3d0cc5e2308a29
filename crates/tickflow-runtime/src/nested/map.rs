//! Keyed map node: one sub-graph per key of a TSS key-set input.
//!
//! Multiplexed TSD inputs feed each sub-graph its own per-key slice,
//! broadcast inputs are shared by all keys, and the optional key stub node
//! receives the key as a scalar. Sub-graph wake-ups are recorded per key in
//! a sorted map so the node evaluates exactly the due keys each cycle.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tickflow_common::{EngineTime, MAX_DT, MIN_DT, NodeError, ScalarValue};
use tickflow_types::{PathSeg, Value};

use crate::builder::GraphBuilder;
use crate::clock::NestedClock;
use crate::graph::{Graph, NestedEvalCtx, NestedPhase, RECORDABLE_ID_TRAIT, fq_recordable_id};

pub(crate) struct NestedGraph {
    pub graph: Graph,
    pub clock: Rc<RefCell<NestedClock>>,
}

/// Shared between the map node and its per-key nested clocks.
pub(crate) struct MapShared {
    pub scheduled: BTreeMap<ScalarValue, EngineTime>,
    pub last_evaluation_time: EngineTime,
    pub stopping: bool,
}

pub struct MapNode {
    builder: Rc<GraphBuilder>,
    /// arg name -> node index inside the sub-graph.
    input_node_ids: FxHashMap<String, usize>,
    output_node_id: Option<usize>,
    multiplexed_args: FxHashSet<String>,
    key_arg: Option<String>,
    /// Name of the TSS input carrying the key set.
    keys_arg: String,
    pub(crate) active_graphs: FxHashMap<ScalarValue, NestedGraph>,
    pub(crate) shared: Rc<RefCell<MapShared>>,
    count: i64,
    recordable_id: Option<String>,
}

impl MapNode {
    pub fn new(
        builder: Rc<GraphBuilder>,
        input_node_ids: FxHashMap<String, usize>,
        output_node_id: Option<usize>,
        multiplexed_args: FxHashSet<String>,
        key_arg: Option<String>,
        keys_arg: impl Into<String>,
    ) -> Self {
        MapNode {
            builder,
            input_node_ids,
            output_node_id,
            multiplexed_args,
            key_arg,
            keys_arg: keys_arg.into(),
            active_graphs: FxHashMap::default(),
            shared: Rc::new(RefCell::new(MapShared {
                scheduled: BTreeMap::new(),
                last_evaluation_time: MIN_DT,
                stopping: false,
            })),
            count: 0,
            recordable_id: None,
        }
    }

    pub fn active_keys(&self) -> Vec<ScalarValue> {
        let mut keys: Vec<ScalarValue> = self.active_graphs.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub(crate) fn has_key(&self, key: &ScalarValue) -> bool {
        self.active_graphs.contains_key(key)
    }

    pub(crate) fn active_graph_mut(&mut self, key: &ScalarValue) -> Option<&mut Graph> {
        self.active_graphs.get_mut(key).map(|ng| &mut ng.graph)
    }

    pub fn dispatch(&mut self, ctx: &mut NestedEvalCtx<'_>, phase: NestedPhase) -> Result<(), NodeError> {
        match phase {
            NestedPhase::Initialise => Ok(()),
            NestedPhase::Start => {
                if ctx.traits.get_trait(RECORDABLE_ID_TRAIT).is_some() {
                    let id = ctx.signature.record_replay_id.clone().unwrap_or_else(|| "map_".to_string());
                    self.recordable_id = Some(fq_recordable_id(ctx.traits, &id));
                }
                Ok(())
            }
            NestedPhase::Stop => self.do_stop(ctx),
            NestedPhase::Dispose => {
                self.active_graphs.clear();
                Ok(())
            }
        }
    }

    fn do_stop(&mut self, ctx: &mut NestedEvalCtx<'_>) -> Result<(), NodeError> {
        self.shared.borrow_mut().stopping = true;
        let keys: Vec<ScalarValue> = self.active_graphs.keys().cloned().collect();
        let mut first_err = None;
        for key in keys {
            if let Err(e) = self.remove_graph(&key, ctx) {
                first_err.get_or_insert(e);
            }
        }
        let mut shared = self.shared.borrow_mut();
        shared.scheduled.clear();
        shared.stopping = false;
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn eval(&mut self, ctx: &mut NestedEvalCtx<'_>) -> Result<(), NodeError> {
        self.shared.borrow_mut().last_evaluation_time = ctx.now;

        self.process_key_set(ctx)?;
        self.run_scheduled(ctx)
    }

    pub(crate) fn process_key_set(&mut self, ctx: &mut NestedEvalCtx<'_>) -> Result<(), NodeError> {
        let keys = ctx
            .input_by_name(&self.keys_arg)
            .unwrap_or_else(|| panic!("map node is missing its key-set input '{}'", self.keys_arg));
        if !keys.modified(ctx.now) && keys.bound_at() != ctx.now {
            return Ok(());
        }
        let delta = keys.set_delta(ctx.now);
        for key in &delta.added {
            // A set can occasionally replay an element as added (first-bind
            // sampling); never build a duplicate graph for it.
            if !self.active_graphs.contains_key(key) {
                self.create_new_graph(key.clone(), ctx)?;
            }
        }
        for key in &delta.removed {
            if self.active_graphs.contains_key(key) {
                self.remove_graph(key, ctx)?;
                self.shared.borrow_mut().scheduled.remove(key);
            } else {
                return Err(NodeError::message(format!(
                    "[{}] key {key} does not exist in active graphs",
                    ctx.signature.wiring_path_name
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn run_scheduled(&mut self, ctx: &mut NestedEvalCtx<'_>) -> Result<(), NodeError> {
        let scheduled = std::mem::take(&mut self.shared.borrow_mut().scheduled);
        for (key, dt) in scheduled {
            if dt < ctx.now {
                return Err(NodeError::message(format!(
                    "scheduled time is in the past; evaluation time: {}, scheduled time: {dt}",
                    ctx.now
                )));
            }
            let next = if dt == ctx.now {
                self.evaluate_key_graph(&key, ctx)?
            } else {
                dt
            };
            if next != MAX_DT && next > ctx.now {
                self.shared.borrow_mut().scheduled.insert(key, next);
                ctx.schedule_self(next);
            }
        }
        Ok(())
    }

    pub(crate) fn create_new_graph(
        &mut self,
        key: ScalarValue,
        ctx: &mut NestedEvalCtx<'_>,
    ) -> Result<(), NodeError> {
        let key_str = key.to_string();
        let mut child_id: Vec<i64> = ctx.outer_state.borrow().graph_id.clone();
        child_id.push(ctx.node_ndx as i64);
        child_id.push(-self.count);
        self.count += 1;

        let label = format!("{}[{}]", ctx.signature.name, key_str);
        let mut graph = self.builder.make_instance(child_id, &label, Some(ctx.traits));

        let clock = self.make_key_clock(&key, ctx);
        graph.set_evaluation_engine(ctx.engine.clone(), clock.clone());
        graph.initialise();

        if let Some(rid) = &self.recordable_id {
            graph
                .traits
                .set_trait(RECORDABLE_ID_TRAIT, ScalarValue::from(format!("{rid}[{key_str}]")));
        }

        self.wire_graph(&key, &mut graph, ctx);
        graph.start()?;

        self.active_graphs.insert(key.clone(), NestedGraph { graph, clock });
        self.shared.borrow_mut().scheduled.insert(key, ctx.now);
        Ok(())
    }

    fn make_key_clock(&self, key: &ScalarValue, ctx: &NestedEvalCtx<'_>) -> Rc<RefCell<NestedClock>> {
        let shared = self.shared.clone();
        let key = key.clone();
        let outer = Rc::downgrade(ctx.outer_state);
        let node_ndx = ctx.node_ndx;
        super::nested_clock(
            ctx.outer_state,
            Box::new(move |et| {
                {
                    let mut sh = shared.borrow_mut();
                    let let_ = sh.last_evaluation_time;
                    if (let_ != MIN_DT && let_ >= et) || sh.stopping {
                        return;
                    }
                    let entry = sh.scheduled.entry(key.clone()).or_insert(MAX_DT);
                    if *entry > et {
                        *entry = et;
                    }
                }
                if let Some(state) = outer.upgrade() {
                    state.borrow_mut().schedule_node(node_ndx, et, false);
                }
            }),
        )
    }

    fn wire_graph(&mut self, key: &ScalarValue, graph: &mut Graph, ctx: &mut NestedEvalCtx<'_>) {
        for (arg, &inner_ndx) in &self.input_node_ids {
            if self.key_arg.as_deref() == Some(arg.as_str()) {
                graph
                    .node_mut(inner_ndx)
                    .scalars
                    .insert("key".to_string(), key.clone());
                graph.schedule_node(inner_ndx, ctx.now);
            } else if self.multiplexed_args.contains(arg) {
                let outer = ctx
                    .input_by_name(arg)
                    .unwrap_or_else(|| panic!("map node is missing multiplexed input '{arg}'"));
                let tsd = outer
                    .bound_target()
                    .unwrap_or_else(|| panic!("multiplexed input '{arg}' is not bound"));
                graph.bind_input(inner_ndx, 0, tsd.child(PathSeg::Key(key.clone())), ctx.now);
                graph.schedule_node(inner_ndx, ctx.now);
            } else {
                let outer = ctx
                    .input_by_name(arg)
                    .unwrap_or_else(|| panic!("map node is missing broadcast input '{arg}'"));
                let now = ctx.now;
                let node = graph.node_mut(inner_ndx);
                node.inputs[0].clone_binding_from(outer, now);
                graph.schedule_node(inner_ndx, ctx.now);
            }
        }

        if let Some(out_ndx) = self.output_node_id {
            let map_out = ctx.output.expect("map node with an output stub requires an output");
            let child = map_out.dict_create(key, ctx.engine);
            graph.node_mut(out_ndx).output = Some(child);
        }
    }

    pub(crate) fn remove_graph(
        &mut self,
        key: &ScalarValue,
        ctx: &mut NestedEvalCtx<'_>,
    ) -> Result<(), NodeError> {
        if ctx.signature.capture_exception {
            if let Some(err_out) = ctx.error_output {
                err_out.dict_remove(key, ctx.engine);
            }
        }
        let Some(mut ng) = self.active_graphs.remove(key) else {
            return Ok(());
        };
        self.un_wire_graph(key, &mut ng.graph, ctx);
        let res = ng.graph.stop();
        ng.graph.dispose();
        res
    }

    fn un_wire_graph(&mut self, key: &ScalarValue, graph: &mut Graph, ctx: &mut NestedEvalCtx<'_>) {
        for (arg, &inner_ndx) in &self.input_node_ids {
            if self.key_arg.as_deref() == Some(arg.as_str()) {
                continue;
            }
            // Passive first: detaching a subscribed input would leave a
            // dangling subscription on the upstream output.
            let node = graph.node_mut(inner_ndx);
            node.inputs[0].make_passive();
            node.inputs[0].unbind();
        }
        if self.output_node_id.is_some() {
            if let Some(map_out) = ctx.output {
                map_out.dict_remove(key, ctx.engine);
            }
        }
    }

    pub(crate) fn evaluate_key_graph(
        &mut self,
        key: &ScalarValue,
        ctx: &mut NestedEvalCtx<'_>,
    ) -> Result<EngineTime, NodeError> {
        let Some(ng) = self.active_graphs.get_mut(key) else {
            return Ok(MAX_DT);
        };
        ng.clock.borrow_mut().reset_next_scheduled_evaluation_time();
        let res = ng.graph.evaluate_graph();
        let next = ng.clock.borrow().next_time();
        ng.clock.borrow_mut().reset_next_scheduled_evaluation_time();
        match res {
            Ok(()) => Ok(next),
            Err(e) => {
                if ctx.signature.capture_exception {
                    let err_out = ctx
                        .error_output
                        .expect("capture_exception map carries an error output");
                    let enriched = e.with_context(format!("key: {key}"));
                    err_out.dict_set(
                        key,
                        &Value::Scalar(ScalarValue::from(enriched)),
                        ctx.engine,
                    );
                    Ok(next)
                } else {
                    Err(e)
                }
            }
        }
    }
}
