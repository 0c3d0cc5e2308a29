//! Switch node: exactly one sub-graph alive at a time, selected by a scalar
//! key input. A key change tears the old sub-graph down and builds the new
//! one within the same cycle.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tickflow_common::{MAX_DT, NodeError, ScalarValue};

use crate::builder::GraphBuilder;
use crate::clock::NestedClock;
use crate::graph::{Graph, NestedEvalCtx, NestedPhase};

struct ActiveSwitch {
    key: ScalarValue,
    graph: Graph,
    clock: Rc<RefCell<NestedClock>>,
}

pub struct SwitchNode {
    builders: FxHashMap<ScalarValue, Rc<GraphBuilder>>,
    default_builder: Option<Rc<GraphBuilder>>,
    key_arg: String,
    /// arg name -> node index inside the sub-graph (same layout per case).
    input_node_ids: FxHashMap<String, usize>,
    output_node_id: Option<usize>,
    active: Option<ActiveSwitch>,
    count: i64,
}

impl SwitchNode {
    pub fn new(
        builders: FxHashMap<ScalarValue, Rc<GraphBuilder>>,
        default_builder: Option<Rc<GraphBuilder>>,
        key_arg: impl Into<String>,
        input_node_ids: FxHashMap<String, usize>,
        output_node_id: Option<usize>,
    ) -> Self {
        SwitchNode {
            builders,
            default_builder,
            key_arg: key_arg.into(),
            input_node_ids,
            output_node_id,
            active: None,
            count: 0,
        }
    }

    pub fn active_key(&self) -> Option<&ScalarValue> {
        self.active.as_ref().map(|a| &a.key)
    }

    pub fn dispatch(&mut self, ctx: &mut NestedEvalCtx<'_>, phase: NestedPhase) -> Result<(), NodeError> {
        match phase {
            NestedPhase::Initialise | NestedPhase::Start => Ok(()),
            NestedPhase::Stop => self.teardown(),
            NestedPhase::Dispose => {
                if let Some(mut active) = self.active.take() {
                    active.graph.dispose();
                }
                Ok(())
            }
        }
    }

    pub fn eval(&mut self, ctx: &mut NestedEvalCtx<'_>) -> Result<(), NodeError> {
        let key_input = ctx
            .input_by_name(&self.key_arg)
            .unwrap_or_else(|| panic!("switch node is missing its key input '{}'", self.key_arg));
        if key_input.modified(ctx.now) || key_input.bound_at() == ctx.now {
            if let Some(new_key) = key_input.scalar() {
                let changed = self.active.as_ref().map(|a| &a.key) != Some(&new_key);
                if changed {
                    self.teardown_and_dispose()?;
                    self.build_for_key(new_key, ctx)?;
                }
            }
        }

        let Some(active) = &mut self.active else {
            return Ok(());
        };
        active.clock.borrow_mut().reset_next_scheduled_evaluation_time();
        let res = active.graph.evaluate_graph();
        let next = active.clock.borrow().next_time();
        active.clock.borrow_mut().reset_next_scheduled_evaluation_time();
        res?;
        if next != MAX_DT && next > ctx.now {
            ctx.schedule_self(next);
        }
        Ok(())
    }

    fn build_for_key(&mut self, key: ScalarValue, ctx: &mut NestedEvalCtx<'_>) -> Result<(), NodeError> {
        let builder = match self.builders.get(&key) {
            Some(b) => b.clone(),
            None => self
                .default_builder
                .clone()
                .ok_or_else(|| NodeError::message(format!("switch has no graph for key {key}")))?,
        };

        let mut graph_id: Vec<i64> = ctx.outer_state.borrow().graph_id.clone();
        graph_id.push(ctx.node_ndx as i64);
        graph_id.push(-self.count);
        self.count += 1;

        let label = format!("{}[{}]", ctx.signature.name, key);
        let mut graph = builder.make_instance(graph_id, &label, Some(ctx.traits));
        let clock = super::nested_clock(
            ctx.outer_state,
            super::schedule_hook(ctx.outer_state, ctx.node_ndx),
        );
        graph.set_evaluation_engine(ctx.engine.clone(), clock.clone());
        graph.initialise();

        for (arg, &inner_ndx) in &self.input_node_ids {
            if arg == &self.key_arg {
                graph
                    .node_mut(inner_ndx)
                    .scalars
                    .insert("key".to_string(), key.clone());
            } else if let Some(outer) = ctx.input_by_name(arg) {
                let now = ctx.now;
                graph.node_mut(inner_ndx).inputs[0].clone_binding_from(outer, now);
            }
            graph.schedule_node(inner_ndx, ctx.now);
        }
        if let Some(out_ndx) = self.output_node_id {
            let out = ctx
                .output
                .expect("switch node with an output stub requires an output")
                .clone();
            graph.node_mut(out_ndx).output = Some(out);
        }

        graph.start()?;
        self.active = Some(ActiveSwitch { key, graph, clock });
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), NodeError> {
        match &mut self.active {
            Some(active) if active.graph.is_started() => active.graph.stop(),
            _ => Ok(()),
        }
    }

    fn teardown_and_dispose(&mut self) -> Result<(), NodeError> {
        let Some(mut active) = self.active.take() else {
            return Ok(());
        };
        let res = if active.graph.is_started() {
            active.graph.stop()
        } else {
            Ok(())
        };
        active.graph.dispose();
        res
    }
}
