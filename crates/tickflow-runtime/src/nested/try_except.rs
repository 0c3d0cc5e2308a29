//! Try/except node: wraps one sub-graph; child failures land on the error
//! output instead of propagating to the outer graph.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tickflow_common::{MAX_DT, NodeError, ScalarValue};

use crate::builder::GraphBuilder;
use crate::clock::NestedClock;
use crate::graph::{Graph, NestedEvalCtx, NestedPhase};

pub struct TryExceptNode {
    builder: Rc<GraphBuilder>,
    input_node_ids: FxHashMap<String, usize>,
    output_node_id: Option<usize>,
    graph: Option<Graph>,
    clock: Option<Rc<RefCell<NestedClock>>>,
}

impl TryExceptNode {
    pub fn new(
        builder: Rc<GraphBuilder>,
        input_node_ids: FxHashMap<String, usize>,
        output_node_id: Option<usize>,
    ) -> Self {
        TryExceptNode {
            builder,
            input_node_ids,
            output_node_id,
            graph: None,
            clock: None,
        }
    }

    pub fn dispatch(&mut self, ctx: &mut NestedEvalCtx<'_>, phase: NestedPhase) -> Result<(), NodeError> {
        match phase {
            NestedPhase::Initialise => {
                let mut graph_id: Vec<i64> = ctx.outer_state.borrow().graph_id.clone();
                graph_id.push(ctx.node_ndx as i64);
                let label = format!("{}.try", ctx.signature.name);
                let mut graph = self.builder.make_instance(graph_id, &label, Some(ctx.traits));
                let clock = super::nested_clock(
                    ctx.outer_state,
                    super::schedule_hook(ctx.outer_state, ctx.node_ndx),
                );
                graph.set_evaluation_engine(ctx.engine.clone(), clock.clone());
                graph.initialise();
                self.graph = Some(graph);
                self.clock = Some(clock);
                Ok(())
            }
            NestedPhase::Start => {
                let graph = self.graph.as_mut().expect("initialised before start");
                for (arg, &inner_ndx) in &self.input_node_ids {
                    if let Some(outer) = ctx.input_by_name(arg) {
                        let now = ctx.now;
                        graph.node_mut(inner_ndx).inputs[0].clone_binding_from(outer, now);
                        graph.schedule_node(inner_ndx, ctx.now);
                    }
                }
                if let Some(out_ndx) = self.output_node_id {
                    let out = ctx
                        .output
                        .expect("try_except with an output stub requires an output")
                        .clone();
                    graph.node_mut(out_ndx).output = Some(out);
                }
                graph.start()
            }
            NestedPhase::Stop => match &mut self.graph {
                Some(graph) if graph.is_started() => graph.stop(),
                _ => Ok(()),
            },
            NestedPhase::Dispose => {
                if let Some(mut graph) = self.graph.take() {
                    graph.dispose();
                }
                self.clock = None;
                Ok(())
            }
        }
    }

    pub fn eval(&mut self, ctx: &mut NestedEvalCtx<'_>) -> Result<(), NodeError> {
        let (Some(graph), Some(clock)) = (&mut self.graph, &self.clock) else {
            return Ok(());
        };
        clock.borrow_mut().reset_next_scheduled_evaluation_time();
        let res = graph.evaluate_graph();
        let next = clock.borrow().next_time();
        clock.borrow_mut().reset_next_scheduled_evaluation_time();
        if let Err(e) = res {
            // Handled: the failure becomes a tick on the error output and
            // the outer graph never sees it.
            let err_out = ctx
                .error_output
                .expect("try_except node carries an error output");
            err_out.set_scalar(ScalarValue::from(e), ctx.engine);
        }
        if next != MAX_DT && next > ctx.now {
            ctx.schedule_self(next);
        }
        Ok(())
    }
}
