//! Component node: a single sub-graph with a user-visible recordable id.
//!
//! The id template (`"pnl_{book}"`) resolves against scalar args first and
//! valid time-series args second; wiring is deferred until every referenced
//! time series is valid. The resolved id registers in the process-wide
//! state so a second instance with the same id is rejected, and inputs pass
//! straight through to the upstream bindings so the wrapper adds no
//! latency.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tickflow_common::{MAX_DT, NodeError, ScalarValue};

use crate::builder::GraphBuilder;
use crate::clock::NestedClock;
use crate::global_state;
use crate::graph::{Graph, NestedEvalCtx, NestedPhase, RECORDABLE_ID_TRAIT, fq_recordable_id};

pub struct ComponentNode {
    builder: Rc<GraphBuilder>,
    input_node_ids: FxHashMap<String, usize>,
    output_node_id: Option<usize>,
    id_template: String,
    graph: Option<Graph>,
    clock: Option<Rc<RefCell<NestedClock>>>,
    resolved_id: Option<String>,
}

impl ComponentNode {
    pub fn new(
        builder: Rc<GraphBuilder>,
        input_node_ids: FxHashMap<String, usize>,
        output_node_id: Option<usize>,
        id_template: impl Into<String>,
    ) -> Self {
        let id_template = id_template.into();
        assert!(
            !id_template.contains("{}"),
            "recordable_id '{id_template}' has non-labelled format descriptors"
        );
        ComponentNode {
            builder,
            input_node_ids,
            output_node_id,
            id_template,
            graph: None,
            clock: None,
            resolved_id: None,
        }
    }

    pub fn recordable_id(&self) -> Option<&str> {
        self.resolved_id.as_deref()
    }

    pub fn is_wired(&self) -> bool {
        self.graph.is_some()
    }

    pub fn dispatch(&mut self, ctx: &mut NestedEvalCtx<'_>, phase: NestedPhase) -> Result<(), NodeError> {
        match phase {
            NestedPhase::Initialise => {
                // Wiring may already be possible when no time-series args
                // participate in the id.
                self.try_wire(ctx)?;
                Ok(())
            }
            NestedPhase::Start => {
                if self.try_wire(ctx)? {
                    self.graph.as_mut().expect("wired above").start()?;
                }
                Ok(())
            }
            NestedPhase::Stop => match &mut self.graph {
                Some(graph) if graph.is_started() => graph.stop(),
                _ => Ok(()),
            },
            NestedPhase::Dispose => {
                if let Some(id) = self.resolved_id.take() {
                    global_state::remove(&global_state::component_key(&id));
                }
                if let Some(mut graph) = self.graph.take() {
                    graph.dispose();
                }
                self.clock = None;
                Ok(())
            }
        }
    }

    pub fn eval(&mut self, ctx: &mut NestedEvalCtx<'_>) -> Result<(), NodeError> {
        if self.graph.is_none() && self.try_wire(ctx)? {
            self.graph.as_mut().expect("wired above").start()?;
        }
        let (Some(graph), Some(clock)) = (&mut self.graph, &self.clock) else {
            return Ok(());
        };
        clock.borrow_mut().reset_next_scheduled_evaluation_time();
        let res = graph.evaluate_graph();
        let next = clock.borrow().next_time();
        clock.borrow_mut().reset_next_scheduled_evaluation_time();
        res?;
        if next != MAX_DT && next > ctx.now {
            ctx.schedule_self(next);
        }
        Ok(())
    }

    /// Attempt to resolve the id and build the sub-graph. Returns true when
    /// the component is wired (now or previously).
    fn try_wire(&mut self, ctx: &mut NestedEvalCtx<'_>) -> Result<bool, NodeError> {
        if self.graph.is_some() {
            return Ok(true);
        }
        let Some(id) = self.resolve_id(ctx)? else {
            return Ok(false);
        };

        let key = global_state::component_key(&id);
        if global_state::contains(&key) {
            panic!("component with recordable id '{id}' already exists");
        }
        global_state::set(key, ScalarValue::Bool(true));

        let mut graph_id: Vec<i64> = ctx.outer_state.borrow().graph_id.clone();
        graph_id.push(ctx.node_ndx as i64);
        let mut graph = self.builder.make_instance(graph_id, &id, Some(ctx.traits));
        let clock = super::nested_clock(
            ctx.outer_state,
            super::schedule_hook(ctx.outer_state, ctx.node_ndx),
        );
        graph.set_evaluation_engine(ctx.engine.clone(), clock.clone());
        graph
            .traits
            .set_trait(RECORDABLE_ID_TRAIT, ScalarValue::from(fq_recordable_id(ctx.traits, &id)));
        graph.initialise();

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
                .expect("component with an output stub requires an output")
                .clone();
            graph.node_mut(out_ndx).output = Some(out);
        }

        self.resolved_id = Some(id);
        self.graph = Some(graph);
        self.clock = Some(clock);
        Ok(true)
    }

    /// Resolve `{name}` placeholders: scalars first, then valid time-series
    /// inputs. Returns `None` while any referenced time series is invalid.
    fn resolve_id(&self, ctx: &NestedEvalCtx<'_>) -> Result<Option<String>, NodeError> {
        let mut out = String::new();
        let mut rest = self.id_template.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open + 1..];
            let close = tail.find('}').ok_or_else(|| {
                NodeError::message(format!(
                    "recordable_id '{}' has an unterminated placeholder",
                    self.id_template
                ))
            })?;
            let name = &tail[..close];
            if name.is_empty() {
                panic!(
                    "recordable_id '{}' has non-labelled format descriptors",
                    self.id_template
                );
            }
            if let Some(value) = ctx.scalars.get(name) {
                out.push_str(&value.to_string());
            } else if let Some(input) = ctx.input_by_name(name) {
                if !input.valid() {
                    return Ok(None);
                }
                match input.scalar() {
                    Some(value) => out.push_str(&value.to_string()),
                    None => return Ok(None),
                }
            } else {
                return Err(NodeError::message(format!(
                    "recordable_id '{}' references unknown arg '{name}'",
                    self.id_template
                )));
            }
            rest = &tail[close + 1..];
        }
        out.push_str(rest);
        Ok(Some(out))
    }
}
