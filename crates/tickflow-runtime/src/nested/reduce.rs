//! Pairwise associative reduction over a TSD, backed by a complete binary
//! tree of sub-graphs.
//!
//! Each tree slot is one instance of the association sub-graph: two
//! reference-input stub nodes and one reference output. Keys bind to leaf
//! positions left-to-right (the free list is kept sorted descending so the
//! lowest position is taken first); unbound leaves point at the
//! user-supplied zero. Growth doubles the tree; shrinkage halves it when
//! three quarters of the leaves are free. The node's own output is a REF
//! that re-points only when the root's value actually changes or becomes
//! valid for the first time.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tickflow_common::{MAX_DT, NodeError, ScalarValue};
use tickflow_types::{OutputHandle, PathSeg};

use crate::builder::GraphBuilder;
use crate::clock::NestedClock;
use crate::graph::{Graph, NestedEvalCtx, NestedPhase};

/// Tree position: (sub-graph index, stub node index within the sub-graph).
type LeafNdx = (i64, i64);

pub struct ReduceNode {
    builder: Rc<GraphBuilder>,
    /// (lhs stub, rhs stub) node indices within one sub-graph instance.
    input_node_ids: (usize, usize),
    output_node_id: usize,
    ts_arg: String,
    zero_arg: String,
    nested: Option<Graph>,
    clock: Option<Rc<RefCell<NestedClock>>>,
    bound: FxHashMap<ScalarValue, LeafNdx>,
    /// Sorted descending; `pop` yields the leftmost free position.
    free: Vec<LeafNdx>,
}

impl ReduceNode {
    pub fn new(
        builder: Rc<GraphBuilder>,
        input_node_ids: (usize, usize),
        output_node_id: usize,
        ts_arg: impl Into<String>,
        zero_arg: impl Into<String>,
    ) -> Self {
        ReduceNode {
            builder,
            input_node_ids,
            output_node_id,
            ts_arg: ts_arg.into(),
            zero_arg: zero_arg.into(),
            nested: None,
            clock: None,
            bound: FxHashMap::default(),
            free: Vec::new(),
        }
    }

    pub fn bound_positions(&self) -> Vec<(ScalarValue, LeafNdx)> {
        let mut out: Vec<(ScalarValue, LeafNdx)> =
            self.bound.iter().map(|(k, n)| (k.clone(), *n)).collect();
        out.sort();
        out
    }

    pub fn free_positions(&self) -> &[LeafNdx] {
        &self.free
    }

    fn node_size(&self) -> usize {
        self.builder.node_count()
    }

    fn tree_len(&self) -> i64 {
        let nested = self.nested.as_ref().expect("nested graph initialised");
        (nested.node_count() / self.node_size()) as i64
    }

    fn flat(&self, ndx: LeafNdx) -> usize {
        ndx.0 as usize * self.node_size() + ndx.1 as usize
    }

    fn sub_output(&self, sub_graph: i64) -> OutputHandle {
        let nested = self.nested.as_ref().expect("nested graph initialised");
        nested
            .node(sub_graph as usize * self.node_size() + self.output_node_id)
            .output
            .clone()
            .expect("reduce sub-graph output stub has an output")
    }

    fn last_output(&self) -> OutputHandle {
        self.sub_output(self.tree_len() - 1)
    }

    pub fn dispatch(&mut self, ctx: &mut NestedEvalCtx<'_>, phase: NestedPhase) -> Result<(), NodeError> {
        match phase {
            NestedPhase::Initialise => {
                let mut graph_id: Vec<i64> = ctx.outer_state.borrow().graph_id.clone();
                graph_id.push(ctx.node_ndx as i64);
                let label = format!("{}.reduce", ctx.signature.name);
                let mut graph =
                    GraphBuilder::new().make_instance(graph_id, &label, Some(ctx.traits));
                let clock = super::nested_clock(
                    ctx.outer_state,
                    super::schedule_hook(ctx.outer_state, ctx.node_ndx),
                );
                graph.set_evaluation_engine(ctx.engine.clone(), clock.clone());
                graph.initialise();
                self.nested = Some(graph);
                self.clock = Some(clock);
                Ok(())
            }
            NestedPhase::Start => self.do_start(ctx),
            NestedPhase::Stop => match &mut self.nested {
                Some(graph) => graph.stop(),
                None => Ok(()),
            },
            NestedPhase::Dispose => {
                if let Some(mut graph) = self.nested.take() {
                    graph.dispose();
                }
                self.clock = None;
                Ok(())
            }
        }
    }

    fn do_start(&mut self, ctx: &mut NestedEvalCtx<'_>) -> Result<(), NodeError> {
        let ts = ctx
            .input_by_name(&self.ts_arg)
            .unwrap_or_else(|| panic!("reduce node is missing its TSD input '{}'", self.ts_arg));
        let mut pre_existing: Vec<ScalarValue> = Vec::new();
        if ts.valid() {
            let added = ts.map_delta(ctx.now).added;
            pre_existing = ts
                .dict_keys()
                .into_iter()
                .filter(|k| !added.contains(k))
                .collect();
        }
        if pre_existing.is_empty() {
            self.grow_tree(ctx)?;
        } else {
            self.add_nodes(pre_existing, ctx)?;
        }
        self.nested
            .as_mut()
            .expect("nested graph initialised")
            .start()
    }

    pub fn eval(&mut self, ctx: &mut NestedEvalCtx<'_>) -> Result<(), NodeError> {
        let (removed, added) = {
            let ts = ctx
                .input_by_name(&self.ts_arg)
                .unwrap_or_else(|| panic!("reduce node is missing its TSD input '{}'", self.ts_arg));
            let delta = ts.map_delta(ctx.now);
            (delta.removed, delta.added)
        };
        self.remove_nodes(removed, ctx)?;
        self.add_nodes(added, ctx)?;
        self.re_balance(ctx)?;

        let next = {
            let clock = self.clock.clone().expect("nested clock initialised");
            clock.borrow_mut().reset_next_scheduled_evaluation_time();
            let res = self
                .nested
                .as_mut()
                .expect("nested graph initialised")
                .evaluate_graph();
            let next = clock.borrow().next_time();
            clock.borrow_mut().reset_next_scheduled_evaluation_time();
            res?;
            next
        };
        if next != MAX_DT && next > ctx.now {
            ctx.schedule_self(next);
        }

        // Propagate only on first-valid or an actual value change: a
        // structurally identical recompute must not re-fire downstream.
        let root = self.last_output();
        let out = ctx.output.expect("reduce node carries a REF output");
        let root_value = root.reference_value();
        let root_valid = root.valid();
        let out_valid = out.valid();
        let out_value = out.reference_value();
        if (root_valid && !out_valid) || (root_valid && out_value != root_value) {
            out.set_ref(root_value, ctx.engine);
        }
        Ok(())
    }

    fn add_nodes(&mut self, keys: Vec<ScalarValue>, ctx: &mut NestedEvalCtx<'_>) -> Result<(), NodeError> {
        while self.free.len() < keys.len() {
            self.grow_tree(ctx)?;
        }
        for key in keys {
            let ndx = self.free.pop().expect("grown above");
            self.bind_key_to_node(key, ndx, ctx);
        }
        Ok(())
    }

    fn remove_nodes(&mut self, keys: Vec<ScalarValue>, ctx: &mut NestedEvalCtx<'_>) -> Result<(), NodeError> {
        for key in keys {
            let Some(mut ndx) = self.bound.remove(&key) else {
                continue;
            };
            if !self.bound.is_empty() {
                let (max_key, max_ndx) = self
                    .bound
                    .iter()
                    .max_by_key(|(_, n)| **n)
                    .map(|(k, n)| (k.clone(), *n))
                    .expect("bound non-empty");
                // Only swap when the displaced leaf sits in a higher layer;
                // this keeps bound keys packed to the left.
                if max_ndx.0 > ndx.0 {
                    self.swap_node(ndx, max_ndx, ctx);
                    self.bound.insert(max_key, ndx);
                    ndx = max_ndx;
                }
            }
            self.free.push(ndx);
            self.zero_node(ndx, ctx);
        }
        Ok(())
    }

    fn re_balance(&mut self, ctx: &mut NestedEvalCtx<'_>) -> Result<(), NodeError> {
        if self.tree_len() > 8 && self.free.len() * 3 > self.bound.len() * 4 {
            self.shrink_tree(ctx)?;
        }
        Ok(())
    }

    fn grow_tree(&mut self, ctx: &mut NestedEvalCtx<'_>) -> Result<(), NodeError> {
        let count = self.tree_len();
        let end = 2 * count + 1;
        let top_layer_length = (end + 1) / 4;
        let top_layer_end = (count + top_layer_length).max(1);
        let last_node = end - 1;
        let (lhs, rhs) = self.input_node_ids;

        let mut un_bound_outputs: VecDeque<i64> = VecDeque::new();
        let mut wiring: Vec<i64> = Vec::new();

        for i in count..end {
            un_bound_outputs.push_back(i);
            self.nested
                .as_mut()
                .expect("nested graph initialised")
                .extend_graph(&self.builder, true)?;
            if i < top_layer_end {
                let ndx_lhs = (i, lhs as i64);
                self.free.push(ndx_lhs);
                self.zero_node(ndx_lhs, ctx);
                let ndx_rhs = (i, rhs as i64);
                self.free.push(ndx_rhs);
                self.zero_node(ndx_rhs, ctx);
            } else {
                wiring.push(i);
            }
        }

        for i in wiring {
            let (left_parent, right_parent) = if i < last_node {
                let l = un_bound_outputs.pop_front().expect("outputs queued per node");
                let r = un_bound_outputs.pop_front().expect("outputs queued per node");
                (self.sub_output(l), self.sub_output(r))
            } else {
                let old_root = self.sub_output(count - 1);
                let new_root = un_bound_outputs.pop_front().expect("outputs queued per node");
                (old_root, self.sub_output(new_root))
            };
            let a = self.flat((i, lhs as i64));
            let b = self.flat((i, rhs as i64));
            let nested = self.nested.as_mut().expect("nested graph initialised");
            nested.bind_input(a, 0, left_parent, ctx.now);
            nested.bind_input(b, 0, right_parent, ctx.now);
            nested.schedule_node(a, ctx.now);
            nested.schedule_node(b, ctx.now);
        }

        let node_size = self.node_size();
        let nested = self.nested.as_mut().expect("nested graph initialised");
        if nested.is_started() {
            let start_ndx = count as usize * node_size;
            let end_ndx = nested.node_count();
            nested.start_subgraph(start_ndx, end_ndx)?;
        }

        // Descending order: `pop` hands out the leftmost free position.
        self.free.sort_by(|a, b| b.cmp(a));
        Ok(())
    }

    fn shrink_tree(&mut self, ctx: &mut NestedEvalCtx<'_>) -> Result<(), NodeError> {
        let _ = ctx;
        let capacity = (self.bound.len() + self.free.len()) as i64;
        if capacity <= 8 {
            return Ok(());
        }
        let halved = capacity / 2;
        let active = self.bound.len() as i64;
        if halved < active {
            return Ok(());
        }

        let last_node = (self.tree_len() - 1) / 2;
        let start = last_node;
        let node_size = self.node_size();
        self.nested
            .as_mut()
            .expect("nested graph initialised")
            .reduce_graph(start as usize * node_size)?;

        self.free.sort();
        let to_keep = (halved - active).max(0) as usize;
        self.free.truncate(to_keep);
        self.free.sort_by(|a, b| b.cmp(a));
        Ok(())
    }

    fn bind_key_to_node(&mut self, key: ScalarValue, ndx: LeafNdx, ctx: &mut NestedEvalCtx<'_>) {
        let ts = ctx
            .input_by_name(&self.ts_arg)
            .unwrap_or_else(|| panic!("reduce node is missing its TSD input '{}'", self.ts_arg));
        let tsd = ts
            .bound_target()
            .unwrap_or_else(|| panic!("reduce input '{}' is not bound", self.ts_arg));
        let child = tsd.child(PathSeg::Key(key.clone()));
        self.bound.insert(key, ndx);
        let flat = self.flat(ndx);
        let nested = self.nested.as_mut().expect("nested graph initialised");
        nested.bind_input(flat, 0, child, ctx.now);
        nested.schedule_node(flat, ctx.now);
    }

    fn zero_node(&mut self, ndx: LeafNdx, ctx: &mut NestedEvalCtx<'_>) {
        let flat = self.flat(ndx);
        let zero = ctx
            .input_by_name(&self.zero_arg)
            .unwrap_or_else(|| panic!("reduce node is missing its zero input '{}'", self.zero_arg));
        let now = ctx.now;
        let nested = self.nested.as_mut().expect("nested graph initialised");
        nested.node_mut(flat).inputs[0].clone_binding_from(zero, now);
        nested.schedule_node(flat, now);
    }

    fn swap_node(&mut self, src: LeafNdx, dst: LeafNdx, ctx: &mut NestedEvalCtx<'_>) {
        let a = self.flat(src);
        let b = self.flat(dst);
        let nested = self.nested.as_mut().expect("nested graph initialised");
        let ta = nested.node(a).inputs[0].bound_target();
        let tb = nested.node(b).inputs[0].bound_target();
        match tb {
            Some(t) => nested.bind_input(a, 0, t, ctx.now),
            None => nested.node_mut(a).inputs[0].unbind(),
        }
        match ta {
            Some(t) => nested.bind_input(b, 0, t, ctx.now),
            None => nested.node_mut(b).inputs[0].unbind(),
        }
        nested.schedule_node(a, ctx.now);
        nested.schedule_node(b, ctx.now);
    }
}
