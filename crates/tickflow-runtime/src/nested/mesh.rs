//! Mesh node: a keyed map with request/response edges between sub-graphs.
//!
//! Beyond the key-set driven population of a map, any sub-graph may request
//! further keys by ticking its request stub output (a TSS of keys). The
//! mesh instantiates missing keys on demand, counts requesters per key, and
//! only tears a requested sub-graph down once its key has left the key set
//! and the last requester has released it. Responses flow through the mesh
//! output: every sub-graph's response stub input is bound to the mesh's
//! whole TSD output, so a requester reads the requested key's value the
//! cycle after it is produced.

use rustc_hash::{FxHashMap, FxHashSet};
use tickflow_common::{NodeError, ScalarValue};

use crate::graph::{NestedEvalCtx, NestedPhase};

use super::map::MapNode;

pub struct MeshNode {
    map: MapNode,
    /// Node index (inside each sub-graph) of the request stub output.
    request_node_id: Option<usize>,
    /// Node index of the response stub input, bound to the mesh output.
    response_node_id: Option<usize>,
    /// target key -> requester keys currently depending on it.
    dependencies: FxHashMap<ScalarValue, FxHashSet<ScalarValue>>,
    /// Keys alive only because requesters still hold them.
    requested_only: FxHashSet<ScalarValue>,
    keys_arg: String,
}

impl MeshNode {
    pub fn new(
        map: MapNode,
        request_node_id: Option<usize>,
        response_node_id: Option<usize>,
        keys_arg: impl Into<String>,
    ) -> Self {
        MeshNode {
            map,
            request_node_id,
            response_node_id,
            dependencies: FxHashMap::default(),
            requested_only: FxHashSet::default(),
            keys_arg: keys_arg.into(),
        }
    }

    pub fn active_keys(&self) -> Vec<ScalarValue> {
        self.map.active_keys()
    }

    pub fn dispatch(&mut self, ctx: &mut NestedEvalCtx<'_>, phase: NestedPhase) -> Result<(), NodeError> {
        if phase == NestedPhase::Stop || phase == NestedPhase::Dispose {
            self.dependencies.clear();
            self.requested_only.clear();
        }
        self.map.dispatch(ctx, phase)
    }

    pub fn eval(&mut self, ctx: &mut NestedEvalCtx<'_>) -> Result<(), NodeError> {
        self.map.shared.borrow_mut().last_evaluation_time = ctx.now;

        self.process_key_set(ctx)?;
        // Requests are produced by the sub-graphs themselves, so drain them
        // after each evaluation round until the population settles.
        loop {
            self.map.run_scheduled(ctx)?;
            if !self.process_requests(ctx)? {
                break;
            }
        }
        Ok(())
    }

    /// Like the map's key-set pass, but removal defers to live requesters.
    fn process_key_set(&mut self, ctx: &mut NestedEvalCtx<'_>) -> Result<(), NodeError> {
        let keys = ctx
            .input_by_name(&self.keys_arg)
            .unwrap_or_else(|| panic!("mesh node is missing its key-set input '{}'", self.keys_arg));
        if !keys.modified(ctx.now) && keys.bound_at() != ctx.now {
            return Ok(());
        }
        let delta = keys.set_delta(ctx.now);
        for key in &delta.added {
            self.requested_only.remove(key);
            if !self.map.has_key(key) {
                self.create_graph(key.clone(), ctx)?;
            }
        }
        for key in &delta.removed {
            if !self.map.has_key(key) {
                continue;
            }
            if self.dependencies.get(key).is_some_and(|deps| !deps.is_empty()) {
                // Still requested: keep the graph, but remember it no longer
                // belongs to the key set.
                self.requested_only.insert(key.clone());
            } else {
                self.map.remove_graph(key, ctx)?;
                self.map.shared.borrow_mut().scheduled.remove(key);
            }
            // A removed requester releases everything it asked for.
            self.release_requester(key, ctx)?;
        }
        Ok(())
    }

    /// Drop every dependency held by `requester`; targets left without
    /// dependents and outside the key set are torn down.
    fn release_requester(
        &mut self,
        requester: &ScalarValue,
        ctx: &mut NestedEvalCtx<'_>,
    ) -> Result<(), NodeError> {
        let mut emptied: Vec<ScalarValue> = Vec::new();
        self.dependencies.retain(|target, deps| {
            deps.remove(requester);
            if deps.is_empty() {
                emptied.push(target.clone());
                false
            } else {
                true
            }
        });
        for target in emptied {
            if self.requested_only.remove(&target) && self.map.has_key(&target) {
                self.map.remove_graph(&target, ctx)?;
                self.map.shared.borrow_mut().scheduled.remove(&target);
            }
        }
        Ok(())
    }

    /// Drain the request stubs of every active sub-graph. Returns true when
    /// the population changed (a graph was created or released).
    fn process_requests(&mut self, ctx: &mut NestedEvalCtx<'_>) -> Result<bool, NodeError> {
        let Some(req_ndx) = self.request_node_id else {
            return Ok(false);
        };
        let mut added: Vec<(ScalarValue, ScalarValue)> = Vec::new();
        let mut removed: Vec<(ScalarValue, ScalarValue)> = Vec::new();
        for requester in self.map.active_keys() {
            let Some(graph) = self.map.active_graph_mut(&requester) else {
                continue;
            };
            let Some(request_out) = graph.node(req_ndx).output.clone() else {
                continue;
            };
            let delta = request_out.set_delta(ctx.now);
            for target in delta.added {
                added.push((requester.clone(), target));
            }
            for target in delta.removed {
                removed.push((requester.clone(), target));
            }
        }

        let mut changed = false;
        for (requester, target) in added {
            self.dependencies
                .entry(target.clone())
                .or_default()
                .insert(requester);
            if !self.map.has_key(&target) {
                self.requested_only.insert(target.clone());
                self.create_graph(target, ctx)?;
                changed = true;
            }
        }
        for (requester, target) in removed {
            let emptied = match self.dependencies.get_mut(&target) {
                Some(deps) => {
                    deps.remove(&requester);
                    deps.is_empty()
                }
                None => false,
            };
            if emptied {
                self.dependencies.remove(&target);
                if self.requested_only.remove(&target) && self.map.has_key(&target) {
                    self.map.remove_graph(&target, ctx)?;
                    self.map.shared.borrow_mut().scheduled.remove(&target);
                    changed = true;
                }
            }
        }
        Ok(changed)
    }

    fn create_graph(&mut self, key: ScalarValue, ctx: &mut NestedEvalCtx<'_>) -> Result<(), NodeError> {
        self.map.create_new_graph(key.clone(), ctx)?;
        // Responses read through the mesh output as a whole.
        if let Some(resp_ndx) = self.response_node_id {
            let mesh_out = ctx
                .output
                .expect("mesh node with a response stub requires an output")
                .clone();
            if let Some(graph) = self.map.active_graph_mut(&key) {
                graph.bind_input(resp_ndx, 0, mesh_out, ctx.now);
                graph.schedule_node(resp_ndx, ctx.now);
            }
        }
        Ok(())
    }
}
