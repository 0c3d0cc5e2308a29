//! Runtime graph factory.
//!
//! Wiring DSLs live outside the core; what the runtime needs is a factory
//! that can stamp out fresh node instances and connect their edges — both
//! for building a root graph and for the nested nodes that extend or
//! instantiate sub-graphs while the engine runs.

use std::rc::Rc;

use rustc_hash::FxHashMap;
use tickflow_common::{EngineTime, MIN_DT, NodeError, ScalarKind, ScalarValue};
use tickflow_types::{OutputHandle, PathSeg, TsInput, TsMeta, meta};

use crate::graph::{Graph, Traits};
use crate::node::{EvalFn, Node, NodeBody, NodeCtx, NodeSignature, NodeType};

/// Factory for one node: signature, shapes, scalars, and a body maker that
/// yields a fresh body per instance.
pub struct NodeBuilder {
    pub signature: Rc<NodeSignature>,
    pub inputs: Vec<(String, &'static TsMeta)>,
    pub output: Option<&'static TsMeta>,
    pub error_output: Option<&'static TsMeta>,
    pub scalars: FxHashMap<String, ScalarValue>,
    pub make_body: Rc<dyn Fn() -> NodeBody>,
}

impl NodeBuilder {
    pub fn new(signature: NodeSignature, make_body: impl Fn() -> NodeBody + 'static) -> Self {
        NodeBuilder {
            signature: Rc::new(signature),
            inputs: Vec::new(),
            output: None,
            error_output: None,
            scalars: FxHashMap::default(),
            make_body: Rc::new(make_body),
        }
    }

    /// Pull source: scheduled at graph start, re-schedules itself.
    pub fn pull_source(
        name: &str,
        output: &'static TsMeta,
        f: impl FnMut(&mut NodeCtx<'_>) -> Result<(), NodeError> + Clone + 'static,
    ) -> Self {
        NodeBuilder::new(NodeSignature::new(name, NodeType::PullSource), move || {
            NodeBody::Eval(Box::new(f.clone()) as EvalFn)
        })
        .with_output(output)
    }

    /// Push source: driven by the graph's receiver queue.
    pub fn push_source(name: &str, output: &'static TsMeta) -> Self {
        NodeBuilder::new(NodeSignature::new(name, NodeType::PushSource), || NodeBody::PushSource)
            .with_output(output)
    }

    pub fn compute(
        name: &str,
        inputs: &[(&str, &'static TsMeta)],
        output: &'static TsMeta,
        f: impl FnMut(&mut NodeCtx<'_>) -> Result<(), NodeError> + Clone + 'static,
    ) -> Self {
        let args: Vec<&str> = inputs.iter().map(|(n, _)| *n).collect();
        let mut b = NodeBuilder::new(
            NodeSignature::new(name, NodeType::Compute).with_args(&args),
            move || NodeBody::Eval(Box::new(f.clone()) as EvalFn),
        )
        .with_output(output);
        for (n, m) in inputs {
            b = b.with_input(n, m);
        }
        b
    }

    pub fn sink(
        name: &str,
        input: (&str, &'static TsMeta),
        f: impl FnMut(&mut NodeCtx<'_>) -> Result<(), NodeError> + Clone + 'static,
    ) -> Self {
        NodeBuilder::new(
            NodeSignature::new(name, NodeType::Sink).with_args(&[input.0]),
            move || NodeBody::Eval(Box::new(f.clone()) as EvalFn),
        )
        .with_input(input.0, input.1)
    }

    pub fn with_input(mut self, name: &str, meta: &'static TsMeta) -> Self {
        self.inputs.push((name.to_string(), meta));
        self
    }

    pub fn with_output(mut self, meta: &'static TsMeta) -> Self {
        self.output = Some(meta);
        self
    }

    pub fn with_error_output(mut self, meta: &'static TsMeta) -> Self {
        self.error_output = Some(meta);
        self
    }

    pub fn with_scalar(mut self, name: &str, value: ScalarValue) -> Self {
        self.scalars.insert(name.to_string(), value);
        self
    }

    pub fn with_signature(mut self, f: impl FnOnce(NodeSignature) -> NodeSignature) -> Self {
        let sig = (*self.signature).clone();
        self.signature = Rc::new(f(sig));
        self
    }

    /// Stamp out a node instance. `owner` prefixes output diagnostics.
    pub fn build(&self, owner: &str) -> Node {
        let inputs: Vec<TsInput> = self
            .inputs
            .iter()
            .map(|(name, meta)| TsInput::new(meta, name.clone()))
            .collect();
        let owner_path = format!("{owner}/{}", self.signature.name);
        let output = self.output.map(|m| OutputHandle::new(m, owner_path.clone()));
        let error_meta = self.error_output.or_else(|| {
            self.signature
                .capture_exception
                .then(|| meta::ts(ScalarKind::Error))
        });
        let error_output = error_meta.map(|m| OutputHandle::new(m, format!("{owner_path}#error")));
        let mut node = Node::new(self.signature.clone(), inputs, output, error_output, (self.make_body)());
        node.scalars = self.scalars.clone();
        node
    }
}

/// One binding: source node output (optionally a child path below it) into
/// a destination node's input slot.
#[derive(Clone)]
pub struct EdgeSpec {
    pub src_node: usize,
    pub src_path: Vec<PathSeg>,
    pub dst_node: usize,
    pub dst_input: usize,
}

/// Factory for a whole (sub-)graph: node builders plus internal edges.
/// Push-source builders must precede all others, mirroring the schedule
/// layout of the graph itself.
#[derive(Default)]
pub struct GraphBuilder {
    pub node_builders: Vec<NodeBuilder>,
    pub edges: Vec<EdgeSpec>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        GraphBuilder::default()
    }

    pub fn add_node(&mut self, builder: NodeBuilder) -> usize {
        self.node_builders.push(builder);
        self.node_builders.len() - 1
    }

    pub fn connect(&mut self, src_node: usize, dst_node: usize, dst_input: usize) {
        self.edges.push(EdgeSpec {
            src_node,
            src_path: Vec::new(),
            dst_node,
            dst_input,
        });
    }

    pub fn connect_path(
        &mut self,
        src_node: usize,
        src_path: Vec<PathSeg>,
        dst_node: usize,
        dst_input: usize,
    ) {
        self.edges.push(EdgeSpec {
            src_node,
            src_path,
            dst_node,
            dst_input,
        });
    }

    pub fn node_count(&self) -> usize {
        self.node_builders.len()
    }

    /// Instantiate the nodes (unconnected). `first` offsets diagnostics for
    /// graph extension.
    pub fn build_nodes(&self, _graph_id: &[i64], label: &str, first: usize) -> Vec<Node> {
        self.node_builders
            .iter()
            .enumerate()
            .map(|(i, nb)| {
                let mut node = nb.build(label);
                node.node_ndx = first + i;
                node
            })
            .collect()
    }

    /// Bind this builder's edges between nodes `[first, first+len)` of
    /// `graph`, recording producers for back-traces.
    pub fn connect_edges(&self, graph: &mut Graph, first: usize, now: EngineTime) {
        for edge in &self.edges {
            let src = first + edge.src_node;
            let dst = first + edge.dst_node;
            let output = graph
                .node(src)
                .output
                .clone()
                .unwrap_or_else(|| {
                    panic!(
                        "edge source node {} ({}) has no output",
                        src,
                        graph.node(src).signature.name
                    )
                });
            let target = handle_at(&output, &edge.src_path);
            graph.bind_input(dst, edge.dst_input, target, now);
            graph.node_mut(dst).inputs[edge.dst_input].producer = Some(src);
        }
    }

    /// Build a complete connected graph instance.
    pub fn make_instance(
        &self,
        graph_id: Vec<i64>,
        label: &str,
        parent_traits: Option<&Traits>,
    ) -> Graph {
        let nodes = self.build_nodes(&graph_id, label, 0);
        let mut graph = Graph::new(graph_id, nodes, label, parent_traits);
        self.connect_edges(&mut graph, 0, MIN_DT);
        graph
    }
}

/// Navigate an output handle down a child path.
pub fn handle_at(output: &OutputHandle, path: &[PathSeg]) -> OutputHandle {
    path.iter().fold(output.clone(), |h, seg| h.child(seg.clone()))
}
