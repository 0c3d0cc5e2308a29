//! The node model.
//!
//! A node owns its input tree, an optional output tree, an optional error
//! output, and a body. User bodies (sources, computes, sinks) are opaque
//! callbacks over a [`NodeCtx`]; nested bodies embed sub-graphs and carry
//! their own state. Dispatch across node kinds is a match on [`NodeBody`].

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use tickflow_common::{EngineTime, MIN_DT, NodeError, ScalarValue};
use tickflow_types::{OutputHandle, TickSink, TsInput};

use crate::engine::EngineHandle;
use crate::graph::GraphState;
use crate::lifecycle::LifecycleState;
use crate::nested::{ComponentNode, MapNode, MeshNode, ReduceNode, SwitchNode, TryExceptNode};

/// Kind of a node within the schedule ordering: push sources sit first,
/// everything else follows in wiring order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    PushSource,
    PullSource,
    Compute,
    Sink,
}

/// Static description of a node: name, arguments, and behavioural flags.
#[derive(Debug, Clone)]
pub struct NodeSignature {
    pub name: String,
    pub args: Vec<String>,
    pub node_type: NodeType,
    /// Convert evaluation failures into writes on the error output.
    pub capture_exception: bool,
    /// Capture input values into activation back-traces.
    pub capture_values: bool,
    /// Depth of the activation back-trace on failure.
    pub trace_back_depth: usize,
    pub label: Option<String>,
    pub wiring_path_name: String,
    pub record_replay_id: Option<String>,
}

impl NodeSignature {
    pub fn new(name: impl Into<String>, node_type: NodeType) -> Self {
        NodeSignature {
            name: name.into(),
            args: Vec::new(),
            node_type,
            capture_exception: false,
            capture_values: true,
            trace_back_depth: 4,
            label: None,
            wiring_path_name: String::new(),
            record_replay_id: None,
        }
    }

    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_capture_exception(mut self, capture: bool) -> Self {
        self.capture_exception = capture;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_wiring_path(mut self, path: impl Into<String>) -> Self {
        self.wiring_path_name = path.into();
        self
    }

    pub fn with_record_replay_id(mut self, id: impl Into<String>) -> Self {
        self.record_replay_id = Some(id.into());
        self
    }

    /// `name(arg, arg, …)` rendering used in error messages.
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.args.join(", "))
    }
}

/// Evaluation context handed to user node bodies.
pub struct NodeCtx<'a> {
    pub evaluation_time: EngineTime,
    pub start_time: EngineTime,
    pub node_ndx: usize,
    pub inputs: &'a [TsInput],
    pub output: Option<&'a OutputHandle>,
    pub error_output: Option<&'a OutputHandle>,
    pub scalars: &'a FxHashMap<String, ScalarValue>,
    pub(crate) engine: &'a EngineHandle,
    pub(crate) state: &'a Rc<RefCell<GraphState>>,
}

impl<'a> NodeCtx<'a> {
    pub fn input(&self, index: usize) -> &TsInput {
        &self.inputs[index]
    }

    pub fn input_by_name(&self, name: &str) -> Option<&TsInput> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn output(&self) -> &OutputHandle {
        self.output.expect("node has no output")
    }

    pub fn scalar(&self, name: &str) -> Option<&ScalarValue> {
        self.scalars.get(name)
    }

    /// The engine context used for output writes.
    pub fn engine(&self) -> &EngineHandle {
        self.engine
    }

    /// Wake this node again at `at`. Scheduling in the past is fatal.
    pub fn schedule(&self, at: EngineTime) {
        self.state.borrow_mut().schedule_node(self.node_ndx, at, false);
    }

    /// Wake this node at `at`, overriding any later schedule.
    pub fn schedule_forced(&self, at: EngineTime) {
        self.state.borrow_mut().schedule_node(self.node_ndx, at, true);
    }
}

pub type EvalFn = Box<dyn FnMut(&mut NodeCtx<'_>) -> Result<(), NodeError>>;

/// Node behaviour, dispatched by tag.
pub enum NodeBody {
    /// User callback: pull sources, computes, sinks.
    Eval(EvalFn),
    /// Externally driven; messages arrive through the graph's receiver.
    PushSource,
    Map(Box<MapNode>),
    Reduce(Box<ReduceNode>),
    Switch(Box<SwitchNode>),
    Component(Box<ComponentNode>),
    TryExcept(Box<TryExceptNode>),
    Mesh(Box<MeshNode>),
}

impl NodeBody {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeBody::Eval(_) => "eval",
            NodeBody::PushSource => "push_source",
            NodeBody::Map(_) => "map",
            NodeBody::Reduce(_) => "reduce",
            NodeBody::Switch(_) => "switch",
            NodeBody::Component(_) => "component",
            NodeBody::TryExcept(_) => "try_except",
            NodeBody::Mesh(_) => "mesh",
        }
    }

    pub fn is_nested(&self) -> bool {
        !matches!(self, NodeBody::Eval(_) | NodeBody::PushSource)
    }
}

/// The subscription sink of one node: output writes wake the node by
/// scheduling it in its owning graph at the write time.
pub struct NodeSink {
    state: Weak<RefCell<GraphState>>,
    node_ndx: usize,
    name: String,
}

impl TickSink for NodeSink {
    fn notify(&self, when: EngineTime) {
        if let Some(state) = self.state.upgrade() {
            state.borrow_mut().schedule_node(self.node_ndx, when, false);
        }
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

pub struct Node {
    pub signature: Rc<NodeSignature>,
    pub scalars: FxHashMap<String, ScalarValue>,
    pub inputs: Vec<TsInput>,
    pub output: Option<OutputHandle>,
    pub error_output: Option<OutputHandle>,
    /// Recordable-state output for record/replay consumers.
    pub recordable_state: Option<OutputHandle>,
    pub body: NodeBody,
    pub node_ndx: usize,
    pub graph_id: Vec<i64>,
    /// Schedule this node at graph start (pull sources).
    pub schedule_on_start: bool,
    pub(crate) sink: Option<Rc<dyn TickSink>>,
    pub(crate) lifecycle: LifecycleState,
    pub(crate) last_evaluation_time: EngineTime,
}

impl Node {
    pub fn new(
        signature: Rc<NodeSignature>,
        inputs: Vec<TsInput>,
        output: Option<OutputHandle>,
        error_output: Option<OutputHandle>,
        body: NodeBody,
    ) -> Self {
        let schedule_on_start = signature.node_type == NodeType::PullSource;
        Node {
            signature,
            scalars: FxHashMap::default(),
            inputs,
            output,
            error_output,
            recordable_state: None,
            body,
            node_ndx: 0,
            graph_id: Vec::new(),
            schedule_on_start,
            sink: None,
            lifecycle: LifecycleState::Created,
            last_evaluation_time: MIN_DT,
        }
    }

    pub fn is_push_source(&self) -> bool {
        matches!(self.body, NodeBody::PushSource)
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn last_evaluation_time(&self) -> EngineTime {
        self.last_evaluation_time
    }

    /// Attach the node to its owning graph: install index/id and wire the
    /// notification sink into every input.
    pub fn set_graph(&mut self, state: &Rc<RefCell<GraphState>>, node_ndx: usize, graph_id: Vec<i64>) {
        self.node_ndx = node_ndx;
        self.graph_id = graph_id;
        let sink: Rc<dyn TickSink> = Rc::new(NodeSink {
            state: Rc::downgrade(state),
            node_ndx,
            name: self.signature.name.clone(),
        });
        for input in &mut self.inputs {
            input.attach_sink(sink.clone());
        }
        self.sink = Some(sink);
    }

    pub fn sink(&self) -> Option<Rc<dyn TickSink>> {
        self.sink.clone()
    }

    /// Schedule the node at the current evaluation time (used by wiring).
    pub fn notify(&self, state: &Rc<RefCell<GraphState>>, now: EngineTime) {
        state.borrow_mut().schedule_node(self.node_ndx, now, false);
    }

    pub(crate) fn mark_evaluated(&mut self, now: EngineTime) {
        self.last_evaluation_time = now;
    }
}
