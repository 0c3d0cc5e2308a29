//! The tickflow runtime: a deterministic, forward-only evaluation engine
//! for time-series dataflow graphs.
//!
//! A graph is an ordered list of nodes wired by typed time-series edges.
//! The engine drives the graph forward in time — simulation or real time —
//! evaluating only the nodes whose inputs changed or whose scheduled
//! wake-up arrived, and stamping every output write with the cycle's
//! evaluation time.

pub mod builder;
pub mod clock;
pub mod engine;
pub mod executor;
pub mod global_state;
pub mod graph;
pub mod lifecycle;
pub mod nested;
pub mod node;
pub mod push;
pub mod trace;

pub use builder::{EdgeSpec, GraphBuilder, NodeBuilder, handle_at};
pub use clock::{
    ClockRef, EngineClock, EvaluationClock, NestedClock, RealTimeClock, SimulationClock,
};
pub use engine::{
    EngineHandle, EvaluationLifeCycleObserver, EvaluationMode, GraphInfo, NodeInfo, StopHandle,
};
pub use executor::{ExecutorConfig, GraphExecutor};
pub use graph::{Graph, GraphState, NestedEvalCtx, NestedPhase, RECORDABLE_ID_TRAIT, Traits};
pub use lifecycle::LifecycleState;
pub use nested::{ComponentNode, MapNode, MeshNode, ReduceNode, SwitchNode, TryExceptNode};
pub use node::{EvalFn, Node, NodeBody, NodeCtx, NodeSignature, NodeType};
pub use push::{PushMessage, PushSender, PushValue, SenderReceiverState};
