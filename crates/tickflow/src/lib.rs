//! tickflow — a deterministic, forward-only computation engine for
//! time-series dataflow graphs.
//!
//! Construct a directed graph of compute nodes wired by typed time-series
//! edges, then drive it forward in time: in **simulation**, the virtual
//! clock jumps to the next scheduled event; in **real time**, the wall
//! clock rules and push sources wake the engine. Only nodes whose inputs
//! changed (or whose scheduled wake-up arrived) are evaluated.
//!
//! ```no_run
//! use tickflow::prelude::*;
//! use tickflow_common::{EngineTime, ScalarKind};
//!
//! let mut wiring = GraphBuilder::new();
//! let src = wiring.add_node(NodeBuilder::pull_source(
//!     "ticker",
//!     meta::ts(ScalarKind::Int),
//!     |ctx| {
//!         ctx.output().set_scalar(1i64.into(), ctx.engine());
//!         Ok(())
//!     },
//! ));
//! let sink = wiring.add_node(NodeBuilder::sink(
//!     "print",
//!     ("ts", meta::ts(ScalarKind::Int)),
//!     |ctx| {
//!         println!("{:?}", ctx.input(0).scalar());
//!         Ok(())
//!     },
//! ));
//! wiring.connect(src, sink, 0);
//!
//! let graph = wiring.make_instance(vec![0], "demo", None);
//! let mut executor = GraphExecutor::new(graph, ExecutorConfig::simulation());
//! executor
//!     .run(EngineTime::from_secs(0), EngineTime::from_secs(10))
//!     .unwrap();
//! ```

#[cfg(feature = "common")]
pub use tickflow_common as common;

#[cfg(feature = "types")]
pub use tickflow_types as types;

#[cfg(feature = "runtime")]
pub use tickflow_runtime as runtime;

#[cfg(feature = "runtime")]
pub mod prelude {
    pub use tickflow_common::{
        EngineTime, EngineTimeDelta, GraphError, MAX_DT, MIN_DT, NodeError, ScalarKind, ScalarValue,
    };
    pub use tickflow_runtime::{
        EvaluationLifeCycleObserver, EvaluationMode, ExecutorConfig, Graph, GraphBuilder,
        GraphExecutor, NodeBuilder, NodeCtx, PushSender, PushValue,
    };
    pub use tickflow_types::{OutputHandle, PathSeg, TsInput, TsReference, Value, meta};
}
