//! Shared helpers for the runtime scenario tests.

use std::cell::RefCell;
use std::rc::Rc;

use tickflow_common::{EngineTime, GraphError};
use tickflow_runtime::{
    ExecutorConfig, Graph, GraphExecutor, NodeBody, NodeBuilder, NodeSignature, NodeType,
};
use tickflow_types::{TsMeta, Value};

pub fn t(s: i64) -> EngineTime {
    EngineTime::from_secs(s)
}

pub type Trace = Rc<RefCell<Vec<(EngineTime, Value)>>>;

pub fn trace() -> Trace {
    Rc::new(RefCell::new(Vec::new()))
}

/// Pull source replaying a fixed (time, value) script in simulation time.
pub fn scheduled_source(
    name: &str,
    out_meta: &'static TsMeta,
    events: Vec<(EngineTime, Value)>,
) -> NodeBuilder {
    let events = Rc::new(events);
    NodeBuilder::new(NodeSignature::new(name, NodeType::PullSource), move || {
        let events = events.clone();
        let mut idx = 0usize;
        NodeBody::Eval(Box::new(move |ctx| {
            while idx < events.len() && events[idx].0 <= ctx.evaluation_time {
                if events[idx].0 == ctx.evaluation_time {
                    ctx.output().apply(&events[idx].1, ctx.engine());
                }
                idx += 1;
            }
            if idx < events.len() {
                ctx.schedule(events[idx].0);
            }
            Ok(())
        }))
    })
    .with_output(out_meta)
}

/// Sink recording `(time, snapshot)` on every tick of its input.
pub fn collecting_sink(name: &str, in_meta: &'static TsMeta, store: Trace) -> NodeBuilder {
    NodeBuilder::sink(name, ("ts", in_meta), move |ctx| {
        if let Some(v) = ctx.input(0).snapshot(ctx.evaluation_time, ctx.start_time) {
            store.borrow_mut().push((ctx.evaluation_time, v));
        }
        Ok(())
    })
}

pub fn run_sim(graph: Graph, start: EngineTime, end: EngineTime) -> Result<(), GraphError> {
    GraphExecutor::new(graph, ExecutorConfig::simulation()).run(start, end)
}
