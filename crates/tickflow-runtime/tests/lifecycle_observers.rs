//! Life-cycle notification ordering: the observer hooks fire in the
//! documented order around start, evaluation, and stop.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{collecting_sink, run_sim, scheduled_source, t, trace};
use tickflow_common::ScalarKind;
use tickflow_runtime::{
    EvaluationLifeCycleObserver, ExecutorConfig, GraphBuilder, GraphExecutor, GraphInfo, NodeInfo,
};
use tickflow_types::meta;

#[derive(Default)]
struct HookRecorder {
    events: RefCell<Vec<String>>,
}

impl HookRecorder {
    fn push(&self, event: &str) {
        self.events.borrow_mut().push(event.to_string());
    }
}

impl EvaluationLifeCycleObserver for HookRecorder {
    fn on_before_start_graph(&self, _g: &GraphInfo<'_>) {
        self.push("before_start_graph");
    }
    fn on_after_start_graph(&self, _g: &GraphInfo<'_>) {
        self.push("after_start_graph");
    }
    fn on_before_start_node(&self, _n: &NodeInfo<'_>) {
        self.push("before_start_node");
    }
    fn on_after_start_node(&self, _n: &NodeInfo<'_>) {
        self.push("after_start_node");
    }
    fn on_before_graph_evaluation(&self, _g: &GraphInfo<'_>) {
        self.push("before_graph_evaluation");
    }
    fn on_before_node_evaluation(&self, _n: &NodeInfo<'_>) {
        self.push("before_node_evaluation");
    }
    fn on_after_node_evaluation(&self, _n: &NodeInfo<'_>) {
        self.push("after_node_evaluation");
    }
    fn on_after_graph_evaluation(&self, _g: &GraphInfo<'_>) {
        self.push("after_graph_evaluation");
    }
    fn on_before_stop_node(&self, _n: &NodeInfo<'_>) {
        self.push("before_stop_node");
    }
    fn on_after_stop_node(&self, _n: &NodeInfo<'_>) {
        self.push("after_stop_node");
    }
    fn on_before_stop_graph(&self, _g: &GraphInfo<'_>) {
        self.push("before_stop_graph");
    }
    fn on_after_stop_graph(&self, _g: &GraphInfo<'_>) {
        self.push("after_stop_graph");
    }
}

#[test]
fn hooks_fire_in_documented_order() {
    let collected = trace();
    let int_ts = meta::ts(ScalarKind::Int);
    let mut wiring = GraphBuilder::new();
    let src = wiring.add_node(scheduled_source("ticks", int_ts, vec![(t(1), 1i64.into())]));
    let sink = wiring.add_node(collecting_sink("observe", int_ts, collected));
    wiring.connect(src, sink, 0);

    let graph = wiring.make_instance(vec![0], "hooks", None);
    let recorder = Rc::new(HookRecorder::default());
    GraphExecutor::new(
        graph,
        ExecutorConfig::simulation().with_observer(recorder.clone()),
    )
    .run(t(0), t(5))
    .unwrap();

    let events = recorder.events.borrow();

    // Start block: graph brackets every node pair.
    assert_eq!(events[0], "before_start_graph");
    assert_eq!(events[1], "before_start_node");
    assert_eq!(events[2], "after_start_node");
    let after_start = events
        .iter()
        .position(|e| e == "after_start_graph")
        .expect("graph start completes");
    assert!(
        events[..after_start]
            .iter()
            .skip(1)
            .all(|e| e.ends_with("start_node")),
        "only node-start hooks inside the graph-start bracket: {events:?}"
    );

    // Node-evaluation pairs nest inside graph-evaluation brackets.
    let mut depth = 0i32;
    for event in events.iter() {
        match event.as_str() {
            "before_graph_evaluation" => depth += 1,
            "after_graph_evaluation" => depth -= 1,
            "before_node_evaluation" | "after_node_evaluation" => {
                assert!(depth > 0, "node hooks outside a graph evaluation: {events:?}")
            }
            _ => {}
        }
        assert!(depth >= 0);
    }
    assert_eq!(depth, 0);

    // Stop block mirrors start and comes last.
    let before_stop = events
        .iter()
        .position(|e| e == "before_stop_graph")
        .expect("graph stop runs");
    assert!(events[before_stop..].iter().any(|e| e == "before_stop_node"));
    assert_eq!(events.last().map(String::as_str), Some("after_stop_graph"));
}

#[test]
fn one_shot_evaluation_notifications_fire_once() {
    let collected = trace();
    let int_ts = meta::ts(ScalarKind::Int);
    let mut wiring = GraphBuilder::new();
    let src = wiring.add_node(scheduled_source(
        "ticks",
        int_ts,
        vec![(t(1), 1i64.into()), (t(2), 2i64.into())],
    ));
    let fired: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
    let fired_in_node = fired.clone();
    let probe = wiring.add_node(tickflow_runtime::NodeBuilder::sink(
        "probe",
        ("ts", int_ts),
        move |ctx| {
            let fired = fired_in_node.clone();
            ctx.engine()
                .add_after_evaluation_notification(Box::new(move || {
                    fired.borrow_mut().push("after");
                }));
            Ok(())
        },
    ));
    wiring.connect(src, probe, 0);
    let _ = collected;

    let graph = wiring.make_instance(vec![0], "one_shot", None);
    run_sim(graph, t(0), t(5)).unwrap();

    // One registration per evaluated cycle, each fired exactly once.
    assert_eq!(*fired.borrow(), vec!["after", "after"]);
}
