//! Keyed map node: per-key sub-graphs driven by a TSS key set, multiplexed
//! TSD inputs, per-key outputs, and clean teardown on key removal.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{run_sim, t};
use tickflow_common::{EngineTime, NodeError, ScalarKind, ScalarValue};
use tickflow_runtime::{
    GraphBuilder, MapNode, NodeBody, NodeBuilder, NodeSignature, NodeType,
};
use tickflow_types::{Value, meta};

use rustc_hash::{FxHashMap, FxHashSet};

fn int_ts() -> &'static tickflow_types::TsMeta {
    meta::ts(ScalarKind::Int)
}

/// Sub-graph: read the per-key value, multiply by ten, write to the per-key
/// output slot.
fn times_ten_subgraph() -> Rc<GraphBuilder> {
    let mut b = GraphBuilder::new();
    let calc = b.add_node(NodeBuilder::compute(
        "times_ten",
        &[("ts", int_ts())],
        int_ts(),
        |ctx| {
            if let Some(v) = ctx.input(0).scalar().and_then(|v| v.as_int()) {
                ctx.output().set_scalar((v * 10).into(), ctx.engine());
            }
            Ok(())
        },
    ));
    let out = b.add_node(NodeBuilder::compute("out", &[("ts", int_ts())], int_ts(), |ctx| {
        if let Some(v) = ctx.input(0).scalar() {
            ctx.output().set_scalar(v, ctx.engine());
        }
        Ok(())
    }));
    b.connect(calc, out, 0);
    Rc::new(b)
}

fn map_node_builder(capture_exception: bool) -> NodeBuilder {
    let sub = times_ten_subgraph();
    let mut input_node_ids = FxHashMap::default();
    input_node_ids.insert("ts".to_string(), 0usize);
    let mut multiplexed = FxHashSet::default();
    multiplexed.insert("ts".to_string());
    NodeBuilder::new(
        NodeSignature::new("keyed_times_ten", NodeType::Compute)
            .with_args(&["__keys__", "ts"])
            .with_capture_exception(capture_exception),
        move || {
            NodeBody::Map(Box::new(MapNode::new(
                sub.clone(),
                input_node_ids.clone(),
                Some(1),
                multiplexed.clone(),
                None,
                "__keys__",
            )))
        },
    )
    .with_input("__keys__", meta::tss(ScalarKind::Str))
    .with_input("ts", meta::tsd(ScalarKind::Str, int_ts()))
    .with_output(meta::tsd(ScalarKind::Str, int_ts()))
    .with_error_output(meta::tsd(ScalarKind::Str, meta::ts(ScalarKind::Error)))
}

enum Step {
    AddKey(&'static str),
    RemoveKey(&'static str),
    SetValue(&'static str, i64),
}

fn driver(events: Vec<(EngineTime, Vec<Step>)>) -> (NodeBuilder, NodeBuilder) {
    let events = Rc::new(events);
    let key_events = events.clone();
    let keys = NodeBuilder::new(NodeSignature::new("keys", NodeType::PullSource), move || {
        let events = key_events.clone();
        let mut idx = 0usize;
        NodeBody::Eval(Box::new(move |ctx| {
            while idx < events.len() && events[idx].0 <= ctx.evaluation_time {
                if events[idx].0 == ctx.evaluation_time {
                    for step in &events[idx].1 {
                        match step {
                            Step::AddKey(k) => ctx.output().set_add((*k).into(), ctx.engine()),
                            Step::RemoveKey(k) => {
                                ctx.output().set_remove((*k).into(), ctx.engine())
                            }
                            Step::SetValue(..) => {}
                        }
                    }
                }
                idx += 1;
            }
            if idx < events.len() {
                ctx.schedule(events[idx].0);
            }
            Ok(())
        }))
    })
    .with_output(meta::tss(ScalarKind::Str));

    let value_events = events;
    let values = NodeBuilder::new(NodeSignature::new("values", NodeType::PullSource), move || {
        let events = value_events.clone();
        let mut idx = 0usize;
        NodeBody::Eval(Box::new(move |ctx| {
            while idx < events.len() && events[idx].0 <= ctx.evaluation_time {
                if events[idx].0 == ctx.evaluation_time {
                    for step in &events[idx].1 {
                        match step {
                            Step::SetValue(k, v) => ctx.output().dict_set(
                                &ScalarValue::from(*k),
                                &Value::from(*v),
                                ctx.engine(),
                            ),
                            Step::AddKey(_) => {}
                            Step::RemoveKey(k) => {
                                ctx.output().dict_remove(&ScalarValue::from(*k), ctx.engine());
                            }
                        }
                    }
                }
                idx += 1;
            }
            if idx < events.len() {
                ctx.schedule(events[idx].0);
            }
            Ok(())
        }))
    })
    .with_output(meta::tsd(ScalarKind::Str, int_ts()));

    (keys, values)
}

type MapTrace = Rc<RefCell<Vec<(EngineTime, Value)>>>;

#[test]
fn per_key_subgraphs_multiply_and_tear_down() {
    let collected: MapTrace = Rc::new(RefCell::new(Vec::new()));
    let collected_sink = collected.clone();

    let (keys, values) = driver(vec![
        (
            t(1),
            vec![
                Step::AddKey("a"),
                Step::AddKey("b"),
                Step::SetValue("a", 1),
                Step::SetValue("b", 2),
            ],
        ),
        (t(2), vec![Step::SetValue("a", 7)]),
        (t(3), vec![Step::RemoveKey("a")]),
    ]);

    let mut wiring = GraphBuilder::new();
    let keys_ndx = wiring.add_node(keys);
    let values_ndx = wiring.add_node(values);
    let map_ndx = wiring.add_node(map_node_builder(false));
    let sink = wiring.add_node(NodeBuilder::sink(
        "observe",
        ("ts", meta::tsd(ScalarKind::Str, int_ts())),
        move |ctx| {
            if let Some(v) = ctx.input(0).snapshot(ctx.evaluation_time, ctx.start_time) {
                collected_sink.borrow_mut().push((ctx.evaluation_time, v));
            }
            Ok(())
        },
    ));
    wiring.connect(keys_ndx, map_ndx, 0);
    wiring.connect(values_ndx, map_ndx, 1);
    wiring.connect(map_ndx, sink, 0);

    let graph = wiring.make_instance(vec![0], "map_keys", None);
    run_sim(graph, t(0), t(10)).unwrap();

    let got = collected.borrow();
    let at = |time: EngineTime| -> Option<Value> {
        got.iter()
            .rev()
            .find(|(when, _)| *when == time)
            .map(|(_, v)| v.clone())
    };

    assert_eq!(
        at(t(1)),
        Some(Value::Map(vec![
            ("a".into(), Value::from(10i64)),
            ("b".into(), Value::from(20i64)),
        ]))
    );
    assert_eq!(
        at(t(2)),
        Some(Value::Map(vec![
            ("a".into(), Value::from(70i64)),
            ("b".into(), Value::from(20i64)),
        ]))
    );
    // After the key removal only b remains.
    assert_eq!(
        at(t(3)),
        Some(Value::Map(vec![("b".into(), Value::from(20i64))]))
    );
}

#[test]
fn capture_exception_writes_per_key_errors() {
    // A sub-graph that fails for one key only.
    let mut b = GraphBuilder::new();
    b.add_node(NodeBuilder::compute(
        "maybe_fail",
        &[("ts", int_ts())],
        int_ts(),
        |ctx| {
            let v = ctx.input(0).scalar().and_then(|v| v.as_int()).unwrap_or(0);
            if v < 0 {
                return Err(NodeError::message("negative input"));
            }
            ctx.output().set_scalar(v.into(), ctx.engine());
            Ok(())
        },
    ));
    let sub = Rc::new(b);

    let mut input_node_ids = FxHashMap::default();
    input_node_ids.insert("ts".to_string(), 0usize);
    let mut multiplexed = FxHashSet::default();
    multiplexed.insert("ts".to_string());
    let map_builder = NodeBuilder::new(
        NodeSignature::new("guarded", NodeType::Compute)
            .with_args(&["__keys__", "ts"])
            .with_capture_exception(true),
        move || {
            NodeBody::Map(Box::new(MapNode::new(
                sub.clone(),
                input_node_ids.clone(),
                Some(0),
                multiplexed.clone(),
                None,
                "__keys__",
            )))
        },
    )
    .with_input("__keys__", meta::tss(ScalarKind::Str))
    .with_input("ts", meta::tsd(ScalarKind::Str, int_ts()))
    .with_output(meta::tsd(ScalarKind::Str, int_ts()))
    .with_error_output(meta::tsd(ScalarKind::Str, meta::ts(ScalarKind::Error)));

    let (keys, values) = driver(vec![(
        t(1),
        vec![
            Step::AddKey("good"),
            Step::AddKey("bad"),
            Step::SetValue("good", 5),
            Step::SetValue("bad", -5),
        ],
    )]);

    let errors: Rc<RefCell<Vec<ScalarValue>>> = Rc::new(RefCell::new(Vec::new()));
    let errors_sink = errors.clone();

    let mut wiring = GraphBuilder::new();
    let keys_ndx = wiring.add_node(keys);
    let values_ndx = wiring.add_node(values);
    let map_ndx = wiring.add_node(map_builder);
    wiring.connect(keys_ndx, map_ndx, 0);
    wiring.connect(values_ndx, map_ndx, 1);

    let mut graph = wiring.make_instance(vec![0], "map_errors", None);
    // Observe the error output directly.
    let err_out = graph.node(map_ndx).error_output.clone().unwrap();
    let observer = NodeBuilder::sink(
        "err_observe",
        ("err", meta::tsd(ScalarKind::Str, meta::ts(ScalarKind::Error))),
        move |ctx| {
            for key in ctx.input(0).dict_keys() {
                errors_sink.borrow_mut().push(key);
            }
            Ok(())
        },
    );
    let mut ext = GraphBuilder::new();
    ext.add_node(observer);
    graph.extend_graph(&ext, false).unwrap();
    let sink_ndx = graph.node_count() - 1;
    graph.bind_input(sink_ndx, 0, err_out, tickflow_common::MIN_DT);

    run_sim(graph, t(0), t(10)).unwrap();

    let errs = errors.borrow();
    assert!(errs.contains(&ScalarValue::from("bad")));
    assert!(!errs.contains(&ScalarValue::from("good")));
}
