//! Mesh node: sub-graphs request further keys; requested graphs live until
//! the last requester releases them.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{run_sim, t};
use rustc_hash::{FxHashMap, FxHashSet};
use tickflow_common::{EngineTime, ScalarKind, ScalarValue};
use tickflow_runtime::{
    GraphBuilder, MapNode, MeshNode, NodeBody, NodeBuilder, NodeSignature, NodeType,
};
use tickflow_types::{Value, meta};

fn int_ts() -> &'static tickflow_types::TsMeta {
    meta::ts(ScalarKind::Int)
}

fn str_ts() -> &'static tickflow_types::TsMeta {
    meta::ts(ScalarKind::Str)
}

/// Mesh sub-graph: the key stub republishes its key; `a` requests `b`; the
/// out stub writes a marker value into the mesh output.
fn mesh_subgraph() -> Rc<GraphBuilder> {
    let mut b = GraphBuilder::new();
    let key_src = b.add_node(NodeBuilder::new(
        NodeSignature::new("key_src", NodeType::Compute),
        || {
            NodeBody::Eval(Box::new(|ctx| {
                if let Some(key) = ctx.scalar("key") {
                    ctx.output().set_scalar(key.clone(), ctx.engine());
                }
                Ok(())
            }))
        },
    )
    .with_output(str_ts()));
    let requests = b.add_node(NodeBuilder::compute(
        "requests",
        &[("key", str_ts())],
        meta::tss(ScalarKind::Str),
        |ctx| {
            if ctx.input(0).scalar().and_then(|k| k.as_str().map(|s| s == "a")) == Some(true) {
                ctx.output().set_add("b".into(), ctx.engine());
            }
            Ok(())
        },
    ));
    let out = b.add_node(NodeBuilder::compute("out", &[("key", str_ts())], int_ts(), |ctx| {
        if ctx.input(0).scalar().is_some() {
            ctx.output().set_scalar(1i64.into(), ctx.engine());
        }
        Ok(())
    }));
    b.connect(key_src, requests, 0);
    b.connect(key_src, out, 0);
    Rc::new(b)
}

fn mesh_builder() -> NodeBuilder {
    let sub = mesh_subgraph();
    let mut input_node_ids = FxHashMap::default();
    input_node_ids.insert("key".to_string(), 0usize);
    NodeBuilder::new(
        NodeSignature::new("mesh", NodeType::Compute).with_args(&["__keys__"]),
        move || {
            let map = MapNode::new(
                sub.clone(),
                input_node_ids.clone(),
                Some(2),
                FxHashSet::default(),
                Some("key".to_string()),
                "__keys__",
            );
            NodeBody::Mesh(Box::new(MeshNode::new(map, Some(1), None, "__keys__")))
        },
    )
    .with_input("__keys__", meta::tss(ScalarKind::Str))
    .with_output(meta::tsd(ScalarKind::Str, int_ts()))
}

enum KeyStep {
    Add(&'static str),
    Remove(&'static str),
}

fn key_source(events: Vec<(EngineTime, Vec<KeyStep>)>) -> NodeBuilder {
    let events = Rc::new(events);
    NodeBuilder::new(NodeSignature::new("keys", NodeType::PullSource), move || {
        let events = events.clone();
        let mut idx = 0usize;
        NodeBody::Eval(Box::new(move |ctx| {
            while idx < events.len() && events[idx].0 <= ctx.evaluation_time {
                if events[idx].0 == ctx.evaluation_time {
                    for step in &events[idx].1 {
                        match step {
                            KeyStep::Add(k) => ctx.output().set_add((*k).into(), ctx.engine()),
                            KeyStep::Remove(k) => {
                                ctx.output().set_remove((*k).into(), ctx.engine())
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
    .with_output(meta::tss(ScalarKind::Str))
}

#[test]
fn requested_keys_are_instantiated_and_released() {
    let snapshots: Rc<RefCell<Vec<(EngineTime, Vec<ScalarValue>)>>> =
        Rc::new(RefCell::new(Vec::new()));
    let snapshots_sink = snapshots.clone();

    let mut wiring = GraphBuilder::new();
    let keys = wiring.add_node(key_source(vec![
        (t(1), vec![KeyStep::Add("a")]),
        (t(3), vec![KeyStep::Remove("a")]),
    ]));
    let mesh = wiring.add_node(mesh_builder());
    let sink = wiring.add_node(NodeBuilder::sink(
        "observe",
        ("ts", meta::tsd(ScalarKind::Str, int_ts())),
        move |ctx| {
            if let Some(Value::Map(entries)) =
                ctx.input(0).snapshot(ctx.evaluation_time, ctx.start_time)
            {
                snapshots_sink
                    .borrow_mut()
                    .push((ctx.evaluation_time, entries.into_iter().map(|(k, _)| k).collect()));
            }
            Ok(())
        },
    ));
    wiring.connect(keys, mesh, 0);
    wiring.connect(mesh, sink, 0);

    let graph = wiring.make_instance(vec![0], "mesh_requests", None);
    run_sim(graph, t(0), t(10)).unwrap();

    let got = snapshots.borrow();
    // `a` arrives at t=1 and immediately requests `b`: both keys live.
    let last_early = got
        .iter()
        .filter(|(at, _)| *at < t(3))
        .next_back()
        .expect("mesh produced output before removal");
    assert!(last_early.1.contains(&ScalarValue::from("a")), "{got:?}");
    assert!(last_early.1.contains(&ScalarValue::from("b")), "{got:?}");

    // Removing `a` releases its request: `b` goes with it.
    let after = got.iter().filter(|(at, _)| *at >= t(3)).next_back();
    if let Some((_, keys)) = after {
        assert!(keys.is_empty(), "{got:?}");
    }
}
