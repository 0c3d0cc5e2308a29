//! TSW behaviour through the engine: fixed windows fill, roll, and report
//! the displaced value for exactly one cycle; duration windows become valid
//! by elapsed time.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{run_sim, scheduled_source, t};
use tickflow_common::{EngineTime, EngineTimeDelta, ScalarKind, ScalarValue};
use tickflow_runtime::{GraphBuilder, NodeBuilder};
use tickflow_types::meta;

#[derive(Default)]
struct WindowObservation {
    all_valid_at: Vec<EngineTime>,
    values: Vec<(EngineTime, Vec<ScalarValue>)>,
    removed: Vec<(EngineTime, ScalarValue)>,
}

type Observations = Rc<RefCell<WindowObservation>>;

#[test]
fn fixed_window_fills_rolls_and_reports_removed() {
    let obs: Observations = Rc::new(RefCell::new(WindowObservation::default()));
    let obs_sink = obs.clone();

    let window_meta = meta::tsw(ScalarKind::Int, 3, 2);
    let mut wiring = GraphBuilder::new();
    let src = wiring.add_node(scheduled_source(
        "ticks",
        window_meta,
        (1..=5).map(|i| (t(i), (i).into())).collect(),
    ));
    let sink = wiring.add_node(NodeBuilder::sink("observe", ("ts", window_meta), move |ctx| {
        let mut o = obs_sink.borrow_mut();
        let now = ctx.evaluation_time;
        if ctx.input(0).all_valid(now, ctx.start_time) {
            o.all_valid_at.push(now);
        }
        if let Some(values) = ctx.input(0).window_value(now, ctx.start_time) {
            o.values.push((now, values));
        }
        if let Some(removed) = ctx.input(0).window_removed_value() {
            o.removed.push((now, removed));
        }
        Ok(())
    }));
    wiring.connect(src, sink, 0);

    let graph = wiring.make_instance(vec![0], "fixed_window", None);
    run_sim(graph, t(0), t(10)).unwrap();

    let o = obs.borrow();
    // all_valid turns on at t=2 (min fill of 2) and stays on.
    assert_eq!(o.all_valid_at.first(), Some(&t(2)));

    // Below the minimum the value reads absent; then the rolling contents.
    let values: Vec<(EngineTime, Vec<i64>)> = o
        .values
        .iter()
        .map(|(at, vs)| (*at, vs.iter().filter_map(|v| v.as_int()).collect()))
        .collect();
    assert_eq!(
        values,
        vec![
            (t(2), vec![1, 2]),
            (t(3), vec![1, 2, 3]),
            (t(4), vec![2, 3, 4]),
            (t(5), vec![3, 4, 5]),
        ]
    );

    // The displaced value is visible in the cycle that displaced it.
    assert_eq!(
        o.removed,
        vec![(t(4), 1i64.into()), (t(5), 2i64.into())]
    );
}

#[test]
fn duration_window_becomes_valid_by_elapsed_time() {
    let obs: Observations = Rc::new(RefCell::new(WindowObservation::default()));
    let obs_sink = obs.clone();

    let window_meta = meta::tsw_duration(
        ScalarKind::Int,
        EngineTimeDelta::from_secs(10),
        EngineTimeDelta::from_secs(3),
    );
    let mut wiring = GraphBuilder::new();
    let src = wiring.add_node(scheduled_source(
        "ticks",
        window_meta,
        (1..=5).map(|i| (t(i), (i).into())).collect(),
    ));
    let sink = wiring.add_node(NodeBuilder::sink("observe", ("ts", window_meta), move |ctx| {
        let mut o = obs_sink.borrow_mut();
        let now = ctx.evaluation_time;
        if ctx.input(0).all_valid(now, ctx.start_time) {
            o.all_valid_at.push(now);
        }
        if let Some(values) = ctx.input(0).window_value(now, ctx.start_time) {
            o.values.push((now, values));
        }
        Ok(())
    }));
    wiring.connect(src, sink, 0);

    let graph = wiring.make_instance(vec![0], "duration_window", None);
    run_sim(graph, t(0), t(10)).unwrap();

    let o = obs.borrow();
    // min_size = 3s from a start of t=0: valid precisely from t=3 onward.
    assert_eq!(o.all_valid_at.first(), Some(&t(3)));
    assert!(o.values.iter().all(|(at, _)| *at >= t(3)));
    let last = o.values.last().expect("window observed");
    let ints: Vec<i64> = last.1.iter().filter_map(|v| v.as_int()).collect();
    assert_eq!(ints, vec![1, 2, 3, 4, 5]);
}
