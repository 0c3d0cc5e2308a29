//! TSD erase visibility: within the removing cycle the pre-erase value is
//! still readable (by key and by retained child handle); from the next
//! cycle it is absent.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{run_sim, t};
use tickflow_common::{EngineTime, ScalarKind, ScalarValue};
use tickflow_runtime::{GraphBuilder, NodeBody, NodeBuilder, NodeSignature, NodeType};
use tickflow_types::{MapDeltaValue, PathSeg, Value, meta};

fn int_ts() -> &'static tickflow_types::TsMeta {
    meta::ts(ScalarKind::Int)
}

#[derive(Default)]
struct Observed {
    deltas: Vec<(EngineTime, MapDeltaValue)>,
    removed_reads: Vec<(EngineTime, Option<ScalarValue>)>,
    live_keys: Vec<(EngineTime, Vec<ScalarValue>)>,
}

#[test]
fn removed_entry_readable_for_one_cycle_only() {
    let observed: Rc<RefCell<Observed>> = Rc::new(RefCell::new(Observed::default()));
    let observed_sink = observed.clone();

    let tsd = meta::tsd(ScalarKind::Str, int_ts());
    let mut wiring = GraphBuilder::new();
    let src = wiring.add_node(
        NodeBuilder::new(NodeSignature::new("dict_src", NodeType::PullSource), || {
            let mut step = 0usize;
            NodeBody::Eval(Box::new(move |ctx| {
                match step {
                    0 => {
                        ctx.schedule(common::t(1));
                    }
                    1 => {
                        ctx.output()
                            .dict_set(&"k".into(), &Value::from(9i64), ctx.engine());
                        ctx.schedule(common::t(2));
                    }
                    2 => {
                        ctx.output().dict_remove(&"k".into(), ctx.engine());
                        ctx.schedule(common::t(3));
                    }
                    _ => {
                        // A later cycle with an unrelated write, so the sink
                        // runs again after the sweep.
                        ctx.output()
                            .dict_set(&"other".into(), &Value::from(1i64), ctx.engine());
                    }
                }
                step += 1;
                Ok(())
            }))
        })
        .with_output(tsd),
    );
    let sink = wiring.add_node(NodeBuilder::sink("observe", ("ts", tsd), move |ctx| {
        let now = ctx.evaluation_time;
        let mut o = observed_sink.borrow_mut();
        o.deltas.push((now, ctx.input(0).map_delta(now)));
        if let Some(target) = ctx.input(0).bound_target() {
            let removed_read = target
                .child(PathSeg::Key("k".into()))
                .read(now, |v| v.scalar())
                .flatten();
            o.removed_reads.push((now, removed_read));
            o.live_keys.push((now, target.dict_keys()));
        }
        Ok(())
    }));
    wiring.connect(src, sink, 0);

    let graph = wiring.make_instance(vec![0], "tsd_erase", None);
    run_sim(graph, t(0), t(10)).unwrap();

    let o = observed.borrow();

    // t=1: the key arrives.
    let d1 = o.deltas.iter().find(|(at, _)| *at == t(1)).unwrap();
    assert_eq!(d1.1.added, vec![ScalarValue::from("k")]);

    // t=2: the key is removed, and the pre-erase value is still readable
    // through the retained handle within the cycle.
    let d2 = o.deltas.iter().find(|(at, _)| *at == t(2)).unwrap();
    assert_eq!(d2.1.removed, vec![ScalarValue::from("k")]);
    let r2 = o.removed_reads.iter().find(|(at, _)| *at == t(2)).unwrap();
    assert_eq!(r2.1, Some(ScalarValue::from(9i64)));
    let l2 = o.live_keys.iter().find(|(at, _)| *at == t(2)).unwrap();
    assert!(l2.1.is_empty(), "removed key is not live: {l2:?}");

    // t=3: absent entirely.
    let r3 = o.removed_reads.iter().find(|(at, _)| *at == t(3)).unwrap();
    assert_eq!(r3.1, None);
}
