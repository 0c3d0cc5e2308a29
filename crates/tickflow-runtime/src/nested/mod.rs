//! Nested-graph nodes: nodes whose evaluation drives embedded sub-graphs.
//!
//! All six share the same skeleton — they own sub-graphs, run them on
//! [`crate::clock::NestedClock`]s that report wake-ups back into the outer
//! schedule, and manage the sub-graph life cycles from their own dispatch
//! hooks.

pub mod component;
pub mod map;
pub mod mesh;
pub mod reduce;
pub mod switch;
pub mod try_except;

pub use component::ComponentNode;
pub use map::MapNode;
pub use mesh::MeshNode;
pub use reduce::ReduceNode;
pub use switch::SwitchNode;
pub use try_except::TryExceptNode;

use std::cell::RefCell;
use std::rc::Rc;

use tickflow_common::EngineTime;

use crate::clock::{ClockRef, NestedClock};
use crate::graph::GraphState;

/// The plain nested scheduling hook: wake-ups from inside the sub-graph
/// schedule the owning nested node in the outer graph.
pub(crate) fn schedule_hook(
    outer_state: &Rc<RefCell<GraphState>>,
    node_ndx: usize,
) -> Box<dyn Fn(EngineTime)> {
    let weak = Rc::downgrade(outer_state);
    Box::new(move |et| {
        if let Some(state) = weak.upgrade() {
            state.borrow_mut().schedule_node(node_ndx, et, false);
        }
    })
}

/// Build a nested clock over the outer graph's clock.
pub(crate) fn nested_clock(
    outer_state: &Rc<RefCell<GraphState>>,
    on_update: Box<dyn Fn(EngineTime)>,
) -> Rc<RefCell<NestedClock>> {
    let outer: ClockRef = outer_state
        .borrow()
        .clock()
        .expect("nested graphs require the outer engine to be attached");
    Rc::new(RefCell::new(NestedClock::new(outer, on_update)))
}
