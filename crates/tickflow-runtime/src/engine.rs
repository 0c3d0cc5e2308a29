//! The evaluation engine: clock ownership, stop control, life-cycle
//! observers, and the one-shot before/after evaluation notification queues.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tickflow_common::EngineTime;
use tickflow_types::EngineContext;

use crate::clock::{ClockRef, RtShared};
use crate::node::NodeSignature;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMode {
    Simulation,
    RealTime,
}

/// Identity of a graph as seen by observers.
pub struct GraphInfo<'a> {
    pub graph_id: &'a [i64],
    pub label: &'a str,
}

/// Identity of a node as seen by observers.
pub struct NodeInfo<'a> {
    pub signature: &'a NodeSignature,
    pub node_ndx: usize,
    pub graph_id: &'a [i64],
}

/// Life-cycle observer implemented by profilers and dashboards. All hooks
/// run on the engine thread and must not block.
#[allow(unused_variables)]
pub trait EvaluationLifeCycleObserver {
    fn on_before_start_graph(&self, graph: &GraphInfo<'_>) {}
    fn on_after_start_graph(&self, graph: &GraphInfo<'_>) {}
    fn on_before_start_node(&self, node: &NodeInfo<'_>) {}
    fn on_after_start_node(&self, node: &NodeInfo<'_>) {}
    fn on_before_graph_evaluation(&self, graph: &GraphInfo<'_>) {}
    fn on_after_graph_push_nodes_evaluation(&self, graph: &GraphInfo<'_>) {}
    fn on_before_node_evaluation(&self, node: &NodeInfo<'_>) {}
    fn on_after_node_evaluation(&self, node: &NodeInfo<'_>) {}
    fn on_after_graph_evaluation(&self, graph: &GraphInfo<'_>) {}
    fn on_before_stop_node(&self, node: &NodeInfo<'_>) {}
    fn on_after_stop_node(&self, node: &NodeInfo<'_>) {}
    fn on_before_stop_graph(&self, graph: &GraphInfo<'_>) {}
    fn on_after_stop_graph(&self, graph: &GraphInfo<'_>) {}
}

pub type ObserverRef = Rc<dyn EvaluationLifeCycleObserver>;

struct EngineState {
    mode: EvaluationMode,
    start_time: EngineTime,
    end_time: EngineTime,
    clock: ClockRef,
    rt_shared: Option<Arc<RtShared>>,
    observers: Vec<ObserverRef>,
    before_evaluation: Vec<Box<dyn FnOnce()>>,
    after_evaluation: Vec<Box<dyn FnOnce()>>,
}

/// Cheap cloneable handle onto the engine. Nodes receive it through their
/// evaluation context; output writes use it as their [`EngineContext`].
#[derive(Clone)]
pub struct EngineHandle {
    state: Rc<RefCell<EngineState>>,
    stop_requested: Arc<AtomicBool>,
}

impl EngineHandle {
    pub fn new(
        mode: EvaluationMode,
        clock: ClockRef,
        rt_shared: Option<Arc<RtShared>>,
        start_time: EngineTime,
        end_time: EngineTime,
        stop_requested: Arc<AtomicBool>,
    ) -> Self {
        EngineHandle {
            state: Rc::new(RefCell::new(EngineState {
                mode,
                start_time,
                end_time,
                clock,
                rt_shared,
                observers: Vec::new(),
                before_evaluation: Vec::new(),
                after_evaluation: Vec::new(),
            })),
            stop_requested,
        }
    }

    pub fn mode(&self) -> EvaluationMode {
        self.state.borrow().mode
    }

    pub fn start_time(&self) -> EngineTime {
        self.state.borrow().start_time
    }

    pub fn end_time(&self) -> EngineTime {
        self.state.borrow().end_time
    }

    pub fn clock(&self) -> ClockRef {
        self.state.borrow().clock.clone()
    }

    pub fn rt_shared(&self) -> Option<Arc<RtShared>> {
        self.state.borrow().rt_shared.clone()
    }

    pub fn current_time(&self) -> EngineTime {
        let clock = self.clock();
        let time = clock.borrow().evaluation_time();
        time
    }

    /// Cross-thread stop control: observed between cycles; wakes a blocked
    /// real-time wait.
    pub fn stop_flag(&self) -> StopHandle {
        StopHandle {
            flag: self.stop_requested.clone(),
            rt_shared: self.state.borrow().rt_shared.clone(),
        }
    }

    pub fn request_engine_stop(&self) {
        self.stop_flag().request_stop();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub fn add_life_cycle_observer(&self, observer: ObserverRef) {
        self.state.borrow_mut().observers.push(observer);
    }

    pub fn remove_life_cycle_observer(&self, observer: &ObserverRef) {
        self.state
            .borrow_mut()
            .observers
            .retain(|o| !Rc::ptr_eq(o, observer));
    }

    /// One-shot callback run at the start of the next cycle.
    pub fn add_before_evaluation_notification(&self, f: Box<dyn FnOnce()>) {
        self.state.borrow_mut().before_evaluation.push(f);
    }

    /// One-shot callback run after the current cycle's evaluation.
    pub fn add_after_evaluation_notification(&self, f: Box<dyn FnOnce()>) {
        self.state.borrow_mut().after_evaluation.push(f);
    }

    pub fn notify_before_evaluation(&self) {
        let pending: Vec<Box<dyn FnOnce()>> =
            std::mem::take(&mut self.state.borrow_mut().before_evaluation);
        for f in pending {
            f();
        }
    }

    pub fn notify_after_evaluation(&self) {
        // Drain repeatedly: transient resets queued during the drain (e.g.
        // by a cleanup writing an output) still run this cycle.
        loop {
            let pending: Vec<Box<dyn FnOnce()>> =
                std::mem::take(&mut self.state.borrow_mut().after_evaluation);
            if pending.is_empty() {
                break;
            }
            for f in pending {
                f();
            }
        }
    }

    pub fn advance_engine_time(&self) {
        let clock = self.clock();
        clock.borrow_mut().advance_to_next_scheduled_time();
    }

    fn observers(&self) -> Vec<ObserverRef> {
        self.state.borrow().observers.clone()
    }

    pub fn notify_before_start_graph(&self, graph: &GraphInfo<'_>) {
        for o in self.observers() {
            o.on_before_start_graph(graph);
        }
    }

    pub fn notify_after_start_graph(&self, graph: &GraphInfo<'_>) {
        for o in self.observers() {
            o.on_after_start_graph(graph);
        }
    }

    pub fn notify_before_start_node(&self, node: &NodeInfo<'_>) {
        for o in self.observers() {
            o.on_before_start_node(node);
        }
    }

    pub fn notify_after_start_node(&self, node: &NodeInfo<'_>) {
        for o in self.observers() {
            o.on_after_start_node(node);
        }
    }

    pub fn notify_before_graph_evaluation(&self, graph: &GraphInfo<'_>) {
        for o in self.observers() {
            o.on_before_graph_evaluation(graph);
        }
    }

    pub fn notify_after_graph_push_nodes_evaluation(&self, graph: &GraphInfo<'_>) {
        for o in self.observers() {
            o.on_after_graph_push_nodes_evaluation(graph);
        }
    }

    pub fn notify_before_node_evaluation(&self, node: &NodeInfo<'_>) {
        for o in self.observers() {
            o.on_before_node_evaluation(node);
        }
    }

    pub fn notify_after_node_evaluation(&self, node: &NodeInfo<'_>) {
        for o in self.observers() {
            o.on_after_node_evaluation(node);
        }
    }

    pub fn notify_after_graph_evaluation(&self, graph: &GraphInfo<'_>) {
        for o in self.observers() {
            o.on_after_graph_evaluation(graph);
        }
    }

    pub fn notify_before_stop_node(&self, node: &NodeInfo<'_>) {
        for o in self.observers() {
            o.on_before_stop_node(node);
        }
    }

    pub fn notify_after_stop_node(&self, node: &NodeInfo<'_>) {
        for o in self.observers() {
            o.on_after_stop_node(node);
        }
    }

    pub fn notify_before_stop_graph(&self, graph: &GraphInfo<'_>) {
        for o in self.observers() {
            o.on_before_stop_graph(graph);
        }
    }

    pub fn notify_after_stop_graph(&self, graph: &GraphInfo<'_>) {
        for o in self.observers() {
            o.on_after_stop_graph(graph);
        }
    }
}

impl EngineContext for EngineHandle {
    fn evaluation_time(&self) -> EngineTime {
        self.current_time()
    }

    fn engine_start_time(&self) -> EngineTime {
        self.start_time()
    }

    fn add_after_evaluation(&self, f: Box<dyn FnOnce()>) {
        self.add_after_evaluation_notification(f);
    }
}

/// Cross-thread stop request handle.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    rt_shared: Option<Arc<RtShared>>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Release);
        if let Some(rt) = &self.rt_shared {
            rt.signal_wake();
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
