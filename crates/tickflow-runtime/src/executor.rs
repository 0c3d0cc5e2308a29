//! The graph executor: owns the engine, picks the clock by mode, and drives
//! the outer loop from `start_time` to `end_time`.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tickflow_common::{EngineTime, GraphError, NodeError};
use tracing::info;

use crate::clock::{ClockRef, RealTimeClock, SimulationClock};
use crate::engine::{EngineHandle, EvaluationMode, ObserverRef, StopHandle};
use crate::graph::Graph;

/// Engine construction options: the mode picks the clock, everything else
/// is identical between the two.
pub struct ExecutorConfig {
    pub mode: EvaluationMode,
    pub observers: Vec<ObserverRef>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            mode: EvaluationMode::Simulation,
            observers: Vec::new(),
        }
    }
}

impl ExecutorConfig {
    pub fn simulation() -> Self {
        ExecutorConfig::default()
    }

    pub fn real_time() -> Self {
        ExecutorConfig {
            mode: EvaluationMode::RealTime,
            ..ExecutorConfig::default()
        }
    }

    pub fn with_observer(mut self, observer: ObserverRef) -> Self {
        self.observers.push(observer);
        self
    }
}

pub struct GraphExecutor {
    graph: Graph,
    mode: EvaluationMode,
    observers: Vec<ObserverRef>,
    stop_requested: Arc<AtomicBool>,
    engine: Option<EngineHandle>,
}

impl GraphExecutor {
    pub fn new(graph: Graph, config: ExecutorConfig) -> Self {
        GraphExecutor {
            graph,
            mode: config.mode,
            observers: config.observers,
            stop_requested: Arc::new(AtomicBool::new(false)),
            engine: None,
        }
    }

    pub fn run_mode(&self) -> EvaluationMode {
        self.mode
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn add_life_cycle_observer(&mut self, observer: ObserverRef) {
        match &self.engine {
            Some(engine) => engine.add_life_cycle_observer(observer),
            None => self.observers.push(observer),
        }
    }

    pub fn remove_life_cycle_observer(&mut self, observer: &ObserverRef) {
        if let Some(engine) = &self.engine {
            engine.remove_life_cycle_observer(observer);
        }
        self.observers.retain(|o| !Rc::ptr_eq(o, observer));
    }

    /// Request a clean stop: observed between cycles, wakes a blocked
    /// real-time wait. Usable before or during `run`, from any thread once
    /// taken as a [`StopHandle`].
    pub fn request_engine_stop(&self) {
        match &self.engine {
            Some(engine) => engine.request_engine_stop(),
            None => self.stop_requested.store(true, std::sync::atomic::Ordering::Release),
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Cross-thread stop handle (valid after `run` has installed the
    /// engine; before that, fall back to `request_engine_stop`).
    pub fn stop_handle(&self) -> Option<StopHandle> {
        self.engine.as_ref().map(|e| e.stop_flag())
    }

    pub fn engine(&self) -> Option<EngineHandle> {
        self.engine.clone()
    }

    /// One-shot callback fired at the start of the next cycle. Valid once
    /// `run` has installed the engine.
    pub fn add_before_evaluation_notification(&self, f: Box<dyn FnOnce()>) {
        self.engine
            .as_ref()
            .expect("notifications attach once run() has installed the engine")
            .add_before_evaluation_notification(f);
    }

    /// One-shot callback fired after the current cycle's evaluation.
    pub fn add_after_evaluation_notification(&self, f: Box<dyn FnOnce()>) {
        self.engine
            .as_ref()
            .expect("notifications attach once run() has installed the engine")
            .add_after_evaluation_notification(f);
    }

    /// Drive the graph from `start_time` until the clock reaches
    /// `end_time`, a stop is requested, or a node fails. Stop runs on every
    /// exit path; the graph is disposed before returning.
    pub fn run(&mut self, start_time: EngineTime, end_time: EngineTime) -> Result<(), GraphError> {
        assert!(
            end_time > start_time,
            "end time must be after the start time (start={start_time}, end={end_time})"
        );
        info!(
            graph = %self.graph.label(),
            %start_time,
            %end_time,
            mode = ?self.mode,
            "running graph"
        );

        let (clock, rt_shared): (ClockRef, _) = match self.mode {
            EvaluationMode::Simulation => (
                Rc::new(RefCell::new(SimulationClock::new(start_time))) as ClockRef,
                None,
            ),
            EvaluationMode::RealTime => {
                let rt = RealTimeClock::new(start_time);
                let shared = rt.shared();
                (Rc::new(RefCell::new(rt)) as ClockRef, Some(shared))
            }
        };

        let engine = EngineHandle::new(
            self.mode,
            clock.clone(),
            rt_shared,
            start_time,
            end_time,
            self.stop_requested.clone(),
        );
        for observer in &self.observers {
            engine.add_life_cycle_observer(observer.clone());
        }
        self.graph.set_evaluation_engine(engine.clone(), clock.clone());
        self.engine = Some(engine.clone());

        self.graph.initialise();

        let run_result: Result<(), NodeError> = (|| {
            self.graph.start()?;
            while clock.borrow().evaluation_time() < end_time && !engine.is_stop_requested() {
                engine.notify_before_evaluation();
                self.graph.evaluate_graph()?;
                engine.notify_after_evaluation();
                engine.advance_engine_time();
            }
            Ok(())
        })();

        // Stop is guaranteed on every exit path, normal or failed.
        let stop_result = if self.graph.is_started() {
            self.graph.stop()
        } else {
            Ok(())
        };
        self.graph.dispose();

        run_result.map_err(GraphError::from)?;
        stop_result.map_err(GraphError::from)
    }
}
