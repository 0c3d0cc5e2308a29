//! Evaluation clocks.
//!
//! The read surface ([`EvaluationClock`]) is what nodes see; the engine
//! surface ([`EngineClock`]) adds the mutators the evaluation loop drives.
//! Three implementations: the simulation clock (virtual time, jumps to the
//! next scheduled event), the real-time clock (wall time, condition-variable
//! waits, alarms, push wake-ups), and the nested clock that sub-graphs of
//! nested nodes run on.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tickflow_common::{EngineTime, EngineTimeDelta, MAX_DT};

/// Smallest representable tick: the clamp unit for same-time re-scheduling.
pub const SMALLEST_TICK: EngineTimeDelta = EngineTimeDelta::from_nanos(1);

pub trait EvaluationClock {
    /// The current cycle's evaluation time.
    fn evaluation_time(&self) -> EngineTime;

    /// Wall-clock time (equals `evaluation_time` in simulation).
    fn now(&self) -> EngineTime;

    /// The earliest time the next cycle may run at.
    fn next_cycle_evaluation_time(&self) -> EngineTime {
        self.evaluation_time() + SMALLEST_TICK
    }

    /// Wall time spent in the current cycle so far.
    fn cycle_time(&self) -> EngineTimeDelta;
}

pub trait EngineClock: EvaluationClock {
    fn set_evaluation_time(&mut self, et: EngineTime);

    fn next_scheduled_evaluation_time(&self) -> EngineTime;

    /// Propose a wake-up. Proposals in the past clamp to the next cycle, so
    /// the scheduled slot is always strictly ahead of the current cycle.
    fn update_next_scheduled_evaluation_time(&mut self, et: EngineTime);

    /// Move the clock to the next scheduled time and reset the slot.
    fn advance_to_next_scheduled_time(&mut self);

    fn mark_push_node_requires_scheduling(&mut self);
    fn push_node_requires_scheduling(&self) -> bool;
    fn reset_push_node_requires_scheduling(&mut self);

    /// Register a named wall-clock alarm. Only meaningful on the real-time
    /// clock; the simulation clock has no wall deadline to wait for.
    fn set_alarm(&mut self, at: EngineTime, name: &str, callback: Box<dyn FnMut(EngineTime) + Send>) {
        let _ = (at, name, callback);
    }

    fn cancel_alarm(&mut self, name: &str) {
        let _ = name;
    }
}

pub type ClockRef = Rc<RefCell<dyn EngineClock>>;

/// Shared evaluation/next-scheduled bookkeeping of the two root clocks.
#[derive(Debug)]
struct ClockCore {
    evaluation_time: EngineTime,
    next_scheduled: EngineTime,
    cycle_started: Instant,
}

impl ClockCore {
    fn new(start_time: EngineTime) -> Self {
        ClockCore {
            evaluation_time: start_time,
            next_scheduled: MAX_DT,
            cycle_started: Instant::now(),
        }
    }

    fn set_evaluation_time(&mut self, et: EngineTime) {
        self.evaluation_time = et;
        self.cycle_started = Instant::now();
    }

    fn update_next_scheduled(&mut self, et: EngineTime) {
        let floor = self.evaluation_time + SMALLEST_TICK;
        self.next_scheduled = floor.max(self.next_scheduled.min(et));
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Virtual clock: `now` equals the evaluation time and advancing jumps
/// straight to the next scheduled event.
pub struct SimulationClock {
    core: ClockCore,
    push_flag: bool,
}

impl SimulationClock {
    pub fn new(start_time: EngineTime) -> Self {
        SimulationClock {
            core: ClockCore::new(start_time),
            push_flag: false,
        }
    }
}

impl EvaluationClock for SimulationClock {
    fn evaluation_time(&self) -> EngineTime {
        self.core.evaluation_time
    }

    fn now(&self) -> EngineTime {
        self.core.evaluation_time
    }

    fn cycle_time(&self) -> EngineTimeDelta {
        EngineTimeDelta::from_nanos(self.core.cycle_started.elapsed().as_nanos() as i64)
    }
}

impl EngineClock for SimulationClock {
    fn set_evaluation_time(&mut self, et: EngineTime) {
        self.core.set_evaluation_time(et);
    }

    fn next_scheduled_evaluation_time(&self) -> EngineTime {
        self.core.next_scheduled
    }

    fn update_next_scheduled_evaluation_time(&mut self, et: EngineTime) {
        self.core.update_next_scheduled(et);
    }

    fn advance_to_next_scheduled_time(&mut self) {
        let mut next = self.core.next_scheduled;
        // A retained push message re-runs the graph at the next instant.
        if self.push_flag {
            next = next.min(self.core.evaluation_time + SMALLEST_TICK);
        }
        self.core.set_evaluation_time(next);
        self.core.next_scheduled = MAX_DT;
    }

    fn mark_push_node_requires_scheduling(&mut self) {
        self.push_flag = true;
    }

    fn push_node_requires_scheduling(&self) -> bool {
        self.push_flag
    }

    fn reset_push_node_requires_scheduling(&mut self) {
        self.push_flag = false;
    }
}

// ---------------------------------------------------------------------------
// Real time
// ---------------------------------------------------------------------------

/// State shared with push-source producers and stop requesters: both wake
/// the engine out of its timed wait.
pub struct RtShared {
    state: Mutex<RtFlags>,
    cond: Condvar,
}

#[derive(Default)]
struct RtFlags {
    push_required: bool,
    wake: bool,
}

impl RtShared {
    pub fn new() -> Arc<RtShared> {
        Arc::new(RtShared {
            state: Mutex::new(RtFlags::default()),
            cond: Condvar::new(),
        })
    }

    /// Called from producer threads when a push message lands.
    pub fn signal_push(&self) {
        let mut flags = self.state.lock().expect("rt clock mutex poisoned");
        flags.push_required = true;
        flags.wake = true;
        self.cond.notify_all();
    }

    /// Wake the engine without marking push work (stop requests).
    pub fn signal_wake(&self) {
        let mut flags = self.state.lock().expect("rt clock mutex poisoned");
        flags.wake = true;
        self.cond.notify_all();
    }
}

impl Default for RtShared {
    fn default() -> Self {
        RtShared {
            state: Mutex::new(RtFlags::default()),
            cond: Condvar::new(),
        }
    }
}

type AlarmFn = Box<dyn FnMut(EngineTime) + Send>;

/// Wall clock with alarm support. `advance_to_next_scheduled_time` blocks on
/// the shared condition variable until the next scheduled time or alarm is
/// due, or a push source / stop request wakes it early.
pub struct RealTimeClock {
    core: ClockCore,
    shared: Arc<RtShared>,
    alarms: Arc<Mutex<BTreeMap<(EngineTime, String), AlarmFn>>>,
}

impl RealTimeClock {
    pub fn new(start_time: EngineTime) -> Self {
        RealTimeClock {
            core: ClockCore::new(start_time),
            shared: RtShared::new(),
            alarms: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn shared(&self) -> Arc<RtShared> {
        self.shared.clone()
    }

    /// Register a named alarm; the callback fires on the engine thread when
    /// the clock advances past `alarm_time`.
    pub fn set_alarm(
        &self,
        alarm_time: EngineTime,
        name: impl Into<String>,
        callback: impl FnMut(EngineTime) + Send + 'static,
    ) {
        self.alarms
            .lock()
            .expect("alarm mutex poisoned")
            .insert((alarm_time, name.into()), Box::new(callback));
        self.shared.signal_wake();
    }

    pub fn cancel_alarm(&self, name: &str) {
        self.alarms
            .lock()
            .expect("alarm mutex poisoned")
            .retain(|(_, n), _| n != name);
    }

    fn next_alarm_time(&self) -> EngineTime {
        self.alarms
            .lock()
            .expect("alarm mutex poisoned")
            .keys()
            .next()
            .map(|(t, _)| *t)
            .unwrap_or(MAX_DT)
    }

    fn fire_due_alarms(&mut self, up_to: EngineTime) {
        let mut due: Vec<((EngineTime, String), AlarmFn)> = Vec::new();
        {
            let mut alarms = self.alarms.lock().expect("alarm mutex poisoned");
            let keys: Vec<(EngineTime, String)> = alarms
                .keys()
                .take_while(|(t, _)| *t <= up_to)
                .cloned()
                .collect();
            for key in keys {
                if let Some(cb) = alarms.remove(&key) {
                    due.push((key, cb));
                }
            }
        }
        for ((t, _), mut cb) in due {
            cb(t);
        }
    }
}

impl EvaluationClock for RealTimeClock {
    fn evaluation_time(&self) -> EngineTime {
        self.core.evaluation_time
    }

    fn now(&self) -> EngineTime {
        EngineTime::wall_clock_now()
    }

    fn cycle_time(&self) -> EngineTimeDelta {
        EngineTimeDelta::from_nanos(self.core.cycle_started.elapsed().as_nanos() as i64)
    }
}

impl EngineClock for RealTimeClock {
    fn set_evaluation_time(&mut self, et: EngineTime) {
        self.core.set_evaluation_time(et);
    }

    fn next_scheduled_evaluation_time(&self) -> EngineTime {
        self.core.next_scheduled
    }

    fn update_next_scheduled_evaluation_time(&mut self, et: EngineTime) {
        self.core.update_next_scheduled(et);
    }

    fn advance_to_next_scheduled_time(&mut self) {
        loop {
            let target = self.core.next_scheduled.min(self.next_alarm_time());
            let wall = EngineTime::wall_clock_now();

            {
                let mut flags = self.shared.state.lock().expect("rt clock mutex poisoned");
                if flags.push_required || flags.wake {
                    flags.wake = false;
                    let at = wall.max(self.core.evaluation_time + SMALLEST_TICK);
                    self.core.set_evaluation_time(at);
                    break;
                }
                if wall >= target {
                    // Fall through to fire alarms / take the scheduled slot.
                } else {
                    let wait = (target - wall)
                        .to_std()
                        .unwrap_or(Duration::from_millis(50))
                        .min(Duration::from_secs(10));
                    let (mut flags, _) = self
                        .shared
                        .cond
                        .wait_timeout(flags, wait)
                        .expect("rt clock mutex poisoned");
                    flags.wake = false;
                    continue;
                }
            }

            self.fire_due_alarms(target);
            let at = target.max(self.core.evaluation_time + SMALLEST_TICK);
            self.core.set_evaluation_time(at);
            self.core.next_scheduled = MAX_DT;
            return;
        }
        // Push / wake path: leave the scheduled slot for the next advance.
    }

    fn mark_push_node_requires_scheduling(&mut self) {
        self.shared.signal_push();
    }

    fn push_node_requires_scheduling(&self) -> bool {
        self.shared
            .state
            .lock()
            .expect("rt clock mutex poisoned")
            .push_required
    }

    fn reset_push_node_requires_scheduling(&mut self) {
        self.shared
            .state
            .lock()
            .expect("rt clock mutex poisoned")
            .push_required = false;
    }

    fn set_alarm(&mut self, at: EngineTime, name: &str, callback: Box<dyn FnMut(EngineTime) + Send>) {
        RealTimeClock::set_alarm(self, at, name, callback);
    }

    fn cancel_alarm(&mut self, name: &str) {
        RealTimeClock::cancel_alarm(self, name);
    }
}

// ---------------------------------------------------------------------------
// Nested
// ---------------------------------------------------------------------------

/// Clock of a sub-graph embedded in a nested node. Evaluation time flows
/// down from the outer clock; scheduling proposals are recorded locally and
/// reported upward through the nested node's hook (which schedules the
/// nested node itself in its owning graph).
pub struct NestedClock {
    outer: ClockRef,
    next: EngineTime,
    on_update: Box<dyn Fn(EngineTime)>,
}

impl NestedClock {
    pub fn new(outer: ClockRef, on_update: Box<dyn Fn(EngineTime)>) -> Self {
        NestedClock {
            outer,
            next: MAX_DT,
            on_update,
        }
    }

    /// The sub-graph's own next wake-up.
    pub fn next_time(&self) -> EngineTime {
        self.next
    }

    pub fn reset_next_scheduled_evaluation_time(&mut self) {
        self.next = MAX_DT;
    }
}

impl EvaluationClock for NestedClock {
    fn evaluation_time(&self) -> EngineTime {
        self.outer.borrow().evaluation_time()
    }

    fn now(&self) -> EngineTime {
        self.outer.borrow().now()
    }

    fn cycle_time(&self) -> EngineTimeDelta {
        self.outer.borrow().cycle_time()
    }
}

impl EngineClock for NestedClock {
    fn set_evaluation_time(&mut self, _et: EngineTime) {
        panic!("nested clocks are driven by the outer engine");
    }

    fn next_scheduled_evaluation_time(&self) -> EngineTime {
        self.next
    }

    fn update_next_scheduled_evaluation_time(&mut self, et: EngineTime) {
        self.next = self.next.min(et);
        (self.on_update)(et);
    }

    fn advance_to_next_scheduled_time(&mut self) {
        panic!("nested clocks are driven by the outer engine");
    }

    fn mark_push_node_requires_scheduling(&mut self) {
        self.outer.borrow_mut().mark_push_node_requires_scheduling();
    }

    fn push_node_requires_scheduling(&self) -> bool {
        self.outer.borrow().push_node_requires_scheduling()
    }

    fn reset_push_node_requires_scheduling(&mut self) {
        self.outer.borrow_mut().reset_push_node_requires_scheduling();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: i64) -> EngineTime {
        EngineTime::from_secs(s)
    }

    #[test]
    fn simulation_advance_jumps_to_next_scheduled() {
        let mut clock = SimulationClock::new(t(0));
        clock.update_next_scheduled_evaluation_time(t(5));
        clock.update_next_scheduled_evaluation_time(t(3));
        assert_eq!(clock.next_scheduled_evaluation_time(), t(3));
        clock.advance_to_next_scheduled_time();
        assert_eq!(clock.evaluation_time(), t(3));
        assert_eq!(clock.now(), t(3));
        assert_eq!(clock.next_scheduled_evaluation_time(), MAX_DT);
    }

    #[test]
    fn same_time_proposal_clamps_to_next_cycle() {
        let mut clock = SimulationClock::new(t(1));
        clock.update_next_scheduled_evaluation_time(t(1));
        assert_eq!(clock.next_scheduled_evaluation_time(), t(1) + SMALLEST_TICK);
    }

    #[test]
    fn nested_clock_records_and_reports() {
        let outer: ClockRef = Rc::new(RefCell::new(SimulationClock::new(t(1))));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        let mut nested = NestedClock::new(outer.clone(), Box::new(move |et| seen2.borrow_mut().push(et)));
        nested.update_next_scheduled_evaluation_time(t(4));
        nested.update_next_scheduled_evaluation_time(t(2));
        assert_eq!(nested.next_time(), t(2));
        assert_eq!(*seen.borrow(), vec![t(4), t(2)]);
        assert_eq!(nested.evaluation_time(), t(1));
        nested.reset_next_scheduled_evaluation_time();
        assert_eq!(nested.next_time(), MAX_DT);
    }

    #[test]
    fn alarms_fire_in_time_order() {
        let mut clock = RealTimeClock::new(t(0));
        let fired = Arc::new(Mutex::new(Vec::new()));
        let f1 = fired.clone();
        let f2 = fired.clone();
        // Alarms in the past fire on the next advance.
        clock.set_alarm(t(0), "b", move |at| f2.lock().unwrap().push(("b", at)));
        clock.set_alarm(t(0) - EngineTimeDelta::from_secs(1), "a", move |at| {
            f1.lock().unwrap().push(("a", at))
        });
        clock.fire_due_alarms(t(1));
        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].0, "a");
        assert_eq!(fired[1].0, "b");
    }

    #[test]
    fn cancel_alarm_removes_by_name() {
        let clock = RealTimeClock::new(t(0));
        clock.set_alarm(t(5), "x", |_| {});
        clock.cancel_alarm("x");
        assert_eq!(clock.next_alarm_time(), MAX_DT);
    }
}
