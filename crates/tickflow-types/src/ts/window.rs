//! Bounded-history storage for TSW.
//!
//! Two shapes share the surface: a tick-count ring buffer and a
//! duration-bounded deque. Values displaced during a cycle land in a
//! transient `removed` slot that the engine clears after evaluation; duration
//! windows additionally roll lazily on read, since eviction depends on the
//! current evaluation time rather than on writes.

use std::cell::RefCell;
use std::collections::VecDeque;

use tickflow_common::{EngineTime, EngineTimeDelta, ScalarValue};

use crate::meta::WindowSpec;

#[derive(Debug)]
pub struct FixedWindow {
    buffer: Vec<Option<ScalarValue>>,
    times: Vec<EngineTime>,
    start: usize,
    len: usize,
    size: usize,
    min_size: usize,
    removed_value: Option<ScalarValue>,
}

impl FixedWindow {
    pub fn new(size: usize, min_size: usize) -> Self {
        FixedWindow {
            buffer: vec![None; size],
            times: vec![tickflow_common::MIN_DT; size],
            start: 0,
            len: 0,
            size,
            min_size,
            removed_value: None,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    pub fn push(&mut self, value: ScalarValue, now: EngineTime) {
        let mut len = self.len + 1;
        if len > self.size {
            self.removed_value = self.buffer[self.start].take();
            self.start = (self.start + 1) % self.size;
            len = self.size;
        }
        self.len = len;
        let pos = (self.start + len - 1) % self.size;
        self.buffer[pos] = Some(value);
        self.times[pos] = now;
    }

    /// Oldest→newest contents, absent while below the minimum fill.
    pub fn value(&self) -> Option<Vec<ScalarValue>> {
        if self.len < self.min_size {
            return None;
        }
        Some(self.ordered().map(|(_, v)| v.clone()).collect())
    }

    pub fn value_times(&self) -> Option<Vec<EngineTime>> {
        if self.len < self.min_size {
            return None;
        }
        Some(self.ordered().map(|(t, _)| t).collect())
    }

    /// The value written this tick, if the latest write happened at `now`.
    pub fn delta_value(&self, now: EngineTime) -> Option<ScalarValue> {
        if self.len == 0 {
            return None;
        }
        let pos = (self.start + self.len - 1) % self.size;
        if self.times[pos] == now {
            self.buffer[pos].clone()
        } else {
            None
        }
    }

    pub fn latest_time(&self) -> Option<EngineTime> {
        if self.len == 0 {
            return None;
        }
        let pos = (self.start + self.len - 1) % self.size;
        Some(self.times[pos])
    }

    pub fn first_modified_time(&self) -> Option<EngineTime> {
        if self.len == 0 { None } else { Some(self.times[self.start]) }
    }

    pub fn removed_value(&self) -> Option<&ScalarValue> {
        self.removed_value.as_ref()
    }

    pub fn has_reached_min(&self) -> bool {
        self.len >= self.min_size
    }

    pub fn clear_transients(&mut self) {
        self.removed_value = None;
    }

    pub fn invalidate(&mut self) {
        self.start = 0;
        self.len = 0;
        self.removed_value = None;
        self.buffer.iter_mut().for_each(|v| *v = None);
    }

    fn ordered(&self) -> impl Iterator<Item = (EngineTime, &ScalarValue)> + '_ {
        (0..self.len).map(move |i| {
            let pos = (self.start + i) % self.size;
            (
                self.times[pos],
                self.buffer[pos].as_ref().expect("live window slot holds a value"),
            )
        })
    }
}

#[derive(Debug, Default)]
struct DurationState {
    entries: VecDeque<(EngineTime, ScalarValue)>,
    removed: Vec<ScalarValue>,
    rolled_at: EngineTime,
}

/// Duration-bounded window. Eviction happens against the current evaluation
/// time, so reads roll too; the state sits behind a `RefCell` to keep the
/// read surface `&self` like every other kind.
#[derive(Debug)]
pub struct DurationWindow {
    state: RefCell<DurationState>,
    size: EngineTimeDelta,
    min_size: EngineTimeDelta,
}

impl DurationWindow {
    pub fn new(size: EngineTimeDelta, min_size: EngineTimeDelta) -> Self {
        DurationWindow {
            state: RefCell::new(DurationState {
                rolled_at: tickflow_common::MIN_DT,
                ..DurationState::default()
            }),
            size,
            min_size,
        }
    }

    pub fn size(&self) -> EngineTimeDelta {
        self.size
    }

    pub fn min_size(&self) -> EngineTimeDelta {
        self.min_size
    }

    pub fn push(&mut self, value: ScalarValue, now: EngineTime) {
        self.roll(now);
        self.state.get_mut().entries.push_back((now, value));
    }

    pub fn len(&self, now: EngineTime) -> usize {
        self.roll(now);
        self.state.borrow().entries.len()
    }

    pub fn value(&self, now: EngineTime, start_time: EngineTime) -> Option<Vec<ScalarValue>> {
        if !self.has_min_elapsed(now, start_time) {
            return None;
        }
        self.roll(now);
        let state = self.state.borrow();
        if state.entries.is_empty() {
            return None;
        }
        Some(state.entries.iter().map(|(_, v)| v.clone()).collect())
    }

    pub fn value_times(&self, now: EngineTime) -> Vec<EngineTime> {
        self.roll(now);
        self.state.borrow().entries.iter().map(|(t, _)| *t).collect()
    }

    pub fn delta_value(&self, now: EngineTime, start_time: EngineTime) -> Option<ScalarValue> {
        if !self.has_min_elapsed(now, start_time) {
            return None;
        }
        let state = self.state.borrow();
        match state.entries.back() {
            Some((t, v)) if *t == now => Some(v.clone()),
            _ => None,
        }
    }

    /// Values evicted by the most recent roll of this tick.
    pub fn removed_values(&self, now: EngineTime) -> Vec<ScalarValue> {
        self.roll(now);
        self.state.borrow().removed.clone()
    }

    pub fn first_modified_time(&self, now: EngineTime) -> Option<EngineTime> {
        self.roll(now);
        self.state.borrow().entries.front().map(|(t, _)| *t)
    }

    pub fn has_min_elapsed(&self, now: EngineTime, start_time: EngineTime) -> bool {
        now - start_time >= self.min_size
    }

    pub fn clear_transients(&self) {
        self.state.borrow_mut().removed.clear();
    }

    pub fn invalidate(&mut self) {
        let state = self.state.get_mut();
        state.entries.clear();
        state.removed.clear();
        state.rolled_at = tickflow_common::MIN_DT;
    }

    fn roll(&self, now: EngineTime) {
        let mut state = self.state.borrow_mut();
        if state.rolled_at == now {
            return;
        }
        state.rolled_at = now;
        let cutoff = now - self.size;
        if state.entries.front().is_some_and(|(t, _)| *t < cutoff) {
            let mut removed = Vec::new();
            while state.entries.front().is_some_and(|(t, _)| *t < cutoff) {
                let (_, v) = state.entries.pop_front().expect("front checked above");
                removed.push(v);
            }
            state.removed = removed;
        }
    }
}

#[derive(Debug)]
pub enum WindowData {
    Fixed(FixedWindow),
    Duration(DurationWindow),
}

impl WindowData {
    pub fn new(spec: WindowSpec) -> Self {
        match spec {
            WindowSpec::Ticks { size, min_size } => WindowData::Fixed(FixedWindow::new(size, min_size)),
            WindowSpec::Duration { size, min_size } => {
                WindowData::Duration(DurationWindow::new(size, min_size))
            }
        }
    }

    pub fn push(&mut self, value: ScalarValue, now: EngineTime) {
        match self {
            WindowData::Fixed(w) => w.push(value, now),
            WindowData::Duration(w) => w.push(value, now),
        }
    }

    pub fn clear_transients(&mut self) {
        match self {
            WindowData::Fixed(w) => w.clear_transients(),
            WindowData::Duration(w) => w.clear_transients(),
        }
    }

    pub fn invalidate(&mut self) {
        match self {
            WindowData::Fixed(w) => w.invalidate(),
            WindowData::Duration(w) => w.invalidate(),
        }
    }

    pub fn all_valid(&self, now: EngineTime, start_time: EngineTime) -> bool {
        match self {
            WindowData::Fixed(w) => w.has_reached_min(),
            WindowData::Duration(w) => w.has_min_elapsed(now, start_time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: i64) -> EngineTime {
        EngineTime::from_secs(s)
    }

    #[test]
    fn fixed_window_rolls_and_reports_removed() {
        let mut w = FixedWindow::new(3, 2);
        w.push(1i64.into(), t(1));
        assert_eq!(w.value(), None);
        w.push(2i64.into(), t(2));
        assert_eq!(w.value().unwrap(), vec![1i64.into(), 2i64.into()]);
        w.push(3i64.into(), t(3));
        w.push(4i64.into(), t(4));
        assert_eq!(w.value().unwrap(), vec![2i64.into(), 3i64.into(), 4i64.into()]);
        assert_eq!(w.removed_value(), Some(&1i64.into()));
        w.clear_transients();
        assert_eq!(w.removed_value(), None);
        assert_eq!(w.delta_value(t(4)), Some(4i64.into()));
        assert_eq!(w.delta_value(t(5)), None);
    }

    #[test]
    fn duration_window_evicts_by_age() {
        let mut w = DurationWindow::new(EngineTimeDelta::from_secs(3), EngineTimeDelta::from_secs(1));
        let start = t(0);
        w.push(1i64.into(), t(1));
        w.push(2i64.into(), t(2));
        assert_eq!(w.value(t(2), start).unwrap(), vec![1i64.into(), 2i64.into()]);
        w.push(3i64.into(), t(5));
        // At t=5 the cutoff is t=2: the t=1 entry is evicted.
        assert_eq!(w.value(t(5), start).unwrap(), vec![2i64.into(), 3i64.into()]);
        assert_eq!(w.removed_values(t(5)), vec![1i64.into()]);
    }

    #[test]
    fn duration_window_minimum_is_elapsed_time() {
        let w = DurationWindow::new(EngineTimeDelta::from_secs(10), EngineTimeDelta::from_secs(5));
        let start = t(0);
        assert!(!w.has_min_elapsed(t(4), start));
        assert!(w.has_min_elapsed(t(5), start));
    }
}
