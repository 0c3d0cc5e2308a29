//! The push-source queue.
//!
//! External producers enqueue messages from any thread; the engine thread
//! drains the queue at the top of each cycle. `enqueue_front` exists for
//! backpressure: a message a push node could not absorb goes back to the
//! head so FIFO order is preserved across the retry.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tickflow_common::ScalarValue;
use tickflow_types::Value;

use crate::clock::RtShared;

/// Payload of a push message. A `Send`-safe subset of [`Value`]: references
/// cannot cross the thread boundary, everything else can.
#[derive(Debug, Clone)]
pub enum PushValue {
    Scalar(ScalarValue),
    Signal,
    Composite(Vec<PushValue>),
    Set(Vec<ScalarValue>),
    Map(Vec<(ScalarValue, PushValue)>),
}

impl PushValue {
    pub fn to_value(&self) -> Value {
        match self {
            PushValue::Scalar(v) => Value::Scalar(v.clone()),
            PushValue::Signal => Value::Signal,
            PushValue::Composite(vs) => Value::Composite(vs.iter().map(|v| v.to_value()).collect()),
            PushValue::Set(vs) => Value::Set(vs.clone()),
            PushValue::Map(es) => {
                Value::Map(es.iter().map(|(k, v)| (k.clone(), v.to_value())).collect())
            }
        }
    }
}

impl From<ScalarValue> for PushValue {
    fn from(v: ScalarValue) -> Self {
        PushValue::Scalar(v)
    }
}

impl From<i64> for PushValue {
    fn from(v: i64) -> Self {
        PushValue::Scalar(v.into())
    }
}

impl From<&str> for PushValue {
    fn from(v: &str) -> Self {
        PushValue::Scalar(v.into())
    }
}

/// One message addressed to a push-source node by index.
#[derive(Debug, Clone)]
pub struct PushMessage {
    pub node_ndx: usize,
    pub payload: PushValue,
}

/// MPSC queue state shared between producers and the owning graph.
pub struct SenderReceiverState {
    queue: Mutex<VecDeque<PushMessage>>,
    dirty: AtomicBool,
    rt: Mutex<Option<Arc<RtShared>>>,
}

impl SenderReceiverState {
    pub fn new() -> Arc<SenderReceiverState> {
        Arc::new(SenderReceiverState {
            queue: Mutex::new(VecDeque::new()),
            dirty: AtomicBool::new(false),
            rt: Mutex::new(None),
        })
    }

    /// Attach the real-time clock's wake channel; enqueues signal it.
    pub fn connect_clock(&self, shared: Arc<RtShared>) {
        *self.rt.lock().expect("push queue mutex poisoned") = Some(shared);
    }

    pub fn enqueue(&self, message: PushMessage) {
        self.queue
            .lock()
            .expect("push queue mutex poisoned")
            .push_back(message);
        self.mark_dirty();
    }

    /// Put a message back at the head (retry-first ordering).
    pub fn enqueue_front(&self, message: PushMessage) {
        self.queue
            .lock()
            .expect("push queue mutex poisoned")
            .push_front(message);
        self.mark_dirty();
    }

    pub fn dequeue(&self) -> Option<PushMessage> {
        self.queue
            .lock()
            .expect("push queue mutex poisoned")
            .pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().expect("push queue mutex poisoned").is_empty()
    }

    /// True when messages arrived since the flag was last taken.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub fn has_pending(&self) -> bool {
        self.dirty.load(Ordering::Acquire) || !self.is_empty()
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
        if let Some(rt) = self.rt.lock().expect("push queue mutex poisoned").as_ref() {
            rt.signal_push();
        }
    }
}

/// Cloneable producer handle handed to external threads.
#[derive(Clone)]
pub struct PushSender {
    state: Arc<SenderReceiverState>,
}

impl PushSender {
    pub fn new(state: Arc<SenderReceiverState>) -> Self {
        PushSender { state }
    }

    pub fn send(&self, node_ndx: usize, payload: impl Into<PushValue>) {
        self.state.enqueue(PushMessage {
            node_ndx,
            payload: payload.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(v: i64) -> PushMessage {
        PushMessage {
            node_ndx: 0,
            payload: v.into(),
        }
    }

    fn payload_int(m: &PushMessage) -> i64 {
        match &m.payload {
            PushValue::Scalar(v) => v.as_int().unwrap(),
            other => panic!("expected scalar payload, got {other:?}"),
        }
    }

    #[test]
    fn fifo_with_front_retry() {
        let q = SenderReceiverState::new();
        q.enqueue(msg(1));
        q.enqueue(msg(2));
        let first = q.dequeue().unwrap();
        assert_eq!(payload_int(&first), 1);
        // Backpressure: retried message stays at the head.
        q.enqueue_front(first);
        assert_eq!(payload_int(&q.dequeue().unwrap()), 1);
        assert_eq!(payload_int(&q.dequeue().unwrap()), 2);
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn dirty_flag_is_taken_once() {
        let q = SenderReceiverState::new();
        assert!(!q.take_dirty());
        q.enqueue(msg(1));
        assert!(q.take_dirty());
        assert!(!q.take_dirty());
    }

    #[test]
    fn senders_are_cloneable_across_threads() {
        let q = SenderReceiverState::new();
        let sender = PushSender::new(q.clone());
        let handle = std::thread::spawn(move || {
            sender.send(0, 42i64);
        });
        handle.join().unwrap();
        assert!(q.has_pending());
    }
}
