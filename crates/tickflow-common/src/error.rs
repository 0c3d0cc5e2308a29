//! Error surface of the runtime.
//!
//! Two families exist, and they do not mix:
//!
//! - **Programmer errors** — scheduling in the past, out-of-order lifecycle
//!   calls, structurally invalid binds, duplicate component ids. These are
//!   bugs in the wiring, not conditions node code may handle; everywhere in
//!   the runtime they panic with a descriptive message.
//! - **Node evaluation errors** — failures inside a node's `eval`. These
//!   travel as [`NodeError`]: captured into the node's error output when the
//!   signature asks for it, otherwise enriched with the node's signature and
//!   activation back-trace and surfaced from the executor as
//!   [`GraphError::Node`].

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A materialised node failure.
///
/// The field set is the wire format handed to embedders: every field is a
/// plain string so the error can cross host boundaries without dragging
/// runtime types along.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeError {
    /// Signature of the failing node, e.g. `add1(ts: TS[int]) -> TS[int]`.
    pub signature_name: String,
    /// User label, when the node was given one at wiring time.
    pub label: String,
    /// Wiring path from the graph root to the node.
    pub wiring_path: String,
    /// The failure message itself.
    pub error_msg: String,
    /// Host stack trace, when one was captured.
    pub stack_trace: String,
    /// Textual tree of the nodes transitively feeding the failing node.
    pub activation_back_trace: String,
    /// Free-form context added by the capture site ("During evaluation", …).
    pub additional_context: String,
}

impl NodeError {
    /// Bare error with only a message; capture sites fill in the rest.
    pub fn message(msg: impl Into<String>) -> Self {
        NodeError {
            error_msg: msg.into(),
            ..NodeError::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.additional_context = context.into();
        self
    }

    pub fn has_signature(&self) -> bool {
        !self.signature_name.is_empty()
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.signature_name.is_empty() {
            write!(f, "{}", self.error_msg)?;
        } else {
            write!(f, "{}: {}", self.signature_name, self.error_msg)?;
        }
        if !self.label.is_empty() {
            write!(f, " [label={}]", self.label)?;
        }
        if !self.wiring_path.is_empty() {
            write!(f, " at {}", self.wiring_path)?;
        }
        if !self.additional_context.is_empty() {
            write!(f, " ({})", self.additional_context)?;
        }
        if !self.activation_back_trace.is_empty() {
            write!(f, "\nactivation back trace:\n{}", self.activation_back_trace)?;
        }
        Ok(())
    }
}

impl std::error::Error for NodeError {}

impl From<String> for NodeError {
    fn from(msg: String) -> Self {
        NodeError::message(msg)
    }
}

impl From<&str> for NodeError {
    fn from(msg: &str) -> Self {
        NodeError::message(msg)
    }
}

/// Failure of a graph run, as returned by the executor.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A node failed during evaluation (or start/stop) and the failure was
    /// not captured by its signature.
    #[error(transparent)]
    Node(#[from] NodeError),

    /// The engine was asked to stop and exited before reaching `end_time`.
    /// Not raised by `run` itself; available for embedders that treat an
    /// early stop as a failure.
    #[error("engine stop requested at {at}")]
    Stopped { at: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_signature_and_path() {
        let mut e = NodeError::message("division by zero");
        e.signature_name = "div(lhs: TS[int], rhs: TS[int])".into();
        e.wiring_path = "root.pricer.div".into();
        let s = e.to_string();
        assert!(s.contains("division by zero"));
        assert!(s.contains("root.pricer.div"));
    }

    #[test]
    fn graph_error_wraps_node_error() {
        let g: GraphError = NodeError::message("boom").into();
        assert!(matches!(g, GraphError::Node(_)));
        assert_eq!(g.to_string(), "boom");
    }
}
