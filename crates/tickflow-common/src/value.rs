//! Dynamic scalar values.
//!
//! `ScalarValue` is the payload of scalar time series, the key type of sets
//! and dicts, and the message payload of push sources. It is a closed set of
//! variants so that keys can be hashed and ordered without a user-supplied
//! vtable; floats hash by bit pattern and order by `total_cmp` so the type is
//! `Eq + Ord + Hash` throughout.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::NodeError;
use crate::time::{EngineTime, EngineTimeDelta};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The closed set of scalar payload kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ScalarKind {
    Bool,
    Int,
    Float,
    Str,
    Time,
    Duration,
    Error,
}

/// A dynamically-typed scalar value.
///
/// `Error` carries a [`NodeError`]; it exists so that error outputs are
/// ordinary scalar time series rather than a parallel channel type.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Time(EngineTime),
    Duration(EngineTimeDelta),
    Error(Arc<NodeError>),
}

impl ScalarValue {
    pub fn kind(&self) -> ScalarKind {
        match self {
            ScalarValue::Bool(_) => ScalarKind::Bool,
            ScalarValue::Int(_) => ScalarKind::Int,
            ScalarValue::Float(_) => ScalarKind::Float,
            ScalarValue::Str(_) => ScalarKind::Str,
            ScalarValue::Time(_) => ScalarKind::Time,
            ScalarValue::Duration(_) => ScalarKind::Duration,
            ScalarValue::Error(_) => ScalarKind::Error,
        }
    }

    /// Zero/default value for a kind; used to fill dead storage slots.
    pub fn default_for(kind: ScalarKind) -> ScalarValue {
        match kind {
            ScalarKind::Bool => ScalarValue::Bool(false),
            ScalarKind::Int => ScalarValue::Int(0),
            ScalarKind::Float => ScalarValue::Float(0.0),
            ScalarKind::Str => ScalarValue::Str(Arc::from("")),
            ScalarKind::Time => ScalarValue::Time(crate::time::MIN_DT),
            ScalarKind::Duration => ScalarValue::Duration(EngineTimeDelta::ZERO),
            ScalarKind::Error => ScalarValue::Error(Arc::new(NodeError::message(""))),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScalarValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ScalarValue::Float(f) => Some(*f),
            ScalarValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<EngineTime> {
        match self {
            ScalarValue::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&NodeError> {
        match self {
            ScalarValue::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Rendering capped at `max` chars, used by activation back-traces.
    pub fn truncated(&self, max: usize) -> String {
        let s = self.to_string();
        if s.len() <= max {
            s
        } else {
            let mut t: String = s.chars().take(max.saturating_sub(1)).collect();
            t.push('…');
            t
        }
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        use ScalarValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Str(a), Str(b)) => a == b,
            (Time(a), Time(b)) => a == b,
            (Duration(a), Duration(b)) => a == b,
            (Error(a), Error(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ScalarValue::Bool(b) => b.hash(state),
            ScalarValue::Int(i) => i.hash(state),
            ScalarValue::Float(f) => f.to_bits().hash(state),
            ScalarValue::Str(s) => s.hash(state),
            ScalarValue::Time(t) => t.hash(state),
            ScalarValue::Duration(d) => d.hash(state),
            ScalarValue::Error(e) => e.hash(state),
        }
    }
}

impl PartialOrd for ScalarValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScalarValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use ScalarValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Time(a), Time(b)) => a.cmp(b),
            (Duration(a), Duration(b)) => a.cmp(b),
            (Error(a), Error(b)) => a.error_msg.cmp(&b.error_msg),
            (a, b) => a.kind().cmp(&b.kind()),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(b) => write!(f, "{b}"),
            ScalarValue::Int(i) => write!(f, "{i}"),
            ScalarValue::Float(v) => write!(f, "{v}"),
            ScalarValue::Str(s) => write!(f, "{s}"),
            ScalarValue::Time(t) => write!(f, "{t}"),
            ScalarValue::Duration(d) => write!(f, "{d}"),
            ScalarValue::Error(e) => write!(f, "{e}"),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Bool(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Str(Arc::from(v))
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        ScalarValue::Str(Arc::from(v.as_str()))
    }
}

impl From<EngineTime> for ScalarValue {
    fn from(v: EngineTime) -> Self {
        ScalarValue::Time(v)
    }
}

impl From<EngineTimeDelta> for ScalarValue {
    fn from(v: EngineTimeDelta) -> Self {
        ScalarValue::Duration(v)
    }
}

impl From<NodeError> for ScalarValue {
    fn from(v: NodeError) -> Self {
        ScalarValue::Error(Arc::new(v))
    }
}
