pub mod error;
pub mod time;
pub mod value;

pub use error::{GraphError, NodeError};
pub use time::{EngineTime, EngineTimeDelta, MAX_DT, MIN_DT};
pub use value::{ScalarKind, ScalarValue};
