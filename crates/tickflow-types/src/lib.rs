//! Time-series type metadata, slot-stable storage, and the value model of
//! the tickflow engine.
//!
//! The crate is runtime-agnostic: it talks to the evaluation engine only
//! through the [`ctx::EngineContext`] and [`ctx::TickSink`] seams, which the
//! runtime crate implements.

pub mod ctx;
pub mod meta;
pub mod storage;
pub mod ts;

pub use ctx::{EngineContext, TickSink};
pub use meta::{TsKind, TsMeta, TsSchema, TypeFlags, TypeKind, TypeMeta, WindowSpec};
pub use storage::{KeySet, MapDelta, SetDelta, SlotHandle, SlotObserver};
pub use ts::{
    MapDeltaValue, OutputHandle, PathSeg, RebindDelta, SetDeltaValue, TsData, TsInput, TsPath,
    TsReference, TsValue, TsView, Value,
};
