//! Run-time type metadata: value-level descriptors, time-series descriptors,
//! and the process-wide interning registry.

pub mod registry;
pub mod ts_meta;
pub mod type_meta;

pub use registry::{TsSchema, scalar_type, schema, signal, ts, ts_ref, tsb, tsd, tsl, tss, tsw, tsw_duration};
pub use ts_meta::{TsField, TsKind, TsMeta, WindowSpec};
pub use type_meta::{TypeFlags, TypeKind, TypeMeta};
