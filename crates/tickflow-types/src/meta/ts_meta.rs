//! Time-series-level type descriptors.

use std::fmt;

use tickflow_common::{EngineTimeDelta, ScalarKind};

use super::type_meta::TypeMeta;

/// Kind tag of a time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TsKind {
    /// Scalar time series.
    Ts,
    /// Bundle: fixed, named record of time series.
    Tsb,
    /// List: positional collection, fixed-size or dynamic.
    Tsl,
    /// Dict: keyed collection with per-tick deltas.
    Tsd,
    /// Set: keyed membership collection with per-tick deltas.
    Tss,
    /// Window: bounded history of a scalar time series.
    Tsw,
    /// Reference: value is a handle to another time-series endpoint.
    Ref,
    /// Timestamps only, no payload.
    Signal,
}

impl TsKind {
    pub fn is_collection(self) -> bool {
        matches!(self, TsKind::Tsb | TsKind::Tsl | TsKind::Tsd | TsKind::Tss)
    }
}

/// Window bound: by tick count or by duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowSpec {
    Ticks { size: usize, min_size: usize },
    Duration { size: EngineTimeDelta, min_size: EngineTimeDelta },
}

impl WindowSpec {
    pub fn is_duration_based(self) -> bool {
        matches!(self, WindowSpec::Duration { .. })
    }
}

/// A named child time series (bundle fields carry names).
#[derive(Debug)]
pub struct TsField {
    pub name: Option<String>,
    pub meta: &'static TsMeta,
}

/// Immutable time-series type descriptor. Interned by the registry:
/// structurally equal specs share pointer identity.
#[derive(Debug)]
pub struct TsMeta {
    pub kind: TsKind,
    /// Display name; bundles carry their declared name.
    pub name: String,
    /// Scalar payload for `Ts`/`Tss`/`Tsw` and the key kind for `Tsd`.
    pub payload: Option<&'static TypeMeta>,
    /// Children: bundle fields, the list element, the dict value, or the
    /// ref target (always exactly one for `Tsl`/`Tsd`/`Ref`).
    pub children: Vec<TsField>,
    /// Fixed element count for `Tsl`; `None` means dynamic.
    pub fixed_size: Option<usize>,
    /// Window bound for `Tsw`.
    pub window: Option<WindowSpec>,
}

impl TsMeta {
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        self.payload.and_then(|p| p.scalar)
    }

    /// The dict key kind. Panics when called on non-dict metas.
    pub fn key_kind(&self) -> ScalarKind {
        debug_assert_eq!(self.kind, TsKind::Tsd);
        self.scalar_kind().expect("TSD meta carries a scalar key type")
    }

    pub fn child(&self, index: usize) -> Option<&'static TsMeta> {
        self.children.get(index).map(|f| f.meta)
    }

    pub fn child_by_name(&self, name: &str) -> Option<(usize, &'static TsMeta)> {
        self.children
            .iter()
            .enumerate()
            .find(|(_, f)| f.name.as_deref() == Some(name))
            .map(|(i, f)| (i, f.meta))
    }

    /// The element/value meta of a `Tsl`/`Tsd`, or the target of a `Ref`.
    pub fn element(&self) -> Option<&'static TsMeta> {
        match self.kind {
            TsKind::Tsl | TsKind::Tsd | TsKind::Ref => self.child(0),
            _ => None,
        }
    }
}

impl PartialEq for TsMeta {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for TsMeta {}

impl fmt::Display for TsMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
