//! Process-wide interning registry for type and time-series metadata.
//!
//! Every constructor returns a `&'static` pointer; structurally equal specs
//! return the same pointer, so equality checks downstream are pointer
//! compares. Inserts take a mutex; reads of already-published metas are just
//! pointer dereferences.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use std::sync::Mutex;

use tickflow_common::{EngineTimeDelta, ScalarKind};

use super::type_meta::{TypeFlags, TypeKind, TypeMeta, scalar_flags, scalar_name};
use super::ts_meta::{TsField, TsKind, TsMeta, WindowSpec};

/// Structural key for interning a `TsMeta`. Child identity is pointer
/// identity, so equivalence is structural by induction.
#[derive(PartialEq, Eq, Hash)]
struct TsMetaKey {
    kind: TsKind,
    payload: Option<usize>,
    children: Vec<(Option<String>, usize)>,
    fixed_size: Option<usize>,
    window: Option<WindowSpec>,
    name: Option<String>,
}

/// Derived per-meta schema: slot counts for the parallel tracking trees
/// (timestamps, observers, links, active flags) allocated alongside a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsSchema {
    /// Leaf count of the static structure (dynamic collections count as 1).
    pub leaf_count: usize,
    /// Timestamp slots: one per structural node.
    pub time_slots: usize,
    /// Observer-list slots: one per structural node.
    pub observer_slots: usize,
    /// Link slots an input of this shape needs (peered containers fan out).
    pub link_slots: usize,
    /// Active-flag slots, parallel to link slots.
    pub active_slots: usize,
    /// Whether any node in the tree tracks a keyed delta.
    pub has_keyed_delta: bool,
}

struct Registry {
    scalar_types: FxHashMap<ScalarKind, &'static TypeMeta>,
    ts_metas: FxHashMap<TsMetaKey, &'static TsMeta>,
    schemas: FxHashMap<usize, TsSchema>,
}

static REGISTRY: Lazy<Mutex<Registry>> = Lazy::new(|| {
    Mutex::new(Registry {
        scalar_types: FxHashMap::default(),
        ts_metas: FxHashMap::default(),
        schemas: FxHashMap::default(),
    })
});

/// Interned scalar `TypeMeta`.
pub fn scalar_type(kind: ScalarKind) -> &'static TypeMeta {
    let mut reg = REGISTRY.lock().expect("type registry poisoned");
    if let Some(meta) = reg.scalar_types.get(&kind) {
        return meta;
    }
    let meta: &'static TypeMeta = Box::leak(Box::new(TypeMeta {
        kind: TypeKind::Scalar,
        name: scalar_name(kind).to_string(),
        flags: scalar_flags(kind),
        scalar: Some(kind),
        children: Vec::new(),
    }));
    reg.scalar_types.insert(kind, meta);
    meta
}

fn intern(key: TsMetaKey, build: impl FnOnce() -> TsMeta) -> &'static TsMeta {
    let mut reg = REGISTRY.lock().expect("type registry poisoned");
    if let Some(meta) = reg.ts_metas.get(&key) {
        return meta;
    }
    let meta: &'static TsMeta = Box::leak(Box::new(build()));
    reg.ts_metas.insert(key, meta);
    meta
}

/// `TS[scalar]` — scalar time series.
pub fn ts(kind: ScalarKind) -> &'static TsMeta {
    let payload = scalar_type(kind);
    intern(
        TsMetaKey {
            kind: TsKind::Ts,
            payload: Some(payload as *const TypeMeta as usize),
            children: Vec::new(),
            fixed_size: None,
            window: None,
            name: None,
        },
        || TsMeta {
            kind: TsKind::Ts,
            name: format!("TS[{}]", payload.name),
            payload: Some(payload),
            children: Vec::new(),
            fixed_size: None,
            window: None,
        },
    )
}

/// `TSB` — named bundle of time series.
pub fn tsb(fields: &[(&str, &'static TsMeta)], name: &str) -> &'static TsMeta {
    intern(
        TsMetaKey {
            kind: TsKind::Tsb,
            payload: None,
            children: fields
                .iter()
                .map(|(n, m)| (Some(n.to_string()), *m as *const TsMeta as usize))
                .collect(),
            fixed_size: None,
            window: None,
            name: Some(name.to_string()),
        },
        || TsMeta {
            kind: TsKind::Tsb,
            name: name.to_string(),
            payload: None,
            children: fields
                .iter()
                .map(|(n, m)| TsField {
                    name: Some(n.to_string()),
                    meta: m,
                })
                .collect(),
            fixed_size: None,
            window: None,
        },
    )
}

/// `TSL[element]` — positional list; `fixed_size = None` is dynamic.
pub fn tsl(element: &'static TsMeta, fixed_size: Option<usize>) -> &'static TsMeta {
    intern(
        TsMetaKey {
            kind: TsKind::Tsl,
            payload: None,
            children: vec![(None, element as *const TsMeta as usize)],
            fixed_size,
            window: None,
            name: None,
        },
        || TsMeta {
            kind: TsKind::Tsl,
            name: match fixed_size {
                Some(n) => format!("TSL[{}, {n}]", element.name),
                None => format!("TSL[{}]", element.name),
            },
            payload: None,
            children: vec![TsField {
                name: None,
                meta: element,
            }],
            fixed_size,
            window: None,
        },
    )
}

/// `TSD[key, value]` — keyed dict of time series.
pub fn tsd(key: ScalarKind, value: &'static TsMeta) -> &'static TsMeta {
    let key_type = scalar_type(key);
    assert!(
        key_type.is_hashable(),
        "TSD key type {} is not hashable",
        key_type.name
    );
    intern(
        TsMetaKey {
            kind: TsKind::Tsd,
            payload: Some(key_type as *const TypeMeta as usize),
            children: vec![(None, value as *const TsMeta as usize)],
            fixed_size: None,
            window: None,
            name: None,
        },
        || TsMeta {
            kind: TsKind::Tsd,
            name: format!("TSD[{}, {}]", key_type.name, value.name),
            payload: Some(key_type),
            children: vec![TsField {
                name: None,
                meta: value,
            }],
            fixed_size: None,
            window: None,
        },
    )
}

/// `TSS[element]` — keyed set.
pub fn tss(element: ScalarKind) -> &'static TsMeta {
    let elem_type = scalar_type(element);
    assert!(
        elem_type.is_hashable(),
        "TSS element type {} is not hashable",
        elem_type.name
    );
    intern(
        TsMetaKey {
            kind: TsKind::Tss,
            payload: Some(elem_type as *const TypeMeta as usize),
            children: Vec::new(),
            fixed_size: None,
            window: None,
            name: None,
        },
        || TsMeta {
            kind: TsKind::Tss,
            name: format!("TSS[{}]", elem_type.name),
            payload: Some(elem_type),
            children: Vec::new(),
            fixed_size: None,
            window: None,
        },
    )
}

fn tsw_impl(value: ScalarKind, window: WindowSpec) -> &'static TsMeta {
    let payload = scalar_type(value);
    intern(
        TsMetaKey {
            kind: TsKind::Tsw,
            payload: Some(payload as *const TypeMeta as usize),
            children: Vec::new(),
            fixed_size: None,
            window: Some(window),
            name: None,
        },
        || TsMeta {
            kind: TsKind::Tsw,
            name: match window {
                WindowSpec::Ticks { size, min_size } => {
                    format!("TSW[{}, {size}, {min_size}]", payload.name)
                }
                WindowSpec::Duration { size, min_size } => {
                    format!("TSW[{}, {size}, {min_size}]", payload.name)
                }
            },
            payload: Some(payload),
            children: Vec::new(),
            fixed_size: None,
            window: Some(window),
        },
    )
}

/// Tick-count window over a scalar.
pub fn tsw(value: ScalarKind, size: usize, min_size: usize) -> &'static TsMeta {
    assert!(size >= 1 && min_size <= size, "invalid TSW bounds: size={size}, min_size={min_size}");
    tsw_impl(value, WindowSpec::Ticks { size, min_size })
}

/// Duration window over a scalar.
pub fn tsw_duration(value: ScalarKind, size: EngineTimeDelta, min_size: EngineTimeDelta) -> &'static TsMeta {
    assert!(
        EngineTimeDelta::ZERO < size && min_size <= size,
        "invalid duration TSW bounds: size={size}, min_size={min_size}"
    );
    tsw_impl(value, WindowSpec::Duration { size, min_size })
}

/// `REF[target]` — reference to another time-series endpoint.
pub fn ts_ref(target: &'static TsMeta) -> &'static TsMeta {
    intern(
        TsMetaKey {
            kind: TsKind::Ref,
            payload: None,
            children: vec![(None, target as *const TsMeta as usize)],
            fixed_size: None,
            window: None,
            name: None,
        },
        || TsMeta {
            kind: TsKind::Ref,
            name: format!("REF[{}]", target.name),
            payload: None,
            children: vec![TsField {
                name: None,
                meta: target,
            }],
            fixed_size: None,
            window: None,
        },
    )
}

/// `SIGNAL` — timestamps only.
pub fn signal() -> &'static TsMeta {
    intern(
        TsMetaKey {
            kind: TsKind::Signal,
            payload: None,
            children: Vec::new(),
            fixed_size: None,
            window: None,
            name: None,
        },
        || TsMeta {
            kind: TsKind::Signal,
            name: "SIGNAL".to_string(),
            payload: None,
            children: Vec::new(),
            fixed_size: None,
            window: None,
        },
    )
}

fn compute_schema(meta: &'static TsMeta) -> TsSchema {
    match meta.kind {
        TsKind::Ts | TsKind::Signal | TsKind::Tsw | TsKind::Tss | TsKind::Ref => TsSchema {
            leaf_count: 1,
            time_slots: 1,
            observer_slots: 1,
            link_slots: 1,
            active_slots: 1,
            has_keyed_delta: meta.kind == TsKind::Tss,
        },
        TsKind::Tsd => TsSchema {
            leaf_count: 1,
            time_slots: 1,
            observer_slots: 1,
            link_slots: 1,
            active_slots: 1,
            has_keyed_delta: true,
        },
        TsKind::Tsb => {
            let mut acc = TsSchema {
                leaf_count: 0,
                time_slots: 1,
                observer_slots: 1,
                link_slots: 0,
                active_slots: 0,
                has_keyed_delta: false,
            };
            for field in &meta.children {
                let child = schema(field.meta);
                acc.leaf_count += child.leaf_count;
                acc.time_slots += child.time_slots;
                acc.observer_slots += child.observer_slots;
                acc.link_slots += child.link_slots;
                acc.active_slots += child.active_slots;
                acc.has_keyed_delta |= child.has_keyed_delta;
            }
            acc
        }
        TsKind::Tsl => {
            let elem = schema(meta.children[0].meta);
            let n = meta.fixed_size.unwrap_or(1);
            TsSchema {
                leaf_count: elem.leaf_count * n,
                time_slots: 1 + elem.time_slots * n,
                observer_slots: 1 + elem.observer_slots * n,
                link_slots: elem.link_slots * n,
                active_slots: elem.active_slots * n,
                has_keyed_delta: elem.has_keyed_delta,
            }
        }
    }
}

/// Derived schema for a meta, computed once and cached.
pub fn schema(meta: &'static TsMeta) -> TsSchema {
    let key = meta as *const TsMeta as usize;
    {
        let reg = REGISTRY.lock().expect("type registry poisoned");
        if let Some(s) = reg.schemas.get(&key) {
            return *s;
        }
    }
    // Computed outside the lock: children recurse into `schema` themselves.
    let computed = compute_schema(meta);
    let mut reg = REGISTRY.lock().expect("type registry poisoned");
    *reg.schemas.entry(key).or_insert(computed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_gives_pointer_identity() {
        let a = ts(ScalarKind::Int);
        let b = ts(ScalarKind::Int);
        assert!(std::ptr::eq(a, b));

        let d1 = tsd(ScalarKind::Str, a);
        let d2 = tsd(ScalarKind::Str, b);
        assert!(std::ptr::eq(d1, d2));

        assert!(!std::ptr::eq(ts(ScalarKind::Int), ts(ScalarKind::Float)));
    }

    #[test]
    fn bundle_fields_are_structural() {
        let f = ts(ScalarKind::Float);
        let i = ts(ScalarKind::Int);
        let b1 = tsb(&[("px", f), ("qty", i)], "Order");
        let b2 = tsb(&[("px", f), ("qty", i)], "Order");
        let b3 = tsb(&[("qty", i), ("px", f)], "Order");
        assert!(std::ptr::eq(b1, b2));
        assert!(!std::ptr::eq(b1, b3));
        assert_eq!(b1.child_by_name("qty").map(|(i, _)| i), Some(1));
    }

    #[test]
    fn window_params_distinguish_metas() {
        let a = tsw(ScalarKind::Int, 3, 2);
        let b = tsw(ScalarKind::Int, 3, 2);
        let c = tsw(ScalarKind::Int, 4, 2);
        assert!(std::ptr::eq(a, b));
        assert!(!std::ptr::eq(a, c));
        assert!(a.window.is_some_and(|w| !w.is_duration_based()));
    }

    #[test]
    fn schema_counts_static_structure() {
        let leaf = ts(ScalarKind::Int);
        let b = tsb(&[("a", leaf), ("b", leaf)], "Pair");
        let s = schema(b);
        assert_eq!(s.leaf_count, 2);
        assert_eq!(s.time_slots, 3);
        assert_eq!(s.link_slots, 2);

        let l = tsl(leaf, Some(4));
        assert_eq!(schema(l).leaf_count, 4);

        assert!(schema(tsd(ScalarKind::Str, leaf)).has_keyed_delta);
        assert!(!schema(leaf).has_keyed_delta);
    }
}
