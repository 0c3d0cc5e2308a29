//! Value-level type descriptors.
//!
//! A `TypeMeta` describes one payload type: its kind tag, capability flags,
//! and (for composites) the child types. Instances are interned by the
//! registry and compared by pointer; the behaviour that a C-style vtable
//! would carry (construct, equals, hash, to_string) lives on `ScalarValue`
//! and the tagged `TsData` union instead.

use bitflags::bitflags;
use std::fmt;

use tickflow_common::{ScalarKind, ScalarValue};

bitflags! {
    /// Capability flags of a payload type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u8 {
        const HASHABLE           = 1 << 0;
        const EQUATABLE          = 1 << 1;
        const COMPARABLE         = 1 << 2;
        const TRIVIALLY_COPYABLE = 1 << 3;
        const BUFFER_COMPATIBLE  = 1 << 4;
        const CONTAINER          = 1 << 5;
    }
}

/// Kind tag of a payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Scalar,
    Bundle,
    List,
    DynamicList,
    Set,
    Dict,
    Ref,
    Window,
}

/// A named child of a composite type (bundle fields carry names, list
/// elements do not).
#[derive(Debug)]
pub struct TypeField {
    pub name: Option<String>,
    pub meta: &'static TypeMeta,
}

/// Immutable run-time type descriptor. Interned: structural equality implies
/// pointer identity.
#[derive(Debug)]
pub struct TypeMeta {
    pub kind: TypeKind,
    pub name: String,
    pub flags: TypeFlags,
    /// Scalar payload kind, present iff `kind == Scalar`.
    pub scalar: Option<ScalarKind>,
    /// Child types for composites (fields, element, key/value).
    pub children: Vec<TypeField>,
}

impl TypeMeta {
    pub fn is_scalar(&self) -> bool {
        self.kind == TypeKind::Scalar
    }

    pub fn is_container(&self) -> bool {
        self.flags.contains(TypeFlags::CONTAINER)
    }

    pub fn is_hashable(&self) -> bool {
        self.flags.contains(TypeFlags::HASHABLE)
    }

    /// Default value for scalar metas; panics on composites (programmer
    /// error: composites have no single default payload).
    pub fn default_value(&self) -> ScalarValue {
        match self.scalar {
            Some(kind) => ScalarValue::default_for(kind),
            None => panic!("TypeMeta[{}] is not scalar; no default value", self.name),
        }
    }
}

impl fmt::Display for TypeMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl PartialEq for TypeMeta {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for TypeMeta {}

pub(crate) fn scalar_flags(kind: ScalarKind) -> TypeFlags {
    let base = TypeFlags::HASHABLE | TypeFlags::EQUATABLE | TypeFlags::COMPARABLE;
    match kind {
        ScalarKind::Bool | ScalarKind::Int | ScalarKind::Float | ScalarKind::Time | ScalarKind::Duration => {
            base | TypeFlags::TRIVIALLY_COPYABLE | TypeFlags::BUFFER_COMPATIBLE
        }
        ScalarKind::Str | ScalarKind::Error => base,
    }
}

pub(crate) fn scalar_name(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Bool => "bool",
        ScalarKind::Int => "int",
        ScalarKind::Float => "float",
        ScalarKind::Str => "str",
        ScalarKind::Time => "datetime",
        ScalarKind::Duration => "timedelta",
        ScalarKind::Error => "node_error",
    }
}
