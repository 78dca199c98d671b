//! Tagged dynamic value used across the query builder, index tree and codec.
//!
//! `Value` is a closed sum type over kinds with a stable tag, per the design
//! note that dynamic-typed values should dispatch on a kind tag rather than
//! through reflection. Comparisons, hashing and the binary codec all switch
//! on that tag directly.

mod codec;
mod hash;
mod ord;
mod serde_impl;

pub use codec::{decode_value, encode_value};
pub use hash::stable_hash;

use std::collections::BTreeMap;

/// A single dynamically-typed field value.
///
/// Numeric kinds are modeled with their native widths so the codec can emit
/// the narrowest tag, but comparisons between numeric kinds widen to `i128`
/// (signed) or `f64` (floating) before comparing, per the widening rule.
/// `Serialize`/`Deserialize` are hand-written in `serde_impl` rather than
/// derived: a derived enum impl would wrap every value in serde's
/// externally-tagged representation (a one-entry map keyed by variant name),
/// which is not the MessagePack-native per-kind layout the wire format calls
/// for. See `serde_impl` for the tag-per-kind encoding and the width
/// collapse this implies on decode.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Uint(u64),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Microseconds since the Unix epoch.
    Time(i64),
    Slice(Vec<Value>),
    Struct(BTreeMap<String, Value>),
}

/// The closed set of value kinds, used as the codec tag and for cross-kind
/// comparison rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Nil,
    Bool,
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    String,
    Bytes,
    Time,
    Slice,
    Struct,
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Nil => Kind::Nil,
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::Int8(_) => Kind::Int8,
            Value::Int16(_) => Kind::Int16,
            Value::Int32(_) => Kind::Int32,
            Value::Int64(_) => Kind::Int64,
            Value::Uint(_) => Kind::Uint,
            Value::Uint8(_) => Kind::Uint8,
            Value::Uint16(_) => Kind::Uint16,
            Value::Uint32(_) => Kind::Uint32,
            Value::Uint64(_) => Kind::Uint64,
            Value::Float32(_) => Kind::Float32,
            Value::Float64(_) => Kind::Float64,
            Value::String(_) => Kind::String,
            Value::Bytes(_) => Kind::Bytes,
            Value::Time(_) => Kind::Time,
            Value::Slice(_) => Kind::Slice,
            Value::Struct(_) => Kind::Struct,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self.kind(),
            Kind::Int
                | Kind::Int8
                | Kind::Int16
                | Kind::Int32
                | Kind::Int64
                | Kind::Uint
                | Kind::Uint8
                | Kind::Uint16
                | Kind::Uint32
                | Kind::Uint64
                | Kind::Time
        )
    }

    fn is_float(&self) -> bool {
        matches!(self.kind(), Kind::Float32 | Kind::Float64)
    }

    /// Widen an integer-kinded value to `i128` for cross-width comparison.
    /// `Time` widens here too: it is a plain microsecond count on the wire
    /// (see `serde_impl`), so after a codec round-trip it decodes back as
    /// `Int64` and must still compare equal to the original `Time`.
    fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Int(v) | Value::Int64(v) => Some(*v as i128),
            Value::Int8(v) => Some(*v as i128),
            Value::Int16(v) => Some(*v as i128),
            Value::Int32(v) => Some(*v as i128),
            Value::Uint(v) | Value::Uint64(v) => Some(*v as i128),
            Value::Uint8(v) => Some(*v as i128),
            Value::Uint16(v) => Some(*v as i128),
            Value::Uint32(v) => Some(*v as i128),
            Value::Time(v) => Some(*v as i128),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }
}

/// The comparison operators the query builder and index tree evaluate
/// conditions with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    pub fn matches(self, ordering: Option<std::cmp::Ordering>) -> bool {
        use std::cmp::Ordering::*;
        match (self, ordering) {
            (CompareOp::Eq, Some(Equal)) => true,
            (CompareOp::Neq, Some(o)) => o != Equal,
            (CompareOp::Lt, Some(Less)) => true,
            (CompareOp::Lte, Some(Less | Equal)) => true,
            (CompareOp::Gt, Some(Greater)) => true,
            (CompareOp::Gte, Some(Greater | Equal)) => true,
            _ => false,
        }
    }
}
