use super::Value;
use crate::error::{CrateError, Result};
use std::cmp::Ordering;

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Nil => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(v) | Value::Int64(v) => v.hash(state),
            Value::Int8(v) => v.hash(state),
            Value::Int16(v) => v.hash(state),
            Value::Int32(v) => v.hash(state),
            Value::Uint(v) | Value::Uint64(v) => v.hash(state),
            Value::Uint8(v) => v.hash(state),
            Value::Uint16(v) => v.hash(state),
            Value::Uint32(v) => v.hash(state),
            Value::Float32(v) => v.to_bits().hash(state),
            Value::Float64(v) => v.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Time(t) => t.hash(state),
            Value::Slice(items) => items.hash(state),
            Value::Struct(fields) => {
                for (k, v) in fields {
                    k.hash(state);
                    v.hash(state);
                }
            }
        }
    }
}

/// `nil` compares equal only to `nil` and less than anything else; numeric
/// kinds (including `Time`, a microsecond count) widen to `i128` before
/// comparing; strings/bytes compare lexicographically. Cross-kind
/// comparisons outside of those rules have no defined ordering and are
/// rejected at the query layer via [`Value::compare`].
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Nil, Value::Nil) => Some(Ordering::Equal),
            (Value::Nil, _) => Some(Ordering::Less),
            (_, Value::Nil) => Some(Ordering::Greater),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.partial_cmp(b),
            (Value::Slice(a), Value::Slice(b)) => a.partial_cmp(b),
            _ if self.is_numeric() && other.is_numeric() => self.as_i128().and_then(|a| {
                other.as_i128().map(|b| a.cmp(&b))
            }),
            _ if self.is_float() && other.is_float() => {
                let (a, b) = (self.as_f64()?, other.as_f64()?);
                if a.is_nan() && b.is_nan() {
                    Some(Ordering::Equal)
                } else if a.is_nan() {
                    Some(Ordering::Greater)
                } else if b.is_nan() {
                    Some(Ordering::Less)
                } else {
                    a.partial_cmp(&b)
                }
            }
            _ if (self.is_numeric() && other.is_float()) || (self.is_float() && other.is_numeric()) => {
                let a = self.as_f64().or_else(|| self.as_i128().map(|v| v as f64))?;
                let b = other.as_f64().or_else(|| other.as_i128().map(|v| v as f64))?;
                a.partial_cmp(&b)
            }
            _ => None,
        }
    }
}

/// Used for index-tree key ordering, where keys within a tree are always the
/// same declared column kind; incompatible kinds fall back to `Equal` rather
/// than panicking, since `Ord` cannot return an error.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other).unwrap_or(Ordering::Equal)
    }
}

impl Value {
    /// Compare two values for the query layer, surfacing an error on
    /// incompatible kinds instead of silently falling back to `Equal`.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        self.partial_cmp(other).ok_or_else(|| {
            CrateError::InvalidColumnType {
                column: String::new(),
                expected: format!("{:?}", self.kind()),
                actual: format!("{:?}", other.kind()),
            }
        })
    }
}
