use crate::error::Result;
use crate::value::{CompareOp, Value};

/// A single typed predicate over one column. `In` carries the full value
/// set; the query builder expands it into per-value queries (§4.3), but the
/// condition itself still evaluates directly against a record for the
/// residual-filter path.
#[derive(Debug, Clone)]
pub enum Condition {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Condition::Compare {
            column: column.into(),
            op: CompareOp::Eq,
            value,
        }
    }

    pub fn neq(column: impl Into<String>, value: Value) -> Self {
        Condition::Compare {
            column: column.into(),
            op: CompareOp::Neq,
            value,
        }
    }

    pub fn lt(column: impl Into<String>, value: Value) -> Self {
        Condition::Compare {
            column: column.into(),
            op: CompareOp::Lt,
            value,
        }
    }

    pub fn lte(column: impl Into<String>, value: Value) -> Self {
        Condition::Compare {
            column: column.into(),
            op: CompareOp::Lte,
            value,
        }
    }

    pub fn gt(column: impl Into<String>, value: Value) -> Self {
        Condition::Compare {
            column: column.into(),
            op: CompareOp::Gt,
            value,
        }
    }

    pub fn gte(column: impl Into<String>, value: Value) -> Self {
        Condition::Compare {
            column: column.into(),
            op: CompareOp::Gte,
            value,
        }
    }

    pub fn r#in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Condition::In {
            column: column.into(),
            values,
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Condition::Compare { column, .. } => column,
            Condition::In { column, .. } => column,
        }
    }

    /// Whether the planner may use this condition to select a cache index:
    /// only `EQ`/`IN` are index-eligible, `NEQ` never is.
    pub fn is_index_eligible(&self) -> bool {
        matches!(
            self,
            Condition::Compare {
                op: CompareOp::Eq,
                ..
            } | Condition::In { .. }
        )
    }

    pub fn evaluate(&self, actual: &Value) -> Result<bool> {
        match self {
            Condition::Compare { op, value, .. } => {
                let ordering = actual.compare(value)?;
                Ok(op.matches(Some(ordering)))
            }
            Condition::In { values, .. } => {
                for candidate in values {
                    if actual == candidate {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct OrderCondition {
    pub column: String,
    pub direction: OrderDirection,
}

impl OrderCondition {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Desc,
        }
    }
}
