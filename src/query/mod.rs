//! Query builder, index selection, and the cache-miss-to-SQL fallback
//! shared between the FLC and SLC engines.

use crate::error::{CrateError, Result};
use crate::schema::{Condition, OrderCondition, Struct};
use crate::value::Value;
use std::sync::Arc;

pub use crate::schema::Index;

/// A locking-read option; either bypasses the cache entirely (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locking {
    ShareMode,
    ForUpdate,
}

/// An escape hatch predicate attached via `QueryBuilder::sql`. Once present,
/// the planner no longer attempts index selection for this builder.
#[derive(Debug, Clone)]
pub struct RawSql {
    pub stmt: String,
    pub args: Vec<Value>,
}

/// Accumulates typed conditions over a table plus ordering and locking
/// options. Conditions materialize into typed `Value`s at push time
/// (build-on-construct), which §9's design notes call out as an accepted
/// simplification of the pool-and-deferred-build approach when pooling
/// savings are not required.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    pub table: String,
    pub conditions: Vec<Condition>,
    pub order: Vec<OrderCondition>,
    pub locking: Option<Locking>,
    pub raw_sql: Option<RawSql>,
    pub select_all: bool,
}

impl QueryBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn order_by(mut self, order: OrderCondition) -> Self {
        self.order.push(order);
        self
    }

    pub fn lock(mut self, locking: Locking) -> Self {
        self.locking = Some(locking);
        self
    }

    pub fn sql(mut self, stmt: impl Into<String>, args: Vec<Value>) -> Self {
        self.raw_sql = Some(RawSql {
            stmt: stmt.into(),
            args,
        });
        self
    }

    /// Select the whole table; always bypasses the cache.
    pub fn all(mut self) -> Self {
        self.select_all = true;
        self
    }

    /// A builder is cache-eligible iff every condition is `EQ` or `IN`, no
    /// raw SQL predicate is attached, and it isn't a locking read.
    pub fn is_cacheable(&self) -> bool {
        self.raw_sql.is_none()
            && self.locking.is_none()
            && !self.select_all
            && self.conditions.iter().all(Condition::is_index_eligible)
    }
}

/// One resolved lookup: the index it matched, the bound values in index
/// column order, and the cache key those values produce.
#[derive(Debug, Clone)]
pub struct PlannedQuery {
    pub index: Index,
    pub values: Vec<Value>,
    pub cache_key: String,
}

/// The planner's output: which index was selected, the per-query cache
/// keys (after IN expansion), and any raw SQL / locking option carried
/// through from the builder.
#[derive(Debug, Clone)]
pub struct Queries {
    pub table: String,
    pub select_all: bool,
    pub index: Option<Index>,
    pub planned: Vec<PlannedQuery>,
    pub raw_sql: Option<RawSql>,
    pub locking: Option<Locking>,
    pub order: Vec<OrderCondition>,
    pub residual: Vec<Condition>,
}

impl Queries {
    pub fn is_locking(&self) -> bool {
        self.locking.is_some()
    }

    pub fn bypasses_cache(&self) -> bool {
        self.select_all || self.raw_sql.is_some() || self.locking.is_some() || self.index.is_none()
    }
}

/// Build a `Queries` plan from a builder and the table's schema (§4.3).
/// `shard_key` is the table's configured shard-routing column, if any; it
/// feeds the cache key's shard suffix (§3/§6) and must match what the
/// write path passes so both sides hash the same key.
pub fn build(builder: &QueryBuilder, schema: &Arc<Struct>, shard_key: Option<&str>) -> Result<Queries> {
    if builder.select_all || (builder.conditions.is_empty() && builder.raw_sql.is_none()) {
        return Ok(Queries {
            table: builder.table.clone(),
            select_all: true,
            index: None,
            planned: Vec::new(),
            raw_sql: builder.raw_sql.clone(),
            locking: builder.locking,
            order: builder.order.clone(),
            residual: Vec::new(),
        });
    }

    if builder.raw_sql.is_some() || builder.locking.is_some() {
        return Ok(Queries {
            table: builder.table.clone(),
            select_all: false,
            index: None,
            planned: Vec::new(),
            raw_sql: builder.raw_sql.clone(),
            locking: builder.locking,
            order: builder.order.clone(),
            residual: builder.conditions.clone(),
        });
    }

    let in_conditions: Vec<&Condition> = builder
        .conditions
        .iter()
        .filter(|c| matches!(c, Condition::In { .. }))
        .collect();
    if in_conditions.len() > 1 {
        return Err(CrateError::MultipleINQueries);
    }

    let columns: Vec<String> = builder
        .conditions
        .iter()
        .map(|c| c.column().to_string())
        .collect();

    let Some(index) = select_index(schema, &columns) else {
        return Ok(Queries {
            table: builder.table.clone(),
            select_all: false,
            index: None,
            planned: Vec::new(),
            raw_sql: None,
            locking: None,
            order: builder.order.clone(),
            residual: builder.conditions.clone(),
        });
    };

    let indexed: Vec<&Condition> = index
        .columns
        .iter()
        .map(|col| {
            builder
                .conditions
                .iter()
                .find(|c| c.column() == col)
                .expect("select_index only selects columns present in conditions")
        })
        .collect();

    let residual: Vec<Condition> = builder
        .conditions
        .iter()
        .filter(|c| !index.columns.contains(&c.column().to_string()))
        .cloned()
        .collect();

    let combinations = expand_in(&indexed)?;
    let mut planned = Vec::with_capacity(combinations.len());
    for values in combinations {
        let cache_key = schema.cache_key_for(&index, &values, shard_key)?;
        planned.push(PlannedQuery {
            index: index.clone(),
            values,
            cache_key,
        });
    }

    Ok(Queries {
        table: builder.table.clone(),
        select_all: false,
        index: Some(index),
        planned,
        raw_sql: None,
        locking: None,
        order: builder.order.clone(),
        residual,
    })
}

/// Given condition columns in the order supplied, try each non-empty prefix
/// longest-first against the schema's declared (and prefix-expanded) lookup
/// indexes, themselves iterated in declared order.
fn select_index(schema: &Struct, condition_columns: &[String]) -> Option<Index> {
    let lookup = schema.lookup_indexes();
    for len in (1..=condition_columns.len()).rev() {
        let candidate = condition_columns[..len].join(":");
        for idx in &lookup {
            if idx.joined_columns() == candidate {
                return Some(idx.clone());
            }
        }
    }
    None
}

/// Produce one value combination per `IN` value, crossed with the other
/// `EQ` conditions' single values, in index column order.
fn expand_in(indexed: &[&Condition]) -> Result<Vec<Vec<Value>>> {
    let in_pos = indexed.iter().position(|c| matches!(c, Condition::In { .. }));

    let Some(in_pos) = in_pos else {
        let values = indexed
            .iter()
            .map(|c| match c {
                Condition::Compare { value, .. } => Ok(value.clone()),
                Condition::In { .. } => unreachable!(),
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(vec![values]);
    };

    let Condition::In { values: in_values, .. } = indexed[in_pos] else {
        unreachable!()
    };

    let mut combinations = Vec::with_capacity(in_values.len());
    for in_value in in_values {
        let mut row = Vec::with_capacity(indexed.len());
        for (i, c) in indexed.iter().enumerate() {
            if i == in_pos {
                row.push(in_value.clone());
            } else if let Condition::Compare { value, .. } = c {
                row.push(value.clone());
            }
        }
        combinations.push(row);
    }
    Ok(combinations)
}

/// Combine the cache-miss queries' predicates into a single `SELECT`: `=`
/// for columns where every miss shares the same value, `IN (…)` otherwise.
pub fn cache_miss_queries_to_sql(table: &str, index: &Index, misses: &[PlannedQuery]) -> (String, Vec<Value>) {
    let mut clauses = Vec::with_capacity(index.columns.len());
    let mut args = Vec::new();

    for (col_idx, col) in index.columns.iter().enumerate() {
        let mut distinct: Vec<Value> = Vec::new();
        for miss in misses {
            let v = &miss.values[col_idx];
            if !distinct.iter().any(|existing| existing == v) {
                distinct.push(v.clone());
            }
        }
        if distinct.len() == 1 {
            clauses.push(format!("{} = ?", col));
            args.push(distinct.into_iter().next().unwrap());
        } else {
            let placeholders = vec!["?"; distinct.len()].join(", ");
            clauses.push(format!("{} IN ({})", col, placeholders));
            args.extend(distinct);
        }
    }

    let sql = format!("SELECT * FROM {} WHERE {}", table, clauses.join(" AND "));
    (sql, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Index as SchemaIndex, IndexKind};
    use crate::value::Kind;

    fn schema() -> Arc<Struct> {
        Arc::new(Struct::new(
            "users",
            vec![
                ("id".into(), Kind::Int),
                ("org".into(), Kind::Int),
                ("name".into(), Kind::String),
            ],
            vec![
                SchemaIndex::new(IndexKind::PrimaryKey, vec!["id".into()]),
                SchemaIndex::new(IndexKind::Key, vec!["org".into(), "name".into()]),
            ],
        ))
    }

    #[test]
    fn eq_on_primary_key_selects_primary_index() {
        let schema = schema();
        let builder = QueryBuilder::new("users").condition(Condition::eq("id", Value::Int(1)));
        let plan = build(&builder, &schema, None).unwrap();
        assert_eq!(plan.index.unwrap().columns, vec!["id"]);
        assert_eq!(plan.planned.len(), 1);
    }

    #[test]
    fn longest_prefix_wins() {
        let schema = schema();
        let builder = QueryBuilder::new("users")
            .condition(Condition::eq("org", Value::Int(5)))
            .condition(Condition::eq("name", Value::String("a".into())));
        let plan = build(&builder, &schema, None).unwrap();
        assert_eq!(plan.index.unwrap().columns, vec!["org", "name"]);
    }

    #[test]
    fn in_expands_to_one_query_per_value() {
        let schema = schema();
        let builder =
            QueryBuilder::new("users").condition(Condition::r#in("id", vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
        let plan = build(&builder, &schema, None).unwrap();
        assert_eq!(plan.planned.len(), 3);
    }

    #[test]
    fn multiple_in_conditions_reject() {
        let schema = schema();
        let builder = QueryBuilder::new("users")
            .condition(Condition::r#in("id", vec![Value::Int(1)]))
            .condition(Condition::r#in("org", vec![Value::Int(1)]));
        assert!(matches!(
            build(&builder, &schema, None),
            Err(CrateError::MultipleINQueries)
        ));
    }

    #[test]
    fn neq_is_never_index_eligible() {
        let builder = QueryBuilder::new("users").condition(Condition::neq("id", Value::Int(1)));
        assert!(!builder.is_cacheable());
    }

    #[test]
    fn cache_miss_queries_combine_with_in_when_values_differ() {
        let idx = SchemaIndex::new(IndexKind::PrimaryKey, vec!["id".into()]);
        let misses = vec![
            PlannedQuery {
                index: idx.clone(),
                values: vec![Value::Int(1)],
                cache_key: "k1".into(),
            },
            PlannedQuery {
                index: idx.clone(),
                values: vec![Value::Int(2)],
                cache_key: "k2".into(),
            },
        ];
        let (sql, args) = cache_miss_queries_to_sql("users", &idx, &misses);
        assert!(sql.contains("IN (?, ?)"));
        assert_eq!(args.len(), 2);
    }
}
