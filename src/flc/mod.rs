//! First-level cache: a full-table preload into per-index ordered trees
//! (§4.4). Read-only — there is no write path and no invalidation; callers
//! that mutate a preloaded table concurrently get stale reads, same as the
//! teacher's in-memory index structures assume a quiescent build phase.

use crate::error::{CrateError, Result};
use crate::index::BTree;
use crate::query::QueryBuilder;
use crate::schema::{Condition, Index, Struct, StructSliceValue, StructValue};
use crate::store::{DdlParser, SqlExecutor};
use crate::value::{CompareOp, Value};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// FLC's polymorphic leaf payload: a terminal record group for the last
/// column of an index, or a nested tree keyed by the next column. Modeling
/// this as an enum rather than a trait object lets the search routine
/// recurse without a runtime downcast.
#[derive(Clone)]
pub enum IndexLeaf {
    Values(StructSliceValue),
    Nested(Box<BTree<IndexLeaf>>),
}

/// Preloaded, read-only table cache: one ordered tree per declared index,
/// plus the primary key's full in-order traversal cached as `find_all`.
pub struct FlcEngine {
    schema: Arc<Struct>,
    /// Keyed by the index's joined column list (e.g. `"id"`, `"org:name"`).
    index_trees: HashMap<String, BTree<IndexLeaf>>,
    find_all: StructSliceValue,
}

impl FlcEngine {
    /// Warm up by parsing the table's DDL for its constraints, then loading
    /// every row via `SELECT * FROM <table>` and building one tree per
    /// declared index (§4.4). `columns` supplies each column's declared
    /// [`crate::value::Kind`] since DDL constraint extraction alone does not
    /// carry full type information.
    pub async fn warm_up(
        table: &str,
        create_table_sql: &str,
        columns: Vec<(String, crate::value::Kind)>,
        ddl: &dyn DdlParser,
        sql: &dyn SqlExecutor,
    ) -> Result<Self> {
        let constraints = ddl.parse_constraints(create_table_sql)?;
        let indexes = constraints
            .into_iter()
            .map(|c| Index::new(c.kind, c.columns))
            .collect();
        let schema = Arc::new(Struct::new(table, columns, indexes));

        let select_sql = format!("SELECT * FROM {}", table);
        let rows = sql.query(&select_sql, &[]).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let mut fields = IndexMap::new();
            for (col, _) in &schema.columns {
                if let Some(v) = row.0.get(col) {
                    fields.insert(col.clone(), v.clone());
                }
            }
            records.push(StructValue::new(schema.clone(), fields));
        }

        Self::from_records(schema, records)
    }

    /// Build directly from already-decoded records, for tests and for
    /// callers that already hold a warmed-up row set.
    pub fn from_records(schema: Arc<Struct>, records: Vec<StructValue>) -> Result<Self> {
        let mut index_trees = HashMap::new();
        for index in &schema.indexes {
            let tree = build_index_tree(&index.columns, &records);
            index_trees.insert(index.joined_columns(), tree);
        }

        let find_all = if let Some(pk) = schema.primary_key() {
            let tree = index_trees
                .get(&pk.joined_columns())
                .expect("primary key tree was just built");
            flatten(tree)
        } else {
            StructSliceValue(records.clone())
        };

        Ok(Self {
            schema,
            index_trees,
            find_all,
        })
    }

    pub fn schema(&self) -> &Arc<Struct> {
        &self.schema
    }

    /// `SearchEq` on the primary-key tree; a match count other than one is
    /// an error, not an empty result.
    pub fn find_by_primary_key(&self, key: &Value) -> Result<StructValue> {
        let pk = self
            .schema
            .primary_key()
            .ok_or(CrateError::LookUpIndexFromQuery)?;
        let tree = self
            .index_trees
            .get(&pk.joined_columns())
            .ok_or(CrateError::LookUpIndexFromQuery)?;

        let leaf = tree
            .search_eq(key)
            .ok_or_else(|| CrateError::RecordNotFoundByPrimaryKey(format!("{:?}", key)))?;

        match leaf {
            IndexLeaf::Values(values) if values.len() == 1 => {
                Ok(values.0.into_iter().next().unwrap())
            }
            IndexLeaf::Values(values) => Err(CrateError::InvalidLeafs(values.len())),
            IndexLeaf::Nested(_) => Err(CrateError::InvalidLeafs(0)),
        }
    }

    /// `findAll`, cached at warm-up as the primary key's in-order traversal.
    pub fn find_all(&self) -> &StructSliceValue {
        &self.find_all
    }

    /// Pick an index tree via the longest contiguous column prefix with a
    /// bound condition, descend it level by level using each level's
    /// condition operator, then apply every condition as a final filter
    /// pass (a no-op for already-matched columns, a real filter for any
    /// condition on a column the index didn't cover) and sort (§4.4 steps
    /// 1–3).
    pub fn find_by_query_builder(&self, builder: &QueryBuilder) -> Result<StructSliceValue> {
        if builder.conditions.is_empty() {
            let mut out = self.find_all.clone();
            out.sort(&builder.order);
            return Ok(out);
        }

        let by_column: HashMap<&str, &Condition> = builder
            .conditions
            .iter()
            .map(|c| (c.column(), c))
            .collect();

        let Some(index) = select_index(&self.schema, &by_column) else {
            warn!(table = %self.schema.table, "no matching index, falling back to full scan");
            let mut out = self.find_all.filter(&builder.conditions)?;
            out.sort(&builder.order);
            return Ok(out);
        };

        let tree = self
            .index_trees
            .get(&index.joined_columns())
            .ok_or(CrateError::LookUpIndexFromQuery)?;

        let mut out = descend(tree, &index.columns, &by_column)?;
        out = out.filter(&builder.conditions)?;
        out.sort(&builder.order);
        Ok(out)
    }
}

/// The declared index whose leading columns have the longest run of bound
/// conditions, starting from its first column.
fn select_index<'a>(schema: &'a Struct, by_column: &HashMap<&str, &Condition>) -> Option<&'a Index> {
    schema
        .indexes
        .iter()
        .filter(|idx| by_column.contains_key(idx.columns[0].as_str()))
        .max_by_key(|idx| {
            idx.columns
                .iter()
                .take_while(|c| by_column.contains_key(c.as_str()))
                .count()
        })
}

/// Descend `tree` one level per entry of `index_columns`: a level with a
/// bound condition narrows via that condition's operator; a level without
/// one is fully flattened (every payload at that level is taken).
fn descend(
    tree: &BTree<IndexLeaf>,
    index_columns: &[String],
    by_column: &HashMap<&str, &Condition>,
) -> Result<StructSliceValue> {
    let Some((column, rest)) = index_columns.split_first() else {
        return Ok(StructSliceValue::new());
    };

    let leaves = match by_column.get(column.as_str()) {
        Some(condition) => level_search(tree, condition),
        None => tree.all(),
    };

    let mut out = StructSliceValue::new();
    for leaf in leaves {
        match leaf {
            IndexLeaf::Values(values) => out.extend(values),
            IndexLeaf::Nested(nested) => out.extend(descend(&nested, rest, by_column)?),
        }
    }
    Ok(out)
}

/// One level's search, dispatching on the condition's operator. `Neq` and
/// any condition this tree cannot narrow by key fall back to taking every
/// entry at this level; the final filter pass in the caller still applies
/// the condition.
fn level_search(tree: &BTree<IndexLeaf>, condition: &Condition) -> Vec<IndexLeaf> {
    match condition {
        Condition::Compare { op, value, .. } => match op {
            CompareOp::Eq => tree.search_eq(value).into_iter().collect(),
            CompareOp::Lt => tree.search_lt(value),
            CompareOp::Lte => tree.search_lte(value),
            CompareOp::Gt => tree.search_gt(value),
            CompareOp::Gte => tree.search_gte(value),
            CompareOp::Neq => tree.all(),
        },
        Condition::In { values, .. } => values.iter().filter_map(|v| tree.search_eq(v)).collect(),
    }
}

/// Group `records` by `columns[0]`'s value; each group becomes either a
/// terminal `Values` leaf (last column) or a `Nested` tree built recursively
/// over the remaining columns and that group's records.
fn build_index_tree(columns: &[String], records: &[StructValue]) -> BTree<IndexLeaf> {
    let tree = BTree::new();
    let Some((first, rest)) = columns.split_first() else {
        return tree;
    };

    let mut groups: IndexMap<Value, Vec<StructValue>> = IndexMap::new();
    for record in records {
        let key = record.get(first).cloned().unwrap_or(Value::Nil);
        groups.entry(key).or_default().push(record.clone());
    }

    for (key, group) in groups {
        let leaf = if rest.is_empty() {
            IndexLeaf::Values(StructSliceValue(group))
        } else {
            IndexLeaf::Nested(Box::new(build_index_tree(rest, &group)))
        };
        tree.insert(key, leaf);
    }
    tree
}

fn flatten(tree: &BTree<IndexLeaf>) -> StructSliceValue {
    let mut out = StructSliceValue::new();
    for (_, leaf) in tree.all_entries() {
        match leaf {
            IndexLeaf::Values(values) => out.extend(values),
            IndexLeaf::Nested(nested) => out.extend(flatten(&nested)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Condition, Index, IndexKind, OrderCondition};
    use crate::value::Kind;

    fn demo() -> FlcEngine {
        let schema = Arc::new(Struct::new(
            "t",
            vec![("id".into(), Kind::Int), ("name".into(), Kind::String)],
            vec![Index::new(IndexKind::PrimaryKey, vec!["id".into()])],
        ));
        let records = vec![(1, "a"), (2, "b"), (3, "c")]
            .into_iter()
            .map(|(id, name)| {
                let mut fields = IndexMap::new();
                fields.insert("id".to_string(), Value::Int(id));
                fields.insert("name".to_string(), Value::String(name.to_string()));
                StructValue::new(schema.clone(), fields)
            })
            .collect();
        FlcEngine::from_records(schema, records).unwrap()
    }

    #[test]
    fn equality_lookup_returns_single_row() {
        let flc = demo();
        let builder = QueryBuilder::new("t").condition(Condition::eq("id", Value::Int(2)));
        let result = flc.find_by_query_builder(&builder).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.0[0].get("name"), Some(&Value::String("b".into())));
    }

    #[test]
    fn range_and_sort_descending() {
        let flc = demo();
        let builder = QueryBuilder::new("t")
            .condition(Condition::gte("id", Value::Int(2)))
            .order_by(OrderCondition::desc("id"));
        let result = flc.find_by_query_builder(&builder).unwrap();
        let ids: Vec<i64> = result
            .0
            .iter()
            .map(|r| match r.get("id") {
                Some(Value::Int(v)) => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[test]
    fn primary_key_lookup() {
        let flc = demo();
        let record = flc.find_by_primary_key(&Value::Int(2)).unwrap();
        assert_eq!(record.get("name"), Some(&Value::String("b".into())));
        assert!(flc.find_by_primary_key(&Value::Int(99)).is_err());
    }

    #[test]
    fn find_all_is_ascending_by_primary_key() {
        let flc = demo();
        let ids: Vec<i64> = flc
            .find_all()
            .0
            .iter()
            .map(|r| match r.get("id") {
                Some(Value::Int(v)) => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn no_matching_index_falls_back_to_full_scan() {
        let flc = demo();
        let builder = QueryBuilder::new("t").condition(Condition::eq("name", Value::String("c".into())));
        let result = flc.find_by_query_builder(&builder).unwrap();
        assert_eq!(result.len(), 1);
    }
}
