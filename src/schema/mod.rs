//! Per-table record shape: ordered columns, per-column kind, and declared
//! indexes, plus the record types (`StructValue`/`StructSliceValue`) that
//! carry a schema back-reference.

mod condition;

pub use condition::{Condition, OrderCondition, OrderDirection};

use crate::error::{CrateError, Result};
use crate::value::{stable_hash, Kind, Value};
use indexmap::IndexMap;
use std::sync::Arc;

/// The three constraint kinds a DDL parse can surface, per the consumed DDL
/// parser interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    PrimaryKey,
    UniqueKey,
    Key,
}

/// A declared index: its kind, its ordered column list, and each column's
/// kind (needed to decode cache-key values back into typed `Value`s).
#[derive(Debug, Clone)]
pub struct Index {
    pub kind: IndexKind,
    pub columns: Vec<String>,
}

impl Index {
    pub fn new(kind: IndexKind, columns: Vec<String>) -> Self {
        Self { kind, columns }
    }

    /// `indexColsJoined` from the cache-key byte layout: `c1:c2:…`.
    pub fn joined_columns(&self) -> String {
        self.columns.join(":")
    }

    /// The SLC primary/unique/secondary cache key:
    /// `r/slc/<table>/<indexColsJoined>#<valuesJoined>`, plus a `/shard=`
    /// suffix when a shard-routing value is available (§3/§4.1/§4.5/§6):
    /// the configured `shard_key` column's value if this index carries it,
    /// else the table's first primary-key column's value if this index
    /// carries that instead. An index whose columns include neither (e.g.
    /// most secondary indexes) gets no shard suffix — there is no record
    /// context available at this call to fall back to.
    pub fn cache_key(
        &self,
        table: &str,
        values: &[Value],
        shard_key: Option<&str>,
        primary_key_column: Option<&str>,
    ) -> Result<String> {
        if values.len() != self.columns.len() {
            return Err(CrateError::InvalidQuery(format!(
                "index on {:?} expects {} value(s), got {}",
                self.columns,
                self.columns.len(),
                values.len()
            )));
        }
        let joined_values = values
            .iter()
            .map(value_to_key_fragment)
            .collect::<Vec<_>>()
            .join(":");
        let mut key = format!("r/slc/{}/{}#{}", table, self.joined_columns(), joined_values);
        if let Some(shard_value) = self.shard_routing_value(values, shard_key, primary_key_column) {
            key.push_str(&format!("/shard={}", stable_hash(shard_value)));
        }
        Ok(key)
    }

    fn shard_routing_value<'a>(
        &self,
        values: &'a [Value],
        shard_key: Option<&str>,
        primary_key_column: Option<&str>,
    ) -> Option<&'a Value> {
        let position = |column: &str| self.columns.iter().position(|c| c == column);
        shard_key
            .and_then(position)
            .or_else(|| primary_key_column.and_then(position))
            .map(|i| &values[i])
    }
}

/// Canonical textual fragment of a value as it appears inside a cache key.
fn value_to_key_fragment(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(v) | Value::Int64(v) => v.to_string(),
        Value::Int8(v) => v.to_string(),
        Value::Int16(v) => v.to_string(),
        Value::Int32(v) => v.to_string(),
        Value::Uint(v) | Value::Uint64(v) => v.to_string(),
        Value::Uint8(v) => v.to_string(),
        Value::Uint16(v) => v.to_string(),
        Value::Uint32(v) => v.to_string(),
        Value::Float32(v) => v.to_string(),
        Value::Float64(v) => v.to_string(),
        Value::String(s) => s.clone(),
        Value::Bytes(b) => hex_encode(b),
        Value::Time(t) => t.to_string(),
        Value::Slice(_) | Value::Struct(_) => {
            // Composite values never appear alone in an index column; this
            // is reachable only for malformed input.
            String::new()
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Per-table record shape.
#[derive(Debug, Clone)]
pub struct Struct {
    pub table: String,
    pub columns: Vec<(String, Kind)>,
    /// Indexes as declared in DDL, in declared order. Iteration during
    /// planning walks this `Vec` in order rather than any hash-map order,
    /// per the resolved "declared order" open question (see DESIGN.md).
    pub indexes: Vec<Index>,
}

impl Struct {
    pub fn new(table: impl Into<String>, columns: Vec<(String, Kind)>, indexes: Vec<Index>) -> Self {
        Self {
            table: table.into(),
            columns,
            indexes,
        }
    }

    pub fn column_kind(&self, name: &str) -> Option<Kind> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, k)| *k)
    }

    pub fn primary_key(&self) -> Option<&Index> {
        self.indexes
            .iter()
            .find(|idx| idx.kind == IndexKind::PrimaryKey)
    }

    /// Build `index`'s cache key, resolving the shard-routing fallback
    /// (configured `shard_key` column, else the table's first primary-key
    /// column) against this schema so every call site shards consistently.
    pub fn cache_key_for(&self, index: &Index, values: &[Value], shard_key: Option<&str>) -> Result<String> {
        let primary_key_column = self
            .primary_key()
            .and_then(|pk| pk.columns.first())
            .map(|s| s.as_str());
        index.cache_key(&self.table, values, shard_key, primary_key_column)
    }

    /// Expand every declared index into its non-empty column prefixes so the
    /// planner can match any prefix, per the schema invariant in §3: for a
    /// declared index `(c1,…,cn)`, every prefix `(c1), (c1,c2), …` is also a
    /// lookup-able index. Each expanded prefix inherits its parent's kind
    /// except that a true prefix of a unique/primary index is only as
    /// selective as a `Key` lookup (it may resolve to several rows), so
    /// non-full-length prefixes are downgraded to `Key`.
    pub fn lookup_indexes(&self) -> Vec<Index> {
        let mut expanded = Vec::new();
        for index in &self.indexes {
            for len in 1..=index.columns.len() {
                let columns = index.columns[..len].to_vec();
                let kind = if len == index.columns.len() {
                    index.kind
                } else {
                    IndexKind::Key
                };
                expanded.push(Index::new(kind, columns));
            }
        }
        expanded
    }
}

/// Ordered map from column name to value, plus a back-reference to its
/// schema. Every column declared by the schema is present, nil-valued if
/// absent in the source row.
#[derive(Debug, Clone)]
pub struct StructValue {
    pub schema: Arc<Struct>,
    fields: IndexMap<String, Value>,
}

impl StructValue {
    pub fn new(schema: Arc<Struct>, fields: IndexMap<String, Value>) -> Self {
        let mut fields = fields;
        for (name, _) in &schema.columns {
            fields.entry(name.clone()).or_insert(Value::Nil);
        }
        Self { schema, fields }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn set(&mut self, column: &str, value: Value) {
        self.fields.insert(column.to_string(), value);
    }

    /// Values in schema column order, for record encoding.
    pub fn ordered_values(&self) -> Vec<Value> {
        self.schema
            .columns
            .iter()
            .map(|(name, _)| self.fields.get(name).cloned().unwrap_or(Value::Nil))
            .collect()
    }

    pub fn matches(&self, condition: &Condition) -> Result<bool> {
        let value = self
            .get(&condition.column)
            .ok_or_else(|| CrateError::UnknownColumnName(condition.column.clone()))?;
        condition.evaluate(value)
    }
}

/// A slice of records sharing a schema.
#[derive(Debug, Clone, Default)]
pub struct StructSliceValue(pub Vec<StructValue>);

impl StructSliceValue {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn append(&mut self, record: StructValue) {
        self.0.push(record);
    }

    pub fn extend(&mut self, other: StructSliceValue) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn filter(&self, conditions: &[Condition]) -> Result<StructSliceValue> {
        let mut out = Vec::with_capacity(self.0.len());
        for record in &self.0 {
            let mut keep = true;
            for condition in conditions {
                if !record.matches(condition)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                out.push(record.clone());
            }
        }
        Ok(StructSliceValue(out))
    }

    pub fn sort(&mut self, order: &[OrderCondition]) {
        self.0.sort_by(|a, b| {
            for clause in order {
                let (av, bv) = (a.get(&clause.column), b.get(&clause.column));
                let ordering = av.cmp(&bv);
                let ordering = match clause.direction {
                    OrderDirection::Asc => ordering,
                    OrderDirection::Desc => ordering.reverse(),
                };
                if ordering != std::cmp::Ordering::Equal {
                    return ordering;
                }
            }
            std::cmp::Ordering::Equal
        });
    }
}

impl IntoIterator for StructSliceValue {
    type Item = StructValue;
    type IntoIter = std::vec::IntoIter<StructValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_schema() -> Arc<Struct> {
        Arc::new(Struct::new(
            "t",
            vec![("id".into(), Kind::Int), ("name".into(), Kind::String)],
            vec![Index::new(IndexKind::PrimaryKey, vec!["id".into()])],
        ))
    }

    #[test]
    fn missing_columns_default_to_nil() {
        let schema = demo_schema();
        let mut fields = IndexMap::new();
        fields.insert("id".to_string(), Value::Int(1));
        let record = StructValue::new(schema, fields);
        assert_eq!(record.get("name"), Some(&Value::Nil));
    }

    #[test]
    fn cache_key_shards_by_configured_shard_key_column() {
        let schema = demo_schema();
        let pk = schema.primary_key().unwrap().clone();
        let plain = schema.cache_key_for(&pk, &[Value::Int(1)], None).unwrap();
        let sharded = schema
            .cache_key_for(&pk, &[Value::Int(1)], Some("id"))
            .unwrap();
        assert!(!plain.contains("/shard="));
        assert!(sharded.contains("/shard="));
        assert_ne!(plain, sharded);
    }

    #[test]
    fn cache_key_falls_back_to_first_primary_key_column() {
        let schema = demo_schema();
        let pk = schema.primary_key().unwrap().clone();
        // No shard_key configured, and "missing" isn't a column of this
        // index, so the fallback is the schema's first primary-key column
        // ("id"), which this index also happens to be.
        let fallback = schema
            .cache_key_for(&pk, &[Value::Int(1)], Some("missing"))
            .unwrap();
        assert!(fallback.contains("/shard="));
    }

    #[test]
    fn cache_key_omits_shard_suffix_when_unresolvable() {
        let schema = Arc::new(Struct::new(
            "t",
            vec![
                ("id".into(), Kind::Int),
                ("name".into(), Kind::String),
            ],
            vec![
                Index::new(IndexKind::PrimaryKey, vec!["id".into()]),
                Index::new(IndexKind::Key, vec!["name".into()]),
            ],
        ));
        let secondary = &schema.indexes[1];
        let key = schema
            .cache_key_for(secondary, &[Value::String("a".into())], Some("missing"))
            .unwrap();
        assert!(!key.contains("/shard="));
    }

    #[test]
    fn lookup_indexes_expands_prefixes() {
        let schema = Struct::new(
            "t",
            vec![
                ("a".into(), Kind::Int),
                ("b".into(), Kind::Int),
                ("c".into(), Kind::Int),
            ],
            vec![Index::new(
                IndexKind::Key,
                vec!["a".into(), "b".into(), "c".into()],
            )],
        );
        let expanded = schema.lookup_indexes();
        assert_eq!(expanded.len(), 3);
        assert_eq!(expanded[0].columns, vec!["a"]);
        assert_eq!(expanded[1].columns, vec!["a", "b"]);
        assert_eq!(expanded[2].columns, vec!["a", "b", "c"]);
    }
}
