use super::SqlExecutor;
use crate::error::Result;
use crate::value::Value;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A single row returned from a query, as an ordered column-name → value
/// map (mirrors `rows.Scan` decoding into named columns).
#[derive(Debug, Clone, Default)]
pub struct Row(pub IndexMap<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn with(mut self, column: impl Into<String>, value: Value) -> Self {
        self.0.insert(column.into(), value);
        self
    }
}

/// An in-memory `SqlExecutor` test double. Rather than parsing the
/// generated SQL, tests supply a closure keyed on the SQL text (as §13
/// specifies) that returns whichever rows it represents; this is enough to
/// drive the cache-miss → SQL fallback scenarios end-to-end without a real
/// database or SQL evaluator.
pub struct InMemorySqlExecutor {
    handler: Box<dyn Fn(&str, &[Value]) -> Vec<Row> + Send + Sync>,
    call_count: AtomicUsize,
}

impl InMemorySqlExecutor {
    pub fn new(handler: impl Fn(&str, &[Value]) -> Vec<Row> + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Number of `query`/`exec` calls made so far; tests assert this stays
    /// flat across repeated cache hits (§8 scenario 3).
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlExecutor for InMemorySqlExecutor {
    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        Ok((self.handler)(sql, args))
    }

    async fn exec(&self, sql: &str, args: &[Value]) -> Result<u64> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let rows = (self.handler)(sql, args);
        Ok(rows.len() as u64)
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        Ok(())
    }
}
