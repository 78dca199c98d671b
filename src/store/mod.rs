//! Consumed external collaborators (§6): the cache-store wire protocol, the
//! SQL driver, and the DDL parser. Only trait shapes plus in-memory test
//! doubles live here — a real memcached/redis-backed store and a real SQL
//! executor against a live connection are the explicitly out-of-scope wire
//! protocol and SQL driver named in §1, so they stop at the trait boundary.

mod ddl;
mod memory_cache;
mod memory_sql;

pub use ddl::{Constraint, DdlParser, SqlDdlParser};
pub use memory_cache::InMemoryCacheStore;
pub use memory_sql::{InMemorySqlExecutor, Row};

use crate::error::Result;
use crate::value::Value;
use async_trait::async_trait;
use std::time::Duration;

/// A cache-store entry: the raw bytes plus the compare-id used for
/// optimistic locking.
#[derive(Debug, Clone)]
pub struct CacheValue {
    pub bytes: Vec<u8>,
    pub cas_id: u64,
}

/// `Get/Set/Add/Delete/GetMulti` with TTL and a compare-id, per §6. A miss
/// is `Err(CrateError::CacheMiss)`, translated one layer up into the
/// internal `Lookup::Miss` the SLC read path treats as first-class (§7).
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<CacheValue>;

    async fn get_multi(&self, keys: &[String]) -> Result<std::collections::HashMap<String, CacheValue>>;

    async fn set(&self, key: &str, value: Vec<u8>, expiration: Duration, cas_id: Option<u64>) -> Result<()>;

    /// Atomic create-if-absent; the backbone of pessimistic locking (§4.5).
    async fn add(&self, key: &str, value: Vec<u8>, expiration: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Transactional `Begin/Commit/Rollback` plus parameterized query/exec,
/// abstracted so dialect differences (`?` vs `$i`) do not leak into the
/// engines. This crate only models the per-transaction query surface the
/// engines need; connection acquisition and `Begin` live with the caller,
/// which hands the already-open executor to a [`crate::transaction::Session`].
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>>;

    /// Returns the affected row count (or last-insert-id for `INSERT`).
    async fn exec(&self, sql: &str, args: &[Value]) -> Result<u64>;

    /// Commit the transaction this executor represents. A `Session` calls
    /// this before flushing its pending cache writes (§4.7).
    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;
}

pub fn lock_key(cache_key: &str) -> String {
    format!("{}/lock", cache_key)
}
