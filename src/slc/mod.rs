//! Second-level cache: a DDL-driven cache-key catalog backed by a network
//! cache store with SQL fallback (§4.5). Unlike FLC, SLC is writable and
//! participates in the transaction coordinator's stash/pending-query model.

use crate::config::TableConfig;
use crate::error::{CrateError, Result};
use crate::locking;
use crate::query::{self, PlannedQuery, QueryBuilder, Queries};
use crate::schema::{Index, IndexKind, Struct, StructSliceValue, StructValue};
use crate::store::{lock_key, CacheStore, SqlExecutor};
use crate::transaction::{PendingAction, Session, Stash};
use crate::value::{decode_value, encode_value, Value};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::instrument;

fn record_cache_bytes(record: &StructValue) -> Result<Vec<u8>> {
    encode_value(&Value::Slice(record.ordered_values()))
}

fn decode_record(schema: &Arc<Struct>, bytes: &[u8]) -> Result<Option<StructValue>> {
    match decode_value(bytes)? {
        Value::Nil => Ok(None),
        Value::Slice(values) => {
            let mut fields = IndexMap::new();
            for ((name, _), value) in schema.columns.iter().zip(values) {
                fields.insert(name.clone(), value);
            }
            Ok(Some(StructValue::new(schema.clone(), fields)))
        }
        other => Err(CrateError::Decode {
            key: String::new(),
            reason: format!("expected a record slice or nil, got {:?}", other.kind()),
        }),
    }
}

fn negative_record_bytes() -> Result<Vec<u8>> {
    encode_value(&Value::Nil)
}

fn pointer_bytes(primary_key: Option<&str>) -> Result<Vec<u8>> {
    encode_value(&match primary_key {
        Some(k) => Value::String(k.to_string()),
        None => Value::Nil,
    })
}

fn decode_pointer(bytes: &[u8]) -> Result<Option<String>> {
    match decode_value(bytes)? {
        Value::Nil => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Err(CrateError::Decode {
            key: String::new(),
            reason: format!("expected a string pointer or nil, got {:?}", other.kind()),
        }),
    }
}

fn list_bytes(primary_keys: &[String]) -> Result<Vec<u8>> {
    encode_value(&Value::Slice(
        primary_keys.iter().map(|k| Value::String(k.clone())).collect(),
    ))
}

fn decode_list(bytes: &[u8]) -> Result<Vec<String>> {
    match decode_value(bytes)? {
        Value::Slice(items) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                other => Err(CrateError::Decode {
                    key: String::new(),
                    reason: format!("expected a string in pointer list, got {:?}", other.kind()),
                }),
            })
            .collect(),
        other => Err(CrateError::Decode {
            key: String::new(),
            reason: format!("expected a pointer list, got {:?}", other.kind()),
        }),
    }
}

fn pk_cache_key(schema: &Struct, values: &[Value], shard_key: Option<&str>) -> Result<String> {
    let pk = schema.primary_key().ok_or(CrateError::LookUpIndexFromQuery)?;
    schema.cache_key_for(pk, values, shard_key)
}

fn index_matches(index: &Index, miss: &PlannedQuery, record: &StructValue) -> bool {
    index
        .columns
        .iter()
        .zip(&miss.values)
        .all(|(col, expected)| record.get(col) == Some(expected))
}

/// A DDL-driven, writable record cache over one table.
pub struct SlcEngine {
    schema: Arc<Struct>,
    cache: Arc<dyn CacheStore>,
    sql: Arc<dyn SqlExecutor>,
    config: TableConfig,
}

impl SlcEngine {
    pub fn new(schema: Arc<Struct>, cache: Arc<dyn CacheStore>, sql: Arc<dyn SqlExecutor>, config: TableConfig) -> Self {
        Self {
            schema,
            cache,
            sql,
            config,
        }
    }

    pub fn schema(&self) -> &Arc<Struct> {
        &self.schema
    }

    /// §4.5 read path. A locking read, raw-SQL read, or select-all always
    /// bypasses the cache entirely. Results are keyed by planned cache key
    /// since a secondary (non-unique) index's cache key can resolve to more
    /// than one record.
    #[instrument(skip(self, session, builder), fields(table = %self.schema.table))]
    pub async fn find_by_query_builder(
        &self,
        session: &Session,
        builder: &QueryBuilder,
    ) -> Result<StructSliceValue> {
        let plan = query::build(builder, &self.schema, self.config.shard_key.as_deref())?;

        if plan.bypasses_cache() {
            return self.run_uncached(&plan).await;
        }
        let index = plan.index.clone().expect("bypasses_cache() would be true otherwise");

        let mut found: IndexMap<String, Vec<StructValue>> = IndexMap::new();
        let mut misses: Vec<PlannedQuery> = Vec::new();

        {
            let stash = session.stash().lock();
            for planned in &plan.planned {
                if stash.is_old(&planned.cache_key) {
                    misses.push(planned.clone());
                    continue;
                }
                match stash_lookup(&stash, &index, &planned.cache_key) {
                    Some(records) => {
                        found.insert(planned.cache_key.clone(), records);
                    }
                    None => misses.push(planned.clone()),
                }
            }
        }

        if !misses.is_empty() {
            let resolved = self.resolve_from_cache(session, &index, &misses).await?;
            let mut still_missing = Vec::new();
            for miss in misses {
                match resolved.get(&miss.cache_key) {
                    Some(records) => {
                        found.insert(miss.cache_key.clone(), records.clone());
                    }
                    None => still_missing.push(miss),
                }
            }
            misses = still_missing;
        }

        if !misses.is_empty() {
            let (sql, args) = query::cache_miss_queries_to_sql(&self.schema.table, &index, &misses);
            let rows = self.sql.query(&sql, &args).await?;

            let mut by_miss: Vec<(PlannedQuery, Vec<StructValue>)> =
                misses.into_iter().map(|m| (m, Vec::new())).collect();
            for row in rows {
                let mut fields = IndexMap::new();
                for (col, _) in &self.schema.columns {
                    if let Some(v) = row.0.get(col) {
                        fields.insert(col.clone(), v.clone());
                    }
                }
                let record = StructValue::new(self.schema.clone(), fields);
                for (miss, bucket) in by_miss.iter_mut() {
                    if index_matches(&index, miss, &record) {
                        bucket.push(record.clone());
                        break;
                    }
                }
            }

            let mut stash = session.stash().lock();
            for (miss, rows) in &by_miss {
                self.repopulate(&mut stash, &index, miss, rows)?;
            }
            for (miss, rows) in by_miss {
                found.insert(miss.cache_key, rows);
            }
        }

        let mut out = StructSliceValue::new();
        for planned in &plan.planned {
            if let Some(records) = found.get(&planned.cache_key) {
                for record in records {
                    out.append(record.clone());
                }
            }
        }
        out = out.filter(&plan.residual)?;
        out.sort(&builder.order);
        Ok(out)
    }

    async fn run_uncached(&self, plan: &Queries) -> Result<StructSliceValue> {
        let (sql, args) = if let Some(raw) = &plan.raw_sql {
            (raw.stmt.clone(), raw.args.clone())
        } else {
            (format!("SELECT * FROM {}", self.schema.table), Vec::new())
        };
        let rows = self.sql.query(&sql, &args).await?;
        let mut out = StructSliceValue::new();
        for row in rows {
            let mut fields = IndexMap::new();
            for (col, _) in &self.schema.columns {
                if let Some(v) = row.0.get(col) {
                    fields.insert(col.clone(), v.clone());
                }
            }
            out.append(StructValue::new(self.schema.clone(), fields));
        }
        out = out.filter(&plan.residual)?;
        out.sort(&plan.order);
        Ok(out)
    }

    /// Phase one (index → primary pointer) plus phase two (primary →
    /// record) batched `GetMulti` calls (§4.5 step 2-3). Returns only the
    /// misses this round resolved (hit or confirmed-negative); anything
    /// absent from the result still needs the SQL fallback.
    async fn resolve_from_cache(
        &self,
        session: &Session,
        index: &Index,
        misses: &[PlannedQuery],
    ) -> Result<IndexMap<String, Vec<StructValue>>> {
        let mut resolved: IndexMap<String, Vec<StructValue>> = IndexMap::new();

        if index.kind == IndexKind::PrimaryKey {
            let keys: Vec<String> = misses.iter().map(|m| m.cache_key.clone()).collect();
            let hits = self.cache.get_multi(&keys).await?;
            let mut stash = session.stash().lock();
            for miss in misses {
                let Some(cached) = hits.get(&miss.cache_key) else {
                    continue;
                };
                // A corrupted entry is treated as a miss, not a hard error
                // (§7): the caller falls back to SQL for this key.
                let record = match decode_record(&self.schema, &cached.bytes) {
                    Ok(record) => record,
                    Err(CrateError::Decode { .. }) => continue,
                    Err(e) => return Err(e),
                };
                stash.cas_ids.insert(miss.cache_key.clone(), cached.cas_id);
                stash
                    .primary_key_to_value
                    .insert(miss.cache_key.clone(), record.clone());
                resolved.insert(miss.cache_key.clone(), record.into_iter().collect());
            }
            return Ok(resolved);
        }

        // Phase one: index cache-key → primary-key pointer(s).
        let keys: Vec<String> = misses.iter().map(|m| m.cache_key.clone()).collect();
        let pointer_hits = self.cache.get_multi(&keys).await?;

        let mut primary_keys_by_miss: IndexMap<String, Vec<String>> = IndexMap::new();
        {
            let mut stash = session.stash().lock();
            for miss in misses {
                let Some(cached) = pointer_hits.get(&miss.cache_key) else {
                    continue;
                };
                // A corrupted entry is treated as a miss, not a hard error
                // (§7): the caller falls back to SQL for this key.
                let pks = match index.kind {
                    IndexKind::UniqueKey => match decode_pointer(&cached.bytes) {
                        Ok(pk) => {
                            stash
                                .unique_key_to_primary_key
                                .insert(miss.cache_key.clone(), pk.clone());
                            pk.into_iter().collect::<Vec<_>>()
                        }
                        Err(CrateError::Decode { .. }) => continue,
                        Err(e) => return Err(e),
                    },
                    IndexKind::Key => match decode_list(&cached.bytes) {
                        Ok(pks) => {
                            stash.key_to_primary_keys.insert(miss.cache_key.clone(), pks.clone());
                            pks
                        }
                        Err(CrateError::Decode { .. }) => continue,
                        Err(e) => return Err(e),
                    },
                    IndexKind::PrimaryKey => unreachable!(),
                };
                if pks.is_empty() {
                    resolved.insert(miss.cache_key.clone(), Vec::new());
                } else {
                    primary_keys_by_miss.insert(miss.cache_key.clone(), pks);
                }
            }
        }

        // Phase two: primary-key → record.
        let all_primary_keys: Vec<String> = primary_keys_by_miss
            .values()
            .flat_map(|v| v.iter().cloned())
            .collect();
        if !all_primary_keys.is_empty() {
            let record_hits = self.cache.get_multi(&all_primary_keys).await?;
            let mut stash = session.stash().lock();
            for pk in &all_primary_keys {
                let Some(cached) = record_hits.get(pk) else {
                    continue;
                };
                // A corrupted entry is treated as a miss, not a hard error
                // (§7): the group it belongs to falls back to SQL below.
                match decode_record(&self.schema, &cached.bytes) {
                    Ok(record) => {
                        stash.primary_key_to_value.insert(pk.clone(), record);
                    }
                    Err(CrateError::Decode { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
            for (miss_key, pks) in &primary_keys_by_miss {
                let records: Option<Vec<StructValue>> = pks
                    .iter()
                    .map(|pk| stash.primary_key_to_value.get(pk).cloned().flatten())
                    .collect();
                if let Some(records) = records {
                    resolved.insert(miss_key.clone(), records);
                }
            }
        }

        Ok(resolved)
    }

    fn primary_key_value(&self, record: &StructValue) -> Option<Vec<Value>> {
        let pk = self.schema.primary_key()?;
        Some(
            pk.columns
                .iter()
                .map(|c| record.get(c).cloned().unwrap_or(Value::Nil))
                .collect(),
        )
    }

    /// Stage the cache-store writes a SQL-fallback result implies (§4.5
    /// step 5): negative cache on zero rows, record + unique pointer on one
    /// row, list + records on many rows (secondary only; primary/unique
    /// indexes resolving to more than one row is a schema-integrity error).
    fn repopulate(&self, stash: &mut Stash, index: &Index, miss: &PlannedQuery, rows: &[StructValue]) -> Result<()> {
        let expiration = self.config.expiration();
        match rows.len() {
            0 => {
                let bytes = match index.kind {
                    IndexKind::PrimaryKey => negative_record_bytes()?,
                    IndexKind::UniqueKey => pointer_bytes(None)?,
                    IndexKind::Key => list_bytes(&[])?,
                };
                stash.enqueue(
                    miss.cache_key.clone(),
                    PendingAction::Set {
                        value: bytes,
                        expiration,
                        cas_id: None,
                    },
                );
            }
            1 => {
                let record = &rows[0];
                let pk = self
                    .primary_key_value(record)
                    .ok_or(CrateError::LookUpIndexFromQuery)?;
                let pk_key = pk_cache_key(&self.schema, &pk, self.config.shard_key.as_deref())?;
                stash.enqueue(
                    pk_key.clone(),
                    PendingAction::Set {
                        value: record_cache_bytes(record)?,
                        expiration,
                        cas_id: None,
                    },
                );
                match index.kind {
                    IndexKind::PrimaryKey => {}
                    IndexKind::UniqueKey => stash.enqueue(
                        miss.cache_key.clone(),
                        PendingAction::Set {
                            value: pointer_bytes(Some(&pk_key))?,
                            expiration,
                            cas_id: None,
                        },
                    ),
                    IndexKind::Key => stash.enqueue(
                        miss.cache_key.clone(),
                        PendingAction::Set {
                            value: list_bytes(&[pk_key])?,
                            expiration,
                            cas_id: None,
                        },
                    ),
                }
            }
            _ => {
                if index.kind == IndexKind::UniqueKey {
                    return Err(CrateError::CreateUniqueKeyCacheBySlice);
                }
                if index.kind == IndexKind::PrimaryKey {
                    // A primary-key miss expects at most one row. Many rows
                    // sharing the same primary key is a duplicate-data
                    // integrity failure; many rows with distinct primary
                    // keys means the miss cannot resolve to the single
                    // cache key it was planned for.
                    let mut pk_keys = std::collections::HashSet::new();
                    for record in rows {
                        let pk = self
                            .primary_key_value(record)
                            .ok_or(CrateError::LookUpIndexFromQuery)?;
                        pk_keys.insert(pk_cache_key(&self.schema, &pk, self.config.shard_key.as_deref())?);
                    }
                    return Err(if pk_keys.len() > 1 {
                        CrateError::CreateCacheKeyAtMultiplePrimaryKeys
                    } else {
                        CrateError::CreatePrimaryKeyCacheBySlice
                    });
                }
                let mut pks = Vec::with_capacity(rows.len());
                for record in rows {
                    let pk = self
                        .primary_key_value(record)
                        .ok_or(CrateError::LookUpIndexFromQuery)?;
                    let pk_key = pk_cache_key(&self.schema, &pk, self.config.shard_key.as_deref())?;
                    stash.enqueue(
                        pk_key.clone(),
                        PendingAction::Set {
                            value: record_cache_bytes(record)?,
                            expiration,
                            cas_id: None,
                        },
                    );
                    pks.push(pk_key);
                }
                stash.enqueue(
                    miss.cache_key.clone(),
                    PendingAction::Set {
                        value: list_bytes(&pks)?,
                        expiration,
                        cas_id: None,
                    },
                );
            }
        }
        Ok(())
    }

    /// Stage every cache key the new record affects, honoring the
    /// configured pessimistic-lock discipline, then run the SQL insert,
    /// mark every other fully-bound index's cache key `old` so this
    /// session's own subsequent reads force a DB round-trip, and enqueue an
    /// actual cache-store delete for each so other sessions stop observing
    /// a stale or negative entry too (§4.5's invalidation-on-insert).
    /// `mark_old` alone is session-local bookkeeping discarded on
    /// commit/rollback; the enqueued `Delete` is what reaches the shared
    /// cache store when the session commits.
    #[instrument(skip(self, session, record), fields(table = %self.schema.table))]
    pub async fn create(&self, session: &Session, record: StructValue) -> Result<()> {
        let pk = self
            .primary_key_value(&record)
            .ok_or(CrateError::LookUpIndexFromQuery)?;
        let pk_key = pk_cache_key(&self.schema, &pk, self.config.shard_key.as_deref())?;

        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.schema.table,
            self.schema.columns.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>().join(", "),
            self.schema.columns.iter().map(|_| "?".to_string()).collect::<Vec<_>>().join(", ")
        );
        self.sql.exec(&insert_sql, &record.ordered_values()).await?;

        self.stage_write(session, &record, &pk_key).await?;

        let mut stash = session.stash().lock();
        for index in &self.schema.indexes {
            if index.kind == IndexKind::PrimaryKey {
                continue;
            }
            let values: Option<Vec<Value>> = index.columns.iter().map(|c| record.get(c).cloned()).collect();
            if let Some(values) = values {
                let key = self.schema.cache_key_for(index, &values, self.config.shard_key.as_deref())?;
                stash.mark_old(&key);
                stash.enqueue(key, PendingAction::Delete);
            }
        }
        Ok(())
    }

    #[instrument(skip(self, session, record), fields(table = %self.schema.table))]
    pub async fn update(&self, session: &Session, record: StructValue) -> Result<()> {
        let pk = self
            .primary_key_value(&record)
            .ok_or(CrateError::LookUpIndexFromQuery)?;
        let pk_key = pk_cache_key(&self.schema, &pk, self.config.shard_key.as_deref())?;

        let set_clause = self
            .schema
            .columns
            .iter()
            .map(|(n, _)| format!("{} = ?", n))
            .collect::<Vec<_>>()
            .join(", ");
        let primary_key = self.schema.primary_key().ok_or(CrateError::LookUpIndexFromQuery)?;
        let where_clause = primary_key
            .columns
            .iter()
            .map(|c| format!("{} = ?", c))
            .collect::<Vec<_>>()
            .join(" AND ");
        let update_sql = format!("UPDATE {} SET {} WHERE {}", self.schema.table, set_clause, where_clause);
        let mut args = record.ordered_values();
        args.extend(pk.clone());
        self.sql.exec(&update_sql, &args).await?;

        self.stage_write(session, &record, &pk_key).await?;
        Ok(())
    }

    #[instrument(skip(self, session), fields(table = %self.schema.table))]
    pub async fn delete(&self, session: &Session, primary_key: &[Value]) -> Result<()> {
        let pk_key = pk_cache_key(&self.schema, primary_key, self.config.shard_key.as_deref())?;
        let primary_index = self.schema.primary_key().ok_or(CrateError::LookUpIndexFromQuery)?;
        let where_clause = primary_index
            .columns
            .iter()
            .map(|c| format!("{} = ?", c))
            .collect::<Vec<_>>()
            .join(" AND ");
        let delete_sql = format!("DELETE FROM {} WHERE {}", self.schema.table, where_clause);
        self.sql.exec(&delete_sql, primary_key).await?;

        let mut stash = session.stash().lock();
        stash.enqueue(pk_key, PendingAction::Delete);
        Ok(())
    }

    /// Pessimistic-lock-aware enqueue of the primary record write. The
    /// first write to a cache key under lock discipline issues an `Add` on
    /// the lock key first; a collision surfaces as a lock conflict naming
    /// the current holder (§4.5). Lock acquisition happens before the stash
    /// is locked, since it is the only part of this call that awaits. Under
    /// optimistic locking, the compare-id last seen for `pk_key` (recorded
    /// during a prior `Get`/`GetMulti` in this session) is supplied to `Set`
    /// so a concurrent writer surfaces as a cas conflict instead of being
    /// silently clobbered.
    async fn stage_write(&self, session: &Session, record: &StructValue, pk_key: &str) -> Result<()> {
        if self.config.pessimistic_lock {
            let already_held = session.stash().lock().holds_lock(&lock_key(pk_key));
            if let Some(lock) = locking::acquire_pessimistic_lock(
                self.cache.as_ref(),
                &session.id.to_string(),
                pk_key,
                already_held,
                self.config.lock_expiration(),
            )
            .await?
            {
                session.stash().lock().add_lock_key(lock);
            }
        }
        let mut stash = session.stash().lock();
        let cas_id = if self.config.optimistic_lock {
            stash.cas_ids.get(pk_key).copied()
        } else {
            None
        };
        stash.enqueue(
            pk_key.to_string(),
            PendingAction::Set {
                value: record_cache_bytes(record)?,
                expiration: self.config.expiration(),
                cas_id,
            },
        );
        Ok(())
    }
}

/// The stash's fast path (§4.7 read-your-writes): resolve a planned query
/// directly from already-known stash maps without touching the cache
/// store. `None` means "not yet known, go to the cache".
fn stash_lookup(stash: &Stash, index: &Index, cache_key: &str) -> Option<Vec<StructValue>> {
    match index.kind {
        IndexKind::PrimaryKey => stash
            .primary_key_to_value
            .get(cache_key)
            .map(|r| r.clone().into_iter().collect()),
        IndexKind::UniqueKey => match stash.unique_key_to_primary_key.get(cache_key)? {
            Some(pk) => stash
                .primary_key_to_value
                .get(pk)
                .map(|r| r.clone().into_iter().collect()),
            None => Some(Vec::new()),
        },
        IndexKind::Key => {
            let pks = stash.key_to_primary_keys.get(cache_key)?;
            if pks.is_empty() {
                return Some(Vec::new());
            }
            pks.iter()
                .map(|pk| stash.primary_key_to_value.get(pk).cloned().flatten())
                .collect::<Option<Vec<_>>>()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;
    use crate::schema::{Condition, Index as SchemaIndex, IndexKind};
    use crate::store::{InMemoryCacheStore, InMemorySqlExecutor, Row};
    use crate::value::Kind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn schema() -> Arc<Struct> {
        Arc::new(Struct::new(
            "users",
            vec![("id".into(), Kind::Int), ("name".into(), Kind::String)],
            vec![SchemaIndex::new(IndexKind::PrimaryKey, vec!["id".into()])],
        ))
    }

    fn row(id: i64, name: &str) -> Row {
        Row::new().with("id", Value::Int(id)).with("name", Value::String(name.to_string()))
    }

    #[tokio::test]
    async fn miss_then_hit_avoids_second_db_query() {
        let schema = schema();
        let cache = Arc::new(InMemoryCacheStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let sql: Arc<dyn SqlExecutor> = Arc::new(InMemorySqlExecutor::new(move |_, _| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            vec![row(1, "a")]
        }));
        let engine = SlcEngine::new(schema, cache.clone(), sql, TableConfig::default());
        let session = Session::new(cache.clone());

        let builder = QueryBuilder::new("users").condition(Condition::eq("id", Value::Int(1)));
        let first = engine.find_by_query_builder(&session, &builder).await.unwrap();
        assert_eq!(first.len(), 1);
        session.commit().await.unwrap();

        let session2 = Session::new(cache.clone());
        let second = engine.find_by_query_builder(&session2, &builder).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn negative_cache_then_create_invalidates() {
        let schema = schema();
        let cache = Arc::new(InMemoryCacheStore::new());
        let sql: Arc<dyn SqlExecutor> = Arc::new(InMemorySqlExecutor::new(|_, _| Vec::new()));
        let engine = SlcEngine::new(schema, cache.clone(), sql, TableConfig::default());
        let session = Session::new(cache.clone());

        let builder = QueryBuilder::new("users").condition(Condition::eq("id", Value::Int(99)));
        let miss = engine.find_by_query_builder(&session, &builder).await.unwrap();
        assert!(miss.is_empty());
        session.commit().await.unwrap();

        let mut fields = IndexMap::new();
        fields.insert("id".to_string(), Value::Int(99));
        fields.insert("name".to_string(), Value::String("z".to_string()));
        let record = StructValue::new(engine.schema.clone(), fields);

        let session2 = Session::new(cache.clone());
        engine.create(&session2, record).await.unwrap();
        session2.commit().await.unwrap();

        let got = cache
            .get(&pk_cache_key(&engine.schema, &[Value::Int(99)], None).unwrap())
            .await
            .unwrap();
        let decoded = decode_record(&engine.schema, &got.bytes).unwrap();
        assert!(decoded.is_some());
    }

    #[tokio::test]
    async fn negative_cache_on_secondary_index_then_create_invalidates_other_session() {
        let schema = Arc::new(Struct::new(
            "users",
            vec![("id".into(), Kind::Int), ("name".into(), Kind::String)],
            vec![
                SchemaIndex::new(IndexKind::PrimaryKey, vec!["id".into()]),
                SchemaIndex::new(IndexKind::Key, vec!["name".into()]),
            ],
        ));
        let cache = Arc::new(InMemoryCacheStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let sql: Arc<dyn SqlExecutor> = Arc::new(InMemorySqlExecutor::new(move |_, _| {
            if calls_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                Vec::new()
            } else {
                vec![row(7, "carol")]
            }
        }));
        let engine = SlcEngine::new(schema.clone(), cache.clone(), sql, TableConfig::default());
        let builder = QueryBuilder::new("users").condition(Condition::eq("name", Value::String("carol".to_string())));

        // Negative-cache the secondary-index lookup.
        let session = Session::new(cache.clone());
        let miss = engine.find_by_query_builder(&session, &builder).await.unwrap();
        assert!(miss.is_empty());
        session.commit().await.unwrap();

        // A different session creates the row the negative entry covers.
        let mut fields = IndexMap::new();
        fields.insert("id".to_string(), Value::Int(7));
        fields.insert("name".to_string(), Value::String("carol".to_string()));
        let record = StructValue::new(schema.clone(), fields);
        let session2 = Session::new(cache.clone());
        engine.create(&session2, record).await.unwrap();
        session2.commit().await.unwrap();

        // A third session must see the new row, not the stale negative entry.
        let session3 = Session::new(cache.clone());
        let found = engine.find_by_query_builder(&session3, &builder).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_update_under_optimistic_lock_surfaces_cas_conflict() {
        let schema = schema();
        let cache = Arc::new(InMemoryCacheStore::new());
        let sql: Arc<dyn SqlExecutor> = Arc::new(InMemorySqlExecutor::new(move |_, _| vec![row(1, "a")]));
        let config = TableConfig {
            optimistic_lock: true,
            ..TableConfig::default()
        };
        let engine = SlcEngine::new(schema, cache.clone(), sql, config);
        let builder = QueryBuilder::new("users").condition(Condition::eq("id", Value::Int(1)));

        // Warm the cache store itself (not just a stash) with an initial read+commit.
        let warmup = Session::new(cache.clone());
        engine.find_by_query_builder(&warmup, &builder).await.unwrap();
        warmup.commit().await.unwrap();

        // Both readers observe the same compare-id from the now-cached record.
        let reader_a = Session::new(cache.clone());
        engine.find_by_query_builder(&reader_a, &builder).await.unwrap();
        let reader_b = Session::new(cache.clone());
        engine.find_by_query_builder(&reader_b, &builder).await.unwrap();

        let mut fields = IndexMap::new();
        fields.insert("id".to_string(), Value::Int(1));
        fields.insert("name".to_string(), Value::String("b-wins".to_string()));
        engine
            .update(&reader_b, StructValue::new(engine.schema.clone(), fields.clone()))
            .await
            .unwrap();
        reader_b.commit().await.unwrap();

        fields.insert("name".to_string(), Value::String("a-loses".to_string()));
        engine
            .update(&reader_a, StructValue::new(engine.schema.clone(), fields))
            .await
            .unwrap();
        let err = reader_a.commit().await.unwrap_err();
        assert!(matches!(err, CrateError::CasConflict { .. }));
    }
}
