use super::stash::{PendingAction, Stash};
use crate::error::{CrateError, Result};
use crate::store::CacheStore;
use crate::store::SqlExecutor;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Coordinates one request's reads/writes across the stash, the cache
/// store, and (optionally) an open database transaction, per §4.7. Grounded
/// on the teacher's `TransactionManager` session lifecycle
/// (`transaction/manager.rs`): a per-session id, an owned handle to the
/// backing transactional resource, and explicit `commit`/`rollback` entry
/// points rather than drop-based cleanup.
pub struct Session {
    pub id: Uuid,
    db: Option<Arc<dyn SqlExecutor>>,
    cache: Arc<dyn CacheStore>,
    stash: Mutex<Stash>,
    failed: AtomicBool,
    committed: AtomicBool,
}

impl Session {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self {
            id: Uuid::new_v4(),
            db: None,
            cache,
            stash: Mutex::new(Stash::new()),
            failed: AtomicBool::new(false),
            committed: AtomicBool::new(false),
        }
    }

    pub fn with_database(cache: Arc<dyn CacheStore>, db: Arc<dyn SqlExecutor>) -> Self {
        Self {
            id: Uuid::new_v4(),
            db: Some(db),
            cache,
            stash: Mutex::new(Stash::new()),
            failed: AtomicBool::new(false),
            committed: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub fn database(&self) -> Option<&Arc<dyn SqlExecutor>> {
        self.db.as_ref()
    }

    pub fn stash(&self) -> &Mutex<Stash> {
        &self.stash
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Commit the underlying database transaction (if any), then flush the
    /// stash's pending cache-store actions in enqueue order. The database
    /// commit happens first: if it fails, the cache is left untouched and
    /// the session is marked failed so a caller cannot mistakenly commit
    /// twice (§4.7).
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn commit(&self) -> Result<()> {
        if self.failed.load(Ordering::SeqCst) {
            return Err(CrateError::Transaction(
                "session already failed, cannot commit".to_string(),
            ));
        }
        if self.committed.load(Ordering::SeqCst) {
            return Err(CrateError::Transaction(
                "session already committed".to_string(),
            ));
        }

        if let Some(db) = &self.db {
            if let Err(e) = db.commit().await {
                self.failed.store(true, Ordering::SeqCst);
                return Err(e);
            }
        }

        let pending: Vec<(String, PendingAction)> = {
            let mut stash = self.stash.lock();
            stash.pending_queries.drain(..).collect()
        };

        for (key, action) in pending {
            let result = match action {
                PendingAction::Add { value, expiration } => {
                    self.cache.add(&key, value, expiration).await
                }
                PendingAction::Set {
                    value,
                    expiration,
                    cas_id,
                } => self.cache.set(&key, value, expiration, cas_id).await,
                PendingAction::Delete => self.cache.delete(&key).await,
            };
            if let Err(e) = result {
                // Database already committed; a cache-flush failure here is a
                // cache/database divergence, not a transaction failure. Stop
                // flushing the remainder rather than risk applying writes
                // out of their intended order, and surface the first error.
                warn!(key, error = %e, "cache flush failed during commit, remaining writes left unapplied");
                self.failed.store(true, Ordering::SeqCst);
                return Err(e);
            }
        }

        self.stash.lock().clear();
        self.committed.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Roll back the underlying database transaction (if any) and discard
    /// the stash. Lock keys are not actively deleted: per the resolved
    /// open question on lock-key cleanup, a crashed or rolled-back session
    /// leaves its lock keys to expire via their TTL rather than requiring an
    /// active unlock step.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn rollback(&self) -> Result<()> {
        if let Some(db) = &self.db {
            db.rollback().await?;
        }
        self.stash.lock().clear();
        self.failed.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryCacheStore, InMemorySqlExecutor};
    use std::time::Duration;

    #[tokio::test]
    async fn commit_flushes_pending_actions_in_order() {
        let cache = Arc::new(InMemoryCacheStore::new());
        let session = Session::new(cache.clone());
        {
            let mut stash = session.stash().lock();
            stash.enqueue(
                "r/slc/t/id#1",
                PendingAction::Add {
                    value: b"hello".to_vec(),
                    expiration: Duration::from_secs(60),
                },
            );
        }
        session.commit().await.unwrap();
        let got = cache.get("r/slc/t/id#1").await.unwrap();
        assert_eq!(got.bytes, b"hello");
    }

    #[tokio::test]
    async fn rollback_discards_pending_actions() {
        let cache = Arc::new(InMemoryCacheStore::new());
        let session = Session::new(cache.clone());
        {
            let mut stash = session.stash().lock();
            stash.enqueue(
                "r/slc/t/id#1",
                PendingAction::Add {
                    value: b"hello".to_vec(),
                    expiration: Duration::from_secs(60),
                },
            );
            stash.add_lock_key("r/slc/t/id#1/lock");
        }
        session.rollback().await.unwrap();
        assert!(cache.get("r/slc/t/id#1").await.is_err());
    }

    #[tokio::test]
    async fn cannot_commit_an_already_committed_session() {
        let cache = Arc::new(InMemoryCacheStore::new());
        let db: Arc<dyn SqlExecutor> =
            Arc::new(InMemorySqlExecutor::new(|_, _| Vec::new()));
        let session = Session::with_database(cache, db);
        session.commit().await.unwrap();
        assert!(session.commit().await.is_err());
    }
}
