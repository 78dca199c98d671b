//! Last-level cache: free-form tagged key/value storage (§4.6). Deliberately
//! the thinnest engine — no schema, no index catalog, no SQL fallback, since
//! the cache store itself is the only backing store. `Create/Update/Delete`
//! mirror SLC's write-staging discipline minus the schema/index logic;
//! pessimistic locking reuses the same [`crate::locking`] helper SLC does.

use crate::config::{Config, TagConfig};
use crate::error::{CrateError, Result};
use crate::locking;
use crate::store::{lock_key, CacheStore};
use crate::transaction::{PendingAction, Session};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// No per-tag expiration is configurable (§6 enumerates only `server`,
/// `optimistic-lock`, `pessimistic-lock`, `ignore-stash`), so LLC entries
/// use the same fallback durations `TableConfig` defaults to.
const DEFAULT_EXPIRATION: Duration = Duration::from_secs(300);
const DEFAULT_LOCK_EXPIRATION: Duration = Duration::from_secs(10);

/// Free-form KV under a two-level `(tag, key)` namespace. `tags` is a
/// concurrent map per §5 since it is shared across sessions, unlike the
/// per-session stash.
pub struct LlcEngine {
    cache: Arc<dyn CacheStore>,
    tags: DashMap<String, TagConfig>,
}

impl LlcEngine {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self {
            cache,
            tags: DashMap::new(),
        }
    }

    pub fn from_config(cache: Arc<dyn CacheStore>, config: &Config) -> Self {
        let tags = DashMap::new();
        for (name, tag_config) in &config.tags {
            tags.insert(name.clone(), tag_config.clone());
        }
        Self { cache, tags }
    }

    pub fn configure_tag(&self, tag: impl Into<String>, config: TagConfig) {
        self.tags.insert(tag.into(), config);
    }

    fn tag_config(&self, tag: &str) -> TagConfig {
        self.tags.get(tag).map(|e| e.clone()).unwrap_or_default()
    }

    fn cache_key(key: &str) -> String {
        format!("r/llc/{}", key)
    }

    /// Stash fast path, then the cache store; there is no SQL fallback since
    /// LLC has no backing table. A tag with `ignore-stash` skips the stash
    /// entirely, always resolving through the cache store.
    #[instrument(skip(self, session), fields(tag, key))]
    pub async fn find(&self, session: &Session, tag: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let config = self.tag_config(tag);
        let cache_key = Self::cache_key(key);

        if !config.ignore_stash {
            let stash = session.stash().lock();
            if !stash.is_old(&cache_key) {
                if let Some(bytes) = stash.last_level_cache_key_to_bytes.get(&cache_key) {
                    return Ok(bytes.clone());
                }
            }
        }

        match self.cache.get(&cache_key).await {
            Ok(cached) => {
                let mut stash = session.stash().lock();
                if config.optimistic_lock {
                    stash.cas_ids.insert(cache_key.clone(), cached.cas_id);
                }
                if !config.ignore_stash {
                    stash
                        .last_level_cache_key_to_bytes
                        .insert(cache_key, Some(cached.bytes.clone()));
                }
                Ok(Some(cached.bytes))
            }
            Err(CrateError::CacheMiss(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create-if-absent: under pessimistic locking, the lock-key `Add`
    /// serializes concurrent creators and a collision surfaces as a lock
    /// conflict before the value write is even staged (§8 scenario 6); the
    /// value itself is staged as an `Add` so a second writer without the
    /// lock enabled still cannot silently clobber an existing entry on
    /// commit.
    #[instrument(skip(self, session, value), fields(tag, key))]
    pub async fn create(&self, session: &Session, tag: &str, key: &str, value: Vec<u8>) -> Result<()> {
        let config = self.tag_config(tag);
        let cache_key = Self::cache_key(key);

        if config.pessimistic_lock {
            let already_held = session.stash().lock().holds_lock(&lock_key(&cache_key));
            if let Some(lock) = locking::acquire_pessimistic_lock(
                self.cache.as_ref(),
                &session.id.to_string(),
                &cache_key,
                already_held,
                DEFAULT_LOCK_EXPIRATION,
            )
            .await?
            {
                session.stash().lock().add_lock_key(lock);
            }
        }

        let mut stash = session.stash().lock();
        if !config.ignore_stash {
            stash
                .last_level_cache_key_to_bytes
                .insert(cache_key.clone(), Some(value.clone()));
        }
        stash.enqueue(
            cache_key,
            PendingAction::Add {
                value,
                expiration: DEFAULT_EXPIRATION,
            },
        );
        Ok(())
    }

    /// Unconditional overwrite; under optimistic locking, the last-seen
    /// compare-id from a prior `find` in this session is supplied so commit
    /// surfaces a `CasConflict` on a concurrent writer instead of silently
    /// clobbering (§4.5's optimistic-locking rule, reused verbatim for LLC).
    #[instrument(skip(self, session, value), fields(tag, key))]
    pub async fn update(&self, session: &Session, tag: &str, key: &str, value: Vec<u8>) -> Result<()> {
        let config = self.tag_config(tag);
        let cache_key = Self::cache_key(key);

        let mut stash = session.stash().lock();
        let cas_id = if config.optimistic_lock {
            stash.cas_ids.get(&cache_key).copied()
        } else {
            None
        };
        if !config.ignore_stash {
            stash
                .last_level_cache_key_to_bytes
                .insert(cache_key.clone(), Some(value.clone()));
        }
        stash.enqueue(
            cache_key,
            PendingAction::Set {
                value,
                expiration: DEFAULT_EXPIRATION,
                cas_id,
            },
        );
        Ok(())
    }

    #[instrument(skip(self, session), fields(tag, key))]
    pub async fn delete(&self, session: &Session, tag: &str, key: &str) -> Result<()> {
        let config = self.tag_config(tag);
        let cache_key = Self::cache_key(key);

        let mut stash = session.stash().lock();
        if !config.ignore_stash {
            stash.last_level_cache_key_to_bytes.insert(cache_key.clone(), None);
        }
        stash.enqueue(cache_key, PendingAction::Delete);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCacheStore;

    #[tokio::test]
    async fn create_then_find_round_trips_within_a_session() {
        let cache = Arc::new(InMemoryCacheStore::new());
        let llc = LlcEngine::new(cache.clone());
        let session = Session::new(cache.clone());

        llc.create(&session, "x", "k", b"hello".to_vec()).await.unwrap();
        let found = llc.find(&session, "x", "k").await.unwrap();
        assert_eq!(found, Some(b"hello".to_vec()));

        session.commit().await.unwrap();
        let second = Session::new(cache.clone());
        let found_after_commit = llc.find(&second, "x", "k").await.unwrap();
        assert_eq!(found_after_commit, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn missing_key_finds_none() {
        let cache = Arc::new(InMemoryCacheStore::new());
        let llc = LlcEngine::new(cache.clone());
        let session = Session::new(cache.clone());
        assert_eq!(llc.find(&session, "x", "ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn pessimistic_lock_blocks_a_concurrent_create_until_rollback_and_ttl() {
        let cache = Arc::new(InMemoryCacheStore::new());
        let llc = LlcEngine::new(cache.clone());
        llc.configure_tag(
            "x",
            TagConfig {
                pessimistic_lock: true,
                ..TagConfig::default()
            },
        );

        let session_a = Session::new(cache.clone());
        llc.create(&session_a, "x", "k", b"1".to_vec()).await.unwrap();

        let session_b = Session::new(cache.clone());
        let err = llc.create(&session_b, "x", "k", b"2".to_vec()).await.unwrap_err();
        assert!(matches!(err, CrateError::LockConflict { .. }));

        session_a.rollback().await.unwrap();
        cache.force_expire(&lock_key("r/llc/k"));

        llc.create(&session_b, "x", "k", b"2".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn ignore_stash_always_resolves_through_the_cache_store() {
        let cache = Arc::new(InMemoryCacheStore::new());
        let llc = LlcEngine::new(cache.clone());
        llc.configure_tag(
            "x",
            TagConfig {
                ignore_stash: true,
                ..TagConfig::default()
            },
        );

        let session = Session::new(cache.clone());
        llc.create(&session, "x", "k", b"hello".to_vec()).await.unwrap();
        assert!(session.stash().lock().last_level_cache_key_to_bytes.is_empty());
        assert_eq!(llc.find(&session, "x", "k").await.unwrap(), None);

        session.commit().await.unwrap();
        assert_eq!(llc.find(&session, "x", "k").await.unwrap(), Some(b"hello".to_vec()));
    }
}
