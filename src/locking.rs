//! Shared pessimistic-lock discipline used by SLC and LLC (§4.5/§4.6): both
//! engines stage a write by first issuing `Add(lockKey, txValue, ttl)` on the
//! affected cache key's `/lock` companion, translating an `Add` collision
//! into a lock-conflict naming the current holder. Implemented once here
//! rather than duplicated per engine, per the design note in §4.6.

use crate::error::Result;
use crate::store::{lock_key, CacheStore};
use std::time::Duration;

/// Acquire the pessimistic lock on `cache_key` for `session_id`, unless the
/// session already holds it (`already_held`). Returns the lock key to record
/// on the session's stash on success, or `None` if no new lock was needed.
pub async fn acquire_pessimistic_lock(
    cache: &dyn CacheStore,
    session_id: &str,
    cache_key: &str,
    already_held: bool,
    lock_expiration: Duration,
) -> Result<Option<String>> {
    if already_held {
        return Ok(None);
    }
    let lock = lock_key(cache_key);
    cache.add(&lock, session_id.as_bytes().to_vec(), lock_expiration).await?;
    Ok(Some(lock))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CrateError;
    use crate::store::InMemoryCacheStore;

    #[tokio::test]
    async fn second_session_collides_on_an_unreleased_lock() {
        let cache = InMemoryCacheStore::new();
        let lock_expiration = Duration::from_secs(10);

        let first = acquire_pessimistic_lock(&cache, "session-a", "r/slc/t/id#1", false, lock_expiration)
            .await
            .unwrap();
        assert!(first.is_some());

        let err = acquire_pessimistic_lock(&cache, "session-b", "r/slc/t/id#1", false, lock_expiration)
            .await
            .unwrap_err();
        assert!(matches!(err, CrateError::LockConflict { .. }));
    }

    #[tokio::test]
    async fn already_held_lock_is_not_reacquired() {
        let cache = InMemoryCacheStore::new();
        let lock_expiration = Duration::from_secs(10);
        let result = acquire_pessimistic_lock(&cache, "session-a", "r/slc/t/id#1", true, lock_expiration)
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
