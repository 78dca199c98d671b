use super::{CacheStore, CacheValue};
use crate::error::{CrateError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;

struct Entry {
    bytes: Vec<u8>,
    cas_id: u64,
}

/// An in-memory `CacheStore` test double, backed by a `DashMap` so it is
/// safe for concurrent use the same way the real cache-store client would
/// be (§5). Expirations are not actively swept; TTL is recorded but this
/// double never evicts on its own, since the end-to-end scenarios in §8
/// only ever exercise the lock-TTL-elapses case through an explicit
/// `expire_locks_older_than` call rather than wall-clock sleeping.
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: DashMap<String, Entry>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: force a lock key to look absent, simulating TTL
    /// expiration without a real sleep.
    pub fn force_expire(&self, key: &str) {
        self.entries.remove(key);
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<CacheValue> {
        self.entries
            .get(key)
            .map(|e| CacheValue {
                bytes: e.bytes.clone(),
                cas_id: e.cas_id,
            })
            .ok_or_else(|| CrateError::CacheMiss(key.to_string()))
    }

    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, CacheValue>> {
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = self.entries.get(key) {
                out.insert(
                    key.clone(),
                    CacheValue {
                        bytes: entry.bytes.clone(),
                        cas_id: entry.cas_id,
                    },
                );
            }
        }
        Ok(out)
    }

    async fn set(&self, key: &str, value: Vec<u8>, _expiration: Duration, cas_id: Option<u64>) -> Result<()> {
        if let Some(expected) = cas_id {
            if let Some(existing) = self.entries.get(key) {
                if existing.cas_id != expected {
                    return Err(CrateError::CasConflict {
                        key: key.to_string(),
                    });
                }
            }
        }
        let next_cas = self.entries.get(key).map(|e| e.cas_id + 1).unwrap_or(1);
        self.entries.insert(
            key.to_string(),
            Entry {
                bytes: value,
                cas_id: next_cas,
            },
        );
        Ok(())
    }

    async fn add(&self, key: &str, value: Vec<u8>, _expiration: Duration) -> Result<()> {
        use dashmap::mapref::entry::Entry as DashEntry;
        match self.entries.entry(key.to_string()) {
            DashEntry::Occupied(existing) => Err(CrateError::LockConflict {
                key: key.to_string(),
                holder: String::from_utf8_lossy(&existing.get().bytes).to_string(),
            }),
            DashEntry::Vacant(slot) => {
                slot.insert(Entry {
                    bytes: value,
                    cas_id: 1,
                });
                Ok(())
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_collision_surfaces_lock_conflict() {
        let store = InMemoryCacheStore::new();
        store
            .add("k/lock", b"session-a".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();
        let err = store
            .add("k/lock", b"session-b".to_vec(), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, CrateError::LockConflict { .. }));
    }

    #[tokio::test]
    async fn expiring_a_lock_allows_reacquisition() {
        let store = InMemoryCacheStore::new();
        store
            .add("k/lock", b"session-a".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();
        store.force_expire("k/lock");
        store
            .add("k/lock", b"session-b".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();
    }
}
