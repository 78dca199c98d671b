use crate::schema::StructValue;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// A deferred cache-store mutation awaiting commit.
#[derive(Debug, Clone)]
pub enum PendingAction {
    Add { value: Vec<u8>, expiration: Duration },
    Set {
        value: Vec<u8>,
        expiration: Duration,
        cas_id: Option<u64>,
    },
    Delete,
}

/// Per-session mutable state providing read-your-writes (§3). Single-writer
/// per §5 — no internal locking here; `Session` owns the synchronization.
#[derive(Default)]
pub struct Stash {
    pub primary_key_to_value: IndexMap<String, Option<StructValue>>,
    pub unique_key_to_primary_key: IndexMap<String, Option<String>>,
    pub key_to_primary_keys: IndexMap<String, Vec<String>>,
    pub old_key: HashSet<String>,
    pub last_level_cache_key_to_bytes: IndexMap<String, Option<Vec<u8>>>,
    pub cas_ids: HashMap<String, u64>,
    /// Ordered map from cache-key to the deferred action; insertion order is
    /// preserved and re-inserting a key overwrites its action in place, so
    /// "latest action wins, enqueue order preserved on flush" (§5) is a
    /// structural property of `IndexMap` rather than a separately
    /// maintained invariant.
    pub pending_queries: IndexMap<String, PendingAction>,
    pub lock_keys: Vec<String>,
}

impl Stash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_old(&mut self, key: &str) {
        self.old_key.insert(key.to_string());
    }

    pub fn is_old(&self, key: &str) -> bool {
        self.old_key.contains(key)
    }

    pub fn enqueue(&mut self, key: impl Into<String>, action: PendingAction) {
        self.pending_queries.insert(key.into(), action);
    }

    pub fn add_lock_key(&mut self, key: impl Into<String>) {
        self.lock_keys.push(key.into());
    }

    pub fn holds_lock(&self, key: &str) -> bool {
        self.lock_keys.iter().any(|k| k == key)
    }

    /// Discard everything (rollback path). Lock keys are returned to the
    /// caller so the session can decide whether to best-effort delete them;
    /// the protocol itself does not require an active unlock (§4.7).
    pub fn clear(&mut self) -> Vec<String> {
        self.primary_key_to_value.clear();
        self.unique_key_to_primary_key.clear();
        self.key_to_primary_keys.clear();
        self.old_key.clear();
        self.last_level_cache_key_to_bytes.clear();
        self.cas_ids.clear();
        self.pending_queries.clear();
        std::mem::take(&mut self.lock_keys)
    }
}
