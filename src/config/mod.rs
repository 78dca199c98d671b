//! Layered YAML configuration (§6, expanded in SPEC_FULL §11): per-server,
//! per-table (SLC) and per-tag (LLC) settings. Field defaults mirror the
//! teacher's `DatabaseConfig::default()` pattern (`src/common/mod.rs`)
//! rather than failing to deserialize on a sparse config file.

use crate::error::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Memcached,
    Redis,
    InMemory,
}

impl Default for StoreKind {
    fn default() -> Self {
        StoreKind::InMemory
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub timeout_ms: u64,
    pub max_connections: u32,
    pub store_kind: StoreKind,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:11211".to_string(),
            timeout_ms: 200,
            max_connections: 50,
            store_kind: StoreKind::InMemory,
        }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub shard_key: Option<String>,
    pub expiration_secs: u64,
    pub lock_expiration_secs: u64,
    pub optimistic_lock: bool,
    pub pessimistic_lock: bool,
    pub server: Option<String>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            shard_key: None,
            expiration_secs: 300,
            lock_expiration_secs: 10,
            optimistic_lock: false,
            pessimistic_lock: false,
            server: None,
        }
    }
}

impl TableConfig {
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }

    pub fn lock_expiration(&self) -> Duration {
        Duration::from_secs(self.lock_expiration_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    pub server: Option<String>,
    pub optimistic_lock: bool,
    pub pessimistic_lock: bool,
    pub ignore_stash: bool,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            server: None,
            optimistic_lock: false,
            pessimistic_lock: false,
            ignore_stash: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tables: HashMap<String, TableConfig>,
    pub tags: HashMap<String, TagConfig>,
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn table(&self, name: &str) -> TableConfig {
        self.tables.get(name).cloned().unwrap_or_default()
    }

    pub fn tag(&self, name: &str) -> TagConfig {
        self.tags.get(name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg = Config::from_yaml_str(
            r#"
tables:
  users:
    pessimistic_lock: true
"#,
        )
        .unwrap();
        let users = cfg.table("users");
        assert!(users.pessimistic_lock);
        assert_eq!(users.expiration_secs, 300);
        assert_eq!(cfg.server.addr, "127.0.0.1:11211");
    }

    #[test]
    fn unconfigured_table_gets_defaults() {
        let cfg = Config::default();
        assert!(!cfg.table("ghost").pessimistic_lock);
    }
}
