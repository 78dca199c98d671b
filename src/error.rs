use thiserror::Error;

/// Crate-wide error type. Every fallible operation in every engine returns
/// `Result<T>` built on this enum rather than a module-local error type.
#[derive(Error, Debug)]
pub enum CrateError {
    #[error("record not found by primary key: {0}")]
    RecordNotFoundByPrimaryKey(String),

    #[error("invalid leaves: expected exactly one match, found {0}")]
    InvalidLeafs(usize),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("could not look up an index for the given query conditions")]
    LookUpIndexFromQuery,

    #[error("unknown column: {0}")]
    UnknownColumnName(String),

    #[error("invalid column type for {column}: expected {expected}, got {actual}")]
    InvalidColumnType {
        column: String,
        expected: String,
        actual: String,
    },

    #[error("at most one IN condition is permitted per query")]
    MultipleINQueries,

    #[error("cannot create a cache key for multiple primary keys at once")]
    CreateCacheKeyAtMultiplePrimaryKeys,

    #[error("cannot create a primary-key cache entry from a slice of records")]
    CreatePrimaryKeyCacheBySlice,

    #[error("cannot create a unique-key cache entry from a slice of records")]
    CreateUniqueKeyCacheBySlice,

    #[error("cache miss for key {0}")]
    CacheMiss(String),

    #[error("cache store I/O error: {0}")]
    CacheStoreIo(String),

    #[error("database I/O error: {0}")]
    DatabaseIo(String),

    #[error("lock conflict on {key}: held by {holder}")]
    LockConflict { key: String, holder: String },

    #[error("compare-id mismatch on {key}, retry required")]
    CasConflict { key: String },

    #[error("failed to decode cached value for {key}: {reason}")]
    Decode { key: String, reason: String },

    #[error("DDL parse error: {0}")]
    DdlParse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("table not found: {0}")]
    UnknownTable(String),

    #[error("tag not found: {0}")]
    UnknownTag(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Clone for CrateError {
    fn clone(&self) -> Self {
        match self {
            CrateError::RecordNotFoundByPrimaryKey(s) => {
                CrateError::RecordNotFoundByPrimaryKey(s.clone())
            }
            CrateError::InvalidLeafs(n) => CrateError::InvalidLeafs(*n),
            CrateError::InvalidQuery(s) => CrateError::InvalidQuery(s.clone()),
            CrateError::LookUpIndexFromQuery => CrateError::LookUpIndexFromQuery,
            CrateError::UnknownColumnName(s) => CrateError::UnknownColumnName(s.clone()),
            CrateError::InvalidColumnType {
                column,
                expected,
                actual,
            } => CrateError::InvalidColumnType {
                column: column.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
            },
            CrateError::MultipleINQueries => CrateError::MultipleINQueries,
            CrateError::CreateCacheKeyAtMultiplePrimaryKeys => {
                CrateError::CreateCacheKeyAtMultiplePrimaryKeys
            }
            CrateError::CreatePrimaryKeyCacheBySlice => {
                CrateError::CreatePrimaryKeyCacheBySlice
            }
            CrateError::CreateUniqueKeyCacheBySlice => CrateError::CreateUniqueKeyCacheBySlice,
            CrateError::CacheMiss(s) => CrateError::CacheMiss(s.clone()),
            CrateError::CacheStoreIo(s) => CrateError::CacheStoreIo(s.clone()),
            CrateError::DatabaseIo(s) => CrateError::DatabaseIo(s.clone()),
            CrateError::LockConflict { key, holder } => CrateError::LockConflict {
                key: key.clone(),
                holder: holder.clone(),
            },
            CrateError::CasConflict { key } => CrateError::CasConflict { key: key.clone() },
            CrateError::Decode { key, reason } => CrateError::Decode {
                key: key.clone(),
                reason: reason.clone(),
            },
            CrateError::DdlParse(s) => CrateError::DdlParse(s.clone()),
            CrateError::Config(s) => CrateError::Config(s.clone()),
            CrateError::UnknownTable(s) => CrateError::UnknownTable(s.clone()),
            CrateError::UnknownTag(s) => CrateError::UnknownTag(s.clone()),
            CrateError::Transaction(s) => CrateError::Transaction(s.clone()),
            CrateError::Io(e) => CrateError::CacheStoreIo(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CrateError>;

impl From<rmp_serde::encode::Error> for CrateError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        CrateError::Decode {
            key: String::new(),
            reason: e.to_string(),
        }
    }
}

impl From<rmp_serde::decode::Error> for CrateError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        CrateError::Decode {
            key: String::new(),
            reason: e.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for CrateError {
    fn from(e: serde_yaml::Error) -> Self {
        CrateError::Config(e.to_string())
    }
}
