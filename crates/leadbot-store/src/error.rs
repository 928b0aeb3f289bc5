use thiserror::Error;

use crate::entity::EntityKind;

/// Errors raised by the tiered store and its backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A tenant-scoped entity has no usable durable record. Aborts the turn.
    #[error("{kind} missing for {key}: {reason}")]
    ConfigMissing {
        kind: EntityKind,
        key: String,
        reason: String,
    },

    /// A cached value failed to deserialize. Recovered internally by
    /// deleting the entry; surfaced only in logs.
    #[error("corrupt cache entry {key}: {reason}")]
    CacheCorrupt { key: String, reason: String },

    /// The durable store could not be reached or rejected the query.
    #[error("durable store unavailable: {0}")]
    DurableUnavailable(String),

    /// The shared cache backend failed.
    #[error("cache error: {0}")]
    Cache(String),

    /// The key shape does not fit the entity kind (e.g. a conversation key
    /// used to look up tenant config).
    #[error("invalid key for {kind}: {key}")]
    InvalidKey { kind: EntityKind, key: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Short error code string used in logs and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::ConfigMissing { .. } => "CONFIG_MISSING",
            StoreError::CacheCorrupt { .. } => "CACHE_CORRUPT",
            StoreError::DurableUnavailable(_) | StoreError::Database(_) => "DURABLE_UNAVAILABLE",
            StoreError::Cache(_) => "CACHE_ERROR",
            StoreError::InvalidKey { .. } => "INVALID_KEY",
            StoreError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
