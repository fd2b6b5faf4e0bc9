//! Error types for zerqu operations

use thiserror::Error;

/// Cache layer errors.
///
/// Absent values are not errors: lookups return `Option::None` instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The cache backend is unreachable or timed out. Callers treat this as a
    /// full cache miss and fall through to the backing store.
    #[error("Cache store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    /// The entity's primary key shape is not supported by the operation.
    /// Signals a programming error, not a runtime condition.
    #[error("Unsupported key for {entity_type}: {operation} requires a single-column primary key")]
    UnsupportedKey {
        entity_type: &'static str,
        operation: &'static str,
    },

    /// A cached value could not be encoded or decoded.
    #[error("Cache codec error for key {key}: {reason}")]
    Codec { key: String, reason: String },
}

/// Backing store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: &'static str, id: String },

    #[error("Insert failed for {entity_type}: {reason}")]
    InsertFailed {
        entity_type: &'static str,
        reason: String,
    },

    #[error("Update failed for {entity_type} with id {id}: {reason}")]
    UpdateFailed {
        entity_type: &'static str,
        id: String,
        reason: String,
    },

    #[error("Query failed on {entity_type}: {reason}")]
    QueryFailed {
        entity_type: &'static str,
        reason: String,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all zerqu errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ZerquError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ZerquError {
    /// True when the error means the cache backend could not be reached.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Cache(CacheError::StoreUnavailable { .. }))
    }

    /// Shorthand for a `CacheError::StoreUnavailable`.
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::Cache(CacheError::StoreUnavailable {
            reason: reason.into(),
        })
    }
}

/// Result type alias for zerqu operations.
pub type ZerquResult<T> = Result<T, ZerquError>;

// =============================================================================
// TESTS
// =============================================================================
