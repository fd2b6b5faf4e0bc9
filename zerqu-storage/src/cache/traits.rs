//! Cache store trait and statistics.
//!
//! This module defines the trait that every cache backend implements. Both
//! the entity cache and the rate limiter are written against it.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use zerqu_core::ZerquResult;

/// Key/value store with per-key expiry.
///
/// This trait abstracts over different cache backends (in-memory, LMDB, a
/// network cache). Implementations must be thread-safe and support
/// concurrent access.
///
/// # Failure
///
/// Every operation fails with `CacheError::StoreUnavailable` when the
/// backend cannot be reached. Implementations must fail fast and never retry
/// internally.
///
/// # Atomicity
///
/// Only `increment` is required to be atomic. Plain `get`/`set` may race;
/// the last writer wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> ZerquResult<Option<Vec<u8>>>;

    /// Get several values at once.
    ///
    /// The returned map holds an entry for every requested key, `None` for
    /// absent ones.
    async fn get_many(&self, keys: &[String]) -> ZerquResult<HashMap<String, Option<Vec<u8>>>>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> ZerquResult<()>;

    /// Store several values sharing one `ttl`.
    async fn set_many(&self, entries: Vec<(String, Vec<u8>)>, ttl: Duration) -> ZerquResult<()>;

    /// Atomically add one to an integer value and return the new value.
    ///
    /// An absent key starts at zero and is created with `ttl_if_new`. An
    /// existing key keeps its expiry.
    async fn increment(&self, key: &str, ttl_if_new: Duration) -> ZerquResult<i64>;

    /// Delete keys, returning how many were present.
    async fn delete_many(&self, keys: &[String]) -> ZerquResult<u64>;

    /// Get cache statistics.
    async fn stats(&self) -> ZerquResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate memory usage in bytes.
    pub memory_bytes: u64,
    /// Number of entries dropped because they expired.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Encode an integer the way `increment` stores it.
pub fn encode_counter(value: i64) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// Decode an integer written by `increment` or `encode_counter`.
pub fn decode_counter(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}
