//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped,
//! process-local store that survives restarts.
//!
//! # Value Layout
//!
//! ```text
//! [expires_at_ms: i64 LE][payload]
//! ```
//!
//! An `expires_at_ms` of zero means the entry never expires. Expired entries
//! are ignored on read and removed on the next write transaction that touches
//! them, or by [`LmdbCacheStore::purge_expired`].
//!
//! # Thread Safety
//!
//! LMDB serializes write transactions, which makes `increment` atomic across
//! every handle on the same environment. Statistics are atomic counters.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use zerqu_core::{CacheError, LmdbConfig, ZerquError, ZerquResult};

use super::clock::{Clock, SystemClock};
use super::traits::{decode_counter, encode_counter, CacheStats, CacheStore};

const HEADER_LEN: usize = 8;
const NO_EXPIRY: i64 = 0;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Every LMDB failure surfaces as an unreachable store.
impl From<LmdbCacheError> for ZerquError {
    fn from(e: LmdbCacheError) -> Self {
        ZerquError::Cache(CacheError::StoreUnavailable {
            reason: e.to_string(),
        })
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// Split a stored value into expiry and payload.
fn split_value(raw: &[u8]) -> Option<(i64, &[u8])> {
    if raw.len() < HEADER_LEN {
        return None;
    }
    let (header, payload) = raw.split_at(HEADER_LEN);
    let header: [u8; HEADER_LEN] = header.try_into().ok()?;
    Some((i64::from_le_bytes(header), payload))
}

fn join_value(expires_at_ms: i64, payload: &[u8]) -> Vec<u8> {
    let mut full = Vec::with_capacity(HEADER_LEN + payload.len());
    full.extend_from_slice(&expires_at_ms.to_le_bytes());
    full.extend_from_slice(payload);
    full
}

fn is_live(expires_at_ms: i64, now_ms: i64) -> bool {
    expires_at_ms == NO_EXPIRY || now_ms < expires_at_ms
}

/// LMDB-backed cache store.
///
/// # Example
///
/// ```ignore
/// use zerqu_storage::cache::{CacheStore, LmdbCacheStore};
/// use std::time::Duration;
///
/// let store = LmdbCacheStore::new("/tmp/zerqu-cache", 64)?;
/// store.set("db:get:zq_user:1", payload, Duration::from_secs(60)).await?;
/// let cached = store.get("db:get:zq_user:1").await?;
/// ```
pub struct LmdbCacheStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl LmdbCacheStore {
    /// Open (or create) a store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        Self::with_clock(path, max_size_mb, Arc::new(SystemClock))
    }

    /// Open a store using settings from [`LmdbConfig`].
    pub fn from_config(config: &LmdbConfig) -> Result<Self, LmdbCacheError> {
        Self::new(&config.path, config.max_size_mb)
    }

    /// Open a store with an injected clock.
    pub fn with_clock<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per store and the directory
        // is not shared with another process using different flags.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        tracing::info!(path = %path.as_ref().display(), max_size_mb, "opened LMDB cache store");

        Ok(Self {
            env,
            db,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    /// Delete every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> ZerquResult<u64> {
        let now = self.clock.now_millis();
        let expired: Vec<Vec<u8>> = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            let iter = self.db.iter(&rtxn).map_err(txn_err)?;
            iter.filter_map(|res| res.ok())
                .filter(|(_, raw)| {
                    split_value(raw).map_or(true, |(exp, _)| !is_live(exp, now))
                })
                .map(|(key, _)| key.to_vec())
                .collect()
        };

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut removed = 0u64;
        for key in &expired {
            if self.db.delete(&mut wtxn, key).map_err(txn_err)? {
                removed += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;

        self.evictions.fetch_add(removed, Ordering::Relaxed);
        Ok(removed)
    }

    fn expiry_from_now(&self, ttl: Duration) -> i64 {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        // Clamp so a zero TTL never collides with the no-expiry marker.
        self.clock.now_millis().saturating_add(ttl_ms).max(1)
    }

    fn read_live(
        &self,
        rtxn: &RoTxn<'_>,
        key: &str,
        now: i64,
    ) -> Result<Option<Vec<u8>>, LmdbCacheError> {
        let raw = self.db.get(rtxn, key.as_bytes()).map_err(txn_err)?;
        let live = raw
            .and_then(split_value)
            .filter(|(exp, _)| is_live(*exp, now))
            .map(|(_, payload)| payload.to_vec());

        if live.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(live)
    }
}

impl std::fmt::Debug for LmdbCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbCacheStore")
            .field("path", &self.env.path())
            .finish()
    }
}

#[async_trait]
impl CacheStore for LmdbCacheStore {
    async fn get(&self, key: &str) -> ZerquResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(self.read_live(&rtxn, key, self.clock.now_millis())?)
    }

    async fn get_many(&self, keys: &[String]) -> ZerquResult<HashMap<String, Option<Vec<u8>>>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let now = self.clock.now_millis();
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            let value = self.read_live(&rtxn, key, now)?;
            found.insert(key.clone(), value);
        }
        Ok(found)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> ZerquResult<()> {
        let full = join_value(self.expiry_from_now(ttl), &value);
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &full)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    async fn set_many(&self, entries: Vec<(String, Vec<u8>)>, ttl: Duration) -> ZerquResult<()> {
        let expires_at_ms = self.expiry_from_now(ttl);
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        for (key, value) in &entries {
            self.db
                .put(&mut wtxn, key.as_bytes(), &join_value(expires_at_ms, value))
                .map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    async fn increment(&self, key: &str, ttl_if_new: Duration) -> ZerquResult<i64> {
        let now = self.clock.now_millis();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let current = self
            .db
            .get(&wtxn, key.as_bytes())
            .map_err(txn_err)?
            .and_then(split_value)
            .filter(|(exp, _)| is_live(*exp, now))
            .map(|(exp, payload)| (exp, payload.to_vec()));

        let (expires_at_ms, next) = match current {
            Some((exp, payload)) => {
                let value = decode_counter(&payload).ok_or_else(|| {
                    ZerquError::Cache(CacheError::Codec {
                        key: key.to_string(),
                        reason: "value is not an integer".to_string(),
                    })
                })?;
                (exp, value.saturating_add(1))
            }
            None => (self.expiry_from_now(ttl_if_new), 1),
        };

        self.db
            .put(
                &mut wtxn,
                key.as_bytes(),
                &join_value(expires_at_ms, &encode_counter(next)),
            )
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(next)
    }

    async fn delete_many(&self, keys: &[String]) -> ZerquResult<u64> {
        let now = self.clock.now_millis();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = 0u64;
        for key in keys {
            let was_live = self
                .db
                .get(&wtxn, key.as_bytes())
                .map_err(txn_err)?
                .and_then(split_value)
                .is_some_and(|(exp, _)| is_live(exp, now));
            if self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)? && was_live {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    async fn stats(&self) -> ZerquResult<CacheStats> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let entry_count = self.db.len(&rtxn).map_err(txn_err)?;
        let memory_bytes = self
            .env
            .real_disk_size()
            .map_err(txn_err)?;
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            memory_bytes,
            evictions: self.evictions.load(Ordering::Relaxed),
        })
    }
}
