//! In-process cache store.
//!
//! Entries live in a sharded [`DashMap`]. Expiry is lazy: an expired entry is
//! dropped the first time it is read, or by [`InMemoryCacheStore::purge_expired`].
//! Time comes from a [`Clock`], so tests can expire entries by moving a
//! [`ManualClock`](super::clock::ManualClock) instead of sleeping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use zerqu_core::{CacheError, ZerquError, ZerquResult};

use super::clock::{Clock, SystemClock};
use super::traits::{decode_counter, encode_counter, CacheStats, CacheStore};

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    /// Absolute expiry in epoch milliseconds.
    expires_at_ms: i64,
}

impl StoredValue {
    fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Cache store backed by a concurrent hash map.
pub struct InMemoryCacheStore {
    entries: DashMap<String, StoredValue>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl InMemoryCacheStore {
    /// Create a store that reads the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store with an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            available: AtomicBool::new(true),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Simulate an outage. While unavailable every operation fails with
    /// `StoreUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> u64 {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, v| !v.is_expired(now));
        let removed = before.saturating_sub(self.entries.len()) as u64;
        self.evictions.fetch_add(removed, Ordering::Relaxed);
        removed
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remaining lifetime of a live entry.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now_millis();
        self.entries.get(key).and_then(|v| {
            if v.is_expired(now) {
                None
            } else {
                Some(Duration::from_millis((v.expires_at_ms - now) as u64))
            }
        })
    }

    fn ensure_available(&self) -> ZerquResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(ZerquError::Cache(CacheError::StoreUnavailable {
                reason: "in-memory store marked unavailable".to_string(),
            }))
        }
    }

    fn expiry_from_now(&self, ttl: Duration) -> i64 {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        self.clock.now_millis().saturating_add(ttl_ms)
    }

    fn read(&self, key: &str, now: i64) -> Option<Vec<u8>> {
        // Resolve under the read guard, release it before any removal.
        let live = self
            .entries
            .get(key)
            .map(|v| (!v.is_expired(now)).then(|| v.bytes.clone()));

        match live {
            Some(Some(bytes)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(bytes)
            }
            Some(None) => {
                if self
                    .entries
                    .remove_if(key, |_, v| v.is_expired(now))
                    .is_some()
                {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCacheStore")
            .field("entries", &self.entries.len())
            .field("available", &self.is_available())
            .finish()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> ZerquResult<Option<Vec<u8>>> {
        self.ensure_available()?;
        Ok(self.read(key, self.clock.now_millis()))
    }

    async fn get_many(&self, keys: &[String]) -> ZerquResult<HashMap<String, Option<Vec<u8>>>> {
        self.ensure_available()?;
        let now = self.clock.now_millis();
        Ok(keys
            .iter()
            .map(|key| (key.clone(), self.read(key, now)))
            .collect())
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> ZerquResult<()> {
        self.ensure_available()?;
        let expires_at_ms = self.expiry_from_now(ttl);
        self.entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value,
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn set_many(&self, entries: Vec<(String, Vec<u8>)>, ttl: Duration) -> ZerquResult<()> {
        self.ensure_available()?;
        let expires_at_ms = self.expiry_from_now(ttl);
        for (key, bytes) in entries {
            self.entries.insert(
                key,
                StoredValue {
                    bytes,
                    expires_at_ms,
                },
            );
        }
        Ok(())
    }

    async fn increment(&self, key: &str, ttl_if_new: Duration) -> ZerquResult<i64> {
        self.ensure_available()?;
        let now = self.clock.now_millis();

        // The entry guard holds the shard lock for the read-modify-write.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if !occupied.get().is_expired(now) => {
                let current = decode_counter(&occupied.get().bytes).ok_or_else(|| {
                    ZerquError::Cache(CacheError::Codec {
                        key: key.to_string(),
                        reason: "value is not an integer".to_string(),
                    })
                })?;
                let next = current.saturating_add(1);
                occupied.get_mut().bytes = encode_counter(next);
                Ok(next)
            }
            Entry::Occupied(mut occupied) => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                occupied.insert(StoredValue {
                    bytes: encode_counter(1),
                    expires_at_ms: self.expiry_from_now(ttl_if_new),
                });
                Ok(1)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue {
                    bytes: encode_counter(1),
                    expires_at_ms: self.expiry_from_now(ttl_if_new),
                });
                Ok(1)
            }
        }
    }

    async fn delete_many(&self, keys: &[String]) -> ZerquResult<u64> {
        self.ensure_available()?;
        let now = self.clock.now_millis();
        let mut deleted = 0u64;
        for key in keys {
            if let Some((_, value)) = self.entries.remove(key) {
                if !value.is_expired(now) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn stats(&self) -> ZerquResult<CacheStats> {
        let memory_bytes = self
            .entries
            .iter()
            .map(|e| (e.key().len() + e.value().bytes.len()) as u64)
            .sum();
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
            memory_bytes,
            evictions: self.evictions.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;

    fn store_with_clock() -> (InMemoryCacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (InMemoryCacheStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = InMemoryCacheStore::new();
        store
            .set("a", b"1".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let (store, clock) = store_with_clock();
        store
            .set("a", b"1".to_vec(), Duration::from_secs(300))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(299));
        assert!(store.get("a").await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_get_many_reports_every_key() {
        let store = InMemoryCacheStore::new();
        store
            .set_many(
                vec![("x".into(), b"1".to_vec()), ("y".into(), b"2".to_vec())],
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let keys = vec!["x".to_string(), "z".to_string(), "y".to_string()];
        let found = store.get_many(&keys).await.unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(found["x"], Some(b"1".to_vec()));
        assert_eq!(found["y"], Some(b"2".to_vec()));
        assert_eq!(found["z"], None);
    }

    #[tokio::test]
    async fn test_increment_keeps_expiry() {
        let (store, clock) = store_with_clock();
        assert_eq!(store.increment("n", Duration::from_secs(10)).await.unwrap(), 1);

        clock.advance(Duration::from_secs(5));
        assert_eq!(store.increment("n", Duration::from_secs(100)).await.unwrap(), 2);
        assert_eq!(store.ttl_of("n"), Some(Duration::from_secs(5)));

        clock.advance(Duration::from_secs(5));
        assert_eq!(store.increment("n", Duration::from_secs(10)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_existing_json_integer() {
        let store = InMemoryCacheStore::new();
        store
            .set("n", serde_json::to_vec(&41i64).unwrap(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.increment("n", Duration::from_secs(1)).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_increment_rejects_non_integer() {
        let store = InMemoryCacheStore::new();
        store
            .set("n", b"{\"a\":1}".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        let err = store.increment("n", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ZerquError::Cache(CacheError::Codec { .. })));
    }

    #[tokio::test]
    async fn test_delete_many_counts_present_keys() {
        let store = InMemoryCacheStore::new();
        store
            .set("a", b"1".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        let deleted = store
            .delete_many(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_fast() {
        let store = InMemoryCacheStore::new();
        store.set_available(false);

        let err = store.get("a").await.unwrap_err();
        assert!(err.is_store_unavailable());
        assert!(store
            .set("a", vec![], Duration::from_secs(1))
            .await
            .unwrap_err()
            .is_store_unavailable());
        assert!(store
            .increment("a", Duration::from_secs(1))
            .await
            .unwrap_err()
            .is_store_unavailable());

        store.set_available(true);
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_and_stats() {
        let (store, clock) = store_with_clock();
        store
            .set("short", b"1".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();
        store
            .set("long", b"2".to_vec(), Duration::from_secs(100))
            .await
            .unwrap();

        let _ = store.get("long").await.unwrap();
        let _ = store.get("nope").await.unwrap();

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.purge_expired(), 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryCacheStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store.increment("hits", Duration::from_secs(60)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let raw = store.get("hits").await.unwrap().unwrap();
        assert_eq!(decode_counter(&raw), Some(400));
    }
}
