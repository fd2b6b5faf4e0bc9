//! Per-entity read-through cache.
//!
//! [`EntityCache`] sits in front of an [`EntityRepository`] and answers four
//! query shapes from a shared [`CacheStore`]:
//!
//! | Operation      | Key op  | TTL class     | Kept fresh by            |
//! |----------------|---------|---------------|--------------------------|
//! | `get_by_id(s)` | `get`   | `Get`         | update hook (refresh)    |
//! | `count`        | `count` | `Count`       | insert/delete hooks      |
//! | `filter_first` | `ff`    | `FilterFirst` | expiry only              |
//! | `filter_count` | `fc`    | `FilterCount` | expiry only              |
//!
//! # Store Failures
//!
//! The store is an optimisation. An unreachable store (or a cached value that
//! no longer decodes) is logged and treated as a miss, so reads fall through to
//! the repository. Writes back into the store are best effort. Repository
//! errors always propagate.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use zerqu_core::{CacheConfig, CacheError, Entity, Filter, PrimaryKey, ZerquResult};

use super::hooks::MutationObserver;
use super::key::{CacheKeyCodec, CacheOp};
use super::traits::{decode_counter, encode_counter, CacheStore};
use crate::repository::EntityRepository;

/// Outcome of a single cache read.
enum Cached<V> {
    Hit(V),
    Miss,
    /// The store could not be reached; skip writing back.
    Unavailable,
}

impl<V> Cached<V> {
    fn store_reachable(&self) -> bool {
        !matches!(self, Self::Unavailable)
    }
}

/// Read-through cache for entities of type `T`.
///
/// # Type Parameters
///
/// - `R`: the authoritative repository queried on a miss
/// - `C`: the cache store shared with other caches and the rate limiter
///
/// # Example
///
/// ```ignore
/// let users = Arc::new(EntityCache::<User, _, _>::new(
///     repo.clone(),
///     store,
///     CacheConfig::default(),
/// ));
/// repo.hooks().register(users.clone());
///
/// let alice = users.get_by_id(&1).await?;
/// let page = users.get_by_ids(&[3, 1, 2]).await?;
/// let total = users.count().await?;
/// ```
pub struct EntityCache<T, R, C>
where
    T: Entity,
    R: EntityRepository<T> + ?Sized,
    C: CacheStore + ?Sized,
{
    repository: Arc<R>,
    store: Arc<C>,
    codec: CacheKeyCodec,
    config: CacheConfig,
    _entity: PhantomData<fn() -> T>,
}

impl<T, R, C> EntityCache<T, R, C>
where
    T: Entity,
    R: EntityRepository<T> + ?Sized,
    C: CacheStore + ?Sized,
{
    pub fn new(repository: Arc<R>, store: Arc<C>, config: CacheConfig) -> Self {
        Self {
            repository,
            store,
            codec: CacheKeyCodec::new(config.key_prefix.clone()),
            config,
            _entity: PhantomData,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn codec(&self) -> &CacheKeyCodec {
        &self.codec
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    // ------------------------------------------------------------------
    // Primary-key lookups
    // ------------------------------------------------------------------

    /// Fetch one entity by primary key. Absent rows are not cached.
    pub async fn get_by_id(&self, id: &T::Id) -> ZerquResult<Option<T>> {
        let key = self.codec.get_key::<T>(id);
        let cached = self.read(&key, |bytes| self.decode_entity(&key, bytes)).await;
        if let Cached::Hit(entity) = cached {
            return Ok(Some(entity));
        }

        let found = self.repository.get(id).await?;
        if let Some(entity) = &found {
            if cached.store_reachable() {
                self.write_entity(&key, entity, CacheOp::Get).await;
            }
        }
        Ok(found)
    }

    /// Fetch many entities by primary key, in the caller's order.
    ///
    /// Unresolved ids are dropped. Duplicate ids yield duplicate results.
    /// Cache misses are resolved with a single repository round trip.
    pub async fn get_by_ids(&self, ids: &[T::Id]) -> ZerquResult<Vec<T>> {
        Ok(self
            .resolve_many(ids, "get_by_ids")
            .await?
            .into_iter()
            .flatten()
            .collect())
    }

    /// Like [`get_by_ids`](Self::get_by_ids) but keeps one slot per requested
    /// id, `None` where the row does not exist.
    pub async fn get_many_with_gaps(&self, ids: &[T::Id]) -> ZerquResult<Vec<Option<T>>> {
        self.resolve_many(ids, "get_many_with_gaps").await
    }

    /// Resolve ids into a map keyed by the stringified id.
    pub async fn get_dict(&self, ids: &[T::Id]) -> ZerquResult<HashMap<String, Option<T>>> {
        let resolved = self.resolve_many(ids, "get_dict").await?;
        Ok(ids
            .iter()
            .map(<T::Id as PrimaryKey>::cache_suffix)
            .zip(resolved)
            .collect())
    }

    async fn resolve_many(
        &self,
        ids: &[T::Id],
        operation: &'static str,
    ) -> ZerquResult<Vec<Option<T>>> {
        if <T::Id as PrimaryKey>::is_composite() {
            return Err(CacheError::UnsupportedKey {
                entity_type: T::TABLE,
                operation,
            }
            .into());
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.codec.get_key::<T>(id)).collect();
        let (cached, reachable) = match self.store.get_many(&keys).await {
            Ok(found) => (found, true),
            Err(e) => {
                tracing::warn!(
                    table = T::TABLE,
                    error = %e,
                    "cache batch read failed, using repository"
                );
                (HashMap::new(), false)
            }
        };

        let mut resolved: HashMap<&str, T> = HashMap::with_capacity(keys.len());
        let mut pending: HashSet<&str> = HashSet::new();
        let mut missing: Vec<T::Id> = Vec::new();
        for (id, key) in ids.iter().zip(&keys) {
            if resolved.contains_key(key.as_str()) || pending.contains(key.as_str()) {
                continue;
            }
            let hit = cached
                .get(key)
                .and_then(|value| value.as_deref())
                .and_then(|bytes| self.decode_entity(key, bytes));
            match hit {
                Some(entity) => {
                    resolved.insert(key, entity);
                }
                None => {
                    pending.insert(key);
                    missing.push(id.clone());
                }
            }
        }

        tracing::debug!(
            table = T::TABLE,
            requested = ids.len(),
            hits = resolved.len(),
            misses = missing.len(),
            "batch lookup"
        );

        let mut fetched: HashMap<String, T> = HashMap::new();
        if !missing.is_empty() {
            let rows = self.repository.get_many(&missing).await?;
            let mut to_cache = Vec::with_capacity(rows.len());
            for row in rows {
                let key = self.codec.get_key::<T>(&row.primary_key());
                if reachable {
                    if let Some(bytes) = self.encode_entity(&key, &row) {
                        to_cache.push((key.clone(), bytes));
                    }
                }
                fetched.insert(key, row);
            }
            if !to_cache.is_empty() {
                let ttl = self.ttl(CacheOp::Get);
                if let Err(e) = self.store.set_many(to_cache, ttl).await {
                    tracing::warn!(table = T::TABLE, error = %e, "cache batch populate failed");
                }
            }
        }

        Ok(keys
            .iter()
            .map(|key| {
                resolved
                    .get(key.as_str())
                    .or_else(|| fetched.get(key))
                    .cloned()
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Filter and count lookups
    // ------------------------------------------------------------------

    /// First entity matching `filter`. Absent results are not cached.
    ///
    /// Entries are not invalidated by mutations and live for the
    /// filter-first TTL.
    pub async fn filter_first(&self, filter: &Filter) -> ZerquResult<Option<T>> {
        let key = self.codec.filter_key::<T>(CacheOp::FilterFirst, filter);
        let cached = self.read(&key, |bytes| self.decode_entity(&key, bytes)).await;
        if let Cached::Hit(entity) = cached {
            return Ok(Some(entity));
        }

        let found = self.repository.filter_first(filter).await?;
        if let Some(entity) = &found {
            if cached.store_reachable() {
                self.write_entity(&key, entity, CacheOp::FilterFirst).await;
            }
        }
        Ok(found)
    }

    /// Total number of rows.
    pub async fn count(&self) -> ZerquResult<i64> {
        let key = self.codec.count_key::<T>();
        self.cached_count(&key, CacheOp::Count, || self.repository.count())
            .await
    }

    /// Number of rows matching `filter`. An empty filter is [`count`](Self::count).
    pub async fn filter_count(&self, filter: &Filter) -> ZerquResult<i64> {
        if filter.is_empty() {
            return self.count().await;
        }
        let key = self.codec.filter_key::<T>(CacheOp::FilterCount, filter);
        self.cached_count(&key, CacheOp::FilterCount, || {
            self.repository.filter_count(filter)
        })
        .await
    }

    async fn cached_count<F, Fut>(&self, key: &str, op: CacheOp, query: F) -> ZerquResult<i64>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ZerquResult<i64>>,
    {
        let cached = self.read(key, |bytes| self.decode_count(key, bytes)).await;
        if let Cached::Hit(n) = cached {
            return Ok(n);
        }

        let n = query().await?;
        if cached.store_reachable() {
            self.write(key, encode_counter(n), op).await;
        }
        Ok(n)
    }

    // ------------------------------------------------------------------
    // Explicit maintenance
    // ------------------------------------------------------------------

    /// Drop the cached entry for `id`. Returns how many keys were removed.
    pub async fn invalidate(&self, id: &T::Id) -> ZerquResult<u64> {
        let key = self.codec.get_key::<T>(id);
        self.store.delete_many(&[key]).await
    }

    /// Write `entity` through to its get key.
    pub async fn refresh(&self, entity: &T) -> ZerquResult<()> {
        let key = self.codec.get_key::<T>(&entity.primary_key());
        let bytes = serde_json::to_vec(entity).map_err(|e| CacheError::Codec {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.store.set(&key, bytes, self.ttl(CacheOp::Get)).await
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn ttl(&self, op: CacheOp) -> Duration {
        self.config.ttl_for(op.ttl_class())
    }

    async fn read<V>(&self, key: &str, decode: impl FnOnce(&[u8]) -> Option<V>) -> Cached<V> {
        match self.store.get(key).await {
            Ok(Some(bytes)) => match decode(&bytes) {
                Some(value) => {
                    tracing::debug!(key, "cache hit");
                    Cached::Hit(value)
                }
                None => Cached::Miss,
            },
            Ok(None) => {
                tracing::debug!(key, "cache miss");
                Cached::Miss
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed, using repository");
                Cached::Unavailable
            }
        }
    }

    async fn write(&self, key: &str, bytes: Vec<u8>, op: CacheOp) {
        if let Err(e) = self.store.set(key, bytes, self.ttl(op)).await {
            tracing::warn!(key, error = %e, "cache populate failed");
        }
    }

    async fn write_entity(&self, key: &str, entity: &T, op: CacheOp) {
        if let Some(bytes) = self.encode_entity(key, entity) {
            self.write(key, bytes, op).await;
        }
    }

    fn encode_entity(&self, key: &str, entity: &T) -> Option<Vec<u8>> {
        serde_json::to_vec(entity)
            .map_err(|e| tracing::warn!(key, error = %e, "failed to encode entity for cache"))
            .ok()
    }

    fn decode_entity(&self, key: &str, bytes: &[u8]) -> Option<T> {
        serde_json::from_slice(bytes)
            .map_err(|e| tracing::warn!(key, error = %e, "discarding undecodable cache entry"))
            .ok()
    }

    fn decode_count(&self, key: &str, bytes: &[u8]) -> Option<i64> {
        let n = decode_counter(bytes);
        if n.is_none() {
            tracing::warn!(key, "discarding non-integer count entry");
        }
        n
    }
}

impl<T, R, C> std::fmt::Debug for EntityCache<T, R, C>
where
    T: Entity,
    R: EntityRepository<T> + ?Sized,
    C: CacheStore + ?Sized,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache")
            .field("table", &T::TABLE)
            .field("codec", &self.codec)
            .field("config", &self.config)
            .finish()
    }
}

/// Cache maintenance driven by committed mutations.
///
/// - insert: bump the count entry (a cold entry starts from 1 rather than the
///   true count until it expires)
/// - update: write the new row through to its get entry
/// - delete: drop the get entry and the count entry
///
/// Filter entries are left to expire.
#[async_trait]
impl<T, R, C> MutationObserver<T> for EntityCache<T, R, C>
where
    T: Entity,
    R: EntityRepository<T> + ?Sized,
    C: CacheStore + ?Sized,
{
    async fn on_inserted(&self, _entity: &T) {
        let key = self.codec.count_key::<T>();
        if let Err(e) = self.store.increment(&key, self.ttl(CacheOp::Count)).await {
            tracing::warn!(table = T::TABLE, operation = "insert", error = %e, "cache hook failed");
        }
    }

    async fn on_updated(&self, entity: &T) {
        if let Err(e) = self.refresh(entity).await {
            tracing::warn!(table = T::TABLE, operation = "update", error = %e, "cache hook failed");
        }
    }

    async fn on_deleted(&self, entity: &T) {
        let keys = [
            self.codec.get_key::<T>(&entity.primary_key()),
            self.codec.count_key::<T>(),
        ];
        if let Err(e) = self.store.delete_many(&keys).await {
            tracing::warn!(table = T::TABLE, operation = "delete", error = %e, "cache hook failed");
        }
    }
}
