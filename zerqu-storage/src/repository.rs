//! Backing store query interface and an in-memory implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use zerqu_core::{Entity, Filter, PrimaryKey, StorageError, ZerquError, ZerquResult};

use crate::cache::hooks::HookRegistry;

/// Authoritative queries for one entity type.
///
/// `None` and empty results mean "no such row"; errors are reserved for
/// failures of the store itself.
#[async_trait]
pub trait EntityRepository<T: Entity>: Send + Sync {
    /// Fetch one row by primary key.
    async fn get(&self, id: &T::Id) -> ZerquResult<Option<T>>;

    /// Fetch the rows for `ids` in one round trip. Order is unspecified and
    /// unknown ids are skipped.
    async fn get_many(&self, ids: &[T::Id]) -> ZerquResult<Vec<T>>;

    /// First row matching every predicate.
    async fn filter_first(&self, filter: &Filter) -> ZerquResult<Option<T>>;

    /// Every row matching every predicate.
    async fn filter_all(&self, filter: &Filter) -> ZerquResult<Vec<T>>;

    /// Total row count.
    async fn count(&self) -> ZerquResult<i64>;

    /// Number of rows matching every predicate.
    async fn filter_count(&self, filter: &Filter) -> ZerquResult<i64>;
}

#[async_trait]
impl<T, R> EntityRepository<T> for Arc<R>
where
    T: Entity,
    R: EntityRepository<T> + ?Sized,
{
    async fn get(&self, id: &T::Id) -> ZerquResult<Option<T>> {
        (**self).get(id).await
    }

    async fn get_many(&self, ids: &[T::Id]) -> ZerquResult<Vec<T>> {
        (**self).get_many(ids).await
    }

    async fn filter_first(&self, filter: &Filter) -> ZerquResult<Option<T>> {
        (**self).filter_first(filter).await
    }

    async fn filter_all(&self, filter: &Filter) -> ZerquResult<Vec<T>> {
        (**self).filter_all(filter).await
    }

    async fn count(&self) -> ZerquResult<i64> {
        (**self).count().await
    }

    async fn filter_count(&self, filter: &Filter) -> ZerquResult<i64> {
        (**self).filter_count(filter).await
    }
}

/// Rows held in a `BTreeMap`, ordered by primary key.
///
/// Mutations commit under the write lock, release it, then notify the
/// registered hooks.
pub struct MemoryRepository<T: Entity> {
    rows: RwLock<BTreeMap<T::Id, T>>,
    hooks: HookRegistry<T>,
}

impl<T: Entity> MemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            hooks: HookRegistry::new(),
        }
    }

    /// Create a repository pre-loaded with rows. No hooks fire.
    pub fn with_rows(rows: impl IntoIterator<Item = T>) -> Self {
        let rows = rows
            .into_iter()
            .map(|row| (row.primary_key(), row))
            .collect();
        Self {
            rows: RwLock::new(rows),
            hooks: HookRegistry::new(),
        }
    }

    /// The hooks fired after each committed mutation.
    pub fn hooks(&self) -> &HookRegistry<T> {
        &self.hooks
    }

    /// Insert a new row.
    pub async fn insert(&self, entity: T) -> ZerquResult<()> {
        let key = entity.primary_key();
        {
            let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
            if rows.contains_key(&key) {
                return Err(ZerquError::Storage(StorageError::InsertFailed {
                    entity_type: T::TABLE,
                    reason: format!("primary key {} already exists", key.cache_suffix()),
                }));
            }
            rows.insert(key, entity.clone());
        }
        self.hooks.fire_inserted(&entity).await;
        Ok(())
    }

    /// Replace an existing row.
    pub async fn update(&self, entity: T) -> ZerquResult<()> {
        let key = entity.primary_key();
        {
            let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
            let slot = rows.get_mut(&key).ok_or_else(|| StorageError::NotFound {
                entity_type: T::TABLE,
                id: key.cache_suffix(),
            })?;
            *slot = entity.clone();
        }
        self.hooks.fire_updated(&entity).await;
        Ok(())
    }

    /// Remove a row, returning it.
    pub async fn delete(&self, id: &T::Id) -> ZerquResult<T> {
        let removed = {
            let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
            rows.remove(id).ok_or_else(|| StorageError::NotFound {
                entity_type: T::TABLE,
                id: id.cache_suffix(),
            })?
        };
        self.hooks.fire_deleted(&removed).await;
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_rows<O>(&self, f: impl FnOnce(&BTreeMap<T::Id, T>) -> O) -> ZerquResult<O> {
        let rows = self.rows.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(f(&rows))
    }
}

impl<T: Entity> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> EntityRepository<T> for MemoryRepository<T> {
    async fn get(&self, id: &T::Id) -> ZerquResult<Option<T>> {
        self.read_rows(|rows| rows.get(id).cloned())
    }

    async fn get_many(&self, ids: &[T::Id]) -> ZerquResult<Vec<T>> {
        self.read_rows(|rows| {
            ids.iter()
                .filter_map(|id| rows.get(id).cloned())
                .collect()
        })
    }

    async fn filter_first(&self, filter: &Filter) -> ZerquResult<Option<T>> {
        self.read_rows(|rows| rows.values().find(|row| row.matches(filter)).cloned())
    }

    async fn filter_all(&self, filter: &Filter) -> ZerquResult<Vec<T>> {
        self.read_rows(|rows| {
            rows.values()
                .filter(|row| row.matches(filter))
                .cloned()
                .collect()
        })
    }

    async fn count(&self) -> ZerquResult<i64> {
        self.read_rows(|rows| rows.len() as i64)
    }

    async fn filter_count(&self, filter: &Filter) -> ZerquResult<i64> {
        self.read_rows(|rows| rows.values().filter(|row| row.matches(filter)).count() as i64)
    }
}
