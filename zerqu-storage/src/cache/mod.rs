//! Cache layer for forum entities.
//!
//! This module provides a read-through entity cache over a pluggable
//! key/value store, with invalidation driven by repository mutation hooks.
//!
//! # Consistency
//!
//! Cached data may be stale. Primary-key and count entries are maintained by
//! the hooks in [`hooks`]; filter entries have no precise invalidation and
//! rely on their short TTL. No state is coordinated across processes beyond
//! what the shared store provides.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(InMemoryCacheStore::new());
//! let repo = Arc::new(MemoryRepository::<User>::new());
//! let users = Arc::new(EntityCache::new(repo.clone(), store, CacheConfig::default()));
//! repo.hooks().register(users.clone());
//!
//! repo.insert(alice).await?;
//! let cached = users.get_by_id(&alice_id).await?;
//! let admins = users.filter_count(&Filter::new().eq("reputation", 100i64)).await?;
//! ```

pub mod clock;
pub mod entity_cache;
pub mod hooks;
pub mod key;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity_cache::EntityCache;
pub use hooks::{HookRegistry, MutationKind, MutationObserver};
pub use key::{CacheKeyCodec, CacheOp};
pub use lmdb_backend::{LmdbCacheError, LmdbCacheStore};
pub use memory_backend::InMemoryCacheStore;
pub use traits::{decode_counter, encode_counter, CacheStats, CacheStore};
