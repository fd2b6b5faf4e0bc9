//! zerqu Storage - Cache Layer and Backing Stores
//!
//! The entity cache, its key/value backends, the fixed-window rate limiter,
//! and the repositories the cache reads through to.

pub mod cache;
pub mod postgres;
pub mod ratelimit;
pub mod repository;

pub use cache::{
    CacheKeyCodec, CacheOp, CacheStats, CacheStore, Clock, EntityCache, HookRegistry,
    InMemoryCacheStore, LmdbCacheError, LmdbCacheStore, ManualClock, MutationKind,
    MutationObserver, SystemClock,
};
pub use postgres::{DbConfig, Mutation, PgEntity, PgKey, PgRepository, SqlParam, Statement};
pub use ratelimit::{rate_limit_key, RateLimitStatus, RateLimiter};
pub use repository::{EntityRepository, MemoryRepository};
