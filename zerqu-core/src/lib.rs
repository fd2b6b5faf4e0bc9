//! zerqu Core - Entity Types
//!
//! Pure data structures shared by the cache layer and the backing stores:
//! the [`Entity`] contract, primary keys, equality filters, the forum
//! records, error types and configuration. No I/O lives here.

pub mod config;
pub mod entities;
pub mod entity;
pub mod enums;
pub mod error;
pub mod filter;
pub mod identity;

pub use config::{CacheConfig, LmdbConfig, RateLimitConfig, TtlClass};
pub use entities::{Cafe, CafeMember, Topic, User};
pub use entity::Entity;
pub use enums::{CafePermission, CafeStatus, MemberRole};
pub use error::{CacheError, ConfigError, StorageError, ZerquError, ZerquResult};
pub use filter::{FieldValue, Filter};
pub use identity::{PrimaryKey, RowId, Timestamp};
