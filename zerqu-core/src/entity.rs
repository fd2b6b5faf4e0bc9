//! The record contract shared by the cache and the backing stores.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::filter::{FieldValue, Filter};
use crate::identity::PrimaryKey;

/// A persisted record type with a stable primary key.
///
/// # Implementation Requirements
///
/// - `TABLE` must be the same for every instance and is used in cache keys
/// - `PRIMARY_KEY` lists the key columns in declared order
/// - `field` must return a value for every column a caller may filter on
/// - Bumping `CACHE_VERSION` orphans every cached entry of the type
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Primary key type.
    type Id: PrimaryKey;

    /// Table name.
    const TABLE: &'static str;

    /// Primary key column names, in declared order.
    const PRIMARY_KEY: &'static [&'static str];

    /// Optional cache version, appended to the type segment of cache keys.
    const CACHE_VERSION: Option<u32> = None;

    /// The primary key of this record.
    fn primary_key(&self) -> Self::Id;

    /// Typed column accessor. Returns `None` for unknown columns.
    fn field(&self, name: &str) -> Option<FieldValue>;

    /// Whether every predicate in `filter` holds for this record.
    fn matches(&self, filter: &Filter) -> bool {
        filter
            .iter()
            .all(|(name, expected)| self.field(name).as_ref() == Some(expected))
    }
}
