//! Identity types for zerqu entities

use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::hash::Hash;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Numeric row identifier used by the forum tables.
pub type RowId = i64;

/// A primary key value, single column or composite.
///
/// `key_parts` yields the stringified components in declared column order.
/// The cache layer joins them with `-` to build `get` keys. `Ord` follows
/// the column types, so integer keys order numerically.
pub trait PrimaryKey: Clone + Eq + Ord + Hash + Debug + Send + Sync + 'static {
    /// Stringified key components, in column order.
    fn key_parts(&self) -> Vec<String>;

    /// Whether this key spans more than one column.
    fn is_composite() -> bool {
        false
    }

    /// Suffix used in `get` cache keys.
    fn cache_suffix(&self) -> String {
        self.key_parts().join("-")
    }
}

macro_rules! single_column_key {
    ($($ty:ty),* $(,)?) => {
        $(
            impl PrimaryKey for $ty {
                fn key_parts(&self) -> Vec<String> {
                    vec![self.to_string()]
                }
            }
        )*
    };
}

single_column_key!(i32, i64, u32, u64, String, Uuid);

impl<A, B> PrimaryKey for (A, B)
where
    A: PrimaryKey,
    B: PrimaryKey,
{
    fn key_parts(&self) -> Vec<String> {
        let mut parts = self.0.key_parts();
        parts.extend(self.1.key_parts());
        parts
    }

    fn is_composite() -> bool {
        true
    }
}
