//! Cache key construction.
//!
//! Keys are plain strings of the form
//!
//! ```text
//! prefix:op:table[|version]:suffix
//! ```
//!
//! - `op` is one of `get`, `count`, `ff` (filter-first) or `fc` (filter-count)
//! - `suffix` is the primary key for `get` (composite keys joined with `-` in
//!   column order), `field$value` pairs joined with `-` for filter operations,
//!   and empty for `count`
//!
//! Filter pairs are encoded in the order the caller supplies them. Passing a
//! stable order is the caller's job; see `Filter::sorted`.
//!
//! Integers and booleans render bare, `NULL` renders as `~null`. Text renders
//! bare unless it starts with `~`, parses as an integer or is `true`/`false`,
//! in which case it gains a leading `~`. No two values of one field share a
//! rendering.

use std::borrow::Cow;

use zerqu_core::{Entity, FieldValue, Filter, PrimaryKey, TtlClass};

/// Separator between primary key components and between filter pairs.
const PART_SEPARATOR: &str = "-";

/// Separator between a filter field and its value.
const PAIR_SEPARATOR: char = '$';

/// Marks non-bare values in filter suffixes.
const VALUE_ESCAPE: char = '~';

/// Filter value as it appears in a key.
fn render_value(value: &FieldValue) -> Cow<'_, str> {
    match value {
        FieldValue::Int(v) => Cow::Owned(v.to_string()),
        FieldValue::Bool(v) => Cow::Borrowed(if *v { "true" } else { "false" }),
        FieldValue::Null => Cow::Borrowed("~null"),
        FieldValue::Text(text) => {
            let ambiguous = text.starts_with(VALUE_ESCAPE)
                || text == "true"
                || text == "false"
                || text.parse::<i64>().is_ok();
            if ambiguous {
                Cow::Owned(format!("{}{}", VALUE_ESCAPE, text))
            } else {
                Cow::Borrowed(text.as_str())
            }
        }
    }
}

/// The kind of cached lookup a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOp {
    Get,
    Count,
    FilterFirst,
    FilterCount,
}

impl CacheOp {
    /// Key segment for this operation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Count => "count",
            Self::FilterFirst => "ff",
            Self::FilterCount => "fc",
        }
    }

    /// Lifetime class of entries written under this operation.
    pub fn ttl_class(self) -> TtlClass {
        match self {
            Self::Get => TtlClass::Get,
            Self::Count => TtlClass::Count,
            Self::FilterFirst => TtlClass::FilterFirst,
            Self::FilterCount => TtlClass::FilterCount,
        }
    }
}

/// Builds cache keys under a fixed leading prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyCodec {
    prefix: String,
}

impl CacheKeyCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build a key from raw parts.
    pub fn key_for(
        &self,
        type_name: &str,
        op: CacheOp,
        version: Option<u32>,
        parts: &[String],
    ) -> String {
        let mut key = self.type_prefix(type_name, op, version);
        key.push_str(&parts.join(PART_SEPARATOR));
        key
    }

    /// The key prefix shared by every entry of `T` under `op`, ending in `:`.
    pub fn prefix_for<T: Entity>(&self, op: CacheOp) -> String {
        self.type_prefix(T::TABLE, op, T::CACHE_VERSION)
    }

    /// Primary-key lookup key.
    pub fn get_key<T: Entity>(&self, id: &T::Id) -> String {
        self.key_for(T::TABLE, CacheOp::Get, T::CACHE_VERSION, &id.key_parts())
    }

    /// Unqualified row count key.
    pub fn count_key<T: Entity>(&self) -> String {
        self.prefix_for::<T>(CacheOp::Count)
    }

    /// Filter lookup key for `op` (`FilterFirst` or `FilterCount`).
    ///
    /// `NULL` and the text `"None"` get different keys, as do `42` and `"42"`.
    pub fn filter_key<T: Entity>(&self, op: CacheOp, filter: &Filter) -> String {
        let parts: Vec<String> = filter
            .iter()
            .map(|(field, value)| format!("{}{}{}", field, PAIR_SEPARATOR, render_value(value)))
            .collect();
        self.key_for(T::TABLE, op, T::CACHE_VERSION, &parts)
    }

    fn type_prefix(&self, type_name: &str, op: CacheOp, version: Option<u32>) -> String {
        match version {
            Some(v) => format!("{}:{}:{}|{}:", self.prefix, op.as_str(), type_name, v),
            None => format!("{}:{}:{}:", self.prefix, op.as_str(), type_name),
        }
    }
}

impl Default for CacheKeyCodec {
    fn default() -> Self {
        Self::new("db")
    }
}
