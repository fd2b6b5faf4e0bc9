//! Equality predicates for filter-first and filter-count lookups.
//!
//! A [`Filter`] is an ordered list of `field = value` pairs. Order matters:
//! the cache key for a filter is built in iteration order, so two filters with
//! the same pairs in a different order produce different keys. Callers that
//! build filters dynamically should use [`Filter::sorted`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// A comparable field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Text(String),
    Bool(bool),
    Null,
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Null => f.write_str("None"),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Ordered conjunction of equality predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    pairs: Vec<(String, FieldValue)>,
}

impl Filter {
    /// Create an empty filter (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `field = value` predicate.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.pairs.push((field.into(), value.into()));
        self
    }

    /// A copy ordered by field name.
    pub fn sorted(&self) -> Self {
        let mut pairs = self.pairs.clone();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Self { pairs }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Iterate pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Field names in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.as_str())
    }
}

impl<K, V> FromIterator<(K, V)> for Filter
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_field_value_display() {
        assert_eq!(FieldValue::from(42i64).to_string(), "42");
        assert_eq!(FieldValue::from("alice").to_string(), "alice");
        assert_eq!(FieldValue::from(true).to_string(), "true");
        assert_eq!(FieldValue::from(None::<i64>).to_string(), "None");
    }

    #[test]
    fn test_filter_preserves_insertion_order() {
        let filter = Filter::new().eq("username", "alice").eq("email", "a@x.io");
        let fields: Vec<_> = filter.fields().collect();
        assert_eq!(fields, vec!["username", "email"]);
    }

    #[test]
    fn test_sorted_orders_by_field() {
        let filter = Filter::new().eq("username", "alice").eq("email", "a@x.io");
        let sorted = filter.sorted();
        let fields: Vec<_> = sorted.fields().collect();
        assert_eq!(fields, vec!["email", "username"]);
        assert_ne!(filter, sorted);
        assert_eq!(sorted, sorted.sorted());
    }

    #[test]
    fn test_field_values_decode_by_json_kind() {
        let filter = Filter::new()
            .eq("id", 42i64)
            .eq("username", "alice")
            .eq("active", true)
            .eq("description", None::<String>);
        let value = serde_json::to_value(&filter).unwrap();
        assert_eq!(
            value,
            json!({
                "pairs": [
                    ["id", 42],
                    ["username", "alice"],
                    ["active", true],
                    ["description", null]
                ]
            })
        );
        assert_eq!(serde_json::from_value::<Filter>(value).unwrap(), filter);
        assert_eq!(
            serde_json::from_str::<FieldValue>("\"42\"").unwrap(),
            FieldValue::Text("42".to_string())
        );
    }

    #[test]
    fn test_from_iterator() {
        let filter: Filter = vec![("cafe_id", 3i64), ("user_id", 9i64)].into_iter().collect();
        assert_eq!(filter.len(), 2);
        assert!(!filter.is_empty());
        assert!(Filter::new().is_empty());
    }

    fn arb_pairs() -> impl Strategy<Value = Vec<(String, i64)>> {
        prop::collection::vec(("[a-d]{1,2}", any::<i64>()), 0..8)
    }

    proptest! {
        /// Property: sorting is idempotent and keeps every pair.
        #[test]
        fn prop_sorted_is_idempotent(pairs in arb_pairs()) {
            let filter: Filter = pairs.into_iter().collect();
            let sorted = filter.sorted();
            prop_assert_eq!(sorted.len(), filter.len());
            prop_assert_eq!(&sorted.sorted(), &sorted);

            let mut expected: Vec<_> = filter.iter().collect();
            let mut actual: Vec<_> = sorted.iter().collect();
            expected.sort_by(|a, b| a.0.cmp(b.0));
            prop_assert_eq!(&actual, &expected);
            actual.dedup_by(|a, b| a.0 == b.0);
            prop_assert!(actual.windows(2).all(|w| w[0].0 < w[1].0));
        }

        /// Property: pairs added in any order sort to the same filter.
        #[test]
        fn prop_sorted_ignores_insertion_order(
            pairs in prop::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..6)
        ) {
            let forward: Filter = pairs.iter().map(|(k, v)| (k.clone(), *v)).collect();
            let reverse: Filter = pairs.iter().rev().map(|(k, v)| (k.clone(), *v)).collect();
            prop_assert_eq!(forward.sorted(), reverse.sorted());
        }
    }
}
