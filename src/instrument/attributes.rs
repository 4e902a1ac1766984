// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Key/value tags attached to measurements and spans.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A tag value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::I64(a), Self::I64(b)) => a == b,
            // Bitwise so that equality agrees with `Hash`.
            (Self::F64(a), Self::F64(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Bool(v) => v.hash(state),
            Self::I64(v) => v.hash(state),
            Self::F64(v) => v.to_bits().hash(state),
            Self::String(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::I64(v) => write!(f, "{}", v),
            Self::F64(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::I64(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::I64(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// A single tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: Value,
}

impl KeyValue {
    /// Create a new tag.
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An order-independent set of tags with unique keys.
///
/// Used to partition a counter into series: `[a=1, b=2]` and `[b=2, a=1]`
/// identify the same series. When a key repeats, the last value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AttributeSet(Vec<KeyValue>);

impl AttributeSet {
    /// Build a set from tags in call order.
    pub fn from_tags(tags: &[KeyValue]) -> Self {
        let mut entries: Vec<KeyValue> = Vec::with_capacity(tags.len());
        for tag in tags {
            match entries.iter_mut().find(|kv| kv.key == tag.key) {
                Some(existing) => existing.value = tag.value.clone(),
                None => entries.push(tag.clone()),
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Self(entries)
    }

    /// The empty set.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.0.iter()
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|kv| kv.key == key).map(|kv| &kv.value)
    }

    pub fn to_vec(&self) -> Vec<KeyValue> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_attribute_set_order_independent() {
        let a = AttributeSet::from_tags(&[KeyValue::new("a", 1), KeyValue::new("b", "x")]);
        let b = AttributeSet::from_tags(&[KeyValue::new("b", "x"), KeyValue::new("a", 1)]);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_attribute_set_last_write_wins() {
        let set = AttributeSet::from_tags(&[
            KeyValue::new("k", "first"),
            KeyValue::new("k", "second"),
        ]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("k"), Some(&Value::from("second")));
    }

    #[test]
    fn test_float_values_hash_consistently() {
        let a = AttributeSet::from_tags(&[KeyValue::new("ratio", 0.5)]);
        let b = AttributeSet::from_tags(&[KeyValue::new("ratio", 0.5)]);
        assert_eq!(a, b);
        assert_ne!(Value::F64(0.5), Value::I64(0));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::from("Hello").to_string(), "Hello");
        assert_eq!(Value::from(42i64).to_string(), "42");
        assert_eq!(Value::from(true).to_string(), "true");
    }
}
