//! Ordered, attribute-accessible struct container.
//!
//! An [`OrderedStruct`] maps validated string keys to [`Value`]s and keeps
//! insertion order. Order drives display and file-write order but never
//! equality. Hidden attributes live in a side table that is neither part of
//! the mapping nor serialized.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::key::{is_identifier, validate_key, KeyPolicy};
use crate::value::Value;

/// Widest key that still gets right-aligned in the pretty printer.
const MAX_ALIGN_WIDTH: usize = 16;

/// An ordered mapping from validated keys to values.
#[derive(Debug, Default)]
pub struct OrderedStruct {
    fields: IndexMap<String, Value>,
    policy: KeyPolicy,
    hidden: BTreeMap<String, Value>,
}

impl OrderedStruct {
    /// Create an empty struct with the strict key policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty struct with the given key policy.
    pub fn with_policy(policy: KeyPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Build a struct from `(key, value)` pairs, validating each key.
    pub fn from_pairs<K, V, I>(pairs: I) -> Result<Self>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut s = Self::new();
        for (k, v) in pairs {
            s.set(k, v)?;
        }
        Ok(s)
    }

    /// Build a struct from a plain mapping.
    ///
    /// With `convert_nested`, every nested [`Value::Map`] (including maps
    /// inside lists) becomes a nested [`Value::Struct`] with the same policy.
    pub fn from_map(map: IndexMap<String, Value>, policy: KeyPolicy, convert_nested: bool) -> Result<Self> {
        let mut s = Self::with_policy(policy);
        for (k, v) in map {
            let v = if convert_nested {
                convert_value(v, policy)?
            } else {
                v
            };
            s.set(k, v)?;
        }
        Ok(s)
    }

    pub fn policy(&self) -> KeyPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Insert or update a field.
    ///
    /// New keys are validated and appended; updating an existing key keeps
    /// its position and skips validation.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.fields.get_mut(&key) {
            *slot = value;
            return Ok(());
        }
        validate_key(&key, self.policy)?;
        self.fields.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<&Value> {
        self.fields
            .get(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    pub fn get_mut(&mut self, key: &str) -> Result<&mut Value> {
        self.fields
            .get_mut(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// Attribute-style lookup, restricted to identifier names.
    pub fn attr(&self, name: &str) -> Result<&Value> {
        if !is_identifier(name) {
            return Err(Error::NotFound(format!(
                "{name} (not usable as an attribute name)"
            )));
        }
        self.get(name)
    }

    /// Remove a field, keeping the order of the others.
    pub fn delete(&mut self, key: &str) -> Result<Value> {
        self.fields
            .shift_remove(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// Insert `key` immediately before `anchor`.
    ///
    /// An existing `key` is moved; `key == anchor` updates in place.
    pub fn insert_before(&mut self, anchor: &str, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.insert_adjacent(anchor, key.into(), value.into(), false)
    }

    /// Insert `key` immediately after `anchor`.
    ///
    /// An existing `key` is moved; `key == anchor` updates in place.
    pub fn insert_after(&mut self, anchor: &str, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.insert_adjacent(anchor, key.into(), value.into(), true)
    }

    fn insert_adjacent(&mut self, anchor: &str, key: String, value: Value, after: bool) -> Result<()> {
        if !self.fields.contains_key(anchor) {
            return Err(Error::NotFound(anchor.to_string()));
        }
        if key == anchor {
            return self.set(key, value);
        }
        if self.fields.shift_remove(&key).is_none() {
            validate_key(&key, self.policy)?;
        }
        let pos = self
            .fields
            .get_index_of(anchor)
            .ok_or_else(|| Error::NotFound(anchor.to_string()))?;
        let index = if after { pos + 1 } else { pos };
        self.fields.shift_insert(index, key, value);
        Ok(())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy every field of `other` into `self`.
    ///
    /// Fields holding structs on both sides merge recursively; everything
    /// else is overwritten. New keys are validated against `self`'s policy.
    pub fn merge(&mut self, other: OrderedStruct) -> Result<()> {
        for (key, value) in other.fields {
            if let Value::Struct(theirs) = value {
                if let Some(Value::Struct(mine)) = self.fields.get_mut(&key) {
                    mine.merge(theirs)?;
                    continue;
                }
                self.set(key, Value::Struct(theirs))?;
            } else {
                self.set(key, value)?;
            }
        }
        Ok(())
    }

    /// Set a hidden attribute.
    pub fn set_hidden(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.hidden.insert(name.into(), value.into());
    }

    pub fn hidden(&self, name: &str) -> Option<&Value> {
        self.hidden.get(name)
    }

    /// A deep copy with every lazy leaf replaced by its payload.
    pub fn materialize(&self) -> Result<OrderedStruct> {
        let mut out = OrderedStruct::with_policy(self.policy);
        for (k, v) in &self.fields {
            out.fields.insert(k.clone(), v.materialize()?);
        }
        Ok(out)
    }

    pub(crate) fn insert_unchecked(&mut self, key: String, value: Value) {
        self.fields.insert(key, value);
    }
}

fn convert_value(value: Value, policy: KeyPolicy) -> Result<Value> {
    Ok(match value {
        Value::Map(m) => Value::Struct(OrderedStruct::from_map(m, policy, true)?),
        Value::List(items) => Value::List(
            items
                .into_iter()
                .map(|v| convert_value(v, policy))
                .collect::<Result<_>>()?,
        ),
        other => other,
    })
}

/// Equality ignores field order and hidden attributes.
impl PartialEq for OrderedStruct {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .fields
                .iter()
                .all(|(k, v)| other.fields.get(k).is_some_and(|o| o == v))
    }
}

impl fmt::Display for OrderedStruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let longest = self.fields.keys().map(String::len).max().unwrap_or(0);
        let width = if longest <= MAX_ALIGN_WIDTH { longest } else { 0 };
        for (k, v) in &self.fields {
            writeln!(f, "{k:>width$}: {v}")?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a OrderedStruct {
    type Item = (&'a String, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

impl IntoIterator for OrderedStruct {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}
