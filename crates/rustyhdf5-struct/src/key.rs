//! Key validation rules for [`OrderedStruct`](crate::OrderedStruct).
//!
//! A strict key looks like an identifier: ASCII, starts with a letter, and
//! continues with letters, digits or `_`. Keys must never shadow one of the
//! struct's own operation names.

use std::fmt;

/// Operation names a key may not collide with, under any policy.
pub const RESERVED_NAMES: &[&str] = &[
    "attr",
    "clear",
    "contains_key",
    "copy",
    "delete",
    "diff",
    "get",
    "insert_after",
    "insert_before",
    "is_empty",
    "items",
    "iter",
    "keys",
    "len",
    "load_h5",
    "load_mat",
    "merge",
    "pop",
    "remove",
    "save_h5",
    "save_mat",
    "set",
    "update",
    "values",
];

/// How strictly new keys are checked before insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyPolicy {
    /// Identifier-like keys only.
    #[default]
    Strict,
    /// Like [`KeyPolicy::Strict`], but `-` is also accepted after the first character.
    Loose,
    /// Any non-empty key that does not shadow an operation name.
    Permissive,
}

/// The rule a rejected key violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRule {
    Empty,
    Reserved,
    BadFirstChar,
    BadChar,
    NonAscii,
}

impl fmt::Display for KeyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRule::Empty => write!(f, "key must not be empty"),
            KeyRule::Reserved => write!(f, "key collides with a struct operation name"),
            KeyRule::BadFirstChar => write!(f, "key must start with a letter"),
            KeyRule::BadChar => write!(f, "key contains a character that is not allowed"),
            KeyRule::NonAscii => write!(f, "key must be ASCII"),
        }
    }
}

/// A key rejected by [`validate_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyError {
    pub key: String,
    pub rule: KeyRule,
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid key {:?}: {}", self.key, self.rule)
    }
}

impl std::error::Error for KeyError {}

/// Check `key` against `policy`.
///
/// Rules are checked in a fixed order (empty, reserved, first character,
/// body characters, ASCII) and the first failure is reported.
pub fn validate_key(key: &str, policy: KeyPolicy) -> Result<(), KeyError> {
    let reject = |rule| {
        Err(KeyError {
            key: key.to_string(),
            rule,
        })
    };

    if key.is_empty() {
        return reject(KeyRule::Empty);
    }
    if RESERVED_NAMES.contains(&key) {
        return reject(KeyRule::Reserved);
    }
    if policy == KeyPolicy::Permissive {
        return Ok(());
    }

    let mut chars = key.chars();
    // non-empty checked above
    let first = chars.next().unwrap_or_default();
    if !first.is_alphabetic() {
        return reject(KeyRule::BadFirstChar);
    }
    let allow_dash = policy == KeyPolicy::Loose;
    if !chars.all(|c| c.is_alphanumeric() || c == '_' || (allow_dash && c == '-')) {
        return reject(KeyRule::BadChar);
    }
    if !key.is_ascii() {
        return reject(KeyRule::NonAscii);
    }
    Ok(())
}

/// Returns `true` if `name` can be used with attribute-style access.
pub fn is_identifier(name: &str) -> bool {
    validate_key(name, KeyPolicy::Strict).is_ok()
}
