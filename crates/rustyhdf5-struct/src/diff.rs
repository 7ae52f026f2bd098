//! Field-by-field numerical comparison of struct trees.
//!
//! [`OrderedStruct::diff`] walks the keys of the left-hand struct and builds
//! a result struct with the same keys. Each numeric field holds the norm of
//! the difference, relative to the norm of the left value when that exceeds
//! a threshold. Three aggregate fields are added:
//!
//! - `diff_norm`: mean discrepancy over all comparable fields
//! - `diff_max`: largest discrepancy anywhere in the tree
//! - `diff_uncomparable`: number of fields that could not be compared
//!
//! Uncomparable fields hold a message instead of a number. Keys present only
//! in the right-hand operand are ignored.

use std::fmt;

use indexmap::IndexMap;
use ndarray::{ArrayD, ArrayViewD, IxDyn};

use crate::structure::OrderedStruct;
use crate::value::{Scalar, Value};

pub const DIFF_NORM: &str = "diff_norm";
pub const DIFF_MAX: &str = "diff_max";
pub const DIFF_UNCOMPARABLE: &str = "diff_uncomparable";

const AGGREGATE_KEYS: [&str; 3] = [DIFF_NORM, DIFF_MAX, DIFF_UNCOMPARABLE];

/// A norm over `f64` arrays.
pub type NormFn = fn(&ArrayViewD<'_, f64>) -> f64;

/// Euclidean norm of all elements, as for a flattened vector.
pub fn frobenius_norm(a: &ArrayViewD<'_, f64>) -> f64 {
    a.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Options for [`OrderedStruct::diff`].
#[derive(Clone, Copy)]
pub struct DiffOptions {
    pub norm: NormFn,
    /// Differences are divided by the left norm only when it exceeds this.
    pub rel_norm_threshold: f64,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            norm: frobenius_norm,
            rel_norm_threshold: 1e-12,
        }
    }
}

impl fmt::Debug for DiffOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffOptions")
            .field("rel_norm_threshold", &self.rel_norm_threshold)
            .finish_non_exhaustive()
    }
}

impl DiffOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn norm(mut self, norm: NormFn) -> Self {
        self.norm = norm;
        self
    }

    pub fn rel_norm_threshold(mut self, threshold: f64) -> Self {
        self.rel_norm_threshold = threshold;
        self
    }
}

/// Errors that abort a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffError {
    /// An operand already holds one of the aggregate keys.
    ReservedKey(String),
    /// The left value has a type that cannot be compared.
    NotImplemented {
        key: String,
        type_name: &'static str,
    },
    /// No field of the struct at `path` could be compared.
    NoComparableFields { path: String },
}

impl fmt::Display for DiffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffError::ReservedKey(key) => write!(
                f,
                "cannot diff structs holding {key:?}; {DIFF_NORM}, {DIFF_MAX} and {DIFF_UNCOMPARABLE} are reserved"
            ),
            DiffError::NotImplemented { key, type_name } => {
                write!(f, "diff not implemented for {type_name} field {key:?}")
            }
            DiffError::NoComparableFields { path } => {
                write!(f, "no comparable fields in {path}")
            }
        }
    }
}

impl std::error::Error for DiffError {}

/// Keyed lookup, implemented by anything a struct can be diffed against.
pub trait Mapping {
    fn lookup(&self, key: &str) -> Option<&Value>;
}

impl Mapping for OrderedStruct {
    fn lookup(&self, key: &str) -> Option<&Value> {
        self.get(key).ok()
    }
}

impl Mapping for IndexMap<String, Value> {
    fn lookup(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

impl OrderedStruct {
    /// Compare against `other`, recursing into nested structs.
    pub fn diff<M: Mapping + ?Sized>(&self, other: &M, options: &DiffOptions) -> Result<OrderedStruct, DiffError> {
        diff_struct(self, other, options, "/")
    }
}

fn diff_struct<M: Mapping + ?Sized>(
    left: &OrderedStruct,
    right: &M,
    options: &DiffOptions,
    path: &str,
) -> Result<OrderedStruct, DiffError> {
    for key in AGGREGATE_KEYS {
        if left.contains_key(key) || right.lookup(key).is_some() {
            return Err(DiffError::ReservedKey(key.to_string()));
        }
    }

    let mut fields = Vec::with_capacity(left.len());
    let mut sum = 0.0;
    let mut max = 0.0_f64;
    let mut compared = 0usize;
    let mut uncomparable = 0i64;

    for (key, value) in left.iter() {
        let outcome = match right.lookup(key) {
            None => Outcome::Uncomparable(format!("{key} not in other")),
            Some(other) => compare(key, value, other, options, path)?,
        };
        let field = match outcome {
            Outcome::Numeric(d) => {
                sum += d;
                max = max.max(d);
                compared += 1;
                Value::Scalar(Scalar::Float(d))
            }
            Outcome::Nested(child) => {
                sum += child_float(&child, DIFF_NORM);
                max = max.max(child_float(&child, DIFF_MAX));
                compared += 1;
                Value::Struct(child)
            }
            Outcome::Uncomparable(msg) => {
                uncomparable += 1;
                Value::Text(msg)
            }
        };
        fields.push((key.to_string(), field));
    }

    if compared == 0 {
        return Err(DiffError::NoComparableFields {
            path: path.to_string(),
        });
    }

    let mut result = OrderedStruct::with_policy(left.policy());
    result.insert_unchecked(DIFF_NORM.to_string(), Value::Scalar(Scalar::Float(sum / compared as f64)));
    result.insert_unchecked(DIFF_MAX.to_string(), Value::Scalar(Scalar::Float(max)));
    result.insert_unchecked(DIFF_UNCOMPARABLE.to_string(), Value::Scalar(Scalar::Int(uncomparable)));
    for (key, field) in fields {
        result.insert_unchecked(key, field);
    }
    Ok(result)
}

enum Outcome {
    Numeric(f64),
    Nested(OrderedStruct),
    Uncomparable(String),
}

fn compare(key: &str, left: &Value, right: &Value, options: &DiffOptions, path: &str) -> Result<Outcome, DiffError> {
    Ok(match left {
        Value::Struct(s) => {
            let child_path = crate::source::join_path(path, key);
            match right {
                Value::Struct(o) => Outcome::Nested(diff_struct(s, o, options, &child_path)?),
                Value::Map(m) => Outcome::Nested(diff_struct(s, m, options, &child_path)?),
                other => Outcome::Uncomparable(format!(
                    "type of other[{key:?}] is {}, not struct",
                    other.type_name()
                )),
            }
        }
        Value::Scalar(_) | Value::Array(_) | Value::Leaf(_) => match numeric_diff(left, right, options) {
            Ok(d) => Outcome::Numeric(d),
            Err(msg) => Outcome::Uncomparable(msg),
        },
        Value::Text(a) => match right {
            Value::Text(b) if a == b => Outcome::Numeric(0.0),
            _ => Outcome::Uncomparable("strings are not equal".to_string()),
        },
        Value::List(_) | Value::Map(_) => {
            return Err(DiffError::NotImplemented {
                key: key.to_string(),
                type_name: left.type_name(),
            })
        }
    })
}

fn child_float(child: &OrderedStruct, key: &str) -> f64 {
    child.get(key).ok().and_then(Value::as_f64).unwrap_or(0.0)
}

/// Numeric payload of a value, reading lazy leaves.
fn numeric(value: &Value) -> Result<ArrayD<f64>, String> {
    match value {
        Value::Scalar(s) => Ok(ArrayD::from_elem(IxDyn(&[]), s.as_f64())),
        Value::Array(a) => a
            .to_f64()
            .ok_or_else(|| format!("cannot subtract a {}", a.type_name())),
        Value::Leaf(leaf) => {
            let payload = leaf.read().map_err(|e| e.to_string())?;
            payload
                .to_f64()
                .ok_or_else(|| format!("cannot subtract a {}", payload.type_name()))
        }
        other => Err(format!("cannot subtract a {}", other.type_name())),
    }
}

fn numeric_diff(left: &Value, right: &Value, options: &DiffOptions) -> Result<f64, String> {
    let a = numeric(left)?;
    let b = numeric(right)?;
    let shape = broadcast_shape(a.shape(), b.shape()).ok_or_else(|| {
        format!(
            "shapes {:?} and {:?} cannot be broadcast together",
            a.shape(),
            b.shape()
        )
    })?;
    let (Some(av), Some(bv)) = (a.broadcast(IxDyn(&shape)), b.broadcast(IxDyn(&shape))) else {
        return Err(format!("cannot broadcast to shape {shape:?}"));
    };
    let delta = &av - &bv;
    let mut d = (options.norm)(&delta.view());
    let own = (options.norm)(&a.view());
    if own > options.rel_norm_threshold {
        d /= own;
    }
    Ok(d)
}

/// Shape two arrays broadcast to, aligning trailing axes.
fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let n = a.len().max(b.len());
    let mut out = vec![0; n];
    for i in 0..n {
        let x = if i < a.len() { a[a.len() - 1 - i] } else { 1 };
        let y = if i < b.len() { b[b.len() - 1 - i] } else { 1 };
        out[n - 1 - i] = match (x, y) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}
