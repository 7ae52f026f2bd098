//! The closed set of values a struct field can hold.

use std::fmt;

use indexmap::IndexMap;
use ndarray::{Array1, ArrayD};

use crate::array::Array;
use crate::leaf::LazyLeaf;
use crate::structure::OrderedStruct;

/// A numeric scalar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Int(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
        }
    }
}

/// A struct field value.
#[derive(Debug)]
pub enum Value {
    Scalar(Scalar),
    Text(String),
    Array(Array),
    /// A heterogeneous, tuple-like sequence.
    List(Vec<Value>),
    Struct(OrderedStruct),
    /// A plain nested mapping that was not converted into a struct.
    Map(IndexMap<String, Value>),
    Leaf(LazyLeaf),
}

impl Value {
    /// Short type name used in diff and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Scalar(Scalar::Int(_)) => "int",
            Value::Scalar(Scalar::Float(_)) => "float",
            Value::Text(_) => "text",
            Value::Array(a) => a.type_name(),
            Value::List(_) => "list",
            Value::Struct(_) => "struct",
            Value::Map(_) => "map",
            Value::Leaf(_) => "lazy leaf",
        }
    }

    pub fn as_struct(&self) -> Option<&OrderedStruct> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_struct_mut(&mut self) -> Option<&mut OrderedStruct> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&LazyLeaf> {
        match self {
            Value::Leaf(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Scalar(s) => Some(s.as_f64()),
            _ => None,
        }
    }

    /// A copy with every lazy leaf replaced by its payload.
    ///
    /// Reading a leaf may hit the disk; its error is returned unchanged.
    pub fn materialize(&self) -> crate::Result<Value> {
        Ok(match self {
            Value::Scalar(s) => Value::Scalar(*s),
            Value::Text(s) => Value::Text(s.clone()),
            Value::Array(a) => Value::Array(a.clone()),
            Value::List(items) => Value::List(
                items
                    .iter()
                    .map(Value::materialize)
                    .collect::<crate::Result<_>>()?,
            ),
            Value::Struct(s) => Value::Struct(s.materialize()?),
            Value::Map(m) => Value::Map(
                m.iter()
                    .map(|(k, v)| Ok((k.clone(), v.materialize()?)))
                    .collect::<crate::Result<_>>()?,
            ),
            Value::Leaf(leaf) => Value::Array(leaf.read()?.as_ref().clone()),
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Leaf(a), Value::Leaf(b)) => a.same_source(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(s) => write!(f, "{s}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Array(a) => write!(f, "[{} {:?}]", a.type_name(), a.shape()),
            Value::List(items) => write!(f, "[list of {}]", items.len()),
            Value::Struct(s) => write!(f, "[struct with {} fields]", s.len()),
            Value::Map(m) => write!(f, "[map with {} fields]", m.len()),
            Value::Leaf(l) => write!(f, "[lazy {} {:?}]", l.element_type(), l.shape()),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(Scalar::Float(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Scalar(Scalar::Int(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Scalar(Scalar::Int(v.into()))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Array> for Value {
    fn from(v: Array) -> Self {
        Value::Array(v)
    }
}

impl From<ArrayD<f64>> for Value {
    fn from(v: ArrayD<f64>) -> Self {
        Value::Array(Array::Float(v))
    }
}

impl From<ArrayD<i64>> for Value {
    fn from(v: ArrayD<i64>) -> Self {
        Value::Array(Array::Int(v))
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Array(Array::Float(Array1::from(v).into_dyn()))
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<OrderedStruct> for Value {
    fn from(v: OrderedStruct) -> Self {
        Value::Struct(v)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(v: IndexMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl From<LazyLeaf> for Value {
    fn from(v: LazyLeaf) -> Self {
        Value::Leaf(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names() {
        assert_eq!(Value::from(1).type_name(), "int");
        assert_eq!(Value::from(1.5).type_name(), "float");
        assert_eq!(Value::from("a").type_name(), "text");
        assert_eq!(Value::from(vec![1.0, 2.0]).type_name(), "float array");
        assert_eq!(Value::from(OrderedStruct::new()).type_name(), "struct");
    }

    #[test]
    fn int_and_float_scalars_differ() {
        assert_ne!(Value::from(1), Value::from(1.0));
        assert_eq!(Value::from(2.5).as_f64(), Some(2.5));
    }

    #[test]
    fn vec_becomes_1d_array() {
        let v = Value::from(vec![3.0, 2.1]);
        assert_eq!(v.as_array().map(Array::shape), Some(&[2usize][..]));
    }
}
