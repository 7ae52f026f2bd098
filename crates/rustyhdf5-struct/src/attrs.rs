//! Conversion between file attributes and struct values, plus the
//! attribute conventions used when structs are stored in HDF5 files.

use std::collections::HashMap;

use ndarray::Array1;
use rustyhdf5::AttrValue;

use crate::array::Array;
use crate::error::Result;
use crate::key::KeyPolicy;
use crate::structure::OrderedStruct;
use crate::value::{Scalar, Value};

/// Attribute naming how a stored value is encoded.
pub(crate) const VALUE_TYPE: &str = "value_type";
/// `value_type` of text stored as UTF-8 bytes.
pub(crate) const TEXT_VALUE: &str = "text";

/// Encode text as UTF-8 followed by a NUL terminator, so empty text still
/// occupies one byte.
pub(crate) fn encode_text(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len() + 1);
    bytes.extend_from_slice(text.as_bytes());
    bytes.push(0);
    bytes
}

/// Inverse of [`encode_text`]; a missing terminator is tolerated.
pub(crate) fn decode_text(mut bytes: Vec<u8>) -> std::result::Result<String, std::string::FromUtf8Error> {
    if bytes.last() == Some(&0) {
        bytes.pop();
    }
    String::from_utf8(bytes)
}

/// Convert one attribute into a struct value.
///
/// Single values become scalars or text, lists become 1-D arrays.
pub fn attr_to_value(attr: &AttrValue) -> Value {
    match attr {
        AttrValue::F64(v) => Value::Scalar(Scalar::Float(*v)),
        AttrValue::I64(v) => Value::Scalar(Scalar::Int(*v)),
        AttrValue::U64(v) => match i64::try_from(*v) {
            Ok(v) => Value::Scalar(Scalar::Int(v)),
            Err(_) => Value::Scalar(Scalar::Float(*v as f64)),
        },
        AttrValue::String(s) => Value::Text(s.clone()),
        AttrValue::F64Array(a) => Value::Array(Array::Float(Array1::from(a.clone()).into_dyn())),
        AttrValue::I64Array(a) => Value::Array(Array::Int(Array1::from(a.clone()).into_dyn())),
        AttrValue::StringArray(a) => {
            Value::Array(Array::Text(Array1::from(a.clone()).into_dyn()))
        }
    }
}

/// Collect attributes into a permissive struct, sorted by name.
///
/// Attribute names that collide with a struct operation name are stored
/// with a trailing `_`.
pub fn attrs_to_struct(attrs: &HashMap<String, AttrValue>) -> Result<OrderedStruct> {
    let mut names: Vec<&String> = attrs.keys().collect();
    names.sort();
    let mut s = OrderedStruct::with_policy(KeyPolicy::Permissive);
    for name in names {
        let value = attr_to_value(&attrs[name]);
        if s.set(name.as_str(), value).is_err() {
            s.set(format!("{name}_"), attr_to_value(&attrs[name]))?;
        }
    }
    Ok(s)
}

/// Get a text attribute.
pub(crate) fn text(attrs: &HashMap<String, AttrValue>, name: &str) -> Option<String> {
    match attrs.get(name) {
        Some(AttrValue::String(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Get a string-list attribute; a single string counts as a list of one.
pub(crate) fn string_list(attrs: &HashMap<String, AttrValue>, name: &str) -> Option<Vec<String>> {
    match attrs.get(name) {
        Some(AttrValue::StringArray(a)) => Some(a.clone()),
        Some(AttrValue::String(s)) => Some(vec![s.clone()]),
        _ => None,
    }
}

/// Get an integer-list attribute.
pub(crate) fn int_list(attrs: &HashMap<String, AttrValue>, name: &str) -> Option<Vec<i64>> {
    match attrs.get(name) {
        Some(AttrValue::I64Array(a)) => Some(a.clone()),
        Some(AttrValue::I64(v)) => Some(vec![*v]),
        Some(AttrValue::U64(v)) => i64::try_from(*v).ok().map(|v| vec![v]),
        _ => None,
    }
}
