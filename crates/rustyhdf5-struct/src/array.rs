//! N-dimensional payloads held by struct fields and lazy leaves.

use std::fmt;

use ndarray::{ArrayD, Axis, IxDyn, SliceInfo, SliceInfoElem};

use crate::error::{Error, Result};

/// Element type of a leaf as reported by the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementType {
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Text,
    Other(String),
}

impl ElementType {
    /// Float or integer element types, i.e. those read into numeric arrays.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ElementType::Text | ElementType::Other(_))
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::F32 => write!(f, "f32"),
            ElementType::F64 => write!(f, "f64"),
            ElementType::I8 => write!(f, "i8"),
            ElementType::I16 => write!(f, "i16"),
            ElementType::I32 => write!(f, "i32"),
            ElementType::I64 => write!(f, "i64"),
            ElementType::U8 => write!(f, "u8"),
            ElementType::U16 => write!(f, "u16"),
            ElementType::U32 => write!(f, "u32"),
            ElementType::U64 => write!(f, "u64"),
            ElementType::Text => write!(f, "string"),
            ElementType::Other(desc) => write!(f, "other({desc})"),
        }
    }
}

/// A dense array of floats, integers or strings.
#[derive(Debug, Clone, PartialEq)]
pub enum Array {
    Float(ArrayD<f64>),
    Int(ArrayD<i64>),
    Text(ArrayD<String>),
}

macro_rules! each_array {
    ($value:expr, $a:ident => $body:expr) => {
        match $value {
            Array::Float($a) => Array::Float($body),
            Array::Int($a) => Array::Int($body),
            Array::Text($a) => Array::Text($body),
        }
    };
}

impl Array {
    /// Build a float array from row-major data and a shape.
    pub fn from_f64(shape: &[usize], data: Vec<f64>) -> Result<Self> {
        let len = data.len();
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(Array::Float)
            .map_err(|_| shape_mismatch(shape, len))
    }

    /// Build an integer array from row-major data and a shape.
    pub fn from_i64(shape: &[usize], data: Vec<i64>) -> Result<Self> {
        let len = data.len();
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(Array::Int)
            .map_err(|_| shape_mismatch(shape, len))
    }

    /// Build a string array from row-major data and a shape.
    pub fn from_strings(shape: &[usize], data: Vec<String>) -> Result<Self> {
        let len = data.len();
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(Array::Text)
            .map_err(|_| shape_mismatch(shape, len))
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Array::Float(a) => a.shape(),
            Array::Int(a) => a.shape(),
            Array::Text(a) => a.shape(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Array::Float(_) => "float array",
            Array::Int(_) => "integer array",
            Array::Text(_) => "string array",
        }
    }

    /// Remove every axis of length 1.
    pub fn squeeze(self) -> Self {
        each_array!(self, a => squeeze_axes(a))
    }

    /// Reverse the order of the axes.
    pub fn transpose(self) -> Self {
        each_array!(self, a => a.reversed_axes())
    }

    /// Numeric view as `f64`, or `None` for string arrays.
    pub fn to_f64(&self) -> Option<ArrayD<f64>> {
        match self {
            Array::Float(a) => Some(a.clone()),
            Array::Int(a) => Some(a.mapv(|v| v as f64)),
            Array::Text(_) => None,
        }
    }

    /// Row-major copy of the elements as `f64`.
    #[cfg(test)]
    pub(crate) fn to_f64_vec(&self) -> Option<Vec<f64>> {
        self.to_f64().map(|a| a.iter().copied().collect())
    }

    /// Apply a selection over the leading axes and return an owned copy.
    ///
    /// Axes not covered by `selection` are kept whole. Out-of-range indices,
    /// zero steps and selections longer than the array's rank are errors.
    pub fn select(&self, selection: &[SliceInfoElem]) -> Result<Self> {
        let info = checked_slice_info(self.shape(), selection)?;
        Ok(each_array!(self, a => a.slice(&info).to_owned()))
    }
}

fn squeeze_axes<T>(mut a: ArrayD<T>) -> ArrayD<T> {
    for ax in (0..a.ndim()).rev() {
        if a.len_of(Axis(ax)) == 1 {
            a = a.index_axis_move(Axis(ax), 0);
        }
    }
    a
}

/// Shape after dropping axes of length 1.
pub(crate) fn squeezed_shape(shape: &[usize]) -> Vec<usize> {
    shape.iter().copied().filter(|&n| n != 1).collect()
}

fn shape_mismatch(shape: &[usize], len: usize) -> Error {
    Error::Type(format!("{len} elements do not fit shape {shape:?}"))
}

fn abs_index(len: usize, index: isize) -> Option<usize> {
    if index < 0 {
        len.checked_sub(index.unsigned_abs())
    } else {
        Some(index as usize)
    }
}

fn checked_slice_info(
    shape: &[usize],
    selection: &[SliceInfoElem],
) -> Result<SliceInfo<Vec<SliceInfoElem>, IxDyn, IxDyn>> {
    let mut elems = Vec::with_capacity(shape.len().max(selection.len()));
    let mut axis = 0;
    for elem in selection {
        match *elem {
            SliceInfoElem::NewAxis => {}
            SliceInfoElem::Index(i) => {
                let len = axis_len(shape, axis)?;
                match abs_index(len, i) {
                    Some(i) if i < len => {}
                    _ => {
                        return Err(Error::Selection(format!(
                            "index {i} out of range for axis {axis} of length {len}"
                        )))
                    }
                }
                axis += 1;
            }
            SliceInfoElem::Slice { start, end, step } => {
                let len = axis_len(shape, axis)?;
                if step == 0 {
                    return Err(Error::Selection(format!("zero step on axis {axis}")));
                }
                let start_ok = abs_index(len, start).is_some_and(|s| s <= len);
                let end_ok = end.map_or(true, |e| abs_index(len, e).is_some_and(|e| e <= len));
                if !start_ok || !end_ok {
                    return Err(Error::Selection(format!(
                        "slice {start}..{end:?} out of range for axis {axis} of length {len}"
                    )));
                }
                axis += 1;
            }
        }
        elems.push(*elem);
    }
    // keep the remaining axes whole
    elems.extend((axis..shape.len()).map(|_| SliceInfoElem::from(..)));
    SliceInfo::try_from(elems).map_err(|e| Error::Selection(e.to_string()))
}

fn axis_len(shape: &[usize], axis: usize) -> Result<usize> {
    shape.get(axis).copied().ok_or_else(|| {
        Error::Selection(format!(
            "selection addresses axis {axis} of a {}-dimensional array",
            shape.len()
        ))
    })
}
