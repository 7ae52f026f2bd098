//! Saving struct trees to HDF5 files and loading them back.
//!
//! Structs and maps become groups, lists become groups of `_0`, `_1`, ...
//! entries, and everything else becomes a dataset. Each stored object
//! carries a `value_type` attribute so the tree can be rebuilt with its
//! original types, and every struct group records its key order in a
//! `field_order` attribute.
//!
//! With `matlab_compatible` set, arrays are stored with their axes reversed
//! (MATLAB reads column-major data) and objects are tagged with
//! `MATLAB_class`, plus `MATLAB_fields` on struct groups.
//!
//! HDF5 groups are only built one level below the file root. Deeper groups
//! are stored as root groups named `_tree_0`, `_tree_1`, ... with a
//! `tree_path` attribute, and [`read_tree`] puts them back in place.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use rustyhdf5::{AttrValue, Dataset, File, FileBuilder, Group};
use rustyhdf5_format::type_builders::DatasetBuilder;
use tracing::{debug, warn};

use crate::array::Array;
use crate::attrs::{self, encode_text, string_list, TEXT_VALUE, VALUE_TYPE};
use crate::error::{Error, Result};
use crate::key::KeyPolicy;
use crate::source::hdf5::read_dataset;
use crate::source::{join_path, relative};
use crate::structure::OrderedStruct;
use crate::value::{Scalar, Value};

/// Attribute listing the keys of a struct group in order.
pub const FIELD_ORDER_ATTR: &str = "field_order";
/// MATLAB class attribute.
pub const MATLAB_CLASS_ATTR: &str = "MATLAB_class";
/// MATLAB struct field list attribute.
pub const MATLAB_FIELDS_ATTR: &str = "MATLAB_fields";

const SCALAR_VALUE: &str = "scalar";
const ARRAY_VALUE: &str = "array";
const ARRAY_0D_VALUE: &str = "array_0d";
const TEXT_ARRAY_VALUE: &str = "text_array";
const LIST_VALUE: &str = "list";
const STRUCT_VALUE: &str = "struct";
const SHAPE_ATTR: &str = "shape";
/// Tree position of a group stored flat below the root.
const TREE_PATH_ATTR: &str = "tree_path";
const DETACHED_PREFIX: &str = "_tree_";

/// What to do with a stored field that cannot be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FieldErrorPolicy {
    /// Log a warning and leave the field out.
    #[default]
    Skip,
    /// Abort the load with the field's error.
    Fail,
}

/// Options for [`write_tree`].
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Location of the tree inside the file; missing groups are created.
    pub in_file_path: String,
    /// Replace the file instead of merging into its current contents.
    pub truncate_existing: bool,
    pub matlab_compatible: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            in_file_path: "/".to_string(),
            truncate_existing: false,
            matlab_compatible: false,
        }
    }
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_file_path(mut self, path: impl Into<String>) -> Self {
        self.in_file_path = path.into();
        self
    }

    pub fn truncate_existing(mut self, on: bool) -> Self {
        self.truncate_existing = on;
        self
    }

    pub fn matlab_compatible(mut self, on: bool) -> Self {
        self.matlab_compatible = on;
        self
    }
}

/// Options for [`read_tree`].
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Group to load; `/` loads the whole file.
    pub in_file_path: String,
    pub matlab_compatible: bool,
    pub policy: FieldErrorPolicy,
    /// Key policy of the loaded structs.
    pub key_policy: KeyPolicy,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            in_file_path: "/".to_string(),
            matlab_compatible: false,
            policy: FieldErrorPolicy::default(),
            key_policy: KeyPolicy::default(),
        }
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_file_path(mut self, path: impl Into<String>) -> Self {
        self.in_file_path = path.into();
        self
    }

    pub fn matlab_compatible(mut self, on: bool) -> Self {
        self.matlab_compatible = on;
        self
    }

    pub fn policy(mut self, policy: FieldErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn key_policy(mut self, policy: KeyPolicy) -> Self {
        self.key_policy = policy;
        self
    }
}

impl OrderedStruct {
    /// Save to an HDF5 file. See [`write_tree`].
    pub fn save_h5<P: AsRef<Path>>(&self, path: P, options: &WriteOptions) -> Result<()> {
        write_tree(self, path, options)
    }

    /// Save in MATLAB-compatible layout, whatever `options.matlab_compatible` says.
    pub fn save_mat<P: AsRef<Path>>(&self, path: P, options: &WriteOptions) -> Result<()> {
        write_tree(self, path, &options.clone().matlab_compatible(true))
    }

    /// Load from an HDF5 file. See [`read_tree`].
    pub fn load_h5<P: AsRef<Path>>(path: P, options: &ReadOptions) -> Result<Self> {
        read_tree(path, options)
    }

    /// Load a file saved in MATLAB-compatible layout.
    pub fn load_mat<P: AsRef<Path>>(path: P, options: &ReadOptions) -> Result<Self> {
        read_tree(path, &options.clone().matlab_compatible(true))
    }
}

/// Components of an in-file path; empty for the root.
fn target_components(in_file_path: &str) -> Vec<&str> {
    relative(in_file_path).split('/').filter(|c| !c.is_empty()).collect()
}

fn is_group(value: &Value) -> bool {
    matches!(value, Value::Struct(_) | Value::Map(_) | Value::List(_))
}

/// Merge `placed` into the struct found by following `components` from
/// `node`, creating missing structs on the way.
fn place(node: &mut OrderedStruct, node_path: &str, components: &[&str], placed: OrderedStruct) -> Result<()> {
    let Some((&first, rest)) = components.split_first() else {
        return node.merge(placed);
    };
    let child_path = join_path(node_path, first);
    if !node.contains_key(first) {
        node.set(first, OrderedStruct::with_policy(KeyPolicy::Permissive))?;
    }
    match node.get_mut(first).ok().and_then(Value::as_struct_mut) {
        Some(child) => place(child, &child_path, rest, placed),
        None => Err(Error::Type(format!("{child_path}: existing entry is not a group"))),
    }
}

/// Write `root` to `path` at `options.in_file_path`.
///
/// Lazy leaves are read before writing. Unless `truncate_existing` is set,
/// an existing file is loaded first and `root` is merged into it, so
/// existing entries that `root` does not name are kept. An existing entry
/// that cannot be loaded fails the write and leaves the file untouched.
pub fn write_tree<P: AsRef<Path>>(root: &OrderedStruct, path: P, options: &WriteOptions) -> Result<()> {
    let path = path.as_ref();
    let target = target_components(&options.in_file_path);
    let placed = root.materialize()?;

    let mut tree = if !options.truncate_existing && path.exists() {
        debug!(path = %path.display(), "merging into existing file");
        let read = ReadOptions::new()
            .matlab_compatible(options.matlab_compatible)
            .key_policy(KeyPolicy::Permissive)
            .policy(FieldErrorPolicy::Fail);
        read_tree(path, &read)?
    } else {
        OrderedStruct::with_policy(KeyPolicy::Permissive)
    };
    place(&mut tree, "/", &target, placed)?;

    let mut layout = Layout {
        builder: FileBuilder::new(),
        matlab: options.matlab_compatible,
        taken: tree.keys().map(str::to_string).collect(),
        next: 0,
    };
    let order: Vec<String> = tree.keys().map(str::to_string).collect();
    layout.builder.set_attr(VALUE_TYPE, AttrValue::String(STRUCT_VALUE.into()));
    layout.builder.set_attr(FIELD_ORDER_ATTR, AttrValue::StringArray(order));
    for (key, value) in tree.iter() {
        let key_path = join_path("/", key);
        if is_group(value) {
            layout.write_group(key, &key_path, value, false)?;
        } else {
            encode_dataset(layout.builder.create_dataset(key), &key_path, value, layout.matlab)?;
        }
    }
    layout.builder.write(path)?;
    debug!(path = %path.display(), fields = tree.len(), detached = layout.next, "wrote struct tree");
    Ok(())
}

/// A file being assembled.
///
/// Groups are only built one level below the root, so deeper groups are
/// stored as root groups with generated names and a `tree_path` attribute
/// holding their place in the tree.
struct Layout {
    builder: FileBuilder,
    matlab: bool,
    /// Root names in use.
    taken: HashSet<String>,
    next: usize,
}

impl Layout {
    fn fresh_name(&mut self) -> String {
        loop {
            let name = format!("{DETACHED_PREFIX}{}", self.next);
            self.next += 1;
            if self.taken.insert(name.clone()) {
                return name;
            }
        }
    }

    /// Store a struct, map or list under the root group `stored`.
    fn write_group(&mut self, stored: &str, tree_path: &str, value: &Value, detached: bool) -> Result<()> {
        let children: Vec<(String, &Value)> = match value {
            Value::Struct(s) => s.iter().map(|(k, v)| (k.to_string(), v)).collect(),
            Value::Map(m) => m.iter().map(|(k, v)| (k.clone(), v)).collect(),
            Value::List(items) => items.iter().enumerate().map(|(i, v)| (format!("_{i}"), v)).collect(),
            other => return Err(Error::Type(format!("{tree_path}: {} is not a group", other.type_name()))),
        };

        let mut g = self.builder.create_group(stored);
        if let Value::List(_) = value {
            g.set_attr(VALUE_TYPE, AttrValue::String(LIST_VALUE.into()));
            if self.matlab {
                g.set_attr(MATLAB_CLASS_ATTR, AttrValue::String("cell".into()));
            }
        } else {
            let names: Vec<String> = children.iter().map(|(k, _)| k.clone()).collect();
            g.set_attr(VALUE_TYPE, AttrValue::String(STRUCT_VALUE.into()));
            if self.matlab {
                g.set_attr(MATLAB_CLASS_ATTR, AttrValue::String("struct".into()));
                g.set_attr(MATLAB_FIELDS_ATTR, AttrValue::StringArray(names.clone()));
            }
            g.set_attr(FIELD_ORDER_ATTR, AttrValue::StringArray(names));
        }
        if detached {
            g.set_attr(TREE_PATH_ATTR, AttrValue::String(tree_path.to_string()));
        }

        let mut nested = Vec::new();
        for (key, child) in children {
            let child_path = join_path(tree_path, &key);
            if is_group(child) {
                nested.push((child_path, child));
            } else {
                encode_dataset(g.create_dataset(&key), &child_path, child, self.matlab)?;
            }
        }
        self.builder.add_group(g.finish());

        for (child_path, child) in nested {
            let name = self.fresh_name();
            self.write_group(&name, &child_path, child, true)?;
        }
        Ok(())
    }
}

fn encode_dataset(ds: &mut DatasetBuilder, path: &str, value: &Value, matlab: bool) -> Result<()> {
    match value {
        Value::Scalar(Scalar::Float(x)) => {
            ds.with_f64_data(&[*x]).with_shape(&[1]);
            tag(ds, SCALAR_VALUE, matlab.then_some("double"));
        }
        Value::Scalar(Scalar::Int(n)) => {
            ds.with_i64_data(&[*n]).with_shape(&[1]);
            tag(ds, SCALAR_VALUE, matlab.then_some("int64"));
        }
        Value::Text(text) => {
            let bytes = encode_text(text);
            ds.with_u8_data(&bytes).with_shape(&[bytes.len() as u64]);
            tag(ds, TEXT_VALUE, matlab.then_some("char"));
        }
        Value::Array(array) => encode_array(ds, path, array, matlab)?,
        Value::Leaf(leaf) => encode_array(ds, path, &*leaf.read()?, matlab)?,
        other => {
            return Err(Error::Type(format!("{path}: {} cannot be stored as a dataset", other.type_name())))
        }
    }
    Ok(())
}

fn tag(ds: &mut DatasetBuilder, value_type: &str, matlab_class: Option<&str>) {
    ds.set_attr(VALUE_TYPE, AttrValue::String(value_type.into()));
    if let Some(class) = matlab_class {
        ds.set_attr(MATLAB_CLASS_ATTR, AttrValue::String(class.into()));
    }
}

/// Element order and shape as stored: row-major, or column-major (reversed
/// axes) for MATLAB.
fn stored_layout<T: Clone>(a: &ArrayD<T>, matlab: bool) -> (Vec<u64>, Vec<T>) {
    let mut shape: Vec<u64> = a.shape().iter().map(|&n| n as u64).collect();
    if matlab {
        shape.reverse();
        (shape, a.t().iter().cloned().collect())
    } else {
        (shape, a.iter().cloned().collect())
    }
}

fn encode_array(ds: &mut DatasetBuilder, path: &str, array: &Array, matlab: bool) -> Result<()> {
    let value_type = if array.ndim() == 0 { ARRAY_0D_VALUE } else { ARRAY_VALUE };
    let (shape, class) = match array {
        Array::Float(a) => {
            let (shape, data) = stored_layout(a, matlab);
            ds.with_f64_data(&data);
            (shape, "double")
        }
        Array::Int(a) => {
            let (shape, data) = stored_layout(a, matlab);
            ds.with_i64_data(&data);
            (shape, "int64")
        }
        Array::Text(a) => {
            let (shape, items) = stored_layout(a, matlab);
            if items.iter().any(|s| s.contains('\0')) {
                return Err(Error::Type(format!("{path}: text array items cannot contain NUL")));
            }
            let mut bytes: Vec<u8> = items.iter().flat_map(|s| encode_text(s)).collect();
            if bytes.is_empty() {
                bytes.push(0);
            }
            let len = bytes.len() as u64;
            ds.with_u8_data(&bytes).with_shape(&[len]);
            let dims: Vec<i64> = shape.iter().map(|&n| n as i64).collect();
            ds.set_attr(SHAPE_ATTR, AttrValue::I64Array(dims));
            tag(ds, TEXT_ARRAY_VALUE, matlab.then_some("cell"));
            return Ok(());
        }
    };
    let shape = if shape.is_empty() { vec![1] } else { shape };
    ds.with_shape(&shape);
    tag(ds, value_type, matlab.then_some(class));
    Ok(())
}

/// Load the tree stored at `options.in_file_path` of `path`.
///
/// Fields that cannot be decoded are skipped with a warning, or abort the
/// load under [`FieldErrorPolicy::Fail`].
pub fn read_tree<P: AsRef<Path>>(path: P, options: &ReadOptions) -> Result<OrderedStruct> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let loader = TreeLoader {
        root: file.root(),
        detached: Detached::scan(&file.root())?,
        options,
    };
    let rel = relative(&options.in_file_path).trim_end_matches('/');
    let group_path = if rel.is_empty() { "/".to_string() } else { join_path("/", rel) };
    let group = if rel.is_empty() {
        file.root()
    } else if let Some(stored) = loader.detached.stored.get(&group_path) {
        loader.root.group(stored)?
    } else {
        file.group(rel)
            .map_err(|_| Error::NotFound(options.in_file_path.clone()))?
    };
    let tree = loader.read_struct(&group, &group_path)?;
    debug!(path = %path.display(), fields = tree.len(), "loaded struct tree");
    Ok(tree)
}

/// Root groups that carry a `tree_path` attribute.
#[derive(Default)]
struct Detached {
    /// Parent tree path to `(child name, stored group name)`.
    children: HashMap<String, Vec<(String, String)>>,
    /// Tree path to stored group name.
    stored: HashMap<String, String>,
    names: HashSet<String>,
}

impl Detached {
    fn scan(root: &Group<'_>) -> Result<Self> {
        let mut detached = Self::default();
        for name in root.groups()? {
            let attrs = root.group(&name)?.attrs()?;
            let Some(tree_path) = attrs::text(&attrs, TREE_PATH_ATTR) else {
                continue;
            };
            let Some((parent, child)) = tree_path.rsplit_once('/') else {
                continue;
            };
            let parent = if parent.is_empty() { "/" } else { parent };
            detached
                .children
                .entry(parent.to_string())
                .or_default()
                .push((child.to_string(), name.clone()));
            detached.names.insert(name.clone());
            detached.stored.insert(tree_path, name);
        }
        Ok(detached)
    }
}

enum Child {
    Dataset,
    Group,
    /// Stored flat under the root with this name.
    Detached(String),
}

struct TreeLoader<'f, 'o> {
    root: Group<'f>,
    detached: Detached,
    options: &'o ReadOptions,
}

impl TreeLoader<'_, '_> {
    /// Children of a group in stored key order, followed by any unlisted ones.
    fn ordered_children(
        &self,
        group: &Group<'_>,
        group_path: &str,
        attrs: &HashMap<String, AttrValue>,
    ) -> Result<Vec<(String, Child)>> {
        let mut all: Vec<(String, Child)> = Vec::new();
        for name in group.groups()? {
            if group_path == "/" && self.detached.names.contains(&name) {
                continue;
            }
            all.push((name, Child::Group));
        }
        all.extend(group.datasets()?.into_iter().map(|d| (d, Child::Dataset)));
        if let Some(extra) = self.detached.children.get(group_path) {
            all.extend(
                extra
                    .iter()
                    .map(|(child, stored)| (child.clone(), Child::Detached(stored.clone()))),
            );
        }
        if let Some(order) = string_list(attrs, FIELD_ORDER_ATTR) {
            let mut ordered = Vec::with_capacity(all.len());
            for name in order {
                if let Some(pos) = all.iter().position(|(n, _)| *n == name) {
                    ordered.push(all.remove(pos));
                }
            }
            ordered.append(&mut all);
            all = ordered;
        }
        Ok(all)
    }

    fn read_struct(&self, group: &Group<'_>, group_path: &str) -> Result<OrderedStruct> {
        let attrs = group.attrs()?;
        let mut node = OrderedStruct::with_policy(self.options.key_policy);
        for (name, child) in self.ordered_children(group, group_path, &attrs)? {
            let child_path = join_path(group_path, &name);
            let outcome = self
                .read_child(group, &name, &child, &child_path)
                .and_then(|value| node.set(name.as_str(), value));
            if let Err(e) = outcome {
                match self.options.policy {
                    FieldErrorPolicy::Skip => warn!(field = %child_path, error = %e, "skipping field"),
                    FieldErrorPolicy::Fail => return Err(e),
                }
            }
        }
        Ok(node)
    }

    fn read_child(&self, parent: &Group<'_>, name: &str, child: &Child, path: &str) -> Result<Value> {
        match child {
            Child::Dataset => {
                let ds = parent.dataset(name)?;
                read_dataset_value(&ds, path, self.options.matlab_compatible)
            }
            Child::Group => self.read_group_value(&parent.group(name)?, path),
            Child::Detached(stored) => self.read_group_value(&self.root.group(stored)?, path),
        }
    }

    fn read_group_value(&self, group: &Group<'_>, path: &str) -> Result<Value> {
        let attrs = group.attrs()?;
        if attrs::text(&attrs, VALUE_TYPE).as_deref() != Some(LIST_VALUE) {
            return Ok(Value::Struct(self.read_struct(group, path)?));
        }
        let mut entries: Vec<(usize, String, Child)> = self
            .ordered_children(group, path, &attrs)?
            .into_iter()
            .filter_map(|(name, child)| {
                let index = name.strip_prefix('_')?.parse().ok()?;
                Some((index, name, child))
            })
            .collect();
        entries.sort_by_key(|(index, _, _)| *index);
        let mut items = Vec::with_capacity(entries.len());
        for (_, name, child) in entries {
            items.push(self.read_child(group, &name, &child, &join_path(path, &name))?);
        }
        Ok(Value::List(items))
    }
}

fn read_dataset_value(ds: &Dataset<'_>, path: &str, matlab: bool) -> Result<Value> {
    let attrs = ds.attrs()?;
    let value_type = attrs::text(&attrs, VALUE_TYPE);
    if value_type.as_deref() == Some(TEXT_ARRAY_VALUE) {
        return read_text_array(ds, &attrs, path, matlab);
    }

    let array = read_dataset(ds, path)?;
    match value_type.as_deref() {
        Some(TEXT_VALUE) => match array {
            Array::Text(a) => Ok(Value::Text(a.iter().next().cloned().unwrap_or_default())),
            other => Err(Error::Type(format!("{path}: text stored as {}", other.type_name()))),
        },
        Some(SCALAR_VALUE) => single(array, path).map(Value::Scalar),
        Some(ARRAY_0D_VALUE) => Ok(Value::Array(into_0d(array, path)?)),
        _ if array.ndim() == 0 => single(array, path).map(Value::Scalar),
        _ if matlab => Ok(Value::Array(array.transpose())),
        _ => Ok(Value::Array(array)),
    }
}

fn single(array: Array, path: &str) -> Result<Scalar> {
    let bad = || Error::Type(format!("{path}: expected a single number"));
    if array.len() != 1 {
        return Err(bad());
    }
    match array {
        Array::Float(a) => a.iter().next().map(|&x| Scalar::Float(x)).ok_or_else(bad),
        Array::Int(a) => a.iter().next().map(|&n| Scalar::Int(n)).ok_or_else(bad),
        Array::Text(_) => Err(bad()),
    }
}

fn into_0d(array: Array, path: &str) -> Result<Array> {
    Ok(match single(array, path)? {
        Scalar::Float(x) => Array::Float(ArrayD::from_elem(IxDyn(&[]), x)),
        Scalar::Int(n) => Array::Int(ArrayD::from_elem(IxDyn(&[]), n)),
    })
}

fn read_text_array(ds: &Dataset<'_>, attrs: &HashMap<String, AttrValue>, path: &str, matlab: bool) -> Result<Value> {
    let bytes: Vec<u8> = ds.read_i64()?.into_iter().map(|b| b as u8).collect();
    let shape: Vec<usize> = attrs::int_list(attrs, SHAPE_ATTR)
        .unwrap_or_default()
        .into_iter()
        .map(|n| usize::try_from(n).map_err(|_| Error::Type(format!("{path}: negative extent in shape"))))
        .collect::<Result<_>>()?;
    let expected: usize = shape.iter().product();
    let mut items = Vec::with_capacity(expected);
    if expected > 0 {
        for chunk in bytes.split_inclusive(|&b| b == 0) {
            let item = attrs::decode_text(chunk.to_vec())
                .map_err(|e| Error::Type(format!("{path}: stored text is not UTF-8: {e}")))?;
            items.push(item);
        }
    }
    if items.len() != expected {
        return Err(Error::Type(format!(
            "{path}: {} text items do not fill shape {shape:?}",
            items.len()
        )));
    }
    let stored = Array::from_strings(&shape, items)?;
    Ok(Value::Array(if matlab { stored.transpose() } else { stored }))
}
