//! Build struct trees over HDF5 and NetCDF-4 files.
//!
//! Browsing walks every group of a file and produces an [`OrderedStruct`]
//! whose groups are nested structs and whose leaves are [`LazyLeaf`] values.
//! Only metadata (and leaves small enough for eager loading) is read.
//!
//! # Example
//!
//! ```no_run
//! use rustyhdf5_struct::{browse, BrowseOptions};
//!
//! let tree = browse("data.h5", &BrowseOptions::new().squeeze(true)).unwrap();
//! for (name, value) in tree.iter() {
//!     println!("{name}: {value}");
//! }
//! ```

use std::path::Path;
use std::rc::Rc;

use tracing::debug;

use crate::cache::LeafCache;
use crate::error::{Error, Result};
use crate::key::{validate_key, KeyPolicy};
use crate::leaf::{LazyLeaf, LeafOptions};
use crate::source::{join_path, FileKind, SourceFile};
use crate::structure::OrderedStruct;
use crate::value::Value;

/// Hidden attribute holding the source file path of a browsed tree.
pub const SOURCE_FILE_ATTR: &str = "source_file";
/// Hidden attribute holding the in-file path of a browsed group.
pub const SOURCE_PATH_ATTR: &str = "source_path";

/// Options for [`browse`] and [`browse_handle`].
#[derive(Debug, Clone, Default)]
pub struct BrowseOptions {
    pub leaf: LeafOptions,
    /// Force a file format instead of sniffing the extension.
    pub kind: Option<FileKind>,
    /// Key policy of the produced structs.
    pub policy: KeyPolicy,
}

impl BrowseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lazy_min_size(mut self, n: usize) -> Self {
        self.leaf.lazy_min_size = n;
        self
    }

    pub fn lazy_max_size(mut self, n: usize) -> Self {
        self.leaf.lazy_max_size = n;
        self
    }

    pub fn squeeze(mut self, on: bool) -> Self {
        self.leaf.squeeze = on;
        self
    }

    pub fn transpose(mut self, on: bool) -> Self {
        self.leaf.transpose = on;
        self
    }

    pub fn cache(mut self, cache: LeafCache) -> Self {
        self.leaf.cache = Some(cache);
        self
    }

    pub fn kind(mut self, kind: FileKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn policy(mut self, policy: KeyPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Open `path` and build its struct tree.
///
/// The file handle is released before returning; leaves reopen the file
/// when they need their payload.
pub fn browse<P: AsRef<Path>>(path: P, options: &BrowseOptions) -> Result<OrderedStruct> {
    let path = path.as_ref();
    let kind = match options.kind {
        Some(kind) => kind,
        None => FileKind::from_path(path)?,
    };
    let source = kind.open(path)?;
    browse_handle(&source, options)
}

/// Build the struct tree of an already open file.
///
/// Leaves keep a weak reference to `source`, so they read through it for
/// as long as the caller keeps it alive.
pub fn browse_handle(source: &Rc<dyn SourceFile>, options: &BrowseOptions) -> Result<OrderedStruct> {
    debug!(file = %source.path().display(), kind = ?source.kind(), "browsing file");
    let mut root = walk(source, "/", options)?;
    root.set_hidden(SOURCE_FILE_ATTR, source.path().display().to_string());
    Ok(root)
}

fn walk(source: &Rc<dyn SourceFile>, group: &str, options: &BrowseOptions) -> Result<OrderedStruct> {
    let mut node = OrderedStruct::with_policy(options.policy);
    node.set_hidden(SOURCE_PATH_ATTR, group);

    for name in source.group_names(group)? {
        let child = walk(source, &join_path(group, &name), options)?;
        insert_child(&mut node, &name, Value::Struct(child))?;
    }
    for name in source.leaf_names(group)? {
        let leaf = LazyLeaf::new(source, group, &name, &options.leaf)?;
        insert_child(&mut node, &name, Value::Leaf(leaf))?;
    }
    Ok(node)
}

/// Insert under `name`, or under `name_` if `name` is rejected or taken.
///
/// A suffixed name that is also rejected or taken is an error.
fn insert_child(node: &mut OrderedStruct, name: &str, value: Value) -> Result<()> {
    let key = if !node.contains_key(name) && validate_key(name, node.policy()).is_ok() {
        name.to_string()
    } else {
        debug!(name, "renaming child to avoid a key collision");
        format!("{name}_")
    };
    if node.contains_key(&key) {
        return Err(Error::Unsupported(format!("{name}: name collides with {key}")));
    }
    node.set(key, value)
}
