//! Deferred loading of on-disk array leaves.
//!
//! A [`LazyLeaf`] reads its metadata when it is created and its payload when
//! it is first read, unless the leaf is small enough to load up front. Loaded
//! payloads live in the leaf's slot of a [`LeafCache`] and may be evicted at
//! any time; the next read fetches them again.
//!
//! Leaves keep only a weak reference to the file they came from. When that
//! file handle has been dropped or closed, the file is reopened through its
//! [`FileKind`] on the next read. Because of this `Rc`-based sharing a leaf
//! is not `Send`.

use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use ndarray::SliceInfoElem;
use tracing::{debug, warn};

use crate::array::{squeezed_shape, Array, ElementType};
use crate::attrs::attrs_to_struct;
use crate::cache::{LeafCache, LeafId};
use crate::error::Result;
use crate::source::{join_path, FileKind, SourceFile};
use crate::structure::OrderedStruct;

/// Default element count at or below which leaves load at construction.
pub const DEFAULT_LAZY_MIN_SIZE: usize = 100;
/// Default element count above which payloads are never kept.
pub const DEFAULT_LAZY_MAX_SIZE: usize = 100_000_000;

/// Loading thresholds and post-read transforms for lazy leaves.
#[derive(Debug, Clone)]
pub struct LeafOptions {
    /// Leaves with at most this many elements are read at construction.
    pub lazy_min_size: usize,
    /// Leaves with more elements are read on every access and never kept.
    pub lazy_max_size: usize,
    /// Drop axes of length 1.
    pub squeeze: bool,
    /// Reverse axis order, applied after `squeeze`.
    pub transpose: bool,
    /// Cache holding the payloads; the global cache when `None`.
    pub cache: Option<LeafCache>,
}

impl Default for LeafOptions {
    fn default() -> Self {
        Self {
            lazy_min_size: DEFAULT_LAZY_MIN_SIZE,
            lazy_max_size: DEFAULT_LAZY_MAX_SIZE,
            squeeze: false,
            transpose: false,
            cache: None,
        }
    }
}

impl LeafOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lazy_min_size(mut self, n: usize) -> Self {
        self.lazy_min_size = n;
        self
    }

    pub fn lazy_max_size(mut self, n: usize) -> Self {
        self.lazy_max_size = n;
        self
    }

    pub fn squeeze(mut self, on: bool) -> Self {
        self.squeeze = on;
        self
    }

    pub fn transpose(mut self, on: bool) -> Self {
        self.transpose = on;
        self
    }

    pub fn cache(mut self, cache: LeafCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub(crate) fn resolve_cache(&self) -> LeafCache {
        self.cache.clone().unwrap_or_else(LeafCache::global)
    }
}

/// One on-disk array leaf with a deferred payload.
pub struct LazyLeaf {
    id: LeafId,
    cache: LeafCache,
    file_path: PathBuf,
    path: String,
    kind: FileKind,
    handle: RefCell<Weak<dyn SourceFile>>,
    shape: Vec<usize>,
    element_type: ElementType,
    dimensions: Option<Vec<String>>,
    units: Option<String>,
    title: Option<String>,
    attrs: Option<OrderedStruct>,
    lazy_max_size: usize,
    squeeze: bool,
    transpose: bool,
}

impl LazyLeaf {
    /// Describe the leaf `name` of `group` in `source`.
    ///
    /// Leaves of at most `lazy_min_size` elements are read right away. A
    /// failed early read is logged and the leaf stays unmaterialized; the
    /// error resurfaces on [`read`](Self::read).
    pub fn new(source: &Rc<dyn SourceFile>, group: &str, name: &str, options: &LeafOptions) -> Result<Self> {
        let path = join_path(group, name);
        let info = source.leaf_info(&path)?;

        let mut shape = info.shape.clone();
        let mut dimensions = info.dimensions.clone();
        if options.squeeze {
            if let Some(dims) = dimensions.as_mut() {
                let mut extents = info.shape.iter();
                dims.retain(|_| extents.next().is_some_and(|&n| n != 1));
            }
            shape = squeezed_shape(&info.shape);
        }
        if options.transpose {
            shape.reverse();
            if let Some(dims) = dimensions.as_mut() {
                dims.reverse();
            }
        }
        let attrs = if info.attrs.is_empty() {
            None
        } else {
            Some(attrs_to_struct(&info.attrs)?)
        };

        let cache = options.resolve_cache();
        let leaf = Self {
            id: cache.allocate(),
            cache,
            file_path: source.path().to_path_buf(),
            path,
            kind: source.kind(),
            handle: RefCell::new(Rc::downgrade(source)),
            shape,
            element_type: info.element_type,
            dimensions,
            units: info.units,
            title: info.title,
            attrs,
            lazy_max_size: options.lazy_max_size,
            squeeze: options.squeeze,
            transpose: options.transpose,
        };

        if leaf.size() <= options.lazy_min_size {
            debug!(leaf = %leaf.path, size = leaf.size(), "loading small leaf eagerly");
            if let Err(e) = leaf.load(source) {
                warn!(leaf = %leaf.path, error = %e, "eager load failed, deferring to first read");
            }
        }
        Ok(leaf)
    }

    /// The full payload, read from disk unless it is cached.
    pub fn read(&self) -> Result<Arc<Array>> {
        if let Some(payload) = self.cache.payload(self.id) {
            return Ok(payload);
        }
        let source = self.live_source()?;
        self.load(&source)
    }

    /// A selection over the leading axes of the payload.
    pub fn read_slice(&self, selection: &[SliceInfoElem]) -> Result<Array> {
        self.read()?.select(selection)
    }

    fn load(&self, source: &Rc<dyn SourceFile>) -> Result<Arc<Array>> {
        let mut data = source.read_leaf(&self.path)?;
        if self.squeeze {
            data = data.squeeze();
        }
        if self.transpose {
            data = data.transpose();
        }
        let payload = Arc::new(data);
        if self.size() <= self.lazy_max_size {
            self.cache.store(self.id, Arc::clone(&payload));
        }
        Ok(payload)
    }

    /// A usable handle to the source file, reopening it if needed.
    fn live_source(&self) -> Result<Rc<dyn SourceFile>> {
        if let Some(source) = self.handle.borrow().upgrade() {
            if source.is_open() {
                return Ok(source);
            }
        }
        debug!(file = %self.file_path.display(), leaf = %self.path, "reopening source file");
        let source = self.kind.open(&self.file_path)?;
        *self.handle.borrow_mut() = Rc::downgrade(&source);
        Ok(source)
    }

    /// Drop the payload; the next read goes back to disk.
    pub fn evict(&self) {
        self.cache.evict(self.id);
    }

    /// Returns `true` if a payload is currently held.
    pub fn is_materialized(&self) -> bool {
        self.cache.payload(self.id).is_some()
    }

    /// Returns `true` if the payload is held and counted by the cache.
    pub fn is_cached(&self) -> bool {
        self.cache.is_tracked(self.id)
    }

    /// Shape after squeeze and transpose.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn element_type(&self) -> &ElementType {
        &self.element_type
    }

    pub fn dimensions(&self) -> Option<&[String]> {
        self.dimensions.as_deref()
    }

    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// File attributes of the leaf, if it has any.
    pub fn attrs(&self) -> Option<&OrderedStruct> {
        self.attrs.as_ref()
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Absolute in-file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn id(&self) -> LeafId {
        self.id
    }

    /// Returns `true` if both leaves describe the same on-disk object.
    pub fn same_source(&self, other: &LazyLeaf) -> bool {
        self.file_path == other.file_path && self.path == other.path
    }
}

impl Drop for LazyLeaf {
    fn drop(&mut self) {
        self.cache.release(self.id);
    }
}

impl fmt::Debug for LazyLeaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyLeaf")
            .field("file", &self.file_path)
            .field("path", &self.path)
            .field("shape", &self.shape)
            .field("element_type", &self.element_type)
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashMap;

    use crate::browse::{browse_handle, BrowseOptions};
    use crate::error::Error;
    use crate::source::LeafInfo;

    /// In-memory source with one `/data` leaf of shape (1, 2, 3).
    struct ToySource {
        reads: Cell<usize>,
        broken: bool,
    }

    impl SourceFile for ToySource {
        fn path(&self) -> &Path {
            Path::new("toy.h5")
        }

        fn kind(&self) -> FileKind {
            FileKind::Hdf5
        }

        fn group_names(&self, _group: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn leaf_names(&self, _group: &str) -> Result<Vec<String>> {
            Ok(vec!["data".to_string()])
        }

        fn leaf_info(&self, _leaf: &str) -> Result<LeafInfo> {
            Ok(LeafInfo {
                element_type: ElementType::F64,
                shape: vec![1, 2, 3],
                dimensions: Some(vec!["t".into(), "y".into(), "x".into()]),
                units: Some("m".into()),
                title: None,
                attrs: HashMap::new(),
            })
        }

        fn read_leaf(&self, _leaf: &str) -> Result<Array> {
            self.reads.set(self.reads.get() + 1);
            if self.broken {
                return Err(Error::Type("/data: unsupported element type".into()));
            }
            Array::from_f64(&[1, 2, 3], (0..6).map(f64::from).collect())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    fn toy() -> (Rc<ToySource>, Rc<dyn SourceFile>) {
        toy_source(false)
    }

    fn toy_source(broken: bool) -> (Rc<ToySource>, Rc<dyn SourceFile>) {
        let concrete = Rc::new(ToySource {
            reads: Cell::new(0),
            broken,
        });
        let handle: Rc<dyn SourceFile> = concrete.clone();
        (concrete, handle)
    }

    fn lazy(cache: &LeafCache) -> LeafOptions {
        LeafOptions::new().lazy_min_size(0).cache(cache.clone())
    }

    #[test]
    fn metadata_transforms() {
        let cache = LeafCache::new(1000);
        let (_, src) = toy();

        let plain = LazyLeaf::new(&src, "/", "data", &lazy(&cache)).unwrap();
        assert_eq!(plain.shape(), &[1, 2, 3]);

        let squeezed = LazyLeaf::new(&src, "/", "data", &lazy(&cache).squeeze(true)).unwrap();
        assert_eq!(squeezed.shape(), &[2, 3]);
        assert_eq!(squeezed.dimensions().unwrap(), ["y", "x"]);

        let transposed = LazyLeaf::new(&src, "/", "data", &lazy(&cache).transpose(true)).unwrap();
        assert_eq!(transposed.shape(), &[3, 2, 1]);
        assert_eq!(transposed.dimensions().unwrap(), ["x", "y", "t"]);

        let both = LazyLeaf::new(&src, "/", "data", &lazy(&cache).squeeze(true).transpose(true)).unwrap();
        assert_eq!(both.shape(), &[3, 2]);
        assert_eq!(both.read().unwrap().shape(), &[3, 2]);
    }

    #[test]
    fn payload_is_read_once_while_cached() {
        let cache = LeafCache::new(1000);
        let (concrete, src) = toy();
        let leaf = LazyLeaf::new(&src, "/", "data", &lazy(&cache)).unwrap();
        assert!(!leaf.is_materialized());
        leaf.read().unwrap();
        leaf.read().unwrap();
        assert_eq!(concrete.reads.get(), 1);
        assert!(leaf.is_cached());

        leaf.evict();
        assert!(!leaf.is_materialized());
        leaf.read().unwrap();
        assert_eq!(concrete.reads.get(), 2);
    }

    #[test]
    fn small_leaf_loads_eagerly() {
        let cache = LeafCache::new(1000);
        let (concrete, src) = toy();
        let leaf = LazyLeaf::new(&src, "/", "data", &LeafOptions::new().cache(cache.clone())).unwrap();
        assert!(leaf.is_materialized());
        assert_eq!(concrete.reads.get(), 1);
        assert_eq!(cache.cached_elements(), 6);
    }

    #[test]
    fn failed_eager_load_defers_the_error() {
        let cache = LeafCache::new(1000);
        let (concrete, src) = toy_source(true);
        let leaf = LazyLeaf::new(&src, "/", "data", &LeafOptions::new().cache(cache.clone())).unwrap();
        assert_eq!(concrete.reads.get(), 1);
        assert!(!leaf.is_materialized());
        assert_eq!(leaf.shape(), &[1, 2, 3]);
        assert!(matches!(leaf.read(), Err(Error::Type(_))));
        assert_eq!(cache.cached_elements(), 0);
    }

    #[test]
    fn browse_survives_an_unreadable_small_leaf() {
        let (_, src) = toy_source(true);
        let options = BrowseOptions::new().cache(LeafCache::new(1000));
        let tree = browse_handle(&src, &options).unwrap();
        let leaf = tree.get("data").unwrap().as_leaf().unwrap();
        assert!(!leaf.is_materialized());
        assert!(leaf.read().is_err());
    }

    #[test]
    fn oversized_leaf_is_never_kept() {
        let cache = LeafCache::new(1000);
        let (concrete, src) = toy();
        let leaf = LazyLeaf::new(&src, "/", "data", &lazy(&cache).lazy_max_size(5)).unwrap();
        leaf.read().unwrap();
        leaf.read().unwrap();
        assert!(!leaf.is_materialized());
        assert_eq!(concrete.reads.get(), 2);
    }

    #[test]
    fn drop_releases_cache_contribution() {
        let cache = LeafCache::new(1000);
        let (_, src) = toy();
        let leaf = LazyLeaf::new(&src, "/", "data", &lazy(&cache)).unwrap();
        leaf.read().unwrap();
        assert_eq!(cache.cached_elements(), 6);
        drop(leaf);
        assert_eq!(cache.cached_elements(), 0);
    }

    #[test]
    fn slices_of_the_payload() {
        let cache = LeafCache::new(1000);
        let (_, src) = toy();
        let leaf = LazyLeaf::new(&src, "/", "data", &lazy(&cache).squeeze(true)).unwrap();
        let row = leaf.read_slice(&[SliceInfoElem::Index(1)]).unwrap();
        assert_eq!(row.to_f64_vec().unwrap(), vec![3.0, 4.0, 5.0]);
        assert!(leaf.read_slice(&[SliceInfoElem::Index(5)]).is_err());
    }
}
