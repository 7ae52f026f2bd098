//! Ordered, attribute-accessible structs for hierarchical numerical data.
//!
//! An [`OrderedStruct`] is a string-keyed container that keeps insertion
//! order and nests freely. Trees can be:
//!
//! - built from HDF5 or NetCDF-4 files with [`browse`], where every dataset
//!   becomes a [`LazyLeaf`] read on first access and cached in a bounded
//!   [`LeafCache`]
//! - compared numerically with [`OrderedStruct::diff`]
//! - saved to and loaded from HDF5 with [`write_tree`] and [`read_tree`],
//!   optionally in a MATLAB-compatible layout
//!
//! # Example
//!
//! ```no_run
//! use rustyhdf5_struct::{DiffOptions, OrderedStruct, ReadOptions, Value, WriteOptions};
//!
//! let mut s = OrderedStruct::new();
//! s.set("temperature", vec![280.0, 281.5, 283.0]).unwrap();
//! s.set("station", "north").unwrap();
//! s.save_h5("run.h5", &WriteOptions::new().truncate_existing(true)).unwrap();
//!
//! let back = OrderedStruct::load_h5("run.h5", &ReadOptions::new()).unwrap();
//! let d = s.diff(&back, &DiffOptions::default()).unwrap();
//! assert_eq!(d.get("diff_norm").unwrap(), &Value::from(0.0));
//! ```

pub mod array;
pub mod attrs;
pub mod browse;
pub mod cache;
pub mod diff;
pub mod error;
pub mod key;
pub mod leaf;
pub mod source;
pub mod storage;
pub mod structure;
pub mod value;

pub use array::{Array, ElementType};
pub use browse::{browse, browse_handle, BrowseOptions};
pub use cache::{LeafCache, LeafId, DEFAULT_CACHE_ELEMENTS};
pub use diff::{frobenius_norm, DiffError, DiffOptions, Mapping, NormFn};
pub use error::{Error, Result};
pub use key::{validate_key, KeyError, KeyPolicy, KeyRule};
pub use leaf::{LazyLeaf, LeafOptions};
pub use source::{FileKind, LeafInfo, SourceFile};
pub use storage::{read_tree, write_tree, FieldErrorPolicy, ReadOptions, WriteOptions};
pub use structure::OrderedStruct;
pub use value::{Scalar, Value};
