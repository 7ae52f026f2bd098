//! Read-side capability interface over hierarchical array files.
//!
//! Tree walking and lazy leaves only need a handful of operations from a
//! file: list child groups, list child leaves, describe a leaf, read a leaf,
//! and tell whether the handle is still usable. [`SourceFile`] captures
//! exactly that, with one implementation per backing format.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use rustyhdf5::AttrValue;

use crate::array::{Array, ElementType};
use crate::error::{Error, Result};

pub mod hdf5;
#[cfg(feature = "netcdf4")]
pub mod netcdf;

pub use self::hdf5::Hdf5Source;
#[cfg(feature = "netcdf4")]
pub use self::netcdf::NetCdfSource;

/// Format of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Hdf5,
    NetCdf4,
}

impl FileKind {
    /// Pick the format from the file extension.
    ///
    /// `.h5`, `.hdf5` and `.he5` are HDF5; `.nc` and `.cdf` are NetCDF-4.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("h5" | "hdf5" | "he5") => Ok(FileKind::Hdf5),
            Some("nc" | "cdf") => Ok(FileKind::NetCdf4),
            _ => Err(Error::UnknownExtension(path.display().to_string())),
        }
    }

    /// Open `path` with the reader for this format.
    pub fn open(self, path: &Path) -> Result<Rc<dyn SourceFile>> {
        match self {
            FileKind::Hdf5 => Ok(Rc::new(Hdf5Source::open(path)?)),
            #[cfg(feature = "netcdf4")]
            FileKind::NetCdf4 => Ok(Rc::new(NetCdfSource::open(path)?)),
            #[cfg(not(feature = "netcdf4"))]
            FileKind::NetCdf4 => Err(Error::Unsupported(format!(
                "{}: NetCDF-4 support is disabled",
                path.display()
            ))),
        }
    }
}

/// Metadata of one leaf, read without touching its payload.
#[derive(Debug, Clone)]
pub struct LeafInfo {
    pub element_type: ElementType,
    /// On-disk shape.
    pub shape: Vec<usize>,
    /// Dimension names, one per axis, when the format records them.
    pub dimensions: Option<Vec<String>>,
    pub units: Option<String>,
    pub title: Option<String>,
    pub attrs: HashMap<String, AttrValue>,
}

impl LeafInfo {
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Operations a hierarchical file must offer to be browsed lazily.
///
/// Paths are absolute in-file paths such as `/` or `/grp/leaf`.
pub trait SourceFile {
    /// Location of the file on disk.
    fn path(&self) -> &Path;

    fn kind(&self) -> FileKind;

    /// Names of the child groups of `group`.
    fn group_names(&self, group: &str) -> Result<Vec<String>>;

    /// Names of the child leaves of `group`.
    fn leaf_names(&self, group: &str) -> Result<Vec<String>>;

    fn leaf_info(&self, leaf: &str) -> Result<LeafInfo>;

    /// Read the full payload of `leaf` in its on-disk shape.
    fn read_leaf(&self, leaf: &str) -> Result<Array>;

    /// Returns `false` once the handle can no longer serve reads.
    fn is_open(&self) -> bool;
}

/// Join a group path and a child name into an absolute in-file path.
pub fn join_path(group: &str, name: &str) -> String {
    let group = group.trim_end_matches('/');
    if group.is_empty() {
        format!("/{name}")
    } else {
        format!("{group}/{name}")
    }
}

/// In-file path without the leading `/`, as the readers expect it.
pub(crate) fn relative(path: &str) -> &str {
    path.trim_start_matches('/')
}

pub(crate) fn u64_shape(shape: &[u64]) -> Vec<usize> {
    shape.iter().map(|&n| n as usize).collect()
}

/// Absolute form of `path`, or `path` itself if it cannot be resolved.
pub(crate) fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_extension() {
        assert_eq!(FileKind::from_path(Path::new("a.h5")).unwrap(), FileKind::Hdf5);
        assert_eq!(FileKind::from_path(Path::new("a.HDF5")).unwrap(), FileKind::Hdf5);
        assert_eq!(FileKind::from_path(Path::new("a.he5")).unwrap(), FileKind::Hdf5);
        assert_eq!(FileKind::from_path(Path::new("a.nc")).unwrap(), FileKind::NetCdf4);
        assert_eq!(FileKind::from_path(Path::new("a.cdf")).unwrap(), FileKind::NetCdf4);
        assert!(matches!(
            FileKind::from_path(Path::new("a.txt")),
            Err(Error::UnknownExtension(_))
        ));
        assert!(FileKind::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn join_paths() {
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("", "a"), "/a");
        assert_eq!(join_path("/g", "a"), "/g/a");
        assert_eq!(join_path("/g/", "a"), "/g/a");
        assert_eq!(relative("/g/a"), "g/a");
    }
}
