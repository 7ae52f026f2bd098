//! Error types for struct containers, lazy leaves and file adapters.

use std::fmt;

use crate::diff::DiffError;
use crate::key::KeyError;

/// Errors that can occur when building, reading or writing structs.
#[derive(Debug)]
pub enum Error {
    /// I/O error from the filesystem.
    Io(std::io::Error),
    /// Error reported by the HDF5 reader or writer.
    Hdf5(rustyhdf5::Error),
    /// Error reported by the NetCDF-4 reader.
    #[cfg(feature = "netcdf4")]
    NetCdf(rustyhdf5_netcdf4::Error),
    /// A key was rejected by the struct's key policy.
    Key(KeyError),
    /// A key, group or leaf does not exist.
    NotFound(String),
    /// The source file handle was closed.
    Closed(String),
    /// The file extension does not select a known source format.
    UnknownExtension(String),
    /// A value or element type cannot be handled at this location.
    Type(String),
    /// An index or slice selection is out of range for a leaf.
    Selection(String),
    /// The operation is not supported by the underlying writer.
    Unsupported(String),
    /// A struct comparison failed.
    Diff(DiffError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Hdf5(e) => write!(f, "HDF5 error: {e}"),
            #[cfg(feature = "netcdf4")]
            Error::NetCdf(e) => write!(f, "NetCDF-4 error: {e}"),
            Error::Key(e) => write!(f, "{e}"),
            Error::NotFound(key) => write!(f, "not found: {key}"),
            Error::Closed(path) => write!(f, "file handle closed: {path}"),
            Error::UnknownExtension(path) => write!(f, "unknown file extension: {path}"),
            Error::Type(msg) => write!(f, "type error: {msg}"),
            Error::Selection(msg) => write!(f, "invalid selection: {msg}"),
            Error::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            Error::Diff(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Hdf5(e) => Some(e),
            #[cfg(feature = "netcdf4")]
            Error::NetCdf(e) => Some(e),
            Error::Key(e) => Some(e),
            Error::Diff(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<rustyhdf5::Error> for Error {
    fn from(e: rustyhdf5::Error) -> Self {
        Error::Hdf5(e)
    }
}

#[cfg(feature = "netcdf4")]
impl From<rustyhdf5_netcdf4::Error> for Error {
    fn from(e: rustyhdf5_netcdf4::Error) -> Self {
        Error::NetCdf(e)
    }
}

impl From<KeyError> for Error {
    fn from(e: KeyError) -> Self {
        Error::Key(e)
    }
}

impl From<DiffError> for Error {
    fn from(e: DiffError) -> Self {
        Error::Diff(e)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
