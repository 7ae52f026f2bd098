//! NetCDF-4 source backed by `rustyhdf5_netcdf4::NetCDF4File`.
//!
//! Variables are leaves and NetCDF groups are groups. Dimension names and CF
//! attributes come from the NetCDF layer; packed variables (those carrying
//! `scale_factor` or `add_offset`) are unpacked to `f64` on read.

use std::cell::Cell;
use std::path::{Path, PathBuf};

use rustyhdf5_netcdf4::{NcType, NetCDF4File, NetCDF4Group, Variable};
use tracing::debug;

use super::hdf5::read_dataset;
use super::{canonical, relative, u64_shape, FileKind, LeafInfo, SourceFile};
use crate::array::{Array, ElementType};
use crate::error::{Error, Result};

fn element_type(nc: NcType) -> ElementType {
    match nc {
        NcType::Byte => ElementType::I8,
        NcType::UByte => ElementType::U8,
        NcType::Short => ElementType::I16,
        NcType::UShort => ElementType::U16,
        NcType::Int => ElementType::I32,
        NcType::UInt => ElementType::U32,
        NcType::Int64 => ElementType::I64,
        NcType::UInt64 => ElementType::U64,
        NcType::Float => ElementType::F32,
        NcType::Double => ElementType::F64,
        NcType::String | NcType::Char => ElementType::Text,
    }
}

/// An open NetCDF-4 file.
pub struct NetCdfSource {
    path: PathBuf,
    file: NetCDF4File,
    open: Cell<bool>,
}

impl NetCdfSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = canonical(path.as_ref());
        let file = NetCDF4File::open(&path)?;
        debug!(path = %path.display(), "opened NetCDF-4 source");
        Ok(Self {
            path,
            file,
            open: Cell::new(true),
        })
    }

    /// Mark the handle as closed; later reads fail and leaves reopen the file.
    pub fn close(&self) {
        self.open.set(false);
    }

    fn check_open(&self) -> Result<()> {
        if self.open.get() {
            Ok(())
        } else {
            Err(Error::Closed(self.path.display().to_string()))
        }
    }

    /// Resolve a non-root group path.
    fn nc_group(&self, path: &str) -> Result<NetCDF4Group<'_>> {
        let not_found = || Error::NotFound(path.to_string());
        let mut parts = relative(path).split('/').filter(|p| !p.is_empty());
        let first = parts.next().ok_or_else(not_found)?;
        let mut group = self.file.group(first).map_err(|_| not_found())?;
        for part in parts {
            group = group.group(part).map_err(|_| not_found())?;
        }
        Ok(group)
    }

    fn variable(&self, path: &str) -> Result<Variable<'_>> {
        self.check_open()?;
        let rel = relative(path);
        let found = match rel.rsplit_once('/') {
            None => self.file.variable(rel),
            Some((parent, name)) => self.nc_group(parent)?.variable(name),
        };
        found.map_err(|_| Error::NotFound(path.to_string()))
    }
}

impl SourceFile for NetCdfSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn kind(&self) -> FileKind {
        FileKind::NetCdf4
    }

    fn group_names(&self, group: &str) -> Result<Vec<String>> {
        self.check_open()?;
        if relative(group).is_empty() {
            return Ok(self.file.group_names()?);
        }
        Ok(self.nc_group(group)?.group_names()?)
    }

    fn leaf_names(&self, group: &str) -> Result<Vec<String>> {
        self.check_open()?;
        if relative(group).is_empty() {
            let vars = self.file.variables()?;
            return Ok(vars.iter().map(|v| v.name().to_string()).collect());
        }
        Ok(self.nc_group(group)?.variable_names()?)
    }

    fn leaf_info(&self, leaf: &str) -> Result<LeafInfo> {
        let mut var = self.variable(leaf)?;
        let shape = u64_shape(&var.shape()?);
        let dims: Vec<String> = var.dimensions().iter().map(|d| d.name.clone()).collect();
        let dimensions = (!dims.is_empty() && dims.len() == shape.len()).then_some(dims);
        let element_type = element_type(var.nc_type()?);
        let cf = var.cf_attributes()?;
        let attrs = var.attrs()?.clone();
        Ok(LeafInfo {
            element_type,
            shape,
            dimensions,
            units: cf.units,
            title: cf.long_name,
            attrs,
        })
    }

    fn read_leaf(&self, leaf: &str) -> Result<Array> {
        let mut var = self.variable(leaf)?;
        let packed = {
            let attrs = var.attrs()?;
            attrs.contains_key("scale_factor") || attrs.contains_key("add_offset")
        };
        if packed {
            let shape = u64_shape(&var.shape()?);
            return Array::from_f64(&shape, var.read_f64()?);
        }
        let ds = self.file.hdf5_file().dataset(relative(leaf))?;
        read_dataset(&ds, leaf)
    }

    fn is_open(&self) -> bool {
        self.open.get()
    }
}

impl std::fmt::Debug for NetCdfSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetCdfSource")
            .field("path", &self.path)
            .field("open", &self.open.get())
            .finish()
    }
}
