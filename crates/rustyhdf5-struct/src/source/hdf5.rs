//! HDF5 source backed by `rustyhdf5::File`.

use std::cell::Cell;
use std::path::{Path, PathBuf};

use rustyhdf5::{DType, Dataset, File, Group};
use tracing::debug;

use super::{canonical, relative, u64_shape, FileKind, LeafInfo, SourceFile};
use crate::array::{Array, ElementType};
use crate::attrs::{self, TEXT_VALUE, VALUE_TYPE};
use crate::error::{Error, Result};

/// Map a reader datatype to an element type.
pub(crate) fn element_type(dtype: &DType) -> ElementType {
    match dtype {
        DType::F32 => ElementType::F32,
        DType::F64 => ElementType::F64,
        DType::I8 => ElementType::I8,
        DType::I16 => ElementType::I16,
        DType::I32 => ElementType::I32,
        DType::I64 => ElementType::I64,
        DType::U8 => ElementType::U8,
        DType::U16 => ElementType::U16,
        DType::U32 => ElementType::U32,
        DType::U64 => ElementType::U64,
        DType::String | DType::VariableLengthString => ElementType::Text,
        other => ElementType::Other(other.to_string()),
    }
}

/// Read a dataset into an array of its on-disk shape.
///
/// Byte datasets tagged `value_type = "text"` decode to a 0-d string array.
pub(crate) fn read_dataset(ds: &Dataset<'_>, path: &str) -> Result<Array> {
    let shape = u64_shape(&ds.shape()?);
    let etype = element_type(&ds.dtype()?);
    if etype == ElementType::U8 && is_text(ds)? {
        let bytes: Vec<u8> = ds.read_i64()?.into_iter().map(|b| b as u8).collect();
        let text = attrs::decode_text(bytes)
            .map_err(|e| Error::Type(format!("{path}: stored text is not UTF-8: {e}")))?;
        return Array::from_strings(&[], vec![text]);
    }
    match etype {
        ElementType::F32 | ElementType::F64 => Array::from_f64(&shape, ds.read_f64()?),
        ElementType::U64 => {
            let data = ds
                .read_u64()?
                .into_iter()
                .map(i64::try_from)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| Error::Type(format!("{path}: u64 value does not fit i64")))?;
            Array::from_i64(&shape, data)
        }
        t if t.is_numeric() => Array::from_i64(&shape, ds.read_i64()?),
        ElementType::Text => Array::from_strings(&shape, ds.read_string()?),
        other => Err(Error::Type(format!("{path}: unsupported element type {other}"))),
    }
}

fn is_text(ds: &Dataset<'_>) -> Result<bool> {
    Ok(attrs::text(&ds.attrs()?, VALUE_TYPE).as_deref() == Some(TEXT_VALUE))
}

/// An open HDF5 file.
pub struct Hdf5Source {
    path: PathBuf,
    file: File,
    open: Cell<bool>,
}

impl Hdf5Source {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = canonical(path.as_ref());
        let file = File::open(&path)?;
        debug!(path = %path.display(), "opened HDF5 source");
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

    fn group(&self, path: &str) -> Result<Group<'_>> {
        self.check_open()?;
        let rel = relative(path);
        if rel.is_empty() {
            return Ok(self.file.root());
        }
        self.file
            .group(rel)
            .map_err(|_| Error::NotFound(path.to_string()))
    }

    fn dataset(&self, path: &str) -> Result<Dataset<'_>> {
        self.check_open()?;
        self.file.dataset(relative(path)).map_err(|e| match e {
            rustyhdf5::Error::NotADataset(_) => Error::Type(format!("{path} is not a dataset")),
            _ => Error::NotFound(path.to_string()),
        })
    }
}

impl SourceFile for Hdf5Source {
    fn path(&self) -> &Path {
        &self.path
    }

    fn kind(&self) -> FileKind {
        FileKind::Hdf5
    }

    fn group_names(&self, group: &str) -> Result<Vec<String>> {
        Ok(self.group(group)?.groups()?)
    }

    fn leaf_names(&self, group: &str) -> Result<Vec<String>> {
        Ok(self.group(group)?.datasets()?)
    }

    fn leaf_info(&self, leaf: &str) -> Result<LeafInfo> {
        let ds = self.dataset(leaf)?;
        let attrs = ds.attrs()?;
        let mut element_type = element_type(&ds.dtype()?);
        let mut shape = u64_shape(&ds.shape()?);
        if element_type == ElementType::U8
            && attrs::text(&attrs, VALUE_TYPE).as_deref() == Some(TEXT_VALUE)
        {
            element_type = ElementType::Text;
            shape = Vec::new();
        }
        Ok(LeafInfo {
            element_type,
            shape,
            dimensions: None,
            units: attrs::text(&attrs, "units"),
            title: attrs::text(&attrs, "title").or_else(|| attrs::text(&attrs, "long_name")),
            attrs,
        })
    }

    fn read_leaf(&self, leaf: &str) -> Result<Array> {
        read_dataset(&self.dataset(leaf)?, leaf)
    }

    fn is_open(&self) -> bool {
        self.open.get()
    }
}

impl std::fmt::Debug for Hdf5Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hdf5Source")
            .field("path", &self.path)
            .field("open", &self.open.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustyhdf5::{AttrValue, FileBuilder};

    fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rustyhdf5_struct_src_{}_{name}.h5", std::process::id()))
    }

    fn write_sample(path: &Path) {
        let mut b = FileBuilder::new();
        b.create_dataset("values")
            .with_f64_data(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
            .with_shape(&[2, 3])
            .set_attr("units", AttrValue::String("m".into()));
        b.create_dataset("counts").with_i32_data(&[1, 2, 3]);
        let mut g = b.create_group("grp");
        g.create_dataset("inner").with_f64_data(&[9.0]);
        b.add_group(g.finish());
        b.write(path).unwrap();
    }

    #[test]
    fn lists_and_reads() {
        let path = temp_file("lists_and_reads");
        write_sample(&path);
        let src = Hdf5Source::open(&path).unwrap();

        assert_eq!(src.group_names("/").unwrap(), vec!["grp".to_string()]);
        let mut leaves = src.leaf_names("/").unwrap();
        leaves.sort();
        assert_eq!(leaves, vec!["counts".to_string(), "values".to_string()]);
        assert_eq!(src.leaf_names("/grp").unwrap(), vec!["inner".to_string()]);

        let info = src.leaf_info("/values").unwrap();
        assert_eq!(info.element_type, ElementType::F64);
        assert_eq!(info.shape, vec![2, 3]);
        assert_eq!(info.units.as_deref(), Some("m"));

        let counts = src.read_leaf("/counts").unwrap();
        assert!(matches!(counts, Array::Int(_)));
        assert_eq!(counts.to_f64_vec().unwrap(), vec![1.0, 2.0, 3.0]);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn closed_handle_refuses_reads() {
        let path = temp_file("closed_handle");
        write_sample(&path);
        let src = Hdf5Source::open(&path).unwrap();
        assert!(src.is_open());
        src.close();
        assert!(!src.is_open());
        assert!(matches!(src.read_leaf("/values"), Err(Error::Closed(_))));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_leaf_is_not_found() {
        let path = temp_file("missing_leaf");
        write_sample(&path);
        let src = Hdf5Source::open(&path).unwrap();
        assert!(matches!(src.leaf_info("/nope"), Err(Error::NotFound(_))));
        std::fs::remove_file(&path).ok();
    }
}
