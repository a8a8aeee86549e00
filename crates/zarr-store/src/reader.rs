//! Read access to a written store.
//!
//! Used to validate a staging store before promotion and to derive catalog
//! metadata from the published one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use walkdir::WalkDir;
use zarrs::array::{Array, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs::group::Group;
use zarrs_filesystem::FilesystemStore;

use crate::error::{Result, StoreError};
use crate::schema::{CoordinateValues, ElementType};
use crate::writer::DIMENSIONS_ATTR;

/// Structural description of one stored array.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayInfo {
    pub name: String,
    pub shape: Vec<u64>,
    pub chunk_shape: Vec<u64>,
    pub dimension_names: Vec<String>,
    pub element_type: Option<ElementType>,
    pub attributes: Map<String, Value>,
}

/// Reader over a store directory.
pub struct StoreReader {
    path: PathBuf,
    store: Arc<FilesystemStore>,
    attributes: Map<String, Value>,
}

impl std::fmt::Debug for StoreReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreReader").field("path", &self.path).finish()
    }
}

macro_rules! read_whole_array {
    ($fn_name:ident, $ty:ty) => {
        /// Read an entire array into memory.
        pub fn $fn_name(&self, name: &str) -> Result<Vec<$ty>> {
            let array = self.open_array(name)?;
            let subset = ArraySubset::new_with_shape(array.shape().to_vec());
            array
                .retrieve_array_subset_elements::<$ty>(&subset)
                .map_err(|e| StoreError::read_failed(name, e))
        }
    };
}

impl StoreReader {
    /// Open the store rooted at `path`.
    ///
    /// Symlinks are followed, so the published name can be opened directly.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.join("zarr.json").is_file() {
            return Err(StoreError::OpenFailed(format!(
                "{} has no root group metadata",
                path.display()
            )));
        }

        let store = Arc::new(
            FilesystemStore::new(&path).map_err(|e| StoreError::OpenFailed(e.to_string()))?,
        );
        let group = Group::open(store.clone(), "/")
            .map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        let attributes = group.attributes().clone();

        Ok(Self {
            path,
            store,
            attributes,
        })
    }

    /// Location of the store on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Root group attributes.
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Names of every array directly under the root group, sorted.
    pub fn array_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.path().join("zarr.json").is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Shape, chunking, dimensions and attributes of an array.
    pub fn array_info(&self, name: &str) -> Result<ArrayInfo> {
        let array = self.open_array(name)?;
        let shape = array.shape().to_vec();

        let origin = vec![0u64; shape.len()];
        let chunk_shape = array
            .chunk_grid()
            .chunk_shape(&origin, array.shape())
            .map_err(|e| StoreError::invalid_metadata(e.to_string()))?
            .ok_or_else(|| StoreError::invalid_metadata("missing chunk shape"))?
            .iter()
            .map(|c| c.get())
            .collect();

        let attributes = array.attributes().clone();
        let dimension_names = attributes
            .get(DIMENSIONS_ATTR)
            .and_then(|v| v.as_array())
            .map(|dims| {
                dims.iter()
                    .filter_map(|d| d.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let element_type = match array.data_type() {
            DataType::Float32 => Some(ElementType::Float32),
            DataType::Float64 => Some(ElementType::Float64),
            DataType::Int32 => Some(ElementType::Int32),
            DataType::Int64 => Some(ElementType::Int64),
            _ => None,
        };

        Ok(ArrayInfo {
            name: name.to_string(),
            shape,
            chunk_shape,
            dimension_names,
            element_type,
            attributes,
        })
    }

    read_whole_array!(read_f32, f32);
    read_whole_array!(read_f64, f64);
    read_whole_array!(read_i32, i32);
    read_whole_array!(read_i64, i64);

    /// Read a hyper-rectangular window of an `f32` array.
    pub fn read_f32_window(&self, name: &str, start: &[u64], shape: &[u64]) -> Result<Vec<f32>> {
        let array = self.open_array(name)?;
        let subset = ArraySubset::new_with_start_shape(start.to_vec(), shape.to_vec())
            .map_err(|e| StoreError::read_failed(name, e))?;
        array
            .retrieve_array_subset_elements::<f32>(&subset)
            .map_err(|e| StoreError::read_failed(name, e))
    }

    /// Read a one-dimensional coordinate array with its stored type.
    pub fn read_coordinate(&self, name: &str) -> Result<CoordinateValues> {
        match self.array_info(name)?.element_type {
            Some(ElementType::Int64) => Ok(CoordinateValues::Int64(self.read_i64(name)?)),
            Some(ElementType::Int32) => Ok(CoordinateValues::Int32(self.read_i32(name)?)),
            Some(ElementType::Float64) => Ok(CoordinateValues::Float64(self.read_f64(name)?)),
            other => Err(StoreError::invalid_metadata(format!(
                "coordinate '{}' has unsupported type {:?}",
                name, other
            ))),
        }
    }

    /// Total size of all files in the store, in bytes.
    pub fn size_bytes(&self) -> u64 {
        directory_size(&self.path)
    }

    fn open_array(&self, name: &str) -> Result<Array<FilesystemStore>> {
        Array::open(self.store.clone(), &format!("/{}", name))
            .map_err(|e| StoreError::read_failed(name, e))
    }
}

/// Recursive size of every regular file below `path`.
///
/// Symlinks are followed for the root only.
pub fn directory_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_root_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
