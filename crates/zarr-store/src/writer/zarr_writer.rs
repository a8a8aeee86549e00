//! Zarr V3 writer for staging stores.
//!
//! A [`StoreWriter`] owns a freshly created directory. Data arrays are written
//! whole (one call per array) after precision reduction; coordinate arrays and
//! the root group attributes are written once by whoever owns the store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::GroupBuilder;
use zarrs_filesystem::FilesystemStore;

use crate::config::{ArrayCodec, StoreConfig, ZarrCompression};
use crate::error::{Result, StoreError};
use crate::quantize::round_to_bits;
use crate::schema::{CoordinateValues, ElementType, StoreSchema};

/// Attribute listing an array's dimension names (xarray convention).
pub const DIMENSIONS_ATTR: &str = "_ARRAY_DIMENSIONS";

/// Result of writing one data array.
#[derive(Debug, Clone)]
pub struct ArrayWriteResult {
    /// Array name.
    pub name: String,
    /// Number of elements written.
    pub elements: usize,
    /// Uncompressed bytes written.
    pub bytes_written: u64,
    /// Precision bits applied, if any.
    pub keepbits: Option<u32>,
}

/// Writer for a staging store.
pub struct StoreWriter {
    path: PathBuf,
    store: Arc<FilesystemStore>,
    schema: StoreSchema,
    config: StoreConfig,
}

impl std::fmt::Debug for StoreWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreWriter")
            .field("path", &self.path)
            .field("arrays", &self.schema.data_arrays.len())
            .finish()
    }
}

impl StoreWriter {
    /// Create a new store at `path`.
    ///
    /// Fails if anything already exists at `path`: stores are never written
    /// in place.
    pub fn create(
        path: impl AsRef<Path>,
        schema: StoreSchema,
        config: StoreConfig,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        schema.validate()?;
        config.validate().map_err(StoreError::ConfigError)?;

        if path.exists() {
            return Err(StoreError::CreateFailed(format!(
                "{} already exists",
                path.display()
            )));
        }

        std::fs::create_dir_all(&path).map_err(|e| {
            StoreError::CreateFailed(format!("{}: {}", path.display(), e))
        })?;

        let store = FilesystemStore::new(&path)
            .map_err(|e| StoreError::CreateFailed(e.to_string()))?;

        debug!(path = %path.display(), "Created staging store");

        Ok(Self {
            path,
            store: Arc::new(store),
            schema,
            config,
        })
    }

    /// Location of the store on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schema this store is written against.
    pub fn schema(&self) -> &StoreSchema {
        &self.schema
    }

    /// Quantize and write a whole data array.
    ///
    /// `values` are row-major over the schema's dimensions.
    pub fn write_array(&self, name: &str, mut values: Vec<f32>) -> Result<ArrayWriteResult> {
        let spec = self
            .schema
            .data_array(name)
            .ok_or_else(|| StoreError::UndeclaredArray(name.to_string()))?;

        let expected = self.schema.element_count();
        if values.len() != expected {
            return Err(StoreError::ShapeMismatch {
                array: name.to_string(),
                expected,
                actual: values.len(),
            });
        }

        if let Some(bits) = spec.keepbits {
            round_to_bits(&mut values, bits);
        }

        let mut attrs = spec.attributes.clone();
        attrs.insert(
            DIMENSIONS_ATTR.to_string(),
            json!(self.schema.dimension_names()),
        );
        if let Some(bits) = spec.keepbits {
            attrs.insert("keepbits".to_string(), json!(bits));
        }

        let codec = spec.codec.unwrap_or_else(|| self.config.codec());
        let array = self.build_array(
            name,
            self.schema.shape(),
            self.schema.chunk_shape(),
            ElementType::Float32,
            codec,
            attrs,
        )?;

        array
            .store_metadata()
            .map_err(|e| StoreError::write_failed(name, e))?;

        let subset = ArraySubset::new_with_shape(self.schema.shape());
        array
            .store_array_subset_elements(&subset, values.as_slice())
            .map_err(|e| StoreError::write_failed(name, e))?;

        let bytes_written = (values.len() * std::mem::size_of::<f32>()) as u64;
        debug!(array = name, bytes = bytes_written, "Wrote data array");

        Ok(ArrayWriteResult {
            name: name.to_string(),
            elements: values.len(),
            bytes_written,
            keepbits: spec.keepbits,
        })
    }

    /// Write a coordinate array as a single chunk.
    pub fn write_coordinate(&self, name: &str, values: &CoordinateValues) -> Result<()> {
        let spec = self
            .schema
            .coordinate(name)
            .ok_or_else(|| StoreError::UndeclaredArray(name.to_string()))?;
        let dim = self
            .schema
            .dimension(name)
            .ok_or_else(|| StoreError::UndeclaredArray(name.to_string()))?;

        if values.element_type() != spec.element_type {
            return Err(StoreError::write_failed(
                name,
                format!(
                    "expected {} values, got {}",
                    spec.element_type.as_str(),
                    values.element_type().as_str()
                ),
            ));
        }
        if values.len() as u64 != dim.size {
            return Err(StoreError::ShapeMismatch {
                array: name.to_string(),
                expected: dim.size as usize,
                actual: values.len(),
            });
        }

        let mut attrs = spec.attributes.clone();
        attrs.insert(DIMENSIONS_ATTR.to_string(), json!([name]));

        let array = self.build_array(
            name,
            vec![dim.size],
            vec![dim.size],
            spec.element_type,
            self.config.codec(),
            attrs,
        )?;

        array
            .store_metadata()
            .map_err(|e| StoreError::write_failed(name, e))?;

        let subset = ArraySubset::new_with_shape(vec![dim.size]);
        let stored = match values {
            CoordinateValues::Int64(v) => array.store_array_subset_elements(&subset, v.as_slice()),
            CoordinateValues::Int32(v) => array.store_array_subset_elements(&subset, v.as_slice()),
            CoordinateValues::Float64(v) => array.store_array_subset_elements(&subset, v.as_slice()),
        };
        stored.map_err(|e| StoreError::write_failed(name, e))?;

        debug!(array = name, len = values.len(), "Wrote coordinate array");
        Ok(())
    }

    /// Write the root group with the schema's attributes plus `extra`.
    pub fn finalize(&self, extra: Map<String, Value>) -> Result<()> {
        let mut attrs = self.schema.attributes.clone();
        attrs.extend(extra);

        let mut builder = GroupBuilder::new();
        builder.attributes(attrs);
        let group = builder
            .build(self.store.clone(), "/")
            .map_err(|e| StoreError::write_failed("/", e))?;
        group
            .store_metadata()
            .map_err(|e| StoreError::write_failed("/", e))?;

        debug!(path = %self.path.display(), "Finalized store");
        Ok(())
    }

    /// Remove the store and everything written to it.
    pub fn discard(self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_dir_all(&self.path)?;
        }
        debug!(path = %self.path.display(), "Discarded store");
        Ok(())
    }

    /// Build an array with the configured codec.
    fn build_array(
        &self,
        name: &str,
        shape: Vec<u64>,
        chunk_shape: Vec<u64>,
        element_type: ElementType,
        codec: ArrayCodec,
        attrs: Map<String, Value>,
    ) -> Result<Array<FilesystemStore>> {
        let chunk_grid: zarrs::array::ChunkGrid = chunk_shape
            .try_into()
            .map_err(|e| StoreError::ConfigError(format!("{:?}", e)))?;

        let (data_type, fill_value) = match element_type {
            ElementType::Float32 => (DataType::Float32, FillValue::from(f32::NAN)),
            ElementType::Float64 => (DataType::Float64, FillValue::from(f64::NAN)),
            ElementType::Int32 => (DataType::Int32, FillValue::from(0i32)),
            ElementType::Int64 => (DataType::Int64, FillValue::from(0i64)),
        };

        let mut binding = ArrayBuilder::new(shape, data_type, chunk_grid, fill_value);
        let mut builder = binding.attributes(attrs);

        if codec.compression != ZarrCompression::None {
            let codec = self.create_compression_codec(codec, element_type.size())?;
            builder = builder.bytes_to_bytes_codecs(vec![codec]);
        }

        builder
            .build(self.store.clone(), &format!("/{}", name))
            .map_err(|e| StoreError::write_failed(name, e))
    }

    /// Blosc codec for `codec`; shuffle follows the store configuration.
    fn create_compression_codec(
        &self,
        codec: ArrayCodec,
        typesize: usize,
    ) -> Result<Arc<dyn zarrs::array::codec::BytesToBytesCodecTraits>> {
        let level = BloscCompressionLevel::try_from(codec.level)
            .map_err(|_| StoreError::ConfigError("Invalid compression level".to_string()))?;

        let shuffle = if self.config.shuffle {
            BloscShuffleMode::Shuffle
        } else {
            BloscShuffleMode::NoShuffle
        };

        // typesize is required when shuffle is enabled
        let typesize = if self.config.shuffle {
            Some(typesize)
        } else {
            None
        };

        let compressor = match codec.compression {
            ZarrCompression::None => {
                return Err(StoreError::ConfigError(
                    "No compression configured".to_string(),
                ))
            }
            ZarrCompression::BloscLz4 => BloscCompressor::LZ4,
            ZarrCompression::BloscZstd => BloscCompressor::Zstd,
        };

        let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
            .map_err(|e| StoreError::ConfigError(e.to_string()))?;

        Ok(Arc::new(codec))
    }
}
