//! Logical schema of a store: dimensions, arrays and attributes.
//!
//! Data arrays span every dimension in declaration order and hold `f32`
//! samples. Coordinate arrays are one-dimensional, named after the dimension
//! they label, and stored as a single chunk.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ArrayCodec;
use crate::error::{Result, StoreError};

/// A named, chunked dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub size: u64,
    pub chunk: u64,
}

impl Dimension {
    pub fn new(name: impl Into<String>, size: u64, chunk: u64) -> Self {
        Self {
            name: name.into(),
            size,
            chunk,
        }
    }

    /// Number of chunks along this dimension.
    pub fn num_chunks(&self) -> u64 {
        if self.chunk == 0 {
            return 0;
        }
        self.size.div_ceil(self.chunk)
    }
}

/// Element type of a stored array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Float32,
    Float64,
    Int32,
    Int64,
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::Float32 | Self::Int32 => 4,
            Self::Float64 | Self::Int64 => 8,
        }
    }

    /// Zarr V3 data type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
        }
    }
}

/// A data array declared by the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataArraySpec {
    pub name: String,
    /// Mantissa bits kept by precision reduction; `None` stores full precision.
    pub keepbits: Option<u32>,
    /// Codec pinned for this array; `None` uses the store configuration.
    #[serde(default)]
    pub codec: Option<ArrayCodec>,
    pub attributes: Map<String, Value>,
}

/// A coordinate array labelling one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateSpec {
    /// Name of the coordinate, equal to the dimension it labels.
    pub name: String,
    pub element_type: ElementType,
    pub attributes: Map<String, Value>,
}

/// Values of a coordinate array.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinateValues {
    Int64(Vec<i64>),
    Int32(Vec<i32>),
    Float64(Vec<f64>),
}

impl CoordinateValues {
    pub fn len(&self) -> usize {
        match self {
            Self::Int64(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Int64(_) => ElementType::Int64,
            Self::Int32(_) => ElementType::Int32,
            Self::Float64(_) => ElementType::Float64,
        }
    }

    /// Values widened to `f64`, for monotonicity checks and summaries.
    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            Self::Int64(v) => v.iter().map(|&x| x as f64).collect(),
            Self::Int32(v) => v.iter().map(|&x| x as f64).collect(),
            Self::Float64(v) => v.clone(),
        }
    }

    /// True when every value is strictly greater than its predecessor.
    pub fn is_strictly_increasing(&self) -> bool {
        self.to_f64().windows(2).all(|w| w[1] > w[0])
    }
}

/// Complete logical description of a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSchema {
    pub dimensions: Vec<Dimension>,
    pub data_arrays: Vec<DataArraySpec>,
    pub coordinates: Vec<CoordinateSpec>,
    /// Root group attributes.
    pub attributes: Map<String, Value>,
}

impl StoreSchema {
    /// Shape of every data array.
    pub fn shape(&self) -> Vec<u64> {
        self.dimensions.iter().map(|d| d.size).collect()
    }

    /// Chunk shape of every data array.
    pub fn chunk_shape(&self) -> Vec<u64> {
        self.dimensions.iter().map(|d| d.chunk).collect()
    }

    /// Dimension names in order.
    pub fn dimension_names(&self) -> Vec<String> {
        self.dimensions.iter().map(|d| d.name.clone()).collect()
    }

    /// Number of elements in one data array.
    pub fn element_count(&self) -> usize {
        self.dimensions.iter().map(|d| d.size as usize).product()
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn data_array(&self, name: &str) -> Option<&DataArraySpec> {
        self.data_arrays.iter().find(|a| a.name == name)
    }

    pub fn coordinate(&self, name: &str) -> Option<&CoordinateSpec> {
        self.coordinates.iter().find(|c| c.name == name)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.dimensions.is_empty() {
            return Err(StoreError::ConfigError("schema has no dimensions".into()));
        }

        for dim in &self.dimensions {
            if dim.size == 0 || dim.chunk == 0 {
                return Err(StoreError::ConfigError(format!(
                    "dimension '{}' has zero size or chunk",
                    dim.name
                )));
            }
            if dim.chunk > dim.size {
                return Err(StoreError::ConfigError(format!(
                    "dimension '{}' chunk {} exceeds size {}",
                    dim.name, dim.chunk, dim.size
                )));
            }
        }

        for coord in &self.coordinates {
            if self.dimension(&coord.name).is_none() {
                return Err(StoreError::ConfigError(format!(
                    "coordinate '{}' does not label a dimension",
                    coord.name
                )));
            }
        }

        for array in &self.data_arrays {
            if let Some(codec) = &array.codec {
                codec.validate().map_err(|e| {
                    StoreError::ConfigError(format!("array '{}': {}", array.name, e))
                })?;
            }
        }

        let mut names: Vec<&str> = self
            .data_arrays
            .iter()
            .map(|a| a.name.as_str())
            .chain(self.coordinates.iter().map(|c| c.name.as_str()))
            .collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(StoreError::ConfigError(
                "array names must be unique".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> StoreSchema {
        StoreSchema {
            dimensions: vec![
                Dimension::new("time", 1, 1),
                Dimension::new("y", 10, 4),
                Dimension::new("x", 12, 5),
            ],
            data_arrays: vec![DataArraySpec {
                name: "t".into(),
                keepbits: Some(12),
                codec: None,
                attributes: Map::new(),
            }],
            coordinates: vec![CoordinateSpec {
                name: "y".into(),
                element_type: ElementType::Float64,
                attributes: Map::new(),
            }],
            attributes: Map::new(),
        }
    }

    #[test]
    fn test_shape_and_chunks() {
        let s = schema();
        assert_eq!(s.shape(), vec![1, 10, 12]);
        assert_eq!(s.chunk_shape(), vec![1, 4, 5]);
        assert_eq!(s.element_count(), 120);
        assert_eq!(s.dimension("y").map(|d| d.num_chunks()), Some(3));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_rejects_invalid_pinned_codec() {
        let mut s = schema();
        s.data_arrays[0].codec = Some(ArrayCodec {
            compression: crate::config::ZarrCompression::BloscZstd,
            level: 0,
        });
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_chunk() {
        let mut s = schema();
        s.dimensions[1].chunk = 11;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_rejects_orphan_coordinate() {
        let mut s = schema();
        s.coordinates[0].name = "z".into();
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let mut s = schema();
        s.data_arrays[0].name = "y".into();
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_coordinate_monotonicity() {
        assert!(CoordinateValues::Int32(vec![1, 2, 3, 39]).is_strictly_increasing());
        assert!(!CoordinateValues::Int32(vec![1, 3, 3]).is_strictly_increasing());
        assert_eq!(CoordinateValues::Int64(vec![5]).element_type(), ElementType::Int64);
    }
}
