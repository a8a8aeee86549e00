//! Chunked Zarr V3 store writing and reading for forecast datasets.
//!
//! This crate knows nothing about forecast cycles or variables. It writes a
//! [`StoreSchema`] (dimensions, `f32` data arrays, one-dimensional coordinate
//! arrays and root attributes) into a fresh directory, applying per-array
//! precision reduction and Blosc compression, and reads such stores back.
//!
//! # Example
//!
//! ```ignore
//! use zarr_store::{StoreConfig, StoreReader, StoreWriter};
//!
//! let writer = StoreWriter::create("/data/versions/new.zarr", schema, StoreConfig::default())?;
//! writer.write_array("t2m", values)?;
//! writer.write_coordinate("lead_time", &lead_times)?;
//! writer.finalize(serde_json::Map::new())?;
//!
//! let reader = StoreReader::open("/data/versions/new.zarr")?;
//! let info = reader.array_info("t2m")?;
//! ```

pub mod config;
pub mod error;
pub mod quantize;
pub mod reader;
pub mod schema;
pub mod writer;

pub use config::{ArrayCodec, StoreConfig, ZarrCompression};
pub use error::{Result, StoreError};
pub use quantize::{quantization_step, round_to_bits};
pub use reader::{directory_size, ArrayInfo, StoreReader};
pub use schema::{
    CoordinateSpec, CoordinateValues, DataArraySpec, Dimension, ElementType, StoreSchema,
};
pub use writer::{ArrayWriteResult, StoreWriter, DIMENSIONS_ATTR};
