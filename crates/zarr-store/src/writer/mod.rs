//! Zarr writer for staging stores.
//!
//! This module is used during ingestion to write forecast arrays
//! in Zarr V3 format with Blosc compression.

mod zarr_writer;

pub use zarr_writer::{ArrayWriteResult, StoreWriter, DIMENSIONS_ATTR};
