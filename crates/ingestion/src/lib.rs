//! Rolling NBM ingestion library.
//!
//! Turns the decoded grids of one forecast cycle into a chunked, compressed
//! Zarr store and atomically replaces the previously published store with it.
//!
//! # Architecture
//!
//! A run flows through these stages, each in its own module:
//!
//! - [`cycle`]: trigger time to forecast cycle and lead-time sequence
//! - [`variables`]: fixed variable catalog and per-variable encoding
//! - [`assembler`]: validate and stack per-lead-time grids
//! - [`schema`]: static chunking and the logical store schema
//! - [`publisher`]: validate the staging store and promote it
//! - [`catalog`]: describe the published store
//!
//! [`Pipeline`] wires them together. Grids come from a [`GridSource`]
//! implementation supplied by the caller; GRIB2 decoding is not done here.

pub mod assembler;
pub mod catalog;
pub mod config;
pub mod cycle;
pub mod error;
pub mod pipeline;
pub mod publisher;
pub mod schema;
pub mod source;
pub mod variables;

// Re-exports
pub use assembler::{GridAssembler, VariableArray};
pub use catalog::{format_size, CatalogEmitter, CatalogEntry, CatalogVariable};
pub use config::{ChunkScheme, GridGeometry, PipelineConfig, DATASET_ID};
pub use cycle::{CycleResolver, ForecastCycle, HorizonClass, SourceFileCoord};
pub use error::{IngestError, Result};
pub use pipeline::{CatalogStatus, Pipeline, RunReport};
pub use publisher::{
    validate_store, PublishLock, PublishOutcome, PublishState, PublishedReference,
    RollingPublisher, SymlinkReference,
};
pub use schema::StorePlanner;
pub use source::{DecodedGrid, GridSource, SpatialCoords};
pub use variables::{nbm_variables, variable_spec, EncodingPolicy, VariableEncoding, VariableSpec};
