//! Common test fixtures for ingestion tests.
//!
//! The production grid is 1597 x 2345; tests use a small geometry on the
//! same projection so whole cycles can be written in milliseconds.

use std::path::Path;

use chrono::{TimeZone, Utc};
use ingestion::{ChunkScheme, ForecastCycle, GridGeometry, PipelineConfig, SpatialCoords};
use projection::LambertConformal;
use zarr_store::{StoreConfig, ZarrCompression};

/// Small grid used in place of the CONUS grid.
pub const SMALL_GEOMETRY: GridGeometry = GridGeometry { ny: 12, nx: 16 };

/// Chunking for [`SMALL_GEOMETRY`]: uneven edge chunks on both axes.
pub const SMALL_CHUNKS: ChunkScheme = ChunkScheme {
    lead_time: None,
    y: 5,
    x: 6,
};

/// Pipeline configuration writing under `output_dir` with the small geometry.
pub fn test_config(output_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        output_dir: output_dir.to_path_buf(),
        geometry: SMALL_GEOMETRY,
        chunks: SMALL_CHUNKS,
        store: StoreConfig {
            compression: ZarrCompression::BloscZstd,
            compression_level: 3,
            shuffle: true,
        },
        parallel_variables: 4,
        ..PipelineConfig::default()
    }
}

/// Projection coordinates of the small grid.
pub fn small_coords() -> SpatialCoords {
    let mut proj = LambertConformal::nbm_conus();
    proj.ny = SMALL_GEOMETRY.ny;
    proj.nx = SMALL_GEOMETRY.nx;
    SpatialCoords {
        y: proj.y_coords(),
        x: proj.x_coords(),
    }
}

/// Cycle initialised at `hour` UTC on a fixed test date.
pub fn cycle_at(hour: u32) -> ForecastCycle {
    ForecastCycle::resolve(Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap())
}

/// Cycle initialised at `hour` UTC on the day after [`cycle_at`].
pub fn next_day_cycle_at(hour: u32) -> ForecastCycle {
    ForecastCycle::resolve(Utc.with_ymd_and_hms(2024, 6, 2, hour, 0, 0).unwrap())
}
