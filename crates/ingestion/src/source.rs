//! Pull interface to the external decoder.
//!
//! The pipeline asks for one decoded grid per expected (variable, lead time)
//! pair. Fetching and GRIB2 decoding live behind this trait.

use async_trait::async_trait;

use crate::cycle::ForecastCycle;
use crate::error::Result;

/// One decoded 2-D field with its projection coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedGrid {
    pub variable: String,
    pub lead_hour: u32,
    pub ny: usize,
    pub nx: usize,
    /// Row-major samples, south row first.
    pub values: Vec<f32>,
    /// Projection y coordinates in metres, one per row.
    pub y: Vec<f64>,
    /// Projection x coordinates in metres, one per column.
    pub x: Vec<f64>,
}

/// Projection coordinates shared by every grid of a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialCoords {
    pub y: Vec<f64>,
    pub x: Vec<f64>,
}

impl SpatialCoords {
    pub fn shape(&self) -> (usize, usize) {
        (self.y.len(), self.x.len())
    }
}

/// Source of decoded grids for a forecast cycle.
#[async_trait]
pub trait GridSource: Send + Sync {
    /// Fail with `CycleUnavailable` if the cycle is not yet published upstream.
    async fn check_available(&self, cycle: &ForecastCycle) -> Result<()>;

    /// Decoded grid for one variable and lead time.
    async fn fetch(
        &self,
        cycle: &ForecastCycle,
        variable: &str,
        lead_hour: u32,
    ) -> Result<DecodedGrid>;
}
