//! In-memory grid source.
//!
//! Serves synthetic grids for any cycle, with switches for the failure
//! modes the pipeline must survive: an unavailable cycle, missing grids,
//! drifting coordinates and cancellation mid-run.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use ingestion::{
    DecodedGrid, ForecastCycle, GridGeometry, GridSource, IngestError, Result, SpatialCoords,
};
use tokio_util::sync::CancellationToken;

use crate::fixtures::{small_coords, SMALL_GEOMETRY};
use crate::generators::synthetic_grid;

/// [`GridSource`] backed by deterministic synthetic data.
#[derive(Debug)]
pub struct InMemorySource {
    geometry: GridGeometry,
    coords: SpatialCoords,
    unavailable: bool,
    missing: HashSet<(String, u32)>,
    x_shift: HashMap<String, f64>,
    value_offset: f32,
    cancel_after: Option<(usize, CancellationToken)>,
    fetches: AtomicUsize,
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new(SMALL_GEOMETRY, small_coords())
    }
}

impl InMemorySource {
    pub fn new(geometry: GridGeometry, coords: SpatialCoords) -> Self {
        Self {
            geometry,
            coords,
            unavailable: false,
            missing: HashSet::new(),
            x_shift: HashMap::new(),
            value_offset: 0.0,
            cancel_after: None,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Report every cycle as not yet published.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Fail the fetch of one (variable, lead time) grid.
    pub fn without_grid(mut self, variable: &str, lead_hour: u32) -> Self {
        self.missing.insert((variable.to_string(), lead_hour));
        self
    }

    /// Shift the x coordinates served for `variable`.
    pub fn with_shifted_x(mut self, variable: &str, dx: f64) -> Self {
        self.x_shift.insert(variable.to_string(), dx);
        self
    }

    /// Add `offset` to every sample.
    pub fn with_value_offset(mut self, offset: f32) -> Self {
        self.value_offset = offset;
        self
    }

    /// Cancel `token` once `fetches` grids have been served.
    pub fn cancel_after(mut self, fetches: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((fetches, token));
        self
    }

    /// Grids served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GridSource for InMemorySource {
    async fn check_available(&self, cycle: &ForecastCycle) -> Result<()> {
        if self.unavailable {
            return Err(IngestError::CycleUnavailable {
                cycle: cycle.id(),
                reason: "not published upstream".to_string(),
            });
        }
        Ok(())
    }

    async fn fetch(
        &self,
        _cycle: &ForecastCycle,
        variable: &str,
        lead_hour: u32,
    ) -> Result<DecodedGrid> {
        if self.missing.contains(&(variable.to_string(), lead_hour)) {
            return Err(IngestError::incomplete(
                variable,
                vec![lead_hour],
                "grid not found at source",
            ));
        }

        let served = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, token)) = &self.cancel_after {
            if served >= *limit {
                token.cancel();
            }
        }

        let mut grid = synthetic_grid(variable, lead_hour, self.geometry, &self.coords);
        if self.value_offset != 0.0 {
            grid.values.iter_mut().for_each(|v| *v += self.value_offset);
        }
        if let Some(dx) = self.x_shift.get(variable) {
            grid.x.iter_mut().for_each(|x| *x += dx);
        }
        Ok(grid)
    }
}
