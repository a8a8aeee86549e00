//! Grid assembly.
//!
//! Stacks the decoded grids of one variable into a single
//! `lead_time × y × x` array after checking that the lead-time set matches
//! the cycle's horizon exactly and that every grid shares one geometry.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::GridGeometry;
use crate::cycle::ForecastCycle;
use crate::error::{IngestError, Result};
use crate::source::{DecodedGrid, SpatialCoords};
use crate::variables::variable_spec;

/// All lead times of one variable for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableArray {
    pub variable: String,
    /// Lead hours in ascending order, equal to the horizon sequence.
    pub lead_times: Vec<u32>,
    pub coords: SpatialCoords,
    /// Row-major `lead_time × y × x` samples.
    pub values: Vec<f32>,
}

impl VariableArray {
    /// Samples of one lead-time slice.
    pub fn slice(&self, index: usize) -> &[f32] {
        let (ny, nx) = self.coords.shape();
        let size = ny * nx;
        &self.values[index * size..(index + 1) * size]
    }
}

/// Assembles decoded grids for one cycle.
#[derive(Debug, Clone)]
pub struct GridAssembler {
    cycle: ForecastCycle,
    geometry: GridGeometry,
}

impl GridAssembler {
    pub fn new(cycle: ForecastCycle, geometry: GridGeometry) -> Self {
        Self { cycle, geometry }
    }

    /// Validate and stack `grids` for `variable`.
    pub fn assemble(&self, variable: &str, grids: Vec<DecodedGrid>) -> Result<VariableArray> {
        variable_spec(variable)?;

        let expected = self.cycle.lead_times();
        self.check_lead_times(variable, &expected, &grids)?;

        let mut by_index: BTreeMap<usize, DecodedGrid> = BTreeMap::new();
        let mut coords: Option<SpatialCoords> = None;

        for grid in grids {
            self.check_shape(variable, &grid)?;

            if grid.variable != variable {
                return Err(IngestError::incomplete(
                    variable,
                    vec![grid.lead_hour],
                    format!("grid is labelled '{}'", grid.variable),
                ));
            }

            match &coords {
                None => {
                    coords = Some(SpatialCoords {
                        y: grid.y.clone(),
                        x: grid.x.clone(),
                    })
                }
                Some(c) if c.y != grid.y || c.x != grid.x => {
                    return Err(IngestError::incomplete(
                        variable,
                        vec![grid.lead_hour],
                        "projection coordinates differ from the other lead times",
                    ));
                }
                Some(_) => {}
            }

            // membership already checked against the horizon
            if let Some(index) = self.cycle.horizon.lead_time_index(grid.lead_hour) {
                by_index.insert(index, grid);
            }
        }

        let coords = coords.ok_or_else(|| {
            IngestError::incomplete(variable, expected.clone(), "no grids received")
        })?;

        let mut values = Vec::with_capacity(expected.len() * self.geometry.points());
        for grid in by_index.into_values() {
            values.extend_from_slice(&grid.values);
        }

        debug!(
            variable = variable,
            lead_times = expected.len(),
            "Assembled variable"
        );

        Ok(VariableArray {
            variable: variable.to_string(),
            lead_times: expected,
            coords,
            values,
        })
    }

    /// The received lead-time set must equal the expected sequence exactly.
    fn check_lead_times(
        &self,
        variable: &str,
        expected: &[u32],
        grids: &[DecodedGrid],
    ) -> Result<()> {
        let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
        for grid in grids {
            *counts.entry(grid.lead_hour).or_default() += 1;
        }

        let unexpected: Vec<u32> = counts
            .keys()
            .copied()
            .filter(|h| self.cycle.horizon.lead_time_index(*h).is_none())
            .collect();
        if !unexpected.is_empty() {
            return Err(IngestError::incomplete(
                variable,
                unexpected,
                format!("unexpected for the {} horizon", self.cycle.horizon),
            ));
        }

        let duplicated: Vec<u32> = counts
            .iter()
            .filter(|(_, n)| **n > 1)
            .map(|(h, _)| *h)
            .collect();
        if !duplicated.is_empty() {
            return Err(IngestError::incomplete(variable, duplicated, "duplicated"));
        }

        let missing: Vec<u32> = expected
            .iter()
            .copied()
            .filter(|h| !counts.contains_key(h))
            .collect();
        if !missing.is_empty() {
            return Err(IngestError::incomplete(
                variable,
                missing.clone(),
                format!(
                    "{} of {} lead times missing",
                    missing.len(),
                    expected.len()
                ),
            ));
        }

        Ok(())
    }

    fn check_shape(&self, variable: &str, grid: &DecodedGrid) -> Result<()> {
        let GridGeometry { ny, nx } = self.geometry;
        let problem = if grid.ny != ny || grid.nx != nx {
            Some(format!(
                "grid is {}x{}, expected {}x{}",
                grid.ny, grid.nx, ny, nx
            ))
        } else if grid.values.len() != ny * nx {
            Some(format!(
                "{} samples, expected {}",
                grid.values.len(),
                ny * nx
            ))
        } else if grid.y.len() != ny || grid.x.len() != nx {
            Some(format!(
                "coordinate lengths {}/{} do not match the grid",
                grid.y.len(),
                grid.x.len()
            ))
        } else {
            None
        };

        match problem {
            Some(reason) => Err(IngestError::incomplete(
                variable,
                vec![grid.lead_hour],
                reason,
            )),
            None => Ok(()),
        }
    }
}
