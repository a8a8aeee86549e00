//! Test data generators for creating synthetic forecast grids.
//!
//! Values are deterministic functions of (variable, lead hour, row, column)
//! so a store written twice from the same generator is byte-identical, and a
//! single sample can be recomputed when checking a read.

use ingestion::{nbm_variables, DecodedGrid, GridGeometry, SpatialCoords};

/// Baseline magnitude of a variable's synthetic field.
fn variable_base(variable: &str) -> f32 {
    match variable {
        "t2m" | "dpt2m" | "tmax" | "tmin" => 280.0,
        "sp" => 101_325.0,
        "vis" | "ceil" => 16_000.0,
        "u10m" | "v10m" => -8.0,
        _ => {
            let index = nbm_variables()
                .iter()
                .position(|v| v.id == variable)
                .unwrap_or(0);
            10.0 + index as f32
        }
    }
}

/// Synthetic sample of `variable` at `lead_hour`, row `row`, column `col`.
pub fn synthetic_value(variable: &str, lead_hour: u32, row: usize, col: usize) -> f32 {
    let base = variable_base(variable);
    let wave = ((row as f32 * 0.7).sin() + (col as f32 * 0.3).cos()) * 0.37;
    base + lead_hour as f32 * 0.173 + row as f32 * 0.61 + col as f32 * 0.047 + wave
}

/// Decoded grid of synthetic values for one variable and lead time.
pub fn synthetic_grid(
    variable: &str,
    lead_hour: u32,
    geometry: GridGeometry,
    coords: &SpatialCoords,
) -> DecodedGrid {
    let mut values = Vec::with_capacity(geometry.points());
    for row in 0..geometry.ny {
        for col in 0..geometry.nx {
            values.push(synthetic_value(variable, lead_hour, row, col));
        }
    }
    DecodedGrid {
        variable: variable.to_string(),
        lead_hour,
        ny: geometry.ny,
        nx: geometry.nx,
        values,
        y: coords.y.clone(),
        x: coords.x.clone(),
    }
}

/// Synthetic `lead_time x y x x` array for one variable, as it is written.
pub fn synthetic_variable(
    variable: &str,
    lead_times: &[u32],
    geometry: GridGeometry,
) -> Vec<f32> {
    let mut values = Vec::with_capacity(lead_times.len() * geometry.points());
    for &lead in lead_times {
        for row in 0..geometry.ny {
            for col in 0..geometry.nx {
                values.push(synthetic_value(variable, lead, row, col));
            }
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{small_coords, SMALL_GEOMETRY};

    #[test]
    fn test_synthetic_grid_matches_values() {
        let coords = small_coords();
        let grid = synthetic_grid("t2m", 7, SMALL_GEOMETRY, &coords);
        assert_eq!(grid.values.len(), SMALL_GEOMETRY.points());
        assert_eq!(grid.values[SMALL_GEOMETRY.nx + 2], synthetic_value("t2m", 7, 1, 2));
        assert_eq!(grid.y.len(), SMALL_GEOMETRY.ny);
    }

    #[test]
    fn test_variables_differ() {
        assert_ne!(synthetic_value("tp", 1, 0, 0), synthetic_value("tcc", 1, 0, 0));
    }
}
