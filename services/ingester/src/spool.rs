//! Spool directory grid source.
//!
//! The external GRIB2 decoder drops each cycle into
//! `<spool>/<YYYYMMDD>/<HH>/`:
//!
//! ```text
//! coords.json          {"y": [...], "x": [...]}   projection metres
//! <var>/f<LLL>.f32     ny * nx little-endian float32, south row first
//! _READY               written last, once every grid is in place
//! ```

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use ingestion::cycle::NOMADS_BASE_URL;
use ingestion::{DecodedGrid, ForecastCycle, GridSource, IngestError, Result, SpatialCoords};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

const READY_MARKER: &str = "_READY";
const COORDS_FILE: &str = "coords.json";

#[derive(Debug, Deserialize)]
struct CoordsFile {
    y: Vec<f64>,
    x: Vec<f64>,
}

/// [`GridSource`] reading decoded grids from a local spool directory.
#[derive(Debug)]
pub struct SpoolSource {
    root: PathBuf,
    /// Axes of the most recently fetched cycle, keyed by cycle id.
    coords: RwLock<Option<(String, SpatialCoords)>>,
}

impl SpoolSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            coords: RwLock::new(None),
        }
    }

    /// Directory holding one cycle's grids.
    pub fn cycle_dir(&self, cycle: &ForecastCycle) -> PathBuf {
        self.root
            .join(cycle.date_str())
            .join(format!("{:02}", cycle.hour()))
    }

    /// File holding one decoded grid.
    pub fn grid_path(&self, cycle: &ForecastCycle, variable: &str, lead_hour: u32) -> PathBuf {
        self.cycle_dir(cycle)
            .join(variable)
            .join(format!("f{:03}.f32", lead_hour))
    }

    async fn spatial_coords(&self, cycle: &ForecastCycle) -> Result<SpatialCoords> {
        let id = cycle.id();
        if let Some((cached, coords)) = self.coords.read().await.as_ref() {
            if *cached == id {
                return Ok(coords.clone());
            }
        }

        let path = self.cycle_dir(cycle).join(COORDS_FILE);
        let content = tokio::fs::read(&path).await.map_err(|e| {
            IngestError::CycleUnavailable {
                cycle: cycle.id(),
                reason: format!("{}: {}", path.display(), e),
            }
        })?;
        let parsed: CoordsFile = serde_json::from_slice(&content).map_err(|e| {
            IngestError::CycleUnavailable {
                cycle: cycle.id(),
                reason: format!("{}: {}", path.display(), e),
            }
        })?;
        let coords = SpatialCoords {
            y: parsed.y,
            x: parsed.x,
        };

        // replaces the previous cycle's axes
        *self.coords.write().await = Some((id, coords.clone()));
        Ok(coords)
    }
}

#[async_trait]
impl GridSource for SpoolSource {
    async fn check_available(&self, cycle: &ForecastCycle) -> Result<()> {
        let marker = self.cycle_dir(cycle).join(READY_MARKER);
        match tokio::fs::metadata(&marker).await {
            Ok(_) => {
                debug!(cycle = %cycle, dir = %self.cycle_dir(cycle).display(), "Spool cycle ready");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let first = cycle.source_file(1);
                Err(IngestError::CycleUnavailable {
                    cycle: cycle.id(),
                    reason: format!(
                        "{} not present; decoder has not finished {}",
                        marker.display(),
                        first.url(NOMADS_BASE_URL)
                    ),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch(
        &self,
        cycle: &ForecastCycle,
        variable: &str,
        lead_hour: u32,
    ) -> Result<DecodedGrid> {
        let coords = self.spatial_coords(cycle).await?;
        let path = self.grid_path(cycle, variable, lead_hour);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(IngestError::incomplete(
                    variable,
                    vec![lead_hour],
                    format!(
                        "no decoded grid at {} (from {})",
                        path.display(),
                        cycle.source_file(lead_hour).file_name()
                    ),
                ))
            }
            Err(e) => return Err(e.into()),
        };

        let values = decode_f32_le(&bytes).ok_or_else(|| {
            IngestError::incomplete(
                variable,
                vec![lead_hour],
                format!("{} is not a float32 grid ({} bytes)", path.display(), bytes.len()),
            )
        })?;

        let (ny, nx) = coords.shape();
        Ok(DecodedGrid {
            variable: variable.to_string(),
            lead_hour,
            ny,
            nx,
            values,
            y: coords.y,
            x: coords.x,
        })
    }
}

/// Decode little-endian float32 samples; `None` if the length is ragged.
fn decode_f32_le(bytes: &[u8]) -> Option<Vec<f32>> {
    let words: &[[u8; 4]] = bytemuck::try_cast_slice(bytes).ok()?;
    Some(words.iter().map(|w| f32::from_le_bytes(*w)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::path::Path;

    fn cycle() -> ForecastCycle {
        ForecastCycle::resolve(Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap())
    }

    fn write_spool_grid(path: &Path, values: &[f32]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        std::fs::write(path, bytes)
    }

    fn spool_cycle(root: &Path, cycle: &ForecastCycle) -> SpoolSource {
        let source = SpoolSource::new(root);
        let dir = source.cycle_dir(cycle);
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(dir.join(COORDS_FILE), r#"{"y": [0.0, 2539.7], "x": [10.0, 20.0, 30.0]}"#)
            .expect("coords");
        source
    }

    #[test]
    fn test_paths() {
        let source = SpoolSource::new("/spool");
        let c = cycle();
        assert_eq!(source.cycle_dir(&c), PathBuf::from("/spool/20240601/06"));
        assert_eq!(
            source.grid_path(&c, "t2m", 7),
            PathBuf::from("/spool/20240601/06/t2m/f007.f32")
        );
    }

    #[test]
    fn test_decode_ragged() {
        assert_eq!(decode_f32_le(&1.5f32.to_le_bytes()), Some(vec![1.5]));
        assert_eq!(decode_f32_le(&[0, 0, 0]), None);
    }

    #[tokio::test]
    async fn test_unavailable_without_marker() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let c = cycle();
        let source = spool_cycle(temp_dir.path(), &c);

        let err = source.check_available(&c).await.expect_err("no marker");
        assert!(matches!(err, IngestError::CycleUnavailable { .. }));
        assert!(err.is_recoverable());

        std::fs::write(source.cycle_dir(&c).join(READY_MARKER), "").expect("marker");
        assert!(source.check_available(&c).await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_grid() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let c = cycle();
        let source = spool_cycle(temp_dir.path(), &c);
        let values = [280.5f32, 281.0, 281.5, 282.0, 282.5, 283.0];
        write_spool_grid(&source.grid_path(&c, "t2m", 3), &values).expect("grid");

        let grid = source.fetch(&c, "t2m", 3).await.expect("grid decodes");
        assert_eq!((grid.ny, grid.nx), (2, 3));
        assert_eq!(grid.values, values.to_vec());
        assert_eq!(grid.x, vec![10.0, 20.0, 30.0]);
    }

    #[tokio::test]
    async fn test_coords_cached_for_current_cycle_only() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let first = cycle();
        let second = ForecastCycle::resolve(Utc.with_ymd_and_hms(2024, 6, 1, 7, 0, 0).unwrap());
        let source = spool_cycle(temp_dir.path(), &first);
        let dir = source.cycle_dir(&second);
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(dir.join(COORDS_FILE), r#"{"y": [5.0], "x": [1.0, 2.0]}"#)
            .expect("coords");

        source.spatial_coords(&first).await.expect("first coords");
        source.spatial_coords(&second).await.expect("second coords");
        {
            let cached = source.coords.read().await;
            let (id, coords) = cached.as_ref().expect("cached");
            assert_eq!(id, &second.id());
            assert_eq!(coords.shape(), (1, 2));
        }

        // first cycle is re-read from disk, not served stale
        std::fs::remove_file(source.cycle_dir(&first).join(COORDS_FILE)).expect("rm coords");
        let err = source.spatial_coords(&first).await.expect_err("evicted");
        assert!(matches!(err, IngestError::CycleUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_missing_grid_is_incomplete() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let c = cycle();
        let source = spool_cycle(temp_dir.path(), &c);

        let err = source.fetch(&c, "tp", 84).await.expect_err("missing grid");
        match err {
            IngestError::IncompleteVariable {
                variable,
                lead_times,
                reason,
            } => {
                assert_eq!(variable, "tp");
                assert_eq!(lead_times, vec![84]);
                assert!(reason.contains("blend.t06z.core.f084.co.grib2"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_pipeline_from_spool() {
        use ingestion::{nbm_variables, ChunkScheme, GridGeometry, Pipeline, PipelineConfig};
        use std::sync::Arc;
        use tokio_util::sync::CancellationToken;

        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let spool = temp_dir.path().join("spool");
        let c = ForecastCycle::resolve(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap());
        let source = spool_cycle(&spool, &c);

        for var in nbm_variables() {
            for lead in c.lead_times() {
                let values: Vec<f32> = (0..6).map(|i| lead as f32 + i as f32 * 0.5).collect();
                write_spool_grid(&source.grid_path(&c, var.id, lead), &values).expect("grid");
            }
        }
        std::fs::write(source.cycle_dir(&c).join(READY_MARKER), "").expect("marker");

        let config = PipelineConfig {
            output_dir: temp_dir.path().join("out"),
            geometry: GridGeometry { ny: 2, nx: 3 },
            chunks: ChunkScheme {
                lead_time: None,
                y: 1,
                x: 2,
            },
            ..PipelineConfig::default()
        };
        let published = config.published_path();
        let pipeline = Pipeline::new(config, Arc::new(source)).expect("pipeline");

        let report = pipeline
            .run_cycle(c, &CancellationToken::new())
            .await
            .expect("spool run succeeds");
        assert_eq!(report.variables, 19);
        assert!(published.join("zarr.json").exists());
    }
}
