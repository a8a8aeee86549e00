//! Pipeline configuration.
//!
//! Geometry and chunking are static reference data validated once at
//! startup; they are never recomputed from observed data volume.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;
use zarr_store::StoreConfig;

use crate::cycle::HorizonClass;
use crate::error::{IngestError, Result};

/// Dataset identifier and published store name stem.
pub const DATASET_ID: &str = "noaa-nbm-conus-forecast";

/// Lower bound of the advisory compressed chunk size window.
pub const TARGET_CHUNK_MIN_BYTES: u64 = 3_000_000;

/// Upper bound of the advisory compressed chunk size window.
pub const TARGET_CHUNK_MAX_BYTES: u64 = 5_000_000;

/// Compression ratio assumed when estimating compressed chunk sizes.
pub const ASSUMED_COMPRESSION_RATIO: f64 = 4.5;

/// Spatial grid size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub ny: usize,
    pub nx: usize,
}

impl Default for GridGeometry {
    /// NBM CONUS 2.5 km grid.
    fn default() -> Self {
        Self { ny: 1597, nx: 2345 }
    }
}

impl GridGeometry {
    pub fn points(&self) -> usize {
        self.ny * self.nx
    }
}

/// Chunk lengths per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkScheme {
    /// Chunk along `lead_time`; `None` spans the full dimension.
    pub lead_time: Option<u64>,
    pub y: u64,
    pub x: u64,
}

impl Default for ChunkScheme {
    fn default() -> Self {
        Self {
            lead_time: None,
            y: 266,
            x: 391,
        }
    }
}

impl ChunkScheme {
    /// Chunk length along `lead_time` for a horizon.
    pub fn lead_time_chunk(&self, horizon: HorizonClass) -> u64 {
        self.lead_time.unwrap_or(horizon.len() as u64)
    }

    /// Estimated compressed bytes of one full chunk.
    pub fn estimated_chunk_bytes(&self, horizon: HorizonClass) -> u64 {
        let elements = self.lead_time_chunk(horizon) * self.y * self.x;
        let raw = elements * std::mem::size_of::<f32>() as u64;
        (raw as f64 / ASSUMED_COMPRESSION_RATIO) as u64
    }

    /// Validate the scheme against the grid.
    ///
    /// Structural problems are errors. A chunk size estimate outside the
    /// advisory window only logs a warning.
    pub fn validate(&self, geometry: &GridGeometry) -> Result<()> {
        if self.y == 0 || self.x == 0 || self.lead_time == Some(0) {
            return Err(IngestError::InvalidConfig(
                "chunk lengths must be non-zero".to_string(),
            ));
        }
        if self.y > geometry.ny as u64 || self.x > geometry.nx as u64 {
            return Err(IngestError::InvalidConfig(format!(
                "chunk {}x{} exceeds grid {}x{}",
                self.y, self.x, geometry.ny, geometry.nx
            )));
        }
        if let Some(lead) = self.lead_time {
            if lead > HorizonClass::Partial.len() as u64 {
                return Err(IngestError::InvalidConfig(format!(
                    "lead_time chunk {} exceeds the partial horizon",
                    lead
                )));
            }
        }

        for horizon in [HorizonClass::Full, HorizonClass::Partial] {
            let estimate = self.estimated_chunk_bytes(horizon);
            if !(TARGET_CHUNK_MIN_BYTES..=TARGET_CHUNK_MAX_BYTES).contains(&estimate) {
                warn!(
                    horizon = %horizon,
                    estimated_bytes = estimate,
                    min = TARGET_CHUNK_MIN_BYTES,
                    max = TARGET_CHUNK_MAX_BYTES,
                    "Estimated chunk size outside the target window"
                );
            }
        }

        Ok(())
    }
}

/// Configuration of the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root directory holding `versions/`, the published link and `catalog/`.
    pub output_dir: PathBuf,

    /// Dataset identifier; also the published store name.
    pub dataset_id: String,

    pub geometry: GridGeometry,

    pub chunks: ChunkScheme,

    /// Compression settings.
    pub store: StoreConfig,

    /// Number of variables fetched and written concurrently.
    pub parallel_variables: usize,

    /// Hours subtracted from the trigger time before resolving the cycle.
    pub delay_hours: u32,

    /// Superseded store versions kept for readers still holding them.
    pub retain_superseded: usize,

    /// Age after which an on-disk publish lock is considered abandoned.
    pub stale_lock_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./data"),
            dataset_id: DATASET_ID.to_string(),
            geometry: GridGeometry::default(),
            chunks: ChunkScheme::default(),
            store: StoreConfig::default(),
            parallel_variables: 2,
            delay_hours: 0,
            retain_superseded: 1,
            stale_lock_secs: 3600,
        }
    }
}

impl PipelineConfig {
    /// Parse a YAML document. Missing fields take their defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| IngestError::InvalidConfig(format!("invalid YAML: {}", e)))
    }

    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        let mut config = Self {
            store: StoreConfig::from_env(),
            ..Self::default()
        };
        config.apply_env();
        config
    }

    /// Override fields from environment variables where set.
    pub fn apply_env(&mut self) {
        if let Ok(val) = env::var("NBM_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("NBM_DATASET_ID") {
            self.dataset_id = val;
        }
        if let Some(n) = parse_env("NBM_PARALLEL_VARIABLES") {
            self.parallel_variables = n;
        }
        if let Some(h) = parse_env("NBM_DELAY_HOURS") {
            self.delay_hours = h;
        }
        if let Some(n) = parse_env("NBM_RETAIN_SUPERSEDED") {
            self.retain_superseded = n;
        }
        if let Some(s) = parse_env("NBM_STALE_LOCK_SECS") {
            self.stale_lock_secs = s;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.dataset_id.is_empty() || self.dataset_id.contains('/') {
            return Err(IngestError::InvalidConfig(format!(
                "dataset_id '{}' must be a plain name",
                self.dataset_id
            )));
        }
        if self.parallel_variables == 0 {
            return Err(IngestError::InvalidConfig(
                "parallel_variables must be at least 1".to_string(),
            ));
        }
        if self.geometry.ny == 0 || self.geometry.nx == 0 {
            return Err(IngestError::InvalidConfig(
                "grid geometry must be non-empty".to_string(),
            ));
        }
        self.store.validate().map_err(IngestError::InvalidConfig)?;
        self.chunks.validate(&self.geometry)
    }

    /// Directory holding every written store version.
    pub fn versions_dir(&self) -> PathBuf {
        self.output_dir.join("versions")
    }

    /// Published name readers open.
    pub fn published_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.zarr", self.dataset_id))
    }

    /// Directory receiving the catalog documents.
    pub fn catalog_dir(&self) -> PathBuf {
        self.output_dir.join("catalog")
    }

    /// On-disk publish lock.
    pub fn lock_path(&self) -> PathBuf {
        self.output_dir.join(".publish.lock")
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
