//! Catalog emission.
//!
//! Derives a summary of the published store (identity, size, dimensions,
//! variables, cycle) and writes it as an intake-style `catalog.json` plus a
//! Markdown `README.md`. Only the published store is read; nothing is
//! mutated. Any failure is reported as `CatalogStale` and leaves the
//! previous catalog in place.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;
use zarr_store::{CoordinateValues, StoreReader};

use crate::error::{IngestError, Result};
use crate::schema::DIMENSIONS;

/// One data variable in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogVariable {
    pub name: String,
    pub long_name: String,
    pub units: String,
    pub keepbits: Option<u32>,
}

/// Summary of the currently published store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub dataset_id: String,
    pub title: String,
    pub description: String,
    pub provider: String,
    pub model: String,
    pub variant: String,
    pub version: String,
    /// Published store location.
    pub urlpath: String,
    pub size_bytes: u64,
    pub dimensions: BTreeMap<String, u64>,
    pub variables: Vec<CatalogVariable>,
    pub init_time: DateTime<Utc>,
    pub horizon: String,
    pub lead_times: Vec<u32>,
    pub valid_time_start: DateTime<Utc>,
    pub valid_time_end: DateTime<Utc>,
    /// (min_lon, min_lat, max_lon, max_lat)
    pub geographic_bounds: Option<[f64; 4]>,
    /// When the store was written.
    pub generated_at: Option<String>,
}

/// Intake-style catalog document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub sources: BTreeMap<String, CatalogSource>,
    pub metadata: CatalogMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSource {
    pub driver: String,
    pub description: String,
    pub metadata: CatalogEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogMetadata {
    pub version: u32,
    pub description: String,
    pub generated_at: DateTime<Utc>,
}

/// Writes catalog documents for a published store.
#[derive(Debug, Clone)]
pub struct CatalogEmitter {
    published_path: PathBuf,
    catalog_dir: PathBuf,
}

impl CatalogEmitter {
    pub fn new(published_path: impl Into<PathBuf>, catalog_dir: impl Into<PathBuf>) -> Self {
        Self {
            published_path: published_path.into(),
            catalog_dir: catalog_dir.into(),
        }
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.catalog_dir.join("catalog.json")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.catalog_dir.join("README.md")
    }

    /// Derive the entry and write both documents.
    #[instrument(skip(self), fields(published = %self.published_path.display()))]
    pub fn emit(&self, now: DateTime<Utc>) -> Result<CatalogEntry> {
        let entry = derive_entry(&self.published_path).map_err(IngestError::CatalogStale)?;

        let mut sources = BTreeMap::new();
        sources.insert(
            entry.dataset_id.clone(),
            CatalogSource {
                driver: "zarr".to_string(),
                description: entry.description.clone(),
                metadata: entry.clone(),
            },
        );
        let document = CatalogDocument {
            sources,
            metadata: CatalogMetadata {
                version: 1,
                description: "NBM forecast data in Zarr format".to_string(),
                generated_at: now,
            },
        };

        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| IngestError::CatalogStale(e.to_string()))?;
        self.write_atomic(&self.catalog_path(), json.as_bytes())?;
        self.write_atomic(&self.summary_path(), render_summary(&entry, now).as_bytes())?;

        info!(
            dataset = %entry.dataset_id,
            cycle = %entry.init_time,
            variables = entry.variables.len(),
            bytes = entry.size_bytes,
            "Catalog emitted"
        );
        Ok(entry)
    }

    /// Read the current catalog entry back, if any.
    pub fn load(&self) -> Result<Option<CatalogEntry>> {
        let path = self.catalog_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let document: CatalogDocument = serde_json::from_str(&content)
            .map_err(|e| IngestError::CatalogStale(e.to_string()))?;
        Ok(document.sources.into_values().next().map(|s| s.metadata))
    }

    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<()> {
        let stale = |e: std::io::Error| IngestError::CatalogStale(format!("{}: {}", path.display(), e));

        fs::create_dir_all(&self.catalog_dir).map_err(stale)?;
        let tmp = self
            .catalog_dir
            .join(format!(".{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, content).map_err(stale)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(stale(e));
        }
        Ok(())
    }
}

/// Derive a catalog entry from the store at `published`.
pub fn derive_entry(published: &Path) -> std::result::Result<CatalogEntry, String> {
    if !published.exists() {
        return Err(format!("published store {} is absent", published.display()));
    }
    let reader = StoreReader::open(published).map_err(|e| e.to_string())?;
    let attrs = reader.attributes();
    let text = |key: &str| {
        attrs
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let mut dimensions = BTreeMap::new();
    for dim in DIMENSIONS {
        let info = reader.array_info(dim).map_err(|e| e.to_string())?;
        let size = info.shape.first().copied().unwrap_or(0);
        dimensions.insert(dim.to_string(), size);
    }

    let init_time = match reader.read_coordinate("init_time").map_err(|e| e.to_string())? {
        CoordinateValues::Int64(v) if v.len() == 1 => DateTime::from_timestamp(v[0], 0)
            .ok_or_else(|| format!("init_time {} out of range", v[0]))?,
        other => return Err(format!("unexpected init_time coordinate {:?}", other)),
    };

    let lead_times: Vec<u32> = reader
        .read_coordinate("lead_time")
        .map_err(|e| e.to_string())?
        .to_f64()
        .into_iter()
        .map(|h| h as u32)
        .collect();
    let first = lead_times.first().copied().unwrap_or(0);
    let last = lead_times.last().copied().unwrap_or(0);

    let mut variables = Vec::new();
    for name in reader.array_names().map_err(|e| e.to_string())? {
        if DIMENSIONS.contains(&name.as_str()) {
            continue;
        }
        let info = reader.array_info(&name).map_err(|e| e.to_string())?;
        let attr = |key: &str| {
            info.attributes
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        variables.push(CatalogVariable {
            long_name: attr("long_name").unwrap_or_else(|| name.clone()),
            units: attr("units").unwrap_or_default(),
            keepbits: info
                .attributes
                .get("keepbits")
                .and_then(Value::as_u64)
                .map(|b| b as u32),
            name,
        });
    }

    let geographic_bounds = attrs
        .get("geographic_bounds")
        .and_then(Value::as_array)
        .and_then(|b| {
            let v: Vec<f64> = b.iter().filter_map(Value::as_f64).collect();
            <[f64; 4]>::try_from(v).ok()
        });

    let dataset_id = match text("id") {
        id if id.is_empty() => published
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        id => id,
    };

    Ok(CatalogEntry {
        dataset_id,
        title: text("title"),
        description: text("description"),
        provider: text("provider"),
        model: text("model"),
        variant: text("variant"),
        version: text("version"),
        urlpath: published.display().to_string(),
        size_bytes: reader.size_bytes(),
        dimensions,
        variables,
        init_time,
        horizon: text("horizon"),
        lead_times,
        valid_time_start: init_time + chrono::Duration::hours(i64::from(first)),
        valid_time_end: init_time + chrono::Duration::hours(i64::from(last)),
        geographic_bounds,
        generated_at: attrs
            .get("generated_at")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Human-readable byte size, e.g. `4.20 MB`.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2} PB", size)
}

/// Markdown summary of a catalog entry.
pub fn render_summary(entry: &CatalogEntry, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# NBM Data Summary\n");
    let _ = writeln!(out, "Generated: {}\n", now.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "## {}\n", entry.dataset_id);
    let _ = writeln!(out, "**Title:** {}\n", entry.title);
    let _ = writeln!(out, "**Description:** {}\n", entry.description);
    let _ = writeln!(out, "**Storage Size:** {}\n", format_size(entry.size_bytes));
    let _ = writeln!(
        out,
        "**Forecast Cycle:** {} ({} horizon)\n",
        entry.init_time.format("%Y-%m-%d %H:%M UTC"),
        entry.horizon
    );
    let _ = writeln!(
        out,
        "**Valid Times:** {} to {}\n",
        entry.valid_time_start.format("%Y-%m-%d %H:%M UTC"),
        entry.valid_time_end.format("%Y-%m-%d %H:%M UTC")
    );

    let _ = writeln!(out, "**Dimensions:**\n");
    for dim in DIMENSIONS {
        if let Some(size) = entry.dimensions.get(dim) {
            let _ = writeln!(out, "- {}: {}", dim, size);
        }
    }

    let _ = writeln!(out, "\n**Variables ({}):**\n", entry.variables.len());
    for var in &entry.variables {
        let _ = writeln!(out, "- `{}`: {} ({})", var.name, var.long_name, var.units);
    }
    out
}
