//! One ingestion run: resolve, fetch, assemble, write, promote, catalog.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use zarr_store::{StoreReader, StoreSchema, StoreWriter};

use crate::assembler::GridAssembler;
use crate::catalog::CatalogEmitter;
use crate::config::PipelineConfig;
use crate::cycle::{CycleResolver, ForecastCycle};
use crate::error::{IngestError, Result};
use crate::publisher::{
    PublishLock, PublishState, PublishedReference, RollingPublisher, SymlinkReference,
};
use crate::schema::{coordinate_values, dimension_differences, generation_attributes, StorePlanner};
use crate::source::{GridSource, SpatialCoords};
use crate::variables::nbm_variables;

/// Outcome of catalog emission after a promotion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CatalogStatus {
    Emitted,
    Stale { reason: String },
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub cycle: ForecastCycle,
    pub state: PublishState,
    pub published: PathBuf,
    pub previous: Option<PathBuf>,
    pub variables: usize,
    pub bytes_written: u64,
    pub catalog: CatalogStatus,
    pub elapsed_ms: u64,
}

/// Result of one variable task.
#[derive(Debug)]
struct VariableWrite {
    variable: String,
    bytes_written: u64,
    coords: SpatialCoords,
}

/// Wires the components for ingestion runs against one output root.
pub struct Pipeline {
    config: PipelineConfig,
    source: Arc<dyn GridSource>,
    resolver: CycleResolver,
    planner: StorePlanner,
    publisher: Arc<RollingPublisher>,
    catalog: CatalogEmitter,
}

impl Pipeline {
    /// Pipeline publishing through a symlink at the configured published path.
    pub fn new(config: PipelineConfig, source: Arc<dyn GridSource>) -> Result<Self> {
        let reference = Arc::new(SymlinkReference::new(config.published_path()));
        Self::with_reference(config, source, reference)
    }

    /// Pipeline publishing through an injected reference holder.
    pub fn with_reference(
        config: PipelineConfig,
        source: Arc<dyn GridSource>,
        reference: Arc<dyn PublishedReference>,
    ) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(config.versions_dir())?;

        let lock = PublishLock::new(
            config.lock_path(),
            Duration::from_secs(config.stale_lock_secs),
        );
        let publisher = RollingPublisher::new(
            reference.clone(),
            lock,
            config.versions_dir(),
            config.retain_superseded,
        );
        let catalog = CatalogEmitter::new(reference.published_path(), config.catalog_dir());

        Ok(Self {
            resolver: CycleResolver::new(config.delay_hours),
            planner: StorePlanner::new(&config),
            publisher: Arc::new(publisher),
            catalog,
            source,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &CatalogEmitter {
        &self.catalog
    }

    /// Store the published name currently resolves to.
    pub fn current_version(&self) -> Result<Option<PathBuf>> {
        self.publisher.reference().current()
    }

    /// Resolve the cycle for trigger time `now` and ingest it.
    pub async fn run(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<RunReport> {
        let cycle = self.resolver.resolve(now);
        self.run_cycle(cycle, cancel).await
    }

    /// Ingest `cycle` and promote the result.
    #[instrument(skip(self, cancel), fields(cycle = %cycle, horizon = %cycle.horizon))]
    pub async fn run_cycle(
        &self,
        cycle: ForecastCycle,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let start = Instant::now();
        info!(lead_times = cycle.horizon.len(), "Starting ingestion run");

        let result = self.ingest(cycle, cancel, start).await;
        record_run_metrics(&cycle, &result, start);
        match &result {
            Ok(report) => info!(
                variables = report.variables,
                bytes = report.bytes_written,
                elapsed_ms = report.elapsed_ms,
                published = %report.published.display(),
                "Ingestion run complete"
            ),
            Err(e) if e.is_recoverable() => warn!(
                error = %e,
                kind = e.kind(),
                "Ingestion run deferred; published store unchanged"
            ),
            Err(e) => error!(
                error = %e,
                kind = e.kind(),
                "Ingestion run failed; published store unchanged"
            ),
        }
        result
    }

    async fn ingest(
        &self,
        cycle: ForecastCycle,
        cancel: &CancellationToken,
        start: Instant,
    ) -> Result<RunReport> {
        check_cancelled(cancel)?;
        self.source.check_available(&cycle).await?;
        check_cancelled(cancel)?;

        let schema = self.planner.plan(&cycle)?;
        self.compare_with_published(&schema);

        let staging = self.publisher.staging_path(&cycle);
        let writer = StoreWriter::create(&staging, schema.clone(), self.config.store.clone())
            .map_err(|e| IngestError::write_failure("store", e))?;
        debug!(staging = %staging.display(), "Staging store created");

        let bytes_written = match self.stage(&cycle, Arc::new(writer), cancel).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.publisher.discard(&staging);
                return Err(e);
            }
        };

        // last point at which cancellation is honoured
        if let Err(e) = check_cancelled(cancel) {
            self.publisher.discard(&staging);
            return Err(e);
        }

        let outcome = {
            let publisher = self.publisher.clone();
            let staging = staging.clone();
            tokio::task::spawn_blocking(move || publisher.publish(&staging, &schema, &cycle))
                .await
                .map_err(|e| IngestError::PublishAborted(format!("publish task failed: {}", e)))??
        };

        let catalog = self.emit_catalog().await;

        Ok(RunReport {
            cycle,
            state: outcome.state,
            published: outcome.published,
            previous: outcome.previous,
            variables: nbm_variables().len(),
            bytes_written,
            catalog,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Write every variable, then the coordinates and group attributes.
    async fn stage(
        &self,
        cycle: &ForecastCycle,
        writer: Arc<StoreWriter>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let assembler = GridAssembler::new(*cycle, self.planner.geometry());

        let tasks = nbm_variables().iter().enumerate().map(|(index, var)| {
            let writer = writer.clone();
            let assembler = &assembler;
            async move {
                let result = self
                    .ingest_variable(cycle, assembler, writer, var.id, cancel)
                    .await;
                (index, result)
            }
        });

        let mut results: Vec<(usize, Result<VariableWrite>)> = stream::iter(tasks)
            .buffer_unordered(self.config.parallel_variables)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        let mut writes = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (_, result) in results {
            match result {
                Ok(write) => writes.push(write),
                Err(e) => {
                    if !matches!(e, IngestError::Cancelled) {
                        warn!(error = %e, kind = e.kind(), "Variable failed");
                    }
                    first_error.get_or_insert(e);
                }
            }
        }
        check_cancelled(cancel)?;
        if let Some(e) = first_error {
            return Err(e);
        }

        let coords = match writes.split_first() {
            Some((first, rest)) => {
                if let Some(other) = rest.iter().find(|w| w.coords != first.coords) {
                    return Err(IngestError::incomplete(
                        other.variable.as_str(),
                        Vec::new(),
                        format!(
                            "projection coordinates differ from {}",
                            first.variable
                        ),
                    ));
                }
                first.coords.clone()
            }
            None => {
                return Err(IngestError::InvalidConfig(
                    "no variables to ingest".to_string(),
                ))
            }
        };

        let bytes_written: u64 = writes.iter().map(|w| w.bytes_written).sum();

        let cycle = *cycle;
        tokio::task::spawn_blocking(move || {
            for (name, values) in coordinate_values(&cycle, &coords) {
                writer
                    .write_coordinate(name, &values)
                    .map_err(|e| IngestError::write_failure(name, e))?;
            }
            writer
                .finalize(generation_attributes(Utc::now()))
                .map_err(|e| IngestError::write_failure("attributes", e))
        })
        .await
        .map_err(|e| IngestError::write_failure("coordinates", e))??;

        info!(bytes = bytes_written, "All variables written");
        Ok(bytes_written)
    }

    /// Fetch, assemble and write one variable.
    #[instrument(skip(self, cycle, assembler, writer, cancel), fields(variable = %variable))]
    async fn ingest_variable(
        &self,
        cycle: &ForecastCycle,
        assembler: &GridAssembler,
        writer: Arc<StoreWriter>,
        variable: &'static str,
        cancel: &CancellationToken,
    ) -> Result<VariableWrite> {
        let lead_times = cycle.lead_times();
        let mut grids = Vec::with_capacity(lead_times.len());
        for lead_hour in lead_times {
            check_cancelled(cancel)?;
            grids.push(self.source.fetch(cycle, variable, lead_hour).await?);
        }

        let array = assembler.assemble(variable, grids)?;
        check_cancelled(cancel)?;

        let coords = array.coords.clone();
        let written = tokio::task::spawn_blocking(move || {
            writer.write_array(&array.variable, array.values)
        })
        .await
        .map_err(|e| IngestError::write_failure(variable, e))?
        .map_err(|e| IngestError::write_failure(variable, e))?;

        debug!(
            elements = written.elements,
            bytes = written.bytes_written,
            keepbits = ?written.keepbits,
            "Variable written"
        );

        Ok(VariableWrite {
            variable: variable.to_string(),
            bytes_written: written.bytes_written,
            coords,
        })
    }

    /// Log when the planned dimensions differ from the published store.
    fn compare_with_published(&self, schema: &StoreSchema) {
        let published = self.publisher.reference().published_path();
        if !published.exists() {
            debug!("No published store yet");
            return;
        }
        match StoreReader::open(&published) {
            Ok(reader) => {
                let diffs = dimension_differences(schema, &reader);
                if !diffs.is_empty() {
                    info!(differences = ?diffs, "Planned dimensions differ from the published store");
                }
            }
            Err(e) => warn!(error = %e, "Published store could not be opened for comparison"),
        }
    }

    async fn emit_catalog(&self) -> CatalogStatus {
        let emitter = self.catalog.clone();
        let result = tokio::task::spawn_blocking(move || emitter.emit(Utc::now()))
            .await
            .map_err(|e| IngestError::CatalogStale(e.to_string()))
            .and_then(|r| r);

        match result {
            Ok(_) => CatalogStatus::Emitted,
            Err(e) => {
                warn!(error = %e, "Catalog not updated");
                CatalogStatus::Stale {
                    reason: e.to_string(),
                }
            }
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("output_dir", &self.config.output_dir)
            .field("dataset_id", &self.config.dataset_id)
            .finish()
    }
}

fn record_run_metrics(cycle: &ForecastCycle, result: &Result<RunReport>, start: Instant) {
    histogram!("nbm_ingest_run_duration_seconds").record(start.elapsed().as_secs_f64());
    match result {
        Ok(report) => {
            counter!("nbm_ingest_runs_total", "outcome" => "promoted").increment(1);
            counter!("nbm_ingest_bytes_written_total").increment(report.bytes_written);
            gauge!("nbm_published_init_time_seconds").set(cycle.init_time.timestamp() as f64);
            if let CatalogStatus::Stale { .. } = report.catalog {
                counter!("nbm_catalog_stale_total").increment(1);
            }
        }
        Err(e) => counter!("nbm_ingest_runs_total", "outcome" => e.kind()).increment(1),
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(IngestError::Cancelled)
    } else {
        Ok(())
    }
}

