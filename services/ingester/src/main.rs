//! NBM ingester service.
//!
//! Each hour resolves the forecast cycle for the trigger time, reads its
//! decoded grids from the spool directory and publishes a fresh Zarr store.

mod config;
mod spool;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, DurationRound, Utc};
use clap::Parser;
use ingestion::{GridSource, Pipeline};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use spool::SpoolSource;

#[derive(Parser, Debug)]
#[command(name = "ingester")]
#[command(about = "Rolling NBM CONUS forecast ingester")]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "NBM_CONFIG")]
    config: Option<PathBuf>,

    /// Output root (overrides the configuration file)
    #[arg(short, long, env = "NBM_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Directory the decoder writes grids into
    #[arg(long, env = "NBM_SPOOL_DIR", default_value = "./spool")]
    spool_dir: PathBuf,

    /// Run once and exit (vs hourly triggering)
    #[arg(long)]
    once: bool,

    /// Trigger time for a single run (RFC 3339); implies --once
    #[arg(long)]
    at: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format: json or pretty
    #[arg(long, default_value = "json", env = "LOG_FORMAT")]
    log_format: String,

    /// Serve Prometheus metrics on this address (e.g. 0.0.0.0:9102)
    #[arg(long, env = "NBM_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args.log_level, &args.log_format);

    if let Some(addr) = args.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(addr = %addr, "Prometheus metrics exporter initialized");
    }

    info!("Starting NBM ingester");

    let mut config = config::load_config(args.config.as_deref())?;
    if let Some(output_dir) = &args.output_dir {
        config.output_dir = output_dir.clone();
    }
    info!(
        output_dir = %config.output_dir.display(),
        spool_dir = %args.spool_dir.display(),
        dataset = %config.dataset_id,
        parallel_variables = config.parallel_variables,
        "Loaded configuration"
    );

    let source: Arc<dyn GridSource> = Arc::new(SpoolSource::new(&args.spool_dir));
    let pipeline = Pipeline::new(config, source).context("Failed to initialise pipeline")?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Shutdown requested");
                cancel.cancel();
            }
        });
    }

    if let Some(at) = &args.at {
        let now = DateTime::parse_from_rfc3339(at)
            .with_context(|| format!("Invalid --at time: {}", at))?
            .with_timezone(&Utc);
        return run_once(&pipeline, now, &cancel).await;
    }

    if args.once {
        return run_once(&pipeline, Utc::now(), &cancel).await;
    }

    run_hourly(&pipeline, &cancel).await;
    Ok(())
}

fn init_tracing(log_level: &str, log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if log_format.eq_ignore_ascii_case("pretty") {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .pretty()
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .json()
            .init();
    }
}

/// Single run; deferred runs (cycle not yet available, lock busy) exit cleanly.
async fn run_once(pipeline: &Pipeline, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<()> {
    match pipeline.run(now, cancel).await {
        Ok(report) => {
            info!(report = %serde_json::to_string(&report)?, "Run report");
            Ok(())
        }
        Err(e) if e.is_recoverable() => {
            info!(kind = e.kind(), "No update this hour");
            Ok(())
        }
        Err(e) => Err(e).context("Ingestion run failed"),
    }
}

/// Trigger a run at the top of every hour until cancelled.
async fn run_hourly(pipeline: &Pipeline, cancel: &CancellationToken) {
    info!("Starting hourly triggering");
    loop {
        let now = Utc::now();
        if let Err(e) = pipeline.run(now, cancel).await {
            if !e.is_recoverable() {
                error!(error = %e, kind = e.kind(), "Run failed");
            }
        }

        let wait = until_next_hour(Utc::now());
        info!(sleep_secs = wait.as_secs(), "Sleeping until next trigger");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }
    info!("Ingester stopped");
}

/// Time from `now` to the next top of the hour.
fn until_next_hour(now: DateTime<Utc>) -> std::time::Duration {
    let next = now
        .duration_trunc(Duration::hours(1))
        .map(|hour| hour + Duration::hours(1))
        .unwrap_or(now + Duration::hours(1));
    (next - now).to_std().unwrap_or_default()
}
