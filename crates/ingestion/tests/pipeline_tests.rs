//! End-to-end ingestion runs against a temporary output root.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use ingestion::schema::{coordinate_values, generation_attributes};
use ingestion::{
    nbm_variables, variable_spec, CatalogStatus, GridSource, IngestError, Pipeline,
    PipelineConfig, PublishLock, PublishState, RollingPublisher, StorePlanner, SymlinkReference,
};
use serde_json::json;
use test_utils::{
    assert_approx_eq, cycle_at, directory_digest, next_day_cycle_at, store_content_digest, synthetic_variable,
    small_coords, test_config, InMemorySource, SMALL_GEOMETRY,
};
use tokio_util::sync::CancellationToken;
use zarr_store::{
    quantization_step, CoordinateValues, StoreConfig, StoreReader, StoreWriter, ZarrCompression,
};

fn pipeline(config: PipelineConfig, source: InMemorySource) -> Pipeline {
    let source: Arc<dyn GridSource> = Arc::new(source);
    Pipeline::new(config, source).expect("valid pipeline")
}

fn version_count(config: &PipelineConfig) -> usize {
    fs::read_dir(config.versions_dir())
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .count()
        })
        .unwrap_or(0)
}

fn blosc_configuration(array_dir: &Path) -> serde_json::Value {
    let doc: serde_json::Value =
        serde_json::from_slice(&fs::read(array_dir.join("zarr.json")).expect("array metadata"))
            .expect("array metadata is JSON");
    doc["codecs"]
        .as_array()
        .and_then(|codecs| codecs.iter().find(|c| c["name"] == "blosc"))
        .map(|c| c["configuration"].clone())
        .expect("blosc codec present")
}

fn assert_matches_schema(published: &Path, leads: u64) {
    let reader = StoreReader::open(published).expect("published store opens");

    let names = reader.array_names().expect("list arrays");
    assert_eq!(names.len(), 19 + 4);

    let expected_shape = vec![1, leads, SMALL_GEOMETRY.ny as u64, SMALL_GEOMETRY.nx as u64];
    for var in nbm_variables() {
        let info = reader.array_info(var.id).expect("data array present");
        assert_eq!(info.shape, expected_shape, "{}", var.id);
        assert_eq!(info.chunk_shape, vec![1, leads, 5, 6], "{}", var.id);
        assert_eq!(info.dimension_names, vec!["init_time", "lead_time", "y", "x"]);
        assert_eq!(info.attributes["units"], json!(var.units));
        assert_eq!(info.attributes["keepbits"], json!(var.keepbits));
    }

    assert_eq!(reader.array_info("lead_time").expect("lead_time").shape, vec![leads]);
    assert_eq!(reader.array_info("y").expect("y").shape, vec![SMALL_GEOMETRY.ny as u64]);
    assert_eq!(reader.array_info("x").expect("x").shape, vec![SMALL_GEOMETRY.nx as u64]);
}

#[tokio::test]
async fn test_full_cycle_publishes_schema() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());
    let pipeline = pipeline(config.clone(), InMemorySource::default());

    let cycle = cycle_at(6);
    let report = pipeline
        .run_cycle(cycle, &CancellationToken::new())
        .await
        .expect("run succeeds");

    assert_eq!(report.state, PublishState::Promoted);
    assert_eq!(report.variables, 19);
    assert!(report.bytes_written > 0);
    assert_eq!(report.previous, None);
    assert_eq!(report.catalog, CatalogStatus::Emitted);

    let published = config.published_path();
    assert!(fs::symlink_metadata(&published)
        .expect("published link")
        .file_type()
        .is_symlink());
    assert_eq!(pipeline.current_version().expect("current"), Some(report.published));

    assert_matches_schema(&published, 52);

    let reader = StoreReader::open(&published).expect("open");
    let leads = reader.read_coordinate("lead_time").expect("lead_time");
    assert_eq!(
        leads,
        CoordinateValues::Int32(cycle.lead_times().into_iter().map(|h| h as i32).collect())
    );
    assert_eq!(
        reader.read_coordinate("init_time").expect("init_time"),
        CoordinateValues::Int64(vec![cycle.init_time.timestamp()])
    );
    assert_eq!(reader.attributes()["horizon"], json!("full"));
    assert!(reader.attributes().contains_key("generated_at"));
}

#[tokio::test]
async fn test_partial_cycle_replaces_full_cycle() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());
    let pipeline = pipeline(config.clone(), InMemorySource::default());
    let cancel = CancellationToken::new();

    let full = pipeline.run_cycle(cycle_at(6), &cancel).await.expect("full run");
    let partial = pipeline.run_cycle(cycle_at(8), &cancel).await.expect("partial run");

    assert_eq!(partial.previous, Some(full.published));
    assert_matches_schema(&config.published_path(), 36);

    let reader = StoreReader::open(config.published_path()).expect("open");
    assert_eq!(reader.attributes()["horizon"], json!("partial"));
    assert_eq!(
        reader.read_coordinate("lead_time").expect("lead_time"),
        CoordinateValues::Int32((1..=36).collect())
    );
}

#[tokio::test]
async fn test_trigger_time_resolves_cycle_with_delay() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = PipelineConfig {
        delay_hours: 2,
        ..test_config(temp_dir.path())
    };
    let pipeline = pipeline(config, InMemorySource::default());

    let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 40, 0).unwrap();
    let report = pipeline
        .run(now, &CancellationToken::new())
        .await
        .expect("run succeeds");

    assert_eq!(report.cycle, cycle_at(6));
    assert_eq!(report.cycle.lead_times().len(), 52);
}

#[tokio::test]
async fn test_quantized_values_within_half_step() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());
    let pipeline = pipeline(config.clone(), InMemorySource::default());

    let cycle = cycle_at(8);
    pipeline
        .run_cycle(cycle, &CancellationToken::new())
        .await
        .expect("run succeeds");

    let reader = StoreReader::open(config.published_path()).expect("open");
    for id in ["t2m", "u10m", "tp", "tcc", "sp"] {
        let keepbits = variable_spec(id).expect("known variable").keepbits;
        let expected = synthetic_variable(id, &cycle.lead_times(), SMALL_GEOMETRY);
        let stored = reader.read_f32(id).expect("read");
        assert_eq!(stored.len(), expected.len());

        for (original, read) in expected.iter().zip(&stored) {
            assert_approx_eq!(*read, *original, quantization_step(*original, keepbits) / 2.0);
        }
    }
}

#[tokio::test]
async fn test_missing_lead_time_leaves_published_store_untouched() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());
    let cancel = CancellationToken::new();

    let first = pipeline(config.clone(), InMemorySource::default());
    let published = first.run_cycle(cycle_at(0), &cancel).await.expect("first run");
    let digest_before = directory_digest(&config.published_path());
    let catalog_before = fs::read(first.catalog().catalog_path()).expect("catalog");

    // 51 of 52 grids for tp
    let short = pipeline(
        config.clone(),
        InMemorySource::default().without_grid("tp", 84),
    );
    let err = short
        .run_cycle(cycle_at(6), &cancel)
        .await
        .expect_err("incomplete variable aborts the run");

    match &err {
        IngestError::IncompleteVariable {
            variable,
            lead_times,
            ..
        } => {
            assert_eq!(variable, "tp");
            assert_eq!(lead_times, &vec![84]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!err.affects_published_data());

    assert_eq!(directory_digest(&config.published_path()), digest_before);
    assert_eq!(short.current_version().expect("current"), Some(published.published));
    assert_eq!(fs::read(short.catalog().catalog_path()).expect("catalog"), catalog_before);
    // staging store discarded
    assert_eq!(version_count(&config), 1);
}

#[tokio::test]
async fn test_rerun_with_identical_data_is_idempotent() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());
    let pipeline = pipeline(config.clone(), InMemorySource::default());
    let cancel = CancellationToken::new();

    let first = pipeline.run_cycle(cycle_at(12), &cancel).await.expect("first run");
    let second = pipeline.run_cycle(cycle_at(12), &cancel).await.expect("second run");

    assert_ne!(first.published, second.published);
    assert_eq!(second.previous.as_ref(), Some(&first.published));
    assert_eq!(
        store_content_digest(&first.published),
        store_content_digest(&second.published)
    );
}

#[tokio::test]
async fn test_changed_data_changes_content() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());
    let cancel = CancellationToken::new();

    let first = pipeline(config.clone(), InMemorySource::default())
        .run_cycle(cycle_at(12), &cancel)
        .await
        .expect("first run");
    let second = pipeline(
        config.clone(),
        InMemorySource::default().with_value_offset(3.0),
    )
    .run_cycle(cycle_at(12), &cancel)
    .await
    .expect("second run");

    assert_ne!(
        store_content_digest(&first.published),
        store_content_digest(&second.published)
    );
}

#[tokio::test]
async fn test_superseded_versions_are_pruned() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());
    let pipeline = pipeline(config.clone(), InMemorySource::default());
    let cancel = CancellationToken::new();

    let a = pipeline.run_cycle(cycle_at(6), &cancel).await.expect("run a");
    let b = pipeline.run_cycle(cycle_at(7), &cancel).await.expect("run b");
    let c = pipeline.run_cycle(cycle_at(8), &cancel).await.expect("run c");

    // current plus one superseded version
    assert_eq!(version_count(&config), 2);
    assert!(!a.published.exists());
    assert!(b.published.exists());
    assert!(c.published.exists());
}

#[tokio::test]
async fn test_stray_staging_does_not_displace_previous_version() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());
    let pipeline = pipeline(config.clone(), InMemorySource::default());
    let cancel = CancellationToken::new();

    let a = pipeline.run_cycle(cycle_at(6), &cancel).await.expect("run a");
    let stray = config.versions_dir().join("2024060107-deadbeef.zarr");
    fs::create_dir_all(&stray).expect("stray staging dir");

    let b = pipeline.run_cycle(cycle_at(8), &cancel).await.expect("run b");
    assert_eq!(b.previous.as_ref(), Some(&a.published));
    assert!(a.published.exists());
    assert!(stray.exists());
    assert_eq!(version_count(&config), 3);
}

#[tokio::test]
async fn test_schema_mismatch_rolls_back() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());
    let pipeline = pipeline(config.clone(), InMemorySource::default());
    let first = pipeline
        .run_cycle(cycle_at(6), &CancellationToken::new())
        .await
        .expect("first run");

    // a complete partial-cycle store offered as the full 12 UTC cycle
    let planner = StorePlanner::new(&config);
    let partial = cycle_at(8);
    let staging = config.versions_dir().join("2024060112-mismatch.zarr");
    let writer = StoreWriter::create(
        &staging,
        planner.plan(&partial).expect("plan partial"),
        config.store.clone(),
    )
    .expect("create staging");
    for var in nbm_variables() {
        let values = synthetic_variable(var.id, &partial.lead_times(), SMALL_GEOMETRY);
        writer.write_array(var.id, values).expect("write variable");
    }
    for (name, values) in coordinate_values(&partial, &small_coords()) {
        writer.write_coordinate(name, &values).expect("write coordinate");
    }
    writer
        .finalize(generation_attributes(Utc::now()))
        .expect("finalize");

    let publisher = RollingPublisher::new(
        Arc::new(SymlinkReference::new(config.published_path())),
        PublishLock::new(config.lock_path(), Duration::from_secs(60)),
        config.versions_dir(),
        config.retain_superseded,
    );
    let full = cycle_at(12);
    assert!(full.lead_times().len() > partial.lead_times().len());
    let full_schema = planner.plan(&full).expect("plan full");
    let err = publisher
        .publish(&staging, &full_schema, &full)
        .expect_err("shape mismatch");

    match &err {
        IngestError::PublishAborted(reason) => {
            let expected = format!("expected {:?}", full_schema.shape());
            assert!(reason.contains(&expected), "{}", reason)
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!err.affects_published_data());
    assert!(!staging.exists());
    assert_eq!(pipeline.current_version().expect("current"), Some(first.published));
    assert!(!config.lock_path().exists());
}

#[tokio::test]
async fn test_catalog_failure_does_not_fail_run() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());
    // catalog directory cannot be created
    fs::write(config.catalog_dir(), "not a directory").expect("block catalog dir");
    let pipeline = pipeline(config.clone(), InMemorySource::default());

    let report = pipeline
        .run_cycle(cycle_at(6), &CancellationToken::new())
        .await
        .expect("run succeeds without a catalog");

    assert!(matches!(report.catalog, CatalogStatus::Stale { .. }));
    assert_eq!(report.state, PublishState::Promoted);
    assert!(config.published_path().join("zarr.json").exists());
    assert_eq!(pipeline.current_version().expect("current"), Some(report.published));
}

#[tokio::test]
async fn test_variables_use_policy_codec() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = PipelineConfig {
        store: StoreConfig {
            compression: ZarrCompression::BloscLz4,
            compression_level: 9,
            shuffle: true,
        },
        ..test_config(temp_dir.path())
    };
    let pipeline = pipeline(config.clone(), InMemorySource::default());
    pipeline
        .run_cycle(cycle_at(6), &CancellationToken::new())
        .await
        .expect("run succeeds");

    let published = config.published_path();
    for var in nbm_variables() {
        let blosc = blosc_configuration(&published.join(var.id));
        assert_eq!(blosc["cname"], "zstd", "{}", var.id);
        assert_eq!(blosc["clevel"], 3, "{}", var.id);
    }
    assert_eq!(blosc_configuration(&published.join("lead_time"))["cname"], "lz4");
}

#[tokio::test]
async fn test_unavailable_cycle_is_deferred() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());
    let pipeline = pipeline(config.clone(), InMemorySource::default().unavailable());

    let err = pipeline
        .run_cycle(cycle_at(6), &CancellationToken::new())
        .await
        .expect_err("cycle unavailable");

    assert!(matches!(err, IngestError::CycleUnavailable { .. }));
    assert!(err.is_recoverable());
    assert!(!config.published_path().exists());
    assert_eq!(version_count(&config), 0);
}

#[tokio::test]
async fn test_held_lock_reports_publish_busy() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());
    let pipeline = pipeline(config.clone(), InMemorySource::default());
    let cancel = CancellationToken::new();

    let first = pipeline.run_cycle(cycle_at(6), &cancel).await.expect("first run");

    fs::write(config.lock_path(), "4242").expect("hold lock");
    let err = pipeline
        .run_cycle(cycle_at(7), &cancel)
        .await
        .expect_err("lock held elsewhere");

    assert!(matches!(err, IngestError::PublishBusy(_)));
    assert!(err.is_recoverable());
    assert_eq!(pipeline.current_version().expect("current"), Some(first.published));
    assert_eq!(version_count(&config), 1);
    assert!(config.lock_path().exists());
}

#[tokio::test]
async fn test_cancellation_before_promotion() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());
    let cancel = CancellationToken::new();
    let source = Arc::new(InMemorySource::default().cancel_after(5, cancel.clone()));
    let shared: Arc<dyn GridSource> = source.clone();
    let pipeline = Pipeline::new(config.clone(), shared).expect("valid pipeline");

    let err = pipeline
        .run_cycle(cycle_at(6), &cancel)
        .await
        .expect_err("cancelled");

    assert!(matches!(err, IngestError::Cancelled));
    assert!(!config.published_path().exists());
    assert_eq!(version_count(&config), 0);
    // tasks stop fetching once cancelled
    assert!(source.fetch_count() < 19 * 52);
}

#[tokio::test]
async fn test_coordinates_must_agree_across_variables() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());
    let pipeline = pipeline(
        config.clone(),
        InMemorySource::default().with_shifted_x("gust", 250.0),
    );

    let err = pipeline
        .run_cycle(cycle_at(6), &CancellationToken::new())
        .await
        .expect_err("coordinates drift between variables");

    assert!(matches!(
        err,
        IngestError::IncompleteVariable { ref variable, .. } if variable == "gust"
    ));
    assert_eq!(version_count(&config), 0);
}

#[tokio::test]
async fn test_catalog_describes_published_store() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());
    let pipeline = pipeline(config.clone(), InMemorySource::default());
    let cancel = CancellationToken::new();

    let cycle = cycle_at(18);
    pipeline.run_cycle(cycle, &cancel).await.expect("run succeeds");

    let entry = pipeline
        .catalog()
        .load()
        .expect("catalog readable")
        .expect("catalog written");
    assert_eq!(entry.dataset_id, "noaa-nbm-conus-forecast");
    assert_eq!(entry.variables.len(), 19);
    assert_eq!(entry.dimensions["lead_time"], 52);
    assert_eq!(entry.dimensions["y"], SMALL_GEOMETRY.ny as u64);
    assert!(entry.size_bytes > 0);
    assert_eq!(entry.init_time, cycle.init_time);
    assert_eq!(entry.horizon, "full");
    assert_eq!(entry.valid_time_start, cycle.valid_time(1));
    assert_eq!(entry.valid_time_end, cycle.valid_time(84));
    assert!(entry.geographic_bounds.is_some());

    let t2m = entry
        .variables
        .iter()
        .find(|v| v.name == "t2m")
        .expect("t2m listed");
    assert_eq!(t2m.long_name, "2-meter temperature");
    assert_eq!(t2m.units, "K");

    let summary = fs::read_to_string(pipeline.catalog().summary_path()).expect("summary");
    assert!(summary.contains("# NBM Data Summary"));
    assert!(summary.contains("**Variables (19):**"));
    assert!(summary.contains("- lead_time: 52"));

    pipeline.run_cycle(cycle_at(19), &cancel).await.expect("partial run");
    let entry = pipeline.catalog().load().expect("load").expect("entry");
    assert_eq!(entry.dimensions["lead_time"], 36);
    assert_eq!(entry.horizon, "partial");
}

#[tokio::test]
async fn test_reader_never_sees_mixed_store() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = PipelineConfig {
        retain_superseded: 8,
        ..test_config(temp_dir.path())
    };
    let pipeline = pipeline(config.clone(), InMemorySource::default());
    let cancel = CancellationToken::new();

    let done = Arc::new(AtomicBool::new(false));
    let checks = Arc::new(AtomicUsize::new(0));
    let reader = {
        let published = config.published_path();
        let done = done.clone();
        let checks = checks.clone();
        std::thread::spawn(move || loop {
            let finished = done.load(Ordering::SeqCst);
            // resolve once, then read only from the resolved version
            if let Ok(version) = fs::canonicalize(&published) {
                let store = StoreReader::open(&version).expect("resolved version opens");
                let declared = store.attributes()["init_time"]
                    .as_str()
                    .map(str::to_string)
                    .expect("init_time attribute");
                let init = match store.read_coordinate("init_time").expect("init_time") {
                    CoordinateValues::Int64(v) => v[0],
                    other => panic!("unexpected coordinate {:?}", other),
                };
                let horizon = store.attributes()["horizon"].as_str().map(str::to_string);
                let leads = store.array_info("lead_time").expect("lead_time").shape[0];

                let declared_ts = chrono::DateTime::parse_from_rfc3339(&declared)
                    .expect("rfc3339")
                    .timestamp();
                assert_eq!(declared_ts, init, "root attributes and coordinates disagree");
                match horizon.as_deref() {
                    Some("full") => assert_eq!(leads, 52),
                    Some("partial") => assert_eq!(leads, 36),
                    other => panic!("unexpected horizon {:?}", other),
                }
                checks.fetch_add(1, Ordering::SeqCst);
            }
            if finished {
                break;
            }
        })
    };

    for cycle in [cycle_at(6), cycle_at(7), next_day_cycle_at(0), next_day_cycle_at(1)] {
        pipeline.run_cycle(cycle, &cancel).await.expect("run succeeds");
    }
    done.store(true, Ordering::SeqCst);

    reader.join().expect("reader saw consistent stores");
    assert!(checks.load(Ordering::SeqCst) > 0);
}
