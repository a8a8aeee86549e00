//! Rolling publisher.
//!
//! A staging store is validated against its declared schema and then made
//! the published store with a single atomic reference swap. Readers resolve
//! the published name to exactly one complete version at any instant.
//!
//! Versions live under `versions/`; the published name is a symlink swapped
//! with `rename(2)`. Superseded versions are kept for a configurable grace
//! count so that reads already in flight against them can finish. The order
//! in which versions were published is recorded in `versions/.history`;
//! directories missing from it are staging stores and are only removed once
//! older than the stale-lock age.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zarr_store::{CoordinateValues, StoreReader, StoreSchema};

use crate::cycle::ForecastCycle;
use crate::error::{IngestError, Result};

/// Lifecycle of one publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishState {
    Staging,
    Validating,
    Promoted,
    RolledBack,
}

impl PublishState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staging => "staging",
            Self::Validating => "validating",
            Self::Promoted => "promoted",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Promoted | Self::RolledBack)
    }
}

impl std::fmt::Display for PublishState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Holder of the "currently published store" reference.
pub trait PublishedReference: Send + Sync {
    /// Name readers open.
    fn published_path(&self) -> PathBuf;

    /// Store the reference currently points at, if any.
    fn current(&self) -> Result<Option<PathBuf>>;

    /// Atomically point the reference at `target`, returning the previous target.
    fn swap(&self, target: &Path) -> Result<Option<PathBuf>>;
}

/// Published reference implemented as a symlink replaced by rename.
#[derive(Debug, Clone)]
pub struct SymlinkReference {
    link: PathBuf,
}

impl SymlinkReference {
    pub fn new(link: impl Into<PathBuf>) -> Self {
        Self { link: link.into() }
    }

    fn parent(&self) -> PathBuf {
        self.link
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

impl PublishedReference for SymlinkReference {
    fn published_path(&self) -> PathBuf {
        self.link.clone()
    }

    fn current(&self) -> Result<Option<PathBuf>> {
        match fs::read_link(&self.link) {
            Ok(target) if target.is_absolute() => Ok(Some(target)),
            Ok(target) => Ok(Some(self.parent().join(target))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn swap(&self, target: &Path) -> Result<Option<PathBuf>> {
        let previous = self.current()?;

        let parent = self.parent();
        let relative = target.strip_prefix(&parent).unwrap_or(target);

        let file_name = self
            .link
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        make_symlink(relative, &tmp)?;
        if let Err(e) = fs::rename(&tmp, &self.link) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        Ok(previous)
    }
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn make_symlink(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlink references require a unix platform",
    ))
}

/// Non-reentrant promotion guard: an in-process flag plus an on-disk lock file.
#[derive(Debug)]
pub struct PublishLock {
    path: PathBuf,
    stale_after: Duration,
    held: Arc<AtomicBool>,
}

/// Held while a promotion is in flight; released on drop.
#[derive(Debug)]
pub struct PublishGuard {
    path: PathBuf,
    held: Arc<AtomicBool>,
}

impl Drop for PublishGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove publish lock");
        }
        self.held.store(false, Ordering::SeqCst);
    }
}

impl PublishLock {
    pub fn new(path: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
            held: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Acquire the lock or fail with `PublishBusy`.
    pub fn acquire(&self) -> Result<PublishGuard> {
        if self
            .held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(IngestError::PublishBusy(
                "promotion already in flight in this process".to_string(),
            ));
        }

        match self.create_lock_file() {
            Ok(()) => Ok(PublishGuard {
                path: self.path.clone(),
                held: self.held.clone(),
            }),
            Err(e) => {
                self.held.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn create_lock_file(&self) -> Result<()> {
        for attempt in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    use std::io::Write;
                    writeln!(file, "{}", std::process::id())?;
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt == 0 && is_older_than(&self.path, self.stale_after) && self.reclaim()? {
                        continue;
                    }
                    return Err(IngestError::PublishBusy(format!(
                        "lock file {} is held",
                        self.path.display()
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(IngestError::PublishBusy(format!(
            "lock file {} is held",
            self.path.display()
        )))
    }

    /// Move an abandoned lock file aside so creation can be retried.
    ///
    /// Only the process whose rename succeeds removes the file. Returns
    /// `false` when the file moved aside turned out to be a fresh lock, which
    /// is put back.
    fn reclaim(&self) -> Result<bool> {
        let aside = self
            .path
            .with_extension(format!("stale.{}", Uuid::new_v4().simple()));
        match fs::rename(&self.path, &aside) {
            Ok(()) => {}
            // another process reclaimed it first
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        }

        if !is_older_than(&aside, self.stale_after) {
            if let Err(e) = fs::hard_link(&aside, &self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to restore publish lock");
            }
            let _ = fs::remove_file(&aside);
            return Ok(false);
        }

        warn!(
            path = %self.path.display(),
            stale_after_secs = self.stale_after.as_secs(),
            "Reclaimed abandoned publish lock"
        );
        fs::remove_file(&aside)?;
        Ok(true)
    }
}

/// Whether `path` was last modified more than `age` ago.
fn is_older_than(path: &Path, age: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|elapsed| elapsed > age)
        .unwrap_or(false)
}

/// Result of a successful promotion.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub state: PublishState,
    /// Version the published reference now points at.
    pub published: PathBuf,
    /// Version it pointed at before.
    pub previous: Option<PathBuf>,
    /// Superseded versions removed after the swap.
    pub removed: Vec<PathBuf>,
}

/// Validates staging stores and promotes them.
pub struct RollingPublisher {
    reference: Arc<dyn PublishedReference>,
    lock: PublishLock,
    versions_dir: PathBuf,
    retain_superseded: usize,
}

impl RollingPublisher {
    pub fn new(
        reference: Arc<dyn PublishedReference>,
        lock: PublishLock,
        versions_dir: impl Into<PathBuf>,
        retain_superseded: usize,
    ) -> Self {
        Self {
            reference,
            lock,
            versions_dir: versions_dir.into(),
            retain_superseded,
        }
    }

    pub fn reference(&self) -> &Arc<dyn PublishedReference> {
        &self.reference
    }

    /// Fresh staging location for `cycle`, never the published one.
    pub fn staging_path(&self, cycle: &ForecastCycle) -> PathBuf {
        self.versions_dir
            .join(format!("{}-{}.zarr", cycle.id(), Uuid::new_v4().simple()))
    }

    /// Validate `staging` and promote it.
    ///
    /// Every failure leaves the published reference untouched and removes
    /// the staging store.
    pub fn publish(
        &self,
        staging: &Path,
        schema: &StoreSchema,
        cycle: &ForecastCycle,
    ) -> Result<PublishOutcome> {
        let mut state = PublishState::Staging;
        debug!(state = %state, staging = %staging.display(), "Publish requested");

        let _guard = match self.lock.acquire() {
            Ok(guard) => guard,
            Err(e) => {
                self.roll_back(&mut state, staging, &e);
                return Err(e);
            }
        };

        self.transition(&mut state, PublishState::Validating);
        if let Err(reason) = validate_store(staging, schema, cycle) {
            let err = IngestError::PublishAborted(reason);
            self.roll_back(&mut state, staging, &err);
            return Err(err);
        }

        let previous = match self.reference.swap(staging) {
            Ok(previous) => previous,
            Err(e) => {
                let err = IngestError::PublishAborted(format!("reference swap failed: {}", e));
                self.roll_back(&mut state, staging, &err);
                return Err(err);
            }
        };
        self.transition(&mut state, PublishState::Promoted);

        info!(
            cycle = %cycle,
            published = %staging.display(),
            previous = ?previous,
            "Store promoted"
        );

        let removed = self.prune(staging, previous.as_deref());

        Ok(PublishOutcome {
            state,
            published: staging.to_path_buf(),
            previous,
            removed,
        })
    }

    /// Remove a staging store that will never be promoted.
    pub fn discard(&self, staging: &Path) {
        if staging.exists() {
            if let Err(e) = fs::remove_dir_all(staging) {
                warn!(staging = %staging.display(), error = %e, "Failed to discard staging store");
            }
        }
    }

    fn transition(&self, state: &mut PublishState, next: PublishState) {
        info!(from = %state, to = %next, "Publish state change");
        *state = next;
    }

    fn roll_back(&self, state: &mut PublishState, staging: &Path, cause: &IngestError) {
        warn!(
            from = %state,
            to = %PublishState::RolledBack,
            error = %cause,
            "Publish rolled back"
        );
        *state = PublishState::RolledBack;
        self.discard(staging);
    }

    /// Remove superseded versions beyond the retention count and abandoned
    /// staging stores.
    ///
    /// The version just replaced is always kept, so `retain_superseded` of
    /// zero behaves like one.
    fn prune(&self, current: &Path, previous: Option<&Path>) -> Vec<PathBuf> {
        let history_path = self.versions_dir.join(HISTORY_FILE);
        let mut history = read_history(&history_path);

        if let Some(name) = previous.and_then(version_name) {
            if self.versions_dir.join(&name).is_dir() {
                history.retain(|h| *h != name);
                history.insert(0, name);
            }
        }
        let current_name = version_name(current);
        history.retain(|h| Some(h) != current_name.as_ref() && self.versions_dir.join(h).is_dir());

        let expired = if history.len() > self.retain_superseded.max(1) {
            history.split_off(self.retain_superseded.max(1))
        } else {
            Vec::new()
        };
        if let Err(e) = write_history(&history_path, &history) {
            warn!(path = %history_path.display(), error = %e, "Failed to record version history");
        }

        let mut removed = Vec::new();
        for name in expired {
            let path = self.versions_dir.join(&name);
            if path.is_dir() && self.remove_version(&path, "Removed superseded store") {
                removed.push(path);
            }
        }

        let entries = match fs::read_dir(&self.versions_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to list store versions");
                return removed;
            }
        };
        let stale_after = self.lock.stale_after;
        for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
            let name = match version_name(&path) {
                Some(name) => name,
                None => continue,
            };
            if !path.is_dir()
                || path == current
                || Some(&name) == current_name.as_ref()
                || history.contains(&name)
                || !is_older_than(&path, stale_after)
            {
                continue;
            }
            if self.remove_version(&path, "Removed abandoned staging store") {
                removed.push(path);
            }
        }
        removed
    }

    fn remove_version(&self, path: &Path, message: &str) -> bool {
        match fs::remove_dir_all(path) {
            Ok(()) => {
                debug!(path = %path.display(), "{}", message);
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove store version");
                false
            }
        }
    }
}

/// Published versions, most recently superseded first.
const HISTORY_FILE: &str = ".history";

fn version_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn read_history(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|content| {
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn write_history(path: &Path, history: &[String]) -> std::io::Result<()> {
    let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    let mut content = history.join("\n");
    content.push('\n');
    fs::write(&tmp, content)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Check a written store against its declared schema and cycle.
pub fn validate_store(
    path: &Path,
    schema: &StoreSchema,
    cycle: &ForecastCycle,
) -> std::result::Result<(), String> {
    let reader = StoreReader::open(path).map_err(|e| e.to_string())?;

    let mut expected: Vec<String> = schema
        .data_arrays
        .iter()
        .map(|a| a.name.clone())
        .chain(schema.coordinates.iter().map(|c| c.name.clone()))
        .collect();
    expected.sort();
    let found = reader.array_names().map_err(|e| e.to_string())?;
    if found != expected {
        return Err(format!(
            "array set mismatch: expected {} arrays, found {} ({:?})",
            expected.len(),
            found.len(),
            found
        ));
    }

    let shape = schema.shape();
    let chunk_shape = schema.chunk_shape();
    let dims = schema.dimension_names();
    for spec in &schema.data_arrays {
        let info = reader.array_info(&spec.name).map_err(|e| e.to_string())?;
        if info.shape != shape {
            return Err(format!(
                "{}: shape {:?}, expected {:?}",
                spec.name, info.shape, shape
            ));
        }
        if info.chunk_shape != chunk_shape {
            return Err(format!(
                "{}: chunks {:?}, expected {:?}",
                spec.name, info.chunk_shape, chunk_shape
            ));
        }
        if info.dimension_names != dims {
            return Err(format!(
                "{}: dimensions {:?}, expected {:?}",
                spec.name, info.dimension_names, dims
            ));
        }
    }

    for dim in &schema.dimensions {
        if schema.coordinate(&dim.name).is_none() {
            continue;
        }
        let info = reader.array_info(&dim.name).map_err(|e| e.to_string())?;
        if info.shape != vec![dim.size] {
            return Err(format!(
                "coordinate {}: length {:?}, expected {}",
                dim.name, info.shape, dim.size
            ));
        }
    }

    let lead_times = reader
        .read_coordinate("lead_time")
        .map_err(|e| e.to_string())?;
    if !lead_times.is_strictly_increasing() {
        return Err("lead_time is not strictly increasing".to_string());
    }
    let expected_leads =
        CoordinateValues::Int32(cycle.lead_times().into_iter().map(|h| h as i32).collect());
    if lead_times != expected_leads {
        return Err(format!(
            "lead_time does not match the {} horizon",
            cycle.horizon
        ));
    }

    let init_time = reader
        .read_coordinate("init_time")
        .map_err(|e| e.to_string())?;
    if init_time != CoordinateValues::Int64(vec![cycle.init_time.timestamp()]) {
        return Err(format!("init_time does not match cycle {}", cycle));
    }

    Ok(())
}
