//! Score history persistence.
//!
//! History is keyed by (device, timestamp) and holds at most one score per
//! key. Writes are insert-or-replace, so re-running a window is idempotent
//! and a later run over an overlapping window replaces earlier scores in
//! place.
//!
//! Two stores ship with the crate:
//! - [`MemoryScoreStore`]: in-process, for tests and embedding
//! - [`JsonScoreStore`]: one JSON document on disk, locked, re-read and
//!   replaced atomically on every batch

use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use dw_common::{DeviceId, Error, Result, SCHEMA_VERSION};
use dw_telemetry::Point;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::score::ScoreSeries;

type DeviceHistory = BTreeMap<DateTime<Utc>, f64>;

/// Keyed score storage shared by concurrent runs.
pub trait ScoreStore: Send + Sync {
    /// Insert or replace every point for `device` as one batch.
    ///
    /// Returns the number of points applied. A store that cannot apply the
    /// whole batch returns `Error::Persistence` with the applied count.
    fn upsert_batch(&self, device: &DeviceId, points: &[Point]) -> Result<usize>;

    /// All scores of a device, in timestamp order.
    fn history(&self, device: &DeviceId) -> Result<Vec<Point>>;

    /// Devices with at least one score, sorted.
    fn devices(&self) -> Result<Vec<DeviceId>>;
}

fn poisoned(total: usize) -> Error {
    Error::Persistence {
        applied: 0,
        total,
        reason: "store lock poisoned".into(),
    }
}

fn apply(history: &mut DeviceHistory, points: &[Point]) -> usize {
    for p in points {
        history.insert(p.timestamp, p.value);
    }
    points.len()
}

fn to_points(history: &DeviceHistory) -> Vec<Point> {
    history.iter().map(|(ts, v)| Point::new(*ts, *v)).collect()
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryScoreStore {
    inner: RwLock<BTreeMap<DeviceId, DeviceHistory>>,
}

impl MemoryScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored scores.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .map(|m| m.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ScoreStore for MemoryScoreStore {
    fn upsert_batch(&self, device: &DeviceId, points: &[Point]) -> Result<usize> {
        let mut inner = self.inner.write().map_err(|_| poisoned(points.len()))?;
        Ok(apply(inner.entry(device.clone()).or_default(), points))
    }

    fn history(&self, device: &DeviceId) -> Result<Vec<Point>> {
        let inner = self.inner.read().map_err(|_| poisoned(0))?;
        Ok(inner.get(device).map(to_points).unwrap_or_default())
    }

    fn devices(&self) -> Result<Vec<DeviceId>> {
        let inner = self.inner.read().map_err(|_| poisoned(0))?;
        Ok(inner.keys().cloned().collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredScore {
    timestamp: DateTime<Utc>,
    score: f64,
}

/// On-disk layout of a [`JsonScoreStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScoreDocument {
    schema_version: String,
    #[serde(default)]
    devices: BTreeMap<DeviceId, Vec<StoredScore>>,
}

impl ScoreDocument {
    fn from_histories(histories: &BTreeMap<DeviceId, DeviceHistory>) -> Self {
        let devices = histories
            .iter()
            .map(|(id, h)| {
                let scores = h
                    .iter()
                    .map(|(ts, v)| StoredScore {
                        timestamp: *ts,
                        score: *v,
                    })
                    .collect();
                (id.clone(), scores)
            })
            .collect();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            devices,
        }
    }

    fn into_histories(self) -> BTreeMap<DeviceId, DeviceHistory> {
        self.devices
            .into_iter()
            .map(|(id, scores)| {
                let history = scores.into_iter().map(|s| (s.timestamp, s.score)).collect();
                (id, history)
            })
            .collect()
    }
}

/// Exclusive advisory lock on a store's sidecar `.lock` file.
///
/// Held for one read-merge-write cycle so writers in other processes
/// serialize on the same document.
struct StoreLock {
    file: File,
}

impl StoreLock {
    fn acquire(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // Blocks until every other holder has released the lock.
            let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if result != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }

        Ok(Self { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        // The lock file stays; removing it would let a waiter lock a
        // deleted inode.
    }
}

/// Single-file JSON store.
///
/// Every batch takes an exclusive lock on `<path>.lock`, re-reads the
/// document, merges the batch and renames a temp file from the same
/// directory over the old document. Readers never see a partial file and
/// writers in other processes never drop each other's scores. Writers within
/// one process are serialized by a mutex.
#[derive(Debug)]
pub struct JsonScoreStore {
    path: PathBuf,
    inner: Mutex<BTreeMap<DeviceId, DeviceHistory>>,
}

impl JsonScoreStore {
    /// Open `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let histories = read_document(&path)?;
        debug!(path = %path.display(), devices = histories.len(), "opened score store");
        Ok(Self {
            path,
            inner: Mutex::new(histories),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn save(&self, histories: &BTreeMap<DeviceId, DeviceHistory>) -> Result<()> {
        let json = serde_json::to_vec_pretty(&ScoreDocument::from_histories(histories))?;
        let mut tmp = tempfile::NamedTempFile::new_in(self.dir())?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Lock, re-read, merge and persist. Returns the merged document.
    fn merge_and_save(
        &self,
        device: &DeviceId,
        points: &[Point],
    ) -> Result<(BTreeMap<DeviceId, DeviceHistory>, usize)> {
        std::fs::create_dir_all(self.dir())?;
        let _lock = StoreLock::acquire(&self.lock_path())?;
        let mut next = read_document(&self.path)?;
        let applied = apply(next.entry(device.clone()).or_default(), points);
        self.save(&next)?;
        Ok((next, applied))
    }
}

/// Load the document at `path`; a missing file is an empty store.
fn read_document(path: &Path) -> Result<BTreeMap<DeviceId, DeviceHistory>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let doc: ScoreDocument = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    if !dw_common::schema::is_compatible(&doc.schema_version) {
        return Err(Error::Schema(format!(
            "score store {} has schema version {} (current {})",
            path.display(),
            doc.schema_version,
            SCHEMA_VERSION
        )));
    }
    Ok(doc.into_histories())
}

impl ScoreStore for JsonScoreStore {
    fn upsert_batch(&self, device: &DeviceId, points: &[Point]) -> Result<usize> {
        let mut inner = self.inner.lock().map_err(|_| poisoned(points.len()))?;
        let (next, applied) = self.merge_and_save(device, points).map_err(|e| {
            Error::Persistence {
                applied: 0,
                total: points.len(),
                reason: format!("writing {}: {e}", self.path.display()),
            }
        })?;
        *inner = next;
        Ok(applied)
    }

    fn history(&self, device: &DeviceId) -> Result<Vec<Point>> {
        let inner = self.inner.lock().map_err(|_| poisoned(0))?;
        Ok(inner.get(device).map(to_points).unwrap_or_default())
    }

    fn devices(&self) -> Result<Vec<DeviceId>> {
        let inner = self.inner.lock().map_err(|_| poisoned(0))?;
        Ok(inner.keys().cloned().collect())
    }
}

/// Result of one upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertReport {
    pub device: DeviceId,
    pub submitted: usize,
    pub applied: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

/// Writes score series into a store.
pub struct ScoreHistoryWriter<'a> {
    store: &'a dyn ScoreStore,
}

impl<'a> ScoreHistoryWriter<'a> {
    pub fn new(store: &'a dyn ScoreStore) -> Self {
        Self { store }
    }

    /// Upsert every score of `scores` for `device` as one batch.
    ///
    /// A series repeating a timestamp is rejected before the store is
    /// touched. A store applying fewer points than submitted is reported as
    /// `Error::Persistence`.
    pub fn upsert(&self, device: &DeviceId, scores: &ScoreSeries) -> Result<UpsertReport> {
        let total = scores.len();
        let mut seen = HashSet::with_capacity(total);
        if let Some(dup) = scores.points().iter().find(|p| !seen.insert(p.timestamp)) {
            return Err(Error::Persistence {
                applied: 0,
                total,
                reason: format!("duplicate timestamp {} in batch", dup.timestamp.to_rfc3339()),
            });
        }

        let span = scores.span();
        let applied = if total == 0 {
            0
        } else {
            self.store.upsert_batch(device, scores.points())?
        };
        if applied != total {
            return Err(Error::Persistence {
                applied,
                total,
                reason: "store applied a partial batch".into(),
            });
        }

        info!(device = %device, applied, "upserted scores");
        Ok(UpsertReport {
            device: device.clone(),
            submitted: total,
            applied,
            first: span.map(|s| s.0),
            last: span.map(|s| s.1),
        })
    }
}
