//! Durable snapshots of the in-memory store.
//!
//! A snapshot is a single JSON object whose `storage` field maps a metric key
//! to its wire object. Every save writes the complete map to a temporary
//! sibling file and renames it over the target, so a reader never sees a
//! half-written snapshot.

use crate::metric::Metric;
use crate::store::MetricStore;
use crate::thread::Shutdown;
use std::collections::BTreeMap;
use std::error;
use std::fmt;
use std::fs;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Serialize, Deserialize, Default)]
struct Container {
    storage: BTreeMap<String, Metric>,
}

/// Snapshot failures.
#[derive(Debug)]
pub enum SnapshotError {
    /// The file could not be read or written.
    Io(io::Error),
    /// The file content is not a valid snapshot.
    Format(serde_json::Error),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SnapshotError::Io(ref e) => write!(f, "snapshot i/o: {}", e),
            SnapshotError::Format(ref e) => write!(f, "snapshot format: {}", e),
        }
    }
}

impl error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            SnapshotError::Io(ref e) => Some(e),
            SnapshotError::Format(ref e) => Some(e),
        }
    }
}

impl From<io::Error> for SnapshotError {
    fn from(e: io::Error) -> SnapshotError {
        SnapshotError::Io(e)
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(e: serde_json::Error) -> SnapshotError {
        SnapshotError::Format(e)
    }
}

/// A snapshot file location.
#[derive(Debug)]
pub struct Snapshot {
    path: PathBuf,
    // serializes writers sharing the temporary file
    writing: Mutex<()>,
}

impl Snapshot {
    /// A snapshot stored at `path`.
    pub fn new<P>(path: P) -> Snapshot
    where
        P: Into<PathBuf>,
    {
        Snapshot {
            path: path.into(),
            writing: Mutex::new(()),
        }
    }

    /// Where the snapshot lives.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Replace the snapshot with exactly `metrics`.
    pub fn save(&self, metrics: &[Metric]) -> Result<(), SnapshotError> {
        let container = Container {
            storage: metrics
                .iter()
                .map(|m| (m.key().to_string(), m.clone()))
                .collect(),
        };
        let body = serde_json::to_vec_pretty(&container)?;

        let _guard = self.writing.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.temp_path();
        {
            let mut fp = fs::File::create(&tmp)?;
            fp.write_all(&body)?;
            fp.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Read the snapshot back. A missing or empty file is an empty snapshot.
    pub fn load(&self) -> Result<Vec<Metric>, SnapshotError> {
        let body = match fs::read_to_string(&self.path) {
            Ok(body) => body,
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        let container: Container = serde_json::from_str(&body)?;
        Ok(container.storage.into_iter().map(|(_, m)| m).collect())
    }
}

/// Periodically backs up a store until shut down, then backs up one last
/// time.
pub struct Snapshotter {
    store: Arc<dyn MetricStore>,
    interval: Duration,
}

impl Snapshotter {
    /// Back up `store` every `interval`.
    pub fn new(store: Arc<dyn MetricStore>, interval: Duration) -> Snapshotter {
        Snapshotter { store, interval }
    }

    fn backup(&self) {
        if let Err(e) = self.store.backup() {
            error!("periodic backup failed: {}", e);
        }
    }

    /// Run the backup loop on the calling thread.
    pub fn run(self, shutdown: Shutdown) {
        let ticker = crossbeam_channel::tick(self.interval);
        loop {
            select! {
                recv(shutdown.signal()) -> _ => break,
                recv(ticker) -> _ => self.backup(),
            }
        }
        info!("snapshotter shutting down, final backup");
        self.backup();
    }
}
