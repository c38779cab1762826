//! Metric persistence.
//!
//! A `MetricStore` holds exactly one current value per metric key. Two
//! backends are provided: `MemStore`, a map behind one lock that can be made
//! durable with a snapshot file, and `SqlStore`, which delegates to a
//! transactional `Client`.

use crate::metric::{BatchRecord, Kind, Metric};
use crate::snapshot::SnapshotError;
use std::error;
use std::fmt;

mod mem;
mod sql;
mod sqlite;

pub use self::mem::MemStore;
pub use self::sql::{Client, SqlStore, SCHEMA};
pub use self::sqlite::SqliteClient;

/// Errors produced by a `MetricStore`.
#[derive(Debug)]
pub enum StoreError {
    /// No metric is stored under the requested key.
    NotFound,
    /// A create hit a key that is already stored.
    AlreadyExists,
    /// A batch was rejected as a whole; nothing in it was applied.
    InvalidBatch(String),
    /// The backend failed, possibly transiently.
    Backend(String),
    /// Writing or reading the snapshot failed.
    Snapshot(SnapshotError),
}

impl StoreError {
    /// Whether this is a plain miss rather than a failure.
    pub fn is_not_found(&self) -> bool {
        match *self {
            StoreError::NotFound => true,
            _ => false,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            StoreError::NotFound => write!(f, "metric not found"),
            StoreError::AlreadyExists => write!(f, "metric already exists"),
            StoreError::InvalidBatch(ref why) => write!(f, "batch rejected: {}", why),
            StoreError::Backend(ref why) => write!(f, "backend failure: {}", why),
            StoreError::Snapshot(ref e) => write!(f, "snapshot failure: {}", e),
        }
    }
}

impl error::Error for StoreError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            StoreError::Snapshot(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<SnapshotError> for StoreError {
    fn from(e: SnapshotError) -> StoreError {
        StoreError::Snapshot(e)
    }
}

/// The persistence interface the controller is written against.
///
/// Implementations must apply `create_all` atomically: either every record
/// is persisted or none is, and no reader observes a partially applied
/// batch.
pub trait MetricStore: Send + Sync {
    /// Persist a metric whose key is not yet stored.
    fn create(&self, metric: &Metric) -> Result<(), StoreError>;
    /// Read the metric stored under `id` and `kind`. A miss is `NotFound`.
    fn read(&self, id: &str, kind: Kind) -> Result<Metric, StoreError>;
    /// Overwrite the metric stored under the metric's key.
    fn update(&self, metric: &Metric) -> Result<(), StoreError>;
    /// Remove a stored metric. Administrative only.
    fn delete(&self, id: &str, kind: Kind) -> Result<(), StoreError>;
    /// Apply a batch, all or nothing, inserting or updating per the record's
    /// existence flag.
    fn create_all(&self, batch: &[BatchRecord]) -> Result<(), StoreError>;
    /// Every stored metric, in no particular order.
    fn all(&self) -> Result<Vec<Metric>, StoreError>;
    /// Check the backend is reachable.
    fn ping(&self) -> Result<(), StoreError>;
    /// Make the current state durable, where the backend needs help with that.
    fn backup(&self) -> Result<(), StoreError>;
}

/// Reject gauge payloads no store can faithfully hold.
fn check_finite(metric: &Metric) -> Result<(), StoreError> {
    match metric.value {
        crate::metric::Value::Gauge(v) if !v.is_finite() => Err(StoreError::InvalidBatch(
            format!("gauge '{}' is not finite", metric.id),
        )),
        _ => Ok(()),
    }
}
