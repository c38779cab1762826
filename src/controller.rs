//! Transport-agnostic read-modify-write over a `MetricStore`.

use crate::aggregate;
use crate::metric::{Kind, Metric};
use crate::store::{MetricStore, StoreError};
use std::error;
use std::fmt;
use std::sync::Arc;

/// A store failure with the operation it interrupted.
#[derive(Debug)]
pub struct ControllerError {
    op: &'static str,
    source: StoreError,
}

impl ControllerError {
    fn wrap(op: &'static str) -> impl Fn(StoreError) -> ControllerError {
        move |source| ControllerError { op, source }
    }

    /// Whether the underlying failure is a plain miss.
    pub fn is_not_found(&self) -> bool {
        self.source.is_not_found()
    }

    /// The underlying store error.
    pub fn store_error(&self) -> &StoreError {
        &self.source
    }
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.op, self.source)
    }
}

impl error::Error for ControllerError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Applies gauge and counter writes to a store.
///
/// Holds no state of its own between calls and may be shared freely across
/// request threads. Errors are returned, never retried.
#[derive(Clone)]
pub struct Controller {
    store: Arc<dyn MetricStore>,
}

impl Controller {
    /// A controller over `store`.
    pub fn new(store: Arc<dyn MetricStore>) -> Controller {
        Controller { store }
    }

    /// Apply a single write and return the stored result.
    pub fn update(&self, metric: Metric) -> Result<Metric, ControllerError> {
        match self.store.read(&metric.id, metric.kind()) {
            Ok(current) => {
                let value = aggregate::merge(current.value, metric.value);
                let merged = metric.with_value(value);
                self.store
                    .update(&merged)
                    .map_err(ControllerError::wrap("update metric"))?;
                Ok(merged)
            }
            Err(StoreError::NotFound) => {
                self.store
                    .create(&metric)
                    .map_err(ControllerError::wrap("create metric"))?;
                Ok(metric)
            }
            Err(e) => Err(ControllerError::wrap("read metric")(e)),
        }
    }

    /// Apply a batch of writes atomically.
    ///
    /// Repeated keys are folded in input order, then folded against what is
    /// already stored, and the result is handed to the store as one batch.
    pub fn updates(&self, metrics: Vec<Metric>) -> Result<(), ControllerError> {
        let folded = aggregate::fold_batch(metrics);
        if folded.is_empty() {
            return Ok(());
        }
        let store = &self.store;
        let records = aggregate::plan(folded, |m| match store.read(&m.id, m.kind()) {
            Ok(current) => Ok(Some(current.value)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        })
        .map_err(ControllerError::wrap("read batch state"))?;
        trace!("applying batch of {} records", records.len());
        self.store
            .create_all(&records)
            .map_err(ControllerError::wrap("apply batch"))
    }

    /// The stored metric under `id` and `kind`.
    pub fn value(&self, id: &str, kind: Kind) -> Result<Metric, ControllerError> {
        self.store
            .read(id, kind)
            .map_err(ControllerError::wrap("read metric"))
    }

    /// Every stored metric, sorted by id then kind.
    pub fn list(&self) -> Result<Vec<Metric>, ControllerError> {
        let mut metrics = self
            .store
            .all()
            .map_err(ControllerError::wrap("list metrics"))?;
        metrics.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(metrics)
    }

    /// Check the store is reachable.
    pub fn ping(&self) -> Result<(), ControllerError> {
        self.store.ping().map_err(ControllerError::wrap("ping store"))
    }
}
