use super::{check_finite, MetricStore, StoreError};
use crate::metric::{BatchRecord, Kind, Metric};

/// The metrics table. One row per key; exactly one of `delta` / `value` is
/// set, matching `type`.
pub const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS metrics (
    id    TEXT    NOT NULL,
    type  TEXT    NOT NULL,
    delta INTEGER NULL,
    value REAL    NULL,
    PRIMARY KEY (id, type)
);";

/// The narrow database interface `SqlStore` is written against. A driver
/// implements this; nothing above it knows which database is underneath.
///
/// `save_all` must run inside one transaction: insert the records flagged
/// new, update the records flagged existing, and roll everything back if any
/// statement fails.
pub trait Client: Send + Sync {
    /// Check the database is reachable.
    fn ping(&self) -> Result<(), StoreError>;
    /// Insert a row. A duplicate key is `AlreadyExists`.
    fn insert(&self, metric: &Metric) -> Result<(), StoreError>;
    /// Fetch a row. A miss is `NotFound`.
    fn select_by_id_and_type(&self, id: &str, kind: Kind) -> Result<Metric, StoreError>;
    /// Fetch every row.
    fn select_all(&self) -> Result<Vec<Metric>, StoreError>;
    /// Apply a batch in one transaction.
    fn save_all(&self, batch: &[BatchRecord]) -> Result<(), StoreError>;
    /// Overwrite a row. A miss is `NotFound`.
    fn update(&self, metric: &Metric) -> Result<(), StoreError>;
    /// Delete a row. A miss is `NotFound`.
    fn delete(&self, id: &str, kind: Kind) -> Result<(), StoreError>;
    /// Run raw DDL.
    fn apply_migration(&self, ddl: &str) -> Result<(), StoreError>;
}

/// Relational metric store.
///
/// Atomicity and isolation come from the database's transactions; no
/// application-level locking is layered on top.
pub struct SqlStore<C> {
    client: C,
}

impl<C> SqlStore<C>
where
    C: Client,
{
    /// Wrap a client, applying the schema first.
    pub fn new(client: C) -> Result<SqlStore<C>, StoreError> {
        client.apply_migration(SCHEMA)?;
        Ok(SqlStore { client })
    }

    /// The underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }
}

impl<C> MetricStore for SqlStore<C>
where
    C: Client,
{
    fn create(&self, metric: &Metric) -> Result<(), StoreError> {
        check_finite(metric)?;
        self.client.insert(metric)
    }

    fn read(&self, id: &str, kind: Kind) -> Result<Metric, StoreError> {
        self.client.select_by_id_and_type(id, kind)
    }

    fn update(&self, metric: &Metric) -> Result<(), StoreError> {
        check_finite(metric)?;
        self.client.update(metric)
    }

    fn delete(&self, id: &str, kind: Kind) -> Result<(), StoreError> {
        self.client.delete(id, kind)
    }

    fn create_all(&self, batch: &[BatchRecord]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        for record in batch {
            check_finite(&record.metric)?;
        }
        self.client.save_all(batch)
    }

    fn all(&self) -> Result<Vec<Metric>, StoreError> {
        self.client.select_all()
    }

    fn ping(&self) -> Result<(), StoreError> {
        self.client.ping()
    }

    fn backup(&self) -> Result<(), StoreError> {
        // durability belongs to the database
        Ok(())
    }
}
