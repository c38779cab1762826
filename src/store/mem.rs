use super::{check_finite, MetricStore, StoreError};
use crate::metric::{BatchRecord, Key, Kind, Metric};
use crate::snapshot::Snapshot;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory metric store.
///
/// One map, one lock. Batches are validated and applied inside a single write
/// critical section so readers see either all of a batch or none of it. When
/// a `Snapshot` is attached `backup` writes the whole map to it; with
/// `sync_backup` every successful mutation is followed by a backup.
pub struct MemStore {
    metrics: RwLock<HashMap<Key, Metric>>,
    snapshot: Option<Snapshot>,
    sync_backup: bool,
}

impl Default for MemStore {
    fn default() -> MemStore {
        MemStore {
            metrics: RwLock::new(HashMap::new()),
            snapshot: None,
            sync_backup: false,
        }
    }
}

impl MemStore {
    /// A volatile store with no snapshot.
    pub fn new() -> MemStore {
        MemStore::default()
    }

    /// A store backed by `snapshot`.
    ///
    /// With `restore` the snapshot is loaded first; a missing or empty
    /// snapshot file yields an empty store.
    pub fn with_snapshot(
        snapshot: Snapshot,
        restore: bool,
        sync_backup: bool,
    ) -> Result<MemStore, StoreError> {
        let mut metrics = HashMap::new();
        if restore {
            for metric in snapshot.load()? {
                metrics.insert(metric.key(), metric);
            }
            info!(
                "restored {} metrics from {}",
                metrics.len(),
                snapshot.path().display()
            );
        }
        Ok(MemStore {
            metrics: RwLock::new(metrics),
            snapshot: Some(snapshot),
            sync_backup,
        })
    }

    /// Number of stored metrics.
    pub fn len(&self) -> usize {
        self.read_lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether the store holds no metrics.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_lock(&self) -> Result<RwLockReadGuard<HashMap<Key, Metric>>, StoreError> {
        self.metrics
            .read()
            .map_err(|_| StoreError::Backend("metric map lock poisoned".to_string()))
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<HashMap<Key, Metric>>, StoreError> {
        self.metrics
            .write()
            .map_err(|_| StoreError::Backend("metric map lock poisoned".to_string()))
    }

    /// Follow a successful mutation with a backup when configured to.
    ///
    /// The mutation has already happened; a failed backup is logged rather
    /// than reported so callers do not resubmit applied counter deltas.
    fn after_write(&self) {
        if self.sync_backup {
            if let Err(e) = self.backup() {
                error!("synchronous backup failed: {}", e);
            }
        }
    }
}

impl MetricStore for MemStore {
    fn create(&self, metric: &Metric) -> Result<(), StoreError> {
        check_finite(metric)?;
        {
            let mut metrics = self.write_lock()?;
            let key = metric.key();
            if metrics.contains_key(&key) {
                return Err(StoreError::AlreadyExists);
            }
            metrics.insert(key, metric.clone());
        }
        self.after_write();
        Ok(())
    }

    fn read(&self, id: &str, kind: Kind) -> Result<Metric, StoreError> {
        let metrics = self.read_lock()?;
        metrics
            .get(&Key::new(id, kind))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn update(&self, metric: &Metric) -> Result<(), StoreError> {
        check_finite(metric)?;
        {
            let mut metrics = self.write_lock()?;
            match metrics.get_mut(&metric.key()) {
                Some(stored) => *stored = metric.clone(),
                None => return Err(StoreError::NotFound),
            }
        }
        self.after_write();
        Ok(())
    }

    fn delete(&self, id: &str, kind: Kind) -> Result<(), StoreError> {
        {
            let mut metrics = self.write_lock()?;
            if metrics.remove(&Key::new(id, kind)).is_none() {
                return Err(StoreError::NotFound);
            }
        }
        self.after_write();
        Ok(())
    }

    fn create_all(&self, batch: &[BatchRecord]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        {
            let mut metrics = self.write_lock()?;
            // Validate everything before touching the map.
            for record in batch {
                check_finite(&record.metric)?;
                let present = metrics.contains_key(&record.metric.key());
                if record.exists && !present {
                    return Err(StoreError::InvalidBatch(format!(
                        "'{}' flagged existing but is not stored",
                        record.metric.key()
                    )));
                }
                if !record.exists && present {
                    return Err(StoreError::InvalidBatch(format!(
                        "'{}' flagged new but is already stored",
                        record.metric.key()
                    )));
                }
            }
            for record in batch {
                metrics.insert(record.metric.key(), record.metric.clone());
            }
        }
        trace!("applied batch of {} records", batch.len());
        self.after_write();
        Ok(())
    }

    fn all(&self) -> Result<Vec<Metric>, StoreError> {
        let metrics = self.read_lock()?;
        Ok(metrics.values().cloned().collect())
    }

    fn ping(&self) -> Result<(), StoreError> {
        self.read_lock().map(|_| ())
    }

    fn backup(&self) -> Result<(), StoreError> {
        let snapshot = match self.snapshot {
            Some(ref s) => s,
            None => return Ok(()),
        };
        let metrics = self.all()?;
        snapshot.save(&metrics)?;
        debug!(
            "backed up {} metrics to {}",
            metrics.len(),
            snapshot.path().display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    extern crate tempdir;

    use super::*;
    use crate::metric::Metric;

    #[test]
    fn unknown_key_is_not_found() {
        let store = MemStore::new();
        assert!(store.read("nope", Kind::Gauge).unwrap_err().is_not_found());
        store.create(&Metric::gauge("nope", 1.0)).unwrap();
        // the counter of the same id is still a miss
        assert!(store.read("nope", Kind::Counter).unwrap_err().is_not_found());
    }

    #[test]
    fn create_update_delete() {
        let store = MemStore::new();
        store.create(&Metric::counter("c", 1)).unwrap();
        match store.create(&Metric::counter("c", 1)) {
            Err(StoreError::AlreadyExists) => {}
            other => panic!("unexpected {:?}", other),
        }
        store.update(&Metric::counter("c", 5)).unwrap();
        assert_eq!(Metric::counter("c", 5), store.read("c", Kind::Counter).unwrap());
        store.delete("c", Kind::Counter).unwrap();
        assert!(store.delete("c", Kind::Counter).unwrap_err().is_not_found());
        assert!(store.update(&Metric::counter("c", 1)).unwrap_err().is_not_found());
    }

    #[test]
    fn create_all_is_all_or_nothing() {
        let store = MemStore::new();
        store.create(&Metric::gauge("kept", 1.0)).unwrap();

        let batch = vec![
            BatchRecord {
                metric: Metric::counter("fresh", 3),
                exists: false,
            },
            BatchRecord {
                metric: Metric::gauge("kept", 2.0),
                exists: true,
            },
            // invalid: claims to exist but does not
            BatchRecord {
                metric: Metric::gauge("ghost", 1.0),
                exists: true,
            },
        ];
        match store.create_all(&batch) {
            Err(StoreError::InvalidBatch(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(1, store.len());
        assert_eq!(Metric::gauge("kept", 1.0), store.read("kept", Kind::Gauge).unwrap());
        assert!(store.read("fresh", Kind::Counter).unwrap_err().is_not_found());

        store.create_all(&batch[..2]).unwrap();
        assert_eq!(2, store.len());
        assert_eq!(Metric::gauge("kept", 2.0), store.read("kept", Kind::Gauge).unwrap());
    }

    #[test]
    fn non_finite_gauge_rejects_batch() {
        let store = MemStore::new();
        let batch = vec![
            BatchRecord {
                metric: Metric::counter("ok", 1),
                exists: false,
            },
            BatchRecord {
                metric: Metric::gauge("bad", ::std::f64::NAN),
                exists: false,
            },
        ];
        assert!(store.create_all(&batch).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn sync_backup_writes_snapshot_on_every_mutation() {
        let dir = tempdir::TempDir::new("tally").unwrap();
        let path = dir.path().join("metrics.json");
        let store = MemStore::with_snapshot(Snapshot::new(&path), true, true).unwrap();
        store.create(&Metric::counter("hits", 2)).unwrap();

        let reloaded = Snapshot::new(&path).load().unwrap();
        assert_eq!(vec![Metric::counter("hits", 2)], reloaded);
    }

    #[test]
    fn restore_from_missing_snapshot_is_empty() {
        let dir = tempdir::TempDir::new("tally").unwrap();
        let path = dir.path().join("absent.json");
        let store = MemStore::with_snapshot(Snapshot::new(&path), true, false).unwrap();
        assert!(store.is_empty());
    }
}
