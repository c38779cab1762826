//! SQLite driver for `SqlStore`.

use super::{Client, StoreError};
use crate::metric::{BatchRecord, Kind, Metric, Value};
use rusqlite::{params, Connection, ErrorCode, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const INSERT: &str = "INSERT INTO metrics (id, type, delta, value) VALUES (?1, ?2, ?3, ?4)";
const UPDATE: &str = "UPDATE metrics SET delta = ?1, value = ?2 WHERE id = ?3 AND type = ?4";
const SELECT_ONE: &str = "SELECT id, type, delta, value FROM metrics WHERE id = ?1 AND type = ?2";
const SELECT_ALL: &str = "SELECT id, type, delta, value FROM metrics ORDER BY id, type";
const DELETE: &str = "DELETE FROM metrics WHERE id = ?1 AND type = ?2";

/// A `Client` over a single SQLite connection.
pub struct SqliteClient {
    conn: Mutex<Connection>,
}

fn backend(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        rusqlite::Error::SqliteFailure(ref err, _) if err.code == ErrorCode::ConstraintViolation => {
            StoreError::AlreadyExists
        }
        e => StoreError::Backend(e.to_string()),
    }
}

/// Split a payload into its `(delta, value)` columns.
fn columns(value: &Value) -> (Option<i64>, Option<f64>) {
    match *value {
        Value::Counter(d) => (Some(d), None),
        Value::Gauge(v) => (None, Some(v)),
    }
}

/// A row as read, before its payload is checked.
struct RawRow {
    id: String,
    kind: String,
    delta: Option<i64>,
    value: Option<f64>,
}

fn raw_row(row: &Row) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        delta: row.get(2)?,
        value: row.get(3)?,
    })
}

fn to_metric(row: RawRow) -> Result<Metric, StoreError> {
    let kind: Kind = row
        .kind
        .parse()
        .map_err(|e| StoreError::Backend(format!("corrupt row '{}': {}", row.id, e)))?;
    match (kind, row.delta, row.value) {
        (Kind::Counter, Some(d), _) => Ok(Metric::counter(row.id, d)),
        (Kind::Gauge, _, Some(v)) => Ok(Metric::gauge(row.id, v)),
        _ => Err(StoreError::Backend(format!(
            "corrupt row '{}': no payload for {}",
            row.id, kind
        ))),
    }
}

impl SqliteClient {
    /// Open, creating if needed, the database at `path`.
    pub fn open<P>(path: P) -> Result<SqliteClient, StoreError>
    where
        P: AsRef<Path>,
    {
        let conn = Connection::open(path).map_err(backend)?;
        Ok(SqliteClient {
            conn: Mutex::new(conn),
        })
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<SqliteClient, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Ok(SqliteClient {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("connection lock poisoned".to_string()))
    }
}

impl Client for SqliteClient {
    fn ping(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(backend)
    }

    fn insert(&self, metric: &Metric) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let (delta, value) = columns(&metric.value);
        conn.execute(INSERT, params![metric.id, metric.kind().as_str(), delta, value])
            .map(|_| ())
            .map_err(backend)
    }

    fn select_by_id_and_type(&self, id: &str, kind: Kind) -> Result<Metric, StoreError> {
        let row = {
            let conn = self.lock()?;
            conn.query_row(SELECT_ONE, params![id, kind.as_str()], raw_row)
                .map_err(backend)?
        };
        to_metric(row)
    }

    fn select_all(&self) -> Result<Vec<Metric>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(SELECT_ALL).map_err(backend)?;
        let rows = stmt.query_map([], raw_row).map_err(backend)?;
        let mut metrics = Vec::new();
        for row in rows {
            metrics.push(to_metric(row.map_err(backend)?)?);
        }
        Ok(metrics)
    }

    fn save_all(&self, batch: &[BatchRecord]) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(backend)?;
        {
            let mut insert = tx.prepare(INSERT).map_err(backend)?;
            let mut update = tx.prepare(UPDATE).map_err(backend)?;
            for record in batch {
                let metric = &record.metric;
                let kind = metric.kind().as_str();
                let (delta, value) = columns(&metric.value);
                if record.exists {
                    let changed = update
                        .execute(params![delta, value, metric.id, kind])
                        .map_err(backend)?;
                    if changed != 1 {
                        // dropping `tx` rolls back
                        return Err(StoreError::InvalidBatch(format!(
                            "'{}' flagged existing but is not stored",
                            metric.key()
                        )));
                    }
                } else {
                    insert
                        .execute(params![metric.id, kind, delta, value])
                        .map_err(|e| match backend(e) {
                            StoreError::AlreadyExists => StoreError::InvalidBatch(format!(
                                "'{}' flagged new but is already stored",
                                metric.key()
                            )),
                            other => other,
                        })?;
                }
            }
        }
        tx.commit().map_err(backend)
    }

    fn update(&self, metric: &Metric) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let (delta, value) = columns(&metric.value);
        let changed = conn
            .execute(UPDATE, params![delta, value, metric.id, metric.kind().as_str()])
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn delete(&self, id: &str, kind: Kind) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(DELETE, params![id, kind.as_str()])
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn apply_migration(&self, ddl: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(ddl).map_err(backend)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::{MetricStore, SqlStore};

    fn store() -> SqlStore<SqliteClient> {
        SqlStore::new(SqliteClient::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn unknown_key_is_not_found() {
        let store = store();
        assert!(store.read("nope", Kind::Counter).unwrap_err().is_not_found());
    }

    #[test]
    fn create_read_update_delete() {
        let store = store();
        store.create(&Metric::gauge("temp", 1.5)).unwrap();
        match store.create(&Metric::gauge("temp", 1.5)) {
            Err(StoreError::AlreadyExists) => {}
            other => panic!("unexpected {:?}", other),
        }
        store.create(&Metric::counter("temp", 4)).unwrap();
        store.update(&Metric::gauge("temp", -3.25)).unwrap();
        assert_eq!(Metric::gauge("temp", -3.25), store.read("temp", Kind::Gauge).unwrap());
        assert_eq!(Metric::counter("temp", 4), store.read("temp", Kind::Counter).unwrap());
        store.delete("temp", Kind::Gauge).unwrap();
        assert!(store.read("temp", Kind::Gauge).unwrap_err().is_not_found());
        assert!(store.update(&Metric::gauge("temp", 0.0)).unwrap_err().is_not_found());
    }

    #[test]
    fn failed_batch_rolls_back() {
        let store = store();
        store.create(&Metric::counter("hits", 1)).unwrap();
        let batch = vec![
            BatchRecord {
                metric: Metric::counter("hits", 10),
                exists: true,
            },
            BatchRecord {
                metric: Metric::gauge("temp", 2.0),
                exists: false,
            },
            // invalid: already stored but flagged new
            BatchRecord {
                metric: Metric::counter("hits", 99),
                exists: false,
            },
        ];
        match store.create_all(&batch) {
            Err(StoreError::InvalidBatch(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(vec![Metric::counter("hits", 1)], store.all().unwrap());
    }

    #[test]
    fn batch_inserts_and_updates_in_one_go() {
        let store = store();
        store.create(&Metric::counter("hits", 1)).unwrap();
        let batch = vec![
            BatchRecord {
                metric: Metric::counter("hits", 10),
                exists: true,
            },
            BatchRecord {
                metric: Metric::gauge("temp", 2.0),
                exists: false,
            },
        ];
        store.create_all(&batch).unwrap();
        assert_eq!(
            vec![Metric::counter("hits", 10), Metric::gauge("temp", 2.0)],
            store.all().unwrap()
        );
        store.ping().unwrap();
        store.backup().unwrap();
    }
}
