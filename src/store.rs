//! Durable storage of per-location, per-class crossing counts.

use crate::class::ObjectClass;
use crate::counter::{ClassCounts, CountTable};
use crate::error::{Error, Result};

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde_derive::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Sum of both directions for one stored `(location, class)` row.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LocationTotal {
    pub location: String,
    pub object_type: String,
    pub count: u64,
}

pub trait CountStore: Send + Sync {
    /// Inserts a zero record when absent, leaves an existing one untouched.
    fn ensure_record(&self, location: &str, class: ObjectClass) -> Result<()>;

    fn read_counts(&self, location: &str) -> Result<CountTable>;

    /// Upserts every class of `counts`, keyed by `(location, class)`.
    fn write_counts(&self, location: &str, counts: &CountTable, timestamp: NaiveDateTime)
        -> Result<()>;

    fn totals(&self) -> Result<Vec<LocationTotal>>;
}

enum Backend {
    File(PathBuf),
    Memory(Arc<Mutex<Connection>>),
}

/// SQLite store using the `traffic_counts` table. File backed stores keep
/// one connection per location.
pub struct SqliteStore {
    backend: Backend,
    connections: Mutex<HashMap<String, Arc<Mutex<Connection>>>>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // creates the file and schema up front so startup fails fast
        Self::connect(&path)?;

        Ok(Self {
            backend: Backend::File(path),
            connections: Mutex::new(HashMap::new()),
        })
    }

    /// Private in-memory database for tests and one-off runs. All locations
    /// share its single connection, so flushes of different locations
    /// serialize on it. Use [`SqliteStore::open`] for concurrent streams.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            backend: Backend::Memory(Arc::new(Mutex::new(conn))),
            connections: Mutex::new(HashMap::new()),
        })
    }

    fn connect(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;

        Self::init_schema(&conn)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS traffic_counts (
                location TEXT,
                object_type TEXT,
                in_count INTEGER,
                out_count INTEGER,
                last_updated TEXT,
                PRIMARY KEY (location, object_type)
            )",
            [],
        )?;

        Ok(())
    }

    fn connection(&self, location: &str) -> Result<Arc<Mutex<Connection>>> {
        let path = match &self.backend {
            Backend::Memory(conn) => return Ok(conn.clone()),
            Backend::File(path) => path,
        };

        let mut conns = self.connections.lock();
        if let Some(conn) = conns.get(location) {
            return Ok(conn.clone());
        }

        let conn = Arc::new(Mutex::new(Self::connect(path)?));
        conns.insert(location.to_string(), conn.clone());

        Ok(conn)
    }
}

impl CountStore for SqliteStore {
    fn ensure_record(&self, location: &str, class: ObjectClass) -> Result<()> {
        let conn = self.connection(location)?;
        let conn = conn.lock();
        let now = chrono::Local::now().naive_local();

        conn.execute(
            "INSERT OR IGNORE INTO traffic_counts
             (location, object_type, in_count, out_count, last_updated)
             VALUES (?1, ?2, 0, 0, ?3)",
            params![location, class.name(), now.format(TIMESTAMP_FORMAT).to_string()],
        )?;

        Ok(())
    }

    fn read_counts(&self, location: &str) -> Result<CountTable> {
        let conn = self.connection(location)?;
        let conn = conn.lock();

        let mut stmt = conn.prepare(
            "SELECT object_type, in_count, out_count
             FROM traffic_counts
             WHERE location = ?1",
        )?;

        let rows = stmt.query_map(params![location], |row| {
            let object_type: String = row.get(0)?;
            let in_count: i64 = row.get(1)?;
            let out_count: i64 = row.get(2)?;

            Ok((object_type, in_count, out_count))
        })?;

        let mut table = CountTable::new();
        for row in rows {
            let (object_type, in_count, out_count) = row?;

            match ObjectClass::from_str(&object_type) {
                Ok(class) => {
                    table.insert(
                        class,
                        ClassCounts {
                            in_count: in_count.max(0) as u64,
                            out_count: out_count.max(0) as u64,
                        },
                    );
                }
                Err(_) => warn!(location, object_type, "stored row of unknown class ignored"),
            }
        }

        Ok(table)
    }

    fn write_counts(
        &self,
        location: &str,
        counts: &CountTable,
        timestamp: NaiveDateTime,
    ) -> Result<()> {
        let conn = self.connection(location)?;
        let mut conn = conn.lock();
        let ts = timestamp.format(TIMESTAMP_FORMAT).to_string();

        let tx = conn.transaction()?;
        for (class, c) in counts {
            tx.execute(
                "INSERT INTO traffic_counts
                 (location, object_type, in_count, out_count, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (location, object_type) DO UPDATE SET
                    in_count = excluded.in_count,
                    out_count = excluded.out_count,
                    last_updated = excluded.last_updated",
                params![
                    location,
                    class.name(),
                    c.in_count as i64,
                    c.out_count as i64,
                    ts
                ],
            )?;
        }
        tx.commit()?;

        Ok(())
    }

    fn totals(&self) -> Result<Vec<LocationTotal>> {
        let conn = match &self.backend {
            Backend::Memory(conn) => conn.clone(),
            Backend::File(path) => Arc::new(Mutex::new(Self::connect(path)?)),
        };
        let conn = conn.lock();

        let mut stmt = conn.prepare(
            "SELECT location, object_type, SUM(in_count + out_count) AS count
             FROM traffic_counts
             GROUP BY location, object_type
             ORDER BY location, object_type",
        )?;

        let rows = stmt.query_map([], |row| {
            let count: i64 = row.get(2)?;

            Ok(LocationTotal {
                location: row.get(0)?,
                object_type: row.get(1)?,
                count: count.max(0) as u64,
            })
        })?;

        let totals = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(totals)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub counts: ClassCounts,
    pub last_updated: Option<NaiveDateTime>,
}

/// In-process store with write failure injection.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<(String, ObjectClass), StoredRecord>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `write_counts` fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful `write_counts` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn record(&self, location: &str, class: ObjectClass) -> Option<StoredRecord> {
        self.records
            .lock()
            .get(&(location.to_string(), class))
            .cloned()
    }
}

impl CountStore for MemoryStore {
    fn ensure_record(&self, location: &str, class: ObjectClass) -> Result<()> {
        self.records
            .lock()
            .entry((location.to_string(), class))
            .or_insert(StoredRecord {
                counts: ClassCounts::default(),
                last_updated: None,
            });

        Ok(())
    }

    fn read_counts(&self, location: &str) -> Result<CountTable> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|((loc, _), _)| loc == location)
            .map(|((_, class), rec)| (*class, rec.counts))
            .collect())
    }

    fn write_counts(
        &self,
        location: &str,
        counts: &CountTable,
        timestamp: NaiveDateTime,
    ) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable(format!(
                "write for `{}` rejected",
                location
            )));
        }

        let mut records = self.records.lock();
        for (class, c) in counts {
            records.insert(
                (location.to_string(), *class),
                StoredRecord {
                    counts: *c,
                    last_updated: Some(timestamp),
                },
            );
        }
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    fn totals(&self) -> Result<Vec<LocationTotal>> {
        Ok(self
            .records
            .lock()
            .iter()
            .map(|((location, class), rec)| LocationTotal {
                location: location.clone(),
                object_type: class.name().to_string(),
                count: rec.counts.in_count + rec.counts.out_count,
            })
            .collect())
    }
}
