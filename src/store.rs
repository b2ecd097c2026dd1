use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::open_db_connection;

/// One persisted occupancy observation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectionRecord {
    pub device: String,
    /// `YYYYMMDDHHMMSS`, optionally followed by millisecond digits.
    pub timestamp: String,
    pub count: i64,
}

impl DetectionRecord {
    pub fn new(device: impl Into<String>, timestamp: impl Into<String>, count: i64) -> Self {
        Self {
            device: device.into(),
            timestamp: timestamp.into(),
            count,
        }
    }
}

/// Append-only detection log.
///
/// Range queries compare the 14-digit timestamp prefix, inclusive at both ends, so
/// millisecond-suffixed rows fall into the second they were written in.
pub trait DetectionLog: Send + Sync {
    fn insert(&self, record: &DetectionRecord) -> Result<()>;

    /// Sum of all counts `> 0` with a timestamp in `[start, end]`. Zero when nothing matches.
    fn sum_positive_between(&self, start: &str, end: &str) -> Result<i64>;
}

/// Connection cache keyed by store name.
///
/// The map lock only covers lookup and creation. Each connection carries its own lock
/// so camera threads sharing a store name are serialized per call.
pub struct StoreRegistry {
    base_dir: PathBuf,
    connections: Mutex<HashMap<String, Arc<Mutex<Connection>>>>,
}

impl StoreRegistry {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Open (or reuse) the store called `name`.
    ///
    /// `file:` URIs are opened as-is; anything else is a file under the base directory.
    pub fn connect(&self, name: &str) -> Result<SqliteDetectionLog> {
        if name.trim().is_empty() {
            return Err(anyhow!("store name must not be empty"));
        }
        let mut connections = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(conn) = connections.get(name) {
            return Ok(SqliteDetectionLog {
                name: name.to_string(),
                conn: conn.clone(),
            });
        }

        let location = self.location(name)?;
        let conn = open_db_connection(&location)
            .with_context(|| format!("failed to open store {}", location))?;
        ensure_schema(&conn).with_context(|| format!("failed to prepare store {}", location))?;
        log::info!("store {} opened at {}", name, location);

        let conn = Arc::new(Mutex::new(conn));
        connections.insert(name.to_string(), conn.clone());
        Ok(SqliteDetectionLog {
            name: name.to_string(),
            conn,
        })
    }

    /// Names of the stores opened so far.
    pub fn open_stores(&self) -> Vec<String> {
        let connections = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = connections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every cached connection. Handles already given out stay usable until dropped.
    pub fn close_all(&self) {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn location(&self, name: &str) -> Result<String> {
        if name.starts_with("file:") {
            return Ok(name.to_string());
        }
        let path = self.base_dir.join(name);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        path.to_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("store path {} is not valid UTF-8", path.display()))
    }
}

/// Sum of positive counts whose 14-digit prefix lies in `[?1, ?2]`.
///
/// The upper bound is widened by `999` so millisecond stamps of the last second match,
/// and the bare column comparison keeps the timestamp index usable.
const HISTORY_SUM_SQL: &str = r#"
    SELECT COALESCE(SUM(box_count), 0) FROM detection_results
    WHERE timestamp BETWEEN ?1 AND ?2 || '999' AND box_count > 0
"#;

fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;

        CREATE TABLE IF NOT EXISTS detection_results (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          device TEXT NOT NULL,
          timestamp TEXT NOT NULL,
          box_count INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_detection_results_timestamp
          ON detection_results(timestamp);
        "#,
    )?;
    Ok(())
}

/// SQLite-backed log sharing one cached connection per store name.
#[derive(Clone)]
pub struct SqliteDetectionLog {
    name: String,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDetectionLog {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All rows in insertion order.
    pub fn records(&self) -> Result<Vec<DetectionRecord>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn
            .prepare("SELECT device, timestamp, box_count FROM detection_results ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(DetectionRecord {
                device: row.get(0)?,
                timestamp: row.get(1)?,
                count: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl DetectionLog for SqliteDetectionLog {
    fn insert(&self, record: &DetectionRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO detection_results(device, timestamp, box_count) VALUES (?1, ?2, ?3)",
            params![record.device, record.timestamp, record.count],
        )
        .with_context(|| format!("insert into store {} failed", self.name))?;
        Ok(())
    }

    fn sum_positive_between(&self, start: &str, end: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let total: i64 = conn
            .query_row(
                HISTORY_SUM_SQL,
                params![start, end],
                |row| row.get(0),
            )
            .with_context(|| format!("history query on store {} failed", self.name))?;
        Ok(total)
    }
}

/// Process-local log for tests and store-less runs.
#[derive(Debug, Default)]
pub struct InMemoryDetectionLog {
    records: Mutex<Vec<DetectionRecord>>,
}

impl InMemoryDetectionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DetectionRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DetectionLog for InMemoryDetectionLog {
    fn insert(&self, record: &DetectionRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    fn sum_positive_between(&self, start: &str, end: &str) -> Result<i64> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .iter()
            .filter(|r| r.count > 0)
            .filter(|r| {
                let prefix = r.timestamp.get(..14).unwrap_or(&r.timestamp);
                prefix >= start && prefix <= end
            })
            .map(|r| r.count)
            .sum())
    }
}
