//! SQLite-backed measurement store, one database file per node.

use super::{MeasurementQuery, MeasurementStore, StoredMeasurement};
use crate::error::{RelayError, Result};
use crate::measurement::{DayPhase, Measurement};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS weather_measurements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    day_phase TEXT NOT NULL,
    temperature REAL NOT NULL,
    humidity REAL,
    pressure REAL NOT NULL,
    is_raining INTEGER NOT NULL,
    producer_id TEXT NOT NULL,
    node_name TEXT NOT NULL,
    received_at TEXT NOT NULL,
    peer TEXT
);
CREATE INDEX IF NOT EXISTS idx_weather_producer ON weather_measurements(producer_id);
CREATE INDEX IF NOT EXISTS idx_weather_received_at ON weather_measurements(received_at);
"#;

const SELECT_COLUMNS: &str = "SELECT id, timestamp, day_phase, temperature, humidity, pressure, \
     is_raining, producer_id, node_name, received_at, peer FROM weather_measurements";

/// Store writing to a SQLite file. Blocking calls run on tokio's blocking
/// pool; one connection is shared behind a mutex.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self::init(conn)?;
        info!("[Store] SQLite database ready at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| RelayError::Store(format!("store task failed: {}", e)))?
    }
}

fn row_to_stored(row: &Row<'_>) -> rusqlite::Result<StoredMeasurement> {
    let phase: String = row.get(2)?;
    let received: String = row.get(9)?;
    let day_phase = DayPhase::from_str(&phase).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let received_at = DateTime::parse_from_rfc3339(&received)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(StoredMeasurement {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        day_phase,
        temperature: row.get(3)?,
        humidity: row.get(4)?,
        pressure: row.get(5)?,
        is_raining: row.get::<_, i64>(6)? != 0,
        producer_id: row.get(7)?,
        node_name: row.get(8)?,
        received_at,
        peer: row.get(10)?,
    })
}

/// Build the WHERE clause for a query. Receive times are stored as
/// fixed-width RFC 3339 UTC strings so text comparison orders correctly.
fn where_clause(query: &MeasurementQuery) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();
    if let Some(producer) = query.producer_id.as_deref().filter(|p| !p.is_empty()) {
        conditions.push("producer_id = ?");
        values.push(Value::Text(producer.to_string()));
    }
    if let Some(from) = query.from {
        conditions.push("received_at >= ?");
        values.push(Value::Text(encode_time(&from)));
    }
    if let Some(to) = query.to {
        conditions.push("received_at <= ?");
        values.push(Value::Text(encode_time(&to)));
    }
    if conditions.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), values)
    }
}

fn encode_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[async_trait]
impl MeasurementStore for SqliteStore {
    async fn save(
        &self,
        measurement: &Measurement,
        producer_id: &str,
        node_name: &str,
        peer: Option<&str>,
    ) -> Result<()> {
        let m = measurement.clone();
        let producer_id = producer_id.to_string();
        let node_name = node_name.to_string();
        let peer = peer.map(str::to_string);
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO weather_measurements (timestamp, day_phase, temperature, humidity, \
                 pressure, is_raining, producer_id, node_name, received_at, peer) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    m.timestamp,
                    m.day_phase.to_string(),
                    m.temperature,
                    m.humidity,
                    m.pressure,
                    m.is_raining as i64,
                    producer_id,
                    node_name,
                    encode_time(&Utc::now()),
                    peer,
                ],
            )?;
            debug!(
                "[Store] Saved measurement producer={}, node={}, timestamp={}",
                producer_id, node_name, m.timestamp
            );
            Ok(())
        })
        .await
    }

    async fn query(&self, query: &MeasurementQuery) -> Result<Vec<StoredMeasurement>> {
        let (clause, values) = where_clause(query);
        self.with_conn(move |conn| {
            let sql = format!("{}{} ORDER BY received_at ASC, id ASC", SELECT_COLUMNS, clause);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(values), row_to_stored)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn latest(&self, producer_id: Option<&str>) -> Result<Option<StoredMeasurement>> {
        let query = MeasurementQuery {
            producer_id: producer_id.map(str::to_string),
            ..MeasurementQuery::default()
        };
        let (clause, values) = where_clause(&query);
        self.with_conn(move |conn| {
            let sql = format!(
                "{}{} ORDER BY received_at DESC, id DESC LIMIT 1",
                SELECT_COLUMNS, clause
            );
            let row = conn
                .query_row(&sql, rusqlite::params_from_iter(values), row_to_stored)
                .optional()?;
            Ok(row)
        })
        .await
    }

    async fn count(&self, producer_id: Option<&str>) -> Result<u64> {
        let query = MeasurementQuery {
            producer_id: producer_id.map(str::to_string),
            ..MeasurementQuery::default()
        };
        let (clause, values) = where_clause(&query);
        self.with_conn(move |conn| {
            let sql = format!("SELECT COUNT(*) FROM weather_measurements{}", clause);
            let count: i64 =
                conn.query_row(&sql, rusqlite::params_from_iter(values), |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }
}
