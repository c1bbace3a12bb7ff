//! Storage layer for flightline.
//!
//! This module provides `SQLite`-based persistent storage for telemetry
//! samples, flight sessions, and per-device detector state. One [`Storage`]
//! value implements all three store traits the engine depends on, so a
//! single database file backs the whole pipeline.

pub mod migrations;
pub mod schema;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metrics::MetricsSet;
use crate::session::{Session, SessionState};
use crate::store::{SessionRepository, StateStore, TelemetryStore};
use crate::telemetry::TelemetrySample;

/// Telemetry sample columns fetched by every sample query, in mapper order.
const SAMPLE_COLUMNS: &str = "ts, throttle, voltage, current, charge_drawn, latitude, longitude, \
     altitude, vx, vy, vz, roll, pitch, yaw, rssi, extra, session_id";

/// Storage engine for telemetry, sessions, and detector state.
///
/// The connection is guarded by a mutex; statements are short-lived, so the
/// async store traits simply take the lock for the duration of each call.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema
    /// initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        // Initialize schema
        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("storage connection mutex poisoned"))
    }

    /// Append a batch of samples for a device.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_samples(&self, device_id: Uuid, samples: &[TelemetrySample]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r"
                INSERT INTO telemetry (device_id, ts, throttle, voltage, current, charge_drawn,
                    latitude, longitude, altitude, vx, vy, vz, roll, pitch, yaw, rssi, extra,
                    session_id)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                    ?17, ?18)
                ",
            )?;
            for sample in samples {
                let extra = if sample.extra.is_empty() {
                    None
                } else {
                    Some(serde_json::to_string(&sample.extra)?)
                };
                stmt.execute(params![
                    device_id.to_string(),
                    sample.ts.to_rfc3339(),
                    sample.throttle,
                    sample.voltage,
                    sample.current,
                    sample.charge_drawn,
                    sample.latitude,
                    sample.longitude,
                    sample.altitude,
                    sample.vx,
                    sample.vy,
                    sample.vz,
                    sample.roll,
                    sample.pitch,
                    sample.yaw,
                    sample.rssi,
                    extra,
                    sample.session_id.map(|id| id.to_string()),
                ])?;
            }
        }
        tx.commit()?;

        debug!(
            "Inserted {} samples for device {}",
            samples.len(),
            device_id
        );
        Ok(samples.len())
    }

    /// Tag untagged stored samples matching the given timestamps.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn tag_samples(
        &self,
        device_id: Uuid,
        timestamps: &[DateTime<Utc>],
        session_id: Uuid,
    ) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut tagged = 0;
        {
            let mut stmt = tx.prepare(
                r"
                UPDATE telemetry SET session_id = ?1
                WHERE device_id = ?2 AND ts = ?3 AND session_id IS NULL
                ",
            )?;
            for ts in timestamps {
                tagged += stmt.execute(params![
                    session_id.to_string(),
                    device_id.to_string(),
                    ts.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(tagged)
    }

    /// Fetch every sample of one session, ordered ascending by timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn samples_for_session(
        &self,
        device_id: Uuid,
        session_id: Uuid,
    ) -> Result<Vec<TelemetrySample>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r"
            SELECT {SAMPLE_COLUMNS}
            FROM telemetry WHERE device_id = ?1 AND session_id = ?2
            ORDER BY ts ASC
            ",
        ))?;

        let samples = stmt
            .query_map(
                params![device_id.to_string(), session_id.to_string()],
                Self::row_to_sample,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(samples)
    }

    /// Count all stored samples.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn sample_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM telemetry", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Persist a newly opened session.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO sessions (id, device_id, start_ts, end_ts, metrics)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                session.id.to_string(),
                session.device_id.to_string(),
                session.start_ts.to_rfc3339(),
                session.end_ts.map(|ts| ts.to_rfc3339()),
                serde_json::to_string(&session.metrics)?,
            ],
        )?;
        Ok(())
    }

    /// Set the end timestamp of a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session does not exist or the database
    /// operation fails.
    pub fn set_session_end(&self, session_id: Uuid, end_ts: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE sessions SET end_ts = ?1 WHERE id = ?2",
            params![end_ts.to_rfc3339(), session_id.to_string()],
        )?;
        if affected == 0 {
            return Err(Error::SessionNotFound(session_id));
        }
        Ok(())
    }

    /// Attach computed metrics to a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session does not exist or the database
    /// operation fails.
    pub fn set_session_metrics(&self, session_id: Uuid, metrics: &MetricsSet) -> Result<()> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE sessions SET metrics = ?1 WHERE id = ?2",
            params![serde_json::to_string(metrics)?, session_id.to_string()],
        )?;
        if affected == 0 {
            return Err(Error::SessionNotFound(session_id));
        }
        Ok(())
    }

    /// Fetch a session by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn session(&self, session_id: Uuid) -> Result<Option<Session>> {
        let conn = self.conn()?;
        let session = conn
            .query_row(
                r"
                SELECT id, device_id, start_ts, end_ts, metrics
                FROM sessions WHERE id = ?1
                ",
                [session_id.to_string()],
                Self::row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    /// List a device's sessions, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn sessions_for_device(&self, device_id: Uuid, limit: usize) -> Result<Vec<Session>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r"
            SELECT id, device_id, start_ts, end_ts, metrics
            FROM sessions WHERE device_id = ?1
            ORDER BY start_ts DESC LIMIT ?2
            ",
        )?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let sessions = stmt
            .query_map(
                params![device_id.to_string(), limit_i64],
                Self::row_to_session,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sessions)
    }

    /// Fetch the detector state for a device.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the stored state
    /// cannot be parsed.
    pub fn device_state(&self, device_id: Uuid) -> Result<Option<SessionState>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT state FROM device_state WHERE device_id = ?1",
                [device_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|text| serde_json::from_str(&text).map_err(Error::from))
            .transpose()
    }

    /// Persist the detector state for a device.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_device_state(&self, device_id: Uuid, state: &SessionState) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO device_state (device_id, state) VALUES (?1, ?2)",
            params![device_id.to_string(), serde_json::to_string(state)?],
        )?;
        Ok(())
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total_samples = self.sample_count()?;
        let conn = self.conn()?;

        let total_sessions: i64 =
            conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        let open_sessions: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE end_ts IS NULL",
            [],
            |row| row.get(0),
        )?;

        let oldest: Option<String> = conn
            .query_row(
                "SELECT ts FROM telemetry ORDER BY ts ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let newest: Option<String> = conn
            .query_row(
                "SELECT ts FROM telemetry ORDER BY ts DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let oldest_sample = oldest
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let newest_sample = newest
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        // Get database file size
        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_samples,
            total_sessions,
            open_sessions,
            oldest_sample,
            newest_sample,
            db_size_bytes,
        })
    }

    fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
    }

    fn parse_uuid(idx: usize, value: &str) -> rusqlite::Result<Uuid> {
        Uuid::parse_str(value).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    }

    /// Convert a database row to a sample; columns as in `SAMPLE_COLUMNS`.
    fn row_to_sample(row: &rusqlite::Row) -> rusqlite::Result<TelemetrySample> {
        let ts_str: String = row.get(0)?;
        let extra_str: Option<String> = row.get(15)?;
        let session_str: Option<String> = row.get(16)?;

        let extra: HashMap<String, serde_json::Value> = match extra_str {
            Some(text) => serde_json::from_str(&text).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    15,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            None => HashMap::new(),
        };
        let session_id = session_str
            .map(|s| Self::parse_uuid(16, &s))
            .transpose()?;

        Ok(TelemetrySample {
            ts: Self::parse_ts(0, &ts_str)?,
            throttle: row.get(1)?,
            voltage: row.get(2)?,
            current: row.get(3)?,
            charge_drawn: row.get(4)?,
            latitude: row.get(5)?,
            longitude: row.get(6)?,
            altitude: row.get(7)?,
            vx: row.get(8)?,
            vy: row.get(9)?,
            vz: row.get(10)?,
            roll: row.get(11)?,
            pitch: row.get(12)?,
            yaw: row.get(13)?,
            rssi: row.get(14)?,
            extra,
            session_id,
        })
    }

    /// Convert a database row to a session record.
    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
        let id_str: String = row.get(0)?;
        let device_str: String = row.get(1)?;
        let start_str: String = row.get(2)?;
        let end_str: Option<String> = row.get(3)?;
        let metrics_str: String = row.get(4)?;

        let end_ts = end_str.map(|s| Self::parse_ts(3, &s)).transpose()?;
        let metrics: MetricsSet = serde_json::from_str(&metrics_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Session {
            id: Self::parse_uuid(0, &id_str)?,
            device_id: Self::parse_uuid(1, &device_str)?,
            start_ts: Self::parse_ts(2, &start_str)?,
            end_ts,
            metrics,
        })
    }
}

#[async_trait]
impl StateStore for Storage {
    async fn get(&self, device_id: Uuid) -> Result<Option<SessionState>> {
        self.device_state(device_id)
    }

    async fn set(&self, device_id: Uuid, state: &SessionState) -> Result<()> {
        self.set_device_state(device_id, state)
    }
}

#[async_trait]
impl TelemetryStore for Storage {
    async fn insert(&self, device_id: Uuid, samples: &[TelemetrySample]) -> Result<usize> {
        self.insert_samples(device_id, samples)
    }

    async fn assign_session(
        &self,
        device_id: Uuid,
        timestamps: &[DateTime<Utc>],
        session_id: Uuid,
    ) -> Result<usize> {
        self.tag_samples(device_id, timestamps, session_id)
    }

    async fn session_samples(
        &self,
        device_id: Uuid,
        session_id: Uuid,
    ) -> Result<Vec<TelemetrySample>> {
        self.samples_for_session(device_id, session_id)
    }
}

#[async_trait]
impl SessionRepository for Storage {
    async fn create(&self, session: &Session) -> Result<()> {
        self.create_session(session)
    }

    async fn set_end(&self, session_id: Uuid, end_ts: DateTime<Utc>) -> Result<()> {
        self.set_session_end(session_id, end_ts)
    }

    async fn set_metrics(&self, session_id: Uuid, metrics: &MetricsSet) -> Result<()> {
        self.set_session_metrics(session_id, metrics)
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<Session>> {
        self.session(session_id)
    }

    async fn list_by_device(&self, device_id: Uuid, limit: usize) -> Result<Vec<Session>> {
        self.sessions_for_device(device_id, limit)
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Total number of telemetry samples stored.
    pub total_samples: i64,
    /// Total number of sessions recorded.
    pub total_sessions: i64,
    /// Number of sessions without an end timestamp.
    pub open_sessions: i64,
    /// Timestamp of the oldest sample.
    pub oldest_sample: Option<DateTime<Utc>>,
    /// Timestamp of the newest sample.
    pub newest_sample: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
