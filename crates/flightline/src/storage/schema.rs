//! `SQLite` schema definitions for flightline.
//!
//! This module contains the SQL statements for creating and managing
//! the database schema.

/// SQL statement to create the telemetry table.
pub const CREATE_TELEMETRY_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS telemetry (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id TEXT NOT NULL,
    ts TEXT NOT NULL,
    throttle REAL NOT NULL,
    voltage REAL,
    current REAL,
    charge_drawn REAL,
    latitude REAL,
    longitude REAL,
    altitude REAL,
    vx REAL,
    vy REAL,
    vz REAL,
    roll REAL,
    pitch REAL,
    yaw REAL,
    rssi INTEGER,
    extra TEXT,
    session_id TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create the sessions table.
pub const CREATE_SESSIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    device_id TEXT NOT NULL,
    start_ts TEXT NOT NULL,
    end_ts TEXT,
    metrics TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create the per-device detector state table.
pub const CREATE_DEVICE_STATE_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS device_state (
    device_id TEXT PRIMARY KEY,
    state TEXT NOT NULL
)
";

/// SQL statement to create an index for device/time-range telemetry queries.
pub const CREATE_TELEMETRY_DEVICE_TS_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_telemetry_device_ts ON telemetry(device_id, ts)
";

/// SQL statement to create an index for per-session telemetry queries.
pub const CREATE_TELEMETRY_SESSION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_telemetry_session ON telemetry(session_id)
";

/// SQL statement to create an index for per-device session listings.
pub const CREATE_SESSIONS_DEVICE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_sessions_device ON sessions(device_id)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_TELEMETRY_TABLE,
    CREATE_SESSIONS_TABLE,
    CREATE_DEVICE_STATE_TABLE,
    CREATE_TELEMETRY_DEVICE_TS_INDEX,
    CREATE_TELEMETRY_SESSION_INDEX,
    CREATE_SESSIONS_DEVICE_INDEX,
    CREATE_METADATA_TABLE,
];
