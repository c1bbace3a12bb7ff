//! Store interfaces the engine depends on, plus in-memory implementations.
//!
//! The engine talks to three collaborators: a telemetry store (append-only
//! samples, queryable by device and session), a session repository (session
//! records and their derived metrics), and a session state store (the
//! per-device detector state). Each is a trait so the engine can run against
//! SQLite-backed storage, the in-memory stores below, or anything else that
//! satisfies the contracts.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metrics::MetricsSet;
use crate::session::{Session, SessionState};
use crate::telemetry::TelemetrySample;

/// Per-device detector state, keyed by device id.
///
/// The state is logically owned by the flight segmenter: callers other than
/// the ingestion pipeline must treat it as opaque. A read or write failure is
/// fatal to the batch that needed it; the segmenter never falls back to
/// default state on error.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch the state for a device, `None` if the device has none yet.
    async fn get(&self, device_id: Uuid) -> Result<Option<SessionState>>;

    /// Persist the state for a device, replacing any previous value.
    async fn set(&self, device_id: Uuid, state: &SessionState) -> Result<()>;
}

/// Append-only telemetry sample store.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Append a batch of samples for a device. Returns the number stored.
    async fn insert(&self, device_id: Uuid, samples: &[TelemetrySample]) -> Result<usize>;

    /// Tag stored samples with a session id.
    ///
    /// Only samples matching the given timestamps that do not already carry
    /// a session id are tagged (a sample's session assignment is permanent).
    /// Returns the number of samples tagged.
    async fn assign_session(
        &self,
        device_id: Uuid,
        timestamps: &[DateTime<Utc>],
        session_id: Uuid,
    ) -> Result<usize>;

    /// Fetch every sample of one session, ordered ascending by timestamp.
    async fn session_samples(
        &self,
        device_id: Uuid,
        session_id: Uuid,
    ) -> Result<Vec<TelemetrySample>>;
}

/// Repository of session records keyed by session id.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Persist a newly opened session.
    async fn create(&self, session: &Session) -> Result<()>;

    /// Set the end timestamp of a session.
    async fn set_end(&self, session_id: Uuid, end_ts: DateTime<Utc>) -> Result<()>;

    /// Attach computed metrics to a session.
    async fn set_metrics(&self, session_id: Uuid, metrics: &MetricsSet) -> Result<()>;

    /// Fetch a session by id.
    async fn get(&self, session_id: Uuid) -> Result<Option<Session>>;

    /// List a device's sessions, most recent first.
    async fn list_by_device(&self, device_id: Uuid, limit: usize) -> Result<Vec<Session>>;
}

/// In-memory state store backed by a hash map.
///
/// This is the in-process stand-in for the deployment's key-value cache;
/// state lives exactly as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<Uuid, SessionState>>,
}

impl MemoryStateStore {
    /// Create an empty state store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, device_id: Uuid) -> Result<Option<SessionState>> {
        let states = self
            .states
            .read()
            .map_err(|_| Error::state_unavailable(device_id, "state map poisoned"))?;
        Ok(states.get(&device_id).cloned())
    }

    async fn set(&self, device_id: Uuid, state: &SessionState) -> Result<()> {
        let mut states = self
            .states
            .write()
            .map_err(|_| Error::state_unavailable(device_id, "state map poisoned"))?;
        states.insert(device_id, state.clone());
        Ok(())
    }
}

/// In-memory telemetry store backed by per-device vectors.
#[derive(Debug, Default)]
pub struct MemoryTelemetryStore {
    samples: RwLock<HashMap<Uuid, Vec<TelemetrySample>>>,
}

impl MemoryTelemetryStore {
    /// Create an empty telemetry store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err() -> Error {
        Error::internal("telemetry map poisoned")
    }
}

#[async_trait]
impl TelemetryStore for MemoryTelemetryStore {
    async fn insert(&self, device_id: Uuid, samples: &[TelemetrySample]) -> Result<usize> {
        let mut map = self.samples.write().map_err(|_| Self::lock_err())?;
        let device_samples = map.entry(device_id).or_default();
        device_samples.extend_from_slice(samples);
        device_samples.sort_by(|a, b| a.ts.cmp(&b.ts));
        Ok(samples.len())
    }

    async fn assign_session(
        &self,
        device_id: Uuid,
        timestamps: &[DateTime<Utc>],
        session_id: Uuid,
    ) -> Result<usize> {
        let mut map = self.samples.write().map_err(|_| Self::lock_err())?;
        let Some(device_samples) = map.get_mut(&device_id) else {
            return Ok(0);
        };

        let mut tagged = 0;
        for sample in device_samples.iter_mut() {
            if sample.session_id.is_none() && timestamps.contains(&sample.ts) {
                sample.session_id = Some(session_id);
                tagged += 1;
            }
        }
        Ok(tagged)
    }

    async fn session_samples(
        &self,
        device_id: Uuid,
        session_id: Uuid,
    ) -> Result<Vec<TelemetrySample>> {
        let map = self.samples.read().map_err(|_| Self::lock_err())?;
        let samples = map
            .get(&device_id)
            .map(|device_samples| {
                device_samples
                    .iter()
                    .filter(|s| s.session_id == Some(session_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(samples)
    }
}

/// In-memory session repository backed by a hash map.
#[derive(Debug, Default)]
pub struct MemorySessionRepository {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl MemorySessionRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err() -> Error {
        Error::internal("session map poisoned")
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn create(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(|_| Self::lock_err())?;
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn set_end(&self, session_id: Uuid, end_ts: DateTime<Utc>) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(|_| Self::lock_err())?;
        let session = sessions
            .get_mut(&session_id)
            .ok_or(Error::SessionNotFound(session_id))?;
        session.end_ts = Some(end_ts);
        Ok(())
    }

    async fn set_metrics(&self, session_id: Uuid, metrics: &MetricsSet) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(|_| Self::lock_err())?;
        let session = sessions
            .get_mut(&session_id)
            .ok_or(Error::SessionNotFound(session_id))?;
        session.metrics = metrics.clone();
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<Session>> {
        let sessions = self.sessions.read().map_err(|_| Self::lock_err())?;
        Ok(sessions.get(&session_id).cloned())
    }

    async fn list_by_device(&self, device_id: Uuid, limit: usize) -> Result<Vec<Session>> {
        let sessions = self.sessions.read().map_err(|_| Self::lock_err())?;
        let mut device_sessions: Vec<Session> = sessions
            .values()
            .filter(|s| s.device_id == device_id)
            .cloned()
            .collect();
        device_sessions.sort_by(|a, b| b.start_ts.cmp(&a.start_ts));
        device_sessions.truncate(limit);
        Ok(device_sessions)
    }
}
