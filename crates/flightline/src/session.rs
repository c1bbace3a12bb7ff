//! Flight session types.
//!
//! A session is a contiguous usage window bounded by activity-threshold
//! crossings, detected by the [`crate::segmenter::FlightSegmenter`]. This
//! module defines the session record, the per-device detector state, and the
//! lifecycle phase view over that state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::MetricsSet;

/// Per-device detector state, read-modify-written on every batch.
///
/// The state is a plain value object: it is only ever mutated behind the
/// per-device serialization boundary owned by the ingestion pipeline, never
/// directly by callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// The currently open session, if any.
    pub active_session_id: Option<Uuid>,

    /// Timestamp of the most recent above-threshold throttle reading.
    pub last_high_throttle_ts: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Check whether a session is currently open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active_session_id.is_some()
    }

    /// The lifecycle phase this state corresponds to.
    #[must_use]
    pub fn phase(&self) -> FlightPhase {
        if self.is_active() {
            FlightPhase::Active
        } else {
            FlightPhase::Idle
        }
    }
}

/// Lifecycle phase of a device's flight detection.
///
/// Transitions: `Idle` → `Active` on the first above-threshold sample,
/// `Active` → `Closing` when the idle-timeout condition fires, `Closing` →
/// `Idle` once the session is finalized. `Closing` is transient: it is only
/// observed on the segmentation result for the batch that ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightPhase {
    /// No open session.
    Idle,
    /// A session is open and samples are being tagged.
    Active,
    /// The closure condition fired in the current batch.
    Closing,
}

impl std::fmt::Display for FlightPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

/// A flight session: a closed or open usage window for one device.
///
/// Created when the segmenter observes throttle crossing the activity
/// threshold with no active session; finalized when sustained low throttle
/// triggers the idle timeout. Immutable once `metrics` is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: Uuid,

    /// The device this session belongs to.
    pub device_id: Uuid,

    /// When the session started (first above-threshold sample).
    pub start_ts: DateTime<Utc>,

    /// When the session ended; `None` while the session is open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<DateTime<Utc>>,

    /// Derived statistics, empty until the metrics engine has run.
    #[serde(default, skip_serializing_if = "MetricsSet::is_empty")]
    pub metrics: MetricsSet,
}

impl Session {
    /// Open a new session starting at the given instant.
    #[must_use]
    pub fn open(device_id: Uuid, start_ts: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id,
            start_ts,
            end_ts: None,
            metrics: MetricsSet::default(),
        }
    }

    /// Check whether the session is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.end_ts.is_none()
    }

    /// Elapsed time between start and end, if the session has closed.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_ts.map(|end| end - self.start_ts)
    }
}
