//! Flight boundary detection from raw throttle readings.
//!
//! The segmenter consumes one ordered batch of samples for one device and
//! decides whether a flight session begins, continues, or ends. The
//! threshold/idle-timeout pair is a hysteresis filter against throttle
//! noise: a single low reading must not end a session, but sustained
//! inactivity must.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::config::SegmenterConfig;
use crate::session::{FlightPhase, Session, SessionState};
use crate::telemetry::TelemetrySample;

/// Throttle fraction above which the vehicle counts as in active use.
pub const DEFAULT_ACTIVITY_THRESHOLD: f64 = 0.10;

/// Sustained low-throttle seconds required to close a session.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 15;

/// Stateless detector over per-device [`SessionState`] values.
///
/// The detector itself holds only its tuning; the mutable per-device state
/// is passed in and returned by [`FlightSegmenter::process`], so callers
/// control where it lives and how access to it is serialized.
#[derive(Debug, Clone)]
pub struct FlightSegmenter {
    activity_threshold: f64,
    idle_timeout: Duration,
}

impl Default for FlightSegmenter {
    fn default() -> Self {
        Self::new(
            DEFAULT_ACTIVITY_THRESHOLD,
            Duration::seconds(DEFAULT_IDLE_TIMEOUT_SECS as i64),
        )
    }
}

impl FlightSegmenter {
    /// Create a segmenter with explicit tuning.
    #[must_use]
    pub fn new(activity_threshold: f64, idle_timeout: Duration) -> Self {
        Self {
            activity_threshold,
            idle_timeout,
        }
    }

    /// Create a segmenter from the loaded configuration section.
    #[must_use]
    pub fn from_config(config: &SegmenterConfig) -> Self {
        Self::new(config.activity_threshold, config.idle_timeout())
    }

    /// Process one batch of samples for one device.
    ///
    /// The batch is sorted ascending by timestamp in place (arrival order is
    /// not trusted), samples are tagged with the open session's id, and the
    /// closure condition is evaluated once against the final state. `now` is
    /// the caller's wall clock; the idle gap is measured against it rather
    /// than the batch's own timestamps, so closure tracks real elapsed
    /// silence even under bursty or delayed ingestion.
    ///
    /// An empty batch returns the state unchanged.
    pub fn process(
        &self,
        device_id: Uuid,
        state: SessionState,
        samples: &mut [TelemetrySample],
        now: DateTime<Utc>,
    ) -> Segmentation {
        let mut state = state;
        let mut opened = None;

        if samples.is_empty() {
            return Segmentation {
                state,
                opened,
                closed: None,
                tagged_session: None,
            };
        }

        samples.sort_by(|a, b| a.ts.cmp(&b.ts));

        for sample in samples.iter() {
            if sample.throttle > self.activity_threshold {
                if state.active_session_id.is_none() {
                    let session = Session::open(device_id, sample.ts);
                    debug!(
                        session_id = %session.id,
                        device_id = %device_id,
                        start_ts = %session.start_ts,
                        "flight started"
                    );
                    state.active_session_id = Some(session.id);
                    opened = Some(session);
                }
                state.last_high_throttle_ts = Some(sample.ts);
            }
        }

        // Tag the whole batch while a session is open, including samples that
        // individually read low throttle.
        let tagged_session = state.active_session_id;
        if let Some(session_id) = tagged_session {
            for sample in samples.iter_mut() {
                sample.session_id = Some(session_id);
            }
        }

        // Closure is evaluated once per batch, against the last sample's
        // throttle and the wall-clock gap since the last high reading.
        let mut closed = None;
        if let (Some(session_id), Some(last_high), Some(last_sample)) = (
            state.active_session_id,
            state.last_high_throttle_ts,
            samples.last(),
        ) {
            if last_sample.throttle <= self.activity_threshold
                && now - last_high >= self.idle_timeout
            {
                debug!(
                    session_id = %session_id,
                    device_id = %device_id,
                    end_ts = %now,
                    "flight ended"
                );
                closed = Some(SessionClose {
                    session_id,
                    end_ts: now,
                });
                state = SessionState::default();
            }
        }

        Segmentation {
            state,
            opened,
            closed,
            tagged_session,
        }
    }
}

/// Outcome of processing one batch.
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Detector state to persist for the device.
    pub state: SessionState,

    /// A session opened by this batch, to be created in the repository.
    pub opened: Option<Session>,

    /// A session closed by this batch, to be finalized and analyzed.
    pub closed: Option<SessionClose>,

    /// The session id applied to every sample of the batch, if any.
    pub tagged_session: Option<Uuid>,
}

impl Segmentation {
    /// The lifecycle phase after this batch.
    #[must_use]
    pub fn phase(&self) -> FlightPhase {
        if self.closed.is_some() {
            FlightPhase::Closing
        } else {
            self.state.phase()
        }
    }
}

/// A closure decision: which session ended and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClose {
    /// The session that ended.
    pub session_id: Uuid,

    /// End timestamp recorded on the session (the processing wall clock).
    pub end_ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn batch(points: &[(i64, f64)]) -> Vec<TelemetrySample> {
        points
            .iter()
            .map(|&(secs, throttle)| TelemetrySample::new(ts(secs), throttle))
            .collect()
    }

    fn segmenter() -> FlightSegmenter {
        FlightSegmenter::default()
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let device = Uuid::new_v4();
        let mut samples = Vec::new();
        let result = segmenter().process(device, SessionState::default(), &mut samples, ts(100));

        assert_eq!(result.state, SessionState::default());
        assert!(result.opened.is_none());
        assert!(result.closed.is_none());
        assert!(result.tagged_session.is_none());
    }

    #[test]
    fn test_low_throttle_batch_without_session_is_noop() {
        let device = Uuid::new_v4();
        let mut samples = batch(&[(0, 0.0), (1, 0.05), (2, 0.0)]);
        let result = segmenter().process(device, SessionState::default(), &mut samples, ts(100));

        assert_eq!(result.state, SessionState::default());
        assert!(result.opened.is_none());
        assert!(result.closed.is_none());
        assert!(samples.iter().all(|s| s.session_id.is_none()));
        assert_eq!(result.phase(), FlightPhase::Idle);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        // Exactly 0.10 is not "above threshold".
        let device = Uuid::new_v4();
        let mut samples = batch(&[(0, 0.10)]);
        let result = segmenter().process(device, SessionState::default(), &mut samples, ts(100));
        assert!(result.opened.is_none());
    }

    #[test]
    fn test_opens_session_at_first_high_sample() {
        let device = Uuid::new_v4();
        let mut samples = batch(&[(0, 0.02), (1, 0.5), (2, 0.6)]);
        let result = segmenter().process(device, SessionState::default(), &mut samples, ts(2));

        let opened = result.opened.as_ref().expect("session should open");
        assert_eq!(opened.device_id, device);
        assert_eq!(opened.start_ts, ts(1));
        assert_eq!(result.state.active_session_id, Some(opened.id));
        assert_eq!(result.state.last_high_throttle_ts, Some(ts(2)));
        assert_eq!(result.phase(), FlightPhase::Active);
    }

    #[test]
    fn test_tags_every_sample_in_batch() {
        let device = Uuid::new_v4();
        let mut samples = batch(&[(0, 0.02), (1, 0.5), (2, 0.03)]);
        let result = segmenter().process(device, SessionState::default(), &mut samples, ts(2));

        let session_id = result.tagged_session.expect("batch should be tagged");
        assert!(samples.iter().all(|s| s.session_id == Some(session_id)));
    }

    #[test]
    fn test_one_session_per_contiguous_high_run() {
        // Two separate high runs in one batch still belong to one session.
        let device = Uuid::new_v4();
        let mut samples = batch(&[(0, 0.5), (1, 0.02), (2, 0.7), (3, 0.8)]);
        let result = segmenter().process(device, SessionState::default(), &mut samples, ts(3));

        assert!(result.opened.is_some());
        let session_id = result.state.active_session_id.unwrap();
        assert!(samples.iter().all(|s| s.session_id == Some(session_id)));
    }

    #[test]
    fn test_existing_session_is_not_reopened() {
        let device = Uuid::new_v4();
        let existing = Uuid::new_v4();
        let state = SessionState {
            active_session_id: Some(existing),
            last_high_throttle_ts: Some(ts(0)),
        };

        let mut samples = batch(&[(10, 0.9)]);
        let result = segmenter().process(device, state, &mut samples, ts(10));

        assert!(result.opened.is_none());
        assert_eq!(result.state.active_session_id, Some(existing));
        assert_eq!(result.state.last_high_throttle_ts, Some(ts(10)));
        assert_eq!(samples[0].session_id, Some(existing));
    }

    #[test]
    fn test_unsorted_batch_is_sorted_defensively() {
        let device = Uuid::new_v4();
        let mut samples = batch(&[(5, 0.5), (1, 0.02), (3, 0.7)]);
        let result = segmenter().process(device, SessionState::default(), &mut samples, ts(5));

        assert_eq!(samples[0].ts, ts(1));
        assert_eq!(samples[1].ts, ts(3));
        assert_eq!(samples[2].ts, ts(5));
        // First high sample by timestamp is t=3, not t=5.
        assert_eq!(result.opened.unwrap().start_ts, ts(3));
        assert_eq!(result.state.last_high_throttle_ts, Some(ts(5)));
    }

    #[test]
    fn test_full_flight_opens_and_closes_in_one_batch() {
        // Fifteen high samples at 1 s spacing, then one low sample, with the
        // wall clock far enough past the last high reading.
        let device = Uuid::new_v4();
        let mut points: Vec<(i64, f64)> = (0..15).map(|i| (i, 0.5)).collect();
        points.push((15, 0.02));
        let mut samples = batch(&points);

        let now = ts(14 + 20);
        let result = segmenter().process(device, SessionState::default(), &mut samples, now);

        let opened = result.opened.as_ref().expect("session should open");
        assert_eq!(opened.start_ts, ts(0));

        let closed = result.closed.expect("session should close");
        assert_eq!(closed.session_id, opened.id);
        assert_eq!(closed.end_ts, now);

        assert_eq!(samples.len(), 16);
        assert!(samples.iter().all(|s| s.session_id == Some(opened.id)));
        assert_eq!(result.state, SessionState::default());
        assert_eq!(result.phase(), FlightPhase::Closing);
    }

    #[test]
    fn test_no_closure_before_idle_timeout() {
        let device = Uuid::new_v4();
        let state = SessionState {
            active_session_id: Some(Uuid::new_v4()),
            last_high_throttle_ts: Some(ts(0)),
        };

        let mut samples = batch(&[(5, 0.02)]);
        // Only 10 s of silence; the timeout is 15 s.
        let result = segmenter().process(device, state.clone(), &mut samples, ts(10));

        assert!(result.closed.is_none());
        assert_eq!(result.state.active_session_id, state.active_session_id);
        assert_eq!(result.phase(), FlightPhase::Active);
    }

    #[test]
    fn test_no_closure_when_last_sample_is_high() {
        // A stale last_high_throttle_ts alone must not end the flight while
        // the batch still ends on an active reading.
        let device = Uuid::new_v4();
        let state = SessionState {
            active_session_id: Some(Uuid::new_v4()),
            last_high_throttle_ts: Some(ts(0)),
        };

        let mut samples = batch(&[(100, 0.5)]);
        let result = segmenter().process(device, state, &mut samples, ts(200));

        assert!(result.closed.is_none());
        assert_eq!(result.state.last_high_throttle_ts, Some(ts(100)));
    }

    #[test]
    fn test_closure_resets_state() {
        let device = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let state = SessionState {
            active_session_id: Some(session_id),
            last_high_throttle_ts: Some(ts(0)),
        };

        let mut samples = batch(&[(1, 0.02)]);
        let now = ts(100);
        let result = segmenter().process(device, state, &mut samples, now);

        let closed = result.closed.expect("session should close");
        assert_eq!(closed.session_id, session_id);
        assert_eq!(closed.end_ts, now);
        assert_eq!(result.state, SessionState::default());
        // The closing batch still carries the session's tag.
        assert_eq!(samples[0].session_id, Some(session_id));
    }

    #[test]
    fn test_session_opened_after_closure_survives_next_batch() {
        let device = Uuid::new_v4();
        let seg = segmenter();

        // First batch closes the stale session.
        let state = SessionState {
            active_session_id: Some(Uuid::new_v4()),
            last_high_throttle_ts: Some(ts(0)),
        };
        let mut first = batch(&[(1, 0.02)]);
        let result = seg.process(device, state, &mut first, ts(100));
        assert!(result.closed.is_some());

        // Next batch reopens; the new session must not be closed in the same
        // pass even though the wall clock is far ahead of the batch times.
        let mut second = batch(&[(101, 0.9)]);
        let result = seg.process(device, result.state, &mut second, ts(200));
        let reopened = result.opened.expect("new session should open");
        assert!(result.closed.is_none());
        assert_eq!(result.state.active_session_id, Some(reopened.id));
    }

    #[test]
    fn test_at_most_one_open_session_per_device() {
        let device = Uuid::new_v4();
        let seg = segmenter();
        let mut state = SessionState::default();
        let mut opened_count = 0;

        for start in [0i64, 10, 20] {
            let mut samples = batch(&[(start, 0.6), (start + 1, 0.7)]);
            let result = seg.process(device, state, &mut samples, ts(start + 1));
            if result.opened.is_some() {
                opened_count += 1;
            }
            state = result.state;
        }

        assert_eq!(opened_count, 1);
        assert!(state.is_active());
    }

    #[test]
    fn test_custom_tuning() {
        let seg = FlightSegmenter::new(0.5, Duration::seconds(2));
        let device = Uuid::new_v4();

        // 0.4 is below the custom threshold: no session.
        let mut samples = batch(&[(0, 0.4)]);
        let result = seg.process(device, SessionState::default(), &mut samples, ts(0));
        assert!(result.opened.is_none());

        // 0.6 opens one; 2 s of silence closes it.
        let mut samples = batch(&[(1, 0.6), (2, 0.1)]);
        let result = seg.process(device, result.state, &mut samples, ts(5));
        assert!(result.opened.is_some());
        assert!(result.closed.is_some());
    }
}
