//! Core telemetry types for flightline.
//!
//! This module defines the fundamental data structures for representing
//! raw telemetry readings received from remote vehicles.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A single telemetry reading from one vehicle.
///
/// Only the timestamp and throttle are required; every other channel is
/// optional and may be missing on any given reading. Samples are immutable
/// once stored, except for `session_id`, which is assigned post-hoc by the
/// flight segmenter and never reassigned afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// When the reading was taken (UTC).
    pub ts: DateTime<Utc>,

    /// Throttle fraction in `[0.0, 1.0]`.
    pub throttle: f64,

    /// Battery voltage in volts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,

    /// Battery current in amperes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,

    /// Monotonic charge counter in mAh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_drawn: Option<f64>,

    /// Latitude in degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,

    /// Longitude in degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,

    /// Altitude in meters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,

    /// Velocity along the x axis in m/s.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vx: Option<f64>,

    /// Velocity along the y axis in m/s.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vy: Option<f64>,

    /// Velocity along the z axis in m/s.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vz: Option<f64>,

    /// Roll angle in degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll: Option<f64>,

    /// Pitch angle in degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,

    /// Yaw angle in degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yaw: Option<f64>,

    /// Radio signal strength indicator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,

    /// Open extension map for fields the engine does not consume.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,

    /// Flight session this sample belongs to, assigned by the segmenter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
}

impl TelemetrySample {
    /// Create a sample with only the required fields set.
    #[must_use]
    pub fn new(ts: DateTime<Utc>, throttle: f64) -> Self {
        Self {
            ts,
            throttle,
            voltage: None,
            current: None,
            charge_drawn: None,
            latitude: None,
            longitude: None,
            altitude: None,
            vx: None,
            vy: None,
            vz: None,
            roll: None,
            pitch: None,
            yaw: None,
            rssi: None,
            extra: HashMap::new(),
            session_id: None,
        }
    }

    /// Set the battery channels.
    #[must_use]
    pub fn with_power(mut self, voltage: f64, current: f64) -> Self {
        self.voltage = Some(voltage);
        self.current = Some(current);
        self
    }

    /// Set the GPS position.
    #[must_use]
    pub fn with_position(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    /// Set the attitude angles.
    #[must_use]
    pub fn with_attitude(mut self, roll: f64, pitch: f64, yaw: f64) -> Self {
        self.roll = Some(roll);
        self.pitch = Some(pitch);
        self.yaw = Some(yaw);
        self
    }

    /// Set the monotonic charge counter.
    #[must_use]
    pub fn with_charge_drawn(mut self, charge_drawn: f64) -> Self {
        self.charge_drawn = Some(charge_drawn);
        self
    }

    /// Validate the sample's numeric fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the throttle is non-finite or outside `[0.0, 1.0]`,
    /// or if any optional channel carries a non-finite value.
    pub fn validate(&self) -> Result<()> {
        if !self.throttle.is_finite() || !(0.0..=1.0).contains(&self.throttle) {
            return Err(Error::invalid_sample(format!(
                "throttle {} outside [0.0, 1.0]",
                self.throttle
            )));
        }

        let channels = [
            ("voltage", self.voltage),
            ("current", self.current),
            ("charge_drawn", self.charge_drawn),
            ("latitude", self.latitude),
            ("longitude", self.longitude),
            ("altitude", self.altitude),
            ("vx", self.vx),
            ("vy", self.vy),
            ("vz", self.vz),
            ("roll", self.roll),
            ("pitch", self.pitch),
            ("yaw", self.yaw),
        ];
        for (name, value) in channels {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(Error::invalid_sample(format!("{name} is not finite")));
                }
            }
        }

        Ok(())
    }
}

/// Validate an ingestion batch against the configured size cap.
///
/// Empty batches are accepted (the caller treats them as a no-op).
///
/// # Errors
///
/// Returns an error if the batch exceeds `max_batch_size` or any sample in
/// it fails validation.
pub fn validate_batch(samples: &[TelemetrySample], max_batch_size: usize) -> Result<()> {
    if samples.len() > max_batch_size {
        return Err(Error::BatchTooLarge {
            len: samples.len(),
            max: max_batch_size,
        });
    }
    for sample in samples {
        sample.validate()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_new_sets_required_fields() {
        let sample = TelemetrySample::new(ts(0), 0.5);
        assert_eq!(sample.ts, ts(0));
        assert!((sample.throttle - 0.5).abs() < f64::EPSILON);
        assert!(sample.voltage.is_none());
        assert!(sample.session_id.is_none());
        assert!(sample.extra.is_empty());
    }

    #[test]
    fn test_builder_helpers() {
        let sample = TelemetrySample::new(ts(0), 0.5)
            .with_power(16.8, 12.0)
            .with_position(47.6, -122.3)
            .with_attitude(1.0, -2.0, 90.0)
            .with_charge_drawn(150.0);

        assert_eq!(sample.voltage, Some(16.8));
        assert_eq!(sample.current, Some(12.0));
        assert_eq!(sample.latitude, Some(47.6));
        assert_eq!(sample.longitude, Some(-122.3));
        assert_eq!(sample.roll, Some(1.0));
        assert_eq!(sample.pitch, Some(-2.0));
        assert_eq!(sample.yaw, Some(90.0));
        assert_eq!(sample.charge_drawn, Some(150.0));
    }

    #[test]
    fn test_validate_accepts_bounds() {
        assert!(TelemetrySample::new(ts(0), 0.0).validate().is_ok());
        assert!(TelemetrySample::new(ts(0), 1.0).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_throttle() {
        assert!(TelemetrySample::new(ts(0), 1.5).validate().is_err());
        assert!(TelemetrySample::new(ts(0), -0.1).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_throttle() {
        assert!(TelemetrySample::new(ts(0), f64::NAN).validate().is_err());
        assert!(TelemetrySample::new(ts(0), f64::INFINITY).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_channel() {
        let mut sample = TelemetrySample::new(ts(0), 0.5);
        sample.voltage = Some(f64::NAN);

        let result = sample.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("voltage"));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let sample = TelemetrySample::new(ts(5), 0.42)
            .with_power(15.2, 8.0)
            .with_position(51.5, -0.1);

        let json = serde_json::to_string(&sample).unwrap();
        let deserialized: TelemetrySample = serde_json::from_str(&json).unwrap();

        assert_eq!(sample, deserialized);
    }

    #[test]
    fn test_serialization_skips_absent_fields() {
        let sample = TelemetrySample::new(ts(0), 0.1);
        let json = serde_json::to_string(&sample).unwrap();

        assert!(!json.contains("voltage"));
        assert!(!json.contains("session_id"));
        assert!(!json.contains("extra"));
    }

    #[test]
    fn test_deserialization_with_missing_optionals() {
        let json = r#"{"ts": "2024-01-15T10:00:00Z", "throttle": 0.3}"#;
        let sample: TelemetrySample = serde_json::from_str(json).unwrap();

        assert!((sample.throttle - 0.3).abs() < f64::EPSILON);
        assert!(sample.voltage.is_none());
        assert!(sample.latitude.is_none());
        assert!(sample.extra.is_empty());
    }

    #[test]
    fn test_deserialization_keeps_extra_fields() {
        let json = r#"{"ts": "2024-01-15T10:00:00Z", "throttle": 0.3, "extra": {"fw": "1.2.0"}}"#;
        let sample: TelemetrySample = serde_json::from_str(json).unwrap();

        assert_eq!(
            sample.extra.get("fw"),
            Some(&serde_json::Value::String("1.2.0".to_string()))
        );
    }

    #[test]
    fn test_validate_batch_accepts_empty() {
        assert!(validate_batch(&[], 500).is_ok());
    }

    #[test]
    fn test_validate_batch_rejects_oversized() {
        let batch: Vec<_> = (0..3).map(|i| TelemetrySample::new(ts(i), 0.2)).collect();
        let result = validate_batch(&batch, 2);

        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            Error::BatchTooLarge { len: 3, max: 2 }
        ));
    }

    #[test]
    fn test_validate_batch_rejects_invalid_sample() {
        let batch = vec![
            TelemetrySample::new(ts(0), 0.2),
            TelemetrySample::new(ts(1), 2.0),
        ];
        assert!(validate_batch(&batch, 500).is_err());
    }
}
