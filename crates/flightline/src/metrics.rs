//! Derived flight statistics.
//!
//! The metrics engine is a pure pass over the full sample set of one closed
//! session: the same input always yields the same output, so recomputation
//! is idempotent. Every metric is independently omitted (`None`) when its
//! required inputs are entirely absent; missing data is never reported as
//! zero.

use serde::{Deserialize, Serialize};

use crate::telemetry::TelemetrySample;

/// Mean Earth radius in meters, used for great-circle distances.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Throttle fraction above which a sample counts as full throttle.
const FULL_THROTTLE_FRACTION: f64 = 0.8;

/// Attitude angle (degrees) beyond which a sample counts as acrobatic.
const ACROBATIC_ANGLE_DEG: f64 = 45.0;

/// Fixed-shape record of derived session statistics.
///
/// Absent metrics are represented as `None` and skipped during
/// serialization, never written as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSet {
    /// Seconds between the first and last sample timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight_duration_s: Option<f64>,

    /// Maximum instantaneous power draw in watts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_power_w: Option<f64>,

    /// Mean power draw in watts over samples carrying voltage and current.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_power_w: Option<f64>,

    /// Time-integrated energy use in watt-hours.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_wh: Option<f64>,

    /// Charge estimate in mAh derived from the integrated power curve.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_mah_from_power: Option<f64>,

    /// Charge drawn in mAh as reported by the monotonic counter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_mah: Option<f64>,

    /// Minimum observed battery voltage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_voltage: Option<f64>,

    /// Sample standard deviation of the roll angle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll_std_dev: Option<f64>,

    /// Maximum absolute roll angle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll_max_rate: Option<f64>,

    /// Sample standard deviation of the pitch angle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch_std_dev: Option<f64>,

    /// Maximum absolute pitch angle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch_max_rate: Option<f64>,

    /// Sample standard deviation of the yaw angle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yaw_std_dev: Option<f64>,

    /// Maximum absolute yaw angle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yaw_max_rate: Option<f64>,

    /// Mean absolute consecutive throttle difference (lower = smoother).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throttle_jerk_score: Option<f64>,

    /// Mean throttle over the session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_throttle: Option<f64>,

    /// 90th percentile of the throttle distribution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throttle_90th_percentile: Option<f64>,

    /// Share of samples with throttle above 0.8, as a percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_time_full_throttle: Option<f64>,

    /// Great-circle track length in kilometers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_distance_km: Option<f64>,

    /// Energy efficiency in watt-hours per kilometer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wh_per_km: Option<f64>,

    /// Percentage of samples with |roll| or |pitch| beyond 45 degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freestyle_score: Option<f64>,
}

impl MetricsSet {
    /// Check whether every metric is absent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Compute the full metrics set over one closed session's samples.
///
/// The input must be every sample of the session, sorted ascending by
/// timestamp. An empty input yields an empty metrics set.
#[must_use]
#[allow(clippy::missing_panics_doc)] // first/last are guarded by the emptiness check
pub fn compute(samples: &[TelemetrySample]) -> MetricsSet {
    let mut metrics = MetricsSet::default();
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return metrics;
    };
    let n = samples.len();

    metrics.flight_duration_s = Some(elapsed_s(first.ts, last.ts));

    // Energy and power, over samples carrying both voltage and current.
    let powers: Vec<Option<f64>> = samples
        .iter()
        .map(|s| match (s.voltage, s.current) {
            (Some(v), Some(c)) => Some(v * c),
            _ => None,
        })
        .collect();
    if powers.iter().any(Option::is_some) {
        metrics.peak_power_w = fold_max(powers.iter().flatten().copied());
        metrics.average_power_w = mean(powers.iter().flatten().copied());

        // Elapsed-time weighting: each consecutive pair contributes the later
        // sample's power held over the pair's time delta.
        let mut total_wh = 0.0;
        for i in 1..n {
            if let Some(power) = powers[i] {
                total_wh += power * elapsed_s(samples[i - 1].ts, samples[i].ts) / 3600.0;
            }
        }
        metrics.total_wh = Some(total_wh);

        if let Some(mean_voltage) = mean(samples.iter().filter_map(|s| s.voltage)) {
            if mean_voltage > 0.0 {
                metrics.total_mah_from_power = Some(total_wh * 1000.0 / mean_voltage);
            }
        }
    }

    // Charge counter range; the counter is assumed monotonic within a session.
    let charges: Vec<f64> = samples.iter().filter_map(|s| s.charge_drawn).collect();
    if let (Some(max), Some(min)) = (
        fold_max(charges.iter().copied()),
        fold_min(charges.iter().copied()),
    ) {
        metrics.total_mah = Some(max - min);
    }

    metrics.min_voltage = fold_min(samples.iter().filter_map(|s| s.voltage));

    // Attitude stability per axis.
    (metrics.roll_std_dev, metrics.roll_max_rate) = axis_stats(samples.iter().map(|s| s.roll));
    (metrics.pitch_std_dev, metrics.pitch_max_rate) = axis_stats(samples.iter().map(|s| s.pitch));
    (metrics.yaw_std_dev, metrics.yaw_max_rate) = axis_stats(samples.iter().map(|s| s.yaw));

    // Throttle shape. Throttle is required on every sample, so these are
    // always present for a non-empty session.
    let throttles: Vec<f64> = samples.iter().map(|s| s.throttle).collect();
    if n >= 2 {
        let jerk: f64 = throttles.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
        metrics.throttle_jerk_score = Some(jerk / (n - 1) as f64);
    }
    metrics.average_throttle = mean(throttles.iter().copied());
    metrics.throttle_90th_percentile = Some(percentile(&throttles, 90.0));
    let full = throttles
        .iter()
        .filter(|&&t| t > FULL_THROTTLE_FRACTION)
        .count();
    metrics.percent_time_full_throttle = Some(full as f64 / n as f64 * 100.0);

    // Track length over consecutive pairs where both samples carry a fix.
    // A GPS gap drops the segments on either side of it.
    let mut distance_m = 0.0;
    let mut pair_count = 0usize;
    for pair in samples.windows(2) {
        if let (Some(lat1), Some(lon1), Some(lat2), Some(lon2)) = (
            pair[0].latitude,
            pair[0].longitude,
            pair[1].latitude,
            pair[1].longitude,
        ) {
            distance_m += haversine_m(lat1, lon1, lat2, lon2);
            pair_count += 1;
        }
    }
    if pair_count > 0 {
        let distance_km = distance_m / 1000.0;
        metrics.total_distance_km = Some(distance_km);
        if distance_km > 0.01 {
            if let Some(total_wh) = metrics.total_wh {
                metrics.wh_per_km = Some(total_wh / distance_km);
            }
        }
    }

    // Acrobatics heuristic, present whenever any attitude reading exists.
    if samples.iter().any(|s| s.roll.is_some() || s.pitch.is_some()) {
        let acrobatic = samples
            .iter()
            .filter(|s| {
                s.roll.is_some_and(|r| r.abs() > ACROBATIC_ANGLE_DEG)
                    || s.pitch.is_some_and(|p| p.abs() > ACROBATIC_ANGLE_DEG)
            })
            .count();
        metrics.freestyle_score = Some(acrobatic as f64 / n as f64 * 100.0);
    }

    metrics
}

/// Elapsed seconds between two instants, with millisecond resolution.
fn elapsed_s(from: chrono::DateTime<chrono::Utc>, to: chrono::DateTime<chrono::Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

/// Arithmetic mean, `None` on an empty iterator.
fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values {
        sum += v;
        count += 1;
    }
    (count > 0).then(|| sum / count as f64)
}

fn fold_max(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
}

fn fold_min(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v))))
}

/// Sample standard deviation (n-1 divisor); `None` below two values.
fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Std deviation and max absolute value for one attitude axis.
fn axis_stats(values: impl Iterator<Item = Option<f64>>) -> (Option<f64>, Option<f64>) {
    let present: Vec<f64> = values.flatten().collect();
    let max_abs = fold_max(present.iter().map(|v| v.abs()));
    (sample_std_dev(&present), max_abs)
}

/// Percentile by linear interpolation between order statistics.
///
/// Matches the conventional `rank = pct/100 * (n-1)` definition. The input
/// must be non-empty.
fn percentile(values: &[f64], pct: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let weight = rank - lo as f64;
        sorted[lo] * (1.0 - weight) + sorted[hi] * weight
    }
}

/// Great-circle distance in meters between two lat/lon points.
fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}
