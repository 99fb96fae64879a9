//! Measurement-time constants and the device clock synchronizer.
//!
//! The downstream only accepts measurement times in T-ticks, but the age
//! gates must work in wall-clock seconds and stay robust against devices
//! whose clocks are not NTP-synchronized. Anchoring on observed samples
//! sidesteps both: whenever an inbound record carries a measurement time,
//! the anchor pair (local receive time, measurement time) is overwritten,
//! and any other measurement time can then be mapped into local time
//! relative to that anchor.

use crate::Times;

/// Picoseconds per T-tick (one T-tick is 1 µs).
pub const TICK_PICOSECONDS: i128 = 1_000_000;

/// Seconds per T-tick.
pub const TICK_SECONDS: f64 = 1e-6;

/// Tolerance for future-timestamp detection: a measurement time mapping
/// later than `now` plus this value is rejected. Nonzero to avoid false
/// alerts from slightly unsynchronized clocks.
pub const TOO_NEW_TOLERANCE_SEC: f64 = 2.0;

/// Age limit for history buffering: data mapping earlier than `now` minus
/// this value is discarded.
pub const DATA_AGE_LIMIT_SEC: f64 = 3600.0;

/// Two-point anchor mapping measurement times into local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockSync {
    anchor_local: f64,
    anchor_measurement: i64,
}

impl ClockSync {
    pub fn new() -> Self {
        ClockSync::default()
    }

    /// Overwrite the anchor from an inbound record, if it carries a
    /// nonzero measurement time.
    pub fn synchronize(&mut self, times: &Times, now: f64) {
        if let Some(m) = times.measurement {
            if m != 0 {
                self.anchor_local = now;
                self.anchor_measurement = m;
            }
        }
    }

    /// Map a measurement time to local wall-clock seconds via the anchor.
    pub fn measurement_to_local(&self, meas_time: i64) -> f64 {
        self.anchor_local - (self.anchor_measurement - meas_time) as f64 * TICK_SECONDS
    }

    /// Whether the measurement time still fits the history buffering window.
    pub fn not_too_old(&self, meas_time: i64, now: f64) -> bool {
        self.measurement_to_local(meas_time) + DATA_AGE_LIMIT_SEC >= now
    }

    /// Whether the measurement time does not point into the future.
    pub fn not_too_new(&self, meas_time: i64, now: f64) -> bool {
        self.measurement_to_local(meas_time) < now + TOO_NEW_TOLERANCE_SEC
    }
}

/// Convert an absolute time in picoseconds to a measurement time.
///
/// Measurement times are UTC with epoch 1970-01-01 in µs; absolute TSD
/// times are expected to be the same kind of instant, which keeps leap
/// seconds out of the conversion.
pub fn absolute_to_measurement(picoseconds: i128) -> i64 {
    picoseconds.div_euclid(TICK_PICOSECONDS) as i64
}
