//! Time-series payload model and the per-sample processing engine.
//!
//! A TSD payload carries an ordered array of samples plus a descriptor of
//! how the per-sample timestamps are encoded. The engine reconstructs a
//! measurement time for every sample, applies the future gate, emits a
//! live-attribute patch when the sample is the newest seen for its stream,
//! and (when enabled) hands the sample to the chunk buffer irrespective of
//! that check.

use log::warn;
use serde::Deserialize;
use serde_json::Value;

use crate::clock::{absolute_to_measurement, TICK_PICOSECONDS};
use crate::translators::{Setter, Transform};
use crate::{CompoundId, Patch, Times, TranslateError, Translator};

/// How a payload's per-sample timestamps relate to real time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampKind {
    /// Offsets from an arbitrary origin; the last sample is approximately
    /// the record's measurement time.
    Relative,

    /// Backwards distances from the record's measurement time.
    RelativeReversed,

    /// Absolute instants (UTC epoch).
    Absolute,
}

impl<'de> Deserialize<'de> for TimestampKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Anything that is not one of the two relative markers counts as
        // absolute, matching the producers' encoding.
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "relative" => TimestampKind::Relative,
            "relative (reversed)" => TimestampKind::RelativeReversed,
            _ => TimestampKind::Absolute,
        })
    }
}

/// Unit of the per-sample timestamp scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampUnit {
    Picoseconds,
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
}

impl TimestampUnit {
    /// Picoseconds per one unit.
    pub fn picoseconds(self) -> i128 {
        match self {
            TimestampUnit::Picoseconds => 1,
            TimestampUnit::Nanoseconds => 1_000,
            TimestampUnit::Microseconds => 1_000_000,
            TimestampUnit::Milliseconds => 1_000_000_000,
            TimestampUnit::Seconds => 1_000_000_000_000,
            TimestampUnit::Minutes => 60_000_000_000_000,
        }
    }
}

/// The timestamp descriptor of a TSD payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TsdTimestamp {
    #[serde(rename = "absolute or relative")]
    pub kind: TimestampKind,
    pub unit: TimestampUnit,
}

/// One sample: a timestamp scalar (interpreted per the descriptor) and an
/// opaque value payload handed to the domain transform.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TsdSample {
    #[serde(default)]
    pub timestamp: Option<i64>,
    pub values: Value,
}

/// A complete time-series payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TsdPayload {
    #[serde(default)]
    pub timestamp: Option<TsdTimestamp>,
    pub data: Vec<TsdSample>,
}

impl TsdPayload {
    pub(crate) fn from_value(value: &Value) -> Result<Self, TranslateError> {
        TsdPayload::deserialize(value).map_err(TranslateError::Payload)
    }
}

impl Translator {
    /// Run one TSD payload through the processing pipeline.
    ///
    /// Returns the live-attribute patches in sample order. Chunk-buffer
    /// admissions happen as a side effect and are not rolled back if a
    /// later sample fails.
    pub(crate) fn process_tsd(
        &mut self,
        setter: &Setter,
        id: CompoundId,
        buffering: bool,
        transform: &Transform,
        payload: &TsdPayload,
        times: &Times,
        now: f64,
    ) -> Result<Vec<Patch>, TranslateError> {
        let mut out = Vec::new();
        if payload.data.is_empty() {
            return Ok(out);
        }

        let meas_time = times.measurement;

        // For the relative encoding, treat the last sample's timestamp as
        // the anchor equal to the inbound measurement time and derive the
        // absolute instant of the encoding's origin from it.
        let origin_picosec: Option<i128> = match (payload.timestamp, meas_time) {
            (Some(desc), Some(m)) if desc.kind == TimestampKind::Relative => {
                let last = payload
                    .data
                    .last()
                    .and_then(|sample| sample.timestamp)
                    .ok_or(TranslateError::MissingSampleTimestamp)?;
                Some(m as i128 * TICK_PICOSECONDS - desc.unit.picoseconds() * last as i128)
            }
            _ => None,
        };

        for sample in payload.data.iter() {
            let mut newtimes = *times;
            if let Some(desc) = payload.timestamp {
                let multiplier = desc.unit.picoseconds();
                let sample_ts = sample
                    .timestamp
                    .ok_or(TranslateError::MissingSampleTimestamp)? as i128;
                match desc.kind {
                    TimestampKind::Relative => {
                        if let Some(origin) = origin_picosec {
                            let picosec = origin + multiplier * sample_ts;
                            newtimes.measurement =
                                Some(picosec.div_euclid(TICK_PICOSECONDS) as i64);
                        }
                    }
                    TimestampKind::RelativeReversed => {
                        if let Some(m) = meas_time {
                            let picosec = m as i128 * TICK_PICOSECONDS - multiplier * sample_ts;
                            newtimes.measurement =
                                Some(picosec.div_euclid(TICK_PICOSECONDS) as i64);
                        }
                    }
                    TimestampKind::Absolute => {
                        newtimes.measurement =
                            Some(absolute_to_measurement(multiplier * sample_ts));
                    }
                }
            }

            // No measurement time from the record nor from the sample:
            // nothing to anchor the sample to.
            let new_meas_time = match newtimes.measurement {
                Some(m) => m,
                None => continue,
            };

            if !self.clock.not_too_new(new_meas_time, now) {
                warn!(
                    "bad measurement time for {}: {} maps to {:.3}, current time {:.3}",
                    id,
                    new_meas_time,
                    self.clock.measurement_to_local(new_meas_time),
                    now
                );
                continue;
            }

            let value = transform.apply(&sample.values)?;
            // Data past the age limit is normal at startup; skip silently.
            if self.latest.check_and_update(id, new_meas_time)
                && self.clock.not_too_old(new_meas_time, now)
            {
                setter.emit(id.device, &value, newtimes, &mut out)?;
            }
            if buffering {
                self.chunks
                    .add(&mut self.dedup, &self.clock, id, value, newtimes, now);
            }
        }

        Ok(out)
    }

    /// [`Translator::process_tsd`] for a payload still in raw JSON form.
    pub(crate) fn process_tsd_value(
        &mut self,
        setter: &Setter,
        id: CompoundId,
        buffering: bool,
        transform: &Transform,
        payload: &Value,
        times: &Times,
        now: f64,
    ) -> Result<Vec<Patch>, TranslateError> {
        let payload = TsdPayload::from_value(payload)?;
        self.process_tsd(setter, id, buffering, transform, &payload, times, now)
    }
}
