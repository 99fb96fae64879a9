//! Bus message models and the per-message processing entry points.

use log::{debug, warn};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::translators;
use crate::{MessageError, Patch, Times, Translated, Translator};

/// Header of a BDCL message.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct BdclHeader {
    #[serde(rename = "uniqId")]
    pub uniq_id: Option<u64>,

    /// Measurement timestamp in T-ticks, when the collection layer could
    /// associate one with the data.
    #[serde(rename = "measTs", default)]
    pub meas_ts: Option<i64>,

    /// Server receive timestamp in T-ticks.
    #[serde(rename = "serverTs", default)]
    pub server_ts: Option<i64>,
}

/// A decoded LoLaN message from the base data-collection layer.
#[derive(Debug, Clone, Deserialize)]
pub struct BdclMessage {
    #[serde(default)]
    pub header: BdclHeader,

    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}

fn default_uuid() -> String {
    "None".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SclPosition {
    #[serde(rename = "positionVector")]
    pub position_vector: Value,
}

/// A computed-position message from the positioning service.
#[derive(Debug, Clone, Deserialize)]
pub struct SclMessage {
    #[serde(rename = "devId", default)]
    pub dev_id: u64,

    #[serde(default = "default_uuid")]
    pub uuid: String,

    #[serde(default)]
    pub timestamp: Option<i64>,

    #[serde(rename = "sensorsetbufferTime", default)]
    pub sensorsetbuffer_time: Option<i64>,

    #[serde(default)]
    pub positions: Option<Vec<SclPosition>>,
}

impl Translator {
    /// Process one BDCL bus payload.
    ///
    /// `now` is the current local wall-clock time in seconds. Messages
    /// without a data map or a device id produce no output. Per message
    /// the engine advances clock synchronization and the dedup trim,
    /// dispatches every translator, then closes any history chunk whose
    /// policy this message satisfied.
    pub fn process_bdcl(&mut self, payload: &str, now: f64) -> Result<Translated, MessageError> {
        let message: BdclMessage = serde_json::from_str(payload)?;
        let mut output = Translated::default();

        let (data, device) = match (message.data, message.header.uniq_id) {
            (Some(data), Some(device)) => (data, device),
            _ => return Ok(output),
        };

        let mut times = Times {
            measurement: message.header.meas_ts,
            sensorsetbuffer: message.header.server_ts,
        };
        if times.measurement.is_none() {
            if times.sensorsetbuffer.is_some() {
                times.measurement = times.sensorsetbuffer;
                debug!(
                    "no measurement time for this data from '{}', assuming that the sensor-set-buffer time is also the measurement time",
                    device
                );
            } else {
                warn!(
                    "neither measurement time nor sensor-set-buffer time present for data from '{}'",
                    device
                );
            }
        }

        self.clock.synchronize(&times, now);
        self.dedup.maybe_trim(&self.clock, now);

        translators::dispatch(self, &data, device, &times, now, &mut output.patches);

        output.chunks = self.chunks.maybe_flush(now);
        Ok(output)
    }

    /// Process one positioning-service payload into its single patch.
    ///
    /// SCL patches bypass every core gate; the message's own times are
    /// forwarded untouched.
    pub fn process_scl(&self, payload: &str) -> Result<Patch, MessageError> {
        let message: SclMessage = serde_json::from_str(payload)?;

        let value = match message.positions {
            Some(positions) => Value::Array(
                positions
                    .into_iter()
                    .map(|position| position.position_vector)
                    .collect(),
            ),
            None => serde_json::json!([[0.0, 0.0, 0.0]]),
        };

        Ok(Patch {
            coll: crate::Collection::SclPositions,
            id: format!("tag.{}", message.dev_id),
            attr: format!("sclProfiles/{}/rawPositions", message.uuid),
            value,
            times: Times {
                measurement: message.timestamp,
                sensorsetbuffer: message.sensorsetbuffer_time,
            },
        })
    }
}
