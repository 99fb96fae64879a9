//! Translator for location attributes: movement flag and GPS positions.

use serde_json::{Map, Value};

use super::{Setter, Transform};
use crate::{Collection, CompoundId, Patch, Times, TranslateError, Translator};

pub(crate) fn translate(
    translator: &mut Translator,
    data: &Map<String, Value>,
    device: u64,
    times: &Times,
    now: f64,
    out: &mut Vec<Patch>,
) -> Result<(), TranslateError> {
    if let Some(value) = data.get("status.lastaccel.ismoving") {
        Setter::single(Collection::Locations, "isMoving").emit(
            device,
            &Transform::Boolean.apply(value)?,
            *times,
            out,
        )?;
    }
    for key in ["status.gpsdata_tsd", "status.gps.gpsdata_tsd"].iter() {
        if let Some(value) = data.get(*key) {
            let patches = translator.process_tsd_value(
                &Setter::single(Collection::Locations, "gpsPosition"),
                CompoundId::new(device, "gpsPosition"),
                true,
                &Transform::Gps,
                value,
                times,
                now,
            )?;
            out.extend(patches);
        }
    }
    if let Some(value) = data.get("status.gps.gpsdata_ex_tsd") {
        let patches = translator.process_tsd_value(
            &Setter::GpsExtended,
            CompoundId::new(device, "gpsPositionEx"),
            false,
            &Transform::GpsExtended,
            value,
            times,
            now,
        )?;
        out.extend(patches);
    }
    Ok(())
}
