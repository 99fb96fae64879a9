//! Translator for general tag attributes: battery, power, temperature,
//! accelerometer, distance and pressure.

use serde_json::{Map, Value};

use super::{Setter, Transform};
use crate::{Collection, CompoundId, Patch, Times, TranslateError, Translator};

/// Acceleration range corresponding to the full data bit depth, with g
/// taken as 10 m/s² (±2 g).
fn accel_scale(databits: i64) -> f64 {
    40.0 / 2f64.powi(databits as i32)
}

fn accel_databits(container: &Map<String, Value>) -> Result<i64, TranslateError> {
    container
        .get("status.lastaccel.databits")
        .and_then(Value::as_i64)
        .ok_or(TranslateError::MissingKey("status.lastaccel.databits"))
}

/// The accelerometer payload is a container holding either a time-series
/// or a plain `x`/`y`/`z` triple.
fn accel_data(
    translator: &mut Translator,
    device: u64,
    value: &Value,
    times: &Times,
    now: f64,
    out: &mut Vec<Patch>,
) -> Result<(), TranslateError> {
    let container = value
        .as_object()
        .ok_or(TranslateError::BadShape("status.lastaccel.acc_raw_packed"))?;

    if let Some(tsd) = container.get("status.lastaccel.acc_data_tsd") {
        let scale = Transform::Scale(accel_scale(accel_databits(container)?));
        let patches = translator.process_tsd_value(
            &Setter::single(Collection::GeneralTags, "accelerometerA"),
            CompoundId::new(device, "accelerometerA"),
            true,
            &scale,
            tsd,
            times,
            now,
        )?;
        out.extend(patches);
    } else if ["status.lastaccel.x", "status.lastaccel.y", "status.lastaccel.z"]
        .iter()
        .all(|k| container.contains_key(*k))
    {
        let scale = Transform::Scale(accel_scale(accel_databits(container)?));
        let triple = Value::from(vec![
            container["status.lastaccel.x"].clone(),
            container["status.lastaccel.y"].clone(),
            container["status.lastaccel.z"].clone(),
        ]);
        Setter::single(Collection::GeneralTags, "accelerometerA").emit(
            device,
            &scale.apply(&triple)?,
            *times,
            out,
        )?;
    }
    Ok(())
}

pub(crate) fn translate(
    translator: &mut Translator,
    data: &Map<String, Value>,
    device: u64,
    times: &Times,
    now: f64,
    out: &mut Vec<Patch>,
) -> Result<(), TranslateError> {
    if let Some(value) = data.get("status.battery.level") {
        Setter::single(Collection::GeneralTags, "batteryVoltage").emit(device, value, *times, out)?;
    }
    if let Some(value) = data.get("status.battery.charging") {
        Setter::Charging.emit(device, value, *times, out)?;
    }
    if let Some(value) = data.get("standard.power.battery_voltage") {
        Setter::single(Collection::GeneralTags, "batteryVoltage").emit(device, value, *times, out)?;
    }
    if let Some(value) = data.get("standard.power.external_voltage") {
        Setter::single(Collection::GeneralTags, "externalVoltage").emit(device, value, *times, out)?;
    }
    if let Some(value) = data.get("status.temperature") {
        Setter::single(Collection::GeneralTags, "temperatureC").emit(device, value, *times, out)?;
    }
    if let Some(value) = data.get("status.lastaccel.acc_raw_packed") {
        accel_data(translator, device, value, times, now, out)?;
    }
    if let Some(value) = data.get("status.distance_tsd") {
        let patches = translator.process_tsd_value(
            &Setter::single(Collection::GeneralTags, "distanceM"),
            CompoundId::new(device, "distanceM"),
            true,
            &Transform::Divide(1000.0),
            value,
            times,
            now,
        )?;
        out.extend(patches);
    }
    if let Some(value) = data.get("status.pressure_tsd") {
        let patches = translator.process_tsd_value(
            &Setter::single(Collection::GeneralTags, "pressurePa"),
            CompoundId::new(device, "pressurePa"),
            true,
            &Transform::Identity,
            value,
            times,
            now,
        )?;
        out.extend(patches);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(data: Value, measurement: Option<i64>) -> Vec<Patch> {
        let mut translator = Translator::new();
        let times = Times {
            measurement,
            sensorsetbuffer: None,
        };
        translator.clock.synchronize(&times, 100.0);
        let mut out = Vec::new();
        translate(
            &mut translator,
            data.as_object().unwrap(),
            3,
            &times,
            100.0,
            &mut out,
        )
        .unwrap();
        out
    }

    #[test]
    fn battery_level_is_direct() {
        let out = run(json!({"status.battery.level": 3.7}), Some(1000));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].coll, Collection::GeneralTags);
        assert_eq!(out[0].id, "3");
        assert_eq!(out[0].attr, "batteryVoltage");
        assert_eq!(out[0].value, json!(3.7));
        assert_eq!(out[0].times.measurement, Some(1000));
    }

    #[test]
    fn accelerometer_triple_is_scaled() {
        let out = run(
            json!({"status.lastaccel.acc_raw_packed": {
                "status.lastaccel.x": 100,
                "status.lastaccel.y": -50,
                "status.lastaccel.z": 0,
                "status.lastaccel.databits": 10,
            }}),
            Some(5000),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].attr, "accelerometerA");
        assert_eq!(out[0].value, json!([3.90625, -1.953125, 0.0]));
        assert_eq!(out[0].times.measurement, Some(5000));
    }

    #[test]
    fn accelerometer_tsd_is_scaled_per_sample() {
        let out = run(
            json!({"status.lastaccel.acc_raw_packed": {
                "status.lastaccel.databits": 10,
                "status.lastaccel.acc_data_tsd": {
                    "timestamp": {"absolute or relative": "relative (reversed)", "unit": "milliseconds"},
                    "data": [{"timestamp": 0, "values": [512, 0, -512]}],
                },
            }}),
            Some(5000),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, json!([20.0, 0.0, -20.0]));
        assert_eq!(out[0].times.measurement, Some(5000));
    }

    #[test]
    fn accelerometer_without_either_form_is_ignored() {
        let out = run(
            json!({"status.lastaccel.acc_raw_packed": {
                "status.lastaccel.databits": 10,
            }}),
            Some(5000),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn distance_is_converted_to_meters() {
        let out = run(
            json!({"status.distance_tsd": {
                "timestamp": {"absolute or relative": "relative (reversed)", "unit": "seconds"},
                "data": [{"timestamp": 0, "values": 1500}],
            }}),
            Some(1_000_000),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].attr, "distanceM");
        assert_eq!(out[0].value, json!(1.5));
    }

    #[test]
    fn missing_databits_is_an_error() {
        let mut translator = Translator::new();
        let times = Times {
            measurement: Some(1000),
            sensorsetbuffer: None,
        };
        let data = json!({"status.lastaccel.acc_raw_packed": {
            "status.lastaccel.x": 1,
            "status.lastaccel.y": 2,
            "status.lastaccel.z": 3,
        }});
        let mut out = Vec::new();
        let result = translate(
            &mut translator,
            data.as_object().unwrap(),
            3,
            &times,
            100.0,
            &mut out,
        );
        assert!(matches!(result, Err(TranslateError::MissingKey(_))));
    }
}
