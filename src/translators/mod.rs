//! The per-domain translators and the registry dispatching them.
//!
//! A translator inspects the decoded LoLaN key/value map of one inbound
//! message and appends the patches produced by every key it recognizes.
//! Emitters and value transforms are small tagged enums built once per
//! dispatch, not closures, so a message costs no emitter allocations.

pub(crate) mod generaltags;
pub(crate) mod locations;
pub(crate) mod scanner;
pub(crate) mod twr;

use log::error;
use serde_json::{Map, Value};

use crate::{Collection, Patch, Times, TranslateError, Translator};

pub(crate) type TranslatorFn = fn(
    &mut Translator,
    &Map<String, Value>,
    u64,
    &Times,
    f64,
    &mut Vec<Patch>,
) -> Result<(), TranslateError>;

/// All translators, in dispatch (and therefore patch emission) order.
pub(crate) const TRANSLATORS: [(&str, TranslatorFn); 4] = [
    ("generaltags", generaltags::translate),
    ("locations", locations::translate),
    ("scanner", scanner::translate),
    ("twr", twr::translate),
];

/// Run every translator over one message, isolating failures: a decoder
/// error is logged with the translator's name and the remaining
/// translators still run.
pub(crate) fn dispatch(
    translator: &mut Translator,
    data: &Map<String, Value>,
    device: u64,
    times: &Times,
    now: f64,
    out: &mut Vec<Patch>,
) {
    for (name, translate) in TRANSLATORS.iter() {
        if let Err(e) = translate(translator, data, device, times, now, out) {
            error!("translator '{}' failed for device '{}': {}", name, device, e);
        }
    }
}

/// The id a patch addresses a device by within a collection.
fn patch_id(coll: Collection, device: u64) -> String {
    match coll {
        Collection::GeneralTags => device.to_string(),
        _ => format!("tag.{}", device),
    }
}

/// Emits live-attribute patches for one decoded value.
#[derive(Debug, Clone)]
pub(crate) enum Setter {
    /// One patch to a fixed (collection, attribute).
    Single {
        coll: Collection,
        attr: &'static str,
    },

    /// Charging status decoded into two booleans: 1 means external power
    /// with charging, 2 external power only, anything else neither.
    Charging,

    /// Extended GPS triple `[position, quality, velocity]` fanned out to
    /// three location attributes.
    GpsExtended,
}

impl Setter {
    pub fn single(coll: Collection, attr: &'static str) -> Self {
        Setter::Single { coll, attr }
    }

    pub fn emit(
        &self,
        device: u64,
        value: &Value,
        times: Times,
        out: &mut Vec<Patch>,
    ) -> Result<(), TranslateError> {
        match self {
            Setter::Single { coll, attr } => {
                out.push(Patch {
                    coll: *coll,
                    id: patch_id(*coll, device),
                    attr: (*attr).to_string(),
                    value: value.clone(),
                    times,
                });
            }
            Setter::Charging => {
                let (external_power, charging) = match value.as_f64() {
                    Some(x) if x == 1.0 => (true, true),
                    Some(x) if x == 2.0 => (true, false),
                    _ => (false, false),
                };
                for (attr, flag) in [
                    ("externalPowerAvailable", external_power),
                    ("isCharging", charging),
                ]
                .iter()
                {
                    out.push(Patch {
                        coll: Collection::GeneralTags,
                        id: patch_id(Collection::GeneralTags, device),
                        attr: (*attr).to_string(),
                        value: Value::from(*flag),
                        times,
                    });
                }
            }
            Setter::GpsExtended => {
                let parts = value
                    .as_array()
                    .filter(|a| a.len() == 3)
                    .ok_or(TranslateError::BadShape("status.gps.gpsdata_ex_tsd"))?;
                for (attr, part) in ["gpsPosition", "quality", "velocity"].iter().zip(parts) {
                    out.push(Patch {
                        coll: Collection::Locations,
                        id: patch_id(Collection::Locations, device),
                        attr: (*attr).to_string(),
                        value: part.clone(),
                        times,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Pure value transform applied before emission and buffering.
#[derive(Debug, Clone)]
pub(crate) enum Transform {
    Identity,

    /// Multiply a number, or every number of an array, by a factor.
    Scale(f64),

    /// Divide a number by a divisor.
    Divide(f64),

    /// Truthiness cast.
    Boolean,

    /// Degrees-and-decimal-minutes pair to decimal degrees
    /// (`4729.25` means 47° 29.25′).
    Gps,

    /// Extended GPS record `[lat, long, ex]` with coordinates scaled by
    /// 10⁷ and a packed extra word (HDOP in bits 23..8 scaled by 100,
    /// speed in km/h in bits 7..0).
    GpsExtended,
}

impl Transform {
    pub fn apply(&self, value: &Value) -> Result<Value, TranslateError> {
        match self {
            Transform::Identity => Ok(value.clone()),
            Transform::Scale(factor) => scale(value, *factor),
            Transform::Divide(divisor) => {
                let x = value
                    .as_f64()
                    .ok_or(TranslateError::BadShape("numeric value"))?;
                Ok(Value::from(x / divisor))
            }
            Transform::Boolean => Ok(Value::from(truthy(value))),
            Transform::Gps => {
                let (lat, long) = coordinate_pair(value)?;
                let (lat_deg, lat_min) = div_mod(lat, 100.0);
                let (long_deg, long_min) = div_mod(long, 100.0);
                Ok(Value::from(vec![
                    lat_deg + lat_min / 60.0,
                    long_deg + long_min / 60.0,
                ]))
            }
            Transform::GpsExtended => {
                let parts = value
                    .as_array()
                    .filter(|a| a.len() == 3)
                    .ok_or(TranslateError::BadShape("gps ex triple"))?;
                let lat = parts[0]
                    .as_i64()
                    .ok_or(TranslateError::BadShape("gps ex latitude"))?;
                let long = parts[1]
                    .as_i64()
                    .ok_or(TranslateError::BadShape("gps ex longitude"))?;
                let ex = parts[2]
                    .as_i64()
                    .ok_or(TranslateError::BadShape("gps ex word"))?;

                let lat_deg = lat.div_euclid(10_000_000);
                let lat_min = lat.rem_euclid(10_000_000);
                let long_deg = long.div_euclid(10_000_000);
                let long_min = long.rem_euclid(10_000_000);

                let hdop = ((ex >> 8) & 0xFFFF) as f64 / 100.0;
                let quality = if hdop <= 1.0 { 1.0 } else { 1.0 / hdop };
                let velocity = (ex & 0xFF) as f64;

                Ok(serde_json::json!([
                    [
                        lat_deg as f64 + lat_min as f64 / 6_000_000.0,
                        long_deg as f64 + long_min as f64 / 6_000_000.0,
                    ],
                    quality,
                    [velocity / 3.6, 0.0, 0.0],
                ]))
            }
        }
    }
}

fn scale(value: &Value, factor: f64) -> Result<Value, TranslateError> {
    match value {
        Value::Number(n) => {
            let x = n.as_f64().ok_or(TranslateError::BadShape("numeric value"))?;
            Ok(Value::from(x * factor))
        }
        Value::Array(items) => {
            let mut scaled = Vec::with_capacity(items.len());
            for item in items {
                let x = item
                    .as_f64()
                    .ok_or(TranslateError::BadShape("numeric array"))?;
                scaled.push(x * factor);
            }
            Ok(Value::from(scaled))
        }
        _ => Err(TranslateError::BadShape("numeric value or array")),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|x| x != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn coordinate_pair(value: &Value) -> Result<(f64, f64), TranslateError> {
    let items = value
        .as_array()
        .filter(|a| a.len() >= 2)
        .ok_or(TranslateError::BadShape("coordinate pair"))?;
    let lat = items[0]
        .as_f64()
        .ok_or(TranslateError::BadShape("latitude"))?;
    let long = items[1]
        .as_f64()
        .ok_or(TranslateError::BadShape("longitude"))?;
    Ok((lat, long))
}

/// Floored division with remainder.
fn div_mod(x: f64, modulus: f64) -> (f64, f64) {
    let div = (x / modulus).floor();
    (div, x - div * modulus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scale_handles_scalars_and_arrays() {
        let t = Transform::Scale(40.0 / 1024.0);
        assert_eq!(
            t.apply(&json!([100, -50, 0])).unwrap(),
            json!([3.90625, -1.953125, 0.0])
        );
        assert_eq!(Transform::Scale(2.0).apply(&json!(21)).unwrap(), json!(42.0));
        assert!(Transform::Scale(2.0).apply(&json!("x")).is_err());
    }

    #[test]
    fn divide_matches_unit_conversions() {
        assert_eq!(
            Transform::Divide(1000.0).apply(&json!(1500)).unwrap(),
            json!(1.5)
        );
    }

    #[test]
    fn boolean_cast() {
        assert_eq!(Transform::Boolean.apply(&json!(1)).unwrap(), json!(true));
        assert_eq!(Transform::Boolean.apply(&json!(0)).unwrap(), json!(false));
        assert_eq!(Transform::Boolean.apply(&json!(null)).unwrap(), json!(false));
        assert_eq!(Transform::Boolean.apply(&json!(true)).unwrap(), json!(true));
    }

    #[test]
    fn gps_degrees_and_minutes() {
        let out = Transform::Gps.apply(&json!([4729.25, 1901.50])).unwrap();
        let out = out.as_array().unwrap();
        assert!((out[0].as_f64().unwrap() - 47.4875).abs() < 1e-9);
        assert!((out[1].as_f64().unwrap() - 19.025).abs() < 1e-9);
    }

    #[test]
    fn gps_extended_decodes_packed_word() {
        // HDOP 2.00 in bits 23..8, 36 km/h in bits 7..0.
        let ex = (200 << 8) | 36;
        let out = Transform::GpsExtended
            .apply(&json!([472_804_724, 190_150_000, ex]))
            .unwrap();
        let out = out.as_array().unwrap();

        let pos = out[0].as_array().unwrap();
        assert!((pos[0].as_f64().unwrap() - (47.0 + 2_804_724.0 / 6_000_000.0)).abs() < 1e-9);
        assert!((pos[1].as_f64().unwrap() - (19.0 + 150_000.0 / 6_000_000.0)).abs() < 1e-9);

        assert_eq!(out[1], json!(0.5));

        let velocity = out[2].as_array().unwrap();
        assert!((velocity[0].as_f64().unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(velocity[1], json!(0.0));
    }

    #[test]
    fn charging_setter_fans_out_two_booleans() {
        let times = Times {
            measurement: Some(1000),
            sensorsetbuffer: None,
        };
        for (input, external, charging) in
            [(json!(1), true, true), (json!(2), true, false), (json!(0), false, false)].iter()
        {
            let mut out = Vec::new();
            Setter::Charging.emit(7, input, times, &mut out).unwrap();
            assert_eq!(out.len(), 2);
            assert_eq!(out[0].attr, "externalPowerAvailable");
            assert_eq!(out[0].value, json!(*external));
            assert_eq!(out[1].attr, "isCharging");
            assert_eq!(out[1].value, json!(*charging));
            assert_eq!(out[0].id, "7");
        }
    }

    #[test]
    fn patch_ids_per_collection() {
        assert_eq!(patch_id(Collection::GeneralTags, 12), "12");
        assert_eq!(patch_id(Collection::Locations, 12), "tag.12");
    }
}
