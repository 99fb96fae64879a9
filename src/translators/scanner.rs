//! Translator for scanner and BLE pairing data.
//!
//! Scanner devices report three generations of scan output plus raw BLE
//! scan time-series, and some of them only stamp events with device-local
//! tick counts. The tick-count interpolator reconstructs a measurement
//! time for those from the last two (measurement time, tick count) pairs
//! observed for the device.

use std::fmt::Write as _;

use serde_json::{Map, Value};

use super::{Setter, Transform};
use crate::tsd::TsdPayload;
use crate::{Collection, CompoundId, Patch, Times, TranslateError, Translator};

/// One observed (measurement time, tick count) pair.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TickAnchor {
    pub meas_time: i64,
    pub tick: f64,
}

/// The last two anchors of a device, for two-point interpolation.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TickAnchors {
    former: Option<TickAnchor>,
    last: Option<TickAnchor>,
}

impl TickAnchors {
    /// Record a new anchor; the previous `last` becomes `former`.
    pub fn push(&mut self, anchor: TickAnchor) {
        self.former = self.last.replace(anchor);
    }

    /// Reconstruct the measurement time of `tick`, or `None` while fewer
    /// than two anchors are known or the anchors do not span any ticks.
    pub fn interpolate(&self, tick: f64) -> Option<i64> {
        let (former, last) = match (self.former, self.last) {
            (Some(f), Some(l)) => (f, l),
            _ => return None,
        };
        let tick_interval = last.tick - former.tick;
        if tick_interval == 0.0 {
            return None;
        }
        let meas_interval = (last.meas_time - former.meas_time) as f64;
        let offset = (tick - last.tick) / tick_interval * meas_interval;
        Some(last.meas_time + offset.round() as i64)
    }
}

fn require<'a>(
    container: &'a Map<String, Value>,
    key: &'static str,
) -> Result<&'a Value, TranslateError> {
    container.get(key).ok_or(TranslateError::MissingKey(key))
}

fn as_object<'a>(
    value: &'a Value,
    key: &'static str,
) -> Result<&'a Map<String, Value>, TranslateError> {
    value.as_object().ok_or(TranslateError::BadShape(key))
}

/// Emit the barCode/scanCounter/pairingCode triple of one scan container.
fn emit_scan_triple(
    device: u64,
    container: &Map<String, Value>,
    keys: [(&'static str, &'static str); 3],
    times: Times,
    out: &mut Vec<Patch>,
) -> Result<(), TranslateError> {
    for &(attr, key) in keys.iter() {
        let value = require(container, key)?;
        Setter::single(Collection::Pairings, attr).emit(device, value, times, out)?;
    }
    Ok(())
}

/// Recompute the measurement time of a scan container from its device
/// tick count. Without two usable anchors the measurement time is
/// unknown, which is signalled by stripping it from the record.
fn scan_times(
    translator: &Translator,
    device: u64,
    container: &Map<String, Value>,
    times: &Times,
) -> Result<Times, TranslateError> {
    let scan_time = match container.get("scanstatus.scannerapp.scan_time") {
        Some(v) => v
            .as_f64()
            .ok_or(TranslateError::BadShape("scanstatus.scannerapp.scan_time"))?,
        None => return Ok(*times),
    };
    let mut newtimes = *times;
    newtimes.measurement = translator
        .ticks
        .get(&device)
        .and_then(|anchors| anchors.interpolate(scan_time));
    Ok(newtimes)
}

/// Stringify an iButton serial for the barCode attribute.
fn ibutton_serial(value: &Value) -> Result<Value, TranslateError> {
    match value {
        Value::String(s) => Ok(Value::from(s.clone())),
        Value::Number(n) => Ok(Value::from(n.to_string())),
        _ => Err(TranslateError::BadShape("status.ibutton.serial")),
    }
}

fn ibutton_sequence(value: &Value) -> Result<Value, TranslateError> {
    let seq = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|x| x as i64))
            .ok_or(TranslateError::BadShape("status.ibutton.seq"))?,
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| TranslateError::BadShape("status.ibutton.seq"))?,
        _ => return Err(TranslateError::BadShape("status.ibutton.seq")),
    };
    Ok(Value::from(seq))
}

fn word(values: &[Value], index: usize) -> Result<i64, TranslateError> {
    values
        .get(index)
        .and_then(Value::as_i64)
        .ok_or(TranslateError::BadShape("status.blescandata_tsd"))
}

/// Split the packed BLE scan words into three derived time-series and run
/// each through its own pipeline: the Bluetooth address with RSSI as
/// `barCode`, the scanned device's unique id as `pairingCode`, and a
/// synthetic scan counter (live only, never buffered).
fn ble_scan_extract(
    translator: &mut Translator,
    device: u64,
    payload: &Value,
    times: &Times,
    now: f64,
) -> Result<Vec<Patch>, TranslateError> {
    let base = TsdPayload::from_value(payload)?;
    let mut address_tsd = base.clone();
    let mut unique_tsd = base.clone();
    let mut counter_tsd = base.clone();

    for (index, sample) in base.data.iter().enumerate() {
        let words = sample
            .values
            .as_array()
            .ok_or(TranslateError::BadShape("status.blescandata_tsd"))?;
        let low = word(words, 0)?;
        let high = word(words, 1)?;
        let unique_id = words
            .get(2)
            .ok_or(TranslateError::BadShape("status.blescandata_tsd"))?;

        // 6-byte Bluetooth address: four bytes from the high word, two
        // from the low one, with the RSSI in bits 23..16 of the low word.
        let mut address = String::with_capacity(16);
        for shift in [0u32, 8, 16, 24].iter() {
            let _ = write!(address, "{:02x}", (high >> shift) & 0xFF);
        }
        for shift in [0u32, 8].iter() {
            let _ = write!(address, "{:02x}", (low >> shift) & 0xFF);
        }
        let mut rssi = (low >> 16) & 0xFF;
        if rssi > 127 {
            rssi -= 256;
        }

        address_tsd.data[index].values = Value::from(format!("{}:{}", address, rssi));
        unique_tsd.data[index].values = unique_id.clone();
        translator.scan_counter = translator.scan_counter.wrapping_add(1);
        counter_tsd.data[index].values = Value::from(translator.scan_counter);
    }

    let mut out = translator.process_tsd(
        &Setter::single(Collection::Pairings, "barCode"),
        CompoundId::new(device, "barCode"),
        true,
        &Transform::Identity,
        &address_tsd,
        times,
        now,
    )?;
    out.extend(translator.process_tsd(
        &Setter::single(Collection::Pairings, "pairingCode"),
        CompoundId::new(device, "pairingCode"),
        true,
        &Transform::Identity,
        &unique_tsd,
        times,
        now,
    )?);
    out.extend(translator.process_tsd(
        &Setter::single(Collection::Pairings, "scanCounter"),
        CompoundId::new(device, "scanCounter"),
        false,
        &Transform::Identity,
        &counter_tsd,
        times,
        now,
    )?);
    Ok(out)
}

pub(crate) fn translate(
    translator: &mut Translator,
    data: &Map<String, Value>,
    device: u64,
    times: &Times,
    now: f64,
    out: &mut Vec<Patch>,
) -> Result<(), TranslateError> {
    // Old scanner firmware: plain container, times used as-is.
    if let Some(value) = data.get("data.scannerapp.scanout_c") {
        let container = as_object(value, "data.scannerapp.scanout_c")?;
        emit_scan_triple(
            device,
            container,
            [
                ("barCode", "data.scannerapp.scandata_single"),
                ("scanCounter", "data.scannerapp.scan_cnt"),
                ("pairingCode", "data.scannerapp.scan_associated_num"),
            ],
            *times,
            out,
        )?;
    }

    // Current firmware: the scan event is stamped with a device tick
    // count instead of a wall-clock time.
    if let Some(value) = data.get("scanstatus.scannerapp.scanout_c") {
        let container = as_object(value, "scanstatus.scannerapp.scanout_c")?;
        let newtimes = scan_times(translator, device, container, times)?;
        emit_scan_triple(
            device,
            container,
            [
                ("barCode", "scanstatus.scannerapp.scandata_single"),
                ("scanCounter", "scanstatus.scannerapp.scan_cnt"),
                ("pairingCode", "scanstatus.scannerapp.scan_associated_num"),
            ],
            newtimes,
            out,
        )?;
    }

    if let Some(value) = data.get("status.ibutton.out_c") {
        let container = as_object(value, "status.ibutton.out_c")?;
        let serial = ibutton_serial(require(container, "status.ibutton.serial")?)?;
        let seq = ibutton_sequence(require(container, "status.ibutton.seq")?)?;
        Setter::single(Collection::Pairings, "barCode").emit(device, &serial, *times, out)?;
        Setter::single(Collection::Pairings, "scanCounter").emit(device, &seq, *times, out)?;
    }

    if let Some(value) = data.get("status.blescandata_tsd") {
        let patches = ble_scan_extract(translator, device, value, times, now)?;
        out.extend(patches);
    }

    if let Some(value) = data.get("status.general.tick_count") {
        if let Some(meas_time) = times.measurement {
            let tick = value
                .as_f64()
                .ok_or(TranslateError::BadShape("status.general.tick_count"))?;
            translator
                .ticks
                .entry(device)
                .or_default()
                .push(TickAnchor { meas_time, tick });
        }
    }

    Ok(())
}
