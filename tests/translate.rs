//! End-to-end scenarios: raw bus payloads in, patches out.

use lolan_translator::{Collection, Patch, Translator};
use serde_json::{json, Value};

const NOW: f64 = 1000.0;

fn bdcl(device: u64, meas_ts: Option<i64>, server_ts: Option<i64>, data: Value) -> String {
    json!({
        "header": {"uniqId": device, "measTs": meas_ts, "serverTs": server_ts},
        "data": data,
    })
    .to_string()
}

fn process(translator: &mut Translator, message: &str) -> Vec<Patch> {
    translator.process_bdcl(message, NOW).unwrap().patches
}

#[test]
fn charging_status_decodes_into_two_booleans() {
    let mut translator = Translator::new();

    let cases = [
        (1, true, true),
        (2, true, false),
        (0, false, false),
    ];
    for (raw, external, charging) in cases.iter() {
        let patches = process(
            &mut translator,
            &bdcl(7, Some(1000), None, json!({"status.battery.charging": raw})),
        );
        assert_eq!(patches.len(), 2);

        assert_eq!(patches[0].coll, Collection::GeneralTags);
        assert_eq!(patches[0].id, "7");
        assert_eq!(patches[0].attr, "externalPowerAvailable");
        assert_eq!(patches[0].value, json!(*external));
        assert_eq!(patches[0].times.measurement, Some(1000));

        assert_eq!(patches[1].attr, "isCharging");
        assert_eq!(patches[1].value, json!(*charging));
        assert_eq!(patches[1].times.measurement, Some(1000));
    }
}

#[test]
fn gps_tsd_emits_decimal_degrees() {
    let mut translator = Translator::new();
    let message = bdcl(
        12,
        Some(1_000_000),
        Some(1_000_500),
        json!({"status.gpsdata_tsd": {
            "timestamp": {"absolute or relative": "absolute", "unit": "picoseconds"},
            "data": [{"timestamp": 1_000_000_000_000i64, "values": [4729.25, 1901.50]}],
        }}),
    );

    let patches = process(&mut translator, &message);
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].coll, Collection::Locations);
    assert_eq!(patches[0].id, "tag.12");
    assert_eq!(patches[0].attr, "gpsPosition");
    assert_eq!(patches[0].times.measurement, Some(1_000_000));
    assert_eq!(patches[0].times.sensorsetbuffer, Some(1_000_500));

    let pos = patches[0].value.as_array().unwrap();
    assert!((pos[0].as_f64().unwrap() - 47.4875).abs() < 1e-9);
    assert!((pos[1].as_f64().unwrap() - 19.025).abs() < 1e-9);
}

#[test]
fn accelerometer_triple_scales_by_databits() {
    let mut translator = Translator::new();
    let message = bdcl(
        3,
        Some(5000),
        None,
        json!({"status.lastaccel.acc_raw_packed": {
            "status.lastaccel.x": 100,
            "status.lastaccel.y": -50,
            "status.lastaccel.z": 0,
            "status.lastaccel.databits": 10,
        }}),
    );

    let patches = process(&mut translator, &message);
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].attr, "accelerometerA");
    assert_eq!(patches[0].value, json!([3.90625, -1.953125, 0.0]));
    assert_eq!(patches[0].times.measurement, Some(5000));
}

#[test]
fn relative_tsd_reconstructs_sample_times() {
    let mut translator = Translator::new();
    let message = bdcl(
        9,
        Some(10_000_000),
        None,
        json!({"status.pressure_tsd": {
            "timestamp": {"absolute or relative": "relative", "unit": "milliseconds"},
            "data": [
                {"timestamp": 0, "values": 100_000},
                {"timestamp": 100, "values": 100_100},
                {"timestamp": 200, "values": 100_200},
            ],
        }}),
    );

    let patches = process(&mut translator, &message);
    assert_eq!(
        patches
            .iter()
            .map(|p| p.times.measurement.unwrap())
            .collect::<Vec<_>>(),
        vec![9_800_000, 9_900_000, 10_000_000]
    );
}

#[test]
fn server_time_substitutes_missing_measurement_time() {
    let mut translator = Translator::new();
    let patches = process(
        &mut translator,
        &bdcl(4, None, Some(777), json!({"status.temperature": 21.5})),
    );
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].times.measurement, Some(777));
    assert_eq!(patches[0].times.sensorsetbuffer, Some(777));
}

#[test]
fn absent_times_still_run_translators() {
    let mut translator = Translator::new();
    let patches = process(
        &mut translator,
        &bdcl(4, None, None, json!({"status.temperature": 21.5})),
    );
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].times.measurement, None);
    assert_eq!(patches[0].times.sensorsetbuffer, None);
}

#[test]
fn messages_without_data_or_device_are_skipped() {
    let mut translator = Translator::new();

    let no_data = json!({"header": {"uniqId": 4, "measTs": 1, "serverTs": 1}}).to_string();
    assert!(process(&mut translator, &no_data).is_empty());

    let no_device = json!({
        "header": {"measTs": 1, "serverTs": 1},
        "data": {"status.temperature": 21.5},
    })
    .to_string();
    assert!(process(&mut translator, &no_device).is_empty());
}

#[test]
fn malformed_json_is_reported() {
    let mut translator = Translator::new();
    assert!(translator.process_bdcl("{not json", NOW).is_err());
}

#[test]
fn failing_decoder_does_not_suppress_the_others() {
    let mut translator = Translator::new();
    let message = bdcl(
        5,
        Some(1000),
        None,
        json!({
            "status.battery.level": 3.6,
            "status.pressure_tsd": 5,
            "status.lastaccel.ismoving": 1,
        }),
    );

    // The pressure payload is not a time-series, which fails the
    // general-tags translator after the battery patch; locations still
    // runs.
    let patches = process(&mut translator, &message);
    assert_eq!(patches.len(), 2);
    assert_eq!(patches[0].attr, "batteryVoltage");
    assert_eq!(patches[1].attr, "isMoving");
}

#[test]
fn patches_follow_translator_declaration_order() {
    let mut translator = Translator::new();
    let message = bdcl(
        5,
        Some(1000),
        None,
        json!({
            "status.twr.inform_c": {
                "tagsettings.twr.target1": 42,
                "status.twr.result1": 1500,
            },
            "status.lastaccel.ismoving": 0,
            "status.battery.level": 3.6,
        }),
    );

    let patches = process(&mut translator, &message);
    assert_eq!(
        patches.iter().map(|p| p.coll).collect::<Vec<_>>(),
        vec![Collection::GeneralTags, Collection::Locations, Collection::Twr]
    );
}

#[test]
fn scl_positions_pass_straight_through() {
    let translator = Translator::new();
    let message = json!({
        "devId": 31,
        "uuid": "abc-def",
        "timestamp": 1_000_000,
        "sensorsetbufferTime": 1_000_200,
        "positions": [
            {"positionVector": [1.0, 2.0, 3.0], "quality": 0.9},
            {"positionVector": [4.0, 5.0, 6.0]},
        ],
    })
    .to_string();

    let patch = translator.process_scl(&message).unwrap();
    assert_eq!(patch.coll, Collection::SclPositions);
    assert_eq!(patch.id, "tag.31");
    assert_eq!(patch.attr, "sclProfiles/abc-def/rawPositions");
    assert_eq!(patch.value, json!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));
    assert_eq!(patch.times.measurement, Some(1_000_000));
    assert_eq!(patch.times.sensorsetbuffer, Some(1_000_200));
}

#[test]
fn scl_null_positions_default_to_origin() {
    let translator = Translator::new();
    let message = json!({
        "devId": 31,
        "uuid": "abc-def",
        "timestamp": 1_000_000,
        "sensorsetbufferTime": 1_000_200,
        "positions": null,
    })
    .to_string();

    let patch = translator.process_scl(&message).unwrap();
    assert_eq!(patch.value, json!([[0.0, 0.0, 0.0]]));
}

#[test]
fn patch_wire_format_is_a_single_replace_operation() {
    let mut translator = Translator::new();
    let patches = process(
        &mut translator,
        &bdcl(7, Some(1000), Some(900), json!({"status.temperature": 21.5})),
    );

    let wire: Value = serde_json::from_str(&patches[0].to_message()).unwrap();
    let ops = wire.as_array().unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0]["op"], json!("replace"));
    assert_eq!(ops[0]["path"], json!("/7/temperatureC"));
    assert_eq!(ops[0]["value"], json!(21.5));
    assert_eq!(ops[0]["times"]["measurement"], json!(1000));
    assert_eq!(ops[0]["times"]["sensorsetbuffer"], json!(900));
}
