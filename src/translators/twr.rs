//! Translator for two-way-ranging results.

use serde_json::{Map, Value};

use super::Setter;
use crate::{Collection, Patch, Times, TranslateError, Translator};

/// Up to nine (target, result) slot pairs per report; a slot is emitted
/// only when both halves are present. Results arrive in millimeters.
pub(crate) fn translate(
    _translator: &mut Translator,
    data: &Map<String, Value>,
    device: u64,
    times: &Times,
    _now: f64,
    out: &mut Vec<Patch>,
) -> Result<(), TranslateError> {
    let container = match data.get("status.twr.inform_c") {
        Some(value) => value
            .as_object()
            .ok_or(TranslateError::BadShape("status.twr.inform_c"))?,
        None => return Ok(()),
    };

    for i in 1..10 {
        let target = container.get(&format!("tagsettings.twr.target{}", i));
        let result = container.get(&format!("status.twr.result{}", i));
        if let (Some(target), Some(result)) = (target, result) {
            let meters = result
                .as_f64()
                .ok_or(TranslateError::BadShape("status.twr.result"))?
                / 1000.0;
            // No unique id resolution here; the patch carries the LoLaN id.
            Setter::single(Collection::Twr, "twrUniqueIdAndMeter").emit(
                device,
                &serde_json::json!([target, meters]),
                *times,
                out,
            )?;
        }
    }
    Ok(())
}
