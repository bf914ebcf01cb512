//! Bambu report parsing.
//!
//! Reports arrive on `device/<serial>/report`. The `print` object of a
//! `pushall` answer carries every field; later pushes only carry what
//! changed, so every field maps to an `Option` in [`DeviceUpdate`].
//! Numbers are sometimes sent as strings and are accepted either way.

use bambulink_core::{AmsSlot, DeviceUpdate, LinkError, PrintStage, SpeedLevel};
use serde_json::Value;

/// Parse a raw MQTT payload
///
/// Returns `Ok(None)` for valid JSON that carries no `print` object
/// (system and info replies).
pub fn parse_report(payload: &[u8]) -> Result<Option<DeviceUpdate>, LinkError> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| LinkError::InvalidPayload {
            reason: e.to_string(),
        })?;
    Ok(update_from_report(&value))
}

/// Build an update from a decoded report document
pub fn update_from_report(value: &Value) -> Option<DeviceUpdate> {
    let print = value.get("print")?;

    let update = DeviceUpdate {
        nozzle_current: number(print, "nozzle_temper"),
        nozzle_target: number(print, "nozzle_target_temper"),
        bed_current: number(print, "bed_temper"),
        bed_target: number(print, "bed_target_temper"),
        chamber_current: number(print, "chamber_temper"),
        chamber_target: None,
        stage: print
            .get("gcode_state")
            .and_then(Value::as_str)
            .map(PrintStage::from_gcode_state),
        progress_percent: number(print, "mc_percent"),
        z_height: None,
        layer_current: integer(print, "layer_num"),
        layer_total: integer(print, "total_layer_num"),
        remaining_minutes: integer(print, "mc_remaining_time"),
        subtask_name: print
            .get("subtask_name")
            .and_then(Value::as_str)
            .map(str::to_string),
        speed_level: integer(print, "spd_lvl")
            .and_then(|level| u8::try_from(level).ok())
            .and_then(SpeedLevel::from_level),
        ams_slots: print.get("ams").and_then(parse_ams),
        error_code: integer(print, "print_error"),
    };

    Some(update)
}

fn parse_ams(ams: &Value) -> Option<Vec<AmsSlot>> {
    let units = ams.get("ams")?.as_array()?;
    let mut slots = Vec::new();

    for (unit_index, unit) in units.iter().enumerate() {
        let unit_id = integer(unit, "id")
            .and_then(|id| u8::try_from(id).ok())
            .unwrap_or(unit_index as u8);
        let Some(trays) = unit.get("tray").and_then(Value::as_array) else {
            continue;
        };
        for (tray_index, tray) in trays.iter().enumerate() {
            let tray_id = integer(tray, "id")
                .and_then(|id| u8::try_from(id).ok())
                .unwrap_or(tray_index as u8);
            slots.push(AmsSlot {
                unit: unit_id,
                tray: tray_id,
                filament_type: text(tray, "tray_type"),
                color: text(tray, "tray_color"),
                remaining_percent: integer(tray, "remain")
                    .and_then(|r| i32::try_from(r).ok())
                    .filter(|r| *r >= 0),
            });
        }
    }

    Some(slots)
}

fn number(object: &Value, key: &str) -> Option<f64> {
    match object.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn integer(object: &Value, key: &str) -> Option<u32> {
    number(object, key)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u32)
}

fn text(object: &Value, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_report() {
        let payload = json!({
            "print": {
                "command": "push_status",
                "gcode_state": "RUNNING",
                "mc_percent": 37,
                "mc_remaining_time": 52,
                "layer_num": 40,
                "total_layer_num": 120,
                "nozzle_temper": 219.8,
                "nozzle_target_temper": 220,
                "bed_temper": 59.9,
                "bed_target_temper": 60,
                "chamber_temper": 31,
                "print_error": 0,
                "subtask_name": "benchy",
                "spd_lvl": 2,
                "ams": {
                    "ams": [{
                        "id": "0",
                        "tray": [
                            {"id": "0", "tray_type": "PLA", "tray_color": "FFFFFFFF", "remain": 80},
                            {"id": "1", "tray_type": "", "remain": -1}
                        ]
                    }]
                }
            }
        });

        let update = update_from_report(&payload).unwrap();
        assert_eq!(update.stage, Some(PrintStage::Printing));
        assert_eq!(update.progress_percent, Some(37.0));
        assert_eq!(update.layer_current, Some(40));
        assert_eq!(update.layer_total, Some(120));
        assert_eq!(update.remaining_minutes, Some(52));
        assert_eq!(update.nozzle_current, Some(219.8));
        assert_eq!(update.bed_target, Some(60.0));
        assert_eq!(update.chamber_current, Some(31.0));
        assert_eq!(update.error_code, Some(0));
        assert_eq!(update.subtask_name.as_deref(), Some("benchy"));
        assert_eq!(update.speed_level, Some(SpeedLevel::Standard));

        let slots = update.ams_slots.unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].filament_type.as_deref(), Some("PLA"));
        assert_eq!(slots[0].remaining_percent, Some(80));
        assert_eq!(slots[1].tray, 1);
        assert_eq!(slots[1].filament_type, None);
        assert_eq!(slots[1].remaining_percent, None);
    }

    #[test]
    fn test_delta_report_only_sets_present_fields() {
        let update = update_from_report(&json!({"print": {"nozzle_temper": 100.5}})).unwrap();
        assert_eq!(update.nozzle_current, Some(100.5));
        assert_eq!(update.bed_current, None);
        assert_eq!(update.stage, None);
        assert_eq!(update.ams_slots, None);
    }

    #[test]
    fn test_numbers_as_strings() {
        let update =
            update_from_report(&json!({"print": {"mc_percent": "12", "bed_temper": "45.5"}}))
                .unwrap();
        assert_eq!(update.progress_percent, Some(12.0));
        assert_eq!(update.bed_current, Some(45.5));
    }

    #[test]
    fn test_non_print_message_is_ignored() {
        let parsed = parse_report(br#"{"info": {"command": "get_version"}}"#).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(matches!(
            parse_report(b"not json"),
            Err(LinkError::InvalidPayload { .. })
        ));
    }
}
