//! The control surface (spec §4.H): status, set, and the building blocks
//! `engine.rs` wires into `EngineCommand` handling. The HTTP transport
//! itself is an external collaborator (spec §1) — these are the plain
//! Rust operations any such transport would call into.

use serde::Serialize;

use crate::device::DeviceTable;
use crate::error::{Result, TuyaError};

#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub name: String,
    /// "on", "off", or "silent" (spec §4.H).
    pub state: String,
    /// Present only when it diverges from `state`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// The pulse deadline timestamp, if the device is currently pulsing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusDocument {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    pub timestamp: u64,
    /// Monotonic "latest change" token shared with the config state
    /// machine (spec §4.H).
    pub token: u64,
    pub devices: Vec<StatusEntry>,
}

fn on_off(state: bool) -> &'static str {
    if state { "on" } else { "off" }
}

/// Build the status document for every device in the table (spec §4.H
/// "status").
pub fn status(devices: &DeviceTable, host: &str, proxy: Option<&str>, token: u64) -> StatusDocument {
    let now = crate::now_unix();
    let devices = devices
        .iter()
        .map(|d| {
            let state = if d.detected == 0 {
                "silent".to_string()
            } else {
                on_off(d.status).to_string()
            };
            let command = (d.status != d.commanded && d.detected != 0)
                .then(|| on_off(d.commanded).to_string());
            StatusEntry {
                name: d.name.clone(),
                state,
                command,
                pulse: (d.deadline > 0).then_some(d.deadline),
            }
        })
        .collect();
    StatusDocument {
        host: host.to_string(),
        proxy: proxy.map(str::to_string),
        timestamp: now,
        token,
        devices,
    }
}

/// Parse the `state` query parameter: `on|off|1|0` (spec §4.H).
pub fn parse_state(raw: &str) -> Result<bool> {
    match raw {
        "on" | "1" => Ok(true),
        "off" | "0" => Ok(false),
        _ => Err(TuyaError::InvalidState),
    }
}

/// Parse the `pulse` query parameter: seconds >= 0 (spec §4.H).
pub fn parse_pulse(raw: Option<&str>) -> Result<Option<u64>> {
    match raw {
        None => Ok(None),
        Some(s) => s.parse::<u64>().map(Some).map_err(|_| TuyaError::InvalidPulse),
    }
}

/// Apply a `set` to every device matched by `point` (`"all"` or one
/// device name), per spec §4.H. Returns the ids of devices that should
/// have a command transmitted immediately (newly armed and currently
/// detected) — the caller (the engine) drives the actual TCP send.
pub fn apply_set(
    devices: &mut DeviceTable,
    point: &str,
    state: bool,
    pulse: Option<u64>,
    now: u64,
) -> Result<Vec<String>> {
    let matched_names: Vec<String> = if point == "all" {
        devices.iter().map(|d| d.name.clone()).collect()
    } else if devices.find_by_name(point).is_some() {
        vec![point.to_string()]
    } else {
        return Err(TuyaError::InvalidPoint);
    };

    let mut to_transmit = Vec::new();
    for name in matched_names {
        let Some(device) = devices.find_by_name_mut(&name) else {
            continue;
        };
        device.commanded = state;
        device.deadline = match pulse {
            Some(p) if p > 0 => now + p,
            _ => 0,
        };
        let newly_armed = device.pending == 0;
        if newly_armed {
            device.pending = now + crate::engine::COMMAND_DEADLINE;
        }
        if newly_armed && device.detected > 0 {
            to_transmit.push(device.secret.id.clone());
        }
    }
    Ok(to_transmit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceSecret;

    fn table_with_one_detected_device() -> DeviceTable {
        let mut table = DeviceTable::new();
        table.insert_from_config(
            "lamp".into(),
            DeviceSecret::new("dev-1"),
            "keyA".into(),
            None,
            None,
        );
        table.find_by_name_mut("lamp").unwrap().detected = 1_000;
        table
    }

    #[test]
    fn set_all_arms_every_device_for_immediate_transmit() {
        let mut table = table_with_one_detected_device();
        let ids = apply_set(&mut table, "all", true, None, 1_000).unwrap();
        assert_eq!(ids, vec!["dev-1"]);
        let dev = table.find_by_name("lamp").unwrap();
        assert!(dev.commanded);
        assert_eq!(dev.pending, 1_010);
        assert_eq!(dev.deadline, 0);
    }

    #[test]
    fn set_unknown_point_is_an_error() {
        let mut table = table_with_one_detected_device();
        assert_eq!(
            apply_set(&mut table, "nope", true, None, 1_000),
            Err(TuyaError::InvalidPoint)
        );
    }

    #[test]
    fn set_with_outstanding_pending_does_not_rearm_or_retransmit() {
        let mut table = table_with_one_detected_device();
        table.find_by_name_mut("lamp").unwrap().pending = 5_000;
        let ids = apply_set(&mut table, "lamp", true, None, 1_000).unwrap();
        assert!(ids.is_empty());
        assert_eq!(table.find_by_name("lamp").unwrap().pending, 5_000);
    }

    #[test]
    fn set_with_pulse_computes_deadline() {
        let mut table = table_with_one_detected_device();
        apply_set(&mut table, "lamp", true, Some(30), 1_000).unwrap();
        assert_eq!(table.find_by_name("lamp").unwrap().deadline, 1_030);
    }

    #[test]
    fn parse_state_accepts_on_off_and_digits() {
        assert_eq!(parse_state("on"), Ok(true));
        assert_eq!(parse_state("1"), Ok(true));
        assert_eq!(parse_state("off"), Ok(false));
        assert_eq!(parse_state("0"), Ok(false));
        assert_eq!(parse_state("garbage"), Err(TuyaError::InvalidState));
    }

    #[test]
    fn status_reports_silent_for_undetected_devices() {
        let mut table = DeviceTable::new();
        table.insert_from_config(
            "lamp".into(),
            DeviceSecret::new("dev-1"),
            "keyA".into(),
            None,
            None,
        );
        let doc = status(&table, "house", None, 1);
        assert_eq!(doc.devices[0].state, "silent");
    }
}
