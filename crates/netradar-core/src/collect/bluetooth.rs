// ── Bluetooth collector ──
//
// Reads the OS profiler's structured Bluetooth report. Section key names
// drift across OS minor versions (`device_connected`,
// `device_not_connected`, `devices_not_connected`) -- all are read and
// unioned, first occurrence of a device name wins.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::{Collector, CollectorResult, first_signed_int, signal_strength_from_rssi};
use crate::exec;
use crate::model::{BluetoothDetail, Entity, Relation, RelationKind, SignalDetail, ids};

const PROFILER_TIMEOUT: Duration = Duration::from_secs(15);

/// Section keys, in priority order. The first is the connected section.
const SECTIONS: [(&str, bool); 3] = [
    ("device_connected", true),
    ("device_not_connected", false),
    ("devices_not_connected", false),
];

/// Keys that can individually mark a device as connected.
const CONNECTED_KEYS: [&str; 3] = ["device_connected", "device_isconnected", "device_status"];

pub struct BluetoothCollector;

#[async_trait]
impl Collector for BluetoothCollector {
    fn name(&self) -> &'static str {
        "bluetooth"
    }

    async fn scan(&self) -> CollectorResult {
        let stdout = match exec::run_ok(
            "system_profiler",
            &["SPBluetoothDataType", "-json"],
            PROFILER_TIMEOUT,
        )
        .await
        {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "bluetooth profiler failed");
                return CollectorResult::empty();
            }
        };

        match serde_json::from_str::<Value>(&stdout) {
            Ok(json) => build_result(parse_profiler(&json)),
            Err(e) => {
                warn!(error = %e, "bluetooth profiler output was not valid JSON");
                CollectorResult::empty()
            }
        }
    }
}

// ── Parsing ─────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct BluetoothDevice {
    pub name: String,
    pub address: Option<String>,
    pub is_connected: bool,
    pub rssi: Option<i32>,
    pub battery: Option<u8>,
    pub minor_type: Option<String>,
}

pub(crate) fn parse_profiler(json: &Value) -> Vec<BluetoothDevice> {
    let mut devices = Vec::new();

    let Some(controllers) = json.get("SPBluetoothDataType").and_then(Value::as_array) else {
        return devices;
    };

    for controller in controllers {
        for (section_key, section_connected) in SECTIONS {
            let Some(entries) = controller.get(section_key).and_then(Value::as_array) else {
                continue;
            };
            for entry in entries {
                let Some(map) = entry.as_object() else {
                    continue;
                };
                for (name, fields) in map {
                    if devices.iter().any(|d: &BluetoothDevice| &d.name == name) {
                        continue;
                    }
                    devices.push(parse_device(name, fields, section_connected));
                }
            }
        }
    }

    devices
}

fn parse_device(name: &str, fields: &Value, section_connected: bool) -> BluetoothDevice {
    let address = fields
        .get("device_address")
        .and_then(Value::as_str)
        .map(|addr| addr.to_lowercase().replace('-', ":"));

    let is_connected = section_connected
        || CONNECTED_KEYS.iter().any(|key| {
            fields
                .get(*key)
                .is_some_and(|v| affirmative(v))
        });

    let rssi = match fields.get("device_rssi") {
        Some(Value::Number(n)) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Some(Value::String(s)) => first_signed_int(s),
        _ => None,
    };

    let battery = ["device_batteryLevel", "device_batteryLevelMain"]
        .iter()
        .find_map(|key| fields.get(*key))
        .and_then(parse_battery);

    let minor_type = fields
        .get("device_minorType")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);

    BluetoothDevice {
        name: name.to_owned(),
        address,
        is_connected,
        rssi,
        battery,
        minor_type,
    }
}

fn affirmative(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => {
            let s = s.to_lowercase();
            s == "attrib_yes" || s == "yes" || s == "true" || s == "connected"
        }
        _ => false,
    }
}

/// Battery is `"75%"`, `"75"`, or a number.
fn parse_battery(value: &Value) -> Option<u8> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

fn build_result(devices: Vec<BluetoothDevice>) -> CollectorResult {
    let mut result = CollectorResult::empty();

    for device in devices {
        let id = ids::bluetooth(device.address.as_deref(), &device.name);
        let mut entity = Entity::observation(
            id.clone(),
            device.name,
            SignalDetail::BluetoothPeer(BluetoothDetail {
                minor_type: device.minor_type,
                is_connected: device.is_connected,
                battery_level: device.battery,
                rssi: device.rssi,
            }),
        );
        if let Some(address) = device.address {
            entity = entity.with_mac(address);
        }
        if let Some(rssi) = device.rssi {
            entity = entity.with_signal_strength(signal_strength_from_rssi(rssi));
        }

        result
            .relations
            .push(Relation::link(id, ids::HOST, RelationKind::ConnectedTo));
        result.entities.push(entity);
    }

    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fixture() -> Value {
        serde_json::json!({
            "SPBluetoothDataType": [{
                "controller_properties": { "controller_address": "11:22:33:44:55:66" },
                "device_connected": [
                    {
                        "AirPods Pro": {
                            "device_address": "AA-BB-CC-DD-EE-01",
                            "device_minorType": "Headphones",
                            "device_batteryLevelMain": "75%",
                            "device_rssi": -52
                        }
                    }
                ],
                "device_not_connected": [
                    { "Magic Keyboard": { "device_address": "AA:BB:CC:DD:EE:02" } }
                ],
                "devices_not_connected": [
                    { "Magic Keyboard": { "device_address": "AA:BB:CC:DD:EE:02" } },
                    { "MX Master 3": {} }
                ]
            }]
        })
    }

    #[test]
    fn unions_all_sections_first_wins() {
        let devices = parse_profiler(&fixture());
        assert_eq!(devices.len(), 3);
        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["AirPods Pro", "Magic Keyboard", "MX Master 3"]);
    }

    #[test]
    fn connected_section_marks_connected() {
        let devices = parse_profiler(&fixture());
        assert!(devices[0].is_connected);
        assert!(!devices[1].is_connected);
    }

    #[test]
    fn indicator_key_marks_connected_outside_section() {
        let json = serde_json::json!({
            "SPBluetoothDataType": [{
                "device_not_connected": [
                    { "Speaker": { "device_connected": "attrib_Yes" } }
                ]
            }]
        });
        let devices = parse_profiler(&json);
        assert!(devices[0].is_connected);
    }

    #[test]
    fn battery_and_rssi_parse() {
        let devices = parse_profiler(&fixture());
        assert_eq!(devices[0].battery, Some(75));
        assert_eq!(devices[0].rssi, Some(-52));
    }

    #[test]
    fn address_normalizes_to_colon_lowercase() {
        let devices = parse_profiler(&fixture());
        assert_eq!(devices[0].address.as_deref(), Some("aa:bb:cc:dd:ee:01"));
    }

    #[test]
    fn id_falls_back_to_sanitized_name() {
        let result = build_result(parse_profiler(&fixture()));
        let nameless = result
            .entities
            .iter()
            .find(|e| e.name == "MX Master 3")
            .unwrap();
        assert_eq!(nameless.id, "bt-MX-Master-3");

        let with_mac = result
            .entities
            .iter()
            .find(|e| e.name == "AirPods Pro")
            .unwrap();
        assert_eq!(with_mac.id, "bt-aa:bb:cc:dd:ee:01");
    }
}
