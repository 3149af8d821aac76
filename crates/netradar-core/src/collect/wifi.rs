// ── Wi-Fi collector ──
//
// Reads the OS profiler's structured Wi-Fi report and emits one entity
// per interface that is currently associated with a network. SSIDs
// redacted by the OS (missing location permission) fall back to the
// preferred-networks listing, then to a fixed label.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::{Collector, CollectorResult, first_signed_int, signal_strength_from_rssi};
use crate::exec;
use crate::model::{Band, Entity, Relation, RelationKind, SignalDetail, WifiApDetail, ids};

const PROFILER_TIMEOUT: Duration = Duration::from_secs(15);
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(5);
const REDACTED: &str = "<redacted>";
const FALLBACK_SSID: &str = "Connected Wi-Fi";

pub struct WifiCollector;

#[async_trait]
impl Collector for WifiCollector {
    fn name(&self) -> &'static str {
        "wifi"
    }

    async fn scan(&self) -> CollectorResult {
        let stdout = match exec::run_ok(
            "system_profiler",
            &["SPAirPortDataType", "-json"],
            PROFILER_TIMEOUT,
        )
        .await
        {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "wifi profiler failed");
                return CollectorResult::empty();
            }
        };

        let mut networks = match serde_json::from_str::<Value>(&stdout) {
            Ok(json) => parse_profiler(&json),
            Err(e) => {
                warn!(error = %e, "wifi profiler output was not valid JSON");
                return CollectorResult::empty();
            }
        };

        for network in &mut networks {
            if network.ssid == REDACTED {
                network.ssid = resolve_redacted_ssid(&network.interface).await;
            }
        }

        build_result(networks)
    }
}

// ── Parsing ─────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct CurrentNetwork {
    pub interface: String,
    pub ssid: String,
    pub bssid: Option<String>,
    pub channel: u32,
    pub security: Option<String>,
    pub rssi: Option<i32>,
}

/// Walk the profiler JSON; keep interfaces reporting a current network
/// with a channel.
pub(crate) fn parse_profiler(json: &Value) -> Vec<CurrentNetwork> {
    let mut out = Vec::new();

    let interfaces = json
        .get("SPAirPortDataType")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(|item| item.get("spairport_airport_interfaces"))
        .and_then(Value::as_array);

    let Some(interfaces) = interfaces else {
        return out;
    };

    for iface in interfaces {
        let Some(name) = iface.get("_name").and_then(Value::as_str) else {
            continue;
        };
        let Some(current) = iface.get("spairport_current_network_information") else {
            continue;
        };
        let Some(channel) = parse_channel(current.get("spairport_network_channel")) else {
            continue;
        };

        let ssid = current
            .get("_name")
            .and_then(Value::as_str)
            .unwrap_or(REDACTED)
            .to_owned();
        let bssid = current
            .get("spairport_network_bssid")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);
        let security = current
            .get("spairport_security_mode")
            .and_then(Value::as_str)
            .map(security_label);
        let rssi = parse_rssi(current.get("spairport_signal_noise"));

        out.push(CurrentNetwork {
            interface: name.to_owned(),
            ssid,
            bssid,
            channel,
            security,
            rssi,
        });
    }

    out
}

/// Channel is a number or a string like `"36 (5GHz, 80MHz)"`.
fn parse_channel(value: Option<&Value>) -> Option<u32> {
    match value? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => first_signed_int(s).and_then(|n| u32::try_from(n).ok()),
        _ => None,
    }
}

/// RSSI is a plain integer or a string whose first signed integer is the
/// signal (the second is noise).
pub(crate) fn parse_rssi(value: Option<&Value>) -> Option<i32> {
    match value? {
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => first_signed_int(s),
        _ => None,
    }
}

/// `spairport_security_mode_wpa2_personal` → `WPA2 Personal`.
fn security_label(raw: &str) -> String {
    let stripped = raw.strip_prefix("spairport_security_mode_").unwrap_or(raw);
    stripped
        .split('_')
        .map(|word| {
            if word.starts_with("wpa") || word.starts_with("wep") {
                word.to_uppercase()
            } else {
                let mut chars = word.chars();
                chars.next().map_or_else(String::new, |first| {
                    first.to_uppercase().collect::<String>() + chars.as_str()
                })
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `networksetup -listpreferredwirelessnetworks <iface>` — first listed
/// network, or the fixed fallback label.
async fn resolve_redacted_ssid(interface: &str) -> String {
    match exec::run_ok(
        "networksetup",
        &["-listpreferredwirelessnetworks", interface],
        FALLBACK_TIMEOUT,
    )
    .await
    {
        Ok(out) => parse_preferred_networks(&out).unwrap_or_else(|| FALLBACK_SSID.to_owned()),
        Err(e) => {
            warn!(error = %e, interface, "preferred-network fallback failed");
            FALLBACK_SSID.to_owned()
        }
    }
}

pub(crate) fn parse_preferred_networks(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(ToOwned::to_owned)
}

fn build_result(networks: Vec<CurrentNetwork>) -> CollectorResult {
    let mut result = CollectorResult::empty();

    for network in networks {
        let id = ids::wifi(&network.ssid);
        let mut entity = Entity::observation(
            id.clone(),
            network.ssid.clone(),
            SignalDetail::WifiAp(WifiApDetail {
                ssid: network.ssid,
                bssid: network.bssid.clone(),
                channel: network.channel,
                band: Band::from_channel(network.channel),
                security: network.security,
                is_connected: true,
            }),
        );
        if let Some(bssid) = network.bssid {
            entity = entity.with_mac(bssid);
        }
        if let Some(rssi) = network.rssi {
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

    fn profiler_fixture(ssid: &str) -> Value {
        serde_json::json!({
            "SPAirPortDataType": [{
                "spairport_airport_interfaces": [
                    {
                        "_name": "en0",
                        "spairport_current_network_information": {
                            "_name": ssid,
                            "spairport_network_channel": "36 (5GHz, 80MHz)",
                            "spairport_security_mode": "spairport_security_mode_wpa2_personal",
                            "spairport_signal_noise": "-55 dBm / -92 dBm"
                        }
                    },
                    {
                        "_name": "awdl0"
                    }
                ]
            }]
        })
    }

    #[test]
    fn keeps_only_associated_interfaces() {
        let networks = parse_profiler(&profiler_fixture("HomeWiFi"));
        assert_eq!(networks.len(), 1);
        let net = &networks[0];
        assert_eq!(net.interface, "en0");
        assert_eq!(net.ssid, "HomeWiFi");
        assert_eq!(net.channel, 36);
        assert_eq!(net.security.as_deref(), Some("WPA2 Personal"));
        assert_eq!(net.rssi, Some(-55));
    }

    #[test]
    fn rssi_accepts_number_or_string() {
        assert_eq!(parse_rssi(Some(&serde_json::json!(-61))), Some(-61));
        assert_eq!(
            parse_rssi(Some(&serde_json::json!("-61 dBm / -90 dBm"))),
            Some(-61)
        );
        assert_eq!(parse_rssi(None), None);
    }

    #[test]
    fn six_ghz_channel_maps_to_six_band() {
        let json = serde_json::json!({
            "SPAirPortDataType": [{
                "spairport_airport_interfaces": [{
                    "_name": "en0",
                    "spairport_current_network_information": {
                        "_name": "Fast6",
                        "spairport_network_channel": 181
                    }
                }]
            }]
        });
        let networks = parse_profiler(&json);
        assert_eq!(networks[0].channel, 181);
        assert_eq!(Band::from_channel(networks[0].channel), Band::Six);
    }

    #[test]
    fn preferred_network_list_takes_first_entry() {
        let stdout = "Preferred networks on en0:\n\tHomeWiFi\n\tGuestWiFi\n";
        assert_eq!(
            parse_preferred_networks(stdout).as_deref(),
            Some("HomeWiFi")
        );
        assert_eq!(parse_preferred_networks("Preferred networks on en0:\n"), None);
    }

    #[test]
    fn builds_connected_entity_and_relation() {
        let result = build_result(parse_profiler(&profiler_fixture("HomeWiFi")));
        assert_eq!(result.entities.len(), 1);

        let entity = &result.entities[0];
        assert_eq!(entity.id, "wifi-HomeWiFi");
        assert_eq!(entity.signal_strength, Some(58));
        let SignalDetail::WifiAp(wifi) = &entity.detail else {
            panic!("expected wifi detail");
        };
        assert!(wifi.is_connected);
        assert_eq!(wifi.band, Band::Five);

        assert_eq!(result.relations[0].target, ids::HOST);
        assert_eq!(result.relations[0].kind, RelationKind::ConnectedTo);
    }
}
