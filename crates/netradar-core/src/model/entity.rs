// ── Entity envelope and signal variants ──
//
// Every discovered signal shares a common envelope (id, name, lifecycle,
// timestamps, optional mac/ip/strength, enrichment fields) plus a
// variant-specific detail payload. The variant set is closed: six kinds,
// matched exhaustively everywhere.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ── Lifecycle ───────────────────────────────────────────────────────

/// Lifecycle status of an entity. Advances only in the order
/// `active → stale → expired`; a fresh observation resets to `active`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LifecycleStatus {
    #[default]
    Active,
    Stale,
    Expired,
}

// ── Variant payloads ────────────────────────────────────────────────

/// One local interface on the host machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInterface {
    pub name: String,
    pub ip: String,
    pub mac: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostDetail {
    pub hostname: String,
    pub interfaces: Vec<HostInterface>,
}

/// Wi-Fi frequency band, derived from the channel number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum Band {
    #[serde(rename = "2.4GHz")]
    #[strum(serialize = "2.4GHz")]
    TwoPointFour,
    #[serde(rename = "5GHz")]
    #[strum(serialize = "5GHz")]
    Five,
    #[serde(rename = "6GHz")]
    #[strum(serialize = "6GHz")]
    Six,
}

impl Band {
    /// Channels above 177 are 6 GHz, above 14 are 5 GHz, the rest 2.4 GHz.
    #[must_use]
    pub fn from_channel(channel: u32) -> Self {
        if channel > 177 {
            Self::Six
        } else if channel > 14 {
            Self::Five
        } else {
            Self::TwoPointFour
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiApDetail {
    pub ssid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bssid: Option<String>,
    pub channel: u32,
    pub band: Band,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    pub is_connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanDetail {
    pub interface: String,
    pub is_gateway: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BluetoothDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minor_type: Option<String>,
    pub is_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MdnsDetail {
    /// Formatted service type, e.g. `_airplay._tcp`.
    pub service_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum TransportProtocol {
    #[serde(rename = "TCP")]
    #[strum(serialize = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    #[strum(serialize = "UDP")]
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketDetail {
    pub protocol: TransportProtocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
    pub remote_port: u16,
    pub remote_host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub process_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
}

/// Closed sum over the six signal variants. The tag appears on the wire
/// as `signalType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signalType")]
pub enum SignalDetail {
    #[serde(rename = "host")]
    Host(HostDetail),
    #[serde(rename = "wifi")]
    WifiAp(WifiApDetail),
    #[serde(rename = "lan")]
    LanNeighbor(LanDetail),
    #[serde(rename = "bluetooth")]
    BluetoothPeer(BluetoothDetail),
    #[serde(rename = "bonjour")]
    MdnsService(MdnsDetail),
    #[serde(rename = "connection")]
    SocketEndpoint(SocketDetail),
}

// ── Entity ──────────────────────────────────────────────────────────

/// A discovered signal endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    #[serde(flatten)]
    pub detail: SignalDetail,
    pub name: String,
    pub status: LifecycleStatus,
    pub first_seen: i64,
    pub last_seen: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Normalized signal strength, 0..100.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<u8>,

    // Enrichment fields -- written only through the patch path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocols: Option<BTreeMap<String, u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_packets: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_fingerprint_confidence: Option<f64>,

    // Boundary-only throughput -- attached to outbound copies at publish
    // time, never present on the stored entity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_per_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_in_per_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_out_per_sec: Option<f64>,
}

impl Entity {
    /// Build a fresh observation. Timestamps are zeroed -- the store owns
    /// them on upsert.
    #[must_use]
    pub fn observation(id: impl Into<String>, name: impl Into<String>, detail: SignalDetail) -> Self {
        Self {
            id: id.into(),
            detail,
            name: name.into(),
            status: LifecycleStatus::Active,
            first_seen: 0,
            last_seen: 0,
            mac: None,
            ip: None,
            signal_strength: None,
            protocols: None,
            total_bytes: None,
            total_packets: None,
            os_family: None,
            os_version: None,
            device_category: None,
            os_fingerprint_confidence: None,
            bytes_per_sec: None,
            bytes_in_per_sec: None,
            bytes_out_per_sec: None,
        }
    }

    #[must_use]
    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac = Some(mac.into());
        self
    }

    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    #[must_use]
    pub fn with_signal_strength(mut self, strength: u8) -> Self {
        self.signal_strength = Some(strength);
        self
    }

    #[must_use]
    pub fn is_host(&self) -> bool {
        matches!(self.detail, SignalDetail::Host(_))
    }

    /// Merge a fresh observation into this entity.
    ///
    /// Observation fields overwrite; enrichment fields (classification,
    /// OS inference, traffic totals) are preserved -- they are only ever
    /// written through [`apply_patch`](Self::apply_patch). The store sets
    /// `last_seen` and `status` around this call.
    pub fn merge_observation(&mut self, obs: Entity) {
        self.name = obs.name;
        if obs.mac.is_some() {
            self.mac = obs.mac;
        }
        if obs.ip.is_some() {
            self.ip = obs.ip;
        }
        if obs.signal_strength.is_some() {
            self.signal_strength = obs.signal_strength;
        }

        // LAN detail carries classifier output; keep it across re-observation.
        match (&mut self.detail, obs.detail) {
            (SignalDetail::LanNeighbor(existing), SignalDetail::LanNeighbor(incoming)) => {
                existing.interface = incoming.interface;
                existing.is_gateway = incoming.is_gateway;
                if incoming.vendor.is_some() {
                    existing.vendor = incoming.vendor;
                }
            }
            (current, incoming) => *current = incoming,
        }
    }

    /// Apply an enrichment patch. Never touches `last_seen` or `status`.
    pub fn apply_patch(&mut self, patch: EntityPatch) {
        if let SignalDetail::LanNeighbor(lan) = &mut self.detail {
            if patch.device_type.is_some() {
                lan.device_type = patch.device_type;
            }
            if patch.product_name.is_some() {
                lan.product_name = patch.product_name;
            }
            if patch.icon_key.is_some() {
                lan.icon_key = patch.icon_key;
            }
        }
        if patch.os_family.is_some() {
            self.os_family = patch.os_family;
        }
        if patch.os_version.is_some() {
            self.os_version = patch.os_version;
        }
        if patch.device_category.is_some() {
            self.device_category = patch.device_category;
        }
        if patch.os_fingerprint_confidence.is_some() {
            self.os_fingerprint_confidence = patch.os_fingerprint_confidence;
        }
        if patch.protocols.is_some() {
            self.protocols = patch.protocols;
        }
        if patch.total_bytes.is_some() {
            self.total_bytes = patch.total_bytes;
        }
        if patch.total_packets.is_some() {
            self.total_packets = patch.total_packets;
        }
    }
}

/// A partial enrichment update. All fields optional; `None` means
/// "leave alone".
#[derive(Debug, Clone, Default)]
pub struct EntityPatch {
    pub device_type: Option<String>,
    pub product_name: Option<String>,
    pub icon_key: Option<String>,
    pub os_family: Option<String>,
    pub os_version: Option<String>,
    pub device_category: Option<String>,
    pub os_fingerprint_confidence: Option<f64>,
    pub protocols: Option<BTreeMap<String, u64>>,
    pub total_bytes: Option<u64>,
    pub total_packets: Option<u64>,
}

// ── Deterministic ids ───────────────────────────────────────────────

/// Id constructors. Pure functions of the observation, so identity
/// survives re-observation.
pub mod ids {
    use super::TransportProtocol;

    /// The single host entity.
    pub const HOST: &str = "this-device";

    #[must_use]
    pub fn wifi(ssid: &str) -> String {
        format!("wifi-{ssid}")
    }

    /// `mac` must already be normalized (lowercase, colon-separated,
    /// two digits per octet).
    #[must_use]
    pub fn lan(mac: &str) -> String {
        format!("lan-{mac}")
    }

    #[must_use]
    pub fn bluetooth(mac: Option<&str>, name: &str) -> String {
        match mac {
            Some(mac) => format!("bt-{mac}"),
            None => format!("bt-{}", name.replace(' ', "-")),
        }
    }

    #[must_use]
    pub fn mdns(service_type: &str, name_or_host: &str) -> String {
        format!("bonjour-{service_type}-{}", name_or_host.replace(' ', "-"))
    }

    #[must_use]
    pub fn socket(
        protocol: TransportProtocol,
        remote_host: &str,
        remote_port: u16,
        process: &str,
    ) -> String {
        format!("conn-{protocol}-{remote_host}-{remote_port}-{process}")
    }
}
