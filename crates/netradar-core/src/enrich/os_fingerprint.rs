// ── OS fingerprinter ──
//
// Weighted multi-signal inference over a static database of six OS
// family profiles. Signals: passive TTL medians, MAC vendor, hostname,
// mDNS service types, Bluetooth names, and on-demand probe results.
// Output flows through the lifecycle-safe patch path only.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::LazyLock;

use regex::RegexBuilder;
use tracing::debug;

use crate::model::{Entity, EntityPatch, SignalDetail};
use crate::probe::ProbeHit;

const TTL_WINDOW: usize = 100;
const CONFIDENCE_FLOOR: f64 = 0.45;
const CONFIDENCE_SETTLED: f64 = 0.85;

const WEIGHT_TTL: f64 = 0.3;
const WEIGHT_VENDOR: f64 = 0.4;
const WEIGHT_HOSTNAME: f64 = 0.5;
const WEIGHT_MDNS: f64 = 0.5;
const WEIGHT_BT_NAME: f64 = 0.5;
const WEIGHT_PROBE: f64 = 0.9;

struct OsProfile {
    family: &'static str,
    ttl_range: Option<(u8, u8)>,
    vendors: &'static [&'static str],
    hostnames: &'static [&'static str],
    services: &'static [&'static str],
    bt_names: &'static [&'static str],
}

static PROFILES: &[OsProfile] = &[
    OsProfile {
        family: "macos",
        ttl_range: Some((48, 64)),
        vendors: &["apple"],
        hostnames: &["macbook", "\\bimac\\b", "mac-?mini", "mac-?pro", "\\bmbp\\b"],
        services: &["_companion-link._tcp", "_rdlink._tcp", "_afpovertcp._tcp"],
        bt_names: &["macbook", "\\bimac\\b"],
    },
    OsProfile {
        family: "ios",
        ttl_range: Some((48, 64)),
        vendors: &["apple"],
        hostnames: &["iphone", "ipad", "ipod"],
        services: &["_apple-mobdev2._tcp"],
        bt_names: &["iphone", "ipad", "watch", "airpods"],
    },
    OsProfile {
        family: "windows",
        ttl_range: Some((65, 128)),
        vendors: &["microsoft"],
        hostnames: &["desktop-", "\\bwin(dows)?\\b", "surface"],
        services: &["_smb._tcp"],
        bt_names: &["surface"],
    },
    OsProfile {
        family: "android",
        ttl_range: Some((33, 64)),
        vendors: &["samsung", "xiaomi", "oneplus", "huawei", "google"],
        hostnames: &["android", "galaxy", "pixel"],
        services: &["_googlecast._tcp"],
        bt_names: &["galaxy", "pixel", "android"],
    },
    OsProfile {
        family: "linux",
        ttl_range: Some((33, 64)),
        vendors: &["raspberry", "espressif"],
        hostnames: &["raspberrypi", "debian", "ubuntu", "-server\\b", "\\bnas\\b"],
        services: &["_workstation._tcp", "_sftp-ssh._tcp"],
        bt_names: &[],
    },
    OsProfile {
        family: "freebsd",
        ttl_range: Some((33, 64)),
        vendors: &[],
        hostnames: &["freebsd", "pfsense", "opnsense"],
        services: &[],
        bt_names: &[],
    },
];

struct CompiledOsProfile {
    profile: &'static OsProfile,
    hostnames: Vec<regex::Regex>,
    bt_names: Vec<regex::Regex>,
    /// Core labels of the profile service types (`_hue._tcp` → `hue`).
    service_labels: Vec<String>,
}

fn compile_patterns(patterns: &[&str]) -> Vec<regex::Regex> {
    patterns
        .iter()
        .filter_map(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    debug!(pattern, error = %e, "skipping OS pattern");
                    e
                })
                .ok()
        })
        .collect()
}

static COMPILED: LazyLock<Vec<CompiledOsProfile>> = LazyLock::new(|| {
    PROFILES
        .iter()
        .map(|profile| CompiledOsProfile {
            profile,
            hostnames: compile_patterns(profile.hostnames),
            bt_names: compile_patterns(profile.bt_names),
            service_labels: profile
                .services
                .iter()
                .map(|ty| core_service_label(ty))
                .collect(),
        })
        .collect()
});

/// `_companion-link._tcp` → `companion-link`.
fn core_service_label(service_type: &str) -> String {
    service_type
        .trim_start_matches('_')
        .trim_end_matches("._tcp")
        .trim_end_matches("._udp")
        .to_owned()
}

// ── TTL window ──────────────────────────────────────────────────────

/// Rolling window of the last 100 TTL samples for one IP.
#[derive(Debug, Default)]
pub struct TtlWindow {
    samples: VecDeque<u8>,
}

impl TtlWindow {
    pub fn push(&mut self, ttl: u8) {
        if self.samples.len() == TTL_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(ttl);
    }

    /// Lower median of the window.
    #[must_use]
    pub fn median(&self) -> Option<u8> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<u8> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        Some(sorted[(sorted.len() - 1) / 2])
    }
}

// ── Fingerprinter ───────────────────────────────────────────────────

pub struct OsFingerprinter {
    ttl_by_ip: HashMap<String, TtlWindow>,
    probe_by_ip: HashMap<String, ProbeHit>,
}

impl Default for OsFingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

impl OsFingerprinter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ttl_by_ip: HashMap::new(),
            probe_by_ip: HashMap::new(),
        }
    }

    /// Feed passive TTL samples from the packet pipeline.
    pub fn record_ttl(&mut self, ip: &str, samples: impl IntoIterator<Item = u8>) {
        let window = self.ttl_by_ip.entry(ip.to_owned()).or_default();
        for ttl in samples {
            window.push(ttl);
        }
    }

    /// Record an on-demand probe result for an IP.
    pub fn record_probe(&mut self, ip: &str, hit: ProbeHit) {
        self.probe_by_ip.insert(ip.to_owned(), hit);
    }

    /// Run inference over the current entity set. LAN and Bluetooth
    /// entities only; the host and entities already at settled
    /// confidence are untouched.
    #[must_use]
    pub fn infer(&self, entities: &[Entity]) -> Vec<(String, EntityPatch)> {
        let services_at_ip = index_services(entities);
        let mut patches = Vec::new();

        for entity in entities {
            let (vendor, bt_minor, is_bluetooth) = match &entity.detail {
                SignalDetail::LanNeighbor(lan) => (lan.vendor.as_deref(), None, false),
                SignalDetail::BluetoothPeer(bt) => (None, bt.minor_type.as_deref(), true),
                _ => continue,
            };
            if entity
                .os_fingerprint_confidence
                .is_some_and(|c| c >= CONFIDENCE_SETTLED)
            {
                continue;
            }

            let ttl_median = entity
                .ip
                .as_ref()
                .and_then(|ip| self.ttl_by_ip.get(ip))
                .and_then(TtlWindow::median);
            let probe = entity.ip.as_ref().and_then(|ip| self.probe_by_ip.get(ip));
            let services = entity
                .ip
                .as_ref()
                .and_then(|ip| services_at_ip.get(ip));

            let mut best: Option<(f64, &CompiledOsProfile)> = None;
            for compiled in COMPILED.iter() {
                let score = score_profile(
                    compiled,
                    vendor,
                    &entity.name,
                    ttl_median,
                    services,
                    is_bluetooth,
                    probe,
                );
                if score > 0.0 && best.is_none_or(|(b, _)| score > b) {
                    best = Some((score, compiled));
                }
            }

            let Some((sum, compiled)) = best else {
                continue;
            };
            let confidence = sum.min(1.0);
            if confidence < CONFIDENCE_FLOOR {
                continue;
            }

            let family = compiled.profile.family;
            let os_version = probe
                .filter(|hit| hit.family.as_deref() == Some(family))
                .and_then(|hit| hit.version.clone());
            let category = derive_category(
                bt_minor,
                lan_device_type(entity),
                family,
            );

            patches.push((
                entity.id.clone(),
                EntityPatch {
                    os_family: Some(family.to_owned()),
                    os_version,
                    device_category: Some(category.to_owned()),
                    os_fingerprint_confidence: Some(confidence),
                    ..EntityPatch::default()
                },
            ));
        }

        patches
    }
}

fn lan_device_type(entity: &Entity) -> Option<&str> {
    match &entity.detail {
        SignalDetail::LanNeighbor(lan) => lan.device_type.as_deref(),
        _ => None,
    }
}

#[allow(clippy::too_many_arguments)]
fn score_profile(
    compiled: &CompiledOsProfile,
    vendor: Option<&str>,
    name: &str,
    ttl_median: Option<u8>,
    services_at_ip: Option<&HashSet<String>>,
    is_bluetooth: bool,
    probe: Option<&ProbeHit>,
) -> f64 {
    let profile = compiled.profile;
    let mut score = 0.0;

    if let (Some(median), Some((lo, hi))) = (ttl_median, profile.ttl_range) {
        if median >= lo && median <= hi {
            score += WEIGHT_TTL;
        }
    }

    if let Some(vendor) = vendor {
        let vendor = vendor.to_lowercase();
        if profile.vendors.iter().any(|v| vendor.contains(v)) {
            score += WEIGHT_VENDOR;
        }
    }

    if compiled.hostnames.iter().any(|re| re.is_match(name)) {
        score += WEIGHT_HOSTNAME;
    }

    if let Some(services) = services_at_ip {
        if compiled
            .service_labels
            .iter()
            .any(|label| services.iter().any(|ty| ty.contains(label.as_str())))
        {
            score += WEIGHT_MDNS;
        }
    }

    if is_bluetooth && compiled.bt_names.iter().any(|re| re.is_match(name)) {
        score += WEIGHT_BT_NAME;
    }

    if probe.is_some_and(|hit| hit.family.as_deref() == Some(profile.family)) {
        score += WEIGHT_PROBE;
    }

    score
}

/// Device category: Bluetooth minor type takes precedence, then the
/// classifier's device type, then the OS family.
fn derive_category(
    bt_minor: Option<&str>,
    device_type: Option<&str>,
    os_family: &str,
) -> &'static str {
    if let Some(minor) = bt_minor {
        let minor = minor.to_lowercase();
        if minor.contains("phone") || minor.contains("smartphone") {
            return "mobile";
        }
        if minor.contains("laptop") || minor.contains("notebook") {
            return "laptop";
        }
        if minor.contains("desktop") || minor.contains("computer") {
            return "desktop";
        }
        if minor.contains("audio") || minor.contains("speaker") || minor.contains("headphone") {
            return "iot";
        }
    }

    if let Some(device_type) = device_type {
        match device_type {
            "computer" => {
                return if os_family == "ios" || os_family == "android" {
                    "mobile"
                } else {
                    "desktop"
                };
            }
            "server" | "storage" => return "server",
            "smart-home" | "speaker" | "media-player" | "camera" => return "iot",
            "router" => return "embedded",
            _ => {}
        }
    }

    match os_family {
        "ios" | "android" => "mobile",
        "macos" | "windows" => "desktop",
        "linux" | "freebsd" => "server",
        _ => "unknown",
    }
}

fn index_services(entities: &[Entity]) -> HashMap<String, HashSet<String>> {
    let mut index: HashMap<String, HashSet<String>> = HashMap::new();
    for entity in entities {
        let SignalDetail::MdnsService(mdns) = &entity.detail else {
            continue;
        };
        let Some(ip) = &entity.ip else {
            continue;
        };
        index
            .entry(ip.clone())
            .or_default()
            .insert(mdns.service_type.clone());
    }
    index
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{BluetoothDetail, LanDetail, MdnsDetail, ids};

    fn lan(mac: &str, ip: &str, name: &str, vendor: Option<&str>) -> Entity {
        Entity::observation(
            ids::lan(mac),
            name.to_owned(),
            SignalDetail::LanNeighbor(LanDetail {
                interface: "en0".into(),
                is_gateway: false,
                vendor: vendor.map(ToOwned::to_owned),
                device_type: None,
                product_name: None,
                icon_key: None,
            }),
        )
        .with_ip(ip)
    }

    fn bt(name: &str, minor: Option<&str>) -> Entity {
        Entity::observation(
            ids::bluetooth(None, name),
            name.to_owned(),
            SignalDetail::BluetoothPeer(BluetoothDetail {
                minor_type: minor.map(ToOwned::to_owned),
                is_connected: true,
                battery_level: None,
                rssi: None,
            }),
        )
    }

    #[test]
    fn ttl_window_is_bounded_with_lower_median() {
        let mut window = TtlWindow::default();
        assert_eq!(window.median(), None);
        for _ in 0..150 {
            window.push(64);
        }
        assert_eq!(window.samples.len(), TTL_WINDOW);
        window.push(128);
        assert_eq!(window.median(), Some(64));

        let mut even = TtlWindow::default();
        even.push(60);
        even.push(64);
        assert_eq!(even.median(), Some(60));
    }

    #[test]
    fn vendor_alone_is_below_the_floor() {
        let fp = OsFingerprinter::new();
        let entities = vec![lan(
            "f0:18:98:01:02:03",
            "192.168.1.20",
            "192.168.1.20",
            Some("Apple, Inc."),
        )];
        assert!(fp.infer(&entities).is_empty());
    }

    #[test]
    fn vendor_plus_hostname_infers_macos() {
        let fp = OsFingerprinter::new();
        let entities = vec![lan(
            "f0:18:98:01:02:03",
            "192.168.1.20",
            "Johns-MacBook-Pro",
            Some("Apple, Inc."),
        )];
        let patches = fp.infer(&entities);
        assert_eq!(patches.len(), 1);
        let patch = &patches[0].1;
        assert_eq!(patch.os_family.as_deref(), Some("macos"));
        assert!((patch.os_fingerprint_confidence.unwrap() - 0.9).abs() < 1e-9);
        assert_eq!(patch.device_category.as_deref(), Some("desktop"));
    }

    #[test]
    fn ttl_median_contributes() {
        let mut fp = OsFingerprinter::new();
        fp.record_ttl("192.168.1.30", [128, 128, 127]);
        let entities = vec![lan(
            "28:18:78:01:02:03",
            "192.168.1.30",
            "DESKTOP-3F2K1",
            Some("Microsoft Corporation"),
        )];
        let patches = fp.infer(&entities);
        let patch = &patches[0].1;
        assert_eq!(patch.os_family.as_deref(), Some("windows"));
        // vendor 0.4 + hostname 0.5 + ttl 0.3 = 1.2, capped at 1.0
        assert!((patch.os_fingerprint_confidence.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn mdns_service_label_matches_loosely() {
        let fp = OsFingerprinter::new();
        let entities = vec![
            lan(
                "f0:18:98:01:02:03",
                "192.168.1.20",
                "192.168.1.20",
                Some("Apple, Inc."),
            ),
            Entity::observation(
                ids::mdns("_companion-link._tcp", "Study Mac"),
                "Study Mac",
                SignalDetail::MdnsService(MdnsDetail {
                    service_type: "_companion-link._tcp".into(),
                    port: None,
                    host: None,
                }),
            )
            .with_ip("192.168.1.20"),
        ];
        let patches = fp.infer(&entities);
        let entry = patches.iter().find(|(id, _)| id.starts_with("lan-")).unwrap();
        assert_eq!(entry.1.os_family.as_deref(), Some("macos"));
    }

    #[test]
    fn bluetooth_minor_type_wins_category() {
        let fp = OsFingerprinter::new();
        let entities = vec![bt("Johns iPhone", Some("Smartphone"))];
        let patches = fp.infer(&entities);
        let patch = &patches[0].1;
        assert_eq!(patch.os_family.as_deref(), Some("ios"));
        assert_eq!(patch.device_category.as_deref(), Some("mobile"));
    }

    #[test]
    fn probe_hit_dominates_and_supplies_version() {
        let mut fp = OsFingerprinter::new();
        fp.record_probe(
            "192.168.1.40",
            ProbeHit {
                family: Some("linux".into()),
                version: Some("Linux 5.4 - 5.15".into()),
                confidence: 0.92,
            },
        );
        let entities = vec![lan("dc:a6:32:01:02:03", "192.168.1.40", "192.168.1.40", None)];
        let patches = fp.infer(&entities);
        let patch = &patches[0].1;
        assert_eq!(patch.os_family.as_deref(), Some("linux"));
        assert_eq!(patch.os_version.as_deref(), Some("Linux 5.4 - 5.15"));
    }

    #[test]
    fn settled_entities_are_untouched() {
        let fp = OsFingerprinter::new();
        let mut entity = lan(
            "f0:18:98:01:02:03",
            "192.168.1.20",
            "Johns-MacBook-Pro",
            Some("Apple, Inc."),
        );
        entity.os_fingerprint_confidence = Some(0.9);
        assert!(fp.infer(&[entity]).is_empty());
    }

    #[test]
    fn category_derivation_table() {
        assert_eq!(derive_category(Some("Laptop"), None, "macos"), "laptop");
        assert_eq!(derive_category(None, Some("computer"), "android"), "mobile");
        assert_eq!(derive_category(None, Some("storage"), "linux"), "server");
        assert_eq!(derive_category(None, Some("router"), "linux"), "embedded");
        assert_eq!(derive_category(None, Some("speaker"), "linux"), "iot");
        assert_eq!(derive_category(None, None, "freebsd"), "server");
        assert_eq!(derive_category(None, None, "other"), "unknown");
    }
}
