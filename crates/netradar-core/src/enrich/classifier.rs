// ── Device classifier ──
//
// Cross-references link-layer vendor strings with mDNS service types and
// hostname patterns against a static profile database. Scoring: +1 per
// matching signal, highest strictly-positive score wins, ties broken by
// profile order.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::RegexBuilder;
use tracing::debug;

use crate::model::{Entity, EntityPatch, SignalDetail};

struct DeviceProfile {
    category: &'static str,
    product: &'static str,
    icon: &'static str,
    /// Case-insensitive vendor substrings.
    vendors: &'static [&'static str],
    /// Exact mDNS service types.
    services: &'static [&'static str],
    /// Case-insensitive hostname regexes.
    hostnames: &'static [&'static str],
}

static PROFILES: &[DeviceProfile] = &[
    DeviceProfile {
        category: "media-player",
        product: "Apple TV",
        icon: "tv",
        vendors: &[],
        services: &["_airplay._tcp"],
        hostnames: &["apple-?tv"],
    },
    DeviceProfile {
        category: "media-player",
        product: "Chromecast",
        icon: "cast",
        vendors: &[],
        services: &["_googlecast._tcp"],
        hostnames: &["chromecast"],
    },
    DeviceProfile {
        category: "media-player",
        product: "Roku",
        icon: "tv",
        vendors: &["roku"],
        services: &["_roku-rcp._tcp"],
        hostnames: &["roku"],
    },
    DeviceProfile {
        category: "speaker",
        product: "Sonos Speaker",
        icon: "speaker",
        vendors: &["sonos"],
        services: &["_sonos._tcp"],
        hostnames: &["sonos"],
    },
    DeviceProfile {
        category: "speaker",
        product: "HomePod",
        icon: "speaker",
        vendors: &[],
        services: &["_raop._tcp"],
        hostnames: &["homepod"],
    },
    DeviceProfile {
        category: "smart-home",
        product: "Philips Hue Bridge",
        icon: "lightbulb",
        vendors: &["philips", "signify"],
        services: &["_hue._tcp"],
        hostnames: &["hue"],
    },
    DeviceProfile {
        category: "smart-home",
        product: "Nest Device",
        icon: "thermostat",
        vendors: &["nest labs"],
        services: &[],
        hostnames: &["nest"],
    },
    DeviceProfile {
        category: "smart-home",
        product: "Ecobee Thermostat",
        icon: "thermostat",
        vendors: &["ecobee"],
        services: &[],
        hostnames: &["ecobee"],
    },
    DeviceProfile {
        category: "smart-home",
        product: "Ring Device",
        icon: "doorbell",
        vendors: &["ring llc"],
        services: &[],
        hostnames: &["ring"],
    },
    DeviceProfile {
        category: "smart-home",
        product: "Smart Plug",
        icon: "plug",
        vendors: &["tuya", "espressif"],
        services: &[],
        hostnames: &["plug", "tuya", "esp-?[0-9a-f]*$"],
    },
    DeviceProfile {
        category: "smart-home",
        product: "HomeKit Accessory",
        icon: "home",
        vendors: &[],
        services: &["_hap._tcp", "_homekit._tcp"],
        hostnames: &[],
    },
    DeviceProfile {
        category: "camera",
        product: "Wyze Camera",
        icon: "camera",
        vendors: &["wyze"],
        services: &[],
        hostnames: &["wyze"],
    },
    DeviceProfile {
        category: "camera",
        product: "IP Camera",
        icon: "camera",
        vendors: &["hikvision", "dahua", "axis communications"],
        services: &["_rtsp._tcp"],
        hostnames: &["cam(era)?[-_]?[0-9]*$"],
    },
    DeviceProfile {
        category: "printer",
        product: "Printer",
        icon: "printer",
        vendors: &["hewlett", "canon", "epson", "brother"],
        services: &[
            "_ipp._tcp",
            "_ipps._tcp",
            "_printer._tcp",
            "_pdl-datastream._tcp",
        ],
        hostnames: &["printer"],
    },
    DeviceProfile {
        category: "storage",
        product: "Synology NAS",
        icon: "nas",
        vendors: &["synology"],
        services: &[],
        hostnames: &["synology", "diskstation"],
    },
    DeviceProfile {
        category: "storage",
        product: "QNAP NAS",
        icon: "nas",
        vendors: &["qnap"],
        services: &[],
        hostnames: &["qnap"],
    },
    DeviceProfile {
        category: "storage",
        product: "Network Storage",
        icon: "nas",
        vendors: &["western digital", "seagate"],
        services: &["_afpovertcp._tcp"],
        hostnames: &["\\bnas\\b"],
    },
    DeviceProfile {
        category: "router",
        product: "UniFi Device",
        icon: "router",
        vendors: &["ubiquiti"],
        services: &[],
        hostnames: &["unifi", "\\budm\\b", "\\busw\\b", "\\buap\\b"],
    },
    DeviceProfile {
        category: "router",
        product: "Router",
        icon: "router",
        vendors: &["netgear", "tp-link", "asustek", "linksys", "belkin", "avm"],
        services: &[],
        hostnames: &["router", "gateway", "fritz"],
    },
    DeviceProfile {
        category: "game-console",
        product: "PlayStation",
        icon: "gamepad",
        vendors: &["sony interactive"],
        services: &[],
        hostnames: &["ps[45]", "playstation"],
    },
    DeviceProfile {
        category: "game-console",
        product: "Nintendo Switch",
        icon: "gamepad",
        vendors: &["nintendo"],
        services: &[],
        hostnames: &["nintendo", "switch"],
    },
    DeviceProfile {
        category: "game-console",
        product: "Xbox",
        icon: "gamepad",
        vendors: &[],
        services: &[],
        hostnames: &["xbox"],
    },
    DeviceProfile {
        category: "computer",
        product: "Mac",
        icon: "laptop",
        vendors: &[],
        services: &["_companion-link._tcp"],
        hostnames: &["macbook", "\\bimac\\b", "mac-?mini", "\\bmbp\\b"],
    },
    DeviceProfile {
        category: "computer",
        product: "Windows PC",
        icon: "desktop",
        vendors: &["microsoft"],
        services: &["_smb._tcp"],
        hostnames: &["desktop-", "\\bwin(dows)?\\b"],
    },
    DeviceProfile {
        category: "computer",
        product: "Raspberry Pi",
        icon: "computer",
        vendors: &["raspberry"],
        services: &[],
        hostnames: &["raspberrypi", "\\brpi\\b"],
    },
    DeviceProfile {
        category: "mobile",
        product: "Phone",
        icon: "phone",
        vendors: &["samsung", "xiaomi", "oneplus", "huawei"],
        services: &[],
        hostnames: &["iphone", "ipad", "android", "galaxy", "pixel"],
    },
];

struct CompiledProfile {
    profile: &'static DeviceProfile,
    hostnames: Vec<regex::Regex>,
}

static COMPILED: LazyLock<Vec<CompiledProfile>> = LazyLock::new(|| {
    PROFILES
        .iter()
        .map(|profile| CompiledProfile {
            profile,
            hostnames: profile
                .hostnames
                .iter()
                .filter_map(|pattern| {
                    RegexBuilder::new(pattern)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| {
                            debug!(pattern, error = %e, "skipping hostname pattern");
                            e
                        })
                        .ok()
                })
                .collect(),
        })
        .collect()
});

/// Per-IP view of the current mDNS set.
struct MdnsIndex {
    services_at_ip: HashMap<String, HashSet<String>>,
    display_name_at_ip: HashMap<String, String>,
}

pub struct Classifier;

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Classify every LAN entity that does not already carry a device
    /// type. Returns (entity id, patch) pairs for the writer to apply
    /// through the lifecycle-safe path.
    #[must_use]
    pub fn classify(&self, entities: &[Entity]) -> Vec<(String, EntityPatch)> {
        let index = build_mdns_index(entities);
        let mut patches = Vec::new();

        for entity in entities {
            let SignalDetail::LanNeighbor(lan) = &entity.detail else {
                continue;
            };
            if lan.device_type.is_some() {
                continue;
            }

            let services = entity
                .ip
                .as_ref()
                .and_then(|ip| index.services_at_ip.get(ip));

            let mut best: Option<(u32, &CompiledProfile)> = None;
            for compiled in COMPILED.iter() {
                let score = score_profile(compiled, lan.vendor.as_deref(), &entity.name, services);
                if score > 0 && best.is_none_or(|(b, _)| score > b) {
                    best = Some((score, compiled));
                }
            }

            if let Some((_, compiled)) = best {
                let mdns_name = entity
                    .ip
                    .as_ref()
                    .and_then(|ip| index.display_name_at_ip.get(ip))
                    .cloned();
                patches.push((
                    entity.id.clone(),
                    EntityPatch {
                        device_type: Some(compiled.profile.category.to_owned()),
                        product_name: Some(
                            mdns_name.unwrap_or_else(|| compiled.profile.product.to_owned()),
                        ),
                        icon_key: Some(compiled.profile.icon.to_owned()),
                        ..EntityPatch::default()
                    },
                ));
            }
        }

        patches
    }
}

fn score_profile(
    compiled: &CompiledProfile,
    vendor: Option<&str>,
    name: &str,
    services_at_ip: Option<&HashSet<String>>,
) -> u32 {
    let mut score = 0;

    if let Some(vendor) = vendor {
        let vendor = vendor.to_lowercase();
        if compiled
            .profile
            .vendors
            .iter()
            .any(|pattern| vendor.contains(pattern))
        {
            score += 1;
        }
    }

    if let Some(services) = services_at_ip {
        if compiled
            .profile
            .services
            .iter()
            .any(|ty| services.contains(*ty))
        {
            score += 1;
        }
    }

    if compiled.hostnames.iter().any(|re| re.is_match(name)) {
        score += 1;
    }

    score
}

fn build_mdns_index(entities: &[Entity]) -> MdnsIndex {
    let mut services_at_ip: HashMap<String, HashSet<String>> = HashMap::new();
    let mut display_name_at_ip: HashMap<String, String> = HashMap::new();

    for entity in entities {
        let SignalDetail::MdnsService(mdns) = &entity.detail else {
            continue;
        };
        let Some(ip) = &entity.ip else {
            continue;
        };
        services_at_ip
            .entry(ip.clone())
            .or_default()
            .insert(mdns.service_type.clone());
        display_name_at_ip
            .entry(ip.clone())
            .or_insert_with(|| strip_parenthetical(&entity.name));
    }

    MdnsIndex {
        services_at_ip,
        display_name_at_ip,
    }
}

/// `Living Room TV (2)` → `Living Room TV`.
fn strip_parenthetical(name: &str) -> String {
    name.rfind(" (")
        .filter(|_| name.ends_with(')'))
        .map_or(name, |at| &name[..at])
        .trim()
        .to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{LanDetail, MdnsDetail, ids};

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

    fn mdns(ty: &str, name: &str, ip: &str) -> Entity {
        Entity::observation(
            ids::mdns(ty, name),
            name.to_owned(),
            SignalDetail::MdnsService(MdnsDetail {
                service_type: ty.to_owned(),
                port: Some(80),
                host: None,
            }),
        )
        .with_ip(ip)
    }

    #[test]
    fn vendor_plus_service_beats_vendor_alone() {
        let entities = vec![
            lan(
                "00:17:88:01:02:03",
                "192.168.1.50",
                "Philips Lighting BV (192.168.1.50)",
                Some("Philips Lighting BV"),
            ),
            mdns("_hue._tcp", "Hue Bridge", "192.168.1.50"),
        ];
        let patches = Classifier::new().classify(&entities);
        assert_eq!(patches.len(), 1);

        let (id, patch) = &patches[0];
        assert_eq!(id, "lan-00:17:88:01:02:03");
        assert_eq!(patch.device_type.as_deref(), Some("smart-home"));
        assert_eq!(patch.icon_key.as_deref(), Some("lightbulb"));
        // mDNS display name preferred over the profile default.
        assert_eq!(patch.product_name.as_deref(), Some("Hue Bridge"));
    }

    #[test]
    fn parenthetical_suffix_is_stripped_from_mdns_name() {
        let entities = vec![
            lan(
                "48:a6:b8:01:02:03",
                "192.168.1.60",
                "Sonos, Inc. (192.168.1.60)",
                Some("Sonos, Inc."),
            ),
            mdns("_sonos._tcp", "Kitchen (2)", "192.168.1.60"),
        ];
        let patches = Classifier::new().classify(&entities);
        assert_eq!(patches[0].1.product_name.as_deref(), Some("Kitchen"));
    }

    #[test]
    fn zero_score_produces_no_patch() {
        let entities = vec![lan(
            "02:00:00:aa:bb:cc",
            "192.168.1.70",
            "192.168.1.70",
            None,
        )];
        assert!(Classifier::new().classify(&entities).is_empty());
    }

    #[test]
    fn already_classified_entities_are_skipped() {
        let mut entity = lan(
            "00:17:88:01:02:03",
            "192.168.1.50",
            "hue-bridge",
            Some("Philips Lighting BV"),
        );
        entity.apply_patch(EntityPatch {
            device_type: Some("smart-home".into()),
            ..EntityPatch::default()
        });
        assert!(Classifier::new().classify(&[entity]).is_empty());
    }

    #[test]
    fn hostname_pattern_matches_case_insensitively() {
        let entities = vec![lan(
            "b8:27:eb:01:02:03",
            "192.168.1.80",
            "RaspberryPi (192.168.1.80)",
            Some("Raspberry Pi Foundation"),
        )];
        let patches = Classifier::new().classify(&entities);
        assert_eq!(patches[0].1.device_type.as_deref(), Some("computer"));
        assert_eq!(patches[0].1.product_name.as_deref(), Some("Raspberry Pi"));
    }

    #[test]
    fn profile_db_has_expected_size() {
        assert_eq!(PROFILES.len(), 26);
    }
}
