// ── Link-layer neighbor collector ──
//
// Primes the OS neighbor cache with one best-effort multicast ping, then
// reads the arp table. Each complete entry becomes a LAN entity keyed by
// its normalized MAC, with a gateway or connected_to relation to the host.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::{Collector, CollectorResult};
use crate::exec;
use crate::model::{Entity, LanDetail, Relation, RelationKind, SignalDetail, ids};
use crate::vendor;

const TABLE_TIMEOUT: Duration = Duration::from_secs(5);
const BROADCAST_MAC: &str = "ff:ff:ff:ff:ff:ff";

pub struct NeighborCollector;

#[async_trait]
impl Collector for NeighborCollector {
    fn name(&self) -> &'static str {
        "neighbors"
    }

    async fn scan(&self) -> CollectorResult {
        // Warm the neighbor cache. Failure is irrelevant.
        let _ = exec::run(
            "ping",
            &["-c", "1", "-W", "1", "224.0.0.1"],
            Duration::from_secs(2),
        )
        .await;

        let stdout = match exec::run_ok("arp", &["-an"], TABLE_TIMEOUT).await {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "neighbor table read failed");
                return CollectorResult::empty();
            }
        };

        build_result(&parse_arp_output(&stdout))
    }
}

// ── Parsing ─────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ArpEntry {
    pub ip: String,
    pub mac: String,
    pub interface: String,
    pub is_gateway: bool,
}

/// Parse `arp -an` output: `? (IP) at MAC on IFACE …`.
///
/// Incomplete entries and the broadcast address are skipped. MACs are
/// normalized to colon-separated two-digit lowercase octets.
pub(crate) fn parse_arp_output(stdout: &str) -> Vec<ArpEntry> {
    let mut entries = Vec::new();

    for line in stdout.lines() {
        let Some(entry) = parse_arp_line(line) else {
            continue;
        };
        entries.push(entry);
    }

    entries
}

fn parse_arp_line(line: &str) -> Option<ArpEntry> {
    if line.contains("(incomplete)") {
        return None;
    }

    let ip = line.split('(').nth(1)?.split(')').next()?.to_owned();
    let after_at = line.split(" at ").nth(1)?;
    let raw_mac = after_at.split_whitespace().next()?;
    let mac = normalize_mac(raw_mac)?;
    if mac == BROADCAST_MAC {
        return None;
    }
    let interface = line.split(" on ").nth(1)?.split_whitespace().next()?.to_owned();
    let is_gateway = line.contains("ifscope") && ip.ends_with(".1");

    Some(ArpEntry {
        ip,
        mac,
        interface,
        is_gateway,
    })
}

/// Normalize a MAC to `aa:bb:cc:dd:ee:ff`. arp prints octets without
/// leading zeros (`0:1c:b3:9:5:dd`).
pub(crate) fn normalize_mac(raw: &str) -> Option<String> {
    let octets: Vec<&str> = raw.split(':').collect();
    if octets.len() != 6 {
        return None;
    }
    let mut parts = Vec::with_capacity(6);
    for octet in octets {
        let value = u8::from_str_radix(octet, 16).ok()?;
        parts.push(format!("{value:02x}"));
    }
    Some(parts.join(":"))
}

fn build_result(entries: &[ArpEntry]) -> CollectorResult {
    let mut result = CollectorResult::empty();

    for entry in entries {
        let vendor = vendor::lookup(&entry.mac).map(ToOwned::to_owned);
        let name = vendor.as_ref().map_or_else(
            || entry.ip.clone(),
            |v| format!("{v} ({})", entry.ip),
        );

        let id = ids::lan(&entry.mac);
        let entity = Entity::observation(
            id.clone(),
            name,
            SignalDetail::LanNeighbor(LanDetail {
                interface: entry.interface.clone(),
                is_gateway: entry.is_gateway,
                vendor,
                device_type: None,
                product_name: None,
                icon_key: None,
            }),
        )
        .with_mac(&entry.mac)
        .with_ip(&entry.ip);

        let kind = if entry.is_gateway {
            RelationKind::Gateway
        } else {
            RelationKind::ConnectedTo
        };
        result.relations.push(Relation::link(id, ids::HOST, kind));
        result.entities.push(entity);
    }

    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
? (192.168.1.1) at 74:83:c2:11:22:33 on en0 ifscope [ethernet]
? (192.168.1.42) at 0:17:88:9:5:dd on en0 ifscope [ethernet]
? (192.168.1.99) at (incomplete) on en0 ifscope [ethernet]
? (192.168.1.255) at ff:ff:ff:ff:ff:ff on en0 ifscope [ethernet]
? (224.0.0.251) at 1:0:5e:0:0:fb on en0 ifscope permanent [ethernet]
";

    #[test]
    fn parses_complete_entries_only() {
        let entries = parse_arp_output(SAMPLE);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].ip, "192.168.1.1");
        assert_eq!(entries[0].mac, "74:83:c2:11:22:33");
        assert_eq!(entries[0].interface, "en0");
    }

    #[test]
    fn normalizes_short_octets() {
        let entries = parse_arp_output(SAMPLE);
        assert_eq!(entries[1].mac, "00:17:88:09:05:dd");
    }

    #[test]
    fn gateway_heuristic_needs_dot_one_and_ifscope() {
        let entries = parse_arp_output(SAMPLE);
        assert!(entries[0].is_gateway);
        assert!(!entries[1].is_gateway);
    }

    #[test]
    fn broadcast_and_incomplete_are_skipped() {
        let entries = parse_arp_output(SAMPLE);
        assert!(entries.iter().all(|e| e.mac != BROADCAST_MAC));
        assert!(entries.iter().all(|e| e.ip != "192.168.1.99"));
    }

    #[test]
    fn builds_lan_entities_with_vendor_names() {
        let result = build_result(&parse_arp_output(SAMPLE));
        assert_eq!(result.entities.len(), 3);

        // 74:83:c2 is a known Ubiquiti prefix.
        let gw = &result.entities[0];
        assert_eq!(gw.id, "lan-74:83:c2:11:22:33");
        assert_eq!(gw.name, "Ubiquiti Inc (192.168.1.1)");
        assert_eq!(gw.ip.as_deref(), Some("192.168.1.1"));

        // Gateway relation for the .1, connected_to otherwise.
        assert_eq!(result.relations[0].kind, RelationKind::Gateway);
        assert_eq!(result.relations[1].kind, RelationKind::ConnectedTo);
        assert!(result.relations.iter().all(|r| r.target == ids::HOST));
    }

    #[test]
    fn unknown_vendor_uses_ip_as_name() {
        let entries = vec![ArpEntry {
            ip: "10.0.0.7".into(),
            mac: "02:00:00:aa:bb:cc".into(),
            interface: "en1".into(),
            is_gateway: false,
        }];
        let result = build_result(&entries);
        assert_eq!(result.entities[0].name, "10.0.0.7");
    }
}
