// ── Routing / topology collector ──
//
// Parses the kernel routing table into subnet descriptors. Subnets are a
// side channel (read via `latest()`), not entities -- the scan result is
// always empty.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tracing::warn;

use super::{Collector, CollectorResult};
use crate::exec;
use crate::ifaces;
use crate::model::{HostInterface, Subnet};

const ROUTE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RouteCollector {
    latest: ArcSwap<Vec<Subnet>>,
}

impl Default for RouteCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteCollector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            latest: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Most recent subnet list.
    #[must_use]
    pub fn latest(&self) -> Arc<Vec<Subnet>> {
        self.latest.load_full()
    }
}

#[async_trait]
impl Collector for RouteCollector {
    fn name(&self) -> &'static str {
        "routes"
    }

    async fn scan(&self) -> CollectorResult {
        let stdout = match exec::run_ok("netstat", &["-rn"], ROUTE_TIMEOUT).await {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "routing table read failed");
                return CollectorResult::empty();
            }
        };

        let interfaces = ifaces::host_interfaces();
        let subnets = parse_routes(&stdout, &interfaces);
        self.latest.store(Arc::new(subnets));

        CollectorResult::empty()
    }
}

// ── Parsing ─────────────────────────────────────────────────────────

/// Parse `netstat -rn`. Only IPv4 network routes survive: default,
/// loopback, link-local, multicast, broadcast, and host routes are
/// skipped. First occurrence of a CIDR wins.
pub(crate) fn parse_routes(stdout: &str, interfaces: &[HostInterface]) -> Vec<Subnet> {
    let mut subnets: Vec<Subnet> = Vec::new();
    let mut in_v4_section = false;

    for line in stdout.lines() {
        if line.starts_with("Internet:") {
            in_v4_section = true;
            continue;
        }
        if line.starts_with("Internet6:") {
            break;
        }
        if !in_v4_section || line.is_empty() || line.starts_with("Destination") {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let destination = fields[0];
        let gateway_field = fields[1];
        let netif = fields[3];

        let Some((network, prefix)) = parse_destination(destination) else {
            continue;
        };
        if prefix == 32 {
            continue;
        }
        if network.starts_with("169.254.")
            || network.starts_with("224.")
            || network.starts_with("255.")
            || network.starts_with("127.")
        {
            continue;
        }

        // link#N means directly attached.
        let gateway = if gateway_field.starts_with("link#") {
            None
        } else if gateway_field.parse::<std::net::Ipv4Addr>().is_ok() {
            Some(gateway_field.to_owned())
        } else {
            continue;
        };

        // The subnet only matters if this host has an address on its
        // interface.
        let Some(local_ip) = interfaces
            .iter()
            .find(|i| i.name == netif)
            .map(|i| i.ip.clone())
        else {
            continue;
        };

        let cidr = format!("{network}/{prefix}");
        if subnets.iter().any(|s| s.cidr == cidr) {
            continue;
        }

        subnets.push(Subnet {
            cidr,
            network,
            prefix_len: prefix,
            gateway,
            interface: netif.to_owned(),
            local_ip,
        });
    }

    subnets
}

/// Resolve a routing-table destination into (network address, prefix).
///
/// `default` and IPv6 destinations return `None`. Destinations without an
/// explicit prefix infer one from the octet count: three ⇒ /24, two ⇒
/// /16, one ⇒ /8.
fn parse_destination(destination: &str) -> Option<(String, u8)> {
    if destination == "default" || destination.contains(':') {
        return None;
    }

    let (addr_part, prefix) = match destination.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix.parse::<u8>().ok()?)),
        None => (destination, None),
    };

    let octets: Vec<&str> = addr_part.split('.').collect();
    if octets.is_empty() || octets.len() > 4 || octets.iter().any(|o| o.parse::<u8>().is_err()) {
        return None;
    }

    let prefix = prefix.unwrap_or_else(|| match octets.len() {
        4 => 32,
        3 => 24,
        2 => 16,
        _ => 8,
    });
    if prefix > 32 {
        return None;
    }

    let mut parts = octets;
    while parts.len() < 4 {
        parts.push("0");
    }

    Some((parts.join("."), prefix))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Routing tables

Internet:
Destination        Gateway            Flags           Netif Expire
default            192.168.1.1        UGScg             en0
127                127.0.0.1          UCS               lo0
127.0.0.1          127.0.0.1          UH                lo0
169.254            link#6             UCS               en0      !
192.168.1          link#6             UCS               en0      !
192.168.1.1/32     link#6             UCS               en0      !
192.168.1.42       aa:bb:cc:dd:ee:ff  UHLWIi            en0   1187
10.8               10.8.0.1           UGSc            utun3
224.0.0/4          link#6             UmCS              en0      !
255.255.255.255/32 link#6             UCS               en0      !

Internet6:
Destination        Gateway            Flags           Netif Expire
::1                ::1                UHL               lo0
";

    fn test_interfaces() -> Vec<HostInterface> {
        vec![
            HostInterface {
                name: "en0".into(),
                ip: "192.168.1.2".into(),
                mac: "f0:18:98:aa:bb:cc".into(),
            },
            HostInterface {
                name: "utun3".into(),
                ip: "10.8.0.2".into(),
                mac: "00:00:00:00:00:00".into(),
            },
        ]
    }

    #[test]
    fn keeps_only_network_routes() {
        let subnets = parse_routes(SAMPLE, &test_interfaces());
        let cidrs: Vec<_> = subnets.iter().map(|s| s.cidr.as_str()).collect();
        assert_eq!(cidrs, vec!["192.168.1.0/24", "10.8.0.0/16"]);
    }

    #[test]
    fn link_gateway_means_directly_attached() {
        let subnets = parse_routes(SAMPLE, &test_interfaces());
        assert_eq!(subnets[0].gateway, None);
        assert_eq!(subnets[1].gateway.as_deref(), Some("10.8.0.1"));
    }

    #[test]
    fn correlates_local_ip_by_interface() {
        let subnets = parse_routes(SAMPLE, &test_interfaces());
        assert_eq!(subnets[0].local_ip, "192.168.1.2");
        assert_eq!(subnets[1].local_ip, "10.8.0.2");
    }

    #[test]
    fn drops_routes_without_matching_interface() {
        let only_en0 = vec![HostInterface {
            name: "en0".into(),
            ip: "192.168.1.2".into(),
            mac: "f0:18:98:aa:bb:cc".into(),
        }];
        let subnets = parse_routes(SAMPLE, &only_en0);
        assert_eq!(subnets.len(), 1);
        assert_eq!(subnets[0].interface, "en0");
    }

    #[test]
    fn prefix_inference_by_octet_count() {
        assert_eq!(
            parse_destination("192.168.1"),
            Some(("192.168.1.0".to_owned(), 24))
        );
        assert_eq!(parse_destination("172.16"), Some(("172.16.0.0".to_owned(), 16)));
        assert_eq!(parse_destination("10"), Some(("10.0.0.0".to_owned(), 8)));
        assert_eq!(
            parse_destination("192.168.4/22"),
            Some(("192.168.4.0".to_owned(), 22))
        );
        assert_eq!(parse_destination("default"), None);
        assert_eq!(parse_destination("fe80::"), None);
    }

    #[test]
    fn duplicate_cidrs_first_win() {
        // Second 192.168.1 row carries a gateway; the first (direct)
        // row must win.
        let stdout = "\
Internet:
Destination        Gateway            Flags           Netif Expire
192.168.1          link#6             UCS               en0      !
192.168.1          10.0.0.9           UGSc              en0
";
        let subnets = parse_routes(stdout, &test_interfaces());
        assert_eq!(subnets.len(), 1);
        assert_eq!(subnets[0].gateway, None);
    }
}
