// ── Subnet descriptors ──
//
// Side-channel data produced by the routing collector. Containment is a
// pure function; grouping is driven entirely by the consumer.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    /// CIDR form, e.g. `192.168.1.0/24`.
    pub cidr: String,
    pub network: String,
    pub prefix_len: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    pub interface: String,
    /// This host's IPv4 on the subnet's interface.
    pub local_ip: String,
}

impl Subnet {
    /// Whether `ip` falls inside this subnet: `(ip & mask) == (network & mask)`.
    #[must_use]
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let Ok(network) = self.network.parse::<Ipv4Addr>() else {
            return false;
        };
        let mask = prefix_mask(self.prefix_len);
        (u32::from(ip) & mask) == (u32::from(network) & mask)
    }
}

/// Netmask for a prefix length; prefix 0 means match-all.
#[must_use]
pub(crate) fn prefix_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        !0u32 << (32 - u32::from(prefix.min(32)))
    }
}

/// First subnet in `subnets` containing `ip`, in discovery order.
#[must_use]
pub fn matching_subnet<'a>(ip: Ipv4Addr, subnets: &'a [Subnet]) -> Option<&'a Subnet> {
    subnets.iter().find(|s| s.contains(ip))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn subnet(cidr: &str, network: &str, prefix: u8) -> Subnet {
        Subnet {
            cidr: cidr.into(),
            network: network.into(),
            prefix_len: prefix,
            gateway: None,
            interface: "en0".into(),
            local_ip: "192.168.1.2".into(),
        }
    }

    #[test]
    fn contains_inside_and_outside() {
        let net = subnet("192.168.1.0/24", "192.168.1.0", 24);
        assert!(net.contains("192.168.1.42".parse().unwrap()));
        assert!(!net.contains("192.168.2.42".parse().unwrap()));
    }

    #[test]
    fn prefix_zero_matches_everything() {
        let net = subnet("0.0.0.0/0", "0.0.0.0", 0);
        assert!(net.contains("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn first_match_wins() {
        let subnets = vec![
            subnet("10.0.0.0/8", "10.0.0.0", 8),
            subnet("10.1.0.0/16", "10.1.0.0", 16),
        ];
        let found = matching_subnet("10.1.2.3".parse().unwrap(), &subnets).unwrap();
        assert_eq!(found.cidr, "10.0.0.0/8");
    }

    #[test]
    fn slash_16_boundary() {
        let net = subnet("172.16.0.0/16", "172.16.0.0", 16);
        assert!(net.contains("172.16.255.1".parse().unwrap()));
        assert!(!net.contains("172.17.0.1".parse().unwrap()));
    }
}
