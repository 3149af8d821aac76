// ── Host interface enumeration ──
//
// One place resolves the machine's own non-loopback IPv4 interfaces.
// The orchestrator seeds the Host entity from this, the routing collector
// correlates subnets against it, and the packet pipeline derives the
// host-IP exclusion set from it.

use std::net::IpAddr;

use sysinfo::Networks;

use crate::model::HostInterface;

/// Enumerate non-loopback IPv4 interfaces as (name, ip, mac), sorted by
/// interface name for a stable host seed.
#[must_use]
pub fn host_interfaces() -> Vec<HostInterface> {
    let networks = Networks::new_with_refreshed_list();
    let mut out = Vec::new();

    for (name, data) in &networks {
        if name.starts_with("lo") {
            continue;
        }
        let mac = data.mac_address();
        for ip_net in data.ip_networks() {
            let IpAddr::V4(v4) = ip_net.addr else {
                continue;
            };
            if v4.is_loopback() {
                continue;
            }
            out.push(HostInterface {
                name: name.clone(),
                ip: v4.to_string(),
                mac: mac.to_string(),
            });
        }
    }

    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

/// The machine's hostname, falling back to a fixed label.
#[must_use]
pub fn hostname() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_owned())
}

/// Interface names eligible for packet capture (the enumeration exposed
/// through `packet.status`).
#[must_use]
pub fn capture_interfaces() -> Vec<String> {
    let mut names: Vec<String> = host_interfaces().into_iter().map(|i| i.name).collect();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_is_never_empty() {
        assert!(!hostname().is_empty());
    }

    #[test]
    fn interfaces_exclude_loopback() {
        for iface in host_interfaces() {
            assert!(!iface.name.starts_with("lo"));
            assert_ne!(iface.ip, "127.0.0.1");
        }
    }
}
