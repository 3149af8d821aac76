// ── Socket endpoint collector ──
//
// Parses the field-coded socket listing (lsof -F), refines process names
// through a single ps lookup, and decorates remote hosts with cached
// reverse-DNS results. Lookups are fire-and-forget: a scan only ever
// reads the cache, fresh resolutions surface on the next scan.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use hickory_resolver::TokioAsyncResolver;
use tracing::{debug, warn};

use super::{Collector, CollectorResult};
use crate::exec;
use crate::model::{
    Entity, Relation, RelationKind, SignalDetail, SocketDetail, TransportProtocol, ids,
};

const LSOF_TIMEOUT: Duration = Duration::from_secs(10);
const PS_TIMEOUT: Duration = Duration::from_secs(5);

const WELL_KNOWN_PORTS: [(u16, &str); 16] = [
    (21, "ftp"),
    (22, "ssh"),
    (25, "smtp"),
    (53, "dns"),
    (80, "http"),
    (123, "ntp"),
    (143, "imap"),
    (443, "https"),
    (465, "smtps"),
    (587, "smtp"),
    (993, "imaps"),
    (995, "pop3s"),
    (1900, "ssdp"),
    (3306, "mysql"),
    (5223, "apns"),
    (5432, "postgres"),
];

pub struct SocketCollector {
    resolver: Option<TokioAsyncResolver>,
    /// remote host → resolved hostname (`None` caches a failed lookup).
    rdns_cache: Arc<DashMap<String, Option<String>>>,
    /// hosts with a lookup in flight.
    rdns_pending: Arc<DashMap<String, ()>>,
}

impl Default for SocketCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketCollector {
    #[must_use]
    pub fn new() -> Self {
        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(r) => Some(r),
            Err(e) => {
                debug!(error = %e, "reverse DNS unavailable");
                None
            }
        };
        Self {
            resolver,
            rdns_cache: Arc::new(DashMap::new()),
            rdns_pending: Arc::new(DashMap::new()),
        }
    }

    /// Kick off reverse lookups for hosts seen this scan that are not
    /// yet cached or pending. Never blocks the scan.
    fn spawn_lookups(&self, hosts: impl Iterator<Item = String>) {
        let Some(resolver) = &self.resolver else {
            return;
        };
        for host in hosts {
            if self.rdns_cache.contains_key(&host) || self.rdns_pending.contains_key(&host) {
                continue;
            }
            let Ok(ip) = host.parse::<IpAddr>() else {
                continue;
            };
            self.rdns_pending.insert(host.clone(), ());

            let resolver = resolver.clone();
            let cache = Arc::clone(&self.rdns_cache);
            let pending = Arc::clone(&self.rdns_pending);
            tokio::spawn(async move {
                let resolved = match resolver.reverse_lookup(ip).await {
                    Ok(lookup) => lookup
                        .iter()
                        .next()
                        .map(|name| name.to_string().trim_end_matches('.').to_owned()),
                    Err(_) => None,
                };
                cache.insert(host.clone(), resolved);
                pending.remove(&host);
            });
        }
    }
}

#[async_trait]
impl Collector for SocketCollector {
    fn name(&self) -> &'static str {
        "sockets"
    }

    async fn scan(&self) -> CollectorResult {
        let stdout = match exec::run_ok("lsof", &["-i", "-P", "-n", "-F", "cnPTs"], LSOF_TIMEOUT)
            .await
        {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "socket listing failed");
                return CollectorResult::empty();
            }
        };

        let mut connections = parse_lsof(&stdout);
        if connections.is_empty() {
            return CollectorResult::empty();
        }

        // One executable-name lookup for the whole PID set.
        let pids: Vec<u32> = {
            let mut set: Vec<u32> = connections.iter().map(|c| c.pid).collect();
            set.sort_unstable();
            set.dedup();
            set
        };
        let names = resolve_process_names(&pids).await;
        for conn in &mut connections {
            if let Some(resolved) = names.get(&conn.pid) {
                if resolved != &conn.process {
                    conn.process.clone_from(resolved);
                }
            }
        }

        self.spawn_lookups(connections.iter().map(|c| c.remote_host.clone()));

        build_result(connections, &self.rdns_cache)
    }
}

// ── lsof parsing ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawConnection {
    pub pid: u32,
    pub process: String,
    pub protocol: TransportProtocol,
    pub state: Option<String>,
    pub local_port: Option<u16>,
    pub remote_host: String,
    pub remote_port: u16,
}

/// Parse `lsof -i -P -n -F cnPTs` field-coded output.
///
/// `p` resets the per-process block, `c` names it, `P`/`T`/`n` describe
/// the current socket. Loopback, wildcard, and zero-port names are
/// skipped; unknown field prefixes are ignored.
pub(crate) fn parse_lsof(stdout: &str) -> Vec<RawConnection> {
    let mut connections = Vec::new();

    let mut pid: Option<u32> = None;
    let mut command = String::new();
    let mut protocol: Option<TransportProtocol> = None;
    let mut state: Option<String> = None;

    for line in stdout.lines() {
        let Some(prefix) = line.chars().next() else {
            continue;
        };
        let value = &line[1..];
        match prefix {
            'p' => {
                pid = value.parse().ok();
                command.clear();
                protocol = None;
                state = None;
            }
            'c' => {
                command = value.to_owned();
            }
            'P' => {
                protocol = match value {
                    "TCP" => Some(TransportProtocol::Tcp),
                    "UDP" => Some(TransportProtocol::Udp),
                    _ => None,
                };
                state = None;
            }
            'T' => {
                if let Some(st) = value.strip_prefix("ST=") {
                    state = Some(st.to_owned());
                }
            }
            'n' => {
                let (Some(pid), Some(protocol)) = (pid, protocol) else {
                    continue;
                };
                if command.is_empty() {
                    continue;
                }
                let Some(((_, local_port), (remote_host, remote_port))) = split_name(value) else {
                    continue;
                };
                connections.push(RawConnection {
                    pid,
                    process: command.clone(),
                    protocol,
                    state: state.clone(),
                    local_port,
                    remote_host,
                    remote_port,
                });
            }
            _ => {}
        }
    }

    connections
}

type Endpoint = (Option<String>, Option<u16>);

/// Split `local->remote` and extract (host, port) from each side.
/// Returns `None` for listening sockets, loopback, wildcard hosts, and
/// zero ports.
fn split_name(name: &str) -> Option<((Option<String>, Option<u16>), (String, u16))> {
    let (local, remote) = name.split_once("->")?;
    let (local_host, local_port) = split_host_port(local);
    let (remote_host, remote_port) = split_host_port(remote);

    let remote_host = remote_host?;
    let remote_port = remote_port?;
    if remote_port == 0 {
        return None;
    }
    if is_skipped_host(&remote_host) {
        return None;
    }
    let _ = local_host;

    Some(((None, local_port), (remote_host, remote_port)))
}

/// `192.168.1.2:54321` or `[fe80::1]:443`.
fn split_host_port(endpoint: &str) -> Endpoint {
    if let Some(rest) = endpoint.strip_prefix('[') {
        let Some((host, port)) = rest.split_once("]:") else {
            return (None, None);
        };
        return (Some(host.to_owned()), port.parse().ok());
    }
    let Some((host, port)) = endpoint.rsplit_once(':') else {
        return (None, None);
    };
    (Some(host.to_owned()), port.parse().ok())
}

fn is_skipped_host(host: &str) -> bool {
    host == "127.0.0.1" || host == "::1" || host == "localhost" || host == "*"
}

// ── Process name refinement ─────────────────────────────────────────

/// `ps -p <pids> -o pid=,comm=` → pid → display name.
async fn resolve_process_names(pids: &[u32]) -> HashMap<u32, String> {
    if pids.is_empty() {
        return HashMap::new();
    }
    let list = pids
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");

    match exec::run_ok("ps", &["-p", &list, "-o", "pid=,comm="], PS_TIMEOUT).await {
        Ok(stdout) => parse_ps(&stdout),
        Err(e) => {
            debug!(error = %e, "process name lookup failed");
            HashMap::new()
        }
    }
}

pub(crate) fn parse_ps(stdout: &str) -> HashMap<u32, String> {
    let mut names = HashMap::new();
    for line in stdout.lines() {
        let trimmed = line.trim_start();
        let Some((pid, path)) = trimmed.split_once(char::is_whitespace) else {
            continue;
        };
        let Ok(pid) = pid.parse::<u32>() else {
            continue;
        };
        names.insert(pid, executable_display_name(path.trim()));
    }
    names
}

/// `/Applications/Firefox.app/Contents/MacOS/firefox` → `Firefox`;
/// anything else → basename.
pub(crate) fn executable_display_name(path: &str) -> String {
    for segment in path.split('/') {
        if let Some(app) = segment.strip_suffix(".app") {
            return app.to_owned();
        }
    }
    path.rsplit('/').next().unwrap_or(path).to_owned()
}

// ── Display assembly ────────────────────────────────────────────────

/// Shorten a resolved hostname to its registrable domain: the last two
/// labels, or three when the second-to-last label is ≤3 chars (ccTLD
/// heuristic).
pub(crate) fn shorten_hostname(hostname: &str) -> String {
    let labels: Vec<&str> = hostname.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 {
        return labels.join(".");
    }
    let take = if labels[labels.len() - 2].len() <= 3 {
        3
    } else {
        2
    };
    labels[labels.len() - take.min(labels.len())..].join(".")
}

fn service_for_port(port: u16) -> Option<&'static str> {
    WELL_KNOWN_PORTS
        .iter()
        .find(|(p, _)| *p == port)
        .map(|(_, name)| *name)
}

fn build_result(
    connections: Vec<RawConnection>,
    rdns_cache: &DashMap<String, Option<String>>,
) -> CollectorResult {
    let mut result = CollectorResult::empty();
    let mut seen: HashSet<String> = HashSet::new();

    for conn in connections {
        let id = ids::socket(
            conn.protocol,
            &conn.remote_host,
            conn.remote_port,
            &conn.process,
        );
        if !seen.insert(id.clone()) {
            continue;
        }

        let resolved = rdns_cache
            .get(&conn.remote_host)
            .and_then(|entry| entry.value().clone());

        let name = match &resolved {
            Some(hostname) => {
                let short = shorten_hostname(hostname);
                match service_for_port(conn.remote_port) {
                    Some(service) => format!("{} → {short} ({service})", conn.process),
                    None => format!("{} → {short}:{}", conn.process, conn.remote_port),
                }
            }
            None => format!(
                "{} → {}:{}",
                conn.process, conn.remote_host, conn.remote_port
            ),
        };

        let service_name = service_for_port(conn.remote_port).map(ToOwned::to_owned);
        let entity = Entity::observation(
            id.clone(),
            name,
            SignalDetail::SocketEndpoint(SocketDetail {
                protocol: conn.protocol,
                local_port: conn.local_port,
                remote_port: conn.remote_port,
                remote_host: conn.remote_host.clone(),
                state: conn.state,
                process_name: conn.process,
                resolved_hostname: resolved,
                service_name,
            }),
        )
        .with_ip(conn.remote_host);

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

    const SAMPLE: &str = "\
p612
cfirefox
f33
PTCP
TST=ESTABLISHED
n192.168.1.2:54321->142.250.80.46:443
f34
PTCP
TST=ESTABLISHED
n192.168.1.2:54322->142.250.80.46:443
f40
PTCP
TST=LISTEN
n*:8080
p933
cSpotify
f12
PUDP
n192.168.1.2:5353->224.0.0.251:5353
f13
PTCP
TST=ESTABLISHED
n[2001:db8::2]:54000->[2606:4700::6810:84e5]:443
f14
PTCP
TST=ESTABLISHED
n127.0.0.1:9000->127.0.0.1:9001
";

    #[test]
    fn parses_blocks_and_skips_listen_and_loopback() {
        let conns = parse_lsof(SAMPLE);
        assert_eq!(conns.len(), 4);
        assert_eq!(conns[0].pid, 612);
        assert_eq!(conns[0].process, "firefox");
        assert_eq!(conns[0].remote_host, "142.250.80.46");
        assert_eq!(conns[0].remote_port, 443);
        assert_eq!(conns[0].state.as_deref(), Some("ESTABLISHED"));
        assert_eq!(conns[0].local_port, Some(54321));
    }

    #[test]
    fn bracketed_ipv6_parses() {
        let conns = parse_lsof(SAMPLE);
        let v6 = conns
            .iter()
            .find(|c| c.remote_host.starts_with("2606"))
            .unwrap();
        assert_eq!(v6.remote_host, "2606:4700::6810:84e5");
        assert_eq!(v6.remote_port, 443);
        assert_eq!(v6.process, "Spotify");
    }

    #[test]
    fn udp_has_no_state() {
        let conns = parse_lsof(SAMPLE);
        let udp = conns
            .iter()
            .find(|c| c.protocol == TransportProtocol::Udp)
            .unwrap();
        assert!(udp.state.is_none());
    }

    #[test]
    fn duplicate_ids_collapse_in_result() {
        let conns = parse_lsof(SAMPLE);
        let result = build_result(conns, &DashMap::new());
        // Two firefox rows to the same remote endpoint collapse.
        assert_eq!(result.entities.len(), 3);
    }

    #[test]
    fn id_follows_scheme() {
        let conns = parse_lsof(SAMPLE);
        let result = build_result(conns, &DashMap::new());
        assert_eq!(
            result.entities[0].id,
            "conn-TCP-142.250.80.46-443-firefox"
        );
    }

    #[test]
    fn ps_parse_and_app_bundle_names() {
        let stdout = "  612 /Applications/Firefox.app/Contents/MacOS/firefox\n  933 /usr/sbin/mDNSResponder\n";
        let names = parse_ps(stdout);
        assert_eq!(names.get(&612).map(String::as_str), Some("Firefox"));
        assert_eq!(names.get(&933).map(String::as_str), Some("mDNSResponder"));
    }

    #[test]
    fn hostname_shortening_cctld_heuristic() {
        assert_eq!(shorten_hostname("lhr25s33-in-f14.1e100.net"), "1e100.net");
        assert_eq!(shorten_hostname("edge.example.co.uk"), "example.co.uk");
        assert_eq!(shorten_hostname("example.com"), "example.com");
        assert_eq!(shorten_hostname("host"), "host");
    }

    #[test]
    fn resolved_hostname_formats_display_name() {
        let conns = parse_lsof(SAMPLE);
        let cache = DashMap::new();
        cache.insert(
            "142.250.80.46".to_owned(),
            Some("lga34s38-in-f14.1e100.net".to_owned()),
        );
        let result = build_result(conns, &cache);
        assert_eq!(result.entities[0].name, "firefox → 1e100.net (https)");

        let SignalDetail::SocketEndpoint(detail) = &result.entities[0].detail else {
            panic!("expected socket detail");
        };
        assert_eq!(
            detail.resolved_hostname.as_deref(),
            Some("lga34s38-in-f14.1e100.net")
        );
        assert_eq!(detail.service_name.as_deref(), Some("https"));
    }

    #[test]
    fn unresolved_host_keeps_ip_display() {
        let conns = vec![RawConnection {
            pid: 1,
            process: "curl".into(),
            protocol: TransportProtocol::Tcp,
            state: Some("ESTABLISHED".into()),
            local_port: Some(50000),
            remote_host: "93.184.216.34".into(),
            remote_port: 8443,
            }];
        let result = build_result(conns, &DashMap::new());
        assert_eq!(result.entities[0].name, "curl → 93.184.216.34:8443");
    }
}
