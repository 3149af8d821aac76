// ── mDNS / DNS-SD collector ──
//
// Event-driven. On start it registers browsers for a fixed set of common
// service types plus whatever the OS dynamic-discovery command reports in
// a 5s window (partial output from the killed command is valid input).
// Discovered services accumulate for the life of the session; `scan`
// returns the accumulated union without driving new work.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Collector, CollectorResult};
use crate::error::CoreError;
use crate::model::{Entity, MdnsDetail, Relation, RelationKind, SignalDetail, ids};

const DYNAMIC_BROWSE_WINDOW: Duration = Duration::from_secs(5);

/// Service types browsed unconditionally.
const COMMON_TYPES: [&str; 20] = [
    "_airplay._tcp",
    "_raop._tcp",
    "_homekit._tcp",
    "_hap._tcp",
    "_companion-link._tcp",
    "_googlecast._tcp",
    "_spotify-connect._tcp",
    "_sonos._tcp",
    "_hue._tcp",
    "_printer._tcp",
    "_ipp._tcp",
    "_ipps._tcp",
    "_pdl-datastream._tcp",
    "_http._tcp",
    "_https._tcp",
    "_ssh._tcp",
    "_sftp-ssh._tcp",
    "_smb._tcp",
    "_afpovertcp._tcp",
    "_device-info._tcp",
];

pub struct MdnsCollector {
    /// Accumulated (entity, relation) pairs, keyed by entity id.
    services: Mutex<IndexMap<String, (Entity, Relation)>>,
    daemon: Mutex<Option<ServiceDaemon>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Default for MdnsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MdnsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            services: Mutex::new(IndexMap::new()),
            daemon: Mutex::new(None),
            cancel: Mutex::new(None),
        }
    }

    /// Start browsing. Each resolved service is folded into the
    /// accumulated set and the full union is pushed through `on_update`.
    pub fn start(
        self: &std::sync::Arc<Self>,
        on_update: mpsc::Sender<CollectorResult>,
    ) -> Result<(), CoreError> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| CoreError::Internal(format!("mdns daemon: {e}")))?;
        let cancel = CancellationToken::new();

        for ty in COMMON_TYPES {
            self.spawn_browser(&daemon, ty, &on_update, &cancel);
        }

        // Dynamic types come from the OS browse command; its partial
        // output after the deadline kill is still parseable.
        {
            let collector = std::sync::Arc::clone(self);
            let daemon = daemon.clone();
            let on_update = on_update.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let stdout = match crate::exec::run_window(
                    "dns-sd",
                    &["-B", "_services._dns-sd._udp", "local."],
                    DYNAMIC_BROWSE_WINDOW,
                )
                .await
                {
                    Ok(out) => out,
                    Err(e) => {
                        debug!(error = %e, "dynamic service-type discovery unavailable");
                        return;
                    }
                };
                for ty in parse_dynamic_types(&stdout) {
                    if COMMON_TYPES.contains(&ty.as_str()) {
                        continue;
                    }
                    collector.spawn_browser(&daemon, &ty, &on_update, &cancel);
                }
            });
        }

        *self.daemon.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(daemon);
        *self.cancel.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(cancel);
        Ok(())
    }

    /// Stop browsing. Accumulated services are retained -- the lifecycle
    /// tick ages them out.
    pub fn stop(&self) {
        if let Some(cancel) = self
            .cancel
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            cancel.cancel();
        }
        if let Some(daemon) = self
            .daemon
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            if let Err(e) = daemon.shutdown() {
                debug!(error = %e, "mdns daemon shutdown");
            }
        }
    }

    fn spawn_browser(
        self: &std::sync::Arc<Self>,
        daemon: &ServiceDaemon,
        service_type: &str,
        on_update: &mpsc::Sender<CollectorResult>,
        cancel: &CancellationToken,
    ) {
        let full_type = if service_type.ends_with(".local.") {
            service_type.to_owned()
        } else {
            format!("{service_type}.local.")
        };

        // A browser that cannot be constructed for one type never aborts
        // the session; the type is simply skipped.
        let receiver = match daemon.browse(&full_type) {
            Ok(rx) => rx,
            Err(e) => {
                debug!(service_type = %full_type, error = %e, "mdns browse skipped");
                return;
            }
        };

        let collector = std::sync::Arc::clone(self);
        let on_update = on_update.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = receiver.recv_async() => {
                        match event {
                            Ok(ServiceEvent::ServiceResolved(info)) => {
                                collector.record(&info);
                                let snapshot = collector.snapshot();
                                if on_update.send(snapshot).await.is_err() {
                                    break;
                                }
                            }
                            Ok(_) => {}
                            Err(_) => break,
                        }
                    }
                }
            }
        });
    }

    fn record(&self, info: &ServiceInfo) {
        let (entity, relation) = entity_from_service(info);
        self.services
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(entity.id.clone(), (entity, relation));
    }

    fn snapshot(&self) -> CollectorResult {
        let services = self
            .services
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut result = CollectorResult::empty();
        for (entity, relation) in services.values() {
            result.entities.push(entity.clone());
            result.relations.push(relation.clone());
        }
        result
    }
}

#[async_trait]
impl Collector for MdnsCollector {
    fn name(&self) -> &'static str {
        "mdns"
    }

    async fn scan(&self) -> CollectorResult {
        self.snapshot()
    }
}

// ── Service → entity ────────────────────────────────────────────────

pub(crate) fn entity_from_service(info: &ServiceInfo) -> (Entity, Relation) {
    let service_type = info
        .get_type()
        .trim_end_matches(".local.")
        .trim_end_matches('.')
        .to_owned();

    let instance = instance_name(info.get_fullname(), info.get_type());
    let host = info.get_hostname().trim_end_matches('.').to_owned();
    let display = if instance.is_empty() {
        host.clone()
    } else {
        instance.clone()
    };

    let id = ids::mdns(&service_type, &display);
    let ip = info
        .get_addresses()
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| info.get_addresses().iter().next())
        .map(ToString::to_string);

    let mut entity = Entity::observation(
        id.clone(),
        display,
        SignalDetail::MdnsService(MdnsDetail {
            service_type,
            port: Some(info.get_port()),
            host: Some(host),
        }),
    );
    if let Some(ip) = ip {
        entity = entity.with_ip(ip);
    }

    let relation = Relation::link(id, ids::HOST, RelationKind::HostsService);
    (entity, relation)
}

fn instance_name(fullname: &str, service_type: &str) -> String {
    fullname
        .strip_suffix(service_type)
        .map_or(fullname, |prefix| prefix.trim_end_matches('.'))
        .to_owned()
}

/// Parse `dns-sd -B _services._dns-sd._udp local.` output. Each `Add`
/// row names a protocol column (`_tcp.local.` / `_udp.local.`) and an
/// instance column holding the discovered type's leading label.
pub(crate) fn parse_dynamic_types(stdout: &str) -> Vec<String> {
    let mut types = Vec::new();

    for line in stdout.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 || fields[1] != "Add" {
            continue;
        }
        let proto = fields[5];
        let label = fields[6];
        let proto = if proto.starts_with("_udp") {
            "_udp"
        } else if proto.starts_with("_tcp") {
            "_tcp"
        } else {
            continue;
        };
        if !label.starts_with('_') {
            continue;
        }
        let ty = format!("{label}.{proto}");
        if !types.contains(&ty) {
            types.push(ty);
        }
    }

    types
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn dynamic_type_listing_parses_partial_output() {
        let stdout = "\
Browsing for _services._dns-sd._udp.local.
DATE: ---Tue 11 Jun 2024---
14:07:36.329  ...STARTING...
Timestamp     A/R    Flags  if Domain               Service Type         Instance Name
14:07:36.331  Add        3   6 local.               _tcp.local.          _airplay
14:07:36.331  Add        3   6 local.               _tcp.local.          _hue
14:07:36.332  Add        2   6 local.               _udp.local.          _sleep-proxy
14:07:36.4";
        let types = parse_dynamic_types(stdout);
        assert_eq!(
            types,
            vec![
                "_airplay._tcp".to_owned(),
                "_hue._tcp".to_owned(),
                "_sleep-proxy._udp".to_owned()
            ]
        );
    }

    #[test]
    fn dynamic_types_deduplicate() {
        let stdout = "\
x  Add  3  6  local.  _tcp.local.  _hue
x  Add  3  6  local.  _tcp.local.  _hue";
        assert_eq!(parse_dynamic_types(stdout), vec!["_hue._tcp".to_owned()]);
    }

    #[test]
    fn service_becomes_bonjour_entity() {
        let info = ServiceInfo::new(
            "_hue._tcp.local.",
            "Hue Bridge",
            "hue-bridge.local.",
            "192.168.1.50",
            443,
            None::<HashMap<String, String>>,
        )
        .unwrap();

        let (entity, relation) = entity_from_service(&info);
        assert_eq!(entity.id, "bonjour-_hue._tcp-Hue-Bridge");
        assert_eq!(entity.name, "Hue Bridge");
        assert_eq!(entity.ip.as_deref(), Some("192.168.1.50"));

        let SignalDetail::MdnsService(detail) = &entity.detail else {
            panic!("expected mdns detail");
        };
        assert_eq!(detail.service_type, "_hue._tcp");
        assert_eq!(detail.port, Some(443));
        assert_eq!(detail.host.as_deref(), Some("hue-bridge.local"));

        assert_eq!(relation.kind, RelationKind::HostsService);
        assert_eq!(relation.target, ids::HOST);
    }

    #[test]
    fn twenty_common_types() {
        assert_eq!(COMMON_TYPES.len(), 20);
    }
}
