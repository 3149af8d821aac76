//! netradar-core: the discovery engine.
//!
//! Continuously discovers and characterizes every observable network
//! entity around the host -- the host itself, Wi-Fi access points, LAN
//! neighbors, Bluetooth peers, mDNS service advertisements, socket
//! endpoints, and (on request) a live packet feed -- and publishes a
//! consistent, incrementally-updated view of that environment.

pub mod capture;
pub mod collect;
pub mod config;
pub mod enrich;
pub mod error;
mod exec;
pub mod ifaces;
pub mod model;
pub mod orchestrator;
pub mod probe;
pub mod publish;
pub mod store;
pub mod vendor;

pub use capture::{CaptureStatus, PacketEvent};
pub use config::EngineConfig;
pub use error::CoreError;
pub use model::{Entity, LifecycleStatus, Relation, RelationKind, SignalDetail, Subnet};
pub use orchestrator::Orchestrator;
pub use probe::ProbeReport;
pub use publish::{Publication, Snapshot};
pub use store::{EntityStore, LifecycleThresholds};

/// Trim an error reason to a single concise line of at most ~200 chars.
pub(crate) fn truncate_reason(reason: &str) -> String {
    let line = reason.lines().next().unwrap_or_default();
    line.chars().take(200).collect()
}
