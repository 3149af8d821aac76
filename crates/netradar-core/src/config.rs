// ── Engine configuration ──
//
// Runtime tuning handed to the orchestrator. Built by the binary from
// the settings layer -- core never reads config files.

use std::time::Duration;

use crate::store::LifecycleThresholds;

/// Intervals, lifecycle thresholds, and capture sizing.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub neighbor_interval: Duration,
    pub socket_interval: Duration,
    pub bluetooth_interval: Duration,
    pub wifi_interval: Duration,
    pub route_interval: Duration,
    pub throughput_interval: Duration,
    pub tick_interval: Duration,
    pub thresholds: LifecycleThresholds,
    /// Packet event ring capacity.
    pub ring_capacity: usize,
    /// Interface preselected for capture (overridable per start call).
    pub capture_interface: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            neighbor_interval: Duration::from_secs(5),
            socket_interval: Duration::from_secs(3),
            bluetooth_interval: Duration::from_secs(8),
            wifi_interval: Duration::from_secs(10),
            route_interval: Duration::from_secs(30),
            throughput_interval: Duration::from_secs(3),
            tick_interval: Duration::from_secs(5),
            thresholds: LifecycleThresholds::default(),
            ring_capacity: 10_000,
            capture_interface: None,
        }
    }
}
