// ── Packet pipeline ──
//
// Subprocess-driven live capture feeding a correlation index, per-peer
// aggregates, a bounded event ring, and a rate-limited drain queue.
// Explicit state machine: idle → starting → capturing → stopping → idle,
// with error edges back to idle and `last_error` populated. Only one
// capture is active at a time.

mod parse;

use std::collections::{HashMap, HashSet, VecDeque};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::exec;
use crate::ifaces;
use crate::model::{Entity, SignalDetail, ids};
use parse::{PacketRecord, TSHARK_FIELDS, parse_line};

const DRAIN_INTERVAL: Duration = Duration::from_millis(100);
const DRAIN_BATCH: usize = 10;
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);
const STOP_WAIT: Duration = Duration::from_secs(5);
const EVENT_CHANNEL_CAPACITY: usize = 1024;
const TTL_SAMPLES_PER_IP: usize = 100;

const PERMISSION_REMEDIATION: &str = "Packet capture was denied access to the capture device. \
Grant your user read access to /dev/bpf* (e.g. install Wireshark's ChmodBPF helper) and retry.";
const TOOL_REMEDIATION: &str =
    "tshark was not found on PATH. Install Wireshark (brew install --cask wireshark) and retry.";

// ── Wire-facing types ───────────────────────────────────────────────

/// A single captured packet, attributed to an entity when the
/// correlation index resolves one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketEvent {
    pub id: String,
    pub timestamp: i64,
    pub node_id: Option<String>,
    pub src_ip: String,
    pub dst_ip: String,
    pub protocol: String,
    pub length: u64,
    pub info: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStatus {
    pub available: bool,
    pub has_permission: bool,
    pub capturing: bool,
    pub interface: Option<String>,
    pub interfaces: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated per-IP counters, read by the enrichment flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpAggregate {
    pub protocols: std::collections::BTreeMap<String, u64>,
    pub bytes: u64,
    pub packets: u64,
}

/// Signals the pipeline raises toward the orchestrator writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineSignal {
    /// Time to fold aggregates into the store (2s cadence).
    Flush,
    /// The pipeline stopped itself (permission failure).
    AutoStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Starting,
    Capturing,
    Stopping,
}

// ── Correlation index ───────────────────────────────────────────────

#[derive(Debug, Default)]
struct CorrelationIndex {
    ip_to_entity: HashMap<String, String>,
    host_ips: HashSet<String>,
}

impl CorrelationIndex {
    /// Rebuild from a store snapshot. LAN entities win over other
    /// variants for a shared IP; host IPs always map to the host id.
    fn rebuild(&mut self, entities: &[Entity]) {
        self.ip_to_entity.clear();
        self.host_ips.clear();

        for entity in entities {
            if matches!(
                entity.detail,
                SignalDetail::Host(_) | SignalDetail::LanNeighbor(_)
            ) {
                continue;
            }
            if let Some(ip) = &entity.ip {
                self.ip_to_entity.insert(ip.clone(), entity.id.clone());
            }
        }
        for entity in entities {
            if let SignalDetail::LanNeighbor(_) = entity.detail {
                if let Some(ip) = &entity.ip {
                    self.ip_to_entity.insert(ip.clone(), entity.id.clone());
                }
            }
        }
        for entity in entities {
            if let SignalDetail::Host(host) = &entity.detail {
                for iface in &host.interfaces {
                    self.ip_to_entity
                        .insert(iface.ip.clone(), ids::HOST.to_owned());
                    self.host_ips.insert(iface.ip.clone());
                }
                if let Some(ip) = &entity.ip {
                    self.ip_to_entity.insert(ip.clone(), ids::HOST.to_owned());
                    self.host_ips.insert(ip.clone());
                }
            }
        }
    }

    /// Prefer the non-host side, else any resolved side.
    fn resolve(&self, src: &str, dst: &str) -> Option<String> {
        let src_id = self.ip_to_entity.get(src);
        let dst_id = self.ip_to_entity.get(dst);
        let src_is_host = self.host_ips.contains(src);
        let dst_is_host = self.host_ips.contains(dst);

        match (src_id, dst_id) {
            (Some(id), _) if !src_is_host => Some(id.clone()),
            (_, Some(id)) if !dst_is_host => Some(id.clone()),
            (Some(id), _) => Some(id.clone()),
            (_, Some(id)) => Some(id.clone()),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Default)]
struct Aggregates {
    by_ip: HashMap<String, IpAggregate>,
    ttl_by_ip: HashMap<String, Vec<u8>>,
}

// ── Pipeline ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PacketPipeline {
    inner: Arc<Inner>,
}

struct Inner {
    ring_capacity: usize,
    state: watch::Sender<CaptureState>,
    interface: Mutex<Option<String>>,
    last_error: Mutex<Option<String>>,
    has_permission: AtomicBool,
    tool_available: OnceLock<bool>,
    seq: AtomicU64,
    ring: Mutex<VecDeque<PacketEvent>>,
    pending: Mutex<VecDeque<PacketEvent>>,
    aggregates: Mutex<Aggregates>,
    index: Mutex<CorrelationIndex>,
    event_tx: broadcast::Sender<PacketEvent>,
    signal_tx: mpsc::Sender<PipelineSignal>,
    cancel: Mutex<Option<CancellationToken>>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PacketPipeline {
    #[must_use]
    pub fn new(ring_capacity: usize, signal_tx: mpsc::Sender<PipelineSignal>) -> Self {
        let (state, _) = watch::channel(CaptureState::Idle);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                ring_capacity,
                state,
                interface: Mutex::new(None),
                last_error: Mutex::new(None),
                has_permission: AtomicBool::new(true),
                tool_available: OnceLock::new(),
                seq: AtomicU64::new(0),
                ring: Mutex::new(VecDeque::new()),
                pending: Mutex::new(VecDeque::new()),
                aggregates: Mutex::new(Aggregates::default()),
                index: Mutex::new(CorrelationIndex::default()),
                event_tx,
                signal_tx,
                cancel: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> CaptureState {
        *self.inner.state.borrow()
    }

    /// Subscribe to the drained packet event stream (≤100 events/s).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PacketEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Snapshot copy of the event ring, oldest first.
    #[must_use]
    pub fn events_snapshot(&self) -> Vec<PacketEvent> {
        lock(&self.inner.ring).iter().cloned().collect()
    }

    /// Refresh the IP → entity correlation index from a store snapshot.
    pub fn rebuild_index(&self, entities: &[Entity]) {
        lock(&self.inner.index).rebuild(entities);
    }

    /// Clone of the per-IP aggregates (cumulative for the capture's
    /// lifetime).
    #[must_use]
    pub fn aggregates_by_ip(&self) -> HashMap<String, IpAggregate> {
        lock(&self.inner.aggregates).by_ip.clone()
    }

    /// Drain accumulated TTL samples for the OS fingerprinter.
    #[must_use]
    pub fn take_ttl_samples(&self) -> HashMap<String, Vec<u8>> {
        std::mem::take(&mut lock(&self.inner.aggregates).ttl_by_ip)
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner.last_error).clone()
    }

    /// Resolve tool availability and device permission.
    pub async fn status(&self) -> CaptureStatus {
        let available = self.tool_available().await;
        let device_readable = capture_device_readable().await;
        CaptureStatus {
            available,
            has_permission: device_readable && self.inner.has_permission.load(Ordering::Relaxed),
            capturing: self.state() == CaptureState::Capturing,
            interface: lock(&self.inner.interface).clone(),
            interfaces: ifaces::capture_interfaces(),
            error: self.last_error(),
        }
    }

    /// Start capturing. A capture already in flight is cleanly stopped
    /// first.
    pub async fn start(&self, requested_interface: Option<&str>) -> Result<(), CoreError> {
        if matches!(
            self.state(),
            CaptureState::Capturing | CaptureState::Starting
        ) {
            self.stop().await;
        }

        if !self.tool_available().await {
            *lock(&self.inner.last_error) = Some(TOOL_REMEDIATION.to_owned());
            return Err(CoreError::CaptureToolMissing {
                guidance: TOOL_REMEDIATION.to_owned(),
            });
        }

        let Some(interface) = resolve_interface(requested_interface).await else {
            *lock(&self.inner.last_error) = Some("no capture interface available".to_owned());
            return Err(CoreError::NoCaptureInterface);
        };

        let _ = self.inner.state.send(CaptureState::Starting);
        *lock(&self.inner.interface) = Some(interface.clone());
        *lock(&self.inner.last_error) = None;

        let mut args: Vec<String> = vec![
            "-i".into(),
            interface.clone(),
            "-l".into(),
            "-n".into(),
            "-T".into(),
            "fields".into(),
            "-E".into(),
            "separator=|".into(),
            "-E".into(),
            "occurrence=f".into(),
        ];
        for field in TSHARK_FIELDS {
            args.push("-e".into());
            args.push(field.into());
        }

        let mut child = match Command::new("tshark")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let reason = format!("capture spawn failed: {e}");
                *lock(&self.inner.last_error) = Some(reason.clone());
                let _ = self.inner.state.send(CaptureState::Idle);
                return Err(CoreError::CommandFailed {
                    command: "tshark".into(),
                    reason,
                });
            }
        };

        let cancel = CancellationToken::new();
        *lock(&self.inner.cancel) = Some(cancel.clone());

        // stderr discipline
        if let Some(stderr) = child.stderr.take() {
            let inner = Arc::clone(&self.inner);
            let stderr_cancel = cancel.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    handle_stderr_line(&inner, &stderr_cancel, &line);
                }
            });
        }

        // stdout: the capture loop proper
        let stdout = child.stdout.take();
        {
            let inner = Arc::clone(&self.inner);
            let capture_cancel = cancel.clone();
            tokio::spawn(async move {
                if let Some(stdout) = stdout {
                    let mut lines = BufReader::new(stdout).lines();
                    loop {
                        tokio::select! {
                            biased;
                            () = capture_cancel.cancelled() => break,
                            next = lines.next_line() => {
                                match next {
                                    Ok(Some(line)) => {
                                        if let Some(record) = parse_line(&line) {
                                            ingest(&inner, record);
                                        }
                                    }
                                    Ok(None) | Err(_) => break,
                                }
                            }
                        }
                    }
                }
                exec::terminate(&mut child).await;
                *lock(&inner.cancel) = None;
                let _ = inner.state.send(CaptureState::Idle);
            });
        }

        // drain timer: ≤10 events per 100ms tick
        {
            let inner = Arc::clone(&self.inner);
            let drain_cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(DRAIN_INTERVAL);
                loop {
                    tokio::select! {
                        biased;
                        () = drain_cancel.cancelled() => break,
                        _ = ticker.tick() => drain(&inner),
                    }
                }
            });
        }

        // enrichment flush timer
        {
            let inner = Arc::clone(&self.inner);
            let flush_cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
                loop {
                    tokio::select! {
                        biased;
                        () = flush_cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if inner.signal_tx.send(PipelineSignal::Flush).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        let _ = self.inner.state.send(CaptureState::Capturing);
        debug!(interface, "capture started");
        Ok(())
    }

    /// Stop the capture: cancel, terminate (TERM → 2s → KILL), await
    /// idle.
    pub async fn stop(&self) {
        let token = lock(&self.inner.cancel).clone();
        let Some(token) = token else {
            let _ = self.inner.state.send(CaptureState::Idle);
            return;
        };

        let _ = self.inner.state.send(CaptureState::Stopping);
        token.cancel();

        let mut state_rx = self.inner.state.subscribe();
        let wait = async {
            loop {
                if *state_rx.borrow_and_update() == CaptureState::Idle {
                    break;
                }
                if state_rx.changed().await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(STOP_WAIT, wait).await.is_err() {
            warn!("capture did not reach idle in time");
            let _ = self.inner.state.send(CaptureState::Idle);
        }
    }

    async fn tool_available(&self) -> bool {
        if let Some(cached) = self.inner.tool_available.get() {
            return *cached;
        }
        let available = exec::run("which", &["tshark"], Duration::from_secs(5))
            .await
            .is_ok_and(|out| out.success());
        let _ = self.inner.tool_available.set(available);
        available
    }
}

// ── Per-packet work ─────────────────────────────────────────────────

fn ingest(inner: &Inner, record: PacketRecord) {
    let node_id = lock(&inner.index).resolve(&record.src_ip, &record.dst_ip);

    let seq = inner.seq.fetch_add(1, Ordering::Relaxed);
    let event = PacketEvent {
        id: format!("pkt-{seq}"),
        timestamp: record.timestamp_ms,
        node_id,
        src_ip: record.src_ip.clone(),
        dst_ip: record.dst_ip.clone(),
        protocol: record.protocol.clone(),
        length: record.length,
        info: record.info,
    };

    {
        let mut ring = lock(&inner.ring);
        if ring.len() == inner.ring_capacity {
            ring.pop_front();
        }
        ring.push_back(event.clone());
    }
    {
        // The pending queue is bounded by the same capacity as the ring:
        // with no consumer it cannot grow past it.
        let mut pending = lock(&inner.pending);
        if pending.len() == inner.ring_capacity {
            pending.pop_front();
        }
        pending.push_back(event);
    }

    let host_ips: Vec<bool> = {
        let index = lock(&inner.index);
        vec![
            index.host_ips.contains(&record.src_ip),
            index.host_ips.contains(&record.dst_ip),
        ]
    };

    let mut aggregates = lock(&inner.aggregates);
    for (ip, is_host) in [
        (&record.src_ip, host_ips[0]),
        (&record.dst_ip, host_ips[1]),
    ] {
        if is_host {
            continue;
        }
        let entry = aggregates.by_ip.entry(ip.clone()).or_default();
        *entry.protocols.entry(record.protocol.clone()).or_insert(0) += 1;
        entry.bytes += record.length;
        entry.packets += 1;
    }

    // TTL belongs to the sender.
    if let Some(ttl) = record.ttl {
        if !host_ips[0] {
            let samples = aggregates.ttl_by_ip.entry(record.src_ip).or_default();
            if samples.len() < TTL_SAMPLES_PER_IP {
                samples.push(ttl);
            }
        }
    }
}

fn drain(inner: &Inner) {
    if inner.event_tx.receiver_count() == 0 {
        return;
    }
    let batch: Vec<PacketEvent> = {
        let mut pending = lock(&inner.pending);
        let take = pending.len().min(DRAIN_BATCH);
        pending.drain(..take).collect()
    };
    for event in batch {
        let _ = inner.event_tx.send(event);
    }
}

fn handle_stderr_line(inner: &Inner, cancel: &CancellationToken, line: &str) {
    let lowered = line.to_lowercase();
    if lowered.contains("permission denied") || lowered.contains("don't have permission") {
        inner.has_permission.store(false, Ordering::Relaxed);
        *lock(&inner.last_error) = Some(PERMISSION_REMEDIATION.to_owned());
        let _ = inner.signal_tx.try_send(PipelineSignal::AutoStopped);
        cancel.cancel();
        return;
    }
    if line.starts_with("Capturing on") || line.contains("packets captured") {
        return;
    }
    if !line.trim().is_empty() {
        warn!(line, "capture stderr");
    }
}

// ── Interface selection ─────────────────────────────────────────────

async fn resolve_interface(requested: Option<&str>) -> Option<String> {
    let known = ifaces::capture_interfaces();
    if let Some(requested) = requested {
        if known.iter().any(|name| name == requested) {
            return Some(requested.to_owned());
        }
    }
    if let Some(default) = default_route_interface().await {
        return Some(default);
    }
    known
        .iter()
        .find(|name| name.starts_with("en"))
        .cloned()
        .or_else(|| known.first().cloned())
}

async fn default_route_interface() -> Option<String> {
    let stdout = exec::run_ok("route", &["get", "default"], Duration::from_secs(5))
        .await
        .ok()?;
    parse_default_route(&stdout)
}

pub(crate) fn parse_default_route(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        line.trim()
            .strip_prefix("interface:")
            .map(|rest| rest.trim().to_owned())
    })
}

async fn capture_device_readable() -> bool {
    match tokio::fs::File::open("/dev/bpf0").await {
        Ok(_) => true,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => false,
        // Device missing (non-BSD kernels): defer to runtime stderr
        // detection.
        Err(_) => true,
    }
}
