// ── Orchestrator ──
//
// Single writer over the store. Collectors run on independent timers and
// do their subprocess work off the writer; their results, lifecycle
// ticks, capture flushes, and control requests all funnel through one
// mpsc into the writer task, so no two store mutations ever race.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::{CaptureStatus, PacketEvent, PacketPipeline, PipelineSignal};
use crate::collect::{
    BluetoothCollector, Collector, CollectorResult, MdnsCollector, NeighborCollector,
    RouteCollector, SocketCollector, ThroughputCollector, WifiCollector,
};
use crate::config::EngineConfig;
use crate::enrich::{Classifier, OsFingerprinter};
use crate::error::CoreError;
use crate::ifaces;
use crate::model::{
    Entity, EntityPatch, HostDetail, SignalDetail, ids, now_millis,
};
use crate::probe::{self, ProbeHit, ProbeReport};
use crate::publish::{Publication, Snapshot};
use crate::store::EntityStore;

const WRITER_CHANNEL_SIZE: usize = 256;
const PUBLICATION_CHANNEL_SIZE: usize = 64;
const MDNS_UPDATE_CHANNEL_SIZE: usize = 32;

// ── Writer messages ─────────────────────────────────────────────────

enum WriterMsg {
    Scan {
        collector: &'static str,
        result: CollectorResult,
    },
    Tick,
    FlushCapture,
    TransportReady,
    InitialScanDone,
    GetFullState(oneshot::Sender<Snapshot>),
    RecordProbe {
        ip: String,
        hit: ProbeHit,
    },
}

// ── Orchestrator handle ─────────────────────────────────────────────

/// The engine's entry point. Cheaply cloneable.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    config: EngineConfig,
    writer_tx: mpsc::Sender<WriterMsg>,
    publications: broadcast::Sender<Publication>,
    pipeline: PacketPipeline,
    mdns: Arc<MdnsCollector>,
    routes: Arc<RouteCollector>,
    collectors: Vec<(&'static str, Arc<dyn Collector>)>,
    paused: watch::Sender<bool>,
    cancel: CancellationToken,
    probe_available: tokio::sync::OnceCell<bool>,
    task_handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build the engine and start everything: seed the Host, start mDNS,
    /// schedule the polled collectors and the lifecycle tick, and run
    /// the initial parallel scan. Resolves once that scan has been
    /// applied.
    pub async fn start(config: EngineConfig) -> Result<Self, CoreError> {
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_CHANNEL_SIZE);
        let (publications, _) = broadcast::channel(PUBLICATION_CHANNEL_SIZE);
        let (paused, _) = watch::channel(false);
        let cancel = CancellationToken::new();

        let (pipeline_signal_tx, mut pipeline_signal_rx) = mpsc::channel(16);
        let pipeline = PacketPipeline::new(config.ring_capacity, pipeline_signal_tx);

        let mdns = Arc::new(MdnsCollector::new());
        let routes = Arc::new(RouteCollector::new());
        let throughput = Arc::new(ThroughputCollector::new());

        let collectors: Vec<(&'static str, Arc<dyn Collector>)> = vec![
            ("neighbors", Arc::new(NeighborCollector) as Arc<dyn Collector>),
            ("sockets", Arc::new(SocketCollector::new()) as Arc<dyn Collector>),
            ("bluetooth", Arc::new(BluetoothCollector) as Arc<dyn Collector>),
            ("wifi", Arc::new(WifiCollector) as Arc<dyn Collector>),
            ("routes", Arc::clone(&routes) as Arc<dyn Collector>),
            ("throughput", Arc::clone(&throughput) as Arc<dyn Collector>),
        ];

        let inner = Arc::new(OrchestratorInner {
            config,
            writer_tx: writer_tx.clone(),
            publications: publications.clone(),
            pipeline: pipeline.clone(),
            mdns: Arc::clone(&mdns),
            routes: Arc::clone(&routes),
            collectors,
            paused,
            cancel: cancel.clone(),
            probe_available: tokio::sync::OnceCell::new(),
            task_handles: std::sync::Mutex::new(Vec::new()),
        });
        let orchestrator = Self { inner };

        // Writer task: owns the store and all enrichment state.
        let mut writer = Writer::new(
            orchestrator.inner.config.clone(),
            publications,
            pipeline.clone(),
            Arc::clone(&routes),
            Arc::clone(&throughput),
        );
        writer.seed_host();
        {
            let cancel = cancel.clone();
            orchestrator.push_handle(tokio::spawn(async move {
                writer.run(writer_rx, cancel).await;
            }));
        }

        // mDNS event loop: accumulated unions marshal into the writer.
        {
            let (mdns_tx, mut mdns_rx) = mpsc::channel(MDNS_UPDATE_CHANNEL_SIZE);
            if let Err(e) = mdns.start(mdns_tx) {
                warn!(error = %e, "mdns collector failed to start");
            }
            let tx = writer_tx.clone();
            let cancel_mdns = cancel.clone();
            orchestrator.push_handle(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        () = cancel_mdns.cancelled() => break,
                        update = mdns_rx.recv() => {
                            let Some(result) = update else { break };
                            if tx
                                .send(WriterMsg::Scan { collector: "mdns", result })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                }
            }));
        }

        // Pipeline signal bridge.
        {
            let tx = writer_tx.clone();
            let cancel_sig = cancel.clone();
            orchestrator.push_handle(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        () = cancel_sig.cancelled() => break,
                        signal = pipeline_signal_rx.recv() => {
                            match signal {
                                Some(PipelineSignal::Flush) => {
                                    if tx.send(WriterMsg::FlushCapture).await.is_err() {
                                        break;
                                    }
                                }
                                Some(PipelineSignal::AutoStopped) => {
                                    info!("packet capture stopped itself");
                                }
                                None => break,
                            }
                        }
                    }
                }
            }));
        }

        // Polled collector schedules.
        let scheduled: Vec<(&'static str, Arc<dyn Collector>)> = orchestrator
            .inner
            .collectors
            .iter()
            .map(|(name, collector)| (*name, Arc::clone(collector)))
            .collect();
        for (name, collector) in scheduled {
            orchestrator.schedule_collector(name, collector);
        }

        // Lifecycle tick (runs through pause).
        {
            let tx = writer_tx.clone();
            let cancel_tick = cancel.clone();
            let period = orchestrator.inner.config.tick_interval;
            orchestrator.push_handle(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        biased;
                        () = cancel_tick.cancelled() => break,
                        _ = ticker.tick() => {
                            if tx.send(WriterMsg::Tick).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }));
        }

        // Initial parallel scan.
        let initial: Vec<(&'static str, Arc<dyn Collector>)> = orchestrator
            .inner
            .collectors
            .iter()
            .map(|(name, collector)| (*name, Arc::clone(collector)))
            .collect();
        let scans = initial.into_iter().map(|(name, collector)| {
            let tx = writer_tx.clone();
            async move {
                let result = collector.scan().await;
                let _ = tx.send(WriterMsg::Scan { collector: name, result }).await;
            }
        });
        futures_util::future::join_all(scans).await;
        let _ = writer_tx.send(WriterMsg::InitialScanDone).await;

        info!("discovery engine ready");
        Ok(orchestrator)
    }

    fn push_handle(&self, handle: JoinHandle<()>) {
        self.inner
            .task_handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(handle);
    }

    fn schedule_collector(&self, name: &'static str, collector: Arc<dyn Collector>) {
        let period = match name {
            "neighbors" => self.inner.config.neighbor_interval,
            "sockets" => self.inner.config.socket_interval,
            "bluetooth" => self.inner.config.bluetooth_interval,
            "wifi" => self.inner.config.wifi_interval,
            "routes" => self.inner.config.route_interval,
            "throughput" => self.inner.config.throughput_interval,
            _ => Duration::from_secs(30),
        };

        let tx = self.inner.writer_tx.clone();
        let cancel = self.inner.cancel.clone();
        let paused = self.inner.paused.subscribe();
        self.push_handle(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; the initial scan already
            // covered it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if *paused.borrow() {
                            continue;
                        }
                        let result = collector.scan().await;
                        if tx.send(WriterMsg::Scan { collector: name, result }).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Subscribe to outbound publications.
    #[must_use]
    pub fn publications(&self) -> broadcast::Receiver<Publication> {
        self.inner.publications.subscribe()
    }

    /// Subscribe to drained packet events.
    #[must_use]
    pub fn packet_events(&self) -> broadcast::Receiver<PacketEvent> {
        self.inner.pipeline.subscribe()
    }

    /// Current subnet list (side channel).
    #[must_use]
    pub fn subnets(&self) -> Arc<Vec<crate::model::Subnet>> {
        self.inner.routes.latest()
    }

    // ── Control surface ──────────────────────────────────────────────

    /// Suppress dispatch of polled collectors. The mDNS event loop and
    /// the packet pipeline keep running.
    pub fn pause(&self) {
        let _ = self.inner.paused.send(true);
        debug!("polled collectors paused");
    }

    pub fn resume(&self) {
        let _ = self.inner.paused.send(false);
        debug!("polled collectors resumed");
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow()
    }

    /// Run one collector (or all) immediately, regardless of pause.
    pub fn scan_now(&self, name: Option<&str>) {
        // mDNS is event-driven; a forced scan replays its accumulated
        // snapshot.
        if name.is_none() || name == Some("mdns") {
            let mdns = Arc::clone(&self.inner.mdns);
            let tx = self.inner.writer_tx.clone();
            tokio::spawn(async move {
                let result = Collector::scan(mdns.as_ref()).await;
                let _ = tx
                    .send(WriterMsg::Scan {
                        collector: "mdns",
                        result,
                    })
                    .await;
            });
        }

        for (collector_name, collector) in &self.inner.collectors {
            if name.is_some_and(|n| n != *collector_name) {
                continue;
            }
            let collector = Arc::clone(collector);
            let collector_name = *collector_name;
            let tx = self.inner.writer_tx.clone();
            tokio::spawn(async move {
                let result = collector.scan().await;
                let _ = tx
                    .send(WriterMsg::Scan {
                        collector: collector_name,
                        result,
                    })
                    .await;
            });
        }
    }

    /// Signal that the downstream transport can accept publications.
    /// One half of the initial-readiness gate.
    pub async fn transport_ready(&self) {
        let _ = self.inner.writer_tx.send(WriterMsg::TransportReady).await;
    }

    /// Current full snapshot. Parks until the readiness gate opens.
    pub async fn full_state(&self) -> Result<Snapshot, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .writer_tx
            .send(WriterMsg::GetFullState(tx))
            .await
            .map_err(|_| CoreError::ShuttingDown)?;
        rx.await.map_err(|_| CoreError::ShuttingDown)
    }

    // ── Packet pipeline ──────────────────────────────────────────────

    pub async fn packet_start(&self, interface: Option<&str>) -> Result<(), CoreError> {
        // Prime the correlation index from the current store before any
        // packet arrives.
        if let Ok(snapshot) = self.full_state_if_ready().await {
            self.inner.pipeline.rebuild_index(&snapshot.entities);
        }
        let requested = interface.or(self.inner.config.capture_interface.as_deref());
        self.inner.pipeline.start(requested).await
    }

    pub async fn packet_stop(&self) {
        self.inner.pipeline.stop().await;
    }

    pub async fn packet_status(&self) -> CaptureStatus {
        self.inner.pipeline.status().await
    }

    #[must_use]
    pub fn packet_events_snapshot(&self) -> Vec<PacketEvent> {
        self.inner.pipeline.events_snapshot()
    }

    /// Like `full_state` but does not park: used internally where a
    /// stale miss is preferable to waiting out the readiness gate.
    async fn full_state_if_ready(&self) -> Result<Snapshot, CoreError> {
        match tokio::time::timeout(Duration::from_millis(500), self.full_state()).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::ShuttingDown),
        }
    }

    // ── Active probe ─────────────────────────────────────────────────

    pub async fn probe_available(&self) -> bool {
        *self
            .inner
            .probe_available
            .get_or_init(probe::available)
            .await
    }

    /// One-shot OS probe. Success feeds the fingerprinter; failure never
    /// patches the store.
    pub async fn probe_os(&self, ip: &str) -> ProbeReport {
        if !self.probe_available().await {
            return ProbeReport::failure(ip, "nmap is not installed".to_owned());
        }
        match probe::detect_os(ip).await {
            Ok(hit) => {
                let _ = self
                    .inner
                    .writer_tx
                    .send(WriterMsg::RecordProbe {
                        ip: ip.to_owned(),
                        hit: hit.clone(),
                    })
                    .await;
                ProbeReport {
                    success: true,
                    ip: ip.to_owned(),
                    os_family: hit.family,
                    os_version: hit.version,
                    confidence: Some(hit.confidence),
                    error: None,
                }
            }
            Err(e) => ProbeReport::failure(ip, e.to_string()),
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Cancel all timers, stop the mDNS session and the packet pipeline,
    /// and cease publishing.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.mdns.stop();
        self.inner.pipeline.stop().await;

        let handles: Vec<JoinHandle<()>> = self
            .inner
            .task_handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
        debug!("engine shut down");
    }
}

// ── Writer ──────────────────────────────────────────────────────────

struct Writer {
    config: EngineConfig,
    store: EntityStore,
    classifier: Classifier,
    fingerprinter: OsFingerprinter,
    publications: broadcast::Sender<Publication>,
    pipeline: PacketPipeline,
    routes: Arc<RouteCollector>,
    throughput: Arc<ThroughputCollector>,
    transport_ready: bool,
    initial_scan_done: bool,
    gate_open: bool,
    parked_full_state: Vec<oneshot::Sender<Snapshot>>,
}

impl Writer {
    fn new(
        config: EngineConfig,
        publications: broadcast::Sender<Publication>,
        pipeline: PacketPipeline,
        routes: Arc<RouteCollector>,
        throughput: Arc<ThroughputCollector>,
    ) -> Self {
        Self {
            config,
            store: EntityStore::new(),
            classifier: Classifier::new(),
            fingerprinter: OsFingerprinter::new(),
            publications,
            pipeline,
            routes,
            throughput,
            transport_ready: false,
            initial_scan_done: false,
            gate_open: false,
            parked_full_state: Vec::new(),
        }
    }

    /// Seed the single Host entity from the OS interface enumeration.
    fn seed_host(&mut self) {
        let interfaces = ifaces::host_interfaces();
        if interfaces.is_empty() {
            warn!("no non-loopback IPv4 interface found; host entity has no address");
        }
        let hostname = ifaces::hostname();

        let mut host = Entity::observation(
            ids::HOST,
            hostname.clone(),
            SignalDetail::Host(HostDetail {
                hostname,
                interfaces: interfaces.clone(),
            }),
        );
        if let Some(first) = interfaces.first() {
            host = host.with_ip(&first.ip).with_mac(&first.mac);
        }
        self.store.upsert(host, now_millis());
    }

    async fn run(&mut self, mut rx: mpsc::Receiver<WriterMsg>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    self.handle(msg);
                }
            }
        }
    }

    fn handle(&mut self, msg: WriterMsg) {
        match msg {
            WriterMsg::Scan { collector, result } => self.apply_scan(collector, result),
            WriterMsg::Tick => self.tick(),
            WriterMsg::FlushCapture => self.flush_capture(),
            WriterMsg::TransportReady => {
                self.transport_ready = true;
                self.maybe_open_gate();
            }
            WriterMsg::InitialScanDone => {
                self.initial_scan_done = true;
                self.maybe_open_gate();
            }
            WriterMsg::GetFullState(reply) => {
                if self.gate_open {
                    let _ = reply.send(self.snapshot());
                } else {
                    self.parked_full_state.push(reply);
                }
            }
            WriterMsg::RecordProbe { ip, hit } => {
                self.fingerprinter.record_probe(&ip, hit);
                self.run_fingerprinter();
                self.publish_update(Vec::new());
            }
        }
    }

    /// Per-scan post-processing, in the fixed order: apply, classify
    /// (lan/mdns), index refresh (lan), topology (routes), OS pass,
    /// publish.
    fn apply_scan(&mut self, collector: &'static str, result: CollectorResult) {
        let now = now_millis();
        for entity in result.entities {
            self.store.upsert(entity, now);
        }
        for relation in result.relations {
            self.store.upsert_relation(relation);
        }

        if collector == "neighbors" || collector == "mdns" {
            let patches = self.classifier.classify(&self.store.entities_snapshot());
            for (id, patch) in patches {
                self.store.patch(&id, patch);
            }
        }

        if collector == "neighbors" {
            self.pipeline.rebuild_index(&self.store.entities_snapshot());
        }

        if collector == "routes" {
            let subnets = self.routes.latest();
            if self.gate_open {
                let _ = self
                    .publications
                    .send(Publication::Topology(subnets.as_ref().clone()));
            }
        }

        self.run_fingerprinter();
        self.publish_update(Vec::new());
    }

    fn tick(&mut self) {
        let outcome = self.store.tick(now_millis(), &self.config.thresholds);
        if outcome.changed() {
            self.publish_update(outcome.removed);
        }
    }

    /// Capture enrichment flush: refresh the index, patch per-entity
    /// protocol aggregates through the lifecycle-safe path, publish if
    /// anything changed.
    fn flush_capture(&mut self) {
        let entities = self.store.entities_snapshot();
        self.pipeline.rebuild_index(&entities);

        for (ip, samples) in self.pipeline.take_ttl_samples() {
            self.fingerprinter.record_ttl(&ip, samples);
        }

        let aggregates = self.pipeline.aggregates_by_ip();
        if aggregates.is_empty() {
            return;
        }

        let mut changed = false;
        for entity in &entities {
            let Some(ip) = &entity.ip else { continue };
            let Some(aggregate) = aggregates.get(ip) else {
                continue;
            };
            if aggregate.protocols.is_empty() {
                continue;
            }
            changed |= self.store.patch(
                &entity.id,
                EntityPatch {
                    protocols: Some(aggregate.protocols.clone()),
                    total_bytes: Some(aggregate.bytes),
                    total_packets: Some(aggregate.packets),
                    ..EntityPatch::default()
                },
            );
        }

        if changed {
            self.run_fingerprinter();
            self.publish_update(Vec::new());
        }
    }

    fn run_fingerprinter(&mut self) {
        let patches = self.fingerprinter.infer(&self.store.entities_snapshot());
        for (id, patch) in patches {
            self.store.patch(&id, patch);
        }
    }

    fn maybe_open_gate(&mut self) {
        if self.gate_open || !self.transport_ready || !self.initial_scan_done {
            return;
        }
        self.gate_open = true;
        let snapshot = self.snapshot();
        for reply in self.parked_full_state.drain(..) {
            let _ = reply.send(snapshot.clone());
        }
        let _ = self.publications.send(Publication::FullState(snapshot));
        debug!("initial snapshot published");
    }

    /// Boundary throughput enrichment happens here, on outbound copies
    /// only -- the store never carries rate fields.
    fn snapshot(&self) -> Snapshot {
        let rates = self.throughput.rates();
        let mut entities = self.store.entities_snapshot();
        let mut relations = self.store.relations_snapshot();

        for entity in &mut entities {
            if let Some(rate) = rates.get(&entity.id) {
                entity.bytes_per_sec = Some(rate.total());
                entity.bytes_in_per_sec = Some(rate.bytes_in_per_sec);
                entity.bytes_out_per_sec = Some(rate.bytes_out_per_sec);
            }
        }
        for relation in &mut relations {
            if let Some(rate) = rates
                .get(&relation.source)
                .or_else(|| rates.get(&relation.target))
            {
                relation.bytes_per_sec = Some(rate.total());
                relation.bytes_in_per_sec = Some(rate.bytes_in_per_sec);
                relation.bytes_out_per_sec = Some(rate.bytes_out_per_sec);
            }
        }

        Snapshot {
            entities,
            relations,
            timestamp: now_millis(),
        }
    }

    fn publish_update(&mut self, removed: Vec<String>) {
        if !self.gate_open {
            return;
        }
        let snapshot = self.snapshot();
        let _ = self.publications.send(Publication::Update { snapshot, removed });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{LanDetail, Relation, RelationKind};

    fn test_writer() -> Writer {
        let (publications, _) = broadcast::channel(16);
        let (signal_tx, _signal_rx) = mpsc::channel(4);
        Writer::new(
            EngineConfig::default(),
            publications,
            PacketPipeline::new(100, signal_tx),
            Arc::new(RouteCollector::new()),
            Arc::new(ThroughputCollector::new()),
        )
    }

    fn lan_scan(mac: &str, ip: &str, vendor: Option<&str>) -> CollectorResult {
        let id = ids::lan(mac);
        let entity = Entity::observation(
            id.clone(),
            vendor.map_or_else(|| ip.to_owned(), |v| format!("{v} ({ip})")),
            SignalDetail::LanNeighbor(LanDetail {
                interface: "en0".into(),
                is_gateway: false,
                vendor: vendor.map(ToOwned::to_owned),
                device_type: None,
                product_name: None,
                icon_key: None,
            }),
        )
        .with_mac(mac)
        .with_ip(ip);
        CollectorResult {
            relations: vec![Relation::link(id, ids::HOST, RelationKind::ConnectedTo)],
            entities: vec![entity],
        }
    }

    #[tokio::test]
    async fn gate_holds_until_both_conditions() {
        let mut writer = test_writer();
        writer.seed_host();
        let mut rx = writer.publications.subscribe();

        writer.handle(WriterMsg::Scan {
            collector: "neighbors",
            result: lan_scan("aa:bb:cc:dd:ee:ff", "192.168.1.42", None),
        });
        assert!(rx.try_recv().is_err(), "nothing published before the gate");

        writer.handle(WriterMsg::InitialScanDone);
        assert!(rx.try_recv().is_err(), "one condition is not enough");

        writer.handle(WriterMsg::TransportReady);
        let first = rx.try_recv().unwrap();
        assert!(matches!(first, Publication::FullState(_)));
    }

    #[tokio::test]
    async fn parked_full_state_resolves_at_gate_open() {
        let mut writer = test_writer();
        writer.seed_host();
        let (tx, rx) = oneshot::channel();

        writer.handle(WriterMsg::GetFullState(tx));
        writer.handle(WriterMsg::TransportReady);
        writer.handle(WriterMsg::InitialScanDone);

        let snapshot = rx.await.unwrap();
        assert!(snapshot.entities.iter().any(|e| e.id == ids::HOST));
    }

    #[tokio::test]
    async fn scan_apply_publishes_update_with_relations() {
        let mut writer = test_writer();
        writer.seed_host();
        writer.handle(WriterMsg::TransportReady);
        writer.handle(WriterMsg::InitialScanDone);
        let mut rx = writer.publications.subscribe();

        writer.handle(WriterMsg::Scan {
            collector: "neighbors",
            result: lan_scan("aa:bb:cc:dd:ee:ff", "192.168.1.42", None),
        });

        let Publication::Update { snapshot, removed } = rx.try_recv().unwrap() else {
            panic!("expected update");
        };
        assert!(removed.is_empty());
        assert!(snapshot.entities.iter().any(|e| e.id == "lan-aa:bb:cc:dd:ee:ff"));
        // Every relation endpoint resolves inside the same snapshot.
        for relation in &snapshot.relations {
            assert!(snapshot.entities.iter().any(|e| e.id == relation.source));
            assert!(snapshot.entities.iter().any(|e| e.id == relation.target));
        }
    }

    #[tokio::test]
    async fn classifier_runs_after_lan_scan_without_touching_lifecycle() {
        let mut writer = test_writer();
        writer.seed_host();
        writer.handle(WriterMsg::Scan {
            collector: "neighbors",
            result: lan_scan(
                "00:17:88:01:02:03",
                "192.168.1.50",
                Some("Philips Lighting BV"),
            ),
        });

        let entity = writer.store.get("lan-00:17:88:01:02:03").unwrap();
        let SignalDetail::LanNeighbor(lan) = &entity.detail else {
            panic!("expected lan detail");
        };
        assert_eq!(lan.device_type.as_deref(), Some("smart-home"));
        // Enrichment left the observation timestamps alone.
        assert_eq!(entity.first_seen, entity.last_seen);
    }

    #[tokio::test]
    async fn tick_publishes_removals() {
        let mut writer = test_writer();
        writer.seed_host();
        writer.handle(WriterMsg::TransportReady);
        writer.handle(WriterMsg::InitialScanDone);

        writer.handle(WriterMsg::Scan {
            collector: "neighbors",
            result: lan_scan("aa:bb:cc:dd:ee:ff", "192.168.1.42", None),
        });

        // Backdate the entity far past the removal threshold.
        let outcome = writer
            .store
            .tick(now_millis() + 120_000, &writer.config.thresholds);
        assert_eq!(outcome.removed, vec!["lan-aa:bb:cc:dd:ee:ff".to_owned()]);

        let mut rx = writer.publications.subscribe();
        writer.publish_update(outcome.removed);
        let Publication::Update { snapshot, removed } = rx.try_recv().unwrap() else {
            panic!("expected update");
        };
        assert_eq!(removed, vec!["lan-aa:bb:cc:dd:ee:ff".to_owned()]);
        assert!(!snapshot.entities.iter().any(|e| e.id == "lan-aa:bb:cc:dd:ee:ff"));
        assert!(snapshot.relations.is_empty());
    }

    #[tokio::test]
    async fn host_survives_every_tick() {
        let mut writer = test_writer();
        writer.seed_host();
        let outcome = writer
            .store
            .tick(now_millis() + 600_000, &writer.config.thresholds);
        assert!(outcome.removed.is_empty());
        assert!(writer.store.get(ids::HOST).is_some());
    }

    #[tokio::test]
    async fn boundary_enrichment_never_mutates_the_store() {
        let mut writer = test_writer();
        writer.seed_host();
        writer.handle(WriterMsg::TransportReady);
        writer.handle(WriterMsg::InitialScanDone);

        // A socket entity whose id matches a throughput key.
        let socket_id = "conn-TCP-142.250.80.46-443-firefox";
        let entity = Entity::observation(
            socket_id,
            "firefox → 142.250.80.46:443",
            SignalDetail::SocketEndpoint(crate::model::SocketDetail {
                protocol: crate::model::TransportProtocol::Tcp,
                local_port: Some(54321),
                remote_port: 443,
                remote_host: "142.250.80.46".into(),
                state: Some("ESTABLISHED".into()),
                process_name: "firefox".into(),
                resolved_hostname: None,
                service_name: Some("https".into()),
            }),
        );
        writer.handle(WriterMsg::Scan {
            collector: "sockets",
            result: CollectorResult {
                entities: vec![entity],
                relations: vec![Relation::link(
                    socket_id,
                    ids::HOST,
                    RelationKind::ConnectedTo,
                )],
            },
        });

        // Inject a rate sample the way the throughput scan would.
        let t0 = std::time::Instant::now();
        let mut first = std::collections::HashMap::new();
        first.insert(socket_id.to_owned(), (0u64, 0u64));
        writer.throughput.test_update(first, t0);
        let mut second = std::collections::HashMap::new();
        second.insert(socket_id.to_owned(), (600_000u64, 30_000u64));
        writer.throughput.test_update(second, t0 + Duration::from_secs(3));

        let snapshot = writer.snapshot();
        let outbound = snapshot
            .entities
            .iter()
            .find(|e| e.id == socket_id)
            .unwrap();
        assert!((outbound.bytes_per_sec.unwrap() - 210_000.0).abs() < 1.0);

        let relation = snapshot
            .relations
            .iter()
            .find(|r| r.source == socket_id)
            .unwrap();
        assert!(relation.bytes_per_sec.is_some());

        // The stored copy never carries throughput fields.
        let stored = writer.store.get(socket_id).unwrap();
        assert!(stored.bytes_per_sec.is_none());
        assert!(stored.bytes_in_per_sec.is_none());
        assert!(stored.bytes_out_per_sec.is_none());
    }

    #[tokio::test]
    async fn probe_record_enriches_matching_entity() {
        let mut writer = test_writer();
        writer.seed_host();
        writer.handle(WriterMsg::Scan {
            collector: "neighbors",
            result: lan_scan("dc:a6:32:01:02:03", "192.168.1.40", None),
        });

        writer.handle(WriterMsg::RecordProbe {
            ip: "192.168.1.40".into(),
            hit: ProbeHit {
                family: Some("linux".into()),
                version: Some("Linux 5.4".into()),
                confidence: 0.92,
            },
        });

        let entity = writer.store.get("lan-dc:a6:32:01:02:03").unwrap();
        assert_eq!(entity.os_family.as_deref(), Some("linux"));
        assert_eq!(entity.os_version.as_deref(), Some("Linux 5.4"));
    }
}
