// ── Wire messages ──
//
// The typed contract between the engine and its consumers. Outbound
// messages are tagged with `type`; control requests carry an optional
// `id` the response echoes back, so a consumer can correlate
// request/response over the same socket that streams publications.

use serde::{Deserialize, Serialize};

use netradar_core::capture::{CaptureStatus, PacketEvent};
use netradar_core::model::{Entity, Relation, Subnet};
use netradar_core::probe::ProbeReport;
use netradar_core::publish::Publication;

// ── Outbound ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Complete state, sent on request and once at initial readiness.
    FullState {
        entities: Vec<Entity>,
        relations: Vec<Relation>,
        timestamp: i64,
    },
    /// Complete state plus the ids removed since the last publication.
    NodeUpdate {
        entities: Vec<Entity>,
        relations: Vec<Relation>,
        removed: Vec<String>,
        timestamp: i64,
    },
    /// Subnet side channel.
    Topology { subnets: Vec<Subnet> },
    /// One captured packet (drained at ≤100/s).
    PacketEvent(PacketEvent),
}

impl From<Publication> for OutboundMessage {
    fn from(publication: Publication) -> Self {
        match publication {
            Publication::FullState(snapshot) => Self::FullState {
                entities: snapshot.entities,
                relations: snapshot.relations,
                timestamp: snapshot.timestamp,
            },
            Publication::Update { snapshot, removed } => Self::NodeUpdate {
                entities: snapshot.entities,
                relations: snapshot.relations,
                removed,
                timestamp: snapshot.timestamp,
            },
            Publication::Topology(subnets) => Self::Topology { subnets },
        }
    }
}

impl From<PacketEvent> for OutboundMessage {
    fn from(event: PacketEvent) -> Self {
        Self::PacketEvent(event)
    }
}

// ── Control ─────────────────────────────────────────────────────────

/// Inbound control frame: a request plus an optional correlation id.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlEnvelope {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(flatten)]
    pub request: ControlRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    Pause,
    Resume,
    ScanNow {
        #[serde(default)]
        collector: Option<String>,
    },
    GetFullState,
    PacketStart {
        #[serde(default)]
        interface: Option<String>,
    },
    PacketStop,
    PacketStatus,
    PacketGetEvents,
    NmapScan {
        ip: String,
    },
    NmapStatus,
}

/// Outbound control response, echoing the request's `id`.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(flatten)]
    pub response: ControlResponse,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    Ack {
        ok: bool,
    },
    FullState {
        entities: Vec<Entity>,
        relations: Vec<Relation>,
        timestamp: i64,
    },
    PacketStartResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    PacketStatus(CaptureStatus),
    PacketEvents {
        events: Vec<PacketEvent>,
    },
    NmapResult(ProbeReport),
    NmapStatus {
        available: bool,
    },
    Error {
        message: String,
    },
}
