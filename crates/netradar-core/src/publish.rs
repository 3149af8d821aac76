// ── Publications ──
//
// What the orchestrator emits toward the transport. Every payload
// carries the complete current entity and relation set; the `removed`
// list is the only delta information, for consumers that cache.

use serde::{Deserialize, Serialize};

use crate::model::{Entity, Relation, Subnet};

/// A full enumeration of current entities and relations at a moment in
/// time, already boundary-enriched with throughput.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub timestamp: i64,
}

/// One outbound publication.
#[derive(Debug, Clone, PartialEq)]
pub enum Publication {
    /// Sent on request and once at initial readiness.
    FullState(Snapshot),
    /// Sent after any scan or lifecycle change.
    Update {
        snapshot: Snapshot,
        removed: Vec<String>,
    },
    /// Subnet side channel, refreshed by the routing collector.
    Topology(Vec<Subnet>),
}
