// ── Domain model ──
//
// Entities, relations, and subnet descriptors. Identity is deterministic:
// re-observing the same signal always produces the same id, so equality is
// by id, never by reference.

mod entity;
mod relation;
mod subnet;

pub use entity::{
    Band, BluetoothDetail, Entity, EntityPatch, HostDetail, HostInterface, LanDetail,
    LifecycleStatus, MdnsDetail, SignalDetail, SocketDetail, TransportProtocol, WifiApDetail, ids,
};
pub use relation::{Relation, RelationKind};
pub use subnet::{Subnet, matching_subnet};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// All entity timestamps use this representation.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
