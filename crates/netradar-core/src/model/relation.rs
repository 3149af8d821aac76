// ── Relations ──
//
// Directed labeled edges between entities. Ids derive from
// (source, target, kind) so repeated observation deduplicates.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RelationKind {
    ConnectedTo,
    HostsService,
    Gateway,
    SameDevice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub id: String,
    pub source: String,
    pub target: String,
    pub kind: RelationKind,

    // Boundary-only throughput, mirroring the entity fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_per_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_in_per_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_out_per_sec: Option<f64>,
}

impl Relation {
    /// Build a relation with its derived id.
    #[must_use]
    pub fn link(source: impl Into<String>, target: impl Into<String>, kind: RelationKind) -> Self {
        let source = source.into();
        let target = target.into();
        let id = format!("{source}->{target}:{kind}");
        Self {
            id,
            source,
            target,
            kind,
            bytes_per_sec: None,
            bytes_in_per_sec: None,
            bytes_out_per_sec: None,
        }
    }

    /// Whether this relation references the given entity id on either end.
    #[must_use]
    pub fn touches(&self, entity_id: &str) -> bool {
        self.source == entity_id || self.target == entity_id
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn id_derivation_deduplicates() {
        let a = Relation::link("lan-aa:bb:cc:dd:ee:ff", "this-device", RelationKind::ConnectedTo);
        let b = Relation::link("lan-aa:bb:cc:dd:ee:ff", "this-device", RelationKind::ConnectedTo);
        assert_eq!(a.id, b.id);

        let c = Relation::link("lan-aa:bb:cc:dd:ee:ff", "this-device", RelationKind::Gateway);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let rel = Relation::link("a", "b", RelationKind::HostsService);
        let value = serde_json::to_value(&rel).unwrap();
        assert_eq!(value["kind"], "hosts_service");
    }

    #[test]
    fn touches_either_end() {
        let rel = Relation::link("a", "b", RelationKind::ConnectedTo);
        assert!(rel.touches("a"));
        assert!(rel.touches("b"));
        assert!(!rel.touches("c"));
    }
}
