// ── Entity store ──
//
// Keyed storage for entities and relations with time-based lifecycle.
// The store is plain data: it is only ever touched from the orchestrator
// writer, so every operation is synchronous CPU work. Upsert is an
// observation (revives lifecycle); patch is enrichment (leaves lifecycle
// alone). Conflating the two would make enriched entities immortal.

use std::time::Duration;

use indexmap::IndexMap;

use crate::model::{Entity, EntityPatch, LifecycleStatus, Relation};

// ── Lifecycle thresholds ────────────────────────────────────────────

/// Age thresholds driving `tick`. An entity past `remove` is deleted,
/// past `expired` is marked expired, past `stale` is marked stale.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleThresholds {
    pub stale: Duration,
    pub expired: Duration,
    pub remove: Duration,
}

impl Default for LifecycleThresholds {
    fn default() -> Self {
        Self {
            stale: Duration::from_secs(30),
            expired: Duration::from_secs(60),
            remove: Duration::from_secs(90),
        }
    }
}

/// What a lifecycle tick changed.
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub removed: Vec<String>,
    pub status_changed: bool,
}

impl TickOutcome {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.status_changed || !self.removed.is_empty()
    }
}

// ── EntityStore ─────────────────────────────────────────────────────

/// In-memory keyed store for entities and relations.
///
/// Insertion order is preserved, so snapshot views are deterministic for
/// a given observation sequence.
#[derive(Debug, Default)]
pub struct EntityStore {
    entities: IndexMap<String, Entity>,
    relations: IndexMap<String, Relation>,
}

impl EntityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a fresh observation.
    ///
    /// Existing entities merge the observed fields, keep their original
    /// `first_seen`, get `last_seen = now`, and return to `active`. New
    /// entities initialize both timestamps to `now`.
    pub fn upsert(&mut self, obs: Entity, now: i64) {
        match self.entities.get_mut(&obs.id) {
            Some(existing) => {
                existing.merge_observation(obs);
                existing.last_seen = now;
                existing.status = LifecycleStatus::Active;
            }
            None => {
                let mut entity = obs;
                entity.first_seen = now;
                entity.last_seen = now;
                entity.status = LifecycleStatus::Active;
                self.entities.insert(entity.id.clone(), entity);
            }
        }
    }

    /// Apply an enrichment patch without touching `last_seen` or `status`.
    /// No-op when the id is absent. Returns whether a patch was applied.
    pub fn patch(&mut self, id: &str, patch: EntityPatch) -> bool {
        match self.entities.get_mut(id) {
            Some(entity) => {
                entity.apply_patch(patch);
                true
            }
            None => false,
        }
    }

    /// Insert or replace a relation by id.
    pub fn upsert_relation(&mut self, relation: Relation) {
        self.relations.insert(relation.id.clone(), relation);
    }

    /// Remove every relation whose source or target is `entity_id`.
    pub fn prune_relations_of(&mut self, entity_id: &str) {
        self.relations.retain(|_, r| !r.touches(entity_id));
    }

    /// Advance lifecycle for every non-host entity.
    ///
    /// Removal deletes the entity and prunes its relations in the same
    /// step, so no snapshot can ever contain a dangling relation.
    pub fn tick(&mut self, now: i64, thresholds: &LifecycleThresholds) -> TickOutcome {
        let stale_ms = millis(thresholds.stale);
        let expired_ms = millis(thresholds.expired);
        let remove_ms = millis(thresholds.remove);

        let mut outcome = TickOutcome::default();

        let mut doomed = Vec::new();
        for (id, entity) in &mut self.entities {
            if entity.is_host() {
                continue;
            }
            let age = now - entity.last_seen;
            if age > remove_ms {
                doomed.push(id.clone());
            } else if age > expired_ms {
                if entity.status != LifecycleStatus::Expired {
                    entity.status = LifecycleStatus::Expired;
                    outcome.status_changed = true;
                }
            } else if age > stale_ms
                && !matches!(
                    entity.status,
                    LifecycleStatus::Stale | LifecycleStatus::Expired
                )
            {
                entity.status = LifecycleStatus::Stale;
                outcome.status_changed = true;
            }
        }

        for id in doomed {
            self.entities.shift_remove(&id);
            self.prune_relations_of(&id);
            outcome.removed.push(id);
        }

        outcome
    }

    // ── Accessors ────────────────────────────────────────────────────

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn iter_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn iter_relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    /// Ordered copy of all entities.
    #[must_use]
    pub fn entities_snapshot(&self) -> Vec<Entity> {
        self.entities.values().cloned().collect()
    }

    /// Ordered copy of all relations.
    #[must_use]
    pub fn relations_snapshot(&self) -> Vec<Relation> {
        self.relations.values().cloned().collect()
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn millis(d: Duration) -> i64 {
    d.as_millis() as i64
}
