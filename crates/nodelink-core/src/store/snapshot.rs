// ── Capability snapshot ──
//
// The session's authoritative cache: entity descriptors (two generations
// per kind), last-known state values, and the registered action set.
// Reads are lock-free from any task; writes come only from the
// reconciler and the action syncer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use strum::IntoEnumIterator;
use tokio::sync::watch;

use super::arena::{Generation, GenerationArena, Transition};
use super::persist::PersistedSnapshot;
use crate::error::CoreError;
use crate::model::{
    ActionKey, DeviceInfo, EntityDescriptor, EntityKey, EntityKind, EntityState, RemoteAction,
};

/// Cached view of everything a device has announced.
pub struct CapabilitySnapshot {
    pub(crate) entities: GenerationArena,
    pub(crate) states: DashMap<(EntityKind, EntityKey), Arc<EntityState>>,
    pub(crate) actions: DashMap<ActionKey, Arc<RemoteAction>>,
    pub(crate) last_reconciled: watch::Sender<Option<DateTime<Utc>>>,
}

impl CapabilitySnapshot {
    pub fn new() -> Self {
        let (last_reconciled, _) = watch::channel(None);
        Self {
            entities: GenerationArena::new(),
            states: DashMap::new(),
            actions: DashMap::new(),
            last_reconciled,
        }
    }

    // ── Descriptor lookups ───────────────────────────────────────────

    /// Descriptor for `(kind, key)`, current generation first, then the
    /// draining previous one.
    pub fn descriptor(&self, kind: EntityKind, key: EntityKey) -> Option<Arc<EntityDescriptor>> {
        self.entities.get(kind, key).map(|(_, d)| d)
    }

    /// Like [`descriptor`](Self::descriptor), but reports which generation
    /// answered.
    pub fn lookup(
        &self,
        kind: EntityKind,
        key: EntityKey,
    ) -> Option<(Generation, Arc<EntityDescriptor>)> {
        self.entities.get(kind, key)
    }

    pub fn current(&self, kind: EntityKind) -> Vec<Arc<EntityDescriptor>> {
        self.entities.current(kind)
    }

    pub fn previous(&self, kind: EntityKind) -> Vec<Arc<EntityDescriptor>> {
        self.entities.previous(kind)
    }

    pub fn all_descriptors(&self) -> Vec<Arc<EntityDescriptor>> {
        self.entities.all_current()
    }

    pub fn entity_count(&self, kind: EntityKind) -> usize {
        self.entities.len(kind)
    }

    pub fn total_entity_count(&self) -> usize {
        EntityKind::iter().map(|k| self.entities.len(k)).sum()
    }

    // ── States ───────────────────────────────────────────────────────

    pub fn state(&self, kind: EntityKind, key: EntityKey) -> Option<Arc<EntityState>> {
        self.states.get(&(kind, key)).map(|r| Arc::clone(r.value()))
    }

    // ── Actions ──────────────────────────────────────────────────────

    /// Registered actions, sorted by key.
    pub fn actions(&self) -> Vec<Arc<RemoteAction>> {
        let mut out: Vec<_> = self.actions.iter().map(|r| Arc::clone(r.value())).collect();
        out.sort_by_key(|a| a.key);
        out
    }

    pub fn action(&self, key: ActionKey) -> Option<Arc<RemoteAction>> {
        self.actions.get(&key).map(|r| Arc::clone(r.value()))
    }

    // ── Metadata ─────────────────────────────────────────────────────

    pub fn last_reconciled(&self) -> Option<DateTime<Utc>> {
        *self.last_reconciled.borrow()
    }

    // ── Mutation (reconciler / action syncer only) ───────────────────

    pub(crate) fn replace_entities(
        &self,
        kind: EntityKind,
        incoming: Vec<EntityDescriptor>,
    ) -> Result<Transition, CoreError> {
        let transition = self.entities.replace(kind, incoming)?;
        // Readings die with the previous generation, so a key that comes
        // back later starts without one.
        for key in &transition.evicted {
            self.states.remove(&(kind, *key));
        }
        self.last_reconciled.send_replace(Some(Utc::now()));
        Ok(transition)
    }

    pub(crate) fn store_state(&self, state: EntityState) -> Arc<EntityState> {
        let state = Arc::new(state);
        self.states
            .insert((state.kind, state.key), Arc::clone(&state));
        state
    }

    /// Build the persisted form from the current generation.
    pub fn to_persisted(&self, device_info: Option<DeviceInfo>) -> PersistedSnapshot {
        PersistedSnapshot {
            device_info,
            entities: self
                .all_descriptors()
                .iter()
                .map(|d| EntityDescriptor::clone(d))
                .collect(),
            actions: self
                .actions()
                .iter()
                .map(|a| RemoteAction::clone(a))
                .collect(),
            saved_at: Some(Utc::now()),
        }
    }
}

impl Default for CapabilitySnapshot {
    fn default() -> Self {
        Self::new()
    }
}
