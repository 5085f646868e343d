// ── Capability reconciliation ──
//
// Turns full-replacement entity lists and state pushes into snapshot
// mutations plus ordered notifications. Passes are serialized: removal
// notifications of one pass always precede its addition batch, and no
// two passes interleave their notifications.

use std::collections::HashMap;
use std::sync::Arc;

use strum::IntoEnumIterator;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::error::CoreError;
use crate::model::{EntityDescriptor, EntityKey, EntityKind, EntityState};
use crate::store::CapabilitySnapshot;
use crate::stream::{Notification, NotificationHub, UpdateCause};

/// Result of one `reconcile_entity_list` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub added: Vec<EntityKey>,
    pub removed: Vec<EntityKey>,
    pub kept: Vec<EntityKey>,
}

impl ReconcileOutcome {
    /// `true` when the pass neither added nor removed anything.
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct CapabilityReconciler {
    snapshot: Arc<CapabilitySnapshot>,
    hub: Arc<NotificationHub>,
    pass: Mutex<()>,
}

impl CapabilityReconciler {
    pub fn new(snapshot: Arc<CapabilitySnapshot>, hub: Arc<NotificationHub>) -> Self {
        Self {
            snapshot,
            hub,
            pass: Mutex::new(()),
        }
    }

    /// Replace the descriptor list of `kind` with `incoming` (always the
    /// complete set) and publish the delta.
    pub async fn reconcile_entity_list(
        &self,
        kind: EntityKind,
        incoming: Vec<EntityDescriptor>,
    ) -> Result<ReconcileOutcome, CoreError> {
        let _pass = self.pass.lock().await;

        let transition = self.snapshot.replace_entities(kind, incoming)?;
        for key in &transition.duplicates {
            warn!(%kind, %key, "device announced duplicate entity key, ignoring repeat");
        }

        for descriptor in &transition.removed {
            self.hub
                .publish(Notification::EntityRemoved {
                    kind,
                    key: descriptor.key,
                })
                .await;
        }
        if !transition.added.is_empty() {
            self.hub
                .publish(Notification::EntitiesAdded {
                    kind,
                    descriptors: transition.added.clone(),
                })
                .await;
        }

        let outcome = ReconcileOutcome {
            added: transition.added.iter().map(|d| d.key).collect(),
            removed: transition.removed.iter().map(|d| d.key).collect(),
            kept: transition.kept,
        };
        if !outcome.is_unchanged() {
            debug!(
                %kind,
                added = outcome.added.len(),
                removed = outcome.removed.len(),
                kept = outcome.kept.len(),
                "entity list reconciled"
            );
        }
        Ok(outcome)
    }

    /// Reconcile a mixed list, one pass per kind. Kinds absent from
    /// `entities` are reconciled against an empty list.
    ///
    /// A failing pass is logged and does not stop the others.
    pub async fn reconcile_all(
        &self,
        entities: Vec<EntityDescriptor>,
    ) -> HashMap<EntityKind, ReconcileOutcome> {
        let mut by_kind: HashMap<EntityKind, Vec<EntityDescriptor>> = HashMap::new();
        for descriptor in entities {
            by_kind.entry(descriptor.kind).or_default().push(descriptor);
        }

        let mut outcomes = HashMap::new();
        for kind in EntityKind::iter() {
            let list = by_kind.remove(&kind).unwrap_or_default();
            match self.reconcile_entity_list(kind, list).await {
                Ok(outcome) => {
                    outcomes.insert(kind, outcome);
                }
                Err(e) => error!(%kind, error = %e, "reconcile pass aborted"),
            }
        }
        outcomes
    }

    /// Store a state push and notify the entity. Legal for keys with no
    /// known descriptor.
    pub async fn apply_state(&self, state: EntityState) {
        let _pass = self.pass.lock().await;
        let (kind, key) = (state.kind, state.key);
        self.snapshot.store_state(state);
        self.hub
            .publish(Notification::EntityUpdated {
                kind,
                key,
                cause: UpdateCause::State,
            })
            .await;
    }
}
