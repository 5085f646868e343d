// ── Topic filters for notification subscriptions ──

use super::Notification;
use crate::model::{EntityKey, EntityKind};

/// Which notifications a subscriber wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Everything the session publishes.
    Session,
    /// List-level and per-entity changes for one kind.
    Kind(EntityKind),
    /// Changes for a single entity.
    Entity(EntityKind, EntityKey),
}

impl Topic {
    pub fn matches(&self, notification: &Notification) -> bool {
        match (self, notification) {
            (Self::Session, _) => true,
            (Self::Kind(k), Notification::EntitiesAdded { kind, .. })
            | (Self::Kind(k), Notification::EntityRemoved { kind, .. })
            | (Self::Kind(k), Notification::EntityUpdated { kind, .. }) => k == kind,
            (Self::Entity(k, key), Notification::EntitiesAdded { kind, descriptors }) => {
                k == kind && descriptors.iter().any(|d| d.key == *key)
            }
            (Self::Entity(k, key), Notification::EntityRemoved { kind, key: removed }) => {
                k == kind && key == removed
            }
            (Self::Entity(k, key), Notification::EntityUpdated { kind, key: updated, .. }) => {
                k == kind && key == updated
            }
            _ => false,
        }
    }
}
