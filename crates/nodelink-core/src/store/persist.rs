// ── Snapshot persistence ──
//
// The host owns storage. The core hands it a serializable snapshot at
// checkpoints and reads it back at session start so cached entities can
// be served before the first connection succeeds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{DeviceInfo, EntityDescriptor, RemoteAction, SessionId};

/// Last-known capability lists for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    #[serde(default)]
    pub device_info: Option<DeviceInfo>,
    #[serde(default)]
    pub entities: Vec<EntityDescriptor>,
    #[serde(default)]
    pub actions: Vec<RemoteAction>,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

/// Storage backend for [`PersistedSnapshot`]s.
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    /// `Ok(None)` when nothing was saved for this session yet.
    async fn load(&self, session: &SessionId) -> Result<Option<PersistedSnapshot>, CoreError>;

    async fn save(&self, session: &SessionId, snapshot: &PersistedSnapshot)
    -> Result<(), CoreError>;

    async fn remove(&self, session: &SessionId) -> Result<(), CoreError>;
}

/// In-process store keeping each snapshot as a JSON value.
///
/// Going through JSON keeps it honest about what actually survives
/// serialization.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<SessionId, serde_json::Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, session: &SessionId) -> bool {
        self.entries.contains_key(session)
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self, session: &SessionId) -> Result<Option<PersistedSnapshot>, CoreError> {
        let Some(value) = self.entries.get(session).map(|r| r.value().clone()) else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(value)?))
    }

    async fn save(
        &self,
        session: &SessionId,
        snapshot: &PersistedSnapshot,
    ) -> Result<(), CoreError> {
        let value = serde_json::to_value(snapshot)?;
        self.entries.insert(session.clone(), value);
        Ok(())
    }

    async fn remove(&self, session: &SessionId) -> Result<(), CoreError> {
        self.entries.remove(session);
        Ok(())
    }
}
