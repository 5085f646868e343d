// ── Session registry ──
//
// Owns every loaded session, keyed by id. Hosts pass a registry around
// instead of reaching for process-wide state.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::error::CoreError;
use crate::model::SessionId;
use crate::session::{Session, SessionParts};
use crate::store::SnapshotStore;

struct RegistryInner {
    sessions: DashMap<SessionId, Arc<Session>>,
    store: Arc<dyn SnapshotStore>,
}

/// Cheaply cloneable handle to the set of loaded sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// All sessions share `store` for their persisted snapshots.
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                store,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.inner.store
    }

    /// Build, register, and start a session.
    pub async fn load(
        &self,
        config: SessionConfig,
        parts: SessionParts,
    ) -> Result<Arc<Session>, CoreError> {
        let session = match self.inner.sessions.entry(config.id.clone()) {
            Entry::Occupied(_) => {
                return Err(CoreError::SessionAlreadyLoaded { id: config.id });
            }
            Entry::Vacant(slot) => {
                let session = Session::new(config, Arc::clone(&self.inner.store), parts);
                slot.insert(Arc::clone(&session));
                session
            }
        };

        session.start().await;
        info!(session = %session.id(), host = %session.config().host, "session loaded");
        Ok(session)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.inner.sessions.get(id).map(|r| Arc::clone(r.value()))
    }

    pub fn is_loaded(&self, id: &SessionId) -> bool {
        self.inner.sessions.contains_key(id)
    }

    /// Loaded ids, sorted.
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.inner.sessions.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Remove the session from the registry, then shut it down.
    pub async fn unload(&self, id: &SessionId) -> Result<(), CoreError> {
        let (_, session) = self
            .inner
            .sessions
            .remove(id)
            .ok_or_else(|| CoreError::SessionNotFound { id: id.clone() })?;
        session.shutdown().await;
        info!(session = %id, "session unloaded");
        Ok(())
    }

    /// Unload if loaded, then delete the persisted snapshot.
    pub async fn remove(&self, id: &SessionId) -> Result<(), CoreError> {
        if self.is_loaded(id) {
            self.unload(id).await?;
        }
        self.inner.store.remove(id).await
    }

    /// Unload every session. Errors are logged.
    pub async fn shutdown_all(&self) {
        for id in self.session_ids() {
            if let Err(e) = self.unload(&id).await {
                warn!(session = %id, error = %e, "unload failed");
            }
        }
    }
}
