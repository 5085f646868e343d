// ── Passive discovery ──
//
// Listens to mDNS record updates while the device is unreachable. A
// pointer record carrying the device's alias means the node is (probably)
// back, so the supervisor can retry before its backoff timer expires.
// Discovery only ever accelerates reconnects; nothing depends on it.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

/// A resource record observed on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryRecord {
    /// `PTR` record: `name` is the service type, `alias` the instance.
    Pointer { name: String, alias: String },
    /// Any other record type (`A`, `AAAA`, `SRV`, `TXT`, ...).
    Other { name: String, record_type: String },
}

/// One record change delivered by the discovery source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    pub new: DiscoveryRecord,
    pub old: Option<DiscoveryRecord>,
}

impl RecordUpdate {
    pub fn pointer(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            new: DiscoveryRecord::Pointer {
                name: name.into(),
                alias: alias.into(),
            },
            old: None,
        }
    }
}

/// Receives record batches from a [`DiscoverySource`].
///
/// Called synchronously from the source's own task; implementations must
/// not block.
pub trait RecordListener: Send + Sync + 'static {
    fn on_records(&self, records: &[RecordUpdate]);
}

/// Registration handle returned by [`DiscoverySource::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(pub u64);

/// An mDNS browser (or anything else that can surface announcements).
pub trait DiscoverySource: Send + Sync + 'static {
    fn add_listener(&self, listener: Arc<dyn RecordListener>) -> ListenerToken;
    fn remove_listener(&self, token: ListenerToken);
}

/// Returns `true` if any update is a pointer record for `alias`.
pub fn announces_alias(records: &[RecordUpdate], alias: &str) -> bool {
    records.iter().any(|update| {
        matches!(&update.new, DiscoveryRecord::Pointer { alias: a, .. } if a == alias)
    })
}

// ── DiscoveryWatcher ─────────────────────────────────────────────────

/// Idempotent start/stop wrapper around one listener registration.
///
/// Guarded by its own mutex, independent of the supervisor's connection
/// lock, so rapid connect/disconnect cycles can never double-register or
/// leak the listener. Once [`close`](Self::close)d it never registers again.
pub struct DiscoveryWatcher {
    source: Option<Arc<dyn DiscoverySource>>,
    listener: Arc<dyn RecordListener>,
    handle: Mutex<Registration>,
}

#[derive(Default)]
struct Registration {
    token: Option<ListenerToken>,
    closed: bool,
}

impl DiscoveryWatcher {
    /// A watcher with no source never listens; `start`/`stop` are no-ops.
    pub fn new(source: Option<Arc<dyn DiscoverySource>>, listener: Arc<dyn RecordListener>) -> Self {
        Self {
            source,
            listener,
            handle: Mutex::new(Registration::default()),
        }
    }

    pub async fn start(&self) {
        let Some(source) = &self.source else {
            return;
        };
        let mut handle = self.handle.lock().await;
        if handle.closed {
            debug!("discovery watcher closed, not registering");
            return;
        }
        if handle.token.is_none() {
            handle.token = Some(source.add_listener(Arc::clone(&self.listener)));
            debug!("discovery listener registered");
        }
    }

    pub async fn stop(&self) {
        let mut handle = self.handle.lock().await;
        self.remove(&mut handle);
    }

    /// Stop for good: later `start` calls are ignored.
    pub async fn close(&self) {
        let mut handle = self.handle.lock().await;
        handle.closed = true;
        self.remove(&mut handle);
    }

    fn remove(&self, handle: &mut Registration) {
        if let (Some(source), Some(token)) = (&self.source, handle.token.take()) {
            source.remove_listener(token);
            debug!("discovery listener removed");
        }
    }

    pub async fn is_listening(&self) -> bool {
        self.handle.lock().await.token.is_some()
    }
}
