// ── Device session ──
//
// Runtime state for one device: the supervisor, the capability cache,
// and the glue that runs the login sequence after every connect, drains
// push subscriptions, and projects availability onto entities.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actions::{ActionDiff, ActionSurface, ActionSyncer};
use crate::client::{ClientError, SessionClient};
use crate::config::SessionConfig;
use crate::discovery::DiscoverySource;
use crate::error::CoreError;
use crate::host_state::{HostStateRequest, HostStateSource, forward_host_state};
use crate::model::{
    DeviceActionCall, DeviceInfo, EntityDescriptor, EntityKey, EntityKind, RemoteAction, SessionId,
    StateValue,
};
use crate::reconcile::CapabilityReconciler;
use crate::store::{CapabilitySnapshot, PersistedSnapshot, SnapshotStore};
use crate::stream::{Notification, NotificationHub, Subscription, Topic, UpdateCause};
use crate::supervisor::{ConnectionState, ConnectionSupervisor, SessionHooks};

/// A callback run once on disconnect or teardown.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Per-device collaborators a session is built from.
pub struct SessionParts {
    pub client: Arc<dyn SessionClient>,
    pub surface: Arc<dyn ActionSurface>,
    pub discovery: Option<Arc<dyn DiscoverySource>>,
    /// Answers device requests to mirror host entity state.
    pub host_states: Option<Arc<dyn HostStateSource>>,
}

pub struct Session {
    this: Weak<Session>,
    config: SessionConfig,
    client: Arc<dyn SessionClient>,
    store: Arc<dyn SnapshotStore>,
    host_states: Option<Arc<dyn HostStateSource>>,

    snapshot: Arc<CapabilitySnapshot>,
    hub: Arc<NotificationHub>,
    reconciler: CapabilityReconciler,
    actions: ActionSyncer,
    supervisor: ConnectionSupervisor,

    device_info: ArcSwapOption<DeviceInfo>,
    available: AtomicBool,
    attached: AtomicBool,
    disabled: AtomicBool,

    disconnect_callbacks: Mutex<Vec<Callback>>,
    cleanup_callbacks: Mutex<Vec<Callback>>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn SnapshotStore>,
        parts: SessionParts,
    ) -> Arc<Self> {
        let SessionParts {
            client,
            surface,
            discovery,
            host_states,
        } = parts;

        Arc::new_cyclic(|this: &Weak<Session>| {
            let hooks: Weak<dyn SessionHooks> = this.clone();
            let supervisor =
                ConnectionSupervisor::new(&config, Arc::clone(&client), hooks, discovery);
            let snapshot = Arc::new(CapabilitySnapshot::new());
            let hub = Arc::new(NotificationHub::new(
                config.id.clone(),
                config.ingest_buffer,
            ));

            Self {
                this: this.clone(),
                reconciler: CapabilityReconciler::new(Arc::clone(&snapshot), Arc::clone(&hub)),
                actions: ActionSyncer::new(Arc::clone(&snapshot), Arc::clone(&client), surface),
                supervisor,
                snapshot,
                hub,
                client,
                store,
                host_states,
                config,
                device_info: ArcSwapOption::empty(),
                available: AtomicBool::new(false),
                attached: AtomicBool::new(false),
                disabled: AtomicBool::new(false),
                disconnect_callbacks: Mutex::new(Vec::new()),
                cleanup_callbacks: Mutex::new(Vec::new()),
            }
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Serve the persisted snapshot (entities show up unavailable), then
    /// start supervising the connection.
    pub async fn start(&self) {
        self.attached.store(true, Ordering::Release);

        match self.store.load(&self.config.id).await {
            Ok(Some(persisted)) => self.restore(persisted).await,
            Ok(None) => debug!(session = %self.config.id, "no persisted snapshot"),
            Err(e) => warn!(session = %self.config.id, error = %e, "can't load persisted snapshot"),
        }

        self.supervisor.start().await;
    }

    async fn restore(&self, persisted: PersistedSnapshot) {
        if let Some(info) = persisted.device_info {
            self.device_info.store(Some(Arc::new(info)));
        }
        let info = self.device_info.load_full();
        self.reconciler.reconcile_all(persisted.entities).await;
        self.actions
            .reconcile_actions(info.as_deref(), persisted.actions)
            .await;
        debug!(
            session = %self.config.id,
            entities = self.snapshot.all_descriptors().len(),
            "restored persisted snapshot"
        );
    }

    /// Tear the session down: stop supervising, run disconnect and
    /// cleanup callbacks, withdraw actions, and close the connection.
    pub async fn shutdown(&self) {
        self.attached.store(false, Ordering::Release);
        self.supervisor.stop().await;

        run_callbacks(&self.disconnect_callbacks).await;
        run_callbacks(&self.cleanup_callbacks).await;
        self.actions.clear().await;
        self.client.disconnect().await;
        info!(session = %self.config.id, "session shut down");
    }

    pub async fn add_disconnect_callback(&self, callback: impl FnOnce() + Send + 'static) {
        self.disconnect_callbacks
            .lock()
            .await
            .push(Box::new(callback));
    }

    pub async fn add_cleanup_callback(&self, callback: impl FnOnce() + Send + 'static) {
        self.cleanup_callbacks.lock().await.push(Box::new(callback));
    }

    /// A disabled session stays loaded but never attempts to connect.
    pub async fn set_disabled(&self, disabled: bool) {
        let was = self.disabled.swap(disabled, Ordering::AcqRel);
        if was && !disabled {
            self.supervisor.trigger_reconnect().await;
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Retry immediately, e.g. after the host updated rejected credentials.
    pub async fn reconnect_now(&self) {
        self.supervisor.trigger_reconnect().await;
    }

    /// Write the current generation to the snapshot store.
    pub async fn persist(&self) -> Result<(), CoreError> {
        let snapshot = self
            .snapshot
            .to_persisted(self.device_info.load_full().map(|i| DeviceInfo::clone(&i)));
        self.store.save(&self.config.id, &snapshot).await
    }

    // ── Login sequence ───────────────────────────────────────────

    async fn login(&self) -> Result<(), CoreError> {
        let info = self.client.device_info().await?;
        debug!(session = %self.config.id, device = %info.name, firmware = %info.sw_version(), "device info received");
        self.device_info.store(Some(Arc::new(info.clone())));
        self.set_available(true).await;

        let capabilities = self.client.list_capabilities().await?;
        self.reconciler.reconcile_all(capabilities.entities).await;
        self.actions
            .reconcile_actions(Some(&info), capabilities.actions)
            .await;

        self.subscribe_pushes().await?;

        // Off the login path: a slow store must not delay state pushes.
        let this = self.this.clone();
        tokio::spawn(async move {
            let Some(session) = this.upgrade() else { return };
            if let Err(e) = session.persist().await {
                warn!(session = %session.config.id, error = %e, "can't persist snapshot");
            }
        });
        Ok(())
    }

    async fn subscribe_pushes(&self) -> Result<(), CoreError> {
        let token = CancellationToken::new();
        let (state_tx, mut state_rx) = mpsc::channel(self.config.ingest_buffer);
        let (call_tx, mut call_rx) = mpsc::channel(self.config.ingest_buffer);

        self.client.subscribe_states(state_tx).await?;
        self.client.subscribe_action_calls(call_tx).await?;

        let states = {
            let this = self.this.clone();
            let cancel = token.clone();
            async move {
                loop {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        next = state_rx.recv() => {
                            let Some(state) = next else { break };
                            let Some(session) = this.upgrade() else { break };
                            session.reconciler.apply_state(state).await;
                        }
                    }
                }
            }
        };
        let calls = {
            let this = self.this.clone();
            let cancel = token.clone();
            async move {
                loop {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        next = call_rx.recv() => {
                            let Some(call) = next else { break };
                            let Some(session) = this.upgrade() else { break };
                            session.handle_device_call(call).await;
                        }
                    }
                }
            }
        };
        tokio::spawn(states);
        tokio::spawn(calls);

        if let Some(source) = &self.host_states {
            self.subscribe_state_requests(Arc::clone(source), token.clone())
                .await?;
        }

        self.add_disconnect_callback(move || token.cancel()).await;
        Ok(())
    }

    /// Spawn one forwarder per device request; all of them stop with
    /// `token`.
    async fn subscribe_state_requests(
        &self,
        source: Arc<dyn HostStateSource>,
        token: CancellationToken,
    ) -> Result<(), CoreError> {
        let (tx, mut rx) = mpsc::channel::<HostStateRequest>(self.config.ingest_buffer);
        self.client.subscribe_state_requests(tx).await?;

        let session = self.config.id.clone();
        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    next = rx.recv() => {
                        let Some(request) = next else { break };
                        debug!(%session, entity = %request.entity_id, attribute = ?request.attribute, "device requested host state");
                        let states = source.watch(&request.entity_id);
                        tokio::spawn(forward_host_state(
                            session.clone(),
                            Arc::clone(&client),
                            request,
                            states,
                            token.clone(),
                        ));
                    }
                }
            }
        });
        Ok(())
    }

    async fn handle_device_call(&self, call: DeviceActionCall) {
        let Some((domain, _)) = call.split_service() else {
            warn!(session = %self.config.id, service = %call.service, "device sent malformed service name");
            return;
        };
        if call.is_event && domain != self.config.event_domain {
            error!(
                session = %self.config.id,
                service = %call.service,
                "device may only fire events in the {} domain",
                self.config.event_domain
            );
            return;
        }
        self.hub.publish(Notification::DeviceCall(call)).await;
    }

    // ── Availability ─────────────────────────────────────────────

    /// Record connectivity and push the projection. Entities are only
    /// nudged when going unavailable; on reconnect they wait for fresh
    /// state pushes instead.
    async fn set_available(&self, available: bool) {
        let was = self.available.swap(available, Ordering::AcqRel);
        self.hub
            .publish(Notification::DeviceUpdated {
                available: self.entity_available(),
            })
            .await;

        if was && !available {
            for descriptor in self.snapshot.all_descriptors() {
                self.hub
                    .publish(Notification::EntityUpdated {
                        kind: descriptor.kind,
                        key: descriptor.key,
                        cause: UpdateCause::Availability,
                    })
                    .await;
            }
        }
    }

    /// Whether entity state should be trusted right now: connected, or the
    /// device sleeps by design.
    pub fn entity_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
            || self
                .device_info
                .load()
                .as_ref()
                .is_some_and(|i| i.has_deep_sleep)
    }

    pub fn is_connected(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    // ── Reads for entity objects ─────────────────────────────────

    pub fn id(&self) -> &SessionId {
        &self.config.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn snapshot(&self) -> &Arc<CapabilitySnapshot> {
        &self.snapshot
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn device_info(&self) -> Option<Arc<DeviceInfo>> {
        self.device_info.load_full()
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        self.hub.subscribe(topic)
    }

    pub fn descriptor(&self, kind: EntityKind, key: EntityKey) -> Option<Arc<EntityDescriptor>> {
        self.snapshot.descriptor(kind, key)
    }

    /// Last reading, with NaN reported as no value.
    pub fn reading(&self, kind: EntityKind, key: EntityKey) -> Option<StateValue> {
        self.snapshot
            .state(kind, key)
            .and_then(|s| s.reading().cloned())
    }

    pub fn has_state(&self, kind: EntityKind, key: EntityKey) -> bool {
        self.snapshot.state(kind, key).is_some()
    }

    pub fn unique_id(&self, kind: EntityKind, key: EntityKey) -> Option<String> {
        self.descriptor(kind, key)
            .and_then(|d| d.unique_id().map(str::to_owned))
    }

    pub fn enabled_by_default(&self, kind: EntityKind, key: EntityKey) -> Option<bool> {
        self.descriptor(kind, key).map(|d| d.enabled_by_default())
    }

    // ── Actions ──────────────────────────────────────────────────

    pub async fn execute_action(
        &self,
        name: &str,
        args: Map<String, Value>,
    ) -> Result<(), CoreError> {
        self.actions.execute(name, args).await
    }

    /// Re-run action sync against `incoming`, e.g. from a host-side refresh.
    pub async fn sync_actions(&self, incoming: Vec<RemoteAction>) -> ActionDiff {
        let info = self.device_info.load_full();
        self.actions.reconcile_actions(info.as_deref(), incoming).await
    }

    pub fn reconciler(&self) -> &CapabilityReconciler {
        &self.reconciler
    }
}

async fn run_callbacks(callbacks: &Mutex<Vec<Callback>>) {
    let pending = std::mem::take(&mut *callbacks.lock().await);
    for callback in pending {
        callback();
    }
}

// ── Supervisor hooks ─────────────────────────────────────────────────

#[async_trait]
impl SessionHooks for Session {
    fn is_active(&self) -> bool {
        self.attached.load(Ordering::Acquire) && !self.disabled.load(Ordering::Acquire)
    }

    fn device_name(&self) -> Option<String> {
        self.device_info.load().as_ref().map(|i| i.name.clone())
    }

    async fn on_connected(&self) {
        match self.login().await {
            Ok(()) => info!(session = %self.config.id, "login sequence complete"),
            Err(e) if e.is_credentials_failure() => {
                warn!(session = %self.config.id, error = %e, "credentials rejected during login");
                self.hub
                    .publish(Notification::ReauthRequired {
                        reason: e.to_string(),
                    })
                    .await;
                self.client.disconnect().await;
            }
            Err(e) => {
                warn!(session = %self.config.id, error = %e, "error during login, disconnecting");
                self.client.disconnect().await;
            }
        }
    }

    async fn on_disconnected(&self) {
        run_callbacks(&self.disconnect_callbacks).await;
        self.set_available(false).await;
    }

    async fn credentials_invalid(&self, error: ClientError) {
        self.hub
            .publish(Notification::ReauthRequired {
                reason: error.to_string(),
            })
            .await;
    }
}
