#![allow(dead_code, clippy::unwrap_used)]
// Shared fakes for the integration tests: a scripted `SessionClient`, a
// hand-driven discovery source, and an action surface that records calls.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::Instant;

use nodelink_core::{
    ActionKey, ActionSurface, Capabilities, ClientError, ConnectionLossHook, DeviceActionCall,
    DeviceInfo, DiscoverySource, EntityDescriptor, EntityKind, EntityState, HostState,
    HostStateRequest, HostStateSource, ListenerToken, RecordListener, RecordUpdate, RegisteredAction, RemoteAction, SessionClient, SessionHooks,
};

// ── Helpers ─────────────────────────────────────────────────────────

/// Let spawned tasks run. Advances paused time by a negligible amount.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub fn refused() -> ClientError {
    ClientError::Connection {
        host: "10.0.0.40".into(),
        reason: "connection refused".into(),
    }
}

pub fn sensors(keys: &[u32]) -> Vec<EntityDescriptor> {
    keys.iter()
        .map(|k| EntityDescriptor::new(EntityKind::Sensor, *k, format!("Sensor {k}")))
        .collect()
}

// ── MockClient ──────────────────────────────────────────────────────

pub struct MockClient {
    script: Mutex<VecDeque<Result<(), ClientError>>>,
    fallback: Mutex<Result<(), ClientError>>,
    panic_next: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
    connects: Mutex<Vec<Instant>>,
    hook: Mutex<Option<ConnectionLossHook>>,
    disconnects: AtomicUsize,

    device_info: Mutex<Result<DeviceInfo, ClientError>>,
    capabilities: Mutex<Capabilities>,
    state_tx: Mutex<Option<mpsc::Sender<EntityState>>>,
    call_tx: Mutex<Option<mpsc::Sender<DeviceActionCall>>>,
    request_tx: Mutex<Option<mpsc::Sender<HostStateRequest>>>,
    host_states_sent: Mutex<Vec<(String, Option<String>, String)>>,
    executed: Mutex<Vec<(ActionKey, Map<String, Value>)>>,
}

impl MockClient {
    /// Connects succeed unless scripted otherwise.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(())),
            panic_next: AtomicBool::new(false),
            gate: Mutex::new(None),
            connects: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
            disconnects: AtomicUsize::new(0),
            device_info: Mutex::new(Ok(DeviceInfo::new("porch-light", "AA:BB:CC:DD:EE:01"))),
            capabilities: Mutex::new(Capabilities::default()),
            state_tx: Mutex::new(None),
            call_tx: Mutex::new(None),
            request_tx: Mutex::new(None),
            host_states_sent: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
        })
    }

    /// Connects fail with `err` unless scripted otherwise.
    pub fn unreachable(err: ClientError) -> Arc<Self> {
        let client = Self::new();
        client.set_fallback(Err(err));
        client
    }

    pub fn push_connect(&self, result: Result<(), ClientError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn set_fallback(&self, result: Result<(), ClientError>) {
        *self.fallback.lock().unwrap() = result;
    }

    pub fn panic_on_next_connect(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    /// The next connect blocks until the returned gate is notified.
    pub fn hold_next_connect(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn set_device_info(&self, info: DeviceInfo) {
        *self.device_info.lock().unwrap() = Ok(info);
    }

    pub fn set_capabilities(&self, entities: Vec<EntityDescriptor>, actions: Vec<RemoteAction>) {
        *self.capabilities.lock().unwrap() = Capabilities { entities, actions };
    }

    pub fn executed(&self) -> Vec<(ActionKey, Map<String, Value>)> {
        self.executed.lock().unwrap().clone()
    }

    /// Simulate the link dropping.
    pub fn drop_connection(&self) {
        self.state_tx.lock().unwrap().take();
        self.call_tx.lock().unwrap().take();
        self.request_tx.lock().unwrap().take();
        if let Some(hook) = self.hook.lock().unwrap().take() {
            hook.fire();
        }
    }

    pub async fn push_state(&self, state: EntityState) {
        let tx = self.state_tx.lock().unwrap().clone().unwrap();
        tx.send(state).await.unwrap();
    }

    pub async fn push_call(&self, call: DeviceActionCall) {
        let tx = self.call_tx.lock().unwrap().clone().unwrap();
        tx.send(call).await.unwrap();
    }

    pub async fn request_host_state(&self, request: HostStateRequest) {
        let tx = self.request_tx.lock().unwrap().clone().unwrap();
        tx.send(request).await.unwrap();
    }

    /// `(entity_id, attribute, state)` in send order.
    pub fn host_states_sent(&self) -> Vec<(String, Option<String>, String)> {
        self.host_states_sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionClient for MockClient {
    async fn connect(&self, on_loss: ConnectionLossHook) -> Result<(), ClientError> {
        self.connects.lock().unwrap().push(Instant::now());
        assert!(
            !self.panic_next.swap(false, Ordering::SeqCst),
            "scripted connect panic"
        );
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let result = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone());
        if result.is_ok() {
            *self.hook.lock().unwrap() = Some(on_loss);
        }
        result
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.drop_connection();
    }

    async fn device_info(&self) -> Result<DeviceInfo, ClientError> {
        self.device_info.lock().unwrap().clone()
    }

    async fn list_capabilities(&self) -> Result<Capabilities, ClientError> {
        Ok(self.capabilities.lock().unwrap().clone())
    }

    async fn subscribe_states(&self, tx: mpsc::Sender<EntityState>) -> Result<(), ClientError> {
        *self.state_tx.lock().unwrap() = Some(tx);
        Ok(())
    }

    async fn subscribe_action_calls(
        &self,
        tx: mpsc::Sender<DeviceActionCall>,
    ) -> Result<(), ClientError> {
        *self.call_tx.lock().unwrap() = Some(tx);
        Ok(())
    }

    async fn execute_action(
        &self,
        key: ActionKey,
        args: Map<String, Value>,
    ) -> Result<(), ClientError> {
        self.executed.lock().unwrap().push((key, args));
        Ok(())
    }

    async fn subscribe_state_requests(
        &self,
        tx: mpsc::Sender<HostStateRequest>,
    ) -> Result<(), ClientError> {
        *self.request_tx.lock().unwrap() = Some(tx);
        Ok(())
    }

    async fn send_host_state(
        &self,
        entity_id: &str,
        attribute: Option<&str>,
        state: &str,
    ) -> Result<(), ClientError> {
        if self.hook.lock().unwrap().is_none() {
            return Err(ClientError::NotConnected);
        }
        self.host_states_sent.lock().unwrap().push((
            entity_id.to_owned(),
            attribute.map(str::to_owned),
            state.to_owned(),
        ));
        Ok(())
    }
}

// ── MockHostStates ──────────────────────────────────────────────────

/// Host entity states, set by hand.
#[derive(Default)]
pub struct MockHostStates {
    entities: Mutex<HashMap<String, watch::Sender<Option<HostState>>>>,
}

impl MockHostStates {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish `state`, even if it equals the current one.
    pub fn set(&self, entity_id: &str, state: HostState) {
        self.with_sender(entity_id, |tx| {
            tx.send_replace(Some(state));
        });
    }

    fn with_sender<R>(
        &self,
        entity_id: &str,
        f: impl FnOnce(&watch::Sender<Option<HostState>>) -> R,
    ) -> R {
        let mut entities = self.entities.lock().unwrap();
        let tx = entities
            .entry(entity_id.to_owned())
            .or_insert_with(|| watch::channel(None).0);
        f(tx)
    }
}

impl HostStateSource for MockHostStates {
    fn watch(&self, entity_id: &str) -> watch::Receiver<Option<HostState>> {
        self.with_sender(entity_id, watch::Sender::subscribe)
    }
}

// ── MockDiscovery ───────────────────────────────────────────────────

#[derive(Default)]
pub struct MockDiscovery {
    next: AtomicU64,
    listeners: Mutex<HashMap<u64, Arc<dyn RecordListener>>>,
}

impl MockDiscovery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Deliver `records` to every registered listener.
    pub fn announce(&self, records: &[RecordUpdate]) {
        let listeners: Vec<_> = self.listeners.lock().unwrap().values().cloned().collect();
        for listener in listeners {
            listener.on_records(records);
        }
    }
}

impl DiscoverySource for MockDiscovery {
    fn add_listener(&self, listener: Arc<dyn RecordListener>) -> ListenerToken {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().insert(id, listener);
        ListenerToken(id)
    }

    fn remove_listener(&self, token: ListenerToken) {
        self.listeners.lock().unwrap().remove(&token.0);
    }
}

// ── RecordingSurface ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Register(String),
    Unregister(String),
}

#[derive(Default)]
pub struct RecordingSurface {
    calls: Mutex<Vec<SurfaceCall>>,
    registered: Mutex<Vec<RegisteredAction>>,
}

impl RecordingSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<SurfaceCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    pub fn registered(&self) -> Vec<RegisteredAction> {
        self.registered.lock().unwrap().clone()
    }
}

impl ActionSurface for RecordingSurface {
    fn register(&self, action: RegisteredAction) {
        self.calls
            .lock()
            .unwrap()
            .push(SurfaceCall::Register(action.name.clone()));
        self.registered.lock().unwrap().push(action);
    }

    fn unregister(&self, name: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(SurfaceCall::Unregister(name.to_owned()));
        self.registered.lock().unwrap().retain(|a| a.name != name);
    }
}

// ── TestHooks ───────────────────────────────────────────────────────

/// Session stand-in for driving a supervisor on its own.
pub struct TestHooks {
    pub active: AtomicBool,
    pub name: Mutex<Option<String>>,
    pub connected: AtomicUsize,
    pub disconnected: AtomicUsize,
    pub rejected: AtomicUsize,
    /// How long `on_disconnected` takes.
    pub disconnect_delay: Mutex<Duration>,
}

impl TestHooks {
    pub fn new(name: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicBool::new(true),
            name: Mutex::new(name.map(str::to_owned)),
            connected: AtomicUsize::new(0),
            disconnected: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
            disconnect_delay: Mutex::new(Duration::ZERO),
        })
    }
}

#[async_trait]
impl SessionHooks for TestHooks {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn device_name(&self) -> Option<String> {
        self.name.lock().unwrap().clone()
    }

    async fn on_connected(&self) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_disconnected(&self) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
        let delay = *self.disconnect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn credentials_invalid(&self, _error: ClientError) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
    }
}
