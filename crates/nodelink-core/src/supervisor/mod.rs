// ── Connection supervisor ──
//
// Keeps one logical session connected across transport drops. A single
// long-lived loop waits on a level-triggered wake and runs one connect
// attempt per wake. Failures schedule exactly one cancellable retry
// timer with exponential backoff; passive discovery can preempt it.
//
// Exclusion domains:
//   - `conn`  : attempt counter, pending timer, and writes to `state`
//   - `discovery`'s own mutex : listener registration
// Neither lock is held while the other is acquired.

mod backoff;
mod wake;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use backoff::Backoff;
pub(crate) use wake::WakeSignal;

use crate::client::{ClientError, ConnectionLossHook, SessionClient};
use crate::config::{DiscoveryConfig, SessionConfig};
use crate::discovery::{
    DiscoverySource, DiscoveryWatcher, RecordListener, RecordUpdate, announces_alias,
};
use crate::model::SessionId;

// ── Public types ─────────────────────────────────────────────────────

/// Observable connection state of a supervised session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// An attempt is in flight. `attempt` is 1-based since the last success.
    Connecting { attempt: u32 },
    /// The last attempt failed; a retry timer is pending.
    AwaitingRetry { attempt: u32, delay: Duration },
    Connected,
    /// The device refused the credentials. No retries until
    /// [`ConnectionSupervisor::trigger_reconnect`].
    CredentialsRejected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Callbacks from the supervisor into the session that owns it.
#[async_trait]
pub trait SessionHooks: Send + Sync + 'static {
    /// Whether the session is still registered and enabled.
    fn is_active(&self) -> bool;

    /// Device name if known, used to build the discovery alias.
    fn device_name(&self) -> Option<String>;

    /// Run the login sequence. Spawned; never awaited by the loop.
    async fn on_connected(&self);

    /// The established connection dropped.
    async fn on_disconnected(&self);

    /// The device rejected the configured credentials.
    async fn credentials_invalid(&self, error: ClientError);
}

// ── Internal state ───────────────────────────────────────────────────

struct WaitTimer {
    id: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl WaitTimer {
    fn cancel(self) {
        self.token.cancel();
        self.handle.abort();
    }
}

#[derive(Default)]
struct ConnState {
    tries: u32,
    timer: Option<WaitTimer>,
    next_timer_id: u64,
}

struct SupervisorInner {
    session: SessionId,
    host: String,
    client: Arc<dyn SessionClient>,
    hooks: Weak<dyn SessionHooks>,
    backoff: Backoff,
    discovery_config: DiscoveryConfig,

    conn: Mutex<ConnState>,
    /// Written only while `conn` is held; read lock-free.
    state: watch::Sender<ConnectionState>,
    wake: WakeSignal,
    discovery: DiscoveryWatcher,

    started: AtomicBool,
    cancel: CancellationToken,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

/// Forwards discovery batches to the supervisor without keeping it alive.
struct DiscoveryBridge {
    inner: Weak<SupervisorInner>,
}

impl RecordListener for DiscoveryBridge {
    fn on_records(&self, records: &[RecordUpdate]) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_discovery_records(records);
        }
    }
}

// ── ConnectionSupervisor ─────────────────────────────────────────────

/// Reconnect state machine for one device session.
///
/// Cheaply cloneable. Call [`start`](Self::start) once; call
/// [`stop`](Self::stop) before dropping the session, since the loop task
/// holds a reference until cancelled.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<SupervisorInner>,
}

impl ConnectionSupervisor {
    pub fn new(
        config: &SessionConfig,
        client: Arc<dyn SessionClient>,
        hooks: Weak<dyn SessionHooks>,
        discovery_source: Option<Arc<dyn DiscoverySource>>,
    ) -> Self {
        let source = discovery_source.filter(|_| config.discovery.enabled);
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let inner = Arc::new_cyclic(|weak: &Weak<SupervisorInner>| {
            let bridge: Arc<dyn RecordListener> = Arc::new(DiscoveryBridge {
                inner: weak.clone(),
            });
            SupervisorInner {
                session: config.id.clone(),
                host: config.host.clone(),
                client,
                hooks,
                backoff: config.backoff.clone(),
                discovery_config: config.discovery.clone(),
                conn: Mutex::new(ConnState::default()),
                state,
                wake: WakeSignal::new(),
                discovery: DiscoveryWatcher::new(source, bridge),
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                loop_task: Mutex::new(None),
            }
        });

        Self { inner }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the supervising loop and request an immediate attempt.
    /// Later calls are no-ops.
    pub async fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let handle = tokio::spawn(Arc::clone(&self.inner).run());
        *self.inner.loop_task.lock().await = Some(handle);

        {
            let _conn = self.inner.conn.lock().await;
            self.inner.state.send_replace(ConnectionState::Disconnected);
        }
        self.inner.wake.set();
        debug!(session = %self.inner.session, "supervisor started");
    }

    /// End the loop, cancel any pending retry, and stop listening for
    /// discovery records for good. The client connection is left alone.
    ///
    /// An in-flight connect runs to completion on its own task and closes
    /// the link if it succeeded.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        if let Some(handle) = self.inner.loop_task.lock().await.take() {
            handle.abort();
        }

        if let Some(timer) = self.inner.conn.lock().await.timer.take() {
            timer.cancel();
        }
        self.inner.discovery.close().await;
        debug!(session = %self.inner.session, "supervisor stopped");
    }

    /// Request an attempt now, clearing a credentials rejection.
    pub async fn trigger_reconnect(&self) {
        {
            let mut conn = self.inner.conn.lock().await;
            if *self.inner.state.borrow() == ConnectionState::CredentialsRejected {
                conn.tries = 0;
                self.inner.state.send_replace(ConnectionState::Disconnected);
            }
        }
        self.inner.wake.set();
    }

    /// Feed a batch of discovery records, as a [`DiscoverySource`] would.
    pub fn on_discovery_records(&self, records: &[RecordUpdate]) {
        self.inner.on_discovery_records(records);
    }

    // ── Observers ────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Consecutive failed attempts since the last success.
    pub async fn tries(&self) -> u32 {
        self.inner.conn.lock().await.tries
    }

    pub async fn has_pending_retry(&self) -> bool {
        self.inner.conn.lock().await.timer.is_some()
    }

    pub async fn is_discovery_listening(&self) -> bool {
        self.inner.discovery.is_listening().await
    }
}

// ── Loop internals ───────────────────────────────────────────────────

impl SupervisorInner {
    async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = self.wake.wait_and_clear() => {}
            }

            // Own task, so aborting the loop never drops a connect midway.
            let attempt = tokio::spawn({
                let this = Arc::clone(&self);
                async move {
                    AssertUnwindSafe(this.reconnect_once())
                        .catch_unwind()
                        .await
                        .is_ok()
                }
            });
            if !matches!(attempt.await, Ok(true)) {
                error!(session = %self.session, "caught panic while reconnecting");
                // Keep the machine moving rather than stalling in Connecting.
                self.schedule_retry().await;
            }
        }
        debug!(session = %self.session, "reconnect loop exited");
    }

    fn hooks(&self) -> Option<Arc<dyn SessionHooks>> {
        self.hooks.upgrade()
    }

    fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && self.hooks().is_some_and(|h| h.is_active())
    }

    async fn reconnect_once(self: &Arc<Self>) {
        let state = *self.state.borrow();
        if matches!(
            state,
            ConnectionState::Connected | ConnectionState::CredentialsRejected
        ) {
            return;
        }
        if !self.is_active() {
            debug!(session = %self.session, "session inactive, not reconnecting");
            return;
        }
        self.try_connect().await;
    }

    async fn try_connect(self: &Arc<Self>) {
        let (previous_tries, attempt) = {
            let mut conn = self.conn.lock().await;
            if let Some(timer) = conn.timer.take() {
                debug!(session = %self.session, "pending retry preempted");
                timer.cancel();
            }
            let previous = conn.tries;
            conn.tries = conn.tries.saturating_add(1);
            self.state
                .send_replace(ConnectionState::Connecting { attempt: conn.tries });
            (previous, conn.tries)
        };

        debug!(session = %self.session, host = %self.host, attempt, "connecting");
        let result = self.client.connect(self.loss_hook()).await;

        if !self.is_active() {
            if result.is_ok() {
                debug!(session = %self.session, "session went away mid-connect, closing");
                self.client.disconnect().await;
            }
            return;
        }

        match result {
            Ok(()) => self.on_connect_success().await,
            Err(err) if err.is_credentials_failure() => self.on_credentials_rejected(err).await,
            Err(err) => {
                if previous_tries == 0 {
                    warn!(session = %self.session, host = %self.host, error = %err, "can't connect to device");
                } else {
                    debug!(session = %self.session, host = %self.host, error = %err, attempt, "can't connect to device");
                }
                self.discovery.start().await;
                self.schedule_retry().await;
            }
        }
    }

    async fn on_connect_success(self: &Arc<Self>) {
        {
            let mut conn = self.conn.lock().await;
            conn.tries = 0;
            if let Some(timer) = conn.timer.take() {
                timer.cancel();
            }
            self.state.send_replace(ConnectionState::Connected);
        }
        self.discovery.stop().await;
        info!(session = %self.session, host = %self.host, "connected");

        if let Some(hooks) = self.hooks() {
            tokio::spawn(async move { hooks.on_connected().await });
        }
    }

    async fn on_credentials_rejected(&self, err: ClientError) {
        {
            let _conn = self.conn.lock().await;
            self.state.send_replace(ConnectionState::CredentialsRejected);
        }
        self.discovery.stop().await;
        warn!(session = %self.session, host = %self.host, error = %err, "device rejected credentials");

        if let Some(hooks) = self.hooks() {
            hooks.credentials_invalid(err).await;
        }
    }

    /// Arm the retry timer for the current attempt count. A no-op while
    /// one is already pending.
    async fn schedule_retry(self: &Arc<Self>) {
        let mut conn = self.conn.lock().await;
        if self.cancel.is_cancelled() {
            return;
        }
        if conn.timer.is_some() {
            debug!(session = %self.session, "retry already scheduled");
            return;
        }

        let delay = self.backoff.delay_for(conn.tries);
        conn.next_timer_id += 1;
        let id = conn.next_timer_id;
        let token = self.cancel.child_token();
        let handle = self.spawn_timer(id, token.clone(), delay);
        conn.timer = Some(WaitTimer { id, token, handle });
        self.state.send_replace(ConnectionState::AwaitingRetry {
            attempt: conn.tries,
            delay,
        });
        debug!(session = %self.session, delay_secs = delay.as_secs(), "retry scheduled");
    }

    fn spawn_timer(
        self: &Arc<Self>,
        id: u64,
        token: CancellationToken,
        delay: Duration,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Whoever clears the slot first wins: the timer here, or a
            // preempting attempt / stop() that took it under the same lock.
            let fired = {
                let mut conn = inner.conn.lock().await;
                if conn.timer.as_ref().is_some_and(|t| t.id == id) {
                    conn.timer = None;
                    true
                } else {
                    false
                }
            };
            if fired {
                inner.wake.set();
            }
        })
    }

    fn loss_hook(self: &Arc<Self>) -> ConnectionLossHook {
        let weak = Arc::downgrade(self);
        let runtime = tokio::runtime::Handle::current();
        ConnectionLossHook::new(move || {
            runtime.spawn(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_disconnect().await;
                }
            });
        })
    }

    /// Runs even for inactive sessions so their cleanup still happens;
    /// the loop re-checks activity before the next attempt.
    async fn handle_disconnect(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            debug!(session = %self.session, "ignoring disconnect after stop");
            return;
        }
        info!(session = %self.session, host = %self.host, "disconnected");

        if let Some(hooks) = self.hooks() {
            hooks.on_disconnected().await;
        }
        {
            let mut conn = self.conn.lock().await;
            // stop() may have run while the hook was pending.
            if self.cancel.is_cancelled() {
                debug!(session = %self.session, "stopped during disconnect handling");
                return;
            }
            conn.tries = 0;
            self.state.send_replace(ConnectionState::Disconnected);
        }
        self.discovery.start().await;
        self.wake.set();
    }

    fn on_discovery_records(&self, records: &[RecordUpdate]) {
        let state = *self.state.borrow();
        if matches!(
            state,
            ConnectionState::Connected | ConnectionState::CredentialsRejected
        ) || self.wake.is_set()
        {
            return;
        }
        let Some(name) = self.hooks().and_then(|h| h.device_name()) else {
            return;
        };
        let alias = self.discovery_config.alias_for(&name);
        if announces_alias(records, &alias) {
            debug!(session = %self.session, %alias, "device announced itself, retrying now");
            self.wake.set();
        }
    }
}
