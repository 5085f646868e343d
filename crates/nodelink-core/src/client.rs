// ── External session client ──
//
// The native protocol, framing, and encryption handshake live outside
// this crate. A host plugs in its protocol client by implementing
// `SessionClient`; the core only drives connect/disconnect, fetches the
// capability lists, and consumes push subscriptions.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::host_state::HostStateRequest;
use crate::model::{ActionKey, DeviceActionCall, DeviceInfo, EntityDescriptor, EntityState, RemoteAction};

/// Errors a [`SessionClient`] reports.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// TCP connect, handshake, or read failure.
    #[error("connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("connection to {host} timed out after {timeout_secs}s")]
    Timeout { host: String, timeout_secs: u64 },

    #[error("not connected")]
    NotConnected,

    /// Device runs encrypted transport but no key was configured.
    #[error("device requires an encryption key")]
    RequiresEncryption,

    #[error("invalid encryption key")]
    InvalidEncryptionKey,

    #[error("invalid password")]
    InvalidPassword,

    /// Device sent a payload the client could not decode.
    #[error("malformed {item}: {reason}")]
    Malformed { item: String, reason: String },
}

impl ClientError {
    pub fn is_credentials_failure(&self) -> bool {
        matches!(
            self,
            Self::RequiresEncryption | Self::InvalidEncryptionKey | Self::InvalidPassword
        )
    }
}

/// Callback the client fires exactly once when an established connection
/// is lost (including after an explicit [`SessionClient::disconnect`]).
pub struct ConnectionLossHook(Box<dyn FnOnce() + Send + 'static>);

impl ConnectionLossHook {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Consume the hook and notify the owner.
    pub fn fire(self) {
        (self.0)();
    }
}

impl std::fmt::Debug for ConnectionLossHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConnectionLossHook")
    }
}

/// Everything the device announces in one listing round trip.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub entities: Vec<EntityDescriptor>,
    pub actions: Vec<RemoteAction>,
}

/// Protocol client for a single device.
///
/// Push subscriptions hand the client a bounded channel sender; clients
/// must `send().await` so that a slow consumer back-pressures the
/// connection instead of dropping updates.
#[async_trait]
pub trait SessionClient: Send + Sync + 'static {
    /// Connect and log in. `on_loss` must be fired when the connection
    /// later drops; it is dropped unfired if this call fails.
    async fn connect(&self, on_loss: ConnectionLossHook) -> Result<(), ClientError>;

    /// Close the connection. Fires the loss hook if one is armed.
    async fn disconnect(&self);

    async fn device_info(&self) -> Result<DeviceInfo, ClientError>;

    async fn list_capabilities(&self) -> Result<Capabilities, ClientError>;

    async fn subscribe_states(&self, tx: mpsc::Sender<EntityState>) -> Result<(), ClientError>;

    async fn subscribe_action_calls(
        &self,
        tx: mpsc::Sender<DeviceActionCall>,
    ) -> Result<(), ClientError>;

    /// Invoke a remote action. `args` is forwarded verbatim.
    async fn execute_action(
        &self,
        key: ActionKey,
        args: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), ClientError>;

    /// Deliver the device's requests to mirror host state. Clients whose
    /// protocol has no such request keep the default, which never sends.
    async fn subscribe_state_requests(
        &self,
        tx: mpsc::Sender<HostStateRequest>,
    ) -> Result<(), ClientError> {
        drop(tx);
        Ok(())
    }

    /// Send one host state value (or attribute value) to the device.
    async fn send_host_state(
        &self,
        _entity_id: &str,
        _attribute: Option<&str>,
        _state: &str,
    ) -> Result<(), ClientError> {
        Err(ClientError::NotConnected)
    }
}
