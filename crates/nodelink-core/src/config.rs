// ── Runtime session configuration ──
//
// These types describe *how* to supervise one device session. They carry
// credential data and tuning knobs, but never touch disk. Hosts (or
// `nodelink-config`) construct a `SessionConfig` and hand it in.

use secrecy::SecretString;

use crate::model::SessionId;
use crate::supervisor::Backoff;

/// mDNS service type ESPHome-compatible nodes advertise under.
pub const DEFAULT_SERVICE_TYPE: &str = "_esphomelib._tcp.local.";

/// Domain under which device-originated events are accepted.
pub const DEFAULT_EVENT_DOMAIN: &str = "esphome";

/// Secrets the host's protocol client needs to log in.
///
/// The core never uses these itself; they travel with the session so the
/// host can rebuild a client after a re-authentication request.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Legacy API password (empty when the node has none).
    pub password: Option<SecretString>,
    /// Base64 pre-shared key for the encrypted transport.
    pub encryption_key: Option<SecretString>,
}

/// Passive discovery tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Listen for announcements while disconnected.
    pub enabled: bool,
    /// Service type suffix appended to the device name to form the alias.
    pub service_type: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_type: DEFAULT_SERVICE_TYPE.into(),
        }
    }
}

impl DiscoveryConfig {
    /// Pointer alias a device named `device_name` advertises.
    pub fn alias_for(&self, device_name: &str) -> String {
        format!("{device_name}.{}", self.service_type)
    }
}

/// Configuration for supervising a single device session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub id: SessionId,
    /// Host or IP, used for logging and error context.
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub backoff: Backoff,
    pub discovery: DiscoveryConfig,
    pub event_domain: String,
    /// Capacity of the state/call ingest channels handed to the client.
    pub ingest_buffer: usize,
}

impl SessionConfig {
    pub fn new(id: impl Into<SessionId>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id: SessionId::random(),
            host: "localhost".into(),
            port: 6053,
            credentials: Credentials::default(),
            backoff: Backoff::default(),
            discovery: DiscoveryConfig::default(),
            event_domain: DEFAULT_EVENT_DOMAIN.into(),
            ingest_buffer: 64,
        }
    }
}
