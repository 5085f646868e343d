// ── Core error types ──
//
// The core's failure taxonomy. External clients report `ClientError`;
// the `From<ClientError>` impl folds those into the four classes the
// supervisor and reconciler act on (network, auth, malformed, invariant)
// plus the session-management errors callers can see.

use thiserror::Error;

use crate::client::ClientError;
use crate::model::SessionId;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach device at {host}: {reason}")]
    Network { host: String, reason: String },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Device disconnected")]
    Disconnected,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Malformed data from device ({item}): {reason}")]
    MalformedRemoteData { item: String, reason: String },

    #[error("Internal invariant violated: {message}")]
    InvariantViolation { message: String },

    // ── Session errors ───────────────────────────────────────────────
    #[error("Session {id} is already loaded")]
    SessionAlreadyLoaded { id: SessionId },

    #[error("Session not found: {id}")]
    SessionNotFound { id: SessionId },

    #[error("Action not found: {name}")]
    ActionNotFound { name: String },

    // ── Storage / configuration ──────────────────────────────────────
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Returns `true` if the failure means the configured credentials are
    /// wrong and retrying with them is pointless.
    pub fn is_credentials_failure(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if backing off and retrying may resolve the failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Disconnected)
    }
}

// ── Conversion from client errors ────────────────────────────────────

impl From<ClientError> for CoreError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Connection { host, reason } => CoreError::Network { host, reason },
            ClientError::Timeout { host, timeout_secs } => CoreError::Network {
                host,
                reason: format!("timed out after {timeout_secs}s"),
            },
            ClientError::NotConnected => CoreError::Disconnected,
            ClientError::RequiresEncryption => CoreError::Authentication {
                message: "device requires an encryption key".into(),
            },
            ClientError::InvalidEncryptionKey => CoreError::Authentication {
                message: "encryption key rejected by device".into(),
            },
            ClientError::InvalidPassword => CoreError::Authentication {
                message: "password rejected by device".into(),
            },
            ClientError::Malformed { item, reason } => {
                CoreError::MalformedRemoteData { item, reason }
            }
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Storage {
            message: err.to_string(),
        }
    }
}
