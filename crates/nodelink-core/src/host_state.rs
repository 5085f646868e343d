// ── Host state forwarding ──
//
// Devices can ask to mirror host-side entity state (e.g. "sun.sun", or a
// single attribute of it). The host exposes its states through a
// `HostStateSource`; the session forwards the current value once and then
// only values that differ from the last one sent, until the link drops.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::SessionClient;
use crate::model::SessionId;

/// A device's request to track one host entity, or one of its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStateRequest {
    pub entity_id: String,
    #[serde(default)]
    pub attribute: Option<String>,
}

impl HostStateRequest {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            attribute: None,
        }
    }

    pub fn attribute(entity_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            attribute: Some(attribute.into()),
        }
    }
}

/// One host entity's state as the host sees it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostState {
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl HostState {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            attributes: Map::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// The string a device receives for this state. Devices only
    /// understand `on`/`off` for booleans. `None` when the requested
    /// attribute is absent.
    pub fn forwarded_value(&self, attribute: Option<&str>) -> Option<String> {
        let Some(attribute) = attribute else {
            return Some(self.state.clone());
        };
        let value = match self.attributes.get(attribute)? {
            Value::Bool(true) => "on".to_owned(),
            Value::Bool(false) => "off".to_owned(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Some(value)
    }
}

/// Host-side view of entity states.
///
/// The receiver yields `None` while the entity does not exist.
pub trait HostStateSource: Send + Sync + 'static {
    fn watch(&self, entity_id: &str) -> watch::Receiver<Option<HostState>>;
}

/// Push `request`'s value to the device until `cancel` fires or sending
/// fails. Repeats of the last sent value are skipped.
pub(crate) async fn forward_host_state(
    session: SessionId,
    client: Arc<dyn SessionClient>,
    request: HostStateRequest,
    mut states: watch::Receiver<Option<HostState>>,
    cancel: CancellationToken,
) {
    let attribute = request.attribute.as_deref();
    let mut last_sent: Option<String> = None;

    loop {
        let value = states
            .borrow_and_update()
            .as_ref()
            .and_then(|s| s.forwarded_value(attribute));

        if let Some(value) = value
            && last_sent.as_ref() != Some(&value)
        {
            if let Err(e) = client
                .send_host_state(&request.entity_id, attribute, &value)
                .await
            {
                debug!(%session, entity = %request.entity_id, error = %e, "stopped forwarding host state");
                return;
            }
            last_sent = Some(value);
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            changed = states.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
