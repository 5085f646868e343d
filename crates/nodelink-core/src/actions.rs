// ── Remote action sync ──
//
// Mirrors the device's callable actions onto the host's invocation
// surface. Diffs by key with structural equality: a changed schema is an
// unregister followed by a register, never an in-place update.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::client::SessionClient;
use crate::error::CoreError;
use crate::model::{ActionKey, ArgType, DeviceInfo, RemoteAction};
use crate::store::CapabilitySnapshot;

// ── Surface types ────────────────────────────────────────────────────

/// Schema of one argument as presented to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSchema {
    pub name: String,
    pub arg_type: ArgType,
    pub required: bool,
    pub example: &'static str,
    pub description: Option<&'static str>,
}

/// An action ready to be exposed by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredAction {
    /// Host-side name, `{device}_{action}`.
    pub name: String,
    pub key: ActionKey,
    pub fields: Vec<ArgSchema>,
}

impl RegisteredAction {
    /// Classify every argument of `action`. Fails on the first unknown
    /// type code.
    pub fn build(device_prefix: &str, action: &RemoteAction) -> Result<Self, CoreError> {
        let fields = action
            .args
            .iter()
            .map(|arg| {
                let arg_type = arg.arg_type().ok_or_else(|| CoreError::MalformedRemoteData {
                    item: format!("action {}", action.name),
                    reason: format!("argument {} has unknown type {}", arg.name, arg.type_code),
                })?;
                Ok(ArgSchema {
                    name: arg.name.clone(),
                    arg_type,
                    required: true,
                    example: arg_type.example(),
                    description: arg_type.description(),
                })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;

        Ok(Self {
            name: service_name(device_prefix, &action.name),
            key: action.key,
            fields,
        })
    }
}

/// Host-side name for `action` on the device with `device_prefix`.
pub fn service_name(device_prefix: &str, action: &str) -> String {
    format!("{device_prefix}_{action}")
}

/// The host's command-invocation surface.
pub trait ActionSurface: Send + Sync + 'static {
    fn register(&self, action: RegisteredAction);
    fn unregister(&self, name: &str);
}

/// What one sync pass did, by host-side name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionDiff {
    pub unregistered: Vec<String>,
    pub registered: Vec<String>,
    pub rejected: Vec<String>,
}

impl ActionDiff {
    pub fn is_empty(&self) -> bool {
        self.unregistered.is_empty() && self.registered.is_empty() && self.rejected.is_empty()
    }
}

// ── ActionSyncer ─────────────────────────────────────────────────────

pub struct ActionSyncer {
    snapshot: Arc<CapabilitySnapshot>,
    client: Arc<dyn SessionClient>,
    surface: Arc<dyn ActionSurface>,
    /// Host-side name each registered key was exposed under.
    names: DashMap<ActionKey, String>,
    pass: Mutex<()>,
}

impl ActionSyncer {
    pub fn new(
        snapshot: Arc<CapabilitySnapshot>,
        client: Arc<dyn SessionClient>,
        surface: Arc<dyn ActionSurface>,
    ) -> Self {
        Self {
            snapshot,
            client,
            surface,
            names: DashMap::new(),
            pass: Mutex::new(()),
        }
    }

    /// Bring the registered set in line with `incoming`. Deferred (empty
    /// diff) until the device name is known.
    pub async fn reconcile_actions(
        &self,
        device_info: Option<&DeviceInfo>,
        incoming: Vec<RemoteAction>,
    ) -> ActionDiff {
        let _pass = self.pass.lock().await;
        let Some(info) = device_info else {
            debug!("device info unknown, deferring action sync");
            return ActionDiff::default();
        };
        let prefix = info.action_prefix();

        let mut pending: BTreeMap<ActionKey, RemoteAction> = BTreeMap::new();
        for action in incoming {
            if pending.contains_key(&action.key) {
                warn!(key = %action.key, name = %action.name, "duplicate action key, ignoring repeat");
                continue;
            }
            pending.insert(action.key, action);
        }

        let mut diff = ActionDiff::default();

        for old in self.snapshot.actions() {
            if pending.get(&old.key).is_some_and(|new| *new == *old) {
                pending.remove(&old.key);
                continue;
            }
            let name = self
                .names
                .remove(&old.key)
                .map_or_else(|| service_name(&prefix, &old.name), |(_, n)| n);
            self.snapshot.actions.remove(&old.key);
            self.surface.unregister(&name);
            diff.unregistered.push(name);
        }

        for action in pending.into_values() {
            match RegisteredAction::build(&prefix, &action) {
                Ok(registered) => {
                    let name = registered.name.clone();
                    self.surface.register(registered);
                    self.names.insert(action.key, name.clone());
                    self.snapshot.actions.insert(action.key, Arc::new(action));
                    diff.registered.push(name);
                }
                Err(e) => {
                    error!(action = %action.name, error = %e, "can't register action");
                    diff.rejected.push(service_name(&prefix, &action.name));
                }
            }
        }

        if !diff.is_empty() {
            debug!(
                registered = diff.registered.len(),
                unregistered = diff.unregistered.len(),
                rejected = diff.rejected.len(),
                "actions synced"
            );
        }
        diff
    }

    /// Unregister everything this syncer exposed.
    pub async fn clear(&self) -> Vec<String> {
        let _pass = self.pass.lock().await;
        let mut removed: Vec<(ActionKey, String)> = self
            .names
            .iter()
            .map(|r| (*r.key(), r.value().clone()))
            .collect();
        removed.sort();
        for (key, name) in &removed {
            self.names.remove(key);
            self.snapshot.actions.remove(key);
            self.surface.unregister(name);
        }
        removed.into_iter().map(|(_, name)| name).collect()
    }

    /// Key of the action exposed as `name`, if registered.
    pub fn key_for(&self, name: &str) -> Option<ActionKey> {
        self.names
            .iter()
            .find(|r| r.value() == name)
            .map(|r| *r.key())
    }

    /// Forward `args` verbatim to the device action exposed as `name`.
    pub async fn execute(&self, name: &str, args: Map<String, Value>) -> Result<(), CoreError> {
        let key = self.key_for(name).ok_or_else(|| CoreError::ActionNotFound {
            name: name.to_owned(),
        })?;
        self.client
            .execute_action(key, args)
            .await
            .map_err(CoreError::from)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::ActionArg;

    #[test]
    fn schema_carries_examples_and_array_descriptions() {
        let action = RemoteAction {
            key: ActionKey(1),
            name: "set_levels".into(),
            args: vec![
                ActionArg::new("level", ArgType::Int),
                ActionArg::new("levels", ArgType::IntArray),
            ],
        };
        let reg = RegisteredAction::build("living_room", &action).unwrap();
        assert_eq!(reg.name, "living_room_set_levels");
        assert_eq!(reg.fields[0].example, "42");
        assert_eq!(reg.fields[0].description, None);
        assert_eq!(reg.fields[1].description, Some("A list of integer values."));
        assert!(reg.fields.iter().all(|f| f.required));
    }

    #[test]
    fn unknown_arg_type_rejects_action() {
        let action = RemoteAction {
            key: ActionKey(2),
            name: "odd".into(),
            args: vec![ActionArg {
                name: "x".into(),
                type_code: 42,
            }],
        };
        let err = RegisteredAction::build("dev", &action).unwrap_err();
        assert!(matches!(err, CoreError::MalformedRemoteData { .. }));
    }
}
