// ── Entity descriptors ──
//
// Static metadata a device reports for every entity it exposes.
// Identity is the (kind, key) pair; everything else may change between
// announcements without the entity being torn down.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Component kind of an entity (the "platform" it belongs to).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
    BinarySensor,
    Button,
    Camera,
    Climate,
    Cover,
    Fan,
    Light,
    Lock,
    MediaPlayer,
    Number,
    Select,
    Sensor,
    Switch,
    TextSensor,
}

/// Device-assigned integer key, unique within one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(pub u32);

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for EntityKey {
    fn from(k: u32) -> Self {
        Self(k)
    }
}

/// How the host should categorise a non-primary entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityCategory {
    Config,
    Diagnostic,
}

/// Immutable description of one remote entity.
///
/// Reconciliation never mutates a descriptor in place: a changed
/// announcement replaces the `Arc` held by the current generation, and
/// consumers re-read it on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub kind: EntityKind,
    pub key: EntityKey,
    pub object_id: String,
    pub name: String,
    #[serde(default)]
    pub unique_id: String,
    #[serde(default)]
    pub disabled_by_default: bool,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub entity_category: Option<EntityCategory>,
    /// Kind-specific static fields (unit, device class, option lists, ...).
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl EntityDescriptor {
    pub fn new(kind: EntityKind, key: impl Into<EntityKey>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind,
            key: key.into(),
            object_id: name.to_lowercase().replace(' ', "_"),
            unique_id: String::new(),
            name,
            disabled_by_default: false,
            icon: None,
            entity_category: None,
            attributes: serde_json::Map::new(),
        }
    }

    pub fn identity(&self) -> (EntityKind, EntityKey) {
        (self.kind, self.key)
    }

    /// Unique id, or `None` when the device left it blank.
    pub fn unique_id(&self) -> Option<&str> {
        (!self.unique_id.is_empty()).then_some(self.unique_id.as_str())
    }

    pub fn enabled_by_default(&self) -> bool {
        !self.disabled_by_default
    }
}
