// ── Entity state values ──
//
// Last-known readings pushed by the device. Storage is last-value-wins;
// the NaN sentinel is kept verbatim and only hidden on the read side.

use serde::{Deserialize, Serialize};

use super::entity::{EntityKey, EntityKind};

/// A single state reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StateValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl StateValue {
    /// `true` for the float "no reading" sentinel.
    pub fn is_nan(&self) -> bool {
        matches!(self, Self::Float(v) if v.is_nan())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric view of the value. NaN reads as `None`.
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) if v.is_nan() => None,
            Self::Float(v) => Some(*v),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A state push for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub kind: EntityKind,
    pub key: EntityKey,
    pub value: StateValue,
    /// Set by devices that report an entity before it has a reading.
    #[serde(default)]
    pub missing_state: bool,
}

impl EntityState {
    pub fn new(kind: EntityKind, key: impl Into<EntityKey>, value: StateValue) -> Self {
        Self {
            kind,
            key: key.into(),
            value,
            missing_state: false,
        }
    }

    /// The value as the host should see it: `None` when the device flagged
    /// the state as missing or sent the NaN sentinel.
    pub fn reading(&self) -> Option<&StateValue> {
        if self.missing_state || self.value.is_nan() {
            return None;
        }
        Some(&self.value)
    }
}
