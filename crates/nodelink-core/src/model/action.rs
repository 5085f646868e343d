// ── Remote actions ──
//
// User-defined callable actions a device exposes. Argument types arrive
// as raw wire codes so that a firmware newer than this crate cannot make
// deserialization fail; classification happens at registration time.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumIter};

/// Opaque device-assigned action key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionKey(pub u32);

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declared argument of a remote action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionArg {
    pub name: String,
    /// Raw type code as sent by the device. See [`ArgType`].
    pub type_code: u32,
}

impl ActionArg {
    pub fn new(name: impl Into<String>, arg_type: ArgType) -> Self {
        Self {
            name: name.into(),
            type_code: arg_type.code(),
        }
    }

    pub fn arg_type(&self) -> Option<ArgType> {
        ArgType::from_code(self.type_code)
    }
}

/// A callable action. Equality is structural: same key, name, and
/// argument schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteAction {
    pub key: ActionKey,
    pub name: String,
    #[serde(default)]
    pub args: Vec<ActionArg>,
}

/// Argument classification understood by the host surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ArgType {
    Bool,
    Int,
    Float,
    String,
    BoolArray,
    IntArray,
    FloatArray,
    StringArray,
}

impl ArgType {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Bool,
            1 => Self::Int,
            2 => Self::Float,
            3 => Self::String,
            4 => Self::BoolArray,
            5 => Self::IntArray,
            6 => Self::FloatArray,
            7 => Self::StringArray,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Bool => 0,
            Self::Int => 1,
            Self::Float => 2,
            Self::String => 3,
            Self::BoolArray => 4,
            Self::IntArray => 5,
            Self::FloatArray => 6,
            Self::StringArray => 7,
        }
    }

    pub fn is_array(self) -> bool {
        matches!(
            self,
            Self::BoolArray | Self::IntArray | Self::FloatArray | Self::StringArray
        )
    }

    /// Example value shown next to the field in the host UI.
    pub fn example(self) -> &'static str {
        match self {
            Self::Bool => "False",
            Self::Int => "42",
            Self::Float => "12.3",
            Self::String => "Example text",
            Self::BoolArray => "[True, False]",
            Self::IntArray => "[42, 34]",
            Self::FloatArray => "[ 12.3, 34.5 ]",
            Self::StringArray => "['Example text', 'Another example']",
        }
    }

    pub fn description(self) -> Option<&'static str> {
        match self {
            Self::BoolArray => Some("A list of boolean values."),
            Self::IntArray => Some("A list of integer values."),
            Self::FloatArray => Some("A list of floating point numbers."),
            Self::StringArray => Some("A list of strings."),
            _ => None,
        }
    }
}
