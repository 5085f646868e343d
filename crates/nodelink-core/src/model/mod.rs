// ── Domain model ──
//
// Canonical types shared by the supervisor, reconciler, and action
// syncer. External clients translate their wire types into these.

pub mod action;
pub mod device;
pub mod entity;
pub mod session_id;
pub mod state;

pub use action::{ActionArg, ActionKey, ArgType, RemoteAction};
pub use device::{DeviceActionCall, DeviceInfo};
pub use entity::{EntityCategory, EntityDescriptor, EntityKey, EntityKind};
pub use session_id::SessionId;
pub use state::{EntityState, StateValue};
