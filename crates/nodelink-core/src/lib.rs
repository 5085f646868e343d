//! Session supervision and capability mirroring for networked embedded
//! devices.
//!
//! This crate keeps one logical session per device alive across an
//! unreliable link and keeps a local mirror of what the device exposes:
//!
//! - **[`ConnectionSupervisor`]**: Reconnect state machine. One long-lived
//!   loop waits on a level-triggered wake; failures arm a single cancellable
//!   retry timer with exponential [`Backoff`]; passive discovery records can
//!   preempt the timer when the device announces itself.
//!
//! - **[`CapabilitySnapshot`]**: Lock-free cache of entity descriptors
//!   (current and previous generation per kind), last-known states, and
//!   registered actions.
//!
//! - **[`CapabilityReconciler`]**: Applies full-replacement entity lists
//!   and state pushes, publishing removals before one addition batch.
//!
//! - **[`ActionSyncer`]**: Mirrors remote actions onto the host's
//!   [`ActionSurface`], treating schema changes as unregister + register.
//!
//! - **[`Session`] / [`SessionRegistry`]**: Composition: login sequence,
//!   push ingestion, availability projection, persistence checkpoints.
//!
//! The wire protocol stays outside: hosts implement [`SessionClient`],
//! [`DiscoverySource`], [`SnapshotStore`], [`ActionSurface`], and
//! optionally [`HostStateSource`].

pub mod actions;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod host_state;
pub mod model;
pub mod reconcile;
pub mod registry;
pub mod session;
pub mod store;
pub mod stream;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use actions::{ActionDiff, ActionSurface, ActionSyncer, ArgSchema, RegisteredAction};
pub use client::{Capabilities, ClientError, ConnectionLossHook, SessionClient};
pub use config::{Credentials, DiscoveryConfig, SessionConfig};
pub use discovery::{
    DiscoveryRecord, DiscoverySource, DiscoveryWatcher, ListenerToken, RecordListener,
    RecordUpdate,
};
pub use error::CoreError;
pub use host_state::{HostState, HostStateRequest, HostStateSource};
pub use reconcile::{CapabilityReconciler, ReconcileOutcome};
pub use registry::SessionRegistry;
pub use session::{Session, SessionParts};
pub use store::{CapabilitySnapshot, Generation, MemoryStore, PersistedSnapshot, SnapshotStore};
pub use stream::{Notification, SessionEvent, Subscription, Topic, UpdateCause};
pub use supervisor::{Backoff, ConnectionState, ConnectionSupervisor, SessionHooks};

pub use model::{
    ActionArg, ActionKey, ArgType, DeviceActionCall, DeviceInfo, EntityCategory,
    EntityDescriptor, EntityKey, EntityKind, EntityState, RemoteAction, SessionId, StateValue,
};
