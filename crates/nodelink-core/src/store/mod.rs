// ── Capability store ──
//
// Generation-tracked descriptor storage plus the persistence seam.

mod arena;
mod persist;
mod snapshot;

pub use arena::{Generation, Transition};
pub use persist::{MemoryStore, PersistedSnapshot, SnapshotStore};
pub use snapshot::CapabilitySnapshot;
