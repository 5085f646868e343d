// ── Two-generation descriptor arena ──
//
// Per kind, descriptors live in exactly one of two generations:
// `current` (what the device last announced) or `previous` (removed by
// the latest pass, still readable while dependents drain). A pass swaps
// both maps under the kind's shard lock, so readers never observe a key
// in both generations or in neither mid-transition.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::CoreError;
use crate::model::{EntityDescriptor, EntityKey, EntityKind};

type DescriptorMap = HashMap<EntityKey, Arc<EntityDescriptor>>;

#[derive(Debug, Default)]
struct Generations {
    current: DescriptorMap,
    previous: DescriptorMap,
}

/// Which generation a descriptor was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    Current,
    Previous,
}

/// The delta produced by one replacement pass.
#[derive(Debug, Default)]
pub struct Transition {
    /// New keys, in announcement order.
    pub added: Vec<Arc<EntityDescriptor>>,
    /// Keys present before and after the pass.
    pub kept: Vec<EntityKey>,
    /// Keys dropped by this pass, sorted by key. Now in `previous`.
    pub removed: Vec<Arc<EntityDescriptor>>,
    /// Repeated keys within the incoming list (only the first is used).
    pub duplicates: Vec<EntityKey>,
    /// Keys whose grace window ended: they were in `previous` before the pass.
    pub evicted: Vec<EntityKey>,
}

pub(crate) struct GenerationArena {
    kinds: DashMap<EntityKind, Generations>,
}

impl GenerationArena {
    pub(crate) fn new() -> Self {
        Self {
            kinds: DashMap::new(),
        }
    }

    /// Replace the current generation of `kind` with `incoming`.
    ///
    /// The new maps are built and validated off to the side, then swapped
    /// in while the shard lock is held. On an invariant violation nothing
    /// is committed.
    pub(crate) fn replace(
        &self,
        kind: EntityKind,
        incoming: Vec<EntityDescriptor>,
    ) -> Result<Transition, CoreError> {
        let mut slot = self.kinds.entry(kind).or_default();

        let mut leftover = slot.current.clone();
        let mut next = DescriptorMap::with_capacity(incoming.len());
        let mut transition = Transition::default();

        for descriptor in incoming {
            let key = descriptor.key;
            if next.contains_key(&key) {
                transition.duplicates.push(key);
                continue;
            }
            let descriptor = Arc::new(descriptor);
            if leftover.remove(&key).is_some() {
                transition.kept.push(key);
            } else {
                transition.added.push(Arc::clone(&descriptor));
            }
            next.insert(key, descriptor);
        }

        if let Some(key) = leftover.keys().find(|k| next.contains_key(*k)) {
            return Err(CoreError::InvariantViolation {
                message: format!("{kind} key {key} would be both current and previous"),
            });
        }

        let mut removed: Vec<_> = leftover.values().cloned().collect();
        removed.sort_by_key(|d| d.key);
        transition.removed = removed;

        let mut evicted: Vec<_> = slot.previous.keys().copied().collect();
        evicted.sort();
        transition.evicted = evicted;

        slot.previous = leftover;
        slot.current = next;
        drop(slot);

        Ok(transition)
    }

    /// Look up a descriptor in the current generation, falling back to the
    /// draining previous one.
    pub(crate) fn get(&self, kind: EntityKind, key: EntityKey) -> Option<(Generation, Arc<EntityDescriptor>)> {
        let slot = self.kinds.get(&kind)?;
        if let Some(d) = slot.current.get(&key) {
            return Some((Generation::Current, Arc::clone(d)));
        }
        slot.previous
            .get(&key)
            .map(|d| (Generation::Previous, Arc::clone(d)))
    }

    /// Current generation of `kind`, sorted by key.
    pub(crate) fn current(&self, kind: EntityKind) -> Vec<Arc<EntityDescriptor>> {
        self.collect(kind, |g| &g.current)
    }

    /// Previous generation of `kind`, sorted by key.
    pub(crate) fn previous(&self, kind: EntityKind) -> Vec<Arc<EntityDescriptor>> {
        self.collect(kind, |g| &g.previous)
    }

    /// Every current descriptor across all kinds.
    pub(crate) fn all_current(&self) -> Vec<Arc<EntityDescriptor>> {
        let mut all: Vec<_> = self
            .kinds
            .iter()
            .flat_map(|r| r.value().current.values().cloned().collect::<Vec<_>>())
            .collect();
        all.sort_by_key(|d| d.identity());
        all
    }

    pub(crate) fn len(&self, kind: EntityKind) -> usize {
        self.kinds.get(&kind).map_or(0, |g| g.current.len())
    }

    fn collect(
        &self,
        kind: EntityKind,
        pick: impl Fn(&Generations) -> &DescriptorMap,
    ) -> Vec<Arc<EntityDescriptor>> {
        let Some(slot) = self.kinds.get(&kind) else {
            return Vec::new();
        };
        let mut out: Vec<_> = pick(&slot).values().cloned().collect();
        out.sort_by_key(|d| d.key);
        out
    }
}
