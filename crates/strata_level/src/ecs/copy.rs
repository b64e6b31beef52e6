//! # Level Copy
//!
//! Copies entities from one level into another in two passes:
//!
//! 1. Create one destination entity per source entity and record the pair.
//! 2. For every registered component type present on the source, run the
//!    type's copy hook for each recorded pair.
//!
//! Hooks that reference other entities cannot resolve them during pass 2,
//! since the mapping may still be incomplete. They register a deferred
//! callback instead, which runs with the complete mapping when the
//! [`CopyContext`] is dropped.

use std::collections::HashMap;
use std::fmt;

use super::entity::EntityId;
use super::level::Level;

/// Source-to-destination entity mapping, in insertion order.
#[derive(Debug, Default, Clone)]
pub struct EntityMap {
    forward: HashMap<EntityId, EntityId>,
    pairs: Vec<(EntityId, EntityId)>,
}

impl EntityMap {
    /// Destination entity mapped from `source`.
    #[must_use]
    pub fn get(&self, source: EntityId) -> Option<EntityId> {
        self.forward.get(&source).copied()
    }

    /// Whether `source` has been mapped.
    #[must_use]
    pub fn contains(&self, source: EntityId) -> bool {
        self.forward.contains_key(&source)
    }

    /// Number of mapped pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether nothing has been mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// `(source, destination)` pairs in the order they were mapped.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, EntityId)> + '_ {
        self.pairs.iter().copied()
    }

    fn insert(&mut self, source: EntityId, destination: EntityId) -> bool {
        if self.forward.contains_key(&source) {
            return false;
        }
        self.forward.insert(source, destination);
        self.pairs.push((source, destination));
        true
    }
}

type Deferred = Box<dyn FnOnce(&mut Level, &EntityMap)>;

/// State of one copy between two levels.
///
/// Deferred callbacks run exactly once, in registration order, when the
/// context is dropped.
pub struct CopyContext<'s, 'd> {
    source: &'s Level,
    destination: &'d mut Level,
    mapping: EntityMap,
    deferred: Vec<Deferred>,
}

impl<'s, 'd> CopyContext<'s, 'd> {
    /// Starts a copy from `source` into `destination` with an empty mapping.
    pub fn new(source: &'s Level, destination: &'d mut Level) -> Self {
        Self {
            source,
            destination,
            mapping: EntityMap::default(),
            deferred: Vec::new(),
        }
    }

    /// The level being copied from.
    #[must_use]
    pub fn source(&self) -> &'s Level {
        self.source
    }

    /// The level being copied into.
    #[must_use]
    pub fn destination(&self) -> &Level {
        &*self.destination
    }

    /// The level being copied into, mutably.
    pub fn destination_mut(&mut self) -> &mut Level {
        &mut *self.destination
    }

    /// The mapping recorded so far.
    #[must_use]
    pub fn mapping(&self) -> &EntityMap {
        &self.mapping
    }

    /// Destination entity mapped from `source`, or [`EntityId::NULL`].
    #[must_use]
    pub fn mapped(&self, source: EntityId) -> EntityId {
        self.mapping.get(source).unwrap_or_default()
    }

    /// Records that `destination` is the copy of `source`.
    ///
    /// Returns `false`, leaving the mapping unchanged, if `source` is not
    /// live in the source level, `destination` is not live in the destination
    /// level, or `source` is already mapped.
    pub fn add_mapped_entity(&mut self, destination: EntityId, source: EntityId) -> bool {
        if !self.source.contains(source) || !self.destination.contains(destination) {
            return false;
        }
        self.mapping.insert(source, destination)
    }

    /// Queues `callback` to run against the destination level once the
    /// mapping is complete.
    pub fn defer<F>(&mut self, callback: F)
    where
        F: FnOnce(&mut Level, &EntityMap) + 'static,
    {
        self.deferred.push(Box::new(callback));
    }

    /// Pass 1 for a single source entity.
    fn create_destination(&mut self, source: EntityId, preserve_uuids: bool) -> EntityId {
        if let Some(existing) = self.mapping.get(source) {
            return existing;
        }
        let Some(uuid) = self.source.uuid(source) else {
            tracing::debug!(?source, "skipping invalid source entity");
            return EntityId::NULL;
        };

        let destination = if preserve_uuids {
            match self.destination.find(uuid) {
                found if !found.is_null() => found,
                _ => self.destination.create_with_uuid(uuid),
            }
        } else {
            self.destination.create()
        };

        if !destination.is_null() {
            self.mapping.insert(source, destination);
        }
        destination
    }
}

impl Drop for CopyContext<'_, '_> {
    fn drop(&mut self) {
        let deferred = std::mem::take(&mut self.deferred);
        if !deferred.is_empty() {
            tracing::debug!(count = deferred.len(), "running deferred copy callbacks");
        }
        for callback in deferred {
            callback(&mut *self.destination, &self.mapping);
        }
    }
}

impl fmt::Debug for CopyContext<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyContext")
            .field("mapped", &self.mapping.len())
            .field("deferred", &self.deferred.len())
            .finish_non_exhaustive()
    }
}

impl Level {
    /// Copies `sources` and their components into `destination`.
    ///
    /// Returns one destination entity per input, in order: the new (or,
    /// with `preserve_uuids`, the existing entity with the same UUID) copy,
    /// or [`EntityId::NULL`] for inputs that are not live in this level.
    /// Repeated inputs map to the same destination entity.
    ///
    /// A reused destination entity has every component the source owns
    /// replaced. Components the source does not own are left in place.
    ///
    /// Component types missing from the registry are skipped.
    pub fn copy_to(
        &self,
        destination: &mut Level,
        sources: &[EntityId],
        preserve_uuids: bool,
    ) -> Vec<EntityId> {
        let mut ctx = CopyContext::new(self, destination);

        let targets: Vec<EntityId> = sources
            .iter()
            .map(|&source| ctx.create_destination(source, preserve_uuids))
            .collect();

        let pairs: Vec<(EntityId, EntityId)> = ctx.mapping().iter().collect();
        for type_id in self.storage_type_ids() {
            match self.registry().find_by_type(type_id) {
                Some(component_type) => {
                    for &(source, target) in &pairs {
                        component_type.copy(&mut ctx, target, source);
                    }
                }
                None => {
                    if let Some(storage) = self.erased_storage(type_id).filter(|s| !s.is_empty()) {
                        tracing::warn!(
                            component = storage.component_name(),
                            "skipping unregistered component type during copy"
                        );
                    }
                }
            }
        }

        tracing::debug!(requested = sources.len(), copied = pairs.len(), "copied entities");
        targets
    }

    /// Copies every live entity into `destination`.
    pub fn copy_all_to(&self, destination: &mut Level, preserve_uuids: bool) -> Vec<EntityId> {
        let sources: Vec<EntityId> = self.iter().collect();
        self.copy_to(destination, &sources, preserve_uuids)
    }
}
