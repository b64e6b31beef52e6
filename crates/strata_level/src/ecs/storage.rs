//! # Component Storage
//!
//! Dense, per-type component storage keyed by [`EntityId`].
//!
//! The storage keeps three parallel structures:
//! - `components`: packed component values, no holes
//! - `component_to_entity`: owning entity of each dense slot
//! - `entity_to_component`: dense slot of each entity
//!
//! Removal swaps the last element into the freed slot, so iteration order is
//! not stable across structural mutation. Every structural mutation bumps the
//! storage version, which is what [`ComponentHandle`] and view cursors check.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

use super::entity::EntityId;
use crate::error::{LevelError, LevelResult};

/// Dense storage for a single component type.
///
/// # Example
///
/// ```rust
/// use strata_level::{ComponentStorage, EntityId};
///
/// let mut storage: ComponentStorage<u32> = ComponentStorage::new();
/// let entity = EntityId::new(0, 1);
/// storage.add(entity, 7).unwrap();
/// assert_eq!(storage.get(entity), Some(&7));
/// ```
pub struct ComponentStorage<T> {
    components: Vec<T>,
    component_to_entity: Vec<EntityId>,
    entity_to_component: HashMap<EntityId, usize>,
    version: u64,
}

impl<T> Default for ComponentStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ComponentStorage<T> {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty storage with room for `capacity` components.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            components: Vec::with_capacity(capacity),
            component_to_entity: Vec::with_capacity(capacity),
            entity_to_component: HashMap::with_capacity(capacity),
            version: 0,
        }
    }

    /// Number of stored components.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the storage holds no components.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Structural version. Incremented by every add, erase and clear.
    #[inline]
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Checks whether `entity` has a component in this storage.
    #[inline]
    #[must_use]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.entity_to_component.contains_key(&entity)
    }

    /// Adds a component for `entity`.
    ///
    /// The returned reference is valid until the next structural mutation of
    /// this storage; use [`handle`](Self::handle) to keep a checked reference.
    ///
    /// # Errors
    ///
    /// Returns [`LevelError::DuplicateComponent`] if `entity` already has a
    /// component here. The storage is left untouched.
    pub fn add(&mut self, entity: EntityId, component: T) -> LevelResult<&mut T> {
        if self.contains(entity) {
            tracing::warn!(?entity, component = type_name::<T>(), "component already present");
            return Err(LevelError::DuplicateComponent {
                entity,
                component: type_name::<T>(),
            });
        }
        Ok(self.push(entity, component))
    }

    /// Replaces the component of `entity` in place, or adds it if absent.
    ///
    /// Replacing keeps the dense position and does not bump the version, so
    /// other entities' handles stay valid.
    pub fn replace(&mut self, entity: EntityId, component: T) -> &mut T {
        match self.entity_to_component.get(&entity).copied() {
            Some(index) => {
                let slot = &mut self.components[index];
                *slot = component;
                slot
            }
            None => self.push(entity, component),
        }
    }

    fn push(&mut self, entity: EntityId, component: T) -> &mut T {
        let index = self.components.len();
        self.components.push(component);
        self.component_to_entity.push(entity);
        self.entity_to_component.insert(entity, index);
        self.version += 1;
        &mut self.components[index]
    }

    /// Removes and returns the component of `entity`.
    ///
    /// The last component is moved into the freed slot, so this is O(1) but
    /// reorders the dense array.
    pub fn take(&mut self, entity: EntityId) -> Option<T> {
        let index = self.entity_to_component.remove(&entity)?;
        let last = self.components.len() - 1;

        let component = self.components.swap_remove(index);
        self.component_to_entity.swap_remove(index);
        if index != last {
            let moved = self.component_to_entity[index];
            self.entity_to_component.insert(moved, index);
        }

        self.version += 1;
        Some(component)
    }

    /// Removes the component of `entity`. Returns `false` if it was absent.
    pub fn erase(&mut self, entity: EntityId) -> bool {
        self.take(entity).is_some()
    }

    /// Gets the component of `entity`.
    #[inline]
    #[must_use]
    pub fn get(&self, entity: EntityId) -> Option<&T> {
        let index = *self.entity_to_component.get(&entity)?;
        self.components.get(index)
    }

    /// Gets the component of `entity` mutably.
    #[inline]
    pub fn get_mut(&mut self, entity: EntityId) -> Option<&mut T> {
        let index = *self.entity_to_component.get(&entity)?;
        self.components.get_mut(index)
    }

    /// Owning entities, index-aligned with [`as_slice`](Self::as_slice).
    #[inline]
    #[must_use]
    pub fn entities(&self) -> &[EntityId] {
        &self.component_to_entity
    }

    /// Returns a slice of all components in storage order.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.components
    }

    /// Returns a mutable slice of all components in storage order.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.components
    }

    /// Iterates over all components with their owning entities.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.component_to_entity
            .iter()
            .copied()
            .zip(self.components.iter())
    }

    /// Iterates mutably over all components with their owning entities.
    #[inline]
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut T)> {
        self.component_to_entity
            .iter()
            .copied()
            .zip(self.components.iter_mut())
    }

    /// Drops every component. Each component is dropped exactly once.
    pub fn clear(&mut self) {
        self.entity_to_component.clear();
        self.component_to_entity.clear();
        self.components.clear();
        self.version += 1;
    }

    /// Creates a version-checked handle to the component of `entity`.
    #[must_use]
    pub fn handle(&self, entity: EntityId) -> Option<ComponentHandle<T>> {
        let index = *self.entity_to_component.get(&entity)?;
        Some(ComponentHandle {
            entity,
            index,
            version: self.version,
            _marker: PhantomData,
        })
    }

    fn check(&self, handle: &ComponentHandle<T>) -> Option<usize> {
        let fresh = handle.version == self.version
            && self.component_to_entity.get(handle.index) == Some(&handle.entity);
        fresh.then_some(handle.index)
    }

    /// Resolves a handle, returning `None` if the storage changed structurally
    /// since the handle was taken.
    #[must_use]
    pub fn resolve(&self, handle: &ComponentHandle<T>) -> Option<&T> {
        self.check(handle).map(|index| &self.components[index])
    }

    /// Mutable version of [`resolve`](Self::resolve).
    pub fn resolve_mut(&mut self, handle: &ComponentHandle<T>) -> Option<&mut T> {
        self.check(handle).map(|index| &mut self.components[index])
    }

    /// Maps a component handle back to its owning entity, or
    /// [`EntityId::NULL`] if the handle is stale.
    #[must_use]
    pub fn to_entity(&self, handle: &ComponentHandle<T>) -> EntityId {
        self.check(handle).map_or(EntityId::NULL, |_| handle.entity)
    }
}

impl<T> Index<EntityId> for ComponentStorage<T> {
    type Output = T;

    /// Unchecked access.
    ///
    /// # Panics
    ///
    /// Panics if `entity` has no component in this storage.
    fn index(&self, entity: EntityId) -> &T {
        match self.get(entity) {
            Some(component) => component,
            None => panic!("{entity:?} has no {} component", type_name::<T>()),
        }
    }
}

impl<T> IndexMut<EntityId> for ComponentStorage<T> {
    fn index_mut(&mut self, entity: EntityId) -> &mut T {
        match self.get_mut(entity) {
            Some(component) => component,
            None => panic!("{entity:?} has no {} component", type_name::<T>()),
        }
    }
}

impl<T> fmt::Debug for ComponentStorage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentStorage")
            .field("component", &type_name::<T>())
            .field("len", &self.len())
            .field("version", &self.version)
            .finish()
    }
}

/// Version-checked reference to a component slot.
///
/// A handle stays cheap to copy and can be stored across frames. It resolves
/// only while its storage has not been structurally modified.
pub struct ComponentHandle<T> {
    entity: EntityId,
    index: usize,
    version: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ComponentHandle<T> {
    /// The entity the handle was taken for.
    #[inline]
    #[must_use]
    pub const fn entity(&self) -> EntityId {
        self.entity
    }

    /// Storage version captured when the handle was taken.
    #[inline]
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }
}

impl<T> Clone for ComponentHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ComponentHandle<T> {}

impl<T> PartialEq for ComponentHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity && self.index == other.index && self.version == other.version
    }
}

impl<T> Eq for ComponentHandle<T> {}

impl<T> fmt::Debug for ComponentHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("entity", &self.entity)
            .field("index", &self.index)
            .field("version", &self.version)
            .finish()
    }
}

/// Type-erased view of a [`ComponentStorage`].
///
/// Lets the level erase entities, drain storages and hand out untyped
/// component references without knowing the concrete component type.
pub trait ErasedStorage: Any {
    /// Removes the entity's component if present.
    fn erase_entity(&mut self, entity: EntityId) -> bool;
    /// Checks whether the entity has a component here.
    fn contains(&self, entity: EntityId) -> bool;
    /// Number of stored components.
    fn len(&self) -> usize;
    /// Whether the storage is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Structural version.
    fn version(&self) -> u64;
    /// Drops every component.
    fn clear(&mut self);
    /// Owning entities in storage order.
    fn entities(&self) -> &[EntityId];
    /// Rust type name of the stored component.
    fn component_name(&self) -> &'static str;
    /// Untyped shared access to a component.
    fn get_any(&self, entity: EntityId) -> Option<&dyn Any>;
    /// Untyped mutable access to a component.
    fn get_any_mut(&mut self, entity: EntityId) -> Option<&mut dyn Any>;

    // Needed until trait upcasting is available on the supported toolchain.
    /// Upcast to `Any`.
    fn as_any(&self) -> &dyn Any;
    /// Upcast to mutable `Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn ErasedStorage {
    /// Downcasts to the concrete storage type.
    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&ComponentStorage<T>> {
        self.as_any().downcast_ref()
    }

    /// Downcasts to the concrete storage type mutably.
    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut ComponentStorage<T>> {
        self.as_any_mut().downcast_mut()
    }
}

impl<T: 'static> ErasedStorage for ComponentStorage<T> {
    fn erase_entity(&mut self, entity: EntityId) -> bool {
        self.erase(entity)
    }

    fn contains(&self, entity: EntityId) -> bool {
        ComponentStorage::contains(self, entity)
    }

    fn len(&self) -> usize {
        ComponentStorage::len(self)
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn clear(&mut self) {
        ComponentStorage::clear(self);
    }

    fn entities(&self) -> &[EntityId] {
        &self.component_to_entity
    }

    fn component_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn get_any(&self, entity: EntityId) -> Option<&dyn Any> {
        self.get(entity).map(|c| c as &dyn Any)
    }

    fn get_any_mut(&mut self, entity: EntityId) -> Option<&mut dyn Any> {
        self.get_mut(entity).map(|c| c as &mut dyn Any)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
