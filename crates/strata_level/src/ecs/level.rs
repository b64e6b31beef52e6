//! # Level
//!
//! The container for one scene's entities and components.
//!
//! Entity slots are recycled through a free list; every reuse bumps the
//! slot's generation so stale handles fail validation. Each entity also owns
//! a UUID that survives copies and persistence. Component storages are
//! created per type on first use and are never removed, only emptied.

use std::any::{type_name, Any, TypeId};
use std::collections::hash_map::IterMut;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::entity::EntityId;
use super::registry::ComponentRegistry;
use super::storage::{ComponentStorage, ErasedStorage};
use crate::config::LevelConfig;
use crate::error::{LevelError, LevelResult};

/// A collection of entities and their components.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use strata_level::{ComponentRegistry, Level, Position};
///
/// let mut level = Level::new(Arc::new(ComponentRegistry::with_builtins()));
/// let entity = level.create();
/// level.add(entity, Position::new(1.0, 2.0, 3.0)).unwrap();
/// assert_eq!(level.get::<Position>(entity).map(|p| p.y), Some(2.0));
///
/// assert!(level.remove(entity));
/// assert!(!level.contains(entity));
/// ```
pub struct Level {
    /// Live handle of each slot, or `NULL` once freed.
    slots: Vec<EntityId>,
    /// Freed handles with their next generation, reused last-in first-out.
    free_list: Vec<EntityId>,
    uuid_to_entity: HashMap<Uuid, EntityId>,
    entity_to_uuid: HashMap<EntityId, Uuid>,
    live_count: usize,
    storages: HashMap<TypeId, Box<dyn ErasedStorage>>,
    registry: Arc<ComponentRegistry>,
    config: LevelConfig,
}

impl Level {
    /// Creates an empty level bound to `registry`, with default sizing.
    #[must_use]
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self::with_config(registry, LevelConfig::default())
    }

    /// Creates an empty level bound to `registry`, sized by `config`.
    #[must_use]
    pub fn with_config(registry: Arc<ComponentRegistry>, config: LevelConfig) -> Self {
        let capacity = config.initial_entity_capacity;
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            uuid_to_entity: HashMap::with_capacity(capacity),
            entity_to_uuid: HashMap::with_capacity(capacity),
            live_count: 0,
            storages: HashMap::new(),
            registry,
            config,
        }
    }

    /// The registry this level resolves component types through.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// The configuration the level was created with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &LevelConfig {
        &self.config
    }

    // =========================================================================
    // Entity lifecycle
    // =========================================================================

    /// Creates an entity with a fresh random UUID.
    ///
    /// Returns [`EntityId::NULL`] if the index space is exhausted.
    pub fn create(&mut self) -> EntityId {
        self.create_with_uuid(Uuid::new_v4())
    }

    /// Creates an entity with the given UUID.
    ///
    /// Returns [`EntityId::NULL`] if `uuid` already identifies a live entity
    /// or the index space is exhausted.
    pub fn create_with_uuid(&mut self, uuid: Uuid) -> EntityId {
        if self.uuid_to_entity.contains_key(&uuid) {
            tracing::warn!(%uuid, "uuid already in use, entity not created");
            return EntityId::NULL;
        }

        let entity = match self.free_list.pop() {
            Some(reused) => {
                self.slots[reused.index() as usize] = reused;
                reused
            }
            None => {
                let Ok(index) = u32::try_from(self.slots.len()) else {
                    tracing::error!(slots = self.slots.len(), "entity index space exhausted");
                    return EntityId::NULL;
                };
                let fresh = EntityId::new(index, EntityId::FIRST_GENERATION);
                self.slots.push(fresh);
                fresh
            }
        };

        self.uuid_to_entity.insert(uuid, entity);
        self.entity_to_uuid.insert(entity, uuid);
        self.live_count += 1;

        tracing::debug!(?entity, %uuid, "created entity");
        entity
    }

    /// Removes an entity and all of its components.
    ///
    /// Returns `false` for stale, null or never-issued handles, in which case
    /// nothing changes.
    pub fn remove(&mut self, entity: EntityId) -> bool {
        if !self.contains(entity) {
            return false;
        }

        for storage in self.storages.values_mut() {
            storage.erase_entity(entity);
        }
        if let Some(uuid) = self.entity_to_uuid.remove(&entity) {
            self.uuid_to_entity.remove(&uuid);
        }

        self.slots[entity.index() as usize] = EntityId::NULL;
        self.release(entity);
        self.live_count -= 1;

        tracing::debug!(?entity, "removed entity");
        true
    }

    fn release(&mut self, entity: EntityId) {
        match entity.next_generation() {
            Some(next) => self.free_list.push(next),
            None => tracing::debug!(slot = entity.index(), "retiring exhausted slot"),
        }
    }

    /// Checks whether `entity` is a live handle of this level.
    #[inline]
    #[must_use]
    pub fn contains(&self, entity: EntityId) -> bool {
        !entity.is_null() && self.slots.get(entity.index() as usize) == Some(&entity)
    }

    /// Resolves a UUID to its live entity, or [`EntityId::NULL`].
    #[must_use]
    pub fn find(&self, uuid: Uuid) -> EntityId {
        self.uuid_to_entity.get(&uuid).copied().unwrap_or_default()
    }

    /// The UUID of a live entity.
    #[must_use]
    pub fn uuid(&self, entity: EntityId) -> Option<Uuid> {
        self.entity_to_uuid.get(&entity).copied()
    }

    /// Number of live entities.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live_count
    }

    /// Whether the level has no live entities.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// Iterates over live entities in slot order.
    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.slots.iter().copied().filter(|slot| !slot.is_null())
    }

    /// Removes every entity and component.
    ///
    /// Storages are drained first, so each component is dropped exactly once.
    /// Freed slots keep their generation history; handles taken before the
    /// clear stay invalid.
    pub fn clear(&mut self) {
        for storage in self.storages.values_mut() {
            storage.clear();
        }

        // Reverse order so the lowest slots are handed out first again.
        for index in (0..self.slots.len()).rev() {
            let live = std::mem::take(&mut self.slots[index]);
            if !live.is_null() {
                self.release(live);
            }
        }

        self.uuid_to_entity.clear();
        self.entity_to_uuid.clear();
        self.live_count = 0;
        tracing::debug!("cleared level");
    }

    // =========================================================================
    // Component access
    // =========================================================================

    fn validate(&self, entity: EntityId) -> LevelResult<()> {
        if self.contains(entity) {
            Ok(())
        } else {
            Err(LevelError::InvalidEntity(entity))
        }
    }

    /// Storage for `T`, created on first use.
    fn storage_entry<T: 'static>(&mut self) -> &mut ComponentStorage<T> {
        let capacity = self.config.initial_component_capacity;
        let erased = self
            .storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(ComponentStorage::<T>::with_capacity(capacity)));
        match erased.downcast_mut::<T>() {
            Some(storage) => storage,
            None => unreachable!("storage for {} keyed under another type", type_name::<T>()),
        }
    }

    /// Typed storage for `T`, if any component of that type was ever added.
    #[must_use]
    pub fn storage<T: 'static>(&self) -> Option<&ComponentStorage<T>> {
        self.storages.get(&TypeId::of::<T>())?.downcast_ref::<T>()
    }

    /// Mutable typed storage for `T`.
    ///
    /// Structural changes made through the storage directly bypass entity
    /// validation; prefer the level's component methods.
    pub fn storage_mut<T: 'static>(&mut self) -> Option<&mut ComponentStorage<T>> {
        self.storages.get_mut(&TypeId::of::<T>())?.downcast_mut::<T>()
    }

    /// Adds a component to a live entity.
    ///
    /// # Errors
    ///
    /// [`LevelError::InvalidEntity`] if the handle is not live,
    /// [`LevelError::DuplicateComponent`] if the entity already has a `T`.
    pub fn add<T: 'static>(&mut self, entity: EntityId, component: T) -> LevelResult<&mut T> {
        self.validate(entity)?;
        self.storage_entry::<T>().add(entity, component)
    }

    /// Sets the component of a live entity, replacing any existing one.
    ///
    /// # Errors
    ///
    /// [`LevelError::InvalidEntity`] if the handle is not live.
    pub fn replace<T: 'static>(&mut self, entity: EntityId, component: T) -> LevelResult<&mut T> {
        self.validate(entity)?;
        Ok(self.storage_entry::<T>().replace(entity, component))
    }

    /// Removes and returns the `T` of `entity`.
    pub fn remove_component<T: 'static>(&mut self, entity: EntityId) -> Option<T> {
        self.storage_mut::<T>()?.take(entity)
    }

    /// The `T` of `entity`.
    #[must_use]
    pub fn get<T: 'static>(&self, entity: EntityId) -> Option<&T> {
        self.storage::<T>()?.get(entity)
    }

    /// The `T` of `entity`, mutably.
    pub fn get_mut<T: 'static>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.storage_mut::<T>()?.get_mut(entity)
    }

    /// Whether `entity` has a `T`.
    #[must_use]
    pub fn has<T: 'static>(&self, entity: EntityId) -> bool {
        self.storage::<T>()
            .is_some_and(|storage| storage.contains(entity))
    }

    /// Untyped access to a component by type identity.
    #[must_use]
    pub fn get_dyn(&self, type_id: TypeId, entity: EntityId) -> Option<&dyn Any> {
        self.storages.get(&type_id)?.get_any(entity)
    }

    /// Untyped mutable access to a component by type identity.
    pub fn get_dyn_mut(&mut self, type_id: TypeId, entity: EntityId) -> Option<&mut dyn Any> {
        self.storages.get_mut(&type_id)?.get_any_mut(entity)
    }

    /// Default-constructs the component registered as `name` on `entity`.
    ///
    /// # Errors
    ///
    /// [`LevelError::UnknownComponent`] if no type is registered under
    /// `name`, otherwise the errors of [`add`](Self::add).
    pub fn add_by_name(&mut self, name: &str, entity: EntityId) -> LevelResult<&mut dyn Any> {
        let component_type = self
            .registry
            .find(name)
            .ok_or_else(|| LevelError::UnknownComponent(name.to_owned()))?;
        component_type.add_component(self, entity)
    }

    pub(crate) fn storage_type_ids(&self) -> Vec<TypeId> {
        self.storages.keys().copied().collect()
    }

    pub(crate) fn erased_storage(&self, type_id: TypeId) -> Option<&dyn ErasedStorage> {
        self.storages.get(&type_id).map(|storage| &**storage)
    }

    pub(crate) fn storages_mut(&mut self) -> IterMut<'_, TypeId, Box<dyn ErasedStorage>> {
        self.storages.iter_mut()
    }
}

impl fmt::Debug for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let storages: Vec<_> = self
            .storages
            .values()
            .map(|storage| (storage.component_name(), storage.len()))
            .collect();
        f.debug_struct("Level")
            .field("live", &self.live_count)
            .field("slots", &self.slots.len())
            .field("free", &self.free_list.len())
            .field("storages", &storages)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{Name, Position, Velocity};
    use std::cell::Cell;
    use std::rc::Rc;

    fn level() -> Level {
        Level::new(Arc::new(ComponentRegistry::with_builtins()))
    }

    #[test]
    fn test_create_remove_reuse() {
        let mut level = level();

        let first = level.create();
        assert_eq!(first, EntityId::new(0, 1));
        assert!(level.contains(first));
        assert_eq!(level.len(), 1);

        assert!(level.remove(first));
        assert!(!level.contains(first));
        assert!(level.is_empty());

        // Same slot, next generation.
        let second = level.create();
        assert_eq!(second.index(), first.index());
        assert_eq!(second.generation(), first.generation() + 1);
        assert!(!level.contains(first));
        assert!(level.contains(second));
    }

    #[test]
    fn test_stale_handle_rejected_everywhere() {
        let mut level = level();
        let stale = level.create();
        level.remove(stale);
        let live = level.create();
        level.add(live, Name::from("live")).unwrap();

        assert!(!level.remove(stale));
        assert_eq!(level.len(), 1);
        assert_eq!(
            level.add(stale, Name::from("ghost")).unwrap_err(),
            LevelError::InvalidEntity(stale)
        );
        assert!(level.get::<Name>(stale).is_none());
        assert_eq!(level.get::<Name>(live), Some(&Name::from("live")));
    }

    #[test]
    fn test_remove_never_issued() {
        let mut level = level();
        level.create();
        assert!(!level.remove(EntityId::NULL));
        assert!(!level.remove(EntityId::new(50, 1)));
        assert!(!level.remove(EntityId::new(0, 9)));
        assert_eq!(level.len(), 1);
    }

    #[test]
    fn test_uuid_bijection() {
        let mut level = level();
        let uuid = Uuid::new_v4();
        let entity = level.create_with_uuid(uuid);
        assert_eq!(level.find(uuid), entity);
        assert_eq!(level.uuid(entity), Some(uuid));

        assert!(level.create_with_uuid(uuid).is_null());
        assert_eq!(level.len(), 1);

        level.remove(entity);
        assert!(level.find(uuid).is_null());
        assert!(level.uuid(entity).is_none());
        assert!(!level.create_with_uuid(uuid).is_null());
    }

    #[test]
    fn test_remove_erases_all_components() {
        let mut level = level();
        let entity = level.create();
        let other = level.create();
        level.add(entity, Position::default()).unwrap();
        level.add(entity, Velocity::default()).unwrap();
        level.add(other, Position::new(1.0, 0.0, 0.0)).unwrap();

        level.remove(entity);
        assert_eq!(level.storage::<Position>().map(ComponentStorage::len), Some(1));
        assert_eq!(level.storage::<Velocity>().map(ComponentStorage::len), Some(0));
        assert!(level.has::<Position>(other));
    }

    #[test]
    fn test_replace_and_remove_component() {
        let mut level = level();
        let entity = level.create();

        level.replace(entity, Name::from("a")).unwrap();
        level.replace(entity, Name::from("b")).unwrap();
        assert_eq!(level.get::<Name>(entity), Some(&Name::from("b")));

        assert_eq!(level.remove_component::<Name>(entity), Some(Name::from("b")));
        assert!(!level.has::<Name>(entity));
        assert!(level.remove_component::<Velocity>(entity).is_none());
    }

    #[derive(Clone)]
    struct DropCounter(Rc<Cell<usize>>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_clear_drops_each_component_once() {
        let drops = Rc::new(Cell::new(0));
        let mut level = level();
        let entities: Vec<_> = (0..5).map(|_| level.create()).collect();
        for &entity in &entities {
            level.add(entity, DropCounter(Rc::clone(&drops))).unwrap();
        }
        level.remove(entities[2]);
        assert_eq!(drops.get(), 1);

        level.clear();
        assert_eq!(drops.get(), 5);
        assert!(level.is_empty());
        assert_eq!(level.iter().count(), 0);
        assert!(entities.iter().all(|&entity| !level.contains(entity)));

        // Slots come back with bumped generations, lowest first.
        let reused = level.create();
        assert_eq!(reused.index(), 0);
        assert_eq!(reused.generation(), 2);
    }

    #[test]
    fn test_add_by_name_and_dyn_access() {
        let mut level = level();
        let entity = level.create();

        let added = level.add_by_name("Velocity", entity).unwrap();
        added.downcast_mut::<Velocity>().unwrap().x = 4.0;

        let velocity = level.get_dyn(TypeId::of::<Velocity>(), entity).unwrap();
        assert_eq!(velocity.downcast_ref::<Velocity>().map(|v| v.x), Some(4.0));

        let name = level.add_by_name("Name", entity).unwrap();
        *name.downcast_mut::<Name>().unwrap() = Name::from("by name");
        let name = level.get_dyn_mut(TypeId::of::<Name>(), entity).unwrap();
        assert_eq!(name.downcast_ref::<Name>(), Some(&Name::from("by name")));

        assert_eq!(
            level.add_by_name("Missing", entity).unwrap_err(),
            LevelError::UnknownComponent("Missing".to_owned())
        );
    }

    #[test]
    fn test_with_config_sizing() {
        let config = LevelConfig {
            initial_entity_capacity: 8,
            initial_component_capacity: 4,
        };
        let level = Level::with_config(Arc::new(ComponentRegistry::new()), config.clone());
        assert_eq!(level.config(), &config);
        assert!(level.registry().is_empty());
    }
}
