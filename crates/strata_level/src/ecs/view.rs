//! # Views
//!
//! Multi-component iteration over a level.
//!
//! A view binds a tuple of one to four component types. Iteration walks the
//! dense entity list of the smallest bound storage (the driver) and yields an
//! entity only if every other bound storage contains it. The driver is picked
//! once, when the view is built.
//!
//! [`View`] and [`ViewMut`] borrow the level, so structural mutation while
//! iterating does not compile. [`ViewCursor`] does not borrow the level; it
//! checks storage versions on every step instead and reports
//! [`LevelError::ViewInvalidated`] once a bound storage changed structurally.

use std::any::{type_name, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::slice;

use super::entity::EntityId;
use super::level::Level;
use super::storage::{ComponentStorage, ErasedStorage};
use crate::error::{LevelError, LevelResult};

/// A tuple of component types a view can bind.
///
/// Implemented for tuples of one to four `'static` types, e.g.
/// `(Position,)` or `(Position, Velocity)`.
pub trait Query: 'static {
    /// Shared references to every bound component.
    type Item<'a>;
    /// Mutable references to every bound component.
    type ItemMut<'a>;
    /// Per-component optional shared references.
    type Optional<'a>;
    /// Per-component optional mutable references.
    type OptionalMut<'a>;
    /// Bound storages, shared.
    type Fetch<'a>: Copy;
    /// Bound storages, mutable.
    type FetchMut<'a>;

    /// Type identity and name of every bound component, in tuple order.
    fn components() -> Vec<(TypeId, &'static str)>;

    /// Borrows the bound storages of `level`.
    fn fetch(level: &Level) -> Self::Fetch<'_>;

    /// Mutably borrows the bound storages of `level`. Types must be distinct.
    fn fetch_mut(level: &mut Level) -> Self::FetchMut<'_>;

    /// Position of the driver storage in the tuple, or `None` if any bound
    /// storage is missing.
    fn driver(fetch: Self::Fetch<'_>) -> Option<usize>;

    /// [`driver`](Self::driver) for mutable storages.
    fn driver_mut(fetch: &Self::FetchMut<'_>) -> Option<usize>;

    /// Dense entity list of the storage at `slot`.
    fn entities<'a>(fetch: Self::Fetch<'a>, slot: usize) -> &'a [EntityId];

    /// [`entities`](Self::entities) for mutable storages.
    fn entities_mut<'r>(fetch: &'r Self::FetchMut<'_>, slot: usize) -> &'r [EntityId];

    /// Every bound component of `entity`, if it has all of them.
    fn get<'a>(fetch: Self::Fetch<'a>, entity: EntityId) -> Option<Self::Item<'a>>;

    /// Every bound component of `entity`, mutably.
    fn get_mut<'r>(fetch: &'r mut Self::FetchMut<'_>, entity: EntityId)
        -> Option<Self::ItemMut<'r>>;

    /// Each bound component of `entity` independently.
    fn try_get<'a>(fetch: Self::Fetch<'a>, entity: EntityId) -> Self::Optional<'a>;

    /// Each bound component of `entity` independently, mutably.
    fn try_get_mut<'r>(fetch: &'r mut Self::FetchMut<'_>, entity: EntityId)
        -> Self::OptionalMut<'r>;
}

/// Index of the smallest storage, first on ties. `None` if any is missing.
fn select_driver(lens: &[Option<usize>]) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (slot, len) in lens.iter().enumerate() {
        let len = (*len)?;
        match best {
            Some((_, smallest)) if smallest <= len => {}
            _ => best = Some((slot, len)),
        }
    }
    best.map(|(slot, _)| slot)
}

macro_rules! impl_query {
    ($($name:ident $idx:tt),+) => {
        impl<$($name: 'static),+> Query for ($($name,)+) {
            type Item<'a> = ($(&'a $name,)+);
            type ItemMut<'a> = ($(&'a mut $name,)+);
            type Optional<'a> = ($(Option<&'a $name>,)+);
            type OptionalMut<'a> = ($(Option<&'a mut $name>,)+);
            type Fetch<'a> = ($(Option<&'a ComponentStorage<$name>>,)+);
            type FetchMut<'a> = ($(Option<&'a mut ComponentStorage<$name>>,)+);

            fn components() -> Vec<(TypeId, &'static str)> {
                vec![$((TypeId::of::<$name>(), type_name::<$name>()),)+]
            }

            fn fetch(level: &Level) -> Self::Fetch<'_> {
                ($(level.storage::<$name>(),)+)
            }

            fn fetch_mut(level: &mut Level) -> Self::FetchMut<'_> {
                let mut fetch: Self::FetchMut<'_> = ($(None::<&mut ComponentStorage<$name>>,)+);
                for (type_id, storage) in level.storages_mut() {
                    $(
                        if *type_id == TypeId::of::<$name>() {
                            fetch.$idx = storage.downcast_mut::<$name>();
                            continue;
                        }
                    )+
                }
                fetch
            }

            fn driver(fetch: Self::Fetch<'_>) -> Option<usize> {
                select_driver(&[$(fetch.$idx.map(ComponentStorage::len),)+])
            }

            fn driver_mut(fetch: &Self::FetchMut<'_>) -> Option<usize> {
                select_driver(&[$(fetch.$idx.as_deref().map(ComponentStorage::len),)+])
            }

            fn entities<'a>(fetch: Self::Fetch<'a>, slot: usize) -> &'a [EntityId] {
                match slot {
                    $($idx => fetch.$idx.map(ComponentStorage::entities).unwrap_or_default(),)+
                    _ => &[],
                }
            }

            fn entities_mut<'r>(fetch: &'r Self::FetchMut<'_>, slot: usize) -> &'r [EntityId] {
                match slot {
                    $($idx => fetch.$idx.as_deref().map(ComponentStorage::entities).unwrap_or_default(),)+
                    _ => &[],
                }
            }

            fn get<'a>(fetch: Self::Fetch<'a>, entity: EntityId) -> Option<Self::Item<'a>> {
                Some(($(fetch.$idx?.get(entity)?,)+))
            }

            fn get_mut<'r>(
                fetch: &'r mut Self::FetchMut<'_>,
                entity: EntityId,
            ) -> Option<Self::ItemMut<'r>> {
                Some(($(fetch.$idx.as_deref_mut()?.get_mut(entity)?,)+))
            }

            fn try_get<'a>(fetch: Self::Fetch<'a>, entity: EntityId) -> Self::Optional<'a> {
                ($(fetch.$idx.and_then(|storage| storage.get(entity)),)+)
            }

            fn try_get_mut<'r>(
                fetch: &'r mut Self::FetchMut<'_>,
                entity: EntityId,
            ) -> Self::OptionalMut<'r> {
                ($(fetch.$idx.as_deref_mut().and_then(|storage| storage.get_mut(entity)),)+)
            }
        }
    };
}

impl_query!(A 0);
impl_query!(A 0, B 1);
impl_query!(A 0, B 1, C 2);
impl_query!(A 0, B 1, C 2, D 3);

/// Read-only view over entities owning every component in `Q`.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use strata_level::{ComponentRegistry, Level, Position, Velocity};
///
/// let mut level = Level::new(Arc::new(ComponentRegistry::with_builtins()));
/// let moving = level.create();
/// level.add(moving, Position::default()).unwrap();
/// level.add(moving, Velocity::new(1.0, 0.0, 0.0)).unwrap();
/// let still = level.create();
/// level.add(still, Position::default()).unwrap();
///
/// let view = level.view::<(Position, Velocity)>();
/// let found: Vec<_> = view.iter().map(|(entity, _)| entity).collect();
/// assert_eq!(found, vec![moving]);
/// ```
pub struct View<'a, Q: Query> {
    fetch: Q::Fetch<'a>,
    driver: &'a [EntityId],
}

impl<'a, Q: Query> View<'a, Q> {
    fn new(level: &'a Level) -> Self {
        let fetch = Q::fetch(level);
        let driver = Q::driver(fetch).map_or(&[][..], |slot| Q::entities(fetch, slot));
        Self { fetch, driver }
    }

    /// Iterates over matching entities in driver storage order.
    #[must_use]
    pub fn iter(&self) -> ViewIter<'a, Q> {
        ViewIter {
            fetch: self.fetch,
            entities: self.driver.iter(),
        }
    }

    /// Every bound component of `entity`, if it has all of them.
    #[must_use]
    pub fn get(&self, entity: EntityId) -> Option<Q::Item<'a>> {
        Q::get(self.fetch, entity)
    }

    /// Each bound component of `entity`, independently.
    #[must_use]
    pub fn try_get(&self, entity: EntityId) -> Q::Optional<'a> {
        Q::try_get(self.fetch, entity)
    }

    /// Entities of the driver storage. A superset of the matching entities.
    #[must_use]
    pub fn entities(&self) -> &'a [EntityId] {
        self.driver
    }

    /// Whether the driver storage is empty, or some bound storage is missing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.driver.is_empty()
    }

    /// Upper bound on the number of matching entities.
    #[must_use]
    pub fn len_hint(&self) -> usize {
        self.driver.len()
    }
}

impl<'a, Q: Query> IntoIterator for &View<'a, Q> {
    type Item = (EntityId, Q::Item<'a>);
    type IntoIter = ViewIter<'a, Q>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<Q: Query> fmt::Debug for View<'_, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("query", &type_name::<Q>())
            .field("len_hint", &self.driver.len())
            .finish()
    }
}

/// Iterator over a [`View`].
pub struct ViewIter<'a, Q: Query> {
    fetch: Q::Fetch<'a>,
    entities: slice::Iter<'a, EntityId>,
}

impl<'a, Q: Query> Iterator for ViewIter<'a, Q> {
    type Item = (EntityId, Q::Item<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        self.entities
            .by_ref()
            .find_map(|&entity| Q::get(self.fetch, entity).map(|item| (entity, item)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.entities.len()))
    }
}

impl<Q: Query> fmt::Debug for ViewIter<'_, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewIter")
            .field("query", &type_name::<Q>())
            .field("remaining", &self.entities.len())
            .finish()
    }
}

/// Mutable view over entities owning every component in `Q`.
pub struct ViewMut<'a, Q: Query> {
    fetch: Q::FetchMut<'a>,
    driver: Option<usize>,
}

impl<'a, Q: Query> ViewMut<'a, Q> {
    fn new(level: &'a mut Level) -> Self {
        let fetch = Q::fetch_mut(level);
        let driver = Q::driver_mut(&fetch);
        Self { fetch, driver }
    }

    /// Calls `f` for every matching entity, in driver storage order.
    pub fn for_each<F>(&mut self, mut f: F)
    where
        F: for<'r> FnMut(EntityId, Q::ItemMut<'r>),
    {
        let Some(driver) = self.driver else {
            return;
        };
        let len = Q::entities_mut(&self.fetch, driver).len();
        for position in 0..len {
            let Some(&entity) = Q::entities_mut(&self.fetch, driver).get(position) else {
                break;
            };
            if let Some(item) = Q::get_mut(&mut self.fetch, entity) {
                f(entity, item);
            }
        }
    }

    /// Every bound component of `entity`, mutably, if it has all of them.
    pub fn get(&mut self, entity: EntityId) -> Option<Q::ItemMut<'_>> {
        Q::get_mut(&mut self.fetch, entity)
    }

    /// Each bound component of `entity` independently, mutably.
    pub fn try_get(&mut self, entity: EntityId) -> Q::OptionalMut<'_> {
        Q::try_get_mut(&mut self.fetch, entity)
    }

    /// Entities of the driver storage. A superset of the matching entities.
    #[must_use]
    pub fn entities(&self) -> &[EntityId] {
        self.driver
            .map_or(&[][..], |slot| Q::entities_mut(&self.fetch, slot))
    }
}

impl<Q: Query> fmt::Debug for ViewMut<'_, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewMut")
            .field("query", &type_name::<Q>())
            .field("driver", &self.driver)
            .finish()
    }
}

/// Storage identity and the version it had when the cursor was built.
#[derive(Debug, Clone, Copy)]
struct Stamp {
    type_id: TypeId,
    name: &'static str,
    version: Option<u64>,
}

/// Detached, version-checked iteration over a view.
///
/// The cursor does not borrow the level, so the level may be mutated between
/// steps. Changing a component in place is fine; adding or removing a
/// component of a bound type invalidates the cursor.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use strata_level::{ComponentRegistry, Level, LevelError, Name};
///
/// let mut level = Level::new(Arc::new(ComponentRegistry::with_builtins()));
/// let first = level.create();
/// level.add(first, Name::from("first")).unwrap();
///
/// let mut cursor = level.view_cursor::<(Name,)>();
/// let other = level.create();
/// level.add(other, Name::from("late")).unwrap();
/// assert!(matches!(cursor.next(&level), Err(LevelError::ViewInvalidated { .. })));
/// ```
pub struct ViewCursor<Q: Query> {
    stamps: Vec<Stamp>,
    driver: Option<usize>,
    position: usize,
    _marker: PhantomData<fn() -> Q>,
}

impl<Q: Query> ViewCursor<Q> {
    fn new(level: &Level) -> Self {
        let stamps = Q::components()
            .into_iter()
            .map(|(type_id, name)| Stamp {
                type_id,
                name,
                version: level.erased_storage(type_id).map(ErasedStorage::version),
            })
            .collect();
        Self {
            stamps,
            driver: Q::driver(Q::fetch(level)),
            position: 0,
            _marker: PhantomData,
        }
    }

    /// Checks every bound storage against the versions seen at construction.
    ///
    /// # Errors
    ///
    /// [`LevelError::ViewInvalidated`] naming the first changed component.
    pub fn validate(&self, level: &Level) -> LevelResult<()> {
        for stamp in &self.stamps {
            let current = level.erased_storage(stamp.type_id).map(ErasedStorage::version);
            if current != stamp.version {
                return Err(LevelError::ViewInvalidated {
                    component: stamp.name,
                });
            }
        }
        Ok(())
    }

    /// Advances to the next matching entity. `Ok(None)` once exhausted.
    ///
    /// # Errors
    ///
    /// [`LevelError::ViewInvalidated`] if a bound storage was structurally
    /// modified since the cursor was built.
    #[allow(clippy::should_implement_trait)]
    pub fn next<'l>(&mut self, level: &'l Level) -> LevelResult<Option<(EntityId, Q::Item<'l>)>> {
        self.validate(level)?;
        let Some(driver) = self.driver else {
            return Ok(None);
        };

        let fetch = Q::fetch(level);
        let entities = Q::entities(fetch, driver);
        while let Some(&entity) = entities.get(self.position) {
            self.position += 1;
            if let Some(item) = Q::get(fetch, entity) {
                return Ok(Some((entity, item)));
            }
        }
        Ok(None)
    }

    /// Position in the driver storage.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }
}

impl<Q: Query> fmt::Debug for ViewCursor<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewCursor")
            .field("stamps", &self.stamps)
            .field("driver", &self.driver)
            .field("position", &self.position)
            .finish()
    }
}

impl Level {
    /// Read-only view over entities owning every component in `Q`.
    #[must_use]
    pub fn view<Q: Query>(&self) -> View<'_, Q> {
        View::new(self)
    }

    /// Mutable view over entities owning every component in `Q`.
    ///
    /// # Panics
    ///
    /// Panics if `Q` names the same component type twice.
    pub fn view_mut<Q: Query>(&mut self) -> ViewMut<'_, Q> {
        let components = Q::components();
        for (position, (type_id, name)) in components.iter().enumerate() {
            assert!(
                components[..position].iter().all(|(other, _)| other != type_id),
                "view_mut binds {name} more than once"
            );
        }
        ViewMut::new(self)
    }

    /// Detached cursor over entities owning every component in `Q`.
    #[must_use]
    pub fn view_cursor<Q: Query>(&self) -> ViewCursor<Q> {
        ViewCursor::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{Name, Position, Velocity};
    use crate::ecs::registry::ComponentRegistry;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn level() -> Level {
        Level::new(Arc::new(ComponentRegistry::with_builtins()))
    }

    #[test]
    fn test_select_driver() {
        assert_eq!(select_driver(&[Some(5), Some(2), Some(2)]), Some(1));
        assert_eq!(select_driver(&[Some(0)]), Some(0));
        assert_eq!(select_driver(&[Some(3), None]), None);
    }

    #[test]
    fn test_position_velocity_integration() {
        let mut level = level();
        let mut moving = Vec::new();
        for i in 0..10u8 {
            let entity = level.create();
            level.add(entity, Position::new(f32::from(i), 0.0, 0.0)).unwrap();
            if i % 2 == 0 {
                level.add(entity, Velocity::new(1.0, 1.0, 0.0)).unwrap();
                moving.push(entity);
            }
        }

        let mut visited = Vec::new();
        level
            .view_mut::<(Position, Velocity)>()
            .for_each(|entity: EntityId, (position, velocity): (&mut Position, &mut Velocity)| {
                position.integrate(*velocity, 2.0);
                visited.push(entity);
            });

        assert_eq!(visited, moving);
        for entity in level.iter() {
            let position = level.get::<Position>(entity).unwrap();
            if moving.contains(&entity) {
                assert!((position.y - 2.0).abs() < f32::EPSILON);
            } else {
                assert!(position.y.abs() < f32::EPSILON);
            }
        }
    }

    #[test]
    fn test_view_matches_set_intersection() {
        let mut level = level();
        let entities: Vec<_> = (0..30).map(|_| level.create()).collect();
        for (i, &entity) in entities.iter().enumerate() {
            if i % 2 == 0 {
                level.add(entity, Position::default()).unwrap();
            }
            if i % 3 == 0 {
                level.add(entity, Velocity::default()).unwrap();
            }
            if i % 5 == 0 {
                level.add(entity, Name::from("n")).unwrap();
            }
        }
        // Shuffle dense order a little.
        level.remove_component::<Position>(entities[0]);
        level.add(entities[0], Position::default()).unwrap();

        let expected: BTreeSet<_> = entities
            .iter()
            .copied()
            .filter(|&e| level.has::<Position>(e) && level.has::<Velocity>(e) && level.has::<Name>(e))
            .collect();
        let view = level.view::<(Position, Velocity, Name)>();
        let found: BTreeSet<_> = view.iter().map(|(entity, _)| entity).collect();
        assert_eq!(found, expected);
        assert_eq!(view.len_hint(), 6); // Name is the smallest storage.
    }

    #[test]
    fn test_missing_storage_is_empty_view() {
        let mut level = level();
        let entity = level.create();
        level.add(entity, Position::default()).unwrap();

        let view = level.view::<(Position, Velocity)>();
        assert!(view.is_empty());
        assert_eq!(view.iter().count(), 0);
        assert!(view.get(entity).is_none());
        let (position, velocity) = view.try_get(entity);
        assert!(position.is_some());
        assert!(velocity.is_none());

        let mut view = level.view_mut::<(Velocity,)>();
        assert!(view.entities().is_empty());
        let mut calls = 0;
        view.for_each(|_: EntityId, _: (&mut Velocity,)| calls += 1);
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_view_mut_get_and_try_get() {
        let mut level = level();
        let entity = level.create();
        level.add(entity, Position::default()).unwrap();

        let mut view = level.view_mut::<(Position, Name)>();
        assert!(view.get(entity).is_none());
        let (position, name) = view.try_get(entity);
        position.unwrap().x = 9.0;
        assert!(name.is_none());
        drop(view);

        assert_eq!(level.get::<Position>(entity).map(|p| p.x), Some(9.0));
    }

    #[test]
    #[should_panic(expected = "more than once")]
    fn test_view_mut_rejects_aliasing() {
        let mut level = level();
        let _ = level.view_mut::<(Position, Position)>();
    }

    #[test]
    fn test_cursor_allows_in_place_mutation() {
        let mut level = level();
        let entities: Vec<_> = (0..3).map(|_| level.create()).collect();
        for &entity in &entities {
            level.add(entity, Position::default()).unwrap();
        }

        let mut cursor = level.view_cursor::<(Position,)>();
        let mut seen = Vec::new();
        while let Some((entity, _)) = cursor.next(&level).unwrap() {
            seen.push(entity);
            level.get_mut::<Position>(entity).unwrap().z = 1.0;
            level.replace(entity, Position::new(0.0, 0.0, 2.0)).unwrap();
        }
        assert_eq!(seen, entities);
        assert_eq!(cursor.position(), 3);
    }

    #[test]
    fn test_cursor_detects_structural_change() {
        let mut level = level();
        let a = level.create();
        let b = level.create();
        level.add(a, Position::default()).unwrap();
        level.add(b, Position::default()).unwrap();
        level.add(a, Velocity::default()).unwrap();

        let mut cursor = level.view_cursor::<(Position, Velocity)>();
        assert!(cursor.next(&level).unwrap().is_some());

        level.remove_component::<Position>(b);
        let err = cursor.next(&level).unwrap_err();
        assert_eq!(
            err,
            LevelError::ViewInvalidated {
                component: type_name::<Position>()
            }
        );

        // A storage created after the cursor also counts.
        let mut cursor = level.view_cursor::<(Name,)>();
        level.add(a, Name::from("new")).unwrap();
        assert!(cursor.next(&level).is_err());
    }
}
