//! # Component Type Registry
//!
//! A catalog mapping a human-readable name and a [`TypeId`] to a type-erased
//! [`ComponentType`]. Generic code (copy, persistence, editors, scripting)
//! goes through the registry instead of naming concrete component types.
//!
//! The registry is an explicit object, built once at startup and shared by
//! every [`Level`] through an `Arc`. Registration takes a write lock, lookups
//! take a read lock; each type is registered at most once for the lifetime of
//! the registry and is never unregistered.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use super::component::{Component, Name, Parent, Position, Velocity};
use super::copy::CopyContext;
use super::entity::EntityId;
use super::level::Level;
use super::serialize::{ReadContext, WriteContext};
use crate::error::{LevelError, LevelResult};

/// Type-erased operations for one registered component type.
pub trait ComponentType: Send + Sync {
    /// Registered name, unique within the registry.
    fn name(&self) -> &str;

    /// Identity of the concrete component type.
    fn component_type_id(&self) -> TypeId;

    /// Rust type name of the concrete component type.
    fn type_name(&self) -> &'static str;

    /// Whether `entity` owns this component in `level`.
    fn has_component(&self, level: &Level, entity: EntityId) -> bool;

    /// Default-constructs the component on `entity` and returns it untyped.
    ///
    /// # Errors
    ///
    /// [`LevelError::InvalidEntity`] or [`LevelError::DuplicateComponent`].
    fn add_component<'l>(&self, level: &'l mut Level, entity: EntityId)
        -> LevelResult<&'l mut dyn Any>;

    /// Writes the component of `entity`, or `None` if it has none.
    ///
    /// # Errors
    ///
    /// Propagates the component's write failure.
    fn write(&self, entity: EntityId, ctx: &WriteContext<'_>) -> LevelResult<Option<Value>>;

    /// Reads a component from `value` and places it on `entity`, replacing
    /// any existing one. Returns `false` if `entity` is not valid.
    ///
    /// # Errors
    ///
    /// Propagates the component's read failure.
    fn read(&self, value: &Value, entity: EntityId, ctx: &mut ReadContext<'_>)
        -> LevelResult<bool>;

    /// Copies the component from `source` (in the context's source level) to
    /// `destination` (in its destination level) through the component's copy
    /// hook. Returns `false` if `source` has no such component.
    fn copy(&self, ctx: &mut CopyContext<'_, '_>, destination: EntityId, source: EntityId) -> bool;
}

/// [`ComponentType`] implementation for a concrete component.
struct ComponentVTable<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component> ComponentType for ComponentVTable<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn component_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn has_component(&self, level: &Level, entity: EntityId) -> bool {
        level.has::<T>(entity)
    }

    fn add_component<'l>(
        &self,
        level: &'l mut Level,
        entity: EntityId,
    ) -> LevelResult<&'l mut dyn Any> {
        let component = level.add(entity, T::default())?;
        Ok(component)
    }

    fn write(&self, entity: EntityId, ctx: &WriteContext<'_>) -> LevelResult<Option<Value>> {
        ctx.level()
            .get::<T>(entity)
            .map(|component| component.write(ctx))
            .transpose()
    }

    fn read(
        &self,
        value: &Value,
        entity: EntityId,
        ctx: &mut ReadContext<'_>,
    ) -> LevelResult<bool> {
        if !ctx.level().contains(entity) {
            return Ok(false);
        }
        let component = T::read(value, ctx)?;
        ctx.level_mut().replace(entity, component)?;
        Ok(true)
    }

    fn copy(&self, ctx: &mut CopyContext<'_, '_>, destination: EntityId, source: EntityId) -> bool {
        let Some(component) = ctx.source().get::<T>(source) else {
            return false;
        };
        if let Err(err) = component.on_copy(ctx, destination) {
            tracing::warn!(component = %self.name, %err, "copy hook failed");
        }
        true
    }
}

#[derive(Default)]
struct RegistryInner {
    ordered: Vec<Arc<dyn ComponentType>>,
    by_name: HashMap<String, usize>,
    by_type: HashMap<TypeId, usize>,
}

/// Catalog of registered component types.
///
/// # Example
///
/// ```rust
/// use strata_level::{ComponentRegistry, Position};
///
/// let registry = ComponentRegistry::new();
/// registry.register::<Position>("Position").unwrap();
/// assert!(registry.register::<Position>("Other").is_err());
/// assert_eq!(registry.find("Position").unwrap().type_name(), std::any::type_name::<Position>());
/// ```
#[derive(Default)]
pub struct ComponentRegistry {
    inner: RwLock<RegistryInner>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in components registered under
    /// their type names (`Position`, `Velocity`, `Name`, `Parent`).
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        let registered = registry.register_builtins();
        debug_assert!(registered.is_ok(), "fresh registry rejected a built-in");
        registry
    }

    /// Registers the built-in components.
    ///
    /// # Errors
    ///
    /// [`LevelError::DuplicateRegistration`] if any of them is already present.
    pub fn register_builtins(&self) -> LevelResult<()> {
        self.register::<Position>("Position")?;
        self.register::<Velocity>("Velocity")?;
        self.register::<Name>("Name")?;
        self.register::<Parent>("Parent")?;
        Ok(())
    }

    /// Registers component type `T` under `name`.
    ///
    /// # Errors
    ///
    /// [`LevelError::DuplicateRegistration`] if the name or the type is
    /// already registered. The registry is unchanged in that case.
    pub fn register<T: Component>(&self, name: &str) -> LevelResult<()> {
        let mut inner = self.inner.write();
        let type_id = TypeId::of::<T>();

        if inner.by_name.contains_key(name) || inner.by_type.contains_key(&type_id) {
            tracing::warn!(name, component = type_name::<T>(), "duplicate component registration");
            return Err(LevelError::DuplicateRegistration(name.to_owned()));
        }

        let slot = inner.ordered.len();
        inner.ordered.push(Arc::new(ComponentVTable::<T> {
            name: name.to_owned(),
            _marker: PhantomData,
        }));
        inner.by_name.insert(name.to_owned(), slot);
        inner.by_type.insert(type_id, slot);

        tracing::debug!(name, component = type_name::<T>(), "registered component type");
        Ok(())
    }

    /// Looks up a component type by registered name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<Arc<dyn ComponentType>> {
        let inner = self.inner.read();
        inner.by_name.get(name).map(|&slot| Arc::clone(&inner.ordered[slot]))
    }

    /// Looks up a component type by type identity.
    #[must_use]
    pub fn find_by_type(&self, type_id: TypeId) -> Option<Arc<dyn ComponentType>> {
        let inner = self.inner.read();
        inner.by_type.get(&type_id).map(|&slot| Arc::clone(&inner.ordered[slot]))
    }

    /// Looks up the registration of `T`.
    #[must_use]
    pub fn find_of<T: 'static>(&self) -> Option<Arc<dyn ComponentType>> {
        self.find_by_type(TypeId::of::<T>())
    }

    /// Registered names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .ordered
            .iter()
            .map(|component_type| component_type.name().to_owned())
            .collect()
    }

    /// Registered component types, in registration order.
    #[must_use]
    pub fn types(&self) -> Vec<Arc<dyn ComponentType>> {
        self.inner.read().ordered.clone()
    }

    /// Number of registered component types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().ordered.len()
    }

    /// Whether no component type is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Health(u32);

    impl Component for Health {}

    #[test]
    fn test_register_and_find() {
        let registry = ComponentRegistry::new();
        assert!(registry.is_empty());
        registry.register::<Health>("Health").unwrap();

        let by_name = registry.find("Health").unwrap();
        let by_type = registry.find_of::<Health>().unwrap();
        assert!(Arc::ptr_eq(&by_name, &by_type));
        assert_eq!(by_name.component_type_id(), TypeId::of::<Health>());
        assert!(registry.find("Mana").is_none());
        assert!(registry.find_by_type(TypeId::of::<u8>()).is_none());
    }

    #[test]
    fn test_duplicate_name_or_type_rejected() {
        let registry = ComponentRegistry::with_builtins();
        let before = registry.len();

        assert_eq!(
            registry.register::<Health>("Position"),
            Err(LevelError::DuplicateRegistration("Position".to_owned()))
        );
        assert!(registry.register::<Position>("Location").is_err());
        assert_eq!(registry.len(), before);
        assert!(registry.find("Location").is_none());
        assert!(registry.find_of::<Health>().is_none());
    }

    #[test]
    fn test_names_keep_registration_order() {
        let registry = ComponentRegistry::with_builtins();
        registry.register::<Health>("Health").unwrap();
        assert_eq!(
            registry.names(),
            vec!["Position", "Velocity", "Name", "Parent", "Health"]
        );
    }

    #[test]
    fn test_add_component_by_name() {
        let registry = Arc::new(ComponentRegistry::new());
        registry.register::<Health>("Health").unwrap();
        let mut level = Level::new(Arc::clone(&registry));
        let entity = level.create();

        let component_type = registry.find("Health").unwrap();
        let added = component_type.add_component(&mut level, entity).unwrap();
        *added.downcast_mut::<Health>().unwrap() = Health(40);

        assert!(component_type.has_component(&level, entity));
        assert_eq!(level.get::<Health>(entity), Some(&Health(40)));
        assert!(matches!(
            component_type.add_component(&mut level, entity),
            Err(LevelError::DuplicateComponent { .. })
        ));
    }

    #[test]
    fn test_copy_reports_missing_source_component() {
        let registry = Arc::new(ComponentRegistry::with_builtins());
        let mut source = Level::new(Arc::clone(&registry));
        let mut destination = Level::new(Arc::clone(&registry));
        let with = source.create();
        let without = source.create();
        source.add(with, Name::from("a")).unwrap();
        let target = destination.create();

        let name_type = registry.find("Name").unwrap();
        let mut ctx = CopyContext::new(&source, &mut destination);
        assert!(name_type.copy(&mut ctx, target, with));
        assert!(!name_type.copy(&mut ctx, target, without));
        drop(ctx);

        assert_eq!(destination.get::<Name>(target), Some(&Name::from("a")));
    }
}
