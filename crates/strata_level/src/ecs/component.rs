//! # Component System
//!
//! Components are plain data attached to entities. Every component type can
//! be copied between levels and written to / read from the abstract value
//! tree. The defaults cover the common case; types that hold entity
//! references override the hooks to remap them.

use std::collections::{HashMap, HashSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::copy::CopyContext;
use super::entity::EntityId;
use super::level::Level;
use super::serialize::{ReadContext, WriteContext};
use crate::error::{LevelError, LevelResult};

/// Trait for level components.
///
/// Components must be:
/// - `Clone`: copied between levels by the default copy hook
/// - `Default`: constructible by name for tooling and scripting
/// - `Serialize + DeserializeOwned`: persisted through the value tree
///
/// # Example
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use strata_level::Component;
///
/// #[derive(Clone, Debug, Default, Serialize, Deserialize)]
/// struct Health(u32);
///
/// impl Component for Health {}
/// ```
pub trait Component: Clone + Default + Serialize + DeserializeOwned + 'static {
    /// Called during a level copy for each source entity owning this
    /// component. The default replaces the destination's component with a
    /// clone of `self`.
    ///
    /// Hooks that need the complete source-to-destination mapping should
    /// register a fix-up with [`CopyContext::defer`].
    ///
    /// # Errors
    ///
    /// Returns an error if the destination entity is no longer valid.
    fn on_copy(&self, ctx: &mut CopyContext<'_, '_>, destination: EntityId) -> LevelResult<()> {
        ctx.destination_mut().replace(destination, self.clone())?;
        Ok(())
    }

    /// Converts the component to a value tree.
    ///
    /// # Errors
    ///
    /// Returns [`LevelError::Serialization`] if the value cannot be encoded.
    fn write(&self, _ctx: &WriteContext<'_>) -> LevelResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rebuilds the component from a value tree.
    ///
    /// # Errors
    ///
    /// Returns [`LevelError::Serialization`] if the value has the wrong shape.
    fn read(value: &Value, _ctx: &ReadContext<'_>) -> LevelResult<Self> {
        Ok(Self::deserialize(value)?)
    }
}

/// Position component for entities.
///
/// Represents a 3D position in level space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
    /// Z coordinate.
    pub z: f32,
}

impl Component for Position {}

impl Position {
    /// Creates a new position.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Returns the squared distance to another position.
    ///
    /// This avoids the sqrt call for distance comparisons.
    #[inline]
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Advances the position by `velocity` over `delta_time` seconds.
    #[inline]
    pub fn integrate(&mut self, velocity: Velocity, delta_time: f32) {
        self.x += velocity.x * delta_time;
        self.y += velocity.y * delta_time;
        self.z += velocity.z * delta_time;
    }
}

/// Velocity component for entities.
///
/// Represents movement speed in level units per second.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    /// X velocity component.
    pub x: f32,
    /// Y velocity component.
    pub y: f32,
    /// Z velocity component.
    pub z: f32,
}

impl Component for Velocity {}

impl Velocity {
    /// Creates a new velocity.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Human-readable entity name, shown by editors.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Name(pub String);

impl Component for Name {}

impl From<&str> for Name {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

/// Links an entity to its parent in the level hierarchy.
///
/// The link is an entity reference, so it is remapped when copied and stored
/// as the parent's UUID when written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parent(pub EntityId);

impl Component for Parent {
    fn on_copy(&self, ctx: &mut CopyContext<'_, '_>, destination: EntityId) -> LevelResult<()> {
        let source_parent = self.0;
        // An unset link stays unset, matching how it is persisted.
        if source_parent.is_null() {
            ctx.destination_mut().replace(destination, Self(EntityId::NULL))?;
            return Ok(());
        }
        let parent_uuid = ctx.source().uuid(source_parent);

        // Resolved once every copied entity exists in the destination.
        ctx.defer(move |level, mapping| {
            let resolved = mapping.get(source_parent).or_else(|| {
                parent_uuid
                    .map(|uuid| level.find(uuid))
                    .filter(|parent| !parent.is_null())
            });

            match resolved {
                Some(parent) => {
                    if let Err(err) = level.replace(destination, Parent(parent)) {
                        tracing::warn!(%err, "dropping parent link of copied entity");
                    }
                }
                None => {
                    level.remove_component::<Parent>(destination);
                }
            }
        });
        Ok(())
    }

    fn write(&self, ctx: &WriteContext<'_>) -> LevelResult<Value> {
        Ok(ctx
            .uuid_of(self.0)
            .map_or(Value::Null, |uuid| Value::String(uuid.to_string())))
    }

    fn read(value: &Value, ctx: &ReadContext<'_>) -> LevelResult<Self> {
        match value {
            Value::Null => Ok(Self(EntityId::NULL)),
            Value::String(text) => {
                let uuid = Uuid::parse_str(text)
                    .map_err(|err| LevelError::Malformed(format!("parent uuid {text:?}: {err}")))?;
                Ok(Self(ctx.find(uuid)))
            }
            other => Err(LevelError::Malformed(format!(
                "expected a parent uuid, found {other}"
            ))),
        }
    }
}

impl Level {
    /// Returns `root` followed by every entity whose [`Parent`] chain leads to
    /// it, in breadth-first order. Empty if `root` is not valid.
    #[must_use]
    pub fn subtree(&self, root: EntityId) -> Vec<EntityId> {
        if !self.contains(root) {
            return Vec::new();
        }

        let mut children: HashMap<EntityId, Vec<EntityId>> = HashMap::new();
        if let Some(parents) = self.storage::<Parent>() {
            for (child, parent) in parents.iter() {
                children.entry(parent.0).or_default().push(child);
            }
        }

        let mut visited = HashSet::from([root]);
        let mut order = vec![root];
        let mut cursor = 0;
        while let Some(&entity) = order.get(cursor) {
            cursor += 1;
            for &child in children.get(&entity).into_iter().flatten() {
                if visited.insert(child) {
                    order.push(child);
                }
            }
        }
        order
    }
}
