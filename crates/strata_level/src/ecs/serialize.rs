//! # Level Persistence
//!
//! Bridges the level to an abstract value tree (`serde_json::Value`). The
//! on-disk encoding belongs to the caller; this module only defines the
//! document shape:
//!
//! ```text
//! [
//!   { "uuid": "…", "components": { "Position": {…}, "Parent": "…" } },
//!   …
//! ]
//! ```
//!
//! Loading runs in two passes, like a copy: every entity is created with its
//! stored UUID first, then components are read, so entity references can be
//! resolved regardless of document order.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use super::entity::EntityId;
use super::level::Level;
use crate::error::{LevelError, LevelResult};

const UUID_KEY: &str = "uuid";
const COMPONENTS_KEY: &str = "components";

/// Context handed to component writers.
#[derive(Clone, Copy)]
pub struct WriteContext<'a> {
    level: &'a Level,
}

impl<'a> WriteContext<'a> {
    /// Creates a write context over `level`.
    #[must_use]
    pub const fn new(level: &'a Level) -> Self {
        Self { level }
    }

    /// The level being written.
    #[must_use]
    pub const fn level(&self) -> &'a Level {
        self.level
    }

    /// Persistent identity of `entity`, if it is valid.
    #[must_use]
    pub fn uuid_of(&self, entity: EntityId) -> Option<Uuid> {
        self.level.uuid(entity)
    }
}

/// Context handed to component readers.
pub struct ReadContext<'a> {
    level: &'a mut Level,
}

impl<'a> ReadContext<'a> {
    /// Creates a read context over `level`.
    pub fn new(level: &'a mut Level) -> Self {
        Self { level }
    }

    /// The level being read into.
    #[must_use]
    pub fn level(&self) -> &Level {
        &*self.level
    }

    /// Mutable access to the level being read into.
    pub fn level_mut(&mut self) -> &mut Level {
        &mut *self.level
    }

    /// Resolves a persistent identity, or [`EntityId::NULL`] if unknown.
    #[must_use]
    pub fn find(&self, uuid: Uuid) -> EntityId {
        self.level.find(uuid)
    }
}

impl Level {
    /// Writes one entity and every registered component it owns.
    ///
    /// # Errors
    ///
    /// Returns [`LevelError::InvalidEntity`] for stale handles, or the first
    /// component write failure.
    pub fn write_entity(&self, entity: EntityId) -> LevelResult<Value> {
        let uuid = self.uuid(entity).ok_or(LevelError::InvalidEntity(entity))?;
        let ctx = WriteContext::new(self);

        let mut components = Map::new();
        for component_type in self.registry().types() {
            if let Some(value) = component_type.write(entity, &ctx)? {
                components.insert(component_type.name().to_owned(), value);
            }
        }

        let mut record = Map::new();
        record.insert(UUID_KEY.to_owned(), Value::String(uuid.to_string()));
        record.insert(COMPONENTS_KEY.to_owned(), Value::Object(components));
        Ok(Value::Object(record))
    }

    /// Writes every live entity.
    ///
    /// # Errors
    ///
    /// Returns the first component write failure.
    pub fn save(&self) -> LevelResult<Value> {
        let records = self
            .iter()
            .map(|entity| self.write_entity(entity))
            .collect::<LevelResult<Vec<_>>>()?;
        Ok(Value::Array(records))
    }

    /// Loads a document produced by [`save`](Self::save), returning the created
    /// entities in document order.
    ///
    /// Components whose name is not registered are skipped.
    ///
    /// # Errors
    ///
    /// - [`LevelError::Malformed`] if the document shape is wrong; nothing is
    ///   created in that case.
    /// - [`LevelError::DuplicateUuid`] if a UUID is already live in this level
    ///   or repeated in the document; nothing is created in that case.
    /// - The first component read failure; entities created by this call are
    ///   removed again, so the level is left as it was.
    pub fn load(&mut self, document: &Value) -> LevelResult<Vec<EntityId>> {
        let records = document
            .as_array()
            .ok_or_else(|| LevelError::Malformed("expected an array of entities".to_owned()))?;

        let mut parsed = Vec::with_capacity(records.len());
        let mut seen = HashSet::with_capacity(records.len());
        for record in records {
            let uuid = parse_uuid(record)?;
            let components = record
                .get(COMPONENTS_KEY)
                .and_then(Value::as_object)
                .ok_or_else(|| LevelError::Malformed(format!("entity {uuid} has no components")))?;
            if !seen.insert(uuid) || !self.find(uuid).is_null() {
                return Err(LevelError::DuplicateUuid(uuid));
            }
            parsed.push((uuid, components));
        }

        let entities: Vec<EntityId> = parsed
            .iter()
            .map(|&(uuid, _)| self.create_with_uuid(uuid))
            .collect();

        let registry = Arc::clone(self.registry());
        let mut ctx = ReadContext::new(self);
        let read: LevelResult<()> = entities
            .iter()
            .zip(&parsed)
            .try_for_each(|(&entity, (_, components))| {
                for (name, value) in *components {
                    match registry.find(name) {
                        Some(component_type) => {
                            component_type.read(value, entity, &mut ctx)?;
                        }
                        None => {
                            tracing::warn!(component = %name, "skipping unregistered component");
                        }
                    }
                }
                Ok(())
            });

        // A failed read rolls back every entity this load created.
        if let Err(err) = read {
            for &entity in &entities {
                self.remove(entity);
            }
            tracing::warn!(%err, "load failed, created entities removed");
            return Err(err);
        }

        tracing::debug!(count = entities.len(), "loaded entities");
        Ok(entities)
    }
}

fn parse_uuid(record: &Value) -> LevelResult<Uuid> {
    let text = record
        .get(UUID_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| LevelError::Malformed("entity record without uuid".to_owned()))?;
    Uuid::parse_str(text).map_err(|err| LevelError::Malformed(format!("uuid {text:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{Name, Parent, Position, Velocity};
    use crate::ecs::registry::ComponentRegistry;
    use serde_json::json;

    fn level() -> Level {
        Level::new(Arc::new(ComponentRegistry::with_builtins()))
    }

    #[test]
    fn test_write_entity_shape() {
        let mut level = level();
        let entity = level.create();
        level.add(entity, Position::new(1.0, 2.0, 3.0)).unwrap();
        level.add(entity, Name::from("crate")).unwrap();

        let record = level.write_entity(entity).unwrap();
        let uuid = level.uuid(entity).unwrap().to_string();
        assert_eq!(record["uuid"], json!(uuid));
        assert_eq!(record["components"]["Name"], json!("crate"));
        assert_eq!(
            record["components"]["Position"],
            json!({ "x": 1.0, "y": 2.0, "z": 3.0 })
        );
        assert!(record["components"].get("Velocity").is_none());
    }

    #[test]
    fn test_write_invalid_entity() {
        let mut level = level();
        let entity = level.create();
        level.remove(entity);
        assert_eq!(
            level.write_entity(entity).unwrap_err(),
            LevelError::InvalidEntity(entity)
        );
    }

    #[test]
    fn test_load_resolves_forward_parent_reference() {
        let parent_uuid = Uuid::new_v4();
        let child_uuid = Uuid::new_v4();
        // Child listed before its parent.
        let document = json!([
            { "uuid": child_uuid.to_string(), "components": { "Parent": parent_uuid.to_string() } },
            { "uuid": parent_uuid.to_string(), "components": { "Name": "root" } },
        ]);

        let mut level = level();
        let loaded = level.load(&document).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(level.get::<Parent>(loaded[0]), Some(&Parent(loaded[1])));
        assert_eq!(level.find(parent_uuid), loaded[1]);
    }

    #[test]
    fn test_load_rejects_malformed_without_side_effects() {
        let mut level = level();
        let document = json!([
            { "uuid": Uuid::new_v4().to_string(), "components": {} },
            { "uuid": "not-a-uuid", "components": {} },
        ]);
        assert!(matches!(level.load(&document), Err(LevelError::Malformed(_))));
        assert!(matches!(level.load(&json!({})), Err(LevelError::Malformed(_))));
        assert!(level.is_empty());
    }

    #[test]
    fn test_load_rejects_duplicate_uuid() {
        let mut level = level();
        let existing = level.create();
        let uuid = level.uuid(existing).unwrap();
        let document = json!([{ "uuid": uuid.to_string(), "components": {} }]);

        assert_eq!(level.load(&document), Err(LevelError::DuplicateUuid(uuid)));
        assert_eq!(level.len(), 1);
    }

    #[test]
    fn test_load_skips_unknown_components() {
        let mut level = level();
        let document = json!([
            { "uuid": Uuid::new_v4().to_string(), "components": { "Mystery": 1, "Name": "a" } },
        ]);
        let loaded = level.load(&document).unwrap();
        assert_eq!(level.get::<Name>(loaded[0]), Some(&Name::from("a")));
    }

    #[test]
    fn test_load_reports_bad_component_value() {
        let mut level = level();
        let existing = level.create();
        let good = Uuid::new_v4();
        let document = json!([
            { "uuid": good.to_string(), "components": { "Velocity": { "x": 1.0, "y": 0.0, "z": 0.0 } } },
            { "uuid": Uuid::new_v4().to_string(), "components": { "Position": "north" } },
        ]);
        assert!(matches!(
            level.load(&document),
            Err(LevelError::Serialization(_))
        ));

        // Nothing from the failed load remains.
        assert_eq!(level.len(), 1);
        assert!(level.contains(existing));
        assert!(level.find(good).is_null());
        assert!(level.storage::<Velocity>().map_or(true, |s| s.is_empty()));

        // The same UUIDs can be loaded once the document is fixed.
        let fixed = json!([{ "uuid": good.to_string(), "components": {} }]);
        assert_eq!(level.load(&fixed).unwrap().len(), 1);
    }
}
