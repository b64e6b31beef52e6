//! # Level Error Types
//!
//! All errors that can occur while manipulating a level, its storages and the
//! component registry.

use thiserror::Error;
use uuid::Uuid;

use crate::ecs::EntityId;

/// Errors that can occur in the level store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LevelError {
    /// The handle failed the slot/generation check.
    #[error("invalid entity handle: {0:?}")]
    InvalidEntity(EntityId),

    /// The entity already owns a component of this type.
    #[error("entity {entity:?} already has component {component}")]
    DuplicateComponent {
        /// The entity that was targeted.
        entity: EntityId,
        /// Name of the component type.
        component: &'static str,
    },

    /// The UUID already identifies a live entity.
    #[error("uuid {0} is already in use")]
    DuplicateUuid(Uuid),

    /// A component name or type was registered twice.
    #[error("component type already registered: {0}")]
    DuplicateRegistration(String),

    /// No component type is registered under this name.
    #[error("unknown component type: {0}")]
    UnknownComponent(String),

    /// A storage bound to a view cursor was structurally modified.
    #[error("view invalidated by a structural change to {component}")]
    ViewInvalidated {
        /// Name of the modified component type.
        component: &'static str,
    },

    /// A component value could not be converted to or from the value tree.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A serialized level document has an unexpected shape.
    #[error("malformed level document: {0}")]
    Malformed(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for LevelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for LevelError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type for level operations.
pub type LevelResult<T> = Result<T, LevelError>;
