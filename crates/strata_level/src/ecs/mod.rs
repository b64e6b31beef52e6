//! # Entity Component Store
//!
//! Entities, per-type dense component storages, the component registry,
//! views, level-to-level copy and persistence.
//!
//! ## Design Philosophy
//!
//! - Components live in dense arrays, one per type, created on first use
//! - Entity IDs are slot indices with generation counters
//! - Generic code reaches concrete types through the registry only

mod component;
mod copy;
mod entity;
mod level;
mod registry;
mod serialize;
mod storage;
mod view;

pub use component::{Component, Name, Parent, Position, Velocity};
pub use copy::{CopyContext, EntityMap};
pub use entity::EntityId;
pub use level::Level;
pub use registry::{ComponentRegistry, ComponentType};
pub use serialize::{ReadContext, WriteContext};
pub use storage::{ComponentHandle, ComponentStorage, ErasedStorage};
pub use view::{Query, View, ViewCursor, ViewIter, ViewMut};
