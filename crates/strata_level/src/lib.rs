//! # Strata Level Store
//!
//! An entity-component container for editor and runtime scenes:
//! - Generation-checked entity handles with persistent UUIDs
//! - Dense per-type component storage with O(1) add, remove and lookup
//! - A shared registry for type-erased access by name
//! - Multi-component views and entity copies between levels
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use strata_level::{ComponentRegistry, EntityId, Level, Position, Velocity};
//!
//! let registry = Arc::new(ComponentRegistry::with_builtins());
//! let mut level = Level::new(Arc::clone(&registry));
//!
//! let entity = level.create();
//! level.add(entity, Position::new(0.0, 0.0, 0.0)).unwrap();
//! level.add(entity, Velocity::new(1.0, 0.0, 0.0)).unwrap();
//!
//! level
//!     .view_mut::<(Position, Velocity)>()
//!     .for_each(|_: EntityId, (position, velocity): (&mut Position, &mut Velocity)| {
//!         position.integrate(*velocity, 0.5);
//!     });
//!
//! let mut copy = Level::new(registry);
//! let copied = level.copy_all_to(&mut copy, true);
//! assert_eq!(copy.get::<Position>(copied[0]).map(|p| p.x), Some(0.5));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

mod config;
pub mod ecs;
mod error;

pub use config::{LevelConfig, DEFAULT_COMPONENT_CAPACITY, DEFAULT_ENTITY_CAPACITY};
pub use ecs::{
    Component, ComponentHandle, ComponentRegistry, ComponentStorage, ComponentType, CopyContext,
    EntityId, EntityMap, ErasedStorage, Level, Name, Parent, Position, Query, ReadContext,
    Velocity, View, ViewCursor, ViewIter, ViewMut, WriteContext,
};
pub use error::{LevelError, LevelResult};
