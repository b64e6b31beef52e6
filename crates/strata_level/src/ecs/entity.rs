//! # Entity Handles
//!
//! Entities are lightweight identifiers consisting of:
//! - A slot index into the level's entity table
//! - A generation counter for safe slot reuse

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an entity.
///
/// The ID is split into two parts:
/// - Lower 32 bits: Slot index in the level's entity table
/// - Upper 32 bits: Generation counter for detecting stale references
///
/// The all-zero value is reserved as [`EntityId::NULL`]. Generations start at
/// one, so no live entity is ever issued the null handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Null/invalid entity ID.
    pub const NULL: Self = Self(0);

    /// First generation handed out for a fresh slot.
    pub const FIRST_GENERATION: u32 = 1;

    /// Creates a new entity ID from index and generation.
    ///
    /// # Arguments
    ///
    /// * `index` - The slot index (0 to 2^32-1)
    /// * `generation` - The generation counter (1 to 2^32-1 for live entities)
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the index portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Checks if this entity ID is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the raw packed value.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Rebuilds an entity ID from a raw packed value.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Returns the same slot with the next generation, or `None` once the
    /// generation counter is exhausted.
    #[inline]
    #[must_use]
    pub(crate) fn next_generation(self) -> Option<Self> {
        let generation = self.generation().checked_add(1)?;
        Some(Self::new(self.index(), generation))
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("EntityId(null)")
        } else {
            write!(f, "EntityId({}v{})", self.index(), self.generation())
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_roundtrip() {
        let id = EntityId::new(12345, 67890);
        assert_eq!(id.index(), 12345);
        assert_eq!(id.generation(), 67890);
        assert_eq!(EntityId::from_bits(id.to_bits()), id);
    }

    #[test]
    fn test_extreme_fields() {
        let id = EntityId::new(u32::MAX, u32::MAX);
        assert_eq!(id.index(), u32::MAX);
        assert_eq!(id.generation(), u32::MAX);
        assert!(id.next_generation().is_none());
    }

    #[test]
    fn test_null_is_never_issued() {
        assert!(EntityId::default().is_null());
        assert!(!EntityId::new(0, EntityId::FIRST_GENERATION).is_null());
        assert_ne!(EntityId::new(0, 1), EntityId::new(0, 2));
        assert_ne!(EntityId::new(0, 1), EntityId::new(1, 1));
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", EntityId::NULL), "EntityId(null)");
        assert_eq!(format!("{:?}", EntityId::new(3, 7)), "EntityId(3v7)");
    }
}
