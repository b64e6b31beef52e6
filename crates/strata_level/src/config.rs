//! # Level Configuration
//!
//! Sizing hints applied when a level is created. Loaded once at startup,
//! typically from a TOML file owned by the embedding application.
//!
//! ```toml
//! initial_entity_capacity = 4096
//! initial_component_capacity = 256
//! ```

use serde::Deserialize;

use crate::error::LevelResult;

/// Default number of entity slots reserved up front.
pub const DEFAULT_ENTITY_CAPACITY: usize = 1024;

/// Default number of components reserved per storage on first use.
pub const DEFAULT_COMPONENT_CAPACITY: usize = 64;

/// Configuration for a [`Level`](crate::Level).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LevelConfig {
    /// Entity slots reserved when the level is created.
    pub initial_entity_capacity: usize,
    /// Components reserved by each storage when it is first created.
    pub initial_component_capacity: usize,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            initial_entity_capacity: DEFAULT_ENTITY_CAPACITY,
            initial_component_capacity: DEFAULT_COMPONENT_CAPACITY,
        }
    }
}

impl LevelConfig {
    /// Parses a configuration from TOML text. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`LevelError::Config`](crate::LevelError::Config) if the text is
    /// not valid TOML or contains unknown keys.
    pub fn from_toml(text: &str) -> LevelResult<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LevelError;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = LevelConfig::from_toml("initial_entity_capacity = 16").unwrap();
        assert_eq!(config.initial_entity_capacity, 16);
        assert_eq!(config.initial_component_capacity, DEFAULT_COMPONENT_CAPACITY);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(LevelConfig::from_toml("").unwrap(), LevelConfig::default());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = LevelConfig::from_toml("max_entities = 3").unwrap_err();
        assert!(matches!(err, LevelError::Config(_)));
    }
}
