use serde::Deserialize;

use crate::registry::is_known_configuration;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("unknown background grouping config: {0}")]
    UnknownGroupingConfig(String),
    #[error("cache capacity must be greater than zero")]
    InvalidCacheCapacity,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
}

fn default_max_capacity() -> u64 {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_capacity: default_max_capacity(),
        }
    }
}

/// Engine-wide settings, the counterpart of the per-project options.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Config {
    /// Grouping config computed next to the primary one for evaluation
    /// purposes. Not set disables background grouping.
    #[serde(default)]
    pub background_grouping_config_id: Option<String>,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(id) = &self.background_grouping_config_id
            && !is_known_configuration(id)
        {
            return Err(ValidationError::UnknownGroupingConfig(id.clone()));
        }
        if self.cache.max_capacity == 0 {
            return Err(ValidationError::InvalidCacheCapacity);
        }
        Ok(())
    }
}
