use thiserror::Error;

use crate::enhancer::InvalidEnhancerConfig;
use crate::fingerprinting::InvalidFingerprintingConfig;

/// Result type alias for grouping operations
pub type Result<T, E = GroupingError> = std::result::Result<T, E>;

/// A stored event references a grouping config that does not exist (anymore).
///
/// This is never papered over with a different config, since regrouping an
/// event with another algorithm would silently move it to another issue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown grouping config '{0}'")]
pub struct GroupingConfigNotFound(pub String);

/// Errors that can occur while loading or running a grouping configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GroupingError {
    #[error(transparent)]
    ConfigNotFound(#[from] GroupingConfigNotFound),

    #[error("invalid enhancements: {0}")]
    InvalidEnhancerConfig(#[from] InvalidEnhancerConfig),

    #[error("invalid fingerprinting rules: {0}")]
    InvalidFingerprintingConfig(#[from] InvalidFingerprintingConfig),

    #[error("malformed grouping config: {0}")]
    MalformedConfig(String),
}
