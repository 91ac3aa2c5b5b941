//! Error types for the environment initializer.

use thiserror::Error;

/// Errors raised while publishing the process environment.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvironmentError {
    /// The snapshot was already published; the first one stays in effect.
    #[error("Process environment already initialized")]
    AlreadyInitialized,

    /// A locale, timezone or encoding identifier was not recognized.
    #[error("Invalid configuration for {setting} {value:?}: {reason}")]
    InvalidConfiguration {
        setting: &'static str,
        value: String,
        reason: String,
    },
}

impl EnvironmentError {
    pub(crate) fn invalid(setting: &'static str, value: &str, reason: impl Into<String>) -> Self {
        EnvironmentError::InvalidConfiguration {
            setting,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
