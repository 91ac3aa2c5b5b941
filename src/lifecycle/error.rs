//! Error types for the application lifecycle.

use crate::config::ConfigError;
use crate::environment::EnvironmentError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Runtime already started")]
    AlreadyStarted,

    #[error("Runtime not started")]
    NotStarted,

    #[error("Scheduler task failed: {0}")]
    Coordinator(String),
}

impl LifecycleError {
    /// Process exit status for a failure that aborts the binary (`sysexits.h`).
    ///
    /// A rejected locale, timezone or encoding is the only failure reported as 78.
    pub fn exit_code(&self) -> i32 {
        match self {
            LifecycleError::Environment(EnvironmentError::InvalidConfiguration { .. }) => 78,
            LifecycleError::Config(ConfigError::Read { .. }) => 66,
            LifecycleError::Config(ConfigError::Parse(_))
            | LifecycleError::Config(ConfigError::InvalidValue { .. }) => 65,
            _ => 70,
        }
    }
}
