//! Error types for the cache coordinator.

use thiserror::Error;

/// Errors returned by [`CacheCoordinator`](super::CacheCoordinator) lookups.
///
/// Cloneable because one computation outcome is delivered to every waiter of a key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The compute function failed. The failure is not memoized.
    #[error("Computation for {cache}/{key} failed: {cause}")]
    Failed {
        cache: String,
        key: String,
        cause: String,
    },

    /// Waiting on another caller's computation exceeded the wait bound.
    #[error("Timed out waiting for {cache}/{key}")]
    Timeout { cache: String, key: String },

    /// The cached value has a different type than the one requested.
    #[error("Cached value for {cache}/{key} has an unexpected type")]
    TypeMismatch { cache: String, key: String },
}
