//! # Pool Errors
//!
//! Purpose: One error type for every failure the pool engine, the registry,
//! and the scoped invoker can surface.
//!
//! ## Design Principles
//! 1. **Distinct Statuses**: Exhaustion, factory failure, and hook failure are
//!    separate variants so callers can apply different backoff policies.
//! 2. **Accounting First**: By the time one of these reaches a caller the pool
//!    has already restored its counters and dropped the offending handle.

use std::time::Duration;

use thiserror::Error;

/// Boxed error produced by factories and object hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced by the pool engine.
#[derive(Debug, Error)]
pub enum PoolError {
    /// `min_objects` must be strictly below `max_objects`.
    #[error("invalid pool bounds: min {min} must be smaller than max {max}")]
    Config { min: usize, max: usize },

    /// No object became available within the acquire timeout.
    #[error("pool exhausted: no object available within {timeout:?}")]
    Exhausted { timeout: Duration },

    /// The object factory failed to create a resource.
    #[error("object factory failed: {0}")]
    Factory(#[source] BoxError),

    /// The `before_use` hook failed; the object was evicted.
    #[error("object validation failed: {0}")]
    Validation(#[source] BoxError),

    /// The `restore_on_release` hook failed; the object was evicted.
    #[error("object restore failed: {0}")]
    Restore(#[source] BoxError),

    /// Acquisition through the invoker yielded no object.
    #[error("pool is empty")]
    Empty,

    /// Nothing is registered under `key`.
    #[error("no pool registered under `{key}`")]
    Unregistered { key: String },

    /// The pool registered under `key` manages a different object type.
    #[error("pool `{key}` does not manage the requested object type")]
    InvalidPoolType { key: String },

    /// A task-scoped borrow was requested outside of [`crate::task_scope`].
    #[error("no task scope is active for this borrow")]
    NoTaskScope,
}

impl PoolError {
    /// Returns true for failures that a later retry may resolve.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PoolError::Exhausted { .. } | PoolError::Factory(_) | PoolError::Empty
        )
    }
}
