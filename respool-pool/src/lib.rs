//! # Respool Object Pools
//!
//! Purpose: Generic async object pooling for expensive resources such as
//! network connections, with a registry of named pools and scoped borrowing.
//!
//! ## Design Principles
//! 1. **Bounded Creation**: A pool never holds more than `max_objects`
//!    resources, idle and checked out combined.
//! 2. **Hook-Driven Health**: Resources validate themselves on checkout and
//!    reset themselves on release; failures evict instead of recycling.
//! 3. **Cooperative Scheduling**: Everything runs on Tokio; no lock is held
//!    across a suspension point.
//! 4. **Scoped Ownership**: Closure and task scopes guarantee every borrowed
//!    object goes back to its pool.

mod config;
mod error;
mod object;
mod pool;
mod registry;
mod scoped;

pub use config::{millis, PoolConfig, DEFAULT_MAX_OBJECTS, DEFAULT_MIN_OBJECTS, IDLE_QUEUE_SLACK};
pub use error::{BoxError, PoolError, PoolResult};
pub use object::{Checkout, FnFactory, Handle, ObjectFactory, PoolObject, Pooled};
pub use pool::{Disposition, Pool, PoolStats, DEFAULT_ACQUIRE_RETRIES};
pub use registry::PoolRegistry;
pub use scoped::{task_scope, TaskBorrow};
