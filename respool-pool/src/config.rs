//! # Pool Configuration
//!
//! Purpose: Immutable per-pool bounds, timeouts, and maintenance cadence.
//!
//! ## Design Principles
//! 1. **Fail Fast**: `validate` rejects `min >= max` before a pool exists.
//! 2. **Plain Data**: Public fields plus `with_*` setters; durations travel as
//!    integer milliseconds when (de)serialized.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};

/// Default minimum number of objects kept alive by maintenance.
pub const DEFAULT_MIN_OBJECTS: usize = 5;

/// Default hard cap on created objects.
pub const DEFAULT_MAX_OBJECTS: usize = 20;

/// Extra idle-queue capacity on top of `max_objects`, absorbing transient
/// over-returns.
pub const IDLE_QUEUE_SLACK: usize = 8;

/// Configuration shared by every object of one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Objects the maintenance tick keeps created.
    pub min_objects: usize,
    /// Upper bound on created objects (idle + checked out).
    pub max_objects: usize,
    /// Default ceiling for `acquire` when no explicit timeout is given.
    #[serde(with = "millis", rename = "get_object_timeout_ms")]
    pub get_timeout: Duration,
    /// Idle objects older than this are evicted by the sweep.
    #[serde(with = "millis", rename = "max_idle_time_ms")]
    pub max_idle_time: Duration,
    /// Period of the maintenance tick; zero disables it.
    #[serde(with = "millis", rename = "idle_check_interval_ms")]
    pub idle_check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            min_objects: DEFAULT_MIN_OBJECTS,
            max_objects: DEFAULT_MAX_OBJECTS,
            get_timeout: Duration::from_secs(3),
            max_idle_time: Duration::from_secs(15),
            idle_check_interval: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Checks the `min < max` invariant.
    pub fn validate(&self) -> PoolResult<()> {
        if self.min_objects >= self.max_objects {
            return Err(PoolError::Config {
                min: self.min_objects,
                max: self.max_objects,
            });
        }
        Ok(())
    }

    pub fn with_min_objects(mut self, min: usize) -> Self {
        self.min_objects = min;
        self
    }

    pub fn with_max_objects(mut self, max: usize) -> Self {
        self.max_objects = max;
        self
    }

    pub fn with_get_timeout(mut self, timeout: Duration) -> Self {
        self.get_timeout = timeout;
        self
    }

    pub fn with_max_idle_time(mut self, idle: Duration) -> Self {
        self.max_idle_time = idle;
        self
    }

    /// Sets the maintenance period. `Duration::ZERO` disables the tick.
    pub fn with_idle_check_interval(mut self, interval: Duration) -> Self {
        self.idle_check_interval = interval;
        self
    }

    /// Capacity of the idle queue backing a pool with this configuration.
    pub(crate) fn idle_capacity(&self) -> usize {
        self.max_objects + IDLE_QUEUE_SLACK
    }
}

/// `serde(with = ...)` helper encoding a `Duration` as integer milliseconds.
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
