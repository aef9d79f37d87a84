//! # Object Pool
//!
//! Purpose: Bounded, concurrency-safe lifecycle management for homogeneous
//! resources: create on demand up to a cap, recycle through an idle queue,
//! evict stale objects, and keep a warm minimum alive.
//!
//! ## Design Principles
//! 1. **Reserve Then Create**: A creation slot is claimed with an atomic
//!    increment before the factory suspends, and rolled back on failure, so
//!    concurrent creators can never push `created` past `max_objects`.
//! 2. **No Lock Across Await**: The membership map is only touched in short
//!    critical sections; every suspension point runs with no lock held.
//! 3. **Teardown Before Rethrow**: Hook and factory failures restore the
//!    accounting first, then surface the error.
//! 4. **Soft Destroy**: Destroying a pool drains the idle queue; objects still
//!    checked out are torn down when they come back.
//!
//! ## Structure Overview
//!
//! ```text
//! Pool<T> (cheap clone)
//!   └── inner: Arc<PoolInner<T>>
//!         ├── created: AtomicUsize          idle + checked out
//!         ├── idle_tx / idle_rx             bounded queue, cap = max + slack
//!         ├── membership: Handle -> bool    true while the object is idle
//!         ├── destroyed: AtomicBool
//!         └── ticker: JoinHandle            maintenance every interval
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_channel::{Receiver, Sender};
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::object::{Checkout, Handle, ObjectFactory, PoolObject, Pooled, Reclaim};

/// Retries `get` grants to failing factories and hooks.
pub const DEFAULT_ACQUIRE_RETRIES: usize = 3;

/// Per-item pop ceiling during the idle sweep, so a concurrent acquire that
/// empties the queue cannot stall the sweep.
const SWEEP_POP_TIMEOUT: Duration = Duration::from_millis(10);

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Objects currently allocated, idle or checked out.
    pub created: usize,
    /// Objects currently checked out.
    pub in_use: usize,
    pub max: usize,
    pub min: usize,
}

/// What happened to an object handed back through `release` or `evict`.
#[derive(Debug)]
#[must_use]
pub enum Disposition<T> {
    /// Back in the idle queue.
    Recycled,
    /// Torn down and removed from the pool's accounting.
    Destroyed,
    /// Not checked out from this pool; returned to the caller untouched.
    Foreign(Pooled<T>),
}

impl<T> Disposition<T> {
    /// False when the pool refused the object.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Disposition::Foreign(_))
    }
}

struct PoolInner<T: PoolObject> {
    config: PoolConfig,
    factory: Arc<dyn ObjectFactory<Object = T>>,
    created: AtomicUsize,
    idle_tx: Sender<Pooled<T>>,
    idle_rx: Receiver<Pooled<T>>,
    membership: Mutex<HashMap<Handle, bool>>,
    destroyed: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: PoolObject> Drop for PoolInner<T> {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.abort();
        }
    }
}

/// Bounded object pool handle.
pub struct Pool<T: PoolObject> {
    inner: Arc<PoolInner<T>>,
}

impl<T: PoolObject> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Pool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: PoolObject> Pool<T> {
    /// Creates a pool. Starts the maintenance tick when the configured
    /// interval is non-zero and a Tokio runtime is available.
    pub fn new<F>(config: PoolConfig, factory: F) -> PoolResult<Self>
    where
        F: ObjectFactory<Object = T>,
    {
        Self::with_shared_factory(config, Arc::new(factory))
    }

    /// Same as [`Pool::new`] for a factory that is already shared.
    pub fn with_shared_factory(
        config: PoolConfig,
        factory: Arc<dyn ObjectFactory<Object = T>>,
    ) -> PoolResult<Self> {
        config.validate()?;
        let (idle_tx, idle_rx) = async_channel::bounded(config.idle_capacity());
        let inner = Arc::new(PoolInner {
            config,
            factory,
            created: AtomicUsize::new(0),
            idle_tx,
            idle_rx,
            membership: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
            ticker: Mutex::new(None),
        });

        let ticker = spawn_maintenance(&inner);
        *inner.ticker.lock() = ticker;
        Ok(Pool { inner })
    }

    /// Configuration the pool was built with.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Objects currently allocated.
    pub fn created(&self) -> usize {
        self.inner.created.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// True when `obj` is a checked-out member of this pool.
    pub fn owns(&self, obj: &Pooled<T>) -> bool {
        self.membership(obj.handle()) == Some(false)
    }

    /// True when `handle` belongs to this pool and sits in the idle queue.
    pub fn is_idle(&self, handle: Handle) -> bool {
        self.membership(handle) == Some(true)
    }

    /// Acquires with the configured timeout and default retries.
    pub async fn get(&self) -> PoolResult<Option<Pooled<T>>> {
        self.acquire(None, DEFAULT_ACQUIRE_RETRIES).await
    }

    /// Checks an object out of the pool.
    ///
    /// Returns `Ok(None)` when the pool is destroyed, or when the last retry
    /// ended on a declined validation. Fails with `Exhausted` when nothing
    /// became idle within `timeout`, or with the factory/validation error once
    /// `retries` are used up.
    pub async fn acquire(
        &self,
        timeout: Option<Duration>,
        mut retries: usize,
    ) -> PoolResult<Option<Pooled<T>>> {
        let timeout = timeout.unwrap_or(self.inner.config.get_timeout);
        loop {
            if self.is_destroyed() {
                return Ok(None);
            }

            if self.inner.idle_rx.is_empty() {
                if let Err(err) = self.spawn_object().await {
                    if retries == 0 {
                        return Err(err);
                    }
                    warn!(error = %err, retries, "object creation failed, retrying");
                    retries -= 1;
                    continue;
                }
            }

            let mut entry = match tokio::time::timeout(timeout, self.inner.idle_rx.recv()).await {
                Ok(Ok(entry)) => entry,
                // Queue closed: the pool was destroyed while we waited.
                Ok(Err(_)) => return Ok(None),
                Err(_) => return Err(PoolError::Exhausted { timeout }),
            };
            let handle = entry.handle();
            self.mark(handle, false);

            match entry.object_mut().before_use().await {
                Ok(Checkout::Ready) => {
                    if self.is_destroyed() {
                        self.dispose(entry).await;
                        return Ok(None);
                    }
                    entry.touch();
                    return Ok(Some(entry));
                }
                Ok(Checkout::Declined) => {
                    debug!(%handle, "object declined checkout, evicting");
                    self.dispose(entry).await;
                    if retries == 0 {
                        return Ok(None);
                    }
                }
                Err(err) => {
                    warn!(%handle, error = %err, "object validation failed, evicting");
                    self.dispose(entry).await;
                    if retries == 0 {
                        return Err(PoolError::Validation(err));
                    }
                }
            }
            retries -= 1;
        }
    }

    /// Returns a checked-out object to the idle queue.
    ///
    /// Objects from another pool come back as [`Disposition::Foreign`]. After
    /// `destroy` the object is torn down instead. A failing restore hook
    /// evicts the object and surfaces the error.
    pub async fn release(&self, mut obj: Pooled<T>) -> PoolResult<Disposition<T>> {
        let handle = obj.handle();
        if self.membership(handle) != Some(false) {
            return Ok(Disposition::Foreign(obj));
        }
        if self.is_destroyed() {
            self.dispose(obj).await;
            return Ok(Disposition::Destroyed);
        }

        if let Err(err) = obj.object_mut().restore_on_release().await {
            warn!(%handle, error = %err, "object restore failed, evicting");
            self.dispose(obj).await;
            return Err(PoolError::Restore(err));
        }

        self.mark(handle, true);
        if let Err(err) = self.inner.idle_tx.try_send(obj) {
            let obj = err.into_inner();
            self.mark(handle, false);
            self.dispose(obj).await;
            return Ok(Disposition::Destroyed);
        }
        Ok(Disposition::Recycled)
    }

    /// Removes a checked-out object from the pool and tears it down.
    pub async fn evict(&self, obj: Pooled<T>) -> Disposition<T> {
        if self.membership(obj.handle()) != Some(false) {
            return Disposition::Foreign(obj);
        }
        self.dispose(obj).await;
        Disposition::Destroyed
    }

    /// Evicts every idle object unused for longer than `max_idle` and keeps
    /// the rest. Returns the number of evicted objects.
    pub async fn idle_sweep(&self, max_idle: Duration) -> usize {
        let rx = &self.inner.idle_rx;
        let mut keep = Vec::new();
        let mut evicted = 0;

        while !rx.is_empty() {
            let entry = match tokio::time::timeout(SWEEP_POP_TIMEOUT, rx.recv()).await {
                Ok(Ok(entry)) => entry,
                // Drained by a concurrent acquire, or closed by destroy.
                _ => break,
            };
            if entry.idle_for(Instant::now()) > max_idle {
                self.mark(entry.handle(), false);
                self.dispose(entry).await;
                evicted += 1;
            } else {
                keep.push(entry);
            }
        }

        for entry in keep {
            if let Err(err) = self.inner.idle_tx.try_send(entry) {
                let entry = err.into_inner();
                self.mark(entry.handle(), false);
                self.dispose(entry).await;
            }
        }

        if evicted > 0 {
            debug!(evicted, created = self.created(), "idle sweep finished");
        }
        evicted
    }

    /// One maintenance tick: idle sweep, then top up to the minimum.
    pub async fn maintain(&self) -> PoolResult<usize> {
        self.idle_sweep(self.inner.config.max_idle_time).await;
        self.ensure_minimum(self.inner.config.min_objects).await
    }

    /// Creates objects until `n` exist or the cap is reached. Returns the
    /// resulting created count.
    pub async fn ensure_minimum(&self, n: usize) -> PoolResult<usize> {
        while self.created() < n {
            if !self.spawn_object().await? {
                break;
            }
        }
        Ok(self.created())
    }

    /// Cold-start warm-up; alias of [`Pool::ensure_minimum`].
    pub async fn preload(&self, n: usize) -> PoolResult<usize> {
        self.ensure_minimum(n).await
    }

    pub fn stats(&self) -> PoolStats {
        let created = self.created();
        PoolStats {
            created,
            in_use: created.saturating_sub(self.inner.idle_rx.len()),
            max: self.inner.config.max_objects,
            min: self.inner.config.min_objects,
        }
    }

    /// Marks the pool destroyed, stops maintenance, and tears down every idle
    /// object. Idempotent.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(ticker) = self.inner.ticker.lock().take() {
            ticker.abort();
        }

        // Closing first wakes blocked acquirers and rejects racing pushes;
        // queued objects stay receivable.
        self.inner.idle_rx.close();
        let mut drained = 0;
        while let Ok(entry) = self.inner.idle_rx.try_recv() {
            self.mark(entry.handle(), false);
            self.dispose(entry).await;
            drained += 1;
        }
        debug!(drained, remaining = self.created(), "pool destroyed");
    }

    /// Creates one object into the idle queue. `Ok(false)` when the pool is
    /// destroyed or already at capacity.
    async fn spawn_object(&self) -> PoolResult<bool> {
        let inner = &self.inner;
        if self.is_destroyed() {
            return Ok(false);
        }

        let previous = inner.created.fetch_add(1, Ordering::AcqRel);
        let slot = SlotGuard::new(&inner.created);
        if previous >= inner.config.max_objects {
            return Ok(false);
        }

        let object = inner.factory.create().await.map_err(PoolError::Factory)?;
        slot.keep();

        let home: Weak<dyn Reclaim<T>> = Arc::downgrade(&self.inner) as Weak<PoolInner<T>>;
        let entry = Pooled::new(object, Some(home));
        let handle = entry.handle();
        self.mark(handle, true);
        debug!(%handle, created = previous + 1, "pool object created");

        if let Err(err) = inner.idle_tx.try_send(entry) {
            // Closed by destroy() while the factory was running.
            let entry = err.into_inner();
            self.mark(handle, false);
            self.dispose(entry).await;
            return Ok(false);
        }
        Ok(true)
    }

    /// Final disposal: drop the handle, run teardown once, free the slot.
    async fn dispose(&self, entry: Pooled<T>) {
        let handle = entry.handle();
        self.inner.membership.lock().remove(&handle);
        let slot = SlotGuard::new(&self.inner.created);
        let mut object = entry.detach();
        object.teardown().await;
        drop(slot);
        debug!(%handle, created = self.created(), "pool object disposed");
    }

    fn mark(&self, handle: Handle, idle: bool) {
        self.inner.membership.lock().insert(handle, idle);
    }

    fn membership(&self, handle: Handle) -> Option<bool> {
        self.inner.membership.lock().get(&handle).copied()
    }
}

impl<T: PoolObject> Reclaim<T> for PoolInner<T> {
    fn reclaim(&self, handle: Handle, mut object: T) {
        if self.membership.lock().remove(&handle).is_none() {
            return;
        }
        self.created.fetch_sub(1, Ordering::AcqRel);
        warn!(%handle, "pool object dropped without release, evicting");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { object.teardown().await });
            }
            Err(_) => warn!(%handle, "no tokio runtime available, teardown skipped"),
        }
    }
}

/// One unit of `created`, handed back on drop unless kept. Held across the
/// factory and teardown awaits so a cancelled caller cannot strand the slot.
struct SlotGuard<'a> {
    created: &'a AtomicUsize,
    kept: bool,
}

impl<'a> SlotGuard<'a> {
    fn new(created: &'a AtomicUsize) -> Self {
        SlotGuard {
            created,
            kept: false,
        }
    }

    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.created.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

fn spawn_maintenance<T: PoolObject>(inner: &Arc<PoolInner<T>>) -> Option<JoinHandle<()>> {
    let period = inner.config.idle_check_interval;
    if period.is_zero() {
        return None;
    }
    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(runtime) => runtime,
        Err(_) => {
            warn!("no tokio runtime available, pool maintenance disabled");
            return None;
        }
    };

    // Weak so an abandoned pool is not kept alive by its own ticker.
    let weak: Weak<PoolInner<T>> = Arc::downgrade(inner);
    Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            let pool = Pool { inner };
            if let Err(err) = pool.maintain().await {
                warn!(error = %err, "pool maintenance failed");
            }
        }
    }))
}
