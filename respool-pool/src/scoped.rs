//! # Scoped Borrowing
//!
//! Purpose: Borrow pooled objects for a bounded region of code and hand them
//! back automatically, whether the region succeeds or fails.
//!
//! ## Design Principles
//! 1. **Closure Scope**: `with_object` owns the acquire/release pair; the
//!    caller only ever sees `&mut T` for the duration of its future.
//! 2. **Task Scope**: `borrow_for_task` parks one object per pool key in a
//!    Tokio task-local installed by [`task_scope`], and every parked object is
//!    released when that scope finishes.
//! 3. **Errors Win**: When both the caller's future and the release fail, the
//!    caller's error is returned and the release failure is logged.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::{MappedMutexGuard, MutexGuard};
use tracing::{debug, warn};

use crate::error::{PoolError, PoolResult};
use crate::object::{PoolObject, Pooled};
use crate::pool::{Pool, DEFAULT_ACQUIRE_RETRIES};
use crate::registry::PoolRegistry;

tokio::task_local! {
    static TASK_SCOPE: TaskScope;
}

#[derive(Default)]
struct TaskScope {
    borrows: Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>,
    releases: Mutex<Vec<BoxFuture<'static, ()>>>,
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        // Only reached with pending releases when the scope future was
        // cancelled before it could finish.
        let pending = std::mem::take(self.releases.get_mut());
        if pending.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(run_releases(pending));
            }
            Err(_) => warn!(
                count = pending.len(),
                "task scope dropped outside a runtime, borrowed objects leaked"
            ),
        }
    }
}

async fn run_releases(releases: Vec<BoxFuture<'static, ()>>) {
    for release in releases.into_iter().rev() {
        release.await;
    }
}

/// Runs `fut` inside a fresh task scope and releases every object borrowed
/// through [`PoolRegistry::borrow_for_task`] once it completes.
pub async fn task_scope<F: Future>(fut: F) -> F::Output {
    TASK_SCOPE
        .scope(TaskScope::default(), async move {
            let output = fut.await;
            let releases = TASK_SCOPE.with(|scope| std::mem::take(&mut *scope.releases.lock()));
            run_releases(releases).await;
            output
        })
        .await
}

/// An object parked in the current task scope.
///
/// Clones share the same object. After the scope ends the slot is empty and
/// [`TaskBorrow::lock`] yields `None`.
pub struct TaskBorrow<T> {
    slot: Arc<tokio::sync::Mutex<Option<Pooled<T>>>>,
}

impl<T> Clone for TaskBorrow<T> {
    fn clone(&self) -> Self {
        TaskBorrow {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> TaskBorrow<T> {
    /// Exclusive access to the borrowed object.
    pub async fn lock(&self) -> Option<MappedMutexGuard<'_, Pooled<T>>> {
        MutexGuard::try_map(self.slot.lock().await, |slot| slot.as_mut()).ok()
    }
}

impl<T: PoolObject> Pool<T> {
    /// Acquires an object, runs `f` on it, and releases it afterwards.
    ///
    /// Fails with [`PoolError::Empty`] when acquisition yields nothing. A
    /// failing release surfaces only when `f` itself succeeded.
    pub async fn with_object<R, E, F>(&self, timeout: Option<Duration>, f: F) -> Result<R, E>
    where
        E: From<PoolError>,
        F: for<'a> FnOnce(&'a mut T) -> BoxFuture<'a, Result<R, E>>,
    {
        let Some(mut obj) = self.acquire(timeout, DEFAULT_ACQUIRE_RETRIES).await? else {
            return Err(PoolError::Empty.into());
        };
        let handle = obj.handle();
        let result = f(&mut *obj).await;

        match self.release(obj).await {
            Ok(_) => result,
            Err(err) if result.is_ok() => Err(err.into()),
            Err(err) => {
                warn!(%handle, error = %err, "release after failed call also failed");
                result
            }
        }
    }
}

impl PoolRegistry {
    /// Runs `f` on an object from the pool registered under `key`.
    ///
    /// See [`Pool::with_object`]. An unknown key fails with
    /// [`PoolError::Unregistered`].
    pub async fn invoke<T, R, E, F>(&self, key: &str, timeout: Option<Duration>, f: F) -> Result<R, E>
    where
        T: PoolObject,
        E: From<PoolError>,
        F: for<'a> FnOnce(&'a mut T) -> BoxFuture<'a, Result<R, E>>,
    {
        let pool = self.registered::<T>(key)?;
        pool.with_object(timeout, f).await
    }

    /// Borrows one object from `key` for the rest of the current task scope.
    ///
    /// Repeated calls for the same key inside one scope return the same
    /// object. Fails with [`PoolError::NoTaskScope`] outside [`task_scope`].
    pub async fn borrow_for_task<T: PoolObject>(
        &self,
        key: &str,
        timeout: Option<Duration>,
    ) -> PoolResult<TaskBorrow<T>> {
        let slot_key = format!("respool::borrow::{key}");
        let parked = TASK_SCOPE
            .try_with(|scope| {
                scope
                    .borrows
                    .lock()
                    .get(&slot_key)
                    .map(|parked| parked.downcast_ref::<TaskBorrow<T>>().cloned())
            })
            .map_err(|_| PoolError::NoTaskScope)?;
        match parked {
            Some(Some(borrow)) => return Ok(borrow),
            Some(None) => {
                return Err(PoolError::InvalidPoolType {
                    key: key.to_string(),
                })
            }
            None => {}
        }

        let pool = self.registered::<T>(key)?;
        let obj = pool
            .acquire(timeout, DEFAULT_ACQUIRE_RETRIES)
            .await?
            .ok_or(PoolError::Empty)?;
        let handle = obj.handle();
        let borrow = TaskBorrow {
            slot: Arc::new(tokio::sync::Mutex::new(Some(obj))),
        };

        let release: BoxFuture<'static, ()> = {
            let slot = Arc::clone(&borrow.slot);
            Box::pin(async move {
                let obj = slot.lock().await.take();
                if let Some(obj) = obj {
                    if let Err(err) = pool.release(obj).await {
                        warn!(%handle, error = %err, "task-scoped release failed");
                    }
                }
            })
        };

        let parked = borrow.clone();
        TASK_SCOPE
            .try_with(move |scope| {
                scope.borrows.lock().insert(slot_key, Box::new(parked));
                scope.releases.lock().push(release);
            })
            .map_err(|_| PoolError::NoTaskScope)?;
        debug!(%key, %handle, "object borrowed for task");
        Ok(borrow)
    }

    fn registered<T: PoolObject>(&self, key: &str) -> PoolResult<Pool<T>> {
        self.get_pool::<T>(key)?.ok_or_else(|| PoolError::Unregistered {
            key: key.to_string(),
        })
    }
}
