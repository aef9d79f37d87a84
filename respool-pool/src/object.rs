//! # Pooled Objects
//!
//! Purpose: Define what a pool manages: the factory that creates resources,
//! the optional lifecycle hooks a resource may implement, and the wrapper
//! record that carries the pool-owned bookkeeping.
//!
//! ## Design Principles
//! 1. **Explicit Wrapper**: The handle tag and last-used stamp live on
//!    [`Pooled<T>`], never on the payload itself.
//! 2. **Capability Hooks**: Every hook on [`PoolObject`] has a no-op default,
//!    so plain resources opt in with an empty `impl`.
//! 3. **Declined vs Errored**: `before_use` reports an expected decline through
//!    [`Checkout::Declined`] and reserves `Err` for genuine failures.

use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::BoxError;

// Process-wide so a handle can never collide with one minted by another pool.
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque tag identifying one pooled object for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    fn mint() -> Self {
        Handle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value of the tag.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj-{:08x}", self.0)
    }
}

/// Outcome of the `before_use` hook when it does not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkout {
    /// The object may be handed to the caller.
    Ready,
    /// The object is stale; the pool tears it down and retries.
    Declined,
}

/// Lifecycle hooks a pooled resource may implement.
///
/// All methods default to "nothing to do".
#[async_trait]
pub trait PoolObject: Send + 'static {
    /// Runs on checkout. `Declined` or `Err` evicts the object and retries.
    async fn before_use(&mut self) -> Result<Checkout, BoxError> {
        Ok(Checkout::Ready)
    }

    /// Runs on release. `Err` evicts the object instead of recycling it.
    async fn restore_on_release(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Runs exactly once when the pool disposes of the object.
    async fn teardown(&mut self) {}
}

/// Creates the resources of one pool.
#[async_trait]
pub trait ObjectFactory: Send + Sync + 'static {
    type Object: PoolObject;

    async fn create(&self) -> Result<Self::Object, BoxError>;
}

/// Adapts an async closure into an [`ObjectFactory`].
pub struct FnFactory<F> {
    f: F,
}

impl<F> FnFactory<F> {
    pub fn new(f: F) -> Self {
        FnFactory { f }
    }
}

#[async_trait]
impl<F, Fut, T> ObjectFactory for FnFactory<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    T: PoolObject,
{
    type Object = T;

    async fn create(&self) -> Result<T, BoxError> {
        (self.f)().await
    }
}

/// The pool side of a [`Pooled`] record, reached when the record is dropped
/// without going back through `release` or `evict`.
pub(crate) trait Reclaim<T>: Send + Sync {
    fn reclaim(&self, handle: Handle, object: T);
}

/// A pool-owned record wrapping one resource.
///
/// Dereferences to the payload. The pool identifies the record by its
/// [`Handle`] when it comes back through `release` or `evict`. Dropping a
/// record instead, including when the future holding it is cancelled, evicts
/// it: the slot is freed at once and teardown runs on the current runtime.
pub struct Pooled<T> {
    handle: Handle,
    last_used: Instant,
    // Present until `detach` or drop.
    object: Option<T>,
    home: Option<Weak<dyn Reclaim<T>>>,
}

impl<T> Pooled<T> {
    pub(crate) fn new(object: T, home: Option<Weak<dyn Reclaim<T>>>) -> Self {
        Pooled {
            handle: Handle::mint(),
            last_used: Instant::now(),
            object: Some(object),
            home,
        }
    }

    /// Tag assigned at creation.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Time of creation or of the most recent checkout.
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    pub(crate) fn object_mut(&mut self) -> &mut T {
        &mut **self
    }

    /// Takes the payload out for final disposal; the emptied record no longer
    /// reclaims anything when dropped.
    pub(crate) fn detach(mut self) -> T {
        self.object.take().expect("pooled object exists")
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        let Some(object) = self.object.take() else {
            return;
        };
        if let Some(home) = self.home.as_ref().and_then(Weak::upgrade) {
            home.reclaim(self.handle, object);
        }
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.object.as_ref().expect("pooled object exists")
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.object.as_mut().expect("pooled object exists")
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("handle", &self.handle)
            .field("last_used", &self.last_used)
            .field("object", &self.object)
            .finish()
    }
}
