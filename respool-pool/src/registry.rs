//! # Pool Registry
//!
//! Purpose: Map logical keys to pools, materializing each pool lazily from
//! its registration the first time it is looked up.
//!
//! ## Design Principles
//! 1. **Closure Registrations**: A registration is a factory plus config held
//!    behind a type-erased builder; no runtime type generation.
//! 2. **Typed Lookups**: Pools are stored erased and downcast on lookup; a
//!    mismatched object type is an `InvalidPoolType` error, not a panic.
//! 3. **Init-Once Global**: `PoolRegistry::global()` is created on first use
//!    and lives for the rest of the process. Explicit instances work the same
//!    way and can be passed through application context instead.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let registry = PoolRegistry::new();
//! registry.register("redis", RedisConnector::new(config), PoolConfig::default())?;
//! let pool = registry.get_pool::<RedisConnection>("redis")?.expect("registered");
//! ```

use std::any::{type_name, Any};
use std::future::Future;
use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::config::PoolConfig;
use crate::error::{BoxError, PoolError, PoolResult};
use crate::object::{FnFactory, ObjectFactory, PoolObject};
use crate::pool::{Pool, PoolStats};

static GLOBAL: OnceLock<PoolRegistry> = OnceLock::new();

/// Object-safe view of a `Pool<T>` for heterogeneous storage.
trait ErasedPool: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn stats(&self) -> PoolStats;
    fn destroy(&self) -> BoxFuture<'_, ()>;
}

impl<T: PoolObject> ErasedPool for Pool<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn stats(&self) -> PoolStats {
        Pool::stats(self)
    }

    fn destroy(&self) -> BoxFuture<'_, ()> {
        Box::pin(Pool::destroy(self))
    }
}

type Builder = Arc<dyn Fn(PoolConfig) -> PoolResult<Arc<dyn ErasedPool>> + Send + Sync>;

struct Registration {
    build: Builder,
    /// `None` for anonymous registrations, which take the registry default.
    config: Option<PoolConfig>,
    /// Type name of an anonymous factory, recorded as a lookup alias.
    factory_name: Option<&'static str>,
}

#[derive(Default)]
struct RegistryState {
    registrations: HashMap<String, Registration>,
    pools: HashMap<String, Arc<dyn ErasedPool>>,
    aliases: HashMap<&'static str, String>,
}

struct RegistryInner {
    default_config: RwLock<PoolConfig>,
    state: Mutex<RegistryState>,
}

/// Directory of pools keyed by logical name.
#[derive(Clone)]
pub struct PoolRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolRegistry {
    pub fn new() -> Self {
        PoolRegistry {
            inner: Arc::new(RegistryInner {
                default_config: RwLock::new(PoolConfig::default()),
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    /// Process-wide registry, created on first call.
    pub fn global() -> &'static PoolRegistry {
        GLOBAL.get_or_init(PoolRegistry::new)
    }

    /// Configuration given to anonymous and type-default registrations.
    pub fn default_config(&self) -> PoolConfig {
        self.inner.default_config.read().clone()
    }

    pub fn set_default_config(&self, config: PoolConfig) -> PoolResult<()> {
        config.validate()?;
        *self.inner.default_config.write() = config;
        Ok(())
    }

    /// Registers `factory` under `key` with an explicit configuration.
    ///
    /// Replaces an earlier registration for the same key; a pool already
    /// materialized for it keeps running until `clear_all`.
    pub fn register<F>(&self, key: impl Into<String>, factory: F, config: PoolConfig) -> PoolResult<()>
    where
        F: ObjectFactory,
    {
        config.validate()?;
        let key = key.into();
        debug!(%key, factory = type_name::<F>(), "pool registered");
        self.inner.state.lock().registrations.insert(
            key,
            Registration {
                build: builder::<F::Object>(Arc::new(factory)),
                config: Some(config),
                factory_name: None,
            },
        );
        Ok(())
    }

    /// Registers an ad-hoc async closure under `key`, using the default
    /// configuration. Returns false, and changes nothing, when the key is
    /// already registered.
    pub fn register_anonymous<F, Fut, T>(&self, key: impl Into<String>, create: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: PoolObject,
    {
        let key = key.into();
        let mut state = self.inner.state.lock();
        if state.registrations.contains_key(&key) {
            return false;
        }
        debug!(%key, "anonymous pool registered");
        state.registrations.insert(
            key,
            Registration {
                build: builder::<T>(Arc::new(FnFactory::new(create))),
                config: None,
                factory_name: Some(type_name::<F>()),
            },
        );
        true
    }

    /// True when `key` has a registration or a live pool.
    pub fn contains(&self, key: &str) -> bool {
        let state = self.inner.state.lock();
        let key = state.aliases.get(key).map(String::as_str).unwrap_or(key);
        state.registrations.contains_key(key) || state.pools.contains_key(key)
    }

    /// Returns the pool for `key`, materializing it on first access.
    ///
    /// `Ok(None)` when nothing is registered under `key`; `InvalidPoolType`
    /// when the registered pool manages a different object type.
    pub fn get_pool<T: PoolObject>(&self, key: &str) -> PoolResult<Option<Pool<T>>> {
        let Some(erased) = self.materialize(key)? else {
            return Ok(None);
        };
        downcast::<T>(key, erased.as_ref()).map(Some)
    }

    /// Pool keyed by the factory type itself, registering `F::default()` with
    /// the default configuration on first use.
    pub fn pool_for<F>(&self) -> PoolResult<Pool<F::Object>>
    where
        F: ObjectFactory + Default,
    {
        let key = type_name::<F>();
        if !self.contains(key) {
            self.register(key, F::default(), self.default_config())?;
        }
        self.expect_pool(key)
    }

    /// Pool keyed by the object type, built from `T::default()` through an
    /// anonymous registration on first use.
    pub fn default_pool<T>(&self) -> PoolResult<Pool<T>>
    where
        T: PoolObject + Default,
    {
        let key = type_name::<T>();
        self.register_anonymous(key, || async { Ok::<T, BoxError>(T::default()) });
        self.expect_pool(key)
    }

    /// Stats for every materialized pool.
    pub fn stats(&self) -> Vec<(String, PoolStats)> {
        let state = self.inner.state.lock();
        let mut stats: Vec<_> = state
            .pools
            .iter()
            .map(|(key, pool)| (key.clone(), pool.stats()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    /// Destroys and forgets every materialized pool. Registrations stay, so a
    /// later lookup builds a fresh pool.
    pub async fn clear_all(&self) {
        let pools: Vec<(String, Arc<dyn ErasedPool>)> = {
            let mut state = self.inner.state.lock();
            state.aliases.clear();
            state.pools.drain().collect()
        };
        for (key, pool) in pools {
            pool.destroy().await;
            debug!(%key, "pool cleared");
        }
    }

    fn expect_pool<T: PoolObject>(&self, key: &str) -> PoolResult<Pool<T>> {
        self.get_pool::<T>(key)?.ok_or_else(|| PoolError::InvalidPoolType {
            key: key.to_string(),
        })
    }

    fn materialize(&self, key: &str) -> PoolResult<Option<Arc<dyn ErasedPool>>> {
        let default_config = self.default_config();
        let mut state = self.inner.state.lock();
        let key = match state.aliases.get(key) {
            Some(target) => target.clone(),
            None => key.to_string(),
        };
        if let Some(pool) = state.pools.get(&key) {
            return Ok(Some(Arc::clone(pool)));
        }

        let Some(registration) = state.registrations.get(&key) else {
            return Ok(None);
        };
        let config = registration.config.clone().unwrap_or(default_config);
        let factory_name = registration.factory_name;
        let pool = (registration.build)(config)?;

        state.pools.insert(key.clone(), Arc::clone(&pool));
        if let Some(name) = factory_name {
            state.aliases.insert(name, key.clone());
        }
        debug!(%key, "pool materialized");
        Ok(Some(pool))
    }
}

fn builder<T: PoolObject>(factory: Arc<dyn ObjectFactory<Object = T>>) -> Builder {
    Arc::new(move |config: PoolConfig| -> PoolResult<Arc<dyn ErasedPool>> {
        let pool = Pool::with_shared_factory(config, Arc::clone(&factory))?;
        Ok(Arc::new(pool) as Arc<dyn ErasedPool>)
    })
}

fn downcast<T: PoolObject>(key: &str, erased: &dyn ErasedPool) -> PoolResult<Pool<T>> {
    erased
        .as_any()
        .downcast_ref::<Pool<T>>()
        .cloned()
        .ok_or_else(|| PoolError::InvalidPoolType {
            key: key.to_string(),
        })
}
