//! # Async Client API
//!
//! Purpose: Expose a compact API for issuing Redis commands over pooled
//! connections.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `RedisClient` hides pooling and protocol details.
//! 2. **Scoped Borrowing**: Each call borrows one connection through
//!    `Pool::with_object`, so it goes back to the pool on every exit path.
//! 3. **Typed Payloads**: Values pass through the configured serializer.

use std::time::Duration;

use bytes::Bytes;
use respool_pool::{Pool, PoolError, PoolRegistry, PoolStats};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::command::{Command, Del, Get, Ping, SRandMember, Set};
use crate::config::ClientConfig;
use crate::connection::{RedisConnection, RedisConnector};
use crate::error::{ClientError, ClientResult};

/// Redis client with connection pooling.
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone)]
pub struct RedisClient {
    pool: Pool<RedisConnection>,
}

impl RedisClient {
    /// Creates a client with its own pool.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let pool = Pool::new(config.pool.clone(), RedisConnector::new(config))?;
        Ok(RedisClient { pool })
    }

    /// Creates a client for `host:port` with default configuration.
    pub fn connect(host: impl Into<String>, port: u16) -> ClientResult<Self> {
        Self::new(ClientConfig::default().with_addr(host, port))
    }

    /// Wraps an existing pool, e.g. one materialized by a registry.
    pub fn from_pool(pool: Pool<RedisConnection>) -> Self {
        RedisClient { pool }
    }

    /// Registers a connection pool for `config` under `key`.
    pub fn register(registry: &PoolRegistry, key: &str, config: ClientConfig) -> ClientResult<()> {
        let pool_config = config.pool.clone();
        registry.register(key, RedisConnector::new(config), pool_config)?;
        Ok(())
    }

    /// Client backed by the pool registered under `key`.
    pub fn from_registry(registry: &PoolRegistry, key: &str) -> ClientResult<Self> {
        let pool = registry
            .get_pool::<RedisConnection>(key)?
            .ok_or_else(|| PoolError::Unregistered {
                key: key.to_string(),
            })?;
        Ok(Self::from_pool(pool))
    }

    pub fn pool(&self) -> &Pool<RedisConnection> {
        &self.pool
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Opens the configured minimum of connections ahead of first use.
    pub async fn warm_up(&self) -> ClientResult<usize> {
        let min = self.pool.config().min_objects;
        Ok(self.pool.preload(min).await?)
    }

    /// Runs any command handler on a pooled connection.
    pub async fn command<C: Command>(&self, command: C) -> ClientResult<C::Output> {
        self.pool
            .with_object::<C::Output, ClientError, _>(None, move |conn: &mut RedisConnection| {
                Box::pin(async move { conn.execute(&command).await?.value() })
            })
            .await
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub async fn get<V>(&self, key: impl Into<Bytes>) -> ClientResult<Option<V>>
    where
        V: DeserializeOwned + Send + 'static,
    {
        self.command(Get::new(key)).await
    }

    /// Sets a value for a key without expiration.
    pub async fn set<V>(&self, key: impl Into<Bytes>, value: V) -> ClientResult<()>
    where
        V: Serialize + Send + Sync + 'static,
    {
        self.command(Set::new(key, value)).await
    }

    /// Sets a value and attaches an expiration.
    pub async fn set_ex<V>(&self, key: impl Into<Bytes>, value: V, ttl: Duration) -> ClientResult<()>
    where
        V: Serialize + Send + Sync + 'static,
    {
        self.command(Set::new(key, value).expire_in(ttl)).await
    }

    /// Deletes keys. Returns how many existed.
    pub async fn del<K: Into<Bytes>>(&self, keys: impl IntoIterator<Item = K>) -> ClientResult<i64> {
        self.command(Del::new(keys)).await
    }

    pub async fn ping(&self) -> ClientResult<Bytes> {
        self.command(Ping::new()).await
    }

    /// Random members of a set; `count` follows `SRANDMEMBER` semantics.
    pub async fn srandmember<V>(&self, key: impl Into<Bytes>, count: Option<i64>) -> ClientResult<Vec<Option<V>>>
    where
        V: DeserializeOwned + Send + 'static,
    {
        let command = SRandMember::new(key);
        let command = match count {
            Some(count) => command.count(count),
            None => command,
        };
        self.command(command).await
    }

    /// Destroys the pool; checked-out connections close when they return.
    pub async fn shutdown(&self) {
        self.pool.destroy().await;
    }
}
