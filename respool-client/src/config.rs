//! # Client Configuration
//!
//! Purpose: Server address, credentials, timeouts, payload encoding, and the
//! bounds of the connection pool, loadable from JSON.

use std::time::Duration;

use respool_pool::{millis, PoolConfig};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::serialize::Serialization;

/// Configuration for the Redis client and its pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Sent with `AUTH` right after connecting.
    pub password: Option<String>,
    /// Selected with `SELECT` when non-zero.
    pub db: u32,
    #[serde(with = "millis", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
    /// Per-reply receive timeout.
    #[serde(with = "millis", rename = "receive_timeout_ms")]
    pub receive_timeout: Duration,
    pub serialization: Serialization,
    pub pool: PoolConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            connect_timeout: Duration::from_secs(3),
            receive_timeout: Duration::from_secs(3),
            serialization: Serialization::None,
            pool: PoolConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parses a JSON document; missing fields keep their defaults.
    pub fn from_json(raw: &str) -> ClientResult<Self> {
        let config: ClientConfig =
            serde_json::from_str(raw).map_err(|err| ClientError::Config(err.to_string()))?;
        config
            .pool
            .validate()
            .map_err(|err| ClientError::Config(err.to_string()))?;
        Ok(config)
    }

    /// `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn with_addr(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_db(mut self, db: u32) -> Self {
        self.db = db;
        self
    }

    pub fn with_serialization(mut self, serialization: Serialization) -> Self {
        self.serialization = serialization;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_a_local_server() {
        let config = ClientConfig::default();
        assert_eq!(config.addr(), "127.0.0.1:6379");
        assert_eq!(config.db, 0);
        assert_eq!(config.serialization, Serialization::None);
        assert_eq!(config.pool.max_objects, 20);
    }

    #[test]
    fn parses_partial_json() {
        let raw = r#"{
            "host": "cache.internal",
            "db": 2,
            "receive_timeout_ms": 500,
            "serialization": "json",
            "pool": { "min_objects": 1, "max_objects": 4 }
        }"#;
        let config = ClientConfig::from_json(raw).unwrap();
        assert_eq!(config.host, "cache.internal");
        assert_eq!(config.port, 6379);
        assert_eq!(config.db, 2);
        assert_eq!(config.receive_timeout, Duration::from_millis(500));
        assert_eq!(config.serialization, Serialization::Json);
        assert_eq!(config.pool.max_objects, 4);
    }

    #[test]
    fn rejects_invalid_pool_bounds() {
        let raw = r#"{ "pool": { "min_objects": 4, "max_objects": 4 } }"#;
        assert!(matches!(ClientConfig::from_json(raw), Err(ClientError::Config(_))));
    }
}
