//! # Command Handlers
//!
//! Purpose: Per-command policy objects. Each handler builds its argument
//! list through the configured serializer and turns an OK reply into a typed
//! result. Deferral for pipelines and transactions happens in the connection
//! before a handler ever sees a reply.
//!
//! ## Supported Commands
//! - `GET key`
//! - `SET key value [EX seconds]`
//! - `DEL key [key ...]`
//! - `PING [message]`
//! - `SRANDMEMBER key [count]`
//! - `MULTI`, `EXEC`, `DISCARD`
//! - anything else through [`Raw`]

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ClientError, ClientResult};
use crate::response::{Response, Value};
use crate::serialize::Serialization;

/// Transaction-control role of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Multi,
    Exec,
    Discard,
}

/// Contract every command handler satisfies.
pub trait Command: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Lowercase command name, used for deferral decisions and logging.
    fn name(&self) -> &str;

    /// Full argument list, command keyword first.
    fn build_arguments(&self, serialization: Serialization) -> ClientResult<Vec<Bytes>>;

    /// Converts an OK reply into the typed result.
    fn decode_response(
        &self,
        response: Response,
        serialization: Serialization,
    ) -> ClientResult<Self::Output>;

    fn control(&self) -> Option<Control> {
        None
    }
}

/// Result of executing a command on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<T> {
    Value(T),
    /// Deferred into the open transaction.
    Queued,
    /// Deferred into the open pipeline.
    Pipelined,
}

impl<T> Reply<T> {
    /// The decoded value; a deferred reply is [`ClientError::UnexpectedResponse`].
    pub fn value(self) -> ClientResult<T> {
        match self {
            Reply::Value(value) => Ok(value),
            Reply::Queued | Reply::Pipelined => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn is_deferred(&self) -> bool {
        !matches!(self, Reply::Value(_))
    }
}

fn integer_arg(value: impl fmt::Display) -> Bytes {
    Bytes::from(value.to_string())
}

/// `GET key`
pub struct Get<V> {
    key: Bytes,
    _value: PhantomData<fn() -> V>,
}

impl<V> Get<V> {
    pub fn new(key: impl Into<Bytes>) -> Self {
        Get {
            key: key.into(),
            _value: PhantomData,
        }
    }
}

impl<V: DeserializeOwned + Send + 'static> Command for Get<V> {
    type Output = Option<V>;

    fn name(&self) -> &str {
        "get"
    }

    fn build_arguments(&self, _: Serialization) -> ClientResult<Vec<Bytes>> {
        Ok(vec![Bytes::from_static(b"GET"), self.key.clone()])
    }

    fn decode_response(&self, response: Response, ser: Serialization) -> ClientResult<Option<V>> {
        match response.data {
            Value::Nil => Ok(None),
            Value::Bytes(raw) => ser.decode(&raw).map(Some),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

/// `SET key value [EX seconds]`
pub struct Set<V> {
    key: Bytes,
    value: V,
    expire: Option<Duration>,
}

impl<V> Set<V> {
    pub fn new(key: impl Into<Bytes>, value: V) -> Self {
        Set {
            key: key.into(),
            value,
            expire: None,
        }
    }

    /// Expires the key after `ttl` in whole seconds, never less than one.
    pub fn expire_in(mut self, ttl: Duration) -> Self {
        self.expire = Some(ttl);
        self
    }
}

impl<V: Serialize + Send + Sync + 'static> Command for Set<V> {
    type Output = ();

    fn name(&self) -> &str {
        "set"
    }

    fn build_arguments(&self, ser: Serialization) -> ClientResult<Vec<Bytes>> {
        let mut args = vec![Bytes::from_static(b"SET"), self.key.clone(), ser.encode(&self.value)?];
        if let Some(ttl) = self.expire {
            args.push(Bytes::from_static(b"EX"));
            args.push(integer_arg(ttl.as_secs().max(1)));
        }
        Ok(args)
    }

    fn decode_response(&self, response: Response, _: Serialization) -> ClientResult<()> {
        match response.data {
            Value::Bytes(_) | Value::Nil => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

/// `DEL key [key ...]`; yields the number of keys removed.
pub struct Del {
    keys: Vec<Bytes>,
}

impl Del {
    pub fn new<K: Into<Bytes>>(keys: impl IntoIterator<Item = K>) -> Self {
        Del {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl Command for Del {
    type Output = i64;

    fn name(&self) -> &str {
        "del"
    }

    fn build_arguments(&self, _: Serialization) -> ClientResult<Vec<Bytes>> {
        let mut args = Vec::with_capacity(self.keys.len() + 1);
        args.push(Bytes::from_static(b"DEL"));
        args.extend(self.keys.iter().cloned());
        Ok(args)
    }

    fn decode_response(&self, response: Response, _: Serialization) -> ClientResult<i64> {
        response.data.as_integer().ok_or(ClientError::UnexpectedResponse)
    }
}

/// `PING [message]`
#[derive(Default)]
pub struct Ping {
    message: Option<Bytes>,
}

impl Ping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(message: impl Into<Bytes>) -> Self {
        Ping {
            message: Some(message.into()),
        }
    }
}

impl Command for Ping {
    type Output = Bytes;

    fn name(&self) -> &str {
        "ping"
    }

    fn build_arguments(&self, _: Serialization) -> ClientResult<Vec<Bytes>> {
        let mut args = vec![Bytes::from_static(b"PING")];
        args.extend(self.message.clone());
        Ok(args)
    }

    fn decode_response(&self, response: Response, _: Serialization) -> ClientResult<Bytes> {
        match response.data {
            Value::Bytes(data) => Ok(data),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

/// `SRANDMEMBER key [count]`
///
/// Members that fail to come back (nil or a failed array element) are `None`.
pub struct SRandMember<V> {
    key: Bytes,
    count: Option<i64>,
    _member: PhantomData<fn() -> V>,
}

impl<V> SRandMember<V> {
    pub fn new(key: impl Into<Bytes>) -> Self {
        SRandMember {
            key: key.into(),
            count: None,
            _member: PhantomData,
        }
    }

    /// Negative counts allow repeated members.
    pub fn count(mut self, count: i64) -> Self {
        self.count = Some(count);
        self
    }
}

impl<V: DeserializeOwned + Send + 'static> Command for SRandMember<V> {
    type Output = Vec<Option<V>>;

    fn name(&self) -> &str {
        "srandmember"
    }

    fn build_arguments(&self, _: Serialization) -> ClientResult<Vec<Bytes>> {
        let mut args = vec![Bytes::from_static(b"SRANDMEMBER"), self.key.clone()];
        if let Some(count) = self.count {
            args.push(integer_arg(count));
        }
        Ok(args)
    }

    fn decode_response(&self, response: Response, ser: Serialization) -> ClientResult<Vec<Option<V>>> {
        let member = |value: Value| match value {
            Value::Bytes(raw) => ser.decode(&raw).map(Some),
            Value::Nil | Value::Failed => Ok(None),
            _ => Err(ClientError::UnexpectedResponse),
        };
        match response.data {
            Value::Array(items) => items.into_iter().map(member).collect(),
            Value::Nil => Ok(Vec::new()),
            single => member(single).map(|value| vec![value]),
        }
    }
}

/// `MULTI`
pub struct Multi;

impl Command for Multi {
    type Output = ();

    fn name(&self) -> &str {
        "multi"
    }

    fn build_arguments(&self, _: Serialization) -> ClientResult<Vec<Bytes>> {
        Ok(vec![Bytes::from_static(b"MULTI")])
    }

    fn decode_response(&self, _: Response, _: Serialization) -> ClientResult<()> {
        Ok(())
    }

    fn control(&self) -> Option<Control> {
        Some(Control::Multi)
    }
}

/// `EXEC`; yields one value per queued command.
pub struct Exec;

impl Command for Exec {
    type Output = Vec<Value>;

    fn name(&self) -> &str {
        "exec"
    }

    fn build_arguments(&self, _: Serialization) -> ClientResult<Vec<Bytes>> {
        Ok(vec![Bytes::from_static(b"EXEC")])
    }

    fn decode_response(&self, response: Response, _: Serialization) -> ClientResult<Vec<Value>> {
        match response.data {
            Value::Array(items) => Ok(items),
            Value::Nil => Err(ClientError::TransactionAborted),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    fn control(&self) -> Option<Control> {
        Some(Control::Exec)
    }
}

/// `DISCARD`
pub struct Discard;

impl Command for Discard {
    type Output = ();

    fn name(&self) -> &str {
        "discard"
    }

    fn build_arguments(&self, _: Serialization) -> ClientResult<Vec<Bytes>> {
        Ok(vec![Bytes::from_static(b"DISCARD")])
    }

    fn decode_response(&self, _: Response, _: Serialization) -> ClientResult<()> {
        Ok(())
    }

    fn control(&self) -> Option<Control> {
        Some(Control::Discard)
    }
}

/// Any command, sent verbatim; yields the undecoded reply payload.
pub struct Raw {
    name: String,
    args: Vec<Bytes>,
}

impl Raw {
    pub fn new<A: Into<Bytes>>(args: impl IntoIterator<Item = A>) -> Self {
        let args: Vec<Bytes> = args.into_iter().map(Into::into).collect();
        let name = args
            .first()
            .map(|keyword| String::from_utf8_lossy(keyword).to_ascii_lowercase())
            .unwrap_or_default();
        Raw { name, args }
    }
}

impl Command for Raw {
    type Output = Value;

    fn name(&self) -> &str {
        &self.name
    }

    fn build_arguments(&self, _: Serialization) -> ClientResult<Vec<Bytes>> {
        Ok(self.args.clone())
    }

    fn decode_response(&self, response: Response, _: Serialization) -> ClientResult<Value> {
        Ok(response.data)
    }
}
