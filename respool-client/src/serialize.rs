//! # Payload Serialization
//!
//! Purpose: Pluggable encoding of values written to and read from Redis.
//!
//! ## Modes
//! - `none`: strings and byte sequences go over the wire untouched; other
//!   scalars travel in their textual form (`42`, `true`).
//! - `json`: `serde_json`.
//! - `native`: `bincode`, a compact Rust-native binary encoding.

use bytes::Bytes;
use serde::de::value::BytesDeserializer;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Encoding applied to command payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Serialization {
    #[default]
    None,
    Json,
    Native,
}

impl Serialization {
    pub fn encode<V: Serialize + ?Sized>(self, value: &V) -> ClientResult<Bytes> {
        match self {
            Serialization::None => encode_plain(value),
            Serialization::Json => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|err| ClientError::Serialization(err.to_string())),
            Serialization::Native => bincode::serialize(value)
                .map(Bytes::from)
                .map_err(|err| ClientError::Serialization(err.to_string())),
        }
    }

    pub fn decode<V: DeserializeOwned>(self, raw: &Bytes) -> ClientResult<V> {
        match self {
            Serialization::None => decode_plain(raw),
            Serialization::Json => {
                serde_json::from_slice(raw).map_err(|err| ClientError::Serialization(err.to_string()))
            }
            Serialization::Native => {
                bincode::deserialize(raw).map_err(|err| ClientError::Serialization(err.to_string()))
            }
        }
    }
}

fn encode_plain<V: Serialize + ?Sized>(value: &V) -> ClientResult<Bytes> {
    let value =
        serde_json::to_value(value).map_err(|err| ClientError::Serialization(err.to_string()))?;
    match value {
        serde_json::Value::String(text) => Ok(Bytes::from(text)),
        serde_json::Value::Null => Ok(Bytes::new()),
        serde_json::Value::Array(items) => match byte_sequence(&items) {
            Some(raw) => Ok(Bytes::from(raw)),
            None => Ok(Bytes::from(serde_json::Value::Array(items).to_string())),
        },
        other => Ok(Bytes::from(other.to_string())),
    }
}

// Byte buffers reach serde_json as arrays of small integers.
fn byte_sequence(items: &[serde_json::Value]) -> Option<Vec<u8>> {
    items
        .iter()
        .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
        .collect()
}

fn decode_plain<V: DeserializeOwned>(raw: &Bytes) -> ClientResult<V> {
    // Strings and byte buffers accept the raw payload; numbers and booleans
    // are parsed from their textual form.
    let deserializer = BytesDeserializer::<serde::de::value::Error>::new(raw);
    V::deserialize(deserializer)
        .or_else(|_| serde_json::from_slice(raw))
        .map_err(|err| ClientError::Serialization(err.to_string()))
}
