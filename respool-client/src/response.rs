//! # Decoded Replies
//!
//! Purpose: One decoded RESP reply: its status, the error type and message
//! for error replies, and the payload.

use bytes::Bytes;

/// Outcome class of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
    /// Nothing arrived within the receive timeout.
    Timeout,
}

/// Decoded payload of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// `$-1` or `*-1`.
    Nil,
    Integer(i64),
    /// Simple strings and bulk strings.
    Bytes(Bytes),
    Array(Vec<Value>),
    /// Placeholder for an array element whose own reply was not OK.
    Failed,
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&'static str> for Value {
    fn from(text: &'static str) -> Self {
        Value::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

/// One decoded reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    /// First token of an error reply, e.g. `ERR` or `WRONGTYPE`.
    pub error_type: Option<String>,
    /// Diagnostic text: the full error line, or the transport's timeout
    /// message.
    pub message: String,
    pub data: Value,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Response {
            status: Status::Ok,
            error_type: None,
            message: String::new(),
            data,
        }
    }

    /// Builds an error reply from the line after the `-` marker.
    ///
    /// The error type ends at the earlier of the first space or newline.
    pub fn error(line: &str) -> Self {
        let end = line.find([' ', '\n']).unwrap_or(line.len());
        Response {
            status: Status::Error,
            error_type: Some(line[..end].to_string()),
            message: line.to_string(),
            data: Value::Nil,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Response {
            status: Status::Timeout,
            error_type: None,
            message: message.into(),
            data: Value::Nil,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}
