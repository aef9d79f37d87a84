//! # Respool Redis Client
//!
//! Purpose: Provide an async Redis client over RESP2 with pooled connections,
//! typed command handlers, pipelines, and MULTI/EXEC transactions.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Connections live in a `respool_pool::Pool` and
//!    report their own health through its lifecycle hooks.
//! 2. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.
//! 3. **Pluggable Payloads**: Values go through a `none`/`json`/`native`
//!    serializer chosen by configuration.
//! 4. **Distinct Failures**: Exhaustion, silence, and broken framing are
//!    separate errors so callers can back off appropriately.

mod client;
mod codec;
mod command;
mod config;
mod connection;
mod error;
mod response;
mod serialize;
mod session;
mod transport;

pub use client::RedisClient;
pub use codec::{encode_command, recv, send_command, MAX_BULK_LEN};
pub use command::{Command, Control, Del, Discard, Exec, Get, Multi, Ping, Raw, Reply, SRandMember, Set};
pub use config::ClientConfig;
pub use connection::{RedisConnection, RedisConnector};
pub use error::{ClientError, ClientResult, ProtocolError};
pub use response::{Response, Status, Value};
pub use serialize::Serialization;
pub use session::{is_exempt, DeferredCommand, Route, Session, EXEMPT_COMMANDS};
pub use transport::{TcpTransport, Transport, TIMED_OUT_CODE};
