//! # Byte-Stream Transport
//!
//! Purpose: The connect/send/receive/close capability set the RESP codec
//! drives, plus its Tokio TCP implementation.
//!
//! ## Design Principles
//! 1. **Line Chunks**: `receive` yields one CRLF-terminated chunk at a time;
//!    the codec reassembles bulk payloads from consecutive chunks.
//! 2. **Timeout Is Not Failure**: A silent peer yields `Ok(None)`, keeping
//!    "remote end silent" distinct from I/O errors.
//! 3. **Sticky Diagnostics**: The last OS error code and message stay
//!    readable after the failing call returns.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::trace;

use crate::error::{ClientError, ClientResult};

/// `ETIMEDOUT`, reported by `last_error` after a receive timeout.
pub const TIMED_OUT_CODE: i32 = 110;

/// Byte stream the protocol engine runs over.
#[async_trait]
pub trait Transport: Send + 'static {
    async fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> ClientResult<()>;

    /// Writes the whole buffer; a partial write is [`ClientError::ShortWrite`].
    async fn send(&mut self, data: &[u8]) -> ClientResult<()>;

    /// Next CRLF-terminated chunk, or `Ok(None)` when `timeout` elapses first.
    async fn receive(&mut self, timeout: Duration) -> ClientResult<Option<Bytes>>;

    async fn close(&mut self);

    fn is_connected(&self) -> bool;

    /// OS error code and message of the most recent failure.
    fn last_error(&self) -> Option<(i32, String)>;
}

/// Tokio TCP transport.
#[derive(Default)]
pub struct TcpTransport {
    stream: Option<BufReader<TcpStream>>,
    // Survives a timed-out receive so a late line is not lost.
    pending: Vec<u8>,
    last_error: Option<(i32, String)>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, err: &io::Error) {
        self.last_error = Some((err.raw_os_error().unwrap_or(-1), err.to_string()));
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> ClientResult<()> {
        let addr = format!("{host}:{port}");
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                self.record(&source);
                return Err(ClientError::Connect { addr, source });
            }
            Err(_) => {
                let source = io::Error::new(io::ErrorKind::TimedOut, "connect timed out");
                self.last_error = Some((TIMED_OUT_CODE, source.to_string()));
                return Err(ClientError::Connect { addr, source });
            }
        };
        stream.set_nodelay(true)?;
        trace!(%addr, "transport connected");
        self.stream = Some(BufReader::new(stream));
        self.pending.clear();
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> ClientResult<()> {
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?.get_mut();
        let mut written = 0;
        while written < data.len() {
            match stream.write(&data[written..]).await {
                Ok(0) => {
                    return Err(ClientError::ShortWrite {
                        written,
                        expected: data.len(),
                    })
                }
                Ok(n) => written += n,
                Err(err) => {
                    self.record(&err);
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> ClientResult<Option<Bytes>> {
        let reader = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        match tokio::time::timeout(timeout, reader.read_until(b'\n', &mut self.pending)).await {
            Err(_) => {
                self.last_error = Some((TIMED_OUT_CODE, "receive timed out".to_string()));
                Ok(None)
            }
            Ok(Ok(0)) => {
                let err = io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by peer");
                self.record(&err);
                Err(err.into())
            }
            Ok(Ok(_)) => Ok(Some(Bytes::from(std::mem::take(&mut self.pending)))),
            Ok(Err(err)) => {
                self.record(&err);
                Err(err.into())
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.get_mut().shutdown().await;
        }
        self.pending.clear();
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn last_error(&self) -> Option<(i32, String)> {
        self.last_error.clone()
    }
}
