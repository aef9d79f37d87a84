//! # Redis Connection
//!
//! Purpose: One pooled connection to a Redis server. Runs command handlers
//! over the RESP codec, applies pipeline and transaction deferral, and
//! reports its own health to the pool through the lifecycle hooks.
//!
//! ## Design Principles
//! 1. **Defer Before Send**: While a pipeline or transaction is open, a
//!    non-exempt command is buffered and answered with a sentinel; the
//!    transport is not touched until the batch is flushed.
//! 2. **One Write Per Batch**: Pipelines and transactions go out as a single
//!    frame, and the replies are read back in order.
//! 3. **Broken Means Evicted**: Any transport or framing failure marks the
//!    connection broken; the pool declines it on checkout and evicts it on
//!    release.
//!
//! ## Structure Overview
//!
//! ```text
//! execute(command)
//!   ├── build_arguments(serialization)
//!   ├── session.route(name) ── Pipeline / Transaction ──> defer, return sentinel
//!   └── Direct
//!         ├── encode_command -> transport.send
//!         ├── codec::recv -> Response
//!         └── settle: OK -> decode_response, otherwise record last error
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use respool_pool::{BoxError, Checkout, ObjectFactory, PoolObject};
use tracing::{debug, trace, warn};

use crate::codec::{self, encode_command};
use crate::command::{Command, Control, Discard, Exec, Multi, Raw, Reply};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::response::{Response, Status, Value};
use crate::serialize::Serialization;
use crate::session::{Route, Session};
use crate::transport::{TcpTransport, Transport};

/// A connection to one Redis server.
pub struct RedisConnection<T: Transport = TcpTransport> {
    transport: T,
    session: Session,
    serialization: Serialization,
    receive_timeout: Duration,
    broken: bool,
    /// Error type and message of the most recent non-OK reply.
    last_error: Option<(String, String)>,
    frame: Vec<u8>,
}

impl RedisConnection<TcpTransport> {
    /// Connects, then authenticates and selects the database when the
    /// configuration asks for it.
    pub async fn connect(config: &ClientConfig) -> ClientResult<Self> {
        let mut transport = TcpTransport::new();
        transport
            .connect(&config.host, config.port, config.connect_timeout)
            .await?;
        let mut conn =
            RedisConnection::with_transport(transport, config.serialization, config.receive_timeout);
        conn.bootstrap(config.password.as_deref(), config.db).await?;
        Ok(conn)
    }
}

impl<T: Transport> RedisConnection<T> {
    /// Wraps an already connected transport.
    pub fn with_transport(transport: T, serialization: Serialization, receive_timeout: Duration) -> Self {
        RedisConnection {
            transport,
            session: Session::default(),
            serialization,
            receive_timeout,
            broken: false,
            last_error: None,
            frame: Vec::new(),
        }
    }

    async fn bootstrap(&mut self, password: Option<&str>, db: u32) -> ClientResult<()> {
        if let Some(password) = password {
            let auth = Raw::new([Bytes::from_static(b"AUTH"), Bytes::from(password.to_string())]);
            self.execute(&auth).await?.value()?;
        }
        if db != 0 {
            let select = Raw::new([Bytes::from_static(b"SELECT"), Bytes::from(db.to_string())]);
            self.execute(&select).await?.value()?;
        }
        Ok(())
    }

    pub fn serialization(&self) -> Serialization {
        self.serialization
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// True once a transport or framing failure made the connection unusable.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Error type and message of the most recent non-OK reply.
    pub fn last_error(&self) -> Option<(&str, &str)> {
        self.last_error
            .as_ref()
            .map(|(kind, message)| (kind.as_str(), message.as_str()))
    }

    /// OS error code and message of the most recent transport failure.
    pub fn transport_error(&self) -> Option<(i32, String)> {
        self.transport.last_error()
    }

    /// Runs one command, or defers it when a pipeline or transaction is open.
    pub async fn execute<C: Command>(&mut self, command: &C) -> ClientResult<Reply<C::Output>> {
        let args = command.build_arguments(self.serialization)?;
        let route = self.session.route(command.name());
        match route {
            Route::Transaction => {
                trace!(command = command.name(), "command queued in transaction");
                self.session.defer(route, command.name(), args);
                return Ok(Reply::Queued);
            }
            Route::Pipeline => {
                trace!(command = command.name(), "command added to pipeline");
                self.session.defer(route, command.name(), args);
                return Ok(Reply::Pipelined);
            }
            Route::Direct => {}
        }

        let response = match command.control() {
            None => self.round_trip(&args).await?,
            Some(Control::Multi) => {
                self.session.check_can_begin_transaction()?;
                let response = self.round_trip(&args).await?;
                if response.is_ok() {
                    self.session.begin_transaction();
                }
                response
            }
            Some(Control::Exec) => self.flush_transaction(&args).await?,
            Some(Control::Discard) => {
                let dropped = self.session.take_transaction();
                debug!(commands = dropped.len(), "transaction discarded");
                self.round_trip(&args).await?
            }
        };
        self.settle(command, response).map(Reply::Value)
    }

    /// Opens a pipeline; following commands return [`Reply::Pipelined`].
    pub fn start_pipeline(&mut self) -> ClientResult<()> {
        self.session.start_pipeline()
    }

    /// Sends every pipelined command in one write and reads one reply per
    /// command, in order.
    ///
    /// A reply that times out ends the batch with [`ClientError::Timeout`]
    /// and leaves the connection broken.
    pub async fn exec_pipeline(&mut self) -> ClientResult<Vec<Response>> {
        let commands = self.session.take_pipeline();
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        self.frame.clear();
        for command in &commands {
            encode_command(&command.args, &mut self.frame);
        }
        self.send_frame().await?;

        let mut replies = Vec::with_capacity(commands.len());
        for command in &commands {
            let response = self.receive_in_batch().await?;
            if !response.is_ok() {
                self.record_failure(&response);
            }
            trace!(command = %command.name, status = ?response.status, "pipeline reply");
            replies.push(response);
        }
        Ok(replies)
    }

    /// Drops every pipelined command without sending it.
    pub fn discard_pipeline(&mut self) {
        let dropped = self.session.take_pipeline();
        debug!(commands = dropped.len(), "pipeline discarded");
    }

    /// Sends `MULTI`; following commands return [`Reply::Queued`].
    pub async fn multi(&mut self) -> ClientResult<()> {
        self.execute(&Multi).await?.value()
    }

    /// Sends the queued commands followed by `EXEC`.
    pub async fn exec(&mut self) -> ClientResult<Vec<Value>> {
        self.execute(&Exec).await?.value()
    }

    /// Drops the queued commands and sends `DISCARD`.
    pub async fn discard(&mut self) -> ClientResult<()> {
        self.execute(&Discard).await?.value()
    }

    async fn flush_transaction(&mut self, exec_args: &[Bytes]) -> ClientResult<Response> {
        let queued = self.session.take_transaction();
        self.frame.clear();
        for command in &queued {
            encode_command(&command.args, &mut self.frame);
        }
        encode_command(exec_args, &mut self.frame);
        self.send_frame().await?;

        for command in &queued {
            let ack = self.receive_in_batch().await?;
            if !ack.is_ok() {
                warn!(command = %command.name, message = %ack.message, "command rejected inside transaction");
                self.record_failure(&ack);
            }
        }
        debug!(commands = queued.len(), "transaction flushed");
        self.receive().await
    }

    async fn round_trip(&mut self, args: &[Bytes]) -> ClientResult<Response> {
        self.frame.clear();
        encode_command(args, &mut self.frame);
        self.send_frame().await?;
        self.receive().await
    }

    async fn send_frame(&mut self) -> ClientResult<()> {
        let result = self.transport.send(&self.frame).await;
        self.observe(result)
    }

    async fn receive(&mut self) -> ClientResult<Response> {
        let result = codec::recv(&mut self.transport, self.receive_timeout).await;
        self.observe(result)
    }

    /// Reply to one command of a batch. Anything read after a timeout would
    /// answer an earlier command, so the batch stops there.
    async fn receive_in_batch(&mut self) -> ClientResult<Response> {
        let response = self.receive().await?;
        if response.status == Status::Timeout {
            self.record_failure(&response);
            return Err(ClientError::Timeout {
                message: response.message,
            });
        }
        Ok(response)
    }

    fn observe<R>(&mut self, result: ClientResult<R>) -> ClientResult<R> {
        if let Err(err) = &result {
            if err.is_fatal_to_connection() && !self.broken {
                warn!(error = %err, "connection marked broken");
                self.broken = true;
            }
        }
        result
    }

    fn record_failure(&mut self, response: &Response) {
        if response.status == Status::Timeout {
            // A late reply would be read as the answer to the next command.
            self.broken = true;
        }
        self.last_error = Some((
            response.error_type.clone().unwrap_or_default(),
            response.message.clone(),
        ));
    }

    fn settle<C: Command>(&mut self, command: &C, response: Response) -> ClientResult<C::Output> {
        match response.status {
            Status::Ok => command.decode_response(response, self.serialization),
            Status::Error => {
                self.record_failure(&response);
                Err(ClientError::Server {
                    kind: response.error_type,
                    message: response.message,
                })
            }
            Status::Timeout => {
                self.record_failure(&response);
                Err(ClientError::Timeout {
                    message: response.message,
                })
            }
        }
    }
}

#[async_trait]
impl<T: Transport> PoolObject for RedisConnection<T> {
    async fn before_use(&mut self) -> Result<Checkout, BoxError> {
        if self.broken || !self.transport.is_connected() {
            return Ok(Checkout::Declined);
        }
        Ok(Checkout::Ready)
    }

    async fn restore_on_release(&mut self) -> Result<(), BoxError> {
        if self.broken {
            return Err("connection is broken".into());
        }
        if self.session.is_transaction_active() {
            return Err("connection returned with an open transaction".into());
        }
        if self.session.is_pipeline_active() {
            self.discard_pipeline();
        }
        self.last_error = None;
        Ok(())
    }

    async fn teardown(&mut self) {
        self.transport.close().await;
        trace!("connection closed");
    }
}

/// Pool factory producing connections from one [`ClientConfig`].
pub struct RedisConnector {
    config: Arc<ClientConfig>,
}

impl RedisConnector {
    pub fn new(config: ClientConfig) -> Self {
        RedisConnector {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl ObjectFactory for RedisConnector {
    type Object = RedisConnection;

    async fn create(&self) -> Result<RedisConnection, BoxError> {
        let conn = RedisConnection::connect(&self.config).await?;
        debug!(addr = %self.config.addr(), db = self.config.db, "redis connection established");
        Ok(conn)
    }
}
