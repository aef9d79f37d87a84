//! # Pipeline and Transaction State
//!
//! Purpose: Track whether a connection is batching commands in a pipeline or
//! deferring them inside a MULTI block, and hold the deferred commands.

use bytes::Bytes;

use crate::error::{ClientError, ClientResult};

/// Commands that always bypass deferral.
pub const EXEMPT_COMMANDS: &[&str] = &["multi", "exec", "discard", "watch", "unwatch"];

/// True when `name` is a transaction-control command.
pub fn is_exempt(name: &str) -> bool {
    EXEMPT_COMMANDS
        .iter()
        .any(|exempt| exempt.eq_ignore_ascii_case(name))
}

/// A command held back for later transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredCommand {
    pub name: String,
    pub args: Vec<Bytes>,
}

/// Where a command goes once its arguments are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Direct,
    Pipeline,
    Transaction,
}

/// Per-connection deferral state.
#[derive(Debug, Default)]
pub struct Session {
    pipeline_active: bool,
    pipeline: Vec<DeferredCommand>,
    transaction_active: bool,
    transaction: Vec<DeferredCommand>,
}

impl Session {
    pub fn is_pipeline_active(&self) -> bool {
        self.pipeline_active
    }

    pub fn is_transaction_active(&self) -> bool {
        self.transaction_active
    }

    /// Names of the commands queued in the open transaction, in order.
    pub fn transaction_commands(&self) -> impl Iterator<Item = &str> {
        self.transaction.iter().map(|command| command.name.as_str())
    }

    pub fn pipeline_len(&self) -> usize {
        self.pipeline.len()
    }

    pub fn route(&self, name: &str) -> Route {
        if is_exempt(name) {
            Route::Direct
        } else if self.transaction_active {
            Route::Transaction
        } else if self.pipeline_active {
            Route::Pipeline
        } else {
            Route::Direct
        }
    }

    pub fn defer(&mut self, route: Route, name: &str, args: Vec<Bytes>) {
        let command = DeferredCommand {
            name: name.to_string(),
            args,
        };
        match route {
            Route::Pipeline => self.pipeline.push(command),
            Route::Transaction => self.transaction.push(command),
            Route::Direct => {}
        }
    }

    pub fn start_pipeline(&mut self) -> ClientResult<()> {
        if self.transaction_active {
            return Err(ClientError::ModeConflict("transaction"));
        }
        self.pipeline_active = true;
        Ok(())
    }

    /// Ends the pipeline and hands back its commands.
    pub fn take_pipeline(&mut self) -> Vec<DeferredCommand> {
        self.pipeline_active = false;
        std::mem::take(&mut self.pipeline)
    }

    /// Fails when a pipeline or another transaction is already open.
    pub fn check_can_begin_transaction(&self) -> ClientResult<()> {
        if self.pipeline_active {
            return Err(ClientError::ModeConflict("pipeline"));
        }
        if self.transaction_active {
            return Err(ClientError::ModeConflict("transaction"));
        }
        Ok(())
    }

    pub fn begin_transaction(&mut self) {
        self.transaction_active = true;
        self.transaction.clear();
    }

    /// Ends the transaction and hands back its commands.
    pub fn take_transaction(&mut self) -> Vec<DeferredCommand> {
        self.transaction_active = false;
        std::mem::take(&mut self.transaction)
    }

    pub fn reset(&mut self) {
        *self = Session::default();
    }
}
