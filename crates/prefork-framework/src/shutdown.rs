//! Signal-driven shutdown.
//!
//! Both the supervisor and every worker stop on SIGINT or SIGTERM. Handlers must be
//! registered before workers are spawned, otherwise an early Ctrl-C takes the default
//! action and kills the supervisor without draining.

use crate::error::ServerError;
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Subscription to the signals that request a graceful shutdown.
#[derive(Debug)]
pub struct ShutdownSignal {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownSignal {
    /// Installs the handlers. Must be called from within a Tokio runtime context.
    pub fn register() -> Result<Self, ServerError> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).map_err(ServerError::Signal)?,
            terminate: signal(SignalKind::terminate()).map_err(ServerError::Signal)?,
        })
    }

    /// Resolves with the name of the first shutdown signal received.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}
