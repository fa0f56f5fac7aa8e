//! # Server Errors
//!
//! This module defines the error taxonomy shared by the listener, the workers, the
//! supervisor and the fault-tolerant call wrapper.
//!
//! - [`ServerError`] covers startup failures. [`ServerError::Bind`] is fatal: no worker
//!   is ever spawned when the listening socket cannot be set up.
//! - [`CleanupError`] is what best-effort operations (close, join, signal) report.
//!   These are normally swallowed by [`Silently`](crate::silently::Silently).
//! - [`UsageError`] reports a programmer mistake: invoking an operation the wrapped
//!   object does not declare. It is never suppressed.

use crate::worker::Ordinal;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;

/// Errors that prevent the server (or one of its workers) from starting.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Failed to spawn worker {ordinal}: {source}")]
    Spawn {
        ordinal: Ordinal,
        #[source]
        source: io::Error,
    },
    #[error("Failed to adopt inherited listener on fd {fd}: {source}")]
    Inherit {
        fd: RawFd,
        #[source]
        source: io::Error,
    },
    #[error("Failed to register shutdown signals: {0}")]
    Signal(#[source] io::Error),
    #[error("Failed to build runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error("Supervisor cannot start from state {0:?}")]
    InvalidState(crate::supervisor::SupervisorState),
}

/// Failures reported by best-effort cleanup operations.
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error("Already closed")]
    AlreadyClosed,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Os(#[from] nix::errno::Errno),
}

/// An operation was invoked on an object that does not declare it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{target} has no `{operation}` operation")]
pub struct UsageError {
    pub operation: &'static str,
    pub target: &'static str,
}

/// Errors surfaced by [`Silently::invoke`](crate::silently::Silently::invoke).
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("{target} `{operation}` failed: {source}")]
    Failed {
        operation: &'static str,
        target: &'static str,
        #[source]
        source: CleanupError,
    },
}

impl CallError {
    /// Returns the usage error, if this is one.
    pub fn as_usage(&self) -> Option<&UsageError> {
        match self {
            CallError::Usage(usage) => Some(usage),
            CallError::Failed { .. } => None,
        }
    }
}
