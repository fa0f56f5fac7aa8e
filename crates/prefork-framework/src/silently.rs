//! # Fault-Tolerant Call Wrapper
//!
//! Cleanup must never be the thing that aborts a shutdown. Closing a socket that the
//! peer already reset, or waiting on a worker that was reaped elsewhere, are runtime
//! failures we want to swallow so the remaining cleanup still runs.
//!
//! Rather than proxying arbitrary methods, every collaborator declares the operations
//! it supports through the [`Operable`] trait:
//!
//! | Collaborator | Operations |
//! |--------------|------------|
//! | [`Listener`](crate::listener::Listener) | `close` |
//! | [`Connection`](crate::connection::Connection) | `close` |
//! | [`WorkerHandle`](crate::supervisor::WorkerHandle) | `join`, `signal` |
//!
//! [`Silently`] wraps any `Operable` and invokes those operations, discarding failures
//! that fall within its failure class. Invoking an operation the target does not declare
//! is a [`UsageError`]: programmer mistakes are reported, not swallowed.
//!
//! ```rust
//! use prefork_framework::silently::{silently, Completion, Operable, Operation};
//! use prefork_framework::error::CleanupError;
//!
//! struct Door { open: bool }
//!
//! impl Operable for Door {
//!     fn target(&self) -> &'static str { "door" }
//!     fn supports(&self, operation: &Operation) -> bool { matches!(operation, Operation::Close) }
//!     fn perform(&mut self, _: Operation) -> Result<Completion, CleanupError> {
//!         if !std::mem::replace(&mut self.open, false) {
//!             return Err(CleanupError::AlreadyClosed);
//!         }
//!         Ok(Completion::Done)
//!     }
//! }
//!
//! let mut door = silently(Door { open: true });
//! assert!(door.close().is_ok());
//! assert!(door.close().is_ok()); // second close is swallowed
//! assert!(door.join(std::time::Duration::ZERO).is_err()); // doors cannot be joined
//! ```

use crate::error::{CallError, CleanupError, UsageError};
use nix::sys::signal::Signal;
use std::process::ExitStatus;
use std::time::Duration;
use tracing::debug;

/// The operations a collaborator may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Close,
    Join { timeout: Duration },
    Signal(Signal),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Close => "close",
            Operation::Join { .. } => "join",
            Operation::Signal(_) => "signal",
        }
    }
}

/// The result of a successful operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Done,
    Exited(ExitStatus),
    Running,
}

/// A collaborator whose cleanup operations can be invoked through [`Silently`].
pub trait Operable {
    /// Short name used in logs and errors.
    fn target(&self) -> &'static str;

    /// Whether `operation` is part of this collaborator's interface.
    fn supports(&self, operation: &Operation) -> bool;

    /// Performs a supported operation.
    fn perform(&mut self, operation: Operation) -> Result<Completion, CleanupError>;
}

impl<T: Operable + ?Sized> Operable for &mut T {
    fn target(&self) -> &'static str {
        (**self).target()
    }

    fn supports(&self, operation: &Operation) -> bool {
        (**self).supports(operation)
    }

    fn perform(&mut self, operation: Operation) -> Result<Completion, CleanupError> {
        (**self).perform(operation)
    }
}

/// Decides whether a failure is suppressed.
pub type FailureClass = fn(&CleanupError) -> bool;

/// The default failure class: every runtime failure is suppressed.
pub fn any_failure(_: &CleanupError) -> bool {
    true
}

/// Wraps `inner` so that failures of its operations are swallowed.
pub fn silently<T: Operable>(inner: T) -> Silently<T> {
    Silently::new(inner)
}

/// Proxy that invokes cleanup operations and discards failures within its class.
pub struct Silently<T> {
    inner: T,
    class: FailureClass,
}

impl<T: Operable> Silently<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            class: any_failure,
        }
    }

    /// Narrows the suppressed failures to those matching `class`.
    pub fn suppressing(mut self, class: FailureClass) -> Self {
        self.class = class;
        self
    }

    /// Invokes `operation` on the wrapped object.
    ///
    /// Returns `Ok(None)` when the operation failed and the failure was suppressed.
    pub fn invoke(&mut self, operation: Operation) -> Result<Option<Completion>, CallError> {
        let target = self.inner.target();
        if !self.inner.supports(&operation) {
            return Err(UsageError {
                operation: operation.name(),
                target,
            }
            .into());
        }

        match self.inner.perform(operation) {
            Ok(completion) => Ok(Some(completion)),
            Err(error) if (self.class)(&error) => {
                debug!(object = target, operation = operation.name(), error = %error, "Suppressed failure");
                Ok(None)
            }
            Err(source) => Err(CallError::Failed {
                operation: operation.name(),
                target,
                source,
            }),
        }
    }

    pub fn close(&mut self) -> Result<(), CallError> {
        self.invoke(Operation::Close).map(|_| ())
    }

    pub fn join(&mut self, timeout: Duration) -> Result<Option<Completion>, CallError> {
        self.invoke(Operation::Join { timeout })
    }

    pub fn signal(&mut self, signal: Signal) -> Result<(), CallError> {
        self.invoke(Operation::Signal(signal)).map(|_| ())
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// Closeable resource that fails every close after the first.
    struct Flaky {
        closes: usize,
        io_failure: bool,
    }

    impl Flaky {
        fn new() -> Self {
            Self {
                closes: 0,
                io_failure: false,
            }
        }
    }

    impl Operable for Flaky {
        fn target(&self) -> &'static str {
            "flaky"
        }

        fn supports(&self, operation: &Operation) -> bool {
            matches!(operation, Operation::Close)
        }

        fn perform(&mut self, _: Operation) -> Result<Completion, CleanupError> {
            self.closes += 1;
            if self.io_failure {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "reset").into());
            }
            if self.closes > 1 {
                return Err(CleanupError::AlreadyClosed);
            }
            Ok(Completion::Done)
        }
    }

    #[test]
    fn test_close_twice_is_swallowed() {
        let mut wrapped = silently(Flaky::new());
        assert_eq!(wrapped.invoke(Operation::Close).unwrap(), Some(Completion::Done));
        assert_eq!(wrapped.invoke(Operation::Close).unwrap(), None);
        assert!(wrapped.close().is_ok());
        assert_eq!(wrapped.get_ref().closes, 3);
    }

    #[test]
    fn test_undeclared_operation_is_usage_error() {
        let mut wrapped = silently(Flaky::new());

        let err = wrapped.join(Duration::from_millis(1)).unwrap_err();
        assert_eq!(
            err.as_usage(),
            Some(&UsageError {
                operation: "join",
                target: "flaky"
            })
        );

        let err = wrapped.signal(Signal::SIGTERM).unwrap_err();
        assert!(err.as_usage().is_some());
        // The wrapped object was never touched.
        assert_eq!(wrapped.get_ref().closes, 0);
    }

    #[test]
    fn test_failure_outside_class_propagates() {
        let only_already_closed: FailureClass = |e| matches!(e, CleanupError::AlreadyClosed);
        let mut wrapped = silently(Flaky {
            closes: 0,
            io_failure: true,
        })
        .suppressing(only_already_closed);

        match wrapped.close() {
            Err(CallError::Failed { operation, target, .. }) => {
                assert_eq!(operation, "close");
                assert_eq!(target, "flaky");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_wraps_borrowed_collaborator() {
        let mut flaky = Flaky::new();
        assert!(silently(&mut flaky).close().is_ok());
        assert!(silently(&mut flaky).close().is_ok());
        assert_eq!(flaky.closes, 2);
    }
}
