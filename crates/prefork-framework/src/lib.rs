//! # Prefork Framework
//!
//! Building blocks for a pre-fork TCP server: one listening socket, created once by a
//! supervisor process and shared by a fixed pool of worker processes that each block on
//! `accept` independently.
//!
//! ## Architecture Overview
//!
//! 1. **Listening Resource** ([`Listener`]) - bound and listening before any worker
//!    exists; owned and eventually closed by the supervisor only.
//! 2. **Supervisor** ([`Supervisor`]) - spawns the workers, then drains them on shutdown.
//! 3. **Worker** ([`Worker`]) - the accept loop; one per OS process.
//! 4. **Handler** ([`ConnectionHandler`]) - one bounded read per connection.
//!
//! Two small pieces support them:
//!
//! - [`pause`] suspends background memory trimming around each accept+handle cycle.
//! - [`silently`] runs cleanup operations (close, join, signal) without letting their
//!   failures abort the rest of the cleanup.
//!
//! ## Concurrency Model
//!
//! - Workers are separate processes. They share no memory, only the listening socket
//!   they inherit at spawn time.
//! - The kernel hands each inbound connection to one blocked worker. No fairness is
//!   assumed between workers.
//! - No locks anywhere: correctness rests on socket sharing, process isolation and
//!   signal delivery.
//!
//! ## Example
//!
//! ```rust,no_run
//! use prefork_framework::{ExecSpawner, ServerConfig, Supervisor};
//!
//! let config = ServerConfig::new("0.0.0.0:8080".parse().unwrap(), 4);
//! let mut supervisor = Supervisor::new(config);
//! supervisor.start(&ExecSpawner::current_exe().unwrap()).unwrap();
//! // ... wait for a shutdown signal ...
//! let report = supervisor.shutdown();
//! println!("reaped {} workers", report.len());
//! ```

pub mod connection;
pub mod error;
pub mod handler;
pub mod listener;
pub mod pause;
pub mod shutdown;
pub mod silently;
pub mod supervisor;
pub mod tracing;
pub mod worker;

// Re-export core types for convenience
pub use connection::Connection;
pub use error::{CallError, CleanupError, ServerError, UsageError};
pub use handler::{ConnectionHandler, LoggingHandler};
pub use listener::Listener;
pub use pause::{NoopReclaimer, Reclaimer, ReclamationSwitch};
pub use shutdown::ShutdownSignal;
pub use silently::{silently, Silently};
pub use supervisor::{DrainReport, ExecSpawner, ServerConfig, Supervisor, WorkerSpawner};
pub use worker::{Ordinal, Worker, WorkerStats};
