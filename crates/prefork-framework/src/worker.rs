//! # Worker Process
//!
//! A worker repeatedly accepts a connection from the shared listener and hands it to a
//! [`ConnectionHandler`]. The kernel decides which blocked worker receives each inbound
//! connection; no fairness between workers is assumed.
//!
//! ## The Accept Loop
//!
//! ```text
//! loop {
//!     paused {                       // background reclamation suspended
//!         accept                     \
//!         handle                      |-- or shutdown --> break
//!         close (silently)           /
//!     }                              // reclamation resumed
//! }
//! ```
//!
//! The unit of failure isolation is one connection: a failed accept or a failed handler
//! is logged and the loop moves on. Only the shutdown future ends the loop.
//!
//! ## Process Entry Point
//!
//! [`serve`] is what a worker process runs. It adopts the listening socket inherited from
//! the supervisor, starts a single-threaded Tokio runtime, and runs the loop until SIGINT
//! or SIGTERM arrives.

use crate::connection::Connection;
use crate::error::ServerError;
use crate::handler::{ConnectionHandler, LoggingHandler};
use crate::listener::Listener;
use crate::pause::{paused, spawn_trimmer, Reclaimer, ReclamationSwitch, TRIM_INTERVAL};
use crate::shutdown::ShutdownSignal;
use crate::silently::silently;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Pause after a failed accept, so a persistent failure (e.g. EMFILE) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// A worker's 1-based position in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ordinal(u32);

impl Ordinal {
    pub const fn new(ordinal: u32) -> Self {
        Self(ordinal)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for Ordinal {
    fn from(ordinal: u32) -> Self {
        Self(ordinal)
    }
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02}", self.0)
    }
}

/// Counters reported when a worker stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    /// Connections accepted and handled successfully.
    pub accepted: u64,
    /// Cycles that failed, at accept or in the handler.
    pub failed: u64,
}

#[derive(Debug, thiserror::Error)]
enum CycleError {
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
    #[error("handler failed for {peer}: {source}")]
    Handle {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// The accept loop of one worker.
pub struct Worker<H> {
    ordinal: Ordinal,
    listener: TcpListener,
    handler: H,
    reclaimer: Arc<dyn Reclaimer>,
}

impl<H: ConnectionHandler> Worker<H> {
    pub fn new(ordinal: Ordinal, listener: TcpListener, handler: H) -> Self {
        Self {
            ordinal,
            listener,
            handler,
            reclaimer: Arc::new(ReclamationSwitch::new()),
        }
    }

    /// Replaces the reclaimer paused around each cycle.
    pub fn with_reclaimer(mut self, reclaimer: Arc<dyn Reclaimer>) -> Self {
        self.reclaimer = reclaimer;
        self
    }

    pub fn ordinal(&self) -> Ordinal {
        self.ordinal
    }

    /// Runs the accept loop until `shutdown` completes.
    ///
    /// Shutdown interrupts the whole cycle, including a handler waiting on an idle peer.
    /// An interrupted connection is dropped, which closes it.
    pub async fn run<S>(self, shutdown: S) -> WorkerStats
    where
        S: Future<Output = ()>,
    {
        let pid = std::process::id();
        let ordinal = self.ordinal;
        let mut stats = WorkerStats::default();
        info!(pid, %ordinal, "Worker started");

        tokio::pin!(shutdown);
        loop {
            let cycle = paused(self.reclaimer.as_ref(), async {
                tokio::select! {
                    biased;
                    () = &mut shutdown => None,
                    outcome = async {
                        let accepted = self.listener.accept().await;
                        self.dispatch(accepted).await
                    } => Some(outcome),
                }
            })
            .await;

            match cycle {
                None => break,
                Some(Ok(())) => stats.accepted += 1,
                Some(Err(error)) => {
                    stats.failed += 1;
                    warn!(pid, %ordinal, error = %error, "Connection failed");
                    if matches!(error, CycleError::Accept(_)) {
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }

        info!(
            pid,
            %ordinal,
            accepted = stats.accepted,
            failed = stats.failed,
            "Worker stopped"
        );
        stats
    }

    async fn dispatch(
        &self,
        accepted: io::Result<(tokio::net::TcpStream, SocketAddr)>,
    ) -> Result<(), CycleError> {
        let (stream, peer) = accepted.map_err(CycleError::Accept)?;
        let pid = std::process::id();
        let ordinal = self.ordinal;
        info!(pid, %ordinal, %peer, "Accepted");

        let mut connection = Connection::new(stream, peer);
        let handled = self.handler.handle(&mut connection, ordinal).await;

        if let Err(error) = silently(&mut connection).close() {
            debug!(pid, %ordinal, %peer, error = %error, "Close failed");
        }
        info!(pid, %ordinal, %peer, "Closed");

        handled.map_err(|source| CycleError::Handle { peer, source })
    }
}

/// Worker process entry point: serves the listener inherited at `fd` until signalled.
pub fn serve(ordinal: Ordinal, fd: RawFd) -> Result<WorkerStats, ServerError> {
    let listener = Listener::from_inherited(fd)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(ServerError::Runtime)?;

    runtime.block_on(async move {
        let mut signal = ShutdownSignal::register()?;
        let listener = listener
            .into_tokio()
            .map_err(|source| ServerError::Inherit { fd, source })?;

        let switch = Arc::new(ReclamationSwitch::new());
        let trimmer = spawn_trimmer(Arc::clone(&switch), TRIM_INTERVAL);

        let stats = Worker::new(ordinal, listener, LoggingHandler)
            .with_reclaimer(switch)
            .run(async move {
                let received = signal.recv().await;
                debug!(pid = std::process::id(), %ordinal, signal = received, "Shutdown signal");
            })
            .await;

        trimmer.abort();
        Ok::<_, ServerError>(stats)
    })
}
