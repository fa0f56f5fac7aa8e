use prefork_framework::supervisor::{DrainReport, ServerConfig, WorkerSpawner};
use prefork_framework::worker::serve;
use prefork_framework::{Ordinal, ServerError, ShutdownSignal, Supervisor, WorkerStats};
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use tokio::runtime::Runtime;
use tracing::{error, info};

/// The supervisor process of a running server.
///
/// `ServerSystem` is responsible for:
/// - **Startup**: binding the listening socket and spawning the worker pool
/// - **Signal handling**: SIGINT and SIGTERM are caught from the moment the system
///   exists, so no early signal can kill the supervisor without a drain
/// - **Shutdown**: draining every worker, then closing the listening socket
///
/// # Example
///
/// ```no_run
/// use prefork_framework::supervisor::{ExecSpawner, ServerConfig};
/// use prefork_server::lifecycle::ServerSystem;
///
/// let config = ServerConfig::new("0.0.0.0:8080".parse().unwrap(), 4);
/// let spawner = ExecSpawner::current_exe().unwrap();
/// let system = ServerSystem::start(config, &spawner).unwrap();
///
/// // Blocks until Ctrl-C, then reaps all four workers.
/// let report = system.run();
/// assert_eq!(report.len(), 4);
/// ```
pub struct ServerSystem {
    supervisor: Supervisor,
    shutdown: ShutdownSignal,
    /// Drives the signal subscription; the supervisor itself is synchronous.
    runtime: Runtime,
}

impl ServerSystem {
    /// Installs the signal handlers, binds, and spawns the workers.
    ///
    /// On failure nothing is left running: a bind error spawns no worker, and a spawn
    /// error drains the workers already started.
    pub fn start<S: WorkerSpawner>(config: ServerConfig, spawner: &S) -> Result<Self, ServerError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ServerError::Runtime)?;

        // Registered before any worker exists.
        let shutdown = {
            let _context = runtime.enter();
            ShutdownSignal::register()?
        };

        let mut supervisor = Supervisor::new(config);
        supervisor.start(spawner)?;
        info!(
            pid = std::process::id(),
            workers = supervisor.workers().len(),
            "Server started"
        );

        Ok(Self {
            supervisor,
            shutdown,
            runtime,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.supervisor.local_addr()
    }

    /// `(ordinal, pid)` of every worker.
    pub fn workers(&self) -> Vec<(Ordinal, u32)> {
        self.supervisor.workers()
    }

    /// Blocks until SIGINT or SIGTERM arrives and returns its name.
    pub fn wait_for_shutdown(&mut self) -> &'static str {
        self.runtime.block_on(self.shutdown.recv())
    }

    /// Gracefully shuts down the server.
    ///
    /// 1. Sends SIGTERM to every worker
    /// 2. Polls each one until it exits, escalating to SIGKILL after the drain timeout
    /// 3. Closes the listening socket
    pub fn shutdown(self) -> DrainReport {
        info!("Shutting down server...");
        let report = self.supervisor.shutdown();
        info!(
            reaped = report.len(),
            forced = report.forced(),
            "Server shutdown complete."
        );
        report
    }

    /// Serves until a shutdown signal arrives, then drains.
    pub fn run(mut self) -> DrainReport {
        let signal = self.wait_for_shutdown();
        info!(signal, "Shutdown requested");
        self.shutdown()
    }
}

/// Entry point of a re-executed worker process.
pub fn run_worker(ordinal: Ordinal, listen_fd: RawFd) -> Result<WorkerStats, ServerError> {
    serve(ordinal, listen_fd).inspect_err(|e| {
        error!(pid = std::process::id(), %ordinal, error = %e, "Worker failed");
    })
}
