//! # Supervisor
//!
//! The parent-side half of the server. It owns the listening socket and the worker
//! processes and drives them through this state machine:
//!
//! ```text
//! Idle -> Binding -> Spawning -> Running -> Draining -> Closed
//!            |                                  ^
//!            +------------ bind error ----------+--> Closed
//! ```
//!
//! ## Spawning
//!
//! Workers are spawned sequentially, in ascending ordinal order, so the startup log reads
//! in order. Each worker is a separate OS process built by a [`WorkerSpawner`]; the
//! listening socket is handed down at [`LISTEN_FD`]. Workers share nothing else.
//!
//! ## Draining
//!
//! Workers are not killed outright. The supervisor signals them with SIGTERM, then polls:
//! each pass waits at most [`JOIN_POLL`] for every still-active worker and rebuilds the
//! active set from the results, logging each reaped worker. Join and signal failures go
//! through [`Silently`](crate::silently::Silently), so a stale handle cannot abort the
//! drain of the others.
//!
//! Once the drain timeout elapses, the remaining workers are sent SIGKILL and polling
//! continues until they are reaped. Joins are cut short at the deadline, so a large pool
//! does not overshoot it by one poll per worker.

use crate::error::{CallError, CleanupError, ServerError};
use crate::listener::Listener;
use crate::silently::{silently, Completion, Operable, Operation};
use crate::worker::Ordinal;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Descriptor at which workers find the listening socket.
pub const LISTEN_FD: RawFd = 3;

/// Longest a single drain poll waits for one worker.
pub const JOIN_POLL: Duration = Duration::from_millis(500);

/// Default upper bound on the graceful part of a drain.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between exit checks within one join.
const JOIN_STEP: Duration = Duration::from_millis(10);

/// Settings of one server run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub address: SocketAddr,
    /// `0` selects the OS default.
    pub backlog: u32,
    pub workers: u32,
    pub drain_timeout: Duration,
}

impl ServerConfig {
    pub fn new(address: SocketAddr, workers: u32) -> Self {
        Self {
            address,
            backlog: 0,
            workers,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Builds the command that starts a worker process.
///
/// The supervisor takes care of placing the listening socket at `fd`; the spawner only
/// has to tell the worker where to find it.
pub trait WorkerSpawner {
    fn command(&self, ordinal: Ordinal, fd: RawFd) -> Command;
}

impl<F> WorkerSpawner for F
where
    F: Fn(Ordinal, RawFd) -> Command,
{
    fn command(&self, ordinal: Ordinal, fd: RawFd) -> Command {
        self(ordinal, fd)
    }
}

/// Re-executes a program as `<program> [args..] worker --ordinal N --listen-fd FD`.
#[derive(Debug, Clone)]
pub struct ExecSpawner {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ExecSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Spawner for the currently running executable.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Arguments placed before the `worker` subcommand.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl WorkerSpawner for ExecSpawner {
    fn command(&self, ordinal: Ordinal, fd: RawFd) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("worker")
            .arg("--ordinal")
            .arg(ordinal.get().to_string())
            .arg("--listen-fd")
            .arg(fd.to_string());
        command
    }
}

/// Supervisor-side handle of one worker process.
#[derive(Debug)]
pub struct WorkerHandle {
    ordinal: Ordinal,
    pid: u32,
    child: Child,
}

impl WorkerHandle {
    pub fn ordinal(&self) -> Ordinal {
        self.ordinal
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn join(&mut self, timeout: Duration) -> Result<Completion, CleanupError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Completion::Exited(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Completion::Running);
            }
            std::thread::sleep(JOIN_STEP.min(deadline - now));
        }
    }
}

impl Operable for WorkerHandle {
    fn target(&self) -> &'static str {
        "worker"
    }

    fn supports(&self, operation: &Operation) -> bool {
        matches!(operation, Operation::Join { .. } | Operation::Signal(_))
    }

    fn perform(&mut self, operation: Operation) -> Result<Completion, CleanupError> {
        match operation {
            Operation::Join { timeout } => self.join(timeout),
            Operation::Signal(signal) => {
                let pid = i32::try_from(self.pid).map_err(|_| Errno::ESRCH)?;
                kill(Pid::from_raw(pid), signal)?;
                Ok(Completion::Done)
            }
            Operation::Close => Err(io::Error::from(io::ErrorKind::Unsupported).into()),
        }
    }
}

/// Lifecycle states of the [`Supervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Binding,
    Spawning,
    Running,
    Draining,
    Closed,
}

/// A worker observed to have exited during a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapedWorker {
    pub ordinal: Ordinal,
    pub pid: u32,
    /// `None` when the exit status could not be collected.
    pub status: Option<ExitStatus>,
    /// Whether the worker had to be killed after the drain timeout.
    pub forced: bool,
}

/// Outcome of a drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub reaped: Vec<ReapedWorker>,
}

impl DrainReport {
    pub fn len(&self) -> usize {
        self.reaped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reaped.is_empty()
    }

    pub fn forced(&self) -> usize {
        self.reaped.iter().filter(|worker| worker.forced).count()
    }
}

/// Owns the listening socket and the pool of worker processes.
pub struct Supervisor {
    config: ServerConfig,
    state: SupervisorState,
    listener: Option<Listener>,
    workers: BTreeMap<Ordinal, WorkerHandle>,
}

impl Supervisor {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            state: SupervisorState::Idle,
            listener: None,
            workers: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Address actually bound, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(Listener::local_addr)
    }

    /// `(ordinal, pid)` of every active worker, in ordinal order.
    pub fn workers(&self) -> Vec<(Ordinal, u32)> {
        self.workers
            .values()
            .map(|handle| (handle.ordinal, handle.pid))
            .collect()
    }

    /// Binds the listening socket, then spawns the configured number of workers.
    ///
    /// On a bind failure no worker is spawned. On a spawn failure the workers already
    /// running are drained before the error is returned.
    pub fn start<S: WorkerSpawner>(&mut self, spawner: &S) -> Result<(), ServerError> {
        if self.state != SupervisorState::Idle {
            return Err(ServerError::InvalidState(self.state));
        }

        self.state = SupervisorState::Binding;
        let listener = match Listener::bind(self.config.address, self.config.backlog) {
            Ok(listener) => listener,
            Err(error) => {
                self.state = SupervisorState::Closed;
                return Err(error);
            }
        };

        self.state = SupervisorState::Spawning;
        let spawned = self.spawn_all(&listener, spawner);
        self.listener = Some(listener);
        if let Err(error) = spawned {
            self.drain();
            self.close_listener();
            return Err(error);
        }

        self.state = SupervisorState::Running;
        Ok(())
    }

    fn spawn_all<S: WorkerSpawner>(
        &mut self,
        listener: &Listener,
        spawner: &S,
    ) -> Result<(), ServerError> {
        let supervisor_pid = std::process::id();
        for ordinal in (1..=self.config.workers).map(Ordinal::new) {
            info!(pid = supervisor_pid, %ordinal, "Starting worker");

            let mut command = spawner.command(ordinal, LISTEN_FD);
            let child = listener
                .inherit_into(&mut command, LISTEN_FD)
                .and_then(|()| command.spawn())
                .map_err(|source| ServerError::Spawn { ordinal, source })?;

            let pid = child.id();
            info!(%ordinal, pid, "Worker spawned");
            self.workers.insert(ordinal, WorkerHandle { ordinal, pid, child });
        }
        Ok(())
    }

    /// Asks every active worker to stop and reaps them all.
    ///
    /// Returns immediately with an empty report when no worker is active.
    pub fn drain(&mut self) -> DrainReport {
        let mut report = DrainReport::default();
        if self.workers.is_empty() {
            return report;
        }

        self.state = SupervisorState::Draining;
        info!(active = self.workers.len(), "Draining");
        for handle in self.workers.values_mut() {
            settle(silently(handle).signal(Signal::SIGTERM));
        }

        let deadline = Instant::now() + self.config.drain_timeout;
        let mut forced = false;
        while !self.workers.is_empty() {
            if !forced && Instant::now() >= deadline {
                warn!(
                    remaining = self.workers.len(),
                    timeout = ?self.config.drain_timeout,
                    "Drain timeout exceeded, killing remaining workers"
                );
                for handle in self.workers.values_mut() {
                    settle(silently(handle).signal(Signal::SIGKILL));
                }
                forced = true;
            }

            let active = std::mem::take(&mut self.workers);
            for (ordinal, mut handle) in active {
                // Never wait past the deadline before escalating.
                let budget = if forced {
                    JOIN_POLL
                } else {
                    JOIN_POLL.min(deadline.saturating_duration_since(Instant::now()))
                };
                let joined = silently(&mut handle).join(budget);
                let status = match joined {
                    Ok(Some(Completion::Running)) => {
                        self.workers.insert(ordinal, handle);
                        continue;
                    }
                    Ok(Some(Completion::Exited(status))) => Some(status),
                    // A stale handle: nothing left to wait for.
                    Ok(Some(Completion::Done)) | Ok(None) => None,
                    Err(error) => {
                        flag_misuse(&error);
                        None
                    }
                };
                log_reaped(&handle, status);
                report.reaped.push(ReapedWorker {
                    ordinal,
                    pid: handle.pid,
                    status,
                    forced,
                });
            }
        }
        report
    }

    /// Drains every worker, then closes the listening socket.
    pub fn shutdown(mut self) -> DrainReport {
        let report = self.drain();
        self.close_listener();
        report
    }

    fn close_listener(&mut self) {
        if let Some(listener) = self.listener.take() {
            settle(silently(listener).close());
        }
        self.state = SupervisorState::Closed;
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // Never leave orphaned workers behind.
        if !self.workers.is_empty() {
            self.drain();
        }
        self.close_listener();
    }
}

/// Discards the outcome of a best-effort operation.
fn settle(result: Result<(), CallError>) {
    if let Err(error) = result {
        flag_misuse(&error);
    }
}

/// Runtime failures are suppressed by [`silently`], so what still surfaces here is an
/// operation the target does not declare.
fn flag_misuse(error: &CallError) {
    error!(error = %error, "Cleanup operation rejected");
    debug_assert!(error.as_usage().is_none(), "{error}");
}

fn log_reaped(handle: &WorkerHandle, status: Option<ExitStatus>) {
    match status {
        Some(status) => info!(ordinal = %handle.ordinal, pid = handle.pid, %status, "Worker reaped"),
        None => info!(ordinal = %handle.ordinal, pid = handle.pid, status = "unknown", "Worker reaped"),
    }
}
