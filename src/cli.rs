//! Command-line surface of both binaries.
//!
//! Every server option can also come from the environment (`PREFORK_*`), which is
//! convenient under a process manager. The `worker` subcommand is hidden: it is how the
//! supervisor re-executes this binary as a worker, not something people type.

use clap::{Parser, Subcommand};
use prefork_framework::supervisor::{ServerConfig, LISTEN_FD};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Greeting sent by `prefork-client` when no message is given.
pub const DEFAULT_GREETING: &str = "La peche ?";

/// Two workers per CPU, at least one.
pub fn default_workers() -> u32 {
    u32::try_from(num_cpus::get().saturating_mul(2))
        .unwrap_or(u32::MAX)
        .max(1)
}

/// Pre-fork TCP server: one listening socket, a fixed pool of worker processes.
#[derive(Debug, Parser)]
#[command(name = "prefork-server", version, subcommand_negates_reqs = true)]
pub struct Cli {
    /// TCP port to listen on.
    #[arg(required = true)]
    pub port: Option<u16>,

    /// Number of worker processes.
    #[arg(
        short,
        long,
        env = "PREFORK_WORKERS",
        default_value_t = default_workers(),
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub workers: u32,

    /// Pending-connection queue length; 0 selects the OS default.
    #[arg(short, long, env = "PREFORK_BACKLOG", default_value_t = 0)]
    pub backlog: u32,

    /// Local address to bind.
    #[arg(long, env = "PREFORK_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Seconds to wait for workers to exit before killing them.
    #[arg(long, env = "PREFORK_DRAIN_TIMEOUT", value_name = "SECS", default_value_t = 10)]
    pub drain_timeout: u64,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Serve the listening socket inherited from the supervisor.
    #[command(hide = true)]
    Worker {
        /// 1-based position of this worker in the pool.
        #[arg(long)]
        ordinal: u32,

        /// Descriptor of the inherited listening socket.
        #[arg(long, default_value_t = LISTEN_FD)]
        listen_fd: RawFd,
    },
}

impl Cli {
    /// Supervisor settings, or `None` when invoked as a worker.
    pub fn server_config(&self) -> Option<ServerConfig> {
        let port = self.port?;
        let mut config = ServerConfig::new(SocketAddr::new(self.bind, port), self.workers);
        config.backlog = self.backlog;
        config.drain_timeout = Duration::from_secs(self.drain_timeout);
        Some(config)
    }
}

/// One-shot client: connects, sends a greeting, disconnects.
#[derive(Debug, Parser)]
#[command(name = "prefork-client", version)]
pub struct ClientCli {
    /// Server port.
    pub port: u16,

    /// Server host.
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Bytes to send.
    #[arg(short, long, default_value = DEFAULT_GREETING)]
    pub message: String,
}
