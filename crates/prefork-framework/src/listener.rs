//! # Listening Resource
//!
//! The single listening socket shared by every worker. The supervisor creates it once,
//! before any worker exists, and is the only one allowed to close it. Workers receive a
//! duplicate of the descriptor at spawn time and only ever accept from it.

use crate::error::{CleanupError, ServerError};
use crate::silently::{Completion, Operable, Operation};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd::dup2;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::Command;
use tracing::info;

/// Backlog used when the configured backlog is `0`.
pub const OS_DEFAULT_BACKLOG: i32 = nix::libc::SOMAXCONN;

/// The bound, listening TCP socket.
#[derive(Debug)]
pub struct Listener {
    socket: Option<Socket>,
    local_addr: SocketAddr,
}

impl Listener {
    /// Creates the socket, enables address reuse, binds it and starts listening.
    ///
    /// A `backlog` of `0` selects the OS default. Any failure is a [`ServerError::Bind`].
    pub fn bind(address: SocketAddr, backlog: u32) -> Result<Self, ServerError> {
        let bind_error = |source| ServerError::Bind { address, source };

        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_error)?;
        // A restarted server must not wait for TIME_WAIT sockets to expire.
        socket.set_reuse_address(true).map_err(bind_error)?;
        socket.bind(&address.into()).map_err(bind_error)?;
        socket.listen(effective_backlog(backlog)).map_err(bind_error)?;

        let local_addr = local_inet_addr(&socket).map_err(bind_error)?;
        info!(
            pid = std::process::id(),
            address = %local_addr,
            backlog = effective_backlog(backlog),
            "Listening"
        );

        Ok(Self {
            socket: Some(socket),
            local_addr,
        })
    }

    /// Adopts a listening socket inherited from the supervisor at descriptor `fd`.
    pub fn from_inherited(fd: RawFd) -> Result<Self, ServerError> {
        // SAFETY: the supervisor placed a listening socket at `fd` before exec and nothing
        // else in this process owns that descriptor.
        let socket = unsafe { Socket::from_raw_fd(fd) };
        let local_addr =
            local_inet_addr(&socket).map_err(|source| ServerError::Inherit { fd, source })?;
        Ok(Self {
            socket: Some(socket),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }

    /// Arranges for `command` to find this socket at descriptor `fd` once spawned.
    ///
    /// The descriptor is duplicated in the child between fork and exec, with
    /// close-on-exec cleared. The parent's copy is untouched.
    pub fn inherit_into(&self, command: &mut Command, fd: RawFd) -> io::Result<()> {
        let source = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "listener is closed"))?
            .as_raw_fd();

        // SAFETY: the hook only calls dup2/fcntl, which are async-signal-safe.
        unsafe {
            command.pre_exec(move || install_descriptor(source, fd));
        }
        Ok(())
    }

    /// Converts into a Tokio listener for the accept loop. Must run inside a runtime.
    pub fn into_tokio(mut self) -> io::Result<tokio::net::TcpListener> {
        let socket = self
            .socket
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "listener is closed"))?;
        socket.set_nonblocking(true)?;
        tokio::net::TcpListener::from_std(socket.into())
    }
}

impl Operable for Listener {
    fn target(&self) -> &'static str {
        "listener"
    }

    fn supports(&self, operation: &Operation) -> bool {
        matches!(operation, Operation::Close)
    }

    fn perform(&mut self, _: Operation) -> Result<Completion, CleanupError> {
        let socket = self.socket.take().ok_or(CleanupError::AlreadyClosed)?;
        drop(socket);
        info!(address = %self.local_addr, "Listener closed");
        Ok(Completion::Done)
    }
}

fn effective_backlog(backlog: u32) -> i32 {
    match backlog {
        0 => OS_DEFAULT_BACKLOG,
        n => i32::try_from(n).unwrap_or(i32::MAX),
    }
}

fn local_inet_addr(socket: &Socket) -> io::Result<SocketAddr> {
    socket.local_addr()?.as_socket().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "not an inet socket")
    })
}

fn install_descriptor(source: RawFd, target: RawFd) -> io::Result<()> {
    if source == target {
        // dup2 is a no-op here and would leave close-on-exec set.
        fcntl(target, FcntlArg::F_SETFD(FdFlag::empty()))?;
    } else {
        dup2(source, target)?;
    }
    Ok(())
}
