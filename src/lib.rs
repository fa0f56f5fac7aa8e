//! # Pre-fork Server
//!
//! > **One listening socket, a fixed pool of worker processes.**
//!
//! The supervisor binds once, then re-executes its own binary as `N` workers that
//! inherit the socket. Every worker blocks in `accept` on the same socket and the kernel
//! hands each inbound connection to exactly one of them. A worker reads one chunk from
//! the connection, logs it, and closes it. Nothing is ever written back.
//!
//! ## Module Tour
//!
//! ### 1. The Engine ([`prefork_framework`])
//! The listener, the accept loop, the supervisor and its drain, the resource pause and
//! the fault-tolerant call wrapper all live in the framework crate.
//!
//! ### 2. The Orchestrator ([`lifecycle`])
//! - **Role**: starts the supervisor, waits for SIGINT/SIGTERM, drains the pool.
//! - **Key items**: [`ServerSystem`](lifecycle::ServerSystem),
//!   [`run_worker`](lifecycle::run_worker).
//!
//! ### 3. The Surface ([`cli`], [`client`])
//! Command-line parsing for both binaries and the one-shot greeting client.
//!
//! ## Quick Start
//!
//! ```bash
//! # Four workers on port 8080
//! RUST_LOG=info cargo run --bin prefork-server -- --workers 4 8080
//!
//! # In another terminal
//! cargo run --bin prefork-client -- 8080
//! ```

pub mod cli;
pub mod client;
pub mod lifecycle;
