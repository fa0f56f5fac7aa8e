//! Process-level orchestration.
//!
//! - [`ServerSystem`] - wires the command-line settings to the supervisor, waits for a
//!   shutdown signal, then drains the pool
//! - [`run_worker`] - what a re-executed worker process runs

pub mod server_system;

pub use server_system::*;
