//! # Observability & Tracing
//!
//! Every process of the server (the supervisor and each worker) installs its own
//! subscriber once, at startup, through [`setup_tracing`].
//!
//! ## Configuration
//!
//! - **Level filtering** comes from `RUST_LOG`; `info` when unset.
//! - **Compact format** without module paths (`with_target(false)`). Events carry
//!   structured fields instead: `pid`, `ordinal`, `peer`, `bytes`, `status`.
//! - **Colors** only when stdout is a terminal, so piped logs stay greppable.
//!
//! ```bash
//! RUST_LOG=info prefork-server 8080     # lifecycle + one line per request
//! RUST_LOG=debug prefork-server 8080    # also suppressed cleanup failures, trim passes
//! ```
//!
//! ## What Gets Traced
//!
//! ```text
//! INFO Listening pid=4100 address=0.0.0.0:8080 backlog=4096
//! INFO Starting worker pid=4100 ordinal=#01
//! INFO Worker spawned ordinal=#01 pid=4101
//! INFO Worker started pid=4101 ordinal=#01
//! INFO Accepted pid=4101 ordinal=#01 peer=127.0.0.1:50312
//! INFO Received pid=4101 ordinal=#01 peer=127.0.0.1:50312 bytes=4 payload=ping...
//! INFO Closed pid=4101 ordinal=#01 peer=127.0.0.1:50312
//! INFO Draining active=1
//! INFO Worker stopped pid=4101 ordinal=#01 accepted=1 failed=0
//! INFO Worker reaped ordinal=#01 pid=4101 status=exit status: 0
//! INFO Listener closed address=0.0.0.0:8080
//! ```

use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

/// Installs the process-wide subscriber. Later calls are ignored.
pub fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false) // Don't show module paths - events carry pid/ordinal instead
        .with_ansi(std::io::stdout().is_terminal())
        .compact()
        .try_init();
}
