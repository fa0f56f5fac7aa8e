use anyhow::Context;
use clap::Parser;
use prefork_framework::supervisor::ExecSpawner;
use prefork_framework::tracing::setup_tracing;
use prefork_framework::Ordinal;
use prefork_server::cli::{Cli, Command};
use prefork_server::lifecycle::{run_worker, ServerSystem};

fn main() -> anyhow::Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    if let Some(Command::Worker { ordinal, listen_fd }) = cli.command {
        run_worker(Ordinal::new(ordinal), listen_fd)
            .with_context(|| format!("worker {} failed", Ordinal::new(ordinal)))?;
        return Ok(());
    }

    let config = cli.server_config().context("missing port")?;
    let spawner = ExecSpawner::current_exe().context("cannot locate the server executable")?;
    let system = ServerSystem::start(config, &spawner).context("server failed to start")?;
    system.run();
    Ok(())
}
