use anyhow::Context;
use clap::Parser;
use prefork_framework::tracing::setup_tracing;
use prefork_server::cli::ClientCli;
use prefork_server::client::send_greeting;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    let cli = ClientCli::parse();

    send_greeting(&cli.host, cli.port, cli.message.as_bytes())
        .await
        .with_context(|| format!("cannot greet {}:{}", cli.host, cli.port))?;
    Ok(())
}
