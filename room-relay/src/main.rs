use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

use room_relay::{
    cli::{Cli, Command, ServerArgs},
    client,
    config::RelayConfig,
    server::Server,
};

/// Logs to stdout; `RUST_LOG` overrides the `info` default.
fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

async fn serve(args: ServerArgs) -> Result<()> {
    let config = RelayConfig::from(&args);
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let server = Server::with_config(listener, config);

    info!(
        queue_capacity = config.queue_capacity,
        outbox_capacity = config.outbox_capacity,
        "relay listening on {}",
        server.local_addr()?
    );

    server
        .run_until_ctrl_c()
        .await
        .inspect_err(|error| warn!(?error, "relay stopped with an error"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    match Cli::parse().command {
        Command::Server(args) => serve(args).await,
        Command::Client(args) => client::run(args).await,
    }
}
