//! rendezvous CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing::Level;

use rendezvous_client::cli::{Cli, Command};
use rendezvous_client::commands;
use rendezvous_client::config::ClientConfig;
use rendezvous_client::error::ClientResult;
use rendezvous_client::socket::SocketClient;
use rendezvous_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing_config = if cli.command.is_serve() {
        let daemon = TracingConfig::daemon();
        if cli.debug {
            daemon.with_level(Level::DEBUG)
        } else {
            daemon
        }
    } else {
        TracingConfig::cli(cli.debug)
    };
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("warning: {e}");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let config = match &cli.config {
        Some(path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load()?,
    };
    let socket_path = config.socket_path(cli.socket_path.as_deref());

    match &cli.command {
        Command::Serve => commands::serve::run(&config, socket_path).await,
        Command::Watch { user } => {
            let client = SocketClient::new(socket_path, config.timeout(cli.timeout));
            commands::watch::run(&client, user).await
        }
        command => {
            let client = SocketClient::new(socket_path, config.timeout(cli.timeout));
            commands::meetings::execute(&client, command).await
        }
    }
}
