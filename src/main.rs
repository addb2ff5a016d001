use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use profrag::cli::commands::{
    handle_ask, handle_config, handle_search, handle_serve, handle_status,
};
use profrag::cli::{Cli, Commands};
use profrag::models::{Config, OutputFormat};

fn init_tracing(verbose: bool) {
    let default = if verbose { "profrag=debug" } else { "profrag=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let resolved = Config::load().unwrap_or_default();
    let format = cli.format.unwrap_or(resolved.search.default_format);
    let verbose = cli.verbose;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    run_command(cli.command, format, verbose, shutdown).await
}

async fn run_command(
    command: Commands,
    format: OutputFormat,
    verbose: bool,
    shutdown: CancellationToken,
) -> Result<()> {
    match command {
        Commands::Ask(args) => {
            handle_ask(args, format, verbose, shutdown).await?;
        }
        Commands::Search(args) => {
            tokio::select! {
                result = handle_search(args, format, verbose) => result?,
                _ = shutdown.cancelled() => eprintln!("\nReceived shutdown signal, cleaning up..."),
            }
        }
        Commands::Serve(args) => {
            handle_serve(args, shutdown.cancelled_owned()).await?;
        }
        Commands::Status => {
            handle_status(format, verbose).await?;
        }
        Commands::Config(cmd) => {
            handle_config(cmd, format, verbose).await?;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
