//! Flowgate CLI and HTTP server entry point.
//!
//! Binary name: `flowgate`
//!
//! Parses CLI arguments, sets up tracing, then dispatches to the command
//! handler or boots the engine and serves HTTP.

mod cli;
mod http;
mod state;
mod transport;

use clap::Parser;

use flowgate_infra::config::resolve_home_dir;
use flowgate_observe::tracing_setup::{TracingOptions, filter_for_verbosity, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(TracingOptions {
        default_filter: filter_for_verbosity(cli.verbose, cli.quiet).to_string(),
        json: cli.json,
        otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let home = resolve_home_dir(cli.home.as_deref());

    let result = match cli.command {
        Commands::Serve { port, host } => cli::serve::serve(&home, host, port, shutdown_signal()).await,
        Commands::Validate { file } => cli::validate::validate(&home, &file, cli.json).await,
        Commands::Status { uid } => cli::status::status(&home, &uid, cli.json).await,
    };

    shutdown_tracing();
    result
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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
    tracing::info!("shutdown signal received");
}
