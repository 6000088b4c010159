use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

mod api;
mod config;

use config::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "miniflow")]
#[command(about = "DAG workflow engine serving one workflow over HTTP", long_about = None)]
struct Args {
    /// Path to the configuration and workflow definition file
    #[arg(short, long, default_value = "miniflow.toml", env = "MINIFLOW_CONFIG")]
    config: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "miniflow=info,tower_http=debug".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let args = Args::parse();

    tracing::info!("Starting Miniflow");
    tracing::info!("Configuration file: {}", args.config.display());

    let config = ServerConfig::load(&args.config)?;
    tracing::info!(
        steps = config.steps.len(),
        edges = config.edges.len(),
        gateway = %config.run.gateway,
        "Workflow definition loaded"
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        on_shutdown_signal(tokio::signal::ctrl_c().await, &signal);
    });

    let addr = format!("{}:{}", args.host, args.port);
    tracing::info!("Starting API server on {}", addr);

    api::serve(&addr, config, shutdown).await?;

    Ok(())
}

/// Cancel the server only on a delivered signal; a failed handler install keeps it running.
fn on_shutdown_signal(signal: std::io::Result<()>, shutdown: &CancellationToken) {
    match signal {
        Ok(()) => {
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_cancels_shutdown_token() {
        let shutdown = CancellationToken::new();
        on_shutdown_signal(Ok(()), &shutdown);
        assert!(shutdown.is_cancelled());
    }

    #[test]
    fn test_signal_handler_error_keeps_server_running() {
        let shutdown = CancellationToken::new();
        on_shutdown_signal(Err(std::io::Error::other("no signal handler")), &shutdown);
        assert!(!shutdown.is_cancelled());
    }
}
