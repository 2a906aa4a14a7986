// Main entry point for the restkit task queue CLI

use std::process;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use restkit::cli::{self, Cli};
use restkit::tasks::TaskRegistry;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,restkit=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Termination signals trip the cancellation token; every loop observes
    // it at its boundary, and the process exits with the signal number.
    let shutdown = CancellationToken::new();
    let received_signal = Arc::new(AtomicI32::new(0));

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    {
        let shutdown = shutdown.clone();
        let received_signal = received_signal.clone();
        tokio::spawn(async move {
            let signum = tokio::select! {
                _ = sigint.recv() => SignalKind::interrupt().as_raw_value(),
                _ = sigterm.recv() => SignalKind::terminate().as_raw_value(),
            };
            tracing::info!(signal = signum, "received termination signal");
            received_signal.store(signum, Ordering::SeqCst);
            shutdown.cancel();
        });
    }

    // Applications embedding the engine register their task types and build
    // their own binary around `cli::run`; the stock binary ships an empty
    // registry, which is all renew and cleanup need.
    let registry = Arc::new(TaskRegistry::new());

    cli::run(cli, registry, shutdown).await?;

    let signum = received_signal.load(Ordering::SeqCst);
    if signum != 0 {
        process::exit(signum);
    }
    Ok(())
}
