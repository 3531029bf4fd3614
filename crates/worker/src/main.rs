use clap::Parser;
use genpipe_worker::cli::{Cli, Commands};
use genpipe_worker::commands;
use genpipe_worker::config::WorkerConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genpipe_worker=info,genpipe_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let command = Cli::parse().command();
    let config = WorkerConfig::from_env()?;

    tracing::info!(
        theme = %config.theme.id,
        database = %config.database_path().display(),
        "Configuration loaded",
    );

    match command {
        Commands::Run(args) => {
            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                signal_cancel.cancel();
            });

            commands::run(&config, &args, cancel).await?;
        }
        Commands::Stats => {
            commands::stats(&config).await?;
        }
        Commands::Prompts { sample } => commands::prompts(&config, sample),
        Commands::FixIds { yes } => commands::fix_ids(&config, yes).await?,
    }

    Ok(())
}

/// Wait for SIGINT or SIGTERM.
///
/// When a handler cannot be installed that signal is simply never
/// observed; the other one still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), finishing current work before exit");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, finishing current work before exit");
        }
    }
}
