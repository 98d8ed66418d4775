//! Page watcher
//!
//! Polls one page on a fixed interval and notifies the configured sink
//! when its extracted content changes. Configuration comes from the
//! environment (see `Config::from_env`).

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use watcher_core::{
    notifier, Config, Extractor, HttpFetcher, JsonFileStore, ReqwestTransport, SystemClock,
    Watcher,
};

#[derive(Parser)]
#[command(name = "page-watcher")]
#[command(about = "Watch a web page and report changes")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check on the configured interval until interrupted (default)
    Run,

    /// Run a single check and exit; exit code 1 if it fails
    Once,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,watcher_core=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    let mut watcher = build_watcher(&config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let shutdown = CancellationToken::new();
            spawn_signal_handler(shutdown.clone());
            watcher.run(shutdown).await;
        }
        Commands::Once => {
            if watcher.run_once().await.is_err() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn build_watcher(config: &Config) -> Result<Watcher> {
    let clock = Arc::new(SystemClock);

    let rule = config.selection_rule()?;
    let extractor = Extractor::new(rule).context("Invalid selection rule")?;

    let transport = ReqwestTransport::new().context("Failed to build HTTP client")?;
    let fetcher = HttpFetcher::new(transport, config.retry.clone(), clock.clone());

    let store = JsonFileStore::new(config.state_file.clone()).for_target(config.target.url.as_str());
    let notifier = notifier::build(&config.notify).context("Failed to build notifier")?;

    tracing::info!(
        url = %config.target.url,
        state_file = %config.state_file.display(),
        rule_version = extractor.rule().version,
        notifier = notifier.name(),
        "Watcher configured"
    );

    Ok(Watcher::new(
        config.target.clone(),
        Arc::new(fetcher),
        extractor,
        Arc::new(store),
        notifier,
        clock,
    )
    .with_config(config.watcher.clone()))
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        tracing::info!("Received shutdown signal");
        shutdown.cancel();
    });
}
