//! `aura-runner` -- submit audio files to a local AuraTranscribe server,
//! wait for every transcript, then export them.
//!
//! ```text
//! aura-runner <audio file>...
//! ```
//!
//! Configuration comes from the environment (see
//! [`RunnerConfig::from_env`](aura_runner::config::RunnerConfig::from_env)).

use std::path::PathBuf;

use aura_runner::config::RunnerConfig;
use aura_runner::session;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "aura_runner=info,aura_client=info,aura_batch=info";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let files: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if files.is_empty() {
        tracing::error!("Usage: aura-runner <audio file>...");
        std::process::exit(2);
    }

    let config = RunnerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        files = files.len(),
        export_mode = ?config.export_mode,
        "Starting aura-runner",
    );

    match session::run(&config, files).await {
        Ok(report) => {
            tracing::info!(
                exported = report.success_count(),
                skipped = report.skipped.len(),
                failed = report.failed.len(),
                "Batch finished",
            );
            if !report.failed.is_empty() {
                std::process::exit(1);
            }
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Batch aborted");
            std::process::exit(1);
        }
    }
}
