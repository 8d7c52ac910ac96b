//! s3-mirror: mirror a prefix of a public S3 bucket onto local disk.
//!
//! Keys are listed up front, then processed by a bounded pool of workers.
//! Each object is streamed to a temp file, size-verified and renamed into
//! place, so re-running after an interruption only fetches what is missing
//! or incomplete.

#![warn(clippy::all)]

mod cli;
mod config;
mod download;
mod listing;
pub mod retry;
mod shutdown;
mod store;
mod types;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use download::{MirrorContext, RunSummary};
use store::{ObjectStore, S3Store};

fn write_report(path: &std::path::Path, summary: &RunSummary) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!("Wrote run report to {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let config = config::Config::from_cli(cli)?;
    tracing::info!(
        bucket = %config.bucket,
        prefix = %config.prefix,
        workers = config.workers,
        "Starting s3-mirror"
    );

    let shutdown_token = shutdown::install_signal_handler()?;

    let store: Arc<dyn ObjectStore> = Arc::new(
        S3Store::connect(
            &config.bucket,
            &config.region,
            config.endpoint_url.as_deref(),
        )
        .await,
    );

    let keys = tokio::select! {
        result = listing::collect_keys(store.as_ref(), &config.prefix) => {
            result.with_context(|| format!("listing {}/{}", store.describe(), config.prefix))?
        }
        _ = shutdown_token.cancelled() => {
            tracing::info!("Shutdown requested during listing, nothing downloaded");
            return Ok(());
        }
    };

    if config.list_only {
        for key in &keys {
            println!("{key}");
        }
        return Ok(());
    }

    if keys.is_empty() {
        tracing::info!("No objects under {}/{}", store.describe(), config.prefix);
        return Ok(());
    }

    tokio::fs::create_dir_all(&config.directory)
        .await
        .with_context(|| format!("creating {}", config.directory.display()))?;

    let ctx = MirrorContext::new(store, config.download_config(), shutdown_token);
    let summary = download::run_mirror(&ctx, keys).await;
    summary.log();

    if let Some(path) = &config.report_json {
        // Exit status reflects the mirror, not the report.
        if let Err(e) = write_report(path, &summary) {
            tracing::error!("Could not write run report: {:#}", e);
        }
    }

    Ok(())
}
