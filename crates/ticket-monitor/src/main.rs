use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

mod availability;
mod calendar_client;
mod config;
mod error;
mod identity;
mod logging;
mod monitor;
mod notifier;
mod tracker;

use crate::calendar_client::CalendarClient;
use crate::config::{Args, MonitorConfig};
use crate::identity::IdentityPool;
use crate::monitor::{Monitor, SystemClock};
use crate::notifier::{DiscordNotifier, LogNotifier, Notifier};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let _log_guard = logging::init(args.log_dir.as_deref())?;
    let config = MonitorConfig::from_args(&args).context("Invalid configuration")?;

    tracing::info!("Nintendo Museum ticket monitor");
    tracing::info!("Monitoring: {}", config.target);
    tracing::info!("Interval: {:?}", config.interval);

    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;

    let pool = IdentityPool::load(&config.proxy_source, config.rotation, &http).await;
    if pool.is_empty() {
        tracing::info!("No proxies available, using direct connection");
    } else {
        tracing::info!("Rotating across {} proxies", pool.len());
    }

    let source = CalendarClient::new(
        &config.base_url,
        Arc::new(pool),
        config.request_timeout,
        config.attempts,
    );

    let notifier: Box<dyn Notifier> = match &config.webhook_url {
        Some(url) => Box::new(DiscordNotifier::new(http.clone(), url, &config.base_url)),
        None => {
            tracing::warn!("No Discord webhook URL configured; alerts will only be logged");
            Box::new(LogNotifier)
        }
    };

    let mut monitor = Monitor::new(
        config.target,
        Box::new(source),
        notifier,
        Box::new(SystemClock::new(config.timezone)),
        config.interval,
    );

    if config.once {
        let report = monitor.run_cycle().await;
        tracing::info!("Single check finished: {:?}", report);
        if monitor.state().notified().is_empty() {
            tracing::info!("Nothing to announce for {}", monitor.state().target());
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received, stopping...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                // Keep the sender alive so the monitor keeps running
                std::future::pending::<()>().await;
            }
        }
    });

    tracing::info!("Monitor running. Press Ctrl+C to stop.");
    monitor.run(shutdown_rx).await;

    Ok(())
}
