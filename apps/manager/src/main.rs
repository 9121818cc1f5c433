//! # Global Hub Manager
//!
//! Status sync server for leaf hub agents.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Manager Server                                   │
//! │                                                                         │
//! │  Agent ───► WebSocket (8765) ───► Conflation ───► SQLite               │
//! │                                       │                                 │
//! │                                       ▼                                 │
//! │                                   Statistics                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `globalhub-manager [config.toml]`. Every setting can be
//! overridden with `GLOBALHUB_MANAGER__<SECTION>__<KEY>`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use globalhub_db::Database;
use globalhub_manager::{
    register_handlers, ConflationManager, DataRetention, ManagerConfig, TransportDispatcher,
};
use globalhub_transport::{Consumer, WsConsumer};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const STATISTICS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,globalhub=debug")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting Global Hub manager...");

    // Load configuration
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = ManagerConfig::load(config_path.as_deref()).context("loading configuration")?;
    info!(
        db = %config.database.path.display(),
        port = config.server.port,
        workers = config.conflation.workers,
        "Configuration loaded"
    );

    // Open database (migrations run on open)
    let db = Database::new(config.db_config())
        .await
        .context("opening database")?;
    info!("Database ready");

    let shutdown = CancellationToken::new();

    // Conflation and handlers
    let conflation = register_handlers(ConflationManager::builder(), &db, &config).build()?;
    let mut workers = conflation.start(config.conflation.workers, shutdown.clone());

    // Transport
    let consumer = WsConsumer::new(config.consumer_config());
    consumer.start(shutdown.clone()).await?;
    let rx = consumer
        .message_chan()
        .context("consumer message channel already taken")?;

    let dispatcher = TransportDispatcher::new(conflation.clone());
    let token = shutdown.clone();
    let dispatch_task = tokio::spawn(async move { dispatcher.run(rx, token).await });

    // Data retention
    let retention_task = if config.retention.enabled {
        let retention = DataRetention::new(
            db.clone(),
            config.retention_period(),
            config.retention_interval(),
        );
        let token = shutdown.clone();
        Some(tokio::spawn(async move { retention.run(token).await }))
    } else {
        info!("Data retention disabled");
        None
    };

    // Periodic statistics
    let stats_conflation = conflation.clone();
    let token = shutdown.clone();
    let stats_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATISTICS_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let stats = stats_conflation.statistics().await;
                    for (hub, hub_stats) in &stats.hubs {
                        info!(leaf_hub = %hub, stats = %hub_stats, "Conflation statistics");
                    }
                    info!(total = %stats.total(), "Conflation statistics");
                }
            }
        }
    });

    shutdown_signal().await;
    shutdown.cancel();

    if let Err(e) = dispatch_task.await {
        error!(error = %e, "Dispatcher task failed");
    }
    if let Some(task) = retention_task {
        if let Err(e) = task.await {
            error!(error = %e, "Data retention task failed");
        }
    }
    if let Err(e) = stats_task.await {
        error!(error = %e, "Statistics task failed");
    }
    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Conflation worker failed");
        }
    }

    db.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install signal handler");
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

    info!("Shutdown signal received, starting graceful shutdown...");
}
