// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flowgate Server - Workflow Promotion API
//!
//! An HTTP server responsible for:
//! - Environment registry and cache sync
//! - Promotions with Git snapshots and rollback
//! - Stripe billing webhook and plan enforcement
//! - Retention and downgrade workers

use std::sync::Arc;

use flowgate_connectors::HttpAdapterRegistry;
use flowgate_core::downgrade::DowngradeSettings;
use flowgate_core::migrations;
use flowgate_core::persistence::PostgresPersistence;
use flowgate_server::workers::{
    DowngradeWorker, DowngradeWorkerConfig, RetentionWorker, RetentionWorkerConfig,
};
use flowgate_server::{AppState, Config, StateSettings, create_router};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "flowgate_server=info,flowgate_core=info".into());
    let json_logs = std::env::var("FLOWGATE_LOG_JSON")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    if json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    if let Err(e) = dotenv {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;
    let retention_config = RetentionWorkerConfig::from_env();
    let downgrade_config = DowngradeWorkerConfig::from_env();

    info!(
        http_addr = %config.http_addr,
        github_api_url = %config.github_api_url,
        billing_webhook = config.stripe_webhook_secret.is_some(),
        "Starting Flowgate server"
    );

    // Connect to database
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;
    info!("Connected to database");

    migrations::run_postgres(&pool).await?;
    info!("Database migrations applied");

    let persistence = Arc::new(PostgresPersistence::new(pool));
    let registry = Arc::new(HttpAdapterRegistry::new(config.adapter_config()));

    let state = Arc::new(AppState::new(
        persistence,
        registry,
        StateSettings {
            stripe_webhook_secret: config.stripe_webhook_secret.clone(),
            retention: retention_config.settings,
            downgrade: DowngradeSettings::default()
                .with_grace_period_days(downgrade_config.grace_period_days),
        },
    ));

    // Background workers
    let retention_worker = Arc::new(RetentionWorker::new(
        state.retention.clone(),
        retention_config,
    ));
    let downgrade_worker = Arc::new(DowngradeWorker::new(
        state.downgrade.clone(),
        downgrade_config,
    ));
    let retention_shutdown = retention_worker.shutdown_handle();
    let downgrade_shutdown = downgrade_worker.shutdown_handle();
    let retention_task = tokio::spawn({
        let worker = retention_worker.clone();
        async move { worker.run().await }
    });
    let downgrade_task = tokio::spawn({
        let worker = downgrade_worker.clone();
        async move { worker.run().await }
    });

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "Flowgate server ready");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        })
        .await?;

    // Graceful shutdown
    retention_shutdown.notify_one();
    downgrade_shutdown.notify_one();
    let _ = tokio::join!(retention_task, downgrade_task);

    info!("Flowgate server shut down");

    Ok(())
}
