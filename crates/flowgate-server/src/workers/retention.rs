// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker applying plan-based retention.
//!
//! Every poll runs [`RetentionService::run_all`], which deletes executions and
//! audit logs older than each tenant's retention window in bounded batches.

use std::sync::Arc;
use std::time::Duration;

use flowgate_core::retention::{RetentionService, RetentionSettings};
use tokio::sync::Notify;
use tracing::{error, info};

/// Configuration for the retention worker.
#[derive(Debug, Clone)]
pub struct RetentionWorkerConfig {
    /// Whether retention runs at all.
    pub enabled: bool,
    /// How often to run.
    pub poll_interval: Duration,
    /// Batching limits passed to the service.
    pub settings: RetentionSettings,
}

impl Default for RetentionWorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(3600), // 1 hour
            settings: RetentionSettings::default(),
        }
    }
}

impl RetentionWorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `FLOWGATE_RETENTION_ENABLED`: "false" or "0" to disable (default: true)
    /// - `FLOWGATE_RETENTION_POLL_INTERVAL_SECS`: seconds between runs (default: 3600)
    /// - `FLOWGATE_RETENTION_BATCH_SIZE`: rows per delete (default: 1000)
    /// - `FLOWGATE_RETENTION_MAX_BATCHES`: deletes per table per run (default: 10)
    /// - `FLOWGATE_RETENTION_MIN_ROWS`: rows always kept per tenant and table (default: 100)
    pub fn from_env() -> Self {
        let defaults = RetentionSettings::default();

        let enabled = std::env::var("FLOWGATE_RETENTION_ENABLED")
            .map(|v| !(v == "false" || v == "0"))
            .unwrap_or(true);

        let poll_interval_secs = env_parse("FLOWGATE_RETENTION_POLL_INTERVAL_SECS").unwrap_or(3600);

        Self {
            enabled,
            poll_interval: Duration::from_secs(poll_interval_secs),
            settings: RetentionSettings {
                batch_size: env_parse("FLOWGATE_RETENTION_BATCH_SIZE")
                    .unwrap_or(defaults.batch_size),
                max_batches: env_parse("FLOWGATE_RETENTION_MAX_BATCHES")
                    .unwrap_or(defaults.max_batches),
                min_rows_floor: env_parse("FLOWGATE_RETENTION_MIN_ROWS")
                    .unwrap_or(defaults.min_rows_floor),
            },
        }
    }
}

pub(crate) fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Background worker running retention for every tenant.
pub struct RetentionWorker {
    service: RetentionService,
    config: RetentionWorkerConfig,
    shutdown: Arc<Notify>,
}

impl RetentionWorker {
    pub fn new(service: RetentionService, config: RetentionWorkerConfig) -> Self {
        Self {
            service,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the worker loop until shutdown is signalled.
    pub async fn run(&self) {
        if !self.config.enabled {
            info!("Retention worker disabled");
            return;
        }

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.settings.batch_size,
            max_batches = self.config.settings.max_batches,
            "Retention worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Retention worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.run_once().await;
                }
            }
        }

        info!("Retention worker stopped");
    }

    /// One pass over all tenants.
    pub async fn run_once(&self) {
        match self.service.run_all().await {
            Ok(reports) => {
                let deleted: u64 = reports.iter().map(|r| r.total_deleted()).sum();
                info!(tenants = reports.len(), deleted, "Retention pass finished");
            }
            Err(e) => error!(error = %e, "Retention pass failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_core::persistence::MemoryPersistence;

    #[tokio::test]
    async fn test_disabled_worker_returns_immediately() {
        let service = RetentionService::new(
            Arc::new(MemoryPersistence::new()),
            RetentionSettings::default(),
        );
        let worker = RetentionWorker::new(
            service,
            RetentionWorkerConfig {
                enabled: false,
                ..Default::default()
            },
        );
        worker.run().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_stops_on_shutdown() {
        let service = RetentionService::new(
            Arc::new(MemoryPersistence::new()),
            RetentionSettings::default(),
        );
        let worker = Arc::new(RetentionWorker::new(service, RetentionWorkerConfig::default()));
        let shutdown = worker.shutdown_handle();

        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });
        tokio::task::yield_now().await;
        shutdown.notify_one();
        handle.await.unwrap();
    }
}
