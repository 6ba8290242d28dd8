// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker for plan downgrades.
//!
//! Each poll:
//! 1. Checks every tenant's usage against its plan, starting or cancelling
//!    grace periods
//! 2. Enforces grace periods that have expired

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flowgate_core::downgrade::DowngradeService;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use super::retention::env_parse;

/// Configuration for the downgrade worker.
#[derive(Debug, Clone)]
pub struct DowngradeWorkerConfig {
    /// Whether the worker runs at all.
    pub enabled: bool,
    /// How often to run.
    pub poll_interval: Duration,
    /// Length of a grace period.
    pub grace_period_days: i64,
}

impl Default for DowngradeWorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(900), // 15 minutes
            grace_period_days: 7,
        }
    }
}

impl DowngradeWorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `FLOWGATE_DOWNGRADE_ENABLED`: "false" or "0" to disable (default: true)
    /// - `FLOWGATE_DOWNGRADE_POLL_INTERVAL_SECS`: seconds between runs (default: 900)
    /// - `FLOWGATE_DOWNGRADE_GRACE_PERIOD_DAYS`: grace period length (default: 7)
    pub fn from_env() -> Self {
        let enabled = std::env::var("FLOWGATE_DOWNGRADE_ENABLED")
            .map(|v| !(v == "false" || v == "0"))
            .unwrap_or(true);

        Self {
            enabled,
            poll_interval: Duration::from_secs(
                env_parse("FLOWGATE_DOWNGRADE_POLL_INTERVAL_SECS").unwrap_or(900),
            ),
            grace_period_days: env_parse("FLOWGATE_DOWNGRADE_GRACE_PERIOD_DAYS")
                .filter(|days: &i64| *days > 0)
                .unwrap_or(7),
        }
    }
}

/// Background worker checking plans and enforcing expired grace periods.
pub struct DowngradeWorker {
    service: DowngradeService,
    config: DowngradeWorkerConfig,
    shutdown: Arc<Notify>,
}

impl DowngradeWorker {
    pub fn new(service: DowngradeService, config: DowngradeWorkerConfig) -> Self {
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
            info!("Downgrade worker disabled");
            return;
        }

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            grace_period_days = self.config.grace_period_days,
            "Downgrade worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Downgrade worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.run_once().await;
                }
            }
        }

        info!("Downgrade worker stopped");
    }

    /// Check all tenants, then enforce expired grace periods.
    pub async fn run_once(&self) {
        match self.service.check_all().await {
            Ok(checks) => {
                let non_compliant = checks.iter().filter(|c| !c.is_compliant()).count();
                info!(tenants = checks.len(), non_compliant, "Downgrade check finished");
            }
            Err(e) => error!(error = %e, "Downgrade check failed"),
        }

        match self.service.enforce_expired(Utc::now()).await {
            Ok(report) => {
                if !report.errors.is_empty() {
                    warn!(errors = ?report.errors, "Some grace periods could not be enforced");
                }
                info!(
                    enforced = report.enforced,
                    resource_missing = report.resource_missing,
                    "Grace period enforcement finished"
                );
            }
            Err(e) => error!(error = %e, "Grace period enforcement failed"),
        }
    }
}
