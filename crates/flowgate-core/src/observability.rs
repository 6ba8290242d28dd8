// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-environment health and execution overview.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::models::ExecutionStats;
use crate::pagination::{MAX_PAGE_SIZE, PageRequest};
use crate::persistence::Persistence;

/// Window covered by the execution counts.
pub const OVERVIEW_WINDOW_HOURS: i64 = 24;

/// Overview row for one environment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentOverview {
    pub environment_id: Uuid,
    pub name: String,
    pub environment_class: String,
    pub is_healthy: Option<bool>,
    pub is_read_only: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub workflow_count: i64,
    pub executions: ExecutionStats,
    /// Successful share of finished executions, `None` when nothing finished.
    pub success_rate: Option<f64>,
}

/// Tenant-wide overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub since: DateTime<Utc>,
    pub environments: Vec<EnvironmentOverview>,
    pub executions: ExecutionStats,
    pub success_rate: Option<f64>,
}

/// Successful share of finished executions.
pub fn success_rate(stats: &ExecutionStats) -> Option<f64> {
    let finished = stats.success + stats.error;
    (finished > 0).then(|| stats.success as f64 / finished as f64)
}

#[derive(Clone)]
pub struct ObservabilityService {
    persistence: Arc<dyn Persistence>,
}

impl ObservabilityService {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Overview of every active environment of a tenant.
    pub async fn overview(&self, tenant_id: &str) -> Result<Overview> {
        let since = Utc::now() - Duration::hours(OVERVIEW_WINDOW_HOURS);
        let mut environments = Vec::new();
        let mut page = 1;
        loop {
            let request = PageRequest::new(Some(page), Some(MAX_PAGE_SIZE));
            let (items, total) = self.persistence.list_environments(tenant_id, &request).await?;
            let done = items.is_empty() || request.offset().saturating_add(request.limit()) >= total;
            environments.extend(items);
            if done {
                break;
            }
            page += 1;
        }

        let mut totals = ExecutionStats::default();
        let mut rows = Vec::with_capacity(environments.len());
        for env in environments {
            let executions = self
                .persistence
                .execution_stats(tenant_id, env.id, since)
                .await?;
            totals.total += executions.total;
            totals.success += executions.success;
            totals.error += executions.error;
            totals.running += executions.running;

            rows.push(EnvironmentOverview {
                environment_id: env.id,
                workflow_count: self.persistence.count_workflows(tenant_id, env.id).await?,
                success_rate: success_rate(&executions),
                executions,
                name: env.name,
                environment_class: env.environment_class,
                is_healthy: env.is_healthy,
                is_read_only: env.is_read_only,
                last_sync_at: env.last_sync_at,
            });
        }

        Ok(Overview {
            since,
            environments: rows,
            success_rate: success_rate(&totals),
            executions: totals,
        })
    }
}
