// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Plan-based retention of executions and audit logs.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::RetentionTable;
use crate::persistence::Persistence;
use crate::plans::tenant_plan;

/// Batching limits for one retention run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionSettings {
    /// Rows deleted per statement.
    pub batch_size: i64,
    /// Statements per table per run.
    pub max_batches: u32,
    /// Rows a tenant always keeps per table, regardless of age.
    pub min_rows_floor: i64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_batches: 10,
            min_rows_floor: 100,
        }
    }
}

/// Cleanup of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCleanup {
    pub table: RetentionTable,
    /// Rows older than the cutoff before cleanup.
    pub eligible: i64,
    pub deleted: u64,
    /// Rows in the table after cleanup.
    pub remaining: i64,
    /// Whether `max_batches` stopped the cleanup early.
    pub capped: bool,
}

/// Cleanup of one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionReport {
    pub tenant_id: String,
    pub retention_days: i64,
    pub cutoff: DateTime<Utc>,
    pub tables: Vec<TableCleanup>,
    pub errors: Vec<String>,
}

impl RetentionReport {
    /// Rows deleted across all tables.
    pub fn total_deleted(&self) -> u64 {
        self.tables.iter().map(|t| t.deleted).sum()
    }
}

/// Deletes rows older than a tenant's retention window.
#[derive(Clone)]
pub struct RetentionService {
    persistence: Arc<dyn Persistence>,
    settings: RetentionSettings,
}

impl RetentionService {
    pub fn new(persistence: Arc<dyn Persistence>, settings: RetentionSettings) -> Self {
        Self {
            persistence,
            settings,
        }
    }

    pub fn settings(&self) -> RetentionSettings {
        self.settings
    }

    /// Retention window of a tenant: the override if set, else the plan's.
    pub async fn retention_days(&self, tenant_id: &str) -> Result<i64> {
        if let Some(days) = self.persistence.retention_override_days(tenant_id).await? {
            return Ok(days);
        }
        let (plan, _) = tenant_plan(self.persistence.as_ref(), tenant_id).await?;
        Ok(plan.limits().retention_days)
    }

    /// Set or clear a tenant's retention override.
    pub async fn set_override(&self, tenant_id: &str, days: Option<i64>) -> Result<()> {
        if days.is_some_and(|d| d < 1) {
            return Err(Error::Validation(
                "retention override must be at least 1 day".to_string(),
            ));
        }
        self.persistence.set_retention_override(tenant_id, days).await
    }

    /// Clean up every table of one tenant.
    pub async fn run_for_tenant(&self, tenant_id: &str) -> Result<RetentionReport> {
        self.run_for_tenant_at(tenant_id, Utc::now()).await
    }

    /// Clean up as if the current time were `now`.
    pub async fn run_for_tenant_at(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RetentionReport> {
        let retention_days = self.retention_days(tenant_id).await?;
        let cutoff = now - Duration::days(retention_days);
        let mut report = RetentionReport {
            tenant_id: tenant_id.to_string(),
            retention_days,
            cutoff,
            tables: Vec::new(),
            errors: Vec::new(),
        };

        for table in RetentionTable::ALL {
            match self.clean_table(table, tenant_id, cutoff).await {
                Ok(cleanup) => report.tables.push(cleanup),
                Err(e) => {
                    warn!(
                        tenant_id = %tenant_id,
                        table = table.table_name(),
                        error = %e,
                        "Retention cleanup failed"
                    );
                    report
                        .errors
                        .push(format!("{}: {e}", table.table_name()));
                }
            }
        }

        info!(
            tenant_id = %tenant_id,
            retention_days,
            deleted = report.total_deleted(),
            errors = report.errors.len(),
            "Retention run finished"
        );
        Ok(report)
    }

    /// Clean up every known tenant. Failing tenants are logged and skipped.
    pub async fn run_all(&self) -> Result<Vec<RetentionReport>> {
        let tenants = self.persistence.list_tenants().await?;
        let mut reports = Vec::with_capacity(tenants.len());
        for tenant_id in tenants {
            match self.run_for_tenant(&tenant_id).await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(tenant_id = %tenant_id, error = %e, "Retention run failed"),
            }
        }
        Ok(reports)
    }

    async fn clean_table(
        &self,
        table: RetentionTable,
        tenant_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<TableCleanup> {
        let total = self.persistence.count_rows(table, tenant_id).await?;
        let eligible = self
            .persistence
            .count_rows_older_than(table, tenant_id, cutoff)
            .await?;
        let allowed = eligible.min((total - self.settings.min_rows_floor).max(0));

        let mut deleted = 0u64;
        let mut batches = 0u32;
        let batch_size = self.settings.batch_size.max(1);
        while (deleted as i64) < allowed && batches < self.settings.max_batches {
            let limit = batch_size.min(allowed - deleted as i64);
            let removed = self
                .persistence
                .delete_oldest_rows_before(table, tenant_id, cutoff, limit)
                .await?;
            batches += 1;
            deleted += removed;
            debug!(
                tenant_id = %tenant_id,
                table = table.table_name(),
                batch = batches,
                removed,
                "Retention batch deleted"
            );
            if (removed as i64) < limit {
                break;
            }
        }

        Ok(TableCleanup {
            table,
            eligible,
            deleted,
            remaining: total - deleted as i64,
            capped: (deleted as i64) < allowed && batches >= self.settings.max_batches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, AuditContext, AuditEvent, AuditLogger};
    use crate::models::{ExecutionRecord, Subscription};
    use crate::persistence::MemoryPersistence;
    use uuid::Uuid;

    async fn seed_executions(persistence: &MemoryPersistence, tenant: &str, ages_in_days: &[i64]) {
        let env = Uuid::new_v4();
        for (i, age) in ages_in_days.iter().enumerate() {
            persistence
                .upsert_execution(&ExecutionRecord {
                    tenant_id: tenant.into(),
                    environment_id: env,
                    execution_id: i.to_string(),
                    workflow_id: None,
                    status: "success".into(),
                    started_at: Utc::now() - Duration::days(*age),
                    finished_at: None,
                })
                .await
                .unwrap();
        }
    }

    fn settings(batch_size: i64, max_batches: u32, min_rows_floor: i64) -> RetentionSettings {
        RetentionSettings {
            batch_size,
            max_batches,
            min_rows_floor,
        }
    }

    #[tokio::test]
    async fn test_plan_and_override_days() {
        let persistence = Arc::new(MemoryPersistence::new());
        let service = RetentionService::new(persistence.clone(), RetentionSettings::default());
        assert_eq!(service.retention_days("t1").await.unwrap(), 7);

        persistence
            .upsert_subscription(&Subscription {
                tenant_id: "t1".into(),
                stripe_customer_id: None,
                stripe_subscription_id: None,
                plan_tier: "agency".into(),
                status: "active".into(),
                current_period_end: None,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(service.retention_days("t1").await.unwrap(), 90);

        service.set_override("t1", Some(14)).await.unwrap();
        assert_eq!(service.retention_days("t1").await.unwrap(), 14);
        assert!(service.set_override("t1", Some(0)).await.is_err());
    }

    #[tokio::test]
    async fn test_deletes_only_old_rows_in_batches() {
        let persistence = Arc::new(MemoryPersistence::new());
        seed_executions(&persistence, "t1", &[1, 2, 10, 11, 12, 13, 14]).await;
        let service = RetentionService::new(persistence.clone(), settings(2, 10, 0));

        let report = service.run_for_tenant("t1").await.unwrap();
        let executions = &report.tables[0];
        assert_eq!(executions.table, RetentionTable::Executions);
        assert_eq!(executions.eligible, 5);
        assert_eq!(executions.deleted, 5);
        assert_eq!(executions.remaining, 2);
        assert!(!executions.capped);
    }

    #[tokio::test]
    async fn test_floor_and_batch_cap() {
        let persistence = Arc::new(MemoryPersistence::new());
        seed_executions(&persistence, "t1", &[1, 10, 11, 12, 13, 14, 15, 16]).await;

        // Floor of 5 leaves at most 3 deletable rows.
        let service = RetentionService::new(persistence.clone(), settings(10, 10, 5));
        let report = service.run_for_tenant("t1").await.unwrap();
        assert_eq!(report.tables[0].deleted, 3);
        assert_eq!(report.tables[0].remaining, 5);

        // One batch of one row per run.
        let service = RetentionService::new(persistence.clone(), settings(1, 1, 0));
        let report = service.run_for_tenant("t1").await.unwrap();
        assert_eq!(report.tables[0].deleted, 1);
        assert!(report.tables[0].capped);
        assert_eq!(
            persistence.count_rows(RetentionTable::Executions, "t1").await.unwrap(),
            4
        );
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let persistence = Arc::new(MemoryPersistence::new());
        seed_executions(&persistence, "t1", &[30, 31]).await;
        seed_executions(&persistence, "t2", &[30, 31]).await;
        let audit = AuditLogger::new(persistence.clone());
        audit
            .record(
                &AuditContext::system("t2"),
                AuditEvent::new(AuditAction::Sync, "environment", "e1"),
            )
            .await;

        let service = RetentionService::new(persistence.clone(), settings(10, 10, 0));
        service.run_for_tenant("t1").await.unwrap();
        assert_eq!(persistence.count_rows(RetentionTable::Executions, "t1").await.unwrap(), 0);
        assert_eq!(persistence.count_rows(RetentionTable::Executions, "t2").await.unwrap(), 2);
        assert_eq!(persistence.count_rows(RetentionTable::AuditLogs, "t2").await.unwrap(), 1);
    }
}
