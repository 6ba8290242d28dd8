// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for flowgate-core.
//!
//! Every query is scoped by tenant id. Lookups of another tenant's rows
//! behave exactly like lookups of rows that do not exist.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryPersistence;
pub use self::postgres::PostgresPersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::AuditLogEntry;
use crate::error::Result;
use crate::models::{
    CredentialMapping, EnforcementAction, Environment, ExecutionRecord, ExecutionStats,
    GracePeriod, GracePeriodStatus, LogicalCredential, PlanResource, Promotion, ResourceKind,
    RetentionTable, Snapshot, Subscription, TenantUser, WorkflowMapping, WorkflowRecord,
};
use crate::pagination::PageRequest;

/// Persistence interface used by flowgate services.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    // ------------------------------------------------------------------
    // Environments
    // ------------------------------------------------------------------

    async fn insert_environment(&self, environment: &Environment) -> Result<()>;

    /// Active or inactive environment by id.
    async fn get_environment(&self, tenant_id: &str, id: Uuid) -> Result<Option<Environment>>;

    /// One page of active environments, ordered by name, plus the total count.
    async fn list_environments(
        &self,
        tenant_id: &str,
        page: &PageRequest,
    ) -> Result<(Vec<Environment>, i64)>;

    /// Active environments across all tenants.
    async fn list_all_active_environments(&self) -> Result<Vec<Environment>>;

    async fn update_environment(&self, environment: &Environment) -> Result<()>;

    async fn update_environment_health(
        &self,
        tenant_id: &str,
        id: Uuid,
        healthy: bool,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn mark_environment_synced(
        &self,
        tenant_id: &str,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Soft-delete. Returns false if no active environment matched.
    async fn deactivate_environment(&self, tenant_id: &str, id: Uuid) -> Result<bool>;

    // ------------------------------------------------------------------
    // Cached workflows
    // ------------------------------------------------------------------

    /// Insert or refresh a cached workflow, keyed by provider workflow id.
    async fn upsert_workflow(&self, workflow: &WorkflowRecord) -> Result<()>;

    /// Delete cached workflows of an environment whose ids are not in `keep`.
    async fn remove_workflows_not_in(
        &self,
        tenant_id: &str,
        environment_id: Uuid,
        keep: &[String],
    ) -> Result<u64>;

    async fn list_workflows(
        &self,
        tenant_id: &str,
        environment_id: Uuid,
        page: &PageRequest,
    ) -> Result<(Vec<WorkflowRecord>, i64)>;

    async fn count_workflows(&self, tenant_id: &str, environment_id: Uuid) -> Result<i64>;

    async fn upsert_workflow_mapping(&self, mapping: &WorkflowMapping) -> Result<()>;

    async fn find_workflow_mapping(
        &self,
        tenant_id: &str,
        source_environment_id: Uuid,
        source_workflow_id: &str,
        target_environment_id: Uuid,
    ) -> Result<Option<WorkflowMapping>>;

    // ------------------------------------------------------------------
    // Executions
    // ------------------------------------------------------------------

    async fn upsert_execution(&self, execution: &ExecutionRecord) -> Result<()>;

    /// Execution counts for an environment since `since`.
    async fn execution_stats(
        &self,
        tenant_id: &str,
        environment_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<ExecutionStats>;

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    async fn get_snapshot(&self, tenant_id: &str, id: Uuid) -> Result<Option<Snapshot>>;

    /// One page of an environment's snapshots, newest first.
    async fn list_snapshots(
        &self,
        tenant_id: &str,
        environment_id: Uuid,
        page: &PageRequest,
    ) -> Result<(Vec<Snapshot>, i64)>;

    // ------------------------------------------------------------------
    // Promotions
    // ------------------------------------------------------------------

    async fn insert_promotion(&self, promotion: &Promotion) -> Result<()>;

    async fn get_promotion(&self, tenant_id: &str, id: Uuid) -> Result<Option<Promotion>>;

    /// One page of promotions, newest first.
    async fn list_promotions(
        &self,
        tenant_id: &str,
        page: &PageRequest,
    ) -> Result<(Vec<Promotion>, i64)>;

    /// Persist status, result, snapshot references and timestamps.
    async fn update_promotion(&self, promotion: &Promotion) -> Result<()>;

    // ------------------------------------------------------------------
    // Audit logs
    // ------------------------------------------------------------------

    async fn insert_audit_log(&self, entry: &AuditLogEntry) -> Result<()>;

    /// One page of audit entries, newest first.
    async fn list_audit_logs(
        &self,
        tenant_id: &str,
        page: &PageRequest,
    ) -> Result<(Vec<AuditLogEntry>, i64)>;

    // ------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------

    async fn insert_logical_credential(&self, credential: &LogicalCredential) -> Result<()>;

    async fn list_logical_credentials(&self, tenant_id: &str) -> Result<Vec<LogicalCredential>>;

    /// Delete a logical credential and its mappings.
    async fn delete_logical_credential(&self, tenant_id: &str, id: Uuid) -> Result<bool>;

    /// Insert or replace the mapping for (logical credential, environment).
    async fn upsert_credential_mapping(
        &self,
        mapping: &CredentialMapping,
    ) -> Result<CredentialMapping>;

    async fn list_credential_mappings(
        &self,
        tenant_id: &str,
        environment_id: Option<Uuid>,
    ) -> Result<Vec<CredentialMapping>>;

    async fn delete_credential_mapping(&self, tenant_id: &str, id: Uuid) -> Result<bool>;

    // ------------------------------------------------------------------
    // Tenants & billing
    // ------------------------------------------------------------------

    async fn insert_tenant_user(&self, user: &TenantUser) -> Result<()>;

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()>;

    async fn get_subscription(&self, tenant_id: &str) -> Result<Option<Subscription>>;

    async fn find_subscription_by_customer(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<Subscription>>;

    /// Every tenant that owns an environment or a subscription.
    async fn list_tenants(&self) -> Result<Vec<String>>;

    // ------------------------------------------------------------------
    // Downgrade enforcement
    // ------------------------------------------------------------------

    /// Resources counted against a plan limit, oldest first.
    async fn list_plan_resources(
        &self,
        tenant_id: &str,
        kind: ResourceKind,
    ) -> Result<Vec<PlanResource>>;

    async fn insert_grace_period(&self, grace_period: &GracePeriod) -> Result<()>;

    async fn list_grace_periods(
        &self,
        tenant_id: &str,
        status: Option<GracePeriodStatus>,
    ) -> Result<Vec<GracePeriod>>;

    async fn find_active_grace_period(
        &self,
        tenant_id: &str,
        kind: ResourceKind,
        resource_id: &str,
    ) -> Result<Option<GracePeriod>>;

    async fn update_grace_period_status(
        &self,
        id: Uuid,
        status: GracePeriodStatus,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Active grace periods that expired at or before `now`, across tenants.
    async fn list_expired_grace_periods(&self, now: DateTime<Utc>) -> Result<Vec<GracePeriod>>;

    /// Apply an enforcement action. Returns false if the resource is gone.
    async fn apply_enforcement_action(
        &self,
        tenant_id: &str,
        kind: ResourceKind,
        resource_id: &str,
        action: EnforcementAction,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    // ------------------------------------------------------------------
    // Retention
    // ------------------------------------------------------------------

    async fn retention_override_days(&self, tenant_id: &str) -> Result<Option<i64>>;

    async fn set_retention_override(&self, tenant_id: &str, days: Option<i64>) -> Result<()>;

    async fn count_rows(&self, table: RetentionTable, tenant_id: &str) -> Result<i64>;

    async fn count_rows_older_than(
        &self,
        table: RetentionTable,
        tenant_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<i64>;

    /// Delete up to `limit` of the oldest rows older than `cutoff`.
    async fn delete_oldest_rows_before(
        &self,
        table: RetentionTable,
        tenant_id: &str,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64>;

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    async fn health_check(&self) -> Result<bool>;
}
