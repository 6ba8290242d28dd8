// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory persistence backend.
//!
//! Mirrors the Postgres semantics closely enough for service and API tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::Persistence;
use crate::audit::AuditLogEntry;
use crate::error::{Error, Result};
use crate::models::{
    CredentialMapping, EnforcementAction, Environment, ExecutionRecord, ExecutionStats,
    GracePeriod, GracePeriodStatus, LogicalCredential, PlanResource, Promotion, ResourceKind,
    RetentionTable, Snapshot, Subscription, TenantUser, WorkflowMapping, WorkflowRecord,
};
use crate::pagination::PageRequest;

#[derive(Default)]
struct MemoryState {
    environments: Vec<Environment>,
    /// Cached workflows with their first-seen time.
    workflows: Vec<(WorkflowRecord, DateTime<Utc>)>,
    workflow_mappings: Vec<WorkflowMapping>,
    executions: Vec<ExecutionRecord>,
    snapshots: Vec<Snapshot>,
    promotions: Vec<Promotion>,
    audit_logs: Vec<AuditLogEntry>,
    logical_credentials: Vec<LogicalCredential>,
    credential_mappings: Vec<CredentialMapping>,
    tenant_users: Vec<TenantUser>,
    subscriptions: HashMap<String, Subscription>,
    grace_periods: Vec<GracePeriod>,
    retention_overrides: HashMap<String, i64>,
}

/// Persistence backed by in-process maps.
#[derive(Default)]
pub struct MemoryPersistence {
    state: Mutex<MemoryState>,
    fail_audit_writes: AtomicBool,
    failing_promotion_completions: AtomicUsize,
}

impl MemoryPersistence {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make audit inserts fail.
    pub fn set_fail_audit_writes(&self, fail: bool) {
        self.fail_audit_writes.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` promotion updates that carry a completion
    /// time fail.
    pub fn fail_promotion_completions(&self, count: usize) {
        self.failing_promotion_completions
            .store(count, Ordering::SeqCst);
    }

    /// Team member by id.
    pub async fn tenant_user(&self, tenant_id: &str, id: Uuid) -> Option<TenantUser> {
        self.state
            .lock()
            .await
            .tenant_users
            .iter()
            .find(|u| u.tenant_id == tenant_id && u.id == id)
            .cloned()
    }

    /// Cached workflow by provider id.
    pub async fn workflow(
        &self,
        tenant_id: &str,
        environment_id: Uuid,
        workflow_id: &str,
    ) -> Option<WorkflowRecord> {
        self.state
            .lock()
            .await
            .workflows
            .iter()
            .map(|(wf, _)| wf)
            .find(|wf| {
                wf.tenant_id == tenant_id
                    && wf.environment_id == environment_id
                    && wf.workflow_id == workflow_id
            })
            .cloned()
    }

    /// Every audit entry of a tenant, oldest first.
    pub async fn audit_entries(&self, tenant_id: &str) -> Vec<AuditLogEntry> {
        self.state
            .lock()
            .await
            .audit_logs
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect()
    }
}

fn paginate<T>(items: Vec<T>, page: &PageRequest) -> (Vec<T>, i64) {
    let total = items.len() as i64;
    let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
    let limit = usize::try_from(page.limit()).unwrap_or(0);
    let items = items.into_iter().skip(offset).take(limit).collect();
    (items, total)
}

fn row_timestamp(state: &MemoryState, table: RetentionTable, tenant_id: &str) -> Vec<DateTime<Utc>> {
    match table {
        RetentionTable::Executions => state
            .executions
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .map(|e| e.started_at)
            .collect(),
        RetentionTable::AuditLogs => state
            .audit_logs
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .map(|e| e.created_at)
            .collect(),
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn insert_environment(&self, environment: &Environment) -> Result<()> {
        self.state.lock().await.environments.push(environment.clone());
        Ok(())
    }

    async fn get_environment(&self, tenant_id: &str, id: Uuid) -> Result<Option<Environment>> {
        Ok(self
            .state
            .lock()
            .await
            .environments
            .iter()
            .find(|e| e.tenant_id == tenant_id && e.id == id)
            .cloned())
    }

    async fn list_environments(
        &self,
        tenant_id: &str,
        page: &PageRequest,
    ) -> Result<(Vec<Environment>, i64)> {
        let state = self.state.lock().await;
        let mut items: Vec<Environment> = state
            .environments
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.is_active)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(paginate(items, page))
    }

    async fn list_all_active_environments(&self) -> Result<Vec<Environment>> {
        let state = self.state.lock().await;
        let mut items: Vec<Environment> = state
            .environments
            .iter()
            .filter(|e| e.is_active)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id).then(a.name.cmp(&b.name)));
        Ok(items)
    }

    async fn update_environment(&self, environment: &Environment) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .environments
            .iter_mut()
            .find(|e| e.tenant_id == environment.tenant_id && e.id == environment.id)
        {
            existing.name = environment.name.clone();
            existing.environment_class = environment.environment_class.clone();
            existing.base_url = environment.base_url.clone();
            existing.api_key = environment.api_key.clone();
            existing.git_repo_url = environment.git_repo_url.clone();
            existing.git_branch = environment.git_branch.clone();
            existing.git_token = environment.git_token.clone();
            existing.git_folder = environment.git_folder.clone();
            existing.is_read_only = environment.is_read_only;
            existing.updated_at = environment.updated_at;
        }
        Ok(())
    }

    async fn update_environment_health(
        &self,
        tenant_id: &str,
        id: Uuid,
        healthy: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(env) = state
            .environments
            .iter_mut()
            .find(|e| e.tenant_id == tenant_id && e.id == id)
        {
            env.is_healthy = Some(healthy);
            if healthy {
                env.last_connected_at = Some(at);
            }
        }
        Ok(())
    }

    async fn mark_environment_synced(
        &self,
        tenant_id: &str,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(env) = state
            .environments
            .iter_mut()
            .find(|e| e.tenant_id == tenant_id && e.id == id)
        {
            env.last_sync_at = Some(at);
        }
        Ok(())
    }

    async fn deactivate_environment(&self, tenant_id: &str, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state
            .environments
            .iter_mut()
            .find(|e| e.tenant_id == tenant_id && e.id == id && e.is_active)
        {
            Some(env) => {
                env.is_active = false;
                env.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn upsert_workflow(&self, workflow: &WorkflowRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.workflows.iter_mut().find(|(wf, _)| {
            wf.tenant_id == workflow.tenant_id
                && wf.environment_id == workflow.environment_id
                && wf.workflow_id == workflow.workflow_id
        }) {
            Some((existing, _)) => {
                existing.name = workflow.name.clone();
                existing.active = workflow.active;
                existing.definition = workflow.definition.clone();
                existing.content_hash = workflow.content_hash.clone();
                existing.synced_at = workflow.synced_at;
            }
            None => state.workflows.push((workflow.clone(), Utc::now())),
        }
        Ok(())
    }

    async fn remove_workflows_not_in(
        &self,
        tenant_id: &str,
        environment_id: Uuid,
        keep: &[String],
    ) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.workflows.len();
        state.workflows.retain(|(wf, _)| {
            !(wf.tenant_id == tenant_id
                && wf.environment_id == environment_id
                && !keep.contains(&wf.workflow_id))
        });
        Ok((before - state.workflows.len()) as u64)
    }

    async fn list_workflows(
        &self,
        tenant_id: &str,
        environment_id: Uuid,
        page: &PageRequest,
    ) -> Result<(Vec<WorkflowRecord>, i64)> {
        let state = self.state.lock().await;
        let mut items: Vec<WorkflowRecord> = state
            .workflows
            .iter()
            .map(|(wf, _)| wf)
            .filter(|wf| wf.tenant_id == tenant_id && wf.environment_id == environment_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name).then(a.workflow_id.cmp(&b.workflow_id)));
        Ok(paginate(items, page))
    }

    async fn count_workflows(&self, tenant_id: &str, environment_id: Uuid) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state
            .workflows
            .iter()
            .filter(|(wf, _)| wf.tenant_id == tenant_id && wf.environment_id == environment_id)
            .count() as i64)
    }

    async fn upsert_workflow_mapping(&self, mapping: &WorkflowMapping) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.workflow_mappings.iter_mut().find(|m| {
            m.tenant_id == mapping.tenant_id
                && m.source_environment_id == mapping.source_environment_id
                && m.source_workflow_id == mapping.source_workflow_id
                && m.target_environment_id == mapping.target_environment_id
        }) {
            Some(existing) => {
                existing.target_workflow_id = mapping.target_workflow_id.clone();
                existing.content_hash = mapping.content_hash.clone();
                existing.updated_at = mapping.updated_at;
            }
            None => state.workflow_mappings.push(mapping.clone()),
        }
        Ok(())
    }

    async fn find_workflow_mapping(
        &self,
        tenant_id: &str,
        source_environment_id: Uuid,
        source_workflow_id: &str,
        target_environment_id: Uuid,
    ) -> Result<Option<WorkflowMapping>> {
        Ok(self
            .state
            .lock()
            .await
            .workflow_mappings
            .iter()
            .find(|m| {
                m.tenant_id == tenant_id
                    && m.source_environment_id == source_environment_id
                    && m.source_workflow_id == source_workflow_id
                    && m.target_environment_id == target_environment_id
            })
            .cloned())
    }

    async fn upsert_execution(&self, execution: &ExecutionRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.executions.iter_mut().find(|e| {
            e.tenant_id == execution.tenant_id
                && e.environment_id == execution.environment_id
                && e.execution_id == execution.execution_id
        }) {
            Some(existing) => {
                existing.status = execution.status.clone();
                existing.finished_at = execution.finished_at;
            }
            None => state.executions.push(execution.clone()),
        }
        Ok(())
    }

    async fn execution_stats(
        &self,
        tenant_id: &str,
        environment_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<ExecutionStats> {
        let state = self.state.lock().await;
        let mut stats = ExecutionStats::default();
        for execution in state.executions.iter().filter(|e| {
            e.tenant_id == tenant_id && e.environment_id == environment_id && e.started_at >= since
        }) {
            stats.total += 1;
            match execution.status.as_str() {
                "success" => stats.success += 1,
                "error" | "crashed" | "failed" => stats.error += 1,
                "running" | "waiting" | "new" => stats.running += 1,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.state.lock().await.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn get_snapshot(&self, tenant_id: &str, id: Uuid) -> Result<Option<Snapshot>> {
        Ok(self
            .state
            .lock()
            .await
            .snapshots
            .iter()
            .find(|s| s.tenant_id == tenant_id && s.id == id)
            .cloned())
    }

    async fn list_snapshots(
        &self,
        tenant_id: &str,
        environment_id: Uuid,
        page: &PageRequest,
    ) -> Result<(Vec<Snapshot>, i64)> {
        let state = self.state.lock().await;
        let mut items: Vec<Snapshot> = state
            .snapshots
            .iter()
            .rev()
            .filter(|s| s.tenant_id == tenant_id && s.environment_id == environment_id)
            .cloned()
            .collect();
        items.sort_by_key(|s| Reverse(s.created_at));
        Ok(paginate(items, page))
    }

    async fn insert_promotion(&self, promotion: &Promotion) -> Result<()> {
        self.state.lock().await.promotions.push(promotion.clone());
        Ok(())
    }

    async fn get_promotion(&self, tenant_id: &str, id: Uuid) -> Result<Option<Promotion>> {
        Ok(self
            .state
            .lock()
            .await
            .promotions
            .iter()
            .find(|p| p.tenant_id == tenant_id && p.id == id)
            .cloned())
    }

    async fn list_promotions(
        &self,
        tenant_id: &str,
        page: &PageRequest,
    ) -> Result<(Vec<Promotion>, i64)> {
        let state = self.state.lock().await;
        let mut items: Vec<Promotion> = state
            .promotions
            .iter()
            .rev()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect();
        items.sort_by_key(|p| Reverse(p.created_at));
        Ok(paginate(items, page))
    }

    async fn update_promotion(&self, promotion: &Promotion) -> Result<()> {
        if promotion.completed_at.is_some()
            && self
                .failing_promotion_completions
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(Error::Other("promotion store unavailable".to_string()));
        }
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .promotions
            .iter_mut()
            .find(|p| p.tenant_id == promotion.tenant_id && p.id == promotion.id)
        {
            existing.source_snapshot_id = promotion.source_snapshot_id;
            existing.target_pre_snapshot_id = promotion.target_pre_snapshot_id;
            existing.status = promotion.status.clone();
            existing.result = promotion.result.clone();
            existing.started_at = promotion.started_at;
            existing.completed_at = promotion.completed_at;
        }
        Ok(())
    }

    async fn insert_audit_log(&self, entry: &AuditLogEntry) -> Result<()> {
        if self.fail_audit_writes.load(Ordering::SeqCst) {
            return Err(Error::Other("audit store unavailable".to_string()));
        }
        self.state.lock().await.audit_logs.push(entry.clone());
        Ok(())
    }

    async fn list_audit_logs(
        &self,
        tenant_id: &str,
        page: &PageRequest,
    ) -> Result<(Vec<AuditLogEntry>, i64)> {
        let state = self.state.lock().await;
        let mut items: Vec<AuditLogEntry> = state
            .audit_logs
            .iter()
            .rev()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect();
        items.sort_by_key(|e| Reverse(e.created_at));
        Ok(paginate(items, page))
    }

    async fn insert_logical_credential(&self, credential: &LogicalCredential) -> Result<()> {
        let mut state = self.state.lock().await;
        if state
            .logical_credentials
            .iter()
            .any(|c| c.tenant_id == credential.tenant_id && c.name == credential.name)
        {
            return Err(Error::Conflict(format!(
                "logical credential '{}' already exists",
                credential.name
            )));
        }
        state.logical_credentials.push(credential.clone());
        Ok(())
    }

    async fn list_logical_credentials(&self, tenant_id: &str) -> Result<Vec<LogicalCredential>> {
        let state = self.state.lock().await;
        let mut items: Vec<LogicalCredential> = state
            .logical_credentials
            .iter()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn delete_logical_credential(&self, tenant_id: &str, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        let before = state.logical_credentials.len();
        state
            .logical_credentials
            .retain(|c| !(c.tenant_id == tenant_id && c.id == id));
        let deleted = state.logical_credentials.len() < before;
        if deleted {
            state
                .credential_mappings
                .retain(|m| !(m.tenant_id == tenant_id && m.logical_credential_id == id));
        }
        Ok(deleted)
    }

    async fn upsert_credential_mapping(
        &self,
        mapping: &CredentialMapping,
    ) -> Result<CredentialMapping> {
        let mut state = self.state.lock().await;
        match state.credential_mappings.iter_mut().find(|m| {
            m.tenant_id == mapping.tenant_id
                && m.logical_credential_id == mapping.logical_credential_id
                && m.environment_id == mapping.environment_id
        }) {
            Some(existing) => {
                existing.physical_credential_id = mapping.physical_credential_id.clone();
                existing.physical_name = mapping.physical_name.clone();
                existing.physical_type = mapping.physical_type.clone();
                existing.updated_at = mapping.updated_at;
                Ok(existing.clone())
            }
            None => {
                state.credential_mappings.push(mapping.clone());
                Ok(mapping.clone())
            }
        }
    }

    async fn list_credential_mappings(
        &self,
        tenant_id: &str,
        environment_id: Option<Uuid>,
    ) -> Result<Vec<CredentialMapping>> {
        let state = self.state.lock().await;
        Ok(state
            .credential_mappings
            .iter()
            .filter(|m| {
                m.tenant_id == tenant_id && environment_id.is_none_or(|env| m.environment_id == env)
            })
            .cloned()
            .collect())
    }

    async fn delete_credential_mapping(&self, tenant_id: &str, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        let before = state.credential_mappings.len();
        state
            .credential_mappings
            .retain(|m| !(m.tenant_id == tenant_id && m.id == id));
        Ok(state.credential_mappings.len() < before)
    }

    async fn insert_tenant_user(&self, user: &TenantUser) -> Result<()> {
        self.state.lock().await.tenant_users.push(user.clone());
        Ok(())
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut stored = subscription.clone();
        if let Some(existing) = state.subscriptions.get(&subscription.tenant_id) {
            if stored.stripe_customer_id.is_none() {
                stored.stripe_customer_id = existing.stripe_customer_id.clone();
            }
            if stored.stripe_subscription_id.is_none() {
                stored.stripe_subscription_id = existing.stripe_subscription_id.clone();
            }
        }
        state
            .subscriptions
            .insert(subscription.tenant_id.clone(), stored);
        Ok(())
    }

    async fn get_subscription(&self, tenant_id: &str) -> Result<Option<Subscription>> {
        Ok(self.state.lock().await.subscriptions.get(tenant_id).cloned())
    }

    async fn find_subscription_by_customer(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .state
            .lock()
            .await
            .subscriptions
            .values()
            .find(|s| s.stripe_customer_id.as_deref() == Some(stripe_customer_id))
            .cloned())
    }

    async fn list_tenants(&self) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let mut tenants: Vec<String> = state
            .environments
            .iter()
            .map(|e| e.tenant_id.clone())
            .chain(state.subscriptions.keys().cloned())
            .collect();
        tenants.sort();
        tenants.dedup();
        Ok(tenants)
    }

    async fn list_plan_resources(
        &self,
        tenant_id: &str,
        kind: ResourceKind,
    ) -> Result<Vec<PlanResource>> {
        let state = self.state.lock().await;
        let mut resources: Vec<PlanResource> = match kind {
            ResourceKind::Environment => state
                .environments
                .iter()
                .filter(|e| e.tenant_id == tenant_id && e.is_active)
                .map(|e| PlanResource {
                    id: e.id.to_string(),
                    created_at: e.created_at,
                })
                .collect(),
            ResourceKind::TeamMember => state
                .tenant_users
                .iter()
                .filter(|u| u.tenant_id == tenant_id && !u.is_disabled)
                .map(|u| PlanResource {
                    id: u.id.to_string(),
                    created_at: u.created_at,
                })
                .collect(),
            ResourceKind::Workflow => state
                .workflows
                .iter()
                .filter(|(wf, _)| {
                    wf.tenant_id == tenant_id
                        && !wf.is_archived
                        && state
                            .environments
                            .iter()
                            .any(|e| e.id == wf.environment_id && e.is_active)
                })
                .map(|(wf, created_at)| PlanResource {
                    id: wf.id.to_string(),
                    created_at: *created_at,
                })
                .collect(),
        };
        resources.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(resources)
    }

    async fn insert_grace_period(&self, grace_period: &GracePeriod) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.grace_periods.iter().any(|gp| {
            gp.tenant_id == grace_period.tenant_id
                && gp.resource_type == grace_period.resource_type
                && gp.resource_id == grace_period.resource_id
                && gp.status == GracePeriodStatus::Active.as_str()
                && grace_period.status == GracePeriodStatus::Active.as_str()
        }) {
            return Err(Error::Conflict(format!(
                "active grace period already exists for {} {}",
                grace_period.resource_type, grace_period.resource_id
            )));
        }
        state.grace_periods.push(grace_period.clone());
        Ok(())
    }

    async fn list_grace_periods(
        &self,
        tenant_id: &str,
        status: Option<GracePeriodStatus>,
    ) -> Result<Vec<GracePeriod>> {
        let state = self.state.lock().await;
        let mut items: Vec<GracePeriod> = state
            .grace_periods
            .iter()
            .filter(|gp| {
                gp.tenant_id == tenant_id && status.is_none_or(|s| gp.status == s.as_str())
            })
            .cloned()
            .collect();
        items.sort_by_key(|gp| Reverse(gp.starts_at));
        Ok(items)
    }

    async fn find_active_grace_period(
        &self,
        tenant_id: &str,
        kind: ResourceKind,
        resource_id: &str,
    ) -> Result<Option<GracePeriod>> {
        Ok(self
            .state
            .lock()
            .await
            .grace_periods
            .iter()
            .find(|gp| {
                gp.tenant_id == tenant_id
                    && gp.resource_type == kind.as_str()
                    && gp.resource_id == resource_id
                    && gp.status == GracePeriodStatus::Active.as_str()
            })
            .cloned())
    }

    async fn update_grace_period_status(
        &self,
        id: Uuid,
        status: GracePeriodStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(gp) = state.grace_periods.iter_mut().find(|gp| gp.id == id) {
            gp.status = status.as_str().to_string();
            gp.resolved_at = Some(at);
        }
        Ok(())
    }

    async fn list_expired_grace_periods(&self, now: DateTime<Utc>) -> Result<Vec<GracePeriod>> {
        let state = self.state.lock().await;
        let mut items: Vec<GracePeriod> = state
            .grace_periods
            .iter()
            .filter(|gp| gp.status == GracePeriodStatus::Active.as_str() && gp.expires_at <= now)
            .cloned()
            .collect();
        items.sort_by_key(|gp| gp.expires_at);
        Ok(items)
    }

    async fn apply_enforcement_action(
        &self,
        tenant_id: &str,
        kind: ResourceKind,
        resource_id: &str,
        action: EnforcementAction,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let Ok(id) = Uuid::parse_str(resource_id) else {
            return Ok(false);
        };
        let mut state = self.state.lock().await;

        match (kind, action) {
            (ResourceKind::Environment, action @ (EnforcementAction::ReadOnly
            | EnforcementAction::Disable
            | EnforcementAction::ScheduleDeletion)) => {
                let Some(env) = state
                    .environments
                    .iter_mut()
                    .find(|e| e.tenant_id == tenant_id && e.id == id)
                else {
                    return Ok(false);
                };
                match action {
                    EnforcementAction::ReadOnly => env.is_read_only = true,
                    EnforcementAction::Disable => env.is_active = false,
                    _ => {
                        env.is_read_only = true;
                        env.deletion_scheduled_at = Some(at);
                    }
                }
                env.updated_at = at;
                Ok(true)
            }
            (ResourceKind::TeamMember, EnforcementAction::Disable) => {
                let Some(user) = state
                    .tenant_users
                    .iter_mut()
                    .find(|u| u.tenant_id == tenant_id && u.id == id)
                else {
                    return Ok(false);
                };
                user.is_disabled = true;
                Ok(true)
            }
            (ResourceKind::TeamMember, EnforcementAction::ScheduleDeletion) => {
                let before = state.tenant_users.len();
                state
                    .tenant_users
                    .retain(|u| !(u.tenant_id == tenant_id && u.id == id));
                Ok(state.tenant_users.len() < before)
            }
            (
                ResourceKind::Workflow,
                EnforcementAction::Archive
                | EnforcementAction::Disable
                | EnforcementAction::ScheduleDeletion,
            ) => {
                let Some((wf, _)) = state
                    .workflows
                    .iter_mut()
                    .find(|(wf, _)| wf.tenant_id == tenant_id && wf.id == id)
                else {
                    return Ok(false);
                };
                wf.is_archived = true;
                wf.synced_at = at;
                Ok(true)
            }
            (kind, action) => Err(Error::Validation(format!(
                "action {} cannot be applied to {}",
                action.as_str(),
                kind.as_str()
            ))),
        }
    }

    async fn retention_override_days(&self, tenant_id: &str) -> Result<Option<i64>> {
        Ok(self
            .state
            .lock()
            .await
            .retention_overrides
            .get(tenant_id)
            .copied())
    }

    async fn set_retention_override(&self, tenant_id: &str, days: Option<i64>) -> Result<()> {
        let mut state = self.state.lock().await;
        match days {
            Some(days) => {
                state.retention_overrides.insert(tenant_id.to_string(), days);
            }
            None => {
                state.retention_overrides.remove(tenant_id);
            }
        }
        Ok(())
    }

    async fn count_rows(&self, table: RetentionTable, tenant_id: &str) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(row_timestamp(&state, table, tenant_id).len() as i64)
    }

    async fn count_rows_older_than(
        &self,
        table: RetentionTable,
        tenant_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(row_timestamp(&state, table, tenant_id)
            .into_iter()
            .filter(|ts| *ts < cutoff)
            .count() as i64)
    }

    async fn delete_oldest_rows_before(
        &self,
        table: RetentionTable,
        tenant_id: &str,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut budget = usize::try_from(limit).unwrap_or(0);
        let mut deleted = 0u64;
        // Rows are visited oldest first.
        let mut should_delete = |ts: DateTime<Utc>| {
            if budget > 0 && ts < cutoff {
                budget -= 1;
                deleted += 1;
                true
            } else {
                false
            }
        };

        match table {
            RetentionTable::Executions => {
                let mut rows = std::mem::take(&mut state.executions);
                rows.sort_by_key(|e| e.started_at);
                rows.retain(|e| !(e.tenant_id == tenant_id && should_delete(e.started_at)));
                state.executions = rows;
            }
            RetentionTable::AuditLogs => {
                let mut rows = std::mem::take(&mut state.audit_logs);
                rows.sort_by_key(|e| e.created_at);
                rows.retain(|e| !(e.tenant_id == tenant_id && should_delete(e.created_at)));
                state.audit_logs = rows;
            }
        }
        Ok(deleted)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
