// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL persistence for flowgate-core.
//!
//! Free functions take a pool so they can be used directly by tools and
//! tests; [`PostgresPersistence`] delegates to them.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
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

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const ENVIRONMENT_COLUMNS: &str = r#"
    id, tenant_id, name, environment_class, base_url, api_key,
    git_repo_url, git_branch, git_token, git_folder,
    is_active, is_read_only, is_healthy, last_connected_at, last_sync_at,
    deletion_scheduled_at, created_at, updated_at
"#;

const PROMOTION_COLUMNS: &str = r#"
    id, tenant_id, source_environment_id, target_environment_id, workflow_selections,
    source_snapshot_id, target_pre_snapshot_id, status, result, created_by,
    created_at, started_at, completed_at
"#;

// ============================================================================
// Environment Operations
// ============================================================================

/// Insert an environment.
pub async fn insert_environment(pool: &PgPool, env: &Environment) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO environments (
            id, tenant_id, name, environment_class, base_url, api_key,
            git_repo_url, git_branch, git_token, git_folder,
            is_active, is_read_only, is_healthy, last_connected_at, last_sync_at,
            deletion_scheduled_at, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        "#,
    )
    .bind(env.id)
    .bind(&env.tenant_id)
    .bind(&env.name)
    .bind(&env.environment_class)
    .bind(&env.base_url)
    .bind(&env.api_key)
    .bind(&env.git_repo_url)
    .bind(&env.git_branch)
    .bind(&env.git_token)
    .bind(&env.git_folder)
    .bind(env.is_active)
    .bind(env.is_read_only)
    .bind(env.is_healthy)
    .bind(env.last_connected_at)
    .bind(env.last_sync_at)
    .bind(env.deletion_scheduled_at)
    .bind(env.created_at)
    .bind(env.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get an environment by id.
pub async fn get_environment(pool: &PgPool, tenant_id: &str, id: Uuid) -> Result<Option<Environment>> {
    let record = sqlx::query_as::<_, Environment>(&format!(
        "SELECT {ENVIRONMENT_COLUMNS} FROM environments WHERE tenant_id = $1 AND id = $2"
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// List active environments of a tenant.
pub async fn list_environments(
    pool: &PgPool,
    tenant_id: &str,
    page: &PageRequest,
) -> Result<(Vec<Environment>, i64)> {
    let records = sqlx::query_as::<_, Environment>(&format!(
        r#"
        SELECT {ENVIRONMENT_COLUMNS} FROM environments
        WHERE tenant_id = $1 AND is_active
        ORDER BY name ASC, id ASC
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(tenant_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM environments WHERE tenant_id = $1 AND is_active")
            .bind(tenant_id)
            .fetch_one(pool)
            .await?;

    Ok((records, total))
}

/// Active environments of every tenant.
pub async fn list_all_active_environments(pool: &PgPool) -> Result<Vec<Environment>> {
    let records = sqlx::query_as::<_, Environment>(&format!(
        "SELECT {ENVIRONMENT_COLUMNS} FROM environments WHERE is_active ORDER BY tenant_id, name"
    ))
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Persist the mutable fields of an environment.
pub async fn update_environment(pool: &PgPool, env: &Environment) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE environments
        SET name = $3, environment_class = $4, base_url = $5, api_key = $6,
            git_repo_url = $7, git_branch = $8, git_token = $9, git_folder = $10,
            is_read_only = $11, updated_at = $12
        WHERE tenant_id = $1 AND id = $2
        "#,
    )
    .bind(&env.tenant_id)
    .bind(env.id)
    .bind(&env.name)
    .bind(&env.environment_class)
    .bind(&env.base_url)
    .bind(&env.api_key)
    .bind(&env.git_repo_url)
    .bind(&env.git_branch)
    .bind(&env.git_token)
    .bind(&env.git_folder)
    .bind(env.is_read_only)
    .bind(env.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record the result of a connection test.
pub async fn update_environment_health(
    pool: &PgPool,
    tenant_id: &str,
    id: Uuid,
    healthy: bool,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE environments
        SET is_healthy = $3,
            last_connected_at = CASE WHEN $3 THEN $4 ELSE last_connected_at END
        WHERE tenant_id = $1 AND id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(id)
    .bind(healthy)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record a finished sync.
pub async fn mark_environment_synced(
    pool: &PgPool,
    tenant_id: &str,
    id: Uuid,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE environments SET last_sync_at = $3 WHERE tenant_id = $1 AND id = $2")
        .bind(tenant_id)
        .bind(id)
        .bind(at)
        .execute(pool)
        .await?;

    Ok(())
}

/// Soft-delete an environment.
pub async fn deactivate_environment(pool: &PgPool, tenant_id: &str, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE environments SET is_active = FALSE, updated_at = NOW()
        WHERE tenant_id = $1 AND id = $2 AND is_active
        "#,
    )
    .bind(tenant_id)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Workflow Operations
// ============================================================================

/// Insert or refresh a cached workflow. The row id is kept on conflict.
pub async fn upsert_workflow(pool: &PgPool, wf: &WorkflowRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO canonical_workflows (
            id, tenant_id, environment_id, workflow_id, name, active,
            definition, content_hash, is_archived, synced_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (tenant_id, environment_id, workflow_id) DO UPDATE
        SET name = EXCLUDED.name,
            active = EXCLUDED.active,
            definition = EXCLUDED.definition,
            content_hash = EXCLUDED.content_hash,
            synced_at = EXCLUDED.synced_at
        "#,
    )
    .bind(wf.id)
    .bind(&wf.tenant_id)
    .bind(wf.environment_id)
    .bind(&wf.workflow_id)
    .bind(&wf.name)
    .bind(wf.active)
    .bind(&wf.definition)
    .bind(&wf.content_hash)
    .bind(wf.is_archived)
    .bind(wf.synced_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete cached workflows that no longer exist remotely.
pub async fn remove_workflows_not_in(
    pool: &PgPool,
    tenant_id: &str,
    environment_id: Uuid,
    keep: &[String],
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM canonical_workflows
        WHERE tenant_id = $1 AND environment_id = $2 AND NOT (workflow_id = ANY($3))
        "#,
    )
    .bind(tenant_id)
    .bind(environment_id)
    .bind(keep)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// List cached workflows of an environment.
pub async fn list_workflows(
    pool: &PgPool,
    tenant_id: &str,
    environment_id: Uuid,
    page: &PageRequest,
) -> Result<(Vec<WorkflowRecord>, i64)> {
    let records = sqlx::query_as::<_, WorkflowRecord>(
        r#"
        SELECT id, tenant_id, environment_id, workflow_id, name, active,
               definition, content_hash, is_archived, synced_at
        FROM canonical_workflows
        WHERE tenant_id = $1 AND environment_id = $2
        ORDER BY name ASC, workflow_id ASC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(tenant_id)
    .bind(environment_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    let total = count_workflows(pool, tenant_id, environment_id).await?;
    Ok((records, total))
}

/// Count cached workflows of an environment.
pub async fn count_workflows(pool: &PgPool, tenant_id: &str, environment_id: Uuid) -> Result<i64> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM canonical_workflows WHERE tenant_id = $1 AND environment_id = $2",
    )
    .bind(tenant_id)
    .bind(environment_id)
    .fetch_one(pool)
    .await?;

    Ok(total)
}

/// Insert or refresh a source → target workflow mapping.
pub async fn upsert_workflow_mapping(pool: &PgPool, mapping: &WorkflowMapping) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO workflow_mappings (
            id, tenant_id, source_environment_id, source_workflow_id,
            target_environment_id, target_workflow_id, content_hash, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (tenant_id, source_environment_id, source_workflow_id, target_environment_id)
        DO UPDATE SET target_workflow_id = EXCLUDED.target_workflow_id,
                      content_hash = EXCLUDED.content_hash,
                      updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(mapping.id)
    .bind(&mapping.tenant_id)
    .bind(mapping.source_environment_id)
    .bind(&mapping.source_workflow_id)
    .bind(mapping.target_environment_id)
    .bind(&mapping.target_workflow_id)
    .bind(&mapping.content_hash)
    .bind(mapping.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find the mapping of a source workflow into a target environment.
pub async fn find_workflow_mapping(
    pool: &PgPool,
    tenant_id: &str,
    source_environment_id: Uuid,
    source_workflow_id: &str,
    target_environment_id: Uuid,
) -> Result<Option<WorkflowMapping>> {
    let record = sqlx::query_as::<_, WorkflowMapping>(
        r#"
        SELECT id, tenant_id, source_environment_id, source_workflow_id,
               target_environment_id, target_workflow_id, content_hash, updated_at
        FROM workflow_mappings
        WHERE tenant_id = $1 AND source_environment_id = $2
          AND source_workflow_id = $3 AND target_environment_id = $4
        "#,
    )
    .bind(tenant_id)
    .bind(source_environment_id)
    .bind(source_workflow_id)
    .bind(target_environment_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

// ============================================================================
// Execution Operations
// ============================================================================

/// Insert or refresh a cached execution.
pub async fn upsert_execution(pool: &PgPool, execution: &ExecutionRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO executions (
            tenant_id, environment_id, execution_id, workflow_id, status, started_at, finished_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (tenant_id, environment_id, execution_id) DO UPDATE
        SET status = EXCLUDED.status, finished_at = EXCLUDED.finished_at
        "#,
    )
    .bind(&execution.tenant_id)
    .bind(execution.environment_id)
    .bind(&execution.execution_id)
    .bind(&execution.workflow_id)
    .bind(&execution.status)
    .bind(execution.started_at)
    .bind(execution.finished_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Execution counts for an environment since `since`.
pub async fn execution_stats(
    pool: &PgPool,
    tenant_id: &str,
    environment_id: Uuid,
    since: DateTime<Utc>,
) -> Result<ExecutionStats> {
    let (total, success, error, running): (i64, i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COUNT(*) FILTER (WHERE status = 'success'),
               COUNT(*) FILTER (WHERE status IN ('error', 'crashed', 'failed')),
               COUNT(*) FILTER (WHERE status IN ('running', 'waiting', 'new'))
        FROM executions
        WHERE tenant_id = $1 AND environment_id = $2 AND started_at >= $3
        "#,
    )
    .bind(tenant_id)
    .bind(environment_id)
    .bind(since)
    .fetch_one(pool)
    .await?;

    Ok(ExecutionStats {
        total,
        success,
        error,
        running,
    })
}

// ============================================================================
// Snapshot Operations
// ============================================================================

/// Insert a snapshot record.
pub async fn insert_snapshot(pool: &PgPool, snapshot: &Snapshot) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO snapshots (
            id, tenant_id, environment_id, git_commit_sha, snapshot_type,
            workflow_count, promotion_id, created_by, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(snapshot.id)
    .bind(&snapshot.tenant_id)
    .bind(snapshot.environment_id)
    .bind(&snapshot.git_commit_sha)
    .bind(&snapshot.snapshot_type)
    .bind(snapshot.workflow_count)
    .bind(snapshot.promotion_id)
    .bind(&snapshot.created_by)
    .bind(snapshot.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a snapshot by id.
pub async fn get_snapshot(pool: &PgPool, tenant_id: &str, id: Uuid) -> Result<Option<Snapshot>> {
    let record = sqlx::query_as::<_, Snapshot>(
        r#"
        SELECT id, tenant_id, environment_id, git_commit_sha, snapshot_type,
               workflow_count, promotion_id, created_by, created_at
        FROM snapshots
        WHERE tenant_id = $1 AND id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// List an environment's snapshots, newest first.
pub async fn list_snapshots(
    pool: &PgPool,
    tenant_id: &str,
    environment_id: Uuid,
    page: &PageRequest,
) -> Result<(Vec<Snapshot>, i64)> {
    let records = sqlx::query_as::<_, Snapshot>(
        r#"
        SELECT id, tenant_id, environment_id, git_commit_sha, snapshot_type,
               workflow_count, promotion_id, created_by, created_at
        FROM snapshots
        WHERE tenant_id = $1 AND environment_id = $2
        ORDER BY created_at DESC, id DESC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(tenant_id)
    .bind(environment_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM snapshots WHERE tenant_id = $1 AND environment_id = $2",
    )
    .bind(tenant_id)
    .bind(environment_id)
    .fetch_one(pool)
    .await?;

    Ok((records, total))
}

// ============================================================================
// Promotion Operations
// ============================================================================

/// Insert a promotion.
pub async fn insert_promotion(pool: &PgPool, promotion: &Promotion) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO promotions (
            id, tenant_id, source_environment_id, target_environment_id, workflow_selections,
            source_snapshot_id, target_pre_snapshot_id, status, result, created_by,
            created_at, started_at, completed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(promotion.id)
    .bind(&promotion.tenant_id)
    .bind(promotion.source_environment_id)
    .bind(promotion.target_environment_id)
    .bind(&promotion.workflow_selections)
    .bind(promotion.source_snapshot_id)
    .bind(promotion.target_pre_snapshot_id)
    .bind(&promotion.status)
    .bind(&promotion.result)
    .bind(&promotion.created_by)
    .bind(promotion.created_at)
    .bind(promotion.started_at)
    .bind(promotion.completed_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a promotion by id.
pub async fn get_promotion(pool: &PgPool, tenant_id: &str, id: Uuid) -> Result<Option<Promotion>> {
    let record = sqlx::query_as::<_, Promotion>(&format!(
        "SELECT {PROMOTION_COLUMNS} FROM promotions WHERE tenant_id = $1 AND id = $2"
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// List promotions, newest first.
pub async fn list_promotions(
    pool: &PgPool,
    tenant_id: &str,
    page: &PageRequest,
) -> Result<(Vec<Promotion>, i64)> {
    let records = sqlx::query_as::<_, Promotion>(&format!(
        r#"
        SELECT {PROMOTION_COLUMNS} FROM promotions
        WHERE tenant_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(tenant_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM promotions WHERE tenant_id = $1")
        .bind(tenant_id)
        .fetch_one(pool)
        .await?;

    Ok((records, total))
}

/// Persist execution state of a promotion.
pub async fn update_promotion(pool: &PgPool, promotion: &Promotion) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE promotions
        SET source_snapshot_id = $3, target_pre_snapshot_id = $4, status = $5,
            result = $6, started_at = $7, completed_at = $8
        WHERE tenant_id = $1 AND id = $2
        "#,
    )
    .bind(&promotion.tenant_id)
    .bind(promotion.id)
    .bind(promotion.source_snapshot_id)
    .bind(promotion.target_pre_snapshot_id)
    .bind(&promotion.status)
    .bind(&promotion.result)
    .bind(promotion.started_at)
    .bind(promotion.completed_at)
    .execute(pool)
    .await?;

    Ok(())
}

// ============================================================================
// Audit Operations
// ============================================================================

/// Insert an audit log entry.
pub async fn insert_audit_log(pool: &PgPool, entry: &AuditLogEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs (
            id, tenant_id, actor_id, actor_email, effective_subject_id,
            effective_subject_email, impersonation_session_id, action,
            resource_type, resource_id, old_value, new_value, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(entry.id)
    .bind(&entry.tenant_id)
    .bind(&entry.actor_id)
    .bind(&entry.actor_email)
    .bind(&entry.effective_subject_id)
    .bind(&entry.effective_subject_email)
    .bind(&entry.impersonation_session_id)
    .bind(&entry.action)
    .bind(&entry.resource_type)
    .bind(&entry.resource_id)
    .bind(&entry.old_value)
    .bind(&entry.new_value)
    .bind(entry.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// List audit entries, newest first.
pub async fn list_audit_logs(
    pool: &PgPool,
    tenant_id: &str,
    page: &PageRequest,
) -> Result<(Vec<AuditLogEntry>, i64)> {
    let records = sqlx::query_as::<_, AuditLogEntry>(
        r#"
        SELECT id, tenant_id, actor_id, actor_email, effective_subject_id,
               effective_subject_email, impersonation_session_id, action,
               resource_type, resource_id, old_value, new_value, created_at
        FROM audit_logs
        WHERE tenant_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(tenant_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs WHERE tenant_id = $1")
        .bind(tenant_id)
        .fetch_one(pool)
        .await?;

    Ok((records, total))
}

// ============================================================================
// Credential Operations
// ============================================================================

/// Insert a logical credential. Duplicate names are a conflict.
pub async fn insert_logical_credential(pool: &PgPool, credential: &LogicalCredential) -> Result<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO logical_credentials (id, tenant_id, name, required_type, description, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (tenant_id, name) DO NOTHING
        "#,
    )
    .bind(credential.id)
    .bind(&credential.tenant_id)
    .bind(&credential.name)
    .bind(&credential.required_type)
    .bind(&credential.description)
    .bind(credential.created_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::Conflict(format!(
            "logical credential '{}' already exists",
            credential.name
        )));
    }
    Ok(())
}

/// List a tenant's logical credentials by name.
pub async fn list_logical_credentials(pool: &PgPool, tenant_id: &str) -> Result<Vec<LogicalCredential>> {
    let records = sqlx::query_as::<_, LogicalCredential>(
        r#"
        SELECT id, tenant_id, name, required_type, description, created_at
        FROM logical_credentials
        WHERE tenant_id = $1
        ORDER BY name ASC
        "#,
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Delete a logical credential; mappings cascade.
pub async fn delete_logical_credential(pool: &PgPool, tenant_id: &str, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM logical_credentials WHERE tenant_id = $1 AND id = $2")
        .bind(tenant_id)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Insert or replace a credential mapping.
pub async fn upsert_credential_mapping(
    pool: &PgPool,
    mapping: &CredentialMapping,
) -> Result<CredentialMapping> {
    let record = sqlx::query_as::<_, CredentialMapping>(
        r#"
        INSERT INTO credential_mappings (
            id, tenant_id, logical_credential_id, environment_id,
            physical_credential_id, physical_name, physical_type, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (tenant_id, logical_credential_id, environment_id) DO UPDATE
        SET physical_credential_id = EXCLUDED.physical_credential_id,
            physical_name = EXCLUDED.physical_name,
            physical_type = EXCLUDED.physical_type,
            updated_at = EXCLUDED.updated_at
        RETURNING id, tenant_id, logical_credential_id, environment_id,
                  physical_credential_id, physical_name, physical_type, updated_at
        "#,
    )
    .bind(mapping.id)
    .bind(&mapping.tenant_id)
    .bind(mapping.logical_credential_id)
    .bind(mapping.environment_id)
    .bind(&mapping.physical_credential_id)
    .bind(&mapping.physical_name)
    .bind(&mapping.physical_type)
    .bind(mapping.updated_at)
    .fetch_one(pool)
    .await?;

    Ok(record)
}

/// List credential mappings, optionally for one environment.
pub async fn list_credential_mappings(
    pool: &PgPool,
    tenant_id: &str,
    environment_id: Option<Uuid>,
) -> Result<Vec<CredentialMapping>> {
    let records = sqlx::query_as::<_, CredentialMapping>(
        r#"
        SELECT id, tenant_id, logical_credential_id, environment_id,
               physical_credential_id, physical_name, physical_type, updated_at
        FROM credential_mappings
        WHERE tenant_id = $1 AND ($2::uuid IS NULL OR environment_id = $2)
        ORDER BY updated_at DESC
        "#,
    )
    .bind(tenant_id)
    .bind(environment_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Delete a credential mapping.
pub async fn delete_credential_mapping(pool: &PgPool, tenant_id: &str, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM credential_mappings WHERE tenant_id = $1 AND id = $2")
        .bind(tenant_id)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Tenant & Billing Operations
// ============================================================================

/// Insert a team member.
pub async fn insert_tenant_user(pool: &PgPool, user: &TenantUser) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tenant_users (id, tenant_id, email, role, is_disabled, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(user.id)
    .bind(&user.tenant_id)
    .bind(&user.email)
    .bind(&user.role)
    .bind(user.is_disabled)
    .bind(user.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert or replace a tenant's subscription.
pub async fn upsert_subscription(pool: &PgPool, sub: &Subscription) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO subscriptions (
            tenant_id, stripe_customer_id, stripe_subscription_id, plan_tier,
            status, current_period_end, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (tenant_id) DO UPDATE
        SET stripe_customer_id = COALESCE(EXCLUDED.stripe_customer_id, subscriptions.stripe_customer_id),
            stripe_subscription_id = COALESCE(EXCLUDED.stripe_subscription_id, subscriptions.stripe_subscription_id),
            plan_tier = EXCLUDED.plan_tier,
            status = EXCLUDED.status,
            current_period_end = EXCLUDED.current_period_end,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&sub.tenant_id)
    .bind(&sub.stripe_customer_id)
    .bind(&sub.stripe_subscription_id)
    .bind(&sub.plan_tier)
    .bind(&sub.status)
    .bind(sub.current_period_end)
    .bind(sub.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

const SUBSCRIPTION_COLUMNS: &str = "tenant_id, stripe_customer_id, stripe_subscription_id, plan_tier, status, current_period_end, updated_at";

/// Get a tenant's subscription.
pub async fn get_subscription(pool: &PgPool, tenant_id: &str) -> Result<Option<Subscription>> {
    let record = sqlx::query_as::<_, Subscription>(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE tenant_id = $1"
    ))
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Find a subscription by Stripe customer id.
pub async fn find_subscription_by_customer(
    pool: &PgPool,
    stripe_customer_id: &str,
) -> Result<Option<Subscription>> {
    let record = sqlx::query_as::<_, Subscription>(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE stripe_customer_id = $1 LIMIT 1"
    ))
    .bind(stripe_customer_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Tenants owning an environment or a subscription.
pub async fn list_tenants(pool: &PgPool) -> Result<Vec<String>> {
    let tenants: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT tenant_id FROM environments
        UNION
        SELECT tenant_id FROM subscriptions
        ORDER BY 1
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(tenants)
}

// ============================================================================
// Downgrade Operations
// ============================================================================

/// Resources counted against a plan limit, oldest first.
pub async fn list_plan_resources(
    pool: &PgPool,
    tenant_id: &str,
    kind: ResourceKind,
) -> Result<Vec<PlanResource>> {
    let query = match kind {
        ResourceKind::Environment => {
            r#"
            SELECT id::text AS id, created_at FROM environments
            WHERE tenant_id = $1 AND is_active
            ORDER BY created_at ASC, id ASC
            "#
        }
        ResourceKind::TeamMember => {
            r#"
            SELECT id::text AS id, created_at FROM tenant_users
            WHERE tenant_id = $1 AND NOT is_disabled
            ORDER BY created_at ASC, id ASC
            "#
        }
        ResourceKind::Workflow => {
            r#"
            SELECT w.id::text AS id, w.created_at FROM canonical_workflows w
            JOIN environments e ON e.id = w.environment_id
            WHERE w.tenant_id = $1 AND NOT w.is_archived AND e.is_active
            ORDER BY w.created_at ASC, w.id ASC
            "#
        }
    };

    let records = sqlx::query_as::<_, PlanResource>(query)
        .bind(tenant_id)
        .fetch_all(pool)
        .await?;

    Ok(records)
}

const GRACE_PERIOD_COLUMNS: &str =
    "id, tenant_id, resource_type, resource_id, action, status, starts_at, expires_at, resolved_at";

/// Insert a grace period.
pub async fn insert_grace_period(pool: &PgPool, gp: &GracePeriod) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO downgrade_grace_periods (
            id, tenant_id, resource_type, resource_id, action, status,
            starts_at, expires_at, resolved_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(gp.id)
    .bind(&gp.tenant_id)
    .bind(&gp.resource_type)
    .bind(&gp.resource_id)
    .bind(&gp.action)
    .bind(&gp.status)
    .bind(gp.starts_at)
    .bind(gp.expires_at)
    .bind(gp.resolved_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// List a tenant's grace periods, optionally by status.
pub async fn list_grace_periods(
    pool: &PgPool,
    tenant_id: &str,
    status: Option<GracePeriodStatus>,
) -> Result<Vec<GracePeriod>> {
    let records = sqlx::query_as::<_, GracePeriod>(&format!(
        r#"
        SELECT {GRACE_PERIOD_COLUMNS} FROM downgrade_grace_periods
        WHERE tenant_id = $1 AND ($2::text IS NULL OR status = $2)
        ORDER BY starts_at DESC, id ASC
        "#
    ))
    .bind(tenant_id)
    .bind(status.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Find the active grace period of one resource.
pub async fn find_active_grace_period(
    pool: &PgPool,
    tenant_id: &str,
    kind: ResourceKind,
    resource_id: &str,
) -> Result<Option<GracePeriod>> {
    let record = sqlx::query_as::<_, GracePeriod>(&format!(
        r#"
        SELECT {GRACE_PERIOD_COLUMNS} FROM downgrade_grace_periods
        WHERE tenant_id = $1 AND resource_type = $2 AND resource_id = $3 AND status = 'active'
        "#
    ))
    .bind(tenant_id)
    .bind(kind.as_str())
    .bind(resource_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Move a grace period to a new status.
pub async fn update_grace_period_status(
    pool: &PgPool,
    id: Uuid,
    status: GracePeriodStatus,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE downgrade_grace_periods SET status = $2, resolved_at = $3 WHERE id = $1")
        .bind(id)
        .bind(status.as_str())
        .bind(at)
        .execute(pool)
        .await?;

    Ok(())
}

/// Active grace periods due for enforcement.
pub async fn list_expired_grace_periods(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<GracePeriod>> {
    let records = sqlx::query_as::<_, GracePeriod>(&format!(
        r#"
        SELECT {GRACE_PERIOD_COLUMNS} FROM downgrade_grace_periods
        WHERE status = 'active' AND expires_at <= $1
        ORDER BY expires_at ASC
        "#
    ))
    .bind(now)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Apply an enforcement action to a resource.
pub async fn apply_enforcement_action(
    pool: &PgPool,
    tenant_id: &str,
    kind: ResourceKind,
    resource_id: &str,
    action: EnforcementAction,
    at: DateTime<Utc>,
) -> Result<bool> {
    let Ok(id) = Uuid::parse_str(resource_id) else {
        return Ok(false);
    };

    let (query, binds_timestamp) = match (kind, action) {
        (ResourceKind::Environment, EnforcementAction::ReadOnly) => (
            "UPDATE environments SET is_read_only = TRUE, updated_at = $3 WHERE tenant_id = $1 AND id = $2",
            true,
        ),
        (ResourceKind::Environment, EnforcementAction::Disable) => (
            "UPDATE environments SET is_active = FALSE, updated_at = $3 WHERE tenant_id = $1 AND id = $2",
            true,
        ),
        (ResourceKind::Environment, EnforcementAction::ScheduleDeletion) => (
            r#"
            UPDATE environments SET is_read_only = TRUE, deletion_scheduled_at = $3, updated_at = $3
            WHERE tenant_id = $1 AND id = $2
            "#,
            true,
        ),
        (ResourceKind::TeamMember, EnforcementAction::Disable) => (
            "UPDATE tenant_users SET is_disabled = TRUE WHERE tenant_id = $1 AND id = $2",
            false,
        ),
        (ResourceKind::TeamMember, EnforcementAction::ScheduleDeletion) => (
            "DELETE FROM tenant_users WHERE tenant_id = $1 AND id = $2",
            false,
        ),
        (ResourceKind::Workflow, EnforcementAction::Archive)
        | (ResourceKind::Workflow, EnforcementAction::Disable)
        | (ResourceKind::Workflow, EnforcementAction::ScheduleDeletion) => (
            "UPDATE canonical_workflows SET is_archived = TRUE, synced_at = $3 WHERE tenant_id = $1 AND id = $2",
            true,
        ),
        (kind, action) => {
            return Err(Error::Validation(format!(
                "action {} cannot be applied to {}",
                action.as_str(),
                kind.as_str()
            )));
        }
    };

    let mut statement = sqlx::query(query).bind(tenant_id).bind(id);
    if binds_timestamp {
        statement = statement.bind(at);
    }
    let result = statement.execute(pool).await?;

    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Retention Operations
// ============================================================================

/// Tenant-specific retention override.
pub async fn retention_override_days(pool: &PgPool, tenant_id: &str) -> Result<Option<i64>> {
    let days: Option<i64> = sqlx::query_scalar(
        "SELECT retention_days::BIGINT FROM retention_policies WHERE tenant_id = $1",
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?;

    Ok(days)
}

/// Set or clear a tenant-specific retention override.
pub async fn set_retention_override(pool: &PgPool, tenant_id: &str, days: Option<i64>) -> Result<()> {
    match days {
        Some(days) => {
            let days = i32::try_from(days)
                .map_err(|_| Error::Validation(format!("retention days out of range: {days}")))?;
            sqlx::query(
                r#"
                INSERT INTO retention_policies (tenant_id, retention_days, updated_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (tenant_id) DO UPDATE
                SET retention_days = EXCLUDED.retention_days, updated_at = NOW()
                "#,
            )
            .bind(tenant_id)
            .bind(days)
            .execute(pool)
            .await?;
        }
        None => {
            sqlx::query("DELETE FROM retention_policies WHERE tenant_id = $1")
                .bind(tenant_id)
                .execute(pool)
                .await?;
        }
    }

    Ok(())
}

/// Count a tenant's rows in a retention table.
pub async fn count_rows(pool: &PgPool, table: RetentionTable, tenant_id: &str) -> Result<i64> {
    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {} WHERE tenant_id = $1",
        table.table_name()
    ))
    .bind(tenant_id)
    .fetch_one(pool)
    .await?;

    Ok(total)
}

/// Count a tenant's rows older than `cutoff`.
pub async fn count_rows_older_than(
    pool: &PgPool,
    table: RetentionTable,
    tenant_id: &str,
    cutoff: DateTime<Utc>,
) -> Result<i64> {
    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {} WHERE tenant_id = $1 AND {} < $2",
        table.table_name(),
        table.timestamp_column()
    ))
    .bind(tenant_id)
    .bind(cutoff)
    .fetch_one(pool)
    .await?;

    Ok(total)
}

/// Delete up to `limit` of a tenant's oldest rows older than `cutoff`.
pub async fn delete_oldest_rows_before(
    pool: &PgPool,
    table: RetentionTable,
    tenant_id: &str,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<u64> {
    let name = table.table_name();
    let column = table.timestamp_column();
    let result = sqlx::query(&format!(
        r#"
        DELETE FROM {name}
        WHERE ctid IN (
            SELECT ctid FROM {name}
            WHERE tenant_id = $1 AND {column} < $2
            ORDER BY {column} ASC
            LIMIT $3
        )
        "#
    ))
    .bind(tenant_id)
    .bind(cutoff)
    .bind(limit)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Check database health.
pub async fn health_check_db(pool: &PgPool) -> Result<bool> {
    let result: std::result::Result<(i32,), _> = sqlx::query_as("SELECT 1").fetch_one(pool).await;
    Ok(result.is_ok())
}

#[async_trait::async_trait]
impl Persistence for PostgresPersistence {
    async fn insert_environment(&self, environment: &Environment) -> Result<()> {
        insert_environment(&self.pool, environment).await
    }

    async fn get_environment(&self, tenant_id: &str, id: Uuid) -> Result<Option<Environment>> {
        get_environment(&self.pool, tenant_id, id).await
    }

    async fn list_environments(
        &self,
        tenant_id: &str,
        page: &PageRequest,
    ) -> Result<(Vec<Environment>, i64)> {
        list_environments(&self.pool, tenant_id, page).await
    }

    async fn list_all_active_environments(&self) -> Result<Vec<Environment>> {
        list_all_active_environments(&self.pool).await
    }

    async fn update_environment(&self, environment: &Environment) -> Result<()> {
        update_environment(&self.pool, environment).await
    }

    async fn update_environment_health(
        &self,
        tenant_id: &str,
        id: Uuid,
        healthy: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        update_environment_health(&self.pool, tenant_id, id, healthy, at).await
    }

    async fn mark_environment_synced(
        &self,
        tenant_id: &str,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        mark_environment_synced(&self.pool, tenant_id, id, at).await
    }

    async fn deactivate_environment(&self, tenant_id: &str, id: Uuid) -> Result<bool> {
        deactivate_environment(&self.pool, tenant_id, id).await
    }

    async fn upsert_workflow(&self, workflow: &WorkflowRecord) -> Result<()> {
        upsert_workflow(&self.pool, workflow).await
    }

    async fn remove_workflows_not_in(
        &self,
        tenant_id: &str,
        environment_id: Uuid,
        keep: &[String],
    ) -> Result<u64> {
        remove_workflows_not_in(&self.pool, tenant_id, environment_id, keep).await
    }

    async fn list_workflows(
        &self,
        tenant_id: &str,
        environment_id: Uuid,
        page: &PageRequest,
    ) -> Result<(Vec<WorkflowRecord>, i64)> {
        list_workflows(&self.pool, tenant_id, environment_id, page).await
    }

    async fn count_workflows(&self, tenant_id: &str, environment_id: Uuid) -> Result<i64> {
        count_workflows(&self.pool, tenant_id, environment_id).await
    }

    async fn upsert_workflow_mapping(&self, mapping: &WorkflowMapping) -> Result<()> {
        upsert_workflow_mapping(&self.pool, mapping).await
    }

    async fn find_workflow_mapping(
        &self,
        tenant_id: &str,
        source_environment_id: Uuid,
        source_workflow_id: &str,
        target_environment_id: Uuid,
    ) -> Result<Option<WorkflowMapping>> {
        find_workflow_mapping(
            &self.pool,
            tenant_id,
            source_environment_id,
            source_workflow_id,
            target_environment_id,
        )
        .await
    }

    async fn upsert_execution(&self, execution: &ExecutionRecord) -> Result<()> {
        upsert_execution(&self.pool, execution).await
    }

    async fn execution_stats(
        &self,
        tenant_id: &str,
        environment_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<ExecutionStats> {
        execution_stats(&self.pool, tenant_id, environment_id, since).await
    }

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        insert_snapshot(&self.pool, snapshot).await
    }

    async fn get_snapshot(&self, tenant_id: &str, id: Uuid) -> Result<Option<Snapshot>> {
        get_snapshot(&self.pool, tenant_id, id).await
    }

    async fn list_snapshots(
        &self,
        tenant_id: &str,
        environment_id: Uuid,
        page: &PageRequest,
    ) -> Result<(Vec<Snapshot>, i64)> {
        list_snapshots(&self.pool, tenant_id, environment_id, page).await
    }

    async fn insert_promotion(&self, promotion: &Promotion) -> Result<()> {
        insert_promotion(&self.pool, promotion).await
    }

    async fn get_promotion(&self, tenant_id: &str, id: Uuid) -> Result<Option<Promotion>> {
        get_promotion(&self.pool, tenant_id, id).await
    }

    async fn list_promotions(
        &self,
        tenant_id: &str,
        page: &PageRequest,
    ) -> Result<(Vec<Promotion>, i64)> {
        list_promotions(&self.pool, tenant_id, page).await
    }

    async fn update_promotion(&self, promotion: &Promotion) -> Result<()> {
        update_promotion(&self.pool, promotion).await
    }

    async fn insert_audit_log(&self, entry: &AuditLogEntry) -> Result<()> {
        insert_audit_log(&self.pool, entry).await
    }

    async fn list_audit_logs(
        &self,
        tenant_id: &str,
        page: &PageRequest,
    ) -> Result<(Vec<AuditLogEntry>, i64)> {
        list_audit_logs(&self.pool, tenant_id, page).await
    }

    async fn insert_logical_credential(&self, credential: &LogicalCredential) -> Result<()> {
        insert_logical_credential(&self.pool, credential).await
    }

    async fn list_logical_credentials(&self, tenant_id: &str) -> Result<Vec<LogicalCredential>> {
        list_logical_credentials(&self.pool, tenant_id).await
    }

    async fn delete_logical_credential(&self, tenant_id: &str, id: Uuid) -> Result<bool> {
        delete_logical_credential(&self.pool, tenant_id, id).await
    }

    async fn upsert_credential_mapping(
        &self,
        mapping: &CredentialMapping,
    ) -> Result<CredentialMapping> {
        upsert_credential_mapping(&self.pool, mapping).await
    }

    async fn list_credential_mappings(
        &self,
        tenant_id: &str,
        environment_id: Option<Uuid>,
    ) -> Result<Vec<CredentialMapping>> {
        list_credential_mappings(&self.pool, tenant_id, environment_id).await
    }

    async fn delete_credential_mapping(&self, tenant_id: &str, id: Uuid) -> Result<bool> {
        delete_credential_mapping(&self.pool, tenant_id, id).await
    }

    async fn insert_tenant_user(&self, user: &TenantUser) -> Result<()> {
        insert_tenant_user(&self.pool, user).await
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()> {
        upsert_subscription(&self.pool, subscription).await
    }

    async fn get_subscription(&self, tenant_id: &str) -> Result<Option<Subscription>> {
        get_subscription(&self.pool, tenant_id).await
    }

    async fn find_subscription_by_customer(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<Subscription>> {
        find_subscription_by_customer(&self.pool, stripe_customer_id).await
    }

    async fn list_tenants(&self) -> Result<Vec<String>> {
        list_tenants(&self.pool).await
    }

    async fn list_plan_resources(
        &self,
        tenant_id: &str,
        kind: ResourceKind,
    ) -> Result<Vec<PlanResource>> {
        list_plan_resources(&self.pool, tenant_id, kind).await
    }

    async fn insert_grace_period(&self, grace_period: &GracePeriod) -> Result<()> {
        insert_grace_period(&self.pool, grace_period).await
    }

    async fn list_grace_periods(
        &self,
        tenant_id: &str,
        status: Option<GracePeriodStatus>,
    ) -> Result<Vec<GracePeriod>> {
        list_grace_periods(&self.pool, tenant_id, status).await
    }

    async fn find_active_grace_period(
        &self,
        tenant_id: &str,
        kind: ResourceKind,
        resource_id: &str,
    ) -> Result<Option<GracePeriod>> {
        find_active_grace_period(&self.pool, tenant_id, kind, resource_id).await
    }

    async fn update_grace_period_status(
        &self,
        id: Uuid,
        status: GracePeriodStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        update_grace_period_status(&self.pool, id, status, at).await
    }

    async fn list_expired_grace_periods(&self, now: DateTime<Utc>) -> Result<Vec<GracePeriod>> {
        list_expired_grace_periods(&self.pool, now).await
    }

    async fn apply_enforcement_action(
        &self,
        tenant_id: &str,
        kind: ResourceKind,
        resource_id: &str,
        action: EnforcementAction,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        apply_enforcement_action(&self.pool, tenant_id, kind, resource_id, action, at).await
    }

    async fn retention_override_days(&self, tenant_id: &str) -> Result<Option<i64>> {
        retention_override_days(&self.pool, tenant_id).await
    }

    async fn set_retention_override(&self, tenant_id: &str, days: Option<i64>) -> Result<()> {
        set_retention_override(&self.pool, tenant_id, days).await
    }

    async fn count_rows(&self, table: RetentionTable, tenant_id: &str) -> Result<i64> {
        count_rows(&self.pool, table, tenant_id).await
    }

    async fn count_rows_older_than(
        &self,
        table: RetentionTable,
        tenant_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<i64> {
        count_rows_older_than(&self.pool, table, tenant_id, cutoff).await
    }

    async fn delete_oldest_rows_before(
        &self,
        table: RetentionTable,
        tenant_id: &str,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64> {
        delete_oldest_rows_before(&self.pool, table, tenant_id, cutoff, limit).await
    }

    async fn health_check(&self) -> Result<bool> {
        health_check_db(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnvironmentClass, PromotionStatus, SnapshotType};
    use chrono::Duration;
    use serde_json::json;
    use sqlx::types::Json;

    static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

    // Helper to get a test database pool
    async fn test_pool() -> Option<PgPool> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.ok()?;
        MIGRATOR.run(&pool).await.ok()?;
        Some(pool)
    }

    fn test_environment(tenant_id: &str, name: &str) -> Environment {
        let now = Utc::now();
        Environment {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            environment_class: EnvironmentClass::Dev.as_str().to_string(),
            base_url: "http://n8n.local".to_string(),
            api_key: "key".to_string(),
            git_repo_url: None,
            git_branch: None,
            git_token: None,
            git_folder: None,
            is_active: true,
            is_read_only: false,
            is_healthy: None,
            last_connected_at: None,
            last_sync_at: None,
            deletion_scheduled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn cleanup_tenant(pool: &PgPool, tenant_id: &str) {
        for table in [
            "promotions",
            "snapshots",
            "canonical_workflows",
            "audit_logs",
            "executions",
            "downgrade_grace_periods",
            "environments",
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE tenant_id = $1"))
                .bind(tenant_id)
                .execute(pool)
                .await
                .ok();
        }
    }

    #[tokio::test]
    async fn test_environment_tenant_isolation() {
        let Some(pool) = test_pool().await else {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        };
        let tenant = format!("tenant-{}", Uuid::new_v4());
        let env = test_environment(&tenant, "dev");
        insert_environment(&pool, &env).await.unwrap();

        assert!(get_environment(&pool, &tenant, env.id).await.unwrap().is_some());
        assert!(get_environment(&pool, "someone-else", env.id).await.unwrap().is_none());

        assert!(deactivate_environment(&pool, &tenant, env.id).await.unwrap());
        let (items, total) = list_environments(&pool, &tenant, &PageRequest::default())
            .await
            .unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 0);

        cleanup_tenant(&pool, &tenant).await;
    }

    #[tokio::test]
    async fn test_promotion_roundtrip() {
        let Some(pool) = test_pool().await else {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        };
        let tenant = format!("tenant-{}", Uuid::new_v4());
        let source = test_environment(&tenant, "dev");
        let target = test_environment(&tenant, "prod");
        insert_environment(&pool, &source).await.unwrap();
        insert_environment(&pool, &target).await.unwrap();

        let mut promotion = Promotion {
            id: Uuid::new_v4(),
            tenant_id: tenant.clone(),
            source_environment_id: source.id,
            target_environment_id: target.id,
            workflow_selections: Json(vec![]),
            source_snapshot_id: None,
            target_pre_snapshot_id: None,
            status: PromotionStatus::Pending.as_str().to_string(),
            result: None,
            created_by: "user-1".to_string(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        insert_promotion(&pool, &promotion).await.unwrap();

        promotion.status = PromotionStatus::Completed.as_str().to_string();
        promotion.result = Some(json!({"promoted": 0}));
        update_promotion(&pool, &promotion).await.unwrap();

        let stored = get_promotion(&pool, &tenant, promotion.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), PromotionStatus::Completed);
        assert_eq!(stored.result, Some(json!({"promoted": 0})));

        cleanup_tenant(&pool, &tenant).await;
    }

    #[tokio::test]
    async fn test_delete_oldest_rows_respects_limit() {
        let Some(pool) = test_pool().await else {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        };
        let tenant = format!("tenant-{}", Uuid::new_v4());
        let env = test_environment(&tenant, "dev");
        insert_environment(&pool, &env).await.unwrap();

        let now = Utc::now();
        for i in 0..5 {
            upsert_execution(
                &pool,
                &ExecutionRecord {
                    tenant_id: tenant.clone(),
                    environment_id: env.id,
                    execution_id: format!("exec-{i}"),
                    workflow_id: None,
                    status: "success".to_string(),
                    started_at: now - Duration::days(30 + i),
                    finished_at: None,
                },
            )
            .await
            .unwrap();
        }

        let cutoff = now - Duration::days(7);
        let deleted = delete_oldest_rows_before(&pool, RetentionTable::Executions, &tenant, cutoff, 2)
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(
            count_rows(&pool, RetentionTable::Executions, &tenant).await.unwrap(),
            3
        );

        cleanup_tenant(&pool, &tenant).await;
    }

    #[tokio::test]
    async fn test_snapshot_listing_newest_first() {
        let Some(pool) = test_pool().await else {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        };
        let tenant = format!("tenant-{}", Uuid::new_v4());
        let env = test_environment(&tenant, "dev");
        insert_environment(&pool, &env).await.unwrap();

        let now = Utc::now();
        for (i, sha) in ["aaa", "bbb"].iter().enumerate() {
            insert_snapshot(
                &pool,
                &Snapshot {
                    id: Uuid::new_v4(),
                    tenant_id: tenant.clone(),
                    environment_id: env.id,
                    git_commit_sha: Some(sha.to_string()),
                    snapshot_type: SnapshotType::ManualBackup.as_str().to_string(),
                    workflow_count: 1,
                    promotion_id: None,
                    created_by: None,
                    created_at: now + Duration::seconds(i as i64),
                },
            )
            .await
            .unwrap();
        }

        let (items, total) = list_snapshots(&pool, &tenant, env.id, &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(items[0].commit_sha(), Some("bbb"));

        cleanup_tenant(&pool, &tenant).await;
    }
}
