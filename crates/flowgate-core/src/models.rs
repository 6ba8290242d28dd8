// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persisted records and their status enums.
//!
//! Records mirror table rows one-to-one. Status columns are stored as text and
//! exposed through typed enums with `as_str`/`parse` helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use uuid::Uuid;

// ============================================================================
// Environments
// ============================================================================

/// Class of a deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentClass {
    /// Development.
    Dev,
    /// Staging / pre-production.
    Staging,
    /// Production.
    Production,
}

impl EnvironmentClass {
    /// Text stored in the `environment_class` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    /// Parse a stored class; accepts the common short forms.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Some(Self::Dev),
            "staging" | "stage" => Some(Self::Staging),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }
}

/// Environment record from the `environments` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Environment {
    /// Primary key.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: String,
    /// Display name.
    pub name: String,
    /// dev / staging / production.
    pub environment_class: String,
    /// Base URL of the n8n instance.
    pub base_url: String,
    /// n8n API key.
    #[serde(skip_serializing)]
    pub api_key: String,
    /// GitHub repository holding snapshots.
    pub git_repo_url: Option<String>,
    /// Branch snapshots are committed to.
    pub git_branch: Option<String>,
    /// Token used for the GitHub API.
    #[serde(skip_serializing)]
    pub git_token: Option<String>,
    /// Folder under `workflows/`; defaults to the environment class.
    pub git_folder: Option<String>,
    /// Soft-delete flag.
    pub is_active: bool,
    /// Set by downgrade enforcement.
    pub is_read_only: bool,
    /// Result of the last connection test.
    pub is_healthy: Option<bool>,
    /// When the last connection test succeeded.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// When the last sync finished.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Set when downgrade enforcement scheduled this environment for deletion.
    pub deletion_scheduled_at: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Environment {
    /// Parsed environment class.
    pub fn class(&self) -> Option<EnvironmentClass> {
        EnvironmentClass::parse(&self.environment_class)
    }

    /// Folder used under `workflows/` in the snapshot repository.
    pub fn git_folder(&self) -> String {
        match self.git_folder.as_deref().map(str::trim) {
            Some(folder) if !folder.is_empty() => folder.to_string(),
            _ => self.environment_class.clone(),
        }
    }

    /// Whether a snapshot repository is configured.
    pub fn has_git(&self) -> bool {
        self.git_repo_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }
}

// ============================================================================
// Workflows
// ============================================================================

/// Cached copy of a provider workflow (`canonical_workflows`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkflowRecord {
    /// Surrogate key, stable across syncs.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: String,
    /// Environment the workflow lives in.
    pub environment_id: Uuid,
    /// Provider-assigned workflow id.
    pub workflow_id: String,
    /// Workflow name.
    pub name: String,
    /// Whether the workflow is active in the provider.
    pub active: bool,
    /// Full workflow document.
    pub definition: Value,
    /// Content hash of `definition`.
    pub content_hash: String,
    /// Set by downgrade enforcement.
    pub is_archived: bool,
    /// When the row was last refreshed.
    pub synced_at: DateTime<Utc>,
}

/// Links a source workflow to the workflow it was promoted into.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkflowMapping {
    /// Primary key.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: String,
    /// Source environment.
    pub source_environment_id: Uuid,
    /// Workflow id in the source environment.
    pub source_workflow_id: String,
    /// Target environment.
    pub target_environment_id: Uuid,
    /// Workflow id in the target environment.
    pub target_workflow_id: String,
    /// Content hash at the time of the last promotion.
    pub content_hash: String,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Cached provider execution (`executions`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExecutionRecord {
    /// Owning tenant.
    pub tenant_id: String,
    /// Environment the execution ran in.
    pub environment_id: Uuid,
    /// Provider execution id.
    pub execution_id: String,
    /// Workflow that ran.
    pub workflow_id: Option<String>,
    /// success / error / running / waiting / canceled.
    pub status: String,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Finish time, if finished.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Aggregated execution counts for one environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    /// All executions in the window.
    pub total: i64,
    /// Executions that finished successfully.
    pub success: i64,
    /// Executions that failed.
    pub error: i64,
    /// Executions still running or waiting.
    pub running: i64,
}

// ============================================================================
// Snapshots
// ============================================================================

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotType {
    /// Taken on demand.
    ManualBackup,
    /// Taken right before a promotion writes to an environment.
    PrePromotion,
    /// Taken after a promotion completed.
    PostPromotion,
}

impl SnapshotType {
    /// Text stored in the `snapshot_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualBackup => "manual_backup",
            Self::PrePromotion => "pre_promotion",
            Self::PostPromotion => "post_promotion",
        }
    }

    /// Parse a stored snapshot type.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual_backup" => Some(Self::ManualBackup),
            "pre_promotion" => Some(Self::PrePromotion),
            "post_promotion" => Some(Self::PostPromotion),
            _ => None,
        }
    }
}

/// Immutable record of a Git commit capturing an environment.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Snapshot {
    /// Primary key.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: String,
    /// Environment that was captured.
    pub environment_id: Uuid,
    /// Commit holding the captured workflow files.
    pub git_commit_sha: Option<String>,
    /// manual_backup / pre_promotion / post_promotion.
    pub snapshot_type: String,
    /// Number of workflows written.
    pub workflow_count: i32,
    /// Promotion that triggered the snapshot.
    pub promotion_id: Option<Uuid>,
    /// User that triggered the snapshot.
    pub created_by: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Commit SHA, treating an empty string as missing.
    pub fn commit_sha(&self) -> Option<&str> {
        self.git_commit_sha
            .as_deref()
            .map(str::trim)
            .filter(|sha| !sha.is_empty())
    }
}

// ============================================================================
// Promotions
// ============================================================================

/// How a selected workflow differs between source and target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Workflow does not exist in the target yet.
    #[serde(alias = "NEW")]
    New,
    /// Workflow exists in the target and differs.
    #[serde(alias = "CHANGED", alias = "update", alias = "UPDATE")]
    Changed,
}

/// One workflow selected for promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSelection {
    /// Workflow id in the source environment.
    pub workflow_id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// New or changed.
    pub change_type: ChangeType,
    /// Workflow id in the target, when it differs from the source id.
    #[serde(default)]
    pub target_workflow_id: Option<String>,
}

/// Promotion lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionStatus {
    /// Created, not executed yet.
    Pending,
    /// Execution in progress.
    Running,
    /// Every selected workflow was promoted or skipped.
    Completed,
    /// A write failed and partial progress was rolled back.
    FailedWithRollback,
    /// Aborted before any workflow was written.
    Failed,
}

impl PromotionStatus {
    /// Text stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::FailedWithRollback => "failed_with_rollback",
            Self::Failed => "failed",
        }
    }

    /// Parse a stored status. Unknown values map to `Pending`.
    pub fn parse(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed_with_rollback" => Self::FailedWithRollback,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Promotion unit of work (`promotions`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Promotion {
    /// Primary key.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: String,
    /// Environment workflows are copied from.
    pub source_environment_id: Uuid,
    /// Environment workflows are copied to.
    pub target_environment_id: Uuid,
    /// Ordered workflow selection.
    pub workflow_selections: Json<Vec<WorkflowSelection>>,
    /// Snapshot of the source taken for this promotion.
    pub source_snapshot_id: Option<Uuid>,
    /// Snapshot of the target taken before any write.
    pub target_pre_snapshot_id: Option<Uuid>,
    /// Lifecycle status.
    pub status: String,
    /// Execution result, once executed.
    pub result: Option<Value>,
    /// User that created the promotion.
    pub created_by: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When execution finished.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Promotion {
    /// Parsed lifecycle status.
    pub fn status(&self) -> PromotionStatus {
        PromotionStatus::parse(&self.status)
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Tenant-level named credential requirement.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LogicalCredential {
    /// Primary key.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: String,
    /// Logical name, e.g. `slackToken`.
    pub name: String,
    /// Provider credential type, e.g. `slackApi`.
    pub required_type: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Maps a logical credential to a concrete credential in one environment.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CredentialMapping {
    /// Primary key.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: String,
    /// Logical credential being mapped.
    pub logical_credential_id: Uuid,
    /// Environment the physical credential lives in.
    pub environment_id: Uuid,
    /// Provider credential id.
    pub physical_credential_id: String,
    /// Provider credential name.
    pub physical_name: Option<String>,
    /// Provider credential type.
    pub physical_type: Option<String>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Billing & tenants
// ============================================================================

/// Stripe-backed subscription (`subscriptions`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    /// Owning tenant (primary key).
    pub tenant_id: String,
    /// Stripe customer id.
    pub stripe_customer_id: Option<String>,
    /// Stripe subscription id.
    pub stripe_subscription_id: Option<String>,
    /// free / pro / agency / enterprise.
    pub plan_tier: String,
    /// Stripe subscription status.
    pub status: String,
    /// End of the current billing period.
    pub current_period_end: Option<DateTime<Utc>>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Team member of a tenant (`tenant_users`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TenantUser {
    /// Primary key.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: String,
    /// Login email.
    pub email: String,
    /// admin / developer / viewer.
    pub role: String,
    /// Set by downgrade enforcement.
    pub is_disabled: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Downgrade grace periods
// ============================================================================

/// Kind of resource counted against a plan limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Environments.
    Environment,
    /// Team members.
    TeamMember,
    /// Workflows.
    Workflow,
}

impl ResourceKind {
    /// All kinds, in check order.
    pub const ALL: [ResourceKind; 3] = [Self::Environment, Self::TeamMember, Self::Workflow];

    /// Text stored in the `resource_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::TeamMember => "team_member",
            Self::Workflow => "workflow",
        }
    }

    /// Parse a stored resource kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "environment" => Some(Self::Environment),
            "team_member" => Some(Self::TeamMember),
            "workflow" => Some(Self::Workflow),
            _ => None,
        }
    }
}

/// Action applied when a grace period expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementAction {
    /// Block writes (environments).
    ReadOnly,
    /// Disable the resource (team members).
    Disable,
    /// Mark for deletion.
    ScheduleDeletion,
    /// Archive (workflows).
    Archive,
}

impl EnforcementAction {
    /// Text stored in the `action` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::Disable => "disable",
            Self::ScheduleDeletion => "schedule_deletion",
            Self::Archive => "archive",
        }
    }

    /// Parse a stored action.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read_only" => Some(Self::ReadOnly),
            "disable" => Some(Self::Disable),
            "schedule_deletion" => Some(Self::ScheduleDeletion),
            "archive" => Some(Self::Archive),
            _ => None,
        }
    }
}

/// Grace period lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GracePeriodStatus {
    /// Running; action not applied yet.
    Active,
    /// Expired and the action was applied.
    Enforced,
    /// Tenant became compliant before expiry.
    Cancelled,
}

impl GracePeriodStatus {
    /// Text stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Enforced => "enforced",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Time-boxed exemption for an over-limit resource (`downgrade_grace_periods`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GracePeriod {
    /// Primary key.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: String,
    /// environment / team_member / workflow.
    pub resource_type: String,
    /// Id of the over-limit resource.
    pub resource_id: String,
    /// Action applied on expiry.
    pub action: String,
    /// active / enforced / cancelled.
    pub status: String,
    /// When the grace period started.
    pub starts_at: DateTime<Utc>,
    /// When enforcement becomes due.
    pub expires_at: DateTime<Utc>,
    /// When the status last changed.
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A resource counted against a plan limit, as returned by persistence.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PlanResource {
    /// Resource id (environment id, user id, or workflow row id).
    pub id: String,
    /// Creation time; newer resources are the first to go over the limit.
    pub created_at: DateTime<Utc>,
}

/// Tables subject to retention cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionTable {
    /// Cached provider executions.
    Executions,
    /// Audit log entries.
    AuditLogs,
}

impl RetentionTable {
    /// All tables subject to retention.
    pub const ALL: [RetentionTable; 2] = [Self::Executions, Self::AuditLogs];

    /// Table name.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Executions => "executions",
            Self::AuditLogs => "audit_logs",
        }
    }

    /// Timestamp column used for the cutoff.
    pub fn timestamp_column(&self) -> &'static str {
        match self {
            Self::Executions => "started_at",
            Self::AuditLogs => "created_at",
        }
    }
}
