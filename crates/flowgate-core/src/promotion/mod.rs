// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Promotion engine.
//!
//! A promotion copies an ordered selection of workflows from a source
//! environment into a target environment:
//!
//! 1. The target is captured in a pre-promotion snapshot before any write.
//! 2. Workflows are processed strictly in selection order. A workflow whose
//!    content hash already matches the target is skipped.
//! 3. The first failed write stops the promotion. Every workflow written so
//!    far is restored from the pre-promotion snapshot (see [`rollback`]).
//!
//! Only one promotion per (tenant, target environment) runs at a time; see
//! [`PromotionLocks`].

pub mod locks;
pub mod rollback;

pub use self::locks::{PromotionGuard, PromotionLocks};
pub use self::rollback::RollbackResult;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::types::Json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditContext, AuditEvent, AuditLogger};
use crate::error::{Error, Result};
use crate::git_store::strip_metadata;
use crate::hash::compute_workflow_hash;
use crate::models::{
    ChangeType, Environment, Promotion, PromotionStatus, Snapshot, SnapshotType,
    WorkflowMapping, WorkflowSelection,
};
use crate::pagination::{Page, PageRequest};
use crate::persistence::Persistence;
use crate::provider::{ProviderError, WorkflowProvider, workflow_id_of, workflow_name_of};
use crate::registry::AdapterRegistry;
use crate::snapshots::SnapshotService;

// ============================================================================
// Retry policy
// ============================================================================

/// Retry behavior for provider writes during rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for every further retry.
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Create a retry policy.
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
        }
    }

    /// Delay before the given retry (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(multiplier)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

// ============================================================================
// Requests and results
// ============================================================================

/// Request to create a promotion.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePromotion {
    pub source_environment_id: Uuid,
    pub target_environment_id: Uuid,
    pub workflow_selections: Vec<WorkflowSelection>,
}

/// What happened to one selected workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Written to the target.
    Promoted,
    /// Target already held identical content.
    Skipped,
    /// The write failed; the promotion stopped here.
    Failed,
    /// Not processed because an earlier workflow failed.
    NotAttempted,
}

/// Provider call used to write a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteAction {
    /// `create_workflow`.
    Create,
    /// `update_workflow`.
    Update,
}

/// Per-workflow outcome of a promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOutcome {
    pub workflow_id: String,
    pub name: Option<String>,
    pub change_type: ChangeType,
    pub status: OutcomeStatus,
    /// Id of the workflow in the target, when known.
    pub target_workflow_id: Option<String>,
    pub action: Option<WriteAction>,
    /// Why the workflow was skipped.
    pub reason: Option<String>,
    pub error: Option<String>,
}

impl WorkflowOutcome {
    fn new(selection: &WorkflowSelection, status: OutcomeStatus) -> Self {
        Self {
            workflow_id: selection.workflow_id.clone(),
            name: selection.name.clone(),
            change_type: selection.change_type,
            status,
            target_workflow_id: None,
            action: None,
            reason: None,
            error: None,
        }
    }
}

/// Result of executing a promotion. Stored on the promotion row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionExecutionResult {
    pub promotion_id: Uuid,
    pub status: PromotionStatus,
    pub promoted: usize,
    pub failed: usize,
    pub skipped: usize,
    pub outcomes: Vec<WorkflowOutcome>,
    pub rollback: Option<RollbackResult>,
    pub source_snapshot_id: Option<Uuid>,
    pub target_pre_snapshot_id: Option<Uuid>,
    /// Why the promotion aborted before writing anything.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl PromotionExecutionResult {
    fn tally(&mut self) {
        let count = |status: OutcomeStatus| self.outcomes.iter().filter(|o| o.status == status).count();
        self.promoted = count(OutcomeStatus::Promoted);
        self.failed = count(OutcomeStatus::Failed);
        self.skipped = count(OutcomeStatus::Skipped);
    }
}

// ============================================================================
// Service
// ============================================================================

/// Creates, executes, and rolls back promotions.
#[derive(Clone)]
pub struct PromotionService {
    persistence: Arc<dyn Persistence>,
    registry: Arc<dyn AdapterRegistry>,
    snapshots: SnapshotService,
    audit: AuditLogger,
    locks: PromotionLocks,
    retry: RetryPolicy,
}

/// Providers resolved for one execution.
struct Providers {
    source: Arc<dyn WorkflowProvider>,
    target: Arc<dyn WorkflowProvider>,
}

impl PromotionService {
    /// Create a promotion service.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        registry: Arc<dyn AdapterRegistry>,
        locks: PromotionLocks,
    ) -> Self {
        let audit = AuditLogger::new(persistence.clone());
        let snapshots = SnapshotService::new(persistence.clone(), registry.clone());
        Self {
            persistence,
            registry,
            snapshots,
            audit,
            locks,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the rollback retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Rollback retry policy in use.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn active_environment(&self, tenant_id: &str, id: Uuid) -> Result<Environment> {
        self.persistence
            .get_environment(tenant_id, id)
            .await?
            .filter(|env| env.is_active)
            .ok_or_else(|| Error::not_found("environment", id))
    }

    /// Validate and store a pending promotion.
    pub async fn create_promotion(
        &self,
        ctx: &AuditContext,
        input: CreatePromotion,
    ) -> Result<Promotion> {
        if input.workflow_selections.is_empty() {
            return Err(Error::Validation(
                "at least one workflow must be selected".to_string(),
            ));
        }
        if input.source_environment_id == input.target_environment_id {
            return Err(Error::Validation(
                "source and target environments must differ".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for selection in &input.workflow_selections {
            if selection.workflow_id.trim().is_empty() {
                return Err(Error::Validation("workflow_id must not be empty".to_string()));
            }
            if !seen.insert(selection.workflow_id.as_str()) {
                return Err(Error::Validation(format!(
                    "workflow {} is selected more than once",
                    selection.workflow_id
                )));
            }
        }
        self.active_environment(&ctx.tenant_id, input.source_environment_id)
            .await?;
        self.active_environment(&ctx.tenant_id, input.target_environment_id)
            .await?;

        let promotion = Promotion {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id.clone(),
            source_environment_id: input.source_environment_id,
            target_environment_id: input.target_environment_id,
            workflow_selections: Json(input.workflow_selections),
            source_snapshot_id: None,
            target_pre_snapshot_id: None,
            status: PromotionStatus::Pending.as_str().to_string(),
            result: None,
            created_by: ctx.actor.id.clone(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.persistence.insert_promotion(&promotion).await?;

        info!(
            tenant_id = %promotion.tenant_id,
            promotion_id = %promotion.id,
            workflows = promotion.workflow_selections.len(),
            "Promotion created"
        );
        self.audit
            .record(
                ctx,
                AuditEvent::new(AuditAction::Create, "promotion", promotion.id)
                    .new_value(json!(promotion)),
            )
            .await;

        Ok(promotion)
    }

    /// Promotion by id.
    pub async fn get_promotion(&self, tenant_id: &str, id: Uuid) -> Result<Promotion> {
        self.persistence
            .get_promotion(tenant_id, id)
            .await?
            .ok_or_else(|| Error::not_found("promotion", id))
    }

    /// Promotions of a tenant, newest first.
    pub async fn list_promotions(
        &self,
        tenant_id: &str,
        page: PageRequest,
    ) -> Result<Page<Promotion>> {
        let (items, total) = self.persistence.list_promotions(tenant_id, &page).await?;
        Ok(Page::new(items, total, page))
    }

    /// Execute a promotion.
    ///
    /// Returns an error only when the promotion cannot start (missing
    /// promotion or environment, read-only target, promotion already
    /// running) or when its terminal status cannot be stored after
    /// retries. Failures in between are reported in the result.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    pub async fn execute_promotion(
        &self,
        ctx: &AuditContext,
        promotion_id: Uuid,
    ) -> Result<PromotionExecutionResult> {
        let mut promotion = self.get_promotion(&ctx.tenant_id, promotion_id).await?;
        if promotion.status() == PromotionStatus::Running {
            return Err(Error::Conflict(format!(
                "promotion {promotion_id} is already running"
            )));
        }
        let source = self
            .active_environment(&ctx.tenant_id, promotion.source_environment_id)
            .await?;
        let target = self
            .active_environment(&ctx.tenant_id, promotion.target_environment_id)
            .await?;
        if target.is_read_only {
            return Err(Error::Validation(format!(
                "environment '{}' is read-only",
                target.name
            )));
        }

        let _guard = self
            .locks
            .try_acquire(&ctx.tenant_id, target.id, promotion.id)
            .ok_or_else(|| {
                Error::Conflict(format!(
                    "another promotion into environment '{}' is in progress",
                    target.name
                ))
            })?;

        let started_at = Utc::now();
        promotion.status = PromotionStatus::Running.as_str().to_string();
        promotion.started_at = Some(started_at);
        promotion.completed_at = None;
        self.persistence.update_promotion(&promotion).await?;
        info!(
            promotion_id = %promotion.id,
            source_environment_id = %source.id,
            target_environment_id = %target.id,
            "Promotion started"
        );

        let mut result = PromotionExecutionResult {
            promotion_id: promotion.id,
            status: PromotionStatus::Running,
            promoted: 0,
            failed: 0,
            skipped: 0,
            outcomes: Vec::new(),
            rollback: None,
            source_snapshot_id: promotion.source_snapshot_id,
            target_pre_snapshot_id: promotion.target_pre_snapshot_id,
            error: None,
            started_at,
            completed_at: started_at,
        };

        match self
            .prepare(ctx, &mut promotion, &source, &target, &mut result)
            .await
        {
            Ok(adapters) => {
                self.promote_selections(ctx, &promotion, &source, &target, &adapters, &mut result)
                    .await;
            }
            Err(e) => {
                error!(promotion_id = %promotion.id, error = %e, "Promotion aborted before any write");
                result.status = PromotionStatus::Failed;
                result.error = Some(e.to_string());
                result.outcomes = promotion
                    .workflow_selections
                    .iter()
                    .map(|s| WorkflowOutcome::new(s, OutcomeStatus::NotAttempted))
                    .collect();
            }
        }

        result.tally();
        result.completed_at = Utc::now();

        promotion.status = result.status.as_str().to_string();
        promotion.completed_at = Some(result.completed_at);
        promotion.result = serde_json::to_value(&result).ok();
        self.record_final_status(&promotion).await?;

        info!(
            promotion_id = %promotion.id,
            status = result.status.as_str(),
            promoted = result.promoted,
            skipped = result.skipped,
            failed = result.failed,
            "Promotion finished"
        );
        self.audit
            .record(
                ctx,
                AuditEvent::new(AuditAction::Execute, "promotion", promotion.id)
                    .new_value(json!(result)),
            )
            .await;

        if result.status == PromotionStatus::Completed {
            self.spawn_post_promotion_snapshot(ctx, target, promotion.id);
        }

        Ok(result)
    }

    /// Persist the terminal status, retrying so the row does not stay
    /// `running` after a transient store failure.
    async fn record_final_status(&self, promotion: &Promotion) -> Result<()> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.persistence.update_promotion(promotion).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        promotion_id = %promotion.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Failed to record promotion status, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        promotion_id = %promotion.id,
                        status = %promotion.status,
                        error = %e,
                        "Promotion status could not be recorded"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Resolve adapters and take the snapshots every write depends on.
    async fn prepare(
        &self,
        ctx: &AuditContext,
        promotion: &mut Promotion,
        source: &Environment,
        target: &Environment,
        result: &mut PromotionExecutionResult,
    ) -> Result<Providers> {
        let adapters = Providers {
            source: self.registry.provider(source)?,
            target: self.registry.provider(target)?,
        };
        // No write may happen without a place to restore from.
        self.registry.snapshot_store(target)?;

        let pre_snapshot = match self
            .existing_snapshot(&ctx.tenant_id, promotion.target_pre_snapshot_id)
            .await?
        {
            Some(snapshot) => snapshot,
            None => {
                self.snapshots
                    .create_snapshot(ctx, target, SnapshotType::PrePromotion, Some(promotion.id))
                    .await?
            }
        };
        promotion.target_pre_snapshot_id = Some(pre_snapshot.id);
        result.target_pre_snapshot_id = Some(pre_snapshot.id);

        if source.has_git() && promotion.source_snapshot_id.is_none() {
            let snapshot = self
                .snapshots
                .create_snapshot(ctx, source, SnapshotType::PrePromotion, Some(promotion.id))
                .await?;
            promotion.source_snapshot_id = Some(snapshot.id);
        }
        result.source_snapshot_id = promotion.source_snapshot_id;

        self.persistence.update_promotion(promotion).await?;
        Ok(adapters)
    }

    async fn existing_snapshot(&self, tenant_id: &str, id: Option<Uuid>) -> Result<Option<Snapshot>> {
        match id {
            Some(id) => self.persistence.get_snapshot(tenant_id, id).await,
            None => Ok(None),
        }
    }

    /// Process selections in order, stopping and rolling back on the first failure.
    async fn promote_selections(
        &self,
        ctx: &AuditContext,
        promotion: &Promotion,
        source: &Environment,
        target: &Environment,
        adapters: &Providers,
        result: &mut PromotionExecutionResult,
    ) {
        let selections = &promotion.workflow_selections.0;
        let mut written: Vec<String> = Vec::new();
        let mut target_hashes: Option<HashSet<String>> = None;
        let mut failed_at = None;

        for (index, selection) in selections.iter().enumerate() {
            let outcome = self
                .promote_one(promotion, source, target, adapters, selection, &mut target_hashes)
                .await;
            if outcome.status == OutcomeStatus::Promoted {
                if let Some(id) = &outcome.target_workflow_id {
                    written.push(id.clone());
                }
            }
            let failed = outcome.status == OutcomeStatus::Failed;
            result.outcomes.push(outcome);
            if failed {
                failed_at = Some(index);
                break;
            }
        }

        let Some(index) = failed_at else {
            result.status = PromotionStatus::Completed;
            return;
        };

        result.outcomes.extend(
            selections[index + 1..]
                .iter()
                .map(|s| WorkflowOutcome::new(s, OutcomeStatus::NotAttempted)),
        );
        warn!(
            promotion_id = %promotion.id,
            workflow_id = %selections[index].workflow_id,
            written = written.len(),
            "Promotion write failed, rolling back"
        );

        let snapshot_id = result.target_pre_snapshot_id.unwrap_or_default();
        let rollback = self
            .rollback_promotion(ctx, target.id, snapshot_id, &written, Some(promotion.id))
            .await;
        result.rollback = Some(rollback);
        result.status = PromotionStatus::FailedWithRollback;
    }

    async fn promote_one(
        &self,
        promotion: &Promotion,
        source: &Environment,
        target: &Environment,
        adapters: &Providers,
        selection: &WorkflowSelection,
        target_hashes: &mut Option<HashSet<String>>,
    ) -> WorkflowOutcome {
        let mut outcome = WorkflowOutcome::new(selection, OutcomeStatus::Failed);

        let workflow = match adapters.source.get_workflow(&selection.workflow_id).await {
            Ok(workflow) => workflow,
            Err(e) => {
                outcome.error = Some(format!("failed to read source workflow: {e}"));
                return outcome;
            }
        };
        if outcome.name.is_none() {
            outcome.name = Some(workflow_name_of(&workflow));
        }
        let hash = compute_workflow_hash(&workflow);
        let body = strip_metadata(&workflow);

        let written = match selection.change_type {
            ChangeType::New => {
                if target_hashes.is_none() {
                    match adapters.target.get_workflows().await {
                        Ok(existing) => {
                            *target_hashes =
                                Some(existing.iter().map(compute_workflow_hash).collect());
                        }
                        Err(e) => {
                            outcome.error = Some(format!("failed to list target workflows: {e}"));
                            return outcome;
                        }
                    }
                }
                if target_hashes.as_ref().is_some_and(|h| h.contains(&hash)) {
                    outcome.status = OutcomeStatus::Skipped;
                    outcome.reason = Some("identical workflow already exists in target".into());
                    return outcome;
                }
                self.create(adapters.target.as_ref(), &body).await
            }
            ChangeType::Changed => {
                let target_id = self.resolve_target_id(promotion, selection).await;
                outcome.target_workflow_id = Some(target_id.clone());
                match adapters.target.get_workflow(&target_id).await {
                    Ok(existing) if compute_workflow_hash(&existing) == hash => {
                        outcome.status = OutcomeStatus::Skipped;
                        outcome.reason = Some("target content is identical".into());
                        self.record_mapping(promotion, selection, &target_id, &hash)
                            .await;
                        return outcome;
                    }
                    Ok(_) => adapters
                        .target
                        .update_workflow(&target_id, &body)
                        .await
                        .map(|_| (WriteAction::Update, target_id)),
                    Err(e) if e.is_not_found() => {
                        self.create(adapters.target.as_ref(), &body).await
                    }
                    Err(e) => Err(e),
                }
            }
        };

        match written {
            Ok((action, target_id)) => {
                info!(
                    promotion_id = %promotion.id,
                    workflow_id = %selection.workflow_id,
                    target_workflow_id = %target_id,
                    target_environment_id = %target.id,
                    source_environment_id = %source.id,
                    action = ?action,
                    "Workflow promoted"
                );
                if let Some(hashes) = target_hashes.as_mut() {
                    hashes.insert(hash.clone());
                }
                self.record_mapping(promotion, selection, &target_id, &hash)
                    .await;
                outcome.status = OutcomeStatus::Promoted;
                outcome.action = Some(action);
                outcome.target_workflow_id = Some(target_id);
            }
            Err(e) => {
                warn!(
                    promotion_id = %promotion.id,
                    workflow_id = %selection.workflow_id,
                    error = %e,
                    "Workflow write failed"
                );
                outcome.error = Some(e.to_string());
            }
        }
        outcome
    }

    async fn create(
        &self,
        provider: &dyn WorkflowProvider,
        body: &Value,
    ) -> std::result::Result<(WriteAction, String), ProviderError> {
        let created = provider.create_workflow(body).await?;
        let id = workflow_id_of(&created).ok_or_else(|| {
            ProviderError::Other("created workflow has no id".to_string())
        })?;
        Ok((WriteAction::Create, id))
    }

    /// Target id of a changed workflow: explicit, then mapped, then the source id.
    async fn resolve_target_id(&self, promotion: &Promotion, selection: &WorkflowSelection) -> String {
        if let Some(id) = &selection.target_workflow_id {
            return id.clone();
        }
        match self
            .persistence
            .find_workflow_mapping(
                &promotion.tenant_id,
                promotion.source_environment_id,
                &selection.workflow_id,
                promotion.target_environment_id,
            )
            .await
        {
            Ok(Some(mapping)) => mapping.target_workflow_id,
            Ok(None) => selection.workflow_id.clone(),
            Err(e) => {
                warn!(workflow_id = %selection.workflow_id, error = %e, "Workflow mapping lookup failed");
                selection.workflow_id.clone()
            }
        }
    }

    async fn record_mapping(
        &self,
        promotion: &Promotion,
        selection: &WorkflowSelection,
        target_workflow_id: &str,
        content_hash: &str,
    ) {
        let mapping = WorkflowMapping {
            id: Uuid::new_v4(),
            tenant_id: promotion.tenant_id.clone(),
            source_environment_id: promotion.source_environment_id,
            source_workflow_id: selection.workflow_id.clone(),
            target_environment_id: promotion.target_environment_id,
            target_workflow_id: target_workflow_id.to_string(),
            content_hash: content_hash.to_string(),
            updated_at: Utc::now(),
        };
        if let Err(e) = self.persistence.upsert_workflow_mapping(&mapping).await {
            warn!(workflow_id = %selection.workflow_id, error = %e, "Failed to record workflow mapping");
        }
    }

    fn spawn_post_promotion_snapshot(&self, ctx: &AuditContext, target: Environment, promotion_id: Uuid) {
        let snapshots = self.snapshots.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = snapshots
                .create_snapshot(&ctx, &target, SnapshotType::PostPromotion, Some(promotion_id))
                .await
            {
                warn!(
                    promotion_id = %promotion_id,
                    environment_id = %target.id,
                    error = %e,
                    "Post-promotion snapshot failed"
                );
            }
        });
    }
}
