// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment sync: refresh the workflow and execution caches from the provider.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditContext, AuditEvent, AuditLogger};
use crate::error::Result;
use crate::hash::compute_workflow_hash;
use crate::models::{Environment, ExecutionRecord, WorkflowRecord};
use crate::persistence::Persistence;
use crate::provider::{workflow_id_of, workflow_name_of};
use crate::registry::AdapterRegistry;

/// Number of recent executions fetched per sync.
pub const SYNC_EXECUTION_LIMIT: usize = 250;

/// Outcome of one environment sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub workflows_synced: usize,
    pub workflows_removed: u64,
    pub executions_synced: usize,
    pub errors: Vec<String>,
}

/// Refreshes cached provider state for environments.
#[derive(Clone)]
pub struct EnvironmentSyncService {
    persistence: Arc<dyn Persistence>,
    registry: Arc<dyn AdapterRegistry>,
    audit: AuditLogger,
}

impl EnvironmentSyncService {
    /// Create a sync service.
    pub fn new(persistence: Arc<dyn Persistence>, registry: Arc<dyn AdapterRegistry>) -> Self {
        let audit = AuditLogger::new(persistence.clone());
        Self {
            persistence,
            registry,
            audit,
        }
    }

    /// Sync one environment.
    ///
    /// Fails only when the workflow list cannot be fetched; per-workflow and
    /// execution failures are collected in the summary.
    pub async fn sync_environment(
        &self,
        ctx: &AuditContext,
        environment: &Environment,
    ) -> Result<SyncSummary> {
        let provider = self.registry.provider(environment)?;
        let now = Utc::now();

        let workflows = match provider.get_workflows().await {
            Ok(workflows) => workflows,
            Err(e) => {
                self.persistence
                    .update_environment_health(&environment.tenant_id, environment.id, false, now)
                    .await?;
                return Err(e.into());
            }
        };
        self.persistence
            .update_environment_health(&environment.tenant_id, environment.id, true, now)
            .await?;

        let mut summary = SyncSummary::default();
        let mut seen = Vec::with_capacity(workflows.len());
        for workflow in &workflows {
            let Some(workflow_id) = workflow_id_of(workflow) else {
                summary.errors.push("workflow without id skipped".to_string());
                continue;
            };
            let record = WorkflowRecord {
                id: Uuid::new_v4(),
                tenant_id: environment.tenant_id.clone(),
                environment_id: environment.id,
                workflow_id: workflow_id.clone(),
                name: workflow_name_of(workflow),
                active: workflow.get("active").and_then(Value::as_bool).unwrap_or(false),
                definition: workflow.clone(),
                content_hash: compute_workflow_hash(workflow),
                is_archived: false,
                synced_at: now,
            };
            match self.persistence.upsert_workflow(&record).await {
                Ok(()) => summary.workflows_synced += 1,
                Err(e) => summary.errors.push(format!("workflow {workflow_id}: {e}")),
            }
            seen.push(workflow_id);
        }

        summary.workflows_removed = self
            .persistence
            .remove_workflows_not_in(&environment.tenant_id, environment.id, &seen)
            .await?;

        match provider.get_executions(SYNC_EXECUTION_LIMIT).await {
            Ok(executions) => {
                for raw in &executions {
                    let Some(execution) =
                        parse_execution(&environment.tenant_id, environment.id, raw)
                    else {
                        continue;
                    };
                    match self.persistence.upsert_execution(&execution).await {
                        Ok(()) => summary.executions_synced += 1,
                        Err(e) => summary
                            .errors
                            .push(format!("execution {}: {e}", execution.execution_id)),
                    }
                }
            }
            Err(e) => {
                warn!(
                    tenant_id = %environment.tenant_id,
                    environment_id = %environment.id,
                    error = %e,
                    "Failed to fetch executions"
                );
                summary.errors.push(format!("executions: {e}"));
            }
        }

        self.persistence
            .mark_environment_synced(&environment.tenant_id, environment.id, Utc::now())
            .await?;

        info!(
            tenant_id = %environment.tenant_id,
            environment_id = %environment.id,
            workflows_synced = summary.workflows_synced,
            workflows_removed = summary.workflows_removed,
            executions_synced = summary.executions_synced,
            errors = summary.errors.len(),
            "Environment synced"
        );

        self.audit
            .record(
                ctx,
                AuditEvent::new(AuditAction::Sync, "environment", environment.id)
                    .new_value(json!(summary)),
            )
            .await;

        Ok(summary)
    }
}

/// Convert a provider execution into a cached row.
///
/// Returns `None` when the execution has no id or start time.
pub fn parse_execution(
    tenant_id: &str,
    environment_id: Uuid,
    raw: &Value,
) -> Option<ExecutionRecord> {
    let execution_id = match raw.get("id")? {
        Value::String(id) => id.clone(),
        Value::Number(id) => id.to_string(),
        _ => return None,
    };
    let started_at = parse_timestamp(raw.get("startedAt"))?;
    let finished_at = parse_timestamp(raw.get("stoppedAt"));

    let status = match raw.get("status").and_then(Value::as_str) {
        Some(status) => status.to_string(),
        None => match (raw.get("finished").and_then(Value::as_bool), finished_at) {
            (Some(true), _) => "success".to_string(),
            (_, Some(_)) => "error".to_string(),
            _ => "running".to_string(),
        },
    };

    let workflow_id = match raw.get("workflowId") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    };

    Some(ExecutionRecord {
        tenant_id: tenant_id.to_string(),
        environment_id,
        execution_id,
        workflow_id,
        status,
        started_at,
        finished_at,
    })
}

fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = value?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
