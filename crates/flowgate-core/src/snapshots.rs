// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Snapshot service.
//!
//! A snapshot commits every workflow of an environment to the environment's
//! Git folder and records the resulting commit SHA.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditContext, AuditEvent, AuditLogger};
use crate::error::{Error, Result};
use crate::git_store::embed_metadata;
use crate::hash::compute_workflow_hash;
use crate::models::{Environment, Snapshot, SnapshotType};
use crate::pagination::{Page, PageRequest};
use crate::persistence::Persistence;
use crate::provider::{workflow_id_of, workflow_name_of};
use crate::registry::AdapterRegistry;

/// Creates and reads environment snapshots.
#[derive(Clone)]
pub struct SnapshotService {
    persistence: Arc<dyn Persistence>,
    registry: Arc<dyn AdapterRegistry>,
    audit: AuditLogger,
}

impl SnapshotService {
    /// Create a snapshot service.
    pub fn new(persistence: Arc<dyn Persistence>, registry: Arc<dyn AdapterRegistry>) -> Self {
        let audit = AuditLogger::new(persistence.clone());
        Self {
            persistence,
            registry,
            audit,
        }
    }

    /// Commit every workflow of `environment` and record the snapshot.
    pub async fn create_snapshot(
        &self,
        ctx: &AuditContext,
        environment: &Environment,
        snapshot_type: SnapshotType,
        promotion_id: Option<Uuid>,
    ) -> Result<Snapshot> {
        let provider = self.registry.provider(environment)?;
        let store = self.registry.snapshot_store(environment)?;
        let folder = environment.git_folder();
        let taken_at = Utc::now();

        let workflows = provider.get_workflows().await?;
        let message = format!(
            "{} snapshot of {} ({} workflows)",
            snapshot_type.as_str(),
            environment.name,
            workflows.len()
        );
        let comment = format!(
            "flowgate {} snapshot of environment '{}' ({}) taken at {}",
            snapshot_type.as_str(),
            environment.name,
            environment.environment_class,
            taken_at.to_rfc3339()
        );

        let mut last_commit = None;
        let mut workflow_count = 0i32;
        for workflow in &workflows {
            let Some(workflow_id) = workflow_id_of(workflow) else {
                warn!(
                    tenant_id = %environment.tenant_id,
                    environment_id = %environment.id,
                    "Skipping workflow without id"
                );
                continue;
            };
            let env_map = json!({
                "environmentId": environment.id,
                "environmentName": environment.name,
                "environmentClass": environment.environment_class,
                "workflowId": workflow_id,
                "workflowName": workflow_name_of(workflow),
                "contentHash": compute_workflow_hash(workflow),
                "snapshotType": snapshot_type.as_str(),
                "syncedAt": taken_at,
            });
            let sha = store
                .sync_workflow(
                    &folder,
                    &workflow_id,
                    &embed_metadata(workflow, &comment),
                    &env_map,
                    &message,
                )
                .await?;
            last_commit = Some(sha);
            workflow_count += 1;
        }

        let git_commit_sha = match last_commit {
            Some(sha) => Some(sha),
            None => store.head_commit_sha().await.ok(),
        };

        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            tenant_id: environment.tenant_id.clone(),
            environment_id: environment.id,
            git_commit_sha,
            snapshot_type: snapshot_type.as_str().to_string(),
            workflow_count,
            promotion_id,
            created_by: Some(ctx.actor.id.clone()),
            created_at: taken_at,
        };
        self.persistence.insert_snapshot(&snapshot).await?;

        info!(
            tenant_id = %snapshot.tenant_id,
            environment_id = %snapshot.environment_id,
            snapshot_id = %snapshot.id,
            snapshot_type = %snapshot.snapshot_type,
            workflow_count = snapshot.workflow_count,
            commit_sha = ?snapshot.git_commit_sha,
            "Snapshot created"
        );

        self.audit
            .record(
                ctx,
                AuditEvent::new(AuditAction::Snapshot, "snapshot", snapshot.id).new_value(json!({
                    "environmentId": snapshot.environment_id,
                    "snapshotType": snapshot.snapshot_type,
                    "workflowCount": snapshot.workflow_count,
                    "commitSha": snapshot.git_commit_sha,
                    "promotionId": snapshot.promotion_id,
                })),
            )
            .await;

        Ok(snapshot)
    }

    /// Take a manual backup of an active environment.
    pub async fn create_manual_backup(&self, ctx: &AuditContext, environment_id: Uuid) -> Result<Snapshot> {
        let environment = self
            .persistence
            .get_environment(&ctx.tenant_id, environment_id)
            .await?
            .filter(|env| env.is_active)
            .ok_or_else(|| Error::not_found("environment", environment_id))?;
        self.create_snapshot(ctx, &environment, SnapshotType::ManualBackup, None)
            .await
    }

    /// Snapshot by id.
    pub async fn get_snapshot(&self, tenant_id: &str, id: Uuid) -> Result<Snapshot> {
        self.persistence
            .get_snapshot(tenant_id, id)
            .await?
            .ok_or_else(|| Error::not_found("snapshot", id))
    }

    /// Snapshots of an environment, newest first.
    pub async fn list_snapshots(
        &self,
        tenant_id: &str,
        environment_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Snapshot>> {
        if self
            .persistence
            .get_environment(tenant_id, environment_id)
            .await?
            .is_none()
        {
            return Err(Error::not_found("environment", environment_id));
        }
        let (items, total) = self
            .persistence
            .list_snapshots(tenant_id, environment_id, &page)
            .await?;
        Ok(Page::new(items, total, page))
    }
}
