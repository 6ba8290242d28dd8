// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Restore promoted workflows from a pre-promotion snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::PromotionService;
use crate::audit::{AuditAction, AuditContext, AuditEvent};
use crate::error::Error;
use crate::git_store::strip_metadata;
use crate::provider::{ProviderError, WorkflowProvider};

/// Prefix of errors raised outside the per-workflow loop.
pub const CRITICAL_ROLLBACK_PREFIX: &str = "Critical rollback failure";

/// Restore method recorded in results and audit entries.
pub const ROLLBACK_METHOD: &str = "git_restore";

/// Outcome of a rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    pub rollback_triggered: bool,
    pub workflows_rolled_back: usize,
    pub rollback_errors: Vec<String>,
    pub snapshot_id: Uuid,
    pub commit_sha: Option<String>,
    pub rollback_method: String,
    pub timestamp: DateTime<Utc>,
}

impl RollbackResult {
    fn new(snapshot_id: Uuid) -> Self {
        Self {
            rollback_triggered: true,
            workflows_rolled_back: 0,
            rollback_errors: Vec::new(),
            snapshot_id,
            commit_sha: None,
            rollback_method: ROLLBACK_METHOD.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Whether every workflow was restored.
    pub fn is_complete(&self) -> bool {
        self.rollback_errors.is_empty()
    }
}

impl PromotionService {
    /// Restore `workflow_ids` in the target environment to their state in
    /// the given snapshot.
    ///
    /// Never fails: every problem is reported in
    /// [`RollbackResult::rollback_errors`].
    #[instrument(skip(self, ctx, workflow_ids), fields(tenant_id = %ctx.tenant_id, workflows = workflow_ids.len()))]
    pub async fn rollback_promotion(
        &self,
        ctx: &AuditContext,
        target_environment_id: Uuid,
        snapshot_id: Uuid,
        workflow_ids: &[String],
        promotion_id: Option<Uuid>,
    ) -> RollbackResult {
        let mut result = RollbackResult::new(snapshot_id);

        if let Err(e) = self
            .restore(ctx, target_environment_id, workflow_ids, &mut result)
            .await
        {
            error!(
                target_environment_id = %target_environment_id,
                snapshot_id = %snapshot_id,
                error = %e,
                "Rollback aborted"
            );
            result.workflows_rolled_back = 0;
            result
                .rollback_errors
                .push(format!("{CRITICAL_ROLLBACK_PREFIX}: {e}"));
        }
        result.timestamp = Utc::now();

        info!(
            target_environment_id = %target_environment_id,
            snapshot_id = %snapshot_id,
            rolled_back = result.workflows_rolled_back,
            errors = result.rollback_errors.len(),
            "Rollback finished"
        );

        let resource_id = promotion_id.unwrap_or(target_environment_id);
        self.audit
            .record(
                ctx,
                AuditEvent::new(AuditAction::Rollback, "promotion", resource_id).new_value(json!({
                    "promotionId": promotion_id,
                    "targetEnvironmentId": target_environment_id,
                    "workflowIds": workflow_ids,
                    "result": result,
                })),
            )
            .await;

        result
    }

    /// Per-workflow problems go into `result`; anything returned as `Err`
    /// aborts the whole rollback.
    async fn restore(
        &self,
        ctx: &AuditContext,
        target_environment_id: Uuid,
        workflow_ids: &[String],
        result: &mut RollbackResult,
    ) -> Result<(), Error> {
        let snapshot = self
            .persistence
            .get_snapshot(&ctx.tenant_id, result.snapshot_id)
            .await?;
        let Some(snapshot) = snapshot else {
            result.rollback_errors.push(format!(
                "snapshot {} not found; nothing was restored",
                result.snapshot_id
            ));
            return Ok(());
        };
        let Some(commit_sha) = snapshot.commit_sha().map(str::to_string) else {
            result.rollback_errors.push(format!(
                "snapshot {} has no commit SHA; nothing was restored",
                snapshot.id
            ));
            return Ok(());
        };
        result.commit_sha = Some(commit_sha.clone());

        let environment = self
            .persistence
            .get_environment(&ctx.tenant_id, target_environment_id)
            .await?
            .ok_or_else(|| Error::not_found("environment", target_environment_id))?;
        let provider = self.registry.provider(&environment)?;
        let store = self.registry.snapshot_store(&environment)?;

        let files: HashMap<String, Value> = store
            .get_all_workflows(&environment.git_folder(), Some(&commit_sha))
            .await?;

        for workflow_id in workflow_ids {
            let Some(saved) = files.get(workflow_id) else {
                result.rollback_errors.push(format!(
                    "workflow {workflow_id} is not in snapshot {commit_sha}"
                ));
                continue;
            };
            match self
                .restore_workflow(provider.as_ref(), workflow_id, &strip_metadata(saved))
                .await
            {
                Ok(()) => result.workflows_rolled_back += 1,
                Err(e) => {
                    warn!(workflow_id = %workflow_id, error = %e, "Failed to restore workflow");
                    result
                        .rollback_errors
                        .push(format!("workflow {workflow_id}: {e}"));
                }
            }
        }
        Ok(())
    }

    /// Update with bounded retries on transient errors; create once on 404.
    async fn restore_workflow(
        &self,
        provider: &dyn WorkflowProvider,
        workflow_id: &str,
        data: &Value,
    ) -> Result<(), ProviderError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match provider.update_workflow(workflow_id, data).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_not_found() => {
                    provider.create_workflow(data).await?;
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        workflow_id = %workflow_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient error restoring workflow, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git_store::{MockSnapshotStore, SnapshotStore, workflow_path};
    use crate::models::{Snapshot, SnapshotType};
    use crate::persistence::{MemoryPersistence, Persistence};
    use crate::promotion::{PromotionLocks, RetryPolicy};
    use crate::provider::{MockProvider, ProviderCall};
    use crate::registry::StaticAdapterRegistry;
    use crate::testing::{environment, workflow};
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        service: PromotionService,
        persistence: Arc<MemoryPersistence>,
        provider: Arc<MockProvider>,
        store: Arc<MockSnapshotStore>,
        env_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let persistence = Arc::new(MemoryPersistence::new());
        let registry = Arc::new(StaticAdapterRegistry::new());
        let env = environment("t1", "production", true);
        persistence.insert_environment(&env).await.unwrap();
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MockSnapshotStore::new());
        registry.register_provider(env.id, provider.clone());
        registry.register_store(env.id, store.clone());
        let service = PromotionService::new(persistence.clone(), registry, PromotionLocks::new())
            .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1)));
        Fixture {
            service,
            persistence,
            provider,
            store,
            env_id: env.id,
        }
    }

    async fn snapshot(f: &Fixture, sha: Option<String>) -> Uuid {
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            environment_id: f.env_id,
            git_commit_sha: sha,
            snapshot_type: SnapshotType::PrePromotion.as_str().into(),
            workflow_count: 1,
            promotion_id: None,
            created_by: None,
            created_at: Utc::now(),
        };
        f.persistence.insert_snapshot(&snapshot).await.unwrap();
        snapshot.id
    }

    #[tokio::test]
    async fn test_missing_commit_sha_does_not_touch_git() {
        let f = fixture().await;
        let snapshot_id = snapshot(&f, Some(String::new())).await;

        let result = f
            .service
            .rollback_promotion(&AuditContext::system("t1"), f.env_id, snapshot_id, &["1".into()], None)
            .await;
        assert!(result.rollback_triggered);
        assert_eq!(result.workflows_rolled_back, 0);
        assert_eq!(result.rollback_errors.len(), 1);
        assert_eq!(f.store.read_count(), 0);
        assert!(f.provider.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_git_is_critical_failure() {
        let f = fixture().await;
        let snapshot_id = snapshot(&f, Some("abc".into())).await;
        f.store.set_unreachable(true);

        let result = f
            .service
            .rollback_promotion(&AuditContext::system("t1"), f.env_id, snapshot_id, &["1".into()], None)
            .await;
        assert_eq!(result.workflows_rolled_back, 0);
        assert!(result.rollback_errors[0].starts_with(CRITICAL_ROLLBACK_PREFIX));

        let audit = f.persistence.audit_entries("t1").await;
        assert_eq!(audit.last().unwrap().action, "rollback");
    }

    #[tokio::test]
    async fn test_restores_and_reports_missing_workflows() {
        let f = fixture().await;
        let original = workflow("1", "Orders", "https://old");
        let sha = f
            .store
            .write_workflow_file(&workflow_path("production", "1"), &original, "snapshot")
            .await
            .unwrap();
        let snapshot_id = snapshot(&f, Some(sha.clone())).await;
        f.provider
            .insert_workflow(workflow("1", "Orders", "https://new"))
            .await;

        let result = f
            .service
            .rollback_promotion(
                &AuditContext::system("t1"),
                f.env_id,
                snapshot_id,
                &["1".into(), "2".into()],
                None,
            )
            .await;
        assert_eq!(result.workflows_rolled_back, 1);
        assert_eq!(result.rollback_errors.len(), 1);
        assert!(result.rollback_errors[0].contains("workflow 2"));
        assert_eq!(result.commit_sha.as_deref(), Some(sha.as_str()));
        assert_eq!(
            f.provider.workflow("1").await.unwrap()["nodes"][1]["parameters"]["url"],
            "https://old"
        );
    }

    #[tokio::test]
    async fn test_transient_errors_retry_then_give_up() {
        let f = fixture().await;
        let sha = f
            .store
            .write_workflow_file(
                &workflow_path("production", "1"),
                &workflow("1", "Orders", "https://old"),
                "snapshot",
            )
            .await
            .unwrap();
        let snapshot_id = snapshot(&f, Some(sha)).await;
        f.provider
            .insert_workflow(workflow("1", "Orders", "https://new"))
            .await;
        f.provider
            .fail_update_always("1", ProviderError::from_status(503, "unavailable"))
            .await;

        let result = f
            .service
            .rollback_promotion(&AuditContext::system("t1"), f.env_id, snapshot_id, &["1".into()], None)
            .await;
        assert_eq!(result.workflows_rolled_back, 0);
        assert_eq!(
            f.provider
                .call_count(&ProviderCall::UpdateWorkflow("1".into()))
                .await,
            3
        );
        assert_eq!(
            f.provider
                .call_count(&ProviderCall::CreateWorkflow("Orders".into()))
                .await,
            0
        );
    }

    #[tokio::test]
    async fn test_not_found_creates_once() {
        let f = fixture().await;
        let sha = f
            .store
            .write_workflow_file(
                &workflow_path("production", "1"),
                &workflow("1", "Orders", "https://old"),
                "snapshot",
            )
            .await
            .unwrap();
        let snapshot_id = snapshot(&f, Some(sha)).await;

        let result = f
            .service
            .rollback_promotion(&AuditContext::system("t1"), f.env_id, snapshot_id, &["1".into()], None)
            .await;
        assert!(result.is_complete());
        assert_eq!(result.workflows_rolled_back, 1);
        assert_eq!(f.provider.workflow_count().await, 1);
    }
}
