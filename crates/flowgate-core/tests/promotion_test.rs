// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Promotion engine tests: idempotency, stop-on-failure, rollback, retries.

mod common;

use common::*;
use std::time::Duration;
use uuid::Uuid;

use flowgate_core::Error;
use flowgate_core::models::{ChangeType, PromotionStatus, SnapshotType};
use flowgate_core::pagination::PageRequest;
use flowgate_core::persistence::Persistence;
use flowgate_core::promotion::{OutcomeStatus, RetryPolicy, WriteAction};
use flowgate_core::provider::{ProviderCall, ProviderError};
use flowgate_core::testing::workflow;

#[tokio::test]
async fn test_repromotion_is_idempotent() {
    let ctx = TestContext::new().await;
    ctx.source_provider
        .insert_workflow(workflow("1", "Orders", "https://api.example.com/v2"))
        .await;
    ctx.target_provider
        .insert_workflow(workflow("1", "Orders", "https://api.example.com/v1"))
        .await;

    let first = ctx.promotion(&[("1", ChangeType::Changed)]).await;
    let result = ctx.service.execute_promotion(&ctx.ctx, first.id).await.unwrap();
    assert_eq!(result.status, PromotionStatus::Completed);
    assert_eq!(result.promoted, 1);
    assert_eq!(result.outcomes[0].action, Some(WriteAction::Update));

    ctx.target_provider.clear_calls().await;
    let second = ctx.promotion(&[("1", ChangeType::Changed)]).await;
    let result = ctx.service.execute_promotion(&ctx.ctx, second.id).await.unwrap();
    assert_eq!(result.status, PromotionStatus::Completed);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.promoted, 0);
    assert_eq!(ctx.target_provider.write_count().await, 0);
}

#[tokio::test]
async fn test_new_workflow_matching_target_content_is_skipped() {
    let ctx = TestContext::new().await;
    ctx.source_provider
        .insert_workflow(workflow("1", "Orders", "https://a"))
        .await;
    // Same content under a different id in the target.
    ctx.target_provider
        .insert_workflow(workflow("77", "Orders", "https://a"))
        .await;

    let promotion = ctx.promotion(&[("1", ChangeType::New)]).await;
    let result = ctx.service.execute_promotion(&ctx.ctx, promotion.id).await.unwrap();
    assert_eq!(result.outcomes[0].status, OutcomeStatus::Skipped);
    assert_eq!(ctx.target_provider.write_count().await, 0);
}

#[tokio::test]
async fn test_stops_on_first_failure_and_rolls_back() {
    let ctx = TestContext::new().await;
    for id in ["1", "2", "3"] {
        ctx.source_provider
            .insert_workflow(workflow(id, &format!("wf {id}"), "https://new"))
            .await;
        ctx.target_provider
            .insert_workflow(workflow(id, &format!("wf {id}"), "https://old"))
            .await;
    }
    ctx.target_provider
        .fail_update_always("2", ProviderError::from_status(400, "invalid node"))
        .await;

    let promotion = ctx
        .promotion(&[
            ("1", ChangeType::Changed),
            ("2", ChangeType::Changed),
            ("3", ChangeType::Changed),
        ])
        .await;
    let result = ctx.service.execute_promotion(&ctx.ctx, promotion.id).await.unwrap();

    assert_eq!(result.status, PromotionStatus::FailedWithRollback);
    let statuses: Vec<_> = result.outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![
            OutcomeStatus::Promoted,
            OutcomeStatus::Failed,
            OutcomeStatus::NotAttempted
        ]
    );
    assert_eq!((result.promoted, result.failed, result.skipped), (1, 1, 0));

    // Workflow 3 was never touched.
    assert_eq!(
        ctx.source_provider
            .call_count(&ProviderCall::GetWorkflow("3".into()))
            .await,
        0
    );
    assert_eq!(
        ctx.target_provider
            .call_count(&ProviderCall::UpdateWorkflow("3".into()))
            .await,
        0
    );

    let rollback = result.rollback.expect("rollback result");
    assert!(rollback.rollback_triggered);
    assert_eq!(rollback.workflows_rolled_back, 1);
    assert!(rollback.rollback_errors.is_empty());
    assert_eq!(rollback.rollback_method, "git_restore");

    let restored = ctx.target_provider.workflow("1").await.unwrap();
    assert_eq!(restored["nodes"][1]["parameters"]["url"], "https://old");
    assert!(restored.get("_comment").is_none());

    let stored = ctx.stored(&promotion).await;
    assert_eq!(stored.status(), PromotionStatus::FailedWithRollback);
    assert!(stored.result.is_some());

    let actions = ctx.audit_actions().await;
    assert!(actions.contains(&"rollback".to_string()));
    assert_eq!(actions.last().map(String::as_str), Some("execute"));
}

#[tokio::test]
async fn test_missing_target_workflow_is_created() {
    let ctx = TestContext::new().await;
    ctx.source_provider
        .insert_workflow(workflow("1", "Orders", "https://a"))
        .await;

    let promotion = ctx.promotion(&[("1", ChangeType::Changed)]).await;
    let result = ctx.service.execute_promotion(&ctx.ctx, promotion.id).await.unwrap();

    assert_eq!(result.status, PromotionStatus::Completed);
    let outcome = &result.outcomes[0];
    assert_eq!(outcome.action, Some(WriteAction::Create));
    let created_id = outcome.target_workflow_id.clone().unwrap();
    assert_ne!(created_id, "1");
    assert!(ctx.target_provider.workflow(&created_id).await.is_some());
    assert_eq!(
        ctx.target_provider
            .call_count(&ProviderCall::CreateWorkflow("Orders".into()))
            .await,
        1
    );

    // The mapping routes the next promotion to the created workflow.
    let mapping = ctx
        .persistence
        .find_workflow_mapping(TENANT, ctx.source.id, "1", ctx.target.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mapping.target_workflow_id, created_id);

    ctx.target_provider.clear_calls().await;
    let again = ctx.promotion(&[("1", ChangeType::Changed)]).await;
    let result = ctx.service.execute_promotion(&ctx.ctx, again.id).await.unwrap();
    assert_eq!(result.skipped, 1);
    assert_eq!(ctx.target_provider.write_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_rollback_errors_retry_exactly_three_times() {
    let ctx = TestContext::with_retry(RetryPolicy::default()).await;
    ctx.target_provider
        .insert_workflow(workflow("1", "Orders", "https://old"))
        .await;

    // Capture the target, then simulate a promotion that changed workflow 1.
    let snapshots = flowgate_core::snapshots::SnapshotService::new(
        ctx.persistence.clone(),
        ctx.registry.clone(),
    );
    let snapshot = snapshots
        .create_snapshot(&ctx.ctx, &ctx.target, SnapshotType::PrePromotion, None)
        .await
        .unwrap();
    ctx.target_provider
        .fail_update_always("1", ProviderError::from_status(503, "unavailable"))
        .await;

    let started = tokio::time::Instant::now();
    let rollback = ctx
        .service
        .rollback_promotion(&ctx.ctx, ctx.target.id, snapshot.id, &["1".to_string()], None)
        .await;

    assert_eq!(rollback.workflows_rolled_back, 0);
    assert_eq!(rollback.rollback_errors.len(), 1);
    assert_eq!(
        ctx.target_provider
            .call_count(&ProviderCall::UpdateWorkflow("1".into()))
            .await,
        3
    );
    assert_eq!(
        ctx.target_provider
            .call_count(&ProviderCall::CreateWorkflow("Orders".into()))
            .await,
        0
    );
    // Backoff of 1s then 2s between the three attempts.
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_rollback_continues_past_a_workflow_that_exhausts_retries() {
    let ctx = TestContext::with_retry(RetryPolicy::default()).await;
    for id in ["1", "2", "3"] {
        ctx.target_provider
            .insert_workflow(workflow(id, &format!("wf {id}"), "https://old"))
            .await;
    }
    let snapshots = flowgate_core::snapshots::SnapshotService::new(
        ctx.persistence.clone(),
        ctx.registry.clone(),
    );
    let snapshot = snapshots
        .create_snapshot(&ctx.ctx, &ctx.target, SnapshotType::PrePromotion, None)
        .await
        .unwrap();

    // The promotion wrote all three before something else failed.
    for id in ["1", "2", "3"] {
        ctx.target_provider
            .insert_workflow(workflow(id, &format!("wf {id}"), "https://new"))
            .await;
    }
    ctx.target_provider
        .fail_update_always("2", ProviderError::from_status(502, "bad gateway"))
        .await;

    let promoted: Vec<String> = ["1", "2", "3"].iter().map(|s| s.to_string()).collect();
    let rollback = ctx
        .service
        .rollback_promotion(&ctx.ctx, ctx.target.id, snapshot.id, &promoted, None)
        .await;

    assert!(rollback.rollback_triggered);
    assert_eq!(rollback.workflows_rolled_back, 2);
    assert_eq!(rollback.rollback_errors.len(), 1);
    assert!(rollback.rollback_errors[0].contains("workflow 2"));
    assert_eq!(
        ctx.target_provider
            .call_count(&ProviderCall::UpdateWorkflow("2".into()))
            .await,
        3
    );
    for id in ["1", "3"] {
        let restored = ctx.target_provider.workflow(id).await.unwrap();
        assert_eq!(restored["nodes"][1]["parameters"]["url"], "https://old");
    }
    let unrestored = ctx.target_provider.workflow("2").await.unwrap();
    assert_eq!(unrestored["nodes"][1]["parameters"]["url"], "https://new");
}

#[tokio::test]
async fn test_rollback_without_commit_sha_skips_git() {
    let ctx = TestContext::new().await;
    // Empty target and empty repository: the pre-promotion snapshot has no commit.
    ctx.source_provider
        .insert_workflow(workflow("1", "Orders", "https://a"))
        .await;
    ctx.target_provider
        .fail_create_always("Orders", ProviderError::from_status(400, "rejected"))
        .await;

    let promotion = ctx.promotion(&[("1", ChangeType::New)]).await;
    let result = ctx.service.execute_promotion(&ctx.ctx, promotion.id).await.unwrap();

    assert_eq!(result.status, PromotionStatus::FailedWithRollback);
    let rollback = result.rollback.unwrap();
    assert_eq!(rollback.workflows_rolled_back, 0);
    assert_eq!(rollback.rollback_errors.len(), 1);
    assert_eq!(ctx.target_store.read_count(), 0);
}

#[tokio::test]
async fn test_target_without_git_never_writes() {
    let ctx = TestContext::new().await;
    let mut target = ctx.target.clone();
    target.git_repo_url = None;
    ctx.persistence.update_environment(&target).await.unwrap();
    ctx.source_provider
        .insert_workflow(workflow("1", "Orders", "https://a"))
        .await;

    let promotion = ctx.promotion(&[("1", ChangeType::New)]).await;
    let result = ctx.service.execute_promotion(&ctx.ctx, promotion.id).await.unwrap();

    assert_eq!(result.status, PromotionStatus::Failed);
    assert!(result.error.is_some());
    assert!(result.rollback.is_none());
    assert_eq!(result.outcomes[0].status, OutcomeStatus::NotAttempted);
    assert_eq!(ctx.target_provider.write_count().await, 0);
    assert_eq!(ctx.audit_actions().await.last().map(String::as_str), Some("execute"));
}

#[tokio::test]
async fn test_concurrent_promotion_into_same_target_conflicts() {
    let ctx = TestContext::new().await;
    ctx.source_provider
        .insert_workflow(workflow("1", "Orders", "https://a"))
        .await;
    let promotion = ctx.promotion(&[("1", ChangeType::New)]).await;

    let guard = ctx.locks.try_acquire(TENANT, ctx.target.id, Uuid::new_v4()).unwrap();
    let err = ctx
        .service
        .execute_promotion(&ctx.ctx, promotion.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(ctx.stored(&promotion).await.status(), PromotionStatus::Pending);

    drop(guard);
    let result = ctx.service.execute_promotion(&ctx.ctx, promotion.id).await.unwrap();
    assert_eq!(result.status, PromotionStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_final_status_write_is_retried() {
    let ctx = TestContext::new().await;
    ctx.source_provider
        .insert_workflow(workflow("1", "Orders", "https://a"))
        .await;
    let promotion = ctx.promotion(&[("1", ChangeType::New)]).await;

    ctx.persistence.fail_promotion_completions(1);
    let result = ctx.service.execute_promotion(&ctx.ctx, promotion.id).await.unwrap();
    assert_eq!(result.status, PromotionStatus::Completed);

    let stored = ctx.stored(&promotion).await;
    assert_eq!(stored.status(), PromotionStatus::Completed);
    assert!(stored.completed_at.is_some());

    // Not stuck in running: executing again is allowed.
    let again = ctx.service.execute_promotion(&ctx.ctx, promotion.id).await.unwrap();
    assert_eq!(again.status, PromotionStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_final_status_write_failure_is_reported() {
    let ctx = TestContext::new().await;
    ctx.source_provider
        .insert_workflow(workflow("1", "Orders", "https://a"))
        .await;
    let promotion = ctx.promotion(&[("1", ChangeType::New)]).await;

    ctx.persistence.fail_promotion_completions(3);
    let err = ctx
        .service
        .execute_promotion(&ctx.ctx, promotion.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Other(_)));
}

#[tokio::test]
async fn test_unknown_promotion_and_environment_are_not_found() {
    let ctx = TestContext::new().await;
    let err = ctx
        .service
        .execute_promotion(&ctx.ctx, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));

    let promotion = ctx.promotion(&[("1", ChangeType::New)]).await;
    ctx.persistence
        .deactivate_environment(TENANT, ctx.source.id)
        .await
        .unwrap();
    let err = ctx
        .service
        .execute_promotion(&ctx.ctx, promotion.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn test_completed_promotion_takes_post_snapshot() {
    let ctx = TestContext::new().await;
    ctx.source_provider
        .insert_workflow(workflow("1", "Orders", "https://a"))
        .await;
    let promotion = ctx.promotion(&[("1", ChangeType::New)]).await;
    ctx.service.execute_promotion(&ctx.ctx, promotion.id).await.unwrap();

    let mut types = Vec::new();
    for _ in 0..100 {
        let (snapshots, _) = ctx
            .persistence
            .list_snapshots(TENANT, ctx.target.id, &PageRequest::default())
            .await
            .unwrap();
        types = snapshots.into_iter().map(|s| s.snapshot_type).collect();
        if types.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    types.sort();
    assert_eq!(types, vec!["post_promotion", "pre_promotion"]);
}

#[tokio::test]
async fn test_other_tenant_cannot_execute() {
    let ctx = TestContext::new().await;
    let promotion = ctx.promotion(&[("1", ChangeType::New)]).await;
    let other = flowgate_core::audit::AuditContext::system("tenant-b");
    assert!(matches!(
        ctx.service.execute_promotion(&other, promotion.id).await,
        Err(Error::NotFound { .. })
    ));
}
