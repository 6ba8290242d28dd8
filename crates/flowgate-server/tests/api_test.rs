// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API tests over in-memory persistence and mock adapters.

mod common;

use axum::http::{Method, StatusCode};
use common::{TENANT, TestApp};
use flowgate_core::provider::ProviderCredential;
use flowgate_core::testing::workflow;
use serde_json::json;

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.anonymous(Method::GET, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_tenant_headers_are_rejected() {
    let app = TestApp::new();
    let (status, body) = app.anonymous(Method::GET, "/api/v1/environments").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_environment_lifecycle() {
    let app = TestApp::new();

    let (status, created) = app
        .request(
            Method::POST,
            "/api/v1/environments",
            Some(json!({
                "name": "Production",
                "environment_class": "prod",
                "base_url": "https://n8n.acme.io/",
                "api_key": "secret-key",
                "git_repo_url": "https://github.com/acme/workflows"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["environment_class"], "production");
    assert_eq!(created["base_url"], "https://n8n.acme.io");
    assert_eq!(created["git_branch"], "main");
    assert!(created.get("api_key").is_none());
    assert!(created.get("git_token").is_none());
    let id = created["id"].as_str().unwrap().to_string();

    let (status, updated) = app
        .request(
            Method::PATCH,
            &format!("/api/v1/environments/{id}"),
            Some(json!({"name": "Prod EU"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "Prod EU");

    let (status, page) = app.request(Method::GET, "/api/v1/environments", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["id"], id.as_str());

    let (status, _) = app
        .request(Method::DELETE, &format!("/api/v1/environments/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/environments/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");

    let actions: Vec<String> = app
        .persistence
        .audit_entries(TENANT)
        .await
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(actions, vec!["create", "update", "delete"]);
}

#[tokio::test]
async fn test_invalid_environment_class_is_a_validation_error() {
    let app = TestApp::new();
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/environments",
            Some(json!({
                "name": "QA",
                "environment_class": "qa",
                "base_url": "https://qa.acme.io",
                "api_key": "k"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_environments_are_tenant_scoped() {
    let app = TestApp::new();
    let other = app.seed_environment_for("tenant-b", "dev", false).await;

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/environments/{}", other.environment.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, page) = app.request(Method::GET, "/api/v1/environments", None).await;
    assert_eq!(page["total"], 0);
}

#[tokio::test]
async fn test_pagination_envelope() {
    let app = TestApp::new();
    for class in ["dev", "staging", "production"] {
        app.seed_environment(class, false).await;
    }

    let (status, page) = app
        .request(Method::GET, "/api/v1/environments?page=2&pageSize=2", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 3);
    assert_eq!(page["page"], 2);
    assert_eq!(page["pageSize"], 2);
    assert_eq!(page["totalPages"], 2);
    assert_eq!(page["hasMore"], false);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_page_far_past_the_end_is_empty() {
    let app = TestApp::new();
    app.seed_environment("dev", false).await;

    let (status, page) = app
        .request(
            Method::GET,
            &format!("/api/v1/environments?page={}&page_size=100", i64::MAX),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"].as_array().unwrap().len(), 0);
    assert_eq!(page["hasMore"], false);
}

#[tokio::test]
async fn test_connection_check_records_health() {
    let app = TestApp::new();
    let dev = app.seed_environment("dev", false).await;
    dev.provider.set_unreachable(true);

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/environments/{}/test-connection", dev.environment.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "SERVICE_UNAVAILABLE");

    let (_, environment) = app
        .request(
            Method::GET,
            &format!("/api/v1/environments/{}", dev.environment.id),
            None,
        )
        .await;
    assert_eq!(environment["is_healthy"], false);

    dev.provider.set_unreachable(false);
    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/environments/{}/test-connection", dev.environment.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], true);
}

#[tokio::test]
async fn test_promotion_create_and_execute() {
    let app = TestApp::new();
    let dev = app.seed_environment("dev", false).await;
    let prod = app.seed_environment("production", true).await;
    dev.provider
        .insert_workflow(workflow("1", "Orders", "https://api.example.com/v2"))
        .await;

    let (status, promotion) = app
        .request(
            Method::POST,
            "/api/v1/promotions",
            Some(json!({
                "source_environment_id": dev.environment.id,
                "target_environment_id": prod.environment.id,
                "workflow_selections": [
                    {"workflow_id": "1", "change_type": "new"}
                ]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(promotion["status"], "pending");
    let id = promotion["id"].as_str().unwrap().to_string();

    let (status, result) = app
        .request(Method::POST, &format!("/api/v1/promotions/{id}/execute"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["status"], "completed");
    assert_eq!(result["promoted"], 1);
    assert!(result["targetPreSnapshotId"].is_string());
    assert_eq!(prod.provider.workflow_count().await, 1);

    let (_, stored) = app
        .request(Method::GET, &format!("/api/v1/promotions/{id}"), None)
        .await;
    assert_eq!(stored["status"], "completed");

    // Re-running finds identical content in the target.
    let (status, rerun) = app
        .request(Method::POST, &format!("/api/v1/promotions/{id}/execute"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rerun["status"], "completed");
    assert_eq!(rerun["skipped"], 1);
    assert_eq!(rerun["targetPreSnapshotId"], result["targetPreSnapshotId"]);
}

#[tokio::test]
async fn test_promotion_into_same_environment_is_rejected() {
    let app = TestApp::new();
    let dev = app.seed_environment("dev", false).await;

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/promotions",
            Some(json!({
                "source_environment_id": dev.environment.id,
                "target_environment_id": dev.environment.id,
                "workflow_selections": [{"workflow_id": "1", "change_type": "new"}]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_promotion_is_not_found() {
    let app = TestApp::new();
    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/promotions/00000000-0000-0000-0000-000000000000",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");
    assert!(body["detail"].as_str().unwrap().contains("promotion"));
}

#[tokio::test]
async fn test_preflight_resolves_mapped_credentials() {
    let app = TestApp::new();
    let dev = app.seed_environment("dev", false).await;
    let prod = app.seed_environment("production", true).await;

    let mut notify = workflow("1", "Notify", "https://hooks.example.com");
    notify["nodes"][1]["credentials"] =
        json!({"slackApi": {"id": "dev-7", "name": "Team Slack"}});
    dev.provider.insert_workflow(notify).await;

    let preflight = json!({
        "source_environment_id": dev.environment.id,
        "target_environment_id": prod.environment.id,
        "workflow_ids": ["1"]
    });
    let (status, report) = app
        .request(Method::POST, "/api/v1/promotions/preflight", Some(preflight.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["canPromote"], false);
    assert_eq!(report["blockingIssues"][0]["code"], "missing_credential");

    prod.provider
        .set_credentials(vec![ProviderCredential {
            id: "prod-3".to_string(),
            name: "Slack (prod)".to_string(),
            credential_type: "slackApi".to_string(),
        }])
        .await;
    let (status, logical) = app
        .request(
            Method::POST,
            "/api/v1/credentials/logical",
            Some(json!({"name": "slackApi:Team Slack", "required_type": "slackApi"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/credentials/mappings",
            Some(json!({
                "logical_credential_id": logical["id"],
                "environment_id": prod.environment.id,
                "physical_credential_id": "prod-3"
            })),
        )
        .await;
    assert!(status.is_success());

    let (_, report) = app
        .request(Method::POST, "/api/v1/promotions/preflight", Some(preflight))
        .await;
    assert_eq!(report["canPromote"], true);
    assert_eq!(report["blockingIssues"].as_array().unwrap().len(), 0);

    let (_, mappings) = app
        .request(
            Method::GET,
            &format!("/api/v1/credentials/mappings?environment_id={}", prod.environment.id),
            None,
        )
        .await;
    assert_eq!(mappings.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_manual_snapshot_requires_git() {
    let app = TestApp::new();
    let dev = app.seed_environment("dev", false).await;
    let prod = app.seed_environment("production", true).await;
    prod.provider
        .insert_workflow(workflow("9", "Billing", "https://billing.example.com"))
        .await;

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/api/v1/environments/{}/snapshots", dev.environment.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, snapshot) = app
        .request(
            Method::POST,
            &format!("/api/v1/environments/{}/snapshots", prod.environment.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, fetched) = app
        .request(
            Method::GET,
            &format!("/api/v1/snapshots/{}", snapshot["id"].as_str().unwrap()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], snapshot["id"]);
    assert_eq!(fetched["workflow_count"], 1);
    assert!(prod.store.commit_count().await >= 1);
}

#[tokio::test]
async fn test_audit_logs_and_overview() {
    let app = TestApp::new();
    app.seed_environment("dev", false).await;
    app.request(
        Method::POST,
        "/api/v1/credentials/logical",
        Some(json!({"name": "stripe"})),
    )
    .await;

    let (status, logs) = app.request(Method::GET, "/api/v1/audit-logs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["total"], 1);
    assert_eq!(logs["items"][0]["resource_type"], "logical_credential");
    assert_eq!(logs["items"][0]["actor_id"], "user-1");

    let (status, overview) = app
        .request(Method::GET, "/api/v1/observability/overview", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(overview.is_object());
}
