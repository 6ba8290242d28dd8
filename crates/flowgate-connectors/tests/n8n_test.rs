// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! n8n provider against a stubbed n8n API.

use std::time::Duration;

use flowgate_connectors::N8nProvider;
use flowgate_core::provider::{ProviderError, WorkflowProvider};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer) -> N8nProvider {
    N8nProvider::new(&server.uri(), "secret", Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_get_workflows_follows_cursor() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/workflows"))
        .and(query_param("cursor", "page-2"))
        .and(header("X-N8N-API-KEY", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "3", "name": "C"}],
            "nextCursor": null
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/workflows"))
        .and(query_param_is_missing("cursor"))
        .and(query_param("limit", "250"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "1", "name": "A"}, {"id": "2", "name": "B"}],
            "nextCursor": "page-2"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let workflows = provider(&mock_server).get_workflows().await.unwrap();
    let ids: Vec<_> = workflows.iter().map(|w| w["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_update_sends_only_writable_fields() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/v1/workflows/42"))
        .and(body_json(json!({
            "name": "Orders",
            "nodes": [],
            "connections": {},
            "settings": {"timezone": "UTC"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "42", "name": "Orders"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let updated = provider(&mock_server)
        .update_workflow(
            "42",
            &json!({
                "id": "7",
                "name": "Orders",
                "active": true,
                "nodes": [],
                "connections": {},
                "settings": {"timezone": "UTC"},
                "tags": []
            }),
        )
        .await
        .unwrap();
    assert_eq!(updated["id"], "42");
}

#[tokio::test]
async fn test_create_returns_assigned_id() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/workflows"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "99", "name": "New"})))
        .mount(&mock_server)
        .await;

    let created = provider(&mock_server)
        .create_workflow(&json!({"name": "New", "nodes": [], "connections": {}}))
        .await
        .unwrap();
    assert_eq!(created["id"], "99");
}

#[tokio::test]
async fn test_status_codes_are_classified() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/workflows/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/workflows/busy"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/workflows/bad"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "bad request"})))
        .mount(&mock_server)
        .await;

    let provider = provider(&mock_server);
    assert!(provider.get_workflow("missing").await.unwrap_err().is_not_found());

    let busy = provider.get_workflow("busy").await.unwrap_err();
    assert_eq!(
        busy,
        ProviderError::Transient {
            status: Some(503),
            message: "maintenance".into()
        }
    );

    let bad = provider.get_workflow("bad").await.unwrap_err();
    assert!(!bad.is_transient());
    assert!(!bad.is_not_found());
}

#[tokio::test]
async fn test_unreachable_server_is_transient() {
    let provider = N8nProvider::new("http://127.0.0.1:1", "secret", Duration::from_secs(2)).unwrap();
    let err = provider.get_workflow("1").await.unwrap_err();
    assert!(err.is_transient());
    assert!(!provider.test_connection().await);
}

#[tokio::test]
async fn test_executions_respect_limit() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/executions"))
        .and(query_param("limit", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": 1}, {"id": 2}, {"id": 3}],
            "nextCursor": "more"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let executions = provider(&mock_server).get_executions(3).await.unwrap();
    assert_eq!(executions.len(), 3);
}

#[tokio::test]
async fn test_credentials_with_numeric_ids() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": 5, "name": "Slack Prod", "type": "slackApi"}]
        })))
        .mount(&mock_server)
        .await;

    let credentials = provider(&mock_server).get_credentials().await.unwrap();
    assert_eq!(credentials.len(), 1);
    assert_eq!(credentials[0].id, "5");
    assert_eq!(credentials[0].credential_type, "slackApi");
}

#[tokio::test]
async fn test_connection_check() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/workflows"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&mock_server)
        .await;

    assert!(provider(&mock_server).test_connection().await);

    let elsewhere = N8nProvider::new(
        &format!("{}/other", mock_server.uri()),
        "secret",
        Duration::from_secs(5),
    )
    .unwrap();
    assert!(!elsewhere.test_connection().await);
}
