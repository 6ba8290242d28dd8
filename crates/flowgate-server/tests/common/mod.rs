// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for flowgate-server API tests.
//!
//! Builds the router over in-memory persistence and mock adapters and sends
//! requests through it with `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use flowgate_core::git_store::MockSnapshotStore;
use flowgate_core::models::Environment;
use flowgate_core::persistence::{MemoryPersistence, Persistence};
use flowgate_core::provider::MockProvider;
use flowgate_core::registry::StaticAdapterRegistry;
use flowgate_core::testing::environment;
use flowgate_server::billing::{SIGNATURE_HEADER, sign_payload};
use flowgate_server::{AppState, StateSettings, create_router};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

pub const TENANT: &str = "tenant-a";
pub const USER: &str = "user-1";
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Router plus handles on the state behind it.
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub persistence: Arc<MemoryPersistence>,
    pub registry: Arc<StaticAdapterRegistry>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_settings(StateSettings {
            stripe_webhook_secret: Some(WEBHOOK_SECRET.to_string()),
            ..Default::default()
        })
    }

    pub fn with_settings(settings: StateSettings) -> Self {
        let persistence = Arc::new(MemoryPersistence::new());
        let registry = Arc::new(StaticAdapterRegistry::new());
        let state = Arc::new(AppState::new(
            persistence.clone(),
            registry.clone(),
            settings,
        ));
        Self {
            router: create_router(state.clone()),
            state,
            persistence,
            registry,
        }
    }

    /// Insert an environment of `TENANT` backed by a fresh mock provider.
    pub async fn seed_environment(&self, class: &str, with_git: bool) -> SeededEnvironment {
        self.seed_environment_for(TENANT, class, with_git).await
    }

    pub async fn seed_environment_for(
        &self,
        tenant_id: &str,
        class: &str,
        with_git: bool,
    ) -> SeededEnvironment {
        let environment = environment(tenant_id, class, with_git);
        self.persistence
            .insert_environment(&environment)
            .await
            .unwrap();

        let provider = Arc::new(MockProvider::new());
        self.registry
            .register_provider(environment.id, provider.clone());
        let store = Arc::new(MockSnapshotStore::new());
        if with_git {
            self.registry.register_store(environment.id, store.clone());
        }

        SeededEnvironment {
            environment,
            provider,
            store,
        }
    }

    /// Request as `USER` of `TENANT`.
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.request_as(TENANT, method, uri, body).await
    }

    pub async fn request_as(
        &self,
        tenant_id: &str,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-tenant-id", tenant_id)
            .header("x-user-id", USER)
            .header("x-user-email", "dev@acme.io");
        self.send(builder, body).await
    }

    /// Request without tenant headers.
    pub async fn anonymous(&self, method: Method, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().method(method).uri(uri), None)
            .await
    }

    /// POST a webhook event with a valid signature.
    pub async fn signed_webhook(&self, event: &Value) -> (StatusCode, Value) {
        let payload = serde_json::to_vec(event).unwrap();
        let now = chrono::Utc::now().timestamp();
        let signature = sign_payload(&payload, WEBHOOK_SECRET, now).unwrap();
        self.webhook(payload, Some(&signature)).await
    }

    pub async fn webhook(&self, payload: Vec<u8>, signature: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/billing/webhook")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        let request = builder.body(Body::from(payload)).unwrap();
        into_parts(self.router.clone().oneshot(request).await.unwrap()).await
    }

    async fn send(
        &self,
        builder: axum::http::request::Builder,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        into_parts(self.router.clone().oneshot(request).await.unwrap()).await
    }
}

/// Seeded environment with its mock adapters.
pub struct SeededEnvironment {
    pub environment: Environment,
    pub provider: Arc<MockProvider>,
    pub store: Arc<MockSnapshotStore>,
}

async fn into_parts(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}
