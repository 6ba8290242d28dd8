// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! n8n public REST API client.
//!
//! Talks to `{base_url}/api/v1` with the `X-N8N-API-KEY` header. List
//! endpoints are cursor-paginated: each page carries `data` and an optional
//! `nextCursor`.

use std::time::Duration;

use async_trait::async_trait;
use flowgate_core::provider::{ProviderCredential, ProviderError, WorkflowProvider};
use reqwest::{Method, RequestBuilder};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};
use url::Url;

use crate::ConnectorError;

/// Header carrying the n8n API key.
pub const API_KEY_HEADER: &str = "X-N8N-API-KEY";

/// Largest page the n8n API serves.
pub const MAX_PAGE_LIMIT: usize = 250;

/// Fields n8n accepts on workflow create and update.
const WRITABLE_FIELDS: [&str; 4] = ["name", "nodes", "connections", "settings"];

/// [`WorkflowProvider`] backed by an n8n instance.
#[derive(Debug, Clone)]
pub struct N8nProvider {
    client: reqwest::Client,
    api_base: Url,
    api_key: String,
}

impl N8nProvider {
    /// Create a client for the n8n instance at `base_url`.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, ConnectorError> {
        let mut api_base = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| ConnectorError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !matches!(api_base.scheme(), "http" | "https") {
            return Err(ConnectorError::InvalidUrl(format!(
                "{base_url}: unsupported scheme"
            )));
        }
        let path = format!("{}/api/v1/", api_base.path().trim_end_matches('/'));
        api_base.set_path(&path);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::Client(e.to_string()))?;

        Ok(Self {
            client,
            api_base,
            api_key: api_key.to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ProviderError> {
        let url = self
            .api_base
            .join(path)
            .map_err(|e| ProviderError::Other(format!("invalid path {path}: {e}")))?;
        Ok(self
            .client
            .request(method, url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("Accept", "application/json"))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, ProviderError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), error_message(&body)));
        }
        let text = response.text().await.map_err(transport_error)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ProviderError::Other(format!("invalid JSON response: {e}")))
    }

    /// Follow `nextCursor` until exhausted or `max_items` is reached.
    async fn list_paginated(
        &self,
        path: &str,
        max_items: Option<usize>,
    ) -> Result<Vec<Value>, ProviderError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let remaining = max_items.map(|max| max.saturating_sub(items.len()));
            let limit = remaining.unwrap_or(MAX_PAGE_LIMIT).min(MAX_PAGE_LIMIT);
            if limit == 0 {
                break;
            }

            let mut query = vec![("limit", limit.to_string())];
            if let Some(cursor) = &cursor {
                query.push(("cursor", cursor.clone()));
            }
            let page = self
                .send(self.request(Method::GET, path)?.query(&query))
                .await?;

            let (data, next) = match page {
                Value::Object(mut map) => {
                    let data = match map.remove("data") {
                        Some(Value::Array(data)) => data,
                        _ => Vec::new(),
                    };
                    let next = map
                        .get("nextCursor")
                        .and_then(Value::as_str)
                        .filter(|c| !c.is_empty())
                        .map(str::to_string);
                    (data, next)
                }
                // Older endpoints return a bare array.
                Value::Array(data) => (data, None),
                _ => (Vec::new(), None),
            };
            let fetched = data.len();
            items.extend(data);
            debug!(path, fetched, total = items.len(), "Fetched n8n page");

            cursor = next;
            if cursor.is_none() || fetched == 0 {
                break;
            }
        }

        if let Some(max) = max_items {
            items.truncate(max);
        }
        Ok(items)
    }
}

#[async_trait]
impl WorkflowProvider for N8nProvider {
    fn provider_type(&self) -> &'static str {
        "n8n"
    }

    async fn test_connection(&self) -> bool {
        let request = match self.request(Method::GET, "workflows") {
            Ok(request) => request.query(&[("limit", "1")]),
            Err(_) => return false,
        };
        match self.send(request).await {
            Ok(_) => true,
            Err(e) => {
                warn!(base_url = %self.api_base, error = %e, "n8n connection test failed");
                false
            }
        }
    }

    async fn get_workflows(&self) -> Result<Vec<Value>, ProviderError> {
        self.list_paginated("workflows", None).await
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<Value, ProviderError> {
        let path = format!("workflows/{}", urlencoding::encode(workflow_id));
        self.send(self.request(Method::GET, &path)?).await
    }

    async fn update_workflow(
        &self,
        workflow_id: &str,
        data: &Value,
    ) -> Result<Value, ProviderError> {
        let path = format!("workflows/{}", urlencoding::encode(workflow_id));
        let body = writable_body(data);
        self.send(self.request(Method::PUT, &path)?.json(&body))
            .await
    }

    async fn create_workflow(&self, data: &Value) -> Result<Value, ProviderError> {
        let body = writable_body(data);
        self.send(self.request(Method::POST, "workflows")?.json(&body))
            .await
    }

    async fn get_credentials(&self) -> Result<Vec<ProviderCredential>, ProviderError> {
        self.list_paginated("credentials", None)
            .await?
            .into_iter()
            .map(|c| {
                serde_json::from_value(normalize_id(c))
                    .map_err(|e| ProviderError::Other(format!("invalid credential: {e}")))
            })
            .collect()
    }

    async fn get_executions(&self, limit: usize) -> Result<Vec<Value>, ProviderError> {
        self.list_paginated("executions", Some(limit)).await
    }

    async fn get_users(&self) -> Result<Vec<Value>, ProviderError> {
        self.list_paginated("users", None).await
    }

    async fn get_tags(&self) -> Result<Vec<Value>, ProviderError> {
        self.list_paginated("tags", None).await
    }
}

/// Workflow body reduced to the fields n8n accepts on write.
///
/// n8n rejects read-only fields such as `id`, `active`, or `tags` with 400.
pub fn writable_body(data: &Value) -> Value {
    let mut body = Map::new();
    for field in WRITABLE_FIELDS {
        if let Some(value) = data.get(field) {
            body.insert(field.to_string(), value.clone());
        }
    }
    body.entry("settings").or_insert_with(|| json!({}));
    Value::Object(body)
}

fn normalize_id(mut value: Value) -> Value {
    if let Some(Value::Number(id)) = value.get("id") {
        let id = id.to_string();
        value["id"] = Value::String(id);
    }
    value
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ProviderError::Transient {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    } else {
        ProviderError::Other(e.to_string())
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(500).collect())
}
