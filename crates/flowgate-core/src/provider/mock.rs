// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory provider for testing.
//!
//! Stores workflows in a map, records every call, and can be scripted to
//! fail specific operations.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;

use super::{ProviderCredential, ProviderError, WorkflowProvider, workflow_id_of, workflow_name_of};

/// A call observed by [`MockProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    /// `get_workflows`.
    GetWorkflows,
    /// `get_workflow(id)`.
    GetWorkflow(String),
    /// `update_workflow(id, _)`.
    UpdateWorkflow(String),
    /// `create_workflow(_)`, recorded by workflow name.
    CreateWorkflow(String),
    /// `get_credentials`.
    GetCredentials,
    /// `get_executions`.
    GetExecutions,
}

#[derive(Default)]
struct MockState {
    workflows: HashMap<String, Value>,
    credentials: Vec<ProviderCredential>,
    executions: Vec<Value>,
    calls: Vec<ProviderCall>,
    /// Failures returned by the next N updates of a workflow.
    update_failures: HashMap<String, VecDeque<ProviderError>>,
    /// Failure returned by every update of a workflow.
    update_always_fails: HashMap<String, ProviderError>,
    /// Failure returned by every create of a workflow name.
    create_always_fails: HashMap<String, ProviderError>,
    /// Failure returned by every read of a workflow.
    get_always_fails: HashMap<String, ProviderError>,
}

/// Mock provider for testing.
pub struct MockProvider {
    state: Mutex<MockState>,
    next_id: AtomicU64,
    unreachable: AtomicBool,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create an empty mock provider.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            next_id: AtomicU64::new(1000),
            unreachable: AtomicBool::new(false),
        }
    }

    /// Create a provider that already holds the given workflows.
    pub async fn with_workflows(workflows: impl IntoIterator<Item = Value>) -> Self {
        let provider = Self::new();
        for wf in workflows {
            provider.insert_workflow(wf).await;
        }
        provider
    }

    /// Insert or replace a workflow, keyed by its `id`.
    pub async fn insert_workflow(&self, workflow: Value) {
        let id = workflow_id_of(&workflow).unwrap_or_else(|| self.allocate_id());
        let mut workflow = workflow;
        workflow["id"] = Value::String(id.clone());
        self.state.lock().await.workflows.insert(id, workflow);
    }

    /// Replace the credential list.
    pub async fn set_credentials(&self, credentials: Vec<ProviderCredential>) {
        self.state.lock().await.credentials = credentials;
    }

    /// Replace the execution list.
    pub async fn set_executions(&self, executions: Vec<Value>) {
        self.state.lock().await.executions = executions;
    }

    /// Make every call fail as if the server were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Fail the next `times` updates of `workflow_id` with `error`.
    pub async fn fail_update_times(&self, workflow_id: &str, times: usize, error: ProviderError) {
        let mut state = self.state.lock().await;
        let queue = state
            .update_failures
            .entry(workflow_id.to_string())
            .or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Fail every update of `workflow_id` with `error`.
    pub async fn fail_update_always(&self, workflow_id: &str, error: ProviderError) {
        self.state
            .lock()
            .await
            .update_always_fails
            .insert(workflow_id.to_string(), error);
    }

    /// Fail every create of a workflow named `name` with `error`.
    pub async fn fail_create_always(&self, name: &str, error: ProviderError) {
        self.state
            .lock()
            .await
            .create_always_fails
            .insert(name.to_string(), error);
    }

    /// Fail every read of `workflow_id` with `error`.
    pub async fn fail_get_always(&self, workflow_id: &str, error: ProviderError) {
        self.state
            .lock()
            .await
            .get_always_fails
            .insert(workflow_id.to_string(), error);
    }

    /// Remove a workflow, as if it were deleted on the server.
    pub async fn remove_workflow(&self, workflow_id: &str) {
        self.state.lock().await.workflows.remove(workflow_id);
    }

    /// Current copy of a workflow.
    pub async fn workflow(&self, workflow_id: &str) -> Option<Value> {
        self.state.lock().await.workflows.get(workflow_id).cloned()
    }

    /// Number of stored workflows.
    pub async fn workflow_count(&self) -> usize {
        self.state.lock().await.workflows.len()
    }

    /// All calls observed so far.
    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.state.lock().await.calls.clone()
    }

    /// Number of observed calls matching `call`.
    pub async fn call_count(&self, call: &ProviderCall) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| *c == call)
            .count()
    }

    /// Number of write calls (updates and creates).
    pub async fn write_count(&self) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    ProviderCall::UpdateWorkflow(_) | ProviderCall::CreateWorkflow(_)
                )
            })
            .count()
    }

    /// Forget recorded calls.
    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    fn allocate_id(&self) -> String {
        format!("wf-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn check_reachable(&self) -> Result<(), ProviderError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient {
                status: None,
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowProvider for MockProvider {
    fn provider_type(&self) -> &'static str {
        "mock"
    }

    async fn test_connection(&self) -> bool {
        !self.unreachable.load(Ordering::SeqCst)
    }

    async fn get_workflows(&self) -> Result<Vec<Value>, ProviderError> {
        let mut state = self.state.lock().await;
        state.calls.push(ProviderCall::GetWorkflows);
        self.check_reachable()?;
        let mut workflows: Vec<Value> = state.workflows.values().cloned().collect();
        workflows.sort_by_key(|wf| workflow_id_of(wf).unwrap_or_default());
        Ok(workflows)
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<Value, ProviderError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(ProviderCall::GetWorkflow(workflow_id.to_string()));
        self.check_reachable()?;
        if let Some(err) = state.get_always_fails.get(workflow_id) {
            return Err(err.clone());
        }
        state
            .workflows
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("workflow {workflow_id}")))
    }

    async fn update_workflow(
        &self,
        workflow_id: &str,
        data: &Value,
    ) -> Result<Value, ProviderError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(ProviderCall::UpdateWorkflow(workflow_id.to_string()));
        self.check_reachable()?;

        if let Some(err) = state
            .update_failures
            .get_mut(workflow_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        if let Some(err) = state.update_always_fails.get(workflow_id) {
            return Err(err.clone());
        }
        if !state.workflows.contains_key(workflow_id) {
            return Err(ProviderError::NotFound(format!("workflow {workflow_id}")));
        }

        let mut stored = data.clone();
        stored["id"] = Value::String(workflow_id.to_string());
        state
            .workflows
            .insert(workflow_id.to_string(), stored.clone());
        Ok(stored)
    }

    async fn create_workflow(&self, data: &Value) -> Result<Value, ProviderError> {
        let name = workflow_name_of(data);
        let mut state = self.state.lock().await;
        state.calls.push(ProviderCall::CreateWorkflow(name.clone()));
        self.check_reachable()?;
        if let Some(err) = state.create_always_fails.get(&name) {
            return Err(err.clone());
        }

        let id = self.allocate_id();
        let mut stored = data.clone();
        stored["id"] = Value::String(id.clone());
        state.workflows.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_credentials(&self) -> Result<Vec<ProviderCredential>, ProviderError> {
        let mut state = self.state.lock().await;
        state.calls.push(ProviderCall::GetCredentials);
        self.check_reachable()?;
        Ok(state.credentials.clone())
    }

    async fn get_executions(&self, limit: usize) -> Result<Vec<Value>, ProviderError> {
        let mut state = self.state.lock().await;
        state.calls.push(ProviderCall::GetExecutions);
        self.check_reachable()?;
        Ok(state.executions.iter().take(limit).cloned().collect())
    }

    async fn get_users(&self) -> Result<Vec<Value>, ProviderError> {
        self.check_reachable()?;
        Ok(Vec::new())
    }

    async fn get_tags(&self) -> Result<Vec<Value>, ProviderError> {
        self.check_reachable()?;
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_update_failures_are_consumed_in_order() {
        let provider = MockProvider::with_workflows([json!({"id": "a", "name": "A"})]).await;
        provider
            .fail_update_times(
                "a",
                1,
                ProviderError::Transient {
                    status: Some(502),
                    message: "bad gateway".into(),
                },
            )
            .await;

        assert!(provider.update_workflow("a", &json!({"name": "A"})).await.is_err());
        assert!(provider.update_workflow("a", &json!({"name": "A2"})).await.is_ok());
        assert_eq!(provider.workflow("a").await.unwrap()["name"], "A2");
        assert_eq!(
            provider
                .call_count(&ProviderCall::UpdateWorkflow("a".into()))
                .await,
            2
        );
    }

    #[tokio::test]
    async fn test_update_of_missing_workflow_is_not_found() {
        let provider = MockProvider::new();
        let err = provider
            .update_workflow("missing", &json!({"name": "x"}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_assigns_new_id() {
        let provider = MockProvider::new();
        let created = provider
            .create_workflow(&json!({"id": "src-1", "name": "Copy"}))
            .await
            .unwrap();
        let id = workflow_id_of(&created).unwrap();
        assert_ne!(id, "src-1");
        assert!(provider.workflow(&id).await.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_provider() {
        let provider = MockProvider::new();
        provider.set_unreachable(true);
        assert!(!provider.test_connection().await);
        assert!(provider.get_workflows().await.unwrap_err().is_transient());
    }
}
