// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditContext, AuditEvent, AuditLogger};
use crate::error::{Error, Result};
use crate::models::{Environment, EnvironmentClass, WorkflowRecord};
use crate::pagination::{Page, PageRequest};
use crate::persistence::Persistence;
use crate::registry::AdapterRegistry;

/// Branch used when a repository is configured without one.
pub const DEFAULT_GIT_BRANCH: &str = "main";

/// Request to register an environment.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateEnvironment {
    pub name: String,
    pub environment_class: String,
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub git_repo_url: Option<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub git_token: Option<String>,
    #[serde(default)]
    pub git_folder: Option<String>,
}

/// Partial update of an environment. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEnvironment {
    pub name: Option<String>,
    pub environment_class: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub git_repo_url: Option<String>,
    pub git_branch: Option<String>,
    pub git_token: Option<String>,
    pub git_folder: Option<String>,
}

/// Result of a connection test.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub environment_id: Uuid,
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
}

/// CRUD and connectivity for environments.
#[derive(Clone)]
pub struct EnvironmentService {
    persistence: Arc<dyn Persistence>,
    registry: Arc<dyn AdapterRegistry>,
    audit: AuditLogger,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_class(class: &str) -> Result<EnvironmentClass> {
    EnvironmentClass::parse(class).ok_or_else(|| {
        Error::Validation(format!(
            "environment_class must be one of dev, staging, production (got '{class}')"
        ))
    })
}

fn validate_base_url(url: &str) -> Result<String> {
    let url = url.trim().trim_end_matches('/');
    if !(url.starts_with("http://") || url.starts_with("https://")) || url.len() <= "https://".len()
    {
        return Err(Error::Validation(format!(
            "base_url must be an http(s) URL (got '{url}')"
        )));
    }
    Ok(url.to_string())
}

fn validate_required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

impl EnvironmentService {
    /// Create an environment service.
    pub fn new(persistence: Arc<dyn Persistence>, registry: Arc<dyn AdapterRegistry>) -> Self {
        let audit = AuditLogger::new(persistence.clone());
        Self {
            persistence,
            registry,
            audit,
        }
    }

    /// Register an environment.
    pub async fn create(&self, ctx: &AuditContext, input: CreateEnvironment) -> Result<Environment> {
        let class = validate_class(&input.environment_class)?;
        let git_repo_url = non_empty(input.git_repo_url);
        let git_branch = match (&git_repo_url, non_empty(input.git_branch)) {
            (Some(_), None) => Some(DEFAULT_GIT_BRANCH.to_string()),
            (_, branch) => branch,
        };
        let now = Utc::now();

        let environment = Environment {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id.clone(),
            name: validate_required("name", &input.name)?,
            environment_class: class.as_str().to_string(),
            base_url: validate_base_url(&input.base_url)?,
            api_key: validate_required("api_key", &input.api_key)?,
            git_repo_url,
            git_branch,
            git_token: non_empty(input.git_token),
            git_folder: non_empty(input.git_folder),
            is_active: true,
            is_read_only: false,
            is_healthy: None,
            last_connected_at: None,
            last_sync_at: None,
            deletion_scheduled_at: None,
            created_at: now,
            updated_at: now,
        };
        self.persistence.insert_environment(&environment).await?;

        info!(
            tenant_id = %environment.tenant_id,
            environment_id = %environment.id,
            environment_class = %environment.environment_class,
            "Environment created"
        );
        self.audit
            .record(
                ctx,
                AuditEvent::new(AuditAction::Create, "environment", environment.id)
                    .new_value(json!(environment)),
            )
            .await;

        Ok(environment)
    }

    /// Active environment by id.
    pub async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Environment> {
        self.persistence
            .get_environment(tenant_id, id)
            .await?
            .filter(|env| env.is_active)
            .ok_or_else(|| Error::not_found("environment", id))
    }

    /// Active environments, by name.
    pub async fn list(&self, tenant_id: &str, page: PageRequest) -> Result<Page<Environment>> {
        let (items, total) = self.persistence.list_environments(tenant_id, &page).await?;
        Ok(Page::new(items, total, page))
    }

    /// Apply a partial update.
    pub async fn update(
        &self,
        ctx: &AuditContext,
        id: Uuid,
        patch: UpdateEnvironment,
    ) -> Result<Environment> {
        let existing = self.get(&ctx.tenant_id, id).await?;
        let mut updated = existing.clone();

        if let Some(name) = patch.name {
            updated.name = validate_required("name", &name)?;
        }
        if let Some(class) = patch.environment_class {
            updated.environment_class = validate_class(&class)?.as_str().to_string();
        }
        if let Some(url) = patch.base_url {
            updated.base_url = validate_base_url(&url)?;
        }
        if let Some(key) = patch.api_key {
            updated.api_key = validate_required("api_key", &key)?;
        }
        if let Some(repo) = patch.git_repo_url {
            updated.git_repo_url = non_empty(Some(repo));
        }
        if let Some(branch) = patch.git_branch {
            updated.git_branch = non_empty(Some(branch));
        }
        if updated.git_repo_url.is_some() && updated.git_branch.is_none() {
            updated.git_branch = Some(DEFAULT_GIT_BRANCH.to_string());
        }
        if let Some(token) = patch.git_token {
            updated.git_token = non_empty(Some(token));
        }
        if let Some(folder) = patch.git_folder {
            updated.git_folder = non_empty(Some(folder));
        }
        updated.updated_at = Utc::now();

        self.persistence.update_environment(&updated).await?;
        self.audit
            .record(
                ctx,
                AuditEvent::new(AuditAction::Update, "environment", id)
                    .old_value(json!(existing))
                    .new_value(json!(updated)),
            )
            .await;

        Ok(updated)
    }

    /// Soft-delete an environment.
    pub async fn delete(&self, ctx: &AuditContext, id: Uuid) -> Result<()> {
        let existing = self.get(&ctx.tenant_id, id).await?;
        if !self.persistence.deactivate_environment(&ctx.tenant_id, id).await? {
            return Err(Error::not_found("environment", id));
        }
        info!(tenant_id = %ctx.tenant_id, environment_id = %id, "Environment deactivated");
        self.audit
            .record(
                ctx,
                AuditEvent::new(AuditAction::Delete, "environment", id).old_value(json!(existing)),
            )
            .await;
        Ok(())
    }

    /// Check that the provider is reachable and record the result.
    ///
    /// An unreachable provider yields [`Error::Unavailable`].
    pub async fn test_connection(&self, tenant_id: &str, id: Uuid) -> Result<ConnectionStatus> {
        let environment = self.get(tenant_id, id).await?;
        let provider = self.registry.provider(&environment)?;
        let healthy = provider.test_connection().await;
        let checked_at = Utc::now();
        self.persistence
            .update_environment_health(tenant_id, id, healthy, checked_at)
            .await?;

        if !healthy {
            return Err(Error::Unavailable(format!(
                "environment '{}' is unreachable at {}",
                environment.name, environment.base_url
            )));
        }
        Ok(ConnectionStatus {
            environment_id: id,
            healthy,
            checked_at,
        })
    }

    /// Cached workflows of an environment.
    pub async fn list_workflows(
        &self,
        tenant_id: &str,
        id: Uuid,
        page: PageRequest,
    ) -> Result<Page<WorkflowRecord>> {
        self.get(tenant_id, id).await?;
        let (items, total) = self.persistence.list_workflows(tenant_id, id, &page).await?;
        Ok(Page::new(items, total, page))
    }
}
