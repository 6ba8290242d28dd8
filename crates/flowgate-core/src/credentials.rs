// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Logical credentials, per-environment mappings, and promotion preflight.
//!
//! Workflows reference provider credentials by type and name. A logical
//! credential names a requirement once per tenant; a mapping points it at the
//! concrete credential of one environment. Preflight checks that every
//! credential used by the selected workflows will resolve in the target.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditContext, AuditEvent, AuditLogger};
use crate::error::{Error, Result};
use crate::models::{CredentialMapping, Environment, LogicalCredential};
use crate::persistence::Persistence;
use crate::provider::ProviderCredential;
use crate::registry::AdapterRegistry;

// ============================================================================
// Credential references
// ============================================================================

/// A credential referenced by workflow nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRef {
    pub credential_type: String,
    pub name: String,
    /// Workflows that use the credential.
    pub workflow_ids: Vec<String>,
}

impl CredentialRef {
    /// `type:name` key, also accepted as a logical credential name.
    pub fn key(&self) -> String {
        format!("{}:{}", self.credential_type, self.name)
    }
}

/// Collect the distinct credentials used by `workflows`, ordered by key.
///
/// Each node carries `credentials: { <type>: { id, name } }`.
pub fn collect_credential_refs<'a>(
    workflows: impl IntoIterator<Item = (&'a str, &'a Value)>,
) -> Vec<CredentialRef> {
    let mut refs: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
    for (workflow_id, workflow) in workflows {
        let Some(nodes) = workflow.get("nodes").and_then(Value::as_array) else {
            continue;
        };
        for credentials in nodes
            .iter()
            .filter_map(|node| node.get("credentials").and_then(Value::as_object))
        {
            for (credential_type, reference) in credentials {
                let name = match reference {
                    Value::Object(obj) => obj.get("name").and_then(Value::as_str),
                    Value::String(name) => Some(name.as_str()),
                    _ => None,
                };
                let Some(name) = name else { continue };
                let users = refs
                    .entry((credential_type.clone(), name.to_string()))
                    .or_default();
                if !users.iter().any(|id| id == workflow_id) {
                    users.push(workflow_id.to_string());
                }
            }
        }
    }
    refs.into_iter()
        .map(|((credential_type, name), workflow_ids)| CredentialRef {
            credential_type,
            name,
            workflow_ids,
        })
        .collect()
}

// ============================================================================
// Preflight evaluation
// ============================================================================

/// Classification of a preflight finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    /// No mapping, but the target has a credential with the same name and type.
    ResolvedByName,
    /// A mapping exists but its target credential is gone.
    MappingStale,
    /// Nothing in the target satisfies the reference.
    MissingCredential,
    /// Target credentials could not be listed.
    TargetUnreachable,
}

impl IssueCode {
    /// Whether the issue prevents the promotion.
    pub fn is_blocking(&self) -> bool {
        !matches!(self, Self::ResolvedByName)
    }
}

/// One preflight finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialIssue {
    pub code: IssueCode,
    pub credential_type: Option<String>,
    pub credential_name: Option<String>,
    pub workflow_ids: Vec<String>,
    pub message: String,
}

/// Outcome of a preflight check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightReport {
    pub can_promote: bool,
    pub blocking_issues: Vec<CredentialIssue>,
    pub warnings: Vec<CredentialIssue>,
}

impl PreflightReport {
    fn push(&mut self, issue: CredentialIssue) {
        if issue.code.is_blocking() {
            self.blocking_issues.push(issue);
        } else {
            self.warnings.push(issue);
        }
    }

    fn finish(mut self) -> Self {
        self.can_promote = self.blocking_issues.is_empty();
        self
    }

    /// Report for a target whose credentials could not be listed.
    pub fn target_unreachable(message: impl Into<String>) -> Self {
        let mut report = Self::default();
        report.push(CredentialIssue {
            code: IssueCode::TargetUnreachable,
            credential_type: None,
            credential_name: None,
            workflow_ids: Vec::new(),
            message: message.into(),
        });
        report.finish()
    }
}

fn logical_matches(logical: &LogicalCredential, reference: &CredentialRef) -> bool {
    (logical.name == reference.name || logical.name == reference.key())
        && logical
            .required_type
            .as_deref()
            .is_none_or(|t| t == reference.credential_type)
}

/// Check `refs` against the target's mappings and credentials.
///
/// `target_mappings` must hold only the mappings of the target environment.
pub fn evaluate_credentials(
    refs: &[CredentialRef],
    logical: &[LogicalCredential],
    target_mappings: &[CredentialMapping],
    target_credentials: &[ProviderCredential],
) -> PreflightReport {
    let mut report = PreflightReport::default();

    for reference in refs {
        let mapping = logical
            .iter()
            .filter(|l| logical_matches(l, reference))
            .find_map(|l| {
                target_mappings
                    .iter()
                    .find(|m| m.logical_credential_id == l.id)
            });

        if let Some(mapping) = mapping {
            if target_credentials
                .iter()
                .any(|c| c.id == mapping.physical_credential_id)
            {
                continue;
            }
        }

        let by_name = target_credentials
            .iter()
            .find(|c| c.name == reference.name && c.credential_type == reference.credential_type);

        let (code, message) = match (by_name, mapping) {
            (Some(found), _) => (
                IssueCode::ResolvedByName,
                format!(
                    "'{}' resolves by name to target credential {}",
                    reference.key(),
                    found.id
                ),
            ),
            (None, Some(mapping)) => (
                IssueCode::MappingStale,
                format!(
                    "'{}' is mapped to credential {} which no longer exists in the target",
                    reference.key(),
                    mapping.physical_credential_id
                ),
            ),
            (None, None) => (
                IssueCode::MissingCredential,
                format!("'{}' has no mapping and no match in the target", reference.key()),
            ),
        };
        report.push(CredentialIssue {
            code,
            credential_type: Some(reference.credential_type.clone()),
            credential_name: Some(reference.name.clone()),
            workflow_ids: reference.workflow_ids.clone(),
            message,
        });
    }

    report.finish()
}

// ============================================================================
// Service
// ============================================================================

/// Request to create a logical credential.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateLogicalCredential {
    pub name: String,
    #[serde(default)]
    pub required_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Request to map a logical credential in one environment.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCredentialMapping {
    pub logical_credential_id: Uuid,
    pub environment_id: Uuid,
    pub physical_credential_id: String,
    #[serde(default)]
    pub physical_name: Option<String>,
    #[serde(default)]
    pub physical_type: Option<String>,
}

/// Request to check credentials before a promotion.
#[derive(Debug, Clone, Deserialize)]
pub struct PreflightRequest {
    pub source_environment_id: Uuid,
    pub target_environment_id: Uuid,
    pub workflow_ids: Vec<String>,
}

/// Credential administration and preflight.
#[derive(Clone)]
pub struct CredentialService {
    persistence: Arc<dyn Persistence>,
    registry: Arc<dyn AdapterRegistry>,
    audit: AuditLogger,
}

impl CredentialService {
    pub fn new(persistence: Arc<dyn Persistence>, registry: Arc<dyn AdapterRegistry>) -> Self {
        let audit = AuditLogger::new(persistence.clone());
        Self {
            persistence,
            registry,
            audit,
        }
    }

    async fn environment(&self, tenant_id: &str, id: Uuid) -> Result<Environment> {
        self.persistence
            .get_environment(tenant_id, id)
            .await?
            .filter(|env| env.is_active)
            .ok_or_else(|| Error::not_found("environment", id))
    }

    pub async fn create_logical(
        &self,
        ctx: &AuditContext,
        input: CreateLogicalCredential,
    ) -> Result<LogicalCredential> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(Error::Validation("name is required".to_string()));
        }
        let credential = LogicalCredential {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id.clone(),
            name: name.to_string(),
            required_type: input
                .required_type
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            description: input.description,
            created_at: Utc::now(),
        };
        self.persistence.insert_logical_credential(&credential).await?;
        self.audit
            .record(
                ctx,
                AuditEvent::new(AuditAction::Create, "logical_credential", credential.id)
                    .new_value(json!(credential)),
            )
            .await;
        Ok(credential)
    }

    pub async fn list_logical(&self, tenant_id: &str) -> Result<Vec<LogicalCredential>> {
        self.persistence.list_logical_credentials(tenant_id).await
    }

    /// Delete a logical credential together with its mappings.
    pub async fn delete_logical(&self, ctx: &AuditContext, id: Uuid) -> Result<()> {
        if !self
            .persistence
            .delete_logical_credential(&ctx.tenant_id, id)
            .await?
        {
            return Err(Error::not_found("logical credential", id));
        }
        self.audit
            .record(ctx, AuditEvent::new(AuditAction::Delete, "logical_credential", id))
            .await;
        Ok(())
    }

    /// Create or replace the mapping of a logical credential in an environment.
    pub async fn upsert_mapping(
        &self,
        ctx: &AuditContext,
        input: CreateCredentialMapping,
    ) -> Result<CredentialMapping> {
        if input.physical_credential_id.trim().is_empty() {
            return Err(Error::Validation(
                "physical_credential_id is required".to_string(),
            ));
        }
        let logical = self
            .persistence
            .list_logical_credentials(&ctx.tenant_id)
            .await?;
        if !logical.iter().any(|l| l.id == input.logical_credential_id) {
            return Err(Error::not_found(
                "logical credential",
                input.logical_credential_id,
            ));
        }
        self.environment(&ctx.tenant_id, input.environment_id).await?;

        let mapping = self
            .persistence
            .upsert_credential_mapping(&CredentialMapping {
                id: Uuid::new_v4(),
                tenant_id: ctx.tenant_id.clone(),
                logical_credential_id: input.logical_credential_id,
                environment_id: input.environment_id,
                physical_credential_id: input.physical_credential_id.trim().to_string(),
                physical_name: input.physical_name,
                physical_type: input.physical_type,
                updated_at: Utc::now(),
            })
            .await?;
        self.audit
            .record(
                ctx,
                AuditEvent::new(AuditAction::Update, "credential_mapping", mapping.id)
                    .new_value(json!(mapping)),
            )
            .await;
        Ok(mapping)
    }

    pub async fn list_mappings(
        &self,
        tenant_id: &str,
        environment_id: Option<Uuid>,
    ) -> Result<Vec<CredentialMapping>> {
        self.persistence
            .list_credential_mappings(tenant_id, environment_id)
            .await
    }

    pub async fn delete_mapping(&self, ctx: &AuditContext, id: Uuid) -> Result<()> {
        if !self
            .persistence
            .delete_credential_mapping(&ctx.tenant_id, id)
            .await?
        {
            return Err(Error::not_found("credential mapping", id));
        }
        self.audit
            .record(ctx, AuditEvent::new(AuditAction::Delete, "credential_mapping", id))
            .await;
        Ok(())
    }

    /// Check that the credentials of the selected source workflows resolve
    /// in the target.
    ///
    /// Source read failures are errors; a target that cannot list its
    /// credentials yields a single blocking `target_unreachable` issue.
    pub async fn preflight(&self, tenant_id: &str, request: PreflightRequest) -> Result<PreflightReport> {
        if request.source_environment_id == request.target_environment_id {
            return Err(Error::Validation(
                "source and target environments must differ".to_string(),
            ));
        }
        let source = self.environment(tenant_id, request.source_environment_id).await?;
        let target = self.environment(tenant_id, request.target_environment_id).await?;
        let source_provider = self.registry.provider(&source)?;
        let target_provider = self.registry.provider(&target)?;

        let mut workflows = Vec::with_capacity(request.workflow_ids.len());
        for workflow_id in &request.workflow_ids {
            workflows.push((workflow_id.as_str(), source_provider.get_workflow(workflow_id).await?));
        }
        let refs = collect_credential_refs(workflows.iter().map(|(id, wf)| (*id, wf)));

        let target_credentials = match target_provider.get_credentials().await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(
                    tenant_id = %tenant_id,
                    environment_id = %target.id,
                    error = %e,
                    "Failed to list target credentials"
                );
                return Ok(PreflightReport::target_unreachable(format!(
                    "credentials of environment '{}' could not be listed: {e}",
                    target.name
                )));
            }
        };
        let logical = self.persistence.list_logical_credentials(tenant_id).await?;
        let mappings = self
            .persistence
            .list_credential_mappings(tenant_id, Some(target.id))
            .await?;

        let report = evaluate_credentials(&refs, &logical, &mappings, &target_credentials);
        info!(
            tenant_id = %tenant_id,
            source_environment_id = %source.id,
            target_environment_id = %target.id,
            credentials = refs.len(),
            blocking = report.blocking_issues.len(),
            warnings = report.warnings.len(),
            "Credential preflight finished"
        );
        Ok(report)
    }
}
