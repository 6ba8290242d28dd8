// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Audit trail.
//!
//! Every mutating operation records who did it. During impersonation the
//! `actor` is the support user acting and the `effective_subject` is the user
//! being impersonated. Writes are best-effort: a failed insert is logged and
//! never fails the operation being audited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::persistence::Persistence;

/// A user identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// User id.
    pub id: String,
    /// User email, if known.
    pub email: Option<String>,
}

impl Actor {
    /// Create an actor.
    pub fn new(id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: id.into(),
            email,
        }
    }
}

/// Tenant and identities an operation runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditContext {
    /// Tenant the operation is scoped to.
    pub tenant_id: String,
    /// User performing the operation.
    pub actor: Actor,
    /// Impersonated user, when `actor` acts on someone's behalf.
    pub effective_subject: Option<Actor>,
    /// Impersonation session, if any.
    pub impersonation_session_id: Option<String>,
}

impl AuditContext {
    /// Context for a user acting as themselves.
    pub fn new(tenant_id: impl Into<String>, actor: Actor) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor,
            effective_subject: None,
            impersonation_session_id: None,
        }
    }

    /// Context for background jobs.
    pub fn system(tenant_id: impl Into<String>) -> Self {
        Self::new(tenant_id, Actor::new("system", None))
    }

    /// Mark the context as an impersonation of `subject`.
    pub fn impersonating(mut self, subject: Actor, session_id: Option<String>) -> Self {
        self.effective_subject = Some(subject);
        self.impersonation_session_id = session_id;
        self
    }

    /// The user the operation is performed for.
    pub fn subject(&self) -> &Actor {
        self.effective_subject.as_ref().unwrap_or(&self.actor)
    }
}

/// Audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Execute,
    Rollback,
    Sync,
    Snapshot,
    Enforce,
    GracePeriodStart,
    GracePeriodCancel,
    BillingUpdate,
}

impl AuditAction {
    /// Text stored in the `action` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Execute => "execute",
            Self::Rollback => "rollback",
            Self::Sync => "sync",
            Self::Snapshot => "snapshot",
            Self::Enforce => "enforce",
            Self::GracePeriodStart => "grace_period_start",
            Self::GracePeriodCancel => "grace_period_cancel",
            Self::BillingUpdate => "billing_update",
        }
    }
}

/// Audit log row (`audit_logs`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub tenant_id: String,
    pub actor_id: String,
    pub actor_email: Option<String>,
    pub effective_subject_id: Option<String>,
    pub effective_subject_email: Option<String>,
    pub impersonation_session_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// One event to audit.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    action: AuditAction,
    resource_type: &'static str,
    resource_id: String,
    old_value: Option<Value>,
    new_value: Option<Value>,
}

impl AuditEvent {
    /// Event without payloads.
    pub fn new(action: AuditAction, resource_type: &'static str, resource_id: impl ToString) -> Self {
        Self {
            action,
            resource_type,
            resource_id: resource_id.to_string(),
            old_value: None,
            new_value: None,
        }
    }

    /// Attach the state before the change.
    pub fn old_value(mut self, value: Value) -> Self {
        self.old_value = Some(value);
        self
    }

    /// Attach the state after the change.
    pub fn new_value(mut self, value: Value) -> Self {
        self.new_value = Some(value);
        self
    }

    fn into_entry(self, ctx: &AuditContext) -> AuditLogEntry {
        AuditLogEntry {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id.clone(),
            actor_id: ctx.actor.id.clone(),
            actor_email: ctx.actor.email.clone(),
            effective_subject_id: ctx.effective_subject.as_ref().map(|s| s.id.clone()),
            effective_subject_email: ctx
                .effective_subject
                .as_ref()
                .and_then(|s| s.email.clone()),
            impersonation_session_id: ctx.impersonation_session_id.clone(),
            action: self.action.as_str().to_string(),
            resource_type: self.resource_type.to_string(),
            resource_id: self.resource_id,
            old_value: self.old_value,
            new_value: self.new_value,
            created_at: Utc::now(),
        }
    }
}

/// Best-effort audit writer.
#[derive(Clone)]
pub struct AuditLogger {
    persistence: Arc<dyn Persistence>,
}

impl AuditLogger {
    /// Create a logger writing through `persistence`.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Record an event. Failures are logged and swallowed.
    pub async fn record(&self, ctx: &AuditContext, event: AuditEvent) {
        let entry = event.into_entry(ctx);
        if let Err(e) = self.persistence.insert_audit_log(&entry).await {
            warn!(
                tenant_id = %entry.tenant_id,
                action = %entry.action,
                resource_type = %entry.resource_type,
                resource_id = %entry.resource_id,
                error = %e,
                "Failed to write audit log"
            );
        }
    }
}
