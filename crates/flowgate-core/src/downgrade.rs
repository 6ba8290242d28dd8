// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Plan downgrade handling.
//!
//! When a tenant uses more resources than its plan allows, the newest
//! resources beyond the limit receive a grace period. Once a grace period
//! expires its action (read-only, disable, archive, schedule deletion) is
//! applied. Grace periods are cancelled as soon as the resource is back
//! within the limit.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditContext, AuditEvent, AuditLogger};
use crate::error::Result;
use crate::models::{EnforcementAction, GracePeriod, GracePeriodStatus, ResourceKind};
use crate::persistence::Persistence;
use crate::plans::{PlanTier, load_entitlements};

/// Grace period length and the action applied per resource kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DowngradeSettings {
    pub grace_period_days: i64,
    actions: HashMap<ResourceKind, EnforcementAction>,
}

impl Default for DowngradeSettings {
    fn default() -> Self {
        Self {
            grace_period_days: 7,
            actions: HashMap::from([
                (ResourceKind::Environment, EnforcementAction::ReadOnly),
                (ResourceKind::TeamMember, EnforcementAction::Disable),
                (ResourceKind::Workflow, EnforcementAction::Archive),
            ]),
        }
    }
}

impl DowngradeSettings {
    pub fn with_grace_period_days(mut self, days: i64) -> Self {
        self.grace_period_days = days;
        self
    }

    /// Override the action applied to one kind.
    pub fn with_action(mut self, kind: ResourceKind, action: EnforcementAction) -> Self {
        self.actions.insert(kind, action);
        self
    }

    pub fn action_for(&self, kind: ResourceKind) -> EnforcementAction {
        self.actions
            .get(&kind)
            .copied()
            .unwrap_or(EnforcementAction::ScheduleDeletion)
    }
}

/// Usage of one resource kind against its limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindUsage {
    pub kind: ResourceKind,
    pub limit: Option<i64>,
    pub usage: i64,
    pub excess: i64,
}

/// Outcome of checking one tenant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DowngradeCheck {
    pub tenant_id: String,
    pub plan: PlanTier,
    pub usage: Vec<KindUsage>,
    pub grace_periods_started: Vec<GracePeriod>,
    pub grace_periods_cancelled: usize,
}

impl DowngradeCheck {
    /// Whether every kind is within its limit.
    pub fn is_compliant(&self) -> bool {
        self.usage.iter().all(|u| u.excess == 0)
    }
}

/// Outcome of enforcing expired grace periods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementReport {
    pub enforced: usize,
    /// Grace periods whose resource no longer existed.
    pub resource_missing: usize,
    pub errors: Vec<String>,
}

/// Starts, cancels, and enforces downgrade grace periods.
#[derive(Clone)]
pub struct DowngradeService {
    persistence: Arc<dyn Persistence>,
    settings: DowngradeSettings,
    audit: AuditLogger,
}

impl DowngradeService {
    pub fn new(persistence: Arc<dyn Persistence>, settings: DowngradeSettings) -> Self {
        let audit = AuditLogger::new(persistence.clone());
        Self {
            persistence,
            settings,
            audit,
        }
    }

    /// Compare usage with the plan and start or cancel grace periods.
    ///
    /// Idempotent: a resource never holds more than one active grace period,
    /// and resources already enforced are left alone.
    pub async fn check_tenant(&self, ctx: &AuditContext) -> Result<DowngradeCheck> {
        let tenant_id = ctx.tenant_id.as_str();
        let entitlements = load_entitlements(self.persistence.as_ref(), tenant_id).await?;
        let grace_periods = self.persistence.list_grace_periods(tenant_id, None).await?;
        let now = Utc::now();

        let mut check = DowngradeCheck {
            tenant_id: tenant_id.to_string(),
            plan: entitlements.plan,
            usage: Vec::new(),
            grace_periods_started: Vec::new(),
            grace_periods_cancelled: 0,
        };

        for kind in ResourceKind::ALL {
            let limit = entitlements.limits.limit_for(kind);
            let resources = self.persistence.list_plan_resources(tenant_id, kind).await?;
            let usage = resources.len() as i64;
            let excess = limit.map_or(0, |l| (usage - l).max(0));
            check.usage.push(KindUsage {
                kind,
                limit,
                usage,
                excess,
            });

            // Oldest first, so everything past the limit is the newest.
            let keep = usize::try_from(usage - excess).unwrap_or(0);
            let over: HashSet<&str> = resources[keep..].iter().map(|r| r.id.as_str()).collect();

            let of_kind = |status: GracePeriodStatus| {
                grace_periods
                    .iter()
                    .filter(move |g| g.resource_type == kind.as_str() && g.status == status.as_str())
            };

            for active in of_kind(GracePeriodStatus::Active) {
                if !over.contains(active.resource_id.as_str()) {
                    self.persistence
                        .update_grace_period_status(active.id, GracePeriodStatus::Cancelled, now)
                        .await?;
                    check.grace_periods_cancelled += 1;
                    self.audit
                        .record(
                            ctx,
                            AuditEvent::new(AuditAction::GracePeriodCancel, "grace_period", active.id)
                                .old_value(json!(active)),
                        )
                        .await;
                }
            }

            let handled: HashSet<&str> = of_kind(GracePeriodStatus::Active)
                .chain(of_kind(GracePeriodStatus::Enforced))
                .map(|g| g.resource_id.as_str())
                .collect();

            for resource in &resources[keep..] {
                if handled.contains(resource.id.as_str()) {
                    continue;
                }
                let grace_period = GracePeriod {
                    id: Uuid::new_v4(),
                    tenant_id: tenant_id.to_string(),
                    resource_type: kind.as_str().to_string(),
                    resource_id: resource.id.clone(),
                    action: self.settings.action_for(kind).as_str().to_string(),
                    status: GracePeriodStatus::Active.as_str().to_string(),
                    starts_at: now,
                    expires_at: now + Duration::days(self.settings.grace_period_days),
                    resolved_at: None,
                };
                self.persistence.insert_grace_period(&grace_period).await?;
                self.audit
                    .record(
                        ctx,
                        AuditEvent::new(AuditAction::GracePeriodStart, "grace_period", grace_period.id)
                            .new_value(json!(grace_period)),
                    )
                    .await;
                check.grace_periods_started.push(grace_period);
            }
        }

        info!(
            tenant_id = %tenant_id,
            plan = entitlements.plan.as_str(),
            started = check.grace_periods_started.len(),
            cancelled = check.grace_periods_cancelled,
            "Downgrade check finished"
        );
        Ok(check)
    }

    /// Check every known tenant. Failing tenants are logged and skipped.
    pub async fn check_all(&self) -> Result<Vec<DowngradeCheck>> {
        let tenants = self.persistence.list_tenants().await?;
        let mut checks = Vec::with_capacity(tenants.len());
        for tenant_id in tenants {
            match self.check_tenant(&AuditContext::system(tenant_id.clone())).await {
                Ok(check) => checks.push(check),
                Err(e) => warn!(tenant_id = %tenant_id, error = %e, "Downgrade check failed"),
            }
        }
        Ok(checks)
    }

    /// Apply the action of every active grace period that expired by `now`.
    pub async fn enforce_expired(&self, now: DateTime<Utc>) -> Result<EnforcementReport> {
        let expired = self.persistence.list_expired_grace_periods(now).await?;
        let mut report = EnforcementReport::default();

        for grace_period in expired {
            let (Some(kind), Some(action)) = (
                ResourceKind::parse(&grace_period.resource_type),
                EnforcementAction::parse(&grace_period.action),
            ) else {
                report.errors.push(format!(
                    "grace period {} has unknown resource type '{}' or action '{}'",
                    grace_period.id, grace_period.resource_type, grace_period.action
                ));
                continue;
            };

            let applied = match self
                .persistence
                .apply_enforcement_action(
                    &grace_period.tenant_id,
                    kind,
                    &grace_period.resource_id,
                    action,
                    now,
                )
                .await
            {
                Ok(applied) => applied,
                Err(e) => {
                    warn!(grace_period_id = %grace_period.id, error = %e, "Enforcement failed");
                    report
                        .errors
                        .push(format!("grace period {}: {e}", grace_period.id));
                    continue;
                }
            };
            self.persistence
                .update_grace_period_status(grace_period.id, GracePeriodStatus::Enforced, now)
                .await?;

            if applied {
                report.enforced += 1;
            } else {
                report.resource_missing += 1;
            }
            info!(
                tenant_id = %grace_period.tenant_id,
                resource_type = %grace_period.resource_type,
                resource_id = %grace_period.resource_id,
                action = action.as_str(),
                applied,
                "Grace period enforced"
            );
            self.audit
                .record(
                    &AuditContext::system(grace_period.tenant_id.clone()),
                    AuditEvent::new(AuditAction::Enforce, kind.as_str(), &grace_period.resource_id)
                        .new_value(json!({
                            "gracePeriodId": grace_period.id,
                            "action": action.as_str(),
                            "applied": applied,
                        })),
                )
                .await;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TenantUser;
    use crate::persistence::MemoryPersistence;
    use crate::testing::environment;

    async fn seed_environments(persistence: &MemoryPersistence, count: usize) -> Vec<Uuid> {
        let mut ids = Vec::new();
        for i in 0..count {
            let mut env = environment("t1", "dev", false);
            env.name = format!("env-{i}");
            env.created_at = Utc::now() - Duration::hours((count - i) as i64);
            persistence.insert_environment(&env).await.unwrap();
            ids.push(env.id);
        }
        ids
    }

    #[tokio::test]
    async fn test_newest_over_limit_get_grace_periods_once() {
        let persistence = Arc::new(MemoryPersistence::new());
        let ids = seed_environments(&persistence, 4).await;
        let service = DowngradeService::new(persistence.clone(), DowngradeSettings::default());
        let ctx = AuditContext::system("t1");

        let check = service.check_tenant(&ctx).await.unwrap();
        assert!(!check.is_compliant());
        let started: Vec<String> = check
            .grace_periods_started
            .iter()
            .map(|g| g.resource_id.clone())
            .collect();
        assert_eq!(started, vec![ids[2].to_string(), ids[3].to_string()]);
        assert!(check.grace_periods_started.iter().all(|g| g.action == "read_only"));

        let again = service.check_tenant(&ctx).await.unwrap();
        assert!(again.grace_periods_started.is_empty());
        assert_eq!(
            persistence
                .list_grace_periods("t1", Some(GracePeriodStatus::Active))
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_compliance_cancels_grace_periods() {
        let persistence = Arc::new(MemoryPersistence::new());
        let ids = seed_environments(&persistence, 3).await;
        let service = DowngradeService::new(persistence.clone(), DowngradeSettings::default());
        let ctx = AuditContext::system("t1");
        service.check_tenant(&ctx).await.unwrap();

        persistence.deactivate_environment("t1", ids[2]).await.unwrap();
        let check = service.check_tenant(&ctx).await.unwrap();
        assert!(check.is_compliant());
        assert_eq!(check.grace_periods_cancelled, 1);
        assert!(persistence
            .list_grace_periods("t1", Some(GracePeriodStatus::Active))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_enforce_expired_applies_actions() {
        let persistence = Arc::new(MemoryPersistence::new());
        let ids = seed_environments(&persistence, 3).await;
        let user = TenantUser {
            id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            email: "a@acme.io".into(),
            role: "developer".into(),
            is_disabled: false,
            created_at: Utc::now(),
        };
        for offset in [3, 2] {
            persistence
                .insert_tenant_user(&TenantUser {
                    id: Uuid::new_v4(),
                    email: format!("{offset}@acme.io"),
                    created_at: Utc::now() - Duration::hours(offset),
                    ..user.clone()
                })
                .await
                .unwrap();
        }
        persistence.insert_tenant_user(&user).await.unwrap();

        let service = DowngradeService::new(
            persistence.clone(),
            DowngradeSettings::default().with_grace_period_days(0),
        );
        service.check_tenant(&AuditContext::system("t1")).await.unwrap();

        let report = service.enforce_expired(Utc::now()).await.unwrap();
        assert_eq!(report.enforced, 2);
        assert!(report.errors.is_empty());

        let env = persistence.get_environment("t1", ids[2]).await.unwrap().unwrap();
        assert!(env.is_read_only);
        assert!(persistence.tenant_user("t1", user.id).await.unwrap().is_disabled);

        // Enforced read-only environments do not get a new grace period.
        let check = service.check_tenant(&AuditContext::system("t1")).await.unwrap();
        assert!(check.grace_periods_started.is_empty());
        assert_eq!(service.enforce_expired(Utc::now()).await.unwrap().enforced, 0);
    }
}
