// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Subscription plans and their limits.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::ResourceKind;
use crate::persistence::Persistence;

/// Subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    /// Free tier.
    Free,
    /// Pro tier.
    Pro,
    /// Agency tier.
    Agency,
    /// Enterprise tier.
    Enterprise,
}

impl PlanTier {
    /// Text stored in the `plan_tier` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Agency => "agency",
            Self::Enterprise => "enterprise",
        }
    }

    /// Parse a plan name. Unknown names fall back to `Free`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "pro" => Self::Pro,
            "agency" => Self::Agency,
            "enterprise" => Self::Enterprise,
            _ => Self::Free,
        }
    }

    /// Limits of this tier.
    pub fn limits(&self) -> PlanLimits {
        match self {
            Self::Free => PlanLimits {
                max_environments: Some(2),
                max_team_members: Some(2),
                max_workflows: Some(50),
                retention_days: 7,
            },
            Self::Pro => PlanLimits {
                max_environments: Some(5),
                max_team_members: Some(10),
                max_workflows: Some(500),
                retention_days: 30,
            },
            Self::Agency => PlanLimits {
                max_environments: Some(20),
                max_team_members: Some(50),
                max_workflows: None,
                retention_days: 90,
            },
            Self::Enterprise => PlanLimits {
                max_environments: None,
                max_team_members: None,
                max_workflows: None,
                retention_days: 365,
            },
        }
    }
}

/// Resource limits of a plan. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanLimits {
    pub max_environments: Option<i64>,
    pub max_team_members: Option<i64>,
    pub max_workflows: Option<i64>,
    pub retention_days: i64,
}

impl PlanLimits {
    /// Limit for one resource kind.
    pub fn limit_for(&self, kind: ResourceKind) -> Option<i64> {
        match kind {
            ResourceKind::Environment => self.max_environments,
            ResourceKind::TeamMember => self.max_team_members,
            ResourceKind::Workflow => self.max_workflows,
        }
    }
}

/// Current resource usage of a tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub environments: i64,
    pub team_members: i64,
    pub workflows: i64,
}

impl Usage {
    /// Count for one resource kind.
    pub fn count_for(&self, kind: ResourceKind) -> i64 {
        match kind {
            ResourceKind::Environment => self.environments,
            ResourceKind::TeamMember => self.team_members,
            ResourceKind::Workflow => self.workflows,
        }
    }
}

/// Plan, limits and usage of a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlements {
    pub tenant_id: String,
    pub plan: PlanTier,
    pub status: String,
    pub limits: PlanLimits,
    pub usage: Usage,
}

impl Entitlements {
    /// Resource kinds where usage exceeds the plan limit.
    pub fn over_limit(&self) -> Vec<ResourceKind> {
        ResourceKind::ALL
            .into_iter()
            .filter(|kind| {
                self.limits
                    .limit_for(*kind)
                    .is_some_and(|limit| self.usage.count_for(*kind) > limit)
            })
            .collect()
    }
}

/// Plan tier and subscription status of a tenant.
///
/// Tenants without a subscription are on the free tier.
pub async fn tenant_plan(persistence: &dyn Persistence, tenant_id: &str) -> Result<(PlanTier, String)> {
    Ok(match persistence.get_subscription(tenant_id).await? {
        Some(subscription) => (PlanTier::parse(&subscription.plan_tier), subscription.status),
        None => (PlanTier::Free, "active".to_string()),
    })
}

/// Current plan, limits and usage of a tenant.
pub async fn load_entitlements(persistence: &dyn Persistence, tenant_id: &str) -> Result<Entitlements> {
    let (plan, status) = tenant_plan(persistence, tenant_id).await?;
    let mut usage = Usage::default();
    for kind in ResourceKind::ALL {
        let count = persistence.list_plan_resources(tenant_id, kind).await?.len() as i64;
        match kind {
            ResourceKind::Environment => usage.environments = count,
            ResourceKind::TeamMember => usage.team_members = count,
            ResourceKind::Workflow => usage.workflows = count,
        }
    }
    Ok(Entitlements {
        tenant_id: tenant_id.to_string(),
        plan,
        status,
        limits: plan.limits(),
        usage,
    })
}
