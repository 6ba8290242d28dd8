// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared handler state.

use std::sync::Arc;

use flowgate_core::credentials::CredentialService;
use flowgate_core::downgrade::{DowngradeService, DowngradeSettings};
use flowgate_core::environments::EnvironmentService;
use flowgate_core::observability::ObservabilityService;
use flowgate_core::persistence::Persistence;
use flowgate_core::promotion::{PromotionLocks, PromotionService};
use flowgate_core::registry::AdapterRegistry;
use flowgate_core::retention::{RetentionService, RetentionSettings};
use flowgate_core::snapshots::SnapshotService;
use flowgate_core::sync::EnvironmentSyncService;

use crate::billing::BillingService;

/// Settings the services are built with.
#[derive(Debug, Clone, Default)]
pub struct StateSettings {
    /// Billing webhook secret; the webhook rejects requests without one.
    pub stripe_webhook_secret: Option<String>,
    pub retention: RetentionSettings,
    pub downgrade: DowngradeSettings,
}

/// Services shared by all handlers.
pub struct AppState {
    pub persistence: Arc<dyn Persistence>,
    pub environments: EnvironmentService,
    pub snapshots: SnapshotService,
    pub sync: EnvironmentSyncService,
    pub promotions: PromotionService,
    pub credentials: CredentialService,
    pub retention: RetentionService,
    pub downgrade: DowngradeService,
    pub billing: BillingService,
    pub observability: ObservabilityService,
    pub stripe_webhook_secret: Option<String>,
}

impl AppState {
    /// Build every service over one persistence backend and adapter registry.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        registry: Arc<dyn AdapterRegistry>,
        settings: StateSettings,
    ) -> Self {
        let downgrade = DowngradeService::new(persistence.clone(), settings.downgrade);
        Self {
            environments: EnvironmentService::new(persistence.clone(), registry.clone()),
            snapshots: SnapshotService::new(persistence.clone(), registry.clone()),
            sync: EnvironmentSyncService::new(persistence.clone(), registry.clone()),
            promotions: PromotionService::new(
                persistence.clone(),
                registry.clone(),
                PromotionLocks::new(),
            ),
            credentials: CredentialService::new(persistence.clone(), registry),
            retention: RetentionService::new(persistence.clone(), settings.retention),
            billing: BillingService::new(persistence.clone(), downgrade.clone()),
            observability: ObservabilityService::new(persistence.clone()),
            downgrade,
            persistence,
            stripe_webhook_secret: settings.stripe_webhook_secret,
        }
    }

    /// Replace the promotion service, e.g. to change its retry policy.
    pub fn with_promotions(mut self, promotions: PromotionService) -> Self {
        self.promotions = promotions;
        self
    }
}
