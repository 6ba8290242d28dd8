// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for flowgate-core promotion tests.
//!
//! Provides TestContext wiring a dev source and a production target with mock
//! providers, a mock snapshot store, and in-memory persistence.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use flowgate_core::audit::{Actor, AuditContext};
use flowgate_core::git_store::MockSnapshotStore;
use flowgate_core::models::{ChangeType, Environment, Promotion, WorkflowSelection};
use flowgate_core::persistence::{MemoryPersistence, Persistence};
use flowgate_core::promotion::{CreatePromotion, PromotionLocks, PromotionService, RetryPolicy};
use flowgate_core::provider::MockProvider;
use flowgate_core::registry::StaticAdapterRegistry;
use flowgate_core::testing::environment;

pub const TENANT: &str = "tenant-a";

/// Two environments and a promotion service over mocks.
pub struct TestContext {
    pub persistence: Arc<MemoryPersistence>,
    pub registry: Arc<StaticAdapterRegistry>,
    pub source: Environment,
    pub target: Environment,
    pub source_provider: Arc<MockProvider>,
    pub target_provider: Arc<MockProvider>,
    pub target_store: Arc<MockSnapshotStore>,
    pub locks: PromotionLocks,
    pub service: PromotionService,
    pub ctx: AuditContext,
}

impl TestContext {
    /// Create a context whose rollback retries wait one millisecond.
    pub async fn new() -> Self {
        Self::with_retry(RetryPolicy::new(3, Duration::from_millis(1))).await
    }

    pub async fn with_retry(retry: RetryPolicy) -> Self {
        let persistence = Arc::new(MemoryPersistence::new());
        let registry = Arc::new(StaticAdapterRegistry::new());

        let source = environment(TENANT, "dev", false);
        let target = environment(TENANT, "production", true);
        persistence.insert_environment(&source).await.unwrap();
        persistence.insert_environment(&target).await.unwrap();

        let source_provider = Arc::new(MockProvider::new());
        let target_provider = Arc::new(MockProvider::new());
        let target_store = Arc::new(MockSnapshotStore::new());
        registry.register_provider(source.id, source_provider.clone());
        registry.register_provider(target.id, target_provider.clone());
        registry.register_store(target.id, target_store.clone());

        let locks = PromotionLocks::new();
        let service = PromotionService::new(persistence.clone(), registry.clone(), locks.clone())
            .with_retry_policy(retry);

        Self {
            persistence,
            registry,
            source,
            target,
            source_provider,
            target_provider,
            target_store,
            locks,
            service,
            ctx: AuditContext::new(TENANT, Actor::new("user-1", Some("dev@acme.io".into()))),
        }
    }

    /// Create a pending promotion of the given (workflow id, change type) pairs.
    pub async fn promotion(&self, selections: &[(&str, ChangeType)]) -> Promotion {
        self.service
            .create_promotion(
                &self.ctx,
                CreatePromotion {
                    source_environment_id: self.source.id,
                    target_environment_id: self.target.id,
                    workflow_selections: selections
                        .iter()
                        .map(|(id, change_type)| WorkflowSelection {
                            workflow_id: id.to_string(),
                            name: None,
                            change_type: *change_type,
                            target_workflow_id: None,
                        })
                        .collect(),
                },
            )
            .await
            .expect("Failed to create promotion")
    }

    /// Audit actions recorded for the tenant, oldest first.
    pub async fn audit_actions(&self) -> Vec<String> {
        self.persistence
            .audit_entries(TENANT)
            .await
            .into_iter()
            .map(|e| e.action)
            .collect()
    }

    /// Stored promotion row.
    pub async fn stored(&self, promotion: &Promotion) -> Promotion {
        self.persistence
            .get_promotion(TENANT, promotion.id)
            .await
            .unwrap()
            .expect("promotion row missing")
    }
}
