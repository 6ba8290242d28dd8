// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resolves environments to their provider and snapshot store adapters.

use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::git_store::SnapshotStore;
use crate::models::Environment;
use crate::provider::WorkflowProvider;

/// Builds adapters for an environment.
pub trait AdapterRegistry: Send + Sync {
    /// Provider client for the environment's automation server.
    fn provider(&self, environment: &Environment) -> Result<Arc<dyn WorkflowProvider>>;

    /// Snapshot store for the environment's Git repository.
    ///
    /// Fails with [`Error::Validation`] when no repository is configured.
    fn snapshot_store(&self, environment: &Environment) -> Result<Arc<dyn SnapshotStore>>;
}

/// Error returned when an environment has no Git repository.
pub fn missing_git_error(environment: &Environment) -> Error {
    Error::Validation(format!(
        "environment '{}' has no Git repository configured",
        environment.name
    ))
}

/// Registry with adapters registered up front, keyed by environment id.
#[derive(Default)]
pub struct StaticAdapterRegistry {
    providers: DashMap<Uuid, Arc<dyn WorkflowProvider>>,
    stores: DashMap<Uuid, Arc<dyn SnapshotStore>>,
}

impl StaticAdapterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the provider used for an environment.
    pub fn register_provider(&self, environment_id: Uuid, provider: Arc<dyn WorkflowProvider>) {
        self.providers.insert(environment_id, provider);
    }

    /// Register the snapshot store used for an environment.
    pub fn register_store(&self, environment_id: Uuid, store: Arc<dyn SnapshotStore>) {
        self.stores.insert(environment_id, store);
    }
}

impl AdapterRegistry for StaticAdapterRegistry {
    fn provider(&self, environment: &Environment) -> Result<Arc<dyn WorkflowProvider>> {
        self.providers
            .get(&environment.id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                Error::Other(format!(
                    "no provider registered for environment {}",
                    environment.id
                ))
            })
    }

    fn snapshot_store(&self, environment: &Environment) -> Result<Arc<dyn SnapshotStore>> {
        if !environment.has_git() {
            return Err(missing_git_error(environment));
        }
        self.stores
            .get(&environment.id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| missing_git_error(environment))
    }
}
