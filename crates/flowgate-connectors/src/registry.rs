// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Adapter registry building HTTP clients from environment records.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use flowgate_core::error::{Error, Result};
use flowgate_core::git_store::SnapshotStore;
use flowgate_core::models::Environment;
use flowgate_core::provider::WorkflowProvider;
use flowgate_core::registry::{AdapterRegistry, missing_git_error};
use uuid::Uuid;

use crate::ConnectorError;
use crate::github::{DEFAULT_API_URL, GitHubSnapshotStore};
use crate::n8n::N8nProvider;

/// Settings shared by every adapter the registry builds.
#[derive(Debug, Clone)]
pub struct HttpAdapterConfig {
    /// Request timeout for n8n and GitHub calls.
    pub timeout: Duration,
    /// GitHub API endpoint.
    pub github_api_url: String,
}

impl Default for HttpAdapterConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            github_api_url: DEFAULT_API_URL.to_string(),
        }
    }
}

/// Repository settings a cached store was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StoreKey {
    repo_url: String,
    branch: Option<String>,
    token: Option<String>,
}

impl StoreKey {
    fn of(environment: &Environment) -> Self {
        Self {
            repo_url: environment.git_repo_url.clone().unwrap_or_default(),
            branch: environment.git_branch.clone(),
            token: environment.git_token.clone(),
        }
    }
}

/// [`AdapterRegistry`] producing n8n providers and GitHub snapshot stores.
///
/// Stores are cached per environment so the repository handle is resolved
/// once; a cached store is replaced when the environment's repository
/// settings change.
#[derive(Default)]
pub struct HttpAdapterRegistry {
    config: HttpAdapterConfig,
    stores: DashMap<Uuid, (StoreKey, Arc<GitHubSnapshotStore>)>,
}

impl HttpAdapterRegistry {
    pub fn new(config: HttpAdapterConfig) -> Self {
        Self {
            config,
            stores: DashMap::new(),
        }
    }

    pub fn config(&self) -> &HttpAdapterConfig {
        &self.config
    }
}

impl AdapterRegistry for HttpAdapterRegistry {
    fn provider(&self, environment: &Environment) -> Result<Arc<dyn WorkflowProvider>> {
        let provider = N8nProvider::new(
            &environment.base_url,
            &environment.api_key,
            self.config.timeout,
        )
        .map_err(connector_error)?;
        Ok(Arc::new(provider))
    }

    fn snapshot_store(&self, environment: &Environment) -> Result<Arc<dyn SnapshotStore>> {
        if !environment.has_git() {
            return Err(missing_git_error(environment));
        }
        let key = StoreKey::of(environment);
        if let Some(entry) = self.stores.get(&environment.id) {
            let (cached_key, store) = entry.value();
            if *cached_key == key {
                return Ok(store.clone());
            }
        }

        let store = Arc::new(
            GitHubSnapshotStore::new(
                &self.config.github_api_url,
                &key.repo_url,
                key.branch.as_deref(),
                key.token.as_deref(),
                self.config.timeout,
            )
            .map_err(connector_error)?,
        );
        self.stores.insert(environment.id, (key, store.clone()));
        Ok(store)
    }
}

fn connector_error(e: ConnectorError) -> Error {
    match e {
        ConnectorError::InvalidUrl(message) => Error::Validation(message),
        ConnectorError::Client(message) => Error::Other(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_core::testing::environment;

    #[test]
    fn test_store_requires_git() {
        let registry = HttpAdapterRegistry::default();
        let env = environment("t1", "dev", false);
        assert!(matches!(
            registry.snapshot_store(&env),
            Err(Error::Validation(_))
        ));
        assert!(registry.provider(&env).is_ok());
    }

    #[test]
    fn test_store_cached_until_settings_change() {
        let registry = HttpAdapterRegistry::default();
        let mut env = environment("t1", "production", true);

        let first = registry.snapshot_store(&env).unwrap();
        let again = registry.snapshot_store(&env).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        env.git_branch = Some("release".into());
        let rebuilt = registry.snapshot_store(&env).unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
    }

    #[test]
    fn test_invalid_urls_are_validation_errors() {
        let registry = HttpAdapterRegistry::default();
        let mut env = environment("t1", "production", true);
        env.git_repo_url = Some("https://github.com/acme".into());
        assert!(matches!(
            registry.snapshot_store(&env),
            Err(Error::Validation(_))
        ));

        env.base_url = "n8n.local".into();
        assert!(matches!(registry.provider(&env), Err(Error::Validation(_))));
    }
}
