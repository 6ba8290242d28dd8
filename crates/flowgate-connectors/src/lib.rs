// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flowgate Connectors - HTTP adapters for external systems
//!
//! | Adapter | Trait | Backend |
//! |---------|-------|---------|
//! | [`N8nProvider`] | `WorkflowProvider` | n8n public REST API (`/api/v1`) |
//! | [`GitHubSnapshotStore`] | `SnapshotStore` | GitHub contents API |
//! | [`HttpAdapterRegistry`] | `AdapterRegistry` | Builds both from environment records |

/// GitHub snapshot store.
pub mod github;

/// n8n workflow provider.
pub mod n8n;

/// Per-environment adapter construction.
pub mod registry;

pub use github::GitHubSnapshotStore;
pub use n8n::N8nProvider;
pub use registry::{HttpAdapterConfig, HttpAdapterRegistry};

/// Errors building an adapter.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// A base or repository URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(String),
}
