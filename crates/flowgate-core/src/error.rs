// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for flowgate-core.

use thiserror::Error;

use crate::git_store::GitStoreError;
use crate::provider::ProviderError;

/// Result type using flowgate-core's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by flowgate services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A tenant-scoped resource does not exist.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Kind of resource (environment, snapshot, promotion, ...).
        resource: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The operation conflicts with work already in progress.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An upstream system could not be reached.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Automation provider call failed.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Git snapshot store call failed.
    #[error("Git store error: {0}")]
    GitStore(#[from] GitStoreError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying migrations failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a [`Error::NotFound`] for the given resource kind.
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::Unavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Provider(_) => "PROVIDER_ERROR",
            Self::GitStore(_) => "GIT_STORE_ERROR",
            Self::Database(_) | Self::Migration(_) => "DATABASE_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }
}
