// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Automation provider abstraction.
//!
//! A provider is the REST API of one automation server (one environment).
//! Errors are classified at this boundary so callers can decide between
//! retrying, falling back to create, or giving up.

pub mod mock;

pub use mock::{MockProvider, ProviderCall};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Classified provider failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// Server-side or network failure that may succeed on retry.
    #[error("transient provider failure ({}): {message}", status_label(.status))]
    Transient {
        /// HTTP status, absent for connection-level failures.
        status: Option<u16>,
        /// Error details.
        message: String,
    },

    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other failure; not retried.
    #[error("{0}")]
    Other(String),
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("HTTP {code}"),
        None => "connection".to_string(),
    }
}

impl ProviderError {
    /// Classify an HTTP status returned by a provider.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => Self::NotFound(message),
            408 | 429 | 500..=599 => Self::Transient {
                status: Some(status),
                message,
            },
            _ => Self::Other(format!("HTTP {status}: {message}")),
        }
    }

    /// Whether the call may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Whether the entity is absent.
    ///
    /// Unclassified errors are also treated as not-found when their message
    /// carries a 404 marker, since some provider versions only surface the
    /// status inside the error text.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Other(message) => {
                let lower = message.to_ascii_lowercase();
                lower.contains("404") || lower.contains("not found")
            }
            Self::Transient { .. } => false,
        }
    }

    /// HTTP status, when one is known.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } => *status,
            Self::NotFound(_) => Some(404),
            Self::Other(_) => None,
        }
    }
}

/// Credential as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredential {
    /// Provider credential id.
    pub id: String,
    /// Credential name.
    pub name: String,
    /// Credential type, e.g. `slackApi`.
    #[serde(rename = "type")]
    pub credential_type: String,
}

/// Uniform interface over an automation server's REST API.
#[async_trait]
pub trait WorkflowProvider: Send + Sync {
    /// Short provider name for logs.
    fn provider_type(&self) -> &'static str;

    /// Whether the server is reachable with the configured credentials.
    async fn test_connection(&self) -> bool;

    /// All workflows, with full definitions.
    async fn get_workflows(&self) -> Result<Vec<Value>, ProviderError>;

    /// One workflow by id.
    async fn get_workflow(&self, workflow_id: &str) -> Result<Value, ProviderError>;

    /// Replace an existing workflow.
    async fn update_workflow(&self, workflow_id: &str, data: &Value)
    -> Result<Value, ProviderError>;

    /// Create a workflow. The provider assigns the id.
    async fn create_workflow(&self, data: &Value) -> Result<Value, ProviderError>;

    /// Credentials defined on the server.
    async fn get_credentials(&self) -> Result<Vec<ProviderCredential>, ProviderError>;

    /// Most recent executions.
    async fn get_executions(&self, limit: usize) -> Result<Vec<Value>, ProviderError>;

    /// Users of the server.
    async fn get_users(&self) -> Result<Vec<Value>, ProviderError>;

    /// Workflow tags.
    async fn get_tags(&self) -> Result<Vec<Value>, ProviderError>;
}

/// Provider id of a workflow document.
pub fn workflow_id_of(workflow: &Value) -> Option<String> {
    match workflow.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Name of a workflow document.
pub fn workflow_name_of(workflow: &Value) -> String {
    workflow
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_classification() {
        assert!(ProviderError::from_status(503, "unavailable").is_transient());
        assert!(ProviderError::from_status(502, "bad gateway").is_transient());
        assert!(ProviderError::from_status(429, "slow down").is_transient());
        assert!(ProviderError::from_status(404, "gone").is_not_found());
        let other = ProviderError::from_status(400, "bad body");
        assert!(!other.is_transient());
        assert!(!other.is_not_found());
    }

    #[test]
    fn test_not_found_detected_from_message() {
        assert!(ProviderError::Other("request failed with 404".into()).is_not_found());
        assert!(ProviderError::Other("Workflow Not Found".into()).is_not_found());
        assert!(!ProviderError::Other("permission denied".into()).is_not_found());
        assert!(
            !ProviderError::Transient {
                status: Some(503),
                message: "not found upstream".into()
            }
            .is_not_found()
        );
    }

    #[test]
    fn test_display() {
        let err = ProviderError::Transient {
            status: Some(503),
            message: "down".into(),
        };
        assert_eq!(err.to_string(), "transient provider failure (HTTP 503): down");
        let err = ProviderError::Transient {
            status: None,
            message: "refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "transient provider failure (connection): refused"
        );
    }

    #[test]
    fn test_workflow_id_of() {
        assert_eq!(workflow_id_of(&json!({"id": "abc"})), Some("abc".into()));
        assert_eq!(workflow_id_of(&json!({"id": 42})), Some("42".into()));
        assert_eq!(workflow_id_of(&json!({"name": "x"})), None);
    }
}
