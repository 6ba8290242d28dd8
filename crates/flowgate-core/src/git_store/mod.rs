// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Git-backed snapshot store abstraction.
//!
//! Workflow files live at `workflows/{folder}/{id}.json` with a sidecar
//! `workflows/{folder}/{id}.env-map.json` describing where the file came from.
//! Stored documents carry a metadata comment under [`METADATA_FIELD`] that is
//! stripped again before a document is written back to a provider.

pub mod mock;

pub use mock::MockSnapshotStore;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Field holding the metadata comment embedded into stored workflow files.
pub const METADATA_FIELD: &str = "_comment";

/// Suffix of the sidecar file written next to each workflow file.
pub const ENV_MAP_SUFFIX: &str = ".env-map.json";

/// Errors from the snapshot store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum GitStoreError {
    /// The repository URL could not be understood.
    #[error("Invalid repository: {0}")]
    InvalidRepository(String),

    /// The requested file, folder, or commit does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The Git host rejected the request.
    #[error("Git host returned HTTP {status}: {message}")]
    Http {
        /// HTTP status.
        status: u16,
        /// Error details.
        message: String,
    },

    /// The Git host could not be reached.
    #[error("Git host unreachable: {0}")]
    Unreachable(String),

    /// A stored file could not be decoded.
    #[error("Invalid file content at {path}: {message}")]
    InvalidContent {
        /// Repository path.
        path: String,
        /// Decode error.
        message: String,
    },
}

/// Read/write access to workflow files in a Git repository.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// All workflow files in `folder`, keyed by workflow id.
    ///
    /// With `commit_sha` set, files are read as of that commit; otherwise the
    /// branch head is used.
    async fn get_all_workflows(
        &self,
        folder: &str,
        commit_sha: Option<&str>,
    ) -> Result<HashMap<String, Value>, GitStoreError>;

    /// Write one file and return the resulting commit SHA.
    async fn write_workflow_file(
        &self,
        path: &str,
        data: &Value,
        message: &str,
    ) -> Result<String, GitStoreError>;

    /// Commit SHA at the branch head.
    async fn head_commit_sha(&self) -> Result<String, GitStoreError>;

    /// Write a workflow file plus its env-map sidecar.
    ///
    /// Returns the SHA of the last commit written.
    async fn sync_workflow(
        &self,
        folder: &str,
        workflow_id: &str,
        data: &Value,
        env_map: &Value,
        message: &str,
    ) -> Result<String, GitStoreError> {
        self.write_workflow_file(&workflow_path(folder, workflow_id), data, message)
            .await?;
        self.write_workflow_file(&env_map_path(folder, workflow_id), env_map, message)
            .await
    }
}

/// Repository path of a workflow file.
pub fn workflow_path(folder: &str, workflow_id: &str) -> String {
    format!("workflows/{}/{}.json", folder.trim_matches('/'), workflow_id)
}

/// Repository path of a workflow's env-map sidecar.
pub fn env_map_path(folder: &str, workflow_id: &str) -> String {
    format!(
        "workflows/{}/{}{}",
        folder.trim_matches('/'),
        workflow_id,
        ENV_MAP_SUFFIX
    )
}

/// Workflow id for a file name inside a workflow folder, skipping sidecars.
pub fn workflow_id_from_file_name(file_name: &str) -> Option<&str> {
    if file_name.ends_with(ENV_MAP_SUFFIX) {
        return None;
    }
    file_name.strip_suffix(".json").filter(|id| !id.is_empty())
}

/// Copy of `data` with a metadata comment embedded.
pub fn embed_metadata(data: &Value, comment: &str) -> Value {
    let mut doc = data.clone();
    if let Value::Object(map) = &mut doc {
        map.insert(METADATA_FIELD.to_string(), Value::String(comment.to_string()));
    }
    doc
}

/// Copy of `data` without the metadata comment.
pub fn strip_metadata(data: &Value) -> Value {
    let mut doc = data.clone();
    if let Value::Object(map) = &mut doc {
        map.remove(METADATA_FIELD);
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_paths() {
        assert_eq!(workflow_path("staging", "42"), "workflows/staging/42.json");
        assert_eq!(
            env_map_path("/production/", "42"),
            "workflows/production/42.env-map.json"
        );
    }

    #[test]
    fn test_workflow_id_from_file_name() {
        assert_eq!(workflow_id_from_file_name("42.json"), Some("42"));
        assert_eq!(workflow_id_from_file_name("42.env-map.json"), None);
        assert_eq!(workflow_id_from_file_name("README.md"), None);
        assert_eq!(workflow_id_from_file_name(".json"), None);
    }

    #[test]
    fn test_metadata_roundtrip() {
        let wf = json!({"id": "1", "name": "A"});
        let stored = embed_metadata(&wf, "snapshot of dev");
        assert_eq!(stored[METADATA_FIELD], "snapshot of dev");
        assert_eq!(strip_metadata(&stored), wf);
    }
}
