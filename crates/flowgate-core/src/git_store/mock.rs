// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory snapshot store for testing.
//!
//! Every write creates a new commit holding a full copy of the tree, so reads
//! at an older commit see exactly the files that existed then.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use super::{GitStoreError, SnapshotStore, workflow_id_from_file_name};

#[derive(Default)]
struct Repo {
    tree: HashMap<String, Value>,
    commits: Vec<(String, HashMap<String, Value>)>,
}

/// Mock snapshot store for testing.
pub struct MockSnapshotStore {
    repo: Mutex<Repo>,
    unreachable: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl Default for MockSnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSnapshotStore {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self {
            repo: Mutex::new(Repo::default()),
            unreachable: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Make every call fail as if the Git host were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Number of `get_all_workflows` calls.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of files written.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// File content at the branch head.
    pub async fn file(&self, path: &str) -> Option<Value> {
        self.repo.lock().await.tree.get(path).cloned()
    }

    /// Number of commits created.
    pub async fn commit_count(&self) -> usize {
        self.repo.lock().await.commits.len()
    }

    fn check_reachable(&self) -> Result<(), GitStoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(GitStoreError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for MockSnapshotStore {
    async fn get_all_workflows(
        &self,
        folder: &str,
        commit_sha: Option<&str>,
    ) -> Result<HashMap<String, Value>, GitStoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        let repo = self.repo.lock().await;
        let tree = match commit_sha {
            Some(sha) => {
                &repo
                    .commits
                    .iter()
                    .find(|(id, _)| id == sha)
                    .ok_or_else(|| GitStoreError::NotFound(format!("commit {sha}")))?
                    .1
            }
            None => &repo.tree,
        };

        let prefix = format!("workflows/{}/", folder.trim_matches('/'));
        let workflows = tree
            .iter()
            .filter_map(|(path, data)| {
                let file_name = path.strip_prefix(&prefix)?;
                if file_name.contains('/') {
                    return None;
                }
                let id = workflow_id_from_file_name(file_name)?;
                Some((id.to_string(), data.clone()))
            })
            .collect();
        Ok(workflows)
    }

    async fn write_workflow_file(
        &self,
        path: &str,
        data: &Value,
        _message: &str,
    ) -> Result<String, GitStoreError> {
        self.check_reachable()?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        let mut repo = self.repo.lock().await;
        repo.tree.insert(path.to_string(), data.clone());
        let sha = format!("{:040x}", repo.commits.len() + 1);
        let tree = repo.tree.clone();
        repo.commits.push((sha.clone(), tree));
        Ok(sha)
    }

    async fn head_commit_sha(&self) -> Result<String, GitStoreError> {
        self.check_reachable()?;
        let repo = self.repo.lock().await;
        repo.commits
            .last()
            .map(|(sha, _)| sha.clone())
            .ok_or_else(|| GitStoreError::NotFound("branch has no commits".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git_store::workflow_path;
    use serde_json::json;

    #[tokio::test]
    async fn test_reads_at_commit_see_old_content() {
        let store = MockSnapshotStore::new();
        let first = store
            .sync_workflow("dev", "1", &json!({"name": "v1"}), &json!({}), "first")
            .await
            .unwrap();
        store
            .write_workflow_file(&workflow_path("dev", "1"), &json!({"name": "v2"}), "second")
            .await
            .unwrap();

        let old = store.get_all_workflows("dev", Some(&first)).await.unwrap();
        assert_eq!(old.len(), 1);
        assert_eq!(old["1"]["name"], "v1");

        let head = store.get_all_workflows("dev", None).await.unwrap();
        assert_eq!(head["1"]["name"], "v2");
    }

    #[tokio::test]
    async fn test_folders_are_isolated() {
        let store = MockSnapshotStore::new();
        store
            .sync_workflow("dev", "1", &json!({"name": "dev"}), &json!({}), "m")
            .await
            .unwrap();
        store
            .sync_workflow("production", "1", &json!({"name": "prod"}), &json!({}), "m")
            .await
            .unwrap();

        let prod = store.get_all_workflows("production", None).await.unwrap();
        assert_eq!(prod.len(), 1);
        assert_eq!(prod["1"]["name"], "prod");
    }

    #[tokio::test]
    async fn test_unknown_commit() {
        let store = MockSnapshotStore::new();
        let err = store
            .get_all_workflows("dev", Some("deadbeef"))
            .await
            .unwrap_err();
        assert!(matches!(err, GitStoreError::NotFound(_)));
    }
}
