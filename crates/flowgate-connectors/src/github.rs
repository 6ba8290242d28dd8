// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GitHub contents API snapshot store.
//!
//! Files are read and written through `/repos/{owner}/{repo}/contents/{path}`
//! with base64 bodies. Every write is its own commit on the configured
//! branch.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flowgate_core::git_store::{GitStoreError, SnapshotStore, workflow_id_from_file_name};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

use crate::ConnectorError;

/// Public GitHub API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = concat!("flowgate/", env!("CARGO_PKG_VERSION"));

/// Owner and name of a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

/// Repository metadata fetched on first access.
#[derive(Debug, Clone, Deserialize)]
struct RepoHandle {
    full_name: String,
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct FileContent {
    sha: String,
    #[serde(default)]
    content: String,
}

/// [`SnapshotStore`] backed by a GitHub repository.
pub struct GitHubSnapshotStore {
    client: reqwest::Client,
    api_url: Url,
    repo: RepoRef,
    branch: Option<String>,
    token: Option<String>,
    handle: OnceCell<RepoHandle>,
}

impl std::fmt::Debug for GitHubSnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubSnapshotStore")
            .field("api_url", &self.api_url.as_str())
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .finish_non_exhaustive()
    }
}

impl GitHubSnapshotStore {
    /// Create a store for `repo_url` (e.g. `https://github.com/acme/flows`).
    ///
    /// Without a branch the repository's default branch is used.
    pub fn new(
        api_url: &str,
        repo_url: &str,
        branch: Option<&str>,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ConnectorError> {
        let api_url = Url::parse(&format!("{}/", api_url.trim_end_matches('/')))
            .map_err(|e| ConnectorError::InvalidUrl(format!("{api_url}: {e}")))?;
        let repo = parse_repo_url(repo_url)
            .map_err(|e| ConnectorError::InvalidUrl(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ConnectorError::Client(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            repo,
            branch: branch
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(str::to_string),
            token: token.filter(|t| !t.is_empty()).map(str::to_string),
            handle: OnceCell::new(),
        })
    }

    /// Repository this store writes to.
    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, GitStoreError> {
        let url = self
            .api_url
            .join(path)
            .map_err(|e| GitStoreError::InvalidRepository(format!("{path}: {e}")))?;
        let mut request = self
            .client
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        Ok(request)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Value, GitStoreError> {
        let response = request
            .send()
            .await
            .map_err(|e| GitStoreError::Unreachable(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(GitStoreError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GitStoreError::Http {
                status: status.as_u16(),
                message: body.chars().take(500).collect(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| GitStoreError::Unreachable(e.to_string()))
    }

    /// Repository metadata, fetched once and reused.
    async fn handle(&self) -> Result<&RepoHandle, GitStoreError> {
        self.handle
            .get_or_try_init(|| async {
                let path = format!("repos/{}/{}", self.repo.owner, self.repo.name);
                let value = self.send(self.request(Method::GET, &path)?, &path).await?;
                let handle: RepoHandle =
                    serde_json::from_value(value).map_err(|e| GitStoreError::InvalidContent {
                        path: path.clone(),
                        message: e.to_string(),
                    })?;
                info!(
                    repo = %handle.full_name,
                    default_branch = %handle.default_branch,
                    "GitHub repository resolved"
                );
                Ok::<_, GitStoreError>(handle)
            })
            .await
    }

    async fn branch(&self) -> Result<String, GitStoreError> {
        match &self.branch {
            Some(branch) => Ok(branch.clone()),
            None => Ok(self.handle().await?.default_branch.clone()),
        }
    }

    fn contents_path(&self, path: &str) -> String {
        let encoded: Vec<_> = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!(
            "repos/{}/{}/contents/{}",
            self.repo.owner,
            self.repo.name,
            encoded.join("/")
        )
    }

    async fn read_file(&self, path: &str, git_ref: &str) -> Result<FileContent, GitStoreError> {
        let request = self
            .request(Method::GET, &self.contents_path(path))?
            .query(&[("ref", git_ref)]);
        let value = self.send(request, path).await?;
        serde_json::from_value(value).map_err(|e| GitStoreError::InvalidContent {
            path: path.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl SnapshotStore for GitHubSnapshotStore {
    async fn get_all_workflows(
        &self,
        folder: &str,
        commit_sha: Option<&str>,
    ) -> Result<HashMap<String, Value>, GitStoreError> {
        self.handle().await?;
        let git_ref = match commit_sha {
            Some(sha) => sha.to_string(),
            None => self.branch().await?,
        };
        let dir = format!("workflows/{}", folder.trim_matches('/'));
        let request = self
            .request(Method::GET, &self.contents_path(&dir))?
            .query(&[("ref", git_ref.as_str())]);

        let listing = match self.send(request, &dir).await {
            Ok(listing) => listing,
            // Folder not committed yet at this ref.
            Err(GitStoreError::NotFound(_)) => return Ok(HashMap::new()),
            Err(e) => return Err(e),
        };
        let entries: Vec<ContentEntry> =
            serde_json::from_value(listing).map_err(|e| GitStoreError::InvalidContent {
                path: dir.clone(),
                message: e.to_string(),
            })?;

        let mut workflows = HashMap::new();
        for entry in entries.iter().filter(|e| e.kind == "file") {
            let Some(workflow_id) = workflow_id_from_file_name(&entry.name) else {
                continue;
            };
            let file = self.read_file(&entry.path, &git_ref).await?;
            workflows.insert(workflow_id.to_string(), decode_json(&entry.path, &file.content)?);
        }

        debug!(
            folder,
            git_ref = %git_ref,
            count = workflows.len(),
            "Read workflow files from GitHub"
        );
        Ok(workflows)
    }

    async fn write_workflow_file(
        &self,
        path: &str,
        data: &Value,
        message: &str,
    ) -> Result<String, GitStoreError> {
        self.handle().await?;
        let branch = self.branch().await?;
        let existing_sha = match self.read_file(path, &branch).await {
            Ok(file) => Some(file.sha),
            Err(GitStoreError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let content =
            serde_json::to_vec_pretty(data).map_err(|e| GitStoreError::InvalidContent {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        let mut body = json!({
            "message": message,
            "content": STANDARD.encode(content),
            "branch": branch,
        });
        if let Some(sha) = existing_sha {
            body["sha"] = Value::String(sha);
        }

        let response = self
            .send(
                self.request(Method::PUT, &self.contents_path(path))?.json(&body),
                path,
            )
            .await?;
        let commit_sha = response
            .pointer("/commit/sha")
            .and_then(Value::as_str)
            .ok_or_else(|| GitStoreError::InvalidContent {
                path: path.to_string(),
                message: "response carries no commit sha".to_string(),
            })?;
        debug!(path, commit_sha, "Committed workflow file");
        Ok(commit_sha.to_string())
    }

    async fn head_commit_sha(&self) -> Result<String, GitStoreError> {
        self.handle().await?;
        let branch = self.branch().await?;
        let path = format!(
            "repos/{}/{}/branches/{}",
            self.repo.owner,
            self.repo.name,
            urlencoding::encode(&branch)
        );
        let value = self.send(self.request(Method::GET, &path)?, &path).await?;
        value
            .pointer("/commit/sha")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GitStoreError::InvalidContent {
                path,
                message: "branch carries no commit sha".to_string(),
            })
    }
}

/// Owner and repository name of a GitHub URL.
///
/// Accepts `https://github.com/owner/repo(.git)` and `git@github.com:owner/repo.git`.
pub fn parse_repo_url(repo_url: &str) -> Result<RepoRef, GitStoreError> {
    let trimmed = repo_url.trim();
    let path = if let Some(rest) = trimmed.strip_prefix("git@") {
        rest.split_once(':').map(|(_, path)| path.to_string())
    } else {
        Url::parse(trimmed).ok().map(|url| url.path().to_string())
    }
    .ok_or_else(|| GitStoreError::InvalidRepository(repo_url.to_string()))?;

    let mut segments = path
        .trim_matches('/')
        .trim_end_matches(".git")
        .split('/')
        .filter(|s| !s.is_empty());
    match (segments.next(), segments.next(), segments.next()) {
        (Some(owner), Some(name), None) => Ok(RepoRef {
            owner: owner.to_string(),
            name: name.to_string(),
        }),
        _ => Err(GitStoreError::InvalidRepository(repo_url.to_string())),
    }
}

fn decode_json(path: &str, content: &str) -> Result<Value, GitStoreError> {
    let invalid = |message: String| GitStoreError::InvalidContent {
        path: path.to_string(),
        message,
    };
    // GitHub wraps base64 content at 60 columns.
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| invalid(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repo_url() {
        let expected = RepoRef {
            owner: "acme".into(),
            name: "flows".into(),
        };
        assert_eq!(parse_repo_url("https://github.com/acme/flows").unwrap(), expected);
        assert_eq!(parse_repo_url("https://github.com/acme/flows.git/").unwrap(), expected);
        assert_eq!(parse_repo_url("git@github.com:acme/flows.git").unwrap(), expected);
        assert!(parse_repo_url("https://github.com/acme").is_err());
        assert!(parse_repo_url("https://github.com/acme/flows/tree/main").is_err());
        assert!(parse_repo_url("flows").is_err());
    }

    #[test]
    fn test_decode_wrapped_content() {
        let encoded = STANDARD.encode(br#"{"id":"1","name":"A"}"#);
        let wrapped = format!("{}\n{}\n", &encoded[..10], &encoded[10..]);
        assert_eq!(
            decode_json("x.json", &wrapped).unwrap(),
            json!({"id": "1", "name": "A"})
        );
        assert!(decode_json("x.json", "!!!").is_err());
    }
}
