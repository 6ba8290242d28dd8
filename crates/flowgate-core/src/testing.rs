// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fixtures shared by unit tests, integration tests, and downstream crates.

use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::models::Environment;

/// Active environment named after its class.
///
/// With `with_git`, a snapshot repository on branch `main` is configured.
pub fn environment(tenant_id: &str, class: &str, with_git: bool) -> Environment {
    let now = Utc::now();
    Environment {
        id: Uuid::new_v4(),
        tenant_id: tenant_id.to_string(),
        name: class.to_string(),
        environment_class: class.to_string(),
        base_url: format!("https://{class}.n8n.example.com"),
        api_key: format!("{class}-api-key"),
        git_repo_url: with_git.then(|| "https://github.com/acme/workflows".to_string()),
        git_branch: with_git.then(|| "main".to_string()),
        git_token: with_git.then(|| "ghp_test".to_string()),
        git_folder: None,
        is_active: true,
        is_read_only: false,
        is_healthy: None,
        last_connected_at: None,
        last_sync_at: None,
        deletion_scheduled_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Minimal n8n workflow with one HTTP node.
pub fn workflow(id: &str, name: &str, url: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "active": false,
        "nodes": [
            {
                "name": "Start",
                "type": "n8n-nodes-base.manualTrigger",
                "parameters": {},
                "position": [0, 0]
            },
            {
                "name": "Fetch",
                "type": "n8n-nodes-base.httpRequest",
                "parameters": {"url": url},
                "position": [200, 0]
            }
        ],
        "connections": {
            "Start": {"main": [[{"node": "Fetch", "type": "main", "index": 0}]]}
        },
        "settings": {}
    })
}
