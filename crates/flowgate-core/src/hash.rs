// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Content hashing for workflow documents.
//!
//! Only the content a provider accepts on write takes part in the hash: the
//! workflow name, its nodes, connections, and settings. Provider bookkeeping
//! (ids, timestamps, version ids, tags, `active`, sharing, pinned or static
//! data) and node canvas positions are ignored, so a promoted copy hashes
//! equal to its source. Any change to node parameters, the node set, or
//! connections changes the digest. The digest is a 64-character lowercase
//! SHA-256 hex string.

use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

/// Top-level fields that take part in the content hash.
const HASHED_WORKFLOW_FIELDS: &[&str] = &["name", "nodes", "connections", "settings"];

/// Per-node fields that only affect the editor canvas.
const VOLATILE_NODE_FIELDS: &[&str] = &["position"];

/// Compute the content hash of a workflow document.
pub fn compute_workflow_hash(workflow: &Value) -> String {
    let normalized = normalize_workflow(workflow);
    let mut canonical = String::new();
    write_canonical(&normalized, &mut canonical);

    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

/// Keep the hashed fields and order nodes by name.
///
/// Missing `settings` counts as `{}`, which is what providers store when a
/// workflow is written without settings.
pub fn normalize_workflow(workflow: &Value) -> Value {
    let Value::Object(map) = workflow else {
        return workflow.clone();
    };

    let mut normalized: Map<String, Value> = HASHED_WORKFLOW_FIELDS
        .iter()
        .filter_map(|field| map.get(*field).map(|v| (field.to_string(), v.clone())))
        .collect();
    match normalized.get("settings") {
        None | Some(Value::Null) => {
            normalized.insert("settings".to_string(), json!({}));
        }
        _ => {}
    }

    if let Some(Value::Array(nodes)) = normalized.get_mut("nodes") {
        for node in nodes.iter_mut() {
            if let Value::Object(node) = node {
                for field in VOLATILE_NODE_FIELDS {
                    node.remove(*field);
                }
            }
        }
        nodes.sort_by(|a, b| node_name(a).cmp(node_name(b)));
    }

    Value::Object(normalized)
}

fn node_name(node: &Value) -> &str {
    node.get("name").and_then(Value::as_str).unwrap_or_default()
}

/// Serialize with sorted object keys and no insignificant whitespace.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
