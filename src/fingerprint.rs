//! Stable fingerprinting of tool actions: normalization, the `tool_key`
//! content hash, read/write classification, and resource-anchor extraction.
//!
//! The `execute_command` heuristics are intentionally literal
//! substring/token checks rather than a shell parser — inferring intent
//! beyond what's written here is out of scope.

use sha2::{Digest, Sha256};

use crate::types::OpType;

/// Action types treated as writes outright, regardless of their arguments.
const WRITE_ACTION_TYPES: &[&str] = &["create_file", "modify_code", "delete_file"];

/// Substring markers that flag an `execute_command` invocation as a write.
/// Each is checked against the lowercased command padded with spaces on
/// both sides, so a marker at the start or end of the string still matches.
const WRITE_MARKERS: &[&str] = &[
    " create-", " put-", " attach-", " update-", " delete-", " remove-", " set-", " cp ", " mv ",
    " rm ",
];

/// Action types whose cached reads must be tombstoned by a conflicting
/// write to one of their resources.
pub const READ_ACTION_TYPES: &[&str] = &[
    "read_file_contents",
    "query_codebase",
    "search_documentation",
    "search_internet",
    "retrieve_integration_methods",
    "execute_command",
];

/// Canonicalize an action map for stable hashing: sort `files` as strings,
/// coerce `args` elements to strings, and substitute `""` for an absent or
/// null `cwd`. All other keys pass through untouched.
pub fn normalize_action(action: &serde_json::Value) -> serde_json::Value {
    let mut map = match action.as_object() {
        Some(m) => m.clone(),
        None => serde_json::Map::new(),
    };

    if let Some(serde_json::Value::Array(files)) = map.get("files") {
        let mut strs: Vec<String> = files.iter().map(value_to_string).collect();
        strs.sort();
        map.insert(
            "files".to_string(),
            serde_json::Value::Array(strs.into_iter().map(serde_json::Value::String).collect()),
        );
    }

    if let Some(serde_json::Value::Array(args)) = map.get("args") {
        let strs: Vec<serde_json::Value> = args
            .iter()
            .map(|v| serde_json::Value::String(value_to_string(v)))
            .collect();
        map.insert("args".to_string(), serde_json::Value::Array(strs));
    }

    if matches!(map.get("cwd"), Some(serde_json::Value::Null)) {
        map.insert(
            "cwd".to_string(),
            serde_json::Value::String(String::new()),
        );
    }

    serde_json::Value::Object(map)
}

fn value_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Stable fingerprint of `(action_type, normalized action)`, formatted as
/// `"{action_type}:{16 hex chars}"`.
pub fn tool_key(action_type: &str, action: &serde_json::Value) -> String {
    let normalized = normalize_action(action);
    let canonical = canonical_json(&normalized);
    let mut hasher = Sha256::new();
    hasher.update(action_type.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}:{}", action_type, &hex[..16])
}

/// Serializes with sorted object keys and no whitespace, so the same
/// logical action always hashes to the same bytes regardless of the
/// order its keys were inserted in.
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => serde_json::to_string(other).unwrap(),
    }
}

/// Classify an action as a cache-relevant `write` or a plain `read`.
pub fn classify_op(action_type: &str, action: &serde_json::Value) -> OpType {
    if WRITE_ACTION_TYPES.contains(&action_type) {
        return OpType::Write;
    }
    if action_type == "execute_command" {
        let cmd = action
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_lowercase();
        let padded = format!(" {} ", cmd);
        if WRITE_MARKERS.iter().any(|m| padded.contains(m)) {
            return OpType::Write;
        }
    }
    OpType::Read
}

/// Best-effort extraction of resource anchors touched by an action. An
/// empty list is a legal result.
pub fn extract_resource_ids(action_type: &str, action: &serde_json::Value) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let empty = serde_json::Map::new();
    let map = action.as_object().unwrap_or(&empty);

    match action_type {
        "create_file" | "delete_file" | "read_file_contents" | "run_file" => {
            if let Some(fp) = map.get("file_path").and_then(|v| v.as_str()) {
                if !fp.is_empty() {
                    ids.push(fp.to_string());
                }
            }
        }
        "modify_code" => {
            if let Some(serde_json::Value::Array(files)) = map.get("files") {
                for f in files {
                    let s = value_to_string(f);
                    if !s.is_empty() {
                        ids.push(s);
                    }
                }
            }
        }
        _ => {}
    }

    if action_type == "execute_command" {
        let cmd = map
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        if let Some(idx) = cmd.find("s3://") {
            let after = &cmd[idx + "s3://".len()..];
            if let Some(bucket) = after.split_whitespace().next() {
                if !bucket.is_empty() {
                    ids.push(format!("s3://{}", bucket));
                }
            }
        }

        if cmd.contains("--policy-arn") {
            for tok in cmd.split_whitespace() {
                if let Some(rest) = tok.strip_prefix("arn:") {
                    ids.push(format!("arn:{}", rest));
                }
            }
        }

        if let Some(idx) = cmd.find("--group-name") {
            let mut tail = cmd[idx + "--group-name".len()..].trim();
            if let Some(rest) = tail.strip_prefix('=') {
                tail = rest.trim();
            }
            let name = tail.trim_matches(|c| c == '\'' || c == '"');
            if !name.is_empty() {
                ids.push(format!("iam:group:{}", name));
            }
        }
    }

    if action_type == "query_codebase" {
        if let Some(q) = map.get("query").and_then(|v| v.as_str()) {
            if !q.is_empty() {
                ids.push(format!("code_query:{}", q));
            }
        }
    }

    if action_type == "search_documentation" {
        let mut parts = Vec::new();
        for key in ["language", "provider_version", "search_method", "query"] {
            if let Some(v) = map.get(key).and_then(|v| v.as_str()) {
                if !v.is_empty() {
                    parts.push(format!("{}={}", key, v));
                }
            }
        }
        if !parts.is_empty() {
            ids.push(format!("docs:{}", parts.join("|")));
        }
    }

    if action_type == "search_internet" {
        if let Some(q) = map.get("query").and_then(|v| v.as_str()) {
            if !q.is_empty() {
                ids.push(format!("web:{}", q));
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
