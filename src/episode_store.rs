//! Episode Store: CRUD over Episodes, Summaries, Compression Groups, and
//! Resource nodes, backed by a `GraphStore`.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::fingerprint::{classify_op, extract_resource_ids, normalize_action, tool_key};
use crate::store::GraphStore;
use crate::tokenizer::Tokenizer;
use crate::types::{
    CacheInfo, CompressionGroup, Episode, EpisodeInput, EdgeRelation, OpType, Resource, Summary,
};

fn tool_node_key(tool_id: &str) -> String {
    format!("tool_result_{}", tool_id)
}

fn summary_node_key(tool_id: &str) -> String {
    format!("summary_{}", tool_id)
}

fn resource_node_key(resource_id: &str) -> String {
    format!("resource::{}", resource_id.replace(' ', "_"))
}

fn compression_node_key(tool_ids: &[String]) -> String {
    format!("compression_{}", tool_ids.join("-"))
}

/// Brief one-line description of an action, used as the node summary shown
/// by tools that browse the graph directly (not the dashboard, which has
/// its own renderer).
fn brief_params(action: &serde_json::Value) -> String {
    if let Some(map) = action.as_object() {
        if let Some(v) = map.get("command").and_then(|v| v.as_str()) {
            return v.to_string();
        }
        if let Some(v) = map.get("file_path").and_then(|v| v.as_str()) {
            return v.to_string();
        }
        if let Some(v) = map.get("query").and_then(|v| v.as_str()) {
            return v.to_string();
        }
        if let Some(v) = map.get("code") {
            let s = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return format!("code modification ({} chars)", s.chars().count());
        }
    }
    let s = action.to_string();
    if s.chars().count() > 50 {
        format!("{}...", s.chars().take(50).collect::<String>())
    } else {
        s
    }
}

pub struct EpisodeStore {
    store: Arc<dyn GraphStore>,
    tokenizer: Arc<dyn Tokenizer>,
    workflow: String,
}

impl EpisodeStore {
    pub fn new(store: Arc<dyn GraphStore>, tokenizer: Arc<dyn Tokenizer>, workflow: &str) -> Self {
        Self {
            store,
            tokenizer,
            workflow: workflow.to_string(),
        }
    }

    /// Next dense `TR-N` counter, derived from the highest existing episode
    /// node in this workflow rather than tracked separately, so a freshly
    /// opened store picks up exactly where the backend left off.
    pub fn next_tool_counter(&self) -> Result<u64, CoreError> {
        let nodes = self.store.list_nodes(&self.workflow)?;
        let mut max_counter = 0u64;
        for node in nodes {
            if let Some(rest) = node.key.strip_prefix("tool_result_TR-") {
                if let Ok(n) = rest.parse::<u64>() {
                    max_counter = max_counter.max(n);
                }
            }
        }
        Ok(max_counter)
    }

    /// Allocates the next `TR-N`, computes cache metadata, persists the
    /// Episode node, and (for writes) runs post-write housekeeping via the
    /// supplied callback. Returns the assigned `tool_id`.
    pub fn add_episode(&self, input: EpisodeInput) -> Result<String, CoreError> {
        let counter = self.next_tool_counter()? + 1;
        let tool_id = format!("TR-{}", counter);

        let action_norm = normalize_action(&input.action);
        let key = tool_key(&input.action_type, &action_norm);
        let resource_ids = extract_resource_ids(&input.action_type, &action_norm);
        let op_type = classify_op(&input.action_type, &action_norm);

        let status = input.result.status.clone();

        let episode = Episode {
            tool_id: tool_id.clone(),
            action_type: input.action_type.clone(),
            action: action_norm,
            result: input.result,
            timestamp: input.timestamp,
            token_count: 0,
            status,
            cache: CacheInfo {
                tool_key: key,
                resource_ids,
                op_type,
            },
            context: input.context,
        };

        let content = serde_json::to_string_pretty(&episode)?;
        let token_count = self.tokenizer.count_tokens(&content);
        let episode = Episode {
            token_count,
            ..episode
        };
        let content = serde_json::to_string_pretty(&episode)?;

        let summary = format!(
            "{}: {} - {}",
            episode.action_type,
            brief_params(&episode.action),
            episode.status.to_uppercase()
        );

        self.store
            .upsert_node(&self.workflow, &tool_node_key(&tool_id), &summary, &content)?;

        Ok(tool_id)
    }

    pub fn get_episode(&self, tool_id: &str) -> Result<Option<Episode>, CoreError> {
        let node = self.store.get_node(&self.workflow, &tool_node_key(tool_id))?;
        match node {
            Some(n) => Ok(Some(serde_json::from_str(&n.content)?)),
            None => Ok(None),
        }
    }

    /// All episodes in this workflow, sorted by numeric `TR-N` ascending
    /// (not lexicographic string order — `TR-10` sorts after `TR-2`).
    pub fn list_episodes(&self) -> Result<Vec<Episode>, CoreError> {
        let nodes = self.store.list_nodes(&self.workflow)?;
        let mut episodes = Vec::new();
        for node in nodes {
            if node.key.starts_with("tool_result_") {
                episodes.push(serde_json::from_str::<Episode>(&node.content)?);
            }
        }
        episodes.sort_by_key(|e| tr_number(&e.tool_id));
        Ok(episodes)
    }

    /// Deletes an Episode and cascades to its Summary, if any.
    pub fn delete_episode(&self, tool_id: &str) -> Result<(), CoreError> {
        self.store
            .delete_node(&self.workflow, &summary_node_key(tool_id), true)?;
        self.store
            .delete_node(&self.workflow, &tool_node_key(tool_id), true)?;
        Ok(())
    }

    pub fn put_summary(&self, summary: &Summary) -> Result<(), CoreError> {
        let content = serde_json::to_string(summary)?;
        self.store.upsert_node(
            &self.workflow,
            &summary_node_key(&summary.tool_id),
            &format!("Summary of {}", summary.tool_id),
            &content,
        )?;
        self.store.upsert_edge(
            &self.workflow,
            &tool_node_key(&summary.tool_id),
            &summary_node_key(&summary.tool_id),
            EdgeRelation::Summarizes,
            &format!("Summary of tool result {}", summary.tool_id),
        )?;
        Ok(())
    }

    pub fn get_summary(&self, tool_id: &str) -> Result<Option<Summary>, CoreError> {
        let node = self
            .store
            .get_node(&self.workflow, &summary_node_key(tool_id))?;
        match node {
            Some(n) => Ok(Some(serde_json::from_str(&n.content)?)),
            None => Ok(None),
        }
    }

    pub fn delete_summary(&self, tool_id: &str) -> Result<(), CoreError> {
        self.store
            .delete_node(&self.workflow, &summary_node_key(tool_id), true)
    }

    /// Creates a Compression Group over an ordered list of `tool_ids`. The
    /// `group_key` is deterministic from that order, so a second call with
    /// the same ordered sequence is a caller error rather than a silent
    /// merge or overwrite.
    pub fn put_compression_group(&self, tool_ids: &[String]) -> Result<CompressionGroup, CoreError> {
        if tool_ids.is_empty() {
            return Err(CoreError::Validation(
                "compression group requires at least one tool_id".into(),
            ));
        }

        let group_key = compression_node_key(tool_ids);
        if self.store.get_node(&self.workflow, &group_key)?.is_some() {
            return Err(CoreError::Validation(format!(
                "compression group already exists for {}",
                group_key
            )));
        }

        let mut summary_parts = Vec::new();
        for tool_id in tool_ids {
            let text = match self.get_summary(tool_id)? {
                Some(s) => s.summary_content,
                None => "Summary not available".to_string(),
            };
            summary_parts.push(format!("[{}] {}", tool_id, text));
        }

        let group = CompressionGroup {
            group_key: group_key.clone(),
            tool_ids: tool_ids.to_vec(),
            summary: summary_parts.join(" | "),
            timestamp: Utc::now(),
        };

        let content = serde_json::to_string(&group)?;
        self.store.upsert_node(
            &self.workflow,
            &group_key,
            &format!("Compression of tools {}", tool_ids.join(", ")),
            &content,
        )?;

        for tool_id in tool_ids {
            self.store.upsert_edge(
                &self.workflow,
                &group_key,
                &tool_node_key(tool_id),
                EdgeRelation::Compresses,
                &format!("Compresses tool {}", tool_id),
            )?;
        }

        Ok(group)
    }

    pub fn get_compression_group(&self, group_key: &str) -> Result<Option<CompressionGroup>, CoreError> {
        let node = self.store.get_node(&self.workflow, group_key)?;
        match node {
            Some(n) => Ok(Some(serde_json::from_str(&n.content)?)),
            None => Ok(None),
        }
    }

    /// Every Compression Group in this workflow, keyed by `group_key`, for
    /// callers (the dashboard CLI command) that need the full set rather
    /// than one lookup at a time.
    pub fn list_compression_groups(&self) -> Result<std::collections::HashMap<String, CompressionGroup>, CoreError> {
        let nodes = self.store.list_nodes(&self.workflow)?;
        let mut groups = std::collections::HashMap::new();
        for node in nodes {
            if node.key.starts_with("compression_") {
                let group: CompressionGroup = serde_json::from_str(&node.content)?;
                groups.insert(node.key, group);
            }
        }
        Ok(groups)
    }

    pub fn upsert_resource(&self, resource_id: &str, last_write_ts: DateTime<Utc>) -> Result<(), CoreError> {
        let resource = Resource {
            resource_id: resource_id.to_string(),
            last_write_ts,
        };
        let content = serde_json::to_string(&resource)?;
        self.store.upsert_node(
            &self.workflow,
            &resource_node_key(resource_id),
            &format!("Resource {}", resource_id),
            &content,
        )
    }

    pub fn get_resource(&self, resource_id: &str) -> Result<Option<Resource>, CoreError> {
        let node = self
            .store
            .get_node(&self.workflow, &resource_node_key(resource_id))?;
        match node {
            Some(n) => Ok(Some(serde_json::from_str(&n.content)?)),
            None => Ok(None),
        }
    }

    pub fn delete_node_raw(&self, key: &str) -> Result<(), CoreError> {
        self.store.delete_node(&self.workflow, key, true)
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn is_write(op: OpType) -> bool {
        op == OpType::Write
    }
}

fn tr_number(tool_id: &str) -> u64 {
    tool_id
        .strip_prefix("TR-")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteGraphStore;
    use crate::tokenizer::HeuristicTokenizer;
    use crate::types::ActionResult;
    use serde_json::json;

    fn store() -> EpisodeStore {
        let backend = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        EpisodeStore::new(backend, Arc::new(HeuristicTokenizer), "wf1")
    }

    fn input(action_type: &str, action: serde_json::Value, status: &str) -> EpisodeInput {
        EpisodeInput {
            timestamp: Utc::now(),
            action_type: action_type.to_string(),
            action,
            result: ActionResult {
                status: status.to_string(),
                output: None,
                error: None,
            },
            context: None,
        }
    }

    #[test]
    fn add_episode_assigns_dense_monotonic_ids() {
        let es = store();
        let a = es
            .add_episode(input("read_file_contents", json!({"file_path": "x"}), "success"))
            .unwrap();
        let b = es
            .add_episode(input("read_file_contents", json!({"file_path": "y"}), "success"))
            .unwrap();
        assert_eq!(a, "TR-1");
        assert_eq!(b, "TR-2");
    }

    #[test]
    fn list_episodes_sorts_numerically_not_lexicographically() {
        let es = store();
        for _ in 0..11 {
            es.add_episode(input("read_file_contents", json!({"file_path": "x"}), "success"))
                .unwrap();
        }
        let episodes = es.list_episodes().unwrap();
        let ids: Vec<&str> = episodes.iter().map(|e| e.tool_id.as_str()).collect();
        assert_eq!(ids.last(), Some(&"TR-11"));
    }

    #[test]
    fn delete_episode_cascades_summary() {
        let es = store();
        let id = es
            .add_episode(input("read_file_contents", json!({"file_path": "x"}), "success"))
            .unwrap();
        es.put_summary(&Summary {
            tool_id: id.clone(),
            summary_content: "did a thing".into(),
            salient_data: None,
            token_count: 3,
            timestamp: Utc::now(),
        })
        .unwrap();
        es.delete_episode(&id).unwrap();
        assert!(es.get_episode(&id).unwrap().is_none());
        assert!(es.get_summary(&id).unwrap().is_none());
    }

    #[test]
    fn put_summary_twice_replaces_in_place() {
        let es = store();
        let id = es
            .add_episode(input("read_file_contents", json!({"file_path": "x"}), "success"))
            .unwrap();
        es.put_summary(&Summary {
            tool_id: id.clone(),
            summary_content: "first".into(),
            salient_data: None,
            token_count: 1,
            timestamp: Utc::now(),
        })
        .unwrap();
        es.put_summary(&Summary {
            tool_id: id.clone(),
            summary_content: "second".into(),
            salient_data: None,
            token_count: 1,
            timestamp: Utc::now(),
        })
        .unwrap();
        let summary = es.get_summary(&id).unwrap().unwrap();
        assert_eq!(summary.summary_content, "second");
    }

    #[test]
    fn compression_group_rejects_duplicate_ordered_set() {
        let es = store();
        let a = es
            .add_episode(input("read_file_contents", json!({"file_path": "x"}), "success"))
            .unwrap();
        let b = es
            .add_episode(input("read_file_contents", json!({"file_path": "y"}), "success"))
            .unwrap();
        es.put_compression_group(&[a.clone(), b.clone()]).unwrap();
        let err = es.put_compression_group(&[a, b]).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn resources_upsert_and_read_back() {
        let es = store();
        let ts = Utc::now();
        es.upsert_resource("app/db.py", ts).unwrap();
        let r = es.get_resource("app/db.py").unwrap().unwrap();
        assert_eq!(r.last_write_ts, ts);
    }

    #[test]
    fn list_compression_groups_returns_all_created_groups() {
        let es = store();
        let a = es
            .add_episode(input("read_file_contents", json!({"file_path": "x"}), "success"))
            .unwrap();
        let b = es
            .add_episode(input("read_file_contents", json!({"file_path": "y"}), "success"))
            .unwrap();
        let group = es.put_compression_group(&[a, b]).unwrap();
        let groups = es.list_compression_groups().unwrap();
        assert_eq!(groups.len(), 1);
        assert!(groups.contains_key(&group.group_key));
    }
}
