//! Coherence Engine: preflight cache lookups and write-driven invalidation.
//!
//! Preflight and post-write housekeeping are serialized relative to each
//! other within a workflow via a per-workflow `Mutex` so preflight never
//! observes a tombstoned episode as live mid-purge.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::episode_store::EpisodeStore;
use crate::error::CoreError;
use crate::fingerprint::{extract_resource_ids, normalize_action, tool_key, READ_ACTION_TYPES};
use crate::types::Episode;

/// Registry of per-workflow mutexes. One `WorkflowLocks` is shared across
/// every `CoherenceEngine` a process creates, so preflight and post-write
/// housekeeping for the same workflow always serialize against each other
/// even when called from different threads, and preflight never reads a
/// tombstoned episode as live mid-purge.
#[derive(Default)]
pub struct WorkflowLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkflowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, workflow: &str) -> Arc<Mutex<()>> {
        let mut registry = self.inner.lock().unwrap();
        registry
            .entry(workflow.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// A successful cache reuse: the `tool_id` whose result is being reused and
/// a rendered one-line description for the caller to show in place of
/// re-executing the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
    pub tool_id: String,
    pub text: String,
}

pub struct CoherenceEngine<'a> {
    episodes: &'a EpisodeStore,
    locks: &'a WorkflowLocks,
}

impl<'a> CoherenceEngine<'a> {
    pub fn new(episodes: &'a EpisodeStore, locks: &'a WorkflowLocks) -> Self {
        Self { episodes, locks }
    }

    fn with_workflow_lock<T>(&self, f: impl FnOnce() -> Result<T, CoreError>) -> Result<T, CoreError> {
        let lock = self.locks.lock_for(self.episodes.workflow());
        let _guard = lock.lock().unwrap();
        f()
    }

    /// Looks for the latest successful Episode matching `(action_type,
    /// action)`'s fingerprint and, if no resource it touched has been
    /// written to since, returns a cache hit. Never errors on a miss.
    pub fn preflight(
        &self,
        action_type: &str,
        action: &serde_json::Value,
    ) -> Result<Option<CacheHit>, CoreError> {
        self.with_workflow_lock(|| {
            let key = tool_key(action_type, action);
            let episodes = self.episodes.list_episodes()?;

            let mut latest: Option<&Episode> = None;
            for episode in &episodes {
                if episode.action_type != action_type {
                    continue;
                }
                if episode.status.to_lowercase() != "success" {
                    continue;
                }
                if episode.cache.tool_key != key {
                    continue;
                }
                latest = match latest {
                    None => Some(episode),
                    Some(current) if episode.timestamp > current.timestamp => Some(episode),
                    Some(current) => Some(current),
                };
            }

            let Some(hit) = latest else {
                return Ok(None);
            };

            if !self.is_valid(hit, action_type, action)? {
                return Ok(None);
            }

            let text = self
                .render_hit_text(&hit.tool_id, action_type)?
                .unwrap_or_else(|| format!("Reused prior result for {}", action_type));

            Ok(Some(CacheHit {
                tool_id: hit.tool_id.clone(),
                text,
            }))
        })
    }

    /// A cached success is valid iff no resource it touches has a more
    /// recent `last_write_ts` than the cached episode's own timestamp.
    /// Resource ids are recomputed from the *live* request, not the stored
    /// episode, so a caller's new invocation is checked against its own
    /// resource set.
    fn is_valid(
        &self,
        hit: &Episode,
        action_type: &str,
        action: &serde_json::Value,
    ) -> Result<bool, CoreError> {
        let norm = normalize_action(action);
        let resource_ids = extract_resource_ids(action_type, &norm);
        for rid in resource_ids {
            if let Some(resource) = self.episodes.get_resource(&rid)? {
                if resource.last_write_ts > hit.timestamp {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn render_hit_text(&self, tool_id: &str, _action_type: &str) -> Result<Option<String>, CoreError> {
        if let Some(summary) = self.episodes.get_summary(tool_id)? {
            return Ok(Some(render_summary_with_salient_data(&summary.summary_content, summary.salient_data.as_ref())));
        }
        Ok(None)
    }

    /// Formats a reused-from-cache line for callers to surface in place of
    /// re-executing a tool.
    pub fn render_reused_result(hit: &CacheHit) -> String {
        format!("[REUSED {}] {} [FROM CACHE]", hit.tool_id, hit.text)
    }

    /// Records a write to `resource_id` at `write_ts` and tombstones any
    /// now-stale cached reads that touched it. Returns the number of
    /// episodes purged. `write_ts` never moves `last_write_ts` backwards.
    pub fn post_write_housekeeping(
        &self,
        resource_id: &str,
        write_ts: DateTime<Utc>,
    ) -> Result<usize, CoreError> {
        self.with_workflow_lock(|| {
            if let Some(existing) = self.episodes.get_resource(resource_id)? {
                if existing.last_write_ts >= write_ts {
                    return self.delete_stale_reads(resource_id, write_ts);
                }
            }
            self.episodes.upsert_resource(resource_id, write_ts)?;
            self.delete_stale_reads(resource_id, write_ts)
        })
    }

    fn delete_stale_reads(&self, resource_id: &str, write_ts: DateTime<Utc>) -> Result<usize, CoreError> {
        let episodes = self.episodes.list_episodes()?;
        let mut deleted = 0usize;

        for episode in episodes {
            if !READ_ACTION_TYPES.contains(&episode.action_type.as_str()) {
                continue;
            }
            if episode.status.to_lowercase() != "success" {
                continue;
            }
            if !episode.cache.resource_ids.iter().any(|r| r == resource_id) {
                continue;
            }
            if episode.timestamp < write_ts {
                self.episodes.delete_episode(&episode.tool_id)?;
                deleted += 1;
            }
        }

        Ok(deleted)
    }
}

fn render_summary_with_salient_data(summary_text: &str, salient_data: Option<&serde_json::Value>) -> String {
    match salient_data {
        Some(serde_json::Value::Object(map)) if !map.is_empty() => {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| {
                    let mut s = match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    if s.chars().count() > 50 {
                        s = format!("{}...", s.chars().take(50).collect::<String>());
                    }
                    format!("{}: {}", k, s)
                })
                .collect();
            format!("{} ({})", summary_text, parts.join(", "))
        }
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
            format!("{} ({})", summary_text, s)
        }
        Some(serde_json::Value::Array(items)) if !items.is_empty() => {
            let parts: Vec<String> = items
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            format!("{} ({})", summary_text, parts.join(", "))
        }
        _ => summary_text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode_store::EpisodeStore;
    use crate::store::sqlite::SqliteGraphStore;
    use crate::tokenizer::HeuristicTokenizer;
    use crate::types::{ActionResult, EpisodeInput, Summary};
    use serde_json::json;

    fn setup() -> (EpisodeStore, WorkflowLocks) {
        let backend = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        (
            EpisodeStore::new(backend, Arc::new(HeuristicTokenizer), "wf1"),
            WorkflowLocks::new(),
        )
    }

    fn input(action_type: &str, action: serde_json::Value, status: &str, ts: DateTime<Utc>) -> EpisodeInput {
        EpisodeInput {
            timestamp: ts,
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
    fn preflight_misses_with_no_episodes() {
        let (es, locks) = setup();
        let engine = CoherenceEngine::new(&es, &locks);
        let hit = engine
            .preflight("read_file_contents", &json!({"file_path": "x"}))
            .unwrap();
        assert!(hit.is_none());
    }

    #[test]
    fn preflight_hits_on_duplicate_read() {
        let (es, locks) = setup();
        let engine = CoherenceEngine::new(&es, &locks);
        let t0 = Utc::now();
        let action = json!({"file_path": "app/db.py"});
        let id = es
            .add_episode(input("read_file_contents", action.clone(), "success", t0))
            .unwrap();
        es.put_summary(&Summary {
            tool_id: id.clone(),
            summary_content: "read the db module".into(),
            salient_data: None,
            token_count: 4,
            timestamp: t0,
        })
        .unwrap();

        let hit = engine.preflight("read_file_contents", &action).unwrap().unwrap();
        assert_eq!(hit.tool_id, id);
        assert!(hit.text.contains("read the db module"));
    }

    #[test]
    fn preflight_never_hits_on_error_status() {
        let (es, locks) = setup();
        let engine = CoherenceEngine::new(&es, &locks);
        let action = json!({"file_path": "app/db.py"});
        es.add_episode(input("read_file_contents", action.clone(), "error", Utc::now()))
            .unwrap();
        let hit = engine.preflight("read_file_contents", &action).unwrap();
        assert!(hit.is_none());
    }

    #[test]
    fn preflight_prefers_later_tool_id_when_duplicates_exist() {
        let (es, locks) = setup();
        let engine = CoherenceEngine::new(&es, &locks);
        let action = json!({"file_path": "app/db.py"});
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(10);
        es.add_episode(input("read_file_contents", action.clone(), "success", t0))
            .unwrap();
        let later = es
            .add_episode(input("read_file_contents", action.clone(), "success", t1))
            .unwrap();

        let hit = engine.preflight("read_file_contents", &action).unwrap().unwrap();
        assert_eq!(hit.tool_id, later);
    }

    #[test]
    fn write_invalidates_prior_read_of_same_resource() {
        let (es, locks) = setup();
        let engine = CoherenceEngine::new(&es, &locks);
        let t0 = Utc::now();
        let read_action = json!({"file_path": "app/db.py"});
        let read_id = es
            .add_episode(input("read_file_contents", read_action.clone(), "success", t0))
            .unwrap();

        let t1 = t0 + chrono::Duration::seconds(10);
        let write_action = json!({"file_path": "app/db.py", "code": "new contents"});
        es.add_episode(input("modify_code", json!({"files": ["app/db.py"]}), "success", t1))
            .unwrap();
        let purged = engine.post_write_housekeeping("app/db.py", t1).unwrap();
        assert_eq!(purged, 1);
        assert!(es.get_episode(&read_id).unwrap().is_none());

        let _ = write_action;
        let hit = engine.preflight("read_file_contents", &read_action).unwrap();
        assert!(hit.is_none());
    }

    #[test]
    fn unrelated_write_does_not_invalidate() {
        let (es, locks) = setup();
        let engine = CoherenceEngine::new(&es, &locks);
        let t0 = Utc::now();
        let read_action = json!({"file_path": "app/db.py"});
        let read_id = es
            .add_episode(input("read_file_contents", read_action.clone(), "success", t0))
            .unwrap();

        let t1 = t0 + chrono::Duration::seconds(10);
        let purged = engine.post_write_housekeeping("app/other.py", t1).unwrap();
        assert_eq!(purged, 0);
        assert!(es.get_episode(&read_id).unwrap().is_some());

        let hit = engine.preflight("read_file_contents", &read_action).unwrap();
        assert!(hit.is_some());
    }
}
