//! epicache: a cache-coherent episodic memory substrate for LLM agent tool
//! invocations. Every tool call becomes an Episode; reads of still-valid
//! Episodes are served from cache instead of re-executed; writes tombstone
//! the reads they invalidate; summaries and compression groups keep a long
//! session within a token budget.
//!
//! The crate is organized as a small pipeline of collaborators wired
//! together by the [`Workflow`] facade:
//! - [`fingerprint`] turns a raw action into a stable cache key, an op
//!   type, and the resource ids it touches.
//! - [`episode_store`] persists Episodes, Summaries, Compression Groups,
//!   and Resources over a pluggable [`store::GraphStore`].
//! - [`coherence`] answers preflight cache lookups and runs write-driven
//!   invalidation.
//! - [`summarizer`] calls out to a pluggable LLM collaborator to compress
//!   an Episode into a Summary.
//! - [`dashboard`] renders the token-bounded view of active results.

pub mod coherence;
pub mod config;
pub mod dashboard;
pub mod episode_store;
pub mod error;
pub mod fingerprint;
pub mod store;
pub mod summarizer;
pub mod tokenizer;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;

use coherence::{CacheHit, CoherenceEngine, WorkflowLocks};
use episode_store::EpisodeStore;
use error::CoreError;
use fingerprint::classify_op;
use store::GraphStore;
use summarizer::{Summarizer, SummarizerAdapter};
use tokenizer::Tokenizer;
use types::{CompressionGroup, EpisodeInput, OpType, Summary};

/// Ties the Episode Store, Coherence Engine, and Summarizer Adapter
/// together into the single entry point callers use: submit a tool
/// invocation, get back either a cache hit or a freshly minted `tool_id`,
/// with write-driven housekeeping run automatically in the latter case.
///
/// This is the crate's equivalent of a single long-lived session: one
/// `Workflow` per `workflow_id`, sharing one [`WorkflowLocks`] registry so
/// concurrent preflight and housekeeping calls for the same workflow never
/// interleave.
pub struct Workflow {
    episodes: EpisodeStore,
    locks: WorkflowLocks,
}

impl Workflow {
    pub fn new(store: Arc<dyn GraphStore>, tokenizer: Arc<dyn Tokenizer>, workflow_id: &str) -> Self {
        Self {
            episodes: EpisodeStore::new(store, tokenizer, workflow_id),
            locks: WorkflowLocks::new(),
        }
    }

    pub fn episodes(&self) -> &EpisodeStore {
        &self.episodes
    }

    fn coherence(&self) -> CoherenceEngine<'_> {
        CoherenceEngine::new(&self.episodes, &self.locks)
    }

    /// Looks up a cached result for `(action_type, action)` before the
    /// caller executes the tool. A `Some` result means the caller should
    /// reuse it instead of invoking the tool again.
    pub fn preflight(&self, action_type: &str, action: &serde_json::Value) -> Result<Option<CacheHit>, CoreError> {
        self.coherence().preflight(action_type, action)
    }

    /// Records a tool invocation's result as a new Episode. If the action
    /// is a write, runs post-write housekeeping against every resource it
    /// touches immediately afterward, so the Episode is durable before any
    /// stale reads it invalidates are purged.
    pub fn add_episode(&self, input: EpisodeInput) -> Result<String, CoreError> {
        let action_type = input.action_type.clone();
        let action = input.action.clone();
        let timestamp = input.timestamp;

        let tool_id = self.episodes.add_episode(input)?;

        let normalized = fingerprint::normalize_action(&action);
        if classify_op(&action_type, &normalized) == OpType::Write {
            let coherence = self.coherence();
            for resource_id in fingerprint::extract_resource_ids(&action_type, &normalized) {
                coherence.post_write_housekeeping(&resource_id, timestamp)?;
            }
        }

        Ok(tool_id)
    }

    /// Generates and persists a Summary for `tool_id` via the supplied
    /// summarizer collaborator.
    pub fn summarize(&self, tool_id: &str, summarizer: &dyn Summarizer, tokenizer: &dyn Tokenizer) -> Result<Summary, CoreError> {
        SummarizerAdapter::new(&self.episodes, summarizer, tokenizer).summarize(tool_id)
    }

    /// Collapses an ordered list of `tool_ids` into a single Compression
    /// Group for the dashboard to render as one line.
    pub fn compress(&self, tool_ids: &[String]) -> Result<CompressionGroup, CoreError> {
        self.episodes.put_compression_group(tool_ids)
    }

    /// Renders the dashboard over every Episode, collapsing Compression
    /// Group members not present in `expanded_tool_ids`.
    pub fn dashboard(&self, compressed_groups: &HashMap<String, CompressionGroup>, expanded_tool_ids: &HashSet<String>) -> Result<String, CoreError> {
        dashboard::render(&self.episodes, compressed_groups, expanded_tool_ids)
    }

    /// Wipes every node and edge belonging to this workflow.
    pub fn reset(&self, store: &dyn GraphStore) -> Result<(), CoreError> {
        store.reset_workflow(self.episodes.workflow())
    }

    /// Current wall-clock timestamp, for callers building an `EpisodeInput`.
    pub fn now() -> chrono::DateTime<Utc> {
        Utc::now()
    }
}
