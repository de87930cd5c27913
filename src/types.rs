//! Data model: Episode, Summary, Compression Group, Resource.
//!
//! One Episode per tool invocation, at most one Summary per Episode,
//! Resource nodes tracking the last write timestamp that touched them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether an action is expected to mutate state the cache must track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    Read,
    Write,
}

impl OpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::Read => "read",
            OpType::Write => "write",
        }
    }
}

/// Fingerprint + resource bookkeeping attached to every stored Episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheInfo {
    pub tool_key: String,
    pub resource_ids: Vec<String>,
    pub op_type: OpType,
}

/// `{status, output, error}` payload produced by a tool invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Optional free-text reasoning attached by the calling agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodeContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A single tool invocation entry as submitted by the caller, before it is
/// assigned a `tool_id` and cache metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeInput {
    pub timestamp: DateTime<Utc>,
    pub action_type: String,
    #[serde(default)]
    pub action: serde_json::Value,
    pub result: ActionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<EpisodeContext>,
}

/// A persisted tool invocation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub tool_id: String,
    pub action_type: String,
    pub action: serde_json::Value,
    pub result: ActionResult,
    pub timestamp: DateTime<Utc>,
    pub token_count: usize,
    pub status: String,
    pub cache: CacheInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<EpisodeContext>,
}

/// LLM-generated summary of an Episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub tool_id: String,
    pub summary_content: String,
    pub salient_data: Option<serde_json::Value>,
    pub token_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// A named group of Episodes collapsed into a single dashboard line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionGroup {
    pub group_key: String,
    pub tool_ids: Vec<String>,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

/// Tracks the last write observed against a resource anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub resource_id: String,
    pub last_write_ts: DateTime<Utc>,
}

/// The two edge relations this cache's graph model needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeRelation {
    Summarizes,
    Compresses,
}

impl EdgeRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeRelation::Summarizes => "SUMMARIZES",
            EdgeRelation::Compresses => "COMPRESSES",
        }
    }
}
