//! Summarizer Adapter: invokes the pluggable LLM collaborator to produce an
//! Episode's Summary, tolerating free text around the JSON payload and
//! falling back to a failure-summary rather than ever blocking Episode
//! persistence.
//!
//! The bundled `SubprocessSummarizer` pipes the prompt to a configured
//! child process and reads its stdout back, bounded with `wait-timeout` so
//! a hung summarizer can be cancelled without blocking the adapter or the
//! Episode it was asked to summarize.

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::Deserialize;
use wait_timeout::ChildExt;

use crate::episode_store::EpisodeStore;
use crate::error::CoreError;
use crate::tokenizer::Tokenizer;
use crate::types::Summary;

const TOOL_SUMMARY_PROMPT: &str = include_str!("../prompts/tool_summary.md");

/// The external LLM collaborator: given a system prompt and a user payload,
/// returns raw response text that should contain a JSON object somewhere
/// within it.
pub trait Summarizer: Send + Sync {
    fn complete(&self, system_prompt: &str, user_payload: &str) -> Result<String, CoreError>;
}

/// Invokes a configured local command (e.g. an `ollama run <model>`-style
/// invocation) with the system prompt and payload piped to stdin, reading
/// its stdout as the response.
pub struct SubprocessSummarizer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl SubprocessSummarizer {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

impl Summarizer for SubprocessSummarizer {
    fn complete(&self, system_prompt: &str, user_payload: &str) -> Result<String, CoreError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CoreError::Other(format!("failed to start {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let combined = format!("{system_prompt}\n\n{user_payload}");
            stdin
                .write_all(combined.as_bytes())
                .map_err(|e| CoreError::Other(format!("failed to write summarizer stdin: {e}")))?;
        }

        let mut stdout = child.stdout.take();

        let status = match child
            .wait_timeout(self.timeout)
            .map_err(|e| CoreError::Other(format!("failed to wait on summarizer: {e}")))?
        {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CoreError::Other(format!(
                    "summarizer timed out after {:?}",
                    self.timeout
                )));
            }
        };

        let mut raw_output = String::new();
        if let Some(ref mut out) = stdout {
            use std::io::Read;
            out.read_to_string(&mut raw_output)
                .map_err(|e| CoreError::Other(format!("failed to read summarizer output: {e}")))?;
        }

        if !status.success() {
            return Err(CoreError::Other(format!(
                "summarizer exited with status {status}"
            )));
        }

        Ok(raw_output)
    }
}

#[derive(Debug, Deserialize)]
struct RawSummaryResponse {
    summary: String,
    salient_data: Option<serde_json::Value>,
}

/// Takes the outermost `{...}` span from `text`, tolerating a response with
/// explanatory text wrapped around the JSON object.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

pub struct SummarizerAdapter<'a> {
    episodes: &'a EpisodeStore,
    summarizer: &'a dyn Summarizer,
    tokenizer: &'a dyn Tokenizer,
}

impl<'a> SummarizerAdapter<'a> {
    pub fn new(
        episodes: &'a EpisodeStore,
        summarizer: &'a dyn Summarizer,
        tokenizer: &'a dyn Tokenizer,
    ) -> Self {
        Self {
            episodes,
            summarizer,
            tokenizer,
        }
    }

    /// Generates and persists a Summary for `tool_id`. Never propagates a
    /// summarizer failure as an error — a parse or invocation failure is
    /// turned into a `"Summary generation failed: ..."` Summary with null
    /// `salient_data` instead, so Episode durability is never blocked on
    /// the external collaborator.
    pub fn summarize(&self, tool_id: &str) -> Result<Summary, CoreError> {
        let episode = self
            .episodes
            .get_episode(tool_id)?
            .ok_or_else(|| CoreError::Validation(format!("episode {tool_id} not found")))?;

        let payload = serde_json::json!({
            "action_type": episode.action_type,
            "action": episode.action,
            "result": episode.result,
            "context": episode.context,
        });
        let payload_text = serde_json::to_string_pretty(&payload)?;

        let (summary_content, salient_data) =
            match self.summarizer.complete(TOOL_SUMMARY_PROMPT, &payload_text) {
                Ok(raw) => match extract_json_object(&raw).and_then(|json| {
                    serde_json::from_str::<RawSummaryResponse>(json).ok()
                }) {
                    Some(parsed) => (parsed.summary, parsed.salient_data),
                    None => (
                        "Summary generation failed: could not parse summarizer response".to_string(),
                        None,
                    ),
                },
                Err(e) => (format!("Summary generation failed: {e}"), None),
            };

        let mut token_text = summary_content.clone();
        if let Some(data) = &salient_data {
            match data {
                serde_json::Value::String(s) => token_text.push_str(s),
                other => token_text.push_str(&other.to_string()),
            }
        }

        let summary = Summary {
            tool_id: tool_id.to_string(),
            summary_content,
            salient_data,
            token_count: self.tokenizer.count_tokens(&token_text),
            timestamp: chrono::Utc::now(),
        };

        self.episodes.put_summary(&summary)?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteGraphStore;
    use crate::tokenizer::HeuristicTokenizer;
    use crate::types::{ActionResult, EpisodeInput};
    use std::sync::Arc;

    struct StubSummarizer(String);

    impl Summarizer for StubSummarizer {
        fn complete(&self, _system_prompt: &str, _user_payload: &str) -> Result<String, CoreError> {
            Ok(self.0.clone())
        }
    }

    struct FailingSummarizer;

    impl Summarizer for FailingSummarizer {
        fn complete(&self, _system_prompt: &str, _user_payload: &str) -> Result<String, CoreError> {
            Err(CoreError::Other("connection refused".into()))
        }
    }

    fn make_episode_store() -> EpisodeStore {
        let backend = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        let es = EpisodeStore::new(backend, Arc::new(HeuristicTokenizer), "wf1");
        es.add_episode(EpisodeInput {
            timestamp: chrono::Utc::now(),
            action_type: "read_file_contents".to_string(),
            action: serde_json::json!({"file_path": "app/db.py"}),
            result: ActionResult {
                status: "success".to_string(),
                output: Some("contents".to_string()),
                error: None,
            },
            context: None,
        })
        .unwrap();
        es
    }

    #[test]
    fn extracts_json_embedded_in_surrounding_text() {
        let text = "here is the result: {\"summary\": \"ok\", \"salient_data\": null} thanks";
        let json = extract_json_object(text).unwrap();
        assert!(json.starts_with('{') && json.ends_with('}'));
    }

    #[test]
    fn summarize_persists_parsed_summary() {
        let es = make_episode_store();
        let raw = r#"{"summary": "read the db module", "salient_data": {"lines": 42}}"#;
        let summarizer = StubSummarizer(raw.to_string());
        let tokenizer = HeuristicTokenizer;
        let adapter = SummarizerAdapter::new(&es, &summarizer, &tokenizer);

        let summary = adapter.summarize("TR-1").unwrap();
        assert_eq!(summary.summary_content, "read the db module");
        assert!(summary.salient_data.is_some());

        let stored = es.get_summary("TR-1").unwrap().unwrap();
        assert_eq!(stored.summary_content, "read the db module");
    }

    #[test]
    fn summarizer_failure_falls_back_without_blocking_persistence() {
        let es = make_episode_store();
        let summarizer = FailingSummarizer;
        let tokenizer = HeuristicTokenizer;
        let adapter = SummarizerAdapter::new(&es, &summarizer, &tokenizer);

        let summary = adapter.summarize("TR-1").unwrap();
        assert!(summary.summary_content.starts_with("Summary generation failed"));
        assert!(summary.salient_data.is_none());
        assert!(es.get_summary("TR-1").unwrap().is_some());
    }

    #[test]
    fn unparseable_response_falls_back() {
        let es = make_episode_store();
        let summarizer = StubSummarizer("not json at all".to_string());
        let tokenizer = HeuristicTokenizer;
        let adapter = SummarizerAdapter::new(&es, &summarizer, &tokenizer);

        let summary = adapter.summarize("TR-1").unwrap();
        assert!(summary.summary_content.starts_with("Summary generation failed"));
    }
}
