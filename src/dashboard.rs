//! Dashboard Renderer: the token-bounded, compression-aware view of active
//! tool results. The output format is a fixed interface exercised with
//! literal string assertions, so every line here is exact on purpose.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::episode_store::EpisodeStore;
use crate::error::CoreError;
use crate::types::CompressionGroup;

const HEADER: &str = "=== ACTIVE TOOL RESULTS ===";
const MAX_TOKENS: usize = 100_000;

/// Renders the dashboard for every episode in the store, collapsing
/// members of `compressed_groups` into one line each unless their
/// `tool_id` also appears in `expanded_tool_ids`.
pub fn render(
    episodes: &EpisodeStore,
    compressed_groups: &HashMap<String, CompressionGroup>,
    expanded_tool_ids: &HashSet<String>,
) -> Result<String, CoreError> {
    let all = episodes.list_episodes()?;

    if all.is_empty() {
        return Ok(format!("{HEADER}\nNo tool results yet."));
    }

    let mut compressed_tool_ids: HashSet<&str> = HashSet::new();
    for group in compressed_groups.values() {
        for tool_id in &group.tool_ids {
            compressed_tool_ids.insert(tool_id.as_str());
        }
    }

    let mut lines = vec![HEADER.to_string()];
    let mut total_tokens: usize = 0;

    for episode in &all {
        let tool_id = episode.tool_id.as_str();

        if compressed_tool_ids.contains(tool_id) && !expanded_tool_ids.contains(tool_id) {
            let line = match episodes.get_summary(tool_id)? {
                Some(summary) => render_with_salient_data(&summary.summary_content, summary.salient_data.as_ref()),
                None => format!("Summary not available for {tool_id}"),
            };
            lines.push(format!("[{tool_id}] {line} [COMPRESSED]"));
        } else {
            let status = episode.status.to_uppercase();
            let warning = if episode.status.to_lowercase() == "error" || episode.token_count > 5000 {
                " \u{26a0}\u{fe0f}"
            } else {
                ""
            };

            lines.push(format!(
                "[{tool_id}] {} - {status} ({} tokens){warning}",
                episode.action_type,
                format_thousands(episode.token_count)
            ));
            lines.push(format!("Input: {}", spaced_json(&episode.action)));
            lines.push(format!("Result: {}", status.to_lowercase()));

            if let Some(output) = &episode.result.output {
                if !output.is_empty() {
                    lines.push(format!("Output: {output}"));
                }
            }
            if let Some(error) = &episode.result.error {
                if !error.is_empty() {
                    lines.push(format!("Error: {error}"));
                }
            }
        }

        lines.push(String::new());
        total_tokens += episode.token_count;
    }

    let usage_percent = (total_tokens as f64 / MAX_TOKENS as f64) * 100.0;
    lines.push(format!(
        "Token Usage: {} / {} ({:.1}%)",
        format_thousands(total_tokens),
        format_thousands(MAX_TOKENS),
        usage_percent
    ));

    Ok(lines.join("\n"))
}

/// Formats `summary_text` with its salient data appended parenthetically,
/// truncating string values over 50 characters.
fn render_with_salient_data(summary_text: &str, salient_data: Option<&serde_json::Value>) -> String {
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
                    format!("{k}: {s}")
                })
                .collect();
            format!("{summary_text} ({})", parts.join(", "))
        }
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
            format!("{summary_text} ({s})")
        }
        Some(serde_json::Value::Array(items)) if !items.is_empty() => {
            let parts: Vec<String> = items
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            format!("{summary_text} ({})", parts.join(", "))
        }
        _ => summary_text.to_string(),
    }
}

/// Renders a JSON value with a space after every `:` and `,`, the
/// conventional default separators rather than `serde_json`'s compact
/// no-space form — this is what the `Input:` line has always looked like.
fn spaced_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", serde_json::to_string(k).unwrap(), spaced_json(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(spaced_json).collect();
            format!("[{}]", parts.join(", "))
        }
        other => serde_json::to_string(other).unwrap(),
    }
}

/// Formats an integer with comma thousands separators (`1234567` →
/// `"1,234,567"`).
fn format_thousands(n: usize) -> String {
    let s = n.to_string();
    let bytes = s.as_bytes();
    let mut out = String::new();
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 && (bytes.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(*b as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteGraphStore;
    use crate::tokenizer::HeuristicTokenizer;
    use crate::types::{ActionResult, EpisodeInput, Summary};
    use std::sync::Arc;

    fn make_store() -> EpisodeStore {
        let backend = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        EpisodeStore::new(backend, Arc::new(HeuristicTokenizer), "wf1")
    }

    #[test]
    fn empty_dashboard_shows_placeholder() {
        let es = make_store();
        let out = render(&es, &HashMap::new(), &HashSet::new()).unwrap();
        assert_eq!(out, "=== ACTIVE TOOL RESULTS ===\nNo tool results yet.");
    }

    #[test]
    fn format_thousands_groups_by_three_digits() {
        assert_eq!(format_thousands(0), "0");
        assert_eq!(format_thousands(999), "999");
        assert_eq!(format_thousands(1000), "1,000");
        assert_eq!(format_thousands(100000), "100,000");
    }

    #[test]
    fn expanded_episode_renders_full_block_and_footer() {
        let es = make_store();
        es.add_episode(EpisodeInput {
            timestamp: chrono::Utc::now(),
            action_type: "read_file_contents".to_string(),
            action: serde_json::json!({"file_path": "x.py"}),
            result: ActionResult {
                status: "success".to_string(),
                output: Some("hello".to_string()),
                error: None,
            },
            context: None,
        })
        .unwrap();

        let out = render(&es, &HashMap::new(), &HashSet::new()).unwrap();
        assert!(out.starts_with("=== ACTIVE TOOL RESULTS ===\n[TR-1] read_file_contents - SUCCESS"));
        assert!(out.contains("Output: hello"));
        assert!(out.contains("Token Usage:"));
    }

    #[test]
    fn compressed_episode_renders_one_line_unless_expanded() {
        let es = make_store();
        let id = es
            .add_episode(EpisodeInput {
                timestamp: chrono::Utc::now(),
                action_type: "read_file_contents".to_string(),
                action: serde_json::json!({"file_path": "x.py"}),
                result: ActionResult {
                    status: "success".to_string(),
                    output: None,
                    error: None,
                },
                context: None,
            })
            .unwrap();
        es.put_summary(&Summary {
            tool_id: id.clone(),
            summary_content: "read x.py".to_string(),
            salient_data: None,
            token_count: 2,
            timestamp: chrono::Utc::now(),
        })
        .unwrap();

        let mut groups = HashMap::new();
        groups.insert(
            "compression_TR-1".to_string(),
            CompressionGroup {
                group_key: "compression_TR-1".to_string(),
                tool_ids: vec![id.clone()],
                summary: "read x.py".to_string(),
                timestamp: chrono::Utc::now(),
            },
        );

        let collapsed = render(&es, &groups, &HashSet::new()).unwrap();
        assert!(collapsed.contains("[TR-1] read x.py [COMPRESSED]"));

        let mut expanded_ids = HashSet::new();
        expanded_ids.insert(id);
        let expanded = render(&es, &groups, &expanded_ids).unwrap();
        assert!(expanded.contains("[TR-1] read_file_contents - SUCCESS"));
        assert!(!expanded.contains("[COMPRESSED]"));
    }

    #[test]
    fn error_status_adds_warning_glyph() {
        let es = make_store();
        es.add_episode(EpisodeInput {
            timestamp: chrono::Utc::now(),
            action_type: "read_file_contents".to_string(),
            action: serde_json::json!({"file_path": "x.py"}),
            result: ActionResult {
                status: "error".to_string(),
                output: None,
                error: Some("not found".to_string()),
            },
            context: None,
        })
        .unwrap();

        let out = render(&es, &HashMap::new(), &HashSet::new()).unwrap();
        assert!(out.contains("\u{26a0}\u{fe0f}"));
        assert!(out.contains("Error: not found"));
    }
}
