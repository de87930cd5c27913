//! Configuration loading and management for epicache.
//!
//! # Architecture overview
//!
//! Configuration lives in `~/.config/epicache/config.toml` and is purely optional.
//! When absent, every option falls back to a sensible default so that epicache works
//! out of the box against an in-memory store and a heuristic tokenizer.
//!
//! Config values flow into the rest of the system through two paths:
//! 1. **`Config::load()`** — used at startup by the CLI to fill in defaults before
//!    opening the backend.
//! 2. **`get_value` / `set_value` / `unset_value`** — used by `epicache get/set/unset`
//!    subcommands to read and write individual keys from the live file.
//!
//! # Design philosophy
//!
//! CLI flags always override config values. `main.rs` merges them after loading
//! config, so this module only needs to expose the raw config data and the
//! mutation helpers — it does not need to know about the CLI at all.
//!
//! # TRADE-OFFS
//!
//! - `toml_edit` is used instead of plain `toml` for the mutation helpers because it
//!   preserves comments and formatting in the user's config file. This adds a second
//!   TOML dependency but is worth it to avoid silently destroying hand-written comments.
//! - `db_path` is stored as `Option<String>` rather than `Option<PathBuf>` so that
//!   tilde expansion happens at point-of-use rather than at parse time, making
//!   serialization round-trips lossless.

use std::path::PathBuf;

use serde::Deserialize;
use toml_edit::DocumentMut;

use crate::error::CoreError;

/// Summarizer subprocess options from `[summarizer]` table.
///
/// WHY: Isolating the summarizer invocation in a sub-struct keeps the top-level
/// `Config` flat and maps cleanly to the `[summarizer]` TOML table.
#[derive(Debug, Deserialize)]
pub struct SummarizerConfig {
    /// Program to invoke (e.g. `"claude"`, `"ollama"`).
    pub command: Option<String>,
    /// Extra arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,
    /// Timeout in seconds before a summarizer invocation is killed.
    pub timeout_secs: Option<u64>,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_secs: None,
        }
    }
}

/// Top-level config deserialized from `~/.config/epicache/config.toml`.
///
/// All fields are optional. Missing fields fall back to built-in defaults, so a
/// config file with a single key is valid and common. `Config::load()` returns
/// `Config::default()` when the file is absent rather than erroring, so epicache
/// is always runnable without any configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Default SQLite database path. Falls back to an in-memory store when unset.
    pub db_path: Option<String>,
    /// Default workflow id used when `--workflow` is not passed.
    pub workflow: Option<String>,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
}

impl Config {
    /// Load config from `~/.config/epicache/config.toml`.
    ///
    /// Returns `Config::default()` silently when the file is absent — epicache is
    /// designed to be zero-config, so a missing file is never an error. Parse
    /// failures also fall back to default to avoid breaking normal usage when a
    /// user has written an invalid value.
    pub fn load() -> Config {
        let Some(home) = dirs::home_dir() else {
            return Config::default();
        };
        let path = home.join(".config/epicache/config.toml");
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Config::default();
        };
        toml::from_str(&content).unwrap_or_default()
    }

    /// Resolve the configured database path, expanding a leading `~` to the home directory.
    ///
    /// Returns `None` when no path is configured, signalling to callers that they
    /// should fall back to an in-memory store.
    pub fn db_path(&self) -> Option<PathBuf> {
        self.db_path.as_deref().map(expand_tilde)
    }
}

/// Print a config value by dotted key (e.g. `"summarizer.command"` or `"workflow"`).
///
/// Reads the live config file so that comments and formatting written by the user
/// are not disturbed. Errors if the key does not exist.
pub fn get_value(key: &str) -> Result<(), CoreError> {
    let content = read_config_file()?;
    let doc: DocumentMut = content
        .parse()
        .map_err(|e| CoreError::Other(format!("Failed to parse config: {e}")))?;

    let value = resolve_key(&doc, key);
    match value {
        Some(item) => {
            println!("{}", format_item(item));
            Ok(())
        }
        None => Err(CoreError::Other(format!("Key not found: {key}"))),
    }
}

/// Write a config value by dotted key (e.g. `epicache set summarizer.timeout_secs 30`).
///
/// Creates the config file and any intermediate TOML tables as needed. Values are
/// type-inferred from their string representation — `"true"` / `"false"` become
/// booleans, numeric strings become integers or floats, and everything else becomes
/// a string. This matches the most common user expectation without requiring type
/// annotations.
pub fn set_value(key: &str, value: &str) -> Result<(), CoreError> {
    let content = read_config_file().unwrap_or_default();
    let mut doc: DocumentMut = content
        .parse()
        .map_err(|e| CoreError::Other(format!("Failed to parse config: {e}")))?;

    let (table_path, field) = split_key(key)?;

    let mut table = doc.as_table_mut();
    for segment in &table_path {
        if !table.contains_key(segment) {
            table.insert(segment, toml_edit::Item::Table(toml_edit::Table::new()));
        }
        table = table[segment]
            .as_table_mut()
            .ok_or_else(|| CoreError::Other(format!("'{segment}' is not a table")))?;
    }

    let toml_value = infer_value(value);
    table.insert(&field, toml_edit::Item::Value(toml_value));

    write_config_file(&doc.to_string())?;
    Ok(())
}

/// Remove a config value by dotted key (`epicache unset <key>`).
///
/// Errors if the key does not exist, so the command gives clear feedback rather
/// than silently succeeding on a typo.
pub fn unset_value(key: &str) -> Result<(), CoreError> {
    let content = read_config_file()?;
    let mut doc: DocumentMut = content
        .parse()
        .map_err(|e| CoreError::Other(format!("Failed to parse config: {e}")))?;

    let (table_path, field) = split_key(key)?;

    let mut table = doc.as_table_mut();
    for segment in &table_path {
        table = table
            .get_mut(segment)
            .and_then(|item| item.as_table_mut())
            .ok_or_else(|| CoreError::Other(format!("Key not found: {key}")))?;
    }

    if table.remove(&field).is_none() {
        return Err(CoreError::Other(format!("Key not found: {key}")));
    }

    write_config_file(&doc.to_string())?;
    Ok(())
}

/// Print all config values in `key = value` format (`epicache get`).
///
/// Lists every leaf key in the config file using dotted notation so that the
/// output can be copy-pasted directly into `epicache set` commands.
pub fn list_values() -> Result<(), CoreError> {
    let content = read_config_file()?;
    let doc: DocumentMut = content
        .parse()
        .map_err(|e| CoreError::Other(format!("Failed to parse config: {e}")))?;

    let mut entries = Vec::new();
    collect_entries(doc.as_table(), "", &mut entries);

    if entries.is_empty() {
        eprintln!("No config values set.");
    } else {
        for (key, value) in entries {
            println!("{key} = {value}");
        }
    }
    Ok(())
}

/// Write the default config template to `~/.config/epicache/config.toml`.
///
/// All options are commented out so that the file documents what is available
/// without actually changing any behavior. Errors if the file already exists to
/// avoid silently overwriting user customizations.
pub fn init() -> Result<(), CoreError> {
    let path = config_path()?;
    if path.exists() {
        return Err(CoreError::Other(format!(
            "Config file already exists: {}",
            path.display()
        )));
    }

    let template = r#"# epicache configuration
# See: epicache docs

# SQLite database path. Leave commented to use an in-memory store.
# db_path = "~/.local/share/epicache/graph.db"

# Default workflow id when --workflow is not passed
# workflow = "default"

[summarizer]
# Program invoked to generate tool-result summaries
# command = "claude"
# args = ["-p"]
# timeout_secs = 30
"#;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, template)?;

    eprintln!("Created config file: {}", path.display());
    eprintln!();
    eprintln!("Edit it directly, or use:");
    eprintln!("  epicache set db_path ~/.local/share/epicache/graph.db");
    eprintln!("  epicache set summarizer.command claude");
    eprintln!("  epicache get");

    Ok(())
}

// ── Private helpers ───────────────────────────────────────────────────────────
//
// These functions handle the low-level mechanics of reading, writing, and
// navigating the TOML document. They are kept private because callers should use
// the public API above rather than manipulating the document directly.

fn config_path() -> Result<PathBuf, CoreError> {
    let home =
        dirs::home_dir().ok_or_else(|| CoreError::Other("Cannot determine home directory".into()))?;
    Ok(home.join(".config/epicache/config.toml"))
}

fn read_config_file() -> Result<String, CoreError> {
    let path = config_path()?;
    std::fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CoreError::Other(format!("Config file not found: {}", path.display()))
        } else {
            CoreError::Io(e)
        }
    })
}

fn write_config_file(content: &str) -> Result<(), CoreError> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, content)?;
    Ok(())
}

/// Parse a dotted key into a table path and a leaf field name.
///
/// `"summarizer.command"` → `(["summarizer"], "command")`
/// `"workflow"` → `([], "workflow")`
fn split_key(key: &str) -> Result<(Vec<String>, String), CoreError> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.is_empty() || parts.iter().any(|p| p.is_empty()) {
        return Err(CoreError::Other(format!("Invalid key: {key}")));
    }
    let field = parts.last().unwrap().to_string();
    let table_path = parts[..parts.len() - 1]
        .iter()
        .map(|s| s.to_string())
        .collect();
    Ok((table_path, field))
}

/// Walk a dotted key path in a `toml_edit` document and return the matching item.
///
/// Returns `None` if any segment in the path is missing, making it safe to call
/// without prior existence checks.
fn resolve_key<'a>(doc: &'a DocumentMut, key: &str) -> Option<&'a toml_edit::Item> {
    let parts: Vec<&str> = key.split('.').collect();
    let mut current: &toml_edit::Item = doc.as_item();
    for part in &parts {
        current = current.as_table_like()?.get(part)?;
    }
    Some(current)
}

/// Render a `toml_edit::Item` as a clean user-facing string.
///
/// Tables are expanded into `key = value` lines so `epicache get summarizer`
/// displays all keys under the `[summarizer]` table.
fn format_item(item: &toml_edit::Item) -> String {
    match item {
        toml_edit::Item::Value(v) => match v {
            toml_edit::Value::String(s) => s.value().clone(),
            toml_edit::Value::Integer(i) => i.value().to_string(),
            toml_edit::Value::Float(f) => f.value().to_string(),
            toml_edit::Value::Boolean(b) => b.value().to_string(),
            other => other.to_string(),
        },
        toml_edit::Item::Table(t) => {
            let mut entries = Vec::new();
            collect_entries(t, "", &mut entries);
            entries
                .iter()
                .map(|(k, v)| format!("{k} = {v}"))
                .collect::<Vec<_>>()
                .join("\n")
        }
        other => other.to_string(),
    }
}

/// Recursively walk a TOML table and collect all leaf values as `(key, value)` pairs.
fn collect_entries(table: &toml_edit::Table, prefix: &str, out: &mut Vec<(String, String)>) {
    for (key, item) in table.iter() {
        let full_key = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        };
        match item {
            toml_edit::Item::Value(v) => {
                let display = format_value(v);
                out.push((full_key, display));
            }
            toml_edit::Item::Table(t) => {
                collect_entries(t, &full_key, out);
            }
            _ => {}
        }
    }
}

/// Render a TOML scalar value as a clean string without `toml_edit` decoration.
fn format_value(v: &toml_edit::Value) -> String {
    match v {
        toml_edit::Value::String(s) => format!("\"{}\"", s.value()),
        toml_edit::Value::Integer(i) => i.value().to_string(),
        toml_edit::Value::Float(f) => f.value().to_string(),
        toml_edit::Value::Boolean(b) => b.value().to_string(),
        other => other.to_string(),
    }
}

/// Infer a TOML value type from a CLI string argument.
///
/// Precedence: boolean → integer → float (only when the string contains `.`) → string.
///
/// EDGE: `"3.0"` without a decimal point is treated as integer `3`, not float.
fn infer_value(s: &str) -> toml_edit::Value {
    if s == "true" {
        return toml_edit::Value::from(true);
    }
    if s == "false" {
        return toml_edit::Value::from(false);
    }
    if let Ok(n) = s.parse::<i64>() {
        return toml_edit::Value::from(n);
    }
    if let Ok(f) = s.parse::<f64>() {
        if s.contains('.') {
            return toml_edit::Value::from(f);
        }
    }
    toml_edit::Value::from(s)
}

/// Expand a leading `~` or `~/` prefix to the user's home directory.
///
/// EDGE: A bare `"~"` (no trailing slash) is expanded to the home directory itself.
/// Paths without a leading `~` are returned unchanged, so absolute and relative
/// paths both work.
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_key_simple() {
        let (table, field) = split_key("workflow").unwrap();
        assert!(table.is_empty());
        assert_eq!(field, "workflow");
    }

    #[test]
    fn test_split_key_dotted() {
        let (table, field) = split_key("summarizer.command").unwrap();
        assert_eq!(table, vec!["summarizer"]);
        assert_eq!(field, "command");
    }

    #[test]
    fn test_split_key_deeply_nested() {
        let (table, field) = split_key("a.b.c").unwrap();
        assert_eq!(table, vec!["a", "b"]);
        assert_eq!(field, "c");
    }

    #[test]
    fn test_split_key_empty_segment_errors() {
        assert!(split_key("a..b").is_err());
        assert!(split_key(".a").is_err());
        assert!(split_key("a.").is_err());
    }

    #[test]
    fn test_infer_value_true() {
        let v = infer_value("true");
        assert_eq!(v.as_bool(), Some(true));
    }

    #[test]
    fn test_infer_value_false() {
        let v = infer_value("false");
        assert_eq!(v.as_bool(), Some(false));
    }

    #[test]
    fn test_infer_value_integer() {
        let v = infer_value("42");
        assert_eq!(v.as_integer(), Some(42));
    }

    #[test]
    fn test_infer_value_float() {
        let v = infer_value("3.14");
        let f = v.as_float().unwrap();
        assert!((f - 3.14).abs() < 0.001);
    }

    #[test]
    fn test_infer_value_string() {
        let v = infer_value("hello world");
        assert_eq!(v.as_str(), Some("hello world"));
    }

    #[test]
    fn test_expand_tilde_with_path() {
        let result = expand_tilde("~/data");
        let home = dirs::home_dir().unwrap();
        assert_eq!(result, home.join("data"));
    }

    #[test]
    fn test_expand_tilde_bare() {
        let result = expand_tilde("~");
        let home = dirs::home_dir().unwrap();
        assert_eq!(result, home);
    }

    #[test]
    fn test_expand_tilde_absolute_unchanged() {
        let result = expand_tilde("/absolute/path");
        assert_eq!(result, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_tilde_relative_unchanged() {
        let result = expand_tilde("relative/path");
        assert_eq!(result, PathBuf::from("relative/path"));
    }

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
db_path = "~/data/graph.db"
workflow = "wf1"

[summarizer]
command = "claude"
args = ["-p"]
timeout_secs = 30
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.db_path.as_deref(), Some("~/data/graph.db"));
        assert_eq!(config.workflow.as_deref(), Some("wf1"));
        assert_eq!(config.summarizer.command.as_deref(), Some("claude"));
        assert_eq!(config.summarizer.timeout_secs, Some(30));
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.db_path.is_none());
        assert!(config.workflow.is_none());
        assert!(config.summarizer.command.is_none());
    }

    #[test]
    fn test_config_db_path_expands_tilde() {
        let config = Config {
            db_path: Some("~/data/graph.db".to_string()),
            ..Default::default()
        };
        let path = config.db_path().unwrap();
        let home = dirs::home_dir().unwrap();
        assert_eq!(path, home.join("data/graph.db"));
    }

    #[test]
    fn test_resolve_key_top_level() {
        let doc: toml_edit::DocumentMut = "workflow = \"test\"".parse().unwrap();
        let item = resolve_key(&doc, "workflow");
        assert!(item.is_some());
    }

    #[test]
    fn test_resolve_key_nested() {
        let doc: toml_edit::DocumentMut = "[summarizer]\ncommand = \"claude\"".parse().unwrap();
        let item = resolve_key(&doc, "summarizer.command");
        assert!(item.is_some());
    }

    #[test]
    fn test_resolve_key_missing() {
        let doc: toml_edit::DocumentMut = "workflow = \"test\"".parse().unwrap();
        let item = resolve_key(&doc, "nonexistent");
        assert!(item.is_none());
    }
}
