//! CLI entry point for epicache.
//!
//! # Architecture overview
//!
//! `main.rs` is the thin coordination layer between the CLI surface and the
//! library crate. Its responsibilities are:
//!
//! 1. Parse CLI arguments (via `clap`)
//! 2. Load and merge configuration from `~/.config/epicache/config.toml`
//! 3. Open the configured backend (SQLite file, or an in-memory store when
//!    no `db_path` is configured) and dispatch to the requested subcommand.
//!
//! # Configuration merging
//!
//! `--db` and `--workflow` on the command line always override the config
//! file's `db_path` / `workflow`. `--detached` ignores the config file
//! entirely, requiring both to be passed explicitly.
//!
//! # Error handling
//!
//! All functions return `Result<(), CoreError>`. `main()` catches errors and
//! prints them to stderr before exiting with code 1.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser as ClapParser, Subcommand};

use epicache::config::{self, Config};
use epicache::error::CoreError;
use epicache::store::sqlite::SqliteGraphStore;
use epicache::store::GraphStore;
use epicache::summarizer::SubprocessSummarizer;
use epicache::tokenizer::{HeuristicTokenizer, Tokenizer};
use epicache::types::{ActionResult, EpisodeContext, EpisodeInput};
use epicache::Workflow;

#[derive(ClapParser)]
#[command(name = "epicache", about = "Cache-coherent episodic memory for LLM agent tool invocations")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database path (omit to use an in-memory store)
    #[arg(long, global = true)]
    db: Option<std::path::PathBuf>,

    /// Workflow id to operate on
    #[arg(long, global = true, default_value = "default")]
    workflow: String,

    /// Ignore config file; all options must be explicit
    #[arg(long, global = true)]
    detached: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Create a default config file
    Init,
    /// Get a config value (e.g. `epicache get summarizer.command`)
    Get {
        /// Dotted config key
        key: Option<String>,
    },
    /// Set a config value (e.g. `epicache set workflow demo`)
    Set {
        /// Dotted config key
        key: String,
        /// Value to set
        value: String,
    },
    /// Remove a config value (e.g. `epicache unset summarizer.command`)
    Unset {
        /// Dotted config key
        key: String,
    },
    /// Show full documentation
    Docs,
    /// Look up a cached result for an action before executing it
    Preflight {
        /// Tool action type (e.g. "read_file_contents")
        action_type: String,
        /// Action payload as a JSON object
        action: String,
    },
    /// Record a tool invocation's result as a new Episode
    Record {
        /// Tool action type (e.g. "create_file")
        action_type: String,
        /// Action payload as a JSON object
        action: String,
        /// Result status ("success" or "error")
        #[arg(long, default_value = "success")]
        status: String,
        /// Result output text
        #[arg(long)]
        output: Option<String>,
        /// Result error text
        #[arg(long)]
        error: Option<String>,
    },
    /// Generate and persist a Summary for an Episode
    Summarize {
        /// Tool id (e.g. "TR-1")
        tool_id: String,
    },
    /// Collapse an ordered list of tool ids into one Compression Group
    Compress {
        /// Tool ids in order (e.g. "TR-1 TR-2 TR-3")
        tool_ids: Vec<String>,
    },
    /// Render the dashboard over all Episodes in the workflow
    Dashboard {
        /// Tool ids to render in full even if compressed
        #[arg(long)]
        expand: Vec<String>,
    },
    /// Wipe every node and edge belonging to the workflow
    Reset,
    /// Run a scripted walkthrough of caching, summarizing, and compression
    /// over a bundled sample trace
    Demo,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CoreError> {
    match &cli.command {
        Command::Init => return config::init(),
        Command::Get { key } => {
            return match key {
                Some(k) => config::get_value(k),
                None => config::list_values(),
            };
        }
        Command::Set { key, value } => return config::set_value(key, value),
        Command::Unset { key } => return config::unset_value(key),
        Command::Docs => {
            print!("{}", include_str!("../README.md"));
            return Ok(());
        }
        _ => {}
    }

    let config = if cli.detached { Config::default() } else { Config::load() };

    let db_path = cli.db.clone().or_else(|| config.db_path());
    let workflow_id = if cli.workflow != "default" {
        cli.workflow.clone()
    } else {
        config.workflow.clone().unwrap_or(cli.workflow.clone())
    };

    let store: Arc<dyn GraphStore> = match &db_path {
        Some(path) => Arc::new(SqliteGraphStore::open(path)?),
        None => Arc::new(SqliteGraphStore::open_in_memory()?),
    };
    let tokenizer: Arc<dyn Tokenizer> = Arc::new(HeuristicTokenizer);
    let workflow = Workflow::new(store.clone(), tokenizer.clone(), &workflow_id);

    match cli.command {
        Command::Preflight { action_type, action } => {
            let action: serde_json::Value = serde_json::from_str(&action)
                .map_err(|e| CoreError::Other(format!("invalid action JSON: {e}")))?;
            match workflow.preflight(&action_type, &action)? {
                Some(hit) => {
                    println!("{}", epicache::coherence::CoherenceEngine::render_reused_result(&hit));
                }
                None => println!("MISS"),
            }
            Ok(())
        }
        Command::Record {
            action_type,
            action,
            status,
            output,
            error,
        } => {
            let action: serde_json::Value = serde_json::from_str(&action)
                .map_err(|e| CoreError::Other(format!("invalid action JSON: {e}")))?;
            let tool_id = workflow.add_episode(EpisodeInput {
                timestamp: Workflow::now(),
                action_type,
                action,
                result: ActionResult { status, output, error },
                context: None::<EpisodeContext>,
            })?;
            println!("{tool_id}");
            Ok(())
        }
        Command::Summarize { tool_id } => {
            let summarizer_cmd = config
                .summarizer
                .command
                .clone()
                .ok_or_else(|| CoreError::Other("summarizer.command is not configured".into()))?;
            let timeout = Duration::from_secs(config.summarizer.timeout_secs.unwrap_or(30));
            let summarizer = SubprocessSummarizer::new(summarizer_cmd, config.summarizer.args.clone(), timeout);
            let summary = workflow.summarize(&tool_id, &summarizer, tokenizer.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Compress { tool_ids } => {
            let group = workflow.compress(&tool_ids)?;
            println!("{}", serde_json::to_string_pretty(&group)?);
            Ok(())
        }
        Command::Dashboard { expand } => {
            let groups = workflow.episodes().list_compression_groups()?;
            let expanded: HashSet<String> = expand.into_iter().collect();
            println!("{}", workflow.dashboard(&groups, &expanded)?);
            Ok(())
        }
        Command::Reset => workflow.reset(store.as_ref()),
        Command::Demo => run_demo(),
        Command::Init | Command::Get { .. } | Command::Set { .. } | Command::Unset { .. } | Command::Docs => {
            unreachable!("handled before backend was opened")
        }
    }
}

/// A scripted walkthrough over a bundled sample trace: records every tool
/// result (reusing cache hits where possible), generates summaries with a
/// stub summarizer, compresses the AWS-related tools into one group,
/// expands one of them back out, and prints final token statistics.
fn run_demo() -> Result<(), CoreError> {
    let trace_json = include_str!("../demos/sample_trace.json");
    let trace: Vec<serde_json::Value> = serde_json::from_str(trace_json)?;

    let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::open_in_memory()?);
    let tokenizer: Arc<dyn Tokenizer> = Arc::new(HeuristicTokenizer);
    let workflow = Workflow::new(store, tokenizer, "demo_workflow");

    println!("=== PHASE 1: ADDING TOOL RESULTS ===");
    let mut tool_ids = Vec::new();
    let mut cache_hits = 0usize;

    for (i, entry) in trace.iter().enumerate() {
        let action_type = entry["action_type"].as_str().unwrap_or("unknown").to_string();
        let action = entry["action"].clone();
        println!("Processing tool {}/{}...", i + 1, trace.len());

        if let Some(hit) = workflow.preflight(&action_type, &action)? {
            println!("{}", epicache::coherence::CoherenceEngine::render_reused_result(&hit));
            cache_hits += 1;
            continue;
        }

        let status = entry["result"]["status"].as_str().unwrap_or("success").to_string();
        let output = entry["result"]["output"].as_str().map(String::from);
        let error = entry["result"]["error"].as_str().map(String::from);
        let tool_id = workflow.add_episode(EpisodeInput {
            timestamp: Workflow::now(),
            action_type,
            action,
            result: ActionResult { status, output, error },
            context: None,
        })?;
        tool_ids.push(tool_id);
    }

    println!();
    println!("=== INITIAL DASHBOARD (before summaries) ===");
    println!("{}", workflow.dashboard(&Default::default(), &Default::default())?);

    println!();
    println!("=== PHASE 2: GENERATING SUMMARIES ===");
    let summarizer = DemoSummarizer;
    for tool_id in &tool_ids {
        let summary = workflow.summarize(tool_id, &summarizer, tokenizer_ref())?;
        println!("  {tool_id}: {}", summary.summary_content);
    }

    println!();
    println!("=== DASHBOARD WITH SUMMARIES ===");
    println!("{}", workflow.dashboard(&Default::default(), &Default::default())?);

    println!();
    println!("=== PHASE 3: DEMONSTRATING COMPRESSION ===");
    let split = tool_ids.len().min(6);
    let (aws_tools, file_tools) = tool_ids.split_at(split);
    let mut groups = std::collections::HashMap::new();
    if !aws_tools.is_empty() {
        let group = workflow.compress(aws_tools)?;
        println!("Compressed AWS-related tools: {}", aws_tools.join(", "));
        groups.insert(group.group_key.clone(), group);
    }
    if !file_tools.is_empty() {
        let group = workflow.compress(file_tools)?;
        println!("Compressed file operation tools: {}", file_tools.join(", "));
        groups.insert(group.group_key.clone(), group);
    }

    println!();
    println!("=== DASHBOARD WITH COMPRESSION ===");
    println!("{}", workflow.dashboard(&groups, &Default::default())?);

    println!();
    println!("=== PHASE 4: DEMONSTRATING EXPANSION ===");
    let mut expanded = HashSet::new();
    if let Some(first) = aws_tools.first() {
        expanded.insert(first.clone());
    }
    if let Some(first) = file_tools.first() {
        expanded.insert(first.clone());
    }
    println!("Expanded tools: {}", expanded.iter().cloned().collect::<Vec<_>>().join(", "));
    println!("{}", workflow.dashboard(&groups, &expanded)?);

    println!();
    println!("=== FINAL STATISTICS ===");
    let all = workflow.episodes().list_episodes()?;
    let total_tokens: usize = all.iter().map(|e| e.token_count).sum();
    println!("Total tools processed: {}", all.len());
    println!("Total tokens: {total_tokens}");
    println!("Compression groups created: {}", groups.len());
    println!("Cache hits: {cache_hits}");

    Ok(())
}

/// Deterministic stand-in summarizer for the demo command: no external
/// process is spawned, so `epicache demo` runs with no configuration.
struct DemoSummarizer;

impl epicache::summarizer::Summarizer for DemoSummarizer {
    fn complete(&self, _system_prompt: &str, user_payload: &str) -> Result<String, CoreError> {
        let parsed: serde_json::Value = serde_json::from_str(user_payload).unwrap_or(serde_json::Value::Null);
        let action_type = parsed["action_type"].as_str().unwrap_or("unknown");
        let status = parsed["result"]["status"].as_str().unwrap_or("unknown");
        Ok(format!(
            r#"{{"summary": "{action_type} completed with status {status}", "salient_data": null}}"#
        ))
    }
}

fn tokenizer_ref() -> &'static HeuristicTokenizer {
    static TOKENIZER: HeuristicTokenizer = HeuristicTokenizer;
    &TOKENIZER
}
