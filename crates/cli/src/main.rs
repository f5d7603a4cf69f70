//! Minimal stdio front-end over `deskagent-core`.
//!
//! Stands in for the out-of-scope HTTP/WebSocket transport: submits one
//! instruction, streams its `ProgressEvent`s to stdout as JSON lines,
//! and exposes `list`/`get`/`cancel` against the History Store and
//! Session Manager. Wires concrete (demonstration-only) `Planner`,
//! `ActionExecutor`, and `Embedder` implementations, since those
//! capabilities are supplied by the caller, not the core.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use deskagent_core::config::Config;
use deskagent_core::event_bus::{EventBus, NextEvent};
use deskagent_core::history::HistoryStore;
use deskagent_core::plan::{ArgValue, Embedding, FailurePolicy, Plan, ToolCall};
use deskagent_core::error::{ExecutionError, PlanningError};
use deskagent_core::traits::{ActionExecutor, Embedder, ExecutionOutcome, NoopObserver, Planner, ToolCatalogEntry};
use deskagent_core::{PlanCache, PlanRunner, SessionManager};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "deskagent", about = "Desktop automation execution-orchestration core")]
struct Cli {
    /// Path to a TOML configuration file. Missing fields fall back to
    /// spec defaults; a missing file is not an error.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root directory for the durable history store.
    #[arg(long, default_value = "./deskagent-history")]
    history_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit an instruction and stream its progress to stdout.
    Run { instruction: String },
    /// List recent sessions, newest first.
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the live snapshot of one session, if known to this process.
    Get { session_id: String },
    /// Request cancellation of one session.
    Cancel { session_id: String },
}

/// Splits the instruction on whitespace and echoes each word back as a
/// `type_text` tool call. This is the minimal concrete `Planner` the
/// binary wires in for demonstration purposes — a real deployment
/// supplies its own remote planner.
struct EchoPlanner;

#[async_trait]
impl Planner for EchoPlanner {
    async fn plan(&self, original_instruction: &str, _tool_catalog: &[ToolCatalogEntry]) -> Result<Plan, PlanningError> {
        let mut arguments = BTreeMap::new();
        arguments.insert(
            "text".to_string(),
            ArgValue::String(original_instruction.to_string()),
        );
        let call = ToolCall {
            tool_name: "echo".to_string(),
            arguments,
            description: format!("echo \"{original_instruction}\""),
            element_locator: None,
            coordinates: None,
            drives_desktop: false,
        };
        Plan::new(vec![call], FailurePolicy::FailFast).ok_or_else(|| PlanningError::Malformed("empty plan".to_string()))
    }
}

/// Logs the call and reports success. Demonstration-only stand-in for
/// the real desktop-automation backend.
struct LoggingExecutor;

#[async_trait]
impl ActionExecutor for LoggingExecutor {
    async fn execute(&self, call: &ToolCall) -> Result<ExecutionOutcome, ExecutionError> {
        tracing::info!(tool = %call.tool_name, "executing");
        Ok(ExecutionOutcome {
            output: format!("{} executed", call.tool_name),
        })
    }
}

/// No embedding backend wired in; every lookup degrades to exact-only
/// matching, per spec §4.2 "Failure modes".
struct NoEmbedder;

#[async_trait]
impl Embedder for NoEmbedder {
    async fn embed(&self, _text: &str) -> Result<Embedding, String> {
        Err("no embedding provider configured".to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_log::LogTracer::init().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Arc::new(load_config(cli.config.as_deref())?);
    let history = Arc::new(HistoryStore::new(cli.history_dir.clone()));
    let bus = Arc::new(EventBus::new(config.sub_buf, config.t_grace()));
    let cache = Arc::new(PlanCache::new(config.max_cache_size, config.sim_threshold, config.cache_ttl()));

    let runner = Arc::new(PlanRunner::new(
        config.clone(),
        cache,
        history.clone(),
        bus.clone(),
        Arc::new(EchoPlanner),
        Arc::new(LoggingExecutor),
        Arc::new(NoEmbedder),
        Arc::new(NoopObserver),
        vec![ToolCatalogEntry {
            tool_name: "echo".to_string(),
            description: "echo the instruction back as a type_text call".to_string(),
        }],
    ));

    let manager = SessionManager::new(config, history, bus, runner);

    match cli.command {
        Command::Run { instruction } => run(&manager, &instruction).await?,
        Command::List { limit } => {
            let summaries = manager.history().list(limit, None).await?;
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        Command::Get { session_id } => match manager.get(&session_id) {
            Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            None => println!("{{\"error\": \"session not known to this process\"}}"),
        },
        Command::Cancel { session_id } => {
            let outcome = manager.cancel(&session_id).await;
            println!("{outcome:?}");
        }
    }
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            Config::from_toml(&text).with_context(|| format!("parsing config file {}", path.display()))
        }
        None => Ok(Config::default()),
    }
}

async fn run(manager: &Arc<SessionManager>, instruction: &str) -> Result<()> {
    let session_id = manager.start(instruction).await?;
    println!("session_id: {session_id}");

    let Some(mut stream) = manager.subscribe(&session_id) else {
        anyhow::bail!("session {session_id} has no live event stream");
    };
    loop {
        match stream.next().await {
            NextEvent::Event(event) => {
                let is_terminal = event.is_terminal();
                println!("{}", serde_json::to_string(&event)?);
                if is_terminal {
                    break;
                }
            }
            NextEvent::Lagged => {
                eprintln!("warning: fell behind the event stream, reconnect to replay");
                break;
            }
            NextEvent::Closed => break,
        }
    }
    Ok(())
}
