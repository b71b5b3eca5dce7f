//! Command-line interface for neuromap.
//!
//! Provides commands for submitting captures, inspecting sessions, editing
//! the task forest, drawing the concept graph, asking about earlier notes
//! and watching an inbox folder.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use uuid::Uuid;

use crate::chat::ChatTurn;
use crate::config::{self, ResolvedConfig};
use crate::core::{Orchestrator, SessionReport};
use crate::domain::{Encoding, ExpansionState, SessionStatus};
use crate::graph::{layout_graph, Direction};
use crate::index::DEFAULT_CONTEXT_K;
use crate::ingest::{InboxLedger, InboxWatcher};

/// neuromap - turn voice notes and photos into tasks and a concept map
#[derive(Parser, Debug)]
#[command(name = "neuromap")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a capture and wait for it to be processed
    Submit {
        /// Audio or image file
        file: PathBuf,

        /// Owner the capture belongs to
        #[arg(short, long, env = "NEUROMAP_OWNER", default_value = "local")]
        owner: String,

        /// Declared media type (guessed from the extension if omitted)
        #[arg(short, long)]
        media_type: Option<String>,
    },

    /// Show one session and what it produced
    Session {
        /// Session ID (UUID)
        session_id: String,
    },

    /// List recent sessions
    Sessions {
        /// Only sessions of this owner
        #[arg(short, long)]
        owner: Option<String>,

        /// Maximum number of sessions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Manage the task forest
    Tasks {
        #[arg(short, long, env = "NEUROMAP_OWNER", default_value = "local")]
        owner: String,

        #[command(subcommand)]
        command: TaskCommands,
    },

    /// Lay out the concept graph
    Graph {
        #[arg(short, long, env = "NEUROMAP_OWNER", default_value = "local")]
        owner: String,

        /// TB, BT, LR or RL (defaults to the configured direction)
        #[arg(short, long)]
        direction: Option<Direction>,

        /// Print nodes, edges and positions as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show prior captured text related to a query
    Context {
        query: String,

        #[arg(short, long, env = "NEUROMAP_OWNER", default_value = "local")]
        owner: String,

        /// Number of records to join
        #[arg(short, default_value_t = DEFAULT_CONTEXT_K)]
        k: usize,
    },

    /// Ask a question answered from your captured notes
    Ask {
        question: String,

        #[arg(short, long, env = "NEUROMAP_OWNER", default_value = "local")]
        owner: String,

        /// JSON file with earlier turns: [{"role": "user", "content": ".."}]
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Watch an inbox folder and submit new captures
    Watch {
        /// Scan once and exit
        #[arg(long)]
        once: bool,

        /// Folder to watch (defaults to the configured inbox)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Owner for submitted captures (defaults to the configured owner)
        #[arg(long)]
        owner: Option<String>,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Print the task forest
    List {
        /// Show only top-level tasks
        #[arg(long)]
        collapsed: bool,
    },

    /// Create a task
    Add {
        text: String,

        /// 1 (most urgent) to 10
        #[arg(short, long, default_value = "5")]
        priority: u8,

        /// Parent task ID
        #[arg(long)]
        parent: Option<String>,
    },

    /// Delete a task; its subtasks become top-level tasks
    Delete { task_id: String },

    /// Re-parent a task (top level if no parent is given)
    Move {
        task_id: String,

        #[arg(long)]
        parent: Option<String>,
    },

    /// Change a task's priority
    Priority { task_id: String, priority: u8 },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Submit {
                file,
                owner,
                media_type,
            } => submit(file, &owner, media_type).await,
            Commands::Session { session_id } => show_session(&session_id).await,
            Commands::Sessions { owner, limit } => list_sessions(owner.as_deref(), limit).await,
            Commands::Tasks { owner, command } => execute_tasks(&owner, command).await,
            Commands::Graph {
                owner,
                direction,
                json,
            } => show_graph(&owner, direction, json).await,
            Commands::Context { query, owner, k } => show_context(&owner, &query, k).await,
            Commands::Ask {
                question,
                owner,
                history,
            } => ask(&owner, &question, history).await,
            Commands::Watch { once, path, owner } => watch(once, path, owner).await,
            Commands::Config => show_config(),
        }
    }
}

fn orchestrator() -> Result<Orchestrator> {
    config::config()?.build_orchestrator()
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid {} ID: {}", what, raw))
}

/// Submit a file and wait for the session to finish
async fn submit(file: PathBuf, owner: &str, media_type: Option<String>) -> Result<()> {
    let blob = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read capture: {}", file.display()))?;

    let declared = media_type.or_else(|| {
        file.extension()
            .and_then(|e| e.to_str())
            .and_then(Encoding::from_extension)
            .map(|e| e.mime_type().to_string())
    });

    let orchestrator = orchestrator()?;
    let session = orchestrator.submit_capture(owner, blob, declared).await?;
    eprintln!("Session {} submitted, processing...", session.id);

    orchestrator.wait_for(session.id).await?;
    let report = orchestrator.get_session(session.id).await?;
    print_report(&report);

    if report.session.status == SessionStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn show_session(session_id: &str) -> Result<()> {
    let session_id = parse_id(session_id, "session")?;
    let report = orchestrator()?.get_session(session_id).await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &SessionReport) {
    let session = &report.session;
    println!("Session ID: {}", session.id);
    println!("Owner: {}", session.owner_id);
    println!("Status: {}", session.status);
    if let Some(reason) = &session.failure_reason {
        println!("Reason: {}", reason);
    }
    println!("Submitted: {}", session.created_at);
    if let Some(completed) = session.completed_at {
        println!("Finished: {}", completed);
    }

    println!("\nStages:");
    for (stage, outcome) in &session.stages {
        let mut line = format!("  {:<18} {:?} ({} attempts)", stage.as_str(), outcome.status, outcome.attempts);
        if let Some(error) = &outcome.error {
            line.push_str(&format!(" - {}", error));
        }
        println!("{}", line);
    }

    if let Some(transcript) = &report.transcript {
        println!("\nTranscript [{}]:", transcript.language);
        println!("{}", transcript.text);
    }

    if !report.todos.is_empty() {
        println!("\nTasks:");
        let expansion = ExpansionState::all(&report.todos);
        for row in expansion.visible_rows(&report.todos) {
            println!("  {}[{}] {}", "  ".repeat(row.depth), row.priority, row.text);
        }
    }

    println!(
        "\nIndexed: {}  Graph updated: {}",
        report.indexed, report.graph_updated
    );
}

async fn list_sessions(owner: Option<&str>, limit: usize) -> Result<()> {
    let sessions = orchestrator()?.list_sessions(owner, limit).await?;

    if sessions.is_empty() {
        println!("No sessions found");
        return Ok(());
    }

    println!("{:<38} {:<16} {:<10} {:<20}", "SESSION ID", "OWNER", "STATUS", "SUBMITTED");
    println!("{}", "-".repeat(86));

    for session in sessions {
        println!(
            "{:<38} {:<16} {:<10} {:<20}",
            session.id,
            session.owner_id,
            session.status.to_string(),
            session.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

async fn execute_tasks(owner: &str, command: TaskCommands) -> Result<()> {
    let orchestrator = orchestrator()?;
    let db = orchestrator.database();

    match command {
        TaskCommands::List { collapsed } => {
            let forest = db.list_tasks(owner).await?;
            if forest.is_empty() {
                println!("No tasks");
                return Ok(());
            }
            let expansion = if collapsed {
                ExpansionState::new()
            } else {
                ExpansionState::all(&forest)
            };
            for row in expansion.visible_rows(&forest) {
                let marker = match (row.subtask_count, row.expanded) {
                    (0, _) => " ",
                    (_, true) => "-",
                    (_, false) => "+",
                };
                println!(
                    "{}{} [{:>2}] {}  ({})",
                    "  ".repeat(row.depth),
                    marker,
                    row.priority,
                    row.text,
                    row.id
                );
            }
        }
        TaskCommands::Add {
            text,
            priority,
            parent,
        } => {
            let parent = parent.map(|p| parse_id(&p, "parent")).transpose()?;
            let task = db.create_task(owner, &text, priority, parent).await?;
            println!("Created task {}", task.id);
        }
        TaskCommands::Delete { task_id } => {
            let id = parse_id(&task_id, "task")?;
            if !db.delete_task(owner, id).await? {
                anyhow::bail!("Task {} not found", id);
            }
            println!("Deleted task {}", id);
        }
        TaskCommands::Move { task_id, parent } => {
            let id = parse_id(&task_id, "task")?;
            let parent = parent.map(|p| parse_id(&p, "parent")).transpose()?;
            db.move_task(owner, id, parent).await?;
            match parent {
                Some(p) => println!("Moved task {} under {}", id, p),
                None => println!("Moved task {} to top level", id),
            }
        }
        TaskCommands::Priority { task_id, priority } => {
            let id = parse_id(&task_id, "task")?;
            if !db.set_task_priority(owner, id, priority).await? {
                anyhow::bail!("Task {} not found", id);
            }
            println!("Task {} priority set to {}", id, priority);
        }
    }

    Ok(())
}

async fn show_graph(owner: &str, direction: Option<Direction>, as_json: bool) -> Result<()> {
    let cfg = config::config()?;
    let graph = cfg.build_orchestrator()?.get_graph(owner).await?;

    let mut layout_config = cfg.layout.clone();
    if let Some(direction) = direction {
        layout_config.direction = direction;
    }
    let positions = layout_graph(&graph, &layout_config);

    if as_json {
        let out = json!({
            "nodes": graph.nodes,
            "edges": graph.edges,
            "positions": positions,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if graph.nodes.is_empty() {
        println!("Concept graph is empty");
        return Ok(());
    }

    println!("{:<28} {:<10} {:>5} {:>5} {:>9} {:>9}", "CONCEPT", "KIND", "RANK", "ORDER", "X", "Y");
    println!("{}", "-".repeat(72));
    for pos in &positions {
        let Some(node) = graph.nodes.iter().find(|n| n.id == pos.id) else {
            continue;
        };
        println!(
            "{:<28} {:<10} {:>5} {:>5} {:>9.1} {:>9.1}",
            node.name,
            node.kind.as_str(),
            pos.rank,
            pos.order,
            pos.x,
            pos.y
        );
    }
    println!("\n{} concepts, {} links", graph.nodes.len(), graph.edges.len());

    Ok(())
}

async fn show_context(owner: &str, query: &str, k: usize) -> Result<()> {
    let context = orchestrator()?.retrieve_context(owner, query, k).await?;
    if context.is_empty() {
        println!("No related captures");
    } else {
        println!("{}", context);
    }
    Ok(())
}

async fn ask(owner: &str, question: &str, history: Option<PathBuf>) -> Result<()> {
    let history = match history {
        Some(path) => load_history(&path).await?,
        None => Vec::new(),
    };
    let answer = orchestrator()?.ask(owner, question, &history).await?;
    println!("{}", answer);
    Ok(())
}

async fn load_history(path: &std::path::Path) -> Result<Vec<ChatTurn>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read chat history: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid chat history: {}", path.display()))
}

/// Watch the inbox folder, submitting each stable new file
async fn watch(once: bool, path: Option<PathBuf>, owner: Option<String>) -> Result<()> {
    let cfg = config::config()?;
    let mut inbox = cfg.inbox.clone();
    if let Some(p) = path {
        inbox.watch_path = p;
    }
    if let Some(o) = owner {
        inbox.owner_id = o;
    }

    let orchestrator = cfg.build_orchestrator()?;
    let ledger = Arc::new(InboxLedger::open_default().await?);
    let watcher = InboxWatcher::new(inbox.clone(), ledger, Arc::new(orchestrator.clone()));

    if once {
        println!("Scanning once: {}", inbox.watch_path.display());
        let result = watcher.scan_once().await?;
        for capture in &result.submitted {
            orchestrator.wait_for(capture.session_id).await?;
            println!("Processed {} as session {}", capture.path.display(), capture.session_id);
        }
        println!(
            "{} submitted, {} already seen, {} errors",
            result.submitted.len(),
            result.already_submitted,
            result.errors
        );
        return Ok(());
    }

    println!("Watching: {}", inbox.watch_path.display());
    println!("    Press Ctrl+C to stop");
    println!();

    let initial = watcher.scan_once().await?;
    if !initial.submitted.is_empty() {
        println!("Initial scan: {} new capture(s) submitted", initial.submitted.len());
    }

    let (mut event_rx, handle) = watcher.watch()?;

    let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        let _ = stop_tx.send(());
    });

    loop {
        tokio::select! {
            Some(capture) = event_rx.recv() => {
                println!(
                    "New capture: {} -> session {}",
                    capture.path.file_name().unwrap_or_default().to_string_lossy(),
                    capture.session_id
                );
            }
            _ = &mut stop_rx => {
                println!();
                println!("Stopping watcher...");
                handle.stop().await?;
                break;
            }
        }
    }

    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;
    print_config(cfg);
    Ok(())
}

fn print_config(cfg: &ResolvedConfig) {
    let providers = &cfg.providers;
    let pipeline = &cfg.pipeline;

    println!("Neuromap Configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Sessions: {}", cfg.sessions_dir().display());
    println!("  Database: {}", cfg.database.display());
    println!();
    println!("Providers:");
    println!("  Base URL:       {}", providers.openai.base_url);
    println!(
        "  API key:        {} ({})",
        if providers.openai.api_key.is_some() { "set" } else { "missing" },
        providers.api_key_env
    );
    println!("  Transcription:  {:?}", providers.transcription);
    println!("  Chat model:     {}", providers.openai.chat_model);
    println!("  Embedding:      {}", providers.openai.embedding_model);
    println!("  ffmpeg:         {}", providers.ffmpeg_path);
    println!();
    println!("Pipeline:");
    println!("  Required attempts:    {}", pipeline.required_retry.max_attempts);
    println!("  Best-effort attempts: {}", pipeline.best_effort_retry.max_attempts);
    println!("  Call timeout:         {:?}", pipeline.call_timeout);
    println!("  Context k:            {}", pipeline.context_k);
    println!("  Max capture size:     {} bytes", pipeline.max_capture_bytes);
    println!();
    println!("Inbox:");
    println!("  Path:  {}", cfg.inbox.watch_path.display());
    println!("  Owner: {}", cfg.inbox.owner_id);
    println!("  Layout direction: {}", cfg.layout.direction);
}
