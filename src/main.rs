//! Command line interface for the event graph. Loads events from files,
//! feeds them through the engine and prints JSON views of the result.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use stonr_graph::{
    config::Settings,
    persist::{FileStore, NullStore, Persistence},
    service::{self, EngineHandle},
    source,
    time::SystemClock,
    Engine, IngestOutcome, IngestSummary,
};

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "stonr-graph",
    author,
    version,
    about = "Thread graph, chronology and reaction counts for Nostr events"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Ingest event files, `.ndjson` logs or directories and print a summary.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Recompute event ids and reject mismatches.
        #[arg(long)]
        strict_ids: bool,
    },
    /// Print the thread context and neighbours of an event.
    Thread {
        id: String,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Print per-author stats and the author's events in order.
    Author {
        pubkey: String,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Print the reaction record of an event.
    Reactions {
        id: String,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

/// Execute the selected subcommand and return its JSON output.
async fn run(cli: Cli) -> Result<Value> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    let mut config = cfg.engine_config();
    if let Commands::Ingest { strict_ids, .. } = &cli.command {
        config.strict_ids = *strict_ids;
    }
    let store = cfg.persist.then(|| FileStore::new(cfg.store_root.clone()));
    let sink: Arc<dyn Persistence> = match &store {
        Some(store) => {
            store.init()?;
            Arc::new(store.clone())
        }
        None => Arc::new(NullStore),
    };
    let mut engine = Engine::new(config, Arc::new(SystemClock), sink);
    if let Some(store) = &store {
        // Derived state survives between runs; events are re-read each time.
        engine.restore(store.load_reactions()?, store.load_cache()?);
    }
    drive(cli.command, engine).await
}

/// Feed the command's inputs through the engine task and build the output.
async fn drive(command: Commands, engine: Engine) -> Result<Value> {
    let (handle, task) = service::spawn(engine);
    let paths = match &command {
        Commands::Ingest { paths, .. }
        | Commands::Thread { paths, .. }
        | Commands::Author { paths, .. }
        | Commands::Reactions { paths, .. } => paths.clone(),
    };
    let summary = ingest_paths(&handle, &paths).await?;
    let out = match command {
        Commands::Ingest { .. } => serde_json::to_value(summary)?,
        Commands::Thread { id, .. } => {
            handle
                .query(move |engine| {
                    let ctx = engine.get_thread_context(&id);
                    json!({
                        "id": id,
                        "root": ctx.root,
                        "reply_to": ctx.reply_to,
                        "replies": ctx.replies,
                        "previous": engine.get_previous(&id),
                        "next": engine.get_next(&id),
                        "backlinks": engine.get_backlinks(&id),
                        "title": engine.get_cached_title(&id),
                    })
                })
                .await?
        }
        Commands::Author { pubkey, .. } => {
            handle
                .query(move |engine| {
                    json!({
                        "pubkey": pubkey,
                        "stats": engine.per_author_stats(&pubkey),
                        "events": engine.chain().by_author(&pubkey),
                    })
                })
                .await?
        }
        Commands::Reactions { id, .. } => {
            handle
                .query(move |engine| {
                    json!({
                        "id": id,
                        "record": engine.get_reaction_stats(&id),
                        "pending_reactions": engine.pending_reactions(),
                    })
                })
                .await?
        }
    };
    handle.shutdown().await?;
    task.await?;
    Ok(out)
}

async fn ingest_paths(handle: &EngineHandle, paths: &[PathBuf]) -> Result<IngestSummary> {
    let events = source::load_events(paths)?;
    let mut summary = IngestSummary::default();
    for event in events {
        match handle.ingest(event).await? {
            IngestOutcome::Stored(_) => summary.stored += 1,
            IngestOutcome::Duplicate => summary.duplicates += 1,
            IngestOutcome::Rejected(_) => summary.rejected += 1,
        }
    }
    let (refs, reactions) = handle
        .query(|engine| (engine.pending_references(), engine.pending_reactions()))
        .await?;
    summary.pending_references = refs;
    summary.pending_reactions = reactions;
    Ok(summary)
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let store_root = base_dir.join("stonr-graph-data");
    let mut content = String::new();
    content.push_str(&format!("STORE_ROOT={}\n", store_root.to_string_lossy()));
    content.push_str("CACHE_MAX_SIZE=1000\n");
    content.push_str("CACHE_MAX_AGE_SECS=3600\n");
    content.push_str("CACHE_CLEANUP_SECS=300\n");
    content.push_str("REACTION_DEBOUNCE_MS=1000\n");
    content.push_str("PERSIST=1\n");
    fs::write(env_path, content)?;
    Ok(())
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let out = run(cli).await?;
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
