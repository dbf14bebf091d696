//! `recollect`: index daily notes and search them from the shell.

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use recollect_memory::{
    build_provider, discover_notes, ChunkStore, Indexer, MemorySearch, RecollectConfig,
    SearchFilter, SearchResults,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "recollect", about = "Recollect — searchable long-term memory for daily notes")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "recollect.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index daily notes (all notes in notes_dir when no files are given)
    Index {
        /// Report what would be indexed without writing anything
        #[arg(long)]
        dry_run: bool,
        files: Vec<PathBuf>,
    },
    /// Embed chunks that have no embedding yet
    Embed {
        #[arg(long, default_value_t = 32)]
        batch_size: usize,
    },
    /// Search memories (semantic when embeddings exist, text otherwise)
    Search {
        #[arg(required = true)]
        query: Vec<String>,
        /// Maximum results (defaults to search.default_limit)
        #[arg(short, long)]
        limit: Option<usize>,
        /// Only this event type
        #[arg(long = "type")]
        event_type: Option<String>,
        /// Earliest day, YYYY-MM-DD
        #[arg(long)]
        since: Option<String>,
        /// Latest day, YYYY-MM-DD (inclusive)
        #[arg(long)]
        until: Option<String>,
        /// Force substring search (filters still apply)
        #[arg(long)]
        fulltext: bool,
    },
    /// Show memories around a chunk
    Timeline {
        id: i64,
        /// Hours on each side (defaults to search.timeline_window_hours)
        #[arg(short, long)]
        window: Option<u32>,
    },
    /// Print full memories by id
    Get {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Store statistics
    Stats,
}

#[derive(Serialize)]
struct StatsOutput {
    db_path: String,
    total_chunks: usize,
    total_sources: usize,
    embedded_chunks: usize,
    coverage: f64,
    earliest: Option<String>,
    latest: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = RecollectConfig::load(&cli.config)
        .with_context(|| format!("failed to load config '{}'", cli.config.display()))?;

    let db_path = config.db_path();
    let store = Arc::new(
        ChunkStore::open(&db_path)
            .with_context(|| format!("failed to open database '{}'", db_path.display()))?,
    );

    match cli.command {
        Commands::Index { dry_run, files } => {
            let files = if files.is_empty() {
                discover_notes(&config.notes_dir).await.with_context(|| {
                    format!("failed to list notes in '{}'", config.notes_dir.display())
                })?
            } else {
                files
            };
            info!(files = files.len(), dry_run, "indexing notes");

            let embedder = build_provider(&config.embedding)?;
            let indexer = Indexer::new(store, embedder, config.chunking);
            let report = indexer.index_paths(&files, dry_run).await?;
            print_json(&report)?;
        }
        Commands::Embed { batch_size } => {
            let embedder = build_provider(&config.embedding)?;
            let indexer = Indexer::new(store, embedder, config.chunking);
            let embedded = indexer.embed_pending(batch_size).await?;
            print_json(&serde_json::json!({ "embedded": embedded }))?;
        }
        Commands::Search {
            query,
            limit,
            event_type,
            since,
            until,
            fulltext,
        } => {
            let query = query.join(" ");
            let limit = limit.unwrap_or(config.search.default_limit);
            let filter = build_filter(event_type, since.as_deref(), until.as_deref())?;

            let embedder = build_provider(&config.embedding)?;
            let search = MemorySearch::new(store, embedder);
            let results = if fulltext {
                let hits = search.search_fulltext_filtered(&query, limit, &filter)?;
                SearchResults::Fulltext(hits)
            } else {
                search.search(&query, limit, &filter).await?
            };
            print_json(&results)?;
        }
        Commands::Timeline { id, window } => {
            let window = window.unwrap_or(config.search.timeline_window_hours);
            let embedder = build_provider(&config.embedding)?;
            let search = MemorySearch::new(store, embedder);
            print_json(&search.get_timeline(id, window)?)?;
        }
        Commands::Get { ids } => {
            let embedder = build_provider(&config.embedding)?;
            let search = MemorySearch::new(store, embedder);
            print_json(&search.get_memories(&ids)?)?;
        }
        Commands::Stats => {
            let stats = store.get_stats()?;
            print_json(&StatsOutput {
                db_path: db_path.display().to_string(),
                total_chunks: stats.total_chunks,
                total_sources: stats.total_sources,
                embedded_chunks: stats.embedded_chunks,
                coverage: stats.coverage(),
                earliest: stats.earliest_timestamp.map(recollect_memory::model::format_date),
                latest: stats.latest_timestamp.map(recollect_memory::model::format_date),
            })?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Search filter from the command-line flags. `--until` covers the whole day.
fn build_filter(
    event_type: Option<String>,
    since: Option<&str>,
    until: Option<&str>,
) -> anyhow::Result<SearchFilter> {
    let mut filter = SearchFilter::default();
    if let Some(event_type) = event_type {
        filter = filter.with_event_type(event_type);
    }
    if since.is_some() || until.is_some() {
        let start = since.map(day_start).transpose()?.unwrap_or(i64::MIN);
        let end = until
            .map(day_start)
            .transpose()?
            .map_or(i64::MAX, |day| day + 86_399);
        if start > end {
            anyhow::bail!("--since must not be after --until");
        }
        filter = filter.with_date_range(start, end);
    }
    Ok(filter)
}

/// Midnight UTC of a `YYYY-MM-DD` day, in epoch seconds.
fn day_start(day: &str) -> anyhow::Result<i64> {
    let date = NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{day}', expected YYYY-MM-DD"))?;
    Ok(date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp())
}
