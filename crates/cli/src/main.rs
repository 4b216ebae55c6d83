//! Lodestone CLI - semantic code search over a local incremental index

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use embedding::{EmbedOptions, Embedder, StaticEmbedder, StaticEmbedderFactory};
use indexer::{FileWatcher, IndexOutcome, Indexer};
use lodestone_core::Config;
use store::CacheStore;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lodestone")]
#[command(about = "Semantic code search over a local incremental index")]
#[command(after_help = "\
QUICK START:
  lodestone index                 # Build (or refresh) the index
  lodestone search \"parse config\" # Query it
  lodestone watch                 # Keep it live while you edit")]
struct Cli {
  /// Project root (default: current directory)
  #[arg(long, global = true)]
  root: Option<PathBuf>,

  /// Verbose logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Index the project tree
  Index {
    /// Drop the existing index and rebuild from scratch
    #[arg(long)]
    force: bool,
  },
  /// Index once, then keep the index live via the file watcher
  Watch,
  /// Search the index
  Search {
    query: String,
    /// Maximum results
    #[arg(short, long, default_value_t = 10)]
    limit: usize,
  },
  /// Show index statistics
  Status,
}

fn init_logging(verbose: bool) {
  let default_level = if verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_target(false)
    .init();
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  let root = cli.root.unwrap_or_else(|| PathBuf::from("."));
  let mut config = Config::load(&root)?;
  config.index.search_directory = root.clone();
  if cli.verbose {
    config.index.verbose = true;
  }

  init_logging(config.index.verbose);
  tracing::debug!(root = %root.display(), "Configuration loaded");

  match cli.command {
    Commands::Index { force } => cmd_index(config, force).await,
    Commands::Watch => cmd_watch(config).await,
    Commands::Search { query, limit } => cmd_search(config, query, limit).await,
    Commands::Status => cmd_status(config),
  }
}

fn build_indexer(config: Config) -> Result<Indexer> {
  Indexer::new(config, Arc::new(StaticEmbedderFactory)).context("failed to initialize indexer")
}

async fn cmd_index(config: Config, force: bool) -> Result<()> {
  let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel(64);
  let indexer = build_indexer(config)?.with_progress(progress_tx);

  let printer = tokio::spawn(async move {
    while let Some(update) = progress_rx.recv().await {
      eprintln!("[{:>3}%] {}", update.percent, update.message);
    }
  });

  let outcome = indexer.index_all(force).await?;
  drop(indexer);
  let _ = printer.await;

  match outcome {
    IndexOutcome::Skipped { reason } => println!("Skipped: {reason}"),
    IndexOutcome::Completed(summary) => {
      println!("{}", summary.message);
      println!(
        "  files: {} processed / {} total, chunks: {} created / {} total",
        summary.files_processed, summary.total_files, summary.chunks_created, summary.total_chunks
      );
    }
  }
  Ok(())
}

async fn cmd_watch(config: Config) -> Result<()> {
  if !config.index.watch_files {
    println!("watch_files is disabled in the project config.");
    return Ok(());
  }
  let indexer = Arc::new(build_indexer(config)?);

  // Reconcile first so the watcher only has to keep up with live edits.
  match indexer.index_all(false).await? {
    IndexOutcome::Completed(summary) => println!("{}", summary.message),
    IndexOutcome::Skipped { reason } => println!("Skipped initial pass: {reason}"),
  }

  let handle = FileWatcher::spawn(indexer.clone())?;
  println!("Watching {} (ctrl-c to stop)", indexer.root().display());

  tokio::signal::ctrl_c().await.context("failed to wait for ctrl-c")?;
  handle.shutdown().await;
  Ok(())
}

async fn cmd_search(config: Config, query: String, limit: usize) -> Result<()> {
  let cache_dir = config.index.search_directory.join(&config.index.cache_dir);
  let mut store = CacheStore::open(&cache_dir)?;

  if store.chunk_count() == 0 {
    println!("Index is empty - run `lodestone index` first.");
    return Ok(());
  }

  let model_id = config.embedding.model.clone();
  let query_vector = tokio::task::spawn_blocking(move || -> Result<Vec<f32>> {
    let embedder = StaticEmbedder::load(&model_id)?;
    Ok(embedder.embed(&query, &EmbedOptions::default())?)
  })
  .await??;

  store.ensure_ann_index()?;
  let hits = store.query(&query_vector, limit);

  for hit in hits {
    println!(
      "{:.3}  {}:{}-{}",
      hit.score,
      hit.file,
      hit.start_line + 1,
      hit.end_line + 1
    );
    if let Some(line) = hit.content.lines().find(|l| !l.trim().is_empty()) {
      println!("       {}", line.trim_end());
    }
  }
  Ok(())
}

fn cmd_status(config: Config) -> Result<()> {
  let cache_dir = config.index.search_directory.join(&config.index.cache_dir);
  let store = CacheStore::open(&cache_dir)?;

  println!("root:   {}", config.index.search_directory.display());
  println!("cache:  {}", cache_dir.display());
  println!("model:  {}", config.embedding.model);
  println!("files:  {}", store.file_count());
  println!("chunks: {}", store.chunk_count());
  Ok(())
}
