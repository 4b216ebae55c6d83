//! Full-index coordinator.
//!
//! One `Indexer` object owns everything process-wide: the store handle, the
//! single-flight `is_indexing` guard, and the queue of watch events that
//! arrive while a full pass runs. There are no globals; the object is
//! created at startup and dropped at shutdown.
//!
//! `index_all` is single-flight: a second call while one is running returns
//! a structured skip instead of waiting. On every exit path - success,
//! early return, or failure - the guard is cleared and queued watch events
//! are applied.

use std::{
  collections::{HashMap, HashSet},
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, Instant},
};

use embedding::EmbedderFactory;
use lodestone_core::Config;
use store::CacheStore;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
  callgraph::CallGraphExtractor,
  chunker::{BoundaryChunker, Chunker},
  discover, exclude,
  exclude::ExcludeSet,
  error::IndexError,
  pipeline::{self, BatchContext},
  pool::{ChunkPayload, FallbackEmbedder, PoolConfig, WorkerPool},
  prefilter::{self, content_hash},
  progress::IndexProgress,
  relative_key,
  watcher::WatchKind,
};

/// The store handle shared between the coordinator and the watcher.
pub type SharedStore = Arc<tokio::sync::Mutex<CacheStore>>;

// ============================================================================
// Results
// ============================================================================

/// Outcome of `index_all`.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOutcome {
  /// Another pass was already running; nothing happened.
  Skipped { reason: String },
  Completed(IndexSummary),
}

/// Statistics from a completed pass.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSummary {
  /// Files that went through the pipeline this pass
  pub files_processed: usize,
  /// Chunks embedded and committed this pass
  pub chunks_created: usize,
  /// Files discovered under the root
  pub total_files: usize,
  /// Chunks in the store after the pass
  pub total_chunks: usize,
  pub duration: Duration,
  pub message: String,
}

impl IndexSummary {
  fn empty(total_files: usize, total_chunks: usize, started: Instant, message: impl Into<String>) -> Self {
    Self {
      files_processed: 0,
      chunks_created: 0,
      total_files,
      total_chunks,
      duration: started.elapsed(),
      message: message.into(),
    }
  }
}

// ============================================================================
// Indexer
// ============================================================================

/// The coordinator object: owns the store, the guard, and the watch queue.
pub struct Indexer {
  root: PathBuf,
  config: Config,
  store: SharedStore,
  chunker: Arc<dyn Chunker>,
  extractor: Option<Arc<dyn CallGraphExtractor>>,
  factory: Arc<dyn EmbedderFactory>,
  fallback: FallbackEmbedder,
  excludes: ExcludeSet,
  blocklist: HashSet<String>,
  extensions: HashSet<String>,
  progress: Option<mpsc::Sender<IndexProgress>>,
  is_indexing: AtomicBool,
  pending_watch_events: tokio::sync::Mutex<HashMap<PathBuf, WatchKind>>,
}

impl Indexer {
  /// Build an indexer for the configured search root.
  ///
  /// Compiles the exclusion set once and opens (or creates) the cache
  /// store under `<root>/<cache_dir>`.
  pub fn new(config: Config, factory: Arc<dyn EmbedderFactory>) -> Result<Self, IndexError> {
    let root = std::fs::canonicalize(&config.index.search_directory)?;

    let excludes = ExcludeSet::compile(&config.index.exclude_patterns)?;
    let blocklist = exclude::dir_blocklist(&config.index.exclude_patterns, &config.index.cache_dir);
    let extensions: HashSet<String> = config
      .index
      .file_extensions
      .iter()
      .map(|e| e.trim_start_matches('.').to_lowercase())
      .collect();

    let store = CacheStore::open(&root.join(&config.index.cache_dir))?;
    let fallback = FallbackEmbedder::new(factory.clone(), config.embedding.model.clone());

    Ok(Self {
      root,
      config,
      store: Arc::new(tokio::sync::Mutex::new(store)),
      chunker: Arc::new(BoundaryChunker),
      extractor: None,
      factory,
      fallback,
      excludes,
      blocklist,
      extensions,
      progress: None,
      is_indexing: AtomicBool::new(false),
      pending_watch_events: tokio::sync::Mutex::new(HashMap::new()),
    })
  }

  /// Replace the default chunker.
  pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
    self.chunker = chunker;
    self
  }

  /// Install the optional call-graph extractor.
  pub fn with_extractor(mut self, extractor: Arc<dyn CallGraphExtractor>) -> Self {
    self.extractor = Some(extractor);
    self
  }

  /// Send progress updates to this channel during index passes.
  pub fn with_progress(mut self, tx: mpsc::Sender<IndexProgress>) -> Self {
    self.progress = Some(tx);
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn store(&self) -> &SharedStore {
    &self.store
  }

  pub fn is_indexing(&self) -> bool {
    self.is_indexing.load(Ordering::SeqCst)
  }

  // ==========================================================================
  // Full index
  // ==========================================================================

  /// Index the whole tree. Single-flight: a concurrent call is skipped.
  pub async fn index_all(&self, force: bool) -> Result<IndexOutcome, IndexError> {
    if self
      .is_indexing
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!("Index pass already running, skipping");
      return Ok(IndexOutcome::Skipped {
        reason: "indexing already in progress".to_string(),
      });
    }

    let result = self.run_full_index(force).await;

    // Clear the guard and apply queued watch events on *every* exit path.
    self.is_indexing.store(false, Ordering::SeqCst);
    self.drain_pending_events().await;

    result
  }

  async fn run_full_index(&self, force: bool) -> Result<IndexOutcome, IndexError> {
    let started = Instant::now();
    info!(root = %self.root.display(), force, "Starting full index");

    if force {
      self.store.lock().await.clear();
    }

    // Discover. Root I/O problems are fatal; subtree problems were logged.
    let files = discover::discover_files(&self.root, &self.extensions, &self.excludes, &self.blocklist)?;
    let total_files = files.len();
    self.emit(IndexProgress::discovery(total_files)).await;

    if files.is_empty() {
      self.emit(IndexProgress::complete("no files to index")).await;
      return Ok(IndexOutcome::Completed(IndexSummary::empty(
        0,
        0,
        started,
        "no files to index",
      )));
    }

    if !force {
      self.prune_vanished(&files).await;
    }

    // Pre-filter: drop unchanged / oversize / unreadable candidates.
    let known_hashes = self.store.lock().await.file_hashes();
    let (jobs, stats) = prefilter::prefilter(
      &self.root,
      files,
      &known_hashes,
      self.config.index.max_file_size,
      self.config.index.parallel_files,
    )
    .await;
    self.emit(IndexProgress::prefilter(jobs.len(), total_files)).await;

    if jobs.is_empty() {
      let store = self.store.lock().await;
      store.save()?;
      self.emit(IndexProgress::complete("index is up to date")).await;
      return Ok(IndexOutcome::Completed(IndexSummary::empty(
        total_files,
        store.chunk_count(),
        started,
        "index is up to date",
      )));
    }

    info!(
      changed = stats.changed,
      unchanged = stats.unchanged,
      too_large = stats.too_large,
      errors = stats.errors,
      "Pre-filter selected work"
    );

    // Pool init is best-effort: any failure means single-threaded embedding.
    let cpu_count = num_cpus::get();
    let worker_count = self.config.index.worker_threads.resolve(cpu_count);
    let mut pool = if cpu_count > 1 && worker_count > 1 {
      let pool_config = PoolConfig::new(worker_count, self.config.embedding.model.clone());
      match WorkerPool::init(pool_config, self.factory.clone()).await {
        Ok(pool) => Some(pool),
        Err(e) => {
          warn!(error = %e, "Worker pool unavailable, embedding single-threaded");
          None
        }
      }
    } else {
      None
    };

    let ctx = BatchContext {
      store: &self.store,
      chunker: self.chunker.as_ref(),
      chunking: &self.config.chunking,
      extractor: self.extractor.as_deref(),
      call_graph_enabled: self.config.index.call_graph_enabled,
      batch_size: self.config.index.batch_size,
      progress: self.progress.as_ref(),
      fallback: &self.fallback,
    };

    let pipeline_result = pipeline::run_batches(ctx, jobs, pool.as_mut()).await;

    if let Some(pool) = pool.as_mut() {
      pool.shutdown();
    }
    let stats = pipeline_result?;

    // ANN upkeep happens off the caller's latency path; failures only log.
    if self.config.index.ann_enabled {
      let store = self.store.clone();
      tokio::spawn(async move {
        if let Err(e) = store.lock().await.ensure_ann_index() {
          warn!(error = %e, "Vector index rebuild failed");
        }
      });
    }

    let total_chunks = self.store.lock().await.chunk_count();
    let message = format!(
      "indexed {} files ({} chunks) in {:.1}s",
      stats.files_processed,
      stats.chunks_created,
      started.elapsed().as_secs_f64()
    );
    info!(
      files = stats.files_processed,
      chunks = stats.chunks_created,
      total_chunks,
      "Full index complete"
    );
    self.emit(IndexProgress::complete(message.clone())).await;

    Ok(IndexOutcome::Completed(IndexSummary {
      files_processed: stats.files_processed,
      chunks_created: stats.chunks_created,
      total_files,
      total_chunks,
      duration: started.elapsed(),
      message,
    }))
  }

  /// Remove store records for files that discovery no longer sees.
  async fn prune_vanished(&self, discovered: &[PathBuf]) {
    let discovered: HashSet<String> = discovered.iter().map(|p| relative_key(&self.root, p)).collect();

    let mut store = self.store.lock().await;
    let stale: Vec<String> = store
      .indexed_files()
      .into_iter()
      .filter(|f| !discovered.contains(f))
      .collect();

    if stale.is_empty() {
      return;
    }

    info!(count = stale.len(), "Pruning records for vanished files");
    for file in &stale {
      store.purge_file(file);
    }
  }

  // ==========================================================================
  // Single-file path
  // ==========================================================================

  /// Index one file in place; returns the number of chunks added.
  ///
  /// Mirrors one pipeline iteration: exclusion check, stat, hash compare,
  /// remove-old, chunk, embed sequentially, commit, hash on full success.
  pub async fn index_file(&self, path: &Path) -> Result<u32, IndexError> {
    let relative = relative_key(&self.root, path);

    if self.excludes.is_excluded(Path::new(&relative)) {
      debug!(file = %relative, "File is excluded, skipping");
      return Ok(0);
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.is_dir() {
      return Ok(0);
    }
    if metadata.len() > self.config.index.max_file_size {
      debug!(file = %relative, size = metadata.len(), "File too large, skipping");
      return Ok(0);
    }

    let bytes = tokio::fs::read(path).await?;
    let Ok(content) = String::from_utf8(bytes) else {
      debug!(file = %relative, "File is not valid UTF-8, skipping");
      return Ok(0);
    };
    let hash = content_hash(content.as_bytes());

    {
      let store = self.store.lock().await;
      if store.file_hash(&relative) == Some(hash.as_str()) {
        debug!(file = %relative, "Content unchanged, skipping");
        return Ok(0);
      }
    }

    let chunks = self.chunker.chunk(&content, path, &self.config.chunking);
    let payloads: Vec<ChunkPayload> = chunks
      .into_iter()
      .map(|c| ChunkPayload {
        file: relative.clone(),
        start_line: c.start_line,
        end_line: c.end_line,
        content: c.text,
      })
      .collect();

    {
      let mut store = self.store.lock().await;
      store.remove_file_chunks(&relative);

      if self.config.index.call_graph_enabled {
        if let Some(extractor) = self.extractor.as_deref() {
          match extractor.extract(&content, path) {
            Ok(data) => store.set_file_call_data(&relative, data),
            Err(e) => warn!(file = %relative, error = %e, "Call extraction failed"),
          }
        }
      }
    }

    let total = payloads.len();
    let outcomes = self.fallback.embed_payloads(payloads).await;

    let mut added = 0u32;
    {
      let mut store = self.store.lock().await;
      for outcome in outcomes {
        match outcome.result {
          Ok(vector) => {
            added += 1;
            store.add_chunk(store::StoredChunk {
              file: outcome.file,
              start_line: outcome.start_line,
              end_line: outcome.end_line,
              content: outcome.content,
              vector,
            });
          }
          Err(e) => warn!(file = %outcome.file, error = %e, "Chunk embedding failed"),
        }
      }

      if total == 0 || added as usize == total {
        store.set_file_hash(&relative, &hash);
      }
    }

    debug!(file = %relative, chunks = added, "File indexed");
    Ok(added)
  }

  // ==========================================================================
  // Watch events
  // ==========================================================================

  /// Entry point for watcher events: queue while a full pass runs,
  /// otherwise handle inline.
  pub async fn dispatch_watch_event(&self, path: PathBuf, kind: WatchKind) {
    if self.is_indexing() {
      let mut pending = self.pending_watch_events.lock().await;
      // Later events for the same path win.
      pending.insert(path, kind);
      return;
    }

    self.handle_watch_event(&path, kind).await;
  }

  /// Number of queued watch events (coalesced by path).
  pub async fn queued_watch_events(&self) -> usize {
    self.pending_watch_events.lock().await.len()
  }

  /// Snapshot of the queued events, for diagnostics.
  pub async fn pending_watch_snapshot(&self) -> Vec<(PathBuf, WatchKind)> {
    let pending = self.pending_watch_events.lock().await;
    pending.iter().map(|(p, k)| (p.clone(), *k)).collect()
  }

  async fn handle_watch_event(&self, path: &Path, kind: WatchKind) {
    match kind {
      WatchKind::Add | WatchKind::Change => match self.index_file(path).await {
        Ok(chunks) => debug!(path = %path.display(), chunks, "Watched file reindexed"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to index watched file"),
      },
      WatchKind::Unlink => {
        let relative = relative_key(&self.root, path);
        let mut store = self.store.lock().await;
        store.purge_file(&relative);
        debug!(file = %relative, "Watched file removed from index");
      }
    }

    let store = self.store.lock().await;
    if let Err(e) = store.save() {
      warn!(error = %e, "Failed to persist store after watch event");
    }
  }

  /// Apply queued watch events; runs once per coordinator exit. Events
  /// arriving during the drain are handled inline by the watcher, since
  /// `is_indexing` is already false.
  async fn drain_pending_events(&self) {
    let drained: Vec<(PathBuf, WatchKind)> = {
      let mut pending = self.pending_watch_events.lock().await;
      pending.drain().collect()
    };

    if drained.is_empty() {
      return;
    }

    info!(count = drained.len(), "Applying queued watch events");
    for (path, kind) in drained {
      self.handle_watch_event(&path, kind).await;
    }
  }

  /// Watcher-side relevance filter: right extension, not excluded, not in
  /// a blocked directory.
  pub(crate) fn is_watch_candidate(&self, path: &Path, kind: WatchKind) -> bool {
    let relative = relative_key(&self.root, path);

    if relative.split('/').any(|segment| self.blocklist.contains(segment)) {
      return false;
    }

    let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
      return false;
    };
    if !self.extensions.contains(&extension.to_lowercase()) {
      return false;
    }

    if self.excludes.is_excluded(Path::new(&relative)) {
      return false;
    }

    // A deleted path can no longer be stat'ed; everything else skips dirs.
    kind == WatchKind::Unlink || !path.is_dir()
  }

  async fn emit(&self, progress: IndexProgress) {
    if let Some(tx) = &self.progress {
      let _ = tx.send(progress).await;
    }
  }
}
