//! Embedding worker pool.
//!
//! N long-lived OS threads, each owning its own copy of the embedding
//! model. The async coordinator shards a batch across workers, tags each
//! shard with a `batch_id`, and collects per-worker replies with a timeout.
//! Any shard that times out, errors, or loses its worker is retried on the
//! caller's side with a single lazily-loaded embedder - pool trouble
//! degrades throughput, never correctness.

mod messages;
mod worker;

use std::{
  sync::{Arc, mpsc as std_mpsc},
  time::Duration,
};

use embedding::{Embedder, EmbedderFactory, EmbeddingError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use messages::{ChunkPayload, EmbedOutcome, WorkerMessage, WorkerRequest};
use worker::worker_main;
pub(crate) use worker::embed_chunks;

/// Per-worker wait for the `Ready` message.
pub const READY_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-shard wait for a `Results`/`Error` reply.
pub const SHARD_TIMEOUT: Duration = Duration::from_secs(300);

/// Pool sizing and timeouts.
#[derive(Debug, Clone)]
pub struct PoolConfig {
  pub workers: usize,
  pub model_id: String,
  pub ready_timeout: Duration,
  pub shard_timeout: Duration,
}

impl PoolConfig {
  pub fn new(workers: usize, model_id: impl Into<String>) -> Self {
    Self {
      workers: workers.max(1),
      model_id: model_id.into(),
      ready_timeout: READY_TIMEOUT,
      shard_timeout: SHARD_TIMEOUT,
    }
  }
}

pub(crate) struct WorkerHandle {
  pub(crate) id: usize,
  pub(crate) tx: std_mpsc::Sender<WorkerRequest>,
  pub(crate) rx: mpsc::Receiver<WorkerMessage>,
}

/// Errors initializing the pool. Callers fall back to single-threaded
/// embedding; these never propagate further.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
  #[error("failed to spawn worker thread: {0}")]
  Spawn(#[from] std::io::Error),

  #[error("worker {worker} failed during startup")]
  WorkerFailed { worker: usize },

  #[error("worker {worker} not ready within {timeout:?}")]
  ReadyTimeout { worker: usize, timeout: Duration },
}

/// A running pool of embedding workers.
pub struct WorkerPool {
  workers: Vec<WorkerHandle>,
  shard_timeout: Duration,
}

impl WorkerPool {
  /// Spawn `config.workers` threads and wait for each to load its model.
  ///
  /// All failures tear the partial pool down and return an error; the pool
  /// is never handed out half-ready.
  pub async fn init(config: PoolConfig, factory: Arc<dyn EmbedderFactory>) -> Result<Self, PoolError> {
    let mut workers = Vec::with_capacity(config.workers);

    for id in 0..config.workers {
      let (req_tx, req_rx) = std_mpsc::channel::<WorkerRequest>();
      let (msg_tx, msg_rx) = mpsc::channel::<WorkerMessage>(8);

      let model_id = config.model_id.clone();
      let factory = factory.clone();
      std::thread::Builder::new()
        .name(format!("embed-worker-{id}"))
        .spawn(move || worker_main(id, model_id, factory, req_rx, msg_tx))?;

      workers.push(WorkerHandle {
        id,
        tx: req_tx,
        rx: msg_rx,
      });
    }

    let mut pool = Self {
      workers,
      shard_timeout: config.shard_timeout,
    };

    for i in 0..pool.workers.len() {
      if let Err(e) = wait_ready(&mut pool.workers[i], config.ready_timeout).await {
        warn!(error = %e, "Worker pool startup failed, tearing down");
        pool.shutdown();
        return Err(e);
      }
    }

    info!(workers = pool.workers.len(), model = %config.model_id, "Worker pool ready");
    Ok(pool)
  }

  pub fn size(&self) -> usize {
    self.workers.len()
  }

  /// Embed a batch across the pool.
  ///
  /// The batch is split into at most `size()` shards of roughly equal
  /// size. Shards that fail (timeout, error reply, worker gone) are retried
  /// sequentially through `fallback`; the returned outcomes carry an `Err`
  /// result only when both paths failed.
  pub async fn process(&mut self, chunks: Vec<ChunkPayload>, fallback: &FallbackEmbedder) -> Vec<EmbedOutcome> {
    if chunks.is_empty() {
      return Vec::new();
    }

    let shard_count = self.workers.len().min(chunks.len()).max(1);
    let shard_size = chunks.len().div_ceil(shard_count);
    let shards: Vec<Vec<ChunkPayload>> = chunks.chunks(shard_size).map(|s| s.to_vec()).collect();

    debug!(chunks = shards.iter().map(Vec::len).sum::<usize>(), shards = shards.len(), "Dispatching batch to pool");

    let timeout = self.shard_timeout;
    let futures: Vec<_> = self
      .workers
      .iter_mut()
      .zip(shards)
      .map(|(worker, shard)| process_shard(worker, shard, timeout))
      .collect();

    let mut outcomes: Vec<EmbedOutcome> = futures::future::join_all(futures).await.concat();

    let failed_count = outcomes.iter().filter(|o| !o.is_success()).count();
    if failed_count > 0 {
      warn!(failed = failed_count, "Retrying failed chunks single-threaded");

      let (ok, failed): (Vec<_>, Vec<_>) = outcomes.into_iter().partition(EmbedOutcome::is_success);
      let retried = fallback
        .embed_payloads(failed.into_iter().map(EmbedOutcome::into_payload).collect())
        .await;

      outcomes = ok;
      outcomes.extend(retried);
    }

    outcomes
  }

  /// Ask every worker to stop and drop the handles. Workers that are mid-
  /// embed finish their shard and exit when they next read the channel.
  pub fn shutdown(&mut self) {
    for worker in self.workers.drain(..) {
      let _ = worker.tx.send(WorkerRequest::Shutdown);
    }
    debug!("Worker pool shut down");
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    self.shutdown();
  }
}

async fn wait_ready(worker: &mut WorkerHandle, timeout: Duration) -> Result<(), PoolError> {
  let deadline = tokio::time::Instant::now() + timeout;

  loop {
    match tokio::time::timeout_at(deadline, worker.rx.recv()).await {
      Ok(Some(WorkerMessage::Ready)) => return Ok(()),
      Ok(Some(message)) => {
        warn!(worker = worker.id, ?message, "Unexpected message before ready, ignoring");
      }
      Ok(None) => return Err(PoolError::WorkerFailed { worker: worker.id }),
      Err(_) => {
        return Err(PoolError::ReadyTimeout {
          worker: worker.id,
          timeout,
        });
      }
    }
  }
}

/// Send one shard to one worker and wait for its tagged reply.
async fn process_shard(worker: &mut WorkerHandle, shard: Vec<ChunkPayload>, timeout: Duration) -> Vec<EmbedOutcome> {
  let batch_id = uuid::Uuid::new_v4().to_string();
  // Kept so failed shards can be reconstructed for the retry path.
  let shard_copy = shard.clone();

  if worker
    .tx
    .send(WorkerRequest::Process {
      batch_id: batch_id.clone(),
      chunks: shard,
    })
    .is_err()
  {
    warn!(worker = worker.id, "Worker unavailable before dispatch");
    return failed_outcomes(shard_copy, "worker unavailable");
  }

  let deadline = tokio::time::Instant::now() + timeout;

  loop {
    match tokio::time::timeout_at(deadline, worker.rx.recv()).await {
      Ok(Some(WorkerMessage::Results { batch_id: id, results })) if id == batch_id => {
        return results;
      }
      Ok(Some(WorkerMessage::Error { batch_id: id, error })) if id == batch_id => {
        warn!(worker = worker.id, batch_id = %id, error = %error, "Worker reported shard failure");
        return failed_outcomes(shard_copy, &error);
      }
      Ok(Some(WorkerMessage::Results { batch_id: other, .. })) | Ok(Some(WorkerMessage::Error { batch_id: other, .. })) => {
        // Late reply from a previous (timed-out) shard.
        warn!(worker = worker.id, batch_id = %other, "Ignoring reply for unknown batch");
      }
      Ok(Some(WorkerMessage::Ready)) => {}
      Ok(None) => {
        warn!(worker = worker.id, batch_id = %batch_id, "Worker crashed");
        return failed_outcomes(shard_copy, "worker crashed");
      }
      Err(_) => {
        warn!(worker = worker.id, batch_id = %batch_id, timeout = ?timeout, "Shard timed out");
        return failed_outcomes(shard_copy, "shard timed out");
      }
    }
  }
}

fn failed_outcomes(chunks: Vec<ChunkPayload>, reason: &str) -> Vec<EmbedOutcome> {
  chunks.into_iter().map(|c| EmbedOutcome::failed(c, reason)).collect()
}

// ============================================================================
// Single-threaded fallback
// ============================================================================

/// Lazily-loaded embedder for the no-pool path and for shard retries.
///
/// The model loads at most once per indexer, on first use, off the async
/// runtime via `spawn_blocking`.
pub struct FallbackEmbedder {
  factory: Arc<dyn EmbedderFactory>,
  model_id: String,
  cell: tokio::sync::OnceCell<Arc<dyn Embedder>>,
}

impl FallbackEmbedder {
  pub fn new(factory: Arc<dyn EmbedderFactory>, model_id: impl Into<String>) -> Self {
    Self {
      factory,
      model_id: model_id.into(),
      cell: tokio::sync::OnceCell::new(),
    }
  }

  async fn embedder(&self) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    self
      .cell
      .get_or_try_init(|| async {
        let factory = self.factory.clone();
        let model_id = self.model_id.clone();
        tokio::task::spawn_blocking(move || factory.load(&model_id))
          .await
          .map_err(|e| EmbeddingError::ModelLoad {
            model: self.model_id.clone(),
            reason: e.to_string(),
          })?
      })
      .await
      .cloned()
  }

  /// Embed chunks sequentially on a blocking thread.
  pub async fn embed_payloads(&self, chunks: Vec<ChunkPayload>) -> Vec<EmbedOutcome> {
    if chunks.is_empty() {
      return Vec::new();
    }

    let embedder = match self.embedder().await {
      Ok(embedder) => embedder,
      Err(e) => {
        warn!(error = %e, "Fallback embedder unavailable");
        return failed_outcomes(chunks, &e.to_string());
      }
    };

    let copy = chunks.clone();
    match tokio::task::spawn_blocking(move || embed_chunks(embedder.as_ref(), chunks)).await {
      Ok(outcomes) => outcomes,
      Err(e) => {
        warn!(error = %e, "Fallback embedding task failed");
        failed_outcomes(copy, "embedding task failed")
      }
    }
  }
}
