//! Worker thread body.
//!
//! Each worker loads its own embedder once, announces `Ready`, then blocks
//! on its request channel. Embedding is synchronous inside the thread; the
//! async side never waits on anything but channels.

use std::sync::{Arc, mpsc as std_mpsc};

use embedding::{EmbedOptions, Embedder, EmbedderFactory};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::messages::{ChunkPayload, EmbedOutcome, WorkerMessage, WorkerRequest};

pub(crate) fn worker_main(
  worker_id: usize,
  model_id: String,
  factory: Arc<dyn EmbedderFactory>,
  rx: std_mpsc::Receiver<WorkerRequest>,
  tx: mpsc::Sender<WorkerMessage>,
) {
  let embedder = match factory.load(&model_id) {
    Ok(embedder) => embedder,
    Err(e) => {
      // Dropping `tx` makes init fail fast instead of waiting out the
      // ready timeout.
      warn!(worker_id, error = %e, "Worker failed to load embedding model");
      return;
    }
  };

  if tx.blocking_send(WorkerMessage::Ready).is_err() {
    return;
  }
  debug!(worker_id, model = %model_id, "Worker ready");

  loop {
    match rx.recv() {
      Ok(WorkerRequest::Process { batch_id, chunks }) => {
        trace!(worker_id, batch_id = %batch_id, chunks = chunks.len(), "Processing shard");
        let results = embed_chunks(embedder.as_ref(), chunks);

        // Nothing succeeded: report a model-level failure for the shard.
        let message = if !results.is_empty() && results.iter().all(|r| !r.is_success()) {
          let error = results
            .first()
            .and_then(|r| r.result.as_ref().err().cloned())
            .unwrap_or_else(|| "embedding failed".to_string());
          WorkerMessage::Error { batch_id, error }
        } else {
          WorkerMessage::Results { batch_id, results }
        };

        if tx.blocking_send(message).is_err() {
          break;
        }
      }
      Ok(WorkerRequest::Shutdown) | Err(_) => break,
    }
  }

  trace!(worker_id, "Worker stopped");
}

/// Embed chunks sequentially with one embedder. Shared by workers and the
/// single-threaded fallback.
pub(crate) fn embed_chunks(embedder: &dyn Embedder, chunks: Vec<ChunkPayload>) -> Vec<EmbedOutcome> {
  let options = EmbedOptions::default();

  chunks
    .into_iter()
    .map(|chunk| {
      let result = embedder.embed(&chunk.content, &options).map_err(|e| e.to_string());
      EmbedOutcome {
        file: chunk.file,
        start_line: chunk.start_line,
        end_line: chunk.end_line,
        content: chunk.content,
        result,
      }
    })
    .collect()
}
