//! Worker protocol messages.
//!
//! Coordinator -> worker requests travel over a per-worker std channel
//! (workers block on `recv` between batches); worker -> coordinator
//! messages come back over a per-worker tokio channel fed with
//! `blocking_send`. Every processed shard is tagged with a `batch_id`;
//! replies carrying any other id are ignored by the receiver.

/// Coordinator -> worker
#[derive(Debug)]
pub enum WorkerRequest {
  /// Embed a shard of chunks
  Process { batch_id: String, chunks: Vec<ChunkPayload> },
  /// Stop the worker thread
  Shutdown,
}

/// Worker -> coordinator
#[derive(Debug)]
pub enum WorkerMessage {
  /// The worker has loaded its model and can accept work
  Ready,
  /// Per-chunk outcomes for one shard
  Results { batch_id: String, results: Vec<EmbedOutcome> },
  /// The whole shard failed at the model level
  Error { batch_id: String, error: String },
}

/// One chunk queued for embedding.
#[derive(Debug, Clone)]
pub struct ChunkPayload {
  /// Forward-slash path relative to the search root
  pub file: String,
  pub start_line: u32,
  pub end_line: u32,
  pub content: String,
}

/// The result of embedding one chunk.
#[derive(Debug, Clone)]
pub struct EmbedOutcome {
  pub file: String,
  pub start_line: u32,
  pub end_line: u32,
  pub content: String,
  pub result: Result<Vec<f32>, String>,
}

impl EmbedOutcome {
  pub fn is_success(&self) -> bool {
    self.result.is_ok()
  }

  /// An outcome for a chunk that never reached a model.
  pub fn failed(chunk: ChunkPayload, reason: &str) -> Self {
    Self {
      file: chunk.file,
      start_line: chunk.start_line,
      end_line: chunk.end_line,
      content: chunk.content,
      result: Err(reason.to_string()),
    }
  }

  /// Rebuild the payload for a retry.
  pub fn into_payload(self) -> ChunkPayload {
    ChunkPayload {
      file: self.file,
      start_line: self.start_line,
      end_line: self.end_line,
      content: self.content,
    }
  }
}
