//! Indexing error types.
//!
//! Most failures never surface here: per-file problems are counted and
//! logged by the stage that saw them, and worker infrastructure failures
//! degrade the pool to single-threaded embedding. What remains fatal is
//! I/O on the search root itself and store persistence.

use crate::{exclude::ExcludeError, watcher::WatcherError};

/// Errors that can occur during indexing
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("invalid exclude pattern: {0}")]
  Exclude(#[from] ExcludeError),

  #[error("store error: {0}")]
  Store(#[from] store::StoreError),

  #[error("embedding error: {0}")]
  Embedding(#[from] embedding::EmbeddingError),

  #[error("watcher error: {0}")]
  Watcher(#[from] WatcherError),
}
